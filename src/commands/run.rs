use super::load_config;
use devsup::config::parse_duration;
use devsup::{Error as SupervisorError, OutputMode, Status, Supervisor};
use std::path::PathBuf;

/// Drive the full lifecycle in the foreground until Ctrl-C or a crash.
pub async fn run_supervisor(
    config_path: Option<PathBuf>,
    watch: bool,
    output: Option<&str>,
    poll: &str,
) -> anyhow::Result<()> {
    let (mut config, base_dir) = load_config(config_path)?;
    if let Some(mode) = output {
        config.output = mode.parse::<OutputMode>()?;
    }
    let poll = parse_duration("--poll interval", poll)?;

    let endpoints = config.endpoints.clone();
    let supervisor = Supervisor::builder()
        .config(config)
        .base_dir(base_dir)
        .build()?;

    let mapping = supervisor.init(&endpoints, &[]).await?;
    for entry in mapping.iter() {
        if let Some(address) = entry.primary() {
            println!("  {} ({}) → {}", entry.endpoint.name, entry.endpoint.protocol, address);
        }
    }

    supervisor.configure(watch).await?;
    let handle = supervisor.start(&[]).await?;
    println!(
        "Started '{}' (pid {}), env written to {}",
        supervisor.name(),
        handle.pid,
        supervisor.env_file_path().display()
    );

    let mut ticker = tokio::time::interval(poll);
    let result: anyhow::Result<()> = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, stopping '{}'", supervisor.name());
                break Ok(());
            }
            _ = ticker.tick() => {
                let information = supervisor.information();
                match information.status {
                    Status::RestartWanted => {
                        if let Some(path) = &information.restart_reason {
                            println!("Change detected in {}, restarting", path.display());
                        }
                        if let Err(e) = restart(&supervisor).await {
                            break Err(e.into());
                        }
                    }
                    Status::Error(detail) => {
                        let recent = supervisor.recent_output(20);
                        if !recent.is_empty() {
                            eprintln!("Last output:\n{}", recent.join("\n"));
                        }
                        break Err(SupervisorError::Process(detail).into());
                    }
                    _ => {}
                }
            }
        }
    };

    if let Err(e) = supervisor.stop().await {
        tracing::error!("Failed to stop '{}': {}", supervisor.name(), e);
    }
    result
}

async fn restart(supervisor: &Supervisor) -> devsup::Result<()> {
    supervisor.stop().await?;
    let handle = supervisor.start(&[]).await?;
    println!("Restarted '{}' (pid {})", supervisor.name(), handle.pid);
    Ok(())
}
