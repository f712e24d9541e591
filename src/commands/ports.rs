use super::load_config;
use devsup::Supervisor;
use std::path::PathBuf;

/// Run `Init` only and print the resulting mapping.
pub async fn run_ports(config_path: Option<PathBuf>, json: bool) -> anyhow::Result<()> {
    let (config, base_dir) = load_config(config_path)?;
    let endpoints = config.endpoints.clone();
    let supervisor = Supervisor::builder()
        .config(config)
        .base_dir(base_dir)
        .build()?;

    let mapping = supervisor.init(&endpoints, &[]).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&mapping)?);
        return Ok(());
    }

    if mapping.is_empty() {
        println!("No endpoints declared for '{}'", mapping.service);
        return Ok(());
    }

    println!("Endpoints for '{}':", mapping.service);
    for entry in mapping.iter() {
        let addresses: Vec<String> = entry.addresses.iter().map(ToString::to_string).collect();
        println!(
            "  {:<16} {:<6} {:<8} {}",
            entry.endpoint.name,
            entry.endpoint.protocol,
            if entry.endpoint.is_public() {
                "public"
            } else {
                "private"
            },
            addresses.join(", ")
        );
    }
    Ok(())
}
