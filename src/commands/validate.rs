use devsup::Parser as ConfigParser;
use std::path::PathBuf;

pub fn run_validate(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let parser = ConfigParser::new();
    let config_path = match config_path {
        Some(path) => path,
        None => match parser.find_config_file() {
            Ok(path) => path,
            Err(_) => {
                eprintln!("Error: No configuration file found");
                eprintln!("\nSearched for supervisor.yaml in:");
                eprintln!(
                    "  - Current directory: {}",
                    std::env::current_dir()?.display()
                );
                eprintln!("  - Parent directories up to root");
                return Err(anyhow::anyhow!("Configuration file not found"));
            }
        },
    };

    println!("Validating {}...", config_path.display());

    let config = match parser.load_config(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration failed to load");
            return Err(e.into());
        }
    };

    println!("Configuration is valid\n");
    println!("Service: {} ({} {})", config.name, config.command, config.args.join(" "));

    if !config.endpoints.is_empty() {
        println!("\nEndpoints: {}", config.endpoints.len());
        for endpoint in &config.endpoints {
            println!(
                "  - {} ({}{})",
                endpoint.name,
                endpoint.protocol,
                if endpoint.is_public() { ", public" } else { "" }
            );
        }
    }

    println!(
        "\nPorts: {}-{} (max {} attempts)",
        config.ports.start, config.ports.end, config.ports.max_attempts
    );
    println!("Grace period: {:?}", config.get_grace_period());
    println!("Env file: {}", config.env_file);

    match &config.watch {
        Some(watch) if watch.enabled => {
            let roots = if watch.roots.is_empty() {
                "working directory".to_string()
            } else {
                watch.roots.join(", ")
            };
            println!("Hot reload: {}", roots);
        }
        _ => println!("Hot reload: off"),
    }

    if let Some(resync) = &config.resync {
        println!("Resync: {} {}", resync.command, resync.args.join(" "));
    }

    if !config.providers.is_empty() {
        println!("\nProviders: {}", config.providers.len());
        for provider in &config.providers {
            println!("  - {}", provider.name);
        }
    }

    Ok(())
}
