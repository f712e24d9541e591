mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use devsup::Error as SupervisorError;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        if let Some(supervisor_error) = e.downcast_ref::<SupervisorError>() {
            eprintln!("Error: {}", supervisor_error);
            if let Some(suggestion) = supervisor_error.suggestion() {
                eprintln!("\nHint: {}", suggestion);
            }
        } else {
            eprintln!("Error: {:#}", e);
        }
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    match cli.command {
        Commands::Run {
            no_watch,
            output,
            poll,
        } => commands::run_supervisor(cli.config, !no_watch, output.as_deref(), &poll).await,
        Commands::Ports { json } => commands::run_ports(cli.config, json).await,
        Commands::Validate => commands::run_validate(cli.config),
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}
