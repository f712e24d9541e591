use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "supd")]
#[command(about = "Supervise a development service: ports, .env.local, hot reload")]
pub struct Cli {
    /// Config file path (defaults to supervisor.yaml, searched upwards)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Init, configure and start the service, restarting it on changes
    Run {
        /// Disable hot reload even if the config enables it
        #[arg(long)]
        no_watch: bool,

        /// Output mode for the child process.
        /// - captured: pipe output through the supervisor's log (default)
        /// - passthrough: inherit stdio
        #[arg(long, value_name = "MODE")]
        output: Option<String>,

        /// How often to poll for a wanted restart (e.g. 500ms, 1s)
        #[arg(long, default_value = "500ms")]
        poll: String,
    },
    /// Allocate ports for the declared endpoints and print the mapping
    Ports {
        /// Print the mapping as JSON
        #[arg(long)]
        json: bool,
    },
    /// Validate the configuration file
    Validate,
}
