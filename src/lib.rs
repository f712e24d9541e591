//! # devsup
//!
//! A development-time supervisor for one service process.
//!
//! ## Features
//!
//! - **Port Allocation**: scan-and-bind allocation of free local ports for each declared endpoint
//! - **Environment Synthesis**: endpoint addresses and provider values as `KEY=VALUE`, written to `.env.local` on every start
//! - **Hot Reload**: recursive source watching with exclusions; IDL changes trigger a resync first
//! - **Process Control**: one child per supervisor, in its own process group, with graceful-then-forceful termination
//! - **Advisory Restarts**: changes only mark `RestartWanted`; the orchestrator decides when to restart
//!
//! ## Quick Start
//!
//! ```no_run
//! use devsup::{Parser, Supervisor};
//!
//! # async fn example() -> Result<(), devsup::Error> {
//! let config = Parser::new().load_config("supervisor.yaml")?;
//! let endpoints = config.endpoints.clone();
//!
//! let supervisor = Supervisor::builder()
//!     .config(config)
//!     .base_dir(".")
//!     .build()?;
//!
//! let mapping = supervisor.init(&endpoints, &[]).await?;
//! supervisor.configure(true).await?;
//! let handle = supervisor.start(&[]).await?;
//! println!("pid {} serving {:?}", handle.pid, mapping.ports());
//!
//! // Poll supervisor.information() for RestartWanted, then:
//! supervisor.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod environment;
pub mod error;
pub mod network;
pub mod runner;
pub mod supervisor;
pub mod watch;

// Re-export commonly used types
pub use config::{Parser, ProviderInfo, SupervisorConfig};
pub use environment::EnvironmentVariables;
pub use error::{Error, Result};
pub use network::{Endpoint, NetworkMapping, PortAllocator, Protocol, Visibility};
pub use runner::{OutputMode, ProcessHandle, ProcessRunner};
pub use supervisor::{Information, Status, Supervisor, SupervisorBuilder};
pub use watch::{ChangeEvent, SourceWatcher, WatchConfig};
