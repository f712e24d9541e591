//! Configuration parsing and types.
//!
//! - `types` - [`SupervisorConfig`] and its sections, [`ProviderInfo`]
//! - `parser` - YAML discovery, loading and validation
//! - `duration` - "10s"-style duration strings
//! - `env_loader` - dotenv files and provider resolution

pub mod env_loader;

mod duration;
mod parser;
mod types;

pub use duration::*;
pub use env_loader::{load_env_file, resolve_providers, validate_env_name};
pub use parser::*;
pub use types::*;
