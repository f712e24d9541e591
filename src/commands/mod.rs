mod ports;
mod run;
mod validate;

pub use ports::run_ports;
pub use run::run_supervisor;
pub use validate::run_validate;

use devsup::{Parser as ConfigParser, SupervisorConfig};
use std::path::{Path, PathBuf};

/// Load the config and return it with the directory its relative paths
/// resolve against.
fn load_config(config_path: Option<PathBuf>) -> anyhow::Result<(SupervisorConfig, PathBuf)> {
    let parser = ConfigParser::new();
    let path = match config_path {
        Some(path) => path,
        None => parser.find_config_file()?,
    };
    let config = parser.load_config(&path)?;
    Ok((config, base_dir_of(&path)?))
}

fn base_dir_of(config_path: &Path) -> anyhow::Result<PathBuf> {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => Ok(parent.to_path_buf()),
        _ => Ok(std::env::current_dir()?),
    }
}
