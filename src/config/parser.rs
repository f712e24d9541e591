use super::SupervisorConfig;
use crate::error::{Error, Result};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAMES: &[&str] = &["supervisor.yaml", "supervisor.yml"];

pub struct Parser;

impl Parser {
    pub fn new() -> Self {
        Self
    }

    /// Find config file starting from current directory
    pub fn find_config_file(&self) -> Result<PathBuf> {
        let current_dir = std::env::current_dir()?;
        Self::find_config_in_dir(&current_dir)
    }

    pub fn find_config_in_dir(dir: &Path) -> Result<PathBuf> {
        for name in CONFIG_FILE_NAMES {
            let candidate = dir.join(name);
            if candidate.exists() {
                return Ok(candidate);
            }
        }

        if let Some(parent) = dir.parent() {
            return Self::find_config_in_dir(parent);
        }

        Err(Error::Config(
            "Could not find supervisor.yaml in current directory or any parent".to_string(),
        ))
    }

    /// Load and validate config from a file path
    pub fn load_config<P: AsRef<Path>>(&self, path: P) -> Result<SupervisorConfig> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Config(format!(
                "Failed to read config file '{}': {}",
                path.as_ref().display(),
                e
            ))
        })?;

        self.parse_config(&content)
    }

    pub fn parse_config(&self, content: &str) -> Result<SupervisorConfig> {
        let config: SupervisorConfig = serde_yaml::from_str(content)?;
        validate(&config)?;
        Ok(config)
    }
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

pub fn validate(config: &SupervisorConfig) -> Result<()> {
    if config.name.trim().is_empty() {
        return Err(Error::Config("`name` must not be empty".to_string()));
    }
    if config.command.trim().is_empty() {
        return Err(Error::Config("`command` must not be empty".to_string()));
    }
    if config.host.trim().is_empty() {
        return Err(Error::Config("`host` must not be empty".to_string()));
    }

    let mut seen = HashSet::new();
    for endpoint in &config.endpoints {
        if endpoint.name.trim().is_empty() {
            return Err(Error::Config("endpoint names must not be empty".to_string()));
        }
        if !seen.insert(endpoint.name.as_str()) {
            return Err(Error::Config(format!(
                "duplicate endpoint '{}'",
                endpoint.name
            )));
        }
    }

    let range = config.ports.range();
    if range.is_empty() || range.start == 0 {
        return Err(Error::Config(format!(
            "invalid port range {}-{}",
            config.ports.start, config.ports.end
        )));
    }
    if config.ports.max_attempts == 0 {
        return Err(Error::Config(
            "`ports.max_attempts` must be greater than zero".to_string(),
        ));
    }
    if range.len() < config.endpoints.len() as u32 {
        return Err(Error::Config(format!(
            "port range {}-{} is smaller than the {} declared endpoint(s)",
            range.start,
            range.end,
            config.endpoints.len()
        )));
    }

    if let Some(grace) = &config.grace_period {
        super::parse_duration("grace_period", grace)?;
    }

    for key in config.environment.keys() {
        super::validate_env_name(key)?;
    }

    Ok(())
}
