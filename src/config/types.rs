//! Supervisor configuration types.

use super::parse_duration_string;
use crate::network::{Endpoint, PortRange, DEFAULT_MAX_ATTEMPTS};
use crate::runner::OutputMode;
use crate::watch::WatchConfig;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_ENV_FILE: &str = ".env.local";
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Parent environment variables forwarded to the child when `pass_through`
/// is not set. Nothing else is inherited.
pub const DEFAULT_PASS_THROUGH: &[&str] = &["PATH", "HOME", "USER", "LANG", "TERM", "TMPDIR"];

/// Configuration of one supervised service.
///
/// Loaded once (see [`super::Parser`]) and handed to the supervisor builder;
/// nothing in the crate reads configuration from globals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    pub name: String,

    /// Program to run. Resolved against `PATH` unless it contains a `/`.
    pub command: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    /// Working directory, relative to the config file's directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub endpoints: Vec<Endpoint>,

    #[serde(default)]
    pub ports: PortSettings,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub watch: Option<WatchSettings>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub resync: Option<ResyncSettings>,

    /// Grace period between SIGTERM and SIGKILL (e.g. "10s", "500ms").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grace_period: Option<String>,

    #[serde(default = "default_env_file")]
    pub env_file: String,

    /// Static variables added to every start.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pass_through: Option<Vec<String>>,

    #[serde(default)]
    pub output: OutputMode,

    /// Providers that Init must receive (or load from `env_file`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub providers: Vec<ProviderSettings>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSettings {
    #[serde(default = "default_port_start")]
    pub start: u16,
    #[serde(default = "default_port_end")]
    pub end: u16,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for PortSettings {
    fn default() -> Self {
        let range = PortRange::default();
        Self {
            start: range.start,
            end: range.end,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl PortSettings {
    pub fn range(&self) -> PortRange {
        PortRange::new(self.start, self.end)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Directories to watch, relative to the config file's directory.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roots: Vec<String>,

    /// Extra names/patterns excluded on top of the built-in list.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,

    /// File extensions treated as interface definitions (default: proto).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub idl_extensions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResyncSettings {
    pub command: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

/// A named source of auxiliary variables (credentials and the like).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub name: String,
    /// Dotenv file providing the values, relative to the config directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env_file: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub values: BTreeMap<String, String>,
}

/// Provider values handed to `Init` by the orchestrator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub name: String,
    #[serde(default)]
    pub values: BTreeMap<String, String>,
}

impl ProviderInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }
}

impl SupervisorConfig {
    /// Minimal config for `command`; mostly useful in tests and embedding.
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            cwd: None,
            host: default_host(),
            endpoints: Vec::new(),
            ports: PortSettings::default(),
            watch: None,
            resync: None,
            grace_period: None,
            env_file: default_env_file(),
            environment: BTreeMap::new(),
            pass_through: None,
            output: OutputMode::default(),
            providers: Vec::new(),
        }
    }

    pub fn get_grace_period(&self) -> Duration {
        self.grace_period
            .as_ref()
            .and_then(|s| parse_duration_string(s))
            .unwrap_or(DEFAULT_GRACE_PERIOD)
    }

    pub fn pass_through_names(&self) -> Vec<String> {
        match &self.pass_through {
            Some(names) => names.clone(),
            None => DEFAULT_PASS_THROUGH.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Pass-through variables present in the current process environment.
    pub fn pass_through_values(&self) -> HashMap<String, String> {
        self.pass_through_names()
            .into_iter()
            .filter_map(|name| std::env::var(&name).ok().map(|v| (name, v)))
            .collect()
    }

    pub fn working_dir(&self, base: &Path) -> PathBuf {
        match &self.cwd {
            Some(cwd) if Path::new(cwd).is_absolute() => PathBuf::from(cwd),
            Some(cwd) => base.join(cwd),
            None => base.to_path_buf(),
        }
    }

    /// The watch configuration, or `None` when hot reload is off.
    ///
    /// With no explicit roots the working directory is watched.
    pub fn watch_config(&self, base: &Path) -> Option<WatchConfig> {
        let settings = self.watch.as_ref()?;
        if !settings.enabled {
            return None;
        }
        let roots = if settings.roots.is_empty() {
            vec![self.working_dir(base)]
        } else {
            settings.roots.iter().map(|r| base.join(r)).collect()
        };
        let mut config = WatchConfig::new(roots).exclude(settings.exclude.iter().cloned());
        if !settings.idl_extensions.is_empty() {
            config = config.idl_extensions(settings.idl_extensions.iter().cloned());
        }
        Some(config)
    }
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_env_file() -> String {
    DEFAULT_ENV_FILE.to_string()
}

fn default_port_start() -> u16 {
    PortRange::default().start
}

fn default_port_end() -> u16 {
    PortRange::default().end
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_true() -> bool {
    true
}
