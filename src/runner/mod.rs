//! Running exactly one child process at a time.

mod output;
mod process;

pub use output::*;
pub use process::*;

use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::{broadcast, watch};

/// Where the child's stdout/stderr go.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// Piped into a ring buffer and broadcast as [`OutputEvent`]s.
    #[default]
    Captured,
    /// Inherit the supervisor's stdio.
    Passthrough,
}

impl OutputMode {
    pub fn is_captured(&self) -> bool {
        matches!(self, OutputMode::Captured)
    }
}

impl fmt::Display for OutputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputMode::Captured => write!(f, "captured"),
            OutputMode::Passthrough => write!(f, "passthrough"),
        }
    }
}

impl FromStr for OutputMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "captured" => Ok(OutputMode::Captured),
            "passthrough" => Ok(OutputMode::Passthrough),
            other => Err(Error::Config(format!(
                "unknown output mode '{}' (expected captured or passthrough)",
                other
            ))),
        }
    }
}

/// Everything needed to spawn the child.
///
/// `env` is the complete environment: nothing is inherited from the
/// supervisor beyond what the caller put here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: HashMap<String, String>,
}

impl RunSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn env<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }
}

/// How a child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExitInfo {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ExitInfo {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<std::process::ExitStatus> for ExitInfo {
    fn from(status: std::process::ExitStatus) -> Self {
        use std::os::unix::process::ExitStatusExt;
        Self {
            code: status.code(),
            signal: status.signal(),
        }
    }
}

impl fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {}", code),
            (None, Some(signal)) => match nix::sys::signal::Signal::try_from(signal) {
                Ok(sig) => write!(f, "killed by {}", sig),
                Err(_) => write!(f, "killed by signal {}", signal),
            },
            (None, None) => write!(f, "unknown exit status"),
        }
    }
}

/// A started process. Cloning shares the same exit notification.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    exit: watch::Receiver<Option<ExitInfo>>,
}

impl ProcessHandle {
    pub fn new(
        pid: u32,
        started_at: DateTime<Utc>,
        exit: watch::Receiver<Option<ExitInfo>>,
    ) -> Self {
        Self {
            pid,
            started_at,
            exit,
        }
    }

    pub fn exit_info(&self) -> Option<ExitInfo> {
        *self.exit.borrow()
    }

    pub fn has_exited(&self) -> bool {
        self.exit.borrow().is_some()
    }

    /// Resolves once the process has exited.
    ///
    /// If the reaper went away without reporting (runtime shutdown), the
    /// exit status is reported as unknown.
    pub async fn wait(&self) -> ExitInfo {
        let mut exit = self.exit.clone();
        let info = match exit.wait_for(Option::is_some).await {
            Ok(info) => (*info).unwrap_or(ExitInfo {
                code: None,
                signal: None,
            }),
            Err(_) => ExitInfo {
                code: None,
                signal: None,
            },
        };
        info
    }

    pub async fn wait_timeout(&self, timeout: Duration) -> Option<ExitInfo> {
        tokio::time::timeout(timeout, self.wait()).await.ok()
    }
}

/// Capability used by the supervisor to run its child.
#[async_trait]
pub trait Runner: Send + Sync {
    /// Check that `spec` could be spawned without spawning it.
    fn prepare(&self, spec: &RunSpec) -> Result<()>;

    /// Start the process, terminating a live previous one first. Returns
    /// once the pid is known.
    async fn run(&self, spec: RunSpec) -> Result<ProcessHandle>;

    /// Terminate the live process. A no-op when nothing is running.
    async fn kill(&self) -> Result<()>;

    /// Pid of the live process, if any. Never blocks.
    fn pid(&self) -> Option<u32>;

    fn subscribe(&self) -> broadcast::Receiver<OutputEvent>;

    fn recent_output(&self, lines: usize) -> Vec<String>;
}
