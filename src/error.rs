// Allow unused_assignments at module level because thiserror's generated code
// for struct variants triggers false positive warnings - the fields ARE used
// in the Display impl but rustc's lint pass doesn't see this.
#![allow(unused_assignments)]

use miette::Diagnostic;
use std::io;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    #[diagnostic(
        code(devsup::config::error),
        help("Run `supd validate` to check your supervisor.yaml")
    )]
    Config(String),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("'{operation}' is not allowed while the supervisor is {status}")]
    #[diagnostic(
        code(devsup::lifecycle::usage),
        help("Operations must follow Init -> Configure -> Start -> Stop")
    )]
    Usage { operation: String, status: String },

    #[error("No free port for endpoint '{endpoint}' after {attempts} attempts")]
    #[diagnostic(
        code(devsup::port::exhausted),
        help("Widen the `ports` range in supervisor.yaml or free some local ports")
    )]
    PortExhausted { endpoint: String, attempts: u32 },

    #[error("Port allocation failed: {0}")]
    #[diagnostic(code(devsup::port::allocation_failed))]
    PortAllocation(String),

    #[error("Failed to spawn '{program}': {reason}")]
    #[diagnostic(
        code(devsup::process::spawn_failed),
        help("Check that the command exists on PATH and that `cwd` points to a directory")
    )]
    SpawnFailed { program: String, reason: String },

    #[error("Process error: {0}")]
    #[diagnostic(code(devsup::process::error))]
    Process(String),

    #[error("Could not terminate process {pid}: {reason}")]
    #[diagnostic(
        code(devsup::process::termination),
        help("Inspect the process with `ps -o pid,pgid,stat,command -p {pid}`")
    )]
    Termination { pid: u32, reason: String },

    #[error("Invalid PID {pid}: {reason}")]
    InvalidPid { pid: u32, reason: String },

    #[error("Watch error: {0}")]
    #[diagnostic(code(devsup::watch::error))]
    Watch(String),

    #[error("Resync failed: {0}")]
    #[diagnostic(code(devsup::resync::failed))]
    Resync(String),

    #[error("Provider '{0}' was not supplied")]
    #[diagnostic(
        code(devsup::provider::not_found),
        help("The orchestrator must pass provider information for '{0}' to Init")
    )]
    ProviderNotFound(String),

    #[error("Environment file '{path}': {reason}")]
    EnvironmentFile { path: String, reason: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns a helpful suggestion for resolving this error, if available.
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Error::PortExhausted { endpoint, .. } => Some(format!(
                "Every candidate port for '{}' was busy. Widen `ports.start`/`ports.end` or raise `ports.max_attempts`.",
                endpoint
            )),
            Error::SpawnFailed { program, .. } => Some(format!(
                "Make sure '{}' is installed and on PATH (or listed in `pass_through`), and that `cwd` exists.",
                program
            )),
            Error::Usage { operation, .. } if operation == "start" => Some(
                "Call Init (and Configure) before Start; after an error a fresh Init is required.".to_string()
            ),
            Error::Usage { .. } => Some(
                "The lifecycle is Init -> Configure -> Start -> Stop.".to_string()
            ),
            Error::Config(_) => Some("Validate your config with: supd validate".to_string()),
            Error::ProviderNotFound(name) => Some(format!(
                "Add a `providers` entry named '{}' with inline `values` or an `env_file`.",
                name
            )),
            Error::Termination { pid, .. } => Some(format!(
                "The process group of PID {} ignored SIGTERM and SIGKILL; it may be stuck in uninterruptible I/O.",
                pid
            )),
            _ => None,
        }
    }

    /// Formats the error with its suggestion (if any) for user-friendly display.
    pub fn with_suggestion(&self) -> String {
        match self.suggestion() {
            Some(suggestion) => format!("{}\n\nHint: {}", self, suggestion),
            None => self.to_string(),
        }
    }
}

/// Validates and converts a u32 PID to nix::unistd::Pid safely.
/// Returns Err for PID 0 (process group), PID 1 (init), or values > i32::MAX.
pub fn validate_pid(pid: u32) -> Result<nix::unistd::Pid> {
    if pid == 0 {
        return Err(Error::InvalidPid {
            pid,
            reason: "PID 0 refers to the calling process group, not a process".to_string(),
        });
    }
    if pid == 1 {
        return Err(Error::InvalidPid {
            pid,
            reason: "refusing to signal PID 1 (init)".to_string(),
        });
    }
    if pid > i32::MAX as u32 {
        return Err(Error::InvalidPid {
            pid,
            reason: "exceeds i32::MAX, cannot convert safely".to_string(),
        });
    }
    Ok(nix::unistd::Pid::from_raw(pid as i32))
}
