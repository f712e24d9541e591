use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a supervisor.
///
/// ```text
/// Uninitialized ──Init──► Initializing ──► Configuring ──Start──► Started
///                                                                   │ change
///        Stopped ◄── Stopping ◄──────────Stop──────────────── RestartWanted
///           │
///           └──Start──► Started
/// ```
///
/// Any operation may fail into `Error(detail)`. `Error` ends the cycle; only
/// a fresh `Init` leaves it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum Status {
    Uninitialized,
    Initializing,
    Configuring,
    Started,
    RestartWanted,
    Stopping,
    Stopped,
    Error(String),
}

/// Orchestrator-facing operations that change state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Init,
    Configure,
    Start,
    Stop,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Init => write!(f, "init"),
            Operation::Configure => write!(f, "configure"),
            Operation::Start => write!(f, "start"),
            Operation::Stop => write!(f, "stop"),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Error(detail) => write!(f, "error: {}", detail),
            other => write!(f, "{}", other.name()),
        }
    }
}

impl Status {
    pub fn name(&self) -> &'static str {
        match self {
            Status::Uninitialized => "uninitialized",
            Status::Initializing => "initializing",
            Status::Configuring => "configuring",
            Status::Started => "started",
            Status::RestartWanted => "restart_wanted",
            Status::Stopping => "stopping",
            Status::Stopped => "stopped",
            Status::Error(_) => "error",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Status::Error(_))
    }

    /// A process is expected to be alive.
    pub fn is_running(&self) -> bool {
        matches!(self, Status::Started | Status::RestartWanted)
    }

    /// Whether `operation` may be called in this status.
    ///
    /// `Stop` is always accepted: from `Uninitialized` or `Stopped` it is a
    /// no-op, from `Error` it releases resources and ends at `Stopped`.
    pub fn accepts(&self, operation: Operation) -> bool {
        use Status::*;
        match operation {
            Operation::Init => matches!(self, Uninitialized | Error(_)),
            Operation::Configure | Operation::Start => {
                matches!(self, Configuring | Started | RestartWanted | Stopped)
            }
            Operation::Stop => true,
        }
    }

    /// Check if a status transition is valid according to the state machine.
    ///
    /// # Examples
    ///
    /// ```
    /// use devsup::supervisor::Status;
    ///
    /// assert!(Status::Started.is_valid_transition(&Status::RestartWanted));
    /// assert!(Status::Stopped.is_valid_transition(&Status::Started));
    /// assert!(!Status::Stopping.is_valid_transition(&Status::RestartWanted));
    /// ```
    pub fn is_valid_transition(&self, to: &Status) -> bool {
        use Status::*;
        match (self, to) {
            (Uninitialized, Initializing) => true,
            // Retry from scratch after a failed cycle
            (Error(_), Initializing) => true,

            (Initializing, Configuring) => true,

            (Configuring, Started) => true,
            (Configuring, Stopping) => true,

            (Started, RestartWanted) => true,
            // Start while running replaces the process
            (Started, Started) => true,
            (Started, Stopping) => true,

            (RestartWanted, Started) => true,
            (RestartWanted, Stopping) => true,

            (Stopping, Stopped) => true,
            // Stop after a failure still releases everything
            (Error(_), Stopping) => true,

            (Stopped, Started) => true,
            // Only after a failed cycle; see `SupervisorState::accepts`
            (Stopped, Initializing) => true,

            // Failure is reachable from every state an operation can run in
            (Stopping, Error(_)) => false,
            (_, Error(_)) => true,

            (s1, s2) => s1 == s2,
        }
    }
}
