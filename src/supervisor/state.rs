use super::{Operation, Status};
use crate::config::ProviderInfo;
use crate::network::NetworkMapping;
use crate::watch::WatchConfig;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

/// Snapshot returned by `Information`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Information {
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// The change that caused `RestartWanted`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart_reason: Option<PathBuf>,
    /// Why the last cycle failed; kept after `Stop` until the next `Init`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Everything the lifecycle mutates, behind one lock.
///
/// Written by the operation path, the restart handler and the exit monitor;
/// read by `Information` at any time. The lock is `parking_lot` and never
/// held across an await.
#[derive(Debug)]
pub(crate) struct SupervisorState {
    pub status: Status,
    pub mapping: Option<NetworkMapping>,
    pub providers: Vec<ProviderInfo>,
    /// Hot reload requested by `Configure`; re-armed on every `Start`.
    pub watch: Option<WatchConfig>,
    /// Pid whose exit would be a crash. Cleared before intentional kills.
    pub live_pid: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub restart_reason: Option<PathBuf>,
    pub last_error: Option<String>,
}

pub(crate) type SharedState = Arc<RwLock<SupervisorState>>;

impl SupervisorState {
    pub fn new() -> Self {
        Self {
            status: Status::Uninitialized,
            mapping: None,
            providers: Vec::new(),
            watch: None,
            live_pid: None,
            started_at: None,
            restart_reason: None,
            last_error: None,
        }
    }

    /// Like [`Status::accepts`], but a cycle that failed and was then
    /// stopped still needs a fresh `Init` before it can start again.
    pub fn accepts(&self, operation: Operation) -> bool {
        match operation {
            Operation::Init if self.status == Status::Stopped => self.last_error.is_some(),
            Operation::Start if self.last_error.is_some() => false,
            _ => self.status.accepts(operation),
        }
    }

    /// Move to `to` if the state machine allows it.
    pub fn transition(&mut self, to: Status) -> bool {
        if !self.status.is_valid_transition(&to) {
            tracing::warn!("Refusing status transition {} -> {}", self.status, to);
            return false;
        }
        if self.status != to {
            tracing::debug!("Status {} -> {}", self.status, to);
        }
        self.status = to;
        true
    }

    pub fn fail(&mut self, detail: impl Into<String>) {
        let detail = detail.into();
        tracing::debug!("Status {} -> error: {}", self.status, detail);
        self.last_error = Some(detail.clone());
        self.status = Status::Error(detail);
    }

    pub fn information(&self) -> Information {
        Information {
            status: self.status.clone(),
            pid: self.live_pid,
            started_at: self.started_at,
            restart_reason: self.restart_reason.clone(),
            last_error: self.last_error.clone(),
        }
    }
}
