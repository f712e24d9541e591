//! Restart coordination: turns change events into `RestartWanted`.
//!
//! The handler never stops or restarts the process itself. It only marks
//! the status; the orchestrator notices through `Information` and drives
//! `Stop`/`Start`.

use super::state::SharedState;
use super::{Resync, Status};
use crate::watch::ChangeEvent;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub(crate) struct RestartHandler {
    service_name: String,
    state: SharedState,
    resync: Option<Arc<dyn Resync>>,
}

impl RestartHandler {
    pub fn new(
        service_name: impl Into<String>,
        state: SharedState,
        resync: Option<Arc<dyn Resync>>,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            state,
            resync,
        }
    }

    fn accepting(&self) -> bool {
        self.state.read().status.is_running()
    }

    pub async fn handle(&self, event: ChangeEvent) {
        if !self.accepting() {
            tracing::trace!("Ignoring change to {} (not running)", event.path.display());
            return;
        }

        if event.is_idl {
            if let Some(resync) = &self.resync {
                tracing::info!(
                    "Interface definition {} changed, resyncing '{}'",
                    event.path.display(),
                    self.service_name
                );
                if let Err(e) = resync.regenerate(&event.path).await {
                    tracing::warn!(
                        "Resync for {} failed, requesting restart anyway: {}",
                        event.path.display(),
                        e
                    );
                }
            }
        }

        let mut state = self.state.write();
        // Stop may have begun while resync ran
        if !state.status.is_running() {
            return;
        }
        if state.status == Status::Started {
            tracing::info!(
                "Restart wanted for '{}': {} changed",
                self.service_name,
                event.path.display()
            );
        }
        state.transition(Status::RestartWanted);
        state.restart_reason = Some(event.path);
    }

    /// Consume events in arrival order until cancelled or the watcher
    /// closes the channel.
    pub async fn run(self, mut events: mpsc::UnboundedReceiver<ChangeEvent>, cancel: CancellationToken) {
        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = self.handle(event) => {}
            }
        }
        tracing::debug!("Change handler for '{}' stopped", self.service_name);
    }
}
