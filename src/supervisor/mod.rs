//! The lifecycle supervisor.
//!
//! Composes the port allocator, environment synthesizer, source watcher and
//! process runner behind the five orchestrator operations:
//!
//! | Operation     | Effect                                                   |
//! |---------------|----------------------------------------------------------|
//! | `init`        | allocate ports, resolve providers → `Configuring`        |
//! | `configure`   | arm (or disarm) hot reload                               |
//! | `start`       | write the env file, (re)spawn the child → `Started`      |
//! | `information` | current status, never blocks                             |
//! | `stop`        | kill the child, tear down the watcher → `Stopped`        |
//!
//! Restart is advisory: a relevant source change only moves the status to
//! `RestartWanted`. The orchestrator polls `information` and performs
//! `stop` + `start` itself.
//!
//! # Concurrency
//!
//! Operations are serialized by an async mutex held for their whole
//! duration. The status lives in a `parking_lot::RwLock` shared with the
//! change handler and the exit monitor, so `information` only ever takes a
//! short read lock and always sees a complete value.

mod builder;
mod handler;
mod resync;
mod state;
mod status;

pub use builder::SupervisorBuilder;
pub use resync::{CommandResync, Resync};
pub use state::Information;
pub use status::{Operation, Status};

use crate::config::{resolve_providers, ProviderInfo, SupervisorConfig};
use crate::environment::{synthesize, EnvironmentVariables};
use crate::error::{Error, Result};
use crate::network::{Allocate, Endpoint, NetworkMapping};
use crate::runner::{OutputEvent, ProcessHandle, RunSpec, Runner};
use crate::watch::{Watch, WatchConfig, WatchSession};
use futures::FutureExt;
use handler::RestartHandler;
use parking_lot::RwLock;
use state::{SharedState, SupervisorState};
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

type SyncMutex<T> = parking_lot::Mutex<T>;

const HANDLER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// A running watch plus the task consuming it.
struct WatchTask {
    _session: WatchSession,
    cancel: CancellationToken,
    handler: JoinHandle<()>,
}

impl Drop for WatchTask {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.handler.abort();
    }
}

/// Supervises one child process through the Init → Configure → Start →
/// Information → Stop lifecycle.
pub struct Supervisor {
    config: SupervisorConfig,
    base_dir: PathBuf,
    allocator: Arc<dyn Allocate>,
    watcher: Arc<dyn Watch>,
    runner: Arc<dyn Runner>,
    resync: Option<Arc<dyn Resync>>,
    state: SharedState,
    watch_task: SyncMutex<Option<WatchTask>>,
    operations: tokio::sync::Mutex<()>,
}

impl Supervisor {
    pub fn builder() -> SupervisorBuilder {
        SupervisorBuilder::new()
    }

    pub(crate) fn from_parts(
        config: SupervisorConfig,
        base_dir: PathBuf,
        allocator: Arc<dyn Allocate>,
        watcher: Arc<dyn Watch>,
        runner: Arc<dyn Runner>,
        resync: Option<Arc<dyn Resync>>,
    ) -> Self {
        Self {
            config,
            base_dir,
            allocator,
            watcher,
            runner,
            resync,
            state: Arc::new(RwLock::new(SupervisorState::new())),
            watch_task: SyncMutex::new(None),
            operations: tokio::sync::Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn working_dir(&self) -> PathBuf {
        self.config.working_dir(&self.base_dir)
    }

    pub fn env_file_path(&self) -> PathBuf {
        self.working_dir().join(&self.config.env_file)
    }

    pub fn status(&self) -> Status {
        self.state.read().status.clone()
    }

    /// The mapping produced by the last successful `init`.
    pub fn network_mapping(&self) -> Option<NetworkMapping> {
        self.state.read().mapping.clone()
    }

    /// Whether a watcher is currently armed.
    pub fn is_watching(&self) -> bool {
        self.watch_task.lock().is_some()
    }

    pub fn subscribe_output(&self) -> broadcast::Receiver<OutputEvent> {
        self.runner.subscribe()
    }

    pub fn recent_output(&self, lines: usize) -> Vec<String> {
        self.runner.recent_output(lines)
    }

    /// Allocate ports for `endpoints` and resolve provider values.
    ///
    /// Accepted from `Uninitialized`, and from `Error` to retry a failed
    /// cycle. A retry keeps the previous mapping when the endpoints are
    /// unchanged.
    #[tracing::instrument(skip_all, fields(service.name = %self.config.name))]
    pub async fn init(
        &self,
        endpoints: &[Endpoint],
        providers: &[ProviderInfo],
    ) -> Result<NetworkMapping> {
        self.guarded(Operation::Init, self.do_init(endpoints, providers))
            .await
    }

    /// Arm hot reload when `watch` is true, disarm it otherwise.
    ///
    /// A watcher that cannot be established is logged and hot reload stays
    /// off; `configure` itself still succeeds.
    #[tracing::instrument(skip(self), fields(service.name = %self.config.name))]
    pub async fn configure(&self, watch: bool) -> Result<Status> {
        self.guarded(Operation::Configure, self.do_configure(watch))
            .await
    }

    /// Write the env file and spawn the child, replacing a live one.
    ///
    /// `dependencies` are other services' mappings; their public endpoints
    /// are exported to the child.
    #[tracing::instrument(skip_all, fields(service.name = %self.config.name))]
    pub async fn start(&self, dependencies: &[NetworkMapping]) -> Result<ProcessHandle> {
        self.guarded(Operation::Start, self.do_start(dependencies))
            .await
    }

    /// Current status. Never blocks on an in-flight operation.
    pub fn information(&self) -> Information {
        self.state.read().information()
    }

    /// Kill the child and release the watcher. Idempotent.
    ///
    /// The status ends at `Stopped` even when the process could not be
    /// terminated; the termination error is still returned.
    #[tracing::instrument(skip(self), fields(service.name = %self.config.name))]
    pub async fn stop(&self) -> Result<()> {
        self.guarded(Operation::Stop, self.do_stop()).await
    }

    async fn do_init(
        &self,
        endpoints: &[Endpoint],
        providers: &[ProviderInfo],
    ) -> Result<NetworkMapping> {
        let _op = self.operations.lock().await;

        let (previous, retrying) = {
            let mut state = self.state.write();
            if !state.accepts(Operation::Init) {
                return Err(usage(Operation::Init, &state.status));
            }
            let retrying = state.status.is_error() || state.last_error.is_some();
            state.transition(Status::Initializing);
            state.live_pid = None;
            (state.mapping.take(), retrying)
        };

        if retrying {
            // Leftovers of the failed cycle
            self.disarm_watcher().await;
            if let Err(e) = self.runner.kill().await {
                tracing::warn!("Could not clean up previous process: {}", e);
            }
        }

        let result = self.allocate(previous, endpoints).and_then(|mapping| {
            match resolve_providers(&self.config.providers, providers, &self.base_dir) {
                Ok(providers) => Ok((mapping, providers)),
                Err(e) => {
                    // A failed Init holds no ports
                    self.allocator.release(&mapping);
                    Err(e)
                }
            }
        });

        let mut state = self.state.write();
        match result {
            Ok((mapping, providers)) => {
                tracing::info!(
                    "Allocated {} endpoint(s): {}",
                    mapping.len(),
                    mapping
                        .iter()
                        .filter_map(|e| e.primary().map(|a| format!("{}={}", e.endpoint.name, a)))
                        .collect::<Vec<_>>()
                        .join(", ")
                );
                state.mapping = Some(mapping.clone());
                state.providers = providers;
                state.restart_reason = None;
                state.last_error = None;
                state.transition(Status::Configuring);
                Ok(mapping)
            }
            Err(e) => {
                tracing::error!("Init failed: {}", e);
                state.fail(e.to_string());
                Err(e)
            }
        }
    }

    fn allocate(
        &self,
        previous: Option<NetworkMapping>,
        endpoints: &[Endpoint],
    ) -> Result<NetworkMapping> {
        if let Some(mapping) = previous {
            if mapping.iter().map(|e| &e.endpoint).eq(endpoints.iter()) {
                tracing::debug!("Reusing network mapping from the previous cycle");
                return Ok(mapping);
            }
            tracing::debug!("Endpoints changed, releasing the previous mapping");
            self.allocator.release(&mapping);
        }
        self.allocator
            .allocate(&self.config.name, &self.config.host, endpoints)
    }

    async fn do_configure(&self, watch: bool) -> Result<Status> {
        let _op = self.operations.lock().await;

        {
            let mut state = self.state.write();
            if !state.accepts(Operation::Configure) {
                return Err(usage(Operation::Configure, &state.status));
            }
            state.watch = if watch { self.watch_config() } else { None };
        }

        // Surface spawn problems early; Start reports them for real
        if let Err(e) = self.runner.prepare(&self.run_spec(&EnvironmentVariables::new())) {
            tracing::warn!("'{}' will not start as configured: {}", self.config.name, e);
        }

        if watch {
            self.arm_watcher();
        } else {
            self.disarm_watcher().await;
        }
        Ok(self.status())
    }

    async fn do_start(&self, dependencies: &[NetworkMapping]) -> Result<ProcessHandle> {
        let _op = self.operations.lock().await;

        let (mapping, providers) = {
            let mut state = self.state.write();
            if !state.accepts(Operation::Start) {
                return Err(usage(Operation::Start, &state.status));
            }
            let Some(mapping) = state.mapping.clone() else {
                return Err(usage(Operation::Start, &state.status));
            };
            // The previous process is about to be replaced, not crash
            state.live_pid = None;
            (mapping, state.providers.clone())
        };

        let env = synthesize(&mapping, dependencies, &providers, &self.config.environment);
        let result = async {
            env.write_env_file(&self.env_file_path())?;
            self.runner.run(self.run_spec(&env)).await
        }
        .await;

        match result {
            Ok(handle) => {
                {
                    let mut state = self.state.write();
                    state.transition(Status::Started);
                    state.live_pid = Some(handle.pid);
                    state.started_at = Some(handle.started_at);
                    state.restart_reason = None;
                }
                self.spawn_exit_monitor(handle.clone());
                self.arm_watcher();
                Ok(handle)
            }
            Err(e) => {
                tracing::error!("Start failed: {}", e);
                let mut state = self.state.write();
                state.fail(e.to_string());
                state.started_at = None;
                Err(e)
            }
        }
    }

    async fn do_stop(&self) -> Result<()> {
        let _op = self.operations.lock().await;

        {
            let mut state = self.state.write();
            if matches!(state.status, Status::Uninitialized | Status::Stopped) {
                return Ok(());
            }
            state.transition(Status::Stopping);
            state.live_pid = None;
        }

        let result = self.runner.kill().await;
        self.disarm_watcher().await;

        let mut state = self.state.write();
        state.started_at = None;
        state.transition(Status::Stopped);
        match &result {
            Ok(()) => tracing::info!("Stopped '{}'", self.config.name),
            Err(e) => tracing::error!(
                "Could not terminate '{}', marking it stopped anyway: {}",
                self.config.name,
                e
            ),
        }
        result
    }

    /// Run `operation`, converting a panic into `Error::Internal` and the
    /// `Error` status.
    async fn guarded<T, F>(&self, operation: Operation, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                let detail = format!("{} panicked: {}", operation, panic_message(&*panic));
                tracing::error!("{}", detail);
                self.state.write().fail(detail.clone());
                Err(Error::Internal(detail))
            }
        }
    }

    fn run_spec(&self, env: &EnvironmentVariables) -> RunSpec {
        let mut vars = self.config.pass_through_values();
        vars.extend(env.to_map());
        RunSpec {
            program: self.config.command.clone(),
            args: self.config.args.clone(),
            cwd: Some(self.working_dir()),
            env: vars,
        }
    }

    /// Hot reload settings, falling back to the working directory when the
    /// config has no `watch` section. The env file is always excluded so
    /// writing it never requests a restart.
    fn watch_config(&self) -> Option<WatchConfig> {
        let config = match &self.config.watch {
            Some(_) => self.config.watch_config(&self.base_dir)?,
            None => WatchConfig::new(vec![self.working_dir()]),
        };
        let env_file = Path::new(&self.config.env_file)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned());
        Some(config.exclude(env_file.into_iter().chain(["*.devsup-tmp".to_string()])))
    }

    /// Start watching if hot reload is requested and nothing is armed yet.
    fn arm_watcher(&self) {
        let Some(config) = self.state.read().watch.clone() else {
            return;
        };
        let mut slot = self.watch_task.lock();
        if slot.is_some() {
            return;
        }

        let mut session = match self.watcher.start(&config) {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!("Hot reload disabled for '{}': {}", self.config.name, e);
                return;
            }
        };
        let Some(events) = session.take_events() else {
            tracing::warn!("Watcher for '{}' produced no event stream", self.config.name);
            return;
        };

        let cancel = CancellationToken::new();
        let handler = RestartHandler::new(
            self.config.name.clone(),
            Arc::clone(&self.state),
            self.resync.clone(),
        );
        let task = tokio::spawn(handler.run(events, cancel.clone()));
        tracing::info!(
            "Watching {} root(s) for '{}'",
            config.roots.len(),
            self.config.name
        );

        *slot = Some(WatchTask {
            _session: session,
            cancel,
            handler: task,
        });
    }

    /// Cancel the handler, wait for it to let go of the event stream, then
    /// drop the watcher.
    async fn disarm_watcher(&self) {
        let Some(mut task) = self.watch_task.lock().take() else {
            return;
        };
        tracing::debug!("Releasing watcher for '{}'", self.config.name);
        task.cancel.cancel();
        if tokio::time::timeout(HANDLER_SHUTDOWN_TIMEOUT, &mut task.handler)
            .await
            .is_err()
        {
            tracing::warn!(
                "Change handler for '{}' did not stop within {:?}, aborting",
                self.config.name,
                HANDLER_SHUTDOWN_TIMEOUT
            );
        }
    }

    /// Surface an unexpected exit of the live process as `Error`.
    fn spawn_exit_monitor(&self, handle: ProcessHandle) {
        let state = Arc::clone(&self.state);
        let name = self.config.name.clone();
        tokio::spawn(async move {
            let info = handle.wait().await;
            let mut state = state.write();
            if state.live_pid != Some(handle.pid) {
                return;
            }
            state.live_pid = None;
            if state.status.is_running() {
                let detail = format!("process {} exited: {}", handle.pid, info);
                tracing::warn!("'{}' {}", name, detail);
                state.fail(detail);
            }
        });
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.watch_task.get_mut().take();
    }
}

fn usage(operation: Operation, status: &Status) -> Error {
    Error::Usage {
        operation: operation.to_string(),
        status: status.to_string(),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
