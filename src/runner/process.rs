use super::{ExitInfo, OutputCapture, OutputEvent, OutputMode, OutputStream, ProcessHandle, RunSpec, Runner};
use crate::error::{validate_pid, Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use nix::errno::Errno;
use nix::sys::signal::{self, killpg, Signal};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::{broadcast, watch};

/// How long to wait for exit after SIGKILL before giving up.
const KILL_TIMEOUT: Duration = Duration::from_secs(2);

/// Synchronous mutex for state never held across an await point.
type SyncMutex<T> = parking_lot::Mutex<T>;

/// Runs the supervised child in its own process group.
///
/// # Mutex Type Selection
///
/// - `tokio::sync::Mutex` serializes `run`/`kill`, which await on process
///   exit while holding it.
/// - `SyncMutex` holds a copy of the live handle so `pid()` can answer
///   without waiting on an in-flight `run` or `kill`.
pub struct ProcessRunner {
    name: String,
    grace_period: Duration,
    output_mode: OutputMode,
    current: tokio::sync::Mutex<Option<ProcessHandle>>,
    live: SyncMutex<Option<ProcessHandle>>,
    output: OutputCapture,
}

impl ProcessRunner {
    pub fn new(name: impl Into<String>, grace_period: Duration, output_mode: OutputMode) -> Self {
        let name = name.into();
        Self {
            output: OutputCapture::new(name.clone()),
            name,
            grace_period,
            output_mode,
            current: tokio::sync::Mutex::new(None),
            live: SyncMutex::new(None),
        }
    }

    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    /// The handle of the most recently started process, even if it exited.
    pub fn current(&self) -> Option<ProcessHandle> {
        self.live.lock().clone()
    }

    /// SIGTERM the process group, wait out the grace period, then SIGKILL.
    async fn terminate(&self, handle: &ProcessHandle) -> Result<()> {
        if handle.has_exited() {
            return Ok(());
        }

        let pid = validate_pid(handle.pid)?;

        // Group first, then the single process if the group is already gone
        let signal_result =
            killpg(pid, Signal::SIGTERM).or_else(|_| signal::kill(pid, Signal::SIGTERM));
        match signal_result {
            Ok(()) => {}
            Err(Errno::ESRCH) => {
                // Exited between the check and the signal; let the reaper catch up
                handle.wait_timeout(KILL_TIMEOUT).await;
                return Ok(());
            }
            Err(e) => {
                return Err(Error::Termination {
                    pid: handle.pid,
                    reason: format!("SIGTERM failed: {}", e),
                });
            }
        }

        if let Some(info) = handle.wait_timeout(self.grace_period).await {
            tracing::debug!("Process {} exited after SIGTERM ({})", handle.pid, info);
            return Ok(());
        }

        tracing::warn!(
            "Process {} did not exit after SIGTERM (grace period: {:?}), sending SIGKILL",
            handle.pid,
            self.grace_period
        );
        let _ = killpg(pid, Signal::SIGKILL).or_else(|_| signal::kill(pid, Signal::SIGKILL));

        match handle.wait_timeout(KILL_TIMEOUT).await {
            Some(info) => {
                tracing::debug!("Process {} exited after SIGKILL ({})", handle.pid, info);
                Ok(())
            }
            None => Err(Error::Termination {
                pid: handle.pid,
                reason: format!("still running {:?} after SIGKILL", KILL_TIMEOUT),
            }),
        }
    }

    fn command(&self, spec: &RunSpec) -> Command {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .env_clear()
            .envs(&spec.env)
            .stdin(Stdio::null())
            .kill_on_drop(false)
            .process_group(0);

        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }

        match self.output_mode {
            OutputMode::Captured => {
                cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
            }
            OutputMode::Passthrough => {
                cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
            }
        }
        cmd
    }
}

#[async_trait]
impl Runner for ProcessRunner {
    fn prepare(&self, spec: &RunSpec) -> Result<()> {
        let spawn_failed = |reason: String| Error::SpawnFailed {
            program: spec.program.clone(),
            reason,
        };

        let cwd = match &spec.cwd {
            Some(cwd) if !cwd.is_dir() => {
                return Err(spawn_failed(format!(
                    "working directory '{}' does not exist",
                    cwd.display()
                )));
            }
            Some(cwd) => cwd.clone(),
            None => std::env::current_dir()?,
        };

        which::which_in(&spec.program, spec.env.get("PATH"), &cwd)
            .map(|_| ())
            .map_err(|e| spawn_failed(e.to_string()))
    }

    #[tracing::instrument(skip(self, spec), fields(service.name = %self.name))]
    async fn run(&self, spec: RunSpec) -> Result<ProcessHandle> {
        let mut current = self.current.lock().await;

        if let Some(previous) = current.take() {
            if !previous.has_exited() {
                tracing::info!("Terminating previous process {} before restart", previous.pid);
            }
            if let Err(e) = self.terminate(&previous).await {
                *current = Some(previous);
                return Err(e);
            }
            self.output.detach().await;
        }

        self.prepare(&spec)?;

        let mut child = self.command(&spec).spawn().map_err(|e| {
            tracing::error!("Failed to spawn '{}': {}", spec.program, e);
            Error::SpawnFailed {
                program: spec.program.clone(),
                reason: e.to_string(),
            }
        })?;

        let Some(pid) = child.id() else {
            return Err(Error::Process(format!(
                "'{}' exited before its pid could be read",
                spec.program
            )));
        };

        if let Some(stdout) = child.stdout.take() {
            self.output.attach(stdout, OutputStream::Stdout);
        }
        if let Some(stderr) = child.stderr.take() {
            self.output.attach(stderr, OutputStream::Stderr);
        }

        let (exit_tx, exit_rx) = watch::channel(None);
        let name = self.name.clone();
        tokio::spawn(async move {
            let info = match child.wait().await {
                Ok(status) => ExitInfo::from(status),
                Err(e) => {
                    tracing::warn!("Error waiting for '{}' (pid {}): {}", name, pid, e);
                    ExitInfo {
                        code: None,
                        signal: None,
                    }
                }
            };
            tracing::debug!("Process {} of '{}' exited: {}", pid, name, info);
            let _ = exit_tx.send(Some(info));
        });

        let handle = ProcessHandle::new(pid, Utc::now(), exit_rx);
        tracing::info!("Started '{}' {:?} as pid {}", spec.program, spec.args, pid);

        *current = Some(handle.clone());
        *self.live.lock() = Some(handle.clone());
        Ok(handle)
    }

    #[tracing::instrument(skip(self), fields(service.name = %self.name))]
    async fn kill(&self) -> Result<()> {
        let mut current = self.current.lock().await;
        let Some(handle) = current.take() else {
            return Ok(());
        };

        if let Err(e) = self.terminate(&handle).await {
            *current = Some(handle);
            return Err(e);
        }
        self.output.detach().await;
        *self.live.lock() = None;
        Ok(())
    }

    fn pid(&self) -> Option<u32> {
        self.live
            .lock()
            .as_ref()
            .filter(|h| !h.has_exited())
            .map(|h| h.pid)
    }

    fn subscribe(&self) -> broadcast::Receiver<OutputEvent> {
        self.output.subscribe()
    }

    fn recent_output(&self, lines: usize) -> Vec<String> {
        self.output.recent(lines)
    }
}

impl Drop for ProcessRunner {
    fn drop(&mut self) {
        // Best effort: never leave an orphaned process group behind
        if let Some(handle) = self.live.get_mut().take() {
            if handle.has_exited() {
                return;
            }
            if let Ok(pid) = validate_pid(handle.pid) {
                tracing::debug!("Killing process group {} on drop", handle.pid);
                let _ = killpg(pid, Signal::SIGKILL).or_else(|_| signal::kill(pid, Signal::SIGKILL));
            }
        }
    }
}
