//! Source watching for hot reload.
//!
//! A [`SourceWatcher`] observes a fixed set of root directories recursively
//! and turns every filesystem mutation into a [`ChangeEvent`]. Bursts are
//! NOT coalesced: one physical event yields one `ChangeEvent`, and the
//! consumer decides whether to debounce.
//!
//! Events flow through an unbounded channel so the notify thread never
//! blocks on a slow consumer; the supervisor's handler drains it in arrival
//! order. The watcher has no stop signal of its own: dropping the
//! [`WatchSession`] drops the OS watcher (releasing its descriptors) and the
//! sender, which ends the consumer loop.
//!
//! # Configuration
//!
//! ```yaml
//! watch:
//!   roots: [src, proto]
//!   exclude: ["*.tmp", "generated"]
//!   idl_extensions: [proto]
//! ```

use crate::error::{Error, Result};
use notify_debouncer_full::notify::{
    self,
    event::{EventKind, ModifyKind},
    RecommendedWatcher, RecursiveMode, Watcher,
};
use parking_lot::Mutex;
use std::any::Any;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Names and patterns never worth a restart: build output, dependency
/// trees, VCS metadata, editor droppings and lock files.
pub const DEFAULT_EXCLUDES: &[&str] = &[
    "node_modules",
    ".git",
    "target",
    "dist",
    "build",
    ".next",
    ".nuxt",
    "__pycache__",
    ".pytest_cache",
    ".venv",
    "venv",
    ".DS_Store",
    "*.log",
    "*.swp",
    "*.swo",
    "*~",
    "*.lock",
    "package-lock.json",
    "pnpm-lock.yaml",
];

pub const DEFAULT_IDL_EXTENSIONS: &[&str] = &["proto"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Create,
    Modify,
    Rename,
    Remove,
    Other,
}

/// One observed filesystem mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub path: PathBuf,
    pub kind: ChangeKind,
    /// The path is an interface definition (e.g. a `.proto` file).
    pub is_idl: bool,
    pub under_watched_root: bool,
}

/// What to watch. Immutable once a watcher has started with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchConfig {
    pub roots: Vec<PathBuf>,
    pub excludes: Vec<String>,
    pub idl_extensions: Vec<String>,
}

impl WatchConfig {
    /// Watch `roots` with the default exclusions and IDL extensions.
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self {
            roots,
            excludes: DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect(),
            idl_extensions: DEFAULT_IDL_EXTENSIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    pub fn exclude<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for pattern in patterns {
            let pattern = pattern.into();
            if !self.excludes.contains(&pattern) {
                self.excludes.push(pattern);
            }
        }
        self
    }

    pub fn idl_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.idl_extensions = extensions
            .into_iter()
            .map(|e| e.into().trim_start_matches('.').to_string())
            .collect();
        self
    }

    fn root_of(&self, path: &Path) -> Option<&Path> {
        self.roots
            .iter()
            .map(PathBuf::as_path)
            .find(|root| path.starts_with(root))
    }

    /// Whether any component of `path` below its watched root matches an
    /// exclusion. Components above the root are not considered, so a root
    /// that itself lives under `build/` still works.
    pub fn is_excluded(&self, path: &Path) -> bool {
        let relative = self
            .root_of(path)
            .and_then(|root| path.strip_prefix(root).ok())
            .unwrap_or(path);

        relative.components().any(|component| {
            let name = component.as_os_str().to_string_lossy();
            self.excludes
                .iter()
                .any(|pattern| pattern_matches(pattern, &name))
        })
    }

    pub fn is_idl(&self, path: &Path) -> bool {
        path.extension()
            .map(|ext| ext.to_string_lossy())
            .is_some_and(|ext| self.idl_extensions.iter().any(|e| *e == ext))
    }

    /// Build the event for `path`, or `None` when it is excluded.
    pub fn classify(&self, path: &Path, kind: ChangeKind) -> Option<ChangeEvent> {
        if self.is_excluded(path) {
            return None;
        }
        Some(ChangeEvent {
            path: path.to_path_buf(),
            kind,
            is_idl: self.is_idl(path),
            under_watched_root: self.root_of(path).is_some(),
        })
    }
}

/// `*suffix`, `prefix*`, or an exact name.
fn pattern_matches(pattern: &str, name: &str) -> bool {
    if let Some(suffix) = pattern.strip_prefix('*') {
        name.ends_with(suffix)
    } else if let Some(prefix) = pattern.strip_suffix('*') {
        name.starts_with(prefix)
    } else {
        name == pattern
    }
}

fn change_kind(kind: &EventKind) -> Option<ChangeKind> {
    match kind {
        EventKind::Access(_) => None,
        EventKind::Create(_) => Some(ChangeKind::Create),
        EventKind::Modify(ModifyKind::Name(_)) => Some(ChangeKind::Rename),
        EventKind::Modify(_) => Some(ChangeKind::Modify),
        EventKind::Remove(_) => Some(ChangeKind::Remove),
        EventKind::Any | EventKind::Other => Some(ChangeKind::Other),
    }
}

/// A running watch: the event stream plus whatever keeps it alive.
pub struct WatchSession {
    events: Option<mpsc::UnboundedReceiver<ChangeEvent>>,
    _guard: Option<Box<dyn Any + Send>>,
}

impl WatchSession {
    pub fn new(
        events: mpsc::UnboundedReceiver<ChangeEvent>,
        guard: Option<Box<dyn Any + Send>>,
    ) -> Self {
        Self {
            events: Some(events),
            _guard: guard,
        }
    }

    /// Take the event receiver; `None` after the first call.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<ChangeEvent>> {
        self.events.take()
    }
}

/// Capability used by the supervisor to obtain change events.
pub trait Watch: Send + Sync {
    fn start(&self, config: &WatchConfig) -> Result<WatchSession>;
}

/// Filesystem watcher backed by the platform's notify implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct SourceWatcher;

impl SourceWatcher {
    pub fn new() -> Self {
        Self
    }
}

impl Watch for SourceWatcher {
    fn start(&self, config: &WatchConfig) -> Result<WatchSession> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let filter = Arc::new(config.clone());
        let callback_filter = Arc::clone(&filter);

        let mut watcher: RecommendedWatcher =
            notify::recommended_watcher(move |result: notify::Result<notify::Event>| {
                match result {
                    Ok(event) => {
                        let Some(kind) = change_kind(&event.kind) else {
                            return;
                        };
                        for path in &event.paths {
                            if let Some(change) = callback_filter.classify(path, kind) {
                                // Receiver gone means the session is being torn down
                                let _ = event_tx.send(change);
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Watch error: {}", e);
                    }
                }
            })
            .map_err(|e| Error::Watch(format!("Failed to create file watcher: {}", e)))?;

        let mut watched = 0usize;
        for root in &filter.roots {
            if !root.exists() {
                tracing::warn!("Watch root {} does not exist, skipping", root.display());
                continue;
            }
            match watcher.watch(root, RecursiveMode::Recursive) {
                Ok(()) => {
                    watched += 1;
                    tracing::debug!("Watching path: {}", root.display());
                }
                Err(e) => {
                    tracing::warn!("Failed to watch {}: {}", root.display(), e);
                }
            }
        }

        if watched == 0 {
            return Err(Error::Watch(format!(
                "none of the {} watch root(s) could be watched",
                filter.roots.len()
            )));
        }

        Ok(WatchSession::new(event_rx, Some(Box::new(watcher))))
    }
}

/// Watcher driven by hand instead of the filesystem.
///
/// Paths pushed through its [`ManualTrigger`] go through the same
/// classification as real events. Useful for embedding the supervisor behind
/// an external change feed, and in tests.
#[derive(Clone, Default)]
pub struct ManualWatcher {
    inner: Arc<Mutex<Option<(WatchConfig, mpsc::UnboundedSender<ChangeEvent>)>>>,
}

#[derive(Clone)]
pub struct ManualTrigger {
    inner: Arc<Mutex<Option<(WatchConfig, mpsc::UnboundedSender<ChangeEvent>)>>>,
}

impl ManualWatcher {
    pub fn new() -> (Self, ManualTrigger) {
        let watcher = Self::default();
        let trigger = ManualTrigger {
            inner: Arc::clone(&watcher.inner),
        };
        (watcher, trigger)
    }
}

impl Watch for ManualWatcher {
    fn start(&self, config: &WatchConfig) -> Result<WatchSession> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.inner.lock() = Some((config.clone(), tx));
        Ok(WatchSession::new(rx, None))
    }
}

impl ManualTrigger {
    /// Report a modification of `path`. Returns whether an event was
    /// delivered (false when excluded or when no session is listening).
    pub fn touch(&self, path: impl AsRef<Path>) -> bool {
        self.emit(path.as_ref(), ChangeKind::Modify)
    }

    pub fn emit(&self, path: &Path, kind: ChangeKind) -> bool {
        let guard = self.inner.lock();
        let Some((config, tx)) = guard.as_ref() else {
            return false;
        };
        match config.classify(path, kind) {
            Some(event) => tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Whether a started session is still consuming events.
    pub fn is_listening(&self) -> bool {
        self.inner
            .lock()
            .as_ref()
            .is_some_and(|(_, tx)| !tx.is_closed())
    }
}
