use super::{CommandResync, Resync, Supervisor};
use crate::config::{validate, SupervisorConfig};
use crate::error::{Error, Result};
use crate::network::{Allocate, PortAllocator};
use crate::runner::{ProcessRunner, Runner};
use crate::watch::{SourceWatcher, Watch};
use std::path::PathBuf;
use std::sync::Arc;

/// Builder for a [`Supervisor`].
///
/// Only the configuration is required. Every capability defaults to the
/// real implementation derived from it and can be swapped, e.g. for a
/// [`crate::watch::ManualWatcher`] in tests.
///
/// # Example
///
/// ```no_run
/// use devsup::{Supervisor, SupervisorConfig};
/// use std::path::PathBuf;
///
/// # fn example() -> devsup::Result<()> {
/// let config = SupervisorConfig::new("billing", "go");
/// let supervisor = Supervisor::builder()
///     .config(config)
///     .base_dir(PathBuf::from("."))
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct SupervisorBuilder {
    config: Option<SupervisorConfig>,
    base_dir: Option<PathBuf>,
    allocator: Option<Arc<dyn Allocate>>,
    watcher: Option<Arc<dyn Watch>>,
    runner: Option<Arc<dyn Runner>>,
    resync: Option<Arc<dyn Resync>>,
}

impl SupervisorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: SupervisorConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Directory relative paths in the config resolve against.
    ///
    /// Defaults to the current directory.
    pub fn base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    pub fn allocator(mut self, allocator: Arc<dyn Allocate>) -> Self {
        self.allocator = Some(allocator);
        self
    }

    pub fn watcher(mut self, watcher: Arc<dyn Watch>) -> Self {
        self.watcher = Some(watcher);
        self
    }

    pub fn runner(mut self, runner: Arc<dyn Runner>) -> Self {
        self.runner = Some(runner);
        self
    }

    pub fn resync(mut self, resync: Arc<dyn Resync>) -> Self {
        self.resync = Some(resync);
        self
    }

    pub fn build(self) -> Result<Supervisor> {
        let config = self
            .config
            .ok_or_else(|| Error::Config("a supervisor configuration is required".to_string()))?;
        validate(&config)?;

        let base_dir = match self.base_dir {
            Some(dir) => dir,
            None => std::env::current_dir()?,
        };

        let allocator = self.allocator.unwrap_or_else(|| {
            Arc::new(PortAllocator::new(
                config.ports.range(),
                config.ports.max_attempts,
            ))
        });
        let watcher = self
            .watcher
            .unwrap_or_else(|| Arc::new(SourceWatcher::new()));
        let runner = self.runner.unwrap_or_else(|| {
            Arc::new(ProcessRunner::new(
                config.name.clone(),
                config.get_grace_period(),
                config.output,
            ))
        });
        let resync = self.resync.or_else(|| {
            config.resync.as_ref().map(|settings| {
                Arc::new(CommandResync::from_settings(
                    settings,
                    config.working_dir(&base_dir),
                )) as Arc<dyn Resync>
            })
        });

        Ok(Supervisor::from_parts(
            config, base_dir, allocator, watcher, runner, resync,
        ))
    }
}
