//! Regenerating bindings after an interface definition changes.

use crate::config::ResyncSettings;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// How many trailing stderr lines end up in a resync error.
const ERROR_TAIL_LINES: usize = 5;

/// Collaborator that regenerates code from a changed IDL file.
#[async_trait]
pub trait Resync: Send + Sync {
    async fn regenerate(&self, changed: &Path) -> Result<()>;
}

/// Runs a configured command (e.g. `buf generate`) in the service root.
///
/// The changed file is exposed to the command as `DEVSUP_CHANGED_FILE`.
/// The command is killed if the resync is cancelled by `Stop`.
#[derive(Debug, Clone)]
pub struct CommandResync {
    program: String,
    args: Vec<String>,
    root: PathBuf,
}

impl CommandResync {
    pub fn new(program: impl Into<String>, args: Vec<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args,
            root: root.into(),
        }
    }

    pub fn from_settings(settings: &ResyncSettings, root: impl Into<PathBuf>) -> Self {
        Self::new(settings.command.clone(), settings.args.clone(), root)
    }
}

#[async_trait]
impl Resync for CommandResync {
    async fn regenerate(&self, changed: &Path) -> Result<()> {
        tracing::debug!(
            "Running resync '{} {}' for {}",
            self.program,
            self.args.join(" "),
            changed.display()
        );

        let output = Command::new(&self.program)
            .args(&self.args)
            .current_dir(&self.root)
            .env("DEVSUP_CHANGED_FILE", changed)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::Resync(format!("failed to run '{}': {}", self.program, e)))?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let lines: Vec<&str> = stderr.lines().collect();
        let tail = lines[lines.len().saturating_sub(ERROR_TAIL_LINES)..].join("\n");
        Err(Error::Resync(format!(
            "'{}' exited with {}{}",
            self.program,
            output.status,
            if tail.is_empty() {
                String::new()
            } else {
                format!(": {}", tail)
            }
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn successful_command() {
        let temp_dir = TempDir::new().unwrap();
        let resync = CommandResync::new(
            "sh",
            vec!["-c".into(), "touch \"$DEVSUP_CHANGED_FILE.gen\"".into()],
            temp_dir.path(),
        );
        let changed = temp_dir.path().join("api.proto");
        resync.regenerate(&changed).await.unwrap();
        assert!(temp_dir.path().join("api.proto.gen").exists());
    }

    #[tokio::test]
    async fn failing_command_reports_stderr() {
        let temp_dir = TempDir::new().unwrap();
        let resync = CommandResync::new(
            "sh",
            vec!["-c".into(), "echo 'bad proto' >&2; exit 3".into()],
            temp_dir.path(),
        );
        let err = resync.regenerate(Path::new("api.proto")).await.unwrap_err();
        assert!(matches!(&err, Error::Resync(msg) if msg.contains("bad proto")));
    }

    #[tokio::test]
    async fn missing_program() {
        let resync = CommandResync::new("definitely-not-a-generator", vec![], ".");
        assert!(resync.regenerate(Path::new("a.proto")).await.is_err());
    }
}
