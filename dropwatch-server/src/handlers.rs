//! Built-in handlers and post-processors selectable from configuration.

use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use chrono::Utc;
use dropwatch_core::{FileHandler, IngestError, PostProcessor, ProcessingFile, Result};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Runs an external program per file.
///
/// Arguments are the configured ones followed by the claimed path, the
/// original relative name and, when known, the original absolute path. Exit
/// status 0 means handled. The child is killed if the invocation is cancelled.
#[derive(Debug, Clone)]
pub struct CommandHandler {
    program: OsString,
    args: Vec<OsString>,
}

impl CommandHandler {
    pub fn new<I, S>(program: impl Into<OsString>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    async fn run(&self, file: &Path, original_name: &Path, full_path: Option<&Path>) -> Result<bool> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg(file)
            .arg(original_name)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(full_path) = full_path {
            command.arg(full_path);
        }

        let output = command.output().await.map_err(|err| {
            IngestError::Handler(format!(
                "failed to spawn {}: {err}",
                Path::new(&self.program).display()
            ))
        })?;

        if output.status.success() {
            debug!(
                target: "ingest::handler",
                program = %Path::new(&self.program).display(),
                path = %file.display(),
                "command handled file"
            );
            return Ok(true);
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        warn!(
            target: "ingest::handler",
            program = %Path::new(&self.program).display(),
            path = %file.display(),
            status = %output.status,
            stderr = %stderr.trim(),
            "command rejected file"
        );
        Ok(false)
    }
}

#[async_trait]
impl FileHandler for CommandHandler {
    async fn handle(&self, file: &Path, original_name: &Path) -> Result<bool> {
        self.run(file, original_name, None).await
    }

    async fn handle_with_full_path(
        &self,
        file: &Path,
        original_name: &Path,
        original_full_path: &Path,
    ) -> Result<bool> {
        self.run(file, original_name, Some(original_full_path)).await
    }
}

/// Accepts every file; combined with delete-on-success it drains a directory.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptHandler;

#[async_trait]
impl FileHandler for AcceptHandler {
    async fn handle(&self, _file: &Path, _original_name: &Path) -> Result<bool> {
        Ok(true)
    }
}

/// Writes one archive line per file that reached its terminal location.
#[derive(Debug, Clone)]
pub struct LogPostProcessor {
    endpoint: String,
}

impl LogPostProcessor {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl PostProcessor for LogPostProcessor {
    async fn post_process(
        &self,
        file: &ProcessingFile,
        output_path: Option<&Path>,
        success: bool,
    ) -> Result<()> {
        info!(
            target: "ingest::archive",
            endpoint = %self.endpoint,
            original = %file.original_full_path().display(),
            output = %output_path.map(|p| p.display().to_string()).unwrap_or_else(|| "<deleted>".into()),
            success,
            at = %Utc::now().to_rfc3339(),
            "file archived"
        );
        Ok(())
    }
}
