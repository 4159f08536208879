use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{IngestError, Result};
use crate::filter::PatternFilter;
use crate::layout;
use crate::retry::RetryPolicy;

/// Discovery strategy used by a pipeline instance.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessorKind {
    /// OS change notifications plus a start-up scan.
    #[default]
    #[serde(alias = "event_based", alias = "watcher")]
    Event,
    /// Fixed-interval directory listing.
    #[serde(alias = "polling_based")]
    Polling,
    /// Stat-comparing poll watcher plus a start-up scan.
    #[serde(alias = "pollingv2")]
    PollingV2,
}

impl ProcessorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessorKind::Event => "event",
            ProcessorKind::Polling => "polling",
            ProcessorKind::PollingV2 => "polling_v2",
        }
    }
}

/// What happens to a file whose handler succeeded.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuccessAction {
    #[default]
    Delete,
    MoveToSuccess,
    /// Copy into the success location, then delete the claimed file.
    CopyThenDelete,
}

/// What happens to a file whose handler was cancelled.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelAction {
    #[default]
    MoveToFailure,
    ReturnToDrop,
}

/// Immutable description of one ingestion pipeline.
#[derive(Clone, Debug)]
pub struct EndpointDescriptor {
    pub name: String,
    pub drop_path: PathBuf,
    /// May contain `%filepath%`.
    pub in_progress_path: PathBuf,
    /// Empty unless `on_success` needs it. May contain `%filepath%`.
    pub success_path: Option<PathBuf>,
    /// May contain `%filepath%`.
    pub failure_path: PathBuf,
    pub include_pattern: String,
    pub monitor_subdirectories: bool,
    pub worker_count: usize,
    pub processor: ProcessorKind,
    pub poll_interval: Duration,
    pub scavenge_interval: Duration,
    /// Claim age after which the scavenger hands a file back to the drop root.
    pub recovery_interval: Duration,
    /// Inactivity window for the throughput watchdog; zero disables it.
    pub restart_interval: Duration,
    pub on_success: SuccessAction,
    pub on_cancel: CancelAction,
    pub retry: RetryPolicy,
    /// Pause after a handler fault; zero disables it.
    pub fault_cooldown: Duration,
}

impl EndpointDescriptor {
    pub const DEFAULT_SCAVENGE_INTERVAL: Duration = Duration::from_secs(30);
    pub const DEFAULT_RECOVERY_INTERVAL: Duration = Duration::from_secs(60);
    pub const DEFAULT_RESTART_INTERVAL: Duration = Duration::from_secs(60);
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1_000);

    pub fn new(
        name: impl Into<String>,
        drop_path: impl Into<PathBuf>,
        in_progress_path: impl Into<PathBuf>,
        failure_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            drop_path: drop_path.into(),
            in_progress_path: in_progress_path.into(),
            success_path: None,
            failure_path: failure_path.into(),
            include_pattern: "*".to_string(),
            monitor_subdirectories: false,
            worker_count: 1,
            processor: ProcessorKind::default(),
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
            scavenge_interval: Self::DEFAULT_SCAVENGE_INTERVAL,
            recovery_interval: Self::DEFAULT_RECOVERY_INTERVAL,
            restart_interval: Self::DEFAULT_RESTART_INTERVAL,
            on_success: SuccessAction::default(),
            on_cancel: CancelAction::default(),
            retry: RetryPolicy::default(),
            fault_cooldown: Duration::ZERO,
        }
    }

    pub fn watchdog_enabled(&self) -> bool {
        !self.restart_interval.is_zero()
    }

    /// Check every invariant the pipeline relies on. Called before start-up.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(IngestError::Config(format!("endpoint {:?}: {msg}", self.name)));

        if self.name.trim().is_empty() {
            return Err(IngestError::Config("endpoint name must not be empty".into()));
        }
        if is_blank(&self.drop_path) {
            return fail("drop path must not be empty".into());
        }
        if is_blank(&self.in_progress_path) {
            return fail("in-progress path must not be empty".into());
        }
        if is_blank(&self.failure_path) {
            return fail("failure path must not be empty".into());
        }
        if self.worker_count == 0 {
            return fail("worker count must be at least 1".into());
        }
        if matches!(
            self.on_success,
            SuccessAction::MoveToSuccess | SuccessAction::CopyThenDelete
        ) && self.success_path.as_deref().is_none_or(is_blank)
        {
            return fail(format!(
                "success path is required when on_success is {:?}",
                self.on_success
            ));
        }
        if layout::token_count(&self.drop_path) > 0 || layout::has_embedded_token(&self.drop_path)
        {
            return fail(format!("drop path may not contain {}", layout::FILEPATH_TOKEN));
        }

        let mut templates = vec![("in-progress", &self.in_progress_path), ("failure", &self.failure_path)];
        if let Some(success) = &self.success_path {
            templates.push(("success", success));
        }
        for (label, template) in templates {
            if layout::has_embedded_token(template) {
                return fail(format!(
                    "{label} path must use {} as a whole path segment",
                    layout::FILEPATH_TOKEN
                ));
            }
        }
        if layout::token_count(&self.in_progress_path) > 1 {
            return fail(format!(
                "in-progress path may contain {} at most once",
                layout::FILEPATH_TOKEN
            ));
        }

        let in_progress_root = layout::template_root(&self.in_progress_path);
        if in_progress_root == self.drop_path
            || (self.monitor_subdirectories && in_progress_root.starts_with(&self.drop_path))
        {
            return fail("in-progress path must live outside the watched drop path".into());
        }

        // Terminal files must never be seen again by discovery or the scavenger.
        let mut terminals = vec![("failure", layout::template_root(&self.failure_path))];
        if let Some(success) = self.success_path.as_deref().filter(|path| !is_blank(path)) {
            terminals.push(("success", layout::template_root(success)));
        }
        for (label, root) in terminals.into_iter().filter(|(_, root)| !is_blank(root)) {
            if root.starts_with(&in_progress_root) {
                return fail(format!("{label} path must live outside the in-progress path"));
            }
            if root == self.drop_path
                || (self.monitor_subdirectories && root.starts_with(&self.drop_path))
            {
                return fail(format!("{label} path must live outside the watched drop path"));
            }
        }

        if self.scavenge_interval.is_zero() {
            return fail("scavenge interval must be greater than zero".into());
        }
        if self.recovery_interval.is_zero() {
            return fail("recovery interval must be greater than zero".into());
        }
        if self.processor != ProcessorKind::Event && self.poll_interval.is_zero() {
            return fail("poll interval must be greater than zero".into());
        }
        if self.retry.attempts == 0 {
            return fail("retry attempts must be at least 1".into());
        }

        PatternFilter::new(&self.include_pattern)?;
        Ok(())
    }
}

fn is_blank(path: &Path) -> bool {
    path.as_os_str().is_empty()
}
