use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use dropwatch_core::{
    CancelAction, EndpointDescriptor, ProcessorKind, RetryPolicy, SuccessAction,
};
use serde::{Deserialize, Serialize};

fn default_filter() -> String {
    "*".to_string()
}

fn default_workers() -> usize {
    1
}

fn default_scavenge_secs() -> u64 {
    EndpointDescriptor::DEFAULT_SCAVENGE_INTERVAL.as_secs()
}

fn default_recovery_secs() -> u64 {
    EndpointDescriptor::DEFAULT_RECOVERY_INTERVAL.as_secs()
}

fn default_restart_secs() -> u64 {
    EndpointDescriptor::DEFAULT_RESTART_INTERVAL.as_secs()
}

fn default_poll_ms() -> u64 {
    EndpointDescriptor::DEFAULT_POLL_INTERVAL.as_millis() as u64
}

fn default_retry_attempts() -> u32 {
    RetryPolicy::default().attempts
}

fn default_retry_delay_ms() -> u64 {
    RetryPolicy::default().delay.as_millis() as u64
}

/// Which built-in handler processes an endpoint's files.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HandlerConfig {
    /// Run `program args... <claimed path> <original name> <original full path>`;
    /// exit status 0 means handled.
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
    /// Succeed without looking at the file.
    Accept,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PostProcessorConfig {
    /// One structured log line per file reaching its terminal location.
    Log,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FilterConfig {
    ExcludeSegments {
        segments: Vec<String>,
        #[serde(default)]
        case_insensitive: bool,
    },
}

/// One endpoint as written in the configuration file.
///
/// Intervals are whole seconds (poll interval and retry delay are
/// milliseconds). A restart interval of 0 disables the throughput watchdog.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EndpointConfig {
    pub name: String,
    pub drop_path: PathBuf,
    pub in_progress_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_path: Option<PathBuf>,
    pub failure_path: PathBuf,
    #[serde(default = "default_filter")]
    pub filter: String,
    #[serde(default)]
    pub monitor_subdirectories: bool,
    #[serde(default)]
    pub processor: ProcessorKind,
    pub handler: HandlerConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_processor: Option<PostProcessorConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_filter: Option<FilterConfig>,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_scavenge_secs")]
    pub scavenge_interval_secs: u64,
    #[serde(default = "default_recovery_secs")]
    pub recovery_interval_secs: u64,
    #[serde(default = "default_restart_secs")]
    pub restart_interval_secs: u64,
    #[serde(default = "default_poll_ms")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub on_success: SuccessAction,
    #[serde(default)]
    pub on_cancel: CancelAction,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Pause after a handler fault before the next file is started.
    #[serde(default)]
    pub fault_cooldown_secs: u64,
}

impl EndpointConfig {
    /// Convert into the core descriptor and validate it.
    pub fn to_descriptor(&self) -> anyhow::Result<EndpointDescriptor> {
        let mut descriptor = EndpointDescriptor::new(
            self.name.clone(),
            self.drop_path.clone(),
            self.in_progress_path.clone(),
            self.failure_path.clone(),
        );
        descriptor.success_path = self
            .success_path
            .clone()
            .filter(|path| !path.as_os_str().is_empty());
        descriptor.include_pattern = self.filter.clone();
        descriptor.monitor_subdirectories = self.monitor_subdirectories;
        descriptor.worker_count = self.workers;
        descriptor.processor = self.processor;
        descriptor.poll_interval = Duration::from_millis(self.poll_interval_ms);
        descriptor.scavenge_interval = Duration::from_secs(self.scavenge_interval_secs);
        descriptor.recovery_interval = Duration::from_secs(self.recovery_interval_secs);
        descriptor.restart_interval = Duration::from_secs(self.restart_interval_secs);
        descriptor.on_success = self.on_success;
        descriptor.on_cancel = self.on_cancel;
        descriptor.retry = RetryPolicy {
            attempts: self.retry_attempts,
            delay: Duration::from_millis(self.retry_delay_ms),
        };
        descriptor.fault_cooldown = Duration::from_secs(self.fault_cooldown_secs);

        descriptor
            .validate()
            .with_context(|| format!("invalid endpoint {:?}", self.name))?;
        Ok(descriptor)
    }
}
