//! Bounded retry for side-effecting filesystem calls and the handler fault cooldown.

use std::future::Future;
use std::io;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{IngestError, Result};

/// Fixed attempt budget with a fixed pause between attempts.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            delay: Duration::from_millis(200),
        }
    }
}

/// Errors that will not change by waiting.
fn is_permanent(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::AlreadyExists | io::ErrorKind::InvalidInput
    )
}

/// Run `op` until it succeeds or the policy is exhausted.
///
/// Permanent errors (`NotFound`, `AlreadyExists`) are returned immediately as
/// [`IngestError::Io`] so callers can treat them as races; everything else is
/// retried and finally reported as [`IngestError::RetryExhausted`].
pub async fn retry_io<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &'static str,
    path: &Path,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<T>>,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if is_permanent(&err) => return Err(IngestError::Io(err)),
            Err(err) if attempt < attempts => {
                debug!(
                    target: "ingest::retry",
                    operation,
                    path = %path.display(),
                    attempt,
                    attempts,
                    error = %err,
                    "transient I/O failure, retrying"
                );
                attempt += 1;
                tokio::time::sleep(policy.delay).await;
            }
            Err(err) => {
                warn!(
                    target: "ingest::retry",
                    operation,
                    path = %path.display(),
                    attempts,
                    error = %err,
                    "retry budget exhausted"
                );
                return Err(IngestError::RetryExhausted {
                    operation,
                    path: path.to_path_buf(),
                    attempts,
                    source: err,
                });
            }
        }
    }
}

/// Cooldown window opened by a handler fault and shared by an endpoint's workers.
///
/// A zero window disables the cooldown entirely.
#[derive(Debug)]
pub struct FaultCooldown {
    window: Duration,
    until: Mutex<Option<Instant>>,
}

impl FaultCooldown {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            until: Mutex::new(None),
        }
    }

    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn is_enabled(&self) -> bool {
        !self.window.is_zero()
    }

    /// Open (or extend) the window after a fault.
    pub fn trip(&self) {
        if !self.is_enabled() {
            return;
        }
        let deadline = Instant::now() + self.window;
        if let Ok(mut guard) = self.until.lock() {
            *guard = Some(deadline);
        }
    }

    fn deadline(&self) -> Option<Instant> {
        let guard = self.until.lock().ok()?;
        (*guard).filter(|deadline| *deadline > Instant::now())
    }

    /// Wait until the window is closed. Returns `false` if cancelled first.
    pub async fn wait_ready(&self, cancel: &CancellationToken) -> bool {
        while let Some(deadline) = self.deadline() {
            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = tokio::time::sleep_until(deadline) => {}
            }
        }
        !cancel.is_cancelled()
    }
}
