//! Recovery of stale claims.
//!
//! A file that sits in the in-progress location longer than the recovery
//! interval is assumed orphaned (crashed worker, killed process) and is moved
//! back under the drop root, where discovery picks it up again. Claim age is
//! the file's modification time, which the claim step resets.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::endpoint::EndpointDescriptor;
use crate::error::{IngestError, Result};
use crate::events::{PipelineEvent, PipelineEventBus};
use crate::layout;
use crate::retry::{RetryPolicy, retry_io};
use crate::strategy::move_file;

pub struct Scavenger {
    endpoint: String,
    drop_root: PathBuf,
    in_progress: PathBuf,
    recovery_interval: Duration,
    retry: RetryPolicy,
    events: PipelineEventBus,
}

impl fmt::Debug for Scavenger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scavenger")
            .field("endpoint", &self.endpoint)
            .field("drop_root", &self.drop_root)
            .field("in_progress", &self.in_progress)
            .field("recovery_interval", &self.recovery_interval)
            .finish()
    }
}

struct StaleClaim {
    path: PathBuf,
    claimed_at: SystemTime,
}

impl Scavenger {
    pub fn new(descriptor: &EndpointDescriptor, events: PipelineEventBus) -> Self {
        Self {
            endpoint: descriptor.name.clone(),
            drop_root: descriptor.drop_path.clone(),
            in_progress: descriptor.in_progress_path.clone(),
            recovery_interval: descriptor.recovery_interval,
            retry: descriptor.retry,
            events,
        }
    }

    /// Run [`Scavenger::sweep`] every `every` until `cancel` fires. The first
    /// sweep happens one full interval after start-up.
    pub fn spawn(self: Arc<Self>, every: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(err) = self.sweep().await {
                            warn!(target: "ingest::scavenger", endpoint = %self.endpoint, error = %err, "scavenge pass failed");
                        }
                    }
                }
            }
            debug!(target: "ingest::scavenger", endpoint = %self.endpoint, "scavenger stopped");
        })
    }

    /// Move every stale claim back to the drop root. Returns how many moved.
    pub async fn sweep(&self) -> Result<usize> {
        let root = layout::template_root(&self.in_progress);
        let threshold = self.recovery_interval;
        let scan_root = root.clone();
        let stale = tokio::task::spawn_blocking(move || find_stale(&scan_root, threshold))
            .await
            .map_err(|err| IngestError::Internal(format!("scavenger scan panicked: {err}")))?;

        let mut recovered = 0;
        for claim in stale {
            match self.recover(&claim).await {
                Ok(true) => recovered += 1,
                Ok(false) => {}
                Err(err) => warn!(
                    target: "ingest::scavenger",
                    endpoint = %self.endpoint,
                    path = %claim.path.display(),
                    error = %err,
                    "could not return stale claim to drop directory"
                ),
            }
        }
        if recovered > 0 {
            info!(target: "ingest::scavenger", endpoint = %self.endpoint, recovered, "returned stale claims to drop directory");
        }
        Ok(recovered)
    }

    async fn recover(&self, claim: &StaleClaim) -> Result<bool> {
        let Some(destination) = self.destination_for(&claim.path) else {
            debug!(
                target: "ingest::scavenger",
                endpoint = %self.endpoint,
                path = %claim.path.display(),
                "file does not match the in-progress layout; leaving it alone"
            );
            return Ok(false);
        };

        if tokio::fs::try_exists(&destination).await.unwrap_or(false) {
            warn!(
                target: "ingest::scavenger",
                endpoint = %self.endpoint,
                path = %claim.path.display(),
                destination = %destination.display(),
                "a newer file with the same name is waiting in the drop directory; skipping"
            );
            return Ok(false);
        }

        if let Some(parent) = destination.parent() {
            retry_io(&self.retry, "create directory", parent, || {
                tokio::fs::create_dir_all(parent)
            })
            .await?;
        }

        let source = claim.path.as_path();
        let dest = destination.as_path();
        match retry_io(&self.retry, "recover", source, || move_file(source, dest)).await {
            Ok(()) => {}
            // Finished or recovered by someone else in the meantime.
            Err(IngestError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(false);
            }
            Err(err) => return Err(err),
        }

        info!(
            target: "ingest::scavenger",
            endpoint = %self.endpoint,
            path = %source.display(),
            destination = %dest.display(),
            claimed_at = %DateTime::<Utc>::from(claim.claimed_at).to_rfc3339(),
            "recovered stale claim"
        );
        self.events.publish(PipelineEvent::Recovered {
            endpoint: self.endpoint.clone(),
            from: claim.path.clone(),
            to: destination.clone(),
        });
        Ok(true)
    }

    fn destination_for(&self, claimed: &Path) -> Option<PathBuf> {
        let file_name = claimed.file_name()?;
        let relative_dir = layout::relative_dir_for(&self.in_progress, claimed.parent()?)?;
        Some(self.drop_root.join(relative_dir).join(file_name))
    }
}

fn find_stale(root: &Path, threshold: Duration) -> Vec<StaleClaim> {
    let now = SystemTime::now();
    WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            let claimed_at = entry.metadata().ok()?.modified().ok()?;
            let age = now.duration_since(claimed_at).unwrap_or_default();
            (age > threshold).then(|| StaleClaim {
                path: entry.into_path(),
                claimed_at,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn age(path: &Path, by: Duration) {
        fs::OpenOptions::new()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(SystemTime::now() - by)
            .unwrap();
    }

    fn scavenger(root: &Path, in_progress: &str) -> Scavenger {
        let mut d = EndpointDescriptor::new(
            "scavenger-test",
            root.join("drop"),
            root.join(in_progress),
            root.join("fail"),
        );
        d.recovery_interval = Duration::from_secs(60);
        Scavenger::new(&d, PipelineEventBus::default())
    }

    #[tokio::test]
    async fn returns_stale_claims_with_structure() {
        let tmp = tempdir().unwrap();
        let scavenger = scavenger(tmp.path(), "inprog");
        let stale = tmp.path().join("inprog/a/b/report.csv");
        let fresh = tmp.path().join("inprog/fresh.csv");
        fs::create_dir_all(stale.parent().unwrap()).unwrap();
        fs::write(&stale, "x").unwrap();
        fs::write(&fresh, "x").unwrap();
        age(&stale, Duration::from_secs(120));

        assert_eq!(scavenger.sweep().await.unwrap(), 1);
        assert!(tmp.path().join("drop/a/b/report.csv").exists());
        assert!(!stale.exists());
        assert!(fresh.exists());
    }

    #[tokio::test]
    async fn templated_in_progress_maps_back_to_relative_dir() {
        let tmp = tempdir().unwrap();
        let scavenger = scavenger(tmp.path(), "work/%filepath%/claimed");
        let stale = tmp.path().join("work/x/y/claimed/data.bin");
        fs::create_dir_all(stale.parent().unwrap()).unwrap();
        fs::write(&stale, "x").unwrap();
        age(&stale, Duration::from_secs(600));

        assert_eq!(scavenger.sweep().await.unwrap(), 1);
        assert!(tmp.path().join("drop/x/y/data.bin").exists());
    }

    #[tokio::test]
    async fn waiting_duplicate_is_not_overwritten() {
        let tmp = tempdir().unwrap();
        let scavenger = scavenger(tmp.path(), "inprog");
        let stale = tmp.path().join("inprog/dup.csv");
        fs::create_dir_all(tmp.path().join("inprog")).unwrap();
        fs::create_dir_all(tmp.path().join("drop")).unwrap();
        fs::write(&stale, "old").unwrap();
        fs::write(tmp.path().join("drop/dup.csv"), "new").unwrap();
        age(&stale, Duration::from_secs(120));

        assert_eq!(scavenger.sweep().await.unwrap(), 0);
        assert!(stale.exists());
        assert_eq!(
            fs::read_to_string(tmp.path().join("drop/dup.csv")).unwrap(),
            "new"
        );
    }

    #[tokio::test]
    async fn empty_in_progress_is_fine() {
        let tmp = tempdir().unwrap();
        let scavenger = scavenger(tmp.path(), "missing");
        assert_eq!(scavenger.sweep().await.unwrap(), 0);
    }
}
