//! Discovery sources feeding candidate paths to the claim loop.
//!
//! Every source writes into the same unbounded candidate channel; the claim
//! loop is the single consumer, so event and polling sources can overlap
//! without duplicating claim logic. A source only finds paths. Filtering and
//! claiming happen downstream.

use std::fmt;
use std::path::{Path, PathBuf};

use notify::{PollWatcher, RecommendedWatcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::endpoint::{EndpointDescriptor, ProcessorKind};
use crate::error::Result;

pub mod event;
pub mod polling;

/// Producer half of the candidate channel.
pub type CandidateSender = mpsc::UnboundedSender<PathBuf>;

/// Keeps a notify watcher alive for as long as the source runs.
pub(crate) enum ActiveWatcher {
    Native(RecommendedWatcher),
    Poll(PollWatcher),
}

impl fmt::Debug for ActiveWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActiveWatcher::Native(_) => f.write_str("ActiveWatcher::Native"),
            ActiveWatcher::Poll(_) => f.write_str("ActiveWatcher::Poll"),
        }
    }
}

/// A running discovery source.
pub struct DiscoveryHandle {
    kind: ProcessorKind,
    root: PathBuf,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    watcher: Option<ActiveWatcher>,
}

impl fmt::Debug for DiscoveryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscoveryHandle")
            .field("kind", &self.kind)
            .field("root", &self.root)
            .field("watcher", &self.watcher)
            .field("running", &self.task.as_ref().map(|t| !t.is_finished()))
            .finish()
    }
}

impl DiscoveryHandle {
    pub(crate) fn new(
        kind: ProcessorKind,
        root: PathBuf,
        cancel: CancellationToken,
        task: JoinHandle<()>,
        watcher: Option<ActiveWatcher>,
    ) -> Self {
        Self {
            kind,
            root,
            cancel,
            task: Some(task),
            watcher,
        }
    }

    pub fn kind(&self) -> ProcessorKind {
        self.kind
    }

    /// Unsubscribe and wait for the source task to exit.
    pub async fn stop(mut self) {
        // Dropping the watcher ends the notify stream.
        self.watcher.take();
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                warn!(
                    target: "ingest::discovery",
                    root = %self.root.display(),
                    error = %err,
                    "discovery task ended abnormally"
                );
            }
        }
        debug!(target: "ingest::discovery", root = %self.root.display(), kind = self.kind.as_str(), "discovery stopped");
    }
}

impl Drop for DiscoveryHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Start the source selected by the descriptor. `parent` cancels it together
/// with the rest of the pipeline.
pub async fn start(
    descriptor: &EndpointDescriptor,
    candidates: CandidateSender,
    parent: &CancellationToken,
) -> Result<DiscoveryHandle> {
    let cancel = parent.child_token();
    match descriptor.processor {
        ProcessorKind::Event => event::start_native(descriptor, candidates, cancel).await,
        ProcessorKind::PollingV2 => event::start_poll_watcher(descriptor, candidates, cancel).await,
        ProcessorKind::Polling => Ok(polling::start(descriptor, candidates, cancel)),
    }
}

/// Every regular file currently under `root`.
pub fn scan_drop(root: &Path, recursive: bool) -> Vec<PathBuf> {
    let mut walker = WalkDir::new(root).min_depth(1).follow_links(false);
    if !recursive {
        walker = walker.max_depth(1);
    }

    let mut files = Vec::new();
    for entry in walker {
        match entry {
            Ok(entry) if entry.file_type().is_file() => files.push(entry.into_path()),
            Ok(_) => {}
            Err(err) => {
                // Entries can vanish mid-walk when another consumer claims them.
                debug!(target: "ingest::discovery", root = %root.display(), error = %err, "skipping unreadable entry");
            }
        }
    }
    files
}

/// Walk `root` off the async runtime and push every file as a candidate.
pub(crate) async fn scan_into(root: PathBuf, recursive: bool, candidates: &CandidateSender) -> usize {
    let scan_root = root.clone();
    match tokio::task::spawn_blocking(move || scan_drop(&scan_root, recursive)).await {
        Ok(files) => {
            let found = files.len();
            for file in files {
                if candidates.send(file).is_err() {
                    break;
                }
            }
            found
        }
        Err(err) => {
            warn!(target: "ingest::discovery", root = %root.display(), error = %err, "directory scan panicked");
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn scan_respects_recursion_flag() {
        let tmp = tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("a/b")).unwrap();
        fs::write(tmp.path().join("top.csv"), "x").unwrap();
        fs::write(tmp.path().join("a/b/deep.csv"), "x").unwrap();

        let flat = scan_drop(tmp.path(), false);
        assert_eq!(flat, vec![tmp.path().join("top.csv")]);

        let mut deep = scan_drop(tmp.path(), true);
        deep.sort();
        assert_eq!(
            deep,
            vec![tmp.path().join("a/b/deep.csv"), tmp.path().join("top.csv")]
        );
    }

    #[test]
    fn scan_of_missing_root_is_empty() {
        let tmp = tempdir().unwrap();
        assert!(scan_drop(&tmp.path().join("missing"), true).is_empty());
    }
}
