//! Fixed-interval directory listing.

use std::path::PathBuf;
use std::time::Duration;

use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{info, trace};

use super::{CandidateSender, DiscoveryHandle, scan_into};
use crate::endpoint::{EndpointDescriptor, ProcessorKind};

/// Lists the drop directory on every tick. The first tick fires immediately,
/// which doubles as the start-up scan.
pub fn start(
    descriptor: &EndpointDescriptor,
    candidates: CandidateSender,
    cancel: CancellationToken,
) -> DiscoveryHandle {
    let root = descriptor.drop_path.clone();
    let recursive = descriptor.monitor_subdirectories;
    let every = descriptor.poll_interval;

    info!(
        target: "ingest::discovery",
        endpoint = %descriptor.name,
        root = %root.display(),
        interval_ms = every.as_millis() as u64,
        recursive,
        "polling drop directory"
    );

    let task = tokio::spawn(poll_loop(
        root.clone(),
        recursive,
        every,
        candidates,
        cancel.clone(),
    ));
    DiscoveryHandle::new(ProcessorKind::Polling, root, cancel, task, None)
}

async fn poll_loop(
    root: PathBuf,
    recursive: bool,
    every: Duration,
    candidates: CandidateSender,
    cancel: CancellationToken,
) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if candidates.is_closed() {
                    break;
                }
                let found = scan_into(root.clone(), recursive, &candidates).await;
                trace!(target: "ingest::discovery", root = %root.display(), found, "poll tick");
            }
        }
    }
}
