//! Notification-driven discovery.
//!
//! Both the native OS watcher and the stat-comparing poll watcher report into
//! the same forwarding task, which turns notify events into candidate paths.
//! The drop directory is subscribed first and scanned second, so files that
//! were already present at start-up are found as well.

use std::path::{Path, PathBuf};

use notify::event::{AccessKind, AccessMode, EventKind, ModifyKind, RenameMode};
use notify::{
    Config as NotifyConfig, Event, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher,
};
use tokio::sync::mpsc;
use tokio::task::spawn_blocking;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{ActiveWatcher, CandidateSender, DiscoveryHandle, scan_into};
use crate::endpoint::{EndpointDescriptor, ProcessorKind};
use crate::error::{IngestError, Result};
use crate::layout;

type RawEvent = notify::Result<Event>;

/// OS change notifications plus a start-up scan.
pub async fn start_native(
    descriptor: &EndpointDescriptor,
    candidates: CandidateSender,
    cancel: CancellationToken,
) -> Result<DiscoveryHandle> {
    start_watching(ProcessorKind::Event, descriptor, candidates, cancel).await
}

/// Poll watcher plus a start-up scan.
pub async fn start_poll_watcher(
    descriptor: &EndpointDescriptor,
    candidates: CandidateSender,
    cancel: CancellationToken,
) -> Result<DiscoveryHandle> {
    start_watching(ProcessorKind::PollingV2, descriptor, candidates, cancel).await
}

async fn start_watching(
    kind: ProcessorKind,
    descriptor: &EndpointDescriptor,
    candidates: CandidateSender,
    cancel: CancellationToken,
) -> Result<DiscoveryHandle> {
    let root = descriptor.drop_path.clone();
    let recursive = descriptor.monitor_subdirectories;
    let poll_interval = descriptor.poll_interval;
    let (raw_tx, raw_rx) = mpsc::unbounded_channel::<RawEvent>();

    let watcher_root = root.clone();
    let watcher = spawn_blocking(move || {
        init_watcher(kind, &watcher_root, recursive, poll_interval, raw_tx)
    })
    .await
    .map_err(|err| IngestError::Watch(format!("watcher initialization panicked: {err}")))??;

    info!(
        target: "ingest::discovery",
        endpoint = %descriptor.name,
        root = %root.display(),
        kind = kind.as_str(),
        recursive,
        "watching drop directory"
    );

    let task = tokio::spawn(forward_events(
        root.clone(),
        recursive,
        raw_rx,
        candidates,
        cancel.clone(),
    ));
    Ok(DiscoveryHandle::new(kind, root, cancel, task, Some(watcher)))
}

fn init_watcher(
    kind: ProcessorKind,
    root: &Path,
    recursive: bool,
    poll_interval: std::time::Duration,
    raw_tx: mpsc::UnboundedSender<RawEvent>,
) -> Result<ActiveWatcher> {
    let mode = if recursive {
        RecursiveMode::Recursive
    } else {
        RecursiveMode::NonRecursive
    };
    let handler = move |res: RawEvent| {
        // The receiver only goes away when the source is stopping.
        let _ = raw_tx.send(res);
    };
    let watch_failed = |err: notify::Error| {
        IngestError::Watch(format!("failed to watch {}: {err}", root.display()))
    };

    match kind {
        ProcessorKind::PollingV2 => {
            let config = NotifyConfig::default().with_poll_interval(poll_interval);
            let mut watcher = PollWatcher::new(handler, config).map_err(watch_failed)?;
            watcher.watch(root, mode).map_err(watch_failed)?;
            Ok(ActiveWatcher::Poll(watcher))
        }
        _ => {
            let mut watcher =
                RecommendedWatcher::new(handler, NotifyConfig::default()).map_err(watch_failed)?;
            watcher.watch(root, mode).map_err(watch_failed)?;
            Ok(ActiveWatcher::Native(watcher))
        }
    }
}

async fn forward_events(
    root: PathBuf,
    recursive: bool,
    mut raw_rx: mpsc::UnboundedReceiver<RawEvent>,
    candidates: CandidateSender,
    cancel: CancellationToken,
) {
    let found = scan_into(root.clone(), recursive, &candidates).await;
    debug!(target: "ingest::discovery", root = %root.display(), found, "start-up scan complete");

    loop {
        let raw = tokio::select! {
            _ = cancel.cancelled() => break,
            raw = raw_rx.recv() => raw,
        };
        let Some(raw) = raw else {
            break;
        };

        match raw {
            Ok(event) => match classify_event(&event) {
                Discovered::Paths(paths) => {
                    for path in paths {
                        forward_path(&root, recursive, path, &candidates).await;
                    }
                }
                Discovered::Rescan => {
                    warn!(target: "ingest::discovery", root = %root.display(), "watcher requested a rescan");
                    scan_into(root.clone(), recursive, &candidates).await;
                }
                Discovered::Nothing => {}
            },
            Err(err) => {
                warn!(target: "ingest::discovery", root = %root.display(), error = %err, "watcher error");
            }
        }
    }
}

async fn forward_path(root: &Path, recursive: bool, path: PathBuf, candidates: &CandidateSender) {
    let Some(path) = sanitize_path(root, &path) else {
        return;
    };
    match tokio::fs::symlink_metadata(&path).await {
        Ok(meta) if meta.is_dir() => {
            // Files written into a new directory can beat the recursive watch on it.
            if recursive {
                scan_into(path, true, candidates).await;
            }
        }
        Ok(meta) if meta.is_file() => {
            let _ = candidates.send(path);
        }
        // Gone already (claimed elsewhere) or not a regular file.
        _ => {}
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Discovered {
    Paths(Vec<PathBuf>),
    Rescan,
    Nothing,
}

fn classify_event(event: &Event) -> Discovered {
    if event.need_rescan() {
        return Discovered::Rescan;
    }
    let paths = match &event.kind {
        EventKind::Create(_)
        | EventKind::Modify(ModifyKind::Name(RenameMode::Any))
        | EventKind::Access(AccessKind::Close(AccessMode::Write)) => event.paths.clone(),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            event.paths.first().cloned().into_iter().collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            event.paths.get(1).cloned().into_iter().collect()
        }
        EventKind::Other => return Discovered::Rescan,
        _ => Vec::new(),
    };
    if paths.is_empty() {
        Discovered::Nothing
    } else {
        Discovered::Paths(paths)
    }
}

fn sanitize_path(root: &Path, path: &Path) -> Option<PathBuf> {
    let relative = layout::relative_to(root, path)?;
    if relative.as_os_str().is_empty() {
        return None;
    }
    Some(root.join(relative))
}
