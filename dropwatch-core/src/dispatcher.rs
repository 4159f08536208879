//! Bounded worker pool between the claim step and the outcome router.
//!
//! Claimed files go onto an unbounded queue so discovery never blocks. A fixed
//! set of workers pulls from the shared receiver, so at most `worker_count`
//! handler invocations run at once. Every dequeued file produces exactly one
//! [`Outcome`]: a file picked up while shutdown interrupts the fault cooldown
//! never reaches the handler and routes as [`Outcome::Cancelled`]. Files still
//! queued at shutdown stay in the in-progress directory for the scavenger.

use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::claim::ProcessingFile;
use crate::error::{IngestError, Result};
use crate::retry::FaultCooldown;
use crate::router::{Outcome, OutcomeRouter, PostProcessor};

/// The processing capability plugged into an endpoint.
///
/// `Ok(true)` means the file was handled. `Ok(false)` ("not handled"), an
/// error, or a panic all count as a fault.
#[async_trait]
pub trait FileHandler: Send + Sync + 'static {
    async fn handle(&self, file: &Path, original_name: &Path) -> Result<bool>;

    /// Variant for handlers that need the absolute path the file was dropped at.
    async fn handle_with_full_path(
        &self,
        file: &Path,
        original_name: &Path,
        original_full_path: &Path,
    ) -> Result<bool> {
        let _ = original_full_path;
        self.handle(file, original_name).await
    }

    /// Handlers that also act as a post-processor expose it here.
    fn post_processor(&self) -> Option<Arc<dyn PostProcessor>> {
        None
    }
}

struct Worker {
    id: usize,
    handle: JoinHandle<()>,
}

/// Worker pool for one endpoint.
pub struct Dispatcher {
    endpoint: String,
    sender: StdMutex<Option<mpsc::UnboundedSender<ProcessingFile>>>,
    workers: Mutex<Vec<Worker>>,
    cancel: CancellationToken,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let open = self.sender.lock().map(|s| s.is_some()).unwrap_or(false);
        f.debug_struct("Dispatcher")
            .field("endpoint", &self.endpoint)
            .field("accepting", &open)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl Dispatcher {
    /// Spawn `worker_count` workers. They stop when `cancel` fires.
    pub fn start(
        endpoint: impl Into<String>,
        worker_count: usize,
        handler: Arc<dyn FileHandler>,
        router: Arc<OutcomeRouter>,
        cooldown: Arc<FaultCooldown>,
        cancel: CancellationToken,
    ) -> Self {
        let endpoint = endpoint.into();
        let worker_count = worker_count.max(1);
        let (sender, receiver) = mpsc::unbounded_channel();
        let receiver = Arc::new(Mutex::new(receiver));

        let mut workers = Vec::with_capacity(worker_count);
        for id in 0..worker_count {
            let ctx = WorkerContext {
                id,
                endpoint: endpoint.clone(),
                handler: Arc::clone(&handler),
                router: Arc::clone(&router),
                cooldown: Arc::clone(&cooldown),
                receiver: Arc::clone(&receiver),
                cancel: cancel.clone(),
            };
            let handle = tokio::spawn(ctx.run());
            workers.push(Worker { id, handle });
        }

        info!(target: "ingest::dispatch", endpoint = %endpoint, worker_count, "started dispatcher workers");

        Self {
            endpoint,
            sender: StdMutex::new(Some(sender)),
            workers: Mutex::new(workers),
            cancel,
        }
    }

    /// Queue a claimed file. Never blocks.
    ///
    /// Fails only after shutdown; the file then stays in the in-progress
    /// directory until the scavenger hands it back.
    pub fn notify(&self, file: ProcessingFile) -> Result<()> {
        let guard = self
            .sender
            .lock()
            .map_err(|_| IngestError::Internal("dispatcher queue lock poisoned".into()))?;
        let Some(sender) = guard.as_ref() else {
            return Err(IngestError::Cancelled(format!(
                "dispatcher for {} is shut down",
                self.endpoint
            )));
        };
        sender.send(file).map_err(|err| {
            IngestError::Cancelled(format!(
                "dispatcher for {} stopped before {} was queued",
                self.endpoint,
                err.0.current_path().display()
            ))
        })
    }

    /// Close the queue, cancel in-flight work and wait for every worker to
    /// finish routing. Safe to call more than once.
    pub async fn shutdown(&self) {
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
        self.cancel.cancel();

        let workers: Vec<Worker> = std::mem::take(&mut *self.workers.lock().await);
        for worker in workers {
            if let Err(err) = worker.handle.await {
                error!(
                    target: "ingest::dispatch",
                    endpoint = %self.endpoint,
                    worker = worker.id,
                    error = %err,
                    "dispatcher worker ended abnormally"
                );
            }
        }
    }
}

struct WorkerContext {
    id: usize,
    endpoint: String,
    handler: Arc<dyn FileHandler>,
    router: Arc<OutcomeRouter>,
    cooldown: Arc<FaultCooldown>,
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<ProcessingFile>>>,
    cancel: CancellationToken,
}

impl WorkerContext {
    async fn run(self) {
        loop {
            let next = {
                let mut receiver = self.receiver.lock().await;
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => None,
                    file = receiver.recv() => file,
                }
            };
            let Some(file) = next else {
                break;
            };

            if !self.cooldown.wait_ready(&self.cancel).await {
                debug!(
                    target: "ingest::dispatch",
                    endpoint = %self.endpoint,
                    path = %file.current_path().display(),
                    "shutdown before handler started"
                );
                let _ = self.router.route(Outcome::Cancelled, &file).await;
                break;
            }

            let outcome = self.invoke(&file).await;
            if outcome == Outcome::Error {
                self.cooldown.trip();
            }
            // Failures are logged and published by the router.
            let _ = self.router.route(outcome, &file).await;
        }
        debug!(target: "ingest::dispatch", endpoint = %self.endpoint, worker = self.id, "worker stopped");
    }

    async fn invoke(&self, file: &ProcessingFile) -> Outcome {
        let handler = Arc::clone(&self.handler);
        let task_file = file.clone();
        let mut task = tokio::spawn(async move {
            handler
                .handle_with_full_path(
                    task_file.current_path(),
                    task_file.original_path(),
                    task_file.original_full_path(),
                )
                .await
        });

        let joined = tokio::select! {
            joined = &mut task => joined,
            _ = self.cancel.cancelled() => {
                task.abort();
                // A handler that finished in the same instant still counts.
                task.await
            }
        };

        let path = file.current_path().display();
        match joined {
            Ok(Ok(true)) => Outcome::Processed,
            Ok(Ok(false)) => {
                warn!(target: "ingest::dispatch", endpoint = %self.endpoint, path = %path, "handler reported file as not handled");
                Outcome::Error
            }
            Ok(Err(IngestError::Cancelled(reason))) => {
                info!(target: "ingest::dispatch", endpoint = %self.endpoint, path = %path, reason = %reason, "handler cancelled");
                Outcome::Cancelled
            }
            Ok(Err(err)) => {
                warn!(target: "ingest::dispatch", endpoint = %self.endpoint, path = %path, error = %err, "handler failed");
                Outcome::Error
            }
            Err(err) if err.is_cancelled() => {
                info!(target: "ingest::dispatch", endpoint = %self.endpoint, path = %path, "handler cancelled by shutdown");
                Outcome::Cancelled
            }
            Err(err) => {
                error!(target: "ingest::dispatch", endpoint = %self.endpoint, path = %path, error = %err, "handler panicked");
                Outcome::Error
            }
        }
    }
}
