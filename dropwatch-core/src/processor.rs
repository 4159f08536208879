//! One running ingestion pipeline.
//!
//! `FileProcessor` owns the wiring: discovery source → claim loop → dispatcher
//! → outcome router, with the scavenger and the throughput watchdog running
//! next to it. Everything background-ish hangs off one cancellation token.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::claim::Claimer;
use crate::discovery::{self, CandidateSender, DiscoveryHandle};
use crate::dispatcher::{Dispatcher, FileHandler};
use crate::endpoint::EndpointDescriptor;
use crate::error::Result;
use crate::events::{PipelineEvent, PipelineEventBus};
use crate::filter::{AllOf, FileFilter, PatternFilter};
use crate::layout;
use crate::retry::FaultCooldown;
use crate::router::{NoopPostProcessor, OutcomeRouter, PostProcessor};
use crate::scavenger::Scavenger;
use crate::watchdog::ThroughputWatchdog;

type SharedDiscovery = Arc<Mutex<Option<DiscoveryHandle>>>;

pub struct FileProcessor {
    descriptor: EndpointDescriptor,
    handler: Arc<dyn FileHandler>,
    extra_filter: Option<Arc<dyn FileFilter>>,
    post_processor: Option<Arc<dyn PostProcessor>>,
    events: PipelineEventBus,
    running: Mutex<Option<RunningPipeline>>,
}

struct RunningPipeline {
    cancel: CancellationToken,
    dispatcher: Arc<Dispatcher>,
    discovery: SharedDiscovery,
    watchdog: Option<Arc<ThroughputWatchdog>>,
    tasks: Vec<JoinHandle<()>>,
}

impl fmt::Debug for FileProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let running = match self.running.try_lock() {
            Ok(guard) => format!("{}", guard.is_some()),
            Err(_) => "<locked>".to_string(),
        };
        f.debug_struct("FileProcessor")
            .field("endpoint", &self.descriptor.name)
            .field("processor", &self.descriptor.processor)
            .field("extra_filter", &self.extra_filter)
            .field("running", &running)
            .finish()
    }
}

impl FileProcessor {
    pub fn new(descriptor: EndpointDescriptor, handler: Arc<dyn FileHandler>) -> Self {
        Self {
            descriptor,
            handler,
            extra_filter: None,
            post_processor: None,
            events: PipelineEventBus::default(),
            running: Mutex::new(None),
        }
    }

    /// Additional filter combined with the descriptor's inclusion pattern.
    pub fn with_filter(mut self, filter: Arc<dyn FileFilter>) -> Self {
        self.extra_filter = Some(filter);
        self
    }

    /// Overrides any post-processor the handler itself provides.
    pub fn with_post_processor(mut self, post_processor: Arc<dyn PostProcessor>) -> Self {
        self.post_processor = Some(post_processor);
        self
    }

    pub fn with_event_bus(mut self, events: PipelineEventBus) -> Self {
        self.events = events;
        self
    }

    pub fn descriptor(&self) -> &EndpointDescriptor {
        &self.descriptor
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn events(&self) -> &PipelineEventBus {
        &self.events
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Validate the descriptor and bring the pipeline up. Calling it on a
    /// running processor does nothing.
    pub async fn start(&self) -> Result<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            debug!(target: "ingest::processor", endpoint = %self.descriptor.name, "already running");
            return Ok(());
        }

        let d = &self.descriptor;
        d.validate()?;
        self.ensure_directories().await?;

        let claimer = Arc::new(Claimer::new(
            d.drop_path.clone(),
            d.in_progress_path.clone(),
            d.monitor_subdirectories,
            self.build_filter()?,
        ));
        let router = Arc::new(OutcomeRouter::for_endpoint(
            d,
            self.resolve_post_processor(),
            self.events.clone(),
        )?);

        let cancel = CancellationToken::new();
        let dispatcher = Arc::new(Dispatcher::start(
            d.name.clone(),
            d.worker_count,
            Arc::clone(&self.handler),
            router,
            Arc::new(FaultCooldown::new(d.fault_cooldown)),
            cancel.child_token(),
        ));

        let (candidates, candidate_rx) = mpsc::unbounded_channel();
        let source = match discovery::start(d, candidates.clone(), &cancel).await {
            Ok(source) => source,
            Err(err) => {
                cancel.cancel();
                dispatcher.shutdown().await;
                error!(target: "ingest::processor", endpoint = %d.name, error = %err, "failed to start discovery");
                return Err(err);
            }
        };
        let discovery: SharedDiscovery = Arc::new(Mutex::new(Some(source)));

        let watchdog = d.watchdog_enabled().then(|| {
            Arc::new(ThroughputWatchdog::spawn(
                d.name.clone(),
                d.restart_interval,
                cancel.child_token(),
            ))
        });

        let mut tasks = Vec::with_capacity(3);
        tasks.push(tokio::spawn(claim_loop(
            d.name.clone(),
            candidate_rx,
            claimer,
            Arc::clone(&dispatcher),
            watchdog.clone(),
            self.events.clone(),
            cancel.clone(),
        )));

        let scavenger = Arc::new(Scavenger::new(d, self.events.clone()));
        tasks.push(scavenger.spawn(d.scavenge_interval, cancel.clone()));

        if let Some(watchdog) = &watchdog {
            tasks.push(tokio::spawn(restart_on_alert(
                d.clone(),
                Arc::clone(watchdog),
                Arc::clone(&discovery),
                candidates,
                self.events.clone(),
                cancel.clone(),
            )));
        }

        info!(
            target: "ingest::processor",
            endpoint = %d.name,
            processor = d.processor.as_str(),
            drop = %d.drop_path.display(),
            workers = d.worker_count,
            watchdog = d.watchdog_enabled(),
            "file processor started"
        );

        *running = Some(RunningPipeline {
            cancel,
            dispatcher,
            discovery,
            watchdog,
            tasks,
        });
        Ok(())
    }

    /// Stop discovery and background tasks, cancel in-flight handlers and wait
    /// for them to be routed. Safe before `start` and safe to repeat.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };

        if let Some(watchdog) = &running.watchdog {
            watchdog.stop_alerts();
        }
        running.cancel.cancel();

        if let Some(source) = running.discovery.lock().await.take() {
            source.stop().await;
        }
        for task in running.tasks {
            if let Err(err) = task.await {
                warn!(target: "ingest::processor", endpoint = %self.descriptor.name, error = %err, "background task ended abnormally");
            }
        }
        running.dispatcher.shutdown().await;
        if let Some(watchdog) = running.watchdog {
            watchdog.shutdown().await;
        }

        info!(target: "ingest::processor", endpoint = %self.descriptor.name, "file processor stopped");
    }

    fn build_filter(&self) -> Result<Arc<dyn FileFilter>> {
        let pattern: Arc<dyn FileFilter> =
            Arc::new(PatternFilter::new(&self.descriptor.include_pattern)?);
        Ok(match &self.extra_filter {
            Some(extra) => Arc::new(AllOf::new(vec![pattern, Arc::clone(extra)])),
            None => pattern,
        })
    }

    fn resolve_post_processor(&self) -> Arc<dyn PostProcessor> {
        self.post_processor
            .clone()
            .or_else(|| self.handler.post_processor())
            .unwrap_or_else(|| Arc::new(NoopPostProcessor))
    }

    async fn ensure_directories(&self) -> Result<()> {
        let d = &self.descriptor;
        let mut roots: Vec<PathBuf> = vec![
            d.drop_path.clone(),
            layout::template_root(&d.in_progress_path),
            layout::template_root(&d.failure_path),
        ];
        if let Some(success) = &d.success_path {
            roots.push(layout::template_root(success));
        }
        for root in roots.into_iter().filter(|root| !root.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(&root).await?;
        }
        Ok(())
    }
}

/// Single consumer of the candidate channel: claim, then hand to the dispatcher.
async fn claim_loop(
    endpoint: String,
    mut candidates: mpsc::UnboundedReceiver<PathBuf>,
    claimer: Arc<Claimer>,
    dispatcher: Arc<Dispatcher>,
    watchdog: Option<Arc<ThroughputWatchdog>>,
    events: PipelineEventBus,
    cancel: CancellationToken,
) {
    loop {
        let candidate = tokio::select! {
            _ = cancel.cancelled() => break,
            candidate = candidates.recv() => candidate,
        };
        let Some(candidate) = candidate else {
            break;
        };
        if let Some(watchdog) = &watchdog {
            watchdog.observe();
        }

        let file = match claimer.claim(&candidate) {
            Ok(Some(file)) => file,
            Ok(None) => continue,
            Err(err) => {
                warn!(
                    target: "ingest::claim",
                    endpoint = %endpoint,
                    path = %candidate.display(),
                    error = %err,
                    "claim failed"
                );
                continue;
            }
        };

        events.publish(PipelineEvent::Claimed {
            endpoint: endpoint.clone(),
            file: file.clone(),
        });
        if let Err(err) = dispatcher.notify(file) {
            debug!(target: "ingest::processor", endpoint = %endpoint, error = %err, "claimed file left for recovery");
        }
    }
    debug!(target: "ingest::processor", endpoint = %endpoint, "claim loop stopped");
}

/// Restart the discovery source whenever the watchdog reports silence.
async fn restart_on_alert(
    descriptor: EndpointDescriptor,
    watchdog: Arc<ThroughputWatchdog>,
    discovery: SharedDiscovery,
    candidates: CandidateSender,
    events: PipelineEventBus,
    cancel: CancellationToken,
) {
    let mut alerts = watchdog.subscribe();
    loop {
        let alert = tokio::select! {
            _ = cancel.cancelled() => break,
            alert = alerts.recv() => alert,
        };
        match alert {
            Ok(alert) => {
                info!(
                    target: "ingest::processor",
                    endpoint = %alert.endpoint,
                    silent_for = ?alert.silent_for,
                    "restarting discovery after inactivity"
                );
            }
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }

        let mut slot = discovery.lock().await;
        if cancel.is_cancelled() {
            break;
        }
        if let Some(old) = slot.take() {
            old.stop().await;
        }
        match discovery::start(&descriptor, candidates.clone(), &cancel).await {
            Ok(source) => {
                *slot = Some(source);
                events.publish(PipelineEvent::DiscoveryRestarted {
                    endpoint: descriptor.name.clone(),
                });
            }
            Err(err) => {
                // Resume anyway; the next alert retries the restart.
                error!(target: "ingest::processor", endpoint = %descriptor.name, error = %err, "discovery restart failed");
            }
        }
        drop(slot);
        watchdog.resume();
    }
    debug!(target: "ingest::processor", endpoint = %descriptor.name, "discovery supervisor stopped");
}
