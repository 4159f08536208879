//! Throughput watchdog for discovery sources.
//!
//! A single task owns a resettable timer. Every observed file pushes the
//! deadline out; if the deadline passes, one alert is broadcast and the timer
//! stays disarmed until [`ThroughputWatchdog::resume`] is called.

use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Raised when a discovery source stayed silent for a full window.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WatchdogAlert {
    pub endpoint: String,
    pub silent_for: Duration,
}

#[derive(Debug)]
enum Signal {
    Observed,
    Resume,
    Stop,
}

pub struct ThroughputWatchdog {
    endpoint: String,
    window: Duration,
    signals: mpsc::UnboundedSender<Signal>,
    alerts: broadcast::Sender<WatchdogAlert>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for ThroughputWatchdog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThroughputWatchdog")
            .field("endpoint", &self.endpoint)
            .field("window", &self.window)
            .field("stopped", &self.signals.is_closed())
            .finish()
    }
}

impl ThroughputWatchdog {
    /// Arm a watchdog with the given inactivity window. The loop ends when
    /// `cancel` fires or alerts are stopped.
    pub fn spawn(endpoint: impl Into<String>, window: Duration, cancel: CancellationToken) -> Self {
        let endpoint = endpoint.into();
        let (signals, rx) = mpsc::unbounded_channel();
        let (alerts, _) = broadcast::channel(8);
        let task = tokio::spawn(run(endpoint.clone(), window, rx, alerts.clone(), cancel));
        Self {
            endpoint,
            window,
            signals,
            alerts,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WatchdogAlert> {
        self.alerts.subscribe()
    }

    /// A discovery source produced a file.
    pub fn observe(&self) {
        let _ = self.signals.send(Signal::Observed);
    }

    /// Re-arm after an alert has been handled.
    pub fn resume(&self) {
        let _ = self.signals.send(Signal::Resume);
    }

    /// Permanently disable alerts.
    pub fn stop_alerts(&self) {
        let _ = self.signals.send(Signal::Stop);
    }

    /// Stop alerts and wait for the timer task to exit.
    pub async fn shutdown(&self) {
        self.stop_alerts();
        let task = self.task.lock().ok().and_then(|mut guard| guard.take());
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

async fn run(
    endpoint: String,
    window: Duration,
    mut signals: mpsc::UnboundedReceiver<Signal>,
    alerts: broadcast::Sender<WatchdogAlert>,
    cancel: CancellationToken,
) {
    let timer = tokio::time::sleep(window);
    tokio::pin!(timer);
    let mut armed = true;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            signal = signals.recv() => match signal {
                Some(Signal::Observed) if armed => timer.as_mut().reset(Instant::now() + window),
                Some(Signal::Observed) => {}
                Some(Signal::Resume) => {
                    armed = true;
                    timer.as_mut().reset(Instant::now() + window);
                }
                Some(Signal::Stop) | None => break,
            },
            _ = &mut timer, if armed => {
                armed = false;
                warn!(
                    target: "ingest::watchdog",
                    endpoint = %endpoint,
                    silent_for = ?window,
                    "no files observed within restart interval"
                );
                let _ = alerts.send(WatchdogAlert {
                    endpoint: endpoint.clone(),
                    silent_for: window,
                });
            }
        }
    }
    debug!(target: "ingest::watchdog", endpoint = %endpoint, "watchdog stopped");
}
