use std::fmt;
use std::path::PathBuf;

use tokio::sync::broadcast;

use crate::claim::ProcessingFile;
use crate::router::Outcome;

/// Notifications emitted while a pipeline runs.
#[derive(Clone, Debug)]
pub enum PipelineEvent {
    Claimed {
        endpoint: String,
        file: ProcessingFile,
    },
    Completed {
        endpoint: String,
        file: ProcessingFile,
        outcome: Outcome,
        final_path: Option<PathBuf>,
    },
    StrategyFailed {
        endpoint: String,
        file: ProcessingFile,
        outcome: Outcome,
        error: String,
    },
    Recovered {
        endpoint: String,
        from: PathBuf,
        to: PathBuf,
    },
    DiscoveryRestarted {
        endpoint: String,
    },
}

impl PipelineEvent {
    pub fn endpoint(&self) -> &str {
        match self {
            PipelineEvent::Claimed { endpoint, .. }
            | PipelineEvent::Completed { endpoint, .. }
            | PipelineEvent::StrategyFailed { endpoint, .. }
            | PipelineEvent::Recovered { endpoint, .. }
            | PipelineEvent::DiscoveryRestarted { endpoint } => endpoint,
        }
    }
}

/// In-process fan-out of [`PipelineEvent`]s. Publishing never blocks and is a
/// no-op when nobody listens.
#[derive(Clone)]
pub struct PipelineEventBus {
    sender: broadcast::Sender<PipelineEvent>,
    capacity: usize,
}

impl fmt::Debug for PipelineEventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineEventBus")
            .field("capacity", &self.capacity)
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

impl Default for PipelineEventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl PipelineEventBus {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self { sender, capacity }
    }

    pub fn publish(&self, event: PipelineEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }
}
