use std::sync::Arc;

use tracing::{error, info};

use crate::error::{IngestError, Result};
use crate::processor::FileProcessor;

/// Starts and stops a set of [`FileProcessor`]s as one unit.
#[derive(Debug, Default)]
pub struct IngestHost {
    processors: Vec<Arc<FileProcessor>>,
}

impl IngestHost {
    /// Endpoint names must be unique within a host.
    pub fn new(processors: Vec<FileProcessor>) -> Result<Self> {
        let mut host = Self::default();
        for processor in processors {
            host.add(processor)?;
        }
        Ok(host)
    }

    pub fn add(&mut self, processor: FileProcessor) -> Result<()> {
        if self.processors.iter().any(|p| p.name() == processor.name()) {
            return Err(IngestError::Config(format!(
                "duplicate endpoint name {:?}",
                processor.name()
            )));
        }
        self.processors.push(Arc::new(processor));
        Ok(())
    }

    pub fn processors(&self) -> &[Arc<FileProcessor>] {
        &self.processors
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    /// Start every processor in order. If one fails, the ones already started
    /// are stopped again and the error is returned.
    pub async fn start(&self) -> Result<()> {
        info!(target: "ingest::host", endpoints = self.processors.len(), "starting ingest host");

        for (index, processor) in self.processors.iter().enumerate() {
            if let Err(err) = processor.start().await {
                error!(
                    target: "ingest::host",
                    endpoint = %processor.name(),
                    error = %err,
                    "endpoint failed to start; rolling back"
                );
                for started in self.processors[..index].iter().rev() {
                    started.stop().await;
                }
                return Err(err);
            }
        }
        Ok(())
    }

    /// Stop every processor, last started first. Idempotent.
    pub async fn stop(&self) {
        for processor in self.processors.iter().rev() {
            processor.stop().await;
        }
        info!(target: "ingest::host", "ingest host stopped");
    }
}
