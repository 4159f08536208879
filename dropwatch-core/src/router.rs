//! Maps dispatcher outcomes to handling strategies.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::claim::ProcessingFile;
use crate::endpoint::{CancelAction, EndpointDescriptor, SuccessAction};
use crate::error::{IngestError, Result};
use crate::events::{PipelineEvent, PipelineEventBus};
use crate::strategy::{
    CombinedStrategy, CopyStrategy, DeleteStrategy, HandlingStrategy, MoveStrategy,
};

/// Terminal classification of one dispatched file.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Outcome {
    Processed,
    Cancelled,
    Error,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Processed => "processed",
            Outcome::Cancelled => "cancelled",
            Outcome::Error => "error",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional side effect run once a file has reached its terminal location.
#[async_trait]
pub trait PostProcessor: Send + Sync {
    async fn post_process(
        &self,
        file: &ProcessingFile,
        output_path: Option<&Path>,
        success: bool,
    ) -> Result<()>;
}

/// Used when neither the endpoint nor its handler supplies a post-processor.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPostProcessor;

#[async_trait]
impl PostProcessor for NoopPostProcessor {
    async fn post_process(
        &self,
        _file: &ProcessingFile,
        _output_path: Option<&Path>,
        _success: bool,
    ) -> Result<()> {
        Ok(())
    }
}

pub struct OutcomeRouter {
    endpoint: String,
    processed: Arc<dyn HandlingStrategy>,
    cancelled: Arc<dyn HandlingStrategy>,
    error: Arc<dyn HandlingStrategy>,
    post_processor: Arc<dyn PostProcessor>,
    events: PipelineEventBus,
}

impl fmt::Debug for OutcomeRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutcomeRouter")
            .field("endpoint", &self.endpoint)
            .field("processed", &self.processed)
            .field("cancelled", &self.cancelled)
            .field("error", &self.error)
            .field("post_processor", &std::any::type_name_of_val(self.post_processor.as_ref()))
            .finish()
    }
}

impl OutcomeRouter {
    pub fn new(
        endpoint: impl Into<String>,
        processed: Arc<dyn HandlingStrategy>,
        cancelled: Arc<dyn HandlingStrategy>,
        error: Arc<dyn HandlingStrategy>,
        post_processor: Arc<dyn PostProcessor>,
        events: PipelineEventBus,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            processed,
            cancelled,
            error,
            post_processor,
            events,
        }
    }

    /// Build the strategy set an endpoint's descriptor asks for.
    pub fn for_endpoint(
        descriptor: &EndpointDescriptor,
        post_processor: Arc<dyn PostProcessor>,
        events: PipelineEventBus,
    ) -> Result<Self> {
        let retry = descriptor.retry;
        let success_path = || {
            descriptor.success_path.clone().ok_or_else(|| {
                IngestError::Config(format!(
                    "endpoint {:?}: success path is required for {:?}",
                    descriptor.name, descriptor.on_success
                ))
            })
        };

        let processed: Arc<dyn HandlingStrategy> = match descriptor.on_success {
            SuccessAction::Delete => Arc::new(DeleteStrategy::new(retry)),
            SuccessAction::MoveToSuccess => Arc::new(MoveStrategy::new(success_path()?, retry)),
            SuccessAction::CopyThenDelete => Arc::new(CombinedStrategy::new(vec![
                Arc::new(CopyStrategy::new(success_path()?, retry)),
                Arc::new(DeleteStrategy::new(retry)),
            ])),
        };

        let error: Arc<dyn HandlingStrategy> =
            Arc::new(MoveStrategy::new(descriptor.failure_path.clone(), retry));

        let cancelled: Arc<dyn HandlingStrategy> = match descriptor.on_cancel {
            CancelAction::MoveToFailure => Arc::clone(&error),
            CancelAction::ReturnToDrop => {
                Arc::new(MoveStrategy::new(descriptor.drop_path.clone(), retry))
            }
        };

        Ok(Self::new(
            descriptor.name.clone(),
            processed,
            cancelled,
            error,
            post_processor,
            events,
        ))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn strategy_for(&self, outcome: Outcome) -> &Arc<dyn HandlingStrategy> {
        match outcome {
            Outcome::Processed => &self.processed,
            Outcome::Cancelled => &self.cancelled,
            Outcome::Error => &self.error,
        }
    }

    /// Apply the strategy matching `outcome` to `file`.
    ///
    /// A file that disappeared since its claim is ignored. Strategy failures are
    /// logged and returned; they never affect other files.
    pub async fn route(&self, outcome: Outcome, file: &ProcessingFile) -> Result<Option<PathBuf>> {
        let current = file.current_path();
        if !tokio::fs::try_exists(current).await.unwrap_or(false) {
            debug!(
                target: "ingest::router",
                endpoint = %self.endpoint,
                path = %current.display(),
                %outcome,
                "claimed file vanished before routing; ignoring outcome"
            );
            return Ok(None);
        }

        match self.strategy_for(outcome).apply(file).await {
            Ok(final_path) => {
                info!(
                    target: "ingest::router",
                    endpoint = %self.endpoint,
                    file = %file.original_path().display(),
                    %outcome,
                    destination = final_path.as_deref().map(|p| p.display().to_string()).unwrap_or_else(|| "<deleted>".into()),
                    "file routed"
                );

                if let Err(err) = self
                    .post_processor
                    .post_process(file, final_path.as_deref(), outcome == Outcome::Processed)
                    .await
                {
                    warn!(
                        target: "ingest::router",
                        endpoint = %self.endpoint,
                        file = %file.original_path().display(),
                        error = %err,
                        "post-processor failed"
                    );
                }

                self.events.publish(PipelineEvent::Completed {
                    endpoint: self.endpoint.clone(),
                    file: file.clone(),
                    outcome,
                    final_path: final_path.clone(),
                });
                Ok(final_path)
            }
            Err(err) => {
                error!(
                    target: "ingest::router",
                    endpoint = %self.endpoint,
                    path = %current.display(),
                    %outcome,
                    error = %err,
                    "handling strategy failed; file left in place"
                );
                self.events.publish(PipelineEvent::StrategyFailed {
                    endpoint: self.endpoint.clone(),
                    file: file.clone(),
                    outcome,
                    error: err.to_string(),
                });
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::tempdir;

    #[derive(Default)]
    struct Recording(Mutex<Vec<(Option<PathBuf>, bool)>>);

    #[async_trait]
    impl PostProcessor for Recording {
        async fn post_process(
            &self,
            _file: &ProcessingFile,
            output_path: Option<&Path>,
            success: bool,
        ) -> Result<()> {
            self.0
                .lock()
                .unwrap()
                .push((output_path.map(Path::to_path_buf), success));
            Ok(())
        }
    }

    fn descriptor(root: &Path) -> EndpointDescriptor {
        let mut d = EndpointDescriptor::new(
            "router-test",
            root.join("drop"),
            root.join("inprog"),
            root.join("fail/%filepath%"),
        );
        d.success_path = Some(root.join("ok"));
        d
    }

    async fn claimed(root: &Path, relative: &str) -> ProcessingFile {
        let current = root.join("inprog").join(relative);
        tokio::fs::create_dir_all(current.parent().unwrap()).await.unwrap();
        tokio::fs::write(&current, "x").await.unwrap();
        ProcessingFile::new(current, relative, root.join("drop").join(relative))
    }

    #[tokio::test]
    async fn processed_deletes_and_reports_success() {
        let tmp = tempdir().unwrap();
        let post = Arc::new(Recording::default());
        let router = OutcomeRouter::for_endpoint(
            &descriptor(tmp.path()),
            post.clone(),
            PipelineEventBus::default(),
        )
        .unwrap();
        let file = claimed(tmp.path(), "a/report.csv").await;

        let final_path = router.route(Outcome::Processed, &file).await.unwrap();
        assert_eq!(final_path, None);
        assert!(!file.current_path().exists());
        assert_eq!(post.0.lock().unwrap().as_slice(), &[(None, true)]);
    }

    #[tokio::test]
    async fn error_moves_to_failure_with_structure() {
        let tmp = tempdir().unwrap();
        let bus = PipelineEventBus::default();
        let mut rx = bus.subscribe();
        let router =
            OutcomeRouter::for_endpoint(&descriptor(tmp.path()), Arc::new(NoopPostProcessor), bus)
                .unwrap();
        let file = claimed(tmp.path(), "a/b/report.csv").await;

        let final_path = router.route(Outcome::Error, &file).await.unwrap();
        let expected = tmp.path().join("fail/a/b/report.csv");
        assert_eq!(final_path, Some(expected.clone()));
        assert!(expected.exists());

        match rx.recv().await.unwrap() {
            PipelineEvent::Completed { outcome, .. } => assert_eq!(outcome, Outcome::Error),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancelled_is_never_deleted() {
        let tmp = tempdir().unwrap();
        let router = OutcomeRouter::for_endpoint(
            &descriptor(tmp.path()),
            Arc::new(NoopPostProcessor),
            PipelineEventBus::default(),
        )
        .unwrap();
        let file = claimed(tmp.path(), "c.csv").await;

        router.route(Outcome::Cancelled, &file).await.unwrap();
        assert!(tmp.path().join("fail/c.csv").exists());
    }

    #[tokio::test]
    async fn cancel_can_return_to_drop() {
        let tmp = tempdir().unwrap();
        let mut d = descriptor(tmp.path());
        d.on_cancel = CancelAction::ReturnToDrop;
        let router =
            OutcomeRouter::for_endpoint(&d, Arc::new(NoopPostProcessor), PipelineEventBus::default())
                .unwrap();
        let file = claimed(tmp.path(), "sub/c.csv").await;

        router.route(Outcome::Cancelled, &file).await.unwrap();
        assert!(tmp.path().join("drop/sub/c.csv").exists());
    }

    #[tokio::test]
    async fn cancelled_file_survives_newer_drop_with_same_name() {
        let tmp = tempdir().unwrap();
        let mut d = descriptor(tmp.path());
        d.on_cancel = CancelAction::ReturnToDrop;
        let router =
            OutcomeRouter::for_endpoint(&d, Arc::new(NoopPostProcessor), PipelineEventBus::default())
                .unwrap();
        let file = claimed(tmp.path(), "a.csv").await;
        tokio::fs::create_dir_all(tmp.path().join("drop")).await.unwrap();
        tokio::fs::write(tmp.path().join("drop/a.csv"), "newer-drop").await.unwrap();

        let final_path = router.route(Outcome::Cancelled, &file).await.unwrap();
        assert_eq!(final_path, Some(tmp.path().join("drop/a-1.csv")));
        assert_eq!(
            tokio::fs::read_to_string(tmp.path().join("drop/a.csv")).await.unwrap(),
            "newer-drop"
        );
        assert_eq!(
            tokio::fs::read_to_string(tmp.path().join("drop/a-1.csv")).await.unwrap(),
            "x"
        );
    }

    #[tokio::test]
    async fn vanished_file_is_ignored() {
        let tmp = tempdir().unwrap();
        let post = Arc::new(Recording::default());
        let router = OutcomeRouter::for_endpoint(
            &descriptor(tmp.path()),
            post.clone(),
            PipelineEventBus::default(),
        )
        .unwrap();
        let file = ProcessingFile::new(
            tmp.path().join("inprog/ghost.csv"),
            "ghost.csv",
            tmp.path().join("drop/ghost.csv"),
        );

        assert_eq!(router.route(Outcome::Error, &file).await.unwrap(), None);
        assert!(post.0.lock().unwrap().is_empty());
        assert!(!tmp.path().join("fail/ghost.csv").exists());
    }

    #[tokio::test]
    async fn move_to_success_keeps_file() {
        let tmp = tempdir().unwrap();
        let mut d = descriptor(tmp.path());
        d.on_success = SuccessAction::MoveToSuccess;
        let router =
            OutcomeRouter::for_endpoint(&d, Arc::new(NoopPostProcessor), PipelineEventBus::default())
                .unwrap();
        let file = claimed(tmp.path(), "a/b/report.csv").await;

        let final_path = router.route(Outcome::Processed, &file).await.unwrap();
        assert_eq!(final_path, Some(tmp.path().join("ok/a/b/report.csv")));
    }
}
