//! # Dropwatch Core
//!
//! File-drop ingestion pipeline: watch drop directories, claim each new file
//! exclusively, hand it to a pluggable handler and route the outcome to a
//! terminal location.
//!
//! ## Overview
//!
//! - **Discovery**: OS notifications, a stat-comparing poll watcher, or a plain
//!   interval scan, all feeding one candidate channel
//! - **Claim**: an atomic rename into the in-progress location is the only
//!   mutual exclusion between competing consumers
//! - **Dispatch**: an unbounded queue drained by a fixed number of workers
//! - **Routing**: delete / move / copy strategies with bounded retry and
//!   `%filepath%` directory templates
//! - **Safety nets**: a scavenger returning stale claims to the drop directory
//!   and a watchdog restarting silent discovery sources
//!
//! ## Architecture
//!
//! - [`endpoint`]: the immutable descriptor of one pipeline
//! - [`claim`]: [`ProcessingFile`] and the rename-based claim
//! - [`discovery`]: event and polling sources
//! - [`dispatcher`]: the [`FileHandler`] contract and the worker pool
//! - [`router`]: [`Outcome`]s, post-processors and strategy selection
//! - [`strategy`]: delete, move, copy and combined strategies
//! - [`scavenger`] and [`watchdog`]: recovery and restart
//! - [`processor`] and [`host`]: lifecycle
//!
//! ## Examples
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! use dropwatch_core::{EndpointDescriptor, FileHandler, FileProcessor, IngestHost, Result};
//!
//! struct Print;
//!
//! #[async_trait::async_trait]
//! impl FileHandler for Print {
//!     async fn handle(&self, file: &Path, original_name: &Path) -> Result<bool> {
//!         println!("{} (dropped as {})", file.display(), original_name.display());
//!         Ok(true)
//!     }
//! }
//!
//! async fn run() -> Result<()> {
//!     let descriptor = EndpointDescriptor::new("orders", "/drop", "/inprog", "/fail/%filepath%");
//!     let host = IngestHost::new(vec![FileProcessor::new(descriptor, Arc::new(Print))])?;
//!     host.start().await?;
//!     tokio::signal::ctrl_c().await?;
//!     host.stop().await;
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]

pub mod claim;
pub mod discovery;
pub mod dispatcher;
pub mod endpoint;
pub mod error;
pub mod events;
pub mod filter;
pub mod host;
pub mod layout;
pub mod processor;
pub mod retry;
pub mod router;
pub mod scavenger;
pub mod strategy;
pub mod watchdog;

pub use claim::{Claimer, ProcessingFile};
pub use dispatcher::{Dispatcher, FileHandler};
pub use endpoint::{CancelAction, EndpointDescriptor, ProcessorKind, SuccessAction};
pub use error::{IngestError, Result};
pub use events::{PipelineEvent, PipelineEventBus};
pub use filter::{AcceptAll, AllOf, ExcludeSegmentsFilter, FileFilter, PatternFilter};
pub use host::IngestHost;
pub use processor::FileProcessor;
pub use retry::{FaultCooldown, RetryPolicy};
pub use router::{NoopPostProcessor, Outcome, OutcomeRouter, PostProcessor};
pub use scavenger::Scavenger;
pub use watchdog::{ThroughputWatchdog, WatchdogAlert};
