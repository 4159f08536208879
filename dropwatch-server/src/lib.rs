//! Host wiring for the `dropwatch` binary.
//!
//! Resolves the built-in handler, post-processor and filter choices named in
//! [`dropwatch_config::IngestConfig`] into running [`dropwatch_core::FileProcessor`]s.

pub mod app;
pub mod handlers;

pub use app::{build_host, build_processor};
