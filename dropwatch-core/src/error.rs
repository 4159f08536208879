use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid endpoint configuration: {0}")]
    Config(String),

    #[error("Watcher error: {0}")]
    Watch(String),

    #[error("Handler failed: {0}")]
    Handler(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("{operation} of {} failed after {attempts} attempts: {source}", path.display())]
    RetryExhausted {
        operation: &'static str,
        path: PathBuf,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<notify::Error> for IngestError {
    fn from(err: notify::Error) -> Self {
        IngestError::Watch(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;
