use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the scanning library.
///
/// Closed ports are never errors; the prober classifies them and moves on.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid IP or network: {0}")]
    MalformedHostSpec(String),

    #[error("invalid port spec: {0}")]
    MalformedPortSpec(String),

    #[error("failed to read {}: {source}", .path.display())]
    FileAccess {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("worker {worker_id} failed: {reason}")]
    WorkerFailed { worker_id: usize, reason: String },

    #[error("worker supervisor task failed: {0}")]
    WorkerTask(#[from] tokio::task::JoinError),

    #[error("worker protocol error: {0}")]
    Protocol(String),

    #[error("failed to write results to {}: {source}", .path.display())]
    Sink {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("result writer has stopped")]
    SinkClosed,

    #[error("operation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, ScanError>;
