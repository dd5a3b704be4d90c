//! Worker error types.

use broker::BrokerError;
use thiserror::Error;

/// Errors surfaced by the worker outside of saga execution.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Acknowledging or discarding a delivery failed.
    #[error("Failed to settle delivery: {0}")]
    Settle(#[from] BrokerError),

    /// The health and metrics listener could not bind or serve.
    #[error("HTTP server error: {0}")]
    Server(#[from] std::io::Error),
}

/// Convenience type alias for worker results.
pub type Result<T> = std::result::Result<T, WorkerError>;
