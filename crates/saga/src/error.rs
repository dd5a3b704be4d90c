//! Saga error types.

use common::{EventError, TransactionId};
use services::ServiceError;
use thiserror::Error;

/// Errors that can occur during saga operations.
#[derive(Debug, Error)]
pub enum SagaError {
    /// A forward step failed. The step's compensations and the refund have
    /// already run when this is returned.
    #[error("Saga step '{step}' failed: {source}")]
    StepFailed {
        step: &'static str,
        #[source]
        source: ServiceError,
    },

    /// The payment event did not pass validation; nothing was executed.
    #[error("Invalid payment event: {0}")]
    InvalidEvent(#[from] EventError),

    /// The payment can be refunded but not fulfilled. The refund has already
    /// been attempted when this is returned.
    #[error("Payment cannot be fulfilled: {0}")]
    Unfulfillable(#[source] EventError),

    /// The journal already holds a completed saga for this transaction.
    #[error("Saga for transaction {0} already completed")]
    AlreadyCompleted(TransactionId),

    /// The saga journal could not record or load events.
    #[error("Saga journal error: {0}")]
    Journal(String),
}

impl SagaError {
    /// Name of the forward step that failed, if any.
    pub fn failed_step(&self) -> Option<&'static str> {
        match self {
            SagaError::StepFailed { step, .. } => Some(step),
            _ => None,
        }
    }

    /// The service fault behind a failed step.
    pub fn service_error(&self) -> Option<&ServiceError> {
        match self {
            SagaError::StepFailed { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
