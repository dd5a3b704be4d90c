//! Saga state machine.

use serde::{Deserialize, Serialize};

/// Where a payment saga is in its lifecycle.
///
/// ```text
/// NotStarted ──► Running ──┬──► Completed
///                          ├──► Duplicate
///                          └──► Compensating ──► Failed
/// ```
///
/// `Duplicate` is reached when the receipt service reports the transaction
/// as already recorded; nothing was created and nothing is refunded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SagaState {
    #[default]
    NotStarted,
    Running,
    /// A forward step failed; undo actions and the refund are in progress.
    Compensating,
    Completed,
    Duplicate,
    /// Compensation and refund finished after a failure.
    Failed,
}

impl SagaState {
    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SagaState::Completed | SagaState::Duplicate | SagaState::Failed
        )
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaState::NotStarted => "NotStarted",
            SagaState::Running => "Running",
            SagaState::Compensating => "Compensating",
            SagaState::Completed => "Completed",
            SagaState::Duplicate => "Duplicate",
            SagaState::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for SagaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
