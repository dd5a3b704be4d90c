//! Per-transaction saga attempt, rebuilt by folding saga events.

use common::{OrderId, ReceiptId, TransactionId, UserId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::events::SagaEvent;
use crate::state::SagaState;

/// What one saga execution has done so far.
///
/// Records which forward steps completed, the ids they produced and whether
/// the refund went out, so a reconciliation sweep can tell what is left to
/// undo for an attempt that never reached a terminal state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SagaAttempt {
    transaction_id: Option<TransactionId>,
    user_id: Option<UserId>,
    saga_type: String,
    state: SagaState,
    current_step: usize,
    completed_steps: Vec<String>,
    compensated_steps: Vec<String>,
    failed_compensations: Vec<String>,
    receipt_id: Option<ReceiptId>,
    order_id: Option<OrderId>,
    failure_reason: Option<String>,
    refund_amount: Option<Decimal>,
    refund_issued: bool,
}

impl SagaAttempt {
    /// Folds a sequence of events into an attempt.
    ///
    /// A `SagaStarted` event begins a fresh attempt, so a stream holding
    /// several executions for the same transaction yields the latest one.
    pub fn from_events<'a>(events: impl IntoIterator<Item = &'a SagaEvent>) -> Self {
        let mut attempt = Self::default();
        for event in events {
            attempt.apply(event.clone());
        }
        attempt
    }

    pub fn apply(&mut self, event: SagaEvent) {
        match event {
            SagaEvent::SagaStarted(data) => {
                *self = Self {
                    transaction_id: Some(data.transaction_id),
                    user_id: Some(data.user_id),
                    saga_type: data.saga_type,
                    state: SagaState::Running,
                    ..Self::default()
                };
            }
            SagaEvent::StepStarted(_) => {
                self.current_step += 1;
            }
            SagaEvent::StepCompleted(data) => {
                self.completed_steps.push(data.step_name);
                if let Some(receipt_id) = data.receipt_id {
                    self.receipt_id = Some(receipt_id);
                }
                if let Some(order_id) = data.order_id {
                    self.order_id = Some(order_id);
                }
            }
            SagaEvent::StepFailed(data) => {
                self.failure_reason = Some(data.error);
            }
            SagaEvent::CompensationStarted(_) => {
                self.state = SagaState::Compensating;
            }
            SagaEvent::CompensationStepCompleted(data) => {
                self.compensated_steps.push(data.step_name);
            }
            SagaEvent::CompensationStepFailed(data) => {
                self.failed_compensations.push(data.step_name);
            }
            SagaEvent::RefundIssued(data) => {
                self.refund_amount = Some(data.amount);
                self.refund_issued = true;
            }
            SagaEvent::RefundFailed(data) => {
                self.refund_amount = Some(data.amount);
            }
            SagaEvent::DuplicateDetected(_) => {
                self.state = SagaState::Duplicate;
            }
            SagaEvent::SagaCompleted(_) => {
                self.state = SagaState::Completed;
            }
            SagaEvent::SagaFailed(data) => {
                self.state = SagaState::Failed;
                self.failure_reason = Some(data.reason);
            }
        }
    }
}

// Query methods
impl SagaAttempt {
    pub fn transaction_id(&self) -> Option<&TransactionId> {
        self.transaction_id.as_ref()
    }

    pub fn user_id(&self) -> Option<&UserId> {
        self.user_id.as_ref()
    }

    pub fn saga_type(&self) -> &str {
        &self.saga_type
    }

    pub fn state(&self) -> SagaState {
        self.state
    }

    /// Number of forward steps started so far.
    pub fn current_step(&self) -> usize {
        self.current_step
    }

    pub fn completed_steps(&self) -> &[String] {
        &self.completed_steps
    }

    /// Compensations that succeeded, in execution order.
    pub fn compensated_steps(&self) -> &[String] {
        &self.compensated_steps
    }

    /// Compensations that failed and may need manual cleanup.
    pub fn failed_compensations(&self) -> &[String] {
        &self.failed_compensations
    }

    pub fn receipt_id(&self) -> Option<&ReceiptId> {
        self.receipt_id.as_ref()
    }

    pub fn order_id(&self) -> Option<&OrderId> {
        self.order_id.as_ref()
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    /// The refund amount that was attempted, whether or not it succeeded.
    pub fn refund_amount(&self) -> Option<Decimal> {
        self.refund_amount
    }

    pub fn refund_issued(&self) -> bool {
        self.refund_issued
    }
}
