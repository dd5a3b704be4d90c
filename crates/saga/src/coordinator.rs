//! Saga coordinator for the payment fulfillment saga.

use std::time::Instant;

use common::{EventError, OrderId, PaymentEvent, PaymentMode, ReceiptId, TransactionId};
use services::{
    CreateOrder, CreateReceipt, OrderService, ProductService, ReceiptService, ServiceError,
    UserService,
};

use crate::attempt::SagaAttempt;
use crate::compensation::{Compensation, CompensationStack};
use crate::error::{Result, SagaError};
use crate::events::SagaEvent;
use crate::journal::SagaJournal;
use crate::payment_fulfillment;

/// How a saga that did not fail ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SagaOutcome {
    /// Receipt, order and stock adjustment all succeeded.
    Completed {
        receipt_id: ReceiptId,
        order_id: OrderId,
    },
    /// The transaction was already fulfilled; nothing was changed.
    AlreadyProcessed { transaction_id: TransactionId },
}

/// Orchestrates the payment fulfillment saga.
///
/// Drives a 3-step saga (receipt → order → inventory) strictly in sequence.
/// When a step fails, the undo actions of the completed steps run in reverse
/// order, the payer is refunded once, and the step's original error is
/// returned.
pub struct SagaCoordinator<R, O, P, U, J>
where
    R: ReceiptService,
    O: OrderService,
    P: ProductService,
    U: UserService,
    J: SagaJournal,
{
    receipts: R,
    orders: O,
    products: P,
    users: U,
    journal: J,
}

impl<R, O, P, U, J> SagaCoordinator<R, O, P, U, J>
where
    R: ReceiptService,
    O: OrderService,
    P: ProductService,
    U: UserService,
    J: SagaJournal,
{
    /// Creates a new saga coordinator.
    pub fn new(receipts: R, orders: O, products: P, users: U, journal: J) -> Self {
        Self {
            receipts,
            orders,
            products,
            users,
            journal,
        }
    }

    /// Executes the payment fulfillment saga for one payment event.
    ///
    /// Returns `Ok` when the payment was fulfilled now or earlier. On
    /// `Err(SagaError::StepFailed)` compensation and the refund have
    /// already been attempted. A payment that can be refunded but not
    /// fulfilled is refunded straight away and returns
    /// `Err(SagaError::Unfulfillable)`.
    #[tracing::instrument(
        skip(self, event),
        fields(
            transaction_id = %event.transaction_id,
            saga_type = payment_fulfillment::SAGA_TYPE,
        )
    )]
    pub async fn execute(&self, event: &PaymentEvent) -> Result<SagaOutcome> {
        event.validate()?;
        let transaction_id = &event.transaction_id;

        let unfulfillable = event.check_fulfillable().err();
        if unfulfillable.is_some() && self.refunded_before(transaction_id).await {
            metrics::counter!("payment_saga_duplicates_total").increment(1);
            tracing::info!("unfulfillable payment already refunded, skipping");
            return Ok(SagaOutcome::AlreadyProcessed {
                transaction_id: transaction_id.clone(),
            });
        }

        let started = SagaEvent::saga_started(
            transaction_id.clone(),
            event.user_id.clone(),
            payment_fulfillment::SAGA_TYPE,
        );
        match self.journal.append(transaction_id, vec![started]).await {
            Err(SagaError::AlreadyCompleted(_)) => {
                metrics::counter!("payment_saga_duplicates_total").increment(1);
                tracing::info!("transaction already fulfilled, skipping");
                return Ok(SagaOutcome::AlreadyProcessed {
                    transaction_id: transaction_id.clone(),
                });
            }
            Err(e) => tracing::warn!(error = %e, "failed to journal saga start"),
            Ok(()) => {}
        }

        metrics::counter!("payment_saga_executions_total").increment(1);
        let saga_start = Instant::now();
        if let Some(reason) = unfulfillable {
            return Err(self.reject(event, reason, saga_start).await);
        }
        let mut stack = CompensationStack::new();

        // Step 1: Create receipt
        tracing::info!(step = payment_fulfillment::STEP_CREATE_RECEIPT, "saga step started");
        self.record(
            transaction_id,
            SagaEvent::step_started(payment_fulfillment::STEP_CREATE_RECEIPT),
        )
        .await;

        let receipt = match self.receipts.create(CreateReceipt::completed(event)).await {
            Ok(receipt) => receipt,
            Err(e) if e.is_conflict() => {
                self.record(transaction_id, SagaEvent::duplicate_detected(e.to_string()))
                    .await;
                metrics::counter!("payment_saga_duplicates_total").increment(1);
                tracing::info!(error = %e, "receipt already recorded, skipping");
                return Ok(SagaOutcome::AlreadyProcessed {
                    transaction_id: transaction_id.clone(),
                });
            }
            Err(e) => {
                return Err(self
                    .abort(event, &mut stack, payment_fulfillment::STEP_CREATE_RECEIPT, e, saga_start)
                    .await);
            }
        };
        self.record(
            transaction_id,
            SagaEvent::receipt_created(payment_fulfillment::STEP_CREATE_RECEIPT, receipt.id.clone()),
        )
        .await;
        stack.push(Compensation::DeleteReceipt(receipt.id.clone()));

        // Step 2: Create order
        tracing::info!(step = payment_fulfillment::STEP_CREATE_ORDER, "saga step started");
        self.record(
            transaction_id,
            SagaEvent::step_started(payment_fulfillment::STEP_CREATE_ORDER),
        )
        .await;

        let order = match self
            .orders
            .create(CreateOrder::for_receipt(event, receipt.id.clone()))
            .await
        {
            Ok(order) => order,
            Err(e) => {
                return Err(self
                    .abort(event, &mut stack, payment_fulfillment::STEP_CREATE_ORDER, e, saga_start)
                    .await);
            }
        };
        self.record(
            transaction_id,
            SagaEvent::order_created(payment_fulfillment::STEP_CREATE_ORDER, order.id.clone()),
        )
        .await;
        stack.push(Compensation::DeleteOrder(order.id.clone()));

        // Step 3: Adjust inventory
        tracing::info!(step = payment_fulfillment::STEP_ADJUST_INVENTORY, "saga step started");
        self.record(
            transaction_id,
            SagaEvent::step_started(payment_fulfillment::STEP_ADJUST_INVENTORY),
        )
        .await;

        if let Err(e) = self
            .products
            .update_quantity(&event.product_list, PaymentMode::Checkout)
            .await
        {
            return Err(self
                .abort(event, &mut stack, payment_fulfillment::STEP_ADJUST_INVENTORY, e, saga_start)
                .await);
        }
        self.record(
            transaction_id,
            SagaEvent::step_completed(payment_fulfillment::STEP_ADJUST_INVENTORY),
        )
        .await;
        // Never popped while adjust_inventory is the last step.
        stack.push(Compensation::RestoreInventory(event.product_list.clone()));

        // Saga completed
        self.record(transaction_id, SagaEvent::saga_completed()).await;

        let duration = saga_start.elapsed().as_secs_f64();
        metrics::histogram!("payment_saga_duration_seconds").record(duration);
        metrics::counter!("payment_saga_completed_total").increment(1);
        tracing::info!(receipt_id = %receipt.id, order_id = %order.id, duration, "saga completed successfully");

        Ok(SagaOutcome::Completed {
            receipt_id: receipt.id,
            order_id: order.id,
        })
    }

    /// Loads the latest attempt for a transaction from the journal.
    pub async fn get_saga(&self, transaction_id: &TransactionId) -> Result<Option<SagaAttempt>> {
        self.journal.load(transaction_id).await
    }

    /// Attempts that started but never finished, for a reconciliation sweep.
    pub async fn incomplete_sagas(&self) -> Result<Vec<SagaAttempt>> {
        self.journal.incomplete().await
    }

    /// Refunds a payment that cannot be fulfilled. Nothing was created, so
    /// there is nothing to compensate.
    async fn reject(&self, event: &PaymentEvent, reason: EventError, saga_start: Instant) -> SagaError {
        let transaction_id = &event.transaction_id;
        tracing::warn!(error = %reason, "payment cannot be fulfilled, refunding");
        self.record(
            transaction_id,
            SagaEvent::step_failed(payment_fulfillment::STEP_VALIDATE_PAYMENT, reason.to_string()),
        )
        .await;

        self.refund(event).await;

        self.record(
            transaction_id,
            SagaEvent::saga_failed(format!("Payment cannot be fulfilled: {reason}")),
        )
        .await;
        metrics::histogram!("payment_saga_duration_seconds")
            .record(saga_start.elapsed().as_secs_f64());
        metrics::counter!("payment_saga_failed_total").increment(1);

        SagaError::Unfulfillable(reason)
    }

    /// Returns true if the journal shows a refund for an earlier attempt.
    async fn refunded_before(&self, transaction_id: &TransactionId) -> bool {
        matches!(
            self.journal.load(transaction_id).await,
            Ok(Some(attempt)) if attempt.refund_issued()
        )
    }

    /// Compensates, refunds and records the failure of `step`.
    ///
    /// Returns the error the saga surfaces, which always wraps the step's
    /// original fault.
    async fn abort(
        &self,
        event: &PaymentEvent,
        stack: &mut CompensationStack,
        step: &'static str,
        error: ServiceError,
        saga_start: Instant,
    ) -> SagaError {
        let transaction_id = &event.transaction_id;
        tracing::warn!(step, error = %error, "saga step failed");
        self.record(transaction_id, SagaEvent::step_failed(step, error.to_string()))
            .await;

        self.compensate(transaction_id, step, stack).await;
        self.refund(event).await;

        self.record(
            transaction_id,
            SagaEvent::saga_failed(format!("Step {step} failed: {error}")),
        )
        .await;

        metrics::histogram!("payment_saga_duration_seconds")
            .record(saga_start.elapsed().as_secs_f64());
        metrics::counter!("payment_saga_failed_total").increment(1);
        tracing::warn!(step, "saga failed");

        SagaError::StepFailed {
            step,
            source: error,
        }
    }

    /// Pops and runs every pending compensation, most recent first.
    ///
    /// A failing action is logged and recorded; the remaining actions still
    /// run. Returns the number of failed actions.
    #[tracing::instrument(skip(self, stack), fields(pending = stack.len()))]
    pub(crate) async fn compensate(
        &self,
        transaction_id: &TransactionId,
        from_step: &'static str,
        stack: &mut CompensationStack,
    ) -> usize {
        self.record(transaction_id, SagaEvent::compensation_started(from_step))
            .await;

        let mut failures = 0;
        while let Some(action) = stack.pop() {
            let step = action.step_name();
            let result = match &action {
                Compensation::DeleteReceipt(receipt_id) => {
                    self.receipts.delete(receipt_id).await.map(|_| ())
                }
                Compensation::DeleteOrder(order_id) => self.orders.delete(order_id).await.map(|_| ()),
                Compensation::RestoreInventory(items) => self
                    .products
                    .update_quantity(items, PaymentMode::Refund)
                    .await
                    .map(|_| ()),
            };

            match result {
                Ok(()) => {
                    tracing::debug!(step, "compensation step completed");
                    self.record(transaction_id, SagaEvent::compensation_step_completed(step))
                        .await;
                }
                Err(e) => {
                    failures += 1;
                    metrics::counter!("payment_saga_compensation_failures_total").increment(1);
                    tracing::warn!(step, error = %e, ?action, "compensation step failed, manual cleanup may be needed");
                    self.record(
                        transaction_id,
                        SagaEvent::compensation_step_failed(step, e.to_string()),
                    )
                    .await;
                }
            }
        }
        failures
    }

    /// Credits the converted payment amount back to the payer. Not retried.
    async fn refund(&self, event: &PaymentEvent) {
        let Some(amount) = event.refund_amount() else {
            metrics::counter!("payment_saga_refund_failures_total").increment(1);
            tracing::error!(
                user_id = %event.user_id,
                amount = %event.amount,
                rate = %event.current_exchange_rate,
                "refund amount out of range"
            );
            return;
        };
        match self
            .users
            .update_balance(&event.user_id, amount, PaymentMode::Refund)
            .await
        {
            Ok(_) => {
                metrics::counter!("payment_saga_refunds_total").increment(1);
                tracing::info!(user_id = %event.user_id, %amount, "refund issued");
                self.record(&event.transaction_id, SagaEvent::refund_issued(amount))
                    .await;
            }
            Err(e) => {
                metrics::counter!("payment_saga_refund_failures_total").increment(1);
                tracing::error!(user_id = %event.user_id, %amount, error = %e, "refund failed");
                self.record(
                    &event.transaction_id,
                    SagaEvent::refund_failed(amount, e.to_string()),
                )
                .await;
            }
        }
    }

    /// Appends one event to the journal. Journal failures never change the
    /// saga's course.
    async fn record(&self, transaction_id: &TransactionId, event: SagaEvent) {
        let event_type = event.event_type();
        if let Err(e) = self.journal.append(transaction_id, vec![event]).await {
            tracing::warn!(event_type, error = %e, "failed to journal saga event");
        }
    }
}
