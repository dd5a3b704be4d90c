//! Seam between queue consumption and saga execution.

use async_trait::async_trait;
use common::PaymentEvent;
use saga::{SagaCoordinator, SagaJournal, SagaOutcome};
use services::{OrderService, ProductService, ReceiptService, UserService};

/// Processes one decoded payment event.
#[async_trait]
pub trait PaymentHandler: Send + Sync {
    async fn handle(&self, event: &PaymentEvent) -> saga::Result<SagaOutcome>;
}

#[async_trait]
impl<R, O, P, U, J> PaymentHandler for SagaCoordinator<R, O, P, U, J>
where
    R: ReceiptService,
    O: OrderService,
    P: ProductService,
    U: UserService,
    J: SagaJournal,
{
    async fn handle(&self, event: &PaymentEvent) -> saga::Result<SagaOutcome> {
        self.execute(event).await
    }
}
