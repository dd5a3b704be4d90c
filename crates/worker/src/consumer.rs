//! Queue consumer feeding payment events to the saga one at a time.

use std::sync::Arc;
use std::time::Duration;

use broker::{ConsumeOptions, Delivery, MessageBroker, Subscription};
use common::PaymentEvent;
use saga::SagaOutcome;
use tokio_util::sync::CancellationToken;

use crate::config::WorkerConfig;
use crate::error::Result;
use crate::handler::PaymentHandler;

/// How a delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Saga completed; message acked.
    Completed,
    /// Transaction already fulfilled; message acked.
    Duplicate,
    /// Saga failed after compensation and refund; message discarded.
    Failed,
    /// Body could not be decoded or validated; message discarded.
    Invalid,
}

impl MessageOutcome {
    /// Label used for the `outcome` metric dimension.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageOutcome::Completed => "completed",
            MessageOutcome::Duplicate => "duplicate",
            MessageOutcome::Failed => "failed",
            MessageOutcome::Invalid => "invalid",
        }
    }

    /// Returns true if the message was acknowledged rather than discarded.
    pub fn is_acked(&self) -> bool {
        matches!(self, MessageOutcome::Completed | MessageOutcome::Duplicate)
    }
}

/// Consumes the payment queue with a single worker loop.
///
/// The subscription uses prefetch 1 and the next delivery is only read once
/// the current one is settled, so sagas never overlap. A lost connection or
/// a failed subscribe is retried after a fixed backoff until shutdown.
pub struct QueueConsumer {
    broker: Arc<dyn MessageBroker>,
    handler: Arc<dyn PaymentHandler>,
    queue: String,
    options: ConsumeOptions,
    backoff: Duration,
}

impl QueueConsumer {
    pub fn new(
        broker: Arc<dyn MessageBroker>,
        handler: Arc<dyn PaymentHandler>,
        queue: impl Into<String>,
        backoff: Duration,
    ) -> Self {
        Self {
            broker,
            handler,
            queue: queue.into(),
            options: ConsumeOptions::default(),
            backoff,
        }
    }

    /// Creates a consumer for the configured queue and backoff.
    pub fn from_config(
        broker: Arc<dyn MessageBroker>,
        handler: Arc<dyn PaymentHandler>,
        config: &WorkerConfig,
    ) -> Self {
        Self::new(broker, handler, &config.queue_name, config.reconnect_backoff)
    }

    /// Runs until `shutdown` is cancelled.
    ///
    /// Cancellation is observed between messages: a saga in progress runs to
    /// completion and its delivery is settled before the loop exits.
    #[tracing::instrument(skip_all, fields(queue = %self.queue))]
    pub async fn run(&self, shutdown: CancellationToken) {
        while !shutdown.is_cancelled() {
            let subscription = match self.broker.subscribe(&self.queue, self.options.clone()).await {
                Ok(subscription) => subscription,
                Err(e) => {
                    tracing::error!(error = %e, backoff = ?self.backoff, "failed to connect to broker");
                    if self.wait_backoff(&shutdown).await {
                        break;
                    }
                    continue;
                }
            };
            tracing::info!(
                pending = subscription.pending_at_start(),
                "waiting for payment messages"
            );

            if self.consume(subscription, &shutdown).await {
                break;
            }

            metrics::counter!("payment_queue_reconnects_total").increment(1);
            tracing::warn!(backoff = ?self.backoff, "broker connection lost, reconnecting");
            if self.wait_backoff(&shutdown).await {
                break;
            }
        }
        tracing::info!("payment consumer stopped");
    }

    /// Drains one subscription. Returns true when stopped by shutdown.
    async fn consume(&self, mut subscription: Subscription, shutdown: &CancellationToken) -> bool {
        loop {
            let next = tokio::select! {
                biased;
                () = shutdown.cancelled() => None,
                next = subscription.next() => Some(next),
            };

            match next {
                None => {
                    if let Err(e) = subscription.close().await {
                        tracing::warn!(error = %e, "failed to close subscription");
                    }
                    return true;
                }
                Some(None) => return false,
                Some(Some(delivery)) => {
                    if let Err(e) = self.process(delivery).await {
                        tracing::warn!(error = %e, "delivery could not be settled");
                    }
                }
            }
        }
    }

    /// Runs the saga for one delivery and settles it.
    ///
    /// Success and duplicates are acked; undecodable bodies and failed sagas
    /// are discarded without requeue, since the saga already refunded.
    pub async fn process(&self, delivery: Delivery) -> Result<MessageOutcome> {
        let delivery_tag = delivery.delivery_tag();
        if delivery.redelivered() {
            tracing::info!(delivery_tag, "processing redelivered message");
        }

        let outcome = match PaymentEvent::from_slice(delivery.body()) {
            Err(e) => {
                tracing::error!(delivery_tag, error = %e, "discarding invalid payment message");
                MessageOutcome::Invalid
            }
            Ok(event) => match self.handler.handle(&event).await {
                Ok(SagaOutcome::Completed { .. }) => MessageOutcome::Completed,
                Ok(SagaOutcome::AlreadyProcessed { .. }) => MessageOutcome::Duplicate,
                Err(e) => {
                    tracing::error!(
                        delivery_tag,
                        transaction_id = %event.transaction_id,
                        error = %e,
                        "payment saga failed"
                    );
                    MessageOutcome::Failed
                }
            },
        };

        if outcome.is_acked() {
            delivery.ack().await?;
        } else {
            delivery.discard().await?;
        }
        metrics::counter!("payment_queue_messages_total", "outcome" => outcome.as_str())
            .increment(1);
        Ok(outcome)
    }

    /// Sleeps for the backoff. Returns true if shutdown arrived first.
    async fn wait_backoff(&self, shutdown: &CancellationToken) -> bool {
        tokio::select! {
            () = shutdown.cancelled() => true,
            () = tokio::time::sleep(self.backoff) => false,
        }
    }
}
