//! Broker-agnostic delivery and subscription types.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;

/// Settles a single delivery with the broker that produced it.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    /// Positively acknowledges the delivery, removing it from the queue.
    async fn ack(&self, delivery_tag: u64) -> Result<()>;

    /// Negatively acknowledges the delivery.
    ///
    /// With `requeue == false` the broker discards the message.
    async fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<()>;
}

/// Closes the connection behind a subscription.
#[async_trait]
pub trait SessionHandle: Send + Sync {
    async fn close(&self) -> Result<()>;
}

/// A message handed to the consumer, pending acknowledgement.
pub struct Delivery {
    delivery_tag: u64,
    body: Vec<u8>,
    redelivered: bool,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(
        delivery_tag: u64,
        body: Vec<u8>,
        redelivered: bool,
        acker: Box<dyn Acknowledger>,
    ) -> Self {
        Self {
            delivery_tag,
            body,
            redelivered,
            acker,
        }
    }

    pub fn delivery_tag(&self) -> u64 {
        self.delivery_tag
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// True if the broker delivered this message before without a settlement.
    pub fn redelivered(&self) -> bool {
        self.redelivered
    }

    /// Acknowledges the message so the broker forgets it.
    pub async fn ack(self) -> Result<()> {
        self.acker.ack(self.delivery_tag).await
    }

    /// Rejects the message without requeue; the broker drops it.
    pub async fn discard(self) -> Result<()> {
        self.acker.reject(self.delivery_tag, false).await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("delivery_tag", &self.delivery_tag)
            .field("body_len", &self.body.len())
            .field("redelivered", &self.redelivered)
            .finish()
    }
}

/// Options applied when subscribing to a queue.
#[derive(Debug, Clone)]
pub struct ConsumeOptions {
    /// Maximum number of unacknowledged deliveries in flight.
    pub prefetch: u16,
    /// Capacity of the channel between the broker adapter and the consumer.
    pub buffer: usize,
    /// Consumer tag reported to the broker.
    pub consumer_tag: String,
}

impl Default for ConsumeOptions {
    fn default() -> Self {
        Self {
            prefetch: 1,
            buffer: 1,
            consumer_tag: "payment-worker".to_string(),
        }
    }
}

/// An active consumer on a durable queue.
///
/// Deliveries arrive over a bounded channel. When the underlying connection
/// is lost the channel closes and [`Subscription::next`] returns `None`.
pub struct Subscription {
    queue: String,
    pending: u32,
    deliveries: mpsc::Receiver<Delivery>,
    session: Box<dyn SessionHandle>,
}

impl Subscription {
    pub fn new(
        queue: impl Into<String>,
        pending: u32,
        deliveries: mpsc::Receiver<Delivery>,
        session: Box<dyn SessionHandle>,
    ) -> Self {
        Self {
            queue: queue.into(),
            pending,
            deliveries,
            session,
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Number of messages waiting in the queue when the subscription opened.
    pub fn pending_at_start(&self) -> u32 {
        self.pending
    }

    /// Waits for the next delivery; `None` once the connection is gone.
    pub async fn next(&mut self) -> Option<Delivery> {
        self.deliveries.recv().await
    }

    /// Closes the channel and connection.
    pub async fn close(mut self) -> Result<()> {
        self.deliveries.close();
        self.session.close().await
    }
}

/// A durable queue broker supporting publish and manual-ack consumption.
#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Publishes a persistent message to a durable queue, declaring it if needed.
    async fn publish(&self, queue: &str, body: &[u8]) -> Result<()>;

    /// Connects, declares the durable queue and starts consuming it.
    async fn subscribe(&self, queue: &str, options: ConsumeOptions) -> Result<Subscription>;
}
