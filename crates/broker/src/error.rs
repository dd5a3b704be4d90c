//! Broker error types.

use thiserror::Error;

/// Errors that can occur while talking to the message broker.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The connection could not be established or was lost.
    #[error("Broker connection failed: {0}")]
    Connection(String),

    /// The channel carrying a delivery has been closed.
    #[error("Broker channel closed")]
    ChannelClosed,

    /// A message could not be published.
    #[error("Publish to '{queue}' failed: {reason}")]
    Publish { queue: String, reason: String },

    /// An ack or reject could not be delivered to the broker.
    #[error("Acknowledgement for delivery {delivery_tag} failed: {reason}")]
    Acknowledge { delivery_tag: u64, reason: String },

    /// Error reported by the AMQP client library.
    #[error("AMQP error: {0}")]
    Amqp(#[from] lapin::Error),
}

/// Convenience type alias for broker results.
pub type Result<T> = std::result::Result<T, BrokerError>;
