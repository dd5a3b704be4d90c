//! Durable queue client for the payment worker.
//!
//! Exposes a broker-agnostic [`MessageBroker`] trait with publish and
//! manual-ack consumption, an AMQP implementation for RabbitMQ and an
//! in-memory implementation for tests.
//!
//! Consumption is channel based: the broker adapter forwards deliveries over
//! a bounded channel to a single consumer, which settles each delivery with
//! [`Delivery::ack`] or [`Delivery::discard`]. The channel closing signals a
//! lost connection; reconnecting is the consumer's job.

pub mod amqp;
pub mod delivery;
pub mod error;
pub mod memory;

pub use amqp::AmqpBroker;
pub use delivery::{
    Acknowledger, ConsumeOptions, Delivery, MessageBroker, SessionHandle, Subscription,
};
pub use error::{BrokerError, Result};
pub use memory::InMemoryBroker;
