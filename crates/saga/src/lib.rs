//! Saga orchestration for payment fulfillment.
//!
//! A settled payment is turned into durable business records by running
//! three steps against independent services:
//! 1. Create a receipt
//! 2. Create an order referencing the receipt
//! 3. Decrement stock for the purchased products
//!
//! If any step fails, completed steps are compensated in reverse order and
//! the payer is refunded once.

pub mod attempt;
pub mod compensation;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod journal;
pub mod payment_fulfillment;
pub mod state;

pub use attempt::SagaAttempt;
pub use compensation::{Compensation, CompensationStack};
pub use coordinator::{SagaCoordinator, SagaOutcome};
pub use error::{Result, SagaError};
pub use events::SagaEvent;
pub use journal::{DEFAULT_RETAINED_ATTEMPTS, InMemorySagaJournal, SagaJournal};
pub use state::SagaState;
