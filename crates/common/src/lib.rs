//! Data contracts shared by the payment worker crates.

pub mod payment;
pub mod types;

pub use payment::{
    DEFAULT_CURRENCY, EventError, PaymentEvent, PaymentMode, ProductItem, refund_amount,
};
pub use types::{OrderId, ProductId, ReceiptId, TransactionId, UserId};
