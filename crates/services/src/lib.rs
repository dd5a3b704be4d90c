//! Typed request/reply clients for the services the payment saga drives.
//!
//! Each downstream service is modelled as a trait with two implementations:
//! an RPC client that speaks the length-prefixed JSON socket protocol via
//! [`TcpTransport`], and an in-memory implementation for tests.

pub mod call_log;
pub mod codec;
pub mod error;
pub mod order;
pub mod product;
pub mod receipt;
pub mod transport;
pub mod user;

pub use call_log::CallLog;
pub use codec::FrameCodec;
pub use error::{Result, ServiceError, codes};
pub use order::{CreateOrder, InMemoryOrderService, Order, OrderService, RpcOrderService};
pub use product::{InMemoryProductService, ProductService, ProductStock, RpcProductService};
pub use receipt::{
    CreateReceipt, InMemoryReceiptService, Receipt, ReceiptService, ReceiptStatus,
    RpcReceiptService,
};
pub use transport::{RpcTransport, TcpTransport};
pub use user::{InMemoryUserService, RpcUserService, UserBalance, UserService};
