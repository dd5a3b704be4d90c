//! Order service contract, RPC client and in-memory implementation.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use common::{OrderId, PaymentEvent, ProductItem, ReceiptId, UserId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::call_log::CallLog;
use crate::error::{Result, ServiceError, codes};
use crate::transport::{RpcTransport, call};

pub const CREATE: &str = "order.create";
pub const DELETE: &str = "order.delete";

/// An order as returned by the order service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub amount: Decimal,
    #[serde(default)]
    pub currency: String,
    pub receipt_id: ReceiptId,
    #[serde(default)]
    pub order_items: Vec<ProductItem>,
}

/// `order.create` request.
///
/// `amount` travels as a decimal string so no precision is lost on the
/// way to the order service.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrder {
    pub user_id: UserId,
    pub amount: Decimal,
    pub currency: String,
    pub receipt_id: ReceiptId,
    #[serde(rename = "orderItem")]
    pub order_items: Vec<ProductItem>,
}

impl CreateOrder {
    pub fn for_receipt(event: &PaymentEvent, receipt_id: ReceiptId) -> Self {
        Self {
            user_id: event.user_id.clone(),
            amount: event.amount,
            currency: event.currency.clone(),
            receipt_id,
            order_items: event.product_list.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeleteOrder<'a> {
    order_id: &'a OrderId,
}

/// Operations the saga needs from the order service.
#[async_trait]
pub trait OrderService: Send + Sync {
    async fn create(&self, request: CreateOrder) -> Result<Order>;

    /// Soft-deletes an order.
    async fn delete(&self, order_id: &OrderId) -> Result<bool>;
}

/// Order service reached over the request/reply transport.
pub struct RpcOrderService {
    transport: Arc<dyn RpcTransport>,
    timeout: Duration,
}

impl RpcOrderService {
    pub fn new(transport: Arc<dyn RpcTransport>, timeout: Duration) -> Self {
        Self { transport, timeout }
    }
}

#[async_trait]
impl OrderService for RpcOrderService {
    async fn create(&self, request: CreateOrder) -> Result<Order> {
        call(self.transport.as_ref(), CREATE, &request, self.timeout).await
    }

    async fn delete(&self, order_id: &OrderId) -> Result<bool> {
        let deleted: Option<bool> = call(
            self.transport.as_ref(),
            DELETE,
            &DeleteOrder { order_id },
            self.timeout,
        )
        .await?;
        Ok(deleted.unwrap_or(false))
    }
}

#[derive(Debug, Default)]
struct InMemoryOrderState {
    orders: HashMap<OrderId, Order>,
    deleted: HashSet<OrderId>,
    next_id: u32,
    fail_on_create: bool,
    fail_on_delete: bool,
}

/// In-memory order service for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOrderService {
    state: Arc<RwLock<InMemoryOrderState>>,
    log: CallLog,
}

impl InMemoryOrderService {
    /// Creates a new in-memory order service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a service that records its calls into `log`.
    pub fn with_log(log: CallLog) -> Self {
        Self {
            state: Arc::default(),
            log,
        }
    }

    /// Configures the service to fail every create call.
    pub fn set_fail_on_create(&self, fail: bool) {
        self.state.write().unwrap().fail_on_create = fail;
    }

    /// Configures the service to fail every delete call.
    pub fn set_fail_on_delete(&self, fail: bool) {
        self.state.write().unwrap().fail_on_delete = fail;
    }

    /// Number of orders that have not been deleted.
    pub fn active_count(&self) -> usize {
        let state = self.state.read().unwrap();
        state.orders.len() - state.deleted.len()
    }

    pub fn created_count(&self) -> usize {
        self.state.read().unwrap().orders.len()
    }

    pub fn is_deleted(&self, order_id: &OrderId) -> bool {
        self.state.read().unwrap().deleted.contains(order_id)
    }

    /// All orders ever created, deleted ones included.
    pub fn orders(&self) -> Vec<Order> {
        self.state.read().unwrap().orders.values().cloned().collect()
    }
}

#[async_trait]
impl OrderService for InMemoryOrderService {
    async fn create(&self, request: CreateOrder) -> Result<Order> {
        self.log.record(CREATE);
        let mut state = self.state.write().unwrap();

        if state.fail_on_create {
            return Err(ServiceError::fault(
                CREATE,
                codes::INTERNAL,
                "Order creation failed",
            ));
        }

        state.next_id += 1;
        let order = Order {
            id: OrderId::new(format!("ORD-{:04}", state.next_id)),
            user_id: request.user_id,
            amount: request.amount,
            currency: request.currency,
            receipt_id: request.receipt_id,
            order_items: request.order_items,
        };
        state.orders.insert(order.id.clone(), order.clone());
        Ok(order)
    }

    async fn delete(&self, order_id: &OrderId) -> Result<bool> {
        self.log.record(DELETE);
        let mut state = self.state.write().unwrap();

        if state.fail_on_delete {
            return Err(ServiceError::fault(
                DELETE,
                codes::INTERNAL,
                "Failed to delete order",
            ));
        }
        if !state.orders.contains_key(order_id) {
            return Err(ServiceError::fault(
                DELETE,
                codes::NOT_FOUND,
                format!("Order {order_id} not found"),
            ));
        }
        Ok(state.deleted.insert(order_id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn request() -> CreateOrder {
        CreateOrder {
            user_id: UserId::new("user-1"),
            amount: dec!(100.005),
            currency: "USD".to_string(),
            receipt_id: ReceiptId::new("RCT-0001"),
            order_items: vec![ProductItem::new("1", 2)],
        }
    }

    #[tokio::test]
    async fn test_create_and_delete() {
        let service = InMemoryOrderService::new();
        let order = service.create(request()).await.unwrap();

        assert_eq!(order.id.as_str(), "ORD-0001");
        assert_eq!(order.receipt_id.as_str(), "RCT-0001");
        assert_eq!(service.active_count(), 1);

        assert!(service.delete(&order.id).await.unwrap());
        assert!(service.is_deleted(&order.id));
        assert_eq!(service.active_count(), 0);
    }

    #[tokio::test]
    async fn test_fail_on_delete() {
        let service = InMemoryOrderService::new();
        let order = service.create(request()).await.unwrap();
        service.set_fail_on_delete(true);

        assert!(service.delete(&order.id).await.is_err());
        assert_eq!(service.active_count(), 1);
    }

    #[test]
    fn test_amount_is_sent_as_string() {
        let json = serde_json::to_value(request()).unwrap();
        assert_eq!(json["amount"], "100.005");
        assert_eq!(json["receiptId"], "RCT-0001");
        assert_eq!(json["orderItem"][0]["quantity"], 2);
        assert!(json.get("orderItems").is_none());
    }
}
