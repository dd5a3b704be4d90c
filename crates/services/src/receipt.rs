//! Receipt service contract, RPC client and in-memory implementation.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{PaymentEvent, ProductItem, ReceiptId, TransactionId, UserId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::call_log::CallLog;
use crate::error::{Result, ServiceError, codes};
use crate::transport::{RpcTransport, call};

pub const CREATE: &str = "receipt.create";
pub const DELETE: &str = "receipt.delete";

/// Lifecycle status stamped on a receipt at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptStatus {
    Completed,
}

/// A financial receipt as returned by the receipt service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub id: ReceiptId,
    pub user_id: UserId,
    pub transaction_id: TransactionId,
    pub amount: Decimal,
    #[serde(default)]
    pub currency: String,
    #[serde(default = "one")]
    pub current_exchange_rate: Decimal,
    #[serde(default)]
    pub payment_method: String,
    #[serde(default)]
    pub payment_gateway: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

fn one() -> Decimal {
    Decimal::ONE
}

/// `receipt.create` request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateReceipt {
    pub user_id: UserId,
    pub transaction_id: TransactionId,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub currency: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub current_exchange_rate: Decimal,
    pub payment_method: String,
    pub payment_gateway: String,
    pub product_list: Vec<ProductItem>,
    pub status: ReceiptStatus,
    pub created_at: DateTime<Utc>,
}

impl CreateReceipt {
    /// Builds a completed-receipt request for a settled payment.
    pub fn completed(event: &PaymentEvent) -> Self {
        Self {
            user_id: event.user_id.clone(),
            transaction_id: event.transaction_id.clone(),
            amount: event.amount,
            currency: event.currency.clone(),
            current_exchange_rate: event.current_exchange_rate,
            payment_method: event.payment_method.clone(),
            payment_gateway: event.payment_gateway.clone(),
            product_list: event.product_list.clone(),
            status: ReceiptStatus::Completed,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeleteReceipt<'a> {
    receipt_id: &'a ReceiptId,
}

/// Operations the saga needs from the receipt service.
#[async_trait]
pub trait ReceiptService: Send + Sync {
    /// Creates a receipt. A duplicate `transaction_id` yields a conflict fault.
    async fn create(&self, request: CreateReceipt) -> Result<Receipt>;

    /// Soft-deletes a receipt.
    async fn delete(&self, receipt_id: &ReceiptId) -> Result<bool>;
}

/// Receipt service reached over the request/reply transport.
pub struct RpcReceiptService {
    transport: Arc<dyn RpcTransport>,
    timeout: Duration,
}

impl RpcReceiptService {
    pub fn new(transport: Arc<dyn RpcTransport>, timeout: Duration) -> Self {
        Self { transport, timeout }
    }
}

#[async_trait]
impl ReceiptService for RpcReceiptService {
    async fn create(&self, request: CreateReceipt) -> Result<Receipt> {
        call(self.transport.as_ref(), CREATE, &request, self.timeout).await
    }

    async fn delete(&self, receipt_id: &ReceiptId) -> Result<bool> {
        let deleted: Option<bool> = call(
            self.transport.as_ref(),
            DELETE,
            &DeleteReceipt { receipt_id },
            self.timeout,
        )
        .await?;
        Ok(deleted.unwrap_or(false))
    }
}

#[derive(Debug, Default)]
struct InMemoryReceiptState {
    receipts: HashMap<ReceiptId, Receipt>,
    deleted: HashSet<ReceiptId>,
    by_transaction: HashMap<TransactionId, ReceiptId>,
    next_id: u32,
    fail_on_create: bool,
    fail_on_delete: bool,
}

/// In-memory receipt service for testing.
///
/// Enforces uniqueness of `transaction_id` the way a unique index would.
#[derive(Debug, Clone, Default)]
pub struct InMemoryReceiptService {
    state: Arc<RwLock<InMemoryReceiptState>>,
    log: CallLog,
}

impl InMemoryReceiptService {
    /// Creates a new in-memory receipt service.
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

    /// Number of receipts that have not been deleted.
    pub fn active_count(&self) -> usize {
        let state = self.state.read().unwrap();
        state.receipts.len() - state.deleted.len()
    }

    /// Number of receipts ever created, deleted ones included.
    pub fn created_count(&self) -> usize {
        self.state.read().unwrap().receipts.len()
    }

    pub fn is_deleted(&self, receipt_id: &ReceiptId) -> bool {
        self.state.read().unwrap().deleted.contains(receipt_id)
    }

    /// The receipt recorded for a transaction, if any.
    pub fn for_transaction(&self, transaction_id: &TransactionId) -> Option<Receipt> {
        let state = self.state.read().unwrap();
        state
            .by_transaction
            .get(transaction_id)
            .and_then(|id| state.receipts.get(id))
            .cloned()
    }
}

#[async_trait]
impl ReceiptService for InMemoryReceiptService {
    async fn create(&self, request: CreateReceipt) -> Result<Receipt> {
        self.log.record(CREATE);
        let mut state = self.state.write().unwrap();

        if state.fail_on_create {
            return Err(ServiceError::fault(
                CREATE,
                codes::INTERNAL,
                "Receipt creation failed",
            ));
        }
        if state.by_transaction.contains_key(&request.transaction_id) {
            return Err(ServiceError::fault(
                CREATE,
                codes::CONFLICT,
                format!("Receipt for transaction {} already exists", request.transaction_id),
            ));
        }

        state.next_id += 1;
        let receipt = Receipt {
            id: ReceiptId::new(format!("RCT-{:04}", state.next_id)),
            user_id: request.user_id,
            transaction_id: request.transaction_id,
            amount: request.amount,
            currency: request.currency,
            current_exchange_rate: request.current_exchange_rate,
            payment_method: request.payment_method,
            payment_gateway: request.payment_gateway,
            status: "completed".to_string(),
            created_at: Some(request.created_at),
        };
        state
            .by_transaction
            .insert(receipt.transaction_id.clone(), receipt.id.clone());
        state.receipts.insert(receipt.id.clone(), receipt.clone());
        Ok(receipt)
    }

    async fn delete(&self, receipt_id: &ReceiptId) -> Result<bool> {
        self.log.record(DELETE);
        let mut state = self.state.write().unwrap();

        if state.fail_on_delete {
            return Err(ServiceError::fault(
                DELETE,
                codes::INTERNAL,
                "Failed to delete receipt",
            ));
        }
        if !state.receipts.contains_key(receipt_id) {
            return Err(ServiceError::fault(
                DELETE,
                codes::NOT_FOUND,
                format!("Receipt {receipt_id} not found"),
            ));
        }
        Ok(state.deleted.insert(receipt_id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn event(tx: &str) -> PaymentEvent {
        PaymentEvent {
            user_id: UserId::new("user-1"),
            transaction_id: TransactionId::new(tx),
            amount: dec!(300000),
            currency: "VND".to_string(),
            current_exchange_rate: Decimal::ONE,
            payment_method: "wallet".to_string(),
            payment_gateway: "momo".to_string(),
            product_list: vec![ProductItem::new("1", 2)],
        }
    }

    #[tokio::test]
    async fn test_create_and_delete() {
        let service = InMemoryReceiptService::new();
        let receipt = service
            .create(CreateReceipt::completed(&event("TX-1")))
            .await
            .unwrap();
        assert_eq!(receipt.id.as_str(), "RCT-0001");
        assert_eq!(receipt.status, "completed");
        assert_eq!(service.active_count(), 1);

        assert!(service.delete(&receipt.id).await.unwrap());
        assert!(service.is_deleted(&receipt.id));
        assert_eq!(service.active_count(), 0);
        assert_eq!(service.created_count(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_transaction_conflicts() {
        let service = InMemoryReceiptService::new();
        service
            .create(CreateReceipt::completed(&event("TX-1")))
            .await
            .unwrap();

        let err = service
            .create(CreateReceipt::completed(&event("TX-1")))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(service.created_count(), 1);
    }

    #[tokio::test]
    async fn test_delete_unknown_is_not_found() {
        let service = InMemoryReceiptService::new();
        let err = service.delete(&ReceiptId::new("nope")).await.unwrap_err();
        assert_eq!(err.code(), Some(codes::NOT_FOUND));
    }

    #[tokio::test]
    async fn test_fail_on_create() {
        let log = CallLog::new();
        let service = InMemoryReceiptService::with_log(log.clone());
        service.set_fail_on_create(true);

        assert!(service
            .create(CreateReceipt::completed(&event("TX-1")))
            .await
            .is_err());
        assert_eq!(log.calls(), vec![CREATE.to_string()]);
        assert_eq!(service.created_count(), 0);
    }

    #[test]
    fn test_create_request_wire_shape() {
        let json = serde_json::to_value(CreateReceipt::completed(&event("TX-9"))).unwrap();
        assert_eq!(json["userId"], "user-1");
        assert_eq!(json["transactionId"], "TX-9");
        assert_eq!(json["amount"], 300000.0);
        assert_eq!(json["currentExchangeRate"], 1.0);
        assert_eq!(json["status"], "completed");
        assert_eq!(json["productList"][0]["productId"], "1");
        assert!(json["createdAt"].is_string());
    }

    #[test]
    fn test_receipt_accepts_string_amounts() {
        let receipt: Receipt = serde_json::from_value(serde_json::json!({
            "id": "r-1",
            "userId": "u-1",
            "transactionId": "TX-1",
            "amount": "300000",
            "currency": "VND",
            "status": "completed",
            "createdAt": "2024-05-01T10:00:00Z",
            "receiptItems": []
        }))
        .unwrap();
        assert_eq!(receipt.amount, dec!(300000));
        assert_eq!(receipt.current_exchange_rate, Decimal::ONE);
    }
}
