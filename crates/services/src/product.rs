//! Product inventory contract, RPC client and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use common::{PaymentMode, ProductId, ProductItem};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::call_log::CallLog;
use crate::error::{Result, ServiceError, codes};
use crate::transport::{RpcTransport, call};

pub const UPDATE_QUANTITY: &str = "product.update-quantity";

/// Stock level of one product after an adjustment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductStock {
    #[serde(alias = "productId")]
    pub id: ProductId,
    pub quantity: u32,
}

/// `product.update-quantity` request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateQuantity {
    pub product_list: Vec<ProductItem>,
    pub mode: PaymentMode,
}

/// Operations the saga needs from the product service.
#[async_trait]
pub trait ProductService: Send + Sync {
    /// Adjusts stock for every listed product in one call.
    ///
    /// In `Checkout` mode the service rejects the whole batch if any product
    /// is unknown or short on stock.
    async fn update_quantity(
        &self,
        items: &[ProductItem],
        mode: PaymentMode,
    ) -> Result<Vec<ProductStock>>;
}

/// Product service reached over the request/reply transport.
pub struct RpcProductService {
    transport: Arc<dyn RpcTransport>,
    timeout: Duration,
}

impl RpcProductService {
    pub fn new(transport: Arc<dyn RpcTransport>, timeout: Duration) -> Self {
        Self { transport, timeout }
    }
}

#[async_trait]
impl ProductService for RpcProductService {
    async fn update_quantity(
        &self,
        items: &[ProductItem],
        mode: PaymentMode,
    ) -> Result<Vec<ProductStock>> {
        let request = UpdateQuantity {
            product_list: items.to_vec(),
            mode,
        };
        let reply: Value = call(
            self.transport.as_ref(),
            UPDATE_QUANTITY,
            &request,
            self.timeout,
        )
        .await?;
        // The service may answer with the updated rows or with nothing.
        match reply {
            Value::Array(_) => Ok(serde_json::from_value(reply)?),
            _ => Ok(Vec::new()),
        }
    }
}

#[derive(Debug, Default)]
struct InMemoryProductState {
    stock: HashMap<ProductId, u32>,
    fail_on_update: bool,
}

/// In-memory product inventory for testing.
///
/// Validates the whole batch before touching any row, so a rejected
/// checkout leaves stock unchanged.
#[derive(Debug, Clone, Default)]
pub struct InMemoryProductService {
    state: Arc<RwLock<InMemoryProductState>>,
    log: CallLog,
}

impl InMemoryProductService {
    /// Creates a new in-memory product service.
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

    /// Sets the stock level of a product, creating it if needed.
    pub fn set_stock(&self, product_id: impl Into<ProductId>, quantity: u32) {
        self.state
            .write()
            .unwrap()
            .stock
            .insert(product_id.into(), quantity);
    }

    /// Current stock of a product, `None` if unknown.
    pub fn stock(&self, product_id: impl Into<ProductId>) -> Option<u32> {
        self.state
            .read()
            .unwrap()
            .stock
            .get(&product_id.into())
            .copied()
    }

    /// Configures the service to fail every update with an internal fault.
    pub fn set_fail_on_update(&self, fail: bool) {
        self.state.write().unwrap().fail_on_update = fail;
    }
}

#[async_trait]
impl ProductService for InMemoryProductService {
    async fn update_quantity(
        &self,
        items: &[ProductItem],
        mode: PaymentMode,
    ) -> Result<Vec<ProductStock>> {
        self.log.record(UPDATE_QUANTITY);
        let mut state = self.state.write().unwrap();

        if state.fail_on_update {
            return Err(ServiceError::fault(
                UPDATE_QUANTITY,
                codes::INTERNAL,
                "Failed to update product quantity",
            ));
        }

        let mut requested: HashMap<&ProductId, u32> = HashMap::new();
        for item in items {
            *requested.entry(&item.product_id).or_default() += item.quantity;
        }

        let mut updated = Vec::with_capacity(requested.len());
        for (product_id, quantity) in &requested {
            let Some(current) = state.stock.get(*product_id).copied() else {
                return Err(ServiceError::fault(
                    UPDATE_QUANTITY,
                    codes::BAD_REQUEST,
                    "Invalid product",
                ));
            };
            let next = match mode {
                PaymentMode::Checkout => current.checked_sub(*quantity).ok_or_else(|| {
                    ServiceError::fault(UPDATE_QUANTITY, codes::BAD_REQUEST, "Insufficient product")
                })?,
                PaymentMode::Refund => current.saturating_add(*quantity),
            };
            updated.push(ProductStock {
                id: (*product_id).clone(),
                quantity: next,
            });
        }

        for row in &updated {
            state.stock.insert(row.id.clone(), row.quantity);
        }
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_checkout_decrements_and_refund_restores() {
        let service = InMemoryProductService::new();
        service.set_stock("1", 5);

        let rows = service
            .update_quantity(&[ProductItem::new("1", 2)], PaymentMode::Checkout)
            .await
            .unwrap();
        assert_eq!(rows, vec![ProductStock { id: ProductId::new("1"), quantity: 3 }]);
        assert_eq!(service.stock("1"), Some(3));

        service
            .update_quantity(&[ProductItem::new("1", 2)], PaymentMode::Refund)
            .await
            .unwrap();
        assert_eq!(service.stock("1"), Some(5));
    }

    #[tokio::test]
    async fn test_insufficient_stock_rejects_whole_batch() {
        let service = InMemoryProductService::new();
        service.set_stock("1", 5);
        service.set_stock("2", 1);

        let err = service
            .update_quantity(
                &[ProductItem::new("1", 2), ProductItem::new("2", 3)],
                PaymentMode::Checkout,
            )
            .await
            .unwrap_err();

        assert_eq!(err.code(), Some(codes::BAD_REQUEST));
        assert!(err.to_string().contains("Insufficient product"));
        assert_eq!(service.stock("1"), Some(5));
        assert_eq!(service.stock("2"), Some(1));
    }

    #[tokio::test]
    async fn test_unknown_product() {
        let service = InMemoryProductService::new();
        let err = service
            .update_quantity(&[ProductItem::new("ghost", 1)], PaymentMode::Checkout)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Invalid product"));
    }

    #[tokio::test]
    async fn test_repeated_product_lines_are_summed() {
        let service = InMemoryProductService::new();
        service.set_stock("1", 3);

        let result = service
            .update_quantity(
                &[ProductItem::new("1", 2), ProductItem::new("1", 2)],
                PaymentMode::Checkout,
            )
            .await;
        assert!(result.is_err());
        assert_eq!(service.stock("1"), Some(3));
    }

    #[test]
    fn test_request_wire_shape() {
        let json = serde_json::to_value(UpdateQuantity {
            product_list: vec![ProductItem::new("1", 2)],
            mode: PaymentMode::Checkout,
        })
        .unwrap();
        assert_eq!(json["mode"], "checkout");
        assert_eq!(json["productList"][0]["productId"], "1");
    }
}
