//! Payment event contract carried on the payment queue.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{ProductId, TransactionId, UserId};

/// Settlement currency assumed when a gateway omits one.
pub const DEFAULT_CURRENCY: &str = "VND";

/// Errors raised while decoding or validating a payment event.
#[derive(Debug, Error)]
pub enum EventError {
    /// The message body is not a well-formed payment event.
    #[error("Malformed payment event: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The event decoded but violates a field constraint.
    #[error("Invalid payment event: {0}")]
    Invalid(String),
}

/// Direction of a balance or stock mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMode {
    /// Consume stock / debit balance.
    Checkout,
    /// Restore stock / credit balance.
    Refund,
}

impl PaymentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMode::Checkout => "checkout",
            PaymentMode::Refund => "refund",
        }
    }
}

impl std::fmt::Display for PaymentMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A purchased product and its quantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductItem {
    pub product_id: ProductId,
    pub quantity: u32,
}

impl ProductItem {
    pub fn new(product_id: impl Into<ProductId>, quantity: u32) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
        }
    }
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

fn default_exchange_rate() -> Decimal {
    Decimal::ONE
}

/// A settled payment waiting to be fulfilled.
///
/// Produced by the payment-capture flow and delivered once per queue
/// message. Monetary fields are decimals so that values such as `100.005`
/// survive the JSON boundary without binary floating point drift.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentEvent {
    pub user_id: UserId,
    pub transaction_id: TransactionId,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(
        default = "default_exchange_rate",
        with = "rust_decimal::serde::float"
    )]
    pub current_exchange_rate: Decimal,
    pub payment_method: String,
    pub payment_gateway: String,
    pub product_list: Vec<ProductItem>,
}

impl PaymentEvent {
    /// Decodes a queue message body and checks that it can be refunded.
    ///
    /// Events that pass may still be unfulfillable; see
    /// [`PaymentEvent::check_fulfillable`].
    pub fn from_slice(body: &[u8]) -> Result<Self, EventError> {
        let event: PaymentEvent = serde_json::from_slice(body)?;
        event.validate()?;
        Ok(event)
    }

    /// Checks the fields a refund depends on.
    ///
    /// An event failing here cannot be refunded and must be discarded.
    pub fn validate(&self) -> Result<(), EventError> {
        if self.user_id.is_blank() {
            return Err(EventError::Invalid("userId is required".to_string()));
        }
        if self.transaction_id.is_blank() {
            return Err(EventError::Invalid("transactionId is required".to_string()));
        }
        if self.amount.is_sign_negative() {
            return Err(EventError::Invalid(format!(
                "amount must not be negative, got {}",
                self.amount
            )));
        }
        if self.current_exchange_rate <= Decimal::ZERO {
            return Err(EventError::Invalid(format!(
                "currentExchangeRate must be positive, got {}",
                self.current_exchange_rate
            )));
        }
        if self.refund_amount().is_none() {
            return Err(EventError::Invalid(format!(
                "amount {} at rate {} is out of range",
                self.amount, self.current_exchange_rate
            )));
        }
        Ok(())
    }

    /// Checks the product lines the fulfillment steps depend on.
    pub fn check_fulfillable(&self) -> Result<(), EventError> {
        if self.product_list.is_empty() {
            return Err(EventError::Invalid("productList is empty".to_string()));
        }
        if let Some(item) = self
            .product_list
            .iter()
            .find(|item| item.quantity == 0 || item.product_id.is_blank())
        {
            return Err(EventError::Invalid(format!(
                "invalid product item '{}' with quantity {}",
                item.product_id, item.quantity
            )));
        }
        Ok(())
    }

    /// Amount to credit back to the payer in the settlement currency.
    ///
    /// `None` when the conversion overflows.
    pub fn refund_amount(&self) -> Option<Decimal> {
        refund_amount(self.amount, self.current_exchange_rate)
    }

    /// Serializes the event as a queue message body.
    pub fn to_vec(&self) -> Result<Vec<u8>, EventError> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Converts `amount` at `exchange_rate` and rounds half-up to two decimals.
///
/// Returns `None` if the product does not fit in a `Decimal`.
pub fn refund_amount(amount: Decimal, exchange_rate: Decimal) -> Option<Decimal> {
    amount
        .checked_mul(exchange_rate)
        .map(|total| total.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_json() -> serde_json::Value {
        serde_json::json!({
            "userId": "user-1",
            "transactionId": "TX-100",
            "amount": 300000,
            "currency": "VND",
            "currentExchangeRate": 1,
            "paymentMethod": "wallet",
            "paymentGateway": "momo",
            "productList": [{ "productId": "1", "quantity": 2 }]
        })
    }

    #[test]
    fn decodes_camel_case_body() {
        let body = serde_json::to_vec(&sample_json()).unwrap();
        let event = PaymentEvent::from_slice(&body).unwrap();

        assert_eq!(event.user_id.as_str(), "user-1");
        assert_eq!(event.transaction_id.as_str(), "TX-100");
        assert_eq!(event.amount, dec!(300000));
        assert_eq!(event.product_list, vec![ProductItem::new("1", 2)]);
    }

    #[test]
    fn applies_currency_and_rate_defaults() {
        let mut json = sample_json();
        let obj = json.as_object_mut().unwrap();
        obj.remove("currency");
        obj.remove("currentExchangeRate");

        let event: PaymentEvent = serde_json::from_value(json).unwrap();
        assert_eq!(event.currency, "VND");
        assert_eq!(event.current_exchange_rate, Decimal::ONE);
    }

    #[test]
    fn empty_product_list_is_refundable_but_not_fulfillable() {
        let mut json = sample_json();
        json["productList"] = serde_json::json!([]);
        let body = serde_json::to_vec(&json).unwrap();

        let event = PaymentEvent::from_slice(&body).unwrap();
        let err = event.check_fulfillable().unwrap_err();
        assert!(matches!(err, EventError::Invalid(_)));
    }

    #[test]
    fn zero_quantity_is_not_fulfillable() {
        let mut json = sample_json();
        json["productList"] = serde_json::json!([{ "productId": "1", "quantity": 0 }]);
        let event = PaymentEvent::from_slice(&serde_json::to_vec(&json).unwrap()).unwrap();

        assert!(event.check_fulfillable().is_err());
    }

    #[test]
    fn rejects_bad_rate_and_blank_user() {
        let mut json = sample_json();
        json["currentExchangeRate"] = serde_json::json!(0);
        assert!(PaymentEvent::from_slice(&serde_json::to_vec(&json).unwrap()).is_err());

        let mut json = sample_json();
        json["userId"] = serde_json::json!("  ");
        assert!(PaymentEvent::from_slice(&serde_json::to_vec(&json).unwrap()).is_err());
    }

    #[test]
    fn rejects_amount_whose_refund_overflows() {
        let mut event: PaymentEvent = serde_json::from_value(sample_json()).unwrap();
        event.amount = Decimal::from_i128_with_scale(10_i128.pow(20), 0);
        event.current_exchange_rate = Decimal::from(10_000_000_000_u64);

        assert!(event.refund_amount().is_none());
        let err = event.validate().unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn rejects_garbage_body() {
        let err = PaymentEvent::from_slice(b"not json").unwrap_err();
        assert!(matches!(err, EventError::Malformed(_)));
    }

    #[test]
    fn refund_rounds_half_up_to_cents() {
        assert_eq!(refund_amount(dec!(100.005), Decimal::ONE), Some(dec!(100.01)));
        assert_eq!(refund_amount(dec!(100.004), Decimal::ONE), Some(dec!(100.00)));
    }

    #[test]
    fn refund_converts_with_exchange_rate() {
        assert_eq!(refund_amount(dec!(12.5), dec!(25000)), Some(dec!(312500.00)));
        assert_eq!(refund_amount(dec!(0.333), dec!(3)), Some(dec!(1.00)));
    }

    #[test]
    fn float_amount_keeps_decimal_digits() {
        let mut json = sample_json();
        json["amount"] = serde_json::json!(100.005);
        let event: PaymentEvent = serde_json::from_value(json).unwrap();

        assert_eq!(event.amount, dec!(100.005));
        assert_eq!(event.refund_amount(), Some(dec!(100.01)));
    }

    #[test]
    fn payment_mode_is_lowercase_on_the_wire() {
        assert_eq!(
            serde_json::to_string(&PaymentMode::Checkout).unwrap(),
            "\"checkout\""
        );
        assert_eq!(PaymentMode::Refund.to_string(), "refund");
    }
}
