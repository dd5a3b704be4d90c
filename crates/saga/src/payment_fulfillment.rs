//! Payment fulfillment saga constants.

/// The saga type identifier for payment fulfillment.
pub const SAGA_TYPE: &str = "PaymentFulfillment";

/// Step name: check the product lines before any service is called.
pub const STEP_VALIDATE_PAYMENT: &str = "validate_payment";

/// Step name: record a completed receipt for the payment.
pub const STEP_CREATE_RECEIPT: &str = "create_receipt";

/// Step name: create the order that references the receipt.
pub const STEP_CREATE_ORDER: &str = "create_order";

/// Step name: decrement stock for every purchased product.
pub const STEP_ADJUST_INVENTORY: &str = "adjust_inventory";
