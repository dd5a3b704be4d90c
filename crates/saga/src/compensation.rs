//! Undo actions for completed forward steps.

use common::{OrderId, ProductItem, ReceiptId};

use crate::payment_fulfillment;

/// An action that semantically undoes one completed forward step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compensation {
    /// Soft-delete the receipt created by `create_receipt`.
    DeleteReceipt(ReceiptId),
    /// Soft-delete the order created by `create_order`.
    DeleteOrder(OrderId),
    /// Put back the stock taken by `adjust_inventory`.
    RestoreInventory(Vec<ProductItem>),
}

impl Compensation {
    /// The forward step this action undoes.
    pub fn step_name(&self) -> &'static str {
        match self {
            Compensation::DeleteReceipt(_) => payment_fulfillment::STEP_CREATE_RECEIPT,
            Compensation::DeleteOrder(_) => payment_fulfillment::STEP_CREATE_ORDER,
            Compensation::RestoreInventory(_) => payment_fulfillment::STEP_ADJUST_INVENTORY,
        }
    }
}

/// LIFO stack of pending compensations.
///
/// Each completed forward step pushes its undo action; on failure the
/// coordinator pops until empty, so actions run in reverse completion order.
#[derive(Debug, Clone, Default)]
pub struct CompensationStack {
    actions: Vec<Compensation>,
}

impl CompensationStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, action: Compensation) {
        self.actions.push(action);
    }

    /// Removes the most recently pushed action.
    pub fn pop(&mut self) -> Option<Compensation> {
        self.actions.pop()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pops_in_reverse_push_order() {
        let mut stack = CompensationStack::new();
        stack.push(Compensation::DeleteReceipt(ReceiptId::new("RCT-0001")));
        stack.push(Compensation::DeleteOrder(OrderId::new("ORD-0001")));
        stack.push(Compensation::RestoreInventory(vec![ProductItem::new("1", 2)]));
        assert_eq!(stack.len(), 3);

        let order: Vec<&str> = std::iter::from_fn(|| stack.pop())
            .map(|action| action.step_name())
            .collect();

        assert_eq!(order, ["adjust_inventory", "create_order", "create_receipt"]);
        assert!(stack.is_empty());
    }

    #[test]
    fn test_empty_stack() {
        let mut stack = CompensationStack::new();
        assert!(stack.pop().is_none());
    }
}
