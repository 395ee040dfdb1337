use uuid::Uuid;

use super::value_objects::{CartLine, OrderStatus};

// ============================================================================
// Order Commands - Represent caller intent
// ============================================================================

/// Request to move one order to a new status.
#[derive(Debug, Clone)]
pub struct ChangeStatus {
    pub order_id: Uuid,
    pub target: OrderStatus,
    pub notes: Option<String>,
    /// Rejects the change unless the order is still in this status.
    pub expected_from: Option<OrderStatus>,
}

/// Request to turn a cart or a single product into orders.
#[derive(Debug, Clone)]
pub struct PlaceOrder {
    pub buyer_id: Uuid,
    pub source: CheckoutSource,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CheckoutSource {
    /// Every line currently in the buyer's cart. The cart is cleared on success.
    Cart,
    /// One product bought directly, bypassing the cart.
    Direct { product_id: Uuid, quantity: i32 },
}

impl CheckoutSource {
    pub fn is_cart(&self) -> bool {
        matches!(self, CheckoutSource::Cart)
    }

    /// Line for a direct purchase; cart lines are read inside the checkout transaction.
    pub fn direct_line(&self) -> Option<CartLine> {
        match *self {
            CheckoutSource::Cart => None,
            CheckoutSource::Direct { product_id, quantity } => Some(CartLine { product_id, quantity }),
        }
    }
}
