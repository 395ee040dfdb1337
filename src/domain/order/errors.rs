use uuid::Uuid;

use crate::store::StoreError;
use crate::utils::IsTransient;
use super::value_objects::OrderStatus;

// ============================================================================
// Order Business Rule Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    #[error("Order not found: {0}")]
    OrderNotFound(Uuid),

    #[error("Cannot move order from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("Insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: Uuid,
        requested: i32,
        available: i32,
    },

    #[error("Cart is empty")]
    EmptyCart,

    #[error("Product is unavailable: {0}")]
    ProductUnavailable(Uuid),

    #[error("Invalid item quantity: {0}")]
    InvalidQuantity(i32),

    #[error("Order {order_id} is {status} and cannot be settled")]
    NotSettleable { order_id: Uuid, status: OrderStatus },

    #[error("Order {0} has a commission record and cannot be deleted")]
    OrderHasSettlement(Uuid),

    #[error("Order {0} is already settled")]
    DuplicateSettlement(Uuid),

    #[error("Persistence failure: {0}")]
    Persistence(#[from] StoreError),
}

impl OrderError {
    /// Stable machine-readable code for API consumers.
    pub fn code(&self) -> &'static str {
        match self {
            OrderError::OrderNotFound(_) => "order_not_found",
            OrderError::InvalidTransition { .. } => "invalid_transition",
            OrderError::InsufficientStock { .. } => "insufficient_stock",
            OrderError::EmptyCart => "empty_cart",
            OrderError::ProductUnavailable(_) => "product_unavailable",
            OrderError::InvalidQuantity(_) => "invalid_quantity",
            OrderError::NotSettleable { .. } => "not_settleable",
            OrderError::OrderHasSettlement(_) => "order_has_settlement",
            OrderError::DuplicateSettlement(_) => "duplicate_settlement",
            OrderError::Persistence(_) => "persistence_error",
        }
    }

    /// Message safe to show to end users. Storage details never leave the core.
    pub fn public_message(&self) -> String {
        match self {
            OrderError::Persistence(_) => "Something went wrong, please try again".to_string(),
            other => other.to_string(),
        }
    }

    /// Validation failures are rejected before anything is written.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            OrderError::InvalidTransition { .. }
                | OrderError::InsufficientStock { .. }
                | OrderError::EmptyCart
                | OrderError::ProductUnavailable(_)
                | OrderError::InvalidQuantity(_)
                | OrderError::NotSettleable { .. }
        )
    }
}

impl IsTransient for OrderError {
    fn is_transient(&self) -> bool {
        match self {
            OrderError::Persistence(e) => e.is_transient(),
            _ => false,
        }
    }
}

/// A status string read from storage or a request did not name a known status.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("unknown {kind}: {value:?}")]
pub struct ParseStatusError {
    kind: &'static str,
    value: String,
}

impl ParseStatusError {
    pub fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persistence_message_is_generic() {
        let err = OrderError::from(StoreError::Unavailable("connection reset by peer".into()));

        assert_eq!(err.code(), "persistence_error");
        assert!(!err.public_message().contains("connection reset"));
        assert!(err.is_transient());
    }

    #[test]
    fn test_validation_errors_keep_detail() {
        let product_id = Uuid::new_v4();
        let err = OrderError::InsufficientStock {
            product_id,
            requested: 5,
            available: 2,
        };

        assert!(err.is_validation());
        assert!(!err.is_transient());
        assert!(err.public_message().contains(&product_id.to_string()));
    }

    #[test]
    fn test_invalid_transition_message() {
        let err = OrderError::InvalidTransition {
            from: OrderStatus::Pending,
            to: OrderStatus::Shipped,
        };
        assert_eq!(err.to_string(), "Cannot move order from pending to shipped");
        assert_eq!(err.code(), "invalid_transition");
    }
}
