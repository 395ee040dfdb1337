use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::errors::OrderError;
use super::value_objects::{Order, OrderStatus, PaymentStatus};

// ============================================================================
// Order State Machine
// ============================================================================
//
// Pure validation: given the order as read under its row lock, decide whether
// the requested status is reachable and describe the write. Persisting the
// write is the command handler's job.
//
// ============================================================================

/// A validated status write for one order.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusTransition {
    pub order_id: Uuid,
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub payment_status: PaymentStatus,
    /// `None` leaves the stored notes as they are.
    pub notes: Option<String>,
    pub at: DateTime<Utc>,
}

impl StatusTransition {
    /// Validate `order.status -> target` against the transition table.
    pub fn plan(
        order: &Order,
        target: OrderStatus,
        notes: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<Self, OrderError> {
        if !order.status.can_transition_to(target) {
            return Err(OrderError::InvalidTransition {
                from: order.status,
                to: target,
            });
        }

        Ok(Self {
            order_id: order.id,
            from: order.status,
            to: target,
            payment_status: target.payment_status(),
            notes: notes.filter(|n| !n.trim().is_empty()),
            at,
        })
    }

    pub fn settles(&self) -> bool {
        self.to == OrderStatus::Delivered
    }

    /// Mirror the persisted write onto an in-memory copy of the order.
    pub fn apply(&self, order: &mut Order) {
        order.status = self.to;
        order.payment_status = self.payment_status;
        if let Some(notes) = &self.notes {
            order.status_notes = Some(notes.clone());
        }
        order.updated_at = self.at;
        order.last_status_updated = Some(self.at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn order_in(status: OrderStatus) -> Order {
        let now = Utc::now();
        Order {
            id: Uuid::new_v4(),
            order_number: "ORD-TEST".to_string(),
            user_id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            vendor_id: Uuid::new_v4(),
            quantity: 1,
            total_amount: dec!(250.00),
            status,
            payment_status: status.payment_status(),
            status_notes: Some("initial".to_string()),
            created_at: now,
            updated_at: now,
            last_status_updated: None,
        }
    }

    #[test]
    fn test_skip_ahead_is_rejected() {
        let order = order_in(OrderStatus::Pending);
        let result = StatusTransition::plan(&order, OrderStatus::Shipped, None, Utc::now());

        assert!(matches!(
            result,
            Err(OrderError::InvalidTransition {
                from: OrderStatus::Pending,
                to: OrderStatus::Shipped
            })
        ));
    }

    #[test]
    fn test_same_status_is_rejected() {
        let order = order_in(OrderStatus::Confirmed);
        let result = StatusTransition::plan(&order, OrderStatus::Confirmed, None, Utc::now());
        assert!(matches!(result, Err(OrderError::InvalidTransition { .. })));
    }

    #[test]
    fn test_terminal_statuses_reject_everything() {
        for terminal in [OrderStatus::Delivered, OrderStatus::Cancelled] {
            let order = order_in(terminal);
            for target in OrderStatus::ALL {
                assert!(StatusTransition::plan(&order, target, None, Utc::now()).is_err());
            }
        }
    }

    #[test]
    fn test_cancel_derives_cancelled_payment() {
        let mut order = order_in(OrderStatus::Processing);
        let at = Utc::now();
        let transition =
            StatusTransition::plan(&order, OrderStatus::Cancelled, Some("Out of feed".into()), at)
                .unwrap();

        transition.apply(&mut order);

        assert_eq!(order.status, OrderStatus::Cancelled);
        assert_eq!(order.payment_status, PaymentStatus::Cancelled);
        assert_eq!(order.status_notes.as_deref(), Some("Out of feed"));
        assert_eq!(order.last_status_updated, Some(at));
        assert!(!transition.settles());
    }

    #[test]
    fn test_blank_notes_keep_existing() {
        let mut order = order_in(OrderStatus::Pending);
        let transition =
            StatusTransition::plan(&order, OrderStatus::Confirmed, Some("   ".into()), Utc::now())
                .unwrap();

        transition.apply(&mut order);

        assert_eq!(order.status_notes.as_deref(), Some("initial"));
        assert_eq!(order.payment_status, PaymentStatus::Paid);
    }

    #[test]
    fn test_delivery_settles() {
        let order = order_in(OrderStatus::Shipped);
        let transition =
            StatusTransition::plan(&order, OrderStatus::Delivered, None, Utc::now()).unwrap();

        assert!(transition.settles());
        assert_eq!(transition.payment_status, PaymentStatus::Paid);
    }
}
