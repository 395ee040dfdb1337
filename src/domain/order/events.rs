use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::notifications::Notification;
use super::value_objects::{Order, OrderStatus, PaymentStatus};

// ============================================================================
// Order Events - Facts published after a unit of work commits
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum OrderEvent {
    Placed(OrdersPlaced),
    StatusChanged(OrderStatusChanged),
    Settled(OrderSettled),
    SettlementDeferred(SettlementDeferred),
}

impl OrderEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::Placed(_) => "OrdersPlaced",
            OrderEvent::StatusChanged(_) => "OrderStatusChanged",
            OrderEvent::Settled(_) => "OrderSettled",
            OrderEvent::SettlementDeferred(_) => "SettlementDeferred",
        }
    }

    /// Messages owed to buyers and vendors for this event.
    pub fn notifications(&self) -> Vec<Notification> {
        match self {
            OrderEvent::Placed(e) => {
                let mut out = vec![Notification::new(
                    e.buyer_id,
                    format!(
                        "Your order {} has been placed ({} item(s))",
                        e.order_number,
                        e.lines.len()
                    ),
                )];
                out.extend(e.lines.iter().map(|line| {
                    Notification::new(
                        line.vendor_id,
                        format!(
                            "New order {} for {} unit(s), total {}",
                            e.order_number, line.quantity, line.total_amount
                        ),
                    )
                }));
                out
            }
            OrderEvent::StatusChanged(e) => vec![Notification::new(
                e.buyer_id,
                match &e.notes {
                    Some(notes) => format!(
                        "Order {} is now {}: {}",
                        e.order_number, e.to, notes
                    ),
                    None => format!("Order {} is now {}", e.order_number, e.to),
                },
            )],
            OrderEvent::Settled(e) => vec![Notification::new(
                e.vendor_id,
                format!(
                    "Order {} settled: {} credited to your earnings",
                    e.order_number, e.vendor_amount
                ),
            )],
            // Operator follow-up only; nobody outside the platform is told.
            OrderEvent::SettlementDeferred(_) => Vec::new(),
        }
    }
}

// ============================================================================
// Individual Event Types
// ============================================================================

/// Orders Placed - one checkout, one or more order rows
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct OrdersPlaced {
    pub order_number: String,
    pub buyer_id: Uuid,
    pub lines: Vec<PlacedLine>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PlacedLine {
    pub order_id: Uuid,
    pub vendor_id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    pub total_amount: Decimal,
}

impl OrdersPlaced {
    pub fn from_orders(order_number: &str, buyer_id: Uuid, orders: &[Order]) -> Self {
        Self {
            order_number: order_number.to_string(),
            buyer_id,
            lines: orders
                .iter()
                .map(|o| PlacedLine {
                    order_id: o.id,
                    vendor_id: o.vendor_id,
                    product_id: o.product_id,
                    quantity: o.quantity,
                    total_amount: o.total_amount,
                })
                .collect(),
        }
    }
}

/// Order Status Changed - a transition committed
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct OrderStatusChanged {
    pub order_id: Uuid,
    pub order_number: String,
    pub buyer_id: Uuid,
    pub vendor_id: Uuid,
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub payment_status: PaymentStatus,
    pub notes: Option<String>,
}

/// Order Settled - commission and vendor earning recorded
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct OrderSettled {
    pub order_id: Uuid,
    pub order_number: String,
    pub vendor_id: Uuid,
    pub commission_amount: Decimal,
    pub vendor_amount: Decimal,
}

/// Settlement Deferred - delivered, but the ledger write failed and needs a retry
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SettlementDeferred {
    pub order_id: Uuid,
    pub reason: String,
}
