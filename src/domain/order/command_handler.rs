use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::domain::settlement::{
    BackfillReport, CommissionSummary, SettlementEngine, SettlementOutcome, VendorPayoutSummary,
};
use crate::metrics::CoreMetrics;
use crate::notifications::NotificationDispatcher;
use crate::store::{Store, StoreError};
use crate::utils::{retry_on_transient, RetryConfig, RetryOutcome};

use super::commands::{ChangeStatus, PlaceOrder};
use super::errors::OrderError;
use super::events::{OrderEvent, OrderSettled, OrderStatusChanged, OrdersPlaced, SettlementDeferred};
use super::state_machine::StatusTransition;
use super::value_objects::{generate_order_number, Order, OrderStatus};

// ============================================================================
// Order Command Handler
// ============================================================================
//
// Orchestrates: Command → Unit of Work → Commit → Events → Notifications
//
// Every write runs in one unit of work bounded by `tx_timeout`. Hitting the
// timeout drops the unit of work, which rolls it back. Events are published
// only after a successful commit.
//
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct TransitionOutcome {
    pub order: Order,
    pub previous_status: OrderStatus,
    /// Present when the order was delivered and settlement went through.
    pub settlement: Option<SettlementOutcome>,
    /// Present when the order was delivered but settlement was deferred.
    pub settlement_warning: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutOutcome {
    pub order_number: String,
    pub orders: Vec<Order>,
}

pub struct OrderCommandHandler {
    store: Arc<dyn Store>,
    settlement: SettlementEngine,
    notifications: NotificationDispatcher,
    metrics: Arc<CoreMetrics>,
    tx_timeout: Duration,
    backfill_retry: RetryConfig,
}

impl OrderCommandHandler {
    pub fn new(
        store: Arc<dyn Store>,
        settlement: SettlementEngine,
        notifications: NotificationDispatcher,
        metrics: Arc<CoreMetrics>,
        tx_timeout: Duration,
    ) -> Self {
        Self {
            store,
            settlement,
            notifications,
            metrics,
            tx_timeout,
            backfill_retry: RetryConfig::default(),
        }
    }

    pub fn with_backfill_retry(mut self, retry: RetryConfig) -> Self {
        self.backfill_retry = retry;
        self
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn notifications(&self) -> &NotificationDispatcher {
        &self.notifications
    }

    pub fn metrics(&self) -> &Arc<CoreMetrics> {
        &self.metrics
    }

    // ========================================================================
    // Status changes
    // ========================================================================

    /// Move an order to `command.target`.
    ///
    /// The current status is read under the order's row lock, so two racing
    /// requests cannot both pass validation. Entering `delivered` settles the
    /// order in the same unit of work; a settlement failure is downgraded to
    /// a warning and the status change still commits.
    pub async fn apply_transition(&self, command: ChangeStatus) -> Result<TransitionOutcome, OrderError> {
        let order_id = command.order_id;
        let result = self
            .within_timeout("apply_transition", self.transition_in_tx(command))
            .await;

        match result {
            Ok((outcome, events)) => {
                self.metrics
                    .record_transition(outcome.previous_status, outcome.order.status);
                tracing::info!(
                    order_id = %order_id,
                    from = %outcome.previous_status,
                    to = %outcome.order.status,
                    "Order status changed"
                );
                self.publish(events);
                Ok(outcome)
            }
            Err(e) => {
                if e.is_validation() || matches!(e, OrderError::OrderNotFound(_)) {
                    self.metrics.record_rejected_transition(e.code());
                }
                if e.is_validation() {
                    tracing::debug!(order_id = %order_id, error = %e, "Status change rejected");
                }
                Err(e)
            }
        }
    }

    async fn transition_in_tx(
        &self,
        command: ChangeStatus,
    ) -> Result<(TransitionOutcome, Vec<OrderEvent>), OrderError> {
        let mut uow = self.store.begin().await?;

        let mut order = uow
            .lock_order(command.order_id)
            .await?
            .ok_or(OrderError::OrderNotFound(command.order_id))?;
        let previous_status = order.status;

        if let Some(expected) = command.expected_from {
            if expected != previous_status {
                return Err(OrderError::InvalidTransition {
                    from: previous_status,
                    to: command.target,
                });
            }
        }

        let transition = StatusTransition::plan(&order, command.target, command.notes, Utc::now())?;
        uow.update_order_status(&transition).await?;
        transition.apply(&mut order);

        let mut events = vec![OrderEvent::StatusChanged(OrderStatusChanged {
            order_id: order.id,
            order_number: order.order_number.clone(),
            buyer_id: order.user_id,
            vendor_id: order.vendor_id,
            from: transition.from,
            to: transition.to,
            payment_status: transition.payment_status,
            notes: transition.notes.clone(),
        })];

        let mut settlement = None;
        let mut settlement_warning = None;
        if transition.settles() {
            match self.settlement.settle_in(uow.as_mut(), &order).await {
                Ok(outcome) => {
                    self.metrics.record_settlement(settlement_label(&outcome));
                    if outcome.newly_created {
                        events.push(settled_event(&order, &outcome));
                    }
                    settlement = Some(outcome);
                }
                Err(e) => {
                    self.metrics.record_settlement("deferred");
                    tracing::warn!(
                        order_id = %order.id,
                        error = %e,
                        "Settlement failed, delivery proceeds without commission"
                    );
                    settlement_warning = Some(format!(
                        "Order delivered but settlement was deferred ({})",
                        e.code()
                    ));
                    events.push(OrderEvent::SettlementDeferred(SettlementDeferred {
                        order_id: order.id,
                        reason: e.to_string(),
                    }));
                }
            }
        }

        uow.commit().await?;

        Ok((
            TransitionOutcome {
                order,
                previous_status,
                settlement,
                settlement_warning,
            },
            events,
        ))
    }

    // ========================================================================
    // Checkout
    // ========================================================================

    /// Create orders from a cart or a single product.
    ///
    /// All stock reservations and order rows commit together or not at all.
    /// Lines share one order number but become independent orders.
    pub async fn checkout(&self, command: PlaceOrder) -> Result<CheckoutOutcome, OrderError> {
        let buyer_id = command.buyer_id;
        let from_cart = command.source.is_cart();

        let result = self
            .within_timeout("checkout", self.checkout_in_tx(command))
            .await;

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                self.metrics.record_checkout(e.code());
                if e.is_validation() {
                    tracing::debug!(buyer_id = %buyer_id, error = %e, "Checkout rejected");
                }
                return Err(e);
            }
        };

        self.metrics.record_checkout("placed");
        tracing::info!(
            buyer_id = %buyer_id,
            order_number = %outcome.order_number,
            orders = outcome.orders.len(),
            "Checkout completed"
        );

        if from_cart {
            if let Err(e) = self.clear_cart(buyer_id).await {
                tracing::warn!(buyer_id = %buyer_id, error = %e, "Failed to clear cart after checkout");
            }
        }

        self.publish(vec![OrderEvent::Placed(OrdersPlaced::from_orders(
            &outcome.order_number,
            buyer_id,
            &outcome.orders,
        ))]);

        Ok(outcome)
    }

    async fn checkout_in_tx(&self, command: PlaceOrder) -> Result<CheckoutOutcome, OrderError> {
        if let Some(line) = command.source.direct_line() {
            if line.quantity <= 0 {
                return Err(OrderError::InvalidQuantity(line.quantity));
            }
        }

        let mut uow = self.store.begin().await?;

        let lines = match command.source.direct_line() {
            Some(line) => vec![line],
            None => uow.cart_lines(command.buyer_id).await?,
        };
        if lines.is_empty() {
            return Err(OrderError::EmptyCart);
        }

        let now = Utc::now();
        let order_number = generate_order_number(now);
        let mut orders = Vec::with_capacity(lines.len());

        for line in lines {
            if line.quantity <= 0 {
                return Err(OrderError::InvalidQuantity(line.quantity));
            }

            let product = uow
                .find_product(line.product_id)
                .await?
                .filter(|p| p.is_active)
                .ok_or(OrderError::ProductUnavailable(line.product_id))?;

            if !uow.reserve_stock(product.id, line.quantity).await? {
                return Err(OrderError::InsufficientStock {
                    product_id: product.id,
                    requested: line.quantity,
                    available: product.stock_quantity,
                });
            }

            let order = Order::place(&order_number, command.buyer_id, &product, line.quantity, now);
            uow.insert_order(&order).await?;
            orders.push(order);
        }

        uow.commit().await?;

        Ok(CheckoutOutcome { order_number, orders })
    }

    async fn clear_cart(&self, buyer_id: Uuid) -> Result<u64, OrderError> {
        self.within_timeout("clear_cart", async {
            let mut uow = self.store.begin().await?;
            let cleared = uow.clear_cart(buyer_id).await?;
            uow.commit().await?;
            Ok::<_, OrderError>(cleared)
        })
        .await
    }

    // ========================================================================
    // Settlement
    // ========================================================================

    /// Settle a delivered order on its own, e.g. after a deferred settlement.
    /// Returns the existing record if the order is already settled.
    pub async fn settle_order(&self, order_id: Uuid) -> Result<SettlementOutcome, OrderError> {
        match self.settle_once(order_id).await {
            Ok((order, outcome)) => {
                self.announce_settlement(&order, &outcome);
                Ok(outcome)
            }
            Err(e) => {
                self.record_settlement_failure(&e);
                Err(e)
            }
        }
    }

    /// Settle every delivered order still missing a commission record.
    ///
    /// Each order gets its own bounded unit of work. Transient failures,
    /// timeouts included, are retried with backoff; anything still failing
    /// is reported, not raised.
    pub async fn settle_outstanding(&self, limit: i64) -> Result<BackfillReport, OrderError> {
        let started = Instant::now();
        let outstanding = self
            .within_timeout("list_outstanding", async {
                let mut uow = self.store.begin().await?;
                let ids = uow.delivered_without_commission(limit).await?;
                uow.commit().await?;
                Ok::<_, OrderError>(ids)
            })
            .await?;

        tracing::info!(count = outstanding.len(), "Settling outstanding deliveries");

        let mut report = BackfillReport::default();
        for order_id in outstanding {
            let attempt =
                retry_on_transient(self.backfill_retry.clone(), move |_| self.settle_once(order_id)).await;
            match attempt {
                RetryOutcome::Succeeded {
                    value: (order, outcome),
                    ..
                } => {
                    self.announce_settlement(&order, &outcome);
                    report.record(&outcome);
                }
                RetryOutcome::Exhausted { error, .. } | RetryOutcome::Permanent(error) => {
                    tracing::warn!(order_id = %order_id, error = %error, "Backfill settlement failed");
                    self.record_settlement_failure(&error);
                    report.record_failure(order_id, &error);
                }
            }
        }

        self.metrics
            .observe_duration("settle_outstanding", started.elapsed().as_secs_f64());
        tracing::info!(
            settled = report.settled.len(),
            already_settled = report.already_settled.len(),
            failed = report.failed.len(),
            "Settlement backfill finished"
        );
        Ok(report)
    }

    async fn settle_once(&self, order_id: Uuid) -> Result<(Order, SettlementOutcome), OrderError> {
        self.within_timeout("settle_order", self.settlement.settle(self.store.as_ref(), order_id))
            .await
    }

    fn announce_settlement(&self, order: &Order, outcome: &SettlementOutcome) {
        self.metrics.record_settlement(settlement_label(outcome));
        if outcome.newly_created {
            self.publish(vec![settled_event(order, outcome)]);
        }
    }

    /// Caller errors (unknown or undelivered order) are not settlement failures.
    fn record_settlement_failure(&self, error: &OrderError) {
        if matches!(error, OrderError::Persistence(_)) {
            self.metrics.record_settlement("failed");
        }
    }

    // ========================================================================
    // Reads and maintenance
    // ========================================================================

    pub async fn get_order(&self, order_id: Uuid) -> Result<Order, OrderError> {
        self.within_timeout("get_order", async {
            let mut uow = self.store.begin().await?;
            let order = uow.find_order(order_id).await?;
            uow.commit().await?;
            order.ok_or(OrderError::OrderNotFound(order_id))
        })
        .await
    }

    /// Every order created by one checkout.
    pub async fn orders_by_number(&self, order_number: &str) -> Result<Vec<Order>, OrderError> {
        self.within_timeout("orders_by_number", async {
            let mut uow = self.store.begin().await?;
            let orders = uow.orders_by_number(order_number).await?;
            uow.commit().await?;
            Ok::<_, OrderError>(orders)
        })
        .await
    }

    /// Delete an order that was never settled. Settled orders are kept forever.
    pub async fn delete_order(&self, order_id: Uuid) -> Result<(), OrderError> {
        self.within_timeout("delete_order", async {
            let mut uow = self.store.begin().await?;
            if uow.lock_order(order_id).await?.is_none() {
                return Err(OrderError::OrderNotFound(order_id));
            }
            if uow.find_commission(order_id).await?.is_some() {
                return Err(OrderError::OrderHasSettlement(order_id));
            }
            match uow.delete_order(order_id).await {
                Ok(true) => {}
                Ok(false) => return Err(OrderError::OrderNotFound(order_id)),
                Err(StoreError::ForeignKeyViolation(_)) => {
                    return Err(OrderError::OrderHasSettlement(order_id))
                }
                Err(e) => return Err(e.into()),
            }
            uow.commit().await?;
            tracing::info!(order_id = %order_id, "Order deleted");
            Ok(())
        })
        .await
    }

    pub async fn vendor_payout_summary(&self, vendor_id: Uuid) -> Result<VendorPayoutSummary, OrderError> {
        self.within_timeout("vendor_payout_summary", async {
            let mut uow = self.store.begin().await?;
            let summary = uow.vendor_payout_summary(vendor_id).await?;
            uow.commit().await?;
            Ok::<_, OrderError>(summary)
        })
        .await
    }

    pub async fn commission_summary(&self) -> Result<CommissionSummary, OrderError> {
        self.within_timeout("commission_summary", async {
            let mut uow = self.store.begin().await?;
            let summary = uow.commission_summary().await?;
            uow.commit().await?;
            Ok::<_, OrderError>(summary)
        })
        .await
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Run `work` under the transaction timeout and record its duration.
    /// On timeout `work` is dropped mid-flight, rolling back its unit of work.
    async fn within_timeout<T, F>(&self, operation: &'static str, work: F) -> Result<T, OrderError>
    where
        F: Future<Output = Result<T, OrderError>>,
    {
        let started = Instant::now();
        let result = match tokio::time::timeout(self.tx_timeout, work).await {
            Ok(result) => result,
            Err(_) => {
                tracing::error!(
                    operation = operation,
                    timeout_ms = self.tx_timeout.as_millis() as u64,
                    "Transaction timed out and was rolled back"
                );
                Err(StoreError::Timeout(self.tx_timeout).into())
            }
        };
        self.metrics
            .observe_duration(operation, started.elapsed().as_secs_f64());

        if let Err(OrderError::Persistence(e)) = &result {
            tracing::error!(operation = operation, error = %e, "Persistence failure");
        }
        result
    }

    /// Log committed events and hand them to the notification dispatcher.
    fn publish(&self, events: Vec<OrderEvent>) {
        for event in events {
            match serde_json::to_string(&event) {
                Ok(payload) => {
                    tracing::debug!(event_type = event.event_type(), payload = %payload, "Publishing event")
                }
                Err(e) => {
                    tracing::warn!(event_type = event.event_type(), error = %e, "Failed to serialize event")
                }
            }
            if let OrderEvent::SettlementDeferred(deferred) = &event {
                tracing::warn!(
                    order_id = %deferred.order_id,
                    reason = %deferred.reason,
                    "Settlement deferred, needs follow-up"
                );
            }
            self.notifications.dispatch(&event);
        }
    }
}

fn settlement_label(outcome: &SettlementOutcome) -> &'static str {
    if outcome.newly_created {
        "created"
    } else {
        "existing"
    }
}

fn settled_event(order: &Order, outcome: &SettlementOutcome) -> OrderEvent {
    OrderEvent::Settled(OrderSettled {
        order_id: order.id,
        order_number: order.order_number.clone(),
        vendor_id: order.vendor_id,
        commission_amount: outcome.record.commission_amount,
        vendor_amount: outcome.record.vendor_amount,
    })
}
