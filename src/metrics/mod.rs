use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

use crate::domain::order::OrderStatus;
use crate::utils::CircuitState;

// ============================================================================
// Metrics Module - Prometheus metrics for the order core
// ============================================================================
//
// Covers:
// - status transitions (applied and rejected)
// - checkouts and settlements by outcome
// - notification failures and notifier circuit state
// - latency of every core operation
//
// Exposed as text on GET /metrics.
// ============================================================================

pub struct CoreMetrics {
    registry: Registry,

    // Order lifecycle
    pub order_transitions: IntCounterVec,
    pub order_transitions_rejected: IntCounterVec,
    pub checkouts: IntCounterVec,

    // Settlement
    pub settlements: IntCounterVec,

    // Notifications
    pub notifications_failed: IntCounterVec,
    pub notifier_circuit_state: IntGauge,

    pub operation_duration: HistogramVec,
}

impl CoreMetrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let order_transitions = IntCounterVec::new(
            Opts::new("order_transitions_total", "Applied order status transitions"),
            &["from", "to"],
        )?;
        registry.register(Box::new(order_transitions.clone()))?;

        let order_transitions_rejected = IntCounterVec::new(
            Opts::new(
                "order_transitions_rejected_total",
                "Status change requests that were refused",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(order_transitions_rejected.clone()))?;

        let checkouts = IntCounterVec::new(
            Opts::new("checkouts_total", "Checkout attempts by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(checkouts.clone()))?;

        let settlements = IntCounterVec::new(
            Opts::new("settlements_total", "Commission settlements by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(settlements.clone()))?;

        let notifications_failed = IntCounterVec::new(
            Opts::new("notifications_failed_total", "Notifications that were not delivered"),
            &["reason"],
        )?;
        registry.register(Box::new(notifications_failed.clone()))?;

        let notifier_circuit_state = IntGauge::new(
            "notifier_circuit_state",
            "Notifier circuit breaker state (0=Closed, 1=Open, 2=HalfOpen)",
        )?;
        registry.register(Box::new(notifier_circuit_state.clone()))?;

        let operation_duration = HistogramVec::new(
            HistogramOpts::new(
                "order_operation_duration_seconds",
                "Duration of order core operations",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["operation"],
        )?;
        registry.register(Box::new(operation_duration.clone()))?;

        Ok(Self {
            registry,
            order_transitions,
            order_transitions_rejected,
            checkouts,
            settlements,
            notifications_failed,
            notifier_circuit_state,
            operation_duration,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_transition(&self, from: OrderStatus, to: OrderStatus) {
        self.order_transitions
            .with_label_values(&[from.as_str(), to.as_str()])
            .inc();
    }

    pub fn record_rejected_transition(&self, reason: &str) {
        self.order_transitions_rejected.with_label_values(&[reason]).inc();
    }

    pub fn record_checkout(&self, outcome: &str) {
        self.checkouts.with_label_values(&[outcome]).inc();
    }

    pub fn record_settlement(&self, outcome: &str) {
        self.settlements.with_label_values(&[outcome]).inc();
    }

    pub fn record_notification_failure(&self, reason: &str) {
        self.notifications_failed.with_label_values(&[reason]).inc();
    }

    pub fn rejected_transitions(&self, reason: &str) -> u64 {
        self.order_transitions_rejected.with_label_values(&[reason]).get()
    }

    pub fn settlements(&self, outcome: &str) -> u64 {
        self.settlements.with_label_values(&[outcome]).get()
    }

    pub fn notification_failures(&self, reason: &str) -> u64 {
        self.notifications_failed.with_label_values(&[reason]).get()
    }

    pub fn set_notifier_circuit_state(&self, state: CircuitState) {
        self.notifier_circuit_state.set(state.as_gauge());
    }

    pub fn observe_duration(&self, operation: &str, secs: f64) {
        self.operation_duration
            .with_label_values(&[operation])
            .observe(secs);
    }

    /// Prometheus text exposition of everything registered.
    pub fn encode_text(&self) -> anyhow::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = CoreMetrics::new().unwrap();
        metrics.record_checkout("placed");
        assert!(!metrics.registry().gather().is_empty());
    }

    #[test]
    fn test_record_transition() {
        let metrics = CoreMetrics::new().unwrap();
        metrics.record_transition(OrderStatus::Pending, OrderStatus::Confirmed);
        metrics.record_transition(OrderStatus::Pending, OrderStatus::Confirmed);

        let gathered = metrics.registry().gather();
        let transitions = gathered
            .iter()
            .find(|m| m.name() == "order_transitions_total")
            .unwrap();
        assert_eq!(transitions.metric[0].counter.value, Some(2.0));
    }

    #[test]
    fn test_circuit_state_gauge() {
        let metrics = CoreMetrics::new().unwrap();
        metrics.set_notifier_circuit_state(CircuitState::Open);
        assert_eq!(metrics.notifier_circuit_state.get(), 1);
    }

    #[test]
    fn test_encode_text_contains_metric_names() {
        let metrics = CoreMetrics::new().unwrap();
        metrics.record_settlement("created");
        metrics.observe_duration("apply_transition", 0.02);

        let text = metrics.encode_text().unwrap();
        assert!(text.contains("settlements_total"));
        assert!(text.contains("order_operation_duration_seconds"));
    }
}
