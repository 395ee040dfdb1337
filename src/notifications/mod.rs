// ============================================================================
// Notification Dispatcher
// ============================================================================
//
// Buyers and vendors are told about committed changes through an external
// `Notifier`. Dispatch happens after commit on a spawned task: it never holds
// a transaction open, never retries inline, and a failure is only logged and
// counted. A circuit breaker stops hammering a notifier that is down.
//
// ============================================================================

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::domain::order::OrderEvent;
use crate::metrics::CoreMetrics;
use crate::utils::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub user_id: Uuid,
    pub message: String,
}

impl Notification {
    pub fn new(user_id: Uuid, message: impl Into<String>) -> Self {
        Self {
            user_id,
            message: message.into(),
        }
    }
}

/// Delivery channel owned outside the order core (in-app inbox, SMS, mail).
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, user_id: Uuid, message: &str) -> anyhow::Result<()>;
}

/// Writes notifications to the log. Used when no delivery channel is wired.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, user_id: Uuid, message: &str) -> anyhow::Result<()> {
        tracing::info!(user_id = %user_id, message = %message, "Notification");
        Ok(())
    }
}

#[derive(Clone)]
pub struct NotificationDispatcher {
    notifier: Arc<dyn Notifier>,
    breaker: CircuitBreaker,
    metrics: Arc<CoreMetrics>,
    in_flight: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl NotificationDispatcher {
    pub fn new(
        notifier: Arc<dyn Notifier>,
        breaker_config: CircuitBreakerConfig,
        metrics: Arc<CoreMetrics>,
    ) -> Self {
        Self {
            notifier,
            breaker: CircuitBreaker::new(breaker_config),
            metrics,
            in_flight: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Fire-and-forget delivery of every notification `event` implies.
    /// Use `flush` to wait for delivery.
    pub fn dispatch(&self, event: &OrderEvent) {
        let notifications = event.notifications();
        let event_type = event.event_type();
        let this = self.clone();

        let handle = tokio::spawn(async move {
            for notification in notifications {
                this.deliver(event_type, notification).await;
            }
        });

        if let Ok(mut in_flight) = self.in_flight.lock() {
            in_flight.retain(|h| !h.is_finished());
            in_flight.push(handle);
        }
    }

    /// Wait for every dispatch started so far.
    pub async fn flush(&self) {
        let pending = match self.in_flight.lock() {
            Ok(mut in_flight) => std::mem::take(&mut *in_flight),
            Err(_) => return,
        };
        for handle in pending {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Notification task did not finish");
            }
        }
    }

    async fn deliver(&self, event_type: &'static str, notification: Notification) {
        let result = self
            .breaker
            .call(self.notifier.notify(notification.user_id, &notification.message))
            .await;

        match result {
            Ok(()) => {
                tracing::debug!(
                    user_id = %notification.user_id,
                    event_type = event_type,
                    "Notification delivered"
                );
            }
            Err(CircuitBreakerError::CircuitOpen) => {
                self.metrics.record_notification_failure("circuit_open");
                tracing::warn!(
                    user_id = %notification.user_id,
                    event_type = event_type,
                    "Notifier circuit open, notification dropped"
                );
            }
            Err(CircuitBreakerError::OperationFailed(e)) => {
                self.metrics.record_notification_failure("notifier_error");
                tracing::warn!(
                    user_id = %notification.user_id,
                    event_type = event_type,
                    error = %e,
                    "Notification failed"
                );
            }
        }

        let state = self.breaker.state().await;
        self.metrics.set_notifier_circuit_state(state);
    }
}
