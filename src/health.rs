use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::notifications::NotificationDispatcher;
use crate::store::Store;
use crate::utils::CircuitState;

// ============================================================================
// Health Check
// ============================================================================
//
// The store is required: if it cannot be reached the service is unhealthy.
// The notifier is optional: an open breaker only degrades the service, since
// order writes never wait on notifications.
//
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded(String),
    Unhealthy(String),
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }

    pub fn is_unhealthy(&self) -> bool {
        matches!(self, HealthStatus::Unhealthy(_))
    }

    fn severity(&self) -> u8 {
        match self {
            HealthStatus::Healthy => 0,
            HealthStatus::Degraded(_) => 1,
            HealthStatus::Unhealthy(_) => 2,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    pub last_check: DateTime<Utc>,
}

impl ComponentHealth {
    pub fn new(name: impl Into<String>, status: HealthStatus) -> Self {
        Self {
            name: name.into(),
            status,
            last_check: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub components: Vec<ComponentHealth>,
}

pub async fn check(store: &dyn Store, notifications: &NotificationDispatcher) -> HealthReport {
    let store_health = match store.ping().await {
        Ok(()) => HealthStatus::Healthy,
        Err(e) => {
            tracing::error!(error = %e, "Store health check failed");
            HealthStatus::Unhealthy("store unreachable".to_string())
        }
    };

    let notifier_health = match notifications.breaker().state().await {
        CircuitState::Closed => HealthStatus::Healthy,
        CircuitState::HalfOpen => HealthStatus::Degraded("notifier recovering".to_string()),
        CircuitState::Open => HealthStatus::Degraded("notifier circuit open".to_string()),
    };

    let components = vec![
        ComponentHealth::new("store", store_health),
        ComponentHealth::new("notifier", notifier_health),
    ];
    let status = components
        .iter()
        .map(|c| &c.status)
        .max_by_key(|s| s.severity())
        .cloned()
        .unwrap_or(HealthStatus::Healthy);

    HealthReport { status, components }
}
