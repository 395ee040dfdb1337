// ============================================================================
// Poultry Order Core
// ============================================================================
//
// Order lifecycle and commission settlement for the poultry marketplace:
// - domain:        status state machine, checkout, settlement engine
// - store:         transactional persistence (Postgres, in-memory)
// - notifications: best-effort buyer/vendor messages after commit
// - http:          actix-web routes over the command handler
//
// ============================================================================

pub mod config;
pub mod domain;
pub mod health;
pub mod http;
pub mod metrics;
pub mod notifications;
pub mod store;
pub mod utils;
