// ============================================================================
// Settlement Domain - Commission split for delivered orders
// ============================================================================

pub mod value_objects;
pub mod engine;

pub use value_objects::*;
pub use engine::{BackfillFailure, BackfillReport, SettlementEngine, SettlementOutcome};
