// ============================================================================
// Domain Layer - Business Logic
// ============================================================================
//
// Each area has its own subdirectory with value objects, errors and the
// code that enforces its rules:
// - order:      status state machine, checkout, notifications fan-out
// - settlement: commission split and the vendor ledger
//
// Persistence lives behind `crate::store`; nothing here talks SQL.
//
// ============================================================================

pub mod order;
pub mod settlement;
