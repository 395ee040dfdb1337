// ============================================================================
// Order Domain - Lifecycle of marketplace orders
// ============================================================================
//
// - Value objects (Order, OrderStatus, PaymentStatus, Product, CartLine)
// - State machine (the only place a status change is decided)
// - Events (what committed, and who must hear about it)
// - Commands (status changes and checkout requests)
// - Errors (OrderError enum)
// - Command handler (transactional orchestration over a Store)
//
// ============================================================================

pub mod value_objects;
pub mod state_machine;
pub mod events;
pub mod commands;
pub mod errors;
pub mod command_handler;

// Re-export for convenience
pub use value_objects::*;
pub use state_machine::StatusTransition;
pub use events::*;
pub use commands::*;
pub use errors::*;
pub use command_handler::*;
