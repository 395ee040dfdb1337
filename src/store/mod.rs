// ============================================================================
// Store - Transactional persistence for the order core
// ============================================================================
//
// Every operation runs against an explicit `UnitOfWork` obtained from a
// `Store`. Nothing is visible to other units of work until `commit`;
// dropping a unit of work without committing rolls it back.
//
// Implementations:
// - postgres: sqlx over a PgPool (production)
// - memory:   serialized in-process tables with fault injection (tests, demos)
//
// ============================================================================

use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::order::{CartLine, Order, Product};
use crate::domain::order::StatusTransition;
use crate::domain::settlement::{CommissionRecord, CommissionSummary, VendorEarning, VendorPayoutSummary};

pub mod memory;
pub mod postgres;

pub use memory::{Fault, FaultPoint, MemoryStore};
pub use postgres::PgStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),

    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("foreign key constraint violated: {0}")]
    ForeignKeyViolation(String),

    #[error("transaction timed out after {0:?}")]
    Timeout(Duration),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("invalid store state: {0}")]
    Invalid(String),
}

impl StoreError {
    /// Failures worth retrying unchanged.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Timeout(_) | StoreError::Unavailable(_) => true,
            StoreError::Database(e) => match e {
                sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => true,
                // serialization_failure / deadlock_detected
                sqlx::Error::Database(db) => {
                    matches!(db.code().as_deref(), Some("40001") | Some("40P01"))
                }
                _ => false,
            },
            StoreError::UniqueViolation(_)
            | StoreError::ForeignKeyViolation(_)
            | StoreError::Invalid(_) => false,
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let Some(db) = err.as_database_error() {
            let constraint = db.constraint().unwrap_or("unknown").to_string();
            if db.is_unique_violation() {
                return StoreError::UniqueViolation(constraint);
            }
            if db.is_foreign_key_violation() {
                return StoreError::ForeignKeyViolation(constraint);
            }
        }
        StoreError::Database(err)
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Open a new unit of work.
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError>;

    /// Cheap connectivity probe for health checks.
    async fn ping(&self) -> Result<(), StoreError>;
}

#[async_trait]
pub trait UnitOfWork: Send {
    // --- orders -------------------------------------------------------------

    /// Read an order and hold its row lock until the unit of work ends.
    async fn lock_order(&mut self, order_id: Uuid) -> Result<Option<Order>, StoreError>;

    async fn find_order(&mut self, order_id: Uuid) -> Result<Option<Order>, StoreError>;

    async fn orders_by_number(&mut self, order_number: &str) -> Result<Vec<Order>, StoreError>;

    async fn insert_order(&mut self, order: &Order) -> Result<(), StoreError>;

    /// Write status, payment status, notes and timestamps of one order.
    async fn update_order_status(&mut self, transition: &StatusTransition) -> Result<(), StoreError>;

    /// Returns whether a row was deleted.
    async fn delete_order(&mut self, order_id: Uuid) -> Result<bool, StoreError>;

    /// Delivered orders that have no commission record yet, oldest first.
    async fn delivered_without_commission(&mut self, limit: i64) -> Result<Vec<Uuid>, StoreError>;

    // --- catalog ------------------------------------------------------------

    async fn find_product(&mut self, product_id: Uuid) -> Result<Option<Product>, StoreError>;

    /// Conditionally decrement stock. Returns `false`, changing nothing, when
    /// fewer than `quantity` units remain.
    async fn reserve_stock(&mut self, product_id: Uuid, quantity: i32) -> Result<bool, StoreError>;

    async fn cart_lines(&mut self, user_id: Uuid) -> Result<Vec<CartLine>, StoreError>;

    async fn clear_cart(&mut self, user_id: Uuid) -> Result<u64, StoreError>;

    // --- ledger -------------------------------------------------------------

    async fn find_commission(&mut self, order_id: Uuid) -> Result<Option<CommissionRecord>, StoreError>;

    /// Fails with `UniqueViolation` if the order already has a record.
    async fn insert_commission(&mut self, record: &CommissionRecord) -> Result<(), StoreError>;

    async fn insert_vendor_earning(&mut self, earning: &VendorEarning) -> Result<(), StoreError>;

    async fn vendor_payout_summary(&mut self, vendor_id: Uuid) -> Result<VendorPayoutSummary, StoreError>;

    async fn commission_summary(&mut self) -> Result<CommissionSummary, StoreError>;

    // --- transaction control ------------------------------------------------

    async fn savepoint(&mut self, name: &str) -> Result<(), StoreError>;

    async fn release_savepoint(&mut self, name: &str) -> Result<(), StoreError>;

    async fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
