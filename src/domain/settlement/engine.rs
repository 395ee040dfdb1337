use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::domain::order::{Order, OrderError, OrderStatus};
use crate::store::{Store, StoreError, UnitOfWork};
use super::value_objects::{CommissionRate, CommissionRecord, VendorEarning};

// ============================================================================
// Commission Settlement Engine
// ============================================================================
//
// Contract:
// - at most one CommissionRecord per order; an existing record is returned
//   unchanged, so callers may retry freely
// - record and vendor earning are written together or not at all
// - only delivered orders settle
//
// ============================================================================

const SETTLEMENT_SAVEPOINT: &str = "commission_settlement";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SettlementOutcome {
    pub record: CommissionRecord,
    /// `false` when a record already existed and nothing was written.
    pub newly_created: bool,
}

#[derive(Debug, Default, Serialize)]
pub struct BackfillReport {
    pub settled: Vec<Uuid>,
    pub already_settled: Vec<Uuid>,
    pub failed: Vec<BackfillFailure>,
}

#[derive(Debug, Serialize)]
pub struct BackfillFailure {
    pub order_id: Uuid,
    pub error: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SettlementEngine {
    rate: CommissionRate,
}

impl SettlementEngine {
    pub fn new(rate: CommissionRate) -> Self {
        Self { rate }
    }

    pub fn rate(&self) -> CommissionRate {
        self.rate
    }

    /// Settle `order` inside the caller's unit of work.
    ///
    /// The ledger writes sit behind a savepoint: on failure they are undone
    /// and the caller's earlier writes in `uow` survive.
    pub async fn settle_in(
        &self,
        uow: &mut dyn UnitOfWork,
        order: &Order,
    ) -> Result<SettlementOutcome, OrderError> {
        if order.status != OrderStatus::Delivered {
            return Err(OrderError::NotSettleable {
                order_id: order.id,
                status: order.status,
            });
        }

        if let Some(record) = uow.find_commission(order.id).await? {
            tracing::debug!(order_id = %order.id, "Order already settled");
            return Ok(SettlementOutcome {
                record,
                newly_created: false,
            });
        }

        let split = self.rate.split(order.total_amount);
        let record = CommissionRecord::confirmed(order.id, split, Utc::now());
        let earning = VendorEarning::for_record(order.vendor_id, &record);

        uow.savepoint(SETTLEMENT_SAVEPOINT).await?;
        match write_ledger(uow, &record, &earning).await {
            Ok(()) => {
                uow.release_savepoint(SETTLEMENT_SAVEPOINT).await?;
                tracing::info!(
                    order_id = %order.id,
                    vendor_id = %order.vendor_id,
                    total = %record.total_amount,
                    commission = %record.commission_amount,
                    vendor_amount = %record.vendor_amount,
                    "Order settled"
                );
                Ok(SettlementOutcome {
                    record,
                    newly_created: true,
                })
            }
            Err(OrderError::DuplicateSettlement(order_id)) => {
                uow.rollback_to_savepoint(SETTLEMENT_SAVEPOINT).await?;
                tracing::info!(order_id = %order_id, "Concurrent settlement won the race");
                let record = uow.find_commission(order_id).await?.ok_or_else(|| {
                    StoreError::Invalid(format!("commission for {order_id} collided but is missing"))
                })?;
                Ok(SettlementOutcome {
                    record,
                    newly_created: false,
                })
            }
            Err(e) => {
                uow.rollback_to_savepoint(SETTLEMENT_SAVEPOINT).await?;
                Err(e)
            }
        }
    }

    /// Settle one order in its own unit of work. Safe to call repeatedly.
    ///
    /// Returns the locked order alongside the outcome so callers can announce it.
    pub async fn settle(
        &self,
        store: &dyn Store,
        order_id: Uuid,
    ) -> Result<(Order, SettlementOutcome), OrderError> {
        let mut uow = store.begin().await?;
        let order = uow
            .lock_order(order_id)
            .await?
            .ok_or(OrderError::OrderNotFound(order_id))?;

        match self.settle_in(uow.as_mut(), &order).await {
            Ok(outcome) => {
                uow.commit().await?;
                Ok((order, outcome))
            }
            Err(e) => {
                if let Err(rollback_err) = uow.rollback().await {
                    tracing::error!(order_id = %order_id, error = %rollback_err, "Rollback failed");
                }
                Err(e)
            }
        }
    }
}

impl BackfillReport {
    pub fn record(&mut self, outcome: &SettlementOutcome) {
        if outcome.newly_created {
            self.settled.push(outcome.record.order_id);
        } else {
            self.already_settled.push(outcome.record.order_id);
        }
    }

    pub fn record_failure(&mut self, order_id: Uuid, error: &OrderError) {
        self.failed.push(BackfillFailure {
            order_id,
            error: error.to_string(),
        });
    }
}

async fn write_ledger(
    uow: &mut dyn UnitOfWork,
    record: &CommissionRecord,
    earning: &VendorEarning,
) -> Result<(), OrderError> {
    match uow.insert_commission(record).await {
        Ok(()) => {}
        Err(StoreError::UniqueViolation(_)) => {
            return Err(OrderError::DuplicateSettlement(record.order_id))
        }
        Err(e) => return Err(e.into()),
    }
    uow.insert_vendor_earning(earning).await?;
    Ok(())
}
