use std::collections::HashMap;
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::domain::order::{CartLine, Order, OrderStatus, Product, StatusTransition};
use crate::domain::settlement::{
    CommissionRecord, CommissionSummary, LedgerStatus, VendorEarning, VendorPayoutSummary,
};
use super::{Store, StoreError, UnitOfWork};

// ============================================================================
// In-Memory Store
// ============================================================================
//
// A unit of work holds the table lock for its whole lifetime and edits a
// private copy of the tables; commit swaps the copy in. Transactions are
// therefore fully serialized, which gives the same observable behaviour as
// row locks plus unique constraints on the Postgres store.
//
// Faults can be injected per operation to exercise rollback paths.
//
// ============================================================================

#[derive(Debug, Clone, Default)]
struct Tables {
    orders: HashMap<Uuid, Order>,
    products: HashMap<Uuid, Product>,
    carts: HashMap<Uuid, Vec<CartLine>>,
    /// Keyed by order id: one record per order.
    commissions: HashMap<Uuid, CommissionRecord>,
    earnings: Vec<VendorEarning>,
}

/// Operations that can be made to misbehave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    Begin,
    LockOrder,
    UpdateOrderStatus,
    InsertOrder,
    ReserveStock,
    ClearCart,
    InsertCommission,
    InsertVendorEarning,
    Commit,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Fault {
    /// Return `StoreError::Unavailable`.
    Fail,
    /// Sleep before carrying on normally.
    Stall(Duration),
}

#[derive(Clone, Default)]
struct FaultRegistry {
    armed: Arc<std::sync::Mutex<HashMap<FaultPoint, (Fault, u32)>>>,
}

impl FaultRegistry {
    fn arm(&self, point: FaultPoint, fault: Fault, times: u32) {
        let mut armed = self.armed.lock().unwrap_or_else(PoisonError::into_inner);
        armed.insert(point, (fault, times));
    }

    fn take(&self, point: FaultPoint) -> Option<Fault> {
        let mut armed = self.armed.lock().unwrap_or_else(PoisonError::into_inner);
        let (fault, remaining) = armed.get_mut(&point)?;
        let fault = *fault;
        *remaining -= 1;
        if *remaining == 0 {
            armed.remove(&point);
        }
        Some(fault)
    }

    async fn check(&self, point: FaultPoint) -> Result<(), StoreError> {
        match self.take(point) {
            None => Ok(()),
            Some(Fault::Fail) => Err(StoreError::Unavailable(format!(
                "injected failure at {point:?}"
            ))),
            Some(Fault::Stall(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
        }
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    faults: FaultRegistry,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `times` calls at `point` misbehave.
    pub fn inject(&self, point: FaultPoint, fault: Fault, times: u32) {
        if times > 0 {
            self.faults.arm(point, fault, times);
        }
    }

    pub async fn seed_product(&self, product: Product) {
        self.tables.lock().await.products.insert(product.id, product);
    }

    pub async fn seed_order(&self, order: Order) {
        self.tables.lock().await.orders.insert(order.id, order);
    }

    pub async fn add_to_cart(&self, user_id: Uuid, line: CartLine) {
        self.tables
            .lock()
            .await
            .carts
            .entry(user_id)
            .or_default()
            .push(line);
    }

    pub async fn order(&self, order_id: Uuid) -> Option<Order> {
        self.tables.lock().await.orders.get(&order_id).cloned()
    }

    pub async fn orders(&self) -> Vec<Order> {
        self.tables.lock().await.orders.values().cloned().collect()
    }

    pub async fn product(&self, product_id: Uuid) -> Option<Product> {
        self.tables.lock().await.products.get(&product_id).cloned()
    }

    pub async fn cart(&self, user_id: Uuid) -> Vec<CartLine> {
        self.tables
            .lock()
            .await
            .carts
            .get(&user_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn commissions(&self) -> Vec<CommissionRecord> {
        self.tables.lock().await.commissions.values().cloned().collect()
    }

    pub async fn vendor_earnings(&self) -> Vec<VendorEarning> {
        self.tables.lock().await.earnings.clone()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError> {
        self.faults.check(FaultPoint::Begin).await?;
        let guard = self.tables.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryUnitOfWork {
            guard,
            working,
            savepoints: Vec::new(),
            faults: self.faults.clone(),
        }))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

pub struct MemoryUnitOfWork {
    guard: OwnedMutexGuard<Tables>,
    working: Tables,
    savepoints: Vec<(String, Tables)>,
    faults: FaultRegistry,
}

impl MemoryUnitOfWork {
    fn savepoint_index(&self, name: &str) -> Result<usize, StoreError> {
        self.savepoints
            .iter()
            .rposition(|(n, _)| n == name)
            .ok_or_else(|| StoreError::Invalid(format!("no savepoint named {name}")))
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn lock_order(&mut self, order_id: Uuid) -> Result<Option<Order>, StoreError> {
        self.faults.check(FaultPoint::LockOrder).await?;
        Ok(self.working.orders.get(&order_id).cloned())
    }

    async fn find_order(&mut self, order_id: Uuid) -> Result<Option<Order>, StoreError> {
        Ok(self.working.orders.get(&order_id).cloned())
    }

    async fn orders_by_number(&mut self, order_number: &str) -> Result<Vec<Order>, StoreError> {
        let mut orders: Vec<Order> = self
            .working
            .orders
            .values()
            .filter(|o| o.order_number == order_number)
            .cloned()
            .collect();
        orders.sort_by_key(|o| (o.created_at, o.id));
        Ok(orders)
    }

    async fn insert_order(&mut self, order: &Order) -> Result<(), StoreError> {
        self.faults.check(FaultPoint::InsertOrder).await?;
        if self.working.orders.contains_key(&order.id) {
            return Err(StoreError::UniqueViolation("orders_pkey".to_string()));
        }
        if !self.working.products.contains_key(&order.product_id) {
            return Err(StoreError::ForeignKeyViolation("orders_product_id_fkey".to_string()));
        }
        self.working.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn update_order_status(&mut self, transition: &StatusTransition) -> Result<(), StoreError> {
        self.faults.check(FaultPoint::UpdateOrderStatus).await?;
        let order = self
            .working
            .orders
            .get_mut(&transition.order_id)
            .ok_or_else(|| StoreError::Invalid(format!("order {} vanished", transition.order_id)))?;
        transition.apply(order);
        Ok(())
    }

    async fn delete_order(&mut self, order_id: Uuid) -> Result<bool, StoreError> {
        if self.working.commissions.contains_key(&order_id) {
            return Err(StoreError::ForeignKeyViolation(
                "platform_commissions_order_id_fkey".to_string(),
            ));
        }
        Ok(self.working.orders.remove(&order_id).is_some())
    }

    async fn delivered_without_commission(&mut self, limit: i64) -> Result<Vec<Uuid>, StoreError> {
        let mut pending: Vec<&Order> = self
            .working
            .orders
            .values()
            .filter(|o| o.status == OrderStatus::Delivered)
            .filter(|o| !self.working.commissions.contains_key(&o.id))
            .collect();
        pending.sort_by_key(|o| (o.last_status_updated, o.created_at));
        Ok(pending
            .into_iter()
            .take(usize::try_from(limit).unwrap_or(0))
            .map(|o| o.id)
            .collect())
    }

    async fn find_product(&mut self, product_id: Uuid) -> Result<Option<Product>, StoreError> {
        Ok(self.working.products.get(&product_id).cloned())
    }

    async fn reserve_stock(&mut self, product_id: Uuid, quantity: i32) -> Result<bool, StoreError> {
        self.faults.check(FaultPoint::ReserveStock).await?;
        match self.working.products.get_mut(&product_id) {
            Some(product) if product.stock_quantity >= quantity => {
                product.stock_quantity -= quantity;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn cart_lines(&mut self, user_id: Uuid) -> Result<Vec<CartLine>, StoreError> {
        Ok(self.working.carts.get(&user_id).cloned().unwrap_or_default())
    }

    async fn clear_cart(&mut self, user_id: Uuid) -> Result<u64, StoreError> {
        self.faults.check(FaultPoint::ClearCart).await?;
        let removed = self.working.carts.remove(&user_id).map_or(0, |lines| lines.len());
        Ok(removed as u64)
    }

    async fn find_commission(&mut self, order_id: Uuid) -> Result<Option<CommissionRecord>, StoreError> {
        Ok(self.working.commissions.get(&order_id).cloned())
    }

    async fn insert_commission(&mut self, record: &CommissionRecord) -> Result<(), StoreError> {
        self.faults.check(FaultPoint::InsertCommission).await?;
        if self.working.commissions.contains_key(&record.order_id) {
            return Err(StoreError::UniqueViolation(
                "platform_commissions_order_id_key".to_string(),
            ));
        }
        if !self.working.orders.contains_key(&record.order_id) {
            return Err(StoreError::ForeignKeyViolation(
                "platform_commissions_order_id_fkey".to_string(),
            ));
        }
        self.working.commissions.insert(record.order_id, record.clone());
        Ok(())
    }

    async fn insert_vendor_earning(&mut self, earning: &VendorEarning) -> Result<(), StoreError> {
        self.faults.check(FaultPoint::InsertVendorEarning).await?;
        if self.working.earnings.iter().any(|e| e.order_id == earning.order_id) {
            return Err(StoreError::UniqueViolation(
                "vendor_earnings_order_id_key".to_string(),
            ));
        }
        self.working.earnings.push(earning.clone());
        Ok(())
    }

    async fn vendor_payout_summary(&mut self, vendor_id: Uuid) -> Result<VendorPayoutSummary, StoreError> {
        let mut summary = VendorPayoutSummary {
            vendor_id,
            confirmed_total: Decimal::ZERO,
            pending_total: Decimal::ZERO,
            settled_orders: 0,
        };
        for earning in self.working.earnings.iter().filter(|e| e.vendor_id == vendor_id) {
            match earning.status {
                LedgerStatus::Confirmed => {
                    summary.confirmed_total += earning.net_amount;
                    summary.settled_orders += 1;
                }
                LedgerStatus::Pending => summary.pending_total += earning.net_amount,
            }
        }
        Ok(summary)
    }

    async fn commission_summary(&mut self) -> Result<CommissionSummary, StoreError> {
        let confirmed = self
            .working
            .commissions
            .values()
            .filter(|r| r.status == LedgerStatus::Confirmed);

        let mut summary = CommissionSummary {
            settled_orders: 0,
            gross_total: Decimal::ZERO,
            commission_total: Decimal::ZERO,
            vendor_total: Decimal::ZERO,
        };
        for record in confirmed {
            summary.settled_orders += 1;
            summary.gross_total += record.total_amount;
            summary.commission_total += record.commission_amount;
            summary.vendor_total += record.vendor_amount;
        }
        Ok(summary)
    }

    async fn savepoint(&mut self, name: &str) -> Result<(), StoreError> {
        self.savepoints.push((name.to_string(), self.working.clone()));
        Ok(())
    }

    async fn release_savepoint(&mut self, name: &str) -> Result<(), StoreError> {
        let index = self.savepoint_index(name)?;
        self.savepoints.truncate(index);
        Ok(())
    }

    async fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), StoreError> {
        let index = self.savepoint_index(name)?;
        self.savepoints.truncate(index + 1);
        self.working = self.savepoints[index].1.clone();
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.faults.check(FaultPoint::Commit).await?;
        let MemoryUnitOfWork {
            mut guard, working, ..
        } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    use crate::domain::settlement::CommissionRate;

    fn product(stock: i32) -> Product {
        Product {
            id: Uuid::new_v4(),
            vendor_id: Uuid::new_v4(),
            name: "Layer hens".to_string(),
            price: dec!(20.00),
            stock_quantity: stock,
            is_active: true,
        }
    }

    #[tokio::test]
    async fn test_uncommitted_work_is_discarded() {
        let store = MemoryStore::new();
        let p = product(5);
        store.seed_product(p.clone()).await;

        {
            let mut uow = store.begin().await.unwrap();
            assert!(uow.reserve_stock(p.id, 3).await.unwrap());
            // dropped without commit
        }

        assert_eq!(store.product(p.id).await.unwrap().stock_quantity, 5);
    }

    #[tokio::test]
    async fn test_commit_publishes_changes() {
        let store = MemoryStore::new();
        let p = product(5);
        store.seed_product(p.clone()).await;

        let mut uow = store.begin().await.unwrap();
        assert!(uow.reserve_stock(p.id, 5).await.unwrap());
        assert!(!uow.reserve_stock(p.id, 1).await.unwrap());
        uow.commit().await.unwrap();

        assert_eq!(store.product(p.id).await.unwrap().stock_quantity, 0);
    }

    #[tokio::test]
    async fn test_commission_unique_per_order() {
        let store = MemoryStore::new();
        let p = product(5);
        store.seed_product(p.clone()).await;
        let order = Order::place("ORD-1", Uuid::new_v4(), &p, 1, Utc::now());
        store.seed_order(order.clone()).await;

        let split = CommissionRate::default().split(order.total_amount);
        let mut uow = store.begin().await.unwrap();
        uow.insert_commission(&CommissionRecord::confirmed(order.id, split, Utc::now()))
            .await
            .unwrap();
        let second = uow
            .insert_commission(&CommissionRecord::confirmed(order.id, split, Utc::now()))
            .await;

        assert!(matches!(second, Err(StoreError::UniqueViolation(_))));
    }

    #[tokio::test]
    async fn test_rollback_to_savepoint_restores_snapshot() {
        let store = MemoryStore::new();
        let p = product(5);
        store.seed_product(p.clone()).await;

        let mut uow = store.begin().await.unwrap();
        assert!(uow.reserve_stock(p.id, 1).await.unwrap());
        uow.savepoint("inner").await.unwrap();
        assert!(uow.reserve_stock(p.id, 2).await.unwrap());
        uow.rollback_to_savepoint("inner").await.unwrap();
        uow.release_savepoint("inner").await.unwrap();
        uow.commit().await.unwrap();

        assert_eq!(store.product(p.id).await.unwrap().stock_quantity, 4);
    }

    #[tokio::test]
    async fn test_unknown_savepoint_is_an_error() {
        let store = MemoryStore::new();
        let mut uow = store.begin().await.unwrap();
        assert!(matches!(
            uow.rollback_to_savepoint("missing").await,
            Err(StoreError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn test_injected_fault_fires_requested_times() {
        let store = MemoryStore::new();
        store.inject(FaultPoint::Begin, Fault::Fail, 2);

        assert!(store.begin().await.is_err());
        assert!(store.begin().await.is_err());
        assert!(store.begin().await.is_ok());
    }

    #[tokio::test]
    async fn test_settled_order_cannot_be_deleted() {
        let store = MemoryStore::new();
        let p = product(5);
        store.seed_product(p.clone()).await;
        let order = Order::place("ORD-1", Uuid::new_v4(), &p, 1, Utc::now());
        store.seed_order(order.clone()).await;

        let mut uow = store.begin().await.unwrap();
        let split = CommissionRate::default().split(order.total_amount);
        uow.insert_commission(&CommissionRecord::confirmed(order.id, split, Utc::now()))
            .await
            .unwrap();

        assert!(matches!(
            uow.delete_order(order.id).await,
            Err(StoreError::ForeignKeyViolation(_))
        ));
    }
}
