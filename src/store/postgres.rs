use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::domain::order::{CartLine, Order, Product, StatusTransition};
use crate::domain::settlement::{
    CommissionRecord, CommissionSummary, LedgerStatus, VendorEarning, VendorPayoutSummary,
};
use super::{Store, StoreError, UnitOfWork};

// ============================================================================
// Postgres Store
// ============================================================================
//
// Concurrency guarantees come from the database:
// - `lock_order` uses SELECT ... FOR UPDATE, serializing transitions per row
// - platform_commissions.order_id is UNIQUE, so racing settlements collide
// - stock is decremented with a conditional UPDATE, never read-then-write
//
// ============================================================================

const ORDER_COLUMNS: &str = "id, order_number, user_id, product_id, vendor_id, quantity, \
     total_amount, status, payment_status, status_notes, created_at, updated_at, \
     last_status_updated";

const COMMISSION_COLUMNS: &str =
    "id, order_id, total_amount, commission_amount, vendor_amount, status, created_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgUnitOfWork { tx }))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

pub struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

// ============================================================================
// Row Mapping
// ============================================================================

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    order_number: String,
    user_id: Uuid,
    product_id: Uuid,
    vendor_id: Uuid,
    quantity: i32,
    total_amount: Decimal,
    status: String,
    payment_status: String,
    status_notes: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    last_status_updated: Option<DateTime<Utc>>,
}

impl TryFrom<OrderRow> for Order {
    type Error = StoreError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        Ok(Order {
            id: row.id,
            order_number: row.order_number,
            user_id: row.user_id,
            product_id: row.product_id,
            vendor_id: row.vendor_id,
            quantity: row.quantity,
            total_amount: row.total_amount,
            status: row.status.parse().map_err(invalid)?,
            payment_status: row.payment_status.parse().map_err(invalid)?,
            status_notes: row.status_notes,
            created_at: row.created_at,
            updated_at: row.updated_at,
            last_status_updated: row.last_status_updated,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CommissionRow {
    id: Uuid,
    order_id: Uuid,
    total_amount: Decimal,
    commission_amount: Decimal,
    vendor_amount: Decimal,
    status: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<CommissionRow> for CommissionRecord {
    type Error = StoreError;

    fn try_from(row: CommissionRow) -> Result<Self, Self::Error> {
        Ok(CommissionRecord {
            id: row.id,
            order_id: row.order_id,
            total_amount: row.total_amount,
            commission_amount: row.commission_amount,
            vendor_amount: row.vendor_amount,
            status: row.status.parse().map_err(invalid)?,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ProductRow {
    id: Uuid,
    vendor_id: Uuid,
    name: String,
    price: Decimal,
    stock_quantity: i32,
    is_active: bool,
}

impl From<ProductRow> for Product {
    fn from(row: ProductRow) -> Self {
        Product {
            id: row.id,
            vendor_id: row.vendor_id,
            name: row.name,
            price: row.price,
            stock_quantity: row.stock_quantity,
            is_active: row.is_active,
        }
    }
}

fn invalid(err: impl std::fmt::Display) -> StoreError {
    StoreError::Invalid(err.to_string())
}

/// Savepoint names are interpolated into SQL, so only identifiers pass.
fn savepoint_ident(name: &str) -> Result<&str, StoreError> {
    let valid = !name.is_empty()
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit());
    if valid {
        Ok(name)
    } else {
        Err(StoreError::Invalid(format!("bad savepoint name {name:?}")))
    }
}

// ============================================================================
// Unit of Work
// ============================================================================

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn lock_order(&mut self, order_id: Uuid) -> Result<Option<Order>, StoreError> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 FOR UPDATE");
        let row = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(order_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.map(Order::try_from).transpose()
    }

    async fn find_order(&mut self, order_id: Uuid) -> Result<Option<Order>, StoreError> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1");
        let row = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(order_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.map(Order::try_from).transpose()
    }

    async fn orders_by_number(&mut self, order_number: &str) -> Result<Vec<Order>, StoreError> {
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE order_number = $1 ORDER BY created_at, id"
        );
        let rows = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(order_number)
            .fetch_all(&mut *self.tx)
            .await?;
        rows.into_iter().map(Order::try_from).collect()
    }

    async fn insert_order(&mut self, order: &Order) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO orders (
                id, order_number, user_id, product_id, vendor_id, quantity,
                total_amount, status, payment_status, status_notes,
                created_at, updated_at, last_status_updated
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(order.id)
        .bind(&order.order_number)
        .bind(order.user_id)
        .bind(order.product_id)
        .bind(order.vendor_id)
        .bind(order.quantity)
        .bind(order.total_amount)
        .bind(order.status.as_str())
        .bind(order.payment_status.as_str())
        .bind(&order.status_notes)
        .bind(order.created_at)
        .bind(order.updated_at)
        .bind(order.last_status_updated)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_order_status(&mut self, transition: &StatusTransition) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE orders
             SET status = $2,
                 payment_status = $3,
                 status_notes = COALESCE($4, status_notes),
                 updated_at = $5,
                 last_status_updated = $5
             WHERE id = $1 AND status = $6",
        )
        .bind(transition.order_id)
        .bind(transition.to.as_str())
        .bind(transition.payment_status.as_str())
        .bind(&transition.notes)
        .bind(transition.at)
        .bind(transition.from.as_str())
        .execute(&mut *self.tx)
        .await?;

        // The row is locked, so a miss means the caller skipped lock_order.
        if result.rows_affected() != 1 {
            return Err(StoreError::Invalid(format!(
                "order {} was not in status {}",
                transition.order_id, transition.from
            )));
        }
        Ok(())
    }

    async fn delete_order(&mut self, order_id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM orders WHERE id = $1")
            .bind(order_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delivered_without_commission(&mut self, limit: i64) -> Result<Vec<Uuid>, StoreError> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            "SELECT o.id
             FROM orders o
             LEFT JOIN platform_commissions c ON c.order_id = o.id
             WHERE o.status = 'delivered' AND c.order_id IS NULL
             ORDER BY o.last_status_updated NULLS FIRST, o.created_at
             LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(ids)
    }

    async fn find_product(&mut self, product_id: Uuid) -> Result<Option<Product>, StoreError> {
        let row = sqlx::query_as::<_, ProductRow>(
            "SELECT id, vendor_id, name, price, stock_quantity, is_active
             FROM products WHERE id = $1",
        )
        .bind(product_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(Product::from))
    }

    async fn reserve_stock(&mut self, product_id: Uuid, quantity: i32) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE products
             SET stock_quantity = stock_quantity - $2
             WHERE id = $1 AND stock_quantity >= $2",
        )
        .bind(product_id)
        .bind(quantity)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn cart_lines(&mut self, user_id: Uuid) -> Result<Vec<CartLine>, StoreError> {
        let rows = sqlx::query_as::<_, (Uuid, i32)>(
            "SELECT product_id, quantity FROM cart_items WHERE user_id = $1 ORDER BY added_at, id",
        )
        .bind(user_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(product_id, quantity)| CartLine { product_id, quantity })
            .collect())
    }

    async fn clear_cart(&mut self, user_id: Uuid) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM cart_items WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn find_commission(&mut self, order_id: Uuid) -> Result<Option<CommissionRecord>, StoreError> {
        let sql = format!("SELECT {COMMISSION_COLUMNS} FROM platform_commissions WHERE order_id = $1");
        let row = sqlx::query_as::<_, CommissionRow>(&sql)
            .bind(order_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.map(CommissionRecord::try_from).transpose()
    }

    async fn insert_commission(&mut self, record: &CommissionRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO platform_commissions (
                id, order_id, total_amount, commission_amount, vendor_amount, status, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(record.id)
        .bind(record.order_id)
        .bind(record.total_amount)
        .bind(record.commission_amount)
        .bind(record.vendor_amount)
        .bind(record.status.as_str())
        .bind(record.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_vendor_earning(&mut self, earning: &VendorEarning) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO vendor_earnings (id, vendor_id, order_id, net_amount, status, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(earning.id)
        .bind(earning.vendor_id)
        .bind(earning.order_id)
        .bind(earning.net_amount)
        .bind(earning.status.as_str())
        .bind(earning.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn vendor_payout_summary(&mut self, vendor_id: Uuid) -> Result<VendorPayoutSummary, StoreError> {
        let (confirmed_total, pending_total, settled_orders) =
            sqlx::query_as::<_, (Decimal, Decimal, i64)>(
                "SELECT
                    COALESCE(SUM(net_amount) FILTER (WHERE status = $2), 0),
                    COALESCE(SUM(net_amount) FILTER (WHERE status = $3), 0),
                    COUNT(*) FILTER (WHERE status = $2)
                 FROM vendor_earnings
                 WHERE vendor_id = $1",
            )
            .bind(vendor_id)
            .bind(LedgerStatus::Confirmed.as_str())
            .bind(LedgerStatus::Pending.as_str())
            .fetch_one(&mut *self.tx)
            .await?;

        Ok(VendorPayoutSummary {
            vendor_id,
            confirmed_total,
            pending_total,
            settled_orders,
        })
    }

    async fn commission_summary(&mut self) -> Result<CommissionSummary, StoreError> {
        let (settled_orders, gross_total, commission_total, vendor_total) =
            sqlx::query_as::<_, (i64, Decimal, Decimal, Decimal)>(
                "SELECT
                    COUNT(*),
                    COALESCE(SUM(total_amount), 0),
                    COALESCE(SUM(commission_amount), 0),
                    COALESCE(SUM(vendor_amount), 0)
                 FROM platform_commissions
                 WHERE status = $1",
            )
            .bind(LedgerStatus::Confirmed.as_str())
            .fetch_one(&mut *self.tx)
            .await?;

        Ok(CommissionSummary {
            settled_orders,
            gross_total,
            commission_total,
            vendor_total,
        })
    }

    async fn savepoint(&mut self, name: &str) -> Result<(), StoreError> {
        let sql = format!("SAVEPOINT {}", savepoint_ident(name)?);
        sqlx::query(&sql).execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn release_savepoint(&mut self, name: &str) -> Result<(), StoreError> {
        let sql = format!("RELEASE SAVEPOINT {}", savepoint_ident(name)?);
        sqlx::query(&sql).execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), StoreError> {
        let sql = format!("ROLLBACK TO SAVEPOINT {}", savepoint_ident(name)?);
        sqlx::query(&sql).execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_savepoint_names_are_identifiers() {
        assert!(savepoint_ident("settlement").is_ok());
        assert!(savepoint_ident("settle_2").is_ok());
        assert!(savepoint_ident("").is_err());
        assert!(savepoint_ident("2fast").is_err());
        assert!(savepoint_ident("x; DROP TABLE orders").is_err());
    }

    #[test]
    fn test_order_row_with_unknown_status_is_rejected() {
        let now = Utc::now();
        let row = OrderRow {
            id: Uuid::new_v4(),
            order_number: "ORD-1".to_string(),
            user_id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            vendor_id: Uuid::new_v4(),
            quantity: 1,
            total_amount: Decimal::ONE,
            status: "refunded".to_string(),
            payment_status: "paid".to_string(),
            status_notes: None,
            created_at: now,
            updated_at: now,
            last_status_updated: None,
        };

        assert!(matches!(Order::try_from(row), Err(StoreError::Invalid(_))));
    }

    // Queries against a live database are exercised by the service against
    // the schema in migrations/; unit tests cover the in-memory store.
}
