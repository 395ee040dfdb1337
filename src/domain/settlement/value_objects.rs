use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::order::ParseStatusError;

// ============================================================================
// Settlement Value Objects
// ============================================================================

/// Platform share of a delivered order's value, as a fraction in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionRate(Decimal);

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("commission rate must be between 0 and 1, got {0}")]
pub struct InvalidCommissionRate(pub Decimal);

impl CommissionRate {
    pub fn new(rate: Decimal) -> Result<Self, InvalidCommissionRate> {
        if rate < Decimal::ZERO || rate > Decimal::ONE {
            return Err(InvalidCommissionRate(rate));
        }
        Ok(Self(rate))
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    /// Split `total` into platform and vendor shares.
    ///
    /// Only the commission is rounded (2 places, half away from zero); the
    /// vendor share is the remainder, so the two always sum to `total`.
    pub fn split(&self, total: Decimal) -> CommissionSplit {
        let commission_amount =
            (total * self.0).round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
        CommissionSplit {
            total_amount: total,
            commission_amount,
            vendor_amount: total - commission_amount,
        }
    }
}

impl Default for CommissionRate {
    fn default() -> Self {
        Self(Decimal::new(10, 2))
    }
}

impl fmt::Display for CommissionRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommissionSplit {
    pub total_amount: Decimal,
    pub commission_amount: Decimal,
    pub vendor_amount: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerStatus {
    Pending,
    Confirmed,
}

impl LedgerStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            LedgerStatus::Pending => "pending",
            LedgerStatus::Confirmed => "confirmed",
        }
    }
}

impl fmt::Display for LedgerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LedgerStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(LedgerStatus::Pending),
            "confirmed" => Ok(LedgerStatus::Confirmed),
            other => Err(ParseStatusError::new("ledger status", other)),
        }
    }
}

/// Immutable result of settling one order. At most one exists per order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommissionRecord {
    pub id: Uuid,
    pub order_id: Uuid,
    pub total_amount: Decimal,
    pub commission_amount: Decimal,
    pub vendor_amount: Decimal,
    pub status: LedgerStatus,
    pub created_at: DateTime<Utc>,
}

impl CommissionRecord {
    pub fn confirmed(order_id: Uuid, split: CommissionSplit, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id,
            total_amount: split.total_amount,
            commission_amount: split.commission_amount,
            vendor_amount: split.vendor_amount,
            status: LedgerStatus::Confirmed,
            created_at: now,
        }
    }
}

/// Vendor-scoped credit for a settled order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VendorEarning {
    pub id: Uuid,
    pub vendor_id: Uuid,
    pub order_id: Uuid,
    pub net_amount: Decimal,
    pub status: LedgerStatus,
    pub created_at: DateTime<Utc>,
}

impl VendorEarning {
    pub fn for_record(vendor_id: Uuid, record: &CommissionRecord) -> Self {
        Self {
            id: Uuid::new_v4(),
            vendor_id,
            order_id: record.order_id,
            net_amount: record.vendor_amount,
            status: record.status,
            created_at: record.created_at,
        }
    }
}

/// Payout totals for one vendor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VendorPayoutSummary {
    pub vendor_id: Uuid,
    pub confirmed_total: Decimal,
    pub pending_total: Decimal,
    pub settled_orders: i64,
}

/// Platform-wide totals over confirmed commission records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommissionSummary {
    pub settled_orders: i64,
    pub gross_total: Decimal,
    pub commission_total: Decimal,
    pub vendor_total: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_rate_is_ten_percent() {
        assert_eq!(CommissionRate::default().value(), dec!(0.10));
    }

    #[test]
    fn test_split_of_one_thousand() {
        let split = CommissionRate::default().split(dec!(1000));
        assert_eq!(split.commission_amount, dec!(100.00));
        assert_eq!(split.vendor_amount, dec!(900.00));
    }

    #[test]
    fn test_split_of_two_fifty() {
        let split = CommissionRate::default().split(dec!(250.00));
        assert_eq!(split.commission_amount, dec!(25.00));
        assert_eq!(split.vendor_amount, dec!(225.00));
    }

    #[test]
    fn test_split_rounds_half_away_from_zero() {
        // 0.10 * 0.25 = 0.025
        let split = CommissionRate::default().split(dec!(0.25));
        assert_eq!(split.commission_amount, dec!(0.03));
        assert_eq!(split.vendor_amount, dec!(0.22));
    }

    #[test]
    fn test_split_always_sums_to_total() {
        let rate = CommissionRate::new(dec!(0.07)).unwrap();
        for cents in [1_i64, 7, 99, 1_001, 33_333, 123_457] {
            let total = Decimal::new(cents, 2);
            let split = rate.split(total);
            assert_eq!(split.commission_amount + split.vendor_amount, total);
            assert_eq!(split.commission_amount.scale(), 2);
        }
    }

    #[test]
    fn test_rate_bounds() {
        assert!(CommissionRate::new(dec!(-0.01)).is_err());
        assert!(CommissionRate::new(dec!(1.01)).is_err());
        assert!(CommissionRate::new(dec!(0)).is_ok());
        assert!(CommissionRate::new(dec!(1)).is_ok());
    }

    #[test]
    fn test_earning_mirrors_record() {
        let record = CommissionRecord::confirmed(
            Uuid::new_v4(),
            CommissionRate::default().split(dec!(80.00)),
            Utc::now(),
        );
        let vendor_id = Uuid::new_v4();
        let earning = VendorEarning::for_record(vendor_id, &record);

        assert_eq!(earning.net_amount, dec!(72.00));
        assert_eq!(earning.order_id, record.order_id);
        assert_eq!(earning.status, LedgerStatus::Confirmed);
    }
}
