use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, Row};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// Economic meaning of a ledger entry.
///
/// `Settlement` entries are historical payout markers carried over from the
/// legacy books; they never contribute to balances and exist only so old
/// statements keep rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    Earning,
    Fee,
    Settlement,
    Debt,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Earning => "earning",
            EntryType::Fee => "fee",
            EntryType::Settlement => "settlement",
            EntryType::Debt => "debt",
        }
    }

    /// Whether entries of this type count toward balances and settlement sums.
    pub fn affects_balance(&self) -> bool {
        !matches!(self, EntryType::Settlement)
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EntryType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "earning" => Ok(EntryType::Earning),
            "fee" => Ok(EntryType::Fee),
            "settlement" => Ok(EntryType::Settlement),
            "debt" => Ok(EntryType::Debt),
            other => Err(AppError::Validation(format!("unknown entry type: {other}"))),
        }
    }
}

/// A single signed ledger record. Append-only: `amount` and `driver_id`
/// never change after creation, corrections are new entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub id: Uuid,
    pub driver_id: String,
    pub order_id: Option<String>,

    #[serde(rename = "type")]
    pub entry_type: EntryType,

    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,

    pub description: String,

    /// Flips to true exactly once, only through the settlement engine.
    pub is_settled: bool,
    pub settled_at: Option<DateTime<Utc>>,
    pub settlement_id: Option<Uuid>,

    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Create from database row
    pub fn from_row(row: &SqliteRow) -> AppResult<Self> {
        let id: String = row.try_get("id")?;
        let id = Uuid::parse_str(&id)
            .map_err(|_| AppError::Internal(format!("invalid entry id in ledger row: {id}")))?;

        let amount: String = row.try_get("amount")?;
        let amount = Decimal::from_str(&amount)
            .map_err(|_| AppError::Internal(format!("invalid amount in ledger row: {amount}")))?;

        let entry_type: String = row.try_get("entry_type")?;
        let entry_type = EntryType::from_str(&entry_type)?;

        let settlement_id: Option<String> = row.try_get("settlement_id")?;
        let settlement_id = settlement_id
            .map(|raw| {
                Uuid::parse_str(&raw).map_err(|_| {
                    AppError::Internal(format!("invalid settlement id in ledger row: {raw}"))
                })
            })
            .transpose()?;

        let metadata: Option<String> = row.try_get("metadata")?;
        let metadata = metadata
            .map(|raw| {
                serde_json::from_str(&raw)
                    .map_err(|e| AppError::Internal(format!("invalid entry metadata: {e}")))
            })
            .transpose()?;

        Ok(LedgerEntry {
            id,
            driver_id: row.try_get("driver_id")?,
            order_id: row.try_get("order_id")?,
            entry_type,
            amount,
            description: row.try_get("description")?,
            is_settled: row.try_get("is_settled")?,
            settled_at: row.try_get("settled_at")?,
            settlement_id,
            metadata,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// Payload for appending a new entry; id and timestamps are assigned by the
/// store.
#[derive(Debug, Clone)]
pub struct NewLedgerEntry {
    pub driver_id: String,
    pub order_id: Option<String>,
    pub entry_type: EntryType,
    pub amount: Decimal,
    pub description: String,
    pub metadata: Option<serde_json::Value>,
}

impl NewLedgerEntry {
    /// Sign convention: earnings strictly positive, fees and debts strictly
    /// negative, zero never allowed. Settlement markers may carry either sign.
    pub fn validate(&self) -> AppResult<()> {
        if self.driver_id.trim().is_empty() {
            return Err(AppError::Validation("driverId is required".to_string()));
        }
        if self.description.trim().is_empty() {
            return Err(AppError::Validation("description is required".to_string()));
        }
        if self.amount == Decimal::ZERO {
            return Err(AppError::Validation("amount must be non-zero".to_string()));
        }

        match self.entry_type {
            EntryType::Earning if self.amount < Decimal::ZERO => Err(AppError::Validation(
                "earning entries must have a positive amount".to_string(),
            )),
            EntryType::Fee | EntryType::Debt if self.amount > Decimal::ZERO => {
                Err(AppError::Validation(format!(
                    "{} entries must have a negative amount",
                    self.entry_type
                )))
            }
            _ => Ok(()),
        }
    }
}

/// A payout event covering a batch of entries. Never mutated or deleted;
/// corrections are new entries plus a new settlement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settlement {
    pub id: Uuid,
    pub driver_id: String,

    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,

    pub settled_entries: Vec<Uuid>,
    pub payment_method: Option<String>,
    pub payment_reference: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Settlement {
    /// Create from database row (entry membership is loaded separately)
    pub fn from_row(row: &SqliteRow) -> AppResult<Self> {
        let id: String = row.try_get("id")?;
        let id = Uuid::parse_str(&id)
            .map_err(|_| AppError::Internal(format!("invalid settlement id in row: {id}")))?;

        let amount: String = row.try_get("amount")?;
        let amount = Decimal::from_str(&amount).map_err(|_| {
            AppError::Internal(format!("invalid amount in settlement row: {amount}"))
        })?;

        Ok(Settlement {
            id,
            driver_id: row.try_get("driver_id")?,
            amount,
            settled_entries: Vec::new(),
            payment_method: row.try_get("payment_method")?,
            payment_reference: row.try_get("payment_reference")?,
            notes: row.try_get("notes")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// Payload for recording a settlement row.
#[derive(Debug, Clone)]
pub struct NewSettlement {
    pub driver_id: String,
    pub amount: Decimal,
    pub settled_entries: Vec<Uuid>,
    pub payment_method: Option<String>,
    pub payment_reference: Option<String>,
    pub notes: Option<String>,
}

/// Derived financial position of a driver. Never persisted; always
/// recomputed from the stored entries and settlements so it cannot drift.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverBalance {
    #[serde(with = "rust_decimal::serde::float")]
    pub total_earnings: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_fees: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_debts: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_settlements: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub current_balance: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub pending_settlement: Decimal,
    pub breakdown: BalanceBreakdown,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceBreakdown {
    #[serde(with = "rust_decimal::serde::float")]
    pub unsettled_earnings: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub unsettled_fees: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub unsettled_debts: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub net_unsettled: Decimal,
}

/// Filters applied before pagination when listing a driver's entries.
#[derive(Debug, Clone, Copy, Default)]
pub struct EntryFilter {
    pub entry_type: Option<EntryType>,
    pub settled: Option<bool>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

/// Offset-based pagination request. Page numbers are 1-based.
#[derive(Debug, Clone, Copy)]
pub struct PageRequest {
    pub page: u32,
    pub limit: u32,
}

impl PageRequest {
    pub const DEFAULT_LIMIT: u32 = 20;
    pub const MAX_LIMIT: u32 = 100;

    pub fn new(page: Option<u32>, limit: Option<u32>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            limit: limit
                .unwrap_or(Self::DEFAULT_LIMIT)
                .clamp(1, Self::MAX_LIMIT),
        }
    }

    pub fn offset(&self) -> u32 {
        (self.page - 1) * self.limit
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(None, None)
    }
}

/// One page of results plus the filtered totals the dashboards page with.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
    pub total_pages: u32,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: u64, request: PageRequest) -> Self {
        let total_pages = ((total + request.limit as u64 - 1) / request.limit as u64) as u32;
        Self {
            items,
            total,
            page: request.page,
            limit: request.limit,
            total_pages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn entry(entry_type: EntryType, amount: Decimal) -> NewLedgerEntry {
        NewLedgerEntry {
            driver_id: "drv-1".to_string(),
            order_id: None,
            entry_type,
            amount,
            description: "test entry".to_string(),
            metadata: None,
        }
    }

    #[test]
    fn entry_type_round_trips_through_strings() {
        for entry_type in [
            EntryType::Earning,
            EntryType::Fee,
            EntryType::Settlement,
            EntryType::Debt,
        ] {
            assert_eq!(EntryType::from_str(entry_type.as_str()).unwrap(), entry_type);
        }
        assert!(EntryType::from_str("payout").is_err());
    }

    #[test]
    fn sign_convention_is_enforced() {
        assert!(entry(EntryType::Earning, dec!(12.50)).validate().is_ok());
        assert!(entry(EntryType::Fee, dec!(-3.25)).validate().is_ok());
        assert!(entry(EntryType::Debt, dec!(-40)).validate().is_ok());

        assert!(entry(EntryType::Earning, dec!(-1)).validate().is_err());
        assert!(entry(EntryType::Fee, dec!(2)).validate().is_err());
        assert!(entry(EntryType::Debt, dec!(0.01)).validate().is_err());
        assert!(entry(EntryType::Earning, dec!(0)).validate().is_err());
    }

    #[test]
    fn settlement_markers_accept_either_sign() {
        assert!(entry(EntryType::Settlement, dec!(-10)).validate().is_ok());
        assert!(entry(EntryType::Settlement, dec!(10)).validate().is_ok());
        assert!(!EntryType::Settlement.affects_balance());
    }

    #[test]
    fn missing_driver_or_description_is_rejected() {
        let mut new = entry(EntryType::Earning, dec!(5));
        new.driver_id = "  ".to_string();
        assert!(new.validate().is_err());

        let mut new = entry(EntryType::Earning, dec!(5));
        new.description = String::new();
        assert!(new.validate().is_err());
    }

    #[test]
    fn page_math_covers_partial_pages() {
        let request = PageRequest::new(Some(2), Some(10));
        assert_eq!(request.offset(), 10);

        let page = Page::new(vec![1, 2, 3], 23, request);
        assert_eq!(page.total_pages, 3);

        let empty: Page<i32> = Page::new(Vec::new(), 0, PageRequest::default());
        assert_eq!(empty.total_pages, 0);
    }
}
