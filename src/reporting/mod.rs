//! Read-side aggregation for operator dashboards.
//!
//! Pure reads over ledger snapshots; introduces no invariants of its own.
//! Unknown drivers and empty periods produce empty data, never errors.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{AppError, AppResult};
use crate::ledger::models::{EntryType, LedgerEntry, Settlement};
use crate::ledger::repository::LedgerRepository;

const TOP_DRIVER_LIMIT: usize = 5;
const RECENT_ACTIVITY_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryPeriod {
    Today,
    Week,
    Month,
    All,
}

impl SummaryPeriod {
    pub fn parse(raw: Option<&str>) -> AppResult<Self> {
        match raw {
            None | Some("all") => Ok(SummaryPeriod::All),
            Some("today") => Ok(SummaryPeriod::Today),
            Some("week") => Ok(SummaryPeriod::Week),
            Some("month") => Ok(SummaryPeriod::Month),
            Some(other) => Err(AppError::Validation(format!(
                "unknown summary period: {other}"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SummaryPeriod::Today => "today",
            SummaryPeriod::Week => "week",
            SummaryPeriod::Month => "month",
            SummaryPeriod::All => "all",
        }
    }

    /// Earliest `created_at` included in the summary window.
    pub fn cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            SummaryPeriod::Today => now
                .date_naive()
                .and_hms_opt(0, 0, 0)
                .map(|midnight| midnight.and_utc()),
            SummaryPeriod::Week => Some(now - Duration::days(7)),
            SummaryPeriod::Month => Some(now - Duration::days(30)),
            SummaryPeriod::All => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerSummary {
    pub period: String,
    pub driver_count: usize,
    pub totals: MarketplaceTotals,
    pub top_drivers: Vec<DriverPending>,
    pub recent_activity: Vec<LedgerEntry>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketplaceTotals {
    #[serde(with = "rust_decimal::serde::float")]
    pub total_earnings: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_fees: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_debts: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_settlements: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub outstanding_unsettled: Decimal,
    pub entry_count: usize,
    pub settlement_count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverPending {
    pub driver_id: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub pending_settlement: Decimal,
    pub unsettled_entries: usize,
}

/// Aggregate a snapshot into the dashboard summary. Entries are expected
/// newest-first, as the repository returns them.
pub fn summarize(
    period: SummaryPeriod,
    entries: &[LedgerEntry],
    settlements: &[Settlement],
) -> LedgerSummary {
    let mut total_earnings = Decimal::ZERO;
    let mut total_fees = Decimal::ZERO;
    let mut total_debts = Decimal::ZERO;
    let mut outstanding_unsettled = Decimal::ZERO;

    let mut per_driver: BTreeMap<&str, (Decimal, usize)> = BTreeMap::new();
    let mut drivers: BTreeSet<&str> = BTreeSet::new();

    for entry in entries {
        drivers.insert(&entry.driver_id);

        match entry.entry_type {
            EntryType::Earning => total_earnings += entry.amount,
            EntryType::Fee => total_fees += entry.amount,
            EntryType::Debt => total_debts += entry.amount,
            EntryType::Settlement => continue,
        }

        if !entry.is_settled {
            outstanding_unsettled += entry.amount;
            let slot = per_driver.entry(&entry.driver_id).or_default();
            slot.0 += entry.amount;
            slot.1 += 1;
        }
    }

    let mut top_drivers: Vec<DriverPending> = per_driver
        .into_iter()
        .map(|(driver_id, (pending, count))| DriverPending {
            driver_id: driver_id.to_string(),
            pending_settlement: pending,
            unsettled_entries: count,
        })
        .collect();
    top_drivers.sort_by(|a, b| {
        b.pending_settlement
            .cmp(&a.pending_settlement)
            .then_with(|| a.driver_id.cmp(&b.driver_id))
    });
    top_drivers.truncate(TOP_DRIVER_LIMIT);

    LedgerSummary {
        period: period.as_str().to_string(),
        driver_count: drivers.len(),
        totals: MarketplaceTotals {
            total_earnings,
            total_fees,
            total_debts,
            total_settlements: settlements.iter().map(|s| s.amount).sum(),
            outstanding_unsettled,
            entry_count: entries.len(),
            settlement_count: settlements.len(),
        },
        top_drivers,
        recent_activity: entries.iter().take(RECENT_ACTIVITY_LIMIT).cloned().collect(),
    }
}

pub async fn build_summary(
    repo: &LedgerRepository,
    period: SummaryPeriod,
) -> AppResult<LedgerSummary> {
    let cutoff = period.cutoff(Utc::now());
    let (entries, settlements) = repo.ledger_snapshot_since(cutoff).await?;
    Ok(summarize(period, &entries, &settlements))
}
