//! Pure derivation of a driver's financial position.
//!
//! Balances are never stored. Every read recomputes from a snapshot of the
//! driver's entries and settlements, so the figure can never drift from the
//! ledger the way a cached running total would.

use rust_decimal::Decimal;

use super::models::{BalanceBreakdown, DriverBalance, EntryType, LedgerEntry, Settlement};
use super::repository::LedgerRepository;
use crate::error::AppResult;

/// Compute a driver's balance from a consistent snapshot.
///
/// `current_balance` is additive over signed amounts (fees and debts are
/// stored negative) minus the total already paid out. Settlement-type marker
/// entries are excluded everywhere.
pub fn compute_balance(entries: &[LedgerEntry], settlements: &[Settlement]) -> DriverBalance {
    let mut total_earnings = Decimal::ZERO;
    let mut total_fees = Decimal::ZERO;
    let mut total_debts = Decimal::ZERO;

    let mut unsettled_earnings = Decimal::ZERO;
    let mut unsettled_fees = Decimal::ZERO;
    let mut unsettled_debts = Decimal::ZERO;

    for entry in entries {
        match entry.entry_type {
            EntryType::Earning => {
                total_earnings += entry.amount;
                if !entry.is_settled {
                    unsettled_earnings += entry.amount;
                }
            }
            EntryType::Fee => {
                total_fees += entry.amount;
                if !entry.is_settled {
                    unsettled_fees += entry.amount;
                }
            }
            EntryType::Debt => {
                total_debts += entry.amount;
                if !entry.is_settled {
                    unsettled_debts += entry.amount;
                }
            }
            EntryType::Settlement => {}
        }
    }

    let total_settlements: Decimal = settlements.iter().map(|s| s.amount).sum();
    let net_unsettled = unsettled_earnings + unsettled_fees + unsettled_debts;

    DriverBalance {
        total_earnings,
        total_fees,
        total_debts,
        total_settlements,
        current_balance: total_earnings + total_fees + total_debts - total_settlements,
        pending_settlement: net_unsettled,
        breakdown: BalanceBreakdown {
            unsettled_earnings,
            unsettled_fees,
            unsettled_debts,
            net_unsettled,
        },
    }
}

/// Snapshot-and-compute for one driver. A driver with no rows gets a
/// zero-valued balance, never an error.
pub async fn balance_for_driver(
    repo: &LedgerRepository,
    driver_id: &str,
) -> AppResult<DriverBalance> {
    let (entries, settlements) = repo.driver_snapshot(driver_id).await?;
    Ok(compute_balance(&entries, &settlements))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn entry(entry_type: EntryType, amount: Decimal, is_settled: bool) -> LedgerEntry {
        LedgerEntry {
            id: Uuid::new_v4(),
            driver_id: "drv-1".to_string(),
            order_id: None,
            entry_type,
            amount,
            description: "test".to_string(),
            is_settled,
            settled_at: is_settled.then(Utc::now),
            settlement_id: None,
            metadata: None,
            created_at: Utc::now(),
        }
    }

    fn settlement(amount: Decimal) -> Settlement {
        Settlement {
            id: Uuid::new_v4(),
            driver_id: "drv-1".to_string(),
            amount,
            settled_entries: Vec::new(),
            payment_method: None,
            payment_reference: None,
            notes: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn empty_ledger_yields_zero_balance() {
        let balance = compute_balance(&[], &[]);
        assert_eq!(balance.current_balance, Decimal::ZERO);
        assert_eq!(balance.pending_settlement, Decimal::ZERO);
        assert_eq!(balance.breakdown.net_unsettled, Decimal::ZERO);
    }

    #[test]
    fn earn_and_fee_produce_net_pending() {
        let entries = vec![
            entry(EntryType::Earning, dec!(15.50), false),
            entry(EntryType::Fee, dec!(-5.00), false),
        ];

        let balance = compute_balance(&entries, &[]);
        assert_eq!(balance.current_balance, dec!(10.50));
        assert_eq!(balance.pending_settlement, dec!(10.50));
        assert_eq!(balance.breakdown.unsettled_earnings, dec!(15.50));
        assert_eq!(balance.breakdown.unsettled_fees, dec!(-5.00));
    }

    #[test]
    fn settling_moves_pending_without_touching_current_balance() {
        let entries = vec![
            entry(EntryType::Earning, dec!(15.50), true),
            entry(EntryType::Fee, dec!(-5.00), true),
        ];
        let settlements = vec![settlement(dec!(10.50))];

        let balance = compute_balance(&entries, &settlements);
        // amount paid out equals the net the entries carried, so the overall
        // position is unchanged by the bookkeeping
        assert_eq!(balance.current_balance, Decimal::ZERO);
        assert_eq!(balance.total_settlements, dec!(10.50));
        assert_eq!(balance.pending_settlement, Decimal::ZERO);
    }

    #[test]
    fn settlement_markers_are_ignored() {
        let entries = vec![
            entry(EntryType::Earning, dec!(20), false),
            entry(EntryType::Settlement, dec!(-500), false),
        ];

        let balance = compute_balance(&entries, &[]);
        assert_eq!(balance.current_balance, dec!(20));
        assert_eq!(balance.pending_settlement, dec!(20));
    }

    #[test]
    fn debts_reduce_both_current_and_pending() {
        let entries = vec![
            entry(EntryType::Earning, dec!(100), false),
            entry(EntryType::Debt, dec!(-30), false),
        ];

        let balance = compute_balance(&entries, &[]);
        assert_eq!(balance.current_balance, dec!(70));
        assert_eq!(balance.pending_settlement, dec!(70));
        assert_eq!(balance.breakdown.unsettled_debts, dec!(-30));
    }

    #[test]
    fn computation_is_reference_transparent() {
        let entries = vec![
            entry(EntryType::Earning, dec!(42.42), false),
            entry(EntryType::Fee, dec!(-0.42), true),
        ];
        let settlements = vec![settlement(dec!(1))];

        assert_eq!(
            compute_balance(&entries, &settlements),
            compute_balance(&entries, &settlements)
        );
    }
}
