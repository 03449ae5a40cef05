use futures::future::join_all;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::engine::{PaymentDetails, SettlementEngine};
use crate::error::AppResult;
use crate::ledger::balance::compute_balance;
use crate::ledger::models::Settlement;
use crate::ledger::repository::LedgerRepository;

/// Outcome of a threshold-driven settlement attempt. Being below the
/// threshold is an expected result, not a failure.
#[derive(Debug)]
pub enum AutoSettleOutcome {
    Settled(Settlement),
    NoOp {
        reason: NoOpReason,
        pending: Decimal,
        min_amount: Decimal,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoOpReason {
    BelowThreshold,
    NothingUnsettled,
}

impl NoOpReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            NoOpReason::BelowThreshold => "below_threshold",
            NoOpReason::NothingUnsettled => "nothing_unsettled",
        }
    }
}

/// Totals from one cross-driver sweep.
#[derive(Debug, Default)]
pub struct SweepReport {
    pub settled: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Threshold policy over the settlement engine: once a driver's unsettled
/// balance reaches the minimum, settle the full unsettled set in one payout.
///
/// The policy never selects a subset. Concurrent invocations for the same
/// driver serialize on the engine's entry-level conflict check: the second
/// caller loses on entries the first already claimed.
pub struct AutoSettlePolicy {
    repo: Arc<LedgerRepository>,
    engine: Arc<SettlementEngine>,
}

impl AutoSettlePolicy {
    pub fn new(repo: Arc<LedgerRepository>, engine: Arc<SettlementEngine>) -> Self {
        Self { repo, engine }
    }

    pub async fn auto_settle(
        &self,
        driver_id: &str,
        min_amount: Decimal,
    ) -> AppResult<AutoSettleOutcome> {
        let (entries, settlements) = self.repo.driver_snapshot(driver_id).await?;
        let pending = compute_balance(&entries, &settlements).pending_settlement;

        if pending < min_amount {
            return Ok(AutoSettleOutcome::NoOp {
                reason: NoOpReason::BelowThreshold,
                pending,
                min_amount,
            });
        }

        let unsettled: Vec<_> = entries
            .iter()
            .filter(|e| !e.is_settled && e.entry_type.affects_balance())
            .collect();

        // A settlement must reference at least one entry and pay out a
        // positive amount; with nothing (or a non-positive net) to pay out
        // the threshold being met is moot.
        if unsettled.is_empty() || pending <= Decimal::ZERO {
            return Ok(AutoSettleOutcome::NoOp {
                reason: NoOpReason::NothingUnsettled,
                pending,
                min_amount,
            });
        }

        let entry_ids: Vec<Uuid> = unsettled.iter().map(|e| e.id).collect();
        let amount: Decimal = unsettled.iter().map(|e| e.amount).sum();

        // the amount is the entry sum by construction, so reconciliation
        // holds; the payment reference is filled in later by the payout rail
        let settlement = self
            .engine
            .settle(driver_id, &entry_ids, amount, PaymentDetails::default())
            .await?;

        Ok(AutoSettleOutcome::Settled(settlement))
    }

    /// Apply the policy to every driver with unsettled entries. Per-driver
    /// failures are logged and counted; they never stop the sweep.
    pub async fn sweep(&self, min_amount: Decimal) -> SweepReport {
        let drivers = match self.repo.drivers_with_unsettled().await {
            Ok(drivers) => drivers,
            Err(e) => {
                warn!("Auto-settlement sweep could not list drivers: {e}");
                return SweepReport::default();
            }
        };

        let outcomes = join_all(
            drivers
                .iter()
                .map(|driver_id| self.auto_settle(driver_id, min_amount)),
        )
        .await;

        let mut report = SweepReport::default();
        for (driver_id, outcome) in drivers.iter().zip(outcomes) {
            match outcome {
                Ok(AutoSettleOutcome::Settled(settlement)) => {
                    info!(
                        "💸 Auto-settled driver {}: {} across {} entries",
                        driver_id,
                        settlement.amount,
                        settlement.settled_entries.len()
                    );
                    report.settled += 1;
                }
                Ok(AutoSettleOutcome::NoOp { .. }) => report.skipped += 1,
                Err(e) => {
                    warn!("Auto-settlement failed for driver {driver_id}: {e}");
                    report.failed += 1;
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::balance::balance_for_driver;
    use crate::ledger::models::PageRequest;
    use crate::ledger::testutil;
    use crate::notify::NoopNotifier;
    use rust_decimal_macros::dec;

    async fn policy_with_repo() -> (AutoSettlePolicy, Arc<LedgerRepository>) {
        let repo = Arc::new(LedgerRepository::new(testutil::memory_pool().await));
        let engine = Arc::new(SettlementEngine::new(repo.clone(), Arc::new(NoopNotifier)));
        (AutoSettlePolicy::new(repo.clone(), engine), repo)
    }

    #[tokio::test]
    async fn below_threshold_is_a_no_op() {
        let (policy, repo) = policy_with_repo().await;
        repo.append(testutil::earning("drv-1", dec!(30))).await.unwrap();

        let outcome = policy.auto_settle("drv-1", dec!(50)).await.unwrap();
        assert!(matches!(
            outcome,
            AutoSettleOutcome::NoOp {
                reason: NoOpReason::BelowThreshold,
                ..
            }
        ));

        let settlements = repo
            .list_settlements("drv-1", PageRequest::default())
            .await
            .unwrap();
        assert_eq!(settlements.total, 0);
        let balance = balance_for_driver(&repo, "drv-1").await.unwrap();
        assert_eq!(balance.pending_settlement, dec!(30));
    }

    #[tokio::test]
    async fn at_threshold_settles_the_full_unsettled_set() {
        let (policy, repo) = policy_with_repo().await;
        repo.append(testutil::earning("drv-1", dec!(45))).await.unwrap();
        repo.append(testutil::debt("drv-1", dec!(-5))).await.unwrap();
        repo.append(testutil::earning("drv-1", dec!(10))).await.unwrap();

        let outcome = policy.auto_settle("drv-1", dec!(50)).await.unwrap();
        let AutoSettleOutcome::Settled(settlement) = outcome else {
            panic!("expected a settlement");
        };

        assert_eq!(settlement.amount, dec!(50));
        assert_eq!(settlement.settled_entries.len(), 3);
        assert!(settlement.payment_reference.is_none());

        let balance = balance_for_driver(&repo, "drv-1").await.unwrap();
        assert_eq!(balance.pending_settlement, Decimal::ZERO);
        assert_eq!(balance.current_balance, Decimal::ZERO);
    }

    #[tokio::test]
    async fn empty_ledger_is_a_no_op_even_with_zero_threshold() {
        let (policy, repo) = policy_with_repo().await;

        let outcome = policy.auto_settle("drv-ghost", dec!(0)).await.unwrap();
        assert!(matches!(
            outcome,
            AutoSettleOutcome::NoOp {
                reason: NoOpReason::NothingUnsettled,
                ..
            }
        ));

        let settlements = repo
            .list_settlements("drv-ghost", PageRequest::default())
            .await
            .unwrap();
        assert_eq!(settlements.total, 0);
    }

    #[tokio::test]
    async fn sweep_settles_every_driver_over_threshold() {
        let (policy, repo) = policy_with_repo().await;
        repo.append(testutil::earning("drv-1", dec!(80))).await.unwrap();
        repo.append(testutil::earning("drv-2", dec!(120))).await.unwrap();
        repo.append(testutil::earning("drv-3", dec!(10))).await.unwrap();

        let report = policy.sweep(dec!(50)).await;
        assert_eq!(report.settled, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.failed, 0);

        for driver_id in ["drv-1", "drv-2"] {
            let balance = balance_for_driver(&repo, driver_id).await.unwrap();
            assert_eq!(balance.pending_settlement, Decimal::ZERO);
        }
        let small = balance_for_driver(&repo, "drv-3").await.unwrap();
        assert_eq!(small.pending_settlement, dec!(10));
    }
}
