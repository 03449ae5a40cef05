use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::error::{AppError, AppResult, ConflictError, ReconciliationError};
use crate::ledger::models::{NewSettlement, Settlement};
use crate::ledger::repository::LedgerRepository;
use crate::notify::NotificationSink;

/// Optional payout metadata captured on a settlement.
#[derive(Debug, Clone, Default)]
pub struct PaymentDetails {
    pub method: Option<String>,
    pub reference: Option<String>,
    pub notes: Option<String>,
}

/// Converts a batch of unsettled entries into a recorded payout.
///
/// The whole operation runs in one transaction: precondition checks, the
/// settlement row, and the per-entry settled-flag transition either all
/// commit or all roll back. Two concurrent calls that share an entry resolve
/// to exactly one winner; the loser gets a conflict and the ledger is left
/// as the winner wrote it.
pub struct SettlementEngine {
    repo: Arc<LedgerRepository>,
    notifier: Arc<dyn NotificationSink>,
}

impl SettlementEngine {
    pub fn new(repo: Arc<LedgerRepository>, notifier: Arc<dyn NotificationSink>) -> Self {
        Self { repo, notifier }
    }

    pub async fn settle(
        &self,
        driver_id: &str,
        entry_ids: &[Uuid],
        amount: Decimal,
        payment: PaymentDetails,
    ) -> AppResult<Settlement> {
        if entry_ids.is_empty() {
            return Err(AppError::Validation(
                "settlement must reference at least one entry".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for entry_id in entry_ids {
            if !seen.insert(entry_id) {
                return Err(AppError::Validation(format!(
                    "duplicate entry id in settlement: {entry_id}"
                )));
            }
        }
        if amount <= Decimal::ZERO {
            return Err(AppError::Validation(
                "settlement amount must be positive".to_string(),
            ));
        }

        let mut tx = self.repo.begin_tx().await?;

        // Preconditions, all checked before any write. The declared amount
        // must exactly match the net of the covered entries so settlement
        // bookkeeping can never move a driver's current balance.
        let mut expected = Decimal::ZERO;
        for entry_id in entry_ids {
            let entry = self
                .repo
                .get_entry_tx(&mut tx, *entry_id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("ledger entry {entry_id} not found")))?;

            if entry.driver_id != driver_id {
                return Err(ConflictError::DriverMismatch {
                    entry_id: *entry_id,
                    driver_id: driver_id.to_string(),
                }
                .into());
            }
            if entry.is_settled {
                return Err(ConflictError::AlreadySettled {
                    entry_id: *entry_id,
                }
                .into());
            }
            if entry.entry_type.affects_balance() {
                expected += entry.amount;
            }
        }

        if expected != amount {
            return Err(ReconciliationError::AmountMismatch {
                declared: amount,
                expected,
            }
            .into());
        }

        let settlement = self
            .repo
            .record_settlement(
                &mut tx,
                &NewSettlement {
                    driver_id: driver_id.to_string(),
                    amount,
                    settled_entries: entry_ids.to_vec(),
                    payment_method: payment.method,
                    payment_reference: payment.reference,
                    notes: payment.notes,
                },
            )
            .await?;

        self.repo
            .mark_settled(
                &mut tx,
                driver_id,
                entry_ids,
                settlement.id,
                settlement.created_at,
            )
            .await?;

        tx.commit().await?;

        info!(
            "💸 Settlement {} recorded for driver {}: {} across {} entries",
            settlement.id,
            settlement.driver_id,
            settlement.amount,
            settlement.settled_entries.len()
        );

        let notifier = self.notifier.clone();
        let notified = settlement.clone();
        tokio::spawn(async move {
            notifier.settlement_recorded(&notified).await;
        });

        Ok(settlement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::balance::balance_for_driver;
    use crate::ledger::models::{EntryFilter, EntryType, NewLedgerEntry, PageRequest};
    use crate::ledger::testutil;
    use crate::notify::NoopNotifier;
    use rust_decimal_macros::dec;

    async fn engine_with_repo() -> (Arc<SettlementEngine>, Arc<LedgerRepository>) {
        let repo = Arc::new(LedgerRepository::new(testutil::memory_pool().await));
        let engine = Arc::new(SettlementEngine::new(repo.clone(), Arc::new(NoopNotifier)));
        (engine, repo)
    }

    #[tokio::test]
    async fn basic_earn_and_settle_flow() {
        let (engine, repo) = engine_with_repo().await;

        let earning = repo.append(testutil::earning("drv-1", dec!(15.50))).await.unwrap();
        let fee = repo.append(testutil::fee("drv-1", dec!(-5.00))).await.unwrap();

        let before = balance_for_driver(&repo, "drv-1").await.unwrap();
        assert_eq!(before.current_balance, dec!(10.50));
        assert_eq!(before.pending_settlement, dec!(10.50));

        let settlement = engine
            .settle(
                "drv-1",
                &[earning.id, fee.id],
                dec!(10.50),
                PaymentDetails {
                    method: Some("bank_transfer".to_string()),
                    reference: Some("TX-1001".to_string()),
                    notes: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(settlement.amount, dec!(10.50));
        assert_eq!(settlement.settled_entries, vec![earning.id, fee.id]);

        for id in [earning.id, fee.id] {
            let entry = repo.get_entry(id).await.unwrap().unwrap();
            assert!(entry.is_settled);
            assert!(entry.settled_at.is_some());
            assert_eq!(entry.settlement_id, Some(settlement.id));
        }

        let after = balance_for_driver(&repo, "drv-1").await.unwrap();
        // a settlement moves pending to zero but never the overall position
        assert_eq!(after.current_balance, Decimal::ZERO);
        assert_eq!(after.total_settlements, dec!(10.50));
        assert_eq!(after.pending_settlement, Decimal::ZERO);
    }

    #[tokio::test]
    async fn reconciliation_mismatch_leaves_ledger_untouched() {
        let (engine, repo) = engine_with_repo().await;

        let earning = repo.append(testutil::earning("drv-1", dec!(15.50))).await.unwrap();
        let fee = repo.append(testutil::fee("drv-1", dec!(-5.00))).await.unwrap();

        let result = engine
            .settle(
                "drv-1",
                &[earning.id, fee.id],
                dec!(11.00),
                PaymentDetails::default(),
            )
            .await;

        assert!(matches!(result, Err(AppError::Reconciliation(_))));

        for id in [earning.id, fee.id] {
            let entry = repo.get_entry(id).await.unwrap().unwrap();
            assert!(!entry.is_settled);
            assert!(entry.settled_at.is_none());
        }
        let settlements = repo
            .list_settlements("drv-1", PageRequest::default())
            .await
            .unwrap();
        assert_eq!(settlements.total, 0);
    }

    #[tokio::test]
    async fn settling_a_settled_entry_conflicts() {
        let (engine, repo) = engine_with_repo().await;

        let earning = repo.append(testutil::earning("drv-1", dec!(20))).await.unwrap();
        engine
            .settle("drv-1", &[earning.id], dec!(20), PaymentDetails::default())
            .await
            .unwrap();

        let result = engine
            .settle("drv-1", &[earning.id], dec!(20), PaymentDetails::default())
            .await;
        assert!(matches!(result, Err(AppError::Conflict(_))));

        let settlements = repo
            .list_settlements("drv-1", PageRequest::default())
            .await
            .unwrap();
        assert_eq!(settlements.total, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_settlements_have_exactly_one_winner() {
        let (engine, repo) = engine_with_repo().await;

        let shared = repo.append(testutil::earning("drv-1", dec!(40))).await.unwrap();

        let first = {
            let engine = engine.clone();
            let id = shared.id;
            tokio::spawn(async move {
                engine
                    .settle("drv-1", &[id], dec!(40), PaymentDetails::default())
                    .await
            })
        };
        let second = {
            let engine = engine.clone();
            let id = shared.id;
            tokio::spawn(async move {
                engine
                    .settle("drv-1", &[id], dec!(40), PaymentDetails::default())
                    .await
            })
        };

        let first = first.await.unwrap();
        let second = second.await.unwrap();

        let successes = [&first, &second].iter().filter(|r| r.is_ok()).count();
        assert_eq!(successes, 1);

        let loser = if first.is_ok() { second } else { first };
        assert!(matches!(loser, Err(AppError::Conflict(_))));

        let entry = repo.get_entry(shared.id).await.unwrap().unwrap();
        assert!(entry.is_settled);

        let settlements = repo
            .list_settlements("drv-1", PageRequest::default())
            .await
            .unwrap();
        assert_eq!(settlements.total, 1);
    }

    #[tokio::test]
    async fn unknown_entry_is_not_found() {
        let (engine, _repo) = engine_with_repo().await;

        let result = engine
            .settle(
                "drv-1",
                &[Uuid::new_v4()],
                dec!(10),
                PaymentDetails::default(),
            )
            .await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn entry_owned_by_another_driver_conflicts() {
        let (engine, repo) = engine_with_repo().await;

        let other = repo.append(testutil::earning("drv-2", dec!(10))).await.unwrap();

        let result = engine
            .settle("drv-1", &[other.id], dec!(10), PaymentDetails::default())
            .await;
        assert!(matches!(
            result,
            Err(AppError::Conflict(ConflictError::DriverMismatch { .. }))
        ));

        let entry = repo.get_entry(other.id).await.unwrap().unwrap();
        assert!(!entry.is_settled);
    }

    #[tokio::test]
    async fn rejects_malformed_requests() {
        let (engine, repo) = engine_with_repo().await;
        let earning = repo.append(testutil::earning("drv-1", dec!(10))).await.unwrap();

        let empty = engine
            .settle("drv-1", &[], dec!(10), PaymentDetails::default())
            .await;
        assert!(matches!(empty, Err(AppError::Validation(_))));

        let duplicated = engine
            .settle(
                "drv-1",
                &[earning.id, earning.id],
                dec!(20),
                PaymentDetails::default(),
            )
            .await;
        assert!(matches!(duplicated, Err(AppError::Validation(_))));

        let non_positive = engine
            .settle("drv-1", &[earning.id], dec!(-10), PaymentDetails::default())
            .await;
        assert!(matches!(non_positive, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn settlement_markers_settle_with_zero_contribution() {
        let (engine, repo) = engine_with_repo().await;

        let earning = repo.append(testutil::earning("drv-1", dec!(25))).await.unwrap();
        let marker = repo
            .append(NewLedgerEntry {
                driver_id: "drv-1".to_string(),
                order_id: None,
                entry_type: EntryType::Settlement,
                amount: dec!(-99),
                description: "legacy payout marker".to_string(),
                metadata: None,
            })
            .await
            .unwrap();

        // the marker is covered by the batch but contributes nothing to the sum
        let settlement = engine
            .settle(
                "drv-1",
                &[earning.id, marker.id],
                dec!(25),
                PaymentDetails::default(),
            )
            .await
            .unwrap();

        assert_eq!(settlement.amount, dec!(25));
        let marker = repo.get_entry(marker.id).await.unwrap().unwrap();
        assert!(marker.is_settled);

        let unsettled = repo
            .list_entries(
                "drv-1",
                &EntryFilter {
                    settled: Some(false),
                    ..Default::default()
                },
                PageRequest::default(),
            )
            .await
            .unwrap();
        assert_eq!(unsettled.total, 0);
    }
}
