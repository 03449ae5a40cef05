use chrono::{DateTime, Utc};
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::info;
use uuid::Uuid;

use super::models::*;
use crate::error::{AppResult, ConflictError};

const ENTRY_COLUMNS: &str = "id, driver_id, order_id, entry_type, amount, description, \
     is_settled, settled_at, settlement_id, metadata, created_at";

const SETTLEMENT_COLUMNS: &str =
    "id, driver_id, amount, payment_method, payment_reference, notes, created_at";

/// Ledger repository - THE source of truth for all driver bookkeeping
pub struct LedgerRepository {
    pub pool: SqlitePool,
}

impl LedgerRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn begin_tx(&self) -> AppResult<Transaction<'_, Sqlite>> {
        Ok(self.pool.begin().await?)
    }

    // ========== ENTRY OPERATIONS ==========

    /// Append a new entry. Ids and timestamps are assigned here; entries are
    /// always born unsettled.
    pub async fn append(&self, new: NewLedgerEntry) -> AppResult<LedgerEntry> {
        new.validate()?;

        let entry = LedgerEntry {
            id: Uuid::new_v4(),
            driver_id: new.driver_id,
            order_id: new.order_id,
            entry_type: new.entry_type,
            amount: new.amount,
            description: new.description,
            is_settled: false,
            settled_at: None,
            settlement_id: None,
            metadata: new.metadata,
            created_at: Utc::now(),
        };

        let metadata_raw = entry
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| {
                crate::error::AppError::Internal(format!("failed to encode metadata: {e}"))
            })?;

        sqlx::query(
            r#"
            INSERT INTO ledger_entries (
                id, driver_id, order_id, entry_type, amount, description,
                is_settled, settled_at, settlement_id, metadata, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.id.to_string())
        .bind(&entry.driver_id)
        .bind(&entry.order_id)
        .bind(entry.entry_type.as_str())
        .bind(entry.amount.to_string())
        .bind(&entry.description)
        .bind(entry.is_settled)
        .bind(entry.settled_at)
        .bind(entry.settlement_id.map(|id| id.to_string()))
        .bind(metadata_raw)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;

        info!(
            "🧾 Appended {} entry {} for driver {} ({})",
            entry.entry_type, entry.id, entry.driver_id, entry.amount
        );

        Ok(entry)
    }

    pub async fn get_entry(&self, entry_id: Uuid) -> AppResult<Option<LedgerEntry>> {
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(entry_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(LedgerEntry::from_row).transpose()
    }

    /// Transactional variant used by the settlement engine so precondition
    /// checks and the settled-flag transition observe the same state.
    pub async fn get_entry_tx(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        entry_id: Uuid,
    ) -> AppResult<Option<LedgerEntry>> {
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(entry_id.to_string())
            .fetch_optional(&mut **tx)
            .await?;

        row.as_ref().map(LedgerEntry::from_row).transpose()
    }

    /// List a driver's entries, newest first. Filters apply before
    /// pagination; the count and the page are read in one transaction so
    /// `total` always matches the filtered set.
    pub async fn list_entries(
        &self,
        driver_id: &str,
        filter: &EntryFilter,
        page: PageRequest,
    ) -> AppResult<Page<LedgerEntry>> {
        let mut conditions = String::from("driver_id = ?");
        if filter.entry_type.is_some() {
            conditions.push_str(" AND entry_type = ?");
        }
        if filter.settled.is_some() {
            conditions.push_str(" AND is_settled = ?");
        }
        if filter.start_date.is_some() {
            conditions.push_str(" AND created_at >= ?");
        }
        if filter.end_date.is_some() {
            conditions.push_str(" AND created_at <= ?");
        }

        let count_sql = format!("SELECT COUNT(*) FROM ledger_entries WHERE {conditions}");
        let list_sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE {conditions} \
             ORDER BY created_at DESC, rowid DESC LIMIT ? OFFSET ?"
        );

        let mut tx = self.begin_tx().await?;

        let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql).bind(driver_id);
        if let Some(entry_type) = filter.entry_type {
            count_query = count_query.bind(entry_type.as_str());
        }
        if let Some(settled) = filter.settled {
            count_query = count_query.bind(settled);
        }
        if let Some(start) = filter.start_date {
            count_query = count_query.bind(start);
        }
        if let Some(end) = filter.end_date {
            count_query = count_query.bind(end);
        }
        let total = count_query.fetch_one(&mut *tx).await?;

        let mut list_query = sqlx::query(&list_sql).bind(driver_id);
        if let Some(entry_type) = filter.entry_type {
            list_query = list_query.bind(entry_type.as_str());
        }
        if let Some(settled) = filter.settled {
            list_query = list_query.bind(settled);
        }
        if let Some(start) = filter.start_date {
            list_query = list_query.bind(start);
        }
        if let Some(end) = filter.end_date {
            list_query = list_query.bind(end);
        }
        let rows = list_query
            .bind(page.limit as i64)
            .bind(page.offset() as i64)
            .fetch_all(&mut *tx)
            .await?;

        tx.commit().await?;

        let items = rows
            .iter()
            .map(LedgerEntry::from_row)
            .collect::<AppResult<Vec<_>>>()?;

        Ok(Page::new(items, total as u64, page))
    }

    /// Atomic bulk unsettled→settled transition. Each update is guarded on
    /// `is_settled = 0` and the owning driver; a row the guard rejects aborts
    /// the whole transaction, so a concurrent settlement that claimed any of
    /// these entries first wins and this call fails with a conflict.
    pub async fn mark_settled(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        driver_id: &str,
        entry_ids: &[Uuid],
        settlement_id: Uuid,
        settled_at: DateTime<Utc>,
    ) -> AppResult<()> {
        for entry_id in entry_ids {
            let result = sqlx::query(
                r#"
                UPDATE ledger_entries
                SET is_settled = 1, settled_at = ?, settlement_id = ?
                WHERE id = ? AND driver_id = ? AND is_settled = 0
                "#,
            )
            .bind(settled_at)
            .bind(settlement_id.to_string())
            .bind(entry_id.to_string())
            .bind(driver_id)
            .execute(&mut **tx)
            .await?;

            if result.rows_affected() == 0 {
                return Err(ConflictError::AlreadySettled {
                    entry_id: *entry_id,
                }
                .into());
            }
        }

        Ok(())
    }

    // ========== SETTLEMENT OPERATIONS ==========

    /// Persist a settlement row. Does not touch entries; the engine marks
    /// them in the same transaction.
    pub async fn record_settlement(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        new: &NewSettlement,
    ) -> AppResult<Settlement> {
        let settlement = Settlement {
            id: Uuid::new_v4(),
            driver_id: new.driver_id.clone(),
            amount: new.amount,
            settled_entries: new.settled_entries.clone(),
            payment_method: new.payment_method.clone(),
            payment_reference: new.payment_reference.clone(),
            notes: new.notes.clone(),
            created_at: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO settlements (
                id, driver_id, amount, payment_method, payment_reference, notes, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(settlement.id.to_string())
        .bind(&settlement.driver_id)
        .bind(settlement.amount.to_string())
        .bind(&settlement.payment_method)
        .bind(&settlement.payment_reference)
        .bind(&settlement.notes)
        .bind(settlement.created_at)
        .execute(&mut **tx)
        .await?;

        Ok(settlement)
    }

    /// Load a settlement with the entries it covered.
    pub async fn get_settlement(
        &self,
        settlement_id: Uuid,
    ) -> AppResult<Option<(Settlement, Vec<LedgerEntry>)>> {
        let sql = format!("SELECT {SETTLEMENT_COLUMNS} FROM settlements WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(settlement_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mut settlement = Settlement::from_row(&row)?;
        let entries = self.settlement_entries(settlement_id).await?;
        settlement.settled_entries = entries.iter().map(|e| e.id).collect();

        Ok(Some((settlement, entries)))
    }

    pub async fn settlement_entries(&self, settlement_id: Uuid) -> AppResult<Vec<LedgerEntry>> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE settlement_id = ? \
             ORDER BY created_at ASC, rowid ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(settlement_id.to_string())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(LedgerEntry::from_row).collect()
    }

    pub async fn list_settlements(
        &self,
        driver_id: &str,
        page: PageRequest,
    ) -> AppResult<Page<Settlement>> {
        let mut tx = self.begin_tx().await?;

        let total = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM settlements WHERE driver_id = ?",
        )
        .bind(driver_id)
        .fetch_one(&mut *tx)
        .await?;

        let sql = format!(
            "SELECT {SETTLEMENT_COLUMNS} FROM settlements WHERE driver_id = ? \
             ORDER BY created_at DESC, rowid DESC LIMIT ? OFFSET ?"
        );
        let rows = sqlx::query(&sql)
            .bind(driver_id)
            .bind(page.limit as i64)
            .bind(page.offset() as i64)
            .fetch_all(&mut *tx)
            .await?;

        tx.commit().await?;

        let mut items = rows
            .iter()
            .map(Settlement::from_row)
            .collect::<AppResult<Vec<_>>>()?;

        // Membership is immutable once a settlement commits, so filling it in
        // after the snapshot read cannot race.
        for settlement in &mut items {
            settlement.settled_entries = self
                .settlement_entries(settlement.id)
                .await?
                .iter()
                .map(|e| e.id)
                .collect();
        }

        Ok(Page::new(items, total as u64, page))
    }

    // ========== SNAPSHOT READS ==========

    /// Everything known about one driver, read in a single transaction so
    /// balance computation never observes a half-committed settlement.
    pub async fn driver_snapshot(
        &self,
        driver_id: &str,
    ) -> AppResult<(Vec<LedgerEntry>, Vec<Settlement>)> {
        let mut tx = self.begin_tx().await?;

        let entry_sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE driver_id = ? \
             ORDER BY created_at DESC, rowid DESC"
        );
        let entry_rows = sqlx::query(&entry_sql)
            .bind(driver_id)
            .fetch_all(&mut *tx)
            .await?;

        let settlement_sql = format!(
            "SELECT {SETTLEMENT_COLUMNS} FROM settlements WHERE driver_id = ? \
             ORDER BY created_at DESC, rowid DESC"
        );
        let settlement_rows = sqlx::query(&settlement_sql)
            .bind(driver_id)
            .fetch_all(&mut *tx)
            .await?;

        tx.commit().await?;

        let entries = entry_rows
            .iter()
            .map(LedgerEntry::from_row)
            .collect::<AppResult<Vec<_>>>()?;
        let mut settlements = settlement_rows
            .iter()
            .map(Settlement::from_row)
            .collect::<AppResult<Vec<_>>>()?;

        for settlement in &mut settlements {
            settlement.settled_entries = entries
                .iter()
                .filter(|e| e.settlement_id == Some(settlement.id))
                .map(|e| e.id)
                .collect();
        }

        Ok((entries, settlements))
    }

    /// Marketplace-wide snapshot for reporting, optionally restricted to
    /// rows created at or after `cutoff`. Settlement membership is not
    /// populated here; reporting only aggregates amounts.
    pub async fn ledger_snapshot_since(
        &self,
        cutoff: Option<DateTime<Utc>>,
    ) -> AppResult<(Vec<LedgerEntry>, Vec<Settlement>)> {
        let mut tx = self.begin_tx().await?;

        let entry_rows = if let Some(cutoff) = cutoff {
            let sql = format!(
                "SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE created_at >= ? \
                 ORDER BY created_at DESC, rowid DESC"
            );
            sqlx::query(&sql).bind(cutoff).fetch_all(&mut *tx).await?
        } else {
            let sql = format!(
                "SELECT {ENTRY_COLUMNS} FROM ledger_entries ORDER BY created_at DESC, rowid DESC"
            );
            sqlx::query(&sql).fetch_all(&mut *tx).await?
        };

        let settlement_rows = if let Some(cutoff) = cutoff {
            let sql = format!(
                "SELECT {SETTLEMENT_COLUMNS} FROM settlements WHERE created_at >= ? \
                 ORDER BY created_at DESC, rowid DESC"
            );
            sqlx::query(&sql).bind(cutoff).fetch_all(&mut *tx).await?
        } else {
            let sql = format!(
                "SELECT {SETTLEMENT_COLUMNS} FROM settlements ORDER BY created_at DESC, rowid DESC"
            );
            sqlx::query(&sql).fetch_all(&mut *tx).await?
        };

        tx.commit().await?;

        let entries = entry_rows
            .iter()
            .map(LedgerEntry::from_row)
            .collect::<AppResult<Vec<_>>>()?;
        let settlements = settlement_rows
            .iter()
            .map(Settlement::from_row)
            .collect::<AppResult<Vec<_>>>()?;

        Ok((entries, settlements))
    }

    /// Drivers that currently have at least one unsettled balance-affecting
    /// entry. Used by the auto-settlement sweep.
    pub async fn drivers_with_unsettled(&self) -> AppResult<Vec<String>> {
        let drivers = sqlx::query_scalar::<_, String>(
            r#"
            SELECT DISTINCT driver_id FROM ledger_entries
            WHERE is_settled = 0 AND entry_type != 'settlement'
            ORDER BY driver_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(drivers)
    }
}
