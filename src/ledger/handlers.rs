use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::balance::balance_for_driver;
use super::models::{
    DriverBalance, EntryFilter, EntryType, LedgerEntry, NewLedgerEntry, Page, PageRequest,
    Settlement,
};
use crate::api::handler::{ApiResponse, AppState};
use crate::error::{AppError, AppResult};
use crate::reporting::{build_summary, LedgerSummary, SummaryPeriod};
use crate::settlement::engine::PaymentDetails;
use crate::settlement::policy::AutoSettleOutcome;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateEntryRequest {
    #[validate(length(min = 1, message = "driverId is required"))]
    pub driver_id: String,
    pub order_id: Option<String>,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    pub amount: Decimal,
    #[validate(length(min = 1, message = "description is required"))]
    pub description: String,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryListQuery {
    #[serde(rename = "type")]
    pub entry_type: Option<EntryType>,
    pub settled: Option<bool>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct PaginationQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateSettlementRequest {
    #[validate(length(min = 1, message = "driverId is required"))]
    pub driver_id: String,
    pub amount: Decimal,
    #[validate(length(min = 1, message = "settledEntries must not be empty"))]
    pub settled_entries: Vec<Uuid>,
    pub payment_method: Option<String>,
    pub payment_reference: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoSettleRequest {
    pub min_amount: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct SummaryQuery {
    pub period: Option<String>,
}

/// Settlement with the covered entries embedded.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementDetail {
    #[serde(flatten)]
    pub settlement: Settlement,
    pub entries: Vec<LedgerEntry>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoSettled {
    pub settled: bool,
    pub settlement: Settlement,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoSettleSkipped {
    pub settled: bool,
    pub reason: &'static str,
    #[serde(with = "rust_decimal::serde::float")]
    pub pending_settlement: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub min_amount: Decimal,
}

/// Append a ledger entry
/// POST /ledger/entry
pub async fn create_entry(
    State(state): State<AppState>,
    Json(req): Json<CreateEntryRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<LedgerEntry>>)> {
    req.validate()?;

    let entry = state
        .ledger
        .append(NewLedgerEntry {
            driver_id: req.driver_id,
            order_id: req.order_id,
            entry_type: req.entry_type,
            amount: req.amount,
            description: req.description,
            metadata: req.metadata,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(ApiResponse::new(entry))))
}

/// List a driver's entries, filtered and paginated
/// GET /ledger/driver/:driver_id
pub async fn list_driver_entries(
    State(state): State<AppState>,
    Path(driver_id): Path<String>,
    Query(query): Query<EntryListQuery>,
) -> AppResult<Json<ApiResponse<Page<LedgerEntry>>>> {
    let filter = EntryFilter {
        entry_type: query.entry_type,
        settled: query.settled,
        start_date: query.start_date,
        end_date: query.end_date,
    };

    let page = state
        .ledger
        .list_entries(&driver_id, &filter, PageRequest::new(query.page, query.limit))
        .await?;

    Ok(Json(ApiResponse::new(page)))
}

/// Derived balance for a driver; zero-valued for drivers with no activity
/// GET /ledger/balance/:driver_id
pub async fn get_driver_balance(
    State(state): State<AppState>,
    Path(driver_id): Path<String>,
) -> AppResult<Json<ApiResponse<DriverBalance>>> {
    let balance = balance_for_driver(&state.ledger, &driver_id).await?;
    Ok(Json(ApiResponse::new(balance)))
}

/// Record a settlement over an explicit entry set
/// POST /ledger/settlement
pub async fn create_settlement(
    State(state): State<AppState>,
    Json(req): Json<CreateSettlementRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<Settlement>>)> {
    req.validate()?;

    let settlement = state
        .settlement_engine
        .settle(
            &req.driver_id,
            &req.settled_entries,
            req.amount,
            PaymentDetails {
                method: req.payment_method,
                reference: req.payment_reference,
                notes: req.notes,
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(ApiResponse::new(settlement))))
}

/// GET /ledger/settlements/:driver_id
pub async fn list_driver_settlements(
    State(state): State<AppState>,
    Path(driver_id): Path<String>,
    Query(query): Query<PaginationQuery>,
) -> AppResult<Json<ApiResponse<Page<Settlement>>>> {
    let page = state
        .ledger
        .list_settlements(&driver_id, PageRequest::new(query.page, query.limit))
        .await?;

    Ok(Json(ApiResponse::new(page)))
}

/// GET /ledger/settlement/:settlement_id
pub async fn get_settlement_detail(
    State(state): State<AppState>,
    Path(settlement_id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<SettlementDetail>>> {
    let (settlement, entries) = state
        .ledger
        .get_settlement(settlement_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("settlement {settlement_id} not found")))?;

    Ok(Json(ApiResponse::new(SettlementDetail {
        settlement,
        entries,
    })))
}

/// Threshold-driven settlement of a driver's full unsettled set
/// POST /ledger/auto-settle/:driver_id
pub async fn auto_settle_driver(
    State(state): State<AppState>,
    Path(driver_id): Path<String>,
    Json(req): Json<AutoSettleRequest>,
) -> AppResult<Response> {
    let outcome = state
        .auto_settle
        .auto_settle(&driver_id, req.min_amount)
        .await?;

    let response = match outcome {
        AutoSettleOutcome::Settled(settlement) => (
            StatusCode::CREATED,
            Json(ApiResponse::new(AutoSettled {
                settled: true,
                settlement,
            })),
        )
            .into_response(),
        AutoSettleOutcome::NoOp {
            reason,
            pending,
            min_amount,
        } => (
            StatusCode::OK,
            Json(ApiResponse::new(AutoSettleSkipped {
                settled: false,
                reason: reason.as_str(),
                pending_settlement: pending,
                min_amount,
            })),
        )
            .into_response(),
    };

    Ok(response)
}

/// Cross-driver aggregates for the operator dashboard
/// GET /ledger/summary/all
pub async fn ledger_summary(
    State(state): State<AppState>,
    Query(query): Query<SummaryQuery>,
) -> AppResult<Json<ApiResponse<LedgerSummary>>> {
    let period = SummaryPeriod::parse(query.period.as_deref())?;
    let summary = build_summary(&state.ledger, period).await?;
    Ok(Json(ApiResponse::new(summary)))
}
