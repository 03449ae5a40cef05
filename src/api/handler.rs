use axum::Json;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;

use crate::ledger::repository::LedgerRepository;
use crate::settlement::engine::SettlementEngine;
use crate::settlement::policy::AutoSettlePolicy;

#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<LedgerRepository>,
    pub settlement_engine: Arc<SettlementEngine>,
    pub auto_settle: Arc<AutoSettlePolicy>,
}

/// Success envelope every endpoint wraps its payload in
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn new(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

/// GET /health
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "mealdash-ledger",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}
