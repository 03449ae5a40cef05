use axum::{
    middleware,
    routing::{get, post},
    Extension, Router,
};
use std::sync::Arc;
use tower_http::{compression::CompressionLayer, trace::TraceLayer};
use tracing::info;

use crate::api::handler::{health_check, AppState};
use crate::ledger::handlers::{
    auto_settle_driver, create_entry, create_settlement, get_driver_balance,
    get_settlement_detail, ledger_summary, list_driver_entries, list_driver_settlements,
};
use crate::middleware::cors::create_cors_layer;
use crate::middleware::rate_limit::{rate_limit_middleware, RateLimitLayer};

pub async fn create_app(state: AppState) -> Router {
    info!("⚙️ Setting up HTTP routes...");

    let rate_limiter = Arc::new(RateLimitLayer::new(100, 60));

    let app = Router::new()
        // Public health check endpoint
        .route("/health", get(health_check))
        // Ledger endpoints
        .route("/ledger/entry", post(create_entry))
        .route("/ledger/driver/:driver_id", get(list_driver_entries))
        .route("/ledger/balance/:driver_id", get(get_driver_balance))
        .route("/ledger/settlement", post(create_settlement))
        .route("/ledger/settlement/:settlement_id", get(get_settlement_detail))
        .route("/ledger/settlements/:driver_id", get(list_driver_settlements))
        .route("/ledger/auto-settle/:driver_id", post(auto_settle_driver))
        // Admin reporting
        .route("/ledger/summary/all", get(ledger_summary))
        .layer(CompressionLayer::new())
        .layer(create_cors_layer())
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(rate_limit_middleware))
        .layer(Extension(rate_limiter))
        .with_state(state);

    info!("✓ HTTP routes configured");
    app
}

pub async fn run_server(app: Router, bind_address: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    info!("🌐 Server listening on: {}", bind_address);

    axum::serve(listener, app).await?;
    Ok(())
}
