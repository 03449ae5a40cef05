use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::api::handler::AppState;
use crate::config::Config;
use crate::error::AppResult;
use crate::ledger::repository::LedgerRepository;
use crate::notify::{NoopNotifier, NotificationSink, WebhookNotifier};
use crate::settlement::engine::SettlementEngine;
use crate::settlement::policy::AutoSettlePolicy;
use crate::settlement::scheduler::AutoSettleScheduler;

pub async fn initialize_app_state(config: &Config) -> AppResult<AppState> {
    info!("Initializing application components ...");

    let pool = initialize_database(&config.database_url).await?;

    let ledger = Arc::new(LedgerRepository::new(pool));

    let notifier: Arc<dyn NotificationSink> = match &config.notify_webhook_url {
        Some(url) => {
            info!("✅ Settlement webhook notifier configured");
            Arc::new(WebhookNotifier::new(url.clone()))
        }
        None => Arc::new(NoopNotifier),
    };

    let settlement_engine = Arc::new(SettlementEngine::new(ledger.clone(), notifier));
    info!("✅ Settlement engine initialized");

    let auto_settle = Arc::new(AutoSettlePolicy::new(
        ledger.clone(),
        settlement_engine.clone(),
    ));

    if let Some(schedule) = config.auto_settle_schedule()? {
        let scheduler = AutoSettleScheduler::new(schedule, auto_settle.clone());
        scheduler.start();
        info!("✅ Auto-settlement scheduler started");
    }

    Ok(AppState {
        ledger,
        settlement_engine,
        auto_settle,
    })
}

async fn initialize_database(database_url: &str) -> AppResult<SqlitePool> {
    info!("📊 Connecting to database...");

    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .acquire_timeout(Duration::from_secs(30))
        .connect_with(options)
        .await?;

    info!("🔄 Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;

    info!("✓ Database initialized");
    Ok(pool)
}
