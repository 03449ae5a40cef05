// Auto-settlement scheduler
//
// Daily strategy (default):
// - Executes at 02:00 UTC (off-peak hours)
// - Sweeps every driver with an unsettled balance over the minimum
// - One payout per driver, easier reconciliation
//
// Alternative: use Hourly for high-volume markets

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};
use tracing::info;

use super::policy::AutoSettlePolicy;

/// Sweep schedule configuration
#[derive(Debug, Clone)]
pub struct AutoSettleScheduleConfig {
    pub frequency: SweepFrequency,
    /// UTC hour to execute the daily sweep (0-23)
    pub execution_hour: u32,
    /// Minimum unsettled balance before a driver is settled
    pub min_amount: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepFrequency {
    Daily,
    Hourly,
}

/// Background task that periodically runs the auto-settlement policy over
/// the whole fleet.
pub struct AutoSettleScheduler {
    config: AutoSettleScheduleConfig,
    policy: Arc<AutoSettlePolicy>,
}

impl AutoSettleScheduler {
    pub fn new(config: AutoSettleScheduleConfig, policy: Arc<AutoSettlePolicy>) -> Self {
        Self { config, policy }
    }

    /// Start the scheduler (runs in background)
    pub fn start(&self) -> JoinHandle<()> {
        let config = self.config.clone();
        let policy = self.policy.clone();

        tokio::spawn(async move {
            match config.frequency {
                SweepFrequency::Daily => Self::run_daily(&config, &policy).await,
                SweepFrequency::Hourly => Self::run_hourly(&config, &policy).await,
            }
        })
    }

    async fn run_daily(config: &AutoSettleScheduleConfig, policy: &Arc<AutoSettlePolicy>) {
        loop {
            let now = Utc::now();
            let next_execution = Self::calculate_next_daily_execution(now, config.execution_hour);
            let duration_until_execution = next_execution.signed_duration_since(now);

            if duration_until_execution.num_seconds() > 0 {
                info!(
                    "⏰ Next auto-settlement sweep scheduled for {} UTC",
                    next_execution.format("%H:%M:%S")
                );

                tokio::time::sleep(Duration::from_secs(
                    duration_until_execution.num_seconds() as u64,
                ))
                .await;
            }

            Self::run_sweep(config, policy).await;
        }
    }

    async fn run_hourly(config: &AutoSettleScheduleConfig, policy: &Arc<AutoSettlePolicy>) {
        let mut interval = interval(Duration::from_secs(3600));

        loop {
            interval.tick().await;
            Self::run_sweep(config, policy).await;
        }
    }

    async fn run_sweep(config: &AutoSettleScheduleConfig, policy: &Arc<AutoSettlePolicy>) {
        info!(
            "🔄 Starting auto-settlement sweep (minimum {})",
            config.min_amount
        );

        let report = policy.sweep(config.min_amount).await;

        info!(
            "✓ Sweep completed: {} settled, {} below threshold, {} failed",
            report.settled, report.skipped, report.failed
        );
    }

    /// Calculate next daily execution time
    fn calculate_next_daily_execution(now: DateTime<Utc>, execution_hour: u32) -> DateTime<Utc> {
        let mut next = now.date_naive().and_hms_opt(execution_hour, 0, 0).unwrap();
        let next_dt = Utc.from_utc_datetime(&next);

        // If execution time has passed today, schedule for tomorrow
        if next_dt <= now {
            next = (now.date_naive() + chrono::Duration::days(1))
                .and_hms_opt(execution_hour, 0, 0)
                .unwrap();
            Utc.from_utc_datetime(&next)
        } else {
            next_dt
        }
    }
}
