use rust_decimal::Decimal;
use std::str::FromStr;

use crate::error::{AppError, AppResult};
use crate::settlement::scheduler::{AutoSettleScheduleConfig, SweepFrequency};

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_address: String,
    pub notify_webhook_url: Option<String>,
    pub auto_settle_enabled: bool,
    pub auto_settle_frequency: String,
    pub auto_settle_hour: u32,
    pub auto_settle_min_amount: Decimal,
}

impl Config {
    pub fn from_env() -> AppResult<Self> {
        let hour_raw = std::env::var("AUTO_SETTLE_HOUR").unwrap_or_else(|_| "2".to_string());
        let auto_settle_hour = hour_raw
            .parse::<u32>()
            .map_err(|_| AppError::Config(format!("invalid AUTO_SETTLE_HOUR: {hour_raw}")))?;

        let min_raw =
            std::env::var("AUTO_SETTLE_MIN_AMOUNT").unwrap_or_else(|_| "25".to_string());
        let auto_settle_min_amount = Decimal::from_str(&min_raw)
            .map_err(|_| AppError::Config(format!("invalid AUTO_SETTLE_MIN_AMOUNT: {min_raw}")))?;

        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://mealdash-ledger.db".to_string()),
            bind_address: std::env::var("BIND_ADDRESS")
                .unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            notify_webhook_url: std::env::var("NOTIFY_WEBHOOK_URL").ok(),
            auto_settle_enabled: std::env::var("AUTO_SETTLE_ENABLED")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            auto_settle_frequency: std::env::var("AUTO_SETTLE_FREQUENCY")
                .unwrap_or_else(|_| "daily".to_string()),
            auto_settle_hour,
            auto_settle_min_amount,
        })
    }

    /// Scheduler configuration, or `None` when the background sweep is off.
    pub fn auto_settle_schedule(&self) -> AppResult<Option<AutoSettleScheduleConfig>> {
        if !self.auto_settle_enabled {
            return Ok(None);
        }

        let frequency = match self.auto_settle_frequency.as_str() {
            "daily" => SweepFrequency::Daily,
            "hourly" => SweepFrequency::Hourly,
            other => {
                return Err(AppError::Config(format!(
                    "invalid AUTO_SETTLE_FREQUENCY: {other}"
                )))
            }
        };

        if self.auto_settle_hour > 23 {
            return Err(AppError::Config(format!(
                "AUTO_SETTLE_HOUR must be 0-23, got {}",
                self.auto_settle_hour
            )));
        }

        Ok(Some(AutoSettleScheduleConfig {
            frequency,
            execution_hour: self.auto_settle_hour,
            min_amount: self.auto_settle_min_amount,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn config(enabled: bool, frequency: &str, hour: u32) -> Config {
        Config {
            database_url: "sqlite::memory:".to_string(),
            bind_address: "127.0.0.1:0".to_string(),
            notify_webhook_url: None,
            auto_settle_enabled: enabled,
            auto_settle_frequency: frequency.to_string(),
            auto_settle_hour: hour,
            auto_settle_min_amount: dec!(25),
        }
    }

    #[test]
    fn disabled_schedule_is_none() {
        assert!(config(false, "daily", 2)
            .auto_settle_schedule()
            .unwrap()
            .is_none());
    }

    #[test]
    fn schedule_validates_frequency_and_hour() {
        let schedule = config(true, "hourly", 2).auto_settle_schedule().unwrap();
        assert_eq!(schedule.unwrap().frequency, SweepFrequency::Hourly);

        assert!(config(true, "weekly", 2).auto_settle_schedule().is_err());
        assert!(config(true, "daily", 24).auto_settle_schedule().is_err());
    }
}
