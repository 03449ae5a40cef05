//! Fire-and-forget notification sink.
//!
//! Settlement transitions fan out to the marketplace's push pipeline through
//! a webhook. Delivery is best-effort: failures are logged and never block
//! or fail the ledger write that triggered them.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::ledger::models::Settlement;

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn settlement_recorded(&self, settlement: &Settlement);
}

/// Sink used when no webhook is configured.
pub struct NoopNotifier;

#[async_trait]
impl NotificationSink for NoopNotifier {
    async fn settlement_recorded(&self, _settlement: &Settlement) {}
}

/// Posts settlement events to the notification service.
pub struct WebhookNotifier {
    url: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: String) -> Self {
        Self {
            url,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl NotificationSink for WebhookNotifier {
    async fn settlement_recorded(&self, settlement: &Settlement) {
        let payload = serde_json::json!({
            "event": "settlement.recorded",
            "settlementId": settlement.id,
            "driverId": settlement.driver_id,
            "amount": settlement.amount,
            "entryCount": settlement.settled_entries.len(),
            "createdAt": settlement.created_at.to_rfc3339(),
        });

        match self.client.post(&self.url).json(&payload).send().await {
            Ok(response) if response.status().is_success() => {
                info!(
                    "🔔 Settlement notification delivered for driver {}",
                    settlement.driver_id
                );
            }
            Ok(response) => {
                warn!(
                    "Settlement notification rejected with status {} for driver {}",
                    response.status(),
                    settlement.driver_id
                );
            }
            Err(e) => {
                warn!(
                    "Settlement notification failed for driver {}: {}",
                    settlement.driver_id, e
                );
            }
        }
    }
}
