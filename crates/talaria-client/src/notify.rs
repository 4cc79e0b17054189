use std::time::Duration;

use reqwest::Client;
use talaria_core::error::EngineError;
use talaria_core::traits::{EngineEvent, NotifySink};

/// Fire-and-forget webhook sink (Slack/Discord-style JSON POST).
///
/// Delivery is best-effort by design: the POST runs on a detached task
/// and failures are logged, never surfaced. Queue state must not depend
/// on a notification landing.
#[derive(Clone)]
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: &str) -> Result<Self, EngineError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(12))
            .build()
            .map_err(|e| EngineError::HttpError(e.to_string()))?;

        Ok(Self {
            client,
            url: url.to_string(),
        })
    }

    /// Reads `TALARIA_WEBHOOK_URL`; `None` disables notifications.
    pub fn from_env() -> Result<Option<Self>, EngineError> {
        match std::env::var("TALARIA_WEBHOOK_URL") {
            Ok(url) if !url.is_empty() => Ok(Some(Self::new(&url)?)),
            _ => Ok(None),
        }
    }
}

impl NotifySink for WebhookNotifier {
    async fn notify(&self, event: EngineEvent) {
        let client = self.client.clone();
        let url = self.url.clone();
        tokio::spawn(async move {
            match client.post(&url).json(&event).send().await {
                Ok(response) if response.status().is_success() => {}
                Ok(response) => {
                    tracing::warn!(status = %response.status(), "Webhook delivery failed");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Webhook delivery failed");
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn notify_never_fails_the_caller() {
        // Unroutable target: delivery fails in the background, the caller
        // returns immediately either way.
        let notifier = WebhookNotifier::new("http://127.0.0.1:1/hook").unwrap();
        notifier
            .notify(EngineEvent::CampaignPaused {
                campaign_id: Uuid::nil(),
                reason: "test".into(),
            })
            .await;
    }

    #[test]
    fn from_env_disabled_without_url() {
        // Runs in-process: guard against a leaked variable from the host.
        unsafe { std::env::remove_var("TALARIA_WEBHOOK_URL") };
        assert!(WebhookNotifier::from_env().unwrap().is_none());
    }
}
