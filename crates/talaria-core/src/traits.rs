use std::future::Future;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EngineError;

/// Outcome status reported by the apply collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    /// Form was filled and submitted.
    Submitted,
    /// Form was filled but left for human review (auto_submit off).
    PendingReview,
    /// The posting redirects to an external site; recorded, not submitted.
    External,
    Error,
}

impl ApplicationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicationStatus::Submitted => "submitted",
            ApplicationStatus::PendingReview => "pending_review",
            ApplicationStatus::External => "external",
            ApplicationStatus::Error => "error",
        }
    }
}

/// Record returned by a successful apply call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationRecord {
    pub application_id: String,
    pub status: ApplicationStatus,
    pub message: Option<String>,
}

/// Options forwarded to the apply collaborator, derived from the owning
/// campaign's config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyOptions {
    pub auto_submit: bool,
    pub generate_cover_letter: bool,
    pub cover_letter_tone: String,
    pub campaign_id: Option<Uuid>,
    pub queue_item_id: Option<Uuid>,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            auto_submit: false,
            generate_cover_letter: true,
            cover_letter_tone: "professional".to_string(),
            campaign_id: None,
            queue_item_id: None,
        }
    }
}

/// The externally supplied "attempt one application" operation.
///
/// The engine treats this as opaque: it schedules, throttles, retries and
/// pools resources around it, but never looks inside. Errors are
/// classified by the worker via [`EngineError`] helpers only.
pub trait Applier: Send + Sync + Clone {
    fn apply(
        &self,
        user_id: &str,
        job_url: &str,
        payload: &serde_json::Value,
        options: &ApplyOptions,
    ) -> impl Future<Output = Result<ApplicationRecord, EngineError>> + Send;
}

/// Engine lifecycle events pushed to the notification sink.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    ApplicationCompleted {
        item_id: Uuid,
        application_id: Option<String>,
        job_url: String,
    },
    ApplicationFailed {
        item_id: Uuid,
        job_url: String,
        error: String,
    },
    CampaignPaused {
        campaign_id: Uuid,
        reason: String,
    },
}

/// Fire-and-forget event sink. Implementations must swallow their own
/// failures; nothing downstream of `notify` may affect queue state.
pub trait NotifySink: Send + Sync + Clone {
    fn notify(&self, event: EngineEvent) -> impl Future<Output = ()> + Send;
}

/// Sink that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl NotifySink for NullSink {
    async fn notify(&self, _event: EngineEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&ApplicationStatus::PendingReview).unwrap();
        assert_eq!(json, "\"pending_review\"");
        let back: ApplicationStatus = serde_json::from_str("\"submitted\"").unwrap();
        assert_eq!(back, ApplicationStatus::Submitted);
    }

    #[test]
    fn test_engine_event_is_tagged() {
        let event = EngineEvent::CampaignPaused {
            campaign_id: Uuid::nil(),
            reason: "daily limit".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "campaign_paused");
        assert_eq!(json["reason"], "daily limit");
    }
}
