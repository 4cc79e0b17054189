use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of a queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueItemStatus {
    Queued,
    InProgress,
    RetryScheduled,
    Completed,
    Failed,
    Cancelled,
}

impl QueueItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueItemStatus::Queued => "queued",
            QueueItemStatus::InProgress => "in_progress",
            QueueItemStatus::RetryScheduled => "retry_scheduled",
            QueueItemStatus::Completed => "completed",
            QueueItemStatus::Failed => "failed",
            QueueItemStatus::Cancelled => "cancelled",
        }
    }

    /// Terminal items are never re-claimed and never mutated again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            QueueItemStatus::Completed | QueueItemStatus::Failed | QueueItemStatus::Cancelled
        )
    }

    /// Statuses eligible for claiming (subject to `next_run_at`).
    pub fn is_runnable(&self) -> bool {
        matches!(self, QueueItemStatus::Queued | QueueItemStatus::RetryScheduled)
    }
}

impl fmt::Display for QueueItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for QueueItemStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "queued" => Ok(QueueItemStatus::Queued),
            "in_progress" => Ok(QueueItemStatus::InProgress),
            "retry_scheduled" => Ok(QueueItemStatus::RetryScheduled),
            "completed" => Ok(QueueItemStatus::Completed),
            "failed" => Ok(QueueItemStatus::Failed),
            "cancelled" => Ok(QueueItemStatus::Cancelled),
            _ => Err(format!("Unknown queue item status: {}", s)),
        }
    }
}

/// A unit of scheduled work: one application attempt against one job URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: Uuid,
    pub campaign_id: Option<Uuid>,
    pub user_id: String,
    pub job_url: String,
    /// Inferred lazily from `job_url` when absent.
    pub platform: Option<String>,
    pub status: QueueItemStatus,
    /// Lower runs first. Default 50.
    pub priority: i32,
    pub attempts: u32,
    pub max_attempts: u32,
    /// Earliest time the item may be claimed.
    pub next_run_at: DateTime<Utc>,
    pub locked_at: Option<DateTime<Utc>>,
    pub locked_by: Option<String>,
    pub last_error: Option<String>,
    /// Opaque data for the apply step (job title, precomputed answers, ...).
    pub payload: serde_json::Value,
    /// Stamped once the external apply service records an application.
    pub application_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One URL to enqueue, with its opaque payload.
#[derive(Debug, Clone)]
pub struct EnqueueEntry {
    pub job_url: String,
    pub payload: serde_json::Value,
}

impl EnqueueEntry {
    pub fn new(job_url: impl Into<String>) -> Self {
        Self {
            job_url: job_url.into(),
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Request to enqueue a batch of URLs for one user/campaign.
#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    pub user_id: String,
    pub campaign_id: Option<Uuid>,
    pub entries: Vec<EnqueueEntry>,
    pub priority: i32,
    pub max_attempts: u32,
}

impl EnqueueRequest {
    pub fn new(user_id: impl Into<String>, entries: Vec<EnqueueEntry>) -> Self {
        Self {
            user_id: user_id.into(),
            campaign_id: None,
            entries,
            priority: 50,
            max_attempts: 3,
        }
    }

    pub fn with_campaign(mut self, campaign_id: Uuid) -> Self {
        self.campaign_id = Some(campaign_id);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = max;
        self
    }
}

/// Per-status item counts, scoped to a campaign or the whole queue.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueCounts {
    pub queued: i64,
    pub in_progress: i64,
    pub retry_scheduled: i64,
    pub completed: i64,
    pub failed: i64,
    pub cancelled: i64,
}

impl QueueCounts {
    pub fn pending(&self) -> i64 {
        self.queued + self.in_progress + self.retry_scheduled
    }

    pub fn total(&self) -> i64 {
        self.pending() + self.completed + self.failed + self.cancelled
    }
}
