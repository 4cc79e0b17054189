use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::campaign::{Campaign, CampaignStatus};
use crate::error::EngineError;
use crate::queue::{EnqueueRequest, QueueCounts, QueueItem, QueueItemStatus};

/// Durable application queue.
///
/// Implementations must support atomic claiming via
/// `SELECT FOR UPDATE SKIP LOCKED` or equivalent so that two concurrent
/// workers never receive the same item.
pub trait JobQueueStore: Send + Sync + Clone {
    /// Insert items, skipping any whose (user, URL) already has a
    /// non-terminal row. Returns the number actually inserted.
    fn enqueue(
        &self,
        request: EnqueueRequest,
    ) -> impl Future<Output = Result<u64, EngineError>> + Send;

    /// Atomically claim the next runnable item for processing.
    ///
    /// Only items whose campaign is running (or absent), whose status is
    /// queued/retry_scheduled, and whose `next_run_at` has passed are
    /// eligible. Returns `None` if nothing is claimable.
    fn claim_next(
        &self,
        worker_id: &str,
    ) -> impl Future<Output = Result<Option<QueueItem>, EngineError>> + Send;

    /// Terminal transition: clears the lock, stamps the application id and
    /// the final attempt count. A no-op if the item is already terminal.
    fn complete_item(
        &self,
        item_id: Uuid,
        application_id: Option<&str>,
        status: QueueItemStatus,
        attempts: u32,
        last_error: Option<&str>,
    ) -> impl Future<Output = Result<(), EngineError>> + Send;

    /// Reschedule a claimed item: sets `retry_scheduled`, clears the lock,
    /// records the attempt count and error. A no-op on terminal items.
    fn schedule_retry(
        &self,
        item_id: Uuid,
        attempts: u32,
        next_run_at: DateTime<Utc>,
        last_error: &str,
    ) -> impl Future<Output = Result<(), EngineError>> + Send;

    /// Clear the lock without touching status/attempts so another worker
    /// can re-claim (crash/shutdown path).
    fn release_lock(
        &self,
        item_id: Uuid,
        worker_id: &str,
    ) -> impl Future<Output = Result<(), EngineError>> + Send;

    /// Release every lock held by a worker (graceful shutdown).
    fn release_worker_locks(
        &self,
        worker_id: &str,
    ) -> impl Future<Output = Result<u64, EngineError>> + Send;

    /// Return items stuck `in_progress` longer than `lease` to `queued`.
    /// Closes the orphaned-lock gap left by crashed workers.
    fn reclaim_expired_locks(
        &self,
        lease: Duration,
    ) -> impl Future<Output = Result<u64, EngineError>> + Send;

    /// Bulk-cancel all non-terminal, unlocked items of a campaign.
    /// Locked items are left to finish and self-resolve.
    fn cancel_campaign_queue(
        &self,
        campaign_id: Uuid,
    ) -> impl Future<Output = Result<u64, EngineError>> + Send;

    fn get_item(
        &self,
        item_id: Uuid,
    ) -> impl Future<Output = Result<Option<QueueItem>, EngineError>> + Send;

    fn list_items(
        &self,
        campaign_id: Option<Uuid>,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<QueueItem>, EngineError>> + Send;

    fn queue_counts(
        &self,
        campaign_id: Option<Uuid>,
    ) -> impl Future<Output = Result<QueueCounts, EngineError>> + Send;
}

/// Campaign persistence.
pub trait CampaignStore: Send + Sync + Clone {
    fn create_campaign(
        &self,
        user_id: &str,
        name: &str,
        config: serde_json::Value,
    ) -> impl Future<Output = Result<Campaign, EngineError>> + Send;

    fn get_campaign(
        &self,
        campaign_id: Uuid,
    ) -> impl Future<Output = Result<Option<Campaign>, EngineError>> + Send;

    fn set_campaign_status(
        &self,
        campaign_id: Uuid,
        status: CampaignStatus,
        last_error: Option<&str>,
    ) -> impl Future<Output = Result<(), EngineError>> + Send;

    fn list_campaigns(
        &self,
        user_id: &str,
    ) -> impl Future<Output = Result<Vec<Campaign>, EngineError>> + Send;
}
