//! Test utilities: mock implementations of the engine's traits.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! All mocks use `Arc<Mutex<_>>` for interior mutability, allowing
//! test assertions on recorded calls.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::campaign::{Campaign, CampaignStatus};
use crate::error::EngineError;
use crate::queue::{EnqueueRequest, QueueCounts, QueueItem, QueueItemStatus};
use crate::queue_store::{CampaignStore, JobQueueStore};
use crate::session_pool::SessionFactory;
use crate::traits::{
    ApplicationRecord, ApplicationStatus, Applier, ApplyOptions, EngineEvent, NotifySink,
};

// ---------------------------------------------------------------------------
// MockApplier
// ---------------------------------------------------------------------------

enum ApplierMode {
    Succeed(String),
    Fail(Box<dyn Fn() -> EngineError + Send + Sync>),
    Scripted,
}

/// Mock apply collaborator with configurable outcomes.
#[derive(Clone)]
pub struct MockApplier {
    mode: Arc<ApplierMode>,
    /// Queue of scripted responses (application id or error).
    script: Arc<Mutex<Vec<Result<String, EngineError>>>>,
    calls: Arc<Mutex<u32>>,
}

impl MockApplier {
    /// Always succeeds with the given application id.
    pub fn succeeding(application_id: &str) -> Self {
        Self {
            mode: Arc::new(ApplierMode::Succeed(application_id.to_string())),
            script: Arc::new(Mutex::new(Vec::new())),
            calls: Arc::new(Mutex::new(0)),
        }
    }

    /// Always fails with a freshly built error.
    pub fn failing(make_error: impl Fn() -> EngineError + Send + Sync + 'static) -> Self {
        Self {
            mode: Arc::new(ApplierMode::Fail(Box::new(make_error))),
            script: Arc::new(Mutex::new(Vec::new())),
            calls: Arc::new(Mutex::new(0)),
        }
    }

    /// Pops one response per call; errors once the script runs out.
    pub fn scripted(responses: Vec<Result<String, EngineError>>) -> Self {
        Self {
            mode: Arc::new(ApplierMode::Scripted),
            script: Arc::new(Mutex::new(responses)),
            calls: Arc::new(Mutex::new(0)),
        }
    }

    pub fn calls(&self) -> u32 {
        *self.calls.lock().unwrap()
    }
}

impl Applier for MockApplier {
    async fn apply(
        &self,
        _user_id: &str,
        _job_url: &str,
        _payload: &serde_json::Value,
        _options: &ApplyOptions,
    ) -> Result<ApplicationRecord, EngineError> {
        *self.calls.lock().unwrap() += 1;

        let outcome = match &*self.mode {
            ApplierMode::Succeed(id) => Ok(id.clone()),
            ApplierMode::Fail(make_error) => Err(make_error()),
            ApplierMode::Scripted => {
                let mut script = self.script.lock().unwrap();
                if script.is_empty() {
                    Err(EngineError::Generic("scripted responses exhausted".into()))
                } else {
                    script.remove(0)
                }
            }
        };

        outcome.map(|application_id| ApplicationRecord {
            application_id,
            status: ApplicationStatus::Submitted,
            message: None,
        })
    }
}

// ---------------------------------------------------------------------------
// MockQueue (JobQueueStore + CampaignStore)
// ---------------------------------------------------------------------------

/// In-memory queue + campaign store with the same claim semantics as the
/// database repositories (minus real row locking).
#[derive(Clone)]
pub struct MockQueue {
    items: Arc<Mutex<Vec<QueueItem>>>,
    campaigns: Arc<Mutex<Vec<Campaign>>>,
    claim_error: Arc<Mutex<Option<EngineError>>>,
    released: Arc<Mutex<Vec<String>>>,
}

impl MockQueue {
    pub fn empty() -> Self {
        Self {
            items: Arc::new(Mutex::new(Vec::new())),
            campaigns: Arc::new(Mutex::new(Vec::new())),
            claim_error: Arc::new(Mutex::new(None)),
            released: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Queue whose next claim fails once with the given error.
    pub fn with_claim_error(error: EngineError) -> Self {
        let queue = Self::empty();
        *queue.claim_error.lock().unwrap() = Some(error);
        queue
    }

    pub fn push_item(&self, item: QueueItem) {
        self.items.lock().unwrap().push(item);
    }

    pub fn push_campaign(&self, user_id: &str, status: CampaignStatus) -> Uuid {
        let campaign = Campaign {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            name: format!("campaign-{user_id}"),
            status,
            config: serde_json::json!({}),
            last_error: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let id = campaign.id;
        self.campaigns.lock().unwrap().push(campaign);
        id
    }

    pub fn item(&self, item_id: Uuid) -> Option<QueueItem> {
        self.items.lock().unwrap().iter().find(|i| i.id == item_id).cloned()
    }

    pub fn campaign_status(&self, campaign_id: Uuid) -> Option<CampaignStatus> {
        self.campaigns
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.id == campaign_id)
            .map(|c| c.status)
    }

    pub fn released_workers(&self) -> Vec<String> {
        self.released.lock().unwrap().clone()
    }
}

impl JobQueueStore for MockQueue {
    async fn enqueue(&self, request: EnqueueRequest) -> Result<u64, EngineError> {
        let mut items = self.items.lock().unwrap();
        let mut inserted = 0;
        for entry in request.entries {
            let duplicate = items.iter().any(|i| {
                i.user_id == request.user_id
                    && i.job_url == entry.job_url
                    && !i.status.is_terminal()
            });
            if duplicate {
                continue;
            }
            items.push(QueueItem {
                id: Uuid::new_v4(),
                campaign_id: request.campaign_id,
                user_id: request.user_id.clone(),
                job_url: entry.job_url,
                platform: None,
                status: QueueItemStatus::Queued,
                priority: request.priority,
                attempts: 0,
                max_attempts: request.max_attempts,
                next_run_at: Utc::now(),
                locked_at: None,
                locked_by: None,
                last_error: None,
                payload: entry.payload,
                application_id: None,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            });
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn claim_next(&self, worker_id: &str) -> Result<Option<QueueItem>, EngineError> {
        if let Some(e) = self.claim_error.lock().unwrap().take() {
            return Err(e);
        }

        let now = Utc::now();
        let campaign_status: std::collections::HashMap<Uuid, CampaignStatus> = self
            .campaigns
            .lock()
            .unwrap()
            .iter()
            .map(|c| (c.id, c.status))
            .collect();

        let mut items = self.items.lock().unwrap();
        let mut best: Option<usize> = None;
        for (index, item) in items.iter().enumerate() {
            let campaign_ok = item.campaign_id.is_none_or(|cid| {
                campaign_status
                    .get(&cid)
                    .is_none_or(|status| status.allows_claims())
            });
            if !item.status.is_runnable()
                || item.locked_by.is_some()
                || item.next_run_at > now
                || !campaign_ok
            {
                continue;
            }
            best = match best {
                None => Some(index),
                Some(current) => {
                    let a = &items[current];
                    let key_a = (a.priority, a.next_run_at, a.created_at);
                    let key_b = (item.priority, item.next_run_at, item.created_at);
                    if key_b < key_a { Some(index) } else { Some(current) }
                }
            };
        }

        if let Some(index) = best {
            items[index].status = QueueItemStatus::InProgress;
            items[index].locked_at = Some(now);
            items[index].locked_by = Some(worker_id.to_string());
            Ok(Some(items[index].clone()))
        } else {
            Ok(None)
        }
    }

    async fn complete_item(
        &self,
        item_id: Uuid,
        application_id: Option<&str>,
        status: QueueItemStatus,
        attempts: u32,
        last_error: Option<&str>,
    ) -> Result<(), EngineError> {
        let mut items = self.items.lock().unwrap();
        if let Some(item) = items.iter_mut().find(|i| i.id == item_id)
            && !item.status.is_terminal()
        {
            item.status = status;
            item.application_id = application_id.map(str::to_string);
            item.attempts = attempts;
            item.last_error = last_error.map(str::to_string);
            item.locked_at = None;
            item.locked_by = None;
            item.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn schedule_retry(
        &self,
        item_id: Uuid,
        attempts: u32,
        next_run_at: chrono::DateTime<Utc>,
        last_error: &str,
    ) -> Result<(), EngineError> {
        let mut items = self.items.lock().unwrap();
        if let Some(item) = items.iter_mut().find(|i| i.id == item_id)
            && !item.status.is_terminal()
        {
            item.status = QueueItemStatus::RetryScheduled;
            item.attempts = attempts;
            item.next_run_at = next_run_at;
            item.last_error = Some(last_error.to_string());
            item.locked_at = None;
            item.locked_by = None;
            item.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn release_lock(&self, item_id: Uuid, worker_id: &str) -> Result<(), EngineError> {
        let mut items = self.items.lock().unwrap();
        if let Some(item) = items.iter_mut().find(|i| i.id == item_id)
            && item.locked_by.as_deref() == Some(worker_id)
        {
            if item.status == QueueItemStatus::InProgress {
                item.status = QueueItemStatus::Queued;
            }
            item.locked_at = None;
            item.locked_by = None;
        }
        Ok(())
    }

    async fn release_worker_locks(&self, worker_id: &str) -> Result<u64, EngineError> {
        self.released.lock().unwrap().push(worker_id.to_string());

        let mut items = self.items.lock().unwrap();
        let mut count = 0;
        for item in items.iter_mut() {
            if item.locked_by.as_deref() == Some(worker_id)
                && item.status == QueueItemStatus::InProgress
            {
                item.status = QueueItemStatus::Queued;
                item.locked_at = None;
                item.locked_by = None;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn reclaim_expired_locks(&self, lease: Duration) -> Result<u64, EngineError> {
        let cutoff = Utc::now()
            - chrono::TimeDelta::from_std(lease).unwrap_or_else(|_| chrono::TimeDelta::minutes(10));
        let mut items = self.items.lock().unwrap();
        let mut count = 0;
        for item in items.iter_mut() {
            if item.status == QueueItemStatus::InProgress
                && item.locked_at.is_some_and(|at| at < cutoff)
            {
                item.status = QueueItemStatus::Queued;
                item.locked_at = None;
                item.locked_by = None;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn cancel_campaign_queue(&self, campaign_id: Uuid) -> Result<u64, EngineError> {
        let mut items = self.items.lock().unwrap();
        let mut count = 0;
        for item in items.iter_mut() {
            if item.campaign_id == Some(campaign_id)
                && !item.status.is_terminal()
                && item.locked_by.is_none()
            {
                item.status = QueueItemStatus::Cancelled;
                item.updated_at = Utc::now();
                count += 1;
            }
        }
        Ok(count)
    }

    async fn get_item(&self, item_id: Uuid) -> Result<Option<QueueItem>, EngineError> {
        Ok(self.item(item_id))
    }

    async fn list_items(
        &self,
        campaign_id: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<QueueItem>, EngineError> {
        let items = self.items.lock().unwrap();
        Ok(items
            .iter()
            .filter(|i| campaign_id.is_none() || i.campaign_id == campaign_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn queue_counts(&self, campaign_id: Option<Uuid>) -> Result<QueueCounts, EngineError> {
        let items = self.items.lock().unwrap();
        let mut counts = QueueCounts::default();
        for item in items
            .iter()
            .filter(|i| campaign_id.is_none() || i.campaign_id == campaign_id)
        {
            match item.status {
                QueueItemStatus::Queued => counts.queued += 1,
                QueueItemStatus::InProgress => counts.in_progress += 1,
                QueueItemStatus::RetryScheduled => counts.retry_scheduled += 1,
                QueueItemStatus::Completed => counts.completed += 1,
                QueueItemStatus::Failed => counts.failed += 1,
                QueueItemStatus::Cancelled => counts.cancelled += 1,
            }
        }
        Ok(counts)
    }
}

impl CampaignStore for MockQueue {
    async fn create_campaign(
        &self,
        user_id: &str,
        name: &str,
        config: serde_json::Value,
    ) -> Result<Campaign, EngineError> {
        let campaign = Campaign {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            name: name.to_string(),
            status: CampaignStatus::Running,
            config,
            last_error: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        self.campaigns.lock().unwrap().push(campaign.clone());
        Ok(campaign)
    }

    async fn get_campaign(&self, campaign_id: Uuid) -> Result<Option<Campaign>, EngineError> {
        Ok(self
            .campaigns
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.id == campaign_id)
            .cloned())
    }

    async fn set_campaign_status(
        &self,
        campaign_id: Uuid,
        status: CampaignStatus,
        last_error: Option<&str>,
    ) -> Result<(), EngineError> {
        let mut campaigns = self.campaigns.lock().unwrap();
        if let Some(campaign) = campaigns.iter_mut().find(|c| c.id == campaign_id) {
            campaign.status = status;
            campaign.last_error = last_error.map(str::to_string);
            campaign.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn list_campaigns(&self, user_id: &str) -> Result<Vec<Campaign>, EngineError> {
        Ok(self
            .campaigns
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// MockSessionFactory
// ---------------------------------------------------------------------------

/// Mock session factory handing out numeric session ids.
#[derive(Clone)]
pub struct MockSessionFactory {
    next_id: Arc<Mutex<usize>>,
    closed: Arc<Mutex<Vec<usize>>>,
    /// Queue of probe results; defaults to alive once exhausted.
    probe_results: Arc<Mutex<Vec<bool>>>,
    fail_create: bool,
}

impl MockSessionFactory {
    pub fn new() -> Self {
        Self {
            next_id: Arc::new(Mutex::new(0)),
            closed: Arc::new(Mutex::new(Vec::new())),
            probe_results: Arc::new(Mutex::new(Vec::new())),
            fail_create: false,
        }
    }

    /// Factory whose `create` always fails.
    pub fn failing() -> Self {
        Self {
            fail_create: true,
            ..Self::new()
        }
    }

    pub fn set_probe_results(&self, results: Vec<bool>) {
        *self.probe_results.lock().unwrap() = results;
    }

    /// Number of sessions created so far.
    pub fn created(&self) -> usize {
        *self.next_id.lock().unwrap()
    }

    pub fn closed(&self) -> Vec<usize> {
        self.closed.lock().unwrap().clone()
    }
}

impl Default for MockSessionFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionFactory for MockSessionFactory {
    type Session = usize;

    async fn create(&self, _platform: &str) -> Result<usize, EngineError> {
        if self.fail_create {
            return Err(EngineError::SessionError("mock create failure".into()));
        }
        let mut next = self.next_id.lock().unwrap();
        *next += 1;
        Ok(*next)
    }

    async fn close(&self, session: usize) {
        self.closed.lock().unwrap().push(session);
    }

    async fn probe(&self, _session: &usize) -> bool {
        let mut results = self.probe_results.lock().unwrap();
        if results.is_empty() { true } else { results.remove(0) }
    }
}

// ---------------------------------------------------------------------------
// MockReporter
// ---------------------------------------------------------------------------

/// Worker reporter that records event labels.
#[derive(Default, Clone)]
pub struct MockReporter {
    pub events: Arc<Mutex<Vec<String>>>,
}

impl MockReporter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl crate::worker::WorkerReporter for MockReporter {
    fn report(&self, event: crate::worker::WorkerEvent<'_>) {
        let label = match &event {
            crate::worker::WorkerEvent::Started { .. } => "Started",
            crate::worker::WorkerEvent::Polling => "Polling",
            crate::worker::WorkerEvent::ItemClaimed { .. } => "ItemClaimed",
            crate::worker::WorkerEvent::ItemCompleted { .. } => "ItemCompleted",
            crate::worker::WorkerEvent::ItemRescheduled { .. } => "ItemRescheduled",
            crate::worker::WorkerEvent::ItemFailed { .. } => "ItemFailed",
            crate::worker::WorkerEvent::CooldownSet { .. } => "CooldownSet",
            crate::worker::WorkerEvent::CampaignPaused { .. } => "CampaignPaused",
            crate::worker::WorkerEvent::ShuttingDown { .. } => "ShuttingDown",
            crate::worker::WorkerEvent::Stopped { .. } => "Stopped",
        };
        self.events.lock().unwrap().push(label.to_string());
    }
}

// ---------------------------------------------------------------------------
// RecordingSink
// ---------------------------------------------------------------------------

/// Notify sink that records every event.
#[derive(Default, Clone)]
pub struct RecordingSink {
    pub events: Arc<Mutex<Vec<EngineEvent>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NotifySink for RecordingSink {
    async fn notify(&self, event: EngineEvent) {
        self.events.lock().unwrap().push(event);
    }
}

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

/// Create a queued item ready to be claimed.
pub fn make_test_item(user_id: &str, job_url: &str) -> QueueItem {
    QueueItem {
        id: Uuid::new_v4(),
        campaign_id: None,
        user_id: user_id.to_string(),
        job_url: job_url.to_string(),
        platform: None,
        status: QueueItemStatus::Queued,
        priority: 50,
        attempts: 0,
        max_attempts: 3,
        next_run_at: Utc::now(),
        locked_at: None,
        locked_by: None,
        last_error: None,
        payload: serde_json::Value::Null,
        application_id: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}
