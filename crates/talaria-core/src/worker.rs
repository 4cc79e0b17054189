//! Continuous queue worker: claims items, applies campaign policy, and
//! resolves each item through the retry policy and rate limiter.
//!
//! This is the sole place that classifies errors and reacts to them; the
//! rate limiter, session pool and stores only ever see success/failure
//! signals. Multiple workers may run against the same database, with the
//! queue's atomic claim as the only serialization point between them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::campaign::{CampaignConfig, CampaignStatus};
use crate::error::EngineError;
use crate::platform::detect_platform_from_url;
use crate::queue::{QueueItem, QueueItemStatus};
use crate::queue_store::{CampaignStore, JobQueueStore};
use crate::rate_limiter::RateLimiter;
use crate::retry::RetryPolicy;
use crate::traits::{Applier, ApplyOptions, EngineEvent, NotifySink};
use crate::util::{rand_duration_between, rand_jitter_ms};

/// Configuration for a worker process.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    pub poll_interval: Duration,
    pub retry_policy: RetryPolicy,
    /// Cooldown window opened on a rate-limit signal.
    pub rate_limit_cooldown: Duration,
    /// Extra uniform jitter added to each cooldown.
    pub cooldown_jitter: Duration,
    /// Items locked longer than this are considered orphaned and reclaimed.
    pub lock_lease: Duration,
    /// Human-like delay before each attempt.
    pub delay_range: (Duration, Duration),
    /// LinkedIn is far more sensitive to burst traffic.
    pub linkedin_delay_range: (Duration, Duration),
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", &Uuid::new_v4().to_string()[..8]),
            poll_interval: Duration::from_secs(2),
            retry_policy: RetryPolicy::default(),
            rate_limit_cooldown: Duration::from_secs(1800),
            cooldown_jitter: Duration::from_secs(90),
            lock_lease: Duration::from_secs(600),
            delay_range: (Duration::from_secs(4), Duration::from_secs(12)),
            linkedin_delay_range: (Duration::from_secs(60), Duration::from_secs(180)),
        }
    }
}

impl WorkerConfig {
    pub fn with_worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = id.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Disable the human-like pacing (tests, dry runs).
    pub fn without_human_delays(mut self) -> Self {
        self.delay_range = (Duration::ZERO, Duration::ZERO);
        self.linkedin_delay_range = (Duration::ZERO, Duration::ZERO);
        self
    }

    fn delay_range_for(&self, platform: &str) -> (Duration, Duration) {
        if platform == "linkedin" {
            self.linkedin_delay_range
        } else {
            self.delay_range
        }
    }
}

/// Events emitted by the worker for monitoring/logging.
#[derive(Debug, Clone)]
pub enum WorkerEvent<'a> {
    Started {
        worker_id: &'a str,
    },
    Polling,
    ItemClaimed {
        item: &'a QueueItem,
    },
    ItemCompleted {
        item_id: Uuid,
        application_id: Option<&'a str>,
    },
    ItemRescheduled {
        item_id: Uuid,
        next_run_at: DateTime<Utc>,
        reason: &'a str,
    },
    ItemFailed {
        item_id: Uuid,
        error: &'a str,
        will_retry: bool,
    },
    CooldownSet {
        platform: &'a str,
        until: DateTime<Utc>,
    },
    CampaignPaused {
        campaign_id: Uuid,
        reason: &'a str,
    },
    ShuttingDown {
        worker_id: &'a str,
        locks_released: u64,
    },
    Stopped {
        worker_id: &'a str,
    },
}

/// Trait for receiving worker events (decoupled logging).
pub trait WorkerReporter: Send + Sync {
    fn report(&self, event: WorkerEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingWorkerReporter;

impl WorkerReporter for TracingWorkerReporter {
    fn report(&self, event: WorkerEvent<'_>) {
        match event {
            WorkerEvent::Started { worker_id } => {
                tracing::info!(%worker_id, "Worker started");
            }
            WorkerEvent::Polling => {
                tracing::debug!("Polling for queue items");
            }
            WorkerEvent::ItemClaimed { item } => {
                tracing::info!(item_id = %item.id, url = %item.job_url, "Item claimed");
            }
            WorkerEvent::ItemCompleted {
                item_id,
                application_id,
            } => {
                tracing::info!(%item_id, ?application_id, "Item completed");
            }
            WorkerEvent::ItemRescheduled {
                item_id,
                next_run_at,
                reason,
            } => {
                tracing::info!(%item_id, %next_run_at, %reason, "Item rescheduled");
            }
            WorkerEvent::ItemFailed {
                item_id,
                error,
                will_retry,
            } => {
                tracing::warn!(%item_id, %error, %will_retry, "Item failed");
            }
            WorkerEvent::CooldownSet { platform, until } => {
                tracing::warn!(%platform, %until, "Platform cooldown set");
            }
            WorkerEvent::CampaignPaused {
                campaign_id,
                reason,
            } => {
                tracing::warn!(%campaign_id, %reason, "Campaign paused");
            }
            WorkerEvent::ShuttingDown {
                worker_id,
                locks_released,
            } => {
                tracing::info!(%worker_id, %locks_released, "Worker shutting down");
            }
            WorkerEvent::Stopped { worker_id } => {
                tracing::info!(%worker_id, "Worker stopped");
            }
        }
    }
}

/// Worker that polls the application queue and drives items through the
/// external apply operation.
pub struct QueueWorker<Q, C, A, N>
where
    Q: JobQueueStore,
    C: CampaignStore,
    A: Applier,
    N: NotifySink,
{
    queue: Q,
    campaigns: C,
    applier: A,
    notifier: N,
    rate_limiter: RateLimiter,
    config: WorkerConfig,
    /// (user_id, platform) → not-runnable-until.
    cooldowns: Arc<Mutex<HashMap<(String, String), DateTime<Utc>>>>,
}

impl<Q, C, A, N> QueueWorker<Q, C, A, N>
where
    Q: JobQueueStore,
    C: CampaignStore,
    A: Applier,
    N: NotifySink,
{
    pub fn new(
        queue: Q,
        campaigns: C,
        applier: A,
        notifier: N,
        rate_limiter: RateLimiter,
        config: WorkerConfig,
    ) -> Self {
        Self {
            queue,
            campaigns,
            applier,
            notifier,
            rate_limiter,
            config,
            cooldowns: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.config.worker_id
    }

    /// Active cooldown expiry for (user, platform), if any.
    pub fn cooldown_until(&self, user_id: &str, platform: &str) -> Option<DateTime<Utc>> {
        let cooldowns = self.cooldowns.lock().unwrap_or_else(|p| p.into_inner());
        cooldowns
            .get(&(user_id.to_string(), platform.to_string()))
            .copied()
            .filter(|until| *until > Utc::now())
    }

    /// Run the worker loop until cancellation.
    pub async fn run<WR: WorkerReporter>(
        &self,
        cancel_token: CancellationToken,
        reporter: &WR,
    ) -> Result<(), EngineError> {
        reporter.report(WorkerEvent::Started {
            worker_id: &self.config.worker_id,
        });

        loop {
            if cancel_token.is_cancelled() {
                break;
            }

            // Orphaned locks from crashed workers go back to the queue.
            match self.queue.reclaim_expired_locks(self.config.lock_lease).await {
                Ok(0) | Err(_) => {}
                Ok(n) => tracing::warn!(reclaimed = n, "Reclaimed orphaned locks"),
            }

            reporter.report(WorkerEvent::Polling);

            match self.queue.claim_next(&self.config.worker_id).await {
                Ok(Some(item)) => {
                    reporter.report(WorkerEvent::ItemClaimed { item: &item });
                    self.process_item(&item, reporter).await;
                }
                Ok(None) => {
                    tokio::select! {
                        () = tokio::time::sleep(self.config.poll_interval) => {}
                        () = cancel_token.cancelled() => break,
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to claim queue item");
                    tokio::select! {
                        () = tokio::time::sleep(self.config.poll_interval * 2) => {}
                        () = cancel_token.cancelled() => break,
                    }
                }
            }
        }

        // Graceful shutdown: release everything this worker still holds.
        let released = self
            .queue
            .release_worker_locks(&self.config.worker_id)
            .await
            .unwrap_or(0);

        reporter.report(WorkerEvent::ShuttingDown {
            worker_id: &self.config.worker_id,
            locks_released: released,
        });
        reporter.report(WorkerEvent::Stopped {
            worker_id: &self.config.worker_id,
        });

        Ok(())
    }

    async fn process_item<WR: WorkerReporter>(&self, item: &QueueItem, reporter: &WR) {
        let platform = item
            .platform
            .clone()
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| detect_platform_from_url(&item.job_url));

        // An active cooldown reschedules without consuming an attempt.
        if let Some(until) = self.cooldown_until(&item.user_id, &platform) {
            let reason = format!("Platform cooldown until {}", until.to_rfc3339());
            if let Err(e) = self
                .queue
                .schedule_retry(item.id, item.attempts, until, &reason)
                .await
            {
                tracing::error!(item_id = %item.id, error = %e, "Failed to reschedule for cooldown");
            }
            reporter.report(WorkerEvent::ItemRescheduled {
                item_id: item.id,
                next_run_at: until,
                reason: &reason,
            });
            return;
        }

        // A denied acquire means the platform circuit is open; park the
        // item until the breaker is due to probe again, attempt untouched.
        if !self.rate_limiter.acquire(&platform).await {
            let retry_after = self
                .rate_limiter
                .retry_after(&platform)
                .await
                .unwrap_or(self.config.poll_interval);
            let next_run_at = Utc::now()
                + TimeDelta::from_std(retry_after).unwrap_or_else(|_| TimeDelta::seconds(60));
            let reason = format!("Rate limiter denied dispatch for {platform}");
            if let Err(e) = self
                .queue
                .schedule_retry(item.id, item.attempts, next_run_at, &reason)
                .await
            {
                tracing::error!(item_id = %item.id, error = %e, "Failed to reschedule for open circuit");
            }
            reporter.report(WorkerEvent::ItemRescheduled {
                item_id: item.id,
                next_run_at,
                reason: &reason,
            });
            return;
        }

        // Campaign config drives apply options.
        let campaign_config = match item.campaign_id {
            Some(campaign_id) => match self.campaigns.get_campaign(campaign_id).await {
                Ok(Some(campaign)) => campaign.parsed_config(),
                Ok(None) => CampaignConfig::default(),
                Err(e) => {
                    tracing::error!(%campaign_id, error = %e, "Failed to load campaign config");
                    CampaignConfig::default()
                }
            },
            None => CampaignConfig::default(),
        };
        let options = ApplyOptions {
            auto_submit: campaign_config.auto_submit,
            generate_cover_letter: campaign_config.generate_cover_letter,
            cover_letter_tone: campaign_config.cover_letter_tone,
            campaign_id: item.campaign_id,
            queue_item_id: Some(item.id),
        };

        // Human-like pacing between attempts.
        let (min_delay, max_delay) = self.config.delay_range_for(&platform);
        if max_delay > Duration::ZERO {
            tokio::time::sleep(rand_duration_between(min_delay, max_delay)).await;
        }

        let attempts = item.attempts + 1;
        match self
            .applier
            .apply(&item.user_id, &item.job_url, &item.payload, &options)
            .await
        {
            Ok(record) => {
                if let Err(e) = self
                    .queue
                    .complete_item(
                        item.id,
                        Some(&record.application_id),
                        QueueItemStatus::Completed,
                        attempts,
                        None,
                    )
                    .await
                {
                    tracing::error!(item_id = %item.id, error = %e, "Failed to mark item completed");
                }
                self.rate_limiter.record_success(&platform).await;
                self.notifier
                    .notify(EngineEvent::ApplicationCompleted {
                        item_id: item.id,
                        application_id: Some(record.application_id.clone()),
                        job_url: item.job_url.clone(),
                    })
                    .await;
                reporter.report(WorkerEvent::ItemCompleted {
                    item_id: item.id,
                    application_id: Some(&record.application_id),
                });
            }
            Err(error) => {
                self.handle_failure(item, &platform, attempts, error, reporter)
                    .await;
            }
        }
    }

    async fn handle_failure<WR: WorkerReporter>(
        &self,
        item: &QueueItem,
        platform: &str,
        attempts: u32,
        error: EngineError,
        reporter: &WR,
    ) {
        let error_text = error.to_string();

        if error.is_rate_limited() {
            self.rate_limiter.record_failure(platform, &error_text).await;
            let until = self.open_cooldown(&item.user_id, platform);
            reporter.report(WorkerEvent::CooldownSet { platform, until });

            // A daily cap is a policy stop, not a transient blip.
            if error.is_daily_limit()
                && let Some(campaign_id) = item.campaign_id
            {
                self.pause_campaign(campaign_id, &error_text, reporter).await;
            }

            if attempts >= item.max_attempts {
                // Rate limiting at the end of the retry budget usually
                // signals a systemic block.
                self.fail_item(item, attempts, &error_text, reporter).await;
                if let Some(campaign_id) = item.campaign_id {
                    self.pause_campaign(
                        campaign_id,
                        &format!("Rate limited: {error_text}"),
                        reporter,
                    )
                    .await;
                }
            } else {
                let delay = self.config.retry_policy.next_delay(attempts, true);
                self.reschedule(item, attempts, delay, &error_text, reporter)
                    .await;
            }
            return;
        }

        // Timeouts and dead sessions count against the platform's breaker;
        // item-specific permanent errors do not.
        if error.should_trip_circuit() {
            self.rate_limiter.record_failure(platform, &error_text).await;
        }

        if error.is_permanent() || attempts >= item.max_attempts {
            self.fail_item(item, attempts, &error_text, reporter).await;
            if let Some(campaign_id) = item.campaign_id {
                self.pause_campaign(campaign_id, &error_text, reporter).await;
            }
            return;
        }

        let delay = self.config.retry_policy.next_delay(attempts, false);
        self.reschedule(item, attempts, delay, &error_text, reporter)
            .await;
    }

    fn open_cooldown(&self, user_id: &str, platform: &str) -> DateTime<Utc> {
        let jitter = Duration::from_millis(rand_jitter_ms(
            self.config.cooldown_jitter.as_millis() as u64
        ));
        let until = Utc::now()
            + TimeDelta::from_std(self.config.rate_limit_cooldown + jitter)
                .unwrap_or_else(|_| TimeDelta::minutes(30));
        let mut cooldowns = self.cooldowns.lock().unwrap_or_else(|p| p.into_inner());
        cooldowns.insert((user_id.to_string(), platform.to_string()), until);
        until
    }

    async fn reschedule<WR: WorkerReporter>(
        &self,
        item: &QueueItem,
        attempts: u32,
        delay: Duration,
        error_text: &str,
        reporter: &WR,
    ) {
        let next_run_at =
            Utc::now() + TimeDelta::from_std(delay).unwrap_or_else(|_| TimeDelta::minutes(30));
        if let Err(e) = self
            .queue
            .schedule_retry(item.id, attempts, next_run_at, error_text)
            .await
        {
            tracing::error!(item_id = %item.id, error = %e, "Failed to schedule retry");
        }
        reporter.report(WorkerEvent::ItemFailed {
            item_id: item.id,
            error: error_text,
            will_retry: true,
        });
    }

    async fn fail_item<WR: WorkerReporter>(
        &self,
        item: &QueueItem,
        attempts: u32,
        error_text: &str,
        reporter: &WR,
    ) {
        if let Err(e) = self
            .queue
            .complete_item(
                item.id,
                None,
                QueueItemStatus::Failed,
                attempts,
                Some(error_text),
            )
            .await
        {
            tracing::error!(item_id = %item.id, error = %e, "Failed to mark item failed");
        }
        self.notifier
            .notify(EngineEvent::ApplicationFailed {
                item_id: item.id,
                job_url: item.job_url.clone(),
                error: error_text.to_string(),
            })
            .await;
        reporter.report(WorkerEvent::ItemFailed {
            item_id: item.id,
            error: error_text,
            will_retry: false,
        });
    }

    async fn pause_campaign<WR: WorkerReporter>(
        &self,
        campaign_id: Uuid,
        reason: &str,
        reporter: &WR,
    ) {
        if let Err(e) = self
            .campaigns
            .set_campaign_status(campaign_id, CampaignStatus::Paused, Some(reason))
            .await
        {
            tracing::error!(%campaign_id, error = %e, "Failed to pause campaign");
        }
        self.notifier
            .notify(EngineEvent::CampaignPaused {
                campaign_id,
                reason: reason.to_string(),
            })
            .await;
        reporter.report(WorkerEvent::CampaignPaused {
            campaign_id,
            reason,
        });
    }
}

/// Handle to a spawned worker task.
pub struct WorkerHandle {
    worker_id: String,
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<Result<(), EngineError>>,
}

impl WorkerHandle {
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancel the loop and wait for the worker to release its locks.
    pub async fn stop(self) -> Result<(), EngineError> {
        self.cancel.cancel();
        self.task
            .await
            .map_err(|e| EngineError::Generic(format!("Worker task join error: {e}")))?
    }
}

impl<Q, C, A, N> QueueWorker<Q, C, A, N>
where
    Q: JobQueueStore + 'static,
    C: CampaignStore + 'static,
    A: Applier + 'static,
    N: NotifySink + 'static,
{
    /// Spawn the worker loop on the current runtime.
    pub fn spawn<WR: WorkerReporter + 'static>(self, reporter: WR) -> WorkerHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let worker_id = self.config.worker_id.clone();
        let task = tokio::spawn(async move { self.run(token, &reporter).await });
        WorkerHandle {
            worker_id,
            cancel,
            task,
        }
    }
}
