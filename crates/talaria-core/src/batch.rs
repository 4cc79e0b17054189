//! One-shot bulk processing with platform grouping and checkpointing.
//!
//! Platform grouping is what makes session reuse possible: every item in
//! a group goes through the group's single pooled session, one at a time.
//! Groups run concurrently under a semaphore. A checkpoint is written
//! after every chunk, so a crash loses at most one chunk of progress
//! without requiring the full durability of the persistent queue.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;

use crate::error::EngineError;
use crate::rate_limiter::RateLimiter;
use crate::session_pool::{SessionFactory, SessionPool};
use crate::traits::ApplicationRecord;

/// A job in a batch. Lives in memory for the duration of one run.
#[derive(Debug, Clone)]
pub struct BatchJob {
    pub job_id: String,
    pub platform: String,
    pub payload: serde_json::Value,
    /// Lower runs first. Default 50.
    pub priority: i32,
    pub max_retries: u32,
}

impl BatchJob {
    pub fn new(job_id: impl Into<String>, platform: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            platform: platform.into(),
            payload: serde_json::Value::Null,
            priority: 50,
            max_retries: 3,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }
}

/// Result of processing one batch job.
#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub job_id: String,
    pub success: bool,
    pub application_id: Option<String>,
    pub error: Option<String>,
    pub duration_seconds: f64,
    pub retries_used: u32,
}

impl BatchResult {
    fn failed(job_id: &str, error: String, retries_used: u32) -> Self {
        Self {
            job_id: job_id.to_string(),
            success: false,
            application_id: None,
            error: Some(error),
            duration_seconds: 0.0,
            retries_used,
        }
    }
}

/// Aggregate counters for one processor instance.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct BatchStats {
    pub chunks_processed: u64,
    pub jobs_processed: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub jobs_retried: u64,
}

/// Serializable snapshot persisted after every chunk.
#[derive(Debug, Serialize)]
pub struct BatchCheckpoint<'a> {
    pub timestamp: chrono::DateTime<Utc>,
    pub stats: BatchStats,
    pub results: &'a [BatchResult],
}

/// Receives checkpoints. Failures must not abort the run; the processor
/// logs and continues.
pub trait CheckpointSink: Send + Sync + Clone {
    fn save(&self, checkpoint: &BatchCheckpoint<'_>) -> Result<(), EngineError>;
}

/// Sink that discards checkpoints (tests, callers with their own durability).
#[derive(Debug, Clone, Copy, Default)]
pub struct NullCheckpointSink;

impl CheckpointSink for NullCheckpointSink {
    fn save(&self, _checkpoint: &BatchCheckpoint<'_>) -> Result<(), EngineError> {
        Ok(())
    }
}

/// Writes each checkpoint as a timestamped JSON file in a directory.
#[derive(Debug, Clone)]
pub struct JsonCheckpointSink {
    dir: PathBuf,
}

impl JsonCheckpointSink {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, EngineError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .map_err(|e| EngineError::ConfigError(format!("Cannot create checkpoint dir: {e}")))?;
        Ok(Self { dir })
    }
}

impl CheckpointSink for JsonCheckpointSink {
    fn save(&self, checkpoint: &BatchCheckpoint<'_>) -> Result<(), EngineError> {
        let filename = format!(
            "batch_{}_{:04}.json",
            checkpoint.timestamp.format("%Y%m%d_%H%M%S"),
            checkpoint.stats.chunks_processed
        );
        let path = self.dir.join(filename);
        let json = serde_json::to_string_pretty(checkpoint)?;
        std::fs::write(&path, json)
            .map_err(|e| EngineError::Generic(format!("Checkpoint write failed: {e}")))?;
        Ok(())
    }
}

/// Processor tuning knobs.
#[derive(Debug, Clone)]
pub struct BatchProcessorConfig {
    pub chunk_size: usize,
    /// Concurrent platform groups across the whole run.
    pub max_concurrent: usize,
    /// Base for the short in-process retry backoff (`base × 2^attempt`).
    pub retry_base: Duration,
    pub retry_cap: Duration,
}

impl Default for BatchProcessorConfig {
    fn default() -> Self {
        Self {
            chunk_size: 25,
            max_concurrent: 7,
            retry_base: Duration::from_secs(1),
            retry_cap: Duration::from_secs(30),
        }
    }
}

/// Drives a fixed list of jobs through the rate limiter and session pool
/// with bounded concurrency.
#[derive(Clone)]
pub struct BatchProcessor<F: SessionFactory, K: CheckpointSink> {
    config: BatchProcessorConfig,
    rate_limiter: RateLimiter,
    pool: SessionPool<F>,
    checkpoints: K,
    semaphore: Arc<tokio::sync::Semaphore>,
    stats: Arc<Mutex<BatchStats>>,
}

impl<F, K> BatchProcessor<F, K>
where
    F: SessionFactory + 'static,
    F::Session: 'static,
    K: CheckpointSink + 'static,
{
    pub fn new(
        rate_limiter: RateLimiter,
        pool: SessionPool<F>,
        checkpoints: K,
        config: BatchProcessorConfig,
    ) -> Self {
        let semaphore = Arc::new(tokio::sync::Semaphore::new(config.max_concurrent.max(1)));
        Self {
            config,
            rate_limiter,
            pool,
            checkpoints,
            semaphore,
            stats: Arc::new(Mutex::new(BatchStats::default())),
        }
    }

    pub fn stats(&self) -> BatchStats {
        *self.stats.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Process all jobs; returns one result per job (order not guaranteed
    /// across platforms).
    pub async fn process_batch<A, Fut>(&self, mut jobs: Vec<BatchJob>, apply_fn: A) -> Vec<BatchResult>
    where
        A: Fn(BatchJob, F::Session) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = Result<ApplicationRecord, EngineError>> + Send + 'static,
    {
        jobs.sort_by_key(|j| j.priority);

        let total_chunks = jobs.len().div_ceil(self.config.chunk_size.max(1));
        let mut results: Vec<BatchResult> = Vec::with_capacity(jobs.len());

        for (chunk_index, chunk) in jobs.chunks(self.config.chunk_size.max(1)).enumerate() {
            tracing::info!(
                chunk = chunk_index + 1,
                total = total_chunks,
                jobs = chunk.len(),
                "Processing chunk"
            );

            let mut groups: HashMap<String, Vec<BatchJob>> = HashMap::new();
            for job in chunk {
                groups
                    .entry(job.platform.to_lowercase())
                    .or_default()
                    .push(job.clone());
            }

            let mut tasks = tokio::task::JoinSet::new();
            for (platform, group) in groups {
                let this = self.clone();
                let apply_fn = apply_fn.clone();
                tasks.spawn(async move { this.process_platform_group(platform, group, apply_fn).await });
            }

            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(mut group_results) => results.append(&mut group_results),
                    Err(e) => tracing::error!(error = %e, "Platform group task failed"),
                }
            }

            self.with_stats(|s| s.chunks_processed += 1);
            self.save_checkpoint(&results);
        }

        results
    }

    async fn process_platform_group<A, Fut>(
        self,
        platform: String,
        jobs: Vec<BatchJob>,
        apply_fn: A,
    ) -> Vec<BatchResult>
    where
        A: Fn(BatchJob, F::Session) -> Fut + Send + Sync,
        Fut: Future<Output = Result<ApplicationRecord, EngineError>> + Send,
    {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .expect("batch semaphore is never closed");

        let session = match self.pool.acquire(&platform).await {
            Ok(session) => session,
            Err(e) => {
                tracing::error!(platform = %platform, error = %e, "Failed to acquire session");
                return jobs
                    .iter()
                    .map(|job| {
                        BatchResult::failed(&job.job_id, format!("Session acquisition failed: {e}"), 0)
                    })
                    .collect();
            }
        };

        let mut results = Vec::with_capacity(jobs.len());
        // One session, one job at a time: items in a group are sequential.
        for job in jobs {
            if !self.rate_limiter.acquire(&platform).await {
                results.push(BatchResult::failed(
                    &job.job_id,
                    "Rate limited - circuit open".to_string(),
                    0,
                ));
                self.with_stats(|s| {
                    s.jobs_processed += 1;
                    s.jobs_failed += 1;
                });
                continue;
            }

            let result = self.process_with_retry(&job, session.clone(), &apply_fn).await;

            if result.success {
                self.rate_limiter.record_success(&platform).await;
                self.pool.release(&platform, true).await;
            } else {
                self.rate_limiter
                    .record_failure(&platform, result.error.as_deref().unwrap_or("unknown"))
                    .await;
                self.pool.release(&platform, false).await;
            }
            self.with_stats(|s| {
                s.jobs_processed += 1;
                if result.success {
                    s.jobs_succeeded += 1;
                } else {
                    s.jobs_failed += 1;
                }
            });
            results.push(result);
        }

        results
    }

    async fn process_with_retry<A, Fut>(
        &self,
        job: &BatchJob,
        session: F::Session,
        apply_fn: &A,
    ) -> BatchResult
    where
        A: Fn(BatchJob, F::Session) -> Fut + Send + Sync,
        Fut: Future<Output = Result<ApplicationRecord, EngineError>> + Send,
    {
        let started = Instant::now();
        let mut last_error = String::new();

        for attempt in 0..=job.max_retries {
            match apply_fn(job.clone(), session.clone()).await {
                Ok(record) => {
                    return BatchResult {
                        job_id: job.job_id.clone(),
                        success: true,
                        application_id: Some(record.application_id),
                        error: None,
                        duration_seconds: started.elapsed().as_secs_f64(),
                        retries_used: attempt,
                    };
                }
                Err(e) => {
                    last_error = e.to_string();
                    tracing::warn!(
                        job_id = %job.job_id,
                        attempt = attempt + 1,
                        of = job.max_retries + 1,
                        error = %last_error,
                        "Batch job attempt failed"
                    );
                    if attempt < job.max_retries {
                        tokio::time::sleep(self.retry_backoff(attempt)).await;
                        self.with_stats(|s| s.jobs_retried += 1);
                    }
                }
            }
        }

        let mut result = BatchResult::failed(&job.job_id, last_error, job.max_retries);
        result.duration_seconds = started.elapsed().as_secs_f64();
        result
    }

    fn retry_backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .config
            .retry_base
            .saturating_mul(1u32 << attempt.min(16))
            .min(self.config.retry_cap);
        exp + self.config.retry_base.mul_f64(attempt as f64 * 0.5)
    }

    fn with_stats(&self, f: impl FnOnce(&mut BatchStats)) {
        let mut stats = self.stats.lock().unwrap_or_else(|p| p.into_inner());
        f(&mut stats);
    }

    fn save_checkpoint(&self, results: &[BatchResult]) {
        let checkpoint = BatchCheckpoint {
            timestamp: Utc::now(),
            stats: self.stats(),
            results,
        };
        if let Err(e) = self.checkpoints.save(&checkpoint) {
            tracing::warn!(error = %e, "Failed to save checkpoint");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session_pool::SessionPoolConfig;
    use crate::testutil::MockSessionFactory;
    use crate::traits::ApplicationStatus;

    fn processor(
        config: BatchProcessorConfig,
    ) -> (BatchProcessor<MockSessionFactory, NullCheckpointSink>, MockSessionFactory) {
        let factory = MockSessionFactory::new();
        let pool = SessionPool::new(factory.clone(), SessionPoolConfig::default());
        let processor =
            BatchProcessor::new(RateLimiter::new(false), pool, NullCheckpointSink, config);
        (processor, factory)
    }

    fn fast_config() -> BatchProcessorConfig {
        BatchProcessorConfig {
            retry_base: Duration::from_millis(1),
            ..Default::default()
        }
    }

    fn ok_record() -> ApplicationRecord {
        ApplicationRecord {
            application_id: "app-1".to_string(),
            status: ApplicationStatus::Submitted,
            message: None,
        }
    }

    #[tokio::test]
    async fn processes_jobs_in_priority_order() {
        let (processor, _factory) = processor(fast_config());
        let order = Arc::new(Mutex::new(Vec::new()));

        let jobs = vec![
            BatchJob::new("low", "greenhouse").with_priority(90),
            BatchJob::new("high", "greenhouse").with_priority(10),
            BatchJob::new("mid", "greenhouse").with_priority(50),
        ];

        let seen = order.clone();
        let results = processor
            .process_batch(jobs, move |job, _session| {
                let seen = seen.clone();
                async move {
                    seen.lock().unwrap().push(job.job_id.clone());
                    Ok(ok_record())
                }
            })
            .await;

        assert_eq!(results.len(), 3);
        assert_eq!(*order.lock().unwrap(), vec!["high", "mid", "low"]);
    }

    #[tokio::test]
    async fn one_session_per_platform_group() {
        let (processor, factory) = processor(fast_config());

        let jobs = vec![
            BatchJob::new("a", "greenhouse"),
            BatchJob::new("b", "greenhouse"),
            BatchJob::new("c", "lever"),
        ];

        let results = processor
            .process_batch(jobs, |_job, _session| async { Ok(ok_record()) })
            .await;

        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.success));
        // Two platforms → exactly two sessions, regardless of job count.
        assert_eq!(factory.created(), 2);
    }

    #[tokio::test]
    async fn retries_then_reports_failure() {
        let (processor, _factory) = processor(fast_config());

        let jobs = vec![BatchJob::new("doomed", "lever").with_max_retries(2)];
        let calls = Arc::new(Mutex::new(0u32));

        let counter = calls.clone();
        let results = processor
            .process_batch(jobs, move |_job, _session| {
                let counter = counter.clone();
                async move {
                    *counter.lock().unwrap() += 1;
                    Err::<ApplicationRecord, _>(EngineError::Timeout(5))
                }
            })
            .await;

        assert_eq!(*calls.lock().unwrap(), 3); // initial + 2 retries
        assert_eq!(results.len(), 1);
        assert!(!results[0].success);
        assert_eq!(results[0].retries_used, 2);
        assert!(results[0].error.as_deref().unwrap().contains("Timed out"));

        let stats = processor.stats();
        assert_eq!(stats.jobs_failed, 1);
        assert_eq!(stats.jobs_retried, 2);
    }

    #[tokio::test]
    async fn retry_succeeds_on_second_attempt() {
        let (processor, _factory) = processor(fast_config());

        let jobs = vec![BatchJob::new("flaky", "indeed")];
        let calls = Arc::new(Mutex::new(0u32));

        let counter = calls.clone();
        let results = processor
            .process_batch(jobs, move |_job, _session| {
                let counter = counter.clone();
                async move {
                    let mut n = counter.lock().unwrap();
                    *n += 1;
                    if *n == 1 {
                        Err(EngineError::HttpError("connection reset".into()))
                    } else {
                        Ok(ok_record())
                    }
                }
            })
            .await;

        assert!(results[0].success);
        assert_eq!(results[0].retries_used, 1);
        assert_eq!(processor.stats().jobs_succeeded, 1);
    }

    #[tokio::test]
    async fn open_circuit_skips_jobs_without_calling_apply() {
        let (processor, _factory) = processor(fast_config());
        for _ in 0..5 {
            processor.rate_limiter.record_failure("linkedin", "429").await;
        }

        let calls = Arc::new(Mutex::new(0u32));
        let counter = calls.clone();
        let results = processor
            .process_batch(
                vec![BatchJob::new("blocked", "linkedin")],
                move |_job, _session| {
                    let counter = counter.clone();
                    async move {
                        *counter.lock().unwrap() += 1;
                        Ok(ok_record())
                    }
                },
            )
            .await;

        assert_eq!(*calls.lock().unwrap(), 0);
        assert!(!results[0].success);
        assert!(results[0].error.as_deref().unwrap().contains("circuit open"));
    }

    #[tokio::test]
    async fn session_failure_fails_the_whole_group() {
        let factory = MockSessionFactory::failing();
        let pool = SessionPool::new(factory.clone(), SessionPoolConfig::default());
        let processor =
            BatchProcessor::new(RateLimiter::new(false), pool, NullCheckpointSink, fast_config());

        let results = processor
            .process_batch(
                vec![BatchJob::new("a", "workday"), BatchJob::new("b", "workday")],
                |_job, _session: usize| async { Ok(ok_record()) },
            )
            .await;

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| !r.success));
        assert!(
            results
                .iter()
                .all(|r| r.error.as_deref().unwrap().contains("Session acquisition failed"))
        );
    }

    #[tokio::test]
    async fn checkpoint_written_after_every_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonCheckpointSink::new(dir.path()).unwrap();
        let factory = MockSessionFactory::new();
        let pool = SessionPool::new(factory, SessionPoolConfig::default());
        let processor = BatchProcessor::new(
            RateLimiter::new(false),
            pool,
            sink,
            BatchProcessorConfig {
                chunk_size: 1,
                retry_base: Duration::from_millis(1),
                ..Default::default()
            },
        );

        let jobs = vec![
            BatchJob::new("a", "greenhouse"),
            BatchJob::new("b", "greenhouse"),
            BatchJob::new("c", "greenhouse"),
        ];
        processor
            .process_batch(jobs, |_job, _session| async { Ok(ok_record()) })
            .await;

        let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(files.len(), 3);
        assert_eq!(processor.stats().chunks_processed, 3);
    }
}
