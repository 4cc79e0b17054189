//! Browser session pooling with reuse and health checking.
//!
//! Creating the underlying resource (a stealth browser context) is the
//! single most expensive and failure-prone step in the pipeline; reuse
//! amortizes that cost while age, use-count, and health limits bound the
//! blast radius of a degraded handle.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::error::EngineError;

/// Creates, destroys, and probes the pooled external resource.
///
/// `Session` must be cheaply cloneable (e.g. an `Arc` around the real
/// handle); the pool keeps one clone and hands out others.
pub trait SessionFactory: Send + Sync + Clone {
    type Session: Clone + Send + Sync;

    fn create(
        &self,
        platform: &str,
    ) -> impl Future<Output = Result<Self::Session, EngineError>> + Send;

    fn close(&self, session: Self::Session) -> impl Future<Output = ()> + Send;

    /// Lightweight liveness check. `false` forces recycling.
    fn probe(&self, session: &Self::Session) -> impl Future<Output = bool> + Send;
}

/// Pool tuning knobs.
#[derive(Debug, Clone)]
pub struct SessionPoolConfig {
    /// Cap across all platforms; least-recently-used is evicted beyond it.
    pub max_sessions: usize,
    pub max_jobs_per_session: u32,
    pub max_session_age: Duration,
    /// Probe liveness every Nth use of a pooled session.
    pub health_check_interval: u32,
}

impl Default for SessionPoolConfig {
    fn default() -> Self {
        Self {
            max_sessions: 10,
            max_jobs_per_session: 25,
            max_session_age: Duration::from_secs(1800),
            health_check_interval: 5,
        }
    }
}

/// One pooled handle plus its usage bookkeeping.
#[derive(Debug)]
struct PooledSession<S> {
    session: S,
    created_at: Instant,
    jobs_processed: u32,
    last_used: Instant,
    /// 0.0 - 1.0; drops sharply on failures, climbs slowly on successes.
    health_score: f64,
    failure_count: u32,
}

impl<S> PooledSession<S> {
    fn new(session: S) -> Self {
        Self {
            session,
            created_at: Instant::now(),
            jobs_processed: 1,
            last_used: Instant::now(),
            health_score: 1.0,
            failure_count: 0,
        }
    }

    fn is_expired(&self, max_age: Duration) -> bool {
        self.created_at.elapsed() > max_age
    }

    fn is_overused(&self, max_jobs: u32) -> bool {
        self.jobs_processed >= max_jobs
    }

    fn is_healthy(&self) -> bool {
        self.health_score > 0.3 && self.failure_count < 3
    }
}

/// Pool counters for operator visibility.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionPoolStats {
    pub sessions_created: u64,
    pub sessions_reused: u64,
    pub sessions_recycled: u64,
    pub health_checks: u64,
    pub failed_health_checks: u64,
}

struct PoolInner<S> {
    sessions: HashMap<String, PooledSession<S>>,
    stats: SessionPoolStats,
}

/// Keyed pool of reusable external sessions, one per platform.
///
/// All mutation of pooled counters happens under the pool's own lock;
/// callers only ever see the session handle itself.
#[derive(Clone)]
pub struct SessionPool<F: SessionFactory> {
    factory: F,
    config: SessionPoolConfig,
    inner: Arc<Mutex<PoolInner<F::Session>>>,
}

impl<F: SessionFactory> SessionPool<F> {
    pub fn new(factory: F, config: SessionPoolConfig) -> Self {
        Self {
            factory,
            config,
            inner: Arc::new(Mutex::new(PoolInner {
                sessions: HashMap::new(),
                stats: SessionPoolStats::default(),
            })),
        }
    }

    /// Get or create a session for `platform`.
    ///
    /// An existing handle is reused while it is fresh, under the use cap,
    /// healthy, and (every Nth use) passes the liveness probe. Anything
    /// else is closed and replaced.
    pub async fn acquire(&self, platform: &str) -> Result<F::Session, EngineError> {
        let platform = platform.to_lowercase();
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;

        if let Some(pooled) = inner.sessions.get(&platform) {
            let should_recycle = pooled.is_expired(self.config.max_session_age)
                || pooled.is_overused(self.config.max_jobs_per_session)
                || !pooled.is_healthy();

            if should_recycle {
                tracing::debug!(
                    platform = %platform,
                    age_secs = pooled.created_at.elapsed().as_secs(),
                    jobs = pooled.jobs_processed,
                    "Recycling pooled session"
                );
                let pooled = inner.sessions.remove(&platform).expect("checked above");
                inner.stats.sessions_recycled += 1;
                self.factory.close(pooled.session).await;
            } else {
                let due_for_probe = pooled.jobs_processed % self.config.health_check_interval == 0;
                if due_for_probe {
                    inner.stats.health_checks += 1;
                    let alive = self.factory.probe(&pooled.session).await;
                    if !alive {
                        tracing::debug!(platform = %platform, "Liveness probe failed, recycling");
                        inner.stats.failed_health_checks += 1;
                        let pooled = inner.sessions.remove(&platform).expect("checked above");
                        inner.stats.sessions_recycled += 1;
                        self.factory.close(pooled.session).await;
                    }
                }
                if let Some(pooled) = inner.sessions.get_mut(&platform) {
                    pooled.last_used = Instant::now();
                    pooled.jobs_processed += 1;
                    let session = pooled.session.clone();
                    inner.stats.sessions_reused += 1;
                    tracing::debug!(platform = %platform, "Reusing pooled session");
                    return Ok(session);
                }
            }
        }

        // Evict the least-recently-used session if the pool is full.
        if inner.sessions.len() >= self.config.max_sessions {
            if let Some(lru_key) = inner
                .sessions
                .iter()
                .min_by_key(|(_, p)| p.last_used)
                .map(|(k, _)| k.clone())
            {
                tracing::debug!(platform = %lru_key, "Pool full, evicting least-recently-used session");
                let evicted = inner.sessions.remove(&lru_key).expect("key from iteration");
                inner.stats.sessions_recycled += 1;
                self.factory.close(evicted.session).await;
            }
        }

        tracing::debug!(platform = %platform, "Creating new session");
        let session = self.factory.create(&platform).await?;
        inner
            .sessions
            .insert(platform.clone(), PooledSession::new(session.clone()));
        inner.stats.sessions_created += 1;
        tracing::info!(
            platform = %platform,
            active = inner.sessions.len(),
            max = self.config.max_sessions,
            "Created new pooled session"
        );
        Ok(session)
    }

    /// Report the outcome of the job that used the platform's session.
    ///
    /// Health climbs slowly on success and drops sharply on failure;
    /// three consecutive failures close the handle on the spot.
    pub async fn release(&self, platform: &str, success: bool) {
        let platform = platform.to_lowercase();
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;

        let Some(pooled) = inner.sessions.get_mut(&platform) else {
            return;
        };

        if success {
            pooled.health_score = (pooled.health_score + 0.1).min(1.0);
            pooled.failure_count = 0;
        } else {
            pooled.failure_count += 1;
            pooled.health_score = (pooled.health_score - 0.3).max(0.0);

            if pooled.failure_count >= 3 {
                tracing::debug!(platform = %platform, "Too many consecutive failures, recycling");
                let pooled = inner.sessions.remove(&platform).expect("checked above");
                inner.stats.sessions_recycled += 1;
                self.factory.close(pooled.session).await;
            }
        }
    }

    /// Close every pooled session (shutdown path).
    pub async fn cleanup(&self) {
        let mut inner = self.inner.lock().await;
        for (_, pooled) in inner.sessions.drain() {
            self.factory.close(pooled.session).await;
        }
        tracing::info!("All pooled sessions closed");
    }

    pub async fn stats(&self) -> SessionPoolStats {
        self.inner.lock().await.stats
    }

    pub async fn active_sessions(&self) -> usize {
        self.inner.lock().await.sessions.len()
    }
}
