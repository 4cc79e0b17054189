use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

use talaria_core::error::EngineError;
use talaria_core::queue::{EnqueueRequest, QueueCounts, QueueItem, QueueItemStatus};
use talaria_core::queue_store::JobQueueStore;

/// PostgreSQL-backed application queue using `SELECT FOR UPDATE SKIP LOCKED`.
#[derive(Clone)]
pub struct JobQueueRepository {
    pool: Pool<Postgres>,
}

impl JobQueueRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// -- Internal row type for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct QueueItemRow {
    id: Uuid,
    campaign_id: Option<Uuid>,
    user_id: String,
    job_url: String,
    platform: Option<String>,
    status: String,
    priority: i32,
    attempts: i32,
    max_attempts: i32,
    next_run_at: DateTime<Utc>,
    locked_at: Option<DateTime<Utc>>,
    locked_by: Option<String>,
    last_error: Option<String>,
    payload: serde_json::Value,
    application_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<QueueItemRow> for QueueItem {
    fn from(row: QueueItemRow) -> Self {
        QueueItem {
            id: row.id,
            campaign_id: row.campaign_id,
            user_id: row.user_id,
            job_url: row.job_url,
            platform: row.platform,
            status: row.status.parse().unwrap_or(QueueItemStatus::Queued),
            priority: row.priority,
            attempts: row.attempts as u32,
            max_attempts: row.max_attempts as u32,
            next_run_at: row.next_run_at,
            locked_at: row.locked_at,
            locked_by: row.locked_by,
            last_error: row.last_error,
            payload: row.payload,
            application_id: row.application_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

impl JobQueueStore for JobQueueRepository {
    async fn enqueue(&self, request: EnqueueRequest) -> Result<u64, EngineError> {
        let mut inserted = 0u64;
        // The partial unique index on (user_id, job_url) over live rows
        // makes ON CONFLICT DO NOTHING the de-duplication step, including
        // duplicates inside the same batch.
        for entry in &request.entries {
            let result = sqlx::query(
                r#"
                INSERT INTO job_queue (campaign_id, user_id, job_url, priority, max_attempts, payload)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (user_id, job_url)
                    WHERE status IN ('queued', 'in_progress', 'retry_scheduled')
                    DO NOTHING
                "#,
            )
            .bind(request.campaign_id)
            .bind(&request.user_id)
            .bind(&entry.job_url)
            .bind(request.priority)
            .bind(request.max_attempts as i32)
            .bind(&entry.payload)
            .execute(&self.pool)
            .await
            .map_err(|e| EngineError::DatabaseError(e.to_string()))?;

            inserted += result.rows_affected();
        }

        Ok(inserted)
    }

    async fn claim_next(&self, worker_id: &str) -> Result<Option<QueueItem>, EngineError> {
        let row = sqlx::query_as::<_, QueueItemRow>(
            r#"
            UPDATE job_queue
            SET status = 'in_progress', locked_at = NOW(), locked_by = $1, updated_at = NOW()
            WHERE id = (
                SELECT jq.id FROM job_queue jq
                LEFT JOIN campaigns c ON c.id = jq.campaign_id
                WHERE jq.status IN ('queued', 'retry_scheduled')
                  AND jq.next_run_at <= NOW()
                  AND jq.locked_by IS NULL
                  AND (jq.campaign_id IS NULL OR c.status = 'running')
                ORDER BY jq.priority ASC, jq.next_run_at ASC, jq.created_at ASC
                FOR UPDATE OF jq SKIP LOCKED
                LIMIT 1
            )
            RETURNING *
            "#,
        )
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| EngineError::DatabaseError(e.to_string()))?;

        Ok(row.map(Into::into))
    }

    async fn complete_item(
        &self,
        item_id: Uuid,
        application_id: Option<&str>,
        status: QueueItemStatus,
        attempts: u32,
        last_error: Option<&str>,
    ) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            UPDATE job_queue
            SET status = $2, application_id = $3, attempts = $4, last_error = $5,
                locked_at = NULL, locked_by = NULL, updated_at = NOW()
            WHERE id = $1 AND status NOT IN ('completed', 'failed', 'cancelled')
            "#,
        )
        .bind(item_id)
        .bind(status.as_str())
        .bind(application_id)
        .bind(attempts as i32)
        .bind(last_error)
        .execute(&self.pool)
        .await
        .map_err(|e| EngineError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    async fn schedule_retry(
        &self,
        item_id: Uuid,
        attempts: u32,
        next_run_at: DateTime<Utc>,
        last_error: &str,
    ) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            UPDATE job_queue
            SET status = 'retry_scheduled', attempts = $2, next_run_at = $3, last_error = $4,
                locked_at = NULL, locked_by = NULL, updated_at = NOW()
            WHERE id = $1 AND status NOT IN ('completed', 'failed', 'cancelled')
            "#,
        )
        .bind(item_id)
        .bind(attempts as i32)
        .bind(next_run_at)
        .bind(last_error)
        .execute(&self.pool)
        .await
        .map_err(|e| EngineError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    async fn release_lock(&self, item_id: Uuid, worker_id: &str) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            UPDATE job_queue
            SET status = CASE WHEN status = 'in_progress' THEN 'queued' ELSE status END,
                locked_at = NULL, locked_by = NULL, updated_at = NOW()
            WHERE id = $1 AND locked_by = $2
            "#,
        )
        .bind(item_id)
        .bind(worker_id)
        .execute(&self.pool)
        .await
        .map_err(|e| EngineError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    async fn release_worker_locks(&self, worker_id: &str) -> Result<u64, EngineError> {
        let result = sqlx::query(
            r#"
            UPDATE job_queue
            SET status = 'queued', locked_at = NULL, locked_by = NULL, updated_at = NOW()
            WHERE locked_by = $1 AND status = 'in_progress'
            "#,
        )
        .bind(worker_id)
        .execute(&self.pool)
        .await
        .map_err(|e| EngineError::DatabaseError(e.to_string()))?;

        Ok(result.rows_affected())
    }

    async fn reclaim_expired_locks(&self, lease: Duration) -> Result<u64, EngineError> {
        let cutoff = Utc::now() - TimeDelta::from_std(lease).unwrap_or_else(|_| TimeDelta::minutes(10));
        let result = sqlx::query(
            r#"
            UPDATE job_queue
            SET status = 'queued', locked_at = NULL, locked_by = NULL, updated_at = NOW()
            WHERE status = 'in_progress' AND locked_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(|e| EngineError::DatabaseError(e.to_string()))?;

        Ok(result.rows_affected())
    }

    async fn cancel_campaign_queue(&self, campaign_id: Uuid) -> Result<u64, EngineError> {
        // Locked items are left to finish and self-resolve.
        let result = sqlx::query(
            r#"
            UPDATE job_queue
            SET status = 'cancelled', updated_at = NOW()
            WHERE campaign_id = $1
              AND status NOT IN ('completed', 'failed', 'cancelled')
              AND locked_by IS NULL
            "#,
        )
        .bind(campaign_id)
        .execute(&self.pool)
        .await
        .map_err(|e| EngineError::DatabaseError(e.to_string()))?;

        Ok(result.rows_affected())
    }

    async fn get_item(&self, item_id: Uuid) -> Result<Option<QueueItem>, EngineError> {
        let row = sqlx::query_as::<_, QueueItemRow>(r#"SELECT * FROM job_queue WHERE id = $1"#)
            .bind(item_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| EngineError::DatabaseError(e.to_string()))?;

        Ok(row.map(Into::into))
    }

    async fn list_items(
        &self,
        campaign_id: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<QueueItem>, EngineError> {
        let rows = sqlx::query_as::<_, QueueItemRow>(
            r#"
            SELECT * FROM job_queue
            WHERE ($1::uuid IS NULL OR campaign_id = $1)
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(campaign_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| EngineError::DatabaseError(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn queue_counts(&self, campaign_id: Option<Uuid>) -> Result<QueueCounts, EngineError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT status, COUNT(*) FROM job_queue
            WHERE ($1::uuid IS NULL OR campaign_id = $1)
            GROUP BY status
            "#,
        )
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| EngineError::DatabaseError(e.to_string()))?;

        let mut counts = QueueCounts::default();
        for (status, count) in rows {
            match status.parse::<QueueItemStatus>() {
                Ok(QueueItemStatus::Queued) => counts.queued = count,
                Ok(QueueItemStatus::InProgress) => counts.in_progress = count,
                Ok(QueueItemStatus::RetryScheduled) => counts.retry_scheduled = count,
                Ok(QueueItemStatus::Completed) => counts.completed = count,
                Ok(QueueItemStatus::Failed) => counts.failed = count,
                Ok(QueueItemStatus::Cancelled) => counts.cancelled = count,
                Err(_) => tracing::warn!(%status, "Unknown status in job_queue"),
            }
        }
        Ok(counts)
    }
}
