use chrono::{DateTime, Utc};
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

use talaria_core::campaign::{Campaign, CampaignStatus};
use talaria_core::error::EngineError;
use talaria_core::queue_store::CampaignStore;

/// PostgreSQL-backed campaign store.
#[derive(Clone)]
pub struct CampaignRepository {
    pool: Pool<Postgres>,
}

impl CampaignRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct CampaignRow {
    id: Uuid,
    user_id: String,
    name: String,
    status: String,
    config: serde_json::Value,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<CampaignRow> for Campaign {
    fn from(row: CampaignRow) -> Self {
        Campaign {
            id: row.id,
            user_id: row.user_id,
            name: row.name,
            status: row.status.parse().unwrap_or(CampaignStatus::Paused),
            config: row.config,
            last_error: row.last_error,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

impl CampaignStore for CampaignRepository {
    async fn create_campaign(
        &self,
        user_id: &str,
        name: &str,
        config: serde_json::Value,
    ) -> Result<Campaign, EngineError> {
        let row = sqlx::query_as::<_, CampaignRow>(
            r#"
            INSERT INTO campaigns (user_id, name, config)
            VALUES ($1, $2, $3)
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(name)
        .bind(&config)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| EngineError::DatabaseError(e.to_string()))?;

        Ok(row.into())
    }

    async fn get_campaign(&self, campaign_id: Uuid) -> Result<Option<Campaign>, EngineError> {
        let row = sqlx::query_as::<_, CampaignRow>(r#"SELECT * FROM campaigns WHERE id = $1"#)
            .bind(campaign_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| EngineError::DatabaseError(e.to_string()))?;

        Ok(row.map(Into::into))
    }

    async fn set_campaign_status(
        &self,
        campaign_id: Uuid,
        status: CampaignStatus,
        last_error: Option<&str>,
    ) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            UPDATE campaigns
            SET status = $2, last_error = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(campaign_id)
        .bind(status.as_str())
        .bind(last_error)
        .execute(&self.pool)
        .await
        .map_err(|e| EngineError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    async fn list_campaigns(&self, user_id: &str) -> Result<Vec<Campaign>, EngineError> {
        let rows = sqlx::query_as::<_, CampaignRow>(
            r#"
            SELECT * FROM campaigns
            WHERE user_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| EngineError::DatabaseError(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}
