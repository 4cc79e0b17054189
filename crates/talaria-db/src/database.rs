use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use talaria_core::EngineError;

use crate::campaign_repository::CampaignRepository;
use crate::config::DatabaseConfig;
use crate::queue_repository::JobQueueRepository;

/// Central database facade — owns the connection pool, runs migrations,
/// and vends repository instances.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect to PostgreSQL with the given configuration.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, EngineError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.url)
            .await
            .map_err(|e| EngineError::DatabaseError(format!("Failed to connect: {e}")))?;

        Ok(Self { pool })
    }

    /// Create a `Database` from an existing pool (useful for testing).
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<(), EngineError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| EngineError::DatabaseError(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// Get a [`JobQueueRepository`] backed by this pool.
    pub fn queue_repo(&self) -> JobQueueRepository {
        JobQueueRepository::new(self.pool.clone())
    }

    /// Get a [`CampaignRepository`] backed by this pool.
    pub fn campaign_repo(&self) -> CampaignRepository {
        CampaignRepository::new(self.pool.clone())
    }

    /// Get a reference to the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
