use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use testcontainers::core::{ContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage, ImageExt};

/// SQL migration statements, executed one at a time.
const MIGRATIONS: &[&str] = &[
    // 001_campaigns.sql
    r#"CREATE TABLE IF NOT EXISTS campaigns (
        id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
        user_id VARCHAR(255) NOT NULL,
        name VARCHAR NOT NULL,
        status VARCHAR(20) NOT NULL DEFAULT 'running',
        config JSONB NOT NULL DEFAULT '{}'::jsonb,
        last_error TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        CONSTRAINT chk_campaigns_status CHECK (
            status IN ('running', 'paused', 'cancelled')
        )
    )"#,
    r#"CREATE INDEX IF NOT EXISTS idx_campaigns_user
        ON campaigns(user_id, created_at DESC)"#,
    // 002_job_queue.sql
    r#"CREATE TABLE IF NOT EXISTS job_queue (
        id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
        campaign_id UUID REFERENCES campaigns(id),
        user_id VARCHAR(255) NOT NULL,
        job_url VARCHAR NOT NULL,
        platform VARCHAR(50),
        status VARCHAR(20) NOT NULL DEFAULT 'queued',
        priority INTEGER NOT NULL DEFAULT 50,
        attempts INTEGER NOT NULL DEFAULT 0,
        max_attempts INTEGER NOT NULL DEFAULT 3,
        next_run_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        locked_at TIMESTAMPTZ,
        locked_by VARCHAR(255),
        last_error TEXT,
        payload JSONB NOT NULL DEFAULT 'null'::jsonb,
        application_id VARCHAR(255),
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        CONSTRAINT chk_job_queue_status CHECK (
            status IN ('queued', 'in_progress', 'retry_scheduled', 'completed', 'failed', 'cancelled')
        )
    )"#,
    r#"CREATE INDEX IF NOT EXISTS idx_job_queue_claim ON job_queue(status, next_run_at)"#,
    r#"CREATE INDEX IF NOT EXISTS idx_job_queue_campaign ON job_queue(campaign_id)"#,
    r#"CREATE INDEX IF NOT EXISTS idx_job_queue_locked ON job_queue(locked_by) WHERE status = 'in_progress'"#,
    r#"CREATE UNIQUE INDEX IF NOT EXISTS uq_job_queue_user_url_active
        ON job_queue(user_id, job_url)
        WHERE status IN ('queued', 'in_progress', 'retry_scheduled')"#,
];

/// Spins up a PostgreSQL container and returns a connected pool.
///
/// The `ContainerAsync` must be kept in scope for the test duration —
/// dropping it will stop the container.
pub async fn setup_test_db() -> (PgPool, ContainerAsync<GenericImage>) {
    let container = GenericImage::new("postgres", "16")
        .with_exposed_port(ContainerPort::Tcp(5432))
        .with_wait_for(WaitFor::message_on_stderr(
            "database system is ready to accept connections",
        ))
        .with_env_var("POSTGRES_PASSWORD", "postgres")
        .with_env_var("POSTGRES_DB", "talaria_test")
        .start()
        .await
        .expect("Failed to start PostgreSQL container");

    let host = container.get_host().await.expect("Failed to get host");
    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("Failed to get port");

    let connection_string = format!("postgresql://postgres:postgres@{host}:{port}/talaria_test");

    // Retry connection until container is fully ready
    const MAX_RETRIES: u32 = 30;
    let mut retries = 0;
    let pool = loop {
        match PgPoolOptions::new()
            .max_connections(5)
            .connect(&connection_string)
            .await
        {
            Ok(pool) => break pool,
            Err(e) => {
                retries += 1;
                if retries >= MAX_RETRIES {
                    panic!("Failed to connect to database after {MAX_RETRIES} retries: {e}");
                }
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        }
    };

    // Run migrations one statement at a time
    for migration in MIGRATIONS {
        sqlx::query(migration)
            .execute(&pool)
            .await
            .expect("Failed to run migration");
    }

    (pool, container)
}
