use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use talaria_client::{HttpApplier, WebhookNotifier};
use talaria_core::campaign::CampaignStatus;
use talaria_core::queue::{EnqueueEntry, EnqueueRequest};
use talaria_core::queue_store::{CampaignStore, JobQueueStore};
use talaria_core::rate_limiter::RateLimiter;
use talaria_core::traits::{NotifySink, NullSink};
use talaria_core::worker::{QueueWorker, TracingWorkerReporter, WorkerConfig};
use talaria_db::{Database, DatabaseConfig};

#[derive(Parser)]
#[command(name = "talaria", version, about = "Job application autopilot execution engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run queue workers until interrupted
    Worker {
        /// Apply service endpoint (the collaborator that fills forms)
        #[arg(long, env = "TALARIA_APPLY_ENDPOINT")]
        apply_endpoint: String,

        /// Bearer token for the apply service
        #[arg(long, env = "TALARIA_API_KEY")]
        api_key: Option<String>,

        /// Number of concurrent workers
        #[arg(long, default_value_t = 1)]
        workers: usize,

        /// Queue poll interval in seconds
        #[arg(long, default_value_t = 2)]
        poll_interval: u64,

        /// Roughly double the per-platform request budgets (higher ban risk)
        #[arg(long, default_value_t = false)]
        aggressive: bool,
    },

    /// Add job URLs to the queue
    Enqueue {
        /// User the applications belong to
        #[arg(short, long)]
        user: String,

        /// CSV file with a job_url (or url) column
        #[arg(long)]
        csv: Option<PathBuf>,

        /// Job URL (repeatable)
        #[arg(long = "url")]
        urls: Vec<String>,

        /// Create a campaign with this name and attach the items to it
        #[arg(long)]
        campaign_name: Option<String>,

        /// Attach items to an existing campaign
        #[arg(long, conflicts_with = "campaign_name")]
        campaign_id: Option<Uuid>,

        /// Lower runs first
        #[arg(long, default_value_t = 50)]
        priority: i32,

        #[arg(long, default_value_t = 3)]
        max_attempts: u32,

        /// Submit forms instead of stopping at review
        #[arg(long, default_value_t = false)]
        auto_submit: bool,

        /// Cover letter tone recorded in the campaign config
        #[arg(long, default_value = "professional")]
        tone: String,
    },

    /// Show queue counts and campaign state
    Status {
        #[arg(long)]
        campaign_id: Option<Uuid>,

        /// Also list this user's campaigns
        #[arg(long)]
        user: Option<String>,
    },

    /// Manage campaign state
    Campaign {
        #[command(subcommand)]
        action: CampaignAction,
    },
}

#[derive(Subcommand)]
enum CampaignAction {
    /// Stop claiming the campaign's items (in-flight items finish)
    Pause {
        #[arg(long)]
        id: Uuid,
    },
    /// Resume a paused campaign
    Resume {
        #[arg(long)]
        id: Uuid,
    },
    /// Cancel the campaign and every unstarted queue item
    Cancel {
        #[arg(long)]
        id: Uuid,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Setup tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("talaria=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Worker {
            apply_endpoint,
            api_key,
            workers,
            poll_interval,
            aggressive,
        } => {
            let db = connect_db().await?;
            let applier = match &api_key {
                Some(key) => HttpApplier::with_api_key(&apply_endpoint, key),
                None => HttpApplier::new(&apply_endpoint),
            }
            .map_err(|e| anyhow::anyhow!(e))?;

            let rate_limiter = if aggressive {
                RateLimiter::new(true)
            } else {
                RateLimiter::from_env()
            };
            let poll_interval = Duration::from_secs(poll_interval.max(1));

            match WebhookNotifier::from_env().map_err(|e| anyhow::anyhow!(e))? {
                Some(notifier) => {
                    run_workers(db, applier, notifier, rate_limiter, workers, poll_interval).await?
                }
                None => {
                    run_workers(db, applier, NullSink, rate_limiter, workers, poll_interval).await?
                }
            }
        }

        Commands::Enqueue {
            user,
            csv,
            urls,
            campaign_name,
            campaign_id,
            priority,
            max_attempts,
            auto_submit,
            tone,
        } => {
            let db = connect_db().await?;
            cmd_enqueue(
                &db,
                &user,
                csv.as_deref(),
                urls,
                campaign_name,
                campaign_id,
                priority,
                max_attempts,
                auto_submit,
                &tone,
            )
            .await?;
        }

        Commands::Status { campaign_id, user } => {
            let db = connect_db().await?;
            cmd_status(&db, campaign_id, user.as_deref()).await?;
        }

        Commands::Campaign { action } => {
            let db = connect_db().await?;
            cmd_campaign(&db, action).await?;
        }
    }

    Ok(())
}

/// Connect to PostgreSQL using DATABASE_URL and run migrations.
async fn connect_db() -> Result<Database> {
    let config = DatabaseConfig::from_env().map_err(|e| anyhow::anyhow!(e))?;
    let db = Database::connect(&config)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;
    db.migrate().await.map_err(|e| anyhow::anyhow!(e))?;
    Ok(db)
}

async fn run_workers<N: NotifySink + 'static>(
    db: Database,
    applier: HttpApplier,
    notifier: N,
    rate_limiter: RateLimiter,
    workers: usize,
    poll_interval: Duration,
) -> Result<()> {
    let mut handles = Vec::new();
    for _ in 0..workers.max(1) {
        let config = WorkerConfig::default().with_poll_interval(poll_interval);
        let worker = QueueWorker::new(
            db.queue_repo(),
            db.campaign_repo(),
            applier.clone(),
            notifier.clone(),
            rate_limiter.clone(),
            config,
        );
        tracing::info!(worker_id = %worker.worker_id(), "Spawning worker");
        handles.push(worker.spawn(TracingWorkerReporter));
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    tracing::info!("Interrupt received, stopping workers");

    for handle in handles {
        if let Err(e) = handle.stop().await {
            tracing::error!(error = %e, "Worker shutdown error");
        }
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn cmd_enqueue(
    db: &Database,
    user: &str,
    csv: Option<&Path>,
    mut urls: Vec<String>,
    campaign_name: Option<String>,
    campaign_id: Option<Uuid>,
    priority: i32,
    max_attempts: u32,
    auto_submit: bool,
    tone: &str,
) -> Result<()> {
    if let Some(path) = csv {
        urls.extend(read_urls_csv(path)?);
    }
    if urls.is_empty() {
        anyhow::bail!("No job URLs given. Pass --url or --csv.");
    }

    let campaign_id = match (campaign_name, campaign_id) {
        (Some(name), _) => {
            let config = serde_json::json!({
                "auto_submit": auto_submit,
                "generate_cover_letter": true,
                "cover_letter_tone": tone,
            });
            let campaign = db
                .campaign_repo()
                .create_campaign(user, &name, config)
                .await
                .map_err(|e| anyhow::anyhow!(e))?;
            tracing::info!(campaign_id = %campaign.id, %name, "Created campaign");
            Some(campaign.id)
        }
        (None, existing) => existing,
    };

    let total = urls.len();
    let mut request = EnqueueRequest::new(
        user,
        urls.into_iter().map(EnqueueEntry::new).collect(),
    )
    .with_priority(priority)
    .with_max_attempts(max_attempts);
    if let Some(id) = campaign_id {
        request = request.with_campaign(id);
    }

    let inserted = db
        .queue_repo()
        .enqueue(request)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;

    println!(
        "Enqueued {inserted} of {total} URLs ({} duplicates skipped)",
        total as u64 - inserted
    );
    if let Some(id) = campaign_id {
        println!("Campaign: {id}");
    }

    Ok(())
}

async fn cmd_status(db: &Database, campaign_id: Option<Uuid>, user: Option<&str>) -> Result<()> {
    let counts = db
        .queue_repo()
        .queue_counts(campaign_id)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;

    match campaign_id {
        Some(id) => println!("Queue for campaign {id}:"),
        None => println!("Queue (all campaigns):"),
    }
    println!("  queued:          {}", counts.queued);
    println!("  in_progress:     {}", counts.in_progress);
    println!("  retry_scheduled: {}", counts.retry_scheduled);
    println!("  completed:       {}", counts.completed);
    println!("  failed:          {}", counts.failed);
    println!("  cancelled:       {}", counts.cancelled);
    println!("  total:           {}", counts.total());

    if let Some(campaign_id) = campaign_id
        && let Some(campaign) = db
            .campaign_repo()
            .get_campaign(campaign_id)
            .await
            .map_err(|e| anyhow::anyhow!(e))?
    {
        println!("\nCampaign '{}': {}", campaign.name, campaign.status);
        if let Some(error) = &campaign.last_error {
            println!("  last error: {error}");
        }
    }

    if let Some(user) = user {
        let campaigns = db
            .campaign_repo()
            .list_campaigns(user)
            .await
            .map_err(|e| anyhow::anyhow!(e))?;
        println!("\nCampaigns for {user}:");
        for campaign in campaigns {
            println!("  {}  {:<9} {}", campaign.id, campaign.status, campaign.name);
        }
    }

    Ok(())
}

async fn cmd_campaign(db: &Database, action: CampaignAction) -> Result<()> {
    let campaigns = db.campaign_repo();
    match action {
        CampaignAction::Pause { id } => {
            campaigns
                .set_campaign_status(id, CampaignStatus::Paused, Some("Paused by operator"))
                .await
                .map_err(|e| anyhow::anyhow!(e))?;
            println!("Campaign {id} paused");
        }
        CampaignAction::Resume { id } => {
            campaigns
                .set_campaign_status(id, CampaignStatus::Running, None)
                .await
                .map_err(|e| anyhow::anyhow!(e))?;
            println!("Campaign {id} resumed");
        }
        CampaignAction::Cancel { id } => {
            campaigns
                .set_campaign_status(id, CampaignStatus::Cancelled, Some("Cancelled by operator"))
                .await
                .map_err(|e| anyhow::anyhow!(e))?;
            let cancelled = db
                .queue_repo()
                .cancel_campaign_queue(id)
                .await
                .map_err(|e| anyhow::anyhow!(e))?;
            println!("Campaign {id} cancelled ({cancelled} queued items cancelled)");
        }
    }
    Ok(())
}

/// Read job URLs from a CSV file (job_url or url column; first column
/// otherwise).
fn read_urls_csv(path: &Path) -> Result<Vec<String>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to read CSV file: {}", path.display()))?;

    let headers = reader.headers()?.clone();
    let url_index = headers
        .iter()
        .position(|h| h.eq_ignore_ascii_case("job_url") || h.eq_ignore_ascii_case("url"))
        .unwrap_or(0);

    let mut urls = Vec::new();
    for record in reader.records() {
        let record = record?;
        if let Some(url) = record.get(url_index) {
            let url = url.trim();
            if !url.is_empty() {
                urls.push(url.to_string());
            }
        }
    }
    Ok(urls)
}
