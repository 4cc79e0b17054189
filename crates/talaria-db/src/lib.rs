pub mod campaign_repository;
pub mod config;
pub mod database;
pub mod queue_repository;

pub use campaign_repository::CampaignRepository;
pub use config::DatabaseConfig;
pub use database::Database;
pub use queue_repository::JobQueueRepository;
