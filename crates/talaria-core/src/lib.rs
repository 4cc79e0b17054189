pub mod batch;
pub mod campaign;
pub mod circuit_breaker;
pub mod error;
pub mod platform;
pub mod queue;
pub mod queue_store;
pub mod rate_limiter;
pub mod retry;
pub mod session_pool;
pub mod testutil;
pub mod traits;
pub mod util;
pub mod worker;

pub use campaign::{Campaign, CampaignConfig, CampaignStatus};
pub use error::EngineError;
pub use queue::{EnqueueEntry, EnqueueRequest, QueueCounts, QueueItem, QueueItemStatus};
pub use queue_store::{CampaignStore, JobQueueStore};
pub use traits::{ApplicationRecord, ApplicationStatus, Applier, ApplyOptions, EngineEvent, NotifySink};
