use std::time::Duration;

use talaria_core::campaign::CampaignStatus;
use talaria_core::queue::{EnqueueEntry, EnqueueRequest, QueueItemStatus};
use talaria_core::queue_store::{CampaignStore, JobQueueStore};
use talaria_db::{CampaignRepository, JobQueueRepository};

use crate::integration::common::setup_test_db;

fn request(user: &str, urls: &[&str]) -> EnqueueRequest {
    EnqueueRequest::new(
        user,
        urls.iter().map(|u| EnqueueEntry::new(*u)).collect(),
    )
}

#[tokio::test]
async fn enqueue_inserts_items() {
    let (pool, _container) = setup_test_db().await;
    let repo = JobQueueRepository::new(pool);

    let inserted = repo
        .enqueue(request(
            "user-1",
            &[
                "https://boards.greenhouse.io/acme/jobs/1",
                "https://jobs.lever.co/acme/2",
            ],
        ))
        .await
        .unwrap();

    assert_eq!(inserted, 2);
    let counts = repo.queue_counts(None).await.unwrap();
    assert_eq!(counts.queued, 2);
}

#[tokio::test]
async fn enqueue_dedupes_live_user_url_pairs() {
    let (pool, _container) = setup_test_db().await;
    let repo = JobQueueRepository::new(pool);

    let url = "https://boards.greenhouse.io/acme/jobs/1";
    let first = repo.enqueue(request("user-1", &[url])).await.unwrap();
    let second = repo.enqueue(request("user-1", &[url])).await.unwrap();

    assert_eq!(first, 1);
    assert_eq!(second, 0);

    // Same URL within one batch is also collapsed.
    let batch = repo
        .enqueue(request("user-1", &["https://jobs.lever.co/acme/9", "https://jobs.lever.co/acme/9"]))
        .await
        .unwrap();
    assert_eq!(batch, 1);

    // A different user is a different identity.
    let other_user = repo.enqueue(request("user-2", &[url])).await.unwrap();
    assert_eq!(other_user, 1);
}

#[tokio::test]
async fn enqueue_allows_requeue_after_terminal() {
    let (pool, _container) = setup_test_db().await;
    let repo = JobQueueRepository::new(pool);

    let url = "https://jobs.lever.co/acme/1";
    repo.enqueue(request("user-1", &[url])).await.unwrap();
    let item = repo.claim_next("worker-1").await.unwrap().unwrap();
    repo.complete_item(item.id, Some("app-1"), QueueItemStatus::Completed, 1, None)
        .await
        .unwrap();

    let inserted = repo.enqueue(request("user-1", &[url])).await.unwrap();
    assert_eq!(inserted, 1);
}

#[tokio::test]
async fn claim_sets_lock_and_status() {
    let (pool, _container) = setup_test_db().await;
    let repo = JobQueueRepository::new(pool);

    repo.enqueue(request("user-1", &["https://jobs.lever.co/acme/1"]))
        .await
        .unwrap();

    let claimed = repo
        .claim_next("worker-1")
        .await
        .unwrap()
        .expect("Should claim the item");

    assert_eq!(claimed.status, QueueItemStatus::InProgress);
    assert_eq!(claimed.locked_by.as_deref(), Some("worker-1"));
    assert!(claimed.locked_at.is_some());
}

#[tokio::test]
async fn claim_returns_none_when_empty() {
    let (pool, _container) = setup_test_db().await;
    let repo = JobQueueRepository::new(pool);

    let claimed = repo.claim_next("worker-1").await.unwrap();
    assert!(claimed.is_none());
}

#[tokio::test]
async fn claimed_item_is_not_claimable_again() {
    let (pool, _container) = setup_test_db().await;
    let repo = JobQueueRepository::new(pool);

    repo.enqueue(request("user-1", &["https://jobs.lever.co/acme/1"]))
        .await
        .unwrap();

    assert!(repo.claim_next("worker-1").await.unwrap().is_some());
    assert!(repo.claim_next("worker-2").await.unwrap().is_none());
}

#[tokio::test]
async fn concurrent_claimers_never_share_an_item() {
    let (pool, _container) = setup_test_db().await;
    let repo = JobQueueRepository::new(pool);

    let urls: Vec<String> = (0..5)
        .map(|i| format!("https://boards.greenhouse.io/acme/jobs/{i}"))
        .collect();
    let url_refs: Vec<&str> = urls.iter().map(String::as_str).collect();
    repo.enqueue(request("user-1", &url_refs)).await.unwrap();

    let mut tasks = tokio::task::JoinSet::new();
    for worker in 0..10 {
        let repo = repo.clone();
        tasks.spawn(async move { repo.claim_next(&format!("worker-{worker}")).await.unwrap() });
    }

    let mut claimed_ids = Vec::new();
    while let Some(result) = tasks.join_next().await {
        if let Some(item) = result.unwrap() {
            claimed_ids.push(item.id);
        }
    }

    claimed_ids.sort();
    claimed_ids.dedup();
    assert_eq!(claimed_ids.len(), 5, "each item claimed exactly once");
}

#[tokio::test]
async fn claim_respects_next_run_at() {
    let (pool, _container) = setup_test_db().await;
    let repo = JobQueueRepository::new(pool);

    repo.enqueue(request("user-1", &["https://jobs.lever.co/acme/1"]))
        .await
        .unwrap();
    let item = repo.claim_next("worker-1").await.unwrap().unwrap();

    // Push the retry into the future: not claimable yet.
    let future = chrono::Utc::now() + chrono::TimeDelta::minutes(5);
    repo.schedule_retry(item.id, 1, future, "transient error")
        .await
        .unwrap();
    assert!(repo.claim_next("worker-1").await.unwrap().is_none());

    // Move it into the past: claimable again.
    let past = chrono::Utc::now() - chrono::TimeDelta::seconds(1);
    repo.schedule_retry(item.id, 1, past, "transient error")
        .await
        .unwrap();
    let reclaimed = repo.claim_next("worker-1").await.unwrap().unwrap();
    assert_eq!(reclaimed.id, item.id);
    assert_eq!(reclaimed.attempts, 1);
}

#[tokio::test]
async fn claim_skips_non_running_campaigns() {
    let (pool, _container) = setup_test_db().await;
    let campaigns = CampaignRepository::new(pool.clone());
    let repo = JobQueueRepository::new(pool);

    let campaign = campaigns
        .create_campaign("user-1", "spring push", serde_json::json!({}))
        .await
        .unwrap();
    repo.enqueue(
        request("user-1", &["https://jobs.lever.co/acme/1"]).with_campaign(campaign.id),
    )
    .await
    .unwrap();

    campaigns
        .set_campaign_status(campaign.id, CampaignStatus::Paused, Some("operator stop"))
        .await
        .unwrap();
    assert!(repo.claim_next("worker-1").await.unwrap().is_none());

    campaigns
        .set_campaign_status(campaign.id, CampaignStatus::Running, None)
        .await
        .unwrap();
    assert!(repo.claim_next("worker-1").await.unwrap().is_some());
}

#[tokio::test]
async fn claim_orders_by_priority_then_age() {
    let (pool, _container) = setup_test_db().await;
    let repo = JobQueueRepository::new(pool);

    repo.enqueue(request("user-1", &["https://jobs.lever.co/acme/low"]).with_priority(90))
        .await
        .unwrap();
    repo.enqueue(request("user-1", &["https://jobs.lever.co/acme/high"]).with_priority(10))
        .await
        .unwrap();

    let first = repo.claim_next("worker-1").await.unwrap().unwrap();
    assert!(first.job_url.ends_with("/high"));
    let second = repo.claim_next("worker-1").await.unwrap().unwrap();
    assert!(second.job_url.ends_with("/low"));
}

#[tokio::test]
async fn complete_item_stamps_application_and_clears_lock() {
    let (pool, _container) = setup_test_db().await;
    let repo = JobQueueRepository::new(pool);

    repo.enqueue(request("user-1", &["https://jobs.lever.co/acme/1"]))
        .await
        .unwrap();
    let item = repo.claim_next("worker-1").await.unwrap().unwrap();

    repo.complete_item(item.id, Some("app-42"), QueueItemStatus::Completed, 1, None)
        .await
        .unwrap();

    let stored = repo.get_item(item.id).await.unwrap().unwrap();
    assert_eq!(stored.status, QueueItemStatus::Completed);
    assert_eq!(stored.application_id.as_deref(), Some("app-42"));
    assert_eq!(stored.attempts, 1);
    assert!(stored.locked_by.is_none());
    assert!(stored.locked_at.is_none());
}

#[tokio::test]
async fn terminal_items_are_immutable() {
    let (pool, _container) = setup_test_db().await;
    let repo = JobQueueRepository::new(pool);

    repo.enqueue(request("user-1", &["https://jobs.lever.co/acme/1"]))
        .await
        .unwrap();
    let item = repo.claim_next("worker-1").await.unwrap().unwrap();
    repo.complete_item(item.id, Some("app-1"), QueueItemStatus::Completed, 1, None)
        .await
        .unwrap();

    // Neither a second terminal transition nor a retry touches it.
    repo.complete_item(item.id, None, QueueItemStatus::Failed, 2, Some("late error"))
        .await
        .unwrap();
    repo.schedule_retry(item.id, 2, chrono::Utc::now(), "late retry")
        .await
        .unwrap();

    let stored = repo.get_item(item.id).await.unwrap().unwrap();
    assert_eq!(stored.status, QueueItemStatus::Completed);
    assert_eq!(stored.application_id.as_deref(), Some("app-1"));
    assert_eq!(stored.attempts, 1);
}

#[tokio::test]
async fn release_worker_locks_requeues_in_progress_items() {
    let (pool, _container) = setup_test_db().await;
    let repo = JobQueueRepository::new(pool);

    repo.enqueue(request(
        "user-1",
        &["https://jobs.lever.co/acme/1", "https://jobs.lever.co/acme/2"],
    ))
    .await
    .unwrap();
    repo.claim_next("worker-1").await.unwrap();
    repo.claim_next("worker-1").await.unwrap();

    let released = repo.release_worker_locks("worker-1").await.unwrap();
    assert_eq!(released, 2);

    let counts = repo.queue_counts(None).await.unwrap();
    assert_eq!(counts.queued, 2);
    assert_eq!(counts.in_progress, 0);
}

#[tokio::test]
async fn release_lock_requires_matching_worker() {
    let (pool, _container) = setup_test_db().await;
    let repo = JobQueueRepository::new(pool);

    repo.enqueue(request("user-1", &["https://jobs.lever.co/acme/1"]))
        .await
        .unwrap();
    let item = repo.claim_next("worker-1").await.unwrap().unwrap();

    repo.release_lock(item.id, "worker-2").await.unwrap();
    let stored = repo.get_item(item.id).await.unwrap().unwrap();
    assert_eq!(stored.status, QueueItemStatus::InProgress);

    repo.release_lock(item.id, "worker-1").await.unwrap();
    let stored = repo.get_item(item.id).await.unwrap().unwrap();
    assert_eq!(stored.status, QueueItemStatus::Queued);
    assert!(stored.locked_by.is_none());
}

#[tokio::test]
async fn reclaim_expired_locks_requeues_orphans() {
    let (pool, _container) = setup_test_db().await;
    let repo = JobQueueRepository::new(pool.clone());

    repo.enqueue(request("user-1", &["https://jobs.lever.co/acme/1"]))
        .await
        .unwrap();
    let item = repo.claim_next("worker-crashed").await.unwrap().unwrap();

    // Fresh lock: nothing to reclaim.
    assert_eq!(
        repo.reclaim_expired_locks(Duration::from_secs(600)).await.unwrap(),
        0
    );

    // Backdate the lock past the lease.
    sqlx::query("UPDATE job_queue SET locked_at = NOW() - INTERVAL '11 minutes' WHERE id = $1")
        .bind(item.id)
        .execute(&pool)
        .await
        .unwrap();

    assert_eq!(
        repo.reclaim_expired_locks(Duration::from_secs(600)).await.unwrap(),
        1
    );
    let stored = repo.get_item(item.id).await.unwrap().unwrap();
    assert_eq!(stored.status, QueueItemStatus::Queued);
    assert!(stored.locked_by.is_none());
}

#[tokio::test]
async fn cancel_campaign_queue_leaves_locked_items_alone() {
    let (pool, _container) = setup_test_db().await;
    let campaigns = CampaignRepository::new(pool.clone());
    let repo = JobQueueRepository::new(pool);

    let campaign = campaigns
        .create_campaign("user-1", "bulk run", serde_json::json!({}))
        .await
        .unwrap();
    repo.enqueue(
        request(
            "user-1",
            &[
                "https://jobs.lever.co/acme/1",
                "https://jobs.lever.co/acme/2",
                "https://jobs.lever.co/acme/3",
            ],
        )
        .with_campaign(campaign.id),
    )
    .await
    .unwrap();

    // One item is in flight when the campaign is cancelled.
    let in_flight = repo.claim_next("worker-1").await.unwrap().unwrap();

    let cancelled = repo.cancel_campaign_queue(campaign.id).await.unwrap();
    assert_eq!(cancelled, 2);

    let stored = repo.get_item(in_flight.id).await.unwrap().unwrap();
    assert_eq!(stored.status, QueueItemStatus::InProgress);

    let counts = repo.queue_counts(Some(campaign.id)).await.unwrap();
    assert_eq!(counts.cancelled, 2);
    assert_eq!(counts.in_progress, 1);
}

#[tokio::test]
async fn queue_counts_scope_to_campaign() {
    let (pool, _container) = setup_test_db().await;
    let campaigns = CampaignRepository::new(pool.clone());
    let repo = JobQueueRepository::new(pool);

    let campaign = campaigns
        .create_campaign("user-1", "scoped", serde_json::json!({}))
        .await
        .unwrap();
    repo.enqueue(
        request("user-1", &["https://jobs.lever.co/acme/1"]).with_campaign(campaign.id),
    )
    .await
    .unwrap();
    repo.enqueue(request("user-1", &["https://jobs.lever.co/acme/2"]))
        .await
        .unwrap();

    let scoped = repo.queue_counts(Some(campaign.id)).await.unwrap();
    assert_eq!(scoped.queued, 1);
    let all = repo.queue_counts(None).await.unwrap();
    assert_eq!(all.queued, 2);

    let listed = repo.list_items(Some(campaign.id), 10).await.unwrap();
    assert_eq!(listed.len(), 1);
}

#[tokio::test]
async fn enqueue_stores_payload_and_defaults() {
    let (pool, _container) = setup_test_db().await;
    let repo = JobQueueRepository::new(pool);

    let req = EnqueueRequest::new(
        "user-1",
        vec![
            EnqueueEntry::new("https://jobs.lever.co/acme/1")
                .with_payload(serde_json::json!({"job_title": "Staff Engineer"})),
        ],
    )
    .with_max_attempts(5);
    repo.enqueue(req).await.unwrap();

    let item = repo.claim_next("worker-1").await.unwrap().unwrap();
    assert_eq!(item.payload["job_title"], "Staff Engineer");
    assert_eq!(item.max_attempts, 5);
    assert_eq!(item.priority, 50);
    assert!(item.platform.is_none());
}
