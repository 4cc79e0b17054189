use talaria_core::campaign::CampaignStatus;
use talaria_core::queue_store::CampaignStore;
use talaria_db::CampaignRepository;

use crate::integration::common::setup_test_db;

#[tokio::test]
async fn create_campaign_defaults_to_running() {
    let (pool, _container) = setup_test_db().await;
    let repo = CampaignRepository::new(pool);

    let campaign = repo
        .create_campaign(
            "user-1",
            "spring push",
            serde_json::json!({"auto_submit": true, "cover_letter_tone": "casual"}),
        )
        .await
        .unwrap();

    assert_eq!(campaign.status, CampaignStatus::Running);
    assert_eq!(campaign.name, "spring push");
    assert!(campaign.last_error.is_none());

    let config = campaign.parsed_config();
    assert!(config.auto_submit);
    assert_eq!(config.cover_letter_tone, "casual");
}

#[tokio::test]
async fn set_status_records_last_error() {
    let (pool, _container) = setup_test_db().await;
    let repo = CampaignRepository::new(pool);

    let campaign = repo
        .create_campaign("user-1", "flaky", serde_json::json!({}))
        .await
        .unwrap();

    repo.set_campaign_status(
        campaign.id,
        CampaignStatus::Paused,
        Some("Daily limit reached (50). Sent: 50."),
    )
    .await
    .unwrap();

    let stored = repo.get_campaign(campaign.id).await.unwrap().unwrap();
    assert_eq!(stored.status, CampaignStatus::Paused);
    assert!(stored.last_error.as_deref().unwrap().contains("Daily limit"));

    // Resume clears the error.
    repo.set_campaign_status(campaign.id, CampaignStatus::Running, None)
        .await
        .unwrap();
    let stored = repo.get_campaign(campaign.id).await.unwrap().unwrap();
    assert_eq!(stored.status, CampaignStatus::Running);
    assert!(stored.last_error.is_none());
}

#[tokio::test]
async fn list_campaigns_filters_by_user() {
    let (pool, _container) = setup_test_db().await;
    let repo = CampaignRepository::new(pool);

    repo.create_campaign("user-1", "a", serde_json::json!({}))
        .await
        .unwrap();
    repo.create_campaign("user-1", "b", serde_json::json!({}))
        .await
        .unwrap();
    repo.create_campaign("user-2", "c", serde_json::json!({}))
        .await
        .unwrap();

    let mine = repo.list_campaigns("user-1").await.unwrap();
    assert_eq!(mine.len(), 2);

    let missing = repo.get_campaign(uuid::Uuid::new_v4()).await.unwrap();
    assert!(missing.is_none());
}
