use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of a campaign. Campaigns are never deleted, only transitioned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    Running,
    Paused,
    Cancelled,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Running => "running",
            CampaignStatus::Paused => "paused",
            CampaignStatus::Cancelled => "cancelled",
        }
    }

    /// The worker only claims items belonging to `running` campaigns.
    pub fn allows_claims(&self) -> bool {
        matches!(self, CampaignStatus::Running)
    }
}

impl fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for CampaignStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "running" => Ok(CampaignStatus::Running),
            "paused" => Ok(CampaignStatus::Paused),
            "cancelled" => Ok(CampaignStatus::Cancelled),
            _ => Err(format!("Unknown campaign status: {}", s)),
        }
    }
}

/// A named bulk-application run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: Uuid,
    pub user_id: String,
    pub name: String,
    pub status: CampaignStatus,
    /// Opaque at the storage boundary; see [`CampaignConfig`].
    pub config: serde_json::Value,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    /// Deserialize the stored config, tolerating unknown fields and
    /// falling back to defaults if the blob is malformed.
    pub fn parsed_config(&self) -> CampaignConfig {
        serde_json::from_value(self.config.clone()).unwrap_or_default()
    }
}

/// Typed view of the campaign `config` blob.
///
/// Unknown fields are ignored so older engine versions keep working as
/// the config schema grows.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CampaignConfig {
    /// Submit the form, or stop at review and record `pending_review`.
    pub auto_submit: bool,
    pub generate_cover_letter: bool,
    pub cover_letter_tone: String,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            auto_submit: false,
            generate_cover_letter: true,
            cover_letter_tone: "professional".to_string(),
        }
    }
}
