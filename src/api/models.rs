//! API request/response models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::database::models::{ItemDbModel, JobDbModel};
use crate::database::time::ms_to_datetime;

/// Job representation returned by the API. Tokens never leave the
/// process; only their presence is reported.
#[derive(Debug, Serialize)]
pub struct JobResponse {
    pub id: String,
    pub source_channel_id: String,
    pub sink_account_id: String,
    pub is_active: bool,
    pub has_access_token: bool,
    pub has_refresh_token: bool,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub last_item_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&JobDbModel> for JobResponse {
    fn from(job: &JobDbModel) -> Self {
        Self {
            id: job.id.clone(),
            source_channel_id: job.source_channel_id.clone(),
            sink_account_id: job.sink_account_id.clone(),
            is_active: job.active(),
            has_access_token: job.has_configured_token(),
            has_refresh_token: job.has_refresh_token(),
            token_expires_at: job.token_expires(),
            last_checked_at: job.last_checked(),
            last_item_id: job.last_item_id.clone(),
            created_at: ms_to_datetime(job.created_at),
            updated_at: ms_to_datetime(job.updated_at),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    pub source_channel_id: String,
    pub sink_account_id: String,
    pub sink_access_token: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateJobRequest {
    #[serde(default)]
    pub source_channel_id: String,
    #[serde(default)]
    pub sink_account_id: String,
    #[serde(default)]
    pub sink_access_token: String,
    #[serde(default)]
    pub is_active: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct ItemResponse {
    pub id: String,
    pub source_item_id: String,
    pub job_id: String,
    pub title: String,
    pub status: String,
    pub error_message: Option<String>,
    pub sink_item_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

impl From<&ItemDbModel> for ItemResponse {
    fn from(item: &ItemDbModel) -> Self {
        Self {
            id: item.id.clone(),
            source_item_id: item.source_item_id.clone(),
            job_id: item.job_id.clone(),
            title: item.title.clone(),
            status: item.status.clone(),
            error_message: item.error_message.clone(),
            sink_item_id: item.sink_item_id.clone(),
            created_at: ms_to_datetime(item.created_at),
            published_at: item.published(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PendingItemsQuery {
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct PendingMetricsResponse {
    pub pending: u64,
}

#[derive(Debug, Deserialize)]
pub struct ExchangeCodeRequest {
    pub code: String,
    #[serde(default)]
    pub redirect_uri: String,
    #[serde(default)]
    pub job_id: String,
    #[serde(default)]
    pub sink_account_id: String,
}

#[derive(Debug, Serialize)]
pub struct ExchangeCodeResponse {
    pub status: &'static str,
    pub job: JobResponse,
    pub expires_in: i64,
    pub token_type: String,
    pub scope: String,
    pub has_refresh_token: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<&'static str>,
}

#[derive(Debug, Deserialize)]
pub struct OAuthCallbackQuery {
    #[serde(default)]
    pub code: String,
    /// Carries the job id set when the authorize URL was built.
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub error_description: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
}
