//! Job database model.
//!
//! A job maps one source channel to one sink account and carries the
//! sink credentials plus the discovery bookmark.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database::time::{ms_to_datetime, now_ms};

/// Sentinel access token inserted when a job is bootstrapped without
/// credentials. The credential manager treats it as unconfigured and
/// demands re-authorization on first publish.
pub const PLACEHOLDER_ACCESS_TOKEN: &str = "PLACEHOLDER_TOKEN_UPDATE_VIA_EXCHANGE_CODE";

/// Job database model: one source-channel to sink-account mapping.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct JobDbModel {
    pub id: String,
    pub source_channel_id: String,
    pub sink_account_id: String,
    pub sink_access_token: String,
    pub sink_refresh_token: Option<String>,
    /// Expiry of the access token, epoch milliseconds UTC.
    pub sink_token_expires_at: Option<i64>,
    /// Last discovery pass, epoch milliseconds UTC. Unset before first run.
    pub last_checked_at: Option<i64>,
    /// Source id of the most recently persisted item.
    pub last_item_id: Option<String>,
    /// 0/1 boolean; inactive jobs are skipped by discovery.
    pub is_active: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl JobDbModel {
    /// Create a new active job mapping.
    pub fn new(
        source_channel_id: impl Into<String>,
        sink_account_id: impl Into<String>,
        sink_access_token: impl Into<String>,
    ) -> Self {
        let now = now_ms();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source_channel_id: source_channel_id.into(),
            sink_account_id: sink_account_id.into(),
            sink_access_token: sink_access_token.into(),
            sink_refresh_token: None,
            sink_token_expires_at: None,
            last_checked_at: None,
            last_item_id: None,
            is_active: 1,
            created_at: now,
            updated_at: now,
        }
    }

    #[inline]
    pub fn active(&self) -> bool {
        self.is_active != 0
    }

    pub fn set_active(&mut self, active: bool) {
        self.is_active = i64::from(active);
    }

    pub fn last_checked(&self) -> Option<DateTime<Utc>> {
        self.last_checked_at.map(ms_to_datetime)
    }

    pub fn token_expires(&self) -> Option<DateTime<Utc>> {
        self.sink_token_expires_at.map(ms_to_datetime)
    }

    /// Whether the stored access token is a usable credential.
    pub fn has_configured_token(&self) -> bool {
        let token = self.sink_access_token.trim();
        !token.is_empty() && token != PLACEHOLDER_ACCESS_TOKEN
    }

    pub fn has_refresh_token(&self) -> bool {
        self.sink_refresh_token
            .as_deref()
            .is_some_and(|t| !t.is_empty())
    }
}
