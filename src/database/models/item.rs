//! Item database model and status state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database::time::{datetime_to_ms, ms_to_datetime, now_ms};

/// Processing status of an item.
///
/// The success path is strictly ordered; `Failed` is reachable from
/// any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Pending,
    Fetching,
    Fetched,
    Publishing,
    Completed,
    Failed,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Fetching => "fetching",
            Self::Fetched => "fetched",
            Self::Publishing => "publishing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "fetching" => Some(Self::Fetching),
            "fetched" => Some(Self::Fetched),
            "publishing" => Some(Self::Publishing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Position along the success path. `Failed` ranks above everything
    /// so an upsert can always record a failure.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Fetching => 1,
            Self::Fetched => 2,
            Self::Publishing => 3,
            Self::Completed => 4,
            Self::Failed => 5,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Item database model: one source post tracked through the pipeline.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ItemDbModel {
    pub id: String,
    pub source_item_id: String,
    pub job_id: String,
    pub title: String,
    pub description: String,
    pub thumbnail_url: Option<String>,
    /// Local path of the fetched media file, set after the fetch stage.
    pub local_file_path: Option<String>,
    pub status: String,
    pub error_message: Option<String>,
    /// Sink-side item id, set after a successful publish.
    pub sink_item_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    /// Source-side publish time, epoch milliseconds UTC.
    pub published_at: Option<i64>,
}

impl ItemDbModel {
    /// Create a new pending item for a job.
    pub fn new(
        source_item_id: impl Into<String>,
        job_id: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        let now = now_ms();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source_item_id: source_item_id.into(),
            job_id: job_id.into(),
            title: title.into(),
            description: description.into(),
            thumbnail_url: None,
            local_file_path: None,
            status: ItemStatus::Pending.as_str().to_string(),
            error_message: None,
            sink_item_id: None,
            created_at: now,
            updated_at: now,
            published_at: None,
        }
    }

    pub fn with_published_at(mut self, published_at: DateTime<Utc>) -> Self {
        self.published_at = Some(datetime_to_ms(published_at));
        self
    }

    pub fn with_thumbnail(mut self, thumbnail_url: impl Into<String>) -> Self {
        self.thumbnail_url = Some(thumbnail_url.into());
        self
    }

    pub fn status(&self) -> Option<ItemStatus> {
        ItemStatus::parse(&self.status)
    }

    pub fn published(&self) -> Option<DateTime<Utc>> {
        self.published_at.map(ms_to_datetime)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        for status in [
            ItemStatus::Pending,
            ItemStatus::Fetching,
            ItemStatus::Fetched,
            ItemStatus::Publishing,
            ItemStatus::Completed,
            ItemStatus::Failed,
        ] {
            assert_eq!(ItemStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ItemStatus::parse("bogus"), None);
    }

    #[test]
    fn test_rank_is_monotonic_on_success_path() {
        let path = [
            ItemStatus::Pending,
            ItemStatus::Fetching,
            ItemStatus::Fetched,
            ItemStatus::Publishing,
            ItemStatus::Completed,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].rank() < pair[1].rank());
        }
        // A failure can always be recorded.
        assert!(ItemStatus::Failed.rank() > ItemStatus::Completed.rank());
    }

    #[test]
    fn test_terminal_states() {
        assert!(ItemStatus::Completed.is_terminal());
        assert!(ItemStatus::Failed.is_terminal());
        assert!(!ItemStatus::Publishing.is_terminal());
    }

    #[test]
    fn test_new_item_is_pending() {
        let item = ItemDbModel::new("vid1", "job1", "t", "d");
        assert_eq!(item.status(), Some(ItemStatus::Pending));
        assert!(item.sink_item_id.is_none());
    }
}
