//! Source listing client.
//!
//! Reads the most recent items of a source channel from the listing
//! API. The listing is a two-step lookup: resolve the channel's
//! uploads playlist, then page its items newest first.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::{Error, Result};

/// One recently published item on a source channel.
#[derive(Debug, Clone)]
pub struct SourceItem {
    pub source_item_id: String,
    pub title: String,
    pub description: String,
    pub thumbnail_url: Option<String>,
    pub published_at: DateTime<Utc>,
}

/// Read access to a channel's recent items, newest first.
#[async_trait]
pub trait SourceListing: Send + Sync {
    async fn latest_items(&self, channel_id: &str, max: u32) -> Result<Vec<SourceItem>>;
}

/// HTTP client for the source listing API.
pub struct SourceClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl SourceClient {
    pub fn new(client: reqwest::Client, api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.into(),
        }
    }

    /// Resolve the uploads playlist id for a channel.
    async fn uploads_playlist_id(&self, channel_id: &str) -> Result<String> {
        let url = format!("{}/channels", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("part", "contentDetails"),
                ("id", channel_id),
                ("key", &self.api_key),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::SourceApi(format!(
                "channel lookup failed with status {}",
                response.status()
            )));
        }

        let body: ChannelListResponse = response.json().await?;
        body.items
            .into_iter()
            .next()
            .map(|c| c.content_details.related_playlists.uploads)
            .ok_or_else(|| Error::SourceApi(format!("channel {channel_id} not found")))
    }

    async fn playlist_items(&self, playlist_id: &str, max: u32) -> Result<Vec<SourceItem>> {
        let url = format!("{}/playlistItems", self.base_url);
        let max_results = max.to_string();
        let response = self
            .client
            .get(&url)
            .query(&[
                ("part", "snippet,contentDetails"),
                ("playlistId", playlist_id),
                ("maxResults", &max_results),
                ("order", "date"),
                ("key", &self.api_key),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::SourceApi(format!(
                "playlist listing failed with status {}",
                response.status()
            )));
        }

        let body: PlaylistItemsResponse = response.json().await?;
        let items = body
            .items
            .into_iter()
            .map(|item| SourceItem {
                source_item_id: item.content_details.video_id,
                title: item.snippet.title,
                description: item.snippet.description,
                thumbnail_url: item.snippet.thumbnails.default.map(|t| t.url),
                published_at: item.snippet.published_at,
            })
            .collect();

        Ok(items)
    }
}

#[async_trait]
impl SourceListing for SourceClient {
    async fn latest_items(&self, channel_id: &str, max: u32) -> Result<Vec<SourceItem>> {
        let playlist_id = self.uploads_playlist_id(channel_id).await?;
        self.playlist_items(&playlist_id, max).await
    }
}

#[derive(Debug, Deserialize)]
struct ChannelListResponse {
    #[serde(default)]
    items: Vec<ChannelEntry>,
}

#[derive(Debug, Deserialize)]
struct ChannelEntry {
    #[serde(rename = "contentDetails")]
    content_details: ChannelContentDetails,
}

#[derive(Debug, Deserialize)]
struct ChannelContentDetails {
    #[serde(rename = "relatedPlaylists")]
    related_playlists: RelatedPlaylists,
}

#[derive(Debug, Deserialize)]
struct RelatedPlaylists {
    uploads: String,
}

#[derive(Debug, Deserialize)]
struct PlaylistItemsResponse {
    #[serde(default)]
    items: Vec<PlaylistEntry>,
}

#[derive(Debug, Deserialize)]
struct PlaylistEntry {
    snippet: PlaylistSnippet,
    #[serde(rename = "contentDetails")]
    content_details: PlaylistContentDetails,
}

#[derive(Debug, Deserialize)]
struct PlaylistSnippet {
    #[serde(rename = "publishedAt")]
    published_at: DateTime<Utc>,
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    thumbnails: Thumbnails,
}

#[derive(Debug, Default, Deserialize)]
struct Thumbnails {
    default: Option<Thumbnail>,
}

#[derive(Debug, Deserialize)]
struct Thumbnail {
    url: String,
}

#[derive(Debug, Deserialize)]
struct PlaylistContentDetails {
    #[serde(rename = "videoId")]
    video_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_playlist_response_parsing() {
        let body = r#"{
            "items": [
                {
                    "snippet": {
                        "publishedAt": "2024-05-01T10:00:00Z",
                        "title": "First",
                        "description": "d1",
                        "thumbnails": {"default": {"url": "https://img.example/1.jpg"}}
                    },
                    "contentDetails": {"videoId": "vid1"}
                },
                {
                    "snippet": {
                        "publishedAt": "2024-04-30T10:00:00Z",
                        "title": "Second",
                        "description": ""
                    },
                    "contentDetails": {"videoId": "vid2"}
                }
            ]
        }"#;
        let parsed: PlaylistItemsResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.items.len(), 2);
        assert_eq!(parsed.items[0].content_details.video_id, "vid1");
        assert!(parsed.items[1].snippet.thumbnails.default.is_none());
    }

    #[test]
    fn test_channel_response_parsing() {
        let body = r#"{
            "items": [
                {"contentDetails": {"relatedPlaylists": {"uploads": "UUabc"}}}
            ]
        }"#;
        let parsed: ChannelListResponse = serde_json::from_str(body).unwrap();
        assert_eq!(
            parsed.items[0].content_details.related_playlists.uploads,
            "UUabc"
        );
    }
}
