//! Sink publish and OAuth client.
//!
//! The publish protocol has three steps: initialize an upload session,
//! stream the file bytes as multipart form data, then publish the
//! uploaded item. The file is streamed through a chunked reader so the
//! full payload is never held in memory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio_util::io::ReaderStream;

use crate::{Error, Result};

/// Default privacy level applied when the caller supplies none.
pub const DEFAULT_PRIVACY_LEVEL: &str = "PUBLIC_TO_EVERYONE";

/// Maximum response-body length included in error messages.
const BODY_PREVIEW_LIMIT: usize = 512;

/// A request to publish one media file to a sink account.
#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub access_token: String,
    /// Sink-side user identifier the access token belongs to.
    pub sink_account_id: String,
    pub file_path: PathBuf,
    pub title: String,
    pub description: String,
    /// Privacy level; empty selects [`DEFAULT_PRIVACY_LEVEL`].
    pub privacy_level: String,
}

/// Access/refresh token pair returned by the OAuth endpoints.
///
/// `refresh_token` may be empty and `expires_in` may be zero when the
/// endpoint does not grant them.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenPair {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub token_type: String,
    #[serde(default)]
    pub expires_in: i64,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default)]
    pub scope: String,
    #[serde(default)]
    pub open_id: String,
}

/// Sink publish protocol and token operations.
#[async_trait]
pub trait SinkApi: Send + Sync {
    /// Run the three-step publish; returns the sink item id.
    async fn publish(&self, request: &PublishRequest) -> Result<String>;
    /// True iff the access token authenticates against the user-info
    /// endpoint.
    async fn verify(&self, access_token: &str) -> Result<bool>;
    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenPair>;
    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair>;
}

/// HTTP implementation of [`SinkApi`].
pub struct SinkClient {
    client: reqwest::Client,
    api_key: String,
    api_secret: String,
    base_url: String,
    upload_init_path: String,
    publish_path: String,
    /// Overall bound for the streaming upload request.
    publish_timeout: Duration,
    /// Chunk size for the streamed file body.
    buffer_size: usize,
}

impl SinkClient {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: reqwest::Client,
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
        base_url: impl Into<String>,
        upload_init_path: impl Into<String>,
        publish_path: impl Into<String>,
        publish_timeout: Duration,
        buffer_size: usize,
    ) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            base_url: base_url.into(),
            upload_init_path: upload_init_path.into(),
            publish_path: publish_path.into(),
            publish_timeout,
            buffer_size: buffer_size.max(64 * 1024),
        }
    }

    fn combine_path(&self, path: &str) -> String {
        if path.is_empty() {
            return self.base_url.clone();
        }
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Step 1: open an upload session.
    async fn initialize_upload(
        &self,
        access_token: &str,
        sink_account_id: &str,
        file_size: u64,
    ) -> Result<UploadSession> {
        let url = self.combine_path(&self.upload_init_path);
        let mut payload = serde_json::json!({
            "open_id": sink_account_id,
            "upload_type": "video",
        });
        if file_size > 0 {
            payload["video_size"] = serde_json::json!(file_size);
        }

        let response = self
            .client
            .post(&url)
            .query(&[("access_token", access_token)])
            .json(&payload)
            .send()
            .await?;

        parse_envelope::<UploadSession>(response).await
    }

    /// Step 2: stream the file to the session's upload URL.
    async fn upload_file(&self, upload_url: &str, file_path: &Path) -> Result<()> {
        let file = tokio::fs::File::open(file_path).await?;
        let file_size = file.metadata().await?.len();
        let file_name = file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload.mp4".to_string());

        let stream = ReaderStream::with_capacity(file, self.buffer_size);
        let part = reqwest::multipart::Part::stream_with_length(
            reqwest::Body::wrap_stream(stream),
            file_size,
        )
        .file_name(file_name)
        .mime_str("application/octet-stream")?;
        let form = reqwest::multipart::Form::new().part("video", part);

        let response = self
            .client
            .post(upload_url)
            .multipart(form)
            .timeout(self.publish_timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::sink_api(
                status.as_str(),
                format!("file upload failed: {}", preview_body(&body)),
            ));
        }

        Ok(())
    }

    /// Step 3: publish the uploaded item.
    async fn publish_upload(
        &self,
        access_token: &str,
        sink_account_id: &str,
        upload_id: &str,
        title: &str,
        description: &str,
        privacy_level: &str,
    ) -> Result<String> {
        let url = self.combine_path(&self.publish_path);

        let mut post_info = serde_json::Map::new();
        if !title.is_empty() {
            post_info.insert("title".into(), serde_json::json!(title));
        }
        if !description.is_empty() {
            post_info.insert("description".into(), serde_json::json!(description));
        }
        let privacy = if privacy_level.is_empty() {
            DEFAULT_PRIVACY_LEVEL
        } else {
            privacy_level
        };
        post_info.insert("privacy_level".into(), serde_json::json!(privacy));

        let payload = serde_json::json!({
            "open_id": sink_account_id,
            "upload_id": upload_id,
            "post_info": post_info,
        });

        let response = self
            .client
            .post(&url)
            .query(&[("access_token", access_token)])
            .json(&payload)
            .send()
            .await?;

        let published: PublishedItem = parse_envelope(response).await?;
        Ok(published.item_id)
    }

    async fn token_request(&self, payload: serde_json::Value) -> Result<TokenPair> {
        let url = format!("{}/v2/oauth/token/", self.base_url.trim_end_matches('/'));
        let response = self.client.post(&url).json(&payload).send().await?;
        parse_envelope::<TokenPair>(response).await
    }
}

#[async_trait]
impl SinkApi for SinkClient {
    async fn publish(&self, request: &PublishRequest) -> Result<String> {
        if request.access_token.is_empty() {
            return Err(Error::validation("access token is required for publish"));
        }
        if request.sink_account_id.is_empty() {
            return Err(Error::validation("sink account id is required for publish"));
        }

        let metadata = tokio::fs::metadata(&request.file_path).await?;

        let session = self
            .initialize_upload(
                &request.access_token,
                &request.sink_account_id,
                metadata.len(),
            )
            .await?;

        self.upload_file(&session.upload_url, &request.file_path)
            .await?;

        self.publish_upload(
            &request.access_token,
            &request.sink_account_id,
            &session.upload_id,
            &request.title,
            &request.description,
            &request.privacy_level,
        )
        .await
    }

    async fn verify(&self, access_token: &str) -> Result<bool> {
        let url = format!("{}/user/info/", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .get(&url)
            .query(&[
                ("access_token", access_token),
                ("fields", "open_id,union_id,avatar_url,display_name"),
            ])
            .send()
            .await?;

        Ok(response.status() == reqwest::StatusCode::OK)
    }

    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenPair> {
        self.token_request(serde_json::json!({
            "client_key": self.api_key,
            "client_secret": self.api_secret,
            "code": code,
            "grant_type": "authorization_code",
            "redirect_uri": redirect_uri,
        }))
        .await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair> {
        self.token_request(serde_json::json!({
            "client_key": self.api_key,
            "client_secret": self.api_secret,
            "grant_type": "refresh_token",
            "refresh_token": refresh_token,
        }))
        .await
        .map_err(|e| match e {
            Error::SinkApi { code, message } => {
                Error::AuthRefreshFailed(format!("{code} - {message}"))
            }
            other => other,
        })
    }
}

#[derive(Debug, Deserialize)]
struct UploadSession {
    upload_url: String,
    upload_id: String,
}

#[derive(Debug, Deserialize)]
struct PublishedItem {
    #[serde(rename = "video_id")]
    item_id: String,
}

#[derive(Debug, Default, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: Option<T>,
    #[serde(default)]
    error: ApiErrorBody,
}

/// Decode a `{data, error}` envelope, mapping non-2xx statuses and
/// protocol-level error codes to [`Error::SinkApi`].
async fn parse_envelope<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        return Err(Error::sink_api(
            status.as_str(),
            preview_body(&body),
        ));
    }

    let envelope: Envelope<T> = serde_json::from_str(&body).map_err(|e| {
        Error::sink_api(
            "decode_error",
            format!("{e}; body={}", preview_body(&body)),
        )
    })?;

    if !envelope.error.code.is_empty() {
        return Err(Error::sink_api(envelope.error.code, envelope.error.message));
    }

    envelope
        .data
        .ok_or_else(|| Error::sink_api("empty_response", preview_body(&body)))
}

fn preview_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.len() > BODY_PREVIEW_LIMIT {
        let mut end = BODY_PREVIEW_LIMIT;
        while !trimmed.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &trimmed[..end])
    } else {
        trimmed.to_string()
    }
}
