//! Sink credential lifecycle.
//!
//! Credentials are evaluated lazily, only when the pipeline is about
//! to publish. The service is stateless; all mutable token state lives
//! in the store and updates are written through atomically.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use tracing::{info, warn};

use crate::database::models::JobDbModel;
use crate::database::repositories::JobRepository;
use crate::database::time::datetime_to_ms;
use crate::sink::SinkApi;
use crate::{Error, Result};

/// OAuth scopes requested for re-authorization.
const AUTHORIZE_SCOPES: &str = "user.info.basic,video.upload,video.publish";

/// Outcome of a lazy credential evaluation.
///
/// The pipeline matches on this: the two re-auth states carry the
/// payload an operator needs to repair the job out of band.
#[derive(Debug, Clone)]
pub enum TokenState {
    /// The stored access token verified successfully.
    Valid { access_token: String },
    /// The stored token was stale; a refresh succeeded and the new
    /// tokens are already persisted.
    Refreshed { access_token: String },
    /// The token is invalid and cannot be refreshed automatically.
    ReauthRequired {
        authorize_url: String,
        redirect_uri: String,
    },
    /// The job has no usable token configured (empty or placeholder).
    Unconfigured {
        authorize_url: String,
        redirect_uri: String,
    },
}

impl TokenState {
    /// Extract the usable access token, or the structured reauth error.
    pub fn into_access_token(self, job_id: &str) -> Result<String> {
        match self {
            Self::Valid { access_token } | Self::Refreshed { access_token } => Ok(access_token),
            Self::ReauthRequired {
                authorize_url,
                redirect_uri,
            }
            | Self::Unconfigured {
                authorize_url,
                redirect_uri,
            } => Err(Error::ReauthRequired {
                job_id: job_id.to_string(),
                authorize_url,
                redirect_uri,
            }),
        }
    }
}

/// Stateless manager for a job's sink credentials.
pub struct CredentialService {
    jobs: Arc<dyn JobRepository>,
    sink: Arc<dyn SinkApi>,
    client_key: String,
    authorize_base: String,
    redirect_uri: String,
}

impl CredentialService {
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        sink: Arc<dyn SinkApi>,
        client_key: impl Into<String>,
        authorize_base: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            jobs,
            sink,
            client_key: client_key.into(),
            authorize_base: authorize_base.into(),
            redirect_uri: redirect_uri.into(),
        }
    }

    /// Build the browser authorize URL for a job; the job id travels in
    /// the `state` parameter so the callback can route the code back.
    pub fn authorize_url(&self, job_id: &str) -> String {
        match url::Url::parse_with_params(
            &self.authorize_base,
            &[
                ("client_key", self.client_key.as_str()),
                ("scope", AUTHORIZE_SCOPES),
                ("response_type", "code"),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("state", job_id),
            ],
        ) {
            Ok(url) => url.into(),
            Err(error) => {
                warn!(error = %error, "Invalid authorize base URL; returning it unmodified");
                self.authorize_base.clone()
            }
        }
    }

    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    fn reauth_state(&self, job_id: &str) -> (String, String) {
        (self.authorize_url(job_id), self.redirect_uri.clone())
    }

    /// Evaluate the credential state machine for a job.
    ///
    /// Transitions:
    /// - no usable token → `Unconfigured`
    /// - verify true → `Valid`
    /// - verify false + refresh token → refresh; persist on success →
    ///   `Refreshed`, otherwise `ReauthRequired`
    /// - verify false + no refresh token → `ReauthRequired`
    ///
    /// Errors are reserved for transport and storage failures.
    pub async fn evaluate(&self, job: &JobDbModel) -> Result<TokenState> {
        if !job.has_configured_token() {
            let (authorize_url, redirect_uri) = self.reauth_state(&job.id);
            return Ok(TokenState::Unconfigured {
                authorize_url,
                redirect_uri,
            });
        }

        if self.sink.verify(&job.sink_access_token).await? {
            return Ok(TokenState::Valid {
                access_token: job.sink_access_token.clone(),
            });
        }

        let Some(refresh_token) = job
            .sink_refresh_token
            .as_deref()
            .filter(|t| !t.is_empty())
        else {
            warn!(
                job_id = %job.id,
                "Access token invalid and no refresh token available; re-authorization required"
            );
            let (authorize_url, redirect_uri) = self.reauth_state(&job.id);
            return Ok(TokenState::ReauthRequired {
                authorize_url,
                redirect_uri,
            });
        };

        info!(job_id = %job.id, "Access token invalid; attempting refresh");
        let pair = match self.sink.refresh(refresh_token).await {
            Ok(pair) => pair,
            Err(error) => {
                warn!(
                    job_id = %job.id,
                    error = %error,
                    "Token refresh failed; re-authorization required"
                );
                let (authorize_url, redirect_uri) = self.reauth_state(&job.id);
                return Ok(TokenState::ReauthRequired {
                    authorize_url,
                    redirect_uri,
                });
            }
        };

        let access_token = pair.access_token.clone();
        self.persist_tokens(job, pair).await?;
        info!(job_id = %job.id, "Access token refreshed");

        Ok(TokenState::Refreshed { access_token })
    }

    /// Write refreshed tokens through the store.
    ///
    /// An empty refresh token in the response preserves the stored one;
    /// a zero `expires_in` leaves the stored expiry untouched.
    async fn persist_tokens(&self, job: &JobDbModel, pair: crate::sink::TokenPair) -> Result<()> {
        let mut updated = job.clone();
        updated.sink_access_token = pair.access_token;
        if !pair.refresh_token.is_empty() {
            updated.sink_refresh_token = Some(pair.refresh_token);
        }
        if pair.expires_in > 0 {
            let expires_at = Utc::now() + ChronoDuration::seconds(pair.expires_in);
            updated.sink_token_expires_at = Some(datetime_to_ms(expires_at));
        }
        self.jobs.upsert_job(&updated).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authorize_url_contains_client_key_and_redirect() {
        struct NoopSink;
        #[async_trait::async_trait]
        impl SinkApi for NoopSink {
            async fn publish(&self, _: &crate::sink::PublishRequest) -> Result<String> {
                unimplemented!()
            }
            async fn verify(&self, _: &str) -> Result<bool> {
                unimplemented!()
            }
            async fn exchange_code(&self, _: &str, _: &str) -> Result<crate::sink::TokenPair> {
                unimplemented!()
            }
            async fn refresh(&self, _: &str) -> Result<crate::sink::TokenPair> {
                unimplemented!()
            }
        }
        struct NoopJobs;
        #[async_trait::async_trait]
        impl JobRepository for NoopJobs {
            async fn upsert_job(&self, _: &JobDbModel) -> Result<()> {
                unimplemented!()
            }
            async fn get_job_by_id(&self, _: &str) -> Result<Option<JobDbModel>> {
                unimplemented!()
            }
            async fn get_job_by_source(&self, _: &str) -> Result<Option<JobDbModel>> {
                unimplemented!()
            }
            async fn get_job_by_sink(&self, _: &str) -> Result<Option<JobDbModel>> {
                unimplemented!()
            }
            async fn get_job_by_pair(&self, _: &str, _: &str) -> Result<Option<JobDbModel>> {
                unimplemented!()
            }
            async fn list_jobs(&self, _: bool) -> Result<Vec<JobDbModel>> {
                unimplemented!()
            }
            async fn update_last_checked(
                &self,
                _: &str,
                _: Option<&str>,
                _: chrono::DateTime<Utc>,
            ) -> Result<()> {
                unimplemented!()
            }
            async fn delete_job(&self, _: &str) -> Result<()> {
                unimplemented!()
            }
        }

        let service = CredentialService::new(
            Arc::new(NoopJobs),
            Arc::new(NoopSink),
            "client-key-1",
            "https://auth.sink.example/authorize/",
            "http://localhost:8080/api/oauth/callback",
        );

        let url = service.authorize_url("job-1");
        assert!(url.starts_with("https://auth.sink.example/authorize/"));
        assert!(url.contains("client_key=client-key-1"));
        assert!(url.contains("state=job-1"));
        assert!(url.contains("redirect_uri="));
    }
}
