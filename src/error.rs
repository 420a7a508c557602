//! Application-wide error types.

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    DatabaseSqlx(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Source API error: {0}")]
    SourceApi(String),

    #[error("Sink API error: {code} - {message}")]
    SinkApi { code: String, message: String },

    #[error("Extractor binary not found: {0}")]
    ExtractorMissing(String),

    #[error("Extractor failed (exit code {exit_code:?}): {stderr}")]
    ExtractorFailed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Token refresh failed: {0}")]
    AuthRefreshFailed(String),

    #[error(
        "Re-authorization required for job {job_id}: open {authorize_url} in a browser, \
         complete the login, then exchange the code returned to {redirect_uri} via the \
         exchange-code endpoint"
    )]
    ReauthRequired {
        job_id: String,
        authorize_url: String,
        redirect_uri: String,
    },

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Duplicate mapping: {0}")]
    DuplicateMapping(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn duplicate_mapping(msg: impl Into<String>) -> Self {
        Self::DuplicateMapping(msg.into())
    }

    pub fn sink_api(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SinkApi {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Whether this error is the structured re-authorization signal.
    pub fn is_reauth_required(&self) -> bool {
        matches!(self, Self::ReauthRequired { .. })
    }
}
