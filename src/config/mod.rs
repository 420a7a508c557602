//! Configuration loading.
//!
//! The YAML file mirrors the deployed layout (nested sections); it is
//! deserialized into a raw [`ConfigFile`] and then resolved into a
//! [`Config`] with defaults applied and duration strings parsed.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{Error, Result};

const DEFAULT_SERVER_PORT: u16 = 8080;
const DEFAULT_MONITOR_SCHEDULE: &str = "*/5 * * * *";
const DEFAULT_DOWNLOAD_DIR: &str = "./downloads";
const DEFAULT_DATABASE_URL: &str = "sqlite:data.db";
const DEFAULT_LOG_DIR: &str = "./logs";
const DEFAULT_LOG_FILE: &str = "vidbridge.log";
const DEFAULT_ERROR_LOG_FILE: &str = "vidbridge.error.log";
const DEFAULT_SINK_BASE_URL: &str = "https://open-api.tiktok.com";
const DEFAULT_SINK_AUTHORIZE_URL: &str = "https://www.tiktok.com/v2/auth/authorize/";
const DEFAULT_SINK_UPLOAD_INIT_PATH: &str = "/video/upload/";
const DEFAULT_SINK_PUBLISH_PATH: &str = "/video/publish/";
const DEFAULT_SOURCE_BASE_URL: &str = "https://www.googleapis.com/youtube/v3";

const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10 * 60);
const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(15 * 60);
const DEFAULT_HTTP_CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 5;
const DEFAULT_MAX_CONCURRENT_PUBLISHES: usize = 3;
const DEFAULT_MAX_IDLE_CONNS: usize = 300;
const DEFAULT_MAX_CONNS_PER_HOST: usize = 100;
const DEFAULT_FETCH_BUFFER_SIZE: usize = 4 * 1024 * 1024;
const DEFAULT_PUBLISH_BUFFER_SIZE: usize = 1024 * 1024;

/// A declarative job mapping from the `accounts` config list.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct BootstrapAccount {
    pub source_channel_id: String,
    pub sink_account_id: String,
    #[serde(default)]
    pub sink_access_token: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerSection {
    port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
struct SourceSection {
    api_key: Option<String>,
    base_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SinkSection {
    api_key: Option<String>,
    api_secret: Option<String>,
    base_url: Option<String>,
    upload_init_path: Option<String>,
    publish_path: Option<String>,
    authorize_url: Option<String>,
    redirect_uri: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CronSection {
    schedule: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FetchSection {
    dir: Option<String>,
    max_concurrent: Option<usize>,
    timeout: Option<String>,
    buffer_size: Option<usize>,
    extractor_path: Option<String>,
    cookies_path: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PublishSection {
    max_concurrent: Option<usize>,
    timeout: Option<String>,
    buffer_size: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabaseSection {
    url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PerformanceSection {
    worker_pool_size: Option<usize>,
    http_client_timeout: Option<String>,
    max_idle_conns: Option<usize>,
    max_conns_per_host: Option<usize>,
    max_concurrent_io: Option<usize>,
    reset_in_flight_on_start: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingSection {
    dir: Option<String>,
    output_file: Option<String>,
    error_file: Option<String>,
}

/// Raw YAML structure.
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    server: ServerSection,
    #[serde(default)]
    source: SourceSection,
    #[serde(default)]
    sink: SinkSection,
    #[serde(default)]
    cron: CronSection,
    #[serde(default)]
    fetch: FetchSection,
    #[serde(default)]
    publish: PublishSection,
    #[serde(default)]
    database: DatabaseSection,
    #[serde(default)]
    performance: PerformanceSection,
    #[serde(default)]
    logging: LoggingSection,
    #[serde(default)]
    accounts: Vec<BootstrapAccount>,
}

/// Resolved application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub server_port: u16,

    pub source_api_key: String,
    pub source_base_url: String,

    pub sink_api_key: String,
    pub sink_api_secret: String,
    pub sink_base_url: String,
    pub sink_upload_init_path: String,
    pub sink_publish_path: String,
    pub sink_authorize_url: String,
    pub sink_redirect_uri: String,

    pub monitor_schedule: String,

    pub download_dir: PathBuf,
    pub max_concurrent_fetches: usize,
    pub fetch_timeout: Duration,
    pub fetch_buffer_size: usize,
    pub extractor_path: Option<String>,
    pub cookies_path: Option<PathBuf>,

    pub max_concurrent_publishes: usize,
    pub publish_timeout: Duration,
    pub publish_buffer_size: usize,

    pub database_url: String,

    pub worker_pool_size: usize,
    pub http_client_timeout: Duration,
    pub max_idle_conns: usize,
    pub max_conns_per_host: usize,
    pub max_concurrent_io: usize,
    pub reset_in_flight_on_start: bool,

    pub log_dir: PathBuf,
    pub log_file: String,
    pub error_log_file: String,

    pub bootstrap_accounts: Vec<BootstrapAccount>,
}

impl Config {
    /// Load configuration from a YAML file.
    ///
    /// A missing file yields the built-in defaults; a malformed file or
    /// invalid duration string is a fatal configuration error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = match std::fs::read_to_string(path) {
            Ok(content) => serde_yaml::from_str::<ConfigFile>(&content)
                .map_err(|e| Error::config(format!("failed to parse {}: {e}", path.display())))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    path = %path.display(),
                    "Config file not found; using built-in defaults"
                );
                ConfigFile::default()
            }
            Err(e) => {
                return Err(Error::config(format!(
                    "failed to read {}: {e}",
                    path.display()
                )));
            }
        };

        Self::resolve(raw)
    }

    fn resolve(raw: ConfigFile) -> Result<Self> {
        let server_port = raw.server.port.unwrap_or(DEFAULT_SERVER_PORT);
        let sink_redirect_uri = raw
            .sink
            .redirect_uri
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| format!("http://localhost:{server_port}/api/oauth/callback"));

        let max_concurrent_fetches = nonzero_or(
            raw.fetch.max_concurrent,
            DEFAULT_MAX_CONCURRENT_FETCHES,
        );
        let max_concurrent_publishes = nonzero_or(
            raw.publish.max_concurrent,
            DEFAULT_MAX_CONCURRENT_PUBLISHES,
        );

        Ok(Self {
            server_port,
            source_api_key: raw.source.api_key.unwrap_or_default(),
            source_base_url: string_or(raw.source.base_url, DEFAULT_SOURCE_BASE_URL),
            sink_api_key: raw.sink.api_key.unwrap_or_default(),
            sink_api_secret: raw.sink.api_secret.unwrap_or_default(),
            sink_base_url: string_or(raw.sink.base_url, DEFAULT_SINK_BASE_URL),
            sink_upload_init_path: string_or(
                raw.sink.upload_init_path,
                DEFAULT_SINK_UPLOAD_INIT_PATH,
            ),
            sink_publish_path: string_or(raw.sink.publish_path, DEFAULT_SINK_PUBLISH_PATH),
            sink_authorize_url: string_or(raw.sink.authorize_url, DEFAULT_SINK_AUTHORIZE_URL),
            sink_redirect_uri,
            monitor_schedule: string_or(raw.cron.schedule, DEFAULT_MONITOR_SCHEDULE),
            download_dir: PathBuf::from(string_or(raw.fetch.dir, DEFAULT_DOWNLOAD_DIR)),
            max_concurrent_fetches,
            fetch_timeout: parse_duration(raw.fetch.timeout, "fetch.timeout")?
                .unwrap_or(DEFAULT_FETCH_TIMEOUT),
            fetch_buffer_size: nonzero_or(raw.fetch.buffer_size, DEFAULT_FETCH_BUFFER_SIZE),
            extractor_path: raw.fetch.extractor_path.filter(|s| !s.is_empty()),
            cookies_path: raw
                .fetch
                .cookies_path
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
            max_concurrent_publishes,
            publish_timeout: parse_duration(raw.publish.timeout, "publish.timeout")?
                .unwrap_or(DEFAULT_PUBLISH_TIMEOUT),
            publish_buffer_size: nonzero_or(raw.publish.buffer_size, DEFAULT_PUBLISH_BUFFER_SIZE),
            database_url: string_or(raw.database.url, DEFAULT_DATABASE_URL),
            worker_pool_size: resolve_worker_pool_size(raw.performance.worker_pool_size),
            http_client_timeout: parse_duration(
                raw.performance.http_client_timeout,
                "performance.http_client_timeout",
            )?
            .unwrap_or(DEFAULT_HTTP_CLIENT_TIMEOUT),
            max_idle_conns: nonzero_or(raw.performance.max_idle_conns, DEFAULT_MAX_IDLE_CONNS),
            max_conns_per_host: nonzero_or(
                raw.performance.max_conns_per_host,
                DEFAULT_MAX_CONNS_PER_HOST,
            ),
            max_concurrent_io: nonzero_or(
                raw.performance.max_concurrent_io,
                max_concurrent_fetches + max_concurrent_publishes,
            ),
            reset_in_flight_on_start: raw.performance.reset_in_flight_on_start.unwrap_or(false),
            log_dir: PathBuf::from(string_or(raw.logging.dir, DEFAULT_LOG_DIR)),
            log_file: string_or(raw.logging.output_file, DEFAULT_LOG_FILE),
            error_log_file: string_or(raw.logging.error_file, DEFAULT_ERROR_LOG_FILE),
            bootstrap_accounts: raw.accounts,
        })
    }

    /// Batch size for a drain pass.
    pub fn drain_batch_size(&self) -> usize {
        let batch = self.max_concurrent_fetches + self.max_concurrent_publishes;
        if batch > 0 {
            batch
        } else {
            self.worker_pool_size.max(1)
        }
    }

    /// Fail startup when a required credential is missing.
    pub fn validate_required(&self) -> Result<()> {
        if self.source_api_key.is_empty() {
            return Err(Error::config("source.api_key is required"));
        }
        if self.sink_api_key.is_empty() {
            return Err(Error::config("sink.api_key is required"));
        }
        if self.sink_api_secret.is_empty() {
            return Err(Error::config("sink.api_secret is required"));
        }
        Ok(())
    }
}

fn string_or(value: Option<String>, default: &str) -> String {
    value
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn nonzero_or(value: Option<usize>, default: usize) -> usize {
    value.filter(|&v| v > 0).unwrap_or(default)
}

fn parse_duration(value: Option<String>, field: &str) -> Result<Option<Duration>> {
    match value.filter(|s| !s.is_empty()) {
        Some(s) => humantime::parse_duration(&s)
            .map(Some)
            .map_err(|e| Error::config(format!("invalid duration for {field} ('{s}'): {e}"))),
        None => Ok(None),
    }
}

/// Worker pool size: configured value, or CPU*4 clamped to [10, 100].
fn resolve_worker_pool_size(configured: Option<usize>) -> usize {
    match configured {
        Some(n) if n > 0 => n,
        _ => {
            let cores = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2);
            (cores * 4).clamp(10, 100)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_file() {
        let config = Config::resolve(ConfigFile::default()).unwrap();
        assert_eq!(config.server_port, 8080);
        assert_eq!(config.monitor_schedule, "*/5 * * * *");
        assert_eq!(config.fetch_timeout, Duration::from_secs(600));
        assert_eq!(config.publish_timeout, Duration::from_secs(900));
        assert_eq!(config.max_concurrent_fetches, 5);
        assert_eq!(config.max_concurrent_publishes, 3);
        assert_eq!(config.max_concurrent_io, 8);
        assert_eq!(config.drain_batch_size(), 8);
        assert!(config.worker_pool_size >= 10 && config.worker_pool_size <= 100);
        assert!(!config.reset_in_flight_on_start);
        assert_eq!(
            config.sink_redirect_uri,
            "http://localhost:8080/api/oauth/callback"
        );
    }

    #[test]
    fn test_parse_full_yaml() {
        let yaml = r#"
server:
  port: 9090
source:
  api_key: "src-key"
sink:
  api_key: "snk-key"
  api_secret: "snk-secret"
  base_url: "https://sink.example"
cron:
  schedule: "*/10 * * * *"
fetch:
  dir: "/tmp/media"
  max_concurrent: 2
  timeout: "5m"
publish:
  max_concurrent: 4
  timeout: "20m"
performance:
  worker_pool_size: 16
  reset_in_flight_on_start: true
accounts:
  - source_channel_id: "UCabc"
    sink_account_id: "snk123"
    sink_access_token: "T0"
    is_active: true
  - source_channel_id: "UCdef"
    sink_account_id: "snk456"
"#;
        let raw: ConfigFile = serde_yaml::from_str(yaml).unwrap();
        let config = Config::resolve(raw).unwrap();
        assert_eq!(config.server_port, 9090);
        assert_eq!(config.fetch_timeout, Duration::from_secs(300));
        assert_eq!(config.publish_timeout, Duration::from_secs(1200));
        assert_eq!(config.worker_pool_size, 16);
        assert!(config.reset_in_flight_on_start);
        assert_eq!(config.bootstrap_accounts.len(), 2);
        assert_eq!(config.bootstrap_accounts[0].sink_access_token.as_deref(), Some("T0"));
        assert_eq!(config.bootstrap_accounts[1].is_active, None);
        assert!(config.validate_required().is_ok());
    }

    #[test]
    fn test_invalid_duration_is_config_error() {
        let yaml = "fetch:\n  timeout: \"not-a-duration\"\n";
        let raw: ConfigFile = serde_yaml::from_str(yaml).unwrap();
        let err = Config::resolve(raw).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_missing_required_keys() {
        let config = Config::resolve(ConfigFile::default()).unwrap();
        assert!(matches!(
            config.validate_required(),
            Err(Error::Configuration(_))
        ));
    }
}
