//! External extractor adapter.
//!
//! Wraps the yt-dlp style downloader binary: resolves it from config
//! or `PATH`, invokes it in single-item mode with a pinned output
//! template, and surfaces the last stderr fragment when it fails.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::Config;
use crate::{Error, Result};

/// Item watch-page URL prefix handed to the extractor.
const WATCH_URL_BASE: &str = "https://www.youtube.com/watch?v=";

/// Retry policy passed to the extractor binary.
const EXTRACTOR_RETRIES: u32 = 3;
const EXTRACTOR_RETRY_SLEEP_SECS: u32 = 3;

/// Maximum number of stderr lines retained for error reporting.
const STDERR_TAIL_LINES: usize = 40;

/// Progress callback, called with a 0-100 percentage.
pub type ProgressSink = Arc<dyn Fn(u8) + Send + Sync>;

/// A request to fetch one source item to local disk.
#[derive(Clone, Default)]
pub struct FetchRequest {
    pub item_id: String,
    /// Desired container format (e.g. "mp4"); overrides `quality`.
    pub format: Option<String>,
    /// Desired quality cap (e.g. "720"); used when `format` is unset.
    pub quality: Option<String>,
    pub progress: Option<ProgressSink>,
}

/// Result of a completed fetch.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub file_path: PathBuf,
    pub file_size: u64,
    pub elapsed: Duration,
}

/// Produces a local media file for a source item id.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(&self, request: &FetchRequest, cancel: CancellationToken)
        -> Result<FetchResult>;
}

/// Sub-process adapter for the extractor binary.
pub struct ExtractorService {
    binary_path: PathBuf,
    download_dir: PathBuf,
    cookies_path: Option<PathBuf>,
}

impl ExtractorService {
    /// Resolve the binary and prepare the download directory.
    ///
    /// Fails fast with [`Error::ExtractorMissing`] when the binary
    /// cannot be resolved, and with an IO error when the download
    /// directory cannot be created.
    pub fn new(config: &Config) -> Result<Self> {
        std::fs::create_dir_all(&config.download_dir)?;

        let binary_path = resolve_extractor_path(config.extractor_path.as_deref())?;
        info!(binary = %binary_path.display(), "Extractor binary resolved");

        let cookies_path = config
            .cookies_path
            .clone()
            .filter(|p| p.is_file())
            .or_else(|| {
                let default = PathBuf::from("./source_cookies.txt");
                default.is_file().then_some(default)
            });
        if let Some(path) = &cookies_path {
            info!(cookies = %path.display(), "Using extractor cookies file");
        }

        Ok(Self {
            binary_path,
            download_dir: config.download_dir.clone(),
            cookies_path,
        })
    }

    fn build_args(&self, request: &FetchRequest) -> Vec<String> {
        let output_template = self
            .download_dir
            .join(format!("{}.%(ext)s", request.item_id));

        let mut args = vec![
            "--no-playlist".to_string(),
            "--no-warnings".to_string(),
            "--force-ipv4".to_string(),
            "--retries".to_string(),
            EXTRACTOR_RETRIES.to_string(),
            "--retry-sleep".to_string(),
            EXTRACTOR_RETRY_SLEEP_SECS.to_string(),
        ];

        if let Some(cookies) = &self.cookies_path {
            args.push("--cookies".to_string());
            args.push(cookies.to_string_lossy().into_owned());
        }

        args.push("-o".to_string());
        args.push(output_template.to_string_lossy().into_owned());

        args.push("-f".to_string());
        if let Some(format) = request.format.as_deref().filter(|f| !f.is_empty()) {
            args.push(format.to_string());
        } else if let Some(quality) = request.quality.as_deref().filter(|q| !q.is_empty()) {
            args.push(format!(
                "bestvideo[height<={quality}]+bestaudio/best[height<={quality}]"
            ));
        } else {
            args.push("bestvideo[ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]".to_string());
        }

        args.push(format!("{WATCH_URL_BASE}{}", request.item_id));
        args
    }

    /// Locate the downloaded file and normalize its name to
    /// `<item_id>.mp4` when the extractor chose another extension.
    async fn locate_output(&self, item_id: &str) -> Result<PathBuf> {
        let prefix = format!("{item_id}.");
        let mut entries = tokio::fs::read_dir(&self.download_dir).await?;
        let mut found = None;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(&prefix) && entry.file_type().await?.is_file() {
                found = Some(entry.path());
                break;
            }
        }

        let path = found.ok_or_else(|| {
            Error::Other(format!("downloaded file not found for item {item_id}"))
        })?;

        if path.extension().and_then(|e| e.to_str()) != Some("mp4") {
            let canonical = self.download_dir.join(format!("{item_id}.mp4"));
            tokio::fs::rename(&path, &canonical).await?;
            return Ok(canonical);
        }

        Ok(path)
    }

    /// Remove downloaded files older than `max_age`.
    pub async fn cleanup_old_downloads(&self, max_age: Duration) -> Result<u64> {
        let mut removed = 0;
        let mut entries = tokio::fs::read_dir(&self.download_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let metadata = match entry.metadata().await {
                Ok(m) if m.is_file() => m,
                _ => continue,
            };
            let stale = metadata
                .modified()
                .ok()
                .and_then(|m| m.elapsed().ok())
                .is_some_and(|age| age > max_age);
            if stale && tokio::fs::remove_file(entry.path()).await.is_ok() {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[async_trait]
impl MediaFetcher for ExtractorService {
    async fn fetch(
        &self,
        request: &FetchRequest,
        cancel: CancellationToken,
    ) -> Result<FetchResult> {
        let started = Instant::now();
        let args = self.build_args(request);

        debug!(
            binary = %self.binary_path.display(),
            item_id = %request.item_id,
            "Invoking extractor"
        );

        let mut child = Command::new(&self.binary_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Other(format!("failed to spawn extractor: {e}")))?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Other("failed to capture extractor stderr".to_string()))?;

        // Drain stderr concurrently into a bounded tail so a verbose
        // run cannot back-pressure the pipe.
        let progress = request.progress.clone();
        let stderr_task = tokio::spawn(async move {
            let mut tail: std::collections::VecDeque<String> = std::collections::VecDeque::new();
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if let (Some(sink), Some(pct)) = (&progress, parse_progress(&line)) {
                    sink(pct);
                }
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            tail.into_iter().collect::<Vec<_>>().join("\n")
        });

        let exit_status = tokio::select! {
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                return Err(Error::Cancelled);
            }
            status = child.wait() => status?,
        };

        let stderr_tail = stderr_task.await.unwrap_or_default();

        if !exit_status.success() {
            return Err(Error::ExtractorFailed {
                exit_code: exit_status.code(),
                stderr: stderr_tail,
            });
        }

        let file_path = self.locate_output(&request.item_id).await?;
        let file_size = tokio::fs::metadata(&file_path).await?.len();
        let elapsed = started.elapsed();

        info!(
            item_id = %request.item_id,
            path = %file_path.display(),
            bytes = file_size,
            elapsed_secs = elapsed.as_secs(),
            "Extractor fetch completed"
        );

        Ok(FetchResult {
            file_path,
            file_size,
            elapsed,
        })
    }
}

/// Resolve the extractor binary from an explicit path or `PATH`.
fn resolve_extractor_path(configured: Option<&str>) -> Result<PathBuf> {
    if let Some(candidate) = configured {
        if candidate.contains(['/', '\\']) {
            let path = Path::new(candidate);
            if path.is_file() {
                return Ok(path.to_path_buf());
            }
            return Err(Error::ExtractorMissing(format!(
                "configured fetch.extractor_path '{candidate}' does not point to a binary"
            )));
        }
        return which::which(candidate).map_err(|_| {
            Error::ExtractorMissing(format!(
                "configured fetch.extractor_path '{candidate}' not found in PATH"
            ))
        });
    }

    which::which("yt-dlp").map_err(|_| {
        Error::ExtractorMissing(
            "yt-dlp not found; install it, add it to PATH, or set fetch.extractor_path"
                .to_string(),
        )
    })
}

/// Parse a percentage from an extractor progress line, e.g.
/// `[download]  45.2% of 123.45MiB at 5.67MiB/s ETA 00:12`.
fn parse_progress(line: &str) -> Option<u8> {
    if !line.contains("[download]") {
        return None;
    }
    let percent_pos = line.find('%')?;
    let prefix = &line[..percent_pos];
    let number = prefix
        .rsplit(|c: char| c.is_whitespace())
        .next()?
        .parse::<f64>()
        .ok()?;
    if (0.0..=100.0).contains(&number) {
        Some(number.round() as u8)
    } else {
        None
    }
}
