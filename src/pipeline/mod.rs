//! Processing pipeline: carries items from `pending` to `completed`.
//!
//! Every state transition is persisted before the next external side
//! effect starts, so a restart can observe any state without losing
//! work. Concurrency is bounded by three semaphores: a general worker
//! pool, a fetch stage cap, and a publish stage cap. Immediate
//! processing launched from discovery shares the same worker pool as
//! batch draining.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::credentials::CredentialService;
use crate::database::models::{ItemDbModel, ItemStatus};
use crate::database::repositories::{ItemRepository, JobRepository};
use crate::extractor::{FetchRequest, MediaFetcher};
use crate::sink::{PublishRequest, SinkApi};
use crate::{Error, Result};

/// Per-item bound for immediate processing, independent of the
/// scheduler tick period.
const IMMEDIATE_PROCESS_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Container format requested from the extractor.
const FETCH_FORMAT: &str = "mp4";

/// Quality cap requested from the extractor (sink-friendly balance of
/// quality and fetch time).
const FETCH_QUALITY: &str = "720";

/// Pipeline concurrency and timeout knobs.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub worker_pool_size: usize,
    pub max_concurrent_fetches: usize,
    pub max_concurrent_publishes: usize,
    pub fetch_timeout: Duration,
    pub publish_timeout: Duration,
    pub drain_batch_size: usize,
    pub immediate_timeout: Duration,
}

impl ProcessorConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            worker_pool_size: config.worker_pool_size.max(1),
            max_concurrent_fetches: config.max_concurrent_fetches.max(1),
            max_concurrent_publishes: config.max_concurrent_publishes.max(1),
            fetch_timeout: config.fetch_timeout,
            publish_timeout: config.publish_timeout,
            drain_batch_size: config.drain_batch_size(),
            immediate_timeout: IMMEDIATE_PROCESS_TIMEOUT,
        }
    }
}

/// The item processor.
pub struct ItemProcessor {
    config: ProcessorConfig,
    items: Arc<dyn ItemRepository>,
    jobs: Arc<dyn JobRepository>,
    fetcher: Arc<dyn MediaFetcher>,
    sink: Arc<dyn SinkApi>,
    credentials: Arc<CredentialService>,
    worker_sem: Arc<Semaphore>,
    fetch_sem: Arc<Semaphore>,
    publish_sem: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl ItemProcessor {
    pub fn new(
        config: ProcessorConfig,
        items: Arc<dyn ItemRepository>,
        jobs: Arc<dyn JobRepository>,
        fetcher: Arc<dyn MediaFetcher>,
        sink: Arc<dyn SinkApi>,
        credentials: Arc<CredentialService>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            worker_sem: Arc::new(Semaphore::new(config.worker_pool_size)),
            fetch_sem: Arc::new(Semaphore::new(config.max_concurrent_fetches)),
            publish_sem: Arc::new(Semaphore::new(config.max_concurrent_publishes)),
            config,
            items,
            jobs,
            fetcher,
            sink,
            credentials,
            cancel,
        }
    }

    /// Drain the pending set: read batches and process them
    /// concurrently until the store returns no pending items or the
    /// root context is cancelled. Item failures are recorded on the
    /// item and never abort the batch.
    pub async fn drain(self: Arc<Self>) -> Result<()> {
        let batch_size = self.config.drain_batch_size.max(1) as u32;

        loop {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let batch = self.items.list_pending(batch_size).await?;
            if batch.is_empty() {
                return Ok(());
            }

            debug!(count = batch.len(), "Draining pending batch");

            let mut tasks = JoinSet::new();
            for item in batch {
                let this = Arc::clone(&self);
                tasks.spawn(async move {
                    let Some(_permit) = this.acquire_worker().await else {
                        return;
                    };
                    if let Err(e) = this.process_item(&item).await {
                        warn!(item_id = %item.source_item_id, error = %e, "Item processing failed");
                    }
                });
            }
            while tasks.join_next().await.is_some() {}
        }
    }

    /// Process one newly discovered item right away, bounded by the
    /// shared worker pool and an overall per-item timeout.
    pub fn spawn_immediate(self: Arc<Self>, item: ItemDbModel) {
        let this = self;
        tokio::spawn(async move {
            let Some(_permit) = this.acquire_worker().await else {
                warn!(
                    item_id = %item.source_item_id,
                    "Skipping immediate processing: cancelled before a worker slot was available"
                );
                return;
            };

            match tokio::time::timeout(this.config.immediate_timeout, this.process_item(&item))
                .await
            {
                Ok(Ok(())) => {
                    info!(item_id = %item.source_item_id, "Immediate processing completed");
                }
                Ok(Err(error)) => {
                    warn!(
                        item_id = %item.source_item_id,
                        error = %error,
                        "Immediate processing failed"
                    );
                }
                Err(_) => {
                    let timeout_error = Error::Timeout(format!(
                        "immediate processing exceeded {:?}",
                        this.config.immediate_timeout
                    ));
                    this.mark_failed(&item.id, &timeout_error).await;
                    warn!(item_id = %item.source_item_id, "Immediate processing timed out");
                }
            }
        });
    }

    /// Carry one item through `fetching → fetched → publishing →
    /// completed`, marking it `failed` on the first error.
    pub async fn process_item(&self, item: &ItemDbModel) -> Result<()> {
        info!(
            item_id = %item.source_item_id,
            job_id = %item.job_id,
            "Processing item"
        );

        let file_path = match self.fetch_stage(item).await {
            Ok(path) => path,
            Err(error) => {
                self.mark_failed(&item.id, &error).await;
                return Err(error);
            }
        };

        let sink_item_id = match self.publish_stage(item, &file_path).await {
            Ok(id) => id,
            Err(error) => {
                self.mark_failed(&item.id, &error).await;
                return Err(error);
            }
        };

        self.items
            .update_item_status(&item.id, ItemStatus::Completed, None)
            .await?;

        info!(
            item_id = %item.source_item_id,
            sink_item_id = %sink_item_id,
            "Item completed"
        );
        Ok(())
    }

    async fn fetch_stage(&self, item: &ItemDbModel) -> Result<PathBuf> {
        self.items
            .update_item_status(&item.id, ItemStatus::Fetching, None)
            .await?;

        let _permit = self
            .acquire(&self.fetch_sem)
            .await
            .ok_or(Error::Cancelled)?;

        let request = FetchRequest {
            item_id: item.source_item_id.clone(),
            format: Some(FETCH_FORMAT.to_string()),
            quality: Some(FETCH_QUALITY.to_string()),
            progress: None,
        };

        let fetch_cancel = self.cancel.child_token();
        let result = tokio::time::timeout(
            self.config.fetch_timeout,
            self.fetcher.fetch(&request, fetch_cancel.clone()),
        )
        .await;

        let fetched = match result {
            Ok(inner) => inner?,
            Err(_) => {
                fetch_cancel.cancel();
                return Err(Error::Timeout(format!(
                    "fetch exceeded {:?}",
                    self.config.fetch_timeout
                )));
            }
        };

        let path_str = fetched.file_path.to_string_lossy().into_owned();
        self.items.update_item_file(&item.id, &path_str).await?;
        self.items
            .update_item_status(&item.id, ItemStatus::Fetched, None)
            .await?;

        debug!(
            item_id = %item.source_item_id,
            path = %path_str,
            bytes = fetched.file_size,
            "Fetch stage completed"
        );

        Ok(fetched.file_path)
    }

    async fn publish_stage(&self, item: &ItemDbModel, file_path: &Path) -> Result<String> {
        let job = self
            .jobs
            .get_job_by_id(&item.job_id)
            .await?
            .ok_or_else(|| Error::not_found("Job", &item.job_id))?;

        if job.sink_account_id.is_empty() {
            return Err(Error::validation(format!(
                "sink account id not configured for job {}",
                job.id
            )));
        }

        let token_state = self.credentials.evaluate(&job).await?;
        let access_token = token_state.into_access_token(&job.id)?;

        self.items
            .update_item_status(&item.id, ItemStatus::Publishing, None)
            .await?;

        let _permit = self
            .acquire(&self.publish_sem)
            .await
            .ok_or(Error::Cancelled)?;

        let request = PublishRequest {
            access_token,
            sink_account_id: job.sink_account_id.clone(),
            file_path: file_path.to_path_buf(),
            title: item.title.clone(),
            description: item.description.clone(),
            privacy_level: String::new(),
        };

        let sink_item_id = tokio::time::timeout(
            self.config.publish_timeout,
            self.sink.publish(&request),
        )
        .await
        .map_err(|_| {
            Error::Timeout(format!(
                "publish exceeded {:?}",
                self.config.publish_timeout
            ))
        })??;

        self.items
            .update_item_sink_id(&item.id, &sink_item_id)
            .await?;

        Ok(sink_item_id)
    }

    async fn mark_failed(&self, item_id: &str, cause: &Error) {
        if let Err(e) = self
            .items
            .update_item_status(item_id, ItemStatus::Failed, Some(&cause.to_string()))
            .await
        {
            error!(item_id, error = %e, "Failed to record item failure");
        }
    }

    async fn acquire_worker(&self) -> Option<OwnedSemaphorePermit> {
        self.acquire(&self.worker_sem).await
    }

    async fn acquire(&self, semaphore: &Arc<Semaphore>) -> Option<OwnedSemaphorePermit> {
        tokio::select! {
            _ = self.cancel.cancelled() => None,
            permit = Arc::clone(semaphore).acquire_owned() => permit.ok(),
        }
    }
}
