//! Per-job discovery loop.
//!
//! Each tick scans every active job's source channel for items newer
//! than the last check, persists them as `pending`, and optionally
//! hands them to the pipeline for immediate processing. Jobs are
//! scanned in parallel under a bounded fan-out; per-job work is
//! sequential.

use std::sync::Arc;
use std::sync::OnceLock;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::database::models::{ItemDbModel, JobDbModel};
use crate::database::repositories::{ItemRepository, JobRepository};
use crate::pipeline::ItemProcessor;
use crate::source::SourceListing;
use crate::{Error, Result};

/// Maximum recent items requested from the source per job per tick.
const MAX_LISTED_ITEMS: u32 = 50;

/// Lookback window applied on a job's first-ever scan, to avoid
/// importing the entire channel backlog.
const BOOTSTRAP_WINDOW_HOURS: i64 = 24;

/// The discovery service.
pub struct ChannelMonitor {
    jobs: Arc<dyn JobRepository>,
    items: Arc<dyn ItemRepository>,
    source: Arc<dyn SourceListing>,
    /// Injected after construction; discovery never owns the pipeline.
    processor: OnceLock<Arc<ItemProcessor>>,
    /// Bounds concurrent per-job scans within a tick.
    fan_out: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl ChannelMonitor {
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        items: Arc<dyn ItemRepository>,
        source: Arc<dyn SourceListing>,
        max_concurrent_scans: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            jobs,
            items,
            source,
            processor: OnceLock::new(),
            fan_out: Arc::new(Semaphore::new(max_concurrent_scans.max(1))),
            cancel,
        }
    }

    /// Hand discovery a one-way capability to trigger immediate
    /// processing of newly found items.
    pub fn set_processor(&self, processor: Arc<ItemProcessor>) {
        if self.processor.set(processor).is_err() {
            warn!("Item processor already attached to monitor; ignoring");
        }
    }

    /// Scan all active jobs concurrently; per-job failures are
    /// collected and reported without aborting other jobs.
    pub async fn monitor_all(self: Arc<Self>) -> Result<()> {
        let jobs = self.jobs.list_jobs(true).await?;
        if jobs.is_empty() {
            debug!("No active jobs to monitor");
            return Ok(());
        }

        let mut tasks = JoinSet::new();
        for job in jobs {
            let this = Arc::clone(&self);
            tasks.spawn(async move {
                let _permit = tokio::select! {
                    _ = this.cancel.cancelled() => return Err(Error::Cancelled),
                    permit = Arc::clone(&this.fan_out).acquire_owned() => {
                        permit.map_err(|_| Error::Cancelled)?
                    }
                };
                this.monitor_job(&job).await.map_err(|e| {
                    Error::Other(format!(
                        "failed to monitor channel {} (sink account {}): {e}",
                        job.source_channel_id, job.sink_account_id
                    ))
                })
            });
        }

        let mut errors = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => errors.push(e.to_string()),
                Err(e) => errors.push(format!("monitor task panicked: {e}")),
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Other(format!(
                "monitoring errors: {}",
                errors.join("; ")
            )))
        }
    }

    /// Scan one job for new items.
    ///
    /// Storage errors on individual items are accumulated and do not
    /// abort the scan, but the `last_checked_at` advance is withheld
    /// when any occurred so a later pass can retry the lost work.
    pub async fn monitor_job(&self, job: &JobDbModel) -> Result<()> {
        let bootstrap_cutoff: Option<DateTime<Utc>> = match job.last_checked() {
            Some(_) => None,
            None => Some(Utc::now() - ChronoDuration::hours(BOOTSTRAP_WINDOW_HOURS)),
        };
        let scan_since = job
            .last_checked()
            .or(bootstrap_cutoff)
            .unwrap_or_else(Utc::now);

        let listed = self
            .source
            .latest_items(&job.source_channel_id, MAX_LISTED_ITEMS)
            .await?;

        let mut storage_errors = 0usize;
        let mut accepted: Vec<ItemDbModel> = Vec::new();

        for candidate in listed {
            let existing = match self.items.get_item_by_source(&candidate.source_item_id).await {
                Ok(existing) => existing,
                Err(e) => {
                    error!(
                        channel = %job.source_channel_id,
                        item_id = %candidate.source_item_id,
                        error = %e,
                        "Item lookup failed"
                    );
                    storage_errors += 1;
                    continue;
                }
            };
            if existing.is_some() {
                continue;
            }

            if let Some(cutoff) = bootstrap_cutoff {
                if candidate.published_at < cutoff {
                    // Older content is skipped during the initial
                    // bootstrap window.
                    continue;
                }
            }

            let mut item = ItemDbModel::new(
                candidate.source_item_id,
                &job.id,
                candidate.title,
                candidate.description,
            )
            .with_published_at(candidate.published_at);
            if let Some(thumbnail) = candidate.thumbnail_url {
                item = item.with_thumbnail(thumbnail);
            }
            accepted.push(item);
        }

        // The listing contract is newest-first, but out-of-order
        // responses must not corrupt the bookmark selection.
        accepted.sort_by(|a, b| b.published_at.cmp(&a.published_at));

        if accepted.is_empty() {
            info!(
                channel = %job.source_channel_id,
                sink_account = %job.sink_account_id,
                since = %scan_since.to_rfc3339(),
                "No new items detected"
            );
        } else {
            info!(
                channel = %job.source_channel_id,
                sink_account = %job.sink_account_id,
                count = accepted.len(),
                newest = %accepted[0].source_item_id,
                "Discovered new items"
            );
        }

        let mut persisted: Vec<ItemDbModel> = Vec::new();
        for item in accepted {
            match self.items.upsert_item(&item).await {
                Ok(()) => persisted.push(item),
                Err(Error::DuplicateMapping(_)) => {
                    // A concurrent scan of the same channel won the
                    // insert race; the item is already tracked.
                    debug!(item_id = %item.source_item_id, "Item already tracked");
                }
                Err(e) => {
                    error!(
                        channel = %job.source_channel_id,
                        item_id = %item.source_item_id,
                        error = %e,
                        "Failed to persist item"
                    );
                    storage_errors += 1;
                }
            }
        }

        if storage_errors > 0 {
            return Err(Error::Other(format!(
                "{storage_errors} storage error(s) while scanning channel {}",
                job.source_channel_id
            )));
        }

        let last_item_id = persisted.first().map(|i| i.source_item_id.as_str());
        self.jobs
            .update_last_checked(&job.id, last_item_id, Utc::now())
            .await?;

        if !persisted.is_empty() {
            if let Some(processor) = self.processor.get() {
                info!(
                    channel = %job.source_channel_id,
                    count = persisted.len(),
                    "Launching immediate processing for new items"
                );
                for item in persisted {
                    Arc::clone(processor).spawn_immediate(item);
                }
            }
        }

        Ok(())
    }
}
