//! Discovery loop tests: bootstrap window, dedup, bookmark handling,
//! and storage-error isolation, against a real in-memory store.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use vidbridge::database::models::{ItemDbModel, JobDbModel};
use vidbridge::database::repositories::{
    ItemRepository, JobRepository, SqlxItemRepository, SqlxJobRepository,
};
use vidbridge::database::{init_write_pool, run_migrations};
use vidbridge::monitor::ChannelMonitor;
use vidbridge::source::{SourceItem, SourceListing};
use vidbridge::{Error, Result};

async fn setup_store() -> (Arc<SqlxJobRepository>, Arc<SqlxItemRepository>) {
    let pool = init_write_pool("sqlite::memory:")
        .await
        .expect("Failed to create test pool");
    run_migrations(&pool).await.expect("Failed to run migrations");
    (
        Arc::new(SqlxJobRepository::new(pool.clone(), pool.clone())),
        Arc::new(SqlxItemRepository::new(pool.clone(), pool)),
    )
}

/// Source listing stub returning a programmable item list.
struct StubListing {
    items: Mutex<Vec<SourceItem>>,
}

impl StubListing {
    fn new(items: Vec<SourceItem>) -> Self {
        Self {
            items: Mutex::new(items),
        }
    }

    fn set_items(&self, items: Vec<SourceItem>) {
        *self.items.lock() = items;
    }
}

#[async_trait]
impl SourceListing for StubListing {
    async fn latest_items(&self, _channel_id: &str, _max: u32) -> Result<Vec<SourceItem>> {
        Ok(self.items.lock().clone())
    }
}

fn source_item(id: &str, age: ChronoDuration) -> SourceItem {
    SourceItem {
        source_item_id: id.to_string(),
        title: format!("title {id}"),
        description: format!("description {id}"),
        thumbnail_url: Some(format!("https://img.example/{id}.jpg")),
        published_at: Utc::now() - age,
    }
}

fn monitor_with(
    jobs: &Arc<SqlxJobRepository>,
    items: &Arc<SqlxItemRepository>,
    source: Arc<dyn SourceListing>,
) -> Arc<ChannelMonitor> {
    Arc::new(ChannelMonitor::new(
        jobs.clone() as Arc<dyn JobRepository>,
        items.clone() as Arc<dyn ItemRepository>,
        source,
        4,
        CancellationToken::new(),
    ))
}

#[tokio::test]
async fn fresh_bootstrap_filters_backlog_beyond_24h() {
    let (jobs, items) = setup_store().await;
    let job = JobDbModel::new("UCabc", "ttk123", "T0");
    jobs.upsert_job(&job).await.unwrap();

    // Three recent items; the 36h-old one falls outside the bootstrap
    // window on a first-ever scan.
    let listing = Arc::new(StubListing::new(vec![
        source_item("id_now-1h", ChronoDuration::hours(1)),
        source_item("id_now-36h", ChronoDuration::hours(36)),
        source_item("id_now-12h", ChronoDuration::hours(12)),
    ]));
    let monitor = monitor_with(&jobs, &items, listing);

    let before = Utc::now();
    Arc::clone(&monitor).monitor_all().await.unwrap();

    let pending = items.list_pending(10).await.unwrap();
    assert_eq!(pending.len(), 2);
    assert!(items.get_item_by_source("id_now-1h").await.unwrap().is_some());
    assert!(items.get_item_by_source("id_now-12h").await.unwrap().is_some());
    assert!(items.get_item_by_source("id_now-36h").await.unwrap().is_none());

    let stored = jobs.get_job_by_id(&job.id).await.unwrap().unwrap();
    assert_eq!(stored.last_item_id.as_deref(), Some("id_now-1h"));
    let checked = stored.last_checked().unwrap();
    assert!(checked >= before && checked <= Utc::now());
}

#[tokio::test]
async fn second_tick_dedups_and_advances_bookmark() {
    let (jobs, items) = setup_store().await;
    let job = JobDbModel::new("UCabc", "ttk123", "T0");
    jobs.upsert_job(&job).await.unwrap();

    let listing = Arc::new(StubListing::new(vec![
        source_item("id_now-1h", ChronoDuration::hours(1)),
        source_item("id_now-36h", ChronoDuration::hours(36)),
        source_item("id_now-12h", ChronoDuration::hours(12)),
    ]));
    let monitor = monitor_with(&jobs, &items, listing.clone() as Arc<dyn SourceListing>);
    Arc::clone(&monitor).monitor_all().await.unwrap();
    assert_eq!(items.count_pending().await.unwrap(), 2);

    // Second tick: same three plus one new item. After the first scan
    // the bootstrap window no longer applies, so only deduplication
    // decides; exactly the new item lands.
    listing.set_items(vec![
        source_item("id_now-5m", ChronoDuration::minutes(5)),
        source_item("id_now-1h", ChronoDuration::hours(1)),
        source_item("id_now-36h", ChronoDuration::hours(36)),
        source_item("id_now-12h", ChronoDuration::hours(12)),
    ]);
    Arc::clone(&monitor).monitor_all().await.unwrap();

    // The 36h item is no longer filtered (not a first run) so it is
    // persisted now; the newest accepted item becomes the bookmark.
    let stored = jobs.get_job_by_id(&job.id).await.unwrap().unwrap();
    assert_eq!(stored.last_item_id.as_deref(), Some("id_now-5m"));
    assert!(items.get_item_by_source("id_now-5m").await.unwrap().is_some());

    // No duplicates for the previously seen items.
    let pending = items.list_pending(20).await.unwrap();
    let count_1h = pending
        .iter()
        .filter(|i| i.source_item_id == "id_now-1h")
        .count();
    assert_eq!(count_1h, 1);
}

#[tokio::test]
async fn already_persisted_listing_updates_only_the_timestamp() {
    let (jobs, items) = setup_store().await;
    let job = JobDbModel::new("UCabc", "ttk123", "T0");
    jobs.upsert_job(&job).await.unwrap();

    let listing = Arc::new(StubListing::new(vec![source_item(
        "vid1",
        ChronoDuration::hours(1),
    )]));
    let monitor = monitor_with(&jobs, &items, listing);
    Arc::clone(&monitor).monitor_all().await.unwrap();

    let after_first = jobs.get_job_by_id(&job.id).await.unwrap().unwrap();
    assert_eq!(after_first.last_item_id.as_deref(), Some("vid1"));
    assert_eq!(items.count_pending().await.unwrap(), 1);

    Arc::clone(&monitor).monitor_all().await.unwrap();

    let after_second = jobs.get_job_by_id(&job.id).await.unwrap().unwrap();
    assert_eq!(items.count_pending().await.unwrap(), 1);
    assert_eq!(after_second.last_item_id.as_deref(), Some("vid1"));
    assert!(after_second.last_checked_at >= after_first.last_checked_at);
}

#[tokio::test]
async fn out_of_order_listing_still_selects_newest_bookmark() {
    let (jobs, items) = setup_store().await;
    let job = JobDbModel::new("UCabc", "ttk123", "T0");
    jobs.upsert_job(&job).await.unwrap();

    // Oldest first, violating the listing contract.
    let listing = Arc::new(StubListing::new(vec![
        source_item("oldest", ChronoDuration::hours(20)),
        source_item("middle", ChronoDuration::hours(10)),
        source_item("newest", ChronoDuration::hours(1)),
    ]));
    let monitor = monitor_with(&jobs, &items, listing);
    Arc::clone(&monitor).monitor_all().await.unwrap();

    let stored = jobs.get_job_by_id(&job.id).await.unwrap().unwrap();
    assert_eq!(stored.last_item_id.as_deref(), Some("newest"));
}

#[tokio::test]
async fn inactive_jobs_are_not_scanned() {
    let (jobs, items) = setup_store().await;
    let mut job = JobDbModel::new("UCabc", "ttk123", "T0");
    job.set_active(false);
    jobs.upsert_job(&job).await.unwrap();

    let listing = Arc::new(StubListing::new(vec![source_item(
        "vid1",
        ChronoDuration::hours(1),
    )]));
    let monitor = monitor_with(&jobs, &items, listing);
    Arc::clone(&monitor).monitor_all().await.unwrap();

    assert_eq!(items.count_pending().await.unwrap(), 0);
    let stored = jobs.get_job_by_id(&job.id).await.unwrap().unwrap();
    assert!(stored.last_checked_at.is_none());
}

#[tokio::test]
async fn concurrent_discovery_of_one_channel_creates_no_duplicates() {
    let (jobs, items) = setup_store().await;
    let job = JobDbModel::new("UCabc", "ttk123", "T0");
    jobs.upsert_job(&job).await.unwrap();

    let listing: Arc<dyn SourceListing> = Arc::new(StubListing::new(vec![
        source_item("vid1", ChronoDuration::hours(1)),
        source_item("vid2", ChronoDuration::hours(2)),
        source_item("vid3", ChronoDuration::hours(3)),
    ]));
    let monitor = monitor_with(&jobs, &items, listing);

    let mut handles = Vec::new();
    for _ in 0..4 {
        let monitor = monitor.clone();
        let job = job.clone();
        handles.push(tokio::spawn(async move { monitor.monitor_job(&job).await }));
    }
    for handle in handles {
        // Races between lookup and insert resolve as benign skips, so
        // every scan completes cleanly.
        handle.await.unwrap().unwrap();
    }

    assert_eq!(items.count_pending().await.unwrap(), 3);
}

/// Item repository wrapper that fails persistence for chosen source
/// item ids.
struct FailingItems {
    inner: Arc<SqlxItemRepository>,
    fail_for: String,
}

#[async_trait]
impl ItemRepository for FailingItems {
    async fn upsert_item(&self, item: &ItemDbModel) -> Result<()> {
        if item.source_item_id == self.fail_for {
            return Err(Error::Other("disk full".to_string()));
        }
        self.inner.upsert_item(item).await
    }
    async fn get_item_by_id(&self, id: &str) -> Result<Option<ItemDbModel>> {
        self.inner.get_item_by_id(id).await
    }
    async fn get_item_by_source(&self, source_item_id: &str) -> Result<Option<ItemDbModel>> {
        self.inner.get_item_by_source(source_item_id).await
    }
    async fn list_pending(&self, limit: u32) -> Result<Vec<ItemDbModel>> {
        self.inner.list_pending(limit).await
    }
    async fn count_pending(&self) -> Result<u64> {
        self.inner.count_pending().await
    }
    async fn update_item_status(
        &self,
        id: &str,
        status: vidbridge::database::models::ItemStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        self.inner.update_item_status(id, status, error_message).await
    }
    async fn update_item_file(&self, id: &str, path: &str) -> Result<()> {
        self.inner.update_item_file(id, path).await
    }
    async fn update_item_sink_id(&self, id: &str, sink_item_id: &str) -> Result<()> {
        self.inner.update_item_sink_id(id, sink_item_id).await
    }
    async fn reset_in_flight(&self) -> Result<u64> {
        self.inner.reset_in_flight().await
    }
}

#[tokio::test]
async fn storage_error_withholds_the_bookmark_advance() {
    let (jobs, items) = setup_store().await;
    let job = JobDbModel::new("UCabc", "ttk123", "T0");
    jobs.upsert_job(&job).await.unwrap();

    let failing = Arc::new(FailingItems {
        inner: items.clone(),
        fail_for: "vid2".to_string(),
    });
    let listing: Arc<dyn SourceListing> = Arc::new(StubListing::new(vec![
        source_item("vid1", ChronoDuration::hours(1)),
        source_item("vid2", ChronoDuration::hours(2)),
    ]));
    let monitor = Arc::new(ChannelMonitor::new(
        jobs.clone() as Arc<dyn JobRepository>,
        failing,
        listing,
        4,
        CancellationToken::new(),
    ));

    let err = monitor.monitor_job(&job).await.unwrap_err();
    assert!(err.to_string().contains("storage error"));

    // The good item was persisted, but the scan did not advance past
    // the lost one.
    assert!(items.get_item_by_source("vid1").await.unwrap().is_some());
    let stored = jobs.get_job_by_id(&job.id).await.unwrap().unwrap();
    assert!(stored.last_checked_at.is_none());
    assert!(stored.last_item_id.is_none());
}
