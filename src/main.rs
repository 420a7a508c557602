use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use vidbridge::api::{self, AppState};
use vidbridge::bootstrap;
use vidbridge::config::Config;
use vidbridge::credentials::CredentialService;
use vidbridge::database::{self, repositories::*};
use vidbridge::extractor::{ExtractorService, MediaFetcher};
use vidbridge::manager::JobManager;
use vidbridge::monitor::ChannelMonitor;
use vidbridge::pipeline::{ItemProcessor, ProcessorConfig};
use vidbridge::scheduler::Scheduler;
use vidbridge::sink::{SinkApi, SinkClient};
use vidbridge::source::{SourceClient, SourceListing};
use vidbridge::{logging, utils};

/// Grace period for in-flight work at shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// How often stale downloads are reclaimed.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(6 * 60 * 60);

/// Downloads older than this are removed by the reclamation pass.
const CLEANUP_MAX_AGE: Duration = Duration::from_secs(48 * 60 * 60);

fn default_config_path() -> String {
    if std::path::Path::new("config/config.yaml").is_file() {
        "config/config.yaml".to_string()
    } else {
        "config.yaml".to_string()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args().nth(1).unwrap_or_else(default_config_path);
    let config = Config::load(&config_path)?;

    let _log_guards = logging::init(&config.log_dir, &config.log_file, &config.error_log_file)?;

    config.validate_required()?;

    // Store: concurrent readers, one writer.
    let database_url = database::normalize_database_url(&config.database_url);
    let read_pool = database::init_pool(&database_url).await?;
    let write_pool = database::init_write_pool(&database_url).await?;
    database::run_migrations(&read_pool).await?;

    let jobs: Arc<dyn JobRepository> = Arc::new(SqlxJobRepository::new(
        read_pool.clone(),
        write_pool.clone(),
    ));
    let items: Arc<dyn ItemRepository> =
        Arc::new(SqlxItemRepository::new(read_pool, write_pool));

    if config.reset_in_flight_on_start {
        let reset = items.reset_in_flight().await?;
        if reset > 0 {
            info!(count = reset, "Reset in-flight items to pending");
        }
    }

    // External clients share one HTTP client.
    let http = utils::http_client::build_shared_client(&config);
    let source: Arc<dyn SourceListing> = Arc::new(SourceClient::new(
        http.clone(),
        &config.source_api_key,
        &config.source_base_url,
    ));
    let sink: Arc<dyn SinkApi> = Arc::new(SinkClient::new(
        http,
        &config.sink_api_key,
        &config.sink_api_secret,
        &config.sink_base_url,
        &config.sink_upload_init_path,
        &config.sink_publish_path,
        config.publish_timeout,
        config.publish_buffer_size,
    ));
    let extractor = Arc::new(ExtractorService::new(&config)?);
    let fetcher: Arc<dyn MediaFetcher> = Arc::clone(&extractor) as Arc<dyn MediaFetcher>;

    let manager = Arc::new(JobManager::new(Arc::clone(&jobs)));
    bootstrap::bootstrap_jobs(&config.bootstrap_accounts, &manager, &jobs).await;

    let credentials = Arc::new(CredentialService::new(
        Arc::clone(&jobs),
        Arc::clone(&sink),
        &config.sink_api_key,
        &config.sink_authorize_url,
        &config.sink_redirect_uri,
    ));

    let cancel = CancellationToken::new();

    let processor = Arc::new(ItemProcessor::new(
        ProcessorConfig::from_config(&config),
        Arc::clone(&items),
        Arc::clone(&jobs),
        fetcher,
        Arc::clone(&sink),
        Arc::clone(&credentials),
        cancel.clone(),
    ));

    let monitor = Arc::new(ChannelMonitor::new(
        Arc::clone(&jobs),
        Arc::clone(&items),
        source,
        config.max_concurrent_io,
        cancel.clone(),
    ));
    monitor.set_processor(Arc::clone(&processor));

    let scheduler = Scheduler::new(
        Arc::clone(&monitor),
        Arc::clone(&processor),
        &config.monitor_schedule,
        cancel.clone(),
    )?;
    scheduler.start();

    let state = AppState {
        start_time: Instant::now(),
        manager,
        items,
        sink,
        credentials,
    };
    let api_handle = tokio::spawn(api::serve(state, config.server_port, cancel.clone()));

    // Periodic reclamation of stale downloaded files.
    {
        let extractor = Arc::clone(&extractor);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(CLEANUP_INTERVAL) => {}
                }
                match extractor.cleanup_old_downloads(CLEANUP_MAX_AGE).await {
                    Ok(0) => {}
                    Ok(removed) => info!(removed, "Reclaimed stale downloads"),
                    Err(e) => error!(error = %e, "Download reclamation failed"),
                }
            }
        });
    }

    info!("vidbridge started; press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;

    info!("Shutting down...");
    cancel.cancel();
    scheduler.stop(SHUTDOWN_GRACE).await;

    match tokio::time::timeout(SHUTDOWN_GRACE, api_handle).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => error!(error = %e, "Management API shutdown error"),
        Ok(Err(e)) => error!(error = %e, "Management API task failed"),
        Err(_) => error!("Management API did not stop within the grace period"),
    }

    info!("vidbridge stopped");
    Ok(())
}
