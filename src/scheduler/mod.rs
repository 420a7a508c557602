//! Cron-driven scheduler.
//!
//! Drives two loops: discovery on the configured monitor expression
//! and a pending drain on a fixed two-minute expression. Both fire
//! once immediately at start. Shutdown cancels the root token and
//! waits for in-flight ticks up to a bounded grace period.

use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::monitor::ChannelMonitor;
use crate::pipeline::ItemProcessor;
use crate::{Error, Result};

/// Fixed schedule for the pending drain.
const PROCESS_SCHEDULE: &str = "*/2 * * * *";

/// Upper bound for one discovery tick.
const MONITOR_TICK_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Upper bound for one drain tick.
const PROCESS_TICK_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Make a cron expression compatible with the seconds-aware parser:
/// a plain 5-field expression gets `0 ` prepended.
pub fn normalize_schedule(expr: &str) -> String {
    let fields = expr.split_whitespace().count();
    if fields == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    }
}

/// Parse a (possibly 5-field) cron expression.
pub fn parse_schedule(expr: &str) -> Result<cron::Schedule> {
    let normalized = normalize_schedule(expr);
    cron::Schedule::from_str(&normalized)
        .map_err(|e| Error::config(format!("invalid cron expression '{expr}': {e}")))
}

/// The scheduler.
pub struct Scheduler {
    monitor: Arc<ChannelMonitor>,
    processor: Arc<ItemProcessor>,
    monitor_schedule: cron::Schedule,
    monitor_expr: String,
    process_schedule: cron::Schedule,
    cancel: CancellationToken,
    tasks: parking_lot::Mutex<Option<JoinSet<()>>>,
}

impl Scheduler {
    /// Build a scheduler; an invalid monitor expression is a fatal
    /// configuration error.
    pub fn new(
        monitor: Arc<ChannelMonitor>,
        processor: Arc<ItemProcessor>,
        monitor_expr: &str,
        cancel: CancellationToken,
    ) -> Result<Self> {
        Ok(Self {
            monitor,
            processor,
            monitor_schedule: parse_schedule(monitor_expr)?,
            monitor_expr: normalize_schedule(monitor_expr),
            process_schedule: parse_schedule(PROCESS_SCHEDULE)?,
            cancel,
            tasks: parking_lot::Mutex::new(Some(JoinSet::new())),
        })
    }

    /// Spawn both schedule loops. Each fires its tick immediately,
    /// then follows its cron expression.
    pub fn start(&self) {
        info!(
            monitor_schedule = %self.monitor_expr,
            process_schedule = PROCESS_SCHEDULE,
            "Starting scheduler"
        );

        let mut tasks = self.tasks.lock();
        let Some(join_set) = tasks.as_mut() else {
            warn!("Scheduler already stopped; not starting loops");
            return;
        };

        {
            let monitor = Arc::clone(&self.monitor);
            let schedule = self.monitor_schedule.clone();
            let cancel = self.cancel.clone();
            join_set.spawn(run_schedule("monitor", schedule, cancel, move || {
                let monitor = Arc::clone(&monitor);
                async move {
                    let started = std::time::Instant::now();
                    match tokio::time::timeout(MONITOR_TICK_TIMEOUT, monitor.monitor_all()).await {
                        Ok(Ok(())) => {
                            info!(elapsed_ms = started.elapsed().as_millis() as u64, "Discovery tick completed");
                        }
                        Ok(Err(e)) => error!(error = %e, "Discovery tick failed"),
                        Err(_) => error!("Discovery tick timed out"),
                    }
                }
            }));
        }

        {
            let processor = Arc::clone(&self.processor);
            let schedule = self.process_schedule.clone();
            let cancel = self.cancel.clone();
            join_set.spawn(run_schedule("process", schedule, cancel, move || {
                let processor = Arc::clone(&processor);
                async move {
                    let started = std::time::Instant::now();
                    match tokio::time::timeout(PROCESS_TICK_TIMEOUT, processor.drain()).await {
                        Ok(Ok(())) => {
                            info!(elapsed_ms = started.elapsed().as_millis() as u64, "Drain tick completed");
                        }
                        Ok(Err(Error::Cancelled)) => debug!("Drain tick cancelled"),
                        Ok(Err(e)) => error!(error = %e, "Drain tick failed"),
                        Err(_) => error!("Drain tick timed out"),
                    }
                }
            }));
        }
    }

    /// Cancel the root token and wait for the loops up to `grace`.
    pub async fn stop(&self, grace: Duration) {
        info!("Stopping scheduler...");
        self.cancel.cancel();

        let join_set = self.tasks.lock().take();
        if let Some(mut join_set) = join_set {
            let drained = tokio::time::timeout(grace, async {
                while join_set.join_next().await.is_some() {}
            })
            .await;
            if drained.is_err() {
                warn!("Scheduler tasks did not finish within the grace period; aborting");
                join_set.abort_all();
            }
        }

        info!("Scheduler stopped");
    }
}

/// Run `tick` immediately, then on every upcoming occurrence of
/// `schedule` until cancellation.
async fn run_schedule<F, Fut>(
    name: &'static str,
    schedule: cron::Schedule,
    cancel: CancellationToken,
    tick: F,
) where
    F: Fn() -> Fut,
    Fut: Future<Output = ()>,
{
    debug!(loop_name = name, "Schedule loop started");
    tick().await;

    loop {
        let Some(next) = schedule.upcoming(Utc).next() else {
            warn!(loop_name = name, "Schedule has no upcoming occurrence; stopping loop");
            break;
        };
        let delay = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
        if cancel.is_cancelled() {
            break;
        }

        tick().await;
    }

    debug!(loop_name = name, "Schedule loop stopped");
}
