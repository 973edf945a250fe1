//! Notify worker pool.
//!
//! N long-lived tasks, each ticking at the configured interval and
//! draining due deliveries through the skip-locked claim. Shutdown is a
//! watch signal observed at tick boundaries: an in-flight HTTP attempt
//! finishes, nothing is rolled back.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{error, info};

use crate::services::notify::NotifyService;

/// Rows claimed per worker tick.
const CLAIM_BATCH: i64 = 10;

pub struct NotifyWorkerPool {
    service: Arc<NotifyService>,
    worker_count: usize,
    tick: Duration,
}

impl NotifyWorkerPool {
    pub fn new(service: Arc<NotifyService>, worker_count: usize, tick_secs: u64) -> Self {
        Self {
            service,
            worker_count,
            tick: Duration::from_secs(tick_secs),
        }
    }

    /// Spawn the pool. Returned handles complete once the shutdown signal
    /// flips.
    pub fn spawn(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        info!(worker_count = self.worker_count, "notify worker pool starting");

        (0..self.worker_count)
            .map(|worker_id| {
                let service = self.service.clone();
                let tick = self.tick;
                let mut shutdown = shutdown.clone();

                tokio::spawn(async move {
                    let mut ticker = interval(tick);
                    info!(worker_id, "notify worker started");

                    loop {
                        tokio::select! {
                            _ = ticker.tick() => {
                                match service.process_due(CLAIM_BATCH).await {
                                    Ok(claimed) if claimed > 0 => {
                                        info!(worker_id, claimed, "processed notify tasks");
                                    }
                                    Ok(_) => {}
                                    Err(e) => {
                                        error!(worker_id, error = %e, "notify tick failed");
                                    }
                                }
                            }
                            changed = shutdown.changed() => {
                                if changed.is_err() || *shutdown.borrow() {
                                    info!(worker_id, "notify worker stopped");
                                    return;
                                }
                            }
                        }
                    }
                })
            })
            .collect()
    }
}
