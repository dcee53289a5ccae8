//! The periodic Reaper worker (§4.5, §9). Runs on its own interval, not
//! coupled to any request lifecycle, and is driven by an injectable clock
//! so property 7 (§8) is testable without sleeping past the real
//! threshold.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::application::assembler::MultipartAssembler;
use crate::ports::StagingStore;

/// A time source the Reaper consults to decide assembly age. Production
/// code uses `SystemClock`; tests can inject a fake that reports whatever
/// instant they choose.
pub trait Clock: Send + Sync {
    fn now(&self) -> chrono::DateTime<chrono::Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> chrono::DateTime<chrono::Utc> {
        chrono::Utc::now()
    }
}

pub struct Reaper {
    assembler: Arc<MultipartAssembler>,
    staging: Arc<dyn StagingStore>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    stale_threshold: chrono::Duration,
}

impl Reaper {
    pub fn new(
        assembler: Arc<MultipartAssembler>,
        staging: Arc<dyn StagingStore>,
        clock: Arc<dyn Clock>,
        interval: Duration,
        stale_threshold: Duration,
    ) -> Self {
        Self {
            assembler,
            staging,
            clock,
            interval,
            stale_threshold: chrono::Duration::from_std(stale_threshold)
                .unwrap_or_else(|_| chrono::Duration::seconds(0)),
        }
    }

    /// Runs one sweep: evicts assemblies past the stale threshold and
    /// deletes their part bodies and sidecars. Returns the number of
    /// assemblies evicted, for logging and for tests.
    pub async fn sweep_once(&self) -> usize {
        let now = self.clock.now();
        let evicted = self.assembler.evict_stale(now, self.stale_threshold);
        let evicted_count = evicted.len();

        for (multipart_id, parts) in evicted {
            for part in parts {
                if let Err(e) = self.staging.delete(&part.upload_id).await {
                    tracing::warn!(
                        multipart_id = %multipart_id,
                        upload_id = %part.upload_id,
                        error = %e,
                        "failed to delete part body during reap"
                    );
                }
            }
        }

        info!(evicted = evicted_count, "reaper sweep complete");
        evicted_count
    }

    /// Spawns the reaper as a background task, ticking at `self.interval`
    /// until `shutdown` fires. Returns the `JoinHandle` so callers can
    /// await graceful shutdown.
    pub fn spawn(self: Arc<Self>, mut shutdown: tokio::sync::watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.sweep_once().await;
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            info!("reaper shutting down");
                            break;
                        }
                    }
                }
            }
        })
    }
}
