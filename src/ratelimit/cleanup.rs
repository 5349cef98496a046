//! Background eviction of idle window state.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::limiter::RateLimiter;

/// Handle to a running cleanup loop.
///
/// The loop sweeps the limiter on a fixed interval until [`shutdown`] is
/// awaited or the handle is dropped.
///
/// [`shutdown`]: CleanupTask::shutdown
pub struct CleanupTask {
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl CleanupTask {
    /// Start sweeping `limiter` every `interval`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(limiter: Arc<RateLimiter>, interval: Duration) -> Self {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        info!(interval = ?interval, "Starting cleanup task");

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let evicted = limiter.sweep();
                        if evicted > 0 {
                            debug!(
                                evicted = evicted,
                                tracked = limiter.tracked_count(),
                                "Cleanup sweep complete"
                            );
                        }
                    }
                    _ = &mut shutdown_rx => break,
                }
            }

            debug!("Cleanup task stopped");
        });

        Self {
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Stop the loop and wait for it to exit.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Cleanup task ended abnormally");
            }
        }
        info!("Cleanup task shut down");
    }

    /// Whether the loop is still running.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for CleanupTask {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
