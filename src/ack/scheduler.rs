use super::manager::AckManager;
use super::protocol::AckError;
use parking_lot::Mutex;
use std::sync::Weak;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Fixed-rate driver of [`AckManager::poll_acks`].
///
/// Ticks are skipped while the window is empty or a poll is still running.
/// Stopping prevents future polls but leaves a poll already on the wire
/// alone.
pub struct AckPollScheduler {
    interval: Duration,
    started: AtomicBool,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl AckPollScheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            started: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Spawns the tick loop. A scheduler starts at most once.
    pub fn start(&self, manager: Weak<AckManager>) -> Result<(), AckError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(AckError::SchedulerAlreadyStarted);
        }

        let cancel = self.cancel.clone();
        let interval = self.interval;
        info!(?interval, "Starting ack poll scheduler");

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // First tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(manager) = manager.upgrade() else {
                            break;
                        };
                        if manager.window().is_empty() {
                            continue;
                        }
                        if manager.is_poll_in_flight() {
                            debug!("Previous ack poll still running, skipping tick");
                            continue;
                        }
                        tokio::spawn(async move {
                            if let Err(e) = manager.poll_acks().await {
                                warn!(error = %e, "Ack poll did not complete");
                            }
                        });
                    }
                }
            }

            debug!("Ack poll scheduler stopped");
        });

        *self.task.lock() = Some(handle);
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.is_started() && !self.cancel.is_cancelled()
    }

    pub fn stop(&self) {
        self.cancel.cancel();
        let _ = self.task.lock().take();
    }
}

impl Drop for AckPollScheduler {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
