use super::dispatch::SenderCore;
use super::middleware::ChainResult;
use super::stats::SenderStatsSnapshot;
use crate::ack::AckManager;
use crate::buffer::{AddOutcome, BufferError};
use crate::domain::EventRecord;
use crate::metrics::ChannelMetrics;
use std::sync::{Arc, Weak};
use tracing::{debug, info};
use uuid::Uuid;

/// Sender that performs each flush on the task that triggered it.
///
/// `send` returns once the event is buffered, or, when the event completed
/// a batch, once that batch's delivery has finished. Heartbeat flushes run
/// on the timer task.
pub struct SyncSender {
    core: Arc<SenderCore>,
}

impl SyncSender {
    pub(crate) fn from_core(core: SenderCore) -> Self {
        Self {
            core: Arc::new(core),
        }
    }

    /// Buffers one event. Delivery failures are reported through the error
    /// callback; only a closed sender is an error here.
    pub async fn send(&self, event: EventRecord) -> Result<(), BufferError> {
        let outcome = match self.core.accumulator.add(event) {
            Ok(outcome) => outcome,
            Err(e) => {
                self.core.stats.record_rejected();
                return Err(e);
            }
        };
        self.core.stats.record_accepted();

        match outcome {
            AddOutcome::Started(batch_id) => self.arm_heartbeat(batch_id),
            AddOutcome::Appended => {}
            AddOutcome::Flush(batch) => {
                let _ = self.core.deliver(self.core.flushed(batch)).await;
            }
        }
        Ok(())
    }

    /// Delivers whatever is buffered. Returns `None` if nothing was.
    pub async fn flush(&self) -> Option<ChainResult> {
        let batch = self.core.accumulator.take(None)?;
        Some(self.core.deliver(self.core.flushed(batch)).await)
    }

    /// Flushes what is left, stops ack polling and shuts the transport down.
    /// Batches awaiting acknowledgement are not waited for.
    pub async fn close(&self) {
        if let Some(batch) = self.core.accumulator.close() {
            let _ = self.core.deliver(self.core.flushed(batch)).await;
        }
        self.core.shutdown();
        info!(stats = ?self.stats(), "Sync sender closed");
    }

    fn arm_heartbeat(&self, batch_id: Uuid) {
        let Some(interval) = self.core.flush_interval else {
            return;
        };

        let core: Weak<SenderCore> = Arc::downgrade(&self.core);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            let Some(core) = core.upgrade() else {
                return;
            };
            if let Some(batch) = core.accumulator.take(Some(batch_id)) {
                debug!(%batch_id, "Heartbeat flush");
                let _ = core.deliver(core.flushed(batch)).await;
            }
        });
        self.core
            .accumulator
            .arm_heartbeat(batch_id, handle.abort_handle());
    }

    pub fn pending_events(&self) -> usize {
        self.core.accumulator.pending_events()
    }

    pub fn stats(&self) -> SenderStatsSnapshot {
        self.core.stats.snapshot()
    }

    pub fn metrics(&self) -> &Arc<ChannelMetrics> {
        &self.core.metrics
    }

    pub fn ack_manager(&self) -> Option<&Arc<AckManager>> {
        self.core.ack.as_ref()
    }

    pub fn middleware_names(&self) -> Vec<&'static str> {
        self.core.chain.layer_names()
    }
}
