use super::middleware::{ChainResult, MiddlewareChain};
use super::stats::SenderStats;
use super::transport::Transport;
use crate::ack::AckManager;
use crate::buffer::{BatchAccumulator, EventBatch};
use crate::config::SendMode;
use crate::domain::ShipperError;
use crate::metrics::ChannelMetrics;
use crate::reliability::error_callback;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::debug;

/// Invoked by the async sender once a batch's delivery outcome is known.
pub type DeliveryCallback = Arc<dyn Fn(&EventBatch, &ChainResult) + Send + Sync>;

/// Everything one sender owns, assembled by the builder.
pub(crate) struct SenderCore {
    pub(crate) accumulator: BatchAccumulator,
    pub(crate) chain: Arc<MiddlewareChain>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) ack: Option<Arc<AckManager>>,
    pub(crate) metrics: Arc<ChannelMetrics>,
    pub(crate) stats: SenderStats,
    pub(crate) flush_interval: Option<Duration>,
    pub(crate) send_mode: SendMode,
    /// Single permit in sequential mode, held for the whole chain run.
    pub(crate) turn: Option<Semaphore>,
}

impl SenderCore {
    /// Runs a sealed batch through the chain. A failed exchange or a reply
    /// the collector rejected goes to the error callback; the outcome is
    /// also returned for callers that want it.
    pub(crate) async fn deliver(&self, batch: Arc<EventBatch>) -> ChainResult {
        let result = self.run_chain(Arc::clone(&batch)).await;

        match &result {
            Ok(reply) => {
                self.stats.record_delivered();
                debug!(batch_id = %batch.id(), events = batch.len(), status = reply.status, "Batch delivered");
            }
            Err(error) => {
                self.stats.record_failed();
                error_callback::report(&batch, error);
            }
        }

        result
    }

    async fn run_chain(&self, batch: Arc<EventBatch>) -> ChainResult {
        // Waiters are served in FIFO order
        let _turn = match &self.turn {
            Some(turn) => Some(turn.acquire().await.map_err(|_| ShipperError::Closed)?),
            None => None,
        };

        let reply = self.chain.send(batch).await?;
        reply.check()?;
        Ok(reply)
    }

    /// Accounts for a batch leaving the accumulator.
    pub(crate) fn flushed(&self, batch: EventBatch) -> Arc<EventBatch> {
        self.stats.record_flush(batch.estimated_size());
        Arc::new(batch)
    }

    pub(crate) fn shutdown(&self) {
        if let Some(ack) = &self.ack {
            ack.shutdown();
        }
        self.transport.shutdown();
    }
}
