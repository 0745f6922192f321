use super::dispatch::{DeliveryCallback, SenderCore};
use super::stats::SenderStatsSnapshot;
use crate::ack::AckManager;
use crate::buffer::{AddOutcome, BufferError, EventBatch};
use crate::config::SendMode;
use crate::domain::EventRecord;
use crate::metrics::ChannelMetrics;
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};
use uuid::Uuid;

enum Command {
    Deliver(Arc<EventBatch>),
    Drain(oneshot::Sender<()>),
}

/// Sender whose `send` never waits on the network.
///
/// Flushed batches are queued to a dispatcher task. In sequential mode the
/// dispatcher delivers them one after another in flush order; in parallel
/// mode each batch gets its own task and may complete out of order.
///
/// `send` may be called from threads outside the runtime; the runtime is
/// the one current when the sender was built.
pub struct AsyncSender {
    core: Arc<SenderCore>,
    queue: mpsc::UnboundedSender<Command>,
    runtime: Handle,
    dispatcher: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl AsyncSender {
    pub(crate) fn from_core(
        core: SenderCore,
        runtime: Handle,
        on_delivery: Option<DeliveryCallback>,
    ) -> Self {
        let core = Arc::new(core);
        let (queue, commands) = mpsc::unbounded_channel();
        let dispatcher = runtime.spawn(dispatch_loop(Arc::clone(&core), commands, on_delivery));

        Self {
            core,
            queue,
            runtime,
            dispatcher: parking_lot::Mutex::new(Some(dispatcher)),
        }
    }

    /// Buffers one event; a completed batch is handed to the dispatcher.
    pub fn send(&self, event: EventRecord) -> Result<(), BufferError> {
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
            AddOutcome::Flush(batch) => self.enqueue(batch),
        }
        Ok(())
    }

    /// Hands the buffered events to the dispatcher without waiting.
    pub fn flush(&self) {
        if let Some(batch) = self.core.accumulator.take(None) {
            self.enqueue(batch);
        }
    }

    /// Waits until every batch flushed so far has a delivery outcome.
    pub async fn drain(&self) {
        let (done, finished) = oneshot::channel();
        if self.queue.send(Command::Drain(done)).is_ok() {
            let _ = finished.await;
        }
    }

    /// Flushes what is left, waits for outstanding deliveries, then stops
    /// ack polling and shuts the transport down. Batches awaiting
    /// acknowledgement are not waited for.
    pub async fn close(&self) {
        if let Some(batch) = self.core.accumulator.close() {
            self.enqueue(batch);
        }
        self.drain().await;

        if let Some(dispatcher) = self.dispatcher.lock().take() {
            dispatcher.abort();
        }
        self.core.shutdown();
        info!(stats = ?self.stats(), "Async sender closed");
    }

    fn enqueue(&self, batch: EventBatch) {
        enqueue(&self.core, &self.queue, batch);
    }

    fn arm_heartbeat(&self, batch_id: Uuid) {
        let Some(interval) = self.core.flush_interval else {
            return;
        };

        let core: Weak<SenderCore> = Arc::downgrade(&self.core);
        let queue = self.queue.clone();
        let handle = self.runtime.spawn(async move {
            tokio::time::sleep(interval).await;
            let Some(core) = core.upgrade() else {
                return;
            };
            if let Some(batch) = core.accumulator.take(Some(batch_id)) {
                debug!(%batch_id, "Heartbeat flush");
                enqueue(&core, &queue, batch);
            }
        });
        self.core
            .accumulator
            .arm_heartbeat(batch_id, handle.abort_handle());
    }

    pub fn send_mode(&self) -> SendMode {
        self.core.send_mode
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

fn enqueue(core: &SenderCore, queue: &mpsc::UnboundedSender<Command>, batch: EventBatch) {
    let batch_id = batch.id();
    if queue.send(Command::Deliver(core.flushed(batch))).is_err() {
        warn!(%batch_id, "Dispatcher has stopped, batch dropped");
        core.stats.record_failed();
    }
}

async fn dispatch_loop(
    core: Arc<SenderCore>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    on_delivery: Option<DeliveryCallback>,
) {
    let mut in_flight = JoinSet::new();

    while let Some(command) = commands.recv().await {
        // Reap finished parallel deliveries
        while in_flight.try_join_next().is_some() {}

        match command {
            Command::Deliver(batch) => {
                match core.send_mode {
                    SendMode::Sequential => {
                        deliver(&core, batch, on_delivery.as_ref()).await;
                    }
                    SendMode::Parallel => {
                        let core = Arc::clone(&core);
                        let on_delivery = on_delivery.clone();
                        in_flight.spawn(async move {
                            deliver(&core, batch, on_delivery.as_ref()).await;
                        });
                    }
                }
            }
            Command::Drain(done) => {
                while in_flight.join_next().await.is_some() {}
                let _ = done.send(());
            }
        }
    }

    while in_flight.join_next().await.is_some() {}
}

async fn deliver(core: &SenderCore, batch: Arc<EventBatch>, on_delivery: Option<&DeliveryCallback>) {
    let result = core.deliver(Arc::clone(&batch)).await;
    if let Some(callback) = on_delivery {
        callback(&batch, &result);
    }
}
