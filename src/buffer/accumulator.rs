use super::{BatchLimits, BufferError, EventBatch};
use crate::domain::EventRecord;
use crate::sender::EventSerializer;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::AbortHandle;
use uuid::Uuid;

/// What happened to an event handed to [`BatchAccumulator::add`].
#[derive(Debug)]
pub enum AddOutcome {
    /// The event opened a new batch; its heartbeat timer should be armed.
    Started(Uuid),
    /// The event joined a batch that is still below its limits.
    Appended,
    /// The batch reached a limit and was sealed. It must be dispatched.
    Flush(EventBatch),
}

struct AccumulatorState {
    current: EventBatch,
    heartbeat: Option<AbortHandle>,
    closed: bool,
}

/// Batching core shared by the sync and async senders.
///
/// Every mutation happens under one lock, so concurrent producers and the
/// heartbeat timer never race on the current batch or its size. Flushing
/// swaps in a fresh batch before returning, so producers never wait on a
/// flush in progress.
pub struct BatchAccumulator {
    state: Mutex<AccumulatorState>,
    limits: BatchLimits,
    serializer: Arc<dyn EventSerializer>,
}

impl BatchAccumulator {
    pub fn new(limits: BatchLimits, serializer: Arc<dyn EventSerializer>) -> Self {
        Self {
            state: Mutex::new(AccumulatorState {
                current: EventBatch::new(limits),
                heartbeat: None,
                closed: false,
            }),
            limits,
            serializer,
        }
    }

    pub fn add(&self, event: EventRecord) -> Result<AddOutcome, BufferError> {
        // Serialize outside the lock; only the append is serialized.
        let serialized = self.serializer.serialize(&event)?;

        let mut state = self.state.lock();
        if state.closed {
            return Err(BufferError::BufferClosed);
        }

        let opened = state.current.is_empty();
        state.current.add(event, &serialized)?;

        if state.current.is_flushable() {
            return Ok(AddOutcome::Flush(Self::swap_out(&mut state, self.limits)));
        }

        if opened {
            Ok(AddOutcome::Started(state.current.id()))
        } else {
            Ok(AddOutcome::Appended)
        }
    }

    /// Seals and returns the current batch. With `expected` set, only the
    /// batch with that id is taken, which lets a stale heartbeat be a no-op.
    /// The heartbeat calling with `expected` is not aborted by its own take.
    pub fn take(&self, expected: Option<Uuid>) -> Option<EventBatch> {
        let mut state = self.state.lock();
        if state.current.is_empty() {
            return None;
        }
        if let Some(expected) = expected {
            if state.current.id() != expected {
                return None;
            }
            state.heartbeat = None;
        }
        Some(Self::swap_out(&mut state, self.limits))
    }

    /// Stores the heartbeat timer for `batch_id`. If that batch has already
    /// been flushed the timer is aborted immediately.
    pub fn arm_heartbeat(&self, batch_id: Uuid, handle: AbortHandle) {
        let mut state = self.state.lock();
        if state.current.id() == batch_id && !state.current.is_empty() && !state.closed {
            if let Some(previous) = state.heartbeat.replace(handle) {
                previous.abort();
            }
        } else {
            handle.abort();
        }
    }

    /// Refuses further events and hands back whatever is still buffered.
    pub fn close(&self) -> Option<EventBatch> {
        let mut state = self.state.lock();
        state.closed = true;
        if state.current.is_empty() {
            if let Some(heartbeat) = state.heartbeat.take() {
                heartbeat.abort();
            }
            return None;
        }
        Some(Self::swap_out(&mut state, self.limits))
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn pending_events(&self) -> usize {
        self.state.lock().current.len()
    }

    pub fn limits(&self) -> BatchLimits {
        self.limits
    }

    fn swap_out(state: &mut AccumulatorState, limits: BatchLimits) -> EventBatch {
        if let Some(heartbeat) = state.heartbeat.take() {
            heartbeat.abort();
        }
        let mut batch = std::mem::replace(&mut state.current, EventBatch::new(limits));
        batch.seal();
        batch
    }
}
