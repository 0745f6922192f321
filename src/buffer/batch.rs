use super::BufferError;
use crate::domain::EventRecord;
use std::sync::OnceLock;
use std::time::Instant;
use uuid::Uuid;

/// Count and byte limits that make a batch flushable.
///
/// A zero limit means "unset" and is treated as unbounded. When both are
/// unset every event is shipped on its own, so some real limit always governs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    max_count: usize,
    max_bytes: usize,
}

impl BatchLimits {
    pub fn new(max_count: usize, max_bytes: usize) -> Self {
        match (max_count, max_bytes) {
            (0, 0) => Self {
                max_count: 1,
                max_bytes: usize::MAX,
            },
            (0, bytes) => Self {
                max_count: usize::MAX,
                max_bytes: bytes,
            },
            (count, 0) => Self {
                max_count: count,
                max_bytes: usize::MAX,
            },
            (count, bytes) => Self {
                max_count: count,
                max_bytes: bytes,
            },
        }
    }

    pub fn max_count(&self) -> usize {
        self.max_count
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self::new(10, 10 * 1024)
    }
}

/// An ordered group of events sent as one request.
///
/// Each event is serialized when it is added, so the running size is the
/// exact wire size and the payload needs no second pass at send time.
#[derive(Debug)]
pub struct EventBatch {
    id: Uuid,
    events: Vec<EventRecord>,
    payload: String,
    limits: BatchLimits,
    created_at: Instant,
    sealed: bool,
    ack_id: OnceLock<u64>,
}

impl EventBatch {
    pub fn new(limits: BatchLimits) -> Self {
        Self {
            id: Uuid::new_v4(),
            events: Vec::new(),
            payload: String::new(),
            limits,
            created_at: Instant::now(),
            sealed: false,
            ack_id: OnceLock::new(),
        }
    }

    pub fn add(&mut self, event: EventRecord, serialized: &str) -> Result<(), BufferError> {
        if self.sealed {
            return Err(BufferError::Sealed {
                batch_id: self.id.to_string(),
            });
        }

        self.payload.push_str(serialized);
        self.events.push(event);
        Ok(())
    }

    pub fn is_flushable(&self) -> bool {
        self.events.len() >= self.limits.max_count || self.payload.len() > self.limits.max_bytes
    }

    /// Marks the start of a flush; no event can be added afterwards.
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[EventRecord] {
        &self.events
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn estimated_size(&self) -> usize {
        self.payload.len()
    }

    pub fn limits(&self) -> BatchLimits {
        self.limits
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn ack_id(&self) -> Option<u64> {
        self.ack_id.get().copied()
    }

    /// Records the collector-issued acknowledgement id. A batch gets at most
    /// one; a conflicting second assignment returns the id already recorded.
    pub fn assign_ack_id(&self, ack_id: u64) -> Result<(), u64> {
        match self.ack_id.set(ack_id) {
            Ok(()) => Ok(()),
            Err(_) => match self.ack_id() {
                Some(existing) if existing == ack_id => Ok(()),
                Some(existing) => Err(existing),
                None => Ok(()),
            },
        }
    }
}
