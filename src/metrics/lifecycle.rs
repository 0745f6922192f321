use crate::buffer::EventBatch;
use crate::domain::ShipperError;
use crate::sender::Reply;

/// A transition in the life of a batch or of an acknowledgement poll.
#[derive(Debug)]
pub enum LifecycleEvent<'a> {
    /// The batch is about to be posted.
    PreEventPost { batch: &'a EventBatch },
    /// The POST completed with HTTP 200.
    EventPostOk { batch: &'a EventBatch, reply: &'a Reply },
    /// The POST completed with any other status.
    EventPostNotOk { batch: &'a EventBatch, reply: &'a Reply },
    /// The POST could not be completed.
    EventPostFailed {
        batch: &'a EventBatch,
        error: &'a ShipperError,
    },
    /// The collector issued an acknowledgement id for the batch.
    AckIdAssigned { batch: &'a EventBatch, ack_id: u64 },
    /// A poll for these ids is about to be sent.
    PreAckPoll { ack_ids: &'a [u64] },
    /// The poll completed with HTTP 200 and a well-formed body.
    AckPollOk { reply: &'a Reply },
    /// The poll completed with any other status.
    AckPollNotOk { reply: &'a Reply },
    /// The poll could not be completed or its reply was malformed.
    AckPollFailed { error: &'a ShipperError },
    /// The collector confirmed the batch as indexed.
    Acknowledged { batch: &'a EventBatch, ack_id: u64 },
    /// Tracking of the batch was abandoned without confirmation.
    AckAbandoned {
        batch: &'a EventBatch,
        ack_id: u64,
        error: &'a ShipperError,
    },
}

pub trait LifecycleObserver: Send + Sync {
    fn observe(&self, event: &LifecycleEvent<'_>);
}

/// Observer that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl LifecycleObserver for NoopObserver {
    fn observe(&self, _event: &LifecycleEvent<'_>) {}
}
