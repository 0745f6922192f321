pub mod accumulator;
pub mod batch;
pub mod error;

pub use accumulator::{AddOutcome, BatchAccumulator};
pub use batch::{BatchLimits, EventBatch};
pub use error::BufferError;
