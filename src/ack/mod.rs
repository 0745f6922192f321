//! Indexer acknowledgement: learning ack ids from POST replies, tracking
//! them in the [`AckWindow`] and polling the collector until they are
//! confirmed.

pub mod manager;
pub mod middleware;
pub mod protocol;
pub mod scheduler;
pub mod window;

pub use manager::AckManager;
pub use middleware::AckMiddleware;
pub use protocol::{AckError, AckPollReply, AckPollRequest, PostReply};
pub use scheduler::AckPollScheduler;
pub use window::AckWindow;
