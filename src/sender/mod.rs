//! Delivery side of the shipper: serialization, the transport, the
//! middleware chain and the two sender flavors built on top of them.

pub mod async_sender;
pub mod builder;
mod dispatch;
pub mod http;
pub mod middleware;
pub mod serialization;
pub mod stats;
pub mod sync_sender;
pub mod transport;

pub use async_sender::AsyncSender;
pub use builder::{BuildError, SenderBuilder};
pub use dispatch::DeliveryCallback;
pub use http::{CHANNEL_HEADER, ConnectionStats, HttpTransport, TransportConfig};
pub use middleware::{BatchPoster, ChainResult, Middleware, MiddlewareChain, Next};
pub use serialization::{
    EventBodySerializer, EventMetadata, EventSerializer, JsonEventSerializer,
    MessageBodySerializer, RawEventSerializer, SerializationError, StructuredBodySerializer,
    body_serializer_by_name,
};
pub use stats::{SenderStats, SenderStatsSnapshot};
pub use sync_sender::SyncSender;
pub use transport::{OutboundRequest, Reply, RequestKind, Transport, TransportError};
