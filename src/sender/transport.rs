use crate::domain::ShipperError;
use bytes::Bytes;
use futures::future::BoxFuture;
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Request timeout: {0}")]
    RequestTimeout(String),
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),
    #[error("Invalid header value: {0}")]
    InvalidHeaderValue(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("IO error while encoding request: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<TransportError> for ShipperError {
    fn from(error: TransportError) -> Self {
        ShipperError::TransportFailure(error.to_string())
    }
}

/// Which collector path a request goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// JSON envelopes, one per event.
    Events,
    /// Newline separated raw messages.
    Raw,
    /// `{"acks":[...]}` status query.
    AckPoll,
}

#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub kind: RequestKind,
    pub body: Bytes,
}

impl OutboundRequest {
    pub fn new(kind: RequestKind, body: impl Into<Bytes>) -> Self {
        Self {
            kind,
            body: body.into(),
        }
    }
}

/// Status and body of a completed HTTP exchange, whatever the status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: u16,
    pub body: String,
}

#[derive(Deserialize)]
struct StatusBody {
    text: Option<String>,
    code: Option<i64>,
}

impl Reply {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == 200
    }

    /// Classifies the reply: a non-200 status, or a 200 whose body carries a
    /// non-zero application code, is a server rejection.
    pub fn check(&self) -> Result<(), ShipperError> {
        let parsed = serde_json::from_str::<StatusBody>(&self.body).ok();
        let (code, text) = parsed.map_or((None, None), |b| (b.code, b.text));

        if self.status != 200 || code.is_some_and(|c| c != 0) {
            return Err(ShipperError::ServerRejection {
                status: self.status,
                code,
                text,
            });
        }
        Ok(())
    }
}

/// Performs the network exchange for an already serialized payload.
///
/// Any HTTP status is a successful exchange (`Ok(Reply)`); only failures to
/// complete the exchange are errors.
pub trait Transport: Send + Sync {
    fn post<'a>(&'a self, request: OutboundRequest) -> BoxFuture<'a, Result<Reply, TransportError>>;

    /// Stops admitting new requests. Requests already on the wire finish.
    fn shutdown(&self) {}
}
