use crate::domain::ShipperError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AckError {
    #[error("Malformed ack poll reply: {0}")]
    MalformedReply(String),
    #[error(
        "Integrity violation: ackId {reported} reported for batch {batch_id} recorded as {recorded:?}"
    )]
    IntegrityViolation {
        reported: u64,
        recorded: Option<u64>,
        batch_id: Uuid,
    },
    #[error("Ack poll scheduler already started")]
    SchedulerAlreadyStarted,
    #[error("Ack tracking halted after an earlier violation: {0}")]
    Poisoned(String),
    #[error("Ack poll failed: {0}")]
    PollFailed(ShipperError),
}

impl AckError {
    /// Violations that make further tracking unsafe.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AckError::MalformedReply(_) | AckError::IntegrityViolation { .. }
        )
    }
}

impl From<AckError> for ShipperError {
    fn from(error: AckError) -> Self {
        match error {
            AckError::PollFailed(inner) => inner,
            other => ShipperError::ProtocolViolation(other.to_string()),
        }
    }
}

/// Body of a successful event POST: `{"text":"Success","code":0,"ackId":7}`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PostReply {
    #[serde(rename = "ackId")]
    pub ack_id: Option<u64>,
}

impl PostReply {
    pub fn parse(body: &str) -> Result<Self, serde_json::Error> {
        if body.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(body)
    }
}

/// `{"acks":[1,2,3]}`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AckPollRequest {
    pub acks: Vec<u64>,
}

impl AckPollRequest {
    pub fn new(acks: Vec<u64>) -> Self {
        Self { acks }
    }

    pub fn to_body(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// `{"acks":{"1":true,"2":false}}`, keyed by ack id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AckPollReply {
    acks: BTreeMap<u64, bool>,
}

#[derive(Deserialize)]
struct RawPollReply {
    acks: BTreeMap<String, bool>,
}

impl AckPollReply {
    pub fn parse(body: &str) -> Result<Self, AckError> {
        let raw: RawPollReply =
            serde_json::from_str(body).map_err(|e| AckError::MalformedReply(e.to_string()))?;

        let acks = raw
            .acks
            .into_iter()
            .map(|(key, done)| {
                key.trim()
                    .parse::<u64>()
                    .map(|id| (id, done))
                    .map_err(|_| AckError::MalformedReply(format!("non-numeric ackId {key:?}")))
            })
            .collect::<Result<_, _>>()?;

        Ok(Self { acks })
    }

    pub fn from_pairs(pairs: impl IntoIterator<Item = (u64, bool)>) -> Self {
        Self {
            acks: pairs.into_iter().collect(),
        }
    }

    /// Ids the collector reports as indexed, in ascending order.
    pub fn acknowledged(&self) -> impl Iterator<Item = u64> + '_ {
        self.acks
            .iter()
            .filter_map(|(id, done)| done.then_some(*id))
    }

    pub fn len(&self) -> usize {
        self.acks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.acks.is_empty()
    }
}
