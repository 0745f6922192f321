use thiserror::Error;

/// Failure reported for a batch that could not be delivered or confirmed.
///
/// This is what the process-wide error callback receives. Producers never see
/// it synchronously from `send`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ShipperError {
    /// Connection refused, timeout, TLS failure. Retryable.
    #[error("Transport failure: {0}")]
    TransportFailure(String),

    /// The collector answered but refused the request.
    #[error("Server rejected request: HTTP {status}{}", describe_rejection(.code, .text))]
    ServerRejection {
        status: u16,
        code: Option<i64>,
        text: Option<String>,
    },

    /// The acknowledgement bookkeeping no longer agrees with the collector.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Serialization failed: {0}")]
    Serialization(String),

    #[error("Sender is closed")]
    Closed,
}

impl ShipperError {
    /// Only transport-level failures are worth resending; a clean HTTP error
    /// means the collector already processed and refused the batch.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ShipperError::TransportFailure(_))
    }

    pub fn server_code(&self) -> Option<i64> {
        match self {
            ShipperError::ServerRejection { code, .. } => *code,
            _ => None,
        }
    }
}

fn describe_rejection(code: &Option<i64>, text: &Option<String>) -> String {
    match (*code, text.as_deref()) {
        (Some(code), Some(text)) => format!(" (code {code}: {text})"),
        (Some(code), None) => match ServerErrorCode::from_code(code) {
            Some(known) => format!(" (code {code}: {})", known.description()),
            None => format!(" (code {code})"),
        },
        (None, Some(text)) => format!(" ({text})"),
        (None, None) => String::new(),
    }
}

/// Application-level status codes carried in collector reply bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerErrorCode {
    Success,
    TokenDisabled,
    TokenRequired,
    InvalidAuthorization,
    InvalidToken,
    NoData,
    InvalidDataFormat,
    IncorrectIndex,
    InternalServerError,
    ServerBusy,
    ChannelMissing,
    InvalidChannel,
    EventFieldRequired,
    EventFieldBlank,
    AckDisabled,
}

impl ServerErrorCode {
    pub fn from_code(code: i64) -> Option<Self> {
        let known = match code {
            0 => ServerErrorCode::Success,
            1 => ServerErrorCode::TokenDisabled,
            2 => ServerErrorCode::TokenRequired,
            3 => ServerErrorCode::InvalidAuthorization,
            4 => ServerErrorCode::InvalidToken,
            5 => ServerErrorCode::NoData,
            6 => ServerErrorCode::InvalidDataFormat,
            7 => ServerErrorCode::IncorrectIndex,
            8 => ServerErrorCode::InternalServerError,
            9 => ServerErrorCode::ServerBusy,
            10 => ServerErrorCode::ChannelMissing,
            11 => ServerErrorCode::InvalidChannel,
            12 => ServerErrorCode::EventFieldRequired,
            13 => ServerErrorCode::EventFieldBlank,
            14 => ServerErrorCode::AckDisabled,
            _ => return None,
        };
        Some(known)
    }

    pub fn description(&self) -> &'static str {
        match self {
            ServerErrorCode::Success => "Success",
            ServerErrorCode::TokenDisabled => "Token disabled",
            ServerErrorCode::TokenRequired => "Token is required",
            ServerErrorCode::InvalidAuthorization => "Invalid authorization",
            ServerErrorCode::InvalidToken => "Invalid token",
            ServerErrorCode::NoData => "No data",
            ServerErrorCode::InvalidDataFormat => "Invalid data format",
            ServerErrorCode::IncorrectIndex => "Incorrect index",
            ServerErrorCode::InternalServerError => "Internal server error",
            ServerErrorCode::ServerBusy => "Server is busy",
            ServerErrorCode::ChannelMissing => "Data channel is missing",
            ServerErrorCode::InvalidChannel => "Invalid data channel",
            ServerErrorCode::EventFieldRequired => "Event field is required",
            ServerErrorCode::EventFieldBlank => "Event field cannot be blank",
            ServerErrorCode::AckDisabled => "ACK is disabled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transport_failures_are_retryable() {
        assert!(ShipperError::TransportFailure("refused".to_string()).is_retryable());
        assert!(
            !ShipperError::ServerRejection {
                status: 503,
                code: Some(9),
                text: None
            }
            .is_retryable()
        );
        assert!(!ShipperError::ProtocolViolation("mismatch".to_string()).is_retryable());
    }

    #[test]
    fn test_rejection_message_uses_known_code_description() {
        let error = ShipperError::ServerRejection {
            status: 403,
            code: Some(4),
            text: None,
        };
        assert_eq!(
            error.to_string(),
            "Server rejected request: HTTP 403 (code 4: Invalid token)"
        );
        assert_eq!(error.server_code(), Some(4));
    }

    #[test]
    fn test_unknown_codes_are_not_mapped() {
        assert_eq!(ServerErrorCode::from_code(99), None);
        assert_eq!(ServerErrorCode::from_code(14), Some(ServerErrorCode::AckDisabled));
    }
}
