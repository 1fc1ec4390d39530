//! Error types shared by the producer and forwarder halves
//!
//! Transport failures (`SendError`) and malformed inbound data (`ShapeError`)
//! are recovered from locally and turned into log lines, metrics and
//! outcomes. `ConnectError` aborts the driver start sequence, and
//! `ForwardError` is the only error `forward` hands back to its caller.

use thiserror::Error;

/// Failure to establish the upstream sink connection
#[derive(Debug, Error)]
pub enum ConnectError {
    /// Endpoint could not be parsed or uses an unsupported scheme
    #[error("invalid sink endpoint '{endpoint}': {message}")]
    InvalidEndpoint { endpoint: String, message: String },

    /// Underlying client could not be constructed
    #[error("failed to build sink client: {0}")]
    Client(String),

    /// Sink refused or could not accept the connection
    #[error("sink unavailable: {0}")]
    Unavailable(String),
}

impl ConnectError {
    pub fn invalid_endpoint(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidEndpoint {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }
}

/// Failure to deliver a single payload
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    /// Network or I/O level failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Sink answered but refused the payload
    #[error("sink rejected payload with status {status}: {message}")]
    Rejected { status: u16, message: String },

    /// Payload could not be encoded to the wire format
    #[error("failed to encode payload: {0}")]
    Encode(String),

    /// Connection was closed before the payload could be handed over
    #[error("sink connection closed")]
    Closed,
}

impl SendError {
    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for SendError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => Self::rejected(status.as_u16(), err.to_string()),
            None => Self::Transport(err.to_string()),
        }
    }
}

/// Inbound batch does not have the expected record shape
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShapeError {
    #[error("batch is not a JSON array")]
    NotAnArray,

    #[error("batch is empty")]
    Empty,

    #[error("element {index} is not a JSON object")]
    NotAnObject { index: usize },

    #[error("element {index} is missing field '{field}'")]
    MissingField { index: usize, field: &'static str },

    /// Raw payload could not be parsed as JSON at all
    #[error("payload is not valid JSON: {0}")]
    Malformed(String),
}

/// Unexpected fault while forwarding, surfaced to the caller of `forward`
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("unexpected defect while forwarding element {index}: {message}")]
    Defect { index: usize, message: String },
}

/// Errors raised by the producer driver lifecycle
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("failed to connect to sink: {0}")]
    Connect(#[from] ConnectError),

    #[error("driver loop terminated abnormally: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_error_display() {
        let err = SendError::rejected(503, "busy");
        assert_eq!(
            err.to_string(),
            "sink rejected payload with status 503: busy"
        );
        assert_eq!(SendError::Closed.to_string(), "sink connection closed");
    }

    #[test]
    fn test_shape_error_display() {
        let err = ShapeError::MissingField {
            index: 0,
            field: "epoch",
        };
        assert_eq!(err.to_string(), "element 0 is missing field 'epoch'");
    }

    #[test]
    fn test_driver_error_from_connect() {
        let err: DriverError = ConnectError::Unavailable("refused".to_string()).into();
        assert!(matches!(err, DriverError::Connect(_)));
        assert!(err.to_string().contains("refused"));
    }
}
