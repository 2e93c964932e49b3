//! Error taxonomy for the risk analytics service
//!
//! Layered thiserror enums: parse failures keep the offending field
//! and value, transport and store failures carry the underlying
//! driver message as text so the taxonomy stays driver-agnostic.

use thiserror::Error;

/// Top-level service error
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalyticsError {
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("consumer error: {0}")]
    Consumer(#[from] ConsumerError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Failures turning a stream message into a typed order.
///
/// Any of these fails the whole analysis before scoring runs; the
/// message is left unacknowledged for redelivery.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("invalid number in field {field}: {value:?}")]
    InvalidNumber { field: &'static str, value: String },

    #[error("invalid timestamp: {value:?}")]
    InvalidTimestamp { value: String },

    #[error("invalid order side: {value:?}")]
    InvalidSide { value: String },

    #[error("invalid order type: {value:?}")]
    InvalidOrderType { value: String },

    #[error("malformed order payload: {0}")]
    InvalidPayload(String),
}

/// Stream-transport failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConsumerError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("consumer group setup failed: {0}")]
    GroupSetup(String),

    #[error("poll failed: {0}")]
    Poll(String),

    #[error("acknowledgment failed for message {message_id}: {reason}")]
    Ack { message_id: String, reason: String },
}

/// Result-store failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("write failed for key {key}: {reason}")]
    Write { key: String, reason: String },

    #[error("read failed for key {key}: {reason}")]
    Read { key: String, reason: String },

    #[error("stored record at {key} is corrupt: {reason}")]
    Corrupt { key: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_display() {
        let err = ParseError::MissingField { field: "price" };
        assert_eq!(err.to_string(), "missing required field: price");
    }

    #[test]
    fn test_analytics_error_from_parse_error() {
        let parse_err = ParseError::InvalidTimestamp {
            value: "noon".to_string(),
        };
        let err: AnalyticsError = parse_err.into();
        assert!(matches!(err, AnalyticsError::Parse(_)));
    }

    #[test]
    fn test_consumer_error_display_includes_message_id() {
        let err = ConsumerError::Ack {
            message_id: "1-0".to_string(),
            reason: "connection reset".to_string(),
        };
        assert!(err.to_string().contains("1-0"));
    }
}
