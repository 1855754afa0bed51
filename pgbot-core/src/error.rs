//! Error types for the pgbot core library.

use thiserror::Error;

/// Top-level error type for all core operations.
#[derive(Error, Debug)]
pub enum PgError {
    /// SQLite persistence error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A document could not be encoded or decoded.
    #[error("Serialization error on document '{key}': {reason}")]
    Serialization {
        /// Document key being read or written.
        key: String,
        /// Underlying serde message.
        reason: String,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An emotion name outside the fixed emotion table.
    #[error("Unknown emotion: {0}")]
    UnknownEmotion(String),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures reported by a [`ChatTransport`](crate::transport::ChatTransport).
///
/// These never escape the reminder engine or the moderation escalator; they
/// are logged and trigger the next fallback.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The channel, message or user does not exist (or is no longer visible).
    #[error("not found: {0}")]
    NotFound(String),

    /// The bot lacks permission for the operation.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The platform answered with an unexpected status.
    #[error("HTTP {code}: {body}")]
    Status {
        /// HTTP status code.
        code: u16,
        /// Truncated response body.
        body: String,
    },

    /// The request exceeded the transport's own timeout.
    #[error("request timed out after {0}ms")]
    Timeout(u64),

    /// The platform could not be reached.
    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

/// Convenience Result type alias.
pub type Result<T> = std::result::Result<T, PgError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_failing_document() {
        let err = PgError::Serialization {
            key: "reminders".into(),
            reason: "expected a map".into(),
        };
        assert_eq!(err.to_string(), "Serialization error on document 'reminders': expected a map");
    }

    #[test]
    fn io_errors_convert() {
        let err: PgError = std::io::Error::other("disk full").into();
        assert!(matches!(err, PgError::Io(_)));
        assert_eq!(
            TransportError::Status { code: 502, body: "bad gateway".into() }.to_string(),
            "HTTP 502: bad gateway"
        );
    }
}
