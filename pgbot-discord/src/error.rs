//! Discord transport error types.

use pgbot_core::TransportError;
use thiserror::Error;

/// Errors that can occur while talking to the Discord REST API.
#[derive(Debug, Error)]
pub enum DiscordError {
    /// HTTP request could not be built or sent.
    #[error("Discord request failed: {0}")]
    RequestFailed(String),

    /// Discord answered with a non-success status.
    #[error("Discord returned HTTP {status}: {body}")]
    Http {
        /// Status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },

    /// Response body was not the JSON we expected.
    #[error("Failed to parse Discord response: {0}")]
    ParseError(String),

    /// Request timed out.
    #[error("Discord request timed out after {0}ms")]
    Timeout(u64),

    /// The API could not be reached.
    #[error("Discord API unavailable: {0}")]
    Unavailable(String),

    /// Configuration error (missing token, bad base URL, ...).
    #[error("Discord configuration error: {0}")]
    ConfigError(String),
}

impl From<reqwest::Error> for DiscordError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DiscordError::Timeout(0)
        } else if err.is_connect() {
            DiscordError::Unavailable(err.to_string())
        } else if err.is_decode() {
            DiscordError::ParseError(err.to_string())
        } else {
            DiscordError::RequestFailed(err.to_string())
        }
    }
}

impl From<DiscordError> for TransportError {
    fn from(err: DiscordError) -> Self {
        match err {
            DiscordError::Http { status: 404, body } => TransportError::NotFound(body),
            DiscordError::Http {
                status: 401 | 403,
                body,
            } => TransportError::Forbidden(body),
            DiscordError::Http { status, body } => TransportError::Status { code: status, body },
            DiscordError::Timeout(ms) => TransportError::Timeout(ms),
            DiscordError::Unavailable(msg) | DiscordError::RequestFailed(msg) => {
                TransportError::Unavailable(msg)
            }
            DiscordError::ParseError(msg) | DiscordError::ConfigError(msg) => {
                TransportError::Status { code: 0, body: msg }
            }
        }
    }
}
