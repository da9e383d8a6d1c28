//! Typed error handling for the notifier
//!
//! Every failure class the notifier can hit has its own enum so that callers
//! can decide locally whether to recover (log and skip) or escalate.
//!
//! # Error Categories
//!
//! - [`IngestError`]: a stream message could not be turned into an event
//! - [`IdentityError`]: a connection attempt carried no usable identity
//! - [`SourceError`]: the upstream event stream failed
//! - [`ConfigError`]: configuration could not be loaded or parsed
//! - [`NotifierError`]: umbrella type for startup and orchestration
//!
//! Only [`ConfigError`] and startup-time [`SourceError`]s are fatal. All
//! other errors are logged where they happen and processing continues.

use thiserror::Error;

/// WebSocket close code sent when no identity could be established
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;

/// WebSocket close code sent when the notifier is shutting down
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// WebSocket close code sent when a bearer token has expired
pub const CLOSE_TOKEN_EXPIRED: u16 = 4001;

/// WebSocket close code sent when a bearer token fails verification
pub const CLOSE_TOKEN_INVALID: u16 = 4002;

/// Errors raised while turning a raw stream message into an [`InboundEvent`]
///
/// [`InboundEvent`]: crate::core::events::InboundEvent
#[derive(Debug, Error)]
pub enum IngestError {
    /// The message body is not valid JSON (or not valid UTF-8)
    #[error("malformed stream message: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The message is valid JSON but not an object
    #[error("stream message is not a JSON object")]
    NotAnObject,

    /// A routing field is missing, empty, or has the wrong type
    #[error("stream message missing required field '{0}'")]
    MissingField(&'static str),

    /// The record carried no payload at all
    #[error("stream record has no payload")]
    EmptyRecord,
}

/// Errors raised while establishing the identity of a connecting client
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    /// No extractor could find an identity in the request
    #[error("no user identity could be established")]
    Missing,

    /// A bearer token was present but did not verify
    #[error("invalid token: {0}")]
    InvalidToken(String),

    /// A bearer token was present but has expired
    #[error("token expired")]
    ExpiredToken,

    /// The gateway no longer accepts connections
    #[error("notifier is shutting down")]
    ShuttingDown,
}

impl IdentityError {
    /// Close code sent to the client when the connection is rejected
    pub fn close_code(&self) -> u16 {
        match self {
            IdentityError::Missing => CLOSE_POLICY_VIOLATION,
            IdentityError::InvalidToken(_) => CLOSE_TOKEN_INVALID,
            IdentityError::ExpiredToken => CLOSE_TOKEN_EXPIRED,
            IdentityError::ShuttingDown => CLOSE_GOING_AWAY,
        }
    }

    /// Short, client-safe close reason
    pub fn close_reason(&self) -> &'static str {
        match self {
            IdentityError::Missing => "Missing user identity",
            IdentityError::InvalidToken(_) => "Token invalid",
            IdentityError::ExpiredToken => "Token expired",
            IdentityError::ShuttingDown => "Server shutting down",
        }
    }
}

/// Errors raised by an [`EventSource`](crate::ingest::EventSource)
#[derive(Debug, Error)]
pub enum SourceError {
    /// The source could not be created or subscribed at startup
    #[error("failed to start event source: {0}")]
    Startup(String),

    /// A transient transport failure while receiving
    #[error("event source transport error: {0}")]
    Transport(String),
}

/// Errors raised while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A setting held a value of the wrong shape
    #[error("invalid value '{value}' for {key}: expected {expected}")]
    InvalidValue {
        key: &'static str,
        value: String,
        expected: &'static str,
    },

    /// A config file could not be read
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// A config layer could not be parsed or extracted
    #[error("failed to load configuration: {0}")]
    Load(Box<figment::Error>),
}

/// Top-level error for startup and orchestration
#[derive(Debug, Error)]
pub enum NotifierError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Source(#[from] SourceError),

    /// Binding or serving the listener failed
    #[error("server error: {0}")]
    Server(#[from] std::io::Error),

    /// The ingestor stopped before shutdown was requested
    #[error("event ingestor stopped unexpectedly: {0}")]
    IngestorStopped(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_error_close_codes() {
        assert_eq!(IdentityError::Missing.close_code(), 1008);
        assert_eq!(IdentityError::ExpiredToken.close_code(), 4001);
        assert_eq!(
            IdentityError::InvalidToken("bad signature".into()).close_code(),
            4002
        );
        assert_eq!(IdentityError::ShuttingDown.close_code(), 1001);
    }

    #[test]
    fn test_close_reason_does_not_leak_token_details() {
        let err = IdentityError::InvalidToken("InvalidSignature".into());
        assert_eq!(err.close_reason(), "Token invalid");
        assert!(err.to_string().contains("InvalidSignature"));
    }

    #[test]
    fn test_ingest_error_from_serde() {
        let parse: Result<serde_json::Value, _> = serde_json::from_str("{not json");
        let err: IngestError = parse.unwrap_err().into();
        assert!(matches!(err, IngestError::Malformed(_)));
        assert!(err.to_string().starts_with("malformed stream message"));
    }

    #[test]
    fn test_config_error_message() {
        let err = ConfigError::InvalidValue {
            key: "WS_PORT",
            value: "eighty".into(),
            expected: "a port number",
        };
        assert_eq!(
            err.to_string(),
            "invalid value 'eighty' for WS_PORT: expected a port number"
        );
    }
}
