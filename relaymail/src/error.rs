//! Typed errors for the mail transport.
//!
//! [`MailError`] separates failures by what the caller can do about them:
//! - `InvalidArgument` - fix the call, nothing was sent
//! - `Configuration` - fix host, port or credentials
//! - `MessageFailed` - the server refused this message, don't retry it as-is
//! - `TransportFailed` - the channel broke, retry with a fresh transport
//! - `TransportExhausted` - what `send` returns for any delivery failure

use std::{io, path::PathBuf};

use relaymail_smtp::ClientError;
use thiserror::Error;

/// Error returned by [`MailTransport`](crate::MailTransport) operations.
#[derive(Debug, Error)]
pub enum MailError {
    /// A precondition on the caller's input was violated. No I/O happened.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The session could not be established or authenticated.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The server rejected the sender or a recipient of this message.
    #[error("Message failed: {reason}")]
    MessageFailed { reason: String },

    /// The connection is unusable (dropped, timed out, protocol error).
    #[error("Transport failed: {0}")]
    TransportFailed(String),

    /// Delivery failed and the transport must not be reused.
    ///
    /// `cause` holds the specific failure when there was one; it is `None`
    /// when `send` was called on an already exhausted transport.
    #[error("Transport exhausted, a new transport is required")]
    TransportExhausted {
        #[source]
        cause: Option<Box<MailError>>,
    },
}

impl MailError {
    /// Wraps a delivery failure in [`MailError::TransportExhausted`].
    #[must_use]
    pub fn exhausted(cause: Self) -> Self {
        Self::TransportExhausted {
            cause: Some(Box::new(cause)),
        }
    }

    /// The failure behind a [`MailError::TransportExhausted`], if any.
    #[must_use]
    pub fn cause(&self) -> Option<&Self> {
        match self {
            Self::TransportExhausted { cause } => cause.as_deref(),
            _ => None,
        }
    }

    /// Returns `true` if the same message may succeed on a fresh transport.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::TransportFailed(_) => true,
            Self::TransportExhausted { cause: Some(cause) } => cause.is_retryable(),
            _ => false,
        }
    }

    /// Returns `true` if the server refused the message itself.
    #[must_use]
    pub fn is_message_failure(&self) -> bool {
        match self {
            Self::MessageFailed { .. } => true,
            Self::TransportExhausted { cause: Some(cause) } => cause.is_message_failure(),
            _ => false,
        }
    }
}

/// Wire-level errors outside of a classified step mean the channel is broken.
impl From<ClientError> for MailError {
    fn from(error: ClientError) -> Self {
        match error {
            ClientError::ConnectionClosed => {
                Self::TransportFailed("Server disconnected unexpectedly".to_string())
            }
            error => Self::TransportFailed(error.to_string()),
        }
    }
}

/// Errors raised while loading a [`TransportConfig`](crate::TransportConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration from {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] ron::error::SpannedError),

    #[error("Invalid configuration for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl From<ConfigError> for MailError {
    fn from(error: ConfigError) -> Self {
        Self::Configuration(error.to_string())
    }
}

/// Specialized `Result` type for transport operations.
pub type Result<T> = std::result::Result<T, MailError>;
