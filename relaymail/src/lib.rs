//! Send a multipart (plain text + HTML) email through an authenticated SMTP
//! session.
//!
//! [`MailTransport::open`] connects and authenticates, [`MailTransport::send`]
//! delivers one message per call. Failures are reported as [`MailError`];
//! any delivery failure exhausts the transport, and a new one has to be
//! opened for the next attempt.

mod config;
mod error;
pub mod logging;
mod message;
mod timeouts;
mod transport;

pub use config::{TlsMode, TransportConfig};
pub use error::{ConfigError, MailError, Result};
pub use message::{OutboundMessage, RecipientSet};
pub use relaymail_smtp as smtp;
pub use secrecy::SecretString;
pub use timeouts::ClientTimeouts;
pub use transport::MailTransport;
