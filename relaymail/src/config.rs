//! Transport configuration.
//!
//! A [`TransportConfig`] is built in code or loaded from a RON document:
//!
//! ```ron
//! (
//!     host: "smtp.example.com",
//!     port: 465,
//!     username: "mailer",
//!     password: "hunter2",
//!     from_address: "noreply@example.com",
//!     tls: implicit,
//!     timeouts: (data_secs: 60),
//! )
//! ```

use std::path::Path;

use secrecy::SecretString;
use serde::Deserialize;

use crate::{error::ConfigError, timeouts::ClientTimeouts};

/// How the connection to the server is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TlsMode {
    /// TLS from the first byte (SMTPS, usually port 465).
    #[default]
    Implicit,

    /// Plain connection upgraded with STARTTLS before authenticating.
    /// Fails if the server does not offer STARTTLS.
    StartTls,

    /// No encryption.
    ///
    /// **WARNING**: credentials are sent in the clear. Only for local relays
    /// and tests.
    None,
}

/// Connection and identity settings for a [`MailTransport`](crate::MailTransport).
#[derive(Debug, Deserialize)]
pub struct TransportConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    /// Never logged; `Debug` prints it redacted.
    pub password: SecretString,
    /// Envelope sender and `From` header.
    pub from_address: String,

    #[serde(default)]
    pub tls: TlsMode,

    /// **SECURITY WARNING**: disables certificate validation.
    ///
    /// Default: `false`
    #[serde(default)]
    pub accept_invalid_certs: bool,

    /// Name announced in EHLO/HELO.
    ///
    /// Default: `localhost`
    #[serde(default = "default_helo_name")]
    pub helo_name: String,

    #[serde(default)]
    pub timeouts: ClientTimeouts,
}

fn default_helo_name() -> String {
    "localhost".to_string()
}

impl TransportConfig {
    /// A configuration using implicit TLS and default timeouts.
    #[must_use]
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
        from_address: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            password: SecretString::new(password.into()),
            from_address: from_address.into(),
            tls: TlsMode::default(),
            accept_invalid_certs: false,
            helo_name: default_helo_name(),
            timeouts: ClientTimeouts::default(),
        }
    }

    #[must_use]
    pub const fn with_tls(mut self, tls: TlsMode) -> Self {
        self.tls = tls;
        self
    }

    #[must_use]
    pub const fn with_accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    #[must_use]
    pub fn with_helo_name(mut self, helo_name: impl Into<String>) -> Self {
        self.helo_name = helo_name.into();
        self
    }

    #[must_use]
    pub const fn with_timeouts(mut self, timeouts: ClientTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Parses and validates a RON document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed input and
    /// [`ConfigError::Invalid`] when a value fails validation.
    pub fn from_ron_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = ron::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a RON file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, otherwise as
    /// [`TransportConfig::from_ron_str`].
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_ron_str(&input)
    }

    /// Checks the values a session cannot work without.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "host",
                reason: "must not be empty".to_string(),
            });
        }
        if self.port == 0 {
            return Err(ConfigError::Invalid {
                field: "port",
                reason: "must not be 0".to_string(),
            });
        }
        if !self.from_address.contains('@') {
            return Err(ConfigError::Invalid {
                field: "from_address",
                reason: format!("'{}' is not an email address", self.from_address),
            });
        }
        Ok(())
    }

    /// `host:port`, as passed to the socket layer.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
