//! Per-step timeouts for the SMTP session.
//!
//! Every network step of a session is bounded. A step that runs out of time
//! fails like any other I/O error: during `connect` it is a configuration
//! failure, during delivery the transport is failed.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Client-side SMTP timeouts, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientTimeouts {
    /// Establishing the TCP connection and, for implicit TLS, the handshake.
    ///
    /// Default: 30 seconds
    #[serde(default = "defaults::connect_secs")]
    pub connect_secs: u64,

    /// Waiting for the server's 220 greeting.
    ///
    /// Default: 30 seconds
    #[serde(default = "defaults::greeting_secs")]
    pub greeting_secs: u64,

    /// EHLO/HELO, including the repeat after STARTTLS.
    ///
    /// Default: 30 seconds
    #[serde(default = "defaults::ehlo_secs")]
    pub ehlo_secs: u64,

    /// STARTTLS command and TLS handshake.
    ///
    /// Default: 30 seconds
    #[serde(default = "defaults::starttls_secs")]
    pub starttls_secs: u64,

    /// The whole AUTH exchange.
    ///
    /// Default: 30 seconds
    #[serde(default = "defaults::auth_secs")]
    pub auth_secs: u64,

    /// Default: 30 seconds
    #[serde(default = "defaults::mail_from_secs")]
    pub mail_from_secs: u64,

    /// Applies to each RCPT TO separately.
    ///
    /// Default: 30 seconds
    #[serde(default = "defaults::rcpt_to_secs")]
    pub rcpt_to_secs: u64,

    /// DATA command, and separately the message transfer.
    ///
    /// Default: 120 seconds (2 minutes)
    #[serde(default = "defaults::data_secs")]
    pub data_secs: u64,

    /// RSET after a refused sender or recipient.
    ///
    /// Default: 10 seconds
    #[serde(default = "defaults::rset_secs")]
    pub rset_secs: u64,

    /// Default: 10 seconds
    #[serde(default = "defaults::quit_secs")]
    pub quit_secs: u64,
}

impl Default for ClientTimeouts {
    fn default() -> Self {
        Self {
            connect_secs: defaults::connect_secs(),
            greeting_secs: defaults::greeting_secs(),
            ehlo_secs: defaults::ehlo_secs(),
            starttls_secs: defaults::starttls_secs(),
            auth_secs: defaults::auth_secs(),
            mail_from_secs: defaults::mail_from_secs(),
            rcpt_to_secs: defaults::rcpt_to_secs(),
            data_secs: defaults::data_secs(),
            rset_secs: defaults::rset_secs(),
            quit_secs: defaults::quit_secs(),
        }
    }
}

impl ClientTimeouts {
    /// Sets every step to the same limit.
    #[must_use]
    pub const fn uniform(secs: u64) -> Self {
        Self {
            connect_secs: secs,
            greeting_secs: secs,
            ehlo_secs: secs,
            starttls_secs: secs,
            auth_secs: secs,
            mail_from_secs: secs,
            rcpt_to_secs: secs,
            data_secs: secs,
            rset_secs: secs,
            quit_secs: secs,
        }
    }

    #[must_use]
    pub const fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    #[must_use]
    pub const fn greeting(&self) -> Duration {
        Duration::from_secs(self.greeting_secs)
    }

    #[must_use]
    pub const fn ehlo(&self) -> Duration {
        Duration::from_secs(self.ehlo_secs)
    }

    #[must_use]
    pub const fn starttls(&self) -> Duration {
        Duration::from_secs(self.starttls_secs)
    }

    #[must_use]
    pub const fn auth(&self) -> Duration {
        Duration::from_secs(self.auth_secs)
    }

    #[must_use]
    pub const fn mail_from(&self) -> Duration {
        Duration::from_secs(self.mail_from_secs)
    }

    #[must_use]
    pub const fn rcpt_to(&self) -> Duration {
        Duration::from_secs(self.rcpt_to_secs)
    }

    #[must_use]
    pub const fn data(&self) -> Duration {
        Duration::from_secs(self.data_secs)
    }

    #[must_use]
    pub const fn rset(&self) -> Duration {
        Duration::from_secs(self.rset_secs)
    }

    #[must_use]
    pub const fn quit(&self) -> Duration {
        Duration::from_secs(self.quit_secs)
    }
}

mod defaults {
    pub const fn connect_secs() -> u64 {
        30
    }
    pub const fn greeting_secs() -> u64 {
        30
    }
    pub const fn ehlo_secs() -> u64 {
        30
    }
    pub const fn starttls_secs() -> u64 {
        30
    }
    pub const fn auth_secs() -> u64 {
        30
    }
    pub const fn mail_from_secs() -> u64 {
        30
    }
    pub const fn rcpt_to_secs() -> u64 {
        30
    }
    pub const fn data_secs() -> u64 {
        120 // 2 minutes
    }
    pub const fn rset_secs() -> u64 {
        10
    }
    pub const fn quit_secs() -> u64 {
        10
    }
}
