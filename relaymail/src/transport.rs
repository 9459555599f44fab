//! The mail transport: one authenticated SMTP session and the delivery of
//! messages over it.
//!
//! A transport is either disconnected or holds a fully authenticated
//! [`Session`]; there is no observable half-open state. Delivery failures
//! are classified internally and surfaced from [`MailTransport::send`] as
//! [`MailError::TransportExhausted`], after which the transport refuses
//! further use.

use std::{future::Future, io, time::Duration};

use relaymail_smtp::{Capabilities, ClientError, MessageBuilder, Response, SmtpClient};
use secrecy::ExposeSecret;

use crate::{
    config::{TlsMode, TransportConfig},
    error::{MailError, Result},
    message::{OutboundMessage, RecipientSet},
};

/// Bounds a client step, reporting expiry as a `TimedOut` I/O error.
async fn within<T>(
    limit: Duration,
    step: &str,
    fut: impl Future<Output = relaymail_smtp::Result<T>>,
) -> relaymail_smtp::Result<T> {
    tokio::time::timeout(limit, fut).await.map_err(|_| {
        ClientError::Io(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("{step} timed out after {limit:?}"),
        ))
    })?
}

/// Maps a rejected MAIL FROM or RCPT TO reply.
///
/// A 421 means the server is closing the channel, which is a transport
/// problem rather than a verdict on the message.
fn rejection(response: &Response, what: &str) -> MailError {
    if response.code == 421 {
        MailError::TransportFailed(format!(
            "Server closed the session during {what}: {}",
            response.message()
        ))
    } else {
        MailError::MessageFailed {
            reason: format!("{what} rejected: {} {}", response.code, response.message()),
        }
    }
}

/// An open, authenticated SMTP session.
///
/// Only [`Session::establish`] creates one, and it returns only after
/// authentication succeeded.
struct Session {
    client: SmtpClient,
}

impl Session {
    async fn establish(config: &TransportConfig) -> relaymail_smtp::Result<Self> {
        let timeouts = &config.timeouts;
        let address = config.address();

        let mut client = match config.tls {
            TlsMode::Implicit => {
                within(
                    timeouts.connect(),
                    "connect",
                    SmtpClient::connect_tls(
                        &address,
                        config.host.clone(),
                        config.accept_invalid_certs,
                    ),
                )
                .await?
            }
            TlsMode::StartTls | TlsMode::None => within(
                timeouts.connect(),
                "connect",
                SmtpClient::connect(&address, config.host.clone()),
            )
            .await?
            .accept_invalid_certs(config.accept_invalid_certs),
        };

        within(timeouts.greeting(), "greeting", client.read_greeting())
            .await?
            .expect_code(220)?;

        let mut capabilities = Self::hello(&mut client, config).await?;

        if config.tls == TlsMode::StartTls {
            if !capabilities.supports("STARTTLS") {
                return Err(ClientError::NotSupported("STARTTLS"));
            }
            within(timeouts.starttls(), "STARTTLS", client.starttls()).await?;
            capabilities = Self::hello(&mut client, config).await?;
            tracing::debug!(server = %address, "TLS negotiated via STARTTLS");
        }

        let mechanism = capabilities
            .auth_mechanism()
            .ok_or(ClientError::NotSupported("AUTH PLAIN or AUTH LOGIN"))?;

        within(
            timeouts.auth(),
            "AUTH",
            client.auth(
                mechanism,
                &config.username,
                config.password.expose_secret(),
            ),
        )
        .await?;

        tracing::debug!(
            server = %address,
            username = %config.username,
            mechanism = mechanism.as_str(),
            "Authenticated"
        );

        Ok(Self { client })
    }

    /// EHLO, falling back to HELO (and no extensions) when EHLO is refused.
    async fn hello(
        client: &mut SmtpClient,
        config: &TransportConfig,
    ) -> relaymail_smtp::Result<Capabilities> {
        let limit = config.timeouts.ehlo();
        let ehlo = within(limit, "EHLO", client.ehlo(&config.helo_name)).await?;

        if ehlo.is_success() {
            return Ok(Capabilities::from_ehlo(&ehlo));
        }
        if ehlo.code == 421 {
            return Err(ehlo.into_error());
        }

        tracing::debug!(code = ehlo.code, "EHLO refused, falling back to HELO");
        within(limit, "HELO", client.helo(&config.helo_name))
            .await?
            .expect_success()?;
        Ok(Capabilities::default())
    }

    /// Runs one mail transaction.
    async fn deliver(
        &mut self,
        config: &TransportConfig,
        message: &OutboundMessage,
        recipients: &RecipientSet,
    ) -> Result<()> {
        let timeouts = &config.timeouts;

        // The BCC header is written on purpose: callers have relied on it.
        // It discloses the blind copies to every recipient.
        let body = MessageBuilder::new()
            .subject(&message.subject)
            .from(&config.from_address)
            .to(&recipients.to)
            .cc(&recipients.cc)
            .bcc(&recipients.bcc)
            .text(&message.plain_body)
            .html(&message.html_body)
            .build()
            .map_err(|e| MailError::MessageFailed {
                reason: e.to_string(),
            })?;

        let response = within(
            timeouts.mail_from(),
            "MAIL FROM",
            self.client.mail_from(&config.from_address),
        )
        .await?;
        if !response.is_success() {
            self.reset(timeouts.rset()).await;
            return Err(rejection(
                &response,
                &format!("Sender <{}>", config.from_address),
            ));
        }

        let mut refused = Vec::new();
        for recipient in recipients.envelope() {
            let response = within(
                timeouts.rcpt_to(),
                "RCPT TO",
                self.client.rcpt_to(recipient),
            )
            .await?;

            if response.code == 421 {
                return Err(rejection(&response, &format!("Recipient <{recipient}>")));
            }
            if !response.is_success() {
                tracing::debug!(%recipient, code = response.code, "Recipient refused");
                refused.push(format!(
                    "<{recipient}>: {} {}",
                    response.code,
                    response.message()
                ));
            }
        }

        if !refused.is_empty() {
            self.reset(timeouts.rset()).await;
            return Err(MailError::MessageFailed {
                reason: format!("Recipients rejected: {}", refused.join("; ")),
            });
        }

        let response = within(timeouts.data(), "DATA", self.client.data()).await?;
        if response.code != 354 {
            return Err(MailError::TransportFailed(format!(
                "Server rejected DATA: {} {}",
                response.code,
                response.message()
            )));
        }

        let response = within(timeouts.data(), "message data", self.client.send_data(&body)).await?;
        if !response.is_success() {
            return Err(MailError::TransportFailed(format!(
                "Server rejected message data: {} {}",
                response.code,
                response.message()
            )));
        }

        Ok(())
    }

    /// Best-effort RSET so the session is clean for a graceful QUIT.
    async fn reset(&mut self, limit: Duration) {
        if !self.client.is_open() {
            return;
        }
        if let Err(e) = within(limit, "RSET", self.client.rset()).await {
            tracing::debug!("RSET failed: {e}");
        }
    }

    /// Sends QUIT and releases the socket.
    async fn close(mut self, limit: Duration) -> relaymail_smtp::Result<()> {
        within(limit, "QUIT", self.client.quit()).await.map(|_| ())
    }
}

/// Delivers messages through one SMTP session.
///
/// ```no_run
/// use relaymail::{MailTransport, OutboundMessage, RecipientSet, TransportConfig};
///
/// # async fn example() -> relaymail::Result<()> {
/// let config = TransportConfig::new(
///     "smtp.example.com",
///     465,
///     "mailer",
///     "hunter2",
///     "noreply@example.com",
/// );
/// let mut transport = MailTransport::open(config).await?;
///
/// transport
///     .send(
///         &OutboundMessage::new("Hello", "Hi there", "<p>Hi there</p>"),
///         &RecipientSet::to(["someone@example.com"]),
///     )
///     .await?;
///
/// transport.disconnect().await?;
/// # Ok(())
/// # }
/// ```
///
/// Operations take `&mut self`; share a transport between tasks behind a
/// mutex or give each task its own. Dropping the transport closes the socket
/// without sending QUIT.
pub struct MailTransport {
    config: TransportConfig,
    session: Option<Session>,
    exhausted: bool,
}

impl MailTransport {
    /// Validates the configuration and connects.
    ///
    /// # Errors
    ///
    /// Returns [`MailError::Configuration`] if the configuration is invalid
    /// or the session cannot be established and authenticated.
    pub async fn open(config: TransportConfig) -> Result<Self> {
        config.validate()?;

        let mut transport = Self {
            config,
            session: None,
            exhausted: false,
        };
        transport.connect().await?;

        Ok(transport)
    }

    #[must_use]
    pub const fn config(&self) -> &TransportConfig {
        &self.config
    }

    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    /// Returns `true` once a failed [`MailTransport::send`] has used up this
    /// transport.
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Establishes and authenticates the session. Does nothing when already
    /// connected.
    ///
    /// # Errors
    ///
    /// Returns [`MailError::Configuration`] if the connection, TLS, greeting,
    /// EHLO or authentication fails, and [`MailError::TransportExhausted`]
    /// if the transport is exhausted.
    #[tracing::instrument(level = "debug", skip(self), fields(server = %self.config.address()))]
    pub async fn connect(&mut self) -> Result<()> {
        if self.exhausted {
            return Err(MailError::TransportExhausted { cause: None });
        }
        if self.session.is_some() {
            return Ok(());
        }

        if self.config.tls == TlsMode::None {
            tracing::warn!(
                server = %self.config.address(),
                "SECURITY WARNING: connecting without TLS, credentials are sent in the clear"
            );
        }
        if self.config.accept_invalid_certs {
            tracing::warn!(
                server = %self.config.address(),
                "SECURITY WARNING: TLS certificate validation is disabled for this connection"
            );
        }

        let session = Session::establish(&self.config).await.map_err(|e| {
            tracing::error!(server = %self.config.address(), "Failed to establish session: {e}");
            MailError::Configuration(format!(
                "Failed to establish session with {}: {e}",
                self.config.address()
            ))
        })?;

        tracing::info!(server = %self.config.address(), "Session established");
        self.session = Some(session);
        Ok(())
    }

    /// Ends the session with QUIT.
    ///
    /// Succeeds when there is no session or the server already hung up. The
    /// session is released in every case.
    ///
    /// # Errors
    ///
    /// Returns [`MailError::TransportFailed`] if QUIT fails for another
    /// reason, such as a timeout.
    pub async fn disconnect(&mut self) -> Result<()> {
        let Some(session) = self.session.take() else {
            return Ok(());
        };

        match session.close(self.config.timeouts.quit()).await {
            Ok(()) => {
                tracing::info!(server = %self.config.address(), "Session closed");
                Ok(())
            }
            Err(e) if e.is_disconnect() => {
                tracing::debug!(server = %self.config.address(), "Server had already disconnected: {e}");
                Ok(())
            }
            Err(e) => Err(MailError::TransportFailed(format!(
                "Failed to close session: {e}"
            ))),
        }
    }

    /// Sends one message to every recipient in `recipients`.
    ///
    /// Reconnects first if the session was closed with
    /// [`MailTransport::disconnect`].
    ///
    /// # Errors
    ///
    /// - [`MailError::InvalidArgument`] if `recipients.to` is empty; nothing
    ///   is sent.
    /// - [`MailError::Configuration`] if reconnecting fails.
    /// - [`MailError::TransportExhausted`] for any delivery failure, with the
    ///   specific [`MailError::MessageFailed`] or
    ///   [`MailError::TransportFailed`] as its cause. The transport is
    ///   unusable afterwards and later calls fail the same way without a
    ///   cause.
    #[tracing::instrument(
        level = "debug",
        skip_all,
        fields(server = %self.config.address(), recipients = recipients.to.len() + recipients.cc.len() + recipients.bcc.len())
    )]
    pub async fn send(
        &mut self,
        message: &OutboundMessage,
        recipients: &RecipientSet,
    ) -> Result<()> {
        if recipients.to.is_empty() {
            return Err(MailError::InvalidArgument(
                "Expected one or more recipients, got 0".to_string(),
            ));
        }
        if self.exhausted {
            return Err(MailError::TransportExhausted { cause: None });
        }

        self.connect().await?;

        let Some(session) = self.session.as_mut() else {
            return Err(MailError::TransportFailed(
                "Session not available".to_string(),
            ));
        };

        match session.deliver(&self.config, message, recipients).await {
            Ok(()) => {
                tracing::info!(subject = %message.subject, "Message delivered");
                Ok(())
            }
            Err(cause) => {
                tracing::warn!(subject = %message.subject, "Delivery failed, transport exhausted: {cause}");
                self.exhausted = true;
                if let Some(session) = self.session.take() {
                    // Best effort, the failure is what the caller needs.
                    let _ = session.close(self.config.timeouts.quit()).await;
                }
                Err(MailError::exhausted(cause))
            }
        }
    }
}

impl std::fmt::Debug for MailTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailTransport")
            .field("config", &self.config)
            .field("connected", &self.session.is_some())
            .field("exhausted", &self.exhausted)
            .finish()
    }
}
