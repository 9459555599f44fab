//! SMTP client connection with implicit TLS, STARTTLS and SASL support.

use std::sync::Arc;

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};
use tokio_rustls::{
    TlsConnector,
    client::TlsStream,
    rustls::{
        ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme,
        client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
        pki_types::{CertificateDer, ServerName, UnixTime},
    },
};

use super::{
    error::{ClientError, Result},
    response::{AuthMechanism, Response},
};

/// Initial size of the read buffer for SMTP responses.
const BUFFER_SIZE: usize = 8192;

/// Maximum size of the read buffer to prevent unbounded growth (1MB).
const MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// The underlying stream, plain TCP or TLS-wrapped.
enum ClientConnection {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl ClientConnection {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        match self {
            Self::Plain(stream) => {
                stream.write_all(data).await?;
                stream.flush().await?;
            }
            Self::Tls(stream) => {
                stream.write_all(data).await?;
                stream.flush().await?;
            }
        }
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = match self {
            Self::Plain(stream) => stream.read(buf).await?,
            Self::Tls(stream) => stream.read(buf).await?,
        };
        if n == 0 {
            return Err(ClientError::ConnectionClosed);
        }
        Ok(n)
    }

    /// Runs the TLS handshake over a plain connection.
    async fn upgrade_to_tls(self, domain: &str, accept_invalid_certs: bool) -> Result<Self> {
        match self {
            Self::Plain(stream) => Ok(Self::Tls(Box::new(
                handshake(stream, domain, accept_invalid_certs).await?,
            ))),
            Self::Tls(_) => Err(ClientError::TlsError(
                "Connection is already TLS".to_string(),
            )),
        }
    }

    const fn is_tls(&self) -> bool {
        matches!(self, Self::Tls(_))
    }
}

/// Builds a rustls connector trusting the platform's root certificates.
fn tls_connector(accept_invalid_certs: bool) -> Result<TlsConnector> {
    let mut root_store = RootCertStore::empty();

    let certs = rustls_native_certs::load_native_certs();
    for cert in certs.certs {
        root_store
            .add(cert)
            .map_err(|e| ClientError::TlsError(format!("Failed to add certificate: {e}")))?;
    }
    if !certs.errors.is_empty() {
        tracing::warn!(?certs.errors, "Some certificates could not be loaded");
    }

    let mut config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    if accept_invalid_certs {
        config
            .dangerous()
            .set_certificate_verifier(Arc::new(NoVerifier));
    }

    Ok(TlsConnector::from(Arc::new(config)))
}

async fn handshake(
    stream: TcpStream,
    domain: &str,
    accept_invalid_certs: bool,
) -> Result<TlsStream<TcpStream>> {
    let server_name = ServerName::try_from(domain.to_string())
        .map_err(|e| ClientError::TlsError(format!("Invalid domain: {e}")))?;

    tls_connector(accept_invalid_certs)?
        .connect(server_name, stream)
        .await
        .map_err(|e| ClientError::TlsError(e.to_string()))
}

/// Accepts any certificate. Only reachable through `accept_invalid_certs`.
#[derive(Debug)]
struct NoVerifier;

impl ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, tokio_rustls::rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ED25519,
        ]
    }
}

/// Normalises line endings to CRLF and applies dot-stuffing
/// (RFC 5321 Section 4.5.2), leaving the payload CRLF-terminated.
fn dot_stuff(data: &str) -> String {
    let mut out = String::with_capacity(data.len() + data.len() / 64 + 2);

    for line in data.split_inclusive('\n') {
        let line = line.trim_end_matches('\n');
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.starts_with('.') {
            out.push('.');
        }
        out.push_str(line);
        out.push_str("\r\n");
    }

    out
}

/// A single SMTP conversation with a server.
///
/// Methods map one-to-one onto SMTP commands and hand back the server's
/// reply; interpreting the reply code is left to the caller, except for the
/// multi-step exchanges (`STARTTLS`, `AUTH`) which check their own codes.
pub struct SmtpClient {
    connection: Option<ClientConnection>,
    buffer: Vec<u8>,
    buffer_pos: usize,
    last_response: Option<Response>,
    server_domain: String,
    accept_invalid_certs: bool,
}

impl SmtpClient {
    fn with_connection(connection: ClientConnection, server_domain: String) -> Self {
        Self {
            connection: Some(connection),
            buffer: vec![0u8; BUFFER_SIZE],
            buffer_pos: 0,
            last_response: None,
            server_domain,
            accept_invalid_certs: false,
        }
    }

    /// Opens a plaintext connection to `addr`.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails.
    pub async fn connect(addr: &str, server_domain: String) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        tracing::debug!(%addr, "Connected (plaintext)");

        Ok(Self::with_connection(
            ClientConnection::Plain(stream),
            server_domain,
        ))
    }

    /// Opens a connection to `addr` and performs the TLS handshake before any
    /// SMTP traffic (implicit TLS, RFC 8314).
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or the handshake fails.
    pub async fn connect_tls(
        addr: &str,
        server_domain: String,
        accept_invalid_certs: bool,
    ) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let tls = handshake(stream, &server_domain, accept_invalid_certs).await?;
        tracing::debug!(%addr, domain = %server_domain, "Connected (implicit TLS)");

        Ok(Self::with_connection(
            ClientConnection::Tls(Box::new(tls)),
            server_domain,
        )
        .accept_invalid_certs(accept_invalid_certs))
    }

    /// Sets whether a later STARTTLS accepts invalid certificates.
    #[must_use]
    pub const fn accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    /// Returns `true` while the socket is held.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.connection.is_some()
    }

    /// Returns `true` once the connection is encrypted.
    #[must_use]
    pub fn is_tls(&self) -> bool {
        self.connection
            .as_ref()
            .is_some_and(ClientConnection::is_tls)
    }

    #[must_use]
    pub const fn last_response(&self) -> Option<&Response> {
        self.last_response.as_ref()
    }

    /// Reads the server greeting.
    ///
    /// # Errors
    ///
    /// Returns an error if reading fails or the greeting is invalid.
    pub async fn read_greeting(&mut self) -> Result<Response> {
        self.read_response().await
    }

    async fn write_line(&mut self, line: &str) -> Result<()> {
        let data = format!("{line}\r\n");
        let connection = self
            .connection
            .as_mut()
            .ok_or(ClientError::ConnectionClosed)?;

        if let Err(e) = connection.send(data.as_bytes()).await {
            self.connection = None;
            return Err(e);
        }
        Ok(())
    }

    /// Sends a command line to the server.
    ///
    /// # Errors
    ///
    /// Returns an error if sending fails.
    pub async fn send_command(&mut self, command: &str) -> Result<()> {
        tracing::trace!(target: "relaymail_smtp::outgoing", "{command}");
        self.write_line(command).await
    }

    /// Sends a command and reads the reply.
    ///
    /// # Errors
    ///
    /// Returns an error if sending or reading fails.
    pub async fn command(&mut self, command: &str) -> Result<Response> {
        self.send_command(command).await?;
        self.read_response().await
    }

    /// Sends a credential-bearing line, logging only `redacted`.
    async fn secret_command(&mut self, line: &str, redacted: &str) -> Result<Response> {
        tracing::trace!(target: "relaymail_smtp::outgoing", "{redacted}");
        self.write_line(line).await?;
        self.read_response().await
    }

    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn ehlo(&mut self, domain: &str) -> Result<Response> {
        self.command(&format!("EHLO {domain}")).await
    }

    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn helo(&mut self, domain: &str) -> Result<Response> {
        self.command(&format!("HELO {domain}")).await
    }

    /// Sends STARTTLS and, on a 220 reply, upgrades the connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the server refuses or the handshake fails.
    pub async fn starttls(&mut self) -> Result<Response> {
        let response = self.command("STARTTLS").await?.expect_code(220)?;

        let old = self
            .connection
            .take()
            .ok_or(ClientError::ConnectionClosed)?;
        self.buffer_pos = 0;
        self.connection = Some(
            old.upgrade_to_tls(&self.server_domain, self.accept_invalid_certs)
                .await?,
        );

        Ok(response)
    }

    /// Authenticates with the given SASL mechanism.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::SmtpError`] when the server rejects the
    /// credentials, or an I/O error.
    pub async fn auth(
        &mut self,
        mechanism: AuthMechanism,
        username: &str,
        password: &str,
    ) -> Result<Response> {
        match mechanism {
            AuthMechanism::Plain => self.auth_plain(username, password).await,
            AuthMechanism::Login => self.auth_login(username, password).await,
        }
    }

    /// `AUTH PLAIN` with an initial response (RFC 4616).
    ///
    /// # Errors
    ///
    /// Returns an error unless the server answers 235.
    pub async fn auth_plain(&mut self, username: &str, password: &str) -> Result<Response> {
        let token = BASE64.encode(format!("\0{username}\0{password}"));
        self.secret_command(&format!("AUTH PLAIN {token}"), "AUTH PLAIN <redacted>")
            .await?
            .expect_code(235)
    }

    /// `AUTH LOGIN`, answering the username and password challenges.
    ///
    /// # Errors
    ///
    /// Returns an error unless the server answers 334, 334, then 235.
    pub async fn auth_login(&mut self, username: &str, password: &str) -> Result<Response> {
        self.command("AUTH LOGIN").await?.expect_code(334)?;
        self.secret_command(&BASE64.encode(username), "<username>")
            .await?
            .expect_code(334)?;
        self.secret_command(&BASE64.encode(password), "<password>")
            .await?
            .expect_code(235)
    }

    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn mail_from(&mut self, from: &str) -> Result<Response> {
        self.command(&format!("MAIL FROM:<{from}>")).await
    }

    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn rcpt_to(&mut self, to: &str) -> Result<Response> {
        self.command(&format!("RCPT TO:<{to}>")).await
    }

    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn data(&mut self) -> Result<Response> {
        self.command("DATA").await
    }

    /// Sends the message content, dot-stuffed, followed by the
    /// terminating `.` line, and reads the final reply.
    ///
    /// # Errors
    ///
    /// Returns an error if sending fails.
    pub async fn send_data(&mut self, data: &str) -> Result<Response> {
        let mut payload = dot_stuff(data);
        payload.push_str(".\r\n");
        tracing::trace!(target: "relaymail_smtp::outgoing", bytes = payload.len(), "<message data>");

        let connection = self
            .connection
            .as_mut()
            .ok_or(ClientError::ConnectionClosed)?;
        if let Err(e) = connection.send(payload.as_bytes()).await {
            self.connection = None;
            return Err(e);
        }

        self.read_response().await
    }

    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn rset(&mut self) -> Result<Response> {
        self.command("RSET").await
    }

    /// Sends QUIT and releases the socket whatever the outcome.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn quit(&mut self) -> Result<Response> {
        let result = self.command("QUIT").await;
        self.connection = None;
        result
    }

    /// Reads a complete SMTP reply from the server.
    async fn read_response(&mut self) -> Result<Response> {
        loop {
            if let Some((response, consumed)) =
                Response::parse_response(&self.buffer[..self.buffer_pos])?
            {
                self.buffer.copy_within(consumed..self.buffer_pos, 0);
                self.buffer_pos -= consumed;

                tracing::trace!(target: "relaymail_smtp::incoming", code = response.code, "{}", response.message());
                if response.code == 421 {
                    // The server is closing the transmission channel.
                    self.connection = None;
                }
                self.last_response = Some(response.clone());

                return Ok(response);
            }

            if self.buffer_pos >= self.buffer.len() {
                let new_size = self.buffer.len() * 2;
                if new_size > MAX_BUFFER_SIZE {
                    return Err(ClientError::ParseError(format!(
                        "Response too large (exceeds {MAX_BUFFER_SIZE} bytes)"
                    )));
                }
                self.buffer.resize(new_size, 0);
            }

            let connection = self
                .connection
                .as_mut()
                .ok_or(ClientError::ConnectionClosed)?;
            match connection.read(&mut self.buffer[self.buffer_pos..]).await {
                Ok(n) => self.buffer_pos += n,
                Err(e) => {
                    self.connection = None;
                    return Err(e);
                }
            }
        }
    }
}
