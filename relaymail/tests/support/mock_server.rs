//! Scriptable SMTP server for transport tests
//!
//! Speaks plaintext SMTP with AUTH PLAIN/LOGIN and can:
//! - Answer each command with a configured reply
//! - Refuse individual recipients
//! - Drop the connection after a number of commands
//! - Record every command and message body it receives
#![allow(dead_code)] // Not every test uses every knob

use std::{
    fmt::Write,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::RwLock,
    time::timeout,
};

/// Command received by the mock server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmtpCommand {
    Ehlo(String),
    Helo(String),
    /// Mechanism and the decoded-free raw arguments
    Auth(String),
    MailFrom(String),
    RcptTo(String),
    Data,
    /// Message content after DATA, dot-unstuffed
    MessageContent(String),
    Rset,
    Quit,
    Other(String),
}

#[derive(Debug, Clone)]
pub struct SmtpResponse {
    pub code: u16,
    pub message: String,
}

impl SmtpResponse {
    fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        format!("{} {}\r\n", self.code, self.message).into_bytes()
    }
}

#[derive(Clone)]
struct MockServerConfig {
    greeting: SmtpResponse,
    ehlo_code: u16,
    capabilities: Vec<String>,
    helo_response: SmtpResponse,
    auth_response: SmtpResponse,
    auth_refused_from_connection: Option<usize>,
    mail_from_response: SmtpResponse,
    rcpt_to_response: SmtpResponse,
    rejected_recipients: Vec<String>,
    data_response: SmtpResponse,
    data_end_response: SmtpResponse,
    quit_response: SmtpResponse,
    drop_after_commands: Option<usize>,
    hang_on_command: Option<usize>,
}

impl Default for MockServerConfig {
    fn default() -> Self {
        Self {
            greeting: SmtpResponse::new(220, "Mock SMTP Server"),
            ehlo_code: 250,
            capabilities: vec![
                "SIZE 10000000".to_string(),
                "AUTH PLAIN LOGIN".to_string(),
            ],
            helo_response: SmtpResponse::new(250, "Hello"),
            auth_response: SmtpResponse::new(235, "Authentication successful"),
            auth_refused_from_connection: None,
            mail_from_response: SmtpResponse::new(250, "OK"),
            rcpt_to_response: SmtpResponse::new(250, "OK"),
            rejected_recipients: Vec::new(),
            data_response: SmtpResponse::new(354, "Start mail input; end with <CRLF>.<CRLF>"),
            data_end_response: SmtpResponse::new(250, "OK: Message accepted"),
            quit_response: SmtpResponse::new(221, "Bye"),
            drop_after_commands: None,
            hang_on_command: None,
        }
    }
}

impl MockServerConfig {
    fn ehlo_bytes(&self) -> Vec<u8> {
        if self.ehlo_code != 250 {
            return SmtpResponse::new(self.ehlo_code, "EHLO not supported").to_bytes();
        }

        let mut lines = vec!["mock.localhost".to_string()];
        lines.extend(self.capabilities.iter().cloned());

        let mut response = String::new();
        let last = lines.len() - 1;
        for (i, line) in lines.iter().enumerate() {
            let sep = if i == last { ' ' } else { '-' };
            let _ = write!(&mut response, "250{sep}{line}\r\n");
        }
        response.into_bytes()
    }
}

/// Mock SMTP server bound to a random local port
pub struct MockSmtpServer {
    addr: SocketAddr,
    commands_received: Arc<RwLock<Vec<SmtpCommand>>>,
    shutdown: Arc<AtomicBool>,
    connections: Arc<AtomicUsize>,
}

impl MockSmtpServer {
    #[must_use]
    pub fn builder() -> MockSmtpServerBuilder {
        MockSmtpServerBuilder {
            config: MockServerConfig::default(),
        }
    }

    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub async fn commands(&self) -> Vec<SmtpCommand> {
        self.commands_received.read().await.clone()
    }

    /// Envelope recipients in the order they were received
    pub async fn recipients(&self) -> Vec<String> {
        self.commands()
            .await
            .into_iter()
            .filter_map(|cmd| match cmd {
                SmtpCommand::RcptTo(arg) => Some(strip_path(&arg)),
                _ => None,
            })
            .collect()
    }

    /// Message bodies received after DATA
    pub async fn messages(&self) -> Vec<String> {
        self.commands()
            .await
            .into_iter()
            .filter_map(|cmd| match cmd {
                SmtpCommand::MessageContent(body) => Some(body),
                _ => None,
            })
            .collect()
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    #[allow(clippy::too_many_lines)]
    async fn handle_client(
        mut stream: TcpStream,
        config: Arc<MockServerConfig>,
        commands: Arc<RwLock<Vec<SmtpCommand>>>,
        connection: usize,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let (reader, mut writer) = stream.split();
        let mut reader = BufReader::new(reader);
        let mut line = String::new();
        let mut command_count = 0;
        let auth_response = match config.auth_refused_from_connection {
            Some(first) if connection >= first => {
                SmtpResponse::new(535, "Authentication credentials invalid")
            }
            _ => config.auth_response.clone(),
        };

        writer.write_all(&config.greeting.to_bytes()).await?;
        writer.flush().await?;

        loop {
            line.clear();

            if let Some(drop_after) = config.drop_after_commands
                && command_count >= drop_after
            {
                return Ok(());
            }

            let read_result = timeout(Duration::from_secs(10), reader.read_line(&mut line)).await;
            let Ok(bytes_read) = read_result else {
                return Ok(());
            };
            if bytes_read? == 0 {
                return Ok(());
            }

            if let Some(hang_on) = config.hang_on_command
                && command_count == hang_on
            {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                return Ok(());
            }
            command_count += 1;

            let cmd_line = line.trim_end().to_string();
            let (verb, arg) = cmd_line
                .split_once(' ')
                .map_or((cmd_line.as_str(), ""), |(v, a)| (v, a));

            let (response, smtp_cmd) = match verb.to_uppercase().as_str() {
                "EHLO" => (config.ehlo_bytes(), SmtpCommand::Ehlo(arg.to_string())),
                "HELO" => (
                    config.helo_response.to_bytes(),
                    SmtpCommand::Helo(arg.to_string()),
                ),
                "AUTH" => {
                    let cmd = SmtpCommand::Auth(arg.to_string());
                    if arg.eq_ignore_ascii_case("LOGIN") {
                        commands.write().await.push(cmd);
                        // Username and password challenges
                        for _ in 0..2 {
                            writer.write_all(b"334 VXNlcm5hbWU6\r\n").await?;
                            writer.flush().await?;
                            line.clear();
                            if reader.read_line(&mut line).await? == 0 {
                                return Ok(());
                            }
                        }
                        writer.write_all(&auth_response.to_bytes()).await?;
                        writer.flush().await?;
                        continue;
                    }
                    (auth_response.to_bytes(), cmd)
                }
                "MAIL" => (
                    config.mail_from_response.to_bytes(),
                    SmtpCommand::MailFrom(arg.to_string()),
                ),
                "RCPT" => {
                    let recipient = strip_path(arg);
                    let response = if config.rejected_recipients.contains(&recipient) {
                        SmtpResponse::new(550, format!("<{recipient}>: User unknown")).to_bytes()
                    } else {
                        config.rcpt_to_response.to_bytes()
                    };
                    (response, SmtpCommand::RcptTo(arg.to_string()))
                }
                "DATA" => (config.data_response.to_bytes(), SmtpCommand::Data),
                "RSET" => (SmtpResponse::new(250, "OK").to_bytes(), SmtpCommand::Rset),
                "QUIT" => {
                    commands.write().await.push(SmtpCommand::Quit);
                    writer.write_all(&config.quit_response.to_bytes()).await?;
                    writer.flush().await?;
                    return Ok(());
                }
                _ => (
                    SmtpResponse::new(500, "Unknown command").to_bytes(),
                    SmtpCommand::Other(cmd_line.clone()),
                ),
            };

            commands.write().await.push(smtp_cmd.clone());
            writer.write_all(&response).await?;
            writer.flush().await?;

            if matches!(smtp_cmd, SmtpCommand::Data) && config.data_response.code == 354 {
                let mut content = String::new();
                loop {
                    line.clear();
                    if reader.read_line(&mut line).await? == 0 {
                        return Ok(());
                    }
                    if line == ".\r\n" {
                        break;
                    }
                    let unstuffed = line.strip_prefix('.').unwrap_or(&line);
                    content.push_str(unstuffed);
                }

                commands
                    .write()
                    .await
                    .push(SmtpCommand::MessageContent(content));
                writer.write_all(&config.data_end_response.to_bytes()).await?;
                writer.flush().await?;
            }
        }
    }
}

/// `<user@example.com> PARAM=1` / `FROM:<user@example.com>` -> `user@example.com`
fn strip_path(arg: &str) -> String {
    arg.split_once('<')
        .and_then(|(_, rest)| rest.split_once('>'))
        .map_or_else(|| arg.to_string(), |(path, _)| path.to_string())
}

/// Builder for a [`MockSmtpServer`]
pub struct MockSmtpServerBuilder {
    config: MockServerConfig,
}

impl MockSmtpServerBuilder {
    #[must_use]
    pub fn with_greeting(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.greeting = SmtpResponse::new(code, message);
        self
    }

    /// Replace the advertised extensions
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: &[&str]) -> Self {
        self.config.capabilities = capabilities.iter().map(ToString::to_string).collect();
        self
    }

    /// Answer EHLO with `code` instead of the capability list
    #[must_use]
    pub const fn with_ehlo_code(mut self, code: u16) -> Self {
        self.config.ehlo_code = code;
        self
    }

    #[must_use]
    pub fn with_auth_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.auth_response = SmtpResponse::new(code, message);
        self
    }

    /// Refuses AUTH with 535 on the `connection`th connection (1-based) and
    /// every later one.
    #[must_use]
    pub const fn with_auth_refused_from_connection(mut self, connection: usize) -> Self {
        self.config.auth_refused_from_connection = Some(connection);
        self
    }

    #[must_use]
    pub fn with_mail_from_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.mail_from_response = SmtpResponse::new(code, message);
        self
    }

    #[must_use]
    pub fn with_rcpt_to_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.rcpt_to_response = SmtpResponse::new(code, message);
        self
    }

    /// Refuse a single recipient with 550
    #[must_use]
    pub fn with_rejected_recipient(mut self, address: impl Into<String>) -> Self {
        self.config.rejected_recipients.push(address.into());
        self
    }

    #[must_use]
    pub fn with_data_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.data_response = SmtpResponse::new(code, message);
        self
    }

    #[must_use]
    pub fn with_data_end_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.data_end_response = SmtpResponse::new(code, message);
        self
    }

    /// Close the connection once `count` commands have been answered
    #[must_use]
    pub const fn with_network_error_after_commands(mut self, count: usize) -> Self {
        self.config.drop_after_commands = Some(count);
        self
    }

    /// Never answer the command at `index` (0-based)
    #[must_use]
    pub const fn with_hang_on_command(mut self, index: usize) -> Self {
        self.config.hang_on_command = Some(index);
        self
    }

    /// Bind to a random port and start serving
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails to bind
    pub async fn build(self) -> Result<MockSmtpServer, std::io::Error> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let config = Arc::new(self.config);
        let commands = Arc::new(RwLock::new(Vec::new()));
        let shutdown = Arc::new(AtomicBool::new(false));
        let connections = Arc::new(AtomicUsize::new(0));

        let server = MockSmtpServer {
            addr,
            commands_received: Arc::clone(&commands),
            shutdown: Arc::clone(&shutdown),
            connections: Arc::clone(&connections),
        };

        tokio::spawn(async move {
            while !shutdown.load(Ordering::Relaxed) {
                let accept_result = timeout(Duration::from_millis(100), listener.accept()).await;

                if let Ok(Ok((stream, _peer))) = accept_result {
                    let connection = connections.fetch_add(1, Ordering::Relaxed) + 1;
                    let config = Arc::clone(&config);
                    let commands = Arc::clone(&commands);

                    tokio::spawn(async move {
                        if let Err(e) = MockSmtpServer::handle_client(stream, config, commands, connection).await {
                            eprintln!("Mock server client error: {e}");
                        }
                    });
                }
            }
        });

        Ok(server)
    }
}

impl Drop for MockSmtpServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
