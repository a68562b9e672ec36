//! Mock SMTP server for testing delivery scenarios
//!
//! This module provides a configurable mock SMTP server that can:
//! - Simulate various SMTP responses (success, failure, temporary errors)
//! - Refuse individual recipients
//! - Advertise STARTTLS and either complete a real TLS upgrade with a
//!   self-signed certificate or fail the handshake
//! - Inject network failures (hangs, connection drops)
//! - Track received commands across connections for verification
//!
//! # Example
//!
//! ```rust,no_run
//! use support::mock_server::MockSmtpServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let server = MockSmtpServer::builder()
//!     .with_greeting(220, "Test server ready")
//!     .with_rcpt_rejection("nobody@example.com", 550, "User unknown")
//!     .build()
//!     .await?;
//!
//! // Server is now running on server.addr()
//! server.shutdown();
//! # Ok(())
//! # }
//! ```

use std::{
    collections::HashMap,
    fmt::Write,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::RwLock,
    time::timeout,
};
use tokio_rustls::{
    TlsAcceptor,
    rustls::{
        ServerConfig,
        crypto::aws_lc_rs,
        pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer},
    },
};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// How a session on one stream ended.
enum Session<S> {
    Closed,
    /// STARTTLS was accepted; the raw stream is handed back for the handshake.
    Upgrade(S),
}

/// A TLS acceptor for a freshly generated self-signed `localhost` certificate.
fn self_signed_acceptor() -> TlsAcceptor {
    let cert = rcgen::generate_simple_self_signed(vec![
        "localhost".to_string(),
        "127.0.0.1".to_string(),
    ])
    .expect("generate certificate");
    let cert_der = CertificateDer::from(cert.serialize_der().expect("serialize certificate"));
    let key_der = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(cert.serialize_private_key_der()));

    let config = ServerConfig::builder_with_provider(Arc::new(aws_lc_rs::default_provider()))
        .with_safe_default_protocol_versions()
        .expect("protocol versions")
        .with_no_client_auth()
        .with_single_cert(vec![cert_der], key_der)
        .expect("server certificate");

    TlsAcceptor::from(Arc::new(config))
}

/// SMTP command received by the mock server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmtpCommand {
    Ehlo(String),
    MailFrom(String),
    RcptTo(String),
    Data,
    /// Message content (after DATA), as received on the wire
    MessageContent(String),
    Quit,
    StartTls,
    Other(String),
}

/// Response configuration for SMTP commands
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
    mail_from_response: SmtpResponse,
    rcpt_to_response: SmtpResponse,
    rcpt_rejections: HashMap<String, SmtpResponse>,
    data_response: SmtpResponse,
    data_end_response: SmtpResponse,
    quit_response: SmtpResponse,
    starttls_response: Option<SmtpResponse>,
    /// Set when a 220 to STARTTLS is followed by a real handshake
    tls: Option<TlsAcceptor>,

    // Failure injection
    response_delay: Option<Duration>,
    drop_after_commands: Option<usize>,
    timeout_on_command: Option<usize>,
}

impl MockServerConfig {
    fn ehlo_bytes(&self, encrypted: bool) -> Vec<u8> {
        let mut lines = vec!["mock.example.com".to_string()];
        lines.extend(self.capabilities.iter().cloned());
        if self.starttls_response.is_some() && !encrypted {
            lines.push("STARTTLS".to_string());
        }

        let mut response = String::new();
        let last = lines.len() - 1;
        for (i, line) in lines.iter().enumerate() {
            let separator = if i < last { '-' } else { ' ' };
            let _ = write!(&mut response, "{}{separator}{line}\r\n", self.ehlo_code);
        }

        response.into_bytes()
    }
}

impl Default for MockServerConfig {
    fn default() -> Self {
        Self {
            greeting: SmtpResponse::new(220, "Mock SMTP Server"),
            ehlo_code: 250,
            capabilities: vec!["SIZE 10000".to_string()],
            mail_from_response: SmtpResponse::new(250, "OK"),
            rcpt_to_response: SmtpResponse::new(250, "OK"),
            rcpt_rejections: HashMap::new(),
            data_response: SmtpResponse::new(354, "Start mail input; end with <CRLF>.<CRLF>"),
            data_end_response: SmtpResponse::new(250, "OK: Message accepted"),
            quit_response: SmtpResponse::new(221, "Bye"),
            starttls_response: None,
            tls: None,
            response_delay: None,
            drop_after_commands: None,
            timeout_on_command: None,
        }
    }
}

/// Mock SMTP server for testing
pub struct MockSmtpServer {
    addr: SocketAddr,
    commands_received: Arc<RwLock<Vec<SmtpCommand>>>,
    shutdown: Arc<AtomicBool>,
    connections: Arc<AtomicUsize>,
}

impl MockSmtpServer {
    #[must_use]
    pub fn builder() -> MockSmtpServerBuilder {
        MockSmtpServerBuilder::new()
    }

    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// All commands received by the server, across every connection
    pub async fn commands(&self) -> Vec<SmtpCommand> {
        self.commands_received.read().await.clone()
    }

    /// Addresses given in RCPT TO, in the order received
    pub async fn recipients(&self) -> Vec<String> {
        self.commands()
            .await
            .into_iter()
            .filter_map(|command| match command {
                SmtpCommand::RcptTo(to) => Some(to),
                _ => None,
            })
            .collect()
    }

    /// Every message body received after DATA
    pub async fn messages(&self) -> Vec<String> {
        self.commands()
            .await
            .into_iter()
            .filter_map(|command| match command {
                SmtpCommand::MessageContent(content) => Some(content),
                _ => None,
            })
            .collect()
    }

    /// Number of connections accepted so far
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Handle a single client connection, including a STARTTLS upgrade
    async fn handle_client(
        stream: TcpStream,
        config: Arc<MockServerConfig>,
        commands: Arc<RwLock<Vec<SmtpCommand>>>,
    ) -> Result<(), BoxError> {
        let Session::Upgrade(stream) = Self::session(stream, &config, &commands, false).await?
        else {
            return Ok(());
        };

        let Some(acceptor) = config.tls.clone() else {
            return Ok(());
        };
        let stream = acceptor.accept(stream).await?;
        Self::session(stream, &config, &commands, true).await?;

        Ok(())
    }

    /// Serve commands on `stream` until QUIT, a hang-up or a STARTTLS upgrade
    #[allow(clippy::too_many_lines)]
    async fn session<S>(
        stream: S,
        config: &MockServerConfig,
        commands: &RwLock<Vec<SmtpCommand>>,
        encrypted: bool,
    ) -> Result<Session<S>, BoxError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut stream = BufReader::new(stream);
        let mut line = String::new();
        let mut local_command_count = 0;

        if !encrypted {
            stream.write_all(&config.greeting.to_bytes()).await?;
            stream.flush().await?;

            if config.greeting.code != 220 {
                return Ok(Session::Closed);
            }
        }

        loop {
            line.clear();

            if config
                .drop_after_commands
                .is_some_and(|drop_after| local_command_count >= drop_after)
            {
                // Silently close connection
                return Ok(Session::Closed);
            }

            if config.timeout_on_command == Some(local_command_count) {
                // Hang to simulate an unresponsive server
                tokio::time::sleep(Duration::from_secs(3600)).await;
                return Ok(Session::Closed);
            }

            let Ok(read_result) =
                timeout(Duration::from_secs(10), stream.read_line(&mut line)).await
            else {
                return Ok(Session::Closed);
            };

            if read_result? == 0 {
                return Ok(Session::Closed);
            }

            local_command_count += 1;

            let cmd_line = line.trim();
            let (verb, argument) = cmd_line.split_once(' ').unwrap_or((cmd_line, ""));

            let (response, smtp_cmd) = match verb.to_uppercase().as_str() {
                "EHLO" => (config.ehlo_bytes(encrypted), SmtpCommand::Ehlo(argument.to_string())),
                "MAIL" => (
                    config.mail_from_response.to_bytes(),
                    SmtpCommand::MailFrom(argument.to_string()),
                ),
                "RCPT" => {
                    let address = argument
                        .trim_start_matches("TO:")
                        .trim_matches(['<', '>'])
                        .to_string();
                    let response = config
                        .rcpt_rejections
                        .get(&address)
                        .unwrap_or(&config.rcpt_to_response)
                        .to_bytes();
                    (response, SmtpCommand::RcptTo(address))
                }
                "DATA" => (config.data_response.to_bytes(), SmtpCommand::Data),
                "QUIT" => {
                    commands.write().await.push(SmtpCommand::Quit);
                    stream.write_all(&config.quit_response.to_bytes()).await?;
                    stream.flush().await?;
                    return Ok(Session::Closed);
                }
                "STARTTLS" => {
                    commands.write().await.push(SmtpCommand::StartTls);
                    let Some(starttls) = &config.starttls_response else {
                        let refusal = SmtpResponse::new(502, "Command not implemented");
                        stream.write_all(&refusal.to_bytes()).await?;
                        stream.flush().await?;
                        continue;
                    };
                    if encrypted {
                        stream
                            .write_all(&SmtpResponse::new(503, "Already in TLS").to_bytes())
                            .await?;
                        stream.flush().await?;
                        continue;
                    }
                    stream.write_all(&starttls.to_bytes()).await?;
                    if starttls.code == 220 {
                        if config.tls.is_some() {
                            stream.flush().await?;
                            return Ok(Session::Upgrade(stream.into_inner()));
                        }
                        // This server cannot actually speak TLS
                        stream.write_all(b"this is not a TLS handshake\r\n").await?;
                        stream.flush().await?;
                        return Ok(Session::Closed);
                    }
                    stream.flush().await?;
                    continue;
                }
                _ => (
                    SmtpResponse::new(500, "Unknown command").to_bytes(),
                    SmtpCommand::Other(cmd_line.to_string()),
                ),
            };

            commands.write().await.push(smtp_cmd.clone());

            if let Some(delay) = config.response_delay {
                tokio::time::sleep(delay).await;
            }

            stream.write_all(&response).await?;
            stream.flush().await?;

            if matches!(smtp_cmd, SmtpCommand::Data) && config.data_response.code == 354 {
                // Read message content until we see <CRLF>.<CRLF>
                let mut message_content = String::new();
                let mut data_line = String::new();

                loop {
                    data_line.clear();
                    if stream.read_line(&mut data_line).await? == 0 {
                        return Ok(Session::Closed);
                    }

                    if data_line == ".\r\n" {
                        commands
                            .write()
                            .await
                            .push(SmtpCommand::MessageContent(message_content));

                        stream
                            .write_all(&config.data_end_response.to_bytes())
                            .await?;
                        stream.flush().await?;
                        break;
                    }

                    message_content.push_str(&data_line);
                }
            }
        }
    }
}

/// Builder for configuring a `MockSmtpServer`
pub struct MockSmtpServerBuilder {
    config: MockServerConfig,
}

impl MockSmtpServerBuilder {
    fn new() -> Self {
        Self {
            config: MockServerConfig::default(),
        }
    }

    #[must_use]
    pub fn with_greeting(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.greeting = SmtpResponse::new(code, message);
        self
    }

    /// Set the EHLO code and the extension lines after the greeting line
    #[must_use]
    pub fn with_ehlo_response(mut self, code: u16, capabilities: Vec<String>) -> Self {
        self.config.ehlo_code = code;
        self.config.capabilities = capabilities;
        self
    }

    #[must_use]
    pub fn with_mail_from_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.mail_from_response = SmtpResponse::new(code, message);
        self
    }

    /// Set the RCPT TO response for every recipient without a specific rejection
    #[must_use]
    pub fn with_rcpt_to_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.rcpt_to_response = SmtpResponse::new(code, message);
        self
    }

    /// Refuse one recipient with the given response
    #[must_use]
    pub fn with_rcpt_rejection(
        mut self,
        address: impl Into<String>,
        code: u16,
        message: impl Into<String>,
    ) -> Self {
        self.config
            .rcpt_rejections
            .insert(address.into(), SmtpResponse::new(code, message));
        self
    }

    #[must_use]
    pub fn with_data_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.data_response = SmtpResponse::new(code, message);
        self
    }

    /// Set the response after message content (after `<CRLF>.<CRLF>`)
    #[must_use]
    pub fn with_data_end_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.data_end_response = SmtpResponse::new(code, message);
        self
    }

    #[must_use]
    pub fn with_quit_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.quit_response = SmtpResponse::new(code, message);
        self
    }

    /// Advertise STARTTLS and answer it with this response
    ///
    /// A 220 is followed by garbage instead of a TLS handshake.
    #[must_use]
    pub fn with_starttls_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.starttls_response = Some(SmtpResponse::new(code, message));
        self
    }

    /// Advertise STARTTLS and complete a real TLS upgrade with a
    /// self-signed certificate
    #[must_use]
    pub fn with_tls(mut self) -> Self {
        self.config.starttls_response = Some(SmtpResponse::new(220, "Ready to start TLS"));
        self.config.tls = Some(self_signed_acceptor());
        self
    }

    /// Add a delay before sending each response
    #[must_use]
    pub const fn with_response_delay(mut self, delay: Duration) -> Self {
        self.config.response_delay = Some(delay);
        self
    }

    /// Drop the connection after N commands
    #[must_use]
    pub const fn with_network_error_after_commands(mut self, count: usize) -> Self {
        self.config.drop_after_commands = Some(count);
        self
    }

    /// Hang on the Nth command (0-indexed)
    #[must_use]
    pub const fn with_timeout_on_command(mut self, command_index: usize) -> Self {
        self.config.timeout_on_command = Some(command_index);
        self
    }

    /// Build and start the mock SMTP server
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails to bind to a port
    pub async fn build(self) -> Result<MockSmtpServer, std::io::Error> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let config = Arc::new(self.config);
        let commands = Arc::new(RwLock::new(Vec::new()));
        let shutdown = Arc::new(AtomicBool::new(false));
        let connections = Arc::new(AtomicUsize::new(0));

        let commands_clone = Arc::clone(&commands);
        let shutdown_clone = Arc::clone(&shutdown);
        let connections_clone = Arc::clone(&connections);

        tokio::spawn(async move {
            loop {
                if shutdown_clone.load(Ordering::Relaxed) {
                    break;
                }

                // Accept with a timeout so the shutdown flag is checked regularly
                let accept_result = timeout(Duration::from_millis(100), listener.accept()).await;

                if let Ok(Ok((stream, _peer))) = accept_result {
                    connections_clone.fetch_add(1, Ordering::SeqCst);
                    let config = Arc::clone(&config);
                    let commands = Arc::clone(&commands_clone);

                    tokio::spawn(async move {
                        let session = MockSmtpServer::handle_client(stream, config, commands);
                        if let Err(e) = session.await {
                            tracing::debug!("Mock server client error: {e}");
                        }
                    });
                }
            }
        });

        Ok(MockSmtpServer {
            addr,
            commands_received: commands,
            shutdown,
            connections,
        })
    }
}
