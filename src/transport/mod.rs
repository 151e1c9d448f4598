//! Transport layer for SMTP connections.
//!
//! Provides the line-oriented SMTP codec over any async byte stream, the
//! implicit-TLS dialer, and `send_mail_using_tls`, the delivery routine
//! that drives one complete session over a freshly dialed connection.

use async_trait::async_trait;
use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use crate::auth::AuthCredential;
use crate::client::SmtpClient;
use crate::config::{
    ServerConfig, TlsConfig, TrustStore, DEFAULT_CLIENT_ID, DEFAULT_COMMAND_TIMEOUT,
    DEFAULT_CONNECT_TIMEOUT,
};
use crate::errors::{SmtpError, SmtpErrorKind, SmtpResult, SmtpStage};
use crate::protocol::{SmtpCommand, SmtpResponse};
use crate::types::{Mailbox, ServerAddress};

/// Trait for SMTP transport abstraction.
#[async_trait]
pub trait SmtpTransport: Send + fmt::Debug {
    /// Sends a command and receives a response.
    async fn send_command(&mut self, command: &SmtpCommand) -> SmtpResult<SmtpResponse>;

    /// Sends raw data (for the DATA section).
    async fn send_data(&mut self, data: &[u8]) -> SmtpResult<()>;

    /// Reads a response from the server.
    async fn read_response(&mut self) -> SmtpResult<SmtpResponse>;

    /// Returns true if the stream is encrypted.
    fn is_tls(&self) -> bool;

    /// Returns the server name the connection was dialed with.
    fn server_name(&self) -> &str;

    /// Shuts the stream down without any SMTP exchange.
    async fn close(&mut self) -> SmtpResult<()>;
}

/// SMTP line codec over an async byte stream.
pub struct Connection<S> {
    /// Read/write stream.
    stream: BufReader<S>,
    /// Command timeout.
    command_timeout: Duration,
    /// Server host.
    server_name: String,
    /// TLS enabled flag.
    tls: bool,
    /// Set once the stream has been shut down.
    closed: bool,
}

/// Connection over an implicit-TLS TCP stream.
pub type TlsConnection = Connection<TlsStream<TcpStream>>;

impl<S> fmt::Debug for Connection<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("server_name", &self.server_name)
            .field("tls", &self.tls)
            .field("closed", &self.closed)
            .finish()
    }
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wraps an established stream.
    pub fn new(stream: S, server_name: impl Into<String>, tls: bool, command_timeout: Duration) -> Self {
        Self {
            stream: BufReader::new(stream),
            command_timeout,
            server_name: server_name.into(),
            tls,
            closed: false,
        }
    }

    /// Reads lines until we have a complete response.
    async fn read_response_inner(&mut self) -> SmtpResult<SmtpResponse> {
        let mut lines = Vec::new();

        loop {
            let mut raw = Vec::new();

            let read = timeout(self.command_timeout, self.stream.read_until(b'\n', &mut raw))
                .await
                .map_err(|_| SmtpError::new(SmtpErrorKind::ReadTimeout, "Read timed out"))??;

            if read == 0 {
                return Err(SmtpError::new(
                    SmtpErrorKind::ConnectionReset,
                    "Server closed connection",
                ));
            }

            let line = String::from_utf8_lossy(&raw).trim_end().to_string();
            let is_continuation = SmtpResponse::is_continuation(&line);
            lines.push(line);

            if !is_continuation {
                break;
            }
        }

        SmtpResponse::parse(&lines)
    }

    /// Writes data to the stream.
    async fn write_all(&mut self, data: &[u8]) -> SmtpResult<()> {
        let writer = self.stream.get_mut();

        timeout(self.command_timeout, writer.write_all(data))
            .await
            .map_err(|_| SmtpError::new(SmtpErrorKind::WriteTimeout, "Write timed out"))??;

        timeout(self.command_timeout, writer.flush())
            .await
            .map_err(|_| SmtpError::new(SmtpErrorKind::WriteTimeout, "Flush timed out"))??;

        Ok(())
    }
}

#[async_trait]
impl<S> SmtpTransport for Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send_command(&mut self, command: &SmtpCommand) -> SmtpResult<SmtpResponse> {
        let line = format!("{}\r\n", command.to_smtp_string());

        #[cfg(feature = "tracing")]
        tracing::debug!(command = %command, "Sending SMTP command");

        self.write_all(line.as_bytes()).await?;
        self.read_response().await
    }

    async fn send_data(&mut self, data: &[u8]) -> SmtpResult<()> {
        self.write_all(data).await
    }

    async fn read_response(&mut self) -> SmtpResult<SmtpResponse> {
        let response = self.read_response_inner().await?;

        #[cfg(feature = "tracing")]
        tracing::debug!(code = response.code, message = %response.first_message(), "Received SMTP response");

        Ok(response)
    }

    fn is_tls(&self) -> bool {
        self.tls
    }

    fn server_name(&self) -> &str {
        &self.server_name
    }

    async fn close(&mut self) -> SmtpResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        timeout(self.command_timeout, self.stream.get_mut().shutdown())
            .await
            .map_err(|_| SmtpError::new(SmtpErrorKind::WriteTimeout, "Shutdown timed out"))??;
        Ok(())
    }
}

/// Parameters of a dial that are not part of the address.
#[derive(Debug, Clone)]
pub struct DialOptions {
    /// TCP connect plus TLS handshake timeout.
    pub connect_timeout: Duration,
    /// Per-command timeout.
    pub command_timeout: Duration,
    /// EHLO identity.
    pub client_id: String,
    /// Trust anchors.
    pub tls: TlsConfig,
}

impl Default for DialOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            client_id: DEFAULT_CLIENT_ID.to_string(),
            tls: TlsConfig::default(),
        }
    }
}

impl From<&ServerConfig> for DialOptions {
    fn from(config: &ServerConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout,
            command_timeout: config.command_timeout,
            client_id: config.client_id().to_string(),
            tls: config.tls.clone(),
        }
    }
}

/// Builds the rustls client configuration for the given trust settings.
pub fn tls_client_config(config: &TlsConfig) -> SmtpResult<Arc<ClientConfig>> {
    let mut root_store = RootCertStore::empty();

    match config.trust_store {
        TrustStore::Native => match rustls_native_certs::load_native_certs() {
            Ok(certs) => {
                let (added, ignored) = root_store.add_parsable_certificates(certs);
                #[cfg(feature = "tracing")]
                tracing::debug!(added, ignored, "Loaded platform trust anchors");
                #[cfg(not(feature = "tracing"))]
                let _ = (added, ignored);
            }
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %e, "Could not load platform trust anchors");
                #[cfg(not(feature = "tracing"))]
                let _ = e;
            }
        },
        TrustStore::WebPki => {
            root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        }
        TrustStore::Empty => {}
    }

    if let Some(path) = &config.ca_cert_path {
        add_pem_bundle(&mut root_store, path)?;
    }

    for cert in &config.root_certificates {
        root_store
            .add(cert.clone())
            .map_err(|e| SmtpError::tls(format!("Invalid root certificate: {}", e)).with_cause(e))?;
    }

    if root_store.is_empty() {
        return Err(SmtpError::configuration("No trust anchors available"));
    }

    let tls_config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    Ok(Arc::new(tls_config))
}

fn add_pem_bundle(root_store: &mut RootCertStore, path: &Path) -> SmtpResult<()> {
    let file = std::fs::File::open(path).map_err(|e| {
        SmtpError::configuration(format!("Cannot open CA bundle {}: {}", path.display(), e))
            .with_cause(e)
    })?;
    let mut reader = std::io::BufReader::new(file);

    for cert in rustls_pemfile::certs(&mut reader) {
        let cert = cert.map_err(|e| {
            SmtpError::configuration(format!("Invalid CA bundle {}: {}", path.display(), e))
                .with_cause(e)
        })?;
        root_store
            .add(cert)
            .map_err(|e| SmtpError::tls(format!("Invalid root certificate: {}", e)).with_cause(e))?;
    }

    Ok(())
}

/// Connects over TCP and completes the TLS handshake before anything is read.
pub async fn dial(address: &ServerAddress, options: &DialOptions) -> SmtpResult<TlsConnection> {
    let tls_config = tls_client_config(&options.tls)?;
    let connector = TlsConnector::from(tls_config);
    let server_name = ServerName::try_from(address.host.clone())
        .map_err(|_| SmtpError::tls(format!("Invalid server name: {}", address.host)))?;

    let handshake = async {
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((address.host.as_str(), address.port))
            .await
            .map_err(|e| {
                SmtpError::new(
                    SmtpErrorKind::DnsResolution,
                    format!("Cannot resolve {}: {}", address.host, e),
                )
                .with_cause(e)
            })?
            .collect();

        if addrs.is_empty() {
            return Err(SmtpError::new(
                SmtpErrorKind::DnsResolution,
                format!("No addresses for {}", address.host),
            ));
        }

        let tcp = TcpStream::connect(&addrs[..]).await.map_err(SmtpError::io)?;
        tcp.set_nodelay(true).ok();

        connector
            .connect(server_name, tcp)
            .await
            .map_err(map_handshake_error)
    };

    let tls_stream = timeout(options.connect_timeout, handshake)
        .await
        .map_err(|_| SmtpError::new(SmtpErrorKind::ConnectTimeout, "Connect timed out"))??;

    #[cfg(feature = "tracing")]
    tracing::debug!(address = %address, "TLS session established");

    Ok(Connection::new(
        tls_stream,
        address.host.clone(),
        true,
        options.command_timeout,
    ))
}

fn map_handshake_error(error: std::io::Error) -> SmtpError {
    let untrusted = error
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<rustls::Error>())
        .map_or(false, |e| matches!(e, rustls::Error::InvalidCertificate(_)));

    let kind = if untrusted {
        SmtpErrorKind::CertificateUntrusted
    } else {
        SmtpErrorKind::TlsHandshakeFailed
    };

    SmtpError::new(kind, format!("TLS handshake failed: {}", error)).with_cause(error)
}

/// Sends one message over implicit TLS using default dial options.
///
/// `address` is `host:port`; the TLS handshake starts as soon as TCP is
/// connected. The first element of `to` is typically the visible
/// recipient; every element gets its own RCPT TO.
pub async fn send_mail_using_tls<R: AsRef<str>>(
    address: &str,
    auth: Option<&AuthCredential>,
    from: &str,
    to: &[R],
    payload: &[u8],
) -> SmtpResult<()> {
    send_mail_using_tls_with(&DialOptions::default(), address, auth, from, to, payload).await
}

/// Sends one message over implicit TLS.
///
/// Addresses are validated before any network activity. The session is
/// closed on every exit path: with QUIT after a delivered message, without
/// it after any failure.
pub async fn send_mail_using_tls_with<R: AsRef<str>>(
    options: &DialOptions,
    address: &str,
    auth: Option<&AuthCredential>,
    from: &str,
    to: &[R],
    payload: &[u8],
) -> SmtpResult<()> {
    let address = ServerAddress::parse(address)?;
    let from = Mailbox::new(from)?;
    let recipients = to
        .iter()
        .map(|r| Mailbox::new(r.as_ref()))
        .collect::<SmtpResult<Vec<_>>>()?;
    if recipients.is_empty() {
        return Err(SmtpError::new(
            SmtpErrorKind::NoRecipients,
            "At least one recipient is required",
        ));
    }

    let result = deliver(options, &address, auth, &from, &recipients, payload).await;

    #[cfg(feature = "tracing")]
    if let Err(e) = &result {
        tracing::error!(
            address = %address,
            stage = e.stage().map(|s| s.tag()).unwrap_or("Send error"),
            error = %e,
            "Mail delivery failed"
        );
    }

    result
}

async fn deliver(
    options: &DialOptions,
    address: &ServerAddress,
    auth: Option<&AuthCredential>,
    from: &Mailbox,
    to: &[Mailbox],
    payload: &[u8],
) -> SmtpResult<()> {
    let connection = dial(address, options)
        .await
        .map_err(|e| e.at_stage(SmtpStage::Dial))?;

    let client = SmtpClient::new(connection, options.client_id.clone()).await?;
    client.send_mail(auth, from, to, payload).await
}
