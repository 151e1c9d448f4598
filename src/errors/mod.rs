//! Error types for the mailer.
//!
//! Every failure carries a kind (which maps onto one of four categories),
//! the SMTP reply code when the server produced one, and the stage of the
//! dialogue that failed so the caller can log or retry externally.

use std::fmt;
use std::io;
use thiserror::Error;

/// Result type for mailer operations.
pub type SmtpResult<T> = Result<T, SmtpError>;

/// Error kinds categorizing the different failure modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SmtpErrorKind {
    // Configuration errors
    /// The `host:port` dial target could not be parsed.
    InvalidAddress,
    /// A mailbox is empty or contains forbidden characters.
    InvalidMailbox,
    /// The recipient list is empty.
    NoRecipients,
    /// A send was attempted before a body was set.
    MissingBody,
    /// A header value would break the header block.
    InvalidHeader,
    /// Any other invalid configuration.
    ConfigurationInvalid,

    // Transport errors
    /// Host name resolution failed.
    DnsResolution,
    /// Connection was refused.
    ConnectionRefused,
    /// Connect or TLS handshake timed out.
    ConnectTimeout,
    /// Connection was reset or closed by the peer.
    ConnectionReset,
    /// TLS handshake failed.
    TlsHandshakeFailed,
    /// Server certificate is not trusted for the configured host.
    CertificateUntrusted,
    /// Read timed out waiting for a reply.
    ReadTimeout,
    /// Write timed out.
    WriteTimeout,
    /// Other socket I/O failure.
    Io,

    // Protocol errors
    /// Reply could not be parsed.
    InvalidResponse,
    /// Server replied with an unexpected code.
    UnexpectedResponse,
    /// Server is shutting down (421).
    ServerShutdown,
    /// Authentication is required (530).
    AuthenticationRequired,
    /// Credentials were rejected.
    CredentialsInvalid,
    /// Sender rejected.
    InvalidFromAddress,
    /// Recipient rejected.
    InvalidRecipientAddress,
    /// Message exceeds the server size limit.
    MessageTooLarge,
    /// Command issued out of order for the dialogue state.
    CommandSequence,

    // Template errors
    /// Template file could not be read.
    TemplateNotFound,
    /// Template failed to compile.
    TemplateSyntax,
    /// Template failed to render.
    TemplateRender,
}

/// Coarse error taxonomy exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Bad input detected before any network activity; not retried.
    Configuration,
    /// Dial, TLS or socket failure; transient.
    Transport,
    /// Non-2xx reply or malformed reply from the server.
    Protocol,
    /// Template could not be loaded or rendered; raised before any network activity.
    Template,
}

impl SmtpErrorKind {
    /// Returns the category of this error kind.
    pub fn category(&self) -> ErrorCategory {
        match self {
            SmtpErrorKind::InvalidAddress
            | SmtpErrorKind::InvalidMailbox
            | SmtpErrorKind::NoRecipients
            | SmtpErrorKind::MissingBody
            | SmtpErrorKind::InvalidHeader
            | SmtpErrorKind::ConfigurationInvalid => ErrorCategory::Configuration,

            SmtpErrorKind::DnsResolution
            | SmtpErrorKind::ConnectionRefused
            | SmtpErrorKind::ConnectTimeout
            | SmtpErrorKind::ConnectionReset
            | SmtpErrorKind::TlsHandshakeFailed
            | SmtpErrorKind::CertificateUntrusted
            | SmtpErrorKind::ReadTimeout
            | SmtpErrorKind::WriteTimeout
            | SmtpErrorKind::Io => ErrorCategory::Transport,

            SmtpErrorKind::InvalidResponse
            | SmtpErrorKind::UnexpectedResponse
            | SmtpErrorKind::ServerShutdown
            | SmtpErrorKind::AuthenticationRequired
            | SmtpErrorKind::CredentialsInvalid
            | SmtpErrorKind::InvalidFromAddress
            | SmtpErrorKind::InvalidRecipientAddress
            | SmtpErrorKind::MessageTooLarge
            | SmtpErrorKind::CommandSequence => ErrorCategory::Protocol,

            SmtpErrorKind::TemplateNotFound
            | SmtpErrorKind::TemplateSyntax
            | SmtpErrorKind::TemplateRender => ErrorCategory::Template,
        }
    }

    /// Returns true if this error kind is typically retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SmtpErrorKind::ConnectionRefused
                | SmtpErrorKind::ConnectTimeout
                | SmtpErrorKind::ConnectionReset
                | SmtpErrorKind::ReadTimeout
                | SmtpErrorKind::WriteTimeout
                | SmtpErrorKind::Io
                | SmtpErrorKind::ServerShutdown
        )
    }
}

impl fmt::Display for SmtpErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SmtpErrorKind::InvalidAddress => "Invalid server address",
            SmtpErrorKind::InvalidMailbox => "Invalid mailbox",
            SmtpErrorKind::NoRecipients => "No recipients",
            SmtpErrorKind::MissingBody => "Missing message body",
            SmtpErrorKind::InvalidHeader => "Invalid header",
            SmtpErrorKind::ConfigurationInvalid => "Invalid configuration",
            SmtpErrorKind::DnsResolution => "DNS resolution failed",
            SmtpErrorKind::ConnectionRefused => "Connection refused",
            SmtpErrorKind::ConnectTimeout => "Connect timeout",
            SmtpErrorKind::ConnectionReset => "Connection reset",
            SmtpErrorKind::TlsHandshakeFailed => "TLS handshake failed",
            SmtpErrorKind::CertificateUntrusted => "Certificate not trusted",
            SmtpErrorKind::ReadTimeout => "Read timeout",
            SmtpErrorKind::WriteTimeout => "Write timeout",
            SmtpErrorKind::Io => "I/O error",
            SmtpErrorKind::InvalidResponse => "Invalid server response",
            SmtpErrorKind::UnexpectedResponse => "Unexpected response",
            SmtpErrorKind::ServerShutdown => "Server shutting down",
            SmtpErrorKind::AuthenticationRequired => "Authentication required",
            SmtpErrorKind::CredentialsInvalid => "Invalid credentials",
            SmtpErrorKind::InvalidFromAddress => "Sender rejected",
            SmtpErrorKind::InvalidRecipientAddress => "Recipient rejected",
            SmtpErrorKind::MessageTooLarge => "Message too large",
            SmtpErrorKind::CommandSequence => "Command sequence error",
            SmtpErrorKind::TemplateNotFound => "Template not found",
            SmtpErrorKind::TemplateSyntax => "Template syntax error",
            SmtpErrorKind::TemplateRender => "Template render error",
        };
        f.write_str(text)
    }
}

/// Stage of the delivery routine an error was raised in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SmtpStage {
    /// TCP connect and TLS handshake.
    Dial,
    /// Reading the server greeting.
    Greeting,
    /// EHLO/HELO.
    Hello,
    /// AUTH PLAIN.
    Auth,
    /// MAIL FROM.
    Mail,
    /// RCPT TO.
    Rcpt,
    /// DATA, payload write and terminating dot.
    Data,
    /// QUIT.
    Quit,
}

impl SmtpStage {
    /// Returns the contextual tag prefixed to errors raised in this stage.
    pub fn tag(&self) -> &'static str {
        match self {
            SmtpStage::Dial => "Dialing Error",
            SmtpStage::Greeting => "Create smtp client error",
            SmtpStage::Hello => "Error during EHLO",
            SmtpStage::Auth => "Error during AUTH",
            SmtpStage::Mail => "Error during MAIL",
            SmtpStage::Rcpt => "Error during RCPT",
            SmtpStage::Data => "Error during DATA",
            SmtpStage::Quit => "Error during QUIT",
        }
    }
}

impl fmt::Display for SmtpStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Enhanced SMTP status code (RFC 2034).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnhancedStatusCode {
    /// Class (2=success, 4=temporary, 5=permanent).
    pub class: u8,
    /// Subject (e.g., 1=addressing, 2=mailbox, 3=mail system).
    pub subject: u16,
    /// Detail code.
    pub detail: u16,
}

impl EnhancedStatusCode {
    /// Parses an enhanced status code from a string (e.g., "5.1.1").
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.split('.');
        let class = parts.next()?.parse().ok()?;
        let subject = parts.next()?.parse().ok()?;
        let detail = parts.next()?.parse().ok()?;
        if parts.next().is_some() || !(2..=5).contains(&class) {
            return None;
        }
        Some(Self { class, subject, detail })
    }

    /// Returns true if this is a permanent failure.
    pub fn is_permanent(&self) -> bool {
        self.class == 5
    }
}

impl fmt::Display for EnhancedStatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.class, self.subject, self.detail)
    }
}

/// Mailer error with detailed information.
#[derive(Error, Debug)]
pub struct SmtpError {
    /// Error kind.
    kind: SmtpErrorKind,
    /// Human-readable message.
    message: String,
    /// SMTP reply code if available.
    smtp_code: Option<u16>,
    /// Enhanced status code if available.
    enhanced_code: Option<EnhancedStatusCode>,
    /// Dialogue stage the error was raised in.
    stage: Option<SmtpStage>,
    /// Recipient the error relates to (RCPT failures).
    recipient: Option<String>,
    /// Underlying cause.
    #[source]
    cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl SmtpError {
    /// Creates a new error.
    pub fn new(kind: SmtpErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            smtp_code: None,
            enhanced_code: None,
            stage: None,
            recipient: None,
            cause: None,
        }
    }

    /// Sets the SMTP reply code.
    pub fn with_smtp_code(mut self, code: u16) -> Self {
        self.smtp_code = Some(code);
        self
    }

    /// Sets the enhanced status code.
    pub fn with_enhanced_code(mut self, code: EnhancedStatusCode) -> Self {
        self.enhanced_code = Some(code);
        self
    }

    /// Tags the error with the stage it was raised in. An existing tag is kept.
    pub fn at_stage(mut self, stage: SmtpStage) -> Self {
        self.stage.get_or_insert(stage);
        self
    }

    /// Replaces the error kind, keeping everything else.
    pub(crate) fn with_kind(mut self, kind: SmtpErrorKind) -> Self {
        self.kind = kind;
        self
    }

    /// Records the recipient the error relates to.
    pub fn for_recipient(mut self, recipient: impl Into<String>) -> Self {
        self.recipient = Some(recipient.into());
        self
    }

    /// Sets the underlying cause.
    pub fn with_cause<E: std::error::Error + Send + Sync + 'static>(mut self, cause: E) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Returns the error kind.
    pub fn kind(&self) -> SmtpErrorKind {
        self.kind
    }

    /// Returns the error category.
    pub fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the SMTP reply code if available.
    pub fn smtp_code(&self) -> Option<u16> {
        self.smtp_code
    }

    /// Returns the enhanced status code if available.
    pub fn enhanced_code(&self) -> Option<&EnhancedStatusCode> {
        self.enhanced_code.as_ref()
    }

    /// Returns the stage the error was raised in.
    pub fn stage(&self) -> Option<SmtpStage> {
        self.stage
    }

    /// Returns the recipient the error relates to.
    pub fn recipient(&self) -> Option<&str> {
        self.recipient.as_deref()
    }

    /// Returns true if an external retry with backoff may succeed.
    pub fn is_retryable(&self) -> bool {
        if let Some(code) = self.smtp_code {
            return (400..500).contains(&code);
        }
        self.kind.is_retryable()
    }

    // Convenience constructors

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(SmtpErrorKind::ConfigurationInvalid, message)
    }

    /// Creates a TLS error.
    pub fn tls(message: impl Into<String>) -> Self {
        Self::new(SmtpErrorKind::TlsHandshakeFailed, message)
    }

    /// Creates an authentication error.
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(SmtpErrorKind::CredentialsInvalid, message).at_stage(SmtpStage::Auth)
    }

    /// Creates a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(SmtpErrorKind::InvalidResponse, message)
    }

    /// Creates a template error.
    pub fn template(kind: SmtpErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, message)
    }

    /// Maps a socket error onto a transport error kind.
    pub fn io(error: io::Error) -> Self {
        let kind = match error.kind() {
            io::ErrorKind::ConnectionRefused => SmtpErrorKind::ConnectionRefused,
            io::ErrorKind::TimedOut => SmtpErrorKind::ConnectTimeout,
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof => SmtpErrorKind::ConnectionReset,
            _ => SmtpErrorKind::Io,
        };
        Self::new(kind, error.to_string()).with_cause(error)
    }

    /// Creates an error from a non-success SMTP reply.
    pub fn from_smtp_response(code: u16, message: impl Into<String>) -> Self {
        let kind = match code {
            421 => SmtpErrorKind::ServerShutdown,
            500..=504 => SmtpErrorKind::InvalidResponse,
            530 => SmtpErrorKind::AuthenticationRequired,
            534 | 535 => SmtpErrorKind::CredentialsInvalid,
            550 | 551 | 553 => SmtpErrorKind::InvalidRecipientAddress,
            552 => SmtpErrorKind::MessageTooLarge,
            _ => SmtpErrorKind::UnexpectedResponse,
        };
        Self::new(kind, message).with_smtp_code(code)
    }
}

impl fmt::Display for SmtpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(stage) = self.stage {
            write!(f, "{}: ", stage)?;
        }
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(code) = self.smtp_code {
            write!(f, " (SMTP {})", code)?;
        }
        if let Some(enhanced) = &self.enhanced_code {
            write!(f, " [{}]", enhanced)?;
        }
        if let Some(recipient) = &self.recipient {
            write!(f, " for <{}>", recipient)?;
        }
        Ok(())
    }
}

impl From<io::Error> for SmtpError {
    fn from(error: io::Error) -> Self {
        SmtpError::io(error)
    }
}
