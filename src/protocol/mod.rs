//! SMTP protocol implementation.
//!
//! Implements the RFC 5321 commands used by a single mail transaction,
//! reply parsing, the EHLO extension table and the DATA dot-stuffing
//! encoder.

use std::collections::HashMap;
use std::fmt;

use crate::errors::{EnhancedStatusCode, SmtpError, SmtpResult};
use crate::types::Mailbox;

/// SMTP commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmtpCommand {
    /// Extended HELLO with client identity.
    Ehlo(String),
    /// Basic HELLO.
    Helo(String),
    /// Authenticate.
    Auth {
        /// Authentication mechanism.
        mechanism: String,
        /// Initial response (optional).
        initial_response: Option<String>,
    },
    /// A bare SASL continuation line (`*` cancels the exchange).
    AuthResponse(String),
    /// MAIL FROM command.
    MailFrom {
        /// Sender mailbox.
        address: Mailbox,
        /// BODY=8BITMIME parameter.
        body_8bit: bool,
        /// SMTPUTF8 parameter.
        smtputf8: bool,
    },
    /// RCPT TO command.
    RcptTo {
        /// Recipient mailbox.
        address: Mailbox,
    },
    /// DATA command.
    Data,
    /// Quit connection.
    Quit,
}

impl SmtpCommand {
    /// Formats the command for sending (without the trailing CRLF).
    pub fn to_smtp_string(&self) -> String {
        match self {
            SmtpCommand::Ehlo(domain) => format!("EHLO {}", domain),
            SmtpCommand::Helo(domain) => format!("HELO {}", domain),
            SmtpCommand::Auth {
                mechanism,
                initial_response,
            } => match initial_response {
                Some(response) => format!("AUTH {} {}", mechanism, response),
                None => format!("AUTH {}", mechanism),
            },
            SmtpCommand::AuthResponse(line) => line.clone(),
            SmtpCommand::MailFrom {
                address,
                body_8bit,
                smtputf8,
            } => {
                let mut cmd = format!("MAIL FROM:{}", address.to_smtp());
                if *body_8bit {
                    cmd.push_str(" BODY=8BITMIME");
                }
                if *smtputf8 {
                    cmd.push_str(" SMTPUTF8");
                }
                cmd
            }
            SmtpCommand::RcptTo { address } => format!("RCPT TO:{}", address.to_smtp()),
            SmtpCommand::Data => "DATA".to_string(),
            SmtpCommand::Quit => "QUIT".to_string(),
        }
    }

    /// Returns the command verb.
    pub fn verb(&self) -> &'static str {
        match self {
            SmtpCommand::Ehlo(_) => "EHLO",
            SmtpCommand::Helo(_) => "HELO",
            SmtpCommand::Auth { .. } | SmtpCommand::AuthResponse(_) => "AUTH",
            SmtpCommand::MailFrom { .. } => "MAIL",
            SmtpCommand::RcptTo { .. } => "RCPT",
            SmtpCommand::Data => "DATA",
            SmtpCommand::Quit => "QUIT",
        }
    }
}

/// Log-safe rendering: SASL payloads are redacted.
impl fmt::Display for SmtpCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SmtpCommand::Auth {
                mechanism,
                initial_response: Some(_),
            } => write!(f, "AUTH {} [REDACTED]", mechanism),
            SmtpCommand::AuthResponse(line) if line != "*" => f.write_str("[REDACTED]"),
            other => f.write_str(&other.to_smtp_string()),
        }
    }
}

/// SMTP response from server.
#[derive(Debug, Clone)]
pub struct SmtpResponse {
    /// Status code (e.g., 250, 354, 550).
    pub code: u16,
    /// Enhanced status code (optional).
    pub enhanced_code: Option<EnhancedStatusCode>,
    /// Response message lines.
    pub message: Vec<String>,
    /// Whether this is a multiline response.
    pub is_multiline: bool,
}

impl SmtpResponse {
    /// Creates a new single-line response.
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            enhanced_code: None,
            message: vec![message.into()],
            is_multiline: false,
        }
    }

    /// Returns true if `line` continues a multiline reply (`250-...`).
    pub fn is_continuation(line: &str) -> bool {
        line.as_bytes().get(3) == Some(&b'-')
    }

    /// Parses a response from raw lines (without CRLF).
    pub fn parse(lines: &[String]) -> SmtpResult<Self> {
        if lines.is_empty() {
            return Err(SmtpError::protocol("Empty response"));
        }

        let mut messages = Vec::with_capacity(lines.len());
        let mut code = 0u16;
        let mut enhanced_code = None;

        for (i, line) in lines.iter().enumerate() {
            let parsed_code: u16 = line
                .get(..3)
                .filter(|digits| digits.bytes().all(|b| b.is_ascii_digit()))
                .and_then(|digits| digits.parse().ok())
                .ok_or_else(|| SmtpError::protocol(format!("Invalid status code: {:?}", line)))?;

            match line.as_bytes().get(3) {
                None | Some(b' ') | Some(b'-') => {}
                Some(_) => {
                    return Err(SmtpError::protocol(format!("Malformed reply line: {:?}", line)));
                }
            }

            if i == 0 {
                code = parsed_code;
            } else if parsed_code != code {
                return Err(SmtpError::protocol("Inconsistent status codes in multiline response"));
            }

            let text = line.get(4..).unwrap_or("");
            let text = if i == 0 {
                match Self::parse_enhanced_code(text) {
                    Some((esc, rest)) => {
                        enhanced_code = Some(esc);
                        rest.trim().to_string()
                    }
                    None => text.to_string(),
                }
            } else {
                text.to_string()
            };

            messages.push(text);
        }

        Ok(Self {
            code,
            enhanced_code,
            message: messages,
            is_multiline: lines.len() > 1,
        })
    }

    /// Parses enhanced status code from message start.
    fn parse_enhanced_code(msg: &str) -> Option<(EnhancedStatusCode, &str)> {
        let (first, rest) = msg.split_once(' ').unwrap_or((msg, ""));
        let code = EnhancedStatusCode::parse(first)?;
        Some((code, rest))
    }

    /// Returns true if this is a success response (2xx).
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// Returns true if this is a positive intermediate response (3xx).
    pub fn is_intermediate(&self) -> bool {
        (300..400).contains(&self.code)
    }

    /// Returns the first message line.
    pub fn first_message(&self) -> &str {
        self.message.first().map(|s| s.as_str()).unwrap_or("")
    }

    /// Returns all message lines joined.
    pub fn full_message(&self) -> String {
        self.message.join("\n")
    }

    /// Converts the reply into an error.
    pub fn to_error(&self) -> SmtpError {
        let mut err = SmtpError::from_smtp_response(self.code, self.full_message());
        if let Some(enhanced) = &self.enhanced_code {
            err = err.with_enhanced_code(enhanced.clone());
        }
        err
    }
}

impl fmt::Display for SmtpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.first_message())
    }
}

/// ESMTP extensions advertised in the EHLO reply.
#[derive(Debug, Clone, Default)]
pub struct EsmtpCapabilities {
    /// Server's self-identification (first EHLO line).
    pub domain: String,
    /// Extension keyword (upper case) to its parameters.
    pub extensions: HashMap<String, String>,
    /// Mechanisms from the AUTH line, upper case.
    pub auth_mechanisms: Vec<String>,
}

impl EsmtpCapabilities {
    /// Parses capabilities from an EHLO reply.
    pub fn from_ehlo_response(response: &SmtpResponse) -> Self {
        let mut caps = Self {
            domain: response.first_message().to_string(),
            ..Self::default()
        };

        for line in response.message.iter().skip(1) {
            let line = line.trim();
            let (keyword, params) = line.split_once(' ').unwrap_or((line, ""));
            let keyword = keyword.to_ascii_uppercase();

            if keyword == "AUTH" {
                caps.auth_mechanisms = params
                    .split_whitespace()
                    .map(|m| m.to_ascii_uppercase())
                    .collect();
            }

            caps.extensions.insert(keyword, params.to_string());
        }

        caps
    }

    /// Returns true if the server advertised the extension.
    pub fn has_extension(&self, name: &str) -> bool {
        self.extensions.contains_key(&name.to_ascii_uppercase())
    }

    /// Returns the parameters of an advertised extension.
    pub fn extension(&self, name: &str) -> Option<&str> {
        self.extensions
            .get(&name.to_ascii_uppercase())
            .map(|s| s.as_str())
    }

    /// Returns true if the server advertised AUTH.
    pub fn has_auth(&self) -> bool {
        self.has_extension("AUTH")
    }

    /// Returns true if the server accepts 8-bit message bodies.
    pub fn eight_bit_mime(&self) -> bool {
        self.has_extension("8BITMIME")
    }

    /// Returns true if the server accepts UTF-8 envelopes.
    pub fn smtputf8(&self) -> bool {
        self.has_extension("SMTPUTF8")
    }
}

/// SMTP transaction state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Greeting read, no EHLO yet.
    Connected,
    /// EHLO/HELO accepted.
    Greeted,
    /// AUTH accepted.
    Authenticated,
    /// MAIL FROM accepted.
    InTransaction,
    /// At least one RCPT TO accepted.
    RecipientsAdded,
    /// DATA accepted, payload being written.
    SendingData,
    /// Message accepted by the server.
    Complete,
    /// Connection closed.
    Closed,
}

impl TransactionState {
    /// Returns true if authentication is allowed in this state.
    pub fn can_authenticate(&self) -> bool {
        matches!(self, TransactionState::Greeted)
    }

    /// Returns true if MAIL FROM is allowed in this state.
    pub fn can_start_mail(&self) -> bool {
        matches!(
            self,
            TransactionState::Greeted | TransactionState::Authenticated
        )
    }

    /// Returns true if RCPT TO is allowed in this state.
    pub fn can_add_recipient(&self) -> bool {
        matches!(
            self,
            TransactionState::InTransaction | TransactionState::RecipientsAdded
        )
    }

    /// Returns true if DATA is allowed in this state.
    pub fn can_send_data(&self) -> bool {
        matches!(self, TransactionState::RecipientsAdded)
    }
}

/// Dot-stuffing encoder for the DATA section.
///
/// Doubles a `.` at the start of a line, turns a bare `\n` into `\r\n`
/// and, on `finish`, terminates the last line and appends `.\r\n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DotStuffer {
    state: DotState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DotState {
    BeginLine,
    Cr,
    Data,
}

impl Default for DotStuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl DotStuffer {
    /// Creates an encoder positioned at the start of a line.
    pub fn new() -> Self {
        Self {
            state: DotState::BeginLine,
        }
    }

    /// Encodes `input`, appending the wire bytes to `out`.
    pub fn encode(&mut self, input: &[u8], out: &mut Vec<u8>) {
        out.reserve(input.len() + input.len() / 64 + 2);
        for &b in input {
            match self.state {
                DotState::BeginLine | DotState::Data => {
                    if self.state == DotState::BeginLine && b == b'.' {
                        out.push(b'.');
                    }
                    self.state = DotState::Data;
                    match b {
                        b'\r' => self.state = DotState::Cr,
                        b'\n' => {
                            out.push(b'\r');
                            self.state = DotState::BeginLine;
                        }
                        _ => {}
                    }
                }
                DotState::Cr => {
                    self.state = if b == b'\n' {
                        DotState::BeginLine
                    } else {
                        DotState::Data
                    };
                }
            }
            out.push(b);
        }
    }

    /// Appends the end-of-data marker, terminating an unfinished line first.
    pub fn finish(&mut self, out: &mut Vec<u8>) {
        match self.state {
            DotState::Data => out.extend_from_slice(b"\r\n"),
            DotState::Cr => out.push(b'\n'),
            DotState::BeginLine => {}
        }
        out.extend_from_slice(b".\r\n");
        self.state = DotState::BeginLine;
    }
}

/// Response codes for common SMTP operations.
pub mod codes {
    /// Service ready.
    pub const SERVICE_READY: u16 = 220;
    /// Service closing.
    pub const SERVICE_CLOSING: u16 = 221;
    /// Authentication successful.
    pub const AUTH_SUCCESS: u16 = 235;
    /// OK.
    pub const OK: u16 = 250;
    /// User not local; will forward.
    pub const WILL_FORWARD: u16 = 251;
    /// Continue (AUTH).
    pub const AUTH_CONTINUE: u16 = 334;
    /// Start mail input.
    pub const START_MAIL_INPUT: u16 = 354;
    /// Service unavailable.
    pub const SERVICE_UNAVAILABLE: u16 = 421;
    /// Authentication failed.
    pub const AUTH_FAILED: u16 = 535;
    /// Mailbox unavailable (permanent).
    pub const MAILBOX_UNAVAILABLE: u16 = 550;
}
