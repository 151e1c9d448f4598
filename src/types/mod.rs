//! Core value types.
//!
//! This module provides:
//! - `Mailbox`, a bare address as used by MAIL FROM / RCPT TO
//! - `ServerAddress`, the parsed `host:port` dial target

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::{SmtpError, SmtpErrorKind, SmtpResult};

/// Maximum mailbox length (RFC 5321 path limit minus the angle brackets).
const MAX_MAILBOX_LEN: usize = 254;

/// A bare mailbox without display name (e.g., "john@example.com").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Mailbox(String);

impl Mailbox {
    /// Creates a mailbox, rejecting values that cannot be placed on an SMTP command line.
    pub fn new(address: impl Into<String>) -> SmtpResult<Self> {
        let address = address.into();
        Self::validate(&address)?;
        Ok(Self(address))
    }

    fn validate(address: &str) -> SmtpResult<()> {
        if address.is_empty() {
            return Err(SmtpError::new(
                SmtpErrorKind::InvalidMailbox,
                "Mailbox cannot be empty",
            ));
        }

        if address.len() > MAX_MAILBOX_LEN {
            return Err(SmtpError::new(
                SmtpErrorKind::InvalidMailbox,
                format!("Mailbox too long (max {} characters)", MAX_MAILBOX_LEN),
            ));
        }

        // A CR or LF would let the caller inject extra SMTP commands.
        if address.contains(['\r', '\n']) {
            return Err(SmtpError::new(
                SmtpErrorKind::InvalidMailbox,
                "A line must not contain CR or LF",
            ));
        }

        if address.contains(['<', '>']) {
            return Err(SmtpError::new(
                SmtpErrorKind::InvalidMailbox,
                format!("Mailbox must be bare, without angle brackets: {}", address),
            ));
        }

        Ok(())
    }

    /// Returns the address.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Formats the mailbox as an SMTP path for MAIL FROM / RCPT TO.
    pub fn to_smtp(&self) -> String {
        format!("<{}>", self.0)
    }
}

impl fmt::Display for Mailbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Mailbox {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Mailbox {
    type Error = SmtpError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Mailbox::new(s)
    }
}

impl TryFrom<&str> for Mailbox {
    type Error = SmtpError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Mailbox::new(s)
    }
}

impl From<Mailbox> for String {
    fn from(mailbox: Mailbox) -> Self {
        mailbox.0
    }
}

/// Dial target of an implicit-TLS SMTP server.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerAddress {
    /// Host name (TLS server name) or IP address.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl ServerAddress {
    /// Creates an address from its parts.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parses a `host:port` string. IPv6 hosts must be bracketed (`[::1]:465`).
    pub fn parse(s: &str) -> SmtpResult<Self> {
        let invalid = |reason: &str| {
            SmtpError::new(
                SmtpErrorKind::InvalidAddress,
                format!("{}: {:?}", reason, s),
            )
        };

        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| invalid("missing port in address"))?;

        let host = match host.strip_prefix('[') {
            Some(rest) => rest
                .strip_suffix(']')
                .ok_or_else(|| invalid("unterminated IPv6 host"))?,
            None if host.contains(':') => return Err(invalid("too many colons in address")),
            None => host,
        };

        if host.is_empty() {
            return Err(invalid("missing host in address"));
        }

        let port = port
            .parse::<u16>()
            .map_err(|_| invalid("invalid port in address"))?;

        Ok(Self::new(host, port))
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for ServerAddress {
    type Err = SmtpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ServerAddress::parse(s)
    }
}
