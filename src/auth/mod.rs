//! PLAIN authentication (RFC 4616) for SMTP AUTH (RFC 4954).
//!
//! The credential is derived once from the server configuration and bound
//! to the configured host: it refuses to hand its secret to a session whose
//! server name differs, or to one that is not encrypted.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use secrecy::{ExposeSecret, SecretString};
use std::fmt;

use crate::config::ServerConfig;
use crate::errors::{SmtpError, SmtpResult};

/// SASL mechanism name.
pub const PLAIN: &str = "PLAIN";

/// What the credential is told about the session before it starts.
#[derive(Debug, Clone, Copy)]
pub struct ServerInfo<'a> {
    /// Server name the session was dialed with.
    pub name: &'a str,
    /// Whether the session runs over TLS.
    pub tls: bool,
    /// Mechanisms listed on the server's AUTH line.
    pub mechanisms: &'a [String],
}

/// PLAIN credential bound to a server host.
#[derive(Clone)]
pub struct AuthCredential {
    /// Authorization identity; empty means "same as username".
    identity: String,
    /// Authentication identity.
    username: String,
    /// Secret.
    password: SecretString,
    /// Host the credential may be presented to.
    host: String,
}

impl AuthCredential {
    /// Creates a credential from its parts.
    pub fn new(
        identity: impl Into<String>,
        username: impl Into<String>,
        password: SecretString,
        host: impl Into<String>,
    ) -> Self {
        Self {
            identity: identity.into(),
            username: username.into(),
            password,
            host: host.into(),
        }
    }

    /// Derives the PLAIN credential from a server configuration.
    pub fn plain(config: &ServerConfig) -> Self {
        Self::new(
            "",
            config.user.clone(),
            config.password.clone(),
            config.host.clone(),
        )
    }

    /// Returns the SASL mechanism name.
    pub fn mechanism(&self) -> &'static str {
        PLAIN
    }

    /// Returns the authentication identity.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Returns the bound host.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Checks the session and produces the base64 initial response.
    pub fn start(&self, server: &ServerInfo<'_>) -> SmtpResult<String> {
        if !server.tls && !is_localhost(server.name) {
            return Err(SmtpError::authentication("unencrypted connection"));
        }
        if server.name != self.host {
            return Err(SmtpError::authentication(format!(
                "wrong host name: credential is bound to {}, session is with {}",
                self.host, server.name
            )));
        }
        if !server.mechanisms.is_empty()
            && !server.mechanisms.iter().any(|m| m.eq_ignore_ascii_case(PLAIN))
        {
            // Attempted anyway; the server decides.
            #[cfg(feature = "tracing")]
            tracing::warn!(mechanisms = ?server.mechanisms, "Server does not list PLAIN");
        }
        Ok(self.initial_response())
    }

    /// Encodes `identity \0 username \0 password` in base64.
    pub fn initial_response(&self) -> String {
        let response = format!(
            "{}\0{}\0{}",
            self.identity,
            self.username,
            self.password.expose_secret()
        );
        BASE64.encode(response)
    }
}

fn is_localhost(name: &str) -> bool {
    matches!(name, "localhost" | "127.0.0.1" | "::1")
}

impl fmt::Debug for AuthCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthCredential")
            .field("mechanism", &PLAIN)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("host", &self.host)
            .finish()
    }
}
