//! Configuration types for the mailer.
//!
//! Provides `ServerConfig` with a builder for:
//! - Server connection settings (host, port, timeouts)
//! - PLAIN credentials
//! - TLS trust anchors

use std::path::PathBuf;
use std::time::Duration;

use rustls::pki_types::CertificateDer;
use secrecy::SecretString;
use serde::{Deserialize, Deserializer, Serialize};

use crate::auth::AuthCredential;
use crate::errors::{SmtpError, SmtpResult};
use crate::types::{Mailbox, ServerAddress};

/// Default implicit-TLS submission port.
pub const DEFAULT_PORT: u16 = 465;

/// Default timeout for TCP connect plus TLS handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout for each command write and reply read.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Default EHLO identity.
pub const DEFAULT_CLIENT_ID: &str = "localhost";

/// Source of trust anchors for server certificate verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustStore {
    /// Certificates from the host's platform store.
    #[default]
    Native,
    /// Mozilla's root program, compiled in.
    WebPki,
    /// No built-in anchors; only explicitly added roots are trusted.
    Empty,
}

/// TLS configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Built-in trust anchors.
    #[serde(default)]
    pub trust_store: TrustStore,
    /// Path to an additional PEM bundle of CA certificates.
    #[serde(default)]
    pub ca_cert_path: Option<PathBuf>,
    /// Additional DER-encoded root certificates.
    #[serde(skip)]
    pub root_certificates: Vec<CertificateDer<'static>>,
}

impl TlsConfig {
    /// Creates a new TLS config builder.
    pub fn builder() -> TlsConfigBuilder {
        TlsConfigBuilder::default()
    }

    /// Validates the TLS configuration.
    pub fn validate(&self) -> SmtpResult<()> {
        if self.trust_store == TrustStore::Empty
            && self.ca_cert_path.is_none()
            && self.root_certificates.is_empty()
        {
            return Err(SmtpError::configuration(
                "Empty trust store without any additional root certificate",
            ));
        }
        Ok(())
    }
}

/// Builder for TLS configuration.
#[derive(Debug, Default)]
pub struct TlsConfigBuilder {
    config: TlsConfig,
}

impl TlsConfigBuilder {
    /// Sets the built-in trust anchors.
    pub fn trust_store(mut self, store: TrustStore) -> Self {
        self.config.trust_store = store;
        self
    }

    /// Sets the CA certificate bundle path.
    pub fn ca_cert_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.ca_cert_path = Some(path.into());
        self
    }

    /// Adds a DER-encoded root certificate.
    pub fn add_root_certificate(mut self, der: impl Into<Vec<u8>>) -> Self {
        self.config
            .root_certificates
            .push(CertificateDer::from(der.into()));
        self
    }

    /// Builds the TLS configuration.
    pub fn build(self) -> SmtpResult<TlsConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// SMTP server configuration: identity, secret and dial target.
///
/// The user doubles as the MAIL FROM mailbox of every send.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Login identity and sender mailbox.
    #[serde(alias = "User")]
    pub user: String,
    /// PLAIN secret (never serialized).
    #[serde(
        alias = "Passwd",
        skip_serializing,
        deserialize_with = "deserialize_secret"
    )]
    pub password: SecretString,
    /// Server host name, also used as TLS server name.
    #[serde(alias = "Host")]
    pub host: String,
    /// Server port (implicit TLS).
    #[serde(alias = "Port", default = "default_port")]
    pub port: u16,
    /// TCP connect plus TLS handshake timeout.
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Per-command timeout.
    #[serde(default = "default_command_timeout", with = "humantime_serde")]
    pub command_timeout: Duration,
    /// Client identifier for EHLO.
    #[serde(default)]
    pub client_id: Option<String>,
    /// TLS configuration.
    #[serde(default)]
    pub tls: TlsConfig,
}

fn default_port() -> u16 { DEFAULT_PORT }
fn default_connect_timeout() -> Duration { DEFAULT_CONNECT_TIMEOUT }
fn default_command_timeout() -> Duration { DEFAULT_COMMAND_TIMEOUT }

fn deserialize_secret<'de, D>(deserializer: D) -> Result<SecretString, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    Ok(SecretString::new(s))
}

impl ServerConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SmtpResult<()> {
        if self.host.is_empty() {
            return Err(SmtpError::configuration("Host is required"));
        }

        if self.port == 0 {
            return Err(SmtpError::configuration("Port must be non-zero"));
        }

        Mailbox::new(self.user.as_str())?;

        if self.connect_timeout.is_zero() || self.command_timeout.is_zero() {
            return Err(SmtpError::configuration("Timeouts must be non-zero"));
        }

        self.tls.validate()?;

        Ok(())
    }

    /// Returns the dial target `host:port`.
    pub fn address(&self) -> String {
        self.server_address().to_string()
    }

    /// Returns the parsed dial target.
    pub fn server_address(&self) -> ServerAddress {
        ServerAddress::new(self.host.clone(), self.port)
    }

    /// Returns the client identifier for EHLO.
    pub fn client_id(&self) -> &str {
        self.client_id.as_deref().unwrap_or(DEFAULT_CLIENT_ID)
    }

    /// Derives the PLAIN credential bound to this server.
    pub fn auth_credential(&self) -> AuthCredential {
        AuthCredential::plain(self)
    }
}

/// Builder for server configuration.
#[derive(Debug, Default)]
pub struct ServerConfigBuilder {
    user: Option<String>,
    password: Option<SecretString>,
    host: Option<String>,
    port: u16,
    connect_timeout: Duration,
    command_timeout: Duration,
    client_id: Option<String>,
    tls: TlsConfig,
}

impl ServerConfigBuilder {
    /// Sets the SMTP server host.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Sets the SMTP server port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets both user and password.
    pub fn credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self.password = Some(SecretString::new(password.into()));
        self
    }

    /// Sets the user.
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Sets the password.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(SecretString::new(password.into()));
        self
    }

    /// Sets connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets command timeout.
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Sets the client identifier for EHLO.
    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = Some(id.into());
        self
    }

    /// Sets the TLS configuration.
    pub fn tls(mut self, config: TlsConfig) -> Self {
        self.tls = config;
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> SmtpResult<ServerConfig> {
        let config = ServerConfig {
            user: self.user.ok_or_else(|| SmtpError::configuration("User is required"))?,
            password: self
                .password
                .ok_or_else(|| SmtpError::configuration("Password is required"))?,
            host: self.host.ok_or_else(|| SmtpError::configuration("Host is required"))?,
            port: if self.port == 0 { DEFAULT_PORT } else { self.port },
            connect_timeout: if self.connect_timeout.is_zero() {
                DEFAULT_CONNECT_TIMEOUT
            } else {
                self.connect_timeout
            },
            command_timeout: if self.command_timeout.is_zero() {
                DEFAULT_COMMAND_TIMEOUT
            } else {
                self.command_timeout
            },
            client_id: self.client_id,
            tls: self.tls,
        };

        config.validate()?;
        Ok(config)
    }
}

// Humantime serde support
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_config_builder() {
        let config = ServerConfig::builder()
            .host("smtp.x.test")
            .port(465)
            .credentials("u@x.test", "p")
            .build()
            .unwrap();

        assert_eq!(config.host, "smtp.x.test");
        assert_eq!(config.port, 465);
        assert_eq!(config.user, "u@x.test");
        assert_eq!(config.password.expose_secret(), "p");
        assert_eq!(config.address(), "smtp.x.test:465");
    }

    #[test]
    fn test_config_defaults() {
        let config = ServerConfig::builder()
            .host("smtp.x.test")
            .credentials("u@x.test", "p")
            .build()
            .unwrap();

        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
        assert_eq!(config.command_timeout, DEFAULT_COMMAND_TIMEOUT);
        assert_eq!(config.client_id(), "localhost");
        assert_eq!(config.tls.trust_store, TrustStore::Native);
    }

    #[test]
    fn test_config_validation() {
        // Missing host
        assert!(ServerConfig::builder().credentials("u@x.test", "p").build().is_err());

        // Missing password
        assert!(ServerConfig::builder().host("smtp.x.test").user("u@x.test").build().is_err());

        // User is not a usable mailbox
        assert!(ServerConfig::builder()
            .host("smtp.x.test")
            .credentials("u@x.test\r\n", "p")
            .build()
            .is_err());
    }

    #[test]
    fn test_config_deserialize_capitalized_keys() {
        let json = r#"{"User": "u@x.test", "Passwd": "p", "Host": "smtp.x.test", "Port": 465}"#;
        let config: ServerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.user, "u@x.test");
        assert_eq!(config.password.expose_secret(), "p");
        assert_eq!(config.host, "smtp.x.test");
        assert_eq!(config.port, 465);
        assert_eq!(config.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
    }

    #[test]
    fn test_config_deserialize_timeouts() {
        let json = r#"{
            "user": "u@x.test",
            "password": "p",
            "host": "smtp.x.test",
            "connect_timeout": "10s",
            "command_timeout": "1m",
            "tls": {"trust_store": "web_pki"}
        }"#;
        let config: ServerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.command_timeout, Duration::from_secs(60));
        assert_eq!(config.tls.trust_store, TrustStore::WebPki);
    }

    #[test]
    fn test_password_never_serialized() {
        let config = ServerConfig::builder()
            .host("smtp.x.test")
            .credentials("u@x.test", "hunter2")
            .build()
            .unwrap();
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("hunter2"));
        assert!(!format!("{:?}", config).contains("hunter2"));
    }

    #[test]
    fn test_tls_config_empty_store_requires_roots() {
        assert!(TlsConfig::builder().trust_store(TrustStore::Empty).build().is_err());
        let tls = TlsConfig::builder()
            .trust_store(TrustStore::Empty)
            .add_root_certificate(vec![0x30, 0x00])
            .build()
            .unwrap();
        assert_eq!(tls.root_certificates.len(), 1);
    }
}
