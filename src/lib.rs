//! # Implicit-TLS HTML Mailer
//!
//! Sends templated HTML mail to one visible recipient over SMTP with
//! implicit TLS (port 465):
//! - TLS handshake at connect time, verified against the host trust store
//! - PLAIN authentication, bound to the configured host
//! - Handlebars templates with HTML escaping
//! - One session per message, always closed
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::collections::HashMap;
//! use integrations_tls_mailer::{Mailer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::builder()
//!         .host("smtp.example.com")
//!         .port(465)
//!         .credentials("user@example.com", "password")
//!         .build()?;
//!
//!     let mailer = Mailer::configure(config)?;
//!
//!     let bindings = HashMap::from([("year".to_string(), "2019".to_string())]);
//!     mailer
//!         .prepare("Activity", "recipient@example.com", "Your activity")?
//!         .with_template("templates/activity.html", &bindings)?
//!         .send()
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

// Core modules
pub mod config;
pub mod errors;
pub mod types;

// Protocol layer
pub mod protocol;

// Transport layer
pub mod transport;

// Authentication
pub mod auth;

// Client
pub mod client;

// Message composition
pub mod envelope;
pub mod template;

// Orchestration
pub mod session;

// Mocks for testing
pub mod mocks;

// Re-exports for convenience
pub use auth::AuthCredential;
pub use client::{DataWriter, SmtpClient};
pub use config::{ServerConfig, ServerConfigBuilder, TlsConfig, TlsConfigBuilder, TrustStore};
pub use envelope::HeaderBlock;
pub use errors::{ErrorCategory, SmtpError, SmtpErrorKind, SmtpResult, SmtpStage};
pub use protocol::{EsmtpCapabilities, SmtpCommand, SmtpResponse};
pub use session::{Mailer, SendDescriptor, Session};
pub use template::{render, TemplateRenderer};
pub use transport::{send_mail_using_tls, send_mail_using_tls_with, DialOptions, SmtpTransport};
pub use types::{Mailbox, ServerAddress};
