//! Mailer and single-use send sessions.
//!
//! A [`Mailer`] holds the server configuration and the credential derived
//! from it. Each message goes through one [`Session`]: prepared with its
//! headers, given a body, then consumed by [`Session::send`].

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::auth::AuthCredential;
use crate::config::ServerConfig;
use crate::envelope::HeaderBlock;
use crate::errors::{SmtpError, SmtpErrorKind, SmtpResult};
use crate::template::TemplateRenderer;
use crate::transport::{send_mail_using_tls_with, DialOptions};
use crate::types::{Mailbox, ServerAddress};

/// Shared entry point for sending templated HTML mail.
#[derive(Debug, Clone)]
pub struct Mailer {
    config: Arc<ServerConfig>,
    credential: AuthCredential,
    renderer: Arc<TemplateRenderer>,
}

impl Mailer {
    /// Validates the configuration and derives the PLAIN credential.
    pub fn configure(config: ServerConfig) -> SmtpResult<Self> {
        config.validate()?;
        let credential = config.auth_credential();

        Ok(Self {
            config: Arc::new(config),
            credential,
            renderer: Arc::new(TemplateRenderer::new()),
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Starts a session for one message to `to`.
    ///
    /// The sender is the configured user.
    pub fn prepare(&self, display_from: &str, to: &str, subject: &str) -> SmtpResult<Session> {
        let from = Mailbox::new(self.config.user.as_str())?;
        let to = Mailbox::new(to)?;
        let header_block = HeaderBlock::build(display_from, from.as_str(), to.as_str(), subject)?;

        Ok(Session {
            config: Arc::clone(&self.config),
            credential: self.credential.clone(),
            renderer: Arc::clone(&self.renderer),
            header_block,
            from,
            to,
            blind_copies: Vec::new(),
            body: None,
        })
    }
}

/// One message on its way out. Not reusable.
#[derive(Debug)]
pub struct Session {
    config: Arc<ServerConfig>,
    credential: AuthCredential,
    renderer: Arc<TemplateRenderer>,
    header_block: HeaderBlock,
    from: Mailbox,
    to: Mailbox,
    blind_copies: Vec<Mailbox>,
    body: Option<Vec<u8>>,
}

impl Session {
    /// Renders the body from a template file.
    pub fn with_template(
        mut self,
        path: impl AsRef<Path>,
        bindings: &HashMap<String, String>,
    ) -> SmtpResult<Self> {
        self.body = Some(self.renderer.render(path, bindings)?);
        Ok(self)
    }

    /// Uses an already rendered body.
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Adds an envelope recipient that does not appear in the headers.
    pub fn blind_copy(mut self, mailbox: &str) -> SmtpResult<Self> {
        self.blind_copies.push(Mailbox::new(mailbox)?);
        Ok(self)
    }

    /// Returns the header block.
    pub fn header_block(&self) -> &HeaderBlock {
        &self.header_block
    }

    /// Returns the full message as it will be handed to DATA, if a body is set.
    pub fn payload(&self) -> Option<Vec<u8>> {
        self.body
            .as_deref()
            .map(|body| self.header_block.with_body(body))
    }

    /// Sends the message and ends the session.
    pub async fn send(self) -> SmtpResult<()> {
        let descriptor = self.into_descriptor()?;
        let to = descriptor.to.clone();

        descriptor.deliver().await?;

        #[cfg(feature = "tracing")]
        tracing::info!(
            to = %to[0],
            recipients = to.len(),
            "Send mail success"
        );
        #[cfg(not(feature = "tracing"))]
        let _ = to;

        Ok(())
    }

    fn into_descriptor(self) -> SmtpResult<SendDescriptor> {
        let body = match self.body {
            Some(body) => body,
            None => {
                let err = SmtpError::new(SmtpErrorKind::MissingBody, "Message body was not set");
                #[cfg(feature = "tracing")]
                tracing::error!(to = %self.to, error = %err, "Mail not sent");
                return Err(err);
            }
        };

        let mut to = Vec::with_capacity(1 + self.blind_copies.len());
        to.push(self.to);
        to.extend(self.blind_copies);

        Ok(SendDescriptor {
            from: self.from,
            to,
            header_block: self.header_block,
            body,
            auth: Some(self.credential),
            server_address: self.config.server_address(),
            options: DialOptions::from(self.config.as_ref()),
        })
    }
}

/// Everything one delivery needs. Consumed by [`SendDescriptor::deliver`].
#[derive(Debug)]
pub struct SendDescriptor {
    /// Envelope sender.
    pub from: Mailbox,
    /// Envelope recipients; the first is the visible one.
    pub to: Vec<Mailbox>,
    /// Headers placed before the body.
    pub header_block: HeaderBlock,
    /// Rendered body.
    pub body: Vec<u8>,
    /// Credential, if the server should be authenticated against.
    pub auth: Option<AuthCredential>,
    /// Server to dial.
    pub server_address: ServerAddress,
    /// Timeouts, EHLO name and trust anchors.
    pub options: DialOptions,
}

impl SendDescriptor {
    /// Delivers `header_block + body` to every recipient.
    pub async fn deliver(self) -> SmtpResult<()> {
        let payload = self.header_block.with_body(&self.body);
        send_mail_using_tls_with(
            &self.options,
            &self.server_address.to_string(),
            self.auth.as_ref(),
            self.from.as_str(),
            &self.to,
            &payload,
        )
        .await
    }
}
