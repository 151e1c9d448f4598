//! SMTP client dialogue.
//!
//! Drives one mail transaction over an established transport:
//! - Greeting and EHLO/HELO
//! - PLAIN authentication when the server advertises AUTH
//! - MAIL FROM, RCPT TO and a dot-stuffed DATA section
//! - QUIT, or a bare close after any failure

use crate::auth::{AuthCredential, ServerInfo};
use crate::errors::{SmtpError, SmtpErrorKind, SmtpResult, SmtpStage};
use crate::protocol::{codes, DotStuffer, EsmtpCapabilities, SmtpCommand, TransactionState};
use crate::transport::SmtpTransport;
use crate::types::Mailbox;

/// SMTP client bound to one transport.
#[derive(Debug)]
pub struct SmtpClient<T: SmtpTransport> {
    /// Underlying transport.
    transport: T,
    /// Name sent with EHLO/HELO.
    local_name: String,
    /// Extensions from the EHLO reply; None after a HELO fallback.
    capabilities: Option<EsmtpCapabilities>,
    /// Dialogue state.
    state: TransactionState,
    /// Set once EHLO or HELO succeeded.
    did_hello: bool,
}

impl<T: SmtpTransport> SmtpClient<T> {
    /// Reads the server greeting, which must be 220.
    ///
    /// The transport is closed if the greeting cannot be read or is refused.
    pub async fn new(mut transport: T, local_name: impl Into<String>) -> SmtpResult<Self> {
        let greeting = match transport.read_response().await {
            Ok(response) if response.code == codes::SERVICE_READY => Ok(response),
            Ok(response) => Err(response.to_error()),
            Err(e) => Err(e),
        };

        if let Err(e) = greeting {
            let _ = transport.close().await;
            return Err(e.at_stage(SmtpStage::Greeting));
        }

        Ok(Self {
            transport,
            local_name: local_name.into(),
            capabilities: None,
            state: TransactionState::Connected,
            did_hello: false,
        })
    }

    /// Returns the current dialogue state.
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Returns the EHLO extension table, if EHLO succeeded.
    pub fn capabilities(&self) -> Option<&EsmtpCapabilities> {
        self.capabilities.as_ref()
    }

    /// Returns the underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Sends EHLO, falling back to HELO if the server rejects it.
    pub async fn hello(&mut self) -> SmtpResult<()> {
        if self.did_hello {
            return Ok(());
        }

        let response = self
            .transport
            .send_command(&SmtpCommand::Ehlo(self.local_name.clone()))
            .await
            .map_err(|e| e.at_stage(SmtpStage::Hello))?;

        if response.code == codes::OK {
            self.capabilities = Some(EsmtpCapabilities::from_ehlo_response(&response));
        } else {
            #[cfg(feature = "tracing")]
            tracing::debug!(code = response.code, "EHLO refused, falling back to HELO");

            let response = self
                .transport
                .send_command(&SmtpCommand::Helo(self.local_name.clone()))
                .await
                .map_err(|e| e.at_stage(SmtpStage::Hello))?;
            if response.code != codes::OK {
                return Err(response.to_error().at_stage(SmtpStage::Hello));
            }
            self.capabilities = None;
        }

        self.did_hello = true;
        self.state = TransactionState::Greeted;
        Ok(())
    }

    /// Reports whether the server advertised `name`, with its parameters.
    pub async fn extension(&mut self, name: &str) -> SmtpResult<Option<String>> {
        self.hello().await?;
        Ok(self
            .capabilities
            .as_ref()
            .and_then(|caps| caps.extension(name))
            .map(str::to_string))
    }

    /// Authenticates with PLAIN.
    pub async fn auth(&mut self, credential: &AuthCredential) -> SmtpResult<()> {
        self.hello().await?;
        if !self.state.can_authenticate() {
            return Err(sequence_error("AUTH", self.state).at_stage(SmtpStage::Auth));
        }

        let mechanisms = self
            .capabilities
            .as_ref()
            .map(|caps| caps.auth_mechanisms.clone())
            .unwrap_or_default();
        let info = ServerInfo {
            name: self.transport.server_name(),
            tls: self.transport.is_tls(),
            mechanisms: &mechanisms,
        };
        let initial_response = credential.start(&info)?;

        let command = SmtpCommand::Auth {
            mechanism: credential.mechanism().to_string(),
            initial_response: Some(initial_response),
        };
        let response = self
            .transport
            .send_command(&command)
            .await
            .map_err(|e| e.at_stage(SmtpStage::Auth))?;

        match response.code {
            codes::AUTH_SUCCESS => {
                self.state = TransactionState::Authenticated;
                Ok(())
            }
            codes::AUTH_CONTINUE => {
                // PLAIN carries everything in the initial response; a challenge aborts.
                let _ = self
                    .transport
                    .send_command(&SmtpCommand::AuthResponse("*".to_string()))
                    .await;
                Err(SmtpError::authentication(format!(
                    "unexpected server challenge: {}",
                    response.first_message()
                ))
                .with_smtp_code(response.code))
            }
            _ => Err(response.to_error().at_stage(SmtpStage::Auth)),
        }
    }

    /// Starts a transaction with MAIL FROM.
    pub async fn mail(&mut self, from: &Mailbox) -> SmtpResult<()> {
        self.hello().await?;
        if !self.state.can_start_mail() {
            return Err(sequence_error("MAIL", self.state).at_stage(SmtpStage::Mail));
        }

        let (body_8bit, smtputf8) = self
            .capabilities
            .as_ref()
            .map(|caps| (caps.eight_bit_mime(), caps.smtputf8()))
            .unwrap_or((false, false));

        let command = SmtpCommand::MailFrom {
            address: from.clone(),
            body_8bit,
            smtputf8,
        };
        let response = self
            .transport
            .send_command(&command)
            .await
            .map_err(|e| e.at_stage(SmtpStage::Mail))?;

        if response.code != codes::OK {
            let mut err = response.to_error();
            if err.kind() == SmtpErrorKind::InvalidRecipientAddress {
                err = err.with_kind(SmtpErrorKind::InvalidFromAddress);
            }
            return Err(err.at_stage(SmtpStage::Mail));
        }

        self.state = TransactionState::InTransaction;
        Ok(())
    }

    /// Adds one recipient; 250 and 251 are accepted.
    pub async fn rcpt(&mut self, to: &Mailbox) -> SmtpResult<()> {
        if !self.state.can_add_recipient() {
            return Err(sequence_error("RCPT", self.state).at_stage(SmtpStage::Rcpt));
        }

        let command = SmtpCommand::RcptTo {
            address: to.clone(),
        };
        let response = self
            .transport
            .send_command(&command)
            .await
            .map_err(|e| e.at_stage(SmtpStage::Rcpt).for_recipient(to.as_str()))?;

        if !matches!(response.code, codes::OK | codes::WILL_FORWARD) {
            return Err(response
                .to_error()
                .at_stage(SmtpStage::Rcpt)
                .for_recipient(to.as_str()));
        }

        self.state = TransactionState::RecipientsAdded;
        Ok(())
    }

    /// Sends DATA and returns a writer for the message content.
    pub async fn data(&mut self) -> SmtpResult<DataWriter<'_, T>> {
        if !self.state.can_send_data() {
            return Err(sequence_error("DATA", self.state).at_stage(SmtpStage::Data));
        }

        let response = self
            .transport
            .send_command(&SmtpCommand::Data)
            .await
            .map_err(|e| e.at_stage(SmtpStage::Data))?;
        if response.code != codes::START_MAIL_INPUT {
            return Err(response.to_error().at_stage(SmtpStage::Data));
        }

        self.state = TransactionState::SendingData;
        Ok(DataWriter {
            client: self,
            stuffer: DotStuffer::new(),
        })
    }

    /// Sends QUIT, expecting 221, and closes the transport either way.
    pub async fn quit(mut self) -> SmtpResult<()> {
        let result = match self.transport.send_command(&SmtpCommand::Quit).await {
            Ok(response) if response.code == codes::SERVICE_CLOSING => Ok(()),
            Ok(response) => Err(response.to_error()),
            Err(e) => Err(e),
        };
        self.state = TransactionState::Closed;
        let _ = self.transport.close().await;
        result.map_err(|e| e.at_stage(SmtpStage::Quit))
    }

    /// Closes the transport without QUIT.
    pub async fn close(mut self) -> SmtpResult<()> {
        self.state = TransactionState::Closed;
        self.transport.close().await
    }

    /// Runs a full transaction and ends the session.
    ///
    /// Authentication is attempted only when a credential is given and the
    /// server advertises AUTH. After a failure the connection is closed
    /// without QUIT and the failure is returned.
    pub async fn send_mail(
        mut self,
        auth: Option<&AuthCredential>,
        from: &Mailbox,
        to: &[Mailbox],
        payload: &[u8],
    ) -> SmtpResult<()> {
        match self.transaction(auth, from, to, payload).await {
            Ok(()) => self.quit().await,
            Err(e) => {
                let _ = self.close().await;
                Err(e)
            }
        }
    }

    async fn transaction(
        &mut self,
        auth: Option<&AuthCredential>,
        from: &Mailbox,
        to: &[Mailbox],
        payload: &[u8],
    ) -> SmtpResult<()> {
        if to.is_empty() {
            return Err(SmtpError::new(
                SmtpErrorKind::NoRecipients,
                "At least one recipient is required",
            ));
        }

        self.hello().await?;

        if let Some(credential) = auth {
            if self.extension("AUTH").await?.is_some() {
                self.auth(credential).await?;
            } else {
                #[cfg(feature = "tracing")]
                tracing::debug!("Server does not advertise AUTH, continuing without it");
            }
        }

        self.mail(from).await?;
        for recipient in to {
            self.rcpt(recipient).await?;
        }

        let mut writer = self.data().await?;
        writer.write(payload).await?;
        writer.close().await
    }
}

/// Writer for the DATA section; content is dot-stuffed on the way out.
#[derive(Debug)]
pub struct DataWriter<'a, T: SmtpTransport> {
    client: &'a mut SmtpClient<T>,
    stuffer: DotStuffer,
}

impl<'a, T: SmtpTransport> DataWriter<'a, T> {
    /// Writes message content.
    pub async fn write(&mut self, content: &[u8]) -> SmtpResult<()> {
        let mut buf = Vec::with_capacity(content.len());
        self.stuffer.encode(content, &mut buf);
        self.client
            .transport
            .send_data(&buf)
            .await
            .map_err(|e| e.at_stage(SmtpStage::Data))
    }

    /// Terminates the content and waits for the server's 250.
    pub async fn close(mut self) -> SmtpResult<()> {
        let mut buf = Vec::with_capacity(5);
        self.stuffer.finish(&mut buf);

        let transport = &mut self.client.transport;
        transport
            .send_data(&buf)
            .await
            .map_err(|e| e.at_stage(SmtpStage::Data))?;
        let response = transport
            .read_response()
            .await
            .map_err(|e| e.at_stage(SmtpStage::Data))?;

        if response.code != codes::OK {
            return Err(response.to_error().at_stage(SmtpStage::Data));
        }

        self.client.state = TransactionState::Complete;
        Ok(())
    }
}

fn sequence_error(verb: &str, state: TransactionState) -> SmtpError {
    SmtpError::new(
        SmtpErrorKind::CommandSequence,
        format!("{} not allowed in state {:?}", verb, state),
    )
}
