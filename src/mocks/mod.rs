//! Mock implementations for testing.
//!
//! Provides a scripted transport and canned replies for driving the client
//! without a network.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::errors::{SmtpError, SmtpResult};
use crate::protocol::{codes, SmtpCommand, SmtpResponse};
use crate::transport::SmtpTransport;

/// Mock SMTP transport for testing.
///
/// Clones share their recorders and script, so a test can keep a handle
/// after moving the transport into a client.
#[derive(Debug, Clone)]
pub struct MockTransport {
    /// Recorded commands.
    commands: Arc<Mutex<Vec<SmtpCommand>>>,
    /// Queued responses.
    responses: Arc<Mutex<VecDeque<SmtpResponse>>>,
    /// Default response.
    default_response: SmtpResponse,
    /// TLS enabled.
    tls_enabled: bool,
    /// Name reported as the dialed server.
    server_name: String,
    /// Data received.
    data_received: Arc<Mutex<Vec<Vec<u8>>>>,
    /// Simulate failure.
    fail_next: Arc<Mutex<Option<SmtpError>>>,
    /// Set by close.
    closed: Arc<Mutex<bool>>,
}

impl MockTransport {
    /// Creates a new mock transport.
    pub fn new() -> Self {
        Self {
            commands: Arc::new(Mutex::new(Vec::new())),
            responses: Arc::new(Mutex::new(VecDeque::new())),
            default_response: SmtpResponse::new(codes::OK, "OK"),
            tls_enabled: false,
            server_name: "localhost".to_string(),
            data_received: Arc::new(Mutex::new(Vec::new())),
            fail_next: Arc::new(Mutex::new(None)),
            closed: Arc::new(Mutex::new(false)),
        }
    }

    /// Queues a response.
    pub fn queue_response(&self, response: SmtpResponse) -> &Self {
        self.responses.lock().unwrap().push_back(response);
        self
    }

    /// Queues an OK response.
    pub fn queue_ok(&self) -> &Self {
        self.queue_response(SmtpResponse::new(codes::OK, "OK"))
    }

    /// Queues an error response; an enhanced code at the start of `message` is parsed.
    pub fn queue_error(&self, code: u16, message: &str) -> &Self {
        let response = SmtpResponse::parse(&[format!("{} {}", code, message)])
            .unwrap_or_else(|_| SmtpResponse::new(code, message));
        self.queue_response(response)
    }

    /// Sets the next call to fail.
    pub fn fail_next_with(&self, error: SmtpError) -> &Self {
        *self.fail_next.lock().unwrap() = Some(error);
        self
    }

    /// Sets TLS enabled.
    pub fn set_tls_enabled(&mut self, enabled: bool) {
        self.tls_enabled = enabled;
    }

    /// Sets the reported server name.
    pub fn set_server_name(&mut self, name: impl Into<String>) {
        self.server_name = name.into();
    }

    /// Returns recorded commands.
    pub fn recorded_commands(&self) -> Vec<SmtpCommand> {
        self.commands.lock().unwrap().clone()
    }

    /// Returns received data.
    pub fn received_data(&self) -> Vec<Vec<u8>> {
        self.data_received.lock().unwrap().clone()
    }

    /// Returns true once close was called.
    pub fn is_closed(&self) -> bool {
        *self.closed.lock().unwrap()
    }

    /// Clears recorded data.
    pub fn clear(&self) {
        self.commands.lock().unwrap().clear();
        self.responses.lock().unwrap().clear();
        self.data_received.lock().unwrap().clear();
        *self.fail_next.lock().unwrap() = None;
    }

    fn get_next_response(&self) -> SmtpResponse {
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.default_response.clone())
    }

    fn take_failure(&self) -> SmtpResult<()> {
        match self.fail_next.lock().unwrap().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SmtpTransport for MockTransport {
    async fn send_command(&mut self, command: &SmtpCommand) -> SmtpResult<SmtpResponse> {
        self.take_failure()?;
        self.commands.lock().unwrap().push(command.clone());
        Ok(self.get_next_response())
    }

    async fn send_data(&mut self, data: &[u8]) -> SmtpResult<()> {
        self.take_failure()?;
        self.data_received.lock().unwrap().push(data.to_vec());
        Ok(())
    }

    async fn read_response(&mut self) -> SmtpResult<SmtpResponse> {
        self.take_failure()?;
        Ok(self.get_next_response())
    }

    fn is_tls(&self) -> bool {
        self.tls_enabled
    }

    fn server_name(&self) -> &str {
        &self.server_name
    }

    async fn close(&mut self) -> SmtpResult<()> {
        *self.closed.lock().unwrap() = true;
        Ok(())
    }
}

/// Creates an EHLO response with standard capabilities.
pub fn ehlo_response() -> SmtpResponse {
    SmtpResponse {
        code: codes::OK,
        enhanced_code: None,
        message: vec![
            "smtp.x.test Hello".to_string(),
            "SIZE 10485760".to_string(),
            "AUTH PLAIN LOGIN".to_string(),
            "8BITMIME".to_string(),
            "ENHANCEDSTATUSCODES".to_string(),
        ],
        is_multiline: true,
    }
}

/// Creates a greeting response.
pub fn greeting_response() -> SmtpResponse {
    SmtpResponse::new(codes::SERVICE_READY, "smtp.x.test ESMTP ready")
}

/// Creates an authentication success response.
pub fn auth_success_response() -> SmtpResponse {
    SmtpResponse::new(codes::AUTH_SUCCESS, "Authentication successful")
}

/// Creates a DATA ready response.
pub fn data_ready_response() -> SmtpResponse {
    SmtpResponse::new(codes::START_MAIL_INPUT, "Start mail input")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SmtpErrorKind;

    #[tokio::test]
    async fn test_mock_transport() {
        let mut transport = MockTransport::new();

        transport.queue_ok();
        transport.queue_error(550, "5.1.1 No such user");

        let response = transport
            .send_command(&SmtpCommand::Ehlo("test".to_string()))
            .await
            .unwrap();
        assert_eq!(response.code, 250);

        let response = transport.send_command(&SmtpCommand::Quit).await.unwrap();
        assert_eq!(response.code, 550);
        assert!(response.enhanced_code.is_some());

        assert_eq!(transport.recorded_commands().len(), 2);
    }

    #[tokio::test]
    async fn test_mock_transport_failure() {
        let mut transport = MockTransport::new();

        transport.fail_next_with(SmtpError::new(SmtpErrorKind::ConnectionReset, "Test failure"));

        assert!(transport.send_command(&SmtpCommand::Quit).await.is_err());
        assert!(transport.send_command(&SmtpCommand::Quit).await.is_ok());
    }

    #[tokio::test]
    async fn test_clones_share_recorders() {
        let mut transport = MockTransport::new();
        let handle = transport.clone();

        transport.send_data(b"abc").await.unwrap();
        transport.close().await.unwrap();

        assert_eq!(handle.received_data(), vec![b"abc".to_vec()]);
        assert!(handle.is_closed());
    }
}
