//! Message header block.
//!
//! The block carries the four fixed fields of an HTML message and the blank
//! line that separates headers from body. Values are written verbatim.

use std::fmt;

use crate::errors::{SmtpError, SmtpErrorKind, SmtpResult};

/// Content type of every message body.
pub const CONTENT_TYPE: &str = "text/html; charset=UTF-8";

/// Pre-rendered header block, `Name: Value\r\n` per field, ending in `\r\n`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderBlock {
    bytes: Vec<u8>,
}

impl HeaderBlock {
    /// Builds the block in the order From, To, Subject, Content-Type.
    ///
    /// `From` is written as `<display_from> <from_mailbox>`.
    pub fn build(
        display_from: &str,
        from_mailbox: &str,
        to_mailbox: &str,
        subject: &str,
    ) -> SmtpResult<Self> {
        let from = format!("{} {}", display_from, from_mailbox);
        let fields = [
            ("From", from.as_str()),
            ("To", to_mailbox),
            ("Subject", subject),
            ("Content-Type", CONTENT_TYPE),
        ];

        let mut block = String::with_capacity(128);
        for (name, value) in fields {
            if value.contains(['\r', '\n']) {
                return Err(SmtpError::new(
                    SmtpErrorKind::InvalidHeader,
                    format!("{} header must not contain CR or LF", name),
                ));
            }
            block.push_str(name);
            block.push_str(": ");
            block.push_str(value);
            block.push_str("\r\n");
        }
        block.push_str("\r\n");

        Ok(Self {
            bytes: block.into_bytes(),
        })
    }

    /// Returns the block as bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consumes the block.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Returns the block followed by `body`.
    pub fn with_body(&self, body: &[u8]) -> Vec<u8> {
        let mut payload = Vec::with_capacity(self.bytes.len() + body.len());
        payload.extend_from_slice(&self.bytes);
        payload.extend_from_slice(body);
        payload
    }
}

impl fmt::Display for HeaderBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_header_block_layout() {
        let block = HeaderBlock::build("Activity", "u@x.test", "a@y.test", "hi").unwrap();
        assert_eq!(
            block.as_bytes(),
            b"From: Activity u@x.test\r\n\
              To: a@y.test\r\n\
              Subject: hi\r\n\
              Content-Type: text/html; charset=UTF-8\r\n\
              \r\n"
        );
    }

    #[test]
    fn test_values_are_verbatim() {
        let block = HeaderBlock::build("Équipe", "u@x.test", "a@y.test", "Résumé: 100% <ok>").unwrap();
        let text = block.to_string();
        assert!(text.contains("Subject: Résumé: 100% <ok>\r\n"));
        assert!(text.starts_with("From: Équipe u@x.test\r\n"));
    }

    #[rstest]
    #[case("Activity\r\nBcc: x@z.test", "a@y.test", "hi")]
    #[case("Activity", "a@y.test\n", "hi")]
    #[case("Activity", "a@y.test", "hi\rthere")]
    fn test_line_breaks_rejected(#[case] display: &str, #[case] to: &str, #[case] subject: &str) {
        let err = HeaderBlock::build(display, "u@x.test", to, subject).unwrap_err();
        assert_eq!(err.kind(), SmtpErrorKind::InvalidHeader);
    }

    #[test]
    fn test_no_bare_line_feed() {
        let block = HeaderBlock::build("A", "u@x.test", "a@y.test", "hi").unwrap();
        let bytes = block.as_bytes();
        for (i, b) in bytes.iter().enumerate() {
            if *b == b'\n' {
                assert_eq!(bytes[i - 1], b'\r');
            }
        }
        assert!(bytes.ends_with(b"\r\n\r\n"));
    }

    #[test]
    fn test_with_body() {
        let block = HeaderBlock::build("A", "u@x.test", "a@y.test", "hi").unwrap();
        let payload = block.with_body(b"<p>2019</p>");
        assert!(payload.starts_with(block.as_bytes()));
        assert!(payload.ends_with(b"\r\n\r\n<p>2019</p>"));
    }
}
