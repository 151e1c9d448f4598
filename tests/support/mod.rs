//! Scripted implicit-TLS SMTP server for integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use integrations_tls_mailer::{DialOptions, ServerConfig, TlsConfig, TrustStore};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;

/// How the server answers.
#[derive(Debug, Clone)]
pub struct Script {
    /// EHLO lines after the greeting line, e.g. `AUTH PLAIN`.
    pub extensions: Vec<String>,
    /// Reply to AUTH.
    pub auth_reply: u16,
    /// Recipients answered with 550.
    pub rejected_recipients: Vec<String>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            extensions: vec!["AUTH PLAIN".to_string()],
            auth_reply: 235,
            rejected_recipients: Vec::new(),
        }
    }
}

impl Script {
    /// Server that does not offer AUTH.
    pub fn without_auth() -> Self {
        Self {
            extensions: Vec::new(),
            ..Self::default()
        }
    }
}

/// What the server observed on one connection.
#[derive(Debug, Default, Clone)]
pub struct Transcript {
    /// False if the TLS handshake did not complete.
    pub handshake_ok: bool,
    /// Command lines, without CRLF.
    pub commands: Vec<String>,
    /// DATA section as sent, dot-stuffed, without the final `.\r\n`.
    pub raw_data: Vec<u8>,
    /// DATA section with dot-stuffing removed.
    pub data: Vec<u8>,
    /// True if the client closed the connection (EOF or reset).
    pub client_closed: bool,
}

impl Transcript {
    /// Returns the verbs in order.
    pub fn verbs(&self) -> Vec<String> {
        self.commands
            .iter()
            .map(|c| c.split_whitespace().next().unwrap_or("").to_ascii_uppercase())
            .collect()
    }

    /// Returns the command lines starting with `prefix`.
    pub fn lines_starting_with(&self, prefix: &str) -> Vec<&str> {
        self.commands
            .iter()
            .filter(|c| c.starts_with(prefix))
            .map(String::as_str)
            .collect()
    }
}

/// One-connection SMTP server over implicit TLS.
pub struct MockSmtpServer {
    /// Bound address.
    pub addr: SocketAddr,
    /// DER of the self-signed certificate the server presents.
    pub cert_der: Vec<u8>,
    handle: JoinHandle<Transcript>,
}

impl MockSmtpServer {
    /// Binds to a free local port and serves one connection with `script`.
    pub async fn start(script: Script) -> Self {
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let cert_der = cert.serialize_der().unwrap();
        let key_der = cert.serialize_private_key_der();

        let tls_config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(
                vec![CertificateDer::from(cert_der.clone())],
                PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_der)),
            )
            .unwrap();
        let acceptor = TlsAcceptor::from(Arc::new(tls_config));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let mut transcript = Transcript::default();
            let (tcp, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => return transcript,
            };
            let tls = match acceptor.accept(tcp).await {
                Ok(tls) => tls,
                Err(_) => return transcript,
            };
            transcript.handshake_ok = true;
            serve(BufReader::new(tls), &script, &mut transcript).await;
            transcript
        });

        Self {
            addr,
            cert_der,
            handle,
        }
    }

    /// Returns `localhost:<port>`.
    pub fn address(&self) -> String {
        format!("localhost:{}", self.addr.port())
    }

    /// Trust settings that accept only this server's certificate.
    pub fn tls_config(&self) -> TlsConfig {
        TlsConfig::builder()
            .trust_store(TrustStore::Empty)
            .add_root_certificate(self.cert_der.clone())
            .build()
            .unwrap()
    }

    /// Dial options trusting this server.
    pub fn dial_options(&self) -> DialOptions {
        DialOptions {
            connect_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_secs(5),
            tls: self.tls_config(),
            ..DialOptions::default()
        }
    }

    /// Server configuration (`u@x.test` / `p`) trusting this server.
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig::builder()
            .host("localhost")
            .port(self.addr.port())
            .credentials("u@x.test", "p")
            .connect_timeout(Duration::from_secs(5))
            .command_timeout(Duration::from_secs(5))
            .tls(self.tls_config())
            .build()
            .unwrap()
    }

    /// Waits for the connection to end and returns what was observed.
    pub async fn transcript(self) -> Transcript {
        tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("server did not observe the connection closing")
            .unwrap()
    }
}

async fn serve<S>(mut stream: BufReader<S>, script: &Script, transcript: &mut Transcript)
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    if reply(&mut stream, "220 localhost ESMTP test\r\n").await.is_err() {
        return;
    }

    let rejected: HashSet<String> = script
        .rejected_recipients
        .iter()
        .map(|r| format!("RCPT TO:<{}>", r))
        .collect();

    loop {
        let line = match read_line(&mut stream).await {
            Some(line) => line,
            None => {
                transcript.client_closed = true;
                return;
            }
        };
        transcript.commands.push(line.clone());

        let verb = line
            .split_whitespace()
            .next()
            .unwrap_or("")
            .to_ascii_uppercase();

        let response = match verb.as_str() {
            "EHLO" => {
                let mut lines = vec!["localhost".to_string()];
                lines.extend(script.extensions.iter().cloned());
                let last = lines.len() - 1;
                lines
                    .iter()
                    .enumerate()
                    .map(|(i, l)| format!("250{}{}\r\n", if i == last { ' ' } else { '-' }, l))
                    .collect::<String>()
            }
            "HELO" => "250 localhost\r\n".to_string(),
            "AUTH" => format!("{} auth\r\n", script.auth_reply),
            "MAIL" => "250 2.1.0 Ok\r\n".to_string(),
            "RCPT" if rejected.contains(&line) => "550 5.1.1 No such user\r\n".to_string(),
            "RCPT" => "250 2.1.5 Ok\r\n".to_string(),
            "DATA" => {
                if reply(&mut stream, "354 End data with <CR><LF>.<CR><LF>\r\n")
                    .await
                    .is_err()
                {
                    return;
                }
                if !read_data(&mut stream, transcript).await {
                    transcript.client_closed = true;
                    return;
                }
                "250 2.0.0 Ok: queued\r\n".to_string()
            }
            "QUIT" => {
                let _ = reply(&mut stream, "221 2.0.0 Bye\r\n").await;
                transcript.client_closed = matches!(read_line(&mut stream).await, None);
                return;
            }
            _ => "502 5.5.2 Error: command not recognized\r\n".to_string(),
        };

        if reply(&mut stream, &response).await.is_err() {
            return;
        }
    }
}

async fn read_line<S>(stream: &mut BufReader<S>) -> Option<String>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let mut line = String::new();
    match stream.read_line(&mut line).await {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(line.trim_end_matches(['\r', '\n']).to_string()),
    }
}

async fn read_data<S>(stream: &mut BufReader<S>, transcript: &mut Transcript) -> bool
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    loop {
        let mut line = Vec::new();
        match stream.read_until(b'\n', &mut line).await {
            Ok(0) | Err(_) => return false,
            Ok(_) => {}
        }
        if line == b".\r\n" {
            return true;
        }
        transcript.raw_data.extend_from_slice(&line);
        let unstuffed = if line.starts_with(b"..") { &line[1..] } else { &line[..] };
        transcript.data.extend_from_slice(unstuffed);
    }
}

async fn reply<S>(stream: &mut BufReader<S>, text: &str) -> std::io::Result<()>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let writer = stream.get_mut();
    writer.write_all(text.as_bytes()).await?;
    writer.flush().await
}
