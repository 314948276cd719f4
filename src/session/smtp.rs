//! SMTP session over TCP or implicit TLS.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;

use super::{BodyWriter, Credentials, MailSession, SessionConnector, SessionError};

/// Name announced in EHLO/HELO
const DEFAULT_HELO_NAME: &str = "localhost";

async fn timed<T, F>(limit: Duration, operation: &'static str, fut: F) -> Result<T, SessionError>
where
    F: Future<Output = Result<T, SessionError>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| SessionError::Timeout { operation })?
}

/// Opens SMTP sessions to a fixed server
pub struct SmtpConnector {
    host: String,
    port: u16,
    timeout: Duration,
    helo_name: String,
    tls: Option<TlsConnector>,
}

impl SmtpConnector {
    /// Create a connector. With `tls` set the connection is wrapped in TLS
    /// right after the TCP handshake (SMTPS), verified against the webpki roots.
    pub fn new(host: impl Into<String>, port: u16, tls: bool, timeout: Duration) -> Self {
        let tls = tls.then(|| {
            let mut roots = RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            let config = ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth();
            TlsConnector::from(Arc::new(config))
        });

        Self {
            host: host.into(),
            port,
            timeout,
            helo_name: DEFAULT_HELO_NAME.to_string(),
            tls,
        }
    }

    /// Override the name announced in EHLO
    pub fn with_helo_name(mut self, name: impl Into<String>) -> Self {
        self.helo_name = name.into();
        self
    }
}

#[async_trait]
impl SessionConnector for SmtpConnector {
    async fn connect(&self) -> Result<Box<dyn MailSession>, SessionError> {
        let addr = format!("{}:{}", self.host, self.port);
        let tcp = timed(self.timeout, "connect", async {
            Ok::<_, SessionError>(TcpStream::connect(&addr).await?)
        })
        .await?;

        tracing::debug!(addr = %addr, tls = self.tls.is_some(), "SMTP connection established");

        match &self.tls {
            Some(connector) => {
                let server_name = ServerName::try_from(self.host.clone())
                    .map_err(|e| SessionError::Tls(e.to_string()))?;
                let stream = timed(self.timeout, "TLS handshake", async {
                    connector
                        .connect(server_name, tcp)
                        .await
                        .map_err(|e| SessionError::Tls(e.to_string()))
                })
                .await?;
                let session = SmtpSession::handshake(stream, &self.helo_name, self.timeout).await?;
                Ok(Box::new(session))
            }
            None => {
                let session = SmtpSession::handshake(tcp, &self.helo_name, self.timeout).await?;
                Ok(Box::new(session))
            }
        }
    }

    fn describe(&self) -> String {
        format!("smtp://{}:{}", self.host, self.port)
    }
}

/// Parsed server reply
#[derive(Debug)]
struct Reply {
    code: u16,
    lines: Vec<String>,
}

impl Reply {
    fn expect(self, accepted: &[u16]) -> Result<Reply, SessionError> {
        if accepted.contains(&self.code) {
            Ok(self)
        } else {
            Err(SessionError::Rejected {
                code: self.code,
                message: self.lines.join(" "),
            })
        }
    }
}

/// SMTP session over any byte stream
pub struct SmtpSession<S> {
    stream: BufStream<S>,
    timeout: Duration,
    extensions: Vec<String>,
    /// MAIL accepted but the message was never completed
    in_transaction: bool,
    /// Conversation state unknown after a transport failure or timeout
    broken: bool,
}

impl<S> SmtpSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Read the greeting and introduce ourselves
    pub async fn handshake(stream: S, helo_name: &str, timeout: Duration) -> Result<Self, SessionError> {
        let mut session = Self {
            stream: BufStream::new(stream),
            timeout,
            extensions: Vec::new(),
            in_transaction: false,
            broken: false,
        };

        timed(timeout, "greeting", session.read_reply())
            .await?
            .expect(&[220])?;

        let reply = session.command(&format!("EHLO {}", helo_name), "EHLO").await?;
        if reply.code == 250 {
            session.extensions = reply
                .lines
                .iter()
                .skip(1)
                .map(|line| line.to_ascii_uppercase())
                .collect();
        } else {
            session
                .command(&format!("HELO {}", helo_name), "HELO")
                .await?
                .expect(&[250])?;
        }

        Ok(session)
    }

    /// Whether the server advertised an extension in its EHLO reply
    pub fn supports(&self, extension: &str) -> bool {
        let extension = extension.to_ascii_uppercase();
        self.extensions
            .iter()
            .any(|line| line.split_whitespace().next() == Some(extension.as_str()))
    }

    async fn command(&mut self, line: &str, operation: &'static str) -> Result<Reply, SessionError> {
        if self.broken {
            return Err(SessionError::Protocol(format!(
                "{} not sent, session out of sync after an earlier failure",
                operation
            )));
        }
        let limit = self.timeout;
        let result = timed(limit, operation, self.exchange(line)).await;
        self.track(result)
    }

    /// A rejected command leaves the session usable; anything else does not
    fn track<T>(&mut self, result: Result<T, SessionError>) -> Result<T, SessionError> {
        if let Err(e) = &result {
            if !matches!(e, SessionError::Rejected { .. }) {
                self.broken = true;
            }
        }
        result
    }

    async fn exchange(&mut self, line: &str) -> Result<Reply, SessionError> {
        self.stream.write_all(line.as_bytes()).await?;
        self.stream.write_all(b"\r\n").await?;
        self.stream.flush().await?;
        self.read_reply().await
    }

    async fn read_reply(&mut self) -> Result<Reply, SessionError> {
        let mut lines = Vec::new();

        loop {
            let mut raw = String::new();
            if self.stream.read_line(&mut raw).await? == 0 {
                return Err(SessionError::Protocol(
                    "connection closed by server".to_string(),
                ));
            }

            let line = raw.trim_end_matches(|c: char| c == '\r' || c == '\n');
            let code = line
                .get(..3)
                .and_then(|code| code.parse::<u16>().ok())
                .ok_or_else(|| SessionError::Protocol(format!("malformed reply {:?}", line)))?;
            let more = line.as_bytes().get(3) == Some(&b'-');
            lines.push(line.get(4..).unwrap_or_default().to_string());

            if !more {
                return Ok(Reply { code, lines });
            }
        }
    }
}

fn check_address(address: &str) -> Result<&str, SessionError> {
    if address.contains(['\r', '\n', '<', '>']) {
        return Err(SessionError::Protocol(format!(
            "invalid address {:?}",
            address
        )));
    }
    Ok(address)
}

#[async_trait]
impl<S> MailSession for SmtpSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn authenticate(&mut self, credentials: &Credentials) -> Result<(), SessionError> {
        if credentials.is_empty() {
            return Ok(());
        }
        if !self.supports("AUTH") {
            return Err(SessionError::Protocol(
                "server doesn't support AUTH".to_string(),
            ));
        }

        let token = BASE64.encode(format!(
            "\0{}\0{}",
            credentials.username, credentials.password
        ));
        self.command(&format!("AUTH PLAIN {}", token), "AUTH")
            .await?
            .expect(&[235])?;
        Ok(())
    }

    async fn mail_from(&mut self, address: &str) -> Result<(), SessionError> {
        let address = check_address(address)?;
        if self.in_transaction {
            self.command("RSET", "RSET").await?.expect(&[250])?;
            self.in_transaction = false;
        }
        self.command(&format!("MAIL FROM:<{}>", address), "MAIL")
            .await?
            .expect(&[250])?;
        self.in_transaction = true;
        Ok(())
    }

    async fn rcpt_to(&mut self, address: &str) -> Result<(), SessionError> {
        let address = check_address(address)?;
        self.command(&format!("RCPT TO:<{}>", address), "RCPT")
            .await?
            .expect(&[250, 251])?;
        Ok(())
    }

    async fn data<'a>(&'a mut self) -> Result<Box<dyn BodyWriter + 'a>, SessionError> {
        self.command("DATA", "DATA").await?.expect(&[354])?;
        Ok(Box::new(DataWriter {
            session: self,
            at_line_start: true,
            last_cr: false,
        }))
    }

    async fn quit(&mut self) -> Result<(), SessionError> {
        self.command("QUIT", "QUIT").await?.expect(&[221])?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        let limit = self.timeout;
        timed(limit, "close", async {
            self.stream.shutdown().await?;
            Ok::<_, SessionError>(())
        })
        .await
    }
}

/// DATA body writer: normalizes line endings to CRLF and dot-stuffs lines
struct DataWriter<'a, S> {
    session: &'a mut SmtpSession<S>,
    at_line_start: bool,
    last_cr: bool,
}

impl<S> DataWriter<'_, S> {
    fn encode(&mut self, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(data.len() + data.len() / 32 + 2);
        for &byte in data {
            if self.at_line_start && byte == b'.' {
                out.push(b'.');
            }
            if byte == b'\n' && !self.last_cr {
                out.push(b'\r');
            }
            out.push(byte);
            self.last_cr = byte == b'\r';
            self.at_line_start = byte == b'\n';
        }
        out
    }
}

#[async_trait]
impl<'a, S> BodyWriter for DataWriter<'a, S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn write_all(&mut self, data: &[u8]) -> Result<(), SessionError> {
        let encoded = self.encode(data);
        let limit = self.session.timeout;
        let result = timed(limit, "DATA write", async {
            self.session.stream.write_all(&encoded).await?;
            Ok::<_, SessionError>(())
        })
        .await;
        self.session.track(result)
    }

    async fn finish(self: Box<Self>) -> Result<(), SessionError> {
        let terminator: &[u8] = if self.at_line_start {
            b".\r\n"
        } else {
            b"\r\n.\r\n"
        };
        let session = self.session;
        let limit = session.timeout;

        let result = timed(limit, "DATA end", async {
            session.stream.write_all(terminator).await?;
            session.stream.flush().await?;
            session.read_reply().await
        })
        .await;
        let reply = session.track(result)?;

        // Any final reply ends the transaction
        session.in_transaction = false;
        reply.expect(&[250])?;
        Ok(())
    }
}
