//! Mail session capability.
//!
//! A session is one logical connection to a mail server. The dispatcher drives
//! it through authenticate, then per message `MAIL`/`RCPT`/`DATA`, then
//! `QUIT` and close. Implementations:
//! - [`SmtpConnector`]: real SMTP over TCP, optionally wrapped in TLS
//! - [`RecordingConnector`]: in-memory session used by tests and dry runs

mod recording;
mod smtp;

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

pub use recording::{FailurePlan, RecordingConnector, Transcript};
pub use smtp::{SmtpConnector, SmtpSession};

/// Session-level error type
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{operation} timed out")]
    Timeout { operation: &'static str },

    #[error("unexpected server reply {code}: {message}")]
    Rejected { code: u16, message: String },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("tls error: {0}")]
    Tls(String),

    #[error("{0}")]
    Other(String),
}

/// Authentication credentials for the mail server
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// No username means the server accepts unauthenticated submission
    pub fn is_empty(&self) -> bool {
        self.username.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Writer for one message body; must be finished explicitly
#[async_trait]
pub trait BodyWriter: Send {
    async fn write_all(&mut self, data: &[u8]) -> Result<(), SessionError>;

    /// Complete the body. Dropping the writer without finishing leaves the
    /// session in an undefined state.
    async fn finish(self: Box<Self>) -> Result<(), SessionError>;
}

/// One logical connection to a mail server
#[async_trait]
pub trait MailSession: Send {
    async fn authenticate(&mut self, credentials: &Credentials) -> Result<(), SessionError>;

    /// Declare the envelope sender
    async fn mail_from(&mut self, address: &str) -> Result<(), SessionError>;

    /// Declare the envelope recipient
    async fn rcpt_to(&mut self, address: &str) -> Result<(), SessionError>;

    /// Start the message body
    async fn data<'a>(&'a mut self) -> Result<Box<dyn BodyWriter + 'a>, SessionError>;

    /// Orderly termination request
    async fn quit(&mut self) -> Result<(), SessionError>;

    /// Unconditional release of the connection
    async fn close(&mut self) -> Result<(), SessionError>;
}

/// Opens mail sessions; one session per batch
#[async_trait]
pub trait SessionConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn MailSession>, SessionError>;

    /// Human readable target, for logs
    fn describe(&self) -> String;
}
