//! In-memory mail session.
//!
//! Records every command it receives instead of talking to a server. A
//! [`FailurePlan`] makes individual operations fail, which is how batch
//! failure handling is exercised. With `log_messages` set it doubles as the
//! dry-run transport of the binary.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use super::{BodyWriter, Credentials, MailSession, SessionConnector, SessionError};

/// Which operations should fail
#[derive(Debug, Clone, Default)]
pub struct FailurePlan {
    pub connect: bool,
    pub auth: bool,
    pub mail: bool,
    pub rcpt: bool,
    pub data: bool,
    pub write: bool,
    pub quit: bool,
    pub close: bool,
}

/// Everything the recording sessions have seen so far
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    pub connects: usize,
    pub auths: usize,
    pub mail_from: Vec<String>,
    pub rcpt_to: Vec<String>,
    pub bodies: Vec<String>,
    pub quits: usize,
    pub closes: usize,
}

impl Transcript {
    /// Last sender declared, empty if none
    pub fn last_mail_from(&self) -> &str {
        self.mail_from.last().map(String::as_str).unwrap_or_default()
    }

    /// Last recipient declared, empty if none
    pub fn last_rcpt_to(&self) -> &str {
        self.rcpt_to.last().map(String::as_str).unwrap_or_default()
    }

    /// All finished bodies, concatenated
    pub fn joined_bodies(&self) -> String {
        self.bodies.concat()
    }
}

/// Shared state between the connector and the sessions it opens
#[derive(Debug, Default)]
struct Shared {
    transcript: Mutex<Transcript>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Transcript> {
        self.transcript
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Connector producing recording sessions
#[derive(Debug, Clone, Default)]
pub struct RecordingConnector {
    shared: Arc<Shared>,
    failures: FailurePlan,
    log_messages: bool,
}

impl RecordingConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a connector whose sessions fail as described by `failures`
    pub fn failing(failures: FailurePlan) -> Self {
        Self {
            failures,
            ..Self::default()
        }
    }

    /// Log each finished message at info level
    pub fn with_message_logging(mut self) -> Self {
        self.log_messages = true;
        self
    }

    /// Snapshot of everything recorded so far
    pub fn transcript(&self) -> Transcript {
        self.shared.lock().clone()
    }
}

#[async_trait]
impl SessionConnector for RecordingConnector {
    async fn connect(&self) -> Result<Box<dyn MailSession>, SessionError> {
        if self.failures.connect {
            return Err(SessionError::Other("failed to connect".to_string()));
        }
        self.shared.lock().connects += 1;

        Ok(Box::new(RecordingSession {
            shared: self.shared.clone(),
            failures: self.failures.clone(),
            log_messages: self.log_messages,
            recipient: String::new(),
        }))
    }

    fn describe(&self) -> String {
        "recording session".to_string()
    }
}

/// Session that records commands into the shared transcript
pub struct RecordingSession {
    shared: Arc<Shared>,
    failures: FailurePlan,
    log_messages: bool,
    recipient: String,
}

#[async_trait]
impl MailSession for RecordingSession {
    async fn authenticate(&mut self, _credentials: &Credentials) -> Result<(), SessionError> {
        self.shared.lock().auths += 1;
        if self.failures.auth {
            return Err(SessionError::Other("failed to authenticate".to_string()));
        }
        Ok(())
    }

    async fn mail_from(&mut self, address: &str) -> Result<(), SessionError> {
        self.shared.lock().mail_from.push(address.to_string());
        if self.failures.mail {
            return Err(SessionError::Other("failed to verify sender".to_string()));
        }
        Ok(())
    }

    async fn rcpt_to(&mut self, address: &str) -> Result<(), SessionError> {
        self.shared.lock().rcpt_to.push(address.to_string());
        self.recipient = address.to_string();
        if self.failures.rcpt {
            return Err(SessionError::Other("failed to verify receiver".to_string()));
        }
        Ok(())
    }

    async fn data<'a>(&'a mut self) -> Result<Box<dyn BodyWriter + 'a>, SessionError> {
        if self.failures.data {
            return Err(SessionError::Other("failed to send".to_string()));
        }
        Ok(Box::new(RecordingBody {
            session: self,
            buffer: Vec::new(),
        }))
    }

    async fn quit(&mut self) -> Result<(), SessionError> {
        self.shared.lock().quits += 1;
        if self.failures.quit {
            return Err(SessionError::Other("failed to quit".to_string()));
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        self.shared.lock().closes += 1;
        if self.failures.close {
            return Err(SessionError::Other("failed to close".to_string()));
        }
        Ok(())
    }
}

struct RecordingBody<'a> {
    session: &'a mut RecordingSession,
    buffer: Vec<u8>,
}

#[async_trait]
impl<'a> BodyWriter for RecordingBody<'a> {
    async fn write_all(&mut self, data: &[u8]) -> Result<(), SessionError> {
        if self.session.failures.write {
            return Err(SessionError::Other("failed to write".to_string()));
        }
        self.buffer.extend_from_slice(data);
        Ok(())
    }

    async fn finish(self: Box<Self>) -> Result<(), SessionError> {
        let body = String::from_utf8_lossy(&self.buffer).into_owned();
        if self.session.log_messages {
            tracing::info!(
                recipient = %self.session.recipient,
                bytes = body.len(),
                body = %body,
                "Dry run: message not sent"
            );
        }
        self.session.shared.lock().bodies.push(body);
        Ok(())
    }
}
