use std::fmt;

use thiserror::Error;

use crate::session::SessionError;
use crate::template::TemplateError;

/// Errors surfaced by the notifier: construction, submission and batch delivery
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("can't parse message template: {0}")]
    MessageTemplate(TemplateError),

    #[error("can't parse verification template: {0}")]
    VerificationTemplate(TemplateError),

    #[error("error executing template to build message from request: {0}")]
    RenderMessage(TemplateError),

    #[error("error executing template to build verifying message from request: {0}")]
    RenderVerification(TemplateError),

    #[error("{0} template is not available")]
    TemplateUnavailable(&'static str),

    #[error("sending message to {destination:?} aborted due to cancellation")]
    Cancelled { destination: String },

    #[error("no mail session connector configured")]
    NoSession,

    #[error("can't open mail session: {0}")]
    Connect(#[source] SessionError),

    #[error("can't authenticate mail session: {0}")]
    Auth(#[source] SessionError),

    #[error("problems with sending messages: {0}")]
    Delivery(DeliveryErrors),
}

impl NotifyError {
    /// Whether the error was caused by cancellation rather than a failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, NotifyError::Cancelled { .. })
    }
}

/// A single failure recorded while delivering a batch
#[derive(Error, Debug)]
pub enum SendError {
    #[error("can't send message to {to}: bad from address {from:?}: {source}")]
    Sender {
        to: String,
        from: String,
        source: SessionError,
    },

    #[error("can't send message to {to}: bad to address {to:?}: {source}")]
    Recipient { to: String, source: SessionError },

    #[error("can't send message to {to}: can't make email writer: {source}")]
    Writer { to: String, source: SessionError },

    #[error("can't send message to {to}: can't write message body: {source}")]
    Body { to: String, source: SessionError },

    #[error("can't send message to {to}: can't close email writer: {source}")]
    Finish { to: String, source: SessionError },

    #[error("can't close mail session: {source}")]
    Teardown { source: SessionError },
}

impl SendError {
    /// Destination of the failed message, `None` for session teardown failures
    pub fn destination(&self) -> Option<&str> {
        match self {
            SendError::Sender { to, .. }
            | SendError::Recipient { to, .. }
            | SendError::Writer { to, .. }
            | SendError::Body { to, .. }
            | SendError::Finish { to, .. } => Some(to),
            SendError::Teardown { .. } => None,
        }
    }
}

/// All failures recorded for one batch
#[derive(Debug, Default)]
pub struct DeliveryErrors {
    failures: Vec<SendError>,
}

impl DeliveryErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, failure: SendError) {
        self.failures.push(failure);
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn failures(&self) -> &[SendError] {
        &self.failures
    }

    /// `Ok(())` when nothing failed, the aggregated error otherwise
    pub fn into_result(self) -> std::result::Result<(), NotifyError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(NotifyError::Delivery(self))
        }
    }
}

impl fmt::Display for DeliveryErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.failures.len() {
            1 => write!(f, "1 error occurred:")?,
            n => write!(f, "{} errors occurred:", n)?,
        }
        for failure in &self.failures {
            write!(f, "\n\t* {}", failure)?;
        }
        Ok(())
    }
}

impl std::error::Error for DeliveryErrors {}

/// Errors from the binary's startup path
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Can't read template file {path}: {source}")]
    TemplateFile {
        path: String,
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, AppError>;
