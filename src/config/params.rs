use std::fmt;
use std::time::Duration;

use crate::render::{DEFAULT_MESSAGE_TEMPLATE, DEFAULT_VERIFICATION_TEMPLATE};
use crate::session::Credentials;

/// Per-operation SMTP timeout used when none is configured
pub const DEFAULT_EMAIL_TIMEOUT: Duration = Duration::from_secs(10);

/// Flush interval used when none is configured
pub const DEFAULT_FLUSH_DURATION: Duration = Duration::from_secs(30);

/// Notifier configuration.
///
/// Zero values mean "use the default"; see [`EmailParams::with_defaults`].
#[derive(Clone, Default, PartialEq, Eq)]
pub struct EmailParams {
    pub host: String,
    pub port: u16,
    /// Wrap the connection in TLS right away (SMTPS)
    pub tls: bool,
    /// Envelope and header sender address
    pub from: String,
    pub username: String,
    pub password: String,
    /// Limit for every single SMTP operation
    pub timeout: Duration,
    /// Template source for comment reply messages
    pub msg_template: String,
    /// Template source for verification messages
    pub verification_template: String,
    /// Messages per batch, also the bounded queue capacity
    pub buffer_size: usize,
    /// Longest time a partial batch waits before it is flushed
    pub flush_duration: Duration,
}

impl EmailParams {
    /// Replace unset values with defaults
    pub fn with_defaults(mut self) -> Self {
        if self.msg_template.is_empty() {
            self.msg_template = DEFAULT_MESSAGE_TEMPLATE.to_string();
        }
        if self.verification_template.is_empty() {
            self.verification_template = DEFAULT_VERIFICATION_TEMPLATE.to_string();
        }
        if self.timeout.is_zero() {
            self.timeout = DEFAULT_EMAIL_TIMEOUT;
        }
        if self.flush_duration.is_zero() {
            self.flush_duration = DEFAULT_FLUSH_DURATION;
        }
        if self.buffer_size == 0 {
            self.buffer_size = 1;
        }
        self
    }

    pub fn credentials(&self) -> Credentials {
        Credentials::new(self.username.clone(), self.password.clone())
    }

    /// Whether an SMTP server is configured at all
    pub fn has_server(&self) -> bool {
        !self.host.is_empty()
    }
}

impl fmt::Debug for EmailParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmailParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("tls", &self.tls)
            .field("from", &self.from)
            .field("username", &self.username)
            .field("password", &"***")
            .field("timeout", &self.timeout)
            .field("buffer_size", &self.buffer_size)
            .field("flush_duration", &self.flush_duration)
            .finish_non_exhaustive()
    }
}
