use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;

use super::EmailParams;
use crate::error::{AppError, Result};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub smtp: SmtpConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Clone, Deserialize)]
pub struct SmtpConfig {
    /// Empty host leaves the notifier without a mail server
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    #[serde(default)]
    pub tls: bool,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Per-operation timeout in seconds
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotifyConfig {
    /// Messages per batch
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Flush interval in seconds
    #[serde(default = "default_flush_interval_seconds")]
    pub flush_interval_seconds: u64,
    /// Inline message template, overridden by `message_template_path`
    #[serde(default)]
    pub message_template: String,
    #[serde(default)]
    pub message_template_path: Option<String>,
    /// Inline verification template, overridden by `verification_template_path`
    #[serde(default)]
    pub verification_template: String,
    #[serde(default)]
    pub verification_template_path: Option<String>,
    /// Log messages instead of sending them
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Default filter when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of human readable output
    #[serde(default)]
    pub json: bool,
}

fn default_smtp_port() -> u16 {
    25
}

fn default_timeout_seconds() -> u64 {
    10
}

fn default_buffer_size() -> usize {
    1
}

fn default_flush_interval_seconds() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Settings {
    pub fn new() -> std::result::Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            // Start with default values
            .set_default("smtp.port", 25)?
            .set_default("smtp.timeout_seconds", 10)?
            .set_default("notify.buffer_size", 1)?
            .set_default("notify.flush_interval_seconds", 30)?
            .set_default("log.level", "info")?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables
            // MAILER_SMTP__HOST, MAILER_NOTIFY__BUFFER_SIZE, MAILER_LOG__JSON, etc.
            .add_source(
                Environment::with_prefix("MAILER")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Build notifier parameters, reading template files where configured
    pub fn email_params(&self) -> Result<EmailParams> {
        let msg_template = resolve_template(
            &self.notify.message_template,
            self.notify.message_template_path.as_deref(),
        )?;
        let verification_template = resolve_template(
            &self.notify.verification_template,
            self.notify.verification_template_path.as_deref(),
        )?;

        Ok(EmailParams {
            host: self.smtp.host.clone(),
            port: self.smtp.port,
            tls: self.smtp.tls,
            from: self.smtp.from.clone(),
            username: self.smtp.username.clone(),
            password: self.smtp.password.clone(),
            timeout: Duration::from_secs(self.smtp.timeout_seconds),
            msg_template,
            verification_template,
            buffer_size: self.notify.buffer_size,
            flush_duration: Duration::from_secs(self.notify.flush_interval_seconds),
        })
    }
}

fn resolve_template(inline: &str, path: Option<&str>) -> Result<String> {
    match path.filter(|p| !p.is_empty()) {
        Some(path) => std::fs::read_to_string(path).map_err(|source| AppError::TemplateFile {
            path: path.to_string(),
            source,
        }),
        None => Ok(inline.to_string()),
    }
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_smtp_port(),
            tls: false,
            from: String::new(),
            username: String::new(),
            password: String::new(),
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

impl std::fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("tls", &self.tls)
            .field("from", &self.from)
            .field("username", &self.username)
            .field("password", &"***")
            .field("timeout_seconds", &self.timeout_seconds)
            .finish()
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            flush_interval_seconds: default_flush_interval_seconds(),
            message_template: String::new(),
            message_template_path: None,
            verification_template: String::new(),
            verification_template_path: None,
            dry_run: false,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}
