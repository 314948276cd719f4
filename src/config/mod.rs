mod params;
mod settings;

pub use params::{EmailParams, DEFAULT_EMAIL_TIMEOUT, DEFAULT_FLUSH_DURATION};
pub use settings::{LogConfig, NotifyConfig, Settings, SmtpConfig};
