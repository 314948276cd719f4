// Shared infrastructure
pub mod config;
pub mod error;
pub mod metrics;

// Notification pipeline
pub mod notification;
pub mod template;
pub mod render;
pub mod session;
pub mod dispatch;
pub mod notifier;

// Supporting modules
pub mod shutdown;
pub mod telemetry;

pub use notifier::{EmailNotifier, Phase};
