use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use comment_mailer::config::Settings;
use comment_mailer::metrics::encode_metrics;
use comment_mailer::notification::NotificationRequest;
use comment_mailer::session::RecordingConnector;
use comment_mailer::shutdown::spawn_signal_listener;
use comment_mailer::telemetry::init_tracing;
use comment_mailer::EmailNotifier;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = Settings::new()?;

    // Initialize tracing
    init_tracing(&settings.log)?;
    tracing::info!(settings = ?settings, "Configuration loaded");

    let params = settings.email_params()?;

    let (notifier, err) = if settings.notify.dry_run {
        tracing::info!("Dry run, messages are logged instead of sent");
        let connector = RecordingConnector::new().with_message_logging();
        EmailNotifier::with_connector(params, Arc::new(connector))
    } else {
        EmailNotifier::new(params)
    };
    if let Some(e) = err {
        tracing::warn!(error = %e, "Continuing with partially configured notifier");
    }

    let shutdown = CancellationToken::new();
    let signal_handle = spawn_signal_listener(shutdown.clone());
    notifier.start(shutdown.clone());

    // One JSON request per line until EOF or a signal
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            tracing::info!("Input closed, initiating shutdown");
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let request: NotificationRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring malformed request");
                continue;
            }
        };

        if let Err(e) = notifier.submit(&shutdown, request).await {
            if e.is_cancelled() {
                break;
            }
            tracing::warn!(error = %e, "Failed to submit notification");
        }
    }

    shutdown.cancel();
    notifier.stopped().await;
    let _ = signal_handle.await;

    match encode_metrics() {
        Ok(metrics) => tracing::debug!(metrics = %metrics, "Final metrics"),
        Err(e) => tracing::debug!(error = %e, "Failed to encode metrics"),
    }

    tracing::info!("Notifier shutdown complete");
    Ok(())
}
