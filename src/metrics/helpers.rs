//! Metrics helper structs for convenient metric recording

use std::time::Duration;

use prometheus::{Encoder, TextEncoder};

use super::{
    BATCHES_FLUSHED_TOTAL, BATCH_DURATION, BATCH_PENDING, BATCH_SIZE, MESSAGES_DELIVERED_TOTAL,
    MESSAGES_ENQUEUED_TOTAL, MESSAGES_FAILED_TOTAL, REQUESTS_REJECTED_TOTAL,
    REQUESTS_SKIPPED_TOTAL, REQUESTS_SUBMITTED_TOTAL, SESSION_FAILURES_TOTAL,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for recording submission metrics
pub struct SubmitMetrics;

impl SubmitMetrics {
    pub fn record_submitted(kind: &str) {
        REQUESTS_SUBMITTED_TOTAL.with_label_values(&[kind]).inc();
    }

    pub fn record_skipped(reason: &str) {
        REQUESTS_SKIPPED_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn record_rejected(reason: &str) {
        REQUESTS_REJECTED_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn record_enqueued() {
        MESSAGES_ENQUEUED_TOTAL.inc();
    }
}

/// Helper struct for recording batch and delivery metrics
pub struct BatchMetrics;

impl BatchMetrics {
    /// Record a flushed batch and how long its delivery took
    pub fn record_flush(trigger: &str, size: usize, elapsed: Duration, succeeded: bool) {
        BATCHES_FLUSHED_TOTAL.with_label_values(&[trigger]).inc();
        BATCH_SIZE.observe(size as f64);
        let outcome = if succeeded { "ok" } else { "error" };
        BATCH_DURATION
            .with_label_values(&[outcome])
            .observe(elapsed.as_secs_f64());
    }

    /// Update the number of messages waiting for the next flush
    pub fn set_pending(notifier: &str, count: usize) {
        BATCH_PENDING.with_label_values(&[notifier]).set(count as i64);
    }

    /// Drop the pending gauge of a stopped notifier
    pub fn clear_pending(notifier: &str) {
        let _ = BATCH_PENDING.remove_label_values(&[notifier]);
    }

    pub fn record_delivered(count: u64) {
        MESSAGES_DELIVERED_TOTAL.inc_by(count);
    }

    pub fn record_failed(count: u64) {
        MESSAGES_FAILED_TOTAL.inc_by(count);
    }

    pub fn record_session_failure() {
        SESSION_FAILURES_TOTAL.inc();
    }
}
