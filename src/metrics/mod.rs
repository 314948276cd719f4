//! Prometheus metrics for the mail notifier.
//!
//! This module provides metrics for monitoring notification delivery:
//! - Submission metrics (accepted, skipped, rejected)
//! - Batch metrics (flushes by trigger, batch size, batch duration)
//! - Delivery metrics (messages delivered, per-message failures, session failures)

mod helpers;

pub use helpers::{encode_metrics, BatchMetrics, SubmitMetrics};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter, register_int_counter_vec,
    register_int_gauge_vec, Histogram, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "mailer";

lazy_static! {
    // ============================================================================
    // Submission Metrics
    // ============================================================================

    /// Requests submitted by kind (comment, verification)
    pub static ref REQUESTS_SUBMITTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_requests_submitted_total", METRIC_PREFIX),
        "Total notification requests submitted",
        &["kind"]
    ).unwrap();

    /// Requests skipped without delivery, by reason
    pub static ref REQUESTS_SKIPPED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_requests_skipped_total", METRIC_PREFIX),
        "Total notification requests skipped",
        &["reason"]
    ).unwrap();

    /// Requests rejected at submit time (render failure, cancellation)
    pub static ref REQUESTS_REJECTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_requests_rejected_total", METRIC_PREFIX),
        "Total notification requests rejected at submit time",
        &["reason"]
    ).unwrap();

    /// Messages placed on the bounded queue
    pub static ref MESSAGES_ENQUEUED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_messages_enqueued_total", METRIC_PREFIX),
        "Total rendered messages placed on the queue"
    ).unwrap();

    // ============================================================================
    // Batch Metrics
    // ============================================================================

    /// Batches flushed by trigger (capacity, timer, shutdown)
    pub static ref BATCHES_FLUSHED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_batches_flushed_total", METRIC_PREFIX),
        "Total batches flushed",
        &["trigger"]
    ).unwrap();

    /// Messages per flushed batch
    pub static ref BATCH_SIZE: Histogram = register_histogram!(
        format!("{}_batch_size", METRIC_PREFIX),
        "Distribution of messages per batch",
        vec![1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0]
    ).unwrap();

    /// Time spent delivering one batch
    pub static ref BATCH_DURATION: HistogramVec = register_histogram_vec!(
        format!("{}_batch_duration_seconds", METRIC_PREFIX),
        "Batch delivery duration in seconds",
        &["outcome"],
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0]
    ).unwrap();

    /// Messages accumulated but not yet flushed, per notifier instance
    pub static ref BATCH_PENDING: IntGaugeVec = register_int_gauge_vec!(
        format!("{}_batch_pending", METRIC_PREFIX),
        "Messages accumulated for the next batch",
        &["notifier"]
    ).unwrap();

    // ============================================================================
    // Delivery Metrics
    // ============================================================================

    /// Messages accepted by the mail server
    pub static ref MESSAGES_DELIVERED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_messages_delivered_total", METRIC_PREFIX),
        "Total messages accepted by the mail server"
    ).unwrap();

    /// Per-message delivery failures
    pub static ref MESSAGES_FAILED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_messages_failed_total", METRIC_PREFIX),
        "Total per-message delivery failures"
    ).unwrap();

    /// Batches that could not open or authenticate a session
    pub static ref SESSION_FAILURES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_session_failures_total", METRIC_PREFIX),
        "Total batches failed before any message was attempted"
    ).unwrap();
}
