use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::Phase;
use crate::dispatch::BatchDispatcher;
use crate::error::NotifyError;
use crate::metrics::BatchMetrics;
use crate::render::RenderedMessage;

/// What caused a batch to be flushed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FlushTrigger {
    Capacity,
    Timer,
    Shutdown,
}

impl FlushTrigger {
    fn as_str(self) -> &'static str {
        match self {
            FlushTrigger::Capacity => "capacity",
            FlushTrigger::Timer => "timer",
            FlushTrigger::Shutdown => "shutdown",
        }
    }
}

/// The single consumer of the bounded queue
pub(crate) struct FlushLoop {
    /// Instance label for per-notifier metrics
    notifier: String,
    rx: mpsc::Receiver<RenderedMessage>,
    dispatcher: Arc<BatchDispatcher>,
    capacity: usize,
    flush_interval: Duration,
    shutdown: CancellationToken,
    phase: Arc<watch::Sender<Phase>>,
}

impl FlushLoop {
    pub(crate) fn new(
        notifier: String,
        rx: mpsc::Receiver<RenderedMessage>,
        dispatcher: Arc<BatchDispatcher>,
        capacity: usize,
        flush_interval: Duration,
        shutdown: CancellationToken,
        phase: Arc<watch::Sender<Phase>>,
    ) -> Self {
        Self {
            notifier,
            rx,
            dispatcher,
            capacity: capacity.max(1),
            flush_interval,
            shutdown,
            phase,
        }
    }

    /// Accumulate messages until capacity, the timer or shutdown flushes them.
    ///
    /// Returns once the terminal flush is done; the phase is `Stopped` by then.
    pub(crate) async fn run(mut self) {
        let mut ticker = interval(self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Skip immediate first tick
        ticker.tick().await;

        tracing::info!(
            notifier = %self.notifier,
            capacity = self.capacity,
            flush_interval_ms = self.flush_interval.as_millis() as u64,
            "Flush loop started"
        );

        let mut buffer: Vec<RenderedMessage> = Vec::with_capacity(self.capacity);

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => {
                    tracing::info!(pending = buffer.len(), "Flush loop received shutdown signal");
                    break;
                }
                received = self.rx.recv() => match received {
                    Some(message) => {
                        buffer.push(message);
                        BatchMetrics::set_pending(&self.notifier, buffer.len());

                        if buffer.len() >= self.capacity {
                            self.flush(&mut buffer, FlushTrigger::Capacity).await;
                            ticker.reset();
                        }
                    }
                    None => {
                        tracing::info!(pending = buffer.len(), "Queue closed, stopping flush loop");
                        break;
                    }
                },
                _ = ticker.tick() => {
                    self.flush(&mut buffer, FlushTrigger::Timer).await;
                }
            }
        }

        self.drain(buffer).await;
    }

    /// Terminal flush: runs once, then the loop is gone
    async fn drain(mut self, mut buffer: Vec<RenderedMessage>) {
        self.phase.send_replace(Phase::Draining);

        // Wakes blocked producers with an error; nothing new gets in after this.
        // recv still yields sends already holding a slot, then None.
        self.rx.close();
        let mut collected = 0usize;
        while let Some(message) = self.rx.recv().await {
            buffer.push(message);
            collected += 1;
        }

        tracing::info!(
            pending = buffer.len(),
            collected_from_queue = collected,
            "Draining notifier"
        );

        self.flush(&mut buffer, FlushTrigger::Shutdown).await;

        BatchMetrics::clear_pending(&self.notifier);
        self.phase.send_replace(Phase::Stopped);
        tracing::info!(notifier = %self.notifier, "Flush loop stopped");
    }

    async fn flush(&self, buffer: &mut Vec<RenderedMessage>, trigger: FlushTrigger) {
        if buffer.is_empty() {
            return;
        }

        let batch = std::mem::replace(buffer, Vec::with_capacity(self.capacity));
        BatchMetrics::set_pending(&self.notifier, 0);

        let start = Instant::now();
        let result = self.dispatcher.dispatch(&batch).await;
        let elapsed = start.elapsed();

        BatchMetrics::record_flush(trigger.as_str(), batch.len(), elapsed, result.is_ok());

        match result {
            Ok(()) => {
                tracing::info!(
                    trigger = trigger.as_str(),
                    batch_size = batch.len(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Batch flushed"
                );
            }
            Err(e @ NotifyError::Delivery(_)) => {
                tracing::warn!(
                    trigger = trigger.as_str(),
                    batch_size = batch.len(),
                    error = %e,
                    "Batch flushed with failures"
                );
            }
            Err(e) => {
                tracing::error!(
                    trigger = trigger.as_str(),
                    batch_size = batch.len(),
                    error = %e,
                    "Batch delivery failed"
                );
            }
        }
    }
}
