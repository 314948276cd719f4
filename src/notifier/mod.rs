//! Email notifier: renders requests, queues them and delivers them in batches.
//!
//! Producers call [`EmailNotifier::submit`]; a single background flush loop
//! owns the queue and hands batches to the [`BatchDispatcher`]. A batch goes
//! out when it reaches `buffer_size`, when `flush_duration` passes, or when
//! the shutdown token is cancelled. The shutdown flush happens exactly once.

mod flush;

use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::EmailParams;
use crate::dispatch::BatchDispatcher;
use crate::error::NotifyError;
use crate::metrics::SubmitMetrics;
use crate::notification::NotificationRequest;
use crate::render::{RenderedMessage, Renderer};
use crate::session::{SessionConnector, SmtpConnector};

use flush::FlushLoop;

/// Lifecycle of the flush loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Not started yet
    Idle,
    Running,
    /// Terminal flush in progress
    Draining,
    Stopped,
}

pub struct EmailNotifier {
    /// Labels this instance's metrics and logs
    id: Uuid,
    params: EmailParams,
    renderer: Renderer,
    dispatcher: Arc<BatchDispatcher>,
    tx: mpsc::Sender<RenderedMessage>,
    /// Taken by whoever starts the flush loop
    rx: Mutex<Option<mpsc::Receiver<RenderedMessage>>>,
    phase_tx: Arc<watch::Sender<Phase>>,
    phase_rx: watch::Receiver<Phase>,
}

impl EmailNotifier {
    /// Create a notifier talking SMTP to `params.host`.
    ///
    /// Construction never fails. A broken template or a missing host is
    /// returned alongside a notifier that is still usable for everything
    /// the problem doesn't touch.
    pub fn new(params: EmailParams) -> (Self, Option<NotifyError>) {
        let params = params.with_defaults();
        let connector = params.has_server().then(|| {
            Arc::new(SmtpConnector::new(
                params.host.clone(),
                params.port,
                params.tls,
                params.timeout,
            )) as Arc<dyn SessionConnector>
        });

        Self::build(params, connector)
    }

    /// Create a notifier delivering through the given connector
    pub fn with_connector(
        params: EmailParams,
        connector: Arc<dyn SessionConnector>,
    ) -> (Self, Option<NotifyError>) {
        Self::build(params.with_defaults(), Some(connector))
    }

    fn build(
        params: EmailParams,
        connector: Option<Arc<dyn SessionConnector>>,
    ) -> (Self, Option<NotifyError>) {
        let (renderer, mut errors) = Renderer::new(
            params.from.clone(),
            &params.msg_template,
            &params.verification_template,
        );
        if connector.is_none() {
            errors.push(NotifyError::NoSession);
        }

        let dispatcher = Arc::new(BatchDispatcher::new(
            connector,
            params.from.clone(),
            params.credentials(),
        ));
        let (tx, rx) = mpsc::channel(params.buffer_size);
        let (phase_tx, phase_rx) = watch::channel(Phase::Idle);

        let mut errors = errors.into_iter();
        let first = errors.next();
        for other in errors {
            tracing::warn!(error = %other, "Email notifier misconfigured");
        }
        if let Some(e) = &first {
            tracing::warn!(error = %e, "Email notifier created with configuration errors");
        }

        tracing::info!(
            params = ?params,
            has_session = dispatcher.has_connector(),
            "Email notifier created"
        );

        let notifier = Self {
            id: Uuid::new_v4(),
            params,
            renderer,
            dispatcher,
            tx,
            rx: Mutex::new(Some(rx)),
            phase_tx: Arc::new(phase_tx),
            phase_rx,
        };
        (notifier, first)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Effective parameters, defaults applied
    pub fn params(&self) -> &EmailParams {
        &self.params
    }

    pub fn phase(&self) -> Phase {
        *self.phase_rx.borrow()
    }

    /// Start the flush loop, stopping it when `shutdown` is cancelled.
    ///
    /// Only the first call has an effect; returns whether this call started it.
    pub fn start(&self, shutdown: CancellationToken) -> bool {
        let receiver = match self.rx.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(rx) = receiver else {
            return false;
        };

        self.phase_tx.send_replace(Phase::Running);

        let flush_loop = FlushLoop::new(
            self.id.to_string(),
            rx,
            self.dispatcher.clone(),
            self.params.buffer_size,
            self.params.flush_duration,
            shutdown,
            self.phase_tx.clone(),
        );
        tokio::spawn(flush_loop.run());

        true
    }

    /// Wait until the terminal flush has completed.
    ///
    /// Returns right away if the flush loop was never started.
    pub async fn stopped(&self) {
        let mut phase = self.phase_rx.clone();
        if *phase.borrow_and_update() == Phase::Idle {
            return;
        }
        let _ = phase.wait_for(|p| *p == Phase::Stopped).await;
    }

    /// Render a request and queue it for delivery.
    ///
    /// Requests without a recipient and self replies are skipped with `Ok(())`.
    /// Render failures are returned here and the request is not queued. When
    /// the queue is full this waits for the flush loop to make room, unless
    /// `cancel` fires first.
    ///
    /// The first submit starts the flush loop if [`start`](Self::start) was
    /// not called; `cancel` then doubles as its shutdown signal.
    pub async fn submit(
        &self,
        cancel: &CancellationToken,
        request: NotificationRequest,
    ) -> Result<(), NotifyError> {
        let kind = request.kind();
        SubmitMetrics::record_submitted(kind);

        let message = match self.renderer.render(&request) {
            Ok(Some(message)) => message,
            Ok(None) => {
                let reason = if request.destination().is_none() {
                    "no_destination"
                } else {
                    "self_reply"
                };
                tracing::debug!(kind = kind, reason = reason, "Notification skipped");
                SubmitMetrics::record_skipped(reason);
                return Ok(());
            }
            Err(e) => {
                SubmitMetrics::record_rejected("render");
                return Err(e);
            }
        };

        if cancel.is_cancelled() || matches!(self.phase(), Phase::Draining | Phase::Stopped) {
            return Err(self.cancelled(message.destination));
        }

        if self.start(cancel.clone()) {
            tracing::debug!("Flush loop started by first submit");
        }

        let destination = message.destination.clone();
        tokio::select! {
            biased;

            _ = cancel.cancelled() => Err(self.cancelled(destination)),
            sent = self.tx.send(message) => match sent {
                Ok(()) => {
                    SubmitMetrics::record_enqueued();
                    tracing::debug!(destination = %destination, kind = kind, "Notification queued");
                    Ok(())
                }
                // Queue closed by the terminal flush
                Err(_) => Err(self.cancelled(destination)),
            },
        }
    }

    fn cancelled(&self, destination: String) -> NotifyError {
        SubmitMetrics::record_rejected("cancelled");
        NotifyError::Cancelled { destination }
    }
}
