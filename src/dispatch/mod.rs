//! Delivers one batch of rendered messages over a single mail session.

use std::sync::Arc;

use uuid::Uuid;

use crate::error::{DeliveryErrors, NotifyError, SendError};
use crate::metrics::BatchMetrics;
use crate::render::RenderedMessage;
use crate::session::{Credentials, MailSession, SessionConnector};

/// Sends batches; at most one session per call
pub struct BatchDispatcher {
    connector: Option<Arc<dyn SessionConnector>>,
    from: String,
    credentials: Credentials,
}

impl BatchDispatcher {
    pub fn new(
        connector: Option<Arc<dyn SessionConnector>>,
        from: impl Into<String>,
        credentials: Credentials,
    ) -> Self {
        Self {
            connector,
            from: from.into(),
            credentials,
        }
    }

    pub fn has_connector(&self) -> bool {
        self.connector.is_some()
    }

    /// Deliver every message of the batch, in order, over one session.
    ///
    /// A failing message is recorded and the rest of the batch still goes
    /// out. Recorded failures come back as one aggregated error; nothing is
    /// retried.
    #[tracing::instrument(
        name = "dispatch_batch",
        skip_all,
        fields(batch_id = %Uuid::new_v4(), batch_size = batch.len())
    )]
    pub async fn dispatch(&self, batch: &[RenderedMessage]) -> Result<(), NotifyError> {
        let connector = self.connector.as_ref().ok_or(NotifyError::NoSession)?;
        if batch.is_empty() {
            return Ok(());
        }

        let mut session = connector.connect().await.map_err(|e| {
            BatchMetrics::record_session_failure();
            NotifyError::Connect(e)
        })?;

        if let Err(e) = session.authenticate(&self.credentials).await {
            BatchMetrics::record_session_failure();
            if let Err(close_err) = session.close().await {
                tracing::debug!(error = %close_err, "Failed to close session after auth failure");
            }
            return Err(NotifyError::Auth(e));
        }

        let mut errors = DeliveryErrors::new();
        let mut delivered = 0u64;

        for message in batch {
            match self.send_message(session.as_mut(), message).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!(
                        destination = %message.destination,
                        error = %e,
                        "Failed to send message"
                    );
                    errors.push(e);
                }
            }
        }

        let failed = errors.len() as u64;
        if let Some(e) = self.release(session.as_mut()).await {
            errors.push(e);
        }

        BatchMetrics::record_delivered(delivered);
        BatchMetrics::record_failed(failed);

        tracing::debug!(
            target_server = %connector.describe(),
            delivered = delivered,
            failed = failed,
            "Batch delivered"
        );

        errors.into_result()
    }

    async fn send_message(
        &self,
        session: &mut dyn MailSession,
        message: &RenderedMessage,
    ) -> Result<(), SendError> {
        let to = &message.destination;

        session
            .mail_from(&self.from)
            .await
            .map_err(|source| SendError::Sender {
                to: to.clone(),
                from: self.from.clone(),
                source,
            })?;

        session
            .rcpt_to(to)
            .await
            .map_err(|source| SendError::Recipient {
                to: to.clone(),
                source,
            })?;

        let mut writer = session.data().await.map_err(|source| SendError::Writer {
            to: to.clone(),
            source,
        })?;

        writer
            .write_all(message.body.as_bytes())
            .await
            .map_err(|source| SendError::Body {
                to: to.clone(),
                source,
            })?;

        writer.finish().await.map_err(|source| SendError::Finish {
            to: to.clone(),
            source,
        })
    }

    /// QUIT, then close unconditionally. Only a failure of both counts.
    async fn release(&self, session: &mut dyn MailSession) -> Option<SendError> {
        let quit = session.quit().await;
        let close = session.close().await;

        match (quit, close) {
            (Err(quit_err), Err(close_err)) => {
                tracing::warn!(
                    quit_error = %quit_err,
                    close_error = %close_err,
                    "Failed to release mail session"
                );
                Some(SendError::Teardown { source: close_err })
            }
            (Err(quit_err), Ok(())) => {
                tracing::debug!(error = %quit_err, "QUIT failed, session closed anyway");
                None
            }
            _ => None,
        }
    }
}
