//! End-to-end tests for the email notifier against the recording session.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use comment_mailer::config::EmailParams;
use comment_mailer::error::NotifyError;
use comment_mailer::notification::{
    Comment, CommentEvent, Locator, NotificationRequest, User, VerificationEvent,
};
use comment_mailer::session::{
    FailurePlan, MailSession, RecordingConnector, SessionConnector, SessionError,
};
use comment_mailer::{EmailNotifier, Phase};

// ============================================================================
// Helpers
// ============================================================================

fn params(buffer_size: usize, flush_duration: Duration) -> EmailParams {
    EmailParams {
        from: "test_sender".to_string(),
        buffer_size,
        flush_duration,
        ..Default::default()
    }
}

fn notifier_with(params: EmailParams, connector: RecordingConnector) -> EmailNotifier {
    let (notifier, err) = EmailNotifier::with_connector(params, Arc::new(connector));
    assert!(err.is_none(), "unexpected construction error: {:?}", err);
    notifier
}

fn verification(email: &str) -> NotificationRequest {
    VerificationEvent {
        email: email.to_string(),
        site_id: "remark".to_string(),
        user: "test_user".to_string(),
        token: "secret_token".to_string(),
    }
    .into()
}

fn reply(author_id: &str, parent_author_id: &str, email: &str) -> NotificationRequest {
    CommentEvent {
        comment: Comment {
            id: "1".to_string(),
            user: User {
                id: author_id.to_string(),
                name: "test user name".to_string(),
            },
            orig: "test comment orig".to_string(),
            locator: Locator {
                site_id: "remark".to_string(),
                url: "http://test".to_string(),
            },
            post_title: "test title".to_string(),
        },
        parent: Some(Comment {
            id: "0".to_string(),
            user: User {
                id: parent_author_id.to_string(),
                name: "test parent user name".to_string(),
            },
            ..Default::default()
        }),
        email: email.to_string(),
    }
    .into()
}

async fn wait_for_connects(connector: &RecordingConnector, expected: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while connector.transcript().connects < expected {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("expected flush did not happen");
}

/// Connector whose sessions open only when the gate has a permit
struct GatedConnector {
    gate: Arc<Semaphore>,
    inner: RecordingConnector,
}

#[async_trait]
impl SessionConnector for GatedConnector {
    async fn connect(&self) -> Result<Box<dyn MailSession>, SessionError> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| SessionError::Other("gate closed".to_string()))?;
        self.inner.connect().await
    }

    fn describe(&self) -> String {
        "gated".to_string()
    }
}

// ============================================================================
// Skips and rejections
// ============================================================================

#[tokio::test]
async fn test_request_without_destination_is_skipped() {
    let connector = RecordingConnector::new();
    let notifier = notifier_with(params(1, Duration::from_secs(3600)), connector.clone());
    let shutdown = CancellationToken::new();
    notifier.start(shutdown.clone());

    notifier.submit(&shutdown, verification("")).await.unwrap();
    notifier.submit(&shutdown, reply("u2", "u1", "")).await.unwrap();

    shutdown.cancel();
    notifier.stopped().await;
    assert_eq!(connector.transcript().connects, 0);
}

#[tokio::test]
async fn test_self_reply_is_skipped() {
    let connector = RecordingConnector::new();
    let notifier = notifier_with(params(1, Duration::from_secs(3600)), connector.clone());
    let shutdown = CancellationToken::new();
    notifier.start(shutdown.clone());

    notifier
        .submit(&shutdown, reply("same", "same", "me@example.org"))
        .await
        .unwrap();

    shutdown.cancel();
    notifier.stopped().await;
    assert_eq!(connector.transcript().connects, 0);
}

#[tokio::test]
async fn test_cancelled_context_is_rejected() {
    let connector = RecordingConnector::new();
    let notifier = notifier_with(params(1, Duration::from_secs(3600)), connector.clone());

    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = notifier
        .submit(&cancel, verification("bad@example.org"))
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(
        err.to_string(),
        "sending message to \"bad@example.org\" aborted due to cancellation"
    );
    assert_eq!(notifier.phase(), Phase::Idle);
    assert_eq!(connector.transcript().connects, 0);
}

#[tokio::test]
async fn test_template_failure_is_reported_and_not_queued() {
    let connector = RecordingConnector::new();
    let mut params = params(1, Duration::from_secs(3600));
    params.msg_template = "{{Test}}".to_string();
    params.verification_template = "{{Test}}".to_string();
    let notifier = notifier_with(params, connector.clone());

    let shutdown = CancellationToken::new();
    notifier.start(shutdown.clone());

    let err = notifier
        .submit(&shutdown, reply("u2", "u1", "good@example.org"))
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "error executing template to build message from request: \
         template: message: can't evaluate field \"Test\""
    );

    let err = notifier
        .submit(&shutdown, verification("good@example.org"))
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "error executing template to build verifying message from request: \
         template: verification: can't evaluate field \"Test\""
    );

    shutdown.cancel();
    notifier.stopped().await;
    assert_eq!(connector.transcript().connects, 0);
}

#[tokio::test]
async fn test_invalid_template_source_fails_soft() {
    let connector = RecordingConnector::new();
    let mut params = params(1, Duration::from_secs(3600));
    params.verification_template = "{{".to_string();

    let (notifier, err) = EmailNotifier::with_connector(params, Arc::new(connector.clone()));
    assert_eq!(
        err.map(|e| e.to_string()),
        Some(
            "can't parse verification template: template: verification:1: unexpected unclosed action"
                .to_string()
        )
    );

    // The message template still works
    let shutdown = CancellationToken::new();
    notifier.start(shutdown.clone());
    notifier
        .submit(&shutdown, reply("u2", "u1", "good@example.org"))
        .await
        .unwrap();
    shutdown.cancel();
    notifier.stopped().await;
    assert_eq!(connector.transcript().rcpt_to, vec!["good@example.org"]);
}

// ============================================================================
// Flush triggers
// ============================================================================

#[tokio::test]
async fn test_capacity_flush_then_shutdown_flush() {
    let connector = RecordingConnector::new();
    let notifier = notifier_with(params(3, Duration::from_secs(3600)), connector.clone());
    let shutdown = CancellationToken::new();
    notifier.start(shutdown.clone());

    let submitted = join_all((0..4).map(|i| {
        let notifier = &notifier;
        let shutdown = &shutdown;
        async move {
            notifier
                .submit(shutdown, verification(&format!("user{}@example.org", i)))
                .await
        }
    }))
    .await;
    assert!(submitted.iter().all(|r| r.is_ok()));

    wait_for_connects(&connector, 1).await;
    // Give a stray second flush a chance to show up
    tokio::time::sleep(Duration::from_millis(50)).await;
    let transcript = connector.transcript();
    assert_eq!(transcript.connects, 1);
    assert_eq!(transcript.quits, 1);
    assert_eq!(transcript.rcpt_to.len(), 3);

    shutdown.cancel();
    notifier.stopped().await;

    let transcript = connector.transcript();
    assert_eq!(transcript.connects, 2);
    assert_eq!(transcript.quits, 2);
    assert_eq!(transcript.rcpt_to.len(), 4);
    assert_eq!(transcript.bodies.len(), 4);
}

#[tokio::test]
async fn test_timer_flushes_partial_batch() {
    let connector = RecordingConnector::new();
    let notifier = notifier_with(params(10, Duration::from_millis(50)), connector.clone());
    let shutdown = CancellationToken::new();
    notifier.start(shutdown.clone());

    notifier
        .submit(&shutdown, verification("a@example.org"))
        .await
        .unwrap();
    notifier
        .submit(&shutdown, verification("b@example.org"))
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while connector.transcript().rcpt_to.len() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("timer flush did not happen");
    assert_eq!(notifier.phase(), Phase::Running);
    let flushed_by_timer = connector.transcript().connects;

    shutdown.cancel();
    notifier.stopped().await;

    let transcript = connector.transcript();
    assert_eq!(transcript.rcpt_to, vec!["a@example.org", "b@example.org"]);
    // Nothing left for the shutdown flush
    assert_eq!(transcript.connects, flushed_by_timer);
}

#[tokio::test]
async fn test_double_shutdown_flushes_once() {
    let connector = RecordingConnector::new();
    let notifier = notifier_with(params(5, Duration::from_secs(3600)), connector.clone());
    let shutdown = CancellationToken::new();
    notifier.start(shutdown.clone());

    notifier
        .submit(&shutdown, verification("a@example.org"))
        .await
        .unwrap();

    shutdown.cancel();
    shutdown.cancel();
    notifier.stopped().await;
    assert_eq!(connector.transcript().quits, 1);

    shutdown.cancel();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let transcript = connector.transcript();
    assert_eq!(transcript.connects, 1);
    assert_eq!(transcript.quits, 1);
    assert_eq!(transcript.closes, 1);
    assert_eq!(notifier.phase(), Phase::Stopped);
}

#[tokio::test]
async fn test_lazy_start_uses_submit_token() {
    let connector = RecordingConnector::new();
    let notifier = notifier_with(params(5, Duration::from_secs(3600)), connector.clone());
    let cancel = CancellationToken::new();

    notifier
        .submit(&cancel, verification("a@example.org"))
        .await
        .unwrap();
    assert_eq!(notifier.phase(), Phase::Running);

    cancel.cancel();
    notifier.stopped().await;
    assert_eq!(connector.transcript().rcpt_to, vec!["a@example.org"]);
}

// ============================================================================
// Backpressure
// ============================================================================

#[tokio::test]
async fn test_full_queue_blocks_until_cancelled() {
    let gate = Arc::new(Semaphore::new(0));
    let recording = RecordingConnector::new();
    let connector = GatedConnector {
        gate: gate.clone(),
        inner: recording.clone(),
    };
    let (notifier, err) = EmailNotifier::with_connector(
        params(1, Duration::from_secs(3600)),
        Arc::new(connector),
    );
    assert!(err.is_none());

    let shutdown = CancellationToken::new();
    notifier.start(shutdown.clone());

    // First message is taken by the loop, whose flush waits on the gate
    notifier
        .submit(&shutdown, verification("a@example.org"))
        .await
        .unwrap();
    // Second one fills the queue
    notifier
        .submit(&shutdown, verification("b@example.org"))
        .await
        .unwrap();

    // Third has nowhere to go
    let blocked = tokio::time::timeout(
        Duration::from_millis(100),
        notifier.submit(&shutdown, verification("c@example.org")),
    )
    .await;
    assert!(blocked.is_err());

    let cancel = CancellationToken::new();
    let (result, _) = tokio::join!(
        notifier.submit(&cancel, verification("c@example.org")),
        async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        }
    );
    assert!(matches!(result, Err(NotifyError::Cancelled { .. })));

    gate.add_permits(1);
    shutdown.cancel();
    notifier.stopped().await;

    let transcript = recording.transcript();
    assert_eq!(transcript.rcpt_to, vec!["a@example.org", "b@example.org"]);
}

#[tokio::test]
async fn test_blocked_submit_succeeds_once_slot_frees() {
    let gate = Arc::new(Semaphore::new(0));
    let recording = RecordingConnector::new();
    let connector = GatedConnector {
        gate: gate.clone(),
        inner: recording.clone(),
    };
    let (notifier, err) = EmailNotifier::with_connector(
        params(1, Duration::from_secs(3600)),
        Arc::new(connector),
    );
    assert!(err.is_none());

    let shutdown = CancellationToken::new();
    notifier.start(shutdown.clone());

    notifier
        .submit(&shutdown, verification("a@example.org"))
        .await
        .unwrap();
    notifier
        .submit(&shutdown, verification("b@example.org"))
        .await
        .unwrap();

    // Third waits for room, then gets in once deliveries resume
    let (result, _) = tokio::join!(
        notifier.submit(&shutdown, verification("c@example.org")),
        async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            gate.add_permits(1);
        }
    );
    assert!(result.is_ok());

    shutdown.cancel();
    notifier.stopped().await;

    let transcript = recording.transcript();
    assert_eq!(
        transcript.rcpt_to,
        vec!["a@example.org", "b@example.org", "c@example.org"]
    );
}

#[tokio::test]
async fn test_blocked_submit_cancelled_by_terminal_drain() {
    let gate = Arc::new(Semaphore::new(0));
    let recording = RecordingConnector::new();
    let connector = GatedConnector {
        gate: gate.clone(),
        inner: recording.clone(),
    };
    let (notifier, err) = EmailNotifier::with_connector(
        params(1, Duration::from_secs(3600)),
        Arc::new(connector),
    );
    assert!(err.is_none());

    let shutdown = CancellationToken::new();
    notifier.start(shutdown.clone());

    notifier
        .submit(&shutdown, verification("a@example.org"))
        .await
        .unwrap();
    notifier
        .submit(&shutdown, verification("b@example.org"))
        .await
        .unwrap();

    // The producer's own token never fires; only the drain can release it
    let producer = CancellationToken::new();
    let (result, _) = tokio::join!(
        notifier.submit(&producer, verification("c@example.org")),
        async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            shutdown.cancel();
            gate.add_permits(1);
        }
    );
    assert!(matches!(result, Err(NotifyError::Cancelled { ref destination }) if destination == "c@example.org"));
    assert!(!producer.is_cancelled());

    notifier.stopped().await;

    let transcript = recording.transcript();
    assert_eq!(transcript.rcpt_to, vec!["a@example.org", "b@example.org"]);
}

// ============================================================================
// Delivery failures
// ============================================================================

#[tokio::test]
async fn test_failing_writers_release_session_once() {
    let connector = RecordingConnector::failing(FailurePlan {
        data: true,
        ..Default::default()
    });
    let notifier = notifier_with(params(3, Duration::from_secs(3600)), connector.clone());
    let shutdown = CancellationToken::new();
    notifier.start(shutdown.clone());

    for i in 0..3 {
        notifier
            .submit(&shutdown, verification(&format!("user{}@example.org", i)))
            .await
            .unwrap();
    }

    wait_for_connects(&connector, 1).await;
    shutdown.cancel();
    notifier.stopped().await;

    let transcript = connector.transcript();
    assert_eq!(transcript.connects, 1);
    assert_eq!(transcript.quits, 1);
    assert_eq!(transcript.closes, 1);
    assert_eq!(transcript.rcpt_to.len(), 3);
    assert!(transcript.bodies.is_empty());
}

#[tokio::test]
async fn test_failed_quit_does_not_stop_delivery() {
    let connector = RecordingConnector::failing(FailurePlan {
        quit: true,
        ..Default::default()
    });
    let notifier = notifier_with(params(1, Duration::from_secs(3600)), connector.clone());
    let shutdown = CancellationToken::new();
    notifier.start(shutdown.clone());

    notifier
        .submit(&shutdown, verification("a@example.org"))
        .await
        .unwrap();
    wait_for_connects(&connector, 1).await;
    notifier
        .submit(&shutdown, verification("b@example.org"))
        .await
        .unwrap();

    shutdown.cancel();
    notifier.stopped().await;

    let transcript = connector.transcript();
    assert_eq!(transcript.connects, 2);
    assert_eq!(transcript.closes, 2);
    assert_eq!(transcript.bodies.len(), 2);
}

// ============================================================================
// Rendered output
// ============================================================================

#[tokio::test]
async fn test_delivered_bodies_match_templates() {
    let connector = RecordingConnector::new();
    let notifier = notifier_with(params(2, Duration::from_secs(3600)), connector.clone());
    let shutdown = CancellationToken::new();
    notifier.start(shutdown.clone());

    notifier
        .submit(&shutdown, reply("u2", "u1", "good_example@example.org"))
        .await
        .unwrap();
    notifier
        .submit(&shutdown, verification("another@example.org"))
        .await
        .unwrap();

    wait_for_connects(&connector, 1).await;
    shutdown.cancel();
    notifier.stopped().await;

    let transcript = connector.transcript();
    assert_eq!(transcript.mail_from, vec!["test_sender", "test_sender"]);
    assert_eq!(
        transcript.bodies,
        vec![
            "From: test_sender\nTo: good_example@example.org\n\
             Subject: New comment for \"test title\"\nMIME-version: 1.0;\n\
             Content-Type: text/html; charset=\"UTF-8\";\n\n\
             test user name → test parent user name\n\n\
             test comment orig\n\n\
             ↦ <a href=\"http://test#remark42__comment-1\">test title</a>\n"
                .to_string(),
            "From: test_sender\nTo: another@example.org\nSubject: Email verification\n\
             MIME-version: 1.0;\nContent-Type: text/html; charset=\"UTF-8\";\n\n\
             Confirmation for test_user another@example.org, site remark\n\n\
             Token: secret_token\n"
                .to_string(),
        ]
    );
}

#[tokio::test]
async fn test_requests_from_json() {
    let request: NotificationRequest = serde_json::from_str(
        r#"{"kind":"verification","email":"a@example.org","site_id":"remark","user":"u","token":"t"}"#,
    )
    .unwrap();

    let connector = RecordingConnector::new();
    let notifier = notifier_with(params(1, Duration::from_secs(3600)), connector.clone());
    let shutdown = CancellationToken::new();
    notifier.start(shutdown.clone());

    notifier.submit(&shutdown, request).await.unwrap();
    shutdown.cancel();
    notifier.stopped().await;

    assert_eq!(connector.transcript().rcpt_to, vec!["a@example.org"]);
}
