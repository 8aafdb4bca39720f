/// Notification dispatcher
///
/// Single consumer of the intake queue. Each request is processed to completion
/// before the next one is taken, so notifications leave in submission order.
/// Per-recipient failures are logged and never stop the rest of the request.
/// Emails are handed to tracked background tasks so a slow mail gateway never
/// holds up pushes to later recipients.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::email::EmailSender;
use crate::error::AppError;
use crate::metrics;
use crate::models::{NotificationRequest, RecipientSpec};
use crate::websocket::{CloseReason, ConnectionRegistry, PushFrame, RegistrationEntry};

/// Producer side of the intake -> dispatcher queue
#[derive(Clone)]
pub struct NotificationQueue {
    tx: mpsc::Sender<NotificationRequest>,
}

impl NotificationQueue {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<NotificationRequest>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Hand a request to the dispatcher, waiting for room in the queue
    pub async fn enqueue(&self, request: NotificationRequest) -> Result<(), AppError> {
        self.tx
            .send(request)
            .await
            .map_err(|_| AppError::ServiceUnavailable("dispatcher is not running".to_string()))?;
        metrics::record_notification_accepted();
        Ok(())
    }
}

/// What happened to one notification request
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    /// Emails handed to the background sender
    pub email_attempts: usize,
    pub push_attempts: usize,
    pub push_failures: usize,
    /// Push recipients with no registered channel
    pub push_skipped: usize,
}

pub struct Dispatcher {
    registry: ConnectionRegistry,
    email: Arc<dyn EmailSender>,
    ack_timeout: Duration,
    email_tasks: TaskTracker,
}

impl Dispatcher {
    pub fn new(
        registry: ConnectionRegistry,
        email: Arc<dyn EmailSender>,
        ack_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            email,
            ack_timeout,
            email_tasks: TaskTracker::new(),
        }
    }

    /// Wait for every email handed off so far to finish sending
    pub async fn flush_email(&self) {
        self.email_tasks.close();
        self.email_tasks.wait().await;
        self.email_tasks.reopen();
    }

    /// Consume the queue until it closes or `shutdown` fires
    pub async fn run(self, mut rx: mpsc::Receiver<NotificationRequest>, shutdown: CancellationToken) {
        tracing::info!("dispatcher started");

        loop {
            let request = tokio::select! {
                _ = shutdown.cancelled() => break,
                request = rx.recv() => match request {
                    Some(request) => request,
                    None => break,
                },
            };

            let report = self.dispatch(&request).await;
            tracing::debug!(
                recipients = request.recipients.len(),
                push_attempts = report.push_attempts,
                push_failures = report.push_failures,
                push_skipped = report.push_skipped,
                email_attempts = report.email_attempts,
                "notification dispatched"
            );
        }

        // EMAIL_TIMEOUT_SECS bounds each pending send
        self.flush_email().await;
        tracing::info!("dispatcher stopped");
    }

    /// Deliver one request to every recipient, in order
    pub async fn dispatch(&self, request: &NotificationRequest) -> DispatchReport {
        let mut report = DispatchReport::default();

        for recipient in &request.recipients {
            if recipient.method.wants_email() {
                self.send_email(recipient, &request.message, &mut report);
            }

            if recipient.method.wants_push() {
                self.push(recipient, &request.message, &mut report).await;
            }
        }

        report
    }

    fn send_email(&self, recipient: &RecipientSpec, message: &str, report: &mut DispatchReport) {
        let Some(address) = recipient.email_address() else {
            tracing::warn!(
                subject = %recipient.subject,
                method = recipient.method.as_str(),
                "recipient wants email but has no address; skipping"
            );
            return;
        };

        report.email_attempts += 1;
        let email = Arc::clone(&self.email);
        let subject = recipient.subject.clone();
        let address = address.to_string();
        let message = message.to_string();
        self.email_tasks.spawn(async move {
            match email.send(&message, &address).await {
                Ok(()) => metrics::record_email_attempt(true),
                Err(e) => {
                    metrics::record_email_attempt(false);
                    tracing::warn!(%subject, error = %e, "email delivery failed");
                }
            }
        });
    }

    async fn push(&self, recipient: &RecipientSpec, message: &str, report: &mut DispatchReport) {
        let frame = PushFrame::message(message);
        let failures = AtomicUsize::new(0);

        let attempts = self
            .registry
            .for_each_matching(&recipient.subject, |entry| {
                let frame = &frame;
                let failures = &failures;
                async move {
                    if !push_to_entry(&entry, frame, self.ack_timeout).await {
                        failures.fetch_add(1, Ordering::Relaxed);
                    }
                }
            })
            .await;

        if attempts == 0 {
            tracing::debug!(subject = %recipient.subject, "no open push channel for recipient");
            report.push_skipped += 1;
        }
        report.push_attempts += attempts;
        report.push_failures += failures.load(Ordering::Relaxed);
    }
}

/// Deliver a frame to one entry; a failed exchange terminates the connection
async fn push_to_entry(entry: &RegistrationEntry, frame: &PushFrame, timeout: Duration) -> bool {
    match entry.exchange(frame, timeout).await {
        Ok(()) => {
            metrics::record_push_attempt(true);
            true
        }
        Err(e) => {
            metrics::record_push_attempt(false);
            tracing::warn!(
                channel_id = %entry.id,
                subject = %entry.owner.subject,
                error = %e,
                "push delivery failed"
            );
            entry.terminate(CloseReason::DeliveryFailure);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DeliveryMethod, Identity};
    use crate::services::email::EmailError;
    use crate::websocket::memory::{AckBehavior, MemoryChannel, MemoryProbe};
    use crate::websocket::Registration;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingEmail {
        sent: Mutex<Vec<(String, String)>>,
        fail: bool,
    }

    impl RecordingEmail {
        fn sent(&self) -> Vec<(String, String)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EmailSender for RecordingEmail {
        async fn send(&self, message: &str, address: &str) -> Result<(), EmailError> {
            self.sent
                .lock()
                .unwrap()
                .push((message.to_string(), address.to_string()));
            if self.fail {
                Err(EmailError::Transport("gateway down".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn recipient(subject: &str, method: DeliveryMethod, email: Option<&str>) -> RecipientSpec {
        RecipientSpec {
            subject: subject.to_string(),
            method,
            email: email.map(str::to_string),
        }
    }

    async fn connect(
        registry: &ConnectionRegistry,
        subject: &str,
        behavior: AckBehavior,
    ) -> (MemoryProbe, Registration) {
        let (channel, probe) = MemoryChannel::new(behavior);
        let registration = registry
            .register(Box::new(channel), Identity::new(subject, "area"))
            .await
            .unwrap();
        (probe, registration)
    }

    fn dispatcher(registry: &ConnectionRegistry, email: Arc<RecordingEmail>) -> Dispatcher {
        Dispatcher::new(registry.clone(), email, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_push_to_connected_recipient() {
        let registry = ConnectionRegistry::new();
        let (probe, _reg) = connect(&registry, "u1", AckBehavior::Ack).await;
        let email = Arc::new(RecordingEmail::default());

        let request =
            NotificationRequest::new(vec![recipient("u1", DeliveryMethod::Push, None)], "hi");
        let report = dispatcher(&registry, email.clone()).dispatch(&request).await;

        assert_eq!(report.push_attempts, 1);
        assert_eq!(report.push_failures, 0);
        assert_eq!(probe.frames(), vec![r#"{"message":"hi"}"#.to_string()]);
        assert!(email.sent().is_empty());
    }

    #[tokio::test]
    async fn test_push_reaches_every_channel_of_subject() {
        let registry = ConnectionRegistry::new();
        let (first, _r1) = connect(&registry, "u1", AckBehavior::Ack).await;
        let (second, _r2) = connect(&registry, "u1", AckBehavior::Ack).await;
        let (other, _r3) = connect(&registry, "u2", AckBehavior::Ack).await;

        let request =
            NotificationRequest::new(vec![recipient("u1", DeliveryMethod::Push, None)], "hi");
        let report = dispatcher(&registry, Arc::new(RecordingEmail::default()))
            .dispatch(&request)
            .await;

        assert_eq!(report.push_attempts, 2);
        assert_eq!(first.frames().len(), 1);
        assert_eq!(second.frames().len(), 1);
        assert!(other.frames().is_empty());
    }

    #[tokio::test]
    async fn test_only_connected_push_recipients_get_attempts() {
        let registry = ConnectionRegistry::new();
        let (_p1, _r1) = connect(&registry, "u1", AckBehavior::Ack).await;
        let (_p3, _r3) = connect(&registry, "u3", AckBehavior::Ack).await;

        let request = NotificationRequest::new(
            vec![
                recipient("u1", DeliveryMethod::Push, None),
                recipient("u2", DeliveryMethod::Push, None),
                recipient("u3", DeliveryMethod::Push, None),
                recipient("u4", DeliveryMethod::Push, None),
            ],
            "hi",
        );
        let report = dispatcher(&registry, Arc::new(RecordingEmail::default()))
            .dispatch(&request)
            .await;

        assert_eq!(report.push_attempts, 2);
        assert_eq!(report.push_skipped, 2);
        assert_eq!(report.push_failures, 0);
    }

    #[tokio::test]
    async fn test_email_only_recipient() {
        let registry = ConnectionRegistry::new();
        let (probe, _reg) = connect(&registry, "u1", AckBehavior::Ack).await;
        let email = Arc::new(RecordingEmail::default());

        let request = NotificationRequest::new(
            vec![recipient("u1", DeliveryMethod::Email, Some("u1@example.com"))],
            "hi",
        );
        let dispatcher = dispatcher(&registry, email.clone());
        let report = dispatcher.dispatch(&request).await;
        dispatcher.flush_email().await;

        assert_eq!(report.email_attempts, 1);
        assert_eq!(report.push_attempts, 0);
        assert_eq!(
            email.sent(),
            vec![("hi".to_string(), "u1@example.com".to_string())]
        );
        assert!(probe.frames().is_empty());
    }

    #[tokio::test]
    async fn test_all_method_sends_one_email_and_pushes() {
        let registry = ConnectionRegistry::new();
        let (probe, _reg) = connect(&registry, "u1", AckBehavior::Ack).await;
        let email = Arc::new(RecordingEmail::default());

        let request = NotificationRequest::new(
            vec![recipient("u1", DeliveryMethod::Both, Some("u1@example.com"))],
            "hi",
        );
        let dispatcher = dispatcher(&registry, email.clone());
        let report = dispatcher.dispatch(&request).await;
        dispatcher.flush_email().await;

        assert_eq!(report.email_attempts, 1);
        assert_eq!(email.sent().len(), 1);
        assert_eq!(report.push_attempts, 1);
        assert_eq!(probe.frames().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_address_skips_email_but_still_pushes() {
        let registry = ConnectionRegistry::new();
        let (probe, _reg) = connect(&registry, "u1", AckBehavior::Ack).await;
        let email = Arc::new(RecordingEmail::default());

        let request =
            NotificationRequest::new(vec![recipient("u1", DeliveryMethod::Both, None)], "hi");
        let report = dispatcher(&registry, email.clone()).dispatch(&request).await;

        assert_eq!(report.email_attempts, 0);
        assert!(email.sent().is_empty());
        assert_eq!(probe.frames().len(), 1);
    }

    #[tokio::test]
    async fn test_email_failure_does_not_stop_other_recipients() {
        let registry = ConnectionRegistry::new();
        let (probe, _reg) = connect(&registry, "u2", AckBehavior::Ack).await;
        let email = Arc::new(RecordingEmail {
            fail: true,
            ..Default::default()
        });

        let request = NotificationRequest::new(
            vec![
                recipient("u1", DeliveryMethod::Email, Some("u1@example.com")),
                recipient("u2", DeliveryMethod::Push, None),
            ],
            "hi",
        );
        let dispatcher = dispatcher(&registry, email.clone());
        let report = dispatcher.dispatch(&request).await;
        dispatcher.flush_email().await;

        assert_eq!(report.email_attempts, 1);
        assert_eq!(email.sent().len(), 1);
        assert_eq!(report.push_attempts, 1);
        assert_eq!(probe.frames().len(), 1);
    }

    /// Never finishes sending
    struct StalledEmail;

    #[async_trait]
    impl EmailSender for StalledEmail {
        async fn send(&self, _message: &str, _address: &str) -> Result<(), EmailError> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_email_does_not_delay_push() {
        let registry = ConnectionRegistry::new();
        let (probe, _reg) = connect(&registry, "u2", AckBehavior::Ack).await;
        let dispatcher =
            Dispatcher::new(registry.clone(), Arc::new(StalledEmail), Duration::from_secs(1));

        let request = NotificationRequest::new(
            vec![
                recipient("u1", DeliveryMethod::Email, Some("u1@example.com")),
                recipient("u2", DeliveryMethod::Push, None),
            ],
            "hi",
        );
        let report = tokio::time::timeout(Duration::from_secs(5), dispatcher.dispatch(&request))
            .await
            .expect("dispatch must not wait for the mail gateway");

        assert_eq!(report.email_attempts, 1);
        assert_eq!(report.push_attempts, 1);
        assert_eq!(probe.frames(), vec![r#"{"message":"hi"}"#.to_string()]);
    }

    #[tokio::test]
    async fn test_run_flushes_email_before_returning() {
        let registry = ConnectionRegistry::new();
        let email = Arc::new(RecordingEmail::default());
        let (queue, rx) = NotificationQueue::new(8);
        let worker =
            tokio::spawn(dispatcher(&registry, email.clone()).run(rx, CancellationToken::new()));

        queue
            .enqueue(NotificationRequest::new(
                vec![recipient("u1", DeliveryMethod::Email, Some("u1@example.com"))],
                "hi",
            ))
            .await
            .unwrap();
        drop(queue);
        worker.await.unwrap();

        assert_eq!(email.sent().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_push_terminates_connection() {
        let registry = ConnectionRegistry::new();
        let (_silent, mut silent_reg) = connect(&registry, "u1", AckBehavior::Silent).await;
        let (_bad, mut bad_reg) =
            connect(&registry, "u1", AckBehavior::Reply(b"whatever".to_vec())).await;
        let (_healthy, mut healthy_reg) = connect(&registry, "u1", AckBehavior::Ack).await;

        let request =
            NotificationRequest::new(vec![recipient("u1", DeliveryMethod::Push, None)], "hi");
        let report = dispatcher(&registry, Arc::new(RecordingEmail::default()))
            .dispatch(&request)
            .await;

        assert_eq!(report.push_attempts, 3);
        assert_eq!(report.push_failures, 2);
        assert_eq!(silent_reg.signal.try_take(), Some(CloseReason::DeliveryFailure));
        assert_eq!(bad_reg.signal.try_take(), Some(CloseReason::DeliveryFailure));
        assert_eq!(healthy_reg.signal.try_take(), None);
    }

    #[tokio::test]
    async fn test_run_preserves_submission_order() {
        let registry = ConnectionRegistry::new();
        let (probe, _reg) = connect(&registry, "u1", AckBehavior::Ack).await;
        let (queue, rx) = NotificationQueue::new(8);
        let shutdown = CancellationToken::new();

        let worker = tokio::spawn(
            dispatcher(&registry, Arc::new(RecordingEmail::default())).run(rx, shutdown.clone()),
        );

        for text in ["first", "second", "third"] {
            queue
                .enqueue(NotificationRequest::new(
                    vec![recipient("u1", DeliveryMethod::Push, None)],
                    text,
                ))
                .await
                .unwrap();
        }
        drop(queue);
        worker.await.unwrap();

        assert_eq!(
            probe.frames(),
            vec![
                r#"{"message":"first"}"#.to_string(),
                r#"{"message":"second"}"#.to_string(),
                r#"{"message":"third"}"#.to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let registry = ConnectionRegistry::new();
        let (_queue, rx) = NotificationQueue::new(8);
        let shutdown = CancellationToken::new();

        let worker = tokio::spawn(
            dispatcher(&registry, Arc::new(RecordingEmail::default())).run(rx, shutdown.clone()),
        );
        shutdown.cancel();
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_enqueue_fails_when_dispatcher_gone() {
        let (queue, rx) = NotificationQueue::new(1);
        drop(rx);

        let result = queue
            .enqueue(NotificationRequest::new(Vec::new(), "hi"))
            .await;
        assert!(matches!(result, Err(AppError::ServiceUnavailable(_))));
    }
}
