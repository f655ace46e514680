//! Delivery worker
//!
//! Each worker loops claim -> render -> send -> report until the queue is
//! empty or the run is cancelled. Every recipient gets exactly one attempt;
//! relay rotation and disablement are the only retry mechanism.

use super::error::ControlError;
use super::events::{Event, Progress};
use super::identity::IdentityRotator;
use super::queue::RecipientQueue;
use super::relay_pool::{RelayDisabled, RelayLease, RelayPool};
use super::reporter::Reporter;
use super::state::Statistics;
use crate::relay::{OutboundMessage, RelayClient, RelayError, RelayErrorKind};
use crate::template::{MergeContext, MessageTemplates, TemplateRenderer};
use futures::FutureExt;
use relaypost_common::{CampaignSettings, RelayEndpoint, Recipient, SenderIdentity};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, Instrument};

/// Result of one delivery attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Sent,
    /// Network or timeout trouble; the relay stays active
    TransientFailure { reason: String },
    /// Authentication, quota or blacklist rejection; the relay may be disabled
    PermanentRelayFailure { reason: String },
    /// Anything unexpected, including a panic inside the attempt
    FatalError { reason: String },
}

impl From<RelayError> for DeliveryOutcome {
    fn from(err: RelayError) -> Self {
        let reason = err.message;
        match err.kind {
            RelayErrorKind::Transient => DeliveryOutcome::TransientFailure { reason },
            RelayErrorKind::Permanent => DeliveryOutcome::PermanentRelayFailure { reason },
            RelayErrorKind::Unexpected => DeliveryOutcome::FatalError { reason },
        }
    }
}

/// Why a worker stopped looping
#[derive(Debug)]
pub enum WorkerExit {
    /// Queue empty
    Drained,
    /// Stop was requested
    Cancelled,
    /// A pool ran dry; the run must stop
    Fatal(ControlError),
}

/// Everything the workers of one run share
pub(crate) struct RunContext {
    pub pool: RelayPool,
    pub identities: IdentityRotator,
    pub queue: RecipientQueue,
    pub client: Arc<dyn RelayClient>,
    pub renderer: Arc<TemplateRenderer>,
    pub templates: MessageTemplates,
    pub settings: CampaignSettings,
    pub stats: Arc<Statistics>,
    pub reporter: Arc<Reporter>,
    pub cancel: CancellationToken,
    pub active_workers: Arc<AtomicUsize>,
    /// Recipients that were sent, for write-back at the end of the run
    pub delivered: Mutex<Vec<Recipient>>,
}

/// Keeps the active worker count accurate even when a worker is aborted
struct ActiveGuard(Arc<AtomicUsize>);

impl ActiveGuard {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub(crate) struct DeliveryWorker {
    id: usize,
    ctx: Arc<RunContext>,
    _active: ActiveGuard,
}

impl DeliveryWorker {
    /// Counts as active from construction until dropped
    pub fn new(id: usize, ctx: Arc<RunContext>) -> Self {
        let active = ActiveGuard::enter(&ctx.active_workers);
        Self {
            id,
            ctx,
            _active: active,
        }
    }

    pub async fn run(self) -> WorkerExit {
        let span = info_span!("worker", id = self.id);
        self.run_loop().instrument(span).await
    }

    async fn run_loop(&self) -> WorkerExit {
        debug!("Worker started");
        loop {
            if self.ctx.cancel.is_cancelled() {
                debug!("Worker observed stop");
                return WorkerExit::Cancelled;
            }

            let Some(recipient) = self.ctx.queue.take_next().await else {
                debug!("Queue drained");
                return WorkerExit::Drained;
            };

            let lease = match self.ctx.pool.next().await {
                Ok(lease) => lease,
                Err(e) => return WorkerExit::Fatal(e),
            };
            let identity = match self.ctx.identities.next() {
                Ok(identity) => identity,
                Err(e) => return WorkerExit::Fatal(e),
            };

            if self.ctx.settings.debug {
                self.ctx
                    .reporter
                    .info(format!(
                        "Worker {}: {} via {} as {}",
                        self.id, recipient, lease.endpoint, identity
                    ))
                    .await;
            }

            let outcome = self.attempt(&recipient, &lease.endpoint, &identity).await;
            self.report(&recipient, &lease, outcome).await;

            let pause = self.ctx.settings.sleep_time;
            if !pause.is_zero() {
                tokio::select! {
                    _ = self.ctx.cancel.cancelled() => return WorkerExit::Cancelled,
                    _ = tokio::time::sleep(pause) => {}
                }
            }
        }
    }

    /// Render and deliver one message. Panics are contained here.
    async fn attempt(
        &self,
        recipient: &Recipient,
        endpoint: &RelayEndpoint,
        identity: &SenderIdentity,
    ) -> DeliveryOutcome {
        let delivery = async {
            let merge = MergeContext::new(recipient, identity);
            let rendered = self.ctx.renderer.render(&self.ctx.templates, &merge);
            let message = OutboundMessage {
                from: identity.clone(),
                sender_name: rendered.sender_name,
                to: recipient.clone(),
                subject: rendered.subject,
                body: rendered.body,
                important: self.ctx.settings.important,
            };
            self.deliver(endpoint, &message).await
        };

        match AssertUnwindSafe(delivery).catch_unwind().await {
            Ok(Ok(())) => DeliveryOutcome::Sent,
            Ok(Err(err)) => err.into(),
            Err(panic) => DeliveryOutcome::FatalError {
                reason: panic_message(panic),
            },
        }
    }

    /// The session is closed on every path that returns
    async fn deliver(
        &self,
        endpoint: &RelayEndpoint,
        message: &OutboundMessage,
    ) -> Result<(), RelayError> {
        let mut session = self.ctx.client.connect(endpoint).await?;
        let result = match session.authenticate().await {
            Ok(()) => session.send(message).await,
            Err(e) => Err(e),
        };
        session.close().await;
        result
    }

    async fn report(&self, recipient: &Recipient, lease: &RelayLease, outcome: DeliveryOutcome) {
        let ctx = &self.ctx;
        let relay_key = lease.endpoint.key();

        let disabled = match outcome {
            DeliveryOutcome::Sent => {
                ctx.stats.record_sent(&recipient.address).await;
                ctx.delivered.lock().await.push(recipient.clone());
                ctx.reporter
                    .success(format!("Successfully sent to {}", recipient))
                    .await;
                ctx.pool.report_outcome(lease.slot, true, false).await
            }
            DeliveryOutcome::TransientFailure { reason } => {
                ctx.stats.record_failed(Some(&relay_key)).await;
                ctx.reporter
                    .error(format!("Failed to send to {} via {}: {}", recipient, relay_key, reason))
                    .await;
                ctx.pool.report_outcome(lease.slot, false, false).await
            }
            DeliveryOutcome::PermanentRelayFailure { reason } => {
                ctx.stats.record_failed(Some(&relay_key)).await;
                ctx.reporter
                    .error(format!(
                        "Relay {} rejected {}: {}",
                        relay_key, recipient, reason
                    ))
                    .await;
                ctx.pool.report_outcome(lease.slot, false, true).await
            }
            DeliveryOutcome::FatalError { reason } => {
                // Counts toward the threshold but never disables on its own
                ctx.stats.record_failed(Some(&relay_key)).await;
                ctx.reporter
                    .error(format!("Unexpected error sending to {}: {}", recipient, reason))
                    .await;
                ctx.pool.report_outcome(lease.slot, false, false).await
            }
        };

        if let Some(RelayDisabled { endpoint, failures }) = disabled {
            ctx.reporter
                .warning(format!(
                    "SMTP server {} disabled after {} consecutive failures",
                    endpoint, failures
                ))
                .await;
            ctx.reporter
                .publish(Event::RelayDisabled { endpoint, failures })
                .await;
        }

        ctx.reporter
            .publish(Event::Progress(Progress {
                total_sent: ctx.stats.total_sent(),
                total_failed: ctx.stats.total_failed(),
                current_email: Some(recipient.address.clone()),
            }))
            .await;
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("worker panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("worker panicked: {}", s)
    } else {
        "worker panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::relay_pool::HealthPolicy;
    use crate::dispatch::testing::{ScriptedClient, Step};
    use pretty_assertions::assert_eq;

    fn context(client: Arc<ScriptedClient>, recipients: &[&str], settings: CampaignSettings) -> Arc<RunContext> {
        Arc::new(RunContext {
            pool: RelayPool::new(
                vec![RelayEndpoint::new("smtp.example.com", 587, "user", "pw")],
                HealthPolicy::default(),
            ),
            identities: IdentityRotator::new(vec![SenderIdentity::new("news@acme.com")]),
            queue: RecipientQueue::new(recipients.iter().map(|r| Recipient::new(*r)).collect()),
            client,
            renderer: Arc::new(TemplateRenderer::new()),
            templates: MessageTemplates {
                subject: "Hi {{email}}".into(),
                body: "<p>{{token}}</p>".into(),
                sender_name: None,
            },
            settings,
            stats: Arc::new(Statistics::started(recipients.len() as u64)),
            reporter: Arc::new(Reporter::new(100)),
            cancel: CancellationToken::new(),
            active_workers: Arc::new(AtomicUsize::new(0)),
            delivered: Mutex::new(Vec::new()),
        })
    }

    #[test]
    fn test_outcome_from_relay_error() {
        assert_eq!(
            DeliveryOutcome::from(RelayError::permanent("535 auth")),
            DeliveryOutcome::PermanentRelayFailure {
                reason: "535 auth".into()
            }
        );
        assert!(matches!(
            DeliveryOutcome::from(RelayError::unexpected("bad")),
            DeliveryOutcome::FatalError { .. }
        ));
    }

    #[tokio::test]
    async fn test_worker_drains_queue() {
        let client = Arc::new(ScriptedClient::new(Vec::new()));
        let ctx = context(client.clone(), &["a@x.com", "b@x.com"], CampaignSettings::default());

        let worker = DeliveryWorker::new(1, ctx.clone());
        assert_eq!(ctx.active_workers.load(Ordering::SeqCst), 1);
        assert!(matches!(worker.run().await, WorkerExit::Drained));
        assert_eq!(ctx.active_workers.load(Ordering::SeqCst), 0);

        assert_eq!(ctx.stats.total_sent(), 2);
        assert_eq!(ctx.delivered.lock().await.len(), 2);

        let sent = client.attempts().await;
        assert_eq!(sent[0].subject, "Hi a@x.com");
        assert_eq!(sent[1].to.address, "b@x.com");
        assert_eq!(client.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_panic_is_contained_and_session_released() {
        let client = Arc::new(ScriptedClient::new(vec![Step::Panic, Step::Ok]));
        let ctx = context(client.clone(), &["a@x.com", "b@x.com"], CampaignSettings::default());

        assert!(matches!(DeliveryWorker::new(1, ctx.clone()).run().await, WorkerExit::Drained));
        assert_eq!(ctx.stats.total_failed(), 1);
        assert_eq!(ctx.stats.total_sent(), 1);
        assert_eq!(client.open_sessions(), 0);

        // The later success cleared the failure the panic left on the relay
        let health = ctx.pool.snapshot().await;
        assert_eq!(health[0].consecutive_failures, 0);
        assert_eq!(ctx.pool.active_count().await, 1);
    }

    #[tokio::test]
    async fn test_unexpected_errors_count_toward_threshold() {
        let client = Arc::new(ScriptedClient::new(vec![Step::Unexpected, Step::Panic]));
        let ctx = context(
            client.clone(),
            &["a@x.com", "b@x.com", "c@x.com"],
            CampaignSettings::default(),
        );

        let exit = DeliveryWorker::new(1, ctx.clone()).run().await;
        assert!(matches!(exit, WorkerExit::Fatal(ControlError::EmptyRelayPool)));

        let snapshot = ctx.stats.snapshot().await;
        assert_eq!(snapshot.total_failed, 2);
        assert_eq!(snapshot.relay_failures.get("smtp.example.com:587"), Some(&2));
        assert_eq!(client.attempts().await.len(), 2);
    }

    #[tokio::test]
    async fn test_transient_failure_keeps_relay() {
        let client = Arc::new(ScriptedClient::new(vec![Step::Transient]));
        let ctx = context(client.clone(), &["a@x.com"], CampaignSettings::default());

        DeliveryWorker::new(1, ctx.clone()).run().await;
        let snapshot = ctx.stats.snapshot().await;
        assert_eq!(snapshot.total_failed, 1);
        assert_eq!(snapshot.relay_failures.get("smtp.example.com:587"), Some(&1));
        assert_eq!(ctx.pool.active_count().await, 1);
        assert!(ctx.delivered.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_sleep_is_cancellable() {
        let client = Arc::new(ScriptedClient::new(Vec::new()));
        let settings = CampaignSettings {
            sleep_time: std::time::Duration::from_secs(3600),
            ..Default::default()
        };
        let ctx = context(client, &["a@x.com", "b@x.com"], settings);

        let handle = tokio::spawn(DeliveryWorker::new(1, ctx.clone()).run());
        while ctx.stats.total_sent() == 0 {
            tokio::task::yield_now().await;
        }
        ctx.cancel.cancel();

        assert!(matches!(handle.await.unwrap(), WorkerExit::Cancelled));
        assert_eq!(ctx.queue.remaining_count(), 1);
    }
}
