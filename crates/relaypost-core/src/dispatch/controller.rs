//! Campaign Controller - owns the campaign state machine
//!
//! ```text
//! idle --start--> running --(queue drained, workers done)--> completed
//! running --stop | empty pool | spawn error--> stopped
//! completed | stopped --start--> running
//! ```
//!
//! Every start builds a fresh run: new statistics, new pools, new
//! cancellation token. A run is tagged with a generation number so that a
//! supervisor finishing late can never touch the state of a newer run, and
//! a new run only starts once the previous supervisor has fully wound down.

use super::error::ControlError;
use super::events::{Event, Snapshot, SubscriberId, Subscription};
use super::external_progress::ExternalProgress;
use super::identity::IdentityRotator;
use super::logs::LogEntry;
use super::queue::RecipientQueue;
use super::relay_pool::{HealthPolicy, RelayHealth, RelayPool};
use super::reporter::Reporter;
use super::state::{CampaignPhase, CampaignState, Statistics, StatisticsSnapshot};
use super::worker::{DeliveryWorker, RunContext, WorkerExit};
use crate::external::{ExternalSender, ProcessExit};
use crate::relay::RelayClient;
use crate::template::{MessageTemplates, TemplateRenderer};
use relaypost_common::config::{DispatchConfig, DispatchMode, ExternalConfig};
use relaypost_common::Config;
use relaypost_storage::CampaignStore;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, info};

/// Log entries handed to a new subscriber by default
pub const DEFAULT_LOG_BACKFILL: usize = 50;

/// Engine settings taken from the service configuration
#[derive(Debug, Clone, Default)]
pub struct ControllerOptions {
    pub dispatch: DispatchConfig,
    pub external: ExternalConfig,
}

impl From<&Config> for ControllerOptions {
    fn from(config: &Config) -> Self {
        Self {
            dispatch: config.dispatch.clone(),
            external: config.external.clone(),
        }
    }
}

struct ControllerState {
    phase: CampaignPhase,
    generation: u64,
    stats: Arc<Statistics>,
    cancel: CancellationToken,
    active_workers: Arc<AtomicUsize>,
    run: Option<Arc<RunContext>>,
    /// Cancelled once the run's supervisor has exited
    finished: CancellationToken,
}

impl Default for ControllerState {
    fn default() -> Self {
        Self {
            phase: CampaignPhase::Idle,
            generation: 0,
            stats: Arc::new(Statistics::default()),
            cancel: CancellationToken::new(),
            active_workers: Arc::new(AtomicUsize::new(0)),
            run: None,
            finished: finished_token(),
        }
    }
}

fn finished_token() -> CancellationToken {
    let token = CancellationToken::new();
    token.cancel();
    token
}

enum Launch {
    Workers { ctx: Arc<RunContext>, workers: usize },
    External(ExternalSender),
}

pub struct CampaignController {
    store: Arc<dyn CampaignStore>,
    client: Arc<dyn RelayClient>,
    renderer: Arc<TemplateRenderer>,
    reporter: Arc<Reporter>,
    options: ControllerOptions,
    state: RwLock<ControllerState>,
    starting: Mutex<()>,
}

impl CampaignController {
    pub fn new(
        store: Arc<dyn CampaignStore>,
        client: Arc<dyn RelayClient>,
        options: ControllerOptions,
    ) -> Self {
        Self {
            store,
            client,
            renderer: Arc::new(TemplateRenderer::new()),
            reporter: Arc::new(Reporter::new(options.dispatch.log_capacity)),
            options,
            state: RwLock::new(ControllerState::default()),
            starting: Mutex::new(()),
        }
    }

    /// Start a new run. Fails without touching state when a run is active
    /// or the campaign inputs cannot be loaded.
    ///
    /// A previous run that was stopped but is still draining is waited for
    /// first, so its late sends and write-back land before anything of the
    /// new run is loaded. The stop grace period bounds that wait.
    pub async fn start(self: &Arc<Self>) -> Result<(), ControlError> {
        let _starting = self.starting.lock().await;

        let previous = {
            let state = self.state.read().await;
            if state.phase == CampaignPhase::Running {
                return Err(ControlError::AlreadyRunning);
            }
            state.finished.clone()
        };
        if !previous.is_cancelled() {
            debug!("Waiting for the previous run to wind down");
            previous.cancelled().await;
        }

        let mut state = self.state.write().await;
        let settings = self.store.campaign_settings().await?;
        let recipients = self.store.load_recipients().await?;
        if recipients.is_empty() {
            return Err(ControlError::EmptyRecipientList);
        }

        let total = recipients.len();
        let stats = Arc::new(Statistics::started(total as u64));
        let cancel = CancellationToken::new();
        let active_workers = Arc::new(AtomicUsize::new(0));

        let launch = match self.options.dispatch.mode {
            DispatchMode::InProcess => {
                let relays = self.store.load_relays().await?;
                if relays.is_empty() {
                    return Err(ControlError::EmptyRelayPool);
                }
                let identities = self.store.load_identities().await?;
                if identities.is_empty() {
                    return Err(ControlError::EmptyIdentityPool);
                }
                let body = self.store.load_template().await?;

                let dispatch = &self.options.dispatch;
                let workers = settings.worker_count(dispatch.default_threads, dispatch.max_threads);
                let policy = HealthPolicy {
                    failure_threshold: dispatch.failure_threshold,
                    disable_on_permanent: dispatch.disable_on_permanent,
                };
                let templates = MessageTemplates {
                    subject: settings.subject.clone(),
                    body,
                    sender_name: settings.sender_name.clone(),
                };

                let ctx = Arc::new(RunContext {
                    pool: RelayPool::new(relays, policy),
                    identities: IdentityRotator::new(identities),
                    queue: RecipientQueue::new(recipients),
                    client: self.client.clone(),
                    renderer: self.renderer.clone(),
                    templates,
                    settings,
                    stats: stats.clone(),
                    reporter: self.reporter.clone(),
                    cancel: cancel.clone(),
                    active_workers: active_workers.clone(),
                    delivered: Mutex::new(Vec::new()),
                });
                Launch::Workers { ctx, workers }
            }
            DispatchMode::External => {
                let sender = ExternalSender::from_config(&self.options.external)
                    .ok_or(ControlError::ExternalNotConfigured)?;
                Launch::External(sender)
            }
        };

        self.reporter.clear_logs().await;
        let generation = state.generation + 1;
        let finished = CancellationToken::new();
        *state = ControllerState {
            phase: CampaignPhase::Running,
            generation,
            stats: stats.clone(),
            cancel: cancel.clone(),
            active_workers: active_workers.clone(),
            run: match &launch {
                Launch::Workers { ctx, .. } => Some(ctx.clone()),
                Launch::External(_) => None,
            },
            finished: finished.clone(),
        };

        info!(generation, recipients = total, "Campaign starting");
        self.reporter.info("Starting email campaign...").await;
        self.reporter
            .publish(Event::Started {
                phase: CampaignPhase::Running,
            })
            .await;

        // Cancels `finished` when the supervisor exits, by any path
        let done = finished.drop_guard();
        match launch {
            Launch::Workers { ctx, workers } => {
                self.reporter
                    .info(format!(
                        "Loaded {} SMTP servers, {} sender identities, {} recipients",
                        ctx.pool.len().await,
                        ctx.identities.len(),
                        total
                    ))
                    .await;
                self.reporter
                    .info(format!("Starting {} worker(s)", workers))
                    .await;
                tokio::spawn(Arc::clone(self).supervise(generation, ctx, workers, done));
            }
            Launch::External(sender) => {
                self.reporter
                    .info(format!("Launching external sender {}", sender.program()))
                    .await;
                tokio::spawn(Arc::clone(self).supervise_external(
                    generation,
                    sender,
                    stats,
                    cancel,
                    active_workers,
                    done,
                ));
            }
        }

        Ok(())
    }

    /// Request a stop. The phase flips to `stopped` immediately; sends
    /// already in flight finish and still count.
    pub async fn stop(&self) -> Result<(), ControlError> {
        let stats = {
            let mut state = self.state.write().await;
            if state.phase != CampaignPhase::Running {
                return Err(ControlError::NotRunning);
            }
            state.phase = CampaignPhase::Stopped;
            state.cancel.cancel();
            state.stats.clone()
        };

        stats.mark_ended().await;
        self.reporter.info("Stopping campaign...").await;
        self.reporter
            .publish(Event::Stopped {
                phase: CampaignPhase::Stopped,
            })
            .await;
        Ok(())
    }

    /// Wait for the current run to wind down, write-back included
    pub async fn wait(&self) {
        let finished = self.state.read().await.finished.clone();
        finished.cancelled().await;
    }

    pub async fn phase(&self) -> CampaignPhase {
        self.state.read().await.phase
    }

    pub async fn get_state(&self) -> CampaignState {
        let state = self.state.read().await;
        CampaignState {
            phase: state.phase,
            statistics: state.stats.snapshot().await,
            is_running: state.phase == CampaignPhase::Running,
            active_workers: state.active_workers.load(Ordering::SeqCst),
            remaining: state
                .run
                .as_ref()
                .map(|run| run.queue.remaining_count())
                .unwrap_or(0),
        }
    }

    pub async fn get_statistics(&self) -> StatisticsSnapshot {
        let stats = self.state.read().await.stats.clone();
        stats.snapshot().await
    }

    pub async fn get_logs(&self, limit: usize) -> Vec<LogEntry> {
        self.reporter.recent_logs(limit).await
    }

    pub async fn clear_logs(&self) {
        self.reporter.clear_logs().await;
    }

    /// Health of the relays in the current run
    pub async fn relay_health(&self) -> Vec<RelayHealth> {
        let run = self.state.read().await.run.clone();
        match run {
            Some(run) => run.pool.snapshot().await,
            None => Vec::new(),
        }
    }

    /// Re-enable every relay of the current run; false when there is none
    pub async fn reset_relays(&self) -> bool {
        let run = self.state.read().await.run.clone();
        match run {
            Some(run) => {
                run.pool.reset_all().await;
                self.reporter.info("All SMTP servers re-enabled").await;
                true
            }
            None => false,
        }
    }

    /// Re-enable the relays of the current run at `host:port`; false when
    /// there is no run or no relay matches
    pub async fn reset_relay(&self, endpoint: &str) -> bool {
        let Some(run) = self.state.read().await.run.clone() else {
            return false;
        };
        if !run.pool.reset(endpoint).await {
            return false;
        }
        self.reporter
            .info(format!("SMTP server {} re-enabled", endpoint))
            .await;
        true
    }

    /// Attach an observer. It gets the current state and the last
    /// `log_backfill` log entries, then every event published afterwards.
    pub async fn subscribe(&self, log_backfill: usize) -> Subscription {
        // Register first so nothing falls between snapshot and stream
        let (id, receiver) = self.reporter.register().await;
        let snapshot = Snapshot {
            state: self.get_state().await,
            logs: self.reporter.recent_logs(log_backfill).await,
        };
        Subscription::new(id, snapshot, receiver)
    }

    pub async fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.reporter.unsubscribe(id).await
    }

    async fn supervise(
        self: Arc<Self>,
        generation: u64,
        ctx: Arc<RunContext>,
        workers: usize,
        _done: DropGuard,
    ) {
        let mut set = JoinSet::new();
        for id in 1..=workers {
            set.spawn(DeliveryWorker::new(id, ctx.clone()).run());
        }

        let cancelled = loop {
            tokio::select! {
                joined = set.join_next() => match joined {
                    Some(joined) => self.on_worker_exit(generation, joined).await,
                    None => break false,
                },
                _ = ctx.cancel.cancelled() => break true,
            }
        };

        if cancelled {
            let grace = Duration::from_secs(self.options.dispatch.stop_grace_secs);
            let drain = async {
                while let Some(joined) = set.join_next().await {
                    self.on_worker_exit(generation, joined).await;
                }
            };
            if tokio::time::timeout(grace, drain).await.is_err() {
                self.reporter
                    .warning(format!(
                        "{} worker(s) still busy after {}s, abandoning their sends",
                        ctx.active_workers.load(Ordering::SeqCst),
                        grace.as_secs()
                    ))
                    .await;
                set.abort_all();
                while set.join_next().await.is_some() {}
            }
        }

        self.write_back(&ctx).await;
        self.summarize_relays(&ctx).await;
        self.finish(generation, true).await;
    }

    async fn on_worker_exit(&self, generation: u64, joined: Result<WorkerExit, JoinError>) {
        match joined {
            Ok(WorkerExit::Fatal(err)) => self.fail(generation, &err).await,
            Ok(exit) => debug!(?exit, "Worker finished"),
            Err(e) if e.is_panic() => {
                error!(error = %e, "Worker task panicked");
                self.reporter.error(format!("Worker crashed: {}", e)).await;
            }
            Err(_) => {}
        }
    }

    async fn supervise_external(
        self: Arc<Self>,
        generation: u64,
        sender: ExternalSender,
        stats: Arc<Statistics>,
        cancel: CancellationToken,
        active_workers: Arc<AtomicUsize>,
        _done: DropGuard,
    ) {
        let sink = ExternalProgress::new(stats, self.reporter.clone());

        active_workers.fetch_add(1, Ordering::SeqCst);
        let result = sender.run(&sink, cancel).await;
        active_workers.fetch_sub(1, Ordering::SeqCst);

        match result {
            Ok(ProcessExit::Cancelled) => {
                self.reporter.info("External sender terminated").await;
                self.finish(generation, false).await;
            }
            Ok(exit @ ProcessExit::Exited { code }) => {
                let code = code.map_or_else(|| "unknown".to_string(), |c| c.to_string());
                let message = format!("Campaign process exited with code {}", code);
                if exit.success() {
                    self.reporter.info(message).await;
                } else {
                    self.reporter.error(message).await;
                }
                self.finish(generation, exit.success()).await;
            }
            Err(e) => {
                let err = ControlError::Spawn(e.to_string());
                self.fail(generation, &err).await;
            }
        }
    }

    /// Drop delivered recipients from the persisted list unless in test mode
    async fn write_back(&self, ctx: &RunContext) {
        if ctx.settings.test_mode {
            self.reporter
                .info("Test mode: recipient list left unchanged")
                .await;
            return;
        }

        let delivered = std::mem::take(&mut *ctx.delivered.lock().await);
        if delivered.is_empty() {
            return;
        }

        match self.store.remove_recipients(&delivered).await {
            Ok(removed) => {
                self.reporter
                    .info(format!("Removed {} sent recipients from the list", removed))
                    .await;
            }
            Err(e) => {
                self.reporter
                    .error(format!("Failed to update recipient list: {}", e))
                    .await;
            }
        }
    }

    async fn summarize_relays(&self, ctx: &RunContext) {
        let failures = ctx.stats.snapshot().await.relay_failures;
        let mut failures: Vec<_> = failures.into_iter().collect();
        failures.sort();
        for (relay, count) in failures {
            self.reporter
                .info(format!("SMTP server {}: {} failures", relay, count))
                .await;
        }
    }

    /// End a run. `success` decides between completed and stopped; a run
    /// that was already stopped only gets its end time stamped.
    async fn finish(&self, generation: u64, success: bool) {
        let stats = {
            let mut state = self.state.write().await;
            if state.generation != generation {
                return;
            }
            state.stats.mark_ended().await;
            if state.phase != CampaignPhase::Running {
                return;
            }
            state.phase = if success {
                CampaignPhase::Completed
            } else {
                CampaignPhase::Stopped
            };
            state.stats.clone()
        };

        if success {
            let statistics = stats.snapshot().await;
            info!(
                generation,
                sent = statistics.total_sent,
                failed = statistics.total_failed,
                "Campaign completed"
            );
            self.reporter
                .info(format!(
                    "Campaign completed. Sent: {}, Failed: {}",
                    statistics.total_sent, statistics.total_failed
                ))
                .await;
            self.reporter
                .publish(Event::Completed {
                    phase: CampaignPhase::Completed,
                    statistics,
                })
                .await;
        } else {
            self.reporter
                .publish(Event::Stopped {
                    phase: CampaignPhase::Stopped,
                })
                .await;
        }
    }

    /// Stop the run because it cannot continue
    async fn fail(&self, generation: u64, err: &ControlError) {
        let stats = {
            let mut state = self.state.write().await;
            if state.generation != generation || state.phase != CampaignPhase::Running {
                return;
            }
            state.phase = CampaignPhase::Stopped;
            state.cancel.cancel();
            state.stats.clone()
        };

        stats.mark_ended().await;
        error!(generation, code = err.code(), "Campaign aborted: {}", err);
        self.reporter
            .error(format!("Campaign stopped: {}", err))
            .await;
        self.reporter
            .publish(Event::Stopped {
                phase: CampaignPhase::Stopped,
            })
            .await;
    }
}
