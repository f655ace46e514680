//! Campaign journal: log ring buffer plus event fan-out

use super::events::{Event, EventPublisher, SubscriberId};
use super::logs::{LogBuffer, LogEntry, Severity};
use tokio::sync::{mpsc, RwLock};
use tracing::{error, info, warn};

pub struct Reporter {
    logs: RwLock<LogBuffer>,
    publisher: EventPublisher,
}

impl Reporter {
    pub fn new(log_capacity: usize) -> Self {
        Self {
            logs: RwLock::new(LogBuffer::new(log_capacity)),
            publisher: EventPublisher::new(),
        }
    }

    /// Append a log entry, mirror it to tracing and publish `log:new`
    pub async fn log(&self, severity: Severity, message: impl Into<String>) -> LogEntry {
        let entry = LogEntry::new(message, severity);

        match severity {
            Severity::Info | Severity::Success => info!(target: "relaypost::campaign", "{}", entry.message),
            Severity::Warning => warn!(target: "relaypost::campaign", "{}", entry.message),
            Severity::Error => error!(target: "relaypost::campaign", "{}", entry.message),
        }

        self.logs.write().await.push(entry.clone());
        self.publisher
            .publish(Event::Log {
                entry: entry.clone(),
            })
            .await;
        entry
    }

    pub async fn info(&self, message: impl Into<String>) {
        self.log(Severity::Info, message).await;
    }

    pub async fn success(&self, message: impl Into<String>) {
        self.log(Severity::Success, message).await;
    }

    pub async fn warning(&self, message: impl Into<String>) {
        self.log(Severity::Warning, message).await;
    }

    pub async fn error(&self, message: impl Into<String>) {
        self.log(Severity::Error, message).await;
    }

    pub async fn publish(&self, event: Event) {
        self.publisher.publish(event).await;
    }

    pub async fn recent_logs(&self, limit: usize) -> Vec<LogEntry> {
        self.logs.read().await.recent(limit)
    }

    pub async fn clear_logs(&self) {
        self.logs.write().await.clear();
    }

    pub async fn register(&self) -> (SubscriberId, mpsc::UnboundedReceiver<Event>) {
        self.publisher.register().await
    }

    pub async fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.publisher.unsubscribe(id).await
    }
}
