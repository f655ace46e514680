//! Progress events and the subscriber registry
//!
//! Every subscriber owns an unbounded channel. Publishing never waits on a
//! subscriber: a slow one simply accumulates events, and one whose receiver
//! has been dropped is removed on the next publish.

use super::logs::LogEntry;
use super::state::{CampaignPhase, CampaignState, StatisticsSnapshot};
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;
use uuid::Uuid;

/// Subscriber handle
pub type SubscriberId = Uuid;

/// Progress counters carried by `campaign:progress`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub total_sent: u64,
    pub total_failed: u64,
    pub current_email: Option<String>,
}

/// Named events delivered to observers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum Event {
    #[serde(rename = "campaign:started")]
    Started { phase: CampaignPhase },

    #[serde(rename = "campaign:progress")]
    Progress(Progress),

    #[serde(rename = "campaign:completed")]
    Completed {
        phase: CampaignPhase,
        statistics: StatisticsSnapshot,
    },

    #[serde(rename = "campaign:stopped")]
    Stopped { phase: CampaignPhase },

    #[serde(rename = "relay:disabled")]
    RelayDisabled { endpoint: String, failures: u64 },

    #[serde(rename = "log:new")]
    Log { entry: LogEntry },
}

impl Event {
    /// Wire name of the event
    pub fn name(&self) -> &'static str {
        match self {
            Event::Started { .. } => "campaign:started",
            Event::Progress(_) => "campaign:progress",
            Event::Completed { .. } => "campaign:completed",
            Event::Stopped { .. } => "campaign:stopped",
            Event::RelayDisabled { .. } => "relay:disabled",
            Event::Log { .. } => "log:new",
        }
    }
}

/// State handed to a subscriber when it attaches
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub state: CampaignState,
    pub logs: Vec<LogEntry>,
}

/// A live subscription
pub struct Subscription {
    pub id: SubscriberId,
    pub snapshot: Snapshot,
    receiver: mpsc::UnboundedReceiver<Event>,
}

impl Subscription {
    pub(crate) fn new(
        id: SubscriberId,
        snapshot: Snapshot,
        receiver: mpsc::UnboundedReceiver<Event>,
    ) -> Self {
        Self {
            id,
            snapshot,
            receiver,
        }
    }

    /// Next event; `None` once the publisher is gone
    pub async fn recv(&mut self) -> Option<Event> {
        self.receiver.recv().await
    }

    /// Next event if one is already queued
    pub fn try_recv(&mut self) -> Option<Event> {
        self.receiver.try_recv().ok()
    }
}

/// Fan-out broadcaster
#[derive(Default)]
pub struct EventPublisher {
    subscribers: RwLock<HashMap<SubscriberId, mpsc::UnboundedSender<Event>>>,
}

impl EventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber; it receives every event published afterwards
    pub async fn register(&self) -> (SubscriberId, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        self.subscribers.write().await.insert(id, tx);
        debug!(subscriber = %id, "Subscriber attached");
        (id, rx)
    }

    /// Remove a subscriber
    pub async fn unsubscribe(&self, id: SubscriberId) -> bool {
        let removed = self.subscribers.write().await.remove(&id).is_some();
        if removed {
            debug!(subscriber = %id, "Subscriber detached");
        }
        removed
    }

    /// Deliver an event to every subscriber independently
    pub async fn publish(&self, event: Event) {
        let mut disconnected = Vec::new();
        {
            let subscribers = self.subscribers.read().await;
            for (id, tx) in subscribers.iter() {
                if tx.send(event.clone()).is_err() {
                    disconnected.push(*id);
                }
            }
        }

        if !disconnected.is_empty() {
            let mut subscribers = self.subscribers.write().await;
            for id in disconnected {
                subscribers.remove(&id);
                debug!(subscriber = %id, "Dropped disconnected subscriber");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fan_out_to_all_subscribers() {
        let publisher = EventPublisher::new();
        let (_, mut first) = publisher.register().await;
        let (_, mut second) = publisher.register().await;

        publisher
            .publish(Event::Started {
                phase: CampaignPhase::Running,
            })
            .await;

        assert_eq!(first.recv().await.unwrap().name(), "campaign:started");
        assert_eq!(second.recv().await.unwrap().name(), "campaign:started");
    }

    #[tokio::test]
    async fn test_no_backfill_for_late_subscriber() {
        let publisher = EventPublisher::new();
        publisher
            .publish(Event::Stopped {
                phase: CampaignPhase::Stopped,
            })
            .await;

        let (_, mut late) = publisher.register().await;
        assert!(late.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_disconnected_subscriber_is_dropped() {
        let publisher = EventPublisher::new();
        let (_, gone) = publisher.register().await;
        let (_, mut alive) = publisher.register().await;
        drop(gone);

        publisher
            .publish(Event::RelayDisabled {
                endpoint: "smtp.x.com:587".into(),
                failures: 2,
            })
            .await;

        assert_eq!(alive.recv().await.unwrap().name(), "relay:disabled");
        assert_eq!(publisher.subscribers.read().await.len(), 1);
    }

    #[tokio::test]
    async fn test_slow_subscriber_does_not_block() {
        let publisher = EventPublisher::new();
        let (_, _slow) = publisher.register().await;
        let (_, mut fast) = publisher.register().await;

        for i in 0..1000 {
            publisher
                .publish(Event::Progress(Progress {
                    total_sent: i,
                    total_failed: 0,
                    current_email: None,
                }))
                .await;
        }

        let mut received = 0;
        while fast.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, 1000);
    }

    #[test]
    fn test_event_wire_format() {
        let event = Event::Progress(Progress {
            total_sent: 3,
            total_failed: 1,
            current_email: Some("a@x.com".into()),
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "campaign:progress");
        assert_eq!(json["data"]["totalSent"], 3);
        assert_eq!(json["data"]["currentEmail"], "a@x.com");
    }
}
