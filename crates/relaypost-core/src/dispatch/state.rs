//! Campaign phase and run statistics

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

/// Lifecycle phase of the campaign
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CampaignPhase {
    #[default]
    Idle,
    Running,
    Paused,
    Stopped,
    Completed,
}

impl fmt::Display for CampaignPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CampaignPhase::Idle => "idle",
            CampaignPhase::Running => "running",
            CampaignPhase::Paused => "paused",
            CampaignPhase::Stopped => "stopped",
            CampaignPhase::Completed => "completed",
        };
        f.write_str(s)
    }
}

/// Point-in-time copy of the run statistics. Fields are read one after
/// another, so the copy is not linearizable across fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatisticsSnapshot {
    pub total_sent: u64,
    pub total_failed: u64,
    pub total_emails: u64,
    pub current_email: Option<String>,
    /// Failure count per relay, keyed by `host:port`
    pub relay_failures: HashMap<String, u64>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct StatisticsDetail {
    current_email: Option<String>,
    relay_failures: HashMap<String, u64>,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
}

/// Counters for one run. A fresh instance is created for every run so
/// stragglers of a previous run never touch the current one.
#[derive(Debug, Default)]
pub struct Statistics {
    total_sent: AtomicU64,
    total_failed: AtomicU64,
    total_emails: AtomicU64,
    detail: RwLock<StatisticsDetail>,
}

impl Statistics {
    /// Statistics for a run starting now
    pub fn started(total_emails: u64) -> Self {
        Self {
            total_emails: AtomicU64::new(total_emails),
            detail: RwLock::new(StatisticsDetail {
                start_time: Some(Utc::now()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Count a delivered message; returns the new sent total
    pub async fn record_sent(&self, recipient: &str) -> u64 {
        let total = self.total_sent.fetch_add(1, Ordering::SeqCst) + 1;
        self.detail.write().await.current_email = Some(recipient.to_string());
        total
    }

    /// Count a failed message, attributing it to a relay when known
    pub async fn record_failed(&self, relay_key: Option<&str>) -> u64 {
        let total = self.total_failed.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(key) = relay_key {
            self.record_relay_failure(key).await;
        }
        total
    }

    /// Count a relay failure without a message failure
    pub async fn record_relay_failure(&self, relay_key: &str) -> u64 {
        let mut detail = self.detail.write().await;
        let count = detail.relay_failures.entry(relay_key.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    /// Overwrite the sent total with an authoritative figure
    pub fn set_total_sent(&self, total: u64) {
        self.total_sent.store(total, Ordering::SeqCst);
    }

    /// Stamp the end time unless it is already set
    pub async fn mark_ended(&self) {
        let mut detail = self.detail.write().await;
        if detail.end_time.is_none() {
            detail.end_time = Some(Utc::now());
        }
    }

    pub fn total_sent(&self) -> u64 {
        self.total_sent.load(Ordering::SeqCst)
    }

    pub fn total_failed(&self) -> u64 {
        self.total_failed.load(Ordering::SeqCst)
    }

    pub async fn snapshot(&self) -> StatisticsSnapshot {
        let detail = self.detail.read().await;
        StatisticsSnapshot {
            total_sent: self.total_sent(),
            total_failed: self.total_failed(),
            total_emails: self.total_emails.load(Ordering::SeqCst),
            current_email: detail.current_email.clone(),
            relay_failures: detail.relay_failures.clone(),
            start_time: detail.start_time,
            end_time: detail.end_time,
        }
    }
}

/// Externally visible campaign state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignState {
    #[serde(rename = "state")]
    pub phase: CampaignPhase,
    pub statistics: StatisticsSnapshot,
    pub is_running: bool,
    pub active_workers: usize,
    pub remaining: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_counters() {
        let stats = Statistics::started(3);

        assert_eq!(stats.record_sent("a@x.com").await, 1);
        assert_eq!(stats.record_failed(Some("smtp.x.com:587")).await, 1);
        assert_eq!(stats.record_failed(Some("smtp.x.com:587")).await, 2);
        assert_eq!(stats.record_failed(None).await, 3);

        let snapshot = stats.snapshot().await;
        assert_eq!(snapshot.total_sent, 1);
        assert_eq!(snapshot.total_failed, 3);
        assert_eq!(snapshot.total_emails, 3);
        assert_eq!(snapshot.current_email.as_deref(), Some("a@x.com"));
        assert_eq!(snapshot.relay_failures.get("smtp.x.com:587"), Some(&2));
        assert!(snapshot.start_time.is_some());
        assert!(snapshot.end_time.is_none());
    }

    #[tokio::test]
    async fn test_end_time_is_stamped_once() {
        let stats = Statistics::started(0);
        stats.mark_ended().await;
        let first = stats.snapshot().await.end_time;

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        stats.mark_ended().await;
        assert_eq!(stats.snapshot().await.end_time, first);
    }

    #[test]
    fn test_phase_serialization() {
        assert_eq!(serde_json::to_value(CampaignPhase::Completed).unwrap(), "completed");
        assert_eq!(CampaignPhase::Running.to_string(), "running");
    }
}
