//! Relay pool with health tracking
//!
//! Endpoints rotate round-robin over the active subset. The cursor and the
//! health counters live behind one mutex so that selection and disablement
//! are never observed half-applied by concurrent workers.

use super::error::ControlError;
use relaypost_common::RelayEndpoint;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Health status of one endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayStatus {
    Active,
    Disabled,
}

/// Disablement policy
#[derive(Debug, Clone, Copy)]
pub struct HealthPolicy {
    /// Consecutive failures that disable an endpoint; 0 never disables
    pub failure_threshold: u32,
    /// Disable immediately when the relay client signals a permanent failure
    pub disable_on_permanent: bool,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 2,
            disable_on_permanent: true,
        }
    }
}

/// An endpoint handed to a worker. `slot` identifies it when reporting.
#[derive(Debug, Clone)]
pub struct RelayLease {
    pub slot: usize,
    pub endpoint: RelayEndpoint,
}

/// Emitted exactly once when an endpoint goes from active to disabled
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayDisabled {
    pub endpoint: String,
    pub failures: u64,
}

/// Read-only view of one endpoint's health
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayHealth {
    pub endpoint: String,
    pub username: String,
    pub status: RelayStatus,
    pub consecutive_failures: u64,
}

#[derive(Debug)]
struct RelaySlot {
    endpoint: RelayEndpoint,
    status: RelayStatus,
    consecutive_failures: u64,
}

#[derive(Debug)]
struct PoolState {
    slots: Vec<RelaySlot>,
    cursor: usize,
}

pub struct RelayPool {
    state: Mutex<PoolState>,
    policy: HealthPolicy,
}

impl RelayPool {
    pub fn new(endpoints: Vec<RelayEndpoint>, policy: HealthPolicy) -> Self {
        let slots = endpoints
            .into_iter()
            .map(|endpoint| RelaySlot {
                endpoint,
                status: RelayStatus::Active,
                consecutive_failures: 0,
            })
            .collect();

        Self {
            state: Mutex::new(PoolState { slots, cursor: 0 }),
            policy,
        }
    }

    /// Next active endpoint in rotation
    pub async fn next(&self) -> Result<RelayLease, ControlError> {
        let mut state = self.state.lock().await;
        let len = state.slots.len();

        for _ in 0..len {
            let slot = state.cursor % len;
            state.cursor = (slot + 1) % len;
            if state.slots[slot].status == RelayStatus::Active {
                return Ok(RelayLease {
                    slot,
                    endpoint: state.slots[slot].endpoint.clone(),
                });
            }
        }

        Err(ControlError::EmptyRelayPool)
    }

    /// Apply the outcome of one delivery attempt.
    ///
    /// `permanent` is the relay client's classification; whether it disables
    /// the endpoint on its own is up to the policy. Returns the disablement
    /// when this report is the one that disabled the endpoint; later reports
    /// against a disabled endpoint still count failures but never return it
    /// again.
    pub async fn report_outcome(
        &self,
        slot: usize,
        success: bool,
        permanent: bool,
    ) -> Option<RelayDisabled> {
        let mut state = self.state.lock().await;
        let entry = state.slots.get_mut(slot)?;

        if success {
            entry.consecutive_failures = 0;
            return None;
        }

        entry.consecutive_failures += 1;
        if entry.status == RelayStatus::Disabled {
            return None;
        }

        let threshold = u64::from(self.policy.failure_threshold);
        let over_threshold = threshold > 0 && entry.consecutive_failures >= threshold;
        let permanent = permanent && self.policy.disable_on_permanent;
        if !(permanent || over_threshold) {
            debug!(
                relay = %entry.endpoint,
                failures = entry.consecutive_failures,
                "Relay failure recorded"
            );
            return None;
        }

        entry.status = RelayStatus::Disabled;
        warn!(
            relay = %entry.endpoint,
            failures = entry.consecutive_failures,
            "Relay disabled"
        );
        Some(RelayDisabled {
            endpoint: entry.endpoint.key(),
            failures: entry.consecutive_failures,
        })
    }

    /// Reactivate every slot whose `host:port` matches and clear its
    /// failure count; false when none matched
    pub async fn reset(&self, endpoint: &str) -> bool {
        let mut state = self.state.lock().await;
        let mut matched = false;
        for entry in state.slots.iter_mut().filter(|s| s.endpoint.key() == endpoint) {
            entry.status = RelayStatus::Active;
            entry.consecutive_failures = 0;
            matched = true;
        }
        matched
    }

    pub async fn reset_all(&self) {
        let mut state = self.state.lock().await;
        for entry in state.slots.iter_mut() {
            entry.status = RelayStatus::Active;
            entry.consecutive_failures = 0;
        }
    }

    pub async fn active_count(&self) -> usize {
        let state = self.state.lock().await;
        state
            .slots
            .iter()
            .filter(|s| s.status == RelayStatus::Active)
            .count()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.slots.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn snapshot(&self) -> Vec<RelayHealth> {
        let state = self.state.lock().await;
        state
            .slots
            .iter()
            .map(|s| RelayHealth {
                endpoint: s.endpoint.key(),
                username: s.endpoint.username.clone(),
                status: s.status,
                consecutive_failures: s.consecutive_failures,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn endpoints(n: usize) -> Vec<RelayEndpoint> {
        (0..n)
            .map(|i| RelayEndpoint::new(format!("smtp{}.example.com", i), 587, "user", "pw"))
            .collect()
    }

    #[tokio::test]
    async fn test_round_robin_order() {
        let pool = RelayPool::new(endpoints(3), HealthPolicy::default());
        let mut hosts = Vec::new();
        for _ in 0..6 {
            hosts.push(pool.next().await.unwrap().endpoint.host);
        }
        assert_eq!(
            hosts,
            vec![
                "smtp0.example.com",
                "smtp1.example.com",
                "smtp2.example.com",
                "smtp0.example.com",
                "smtp1.example.com",
                "smtp2.example.com",
            ]
        );
    }

    #[tokio::test]
    async fn test_concurrent_rotation_is_fair() {
        let pool = Arc::new(RelayPool::new(endpoints(3), HealthPolicy::default()));
        let calls: usize = 100;

        let mut handles = Vec::new();
        for _ in 0..calls {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move { pool.next().await.unwrap().endpoint.host }));
        }

        let mut counts: HashMap<String, usize> = HashMap::new();
        for handle in handles {
            *counts.entry(handle.await.unwrap()).or_default() += 1;
        }

        assert_eq!(counts.len(), 3);
        let (floor, ceil) = (calls / 3, calls.div_ceil(3));
        for count in counts.values() {
            assert!(*count == floor || *count == ceil, "unfair count {}", count);
        }
    }

    #[tokio::test]
    async fn test_threshold_disables_and_skips() {
        let policy = HealthPolicy {
            failure_threshold: 2,
            disable_on_permanent: false,
        };
        let pool = RelayPool::new(endpoints(2), policy);

        assert_eq!(pool.report_outcome(0, false, false).await, None);
        let disabled = pool.report_outcome(0, false, false).await.unwrap();
        assert_eq!(disabled.endpoint, "smtp0.example.com:587");
        assert_eq!(disabled.failures, 2);

        // Only reported once
        assert_eq!(pool.report_outcome(0, false, false).await, None);

        assert_eq!(pool.active_count().await, 1);
        for _ in 0..3 {
            assert_eq!(pool.next().await.unwrap().slot, 1);
        }
    }

    #[tokio::test]
    async fn test_success_resets_failures() {
        let pool = RelayPool::new(endpoints(1), HealthPolicy::default());

        pool.report_outcome(0, false, false).await;
        pool.report_outcome(0, true, false).await;
        assert_eq!(pool.report_outcome(0, false, false).await, None);

        let health = pool.snapshot().await;
        assert_eq!(health[0].status, RelayStatus::Active);
        assert_eq!(health[0].consecutive_failures, 1);
    }

    #[tokio::test]
    async fn test_permanent_failure_disables_immediately() {
        let pool = RelayPool::new(endpoints(1), HealthPolicy::default());

        let disabled = pool.report_outcome(0, false, true).await;
        assert_eq!(disabled.map(|d| d.failures), Some(1));
        assert!(matches!(pool.next().await, Err(ControlError::EmptyRelayPool)));
    }

    #[tokio::test]
    async fn test_zero_threshold_never_disables() {
        let policy = HealthPolicy {
            failure_threshold: 0,
            disable_on_permanent: false,
        };
        let pool = RelayPool::new(endpoints(1), policy);
        for _ in 0..10 {
            assert_eq!(pool.report_outcome(0, false, true).await, None);
        }
        assert_eq!(pool.active_count().await, 1);
    }

    #[tokio::test]
    async fn test_permanent_failure_counts_toward_threshold_when_not_disabling() {
        let policy = HealthPolicy {
            failure_threshold: 3,
            disable_on_permanent: false,
        };
        let pool = RelayPool::new(endpoints(1), policy);

        assert_eq!(pool.report_outcome(0, false, true).await, None);
        assert_eq!(pool.report_outcome(0, false, true).await, None);
        let disabled = pool.report_outcome(0, false, true).await.unwrap();
        assert_eq!(disabled.failures, 3);
    }

    #[tokio::test]
    async fn test_reset_reactivates() {
        let pool = RelayPool::new(endpoints(2), HealthPolicy::default());
        pool.report_outcome(0, false, true).await;
        pool.report_outcome(1, false, true).await;
        assert!(pool.next().await.is_err());

        assert!(pool.reset("smtp1.example.com:587").await);
        assert_eq!(pool.next().await.unwrap().slot, 1);
        assert_eq!(pool.snapshot().await[1].consecutive_failures, 0);
        assert!(!pool.reset("unknown.example.com:25").await);

        pool.reset_all().await;
        assert_eq!(pool.active_count().await, 2);
    }

    #[tokio::test]
    async fn test_empty_pool() {
        let pool = RelayPool::new(Vec::new(), HealthPolicy::default());
        assert!(pool.is_empty().await);
        assert!(matches!(pool.next().await, Err(ControlError::EmptyRelayPool)));
    }
}
