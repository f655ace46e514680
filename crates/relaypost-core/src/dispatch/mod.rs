//! Dispatch engine
//!
//! Pulls recipients from a queue, pairs each with a relay and a sender
//! identity, delivers through a [`RelayClient`](crate::relay::RelayClient)
//! and publishes progress to any number of subscribers.

mod control;
mod controller;
mod error;
mod events;
mod external_progress;
mod identity;
mod logs;
mod queue;
mod relay_pool;
mod reporter;
mod state;
mod worker;

#[cfg(test)]
mod testing;

pub use control::{ControlCommand, ControlResponse, DEFAULT_LOG_LIMIT};
pub use controller::{CampaignController, ControllerOptions, DEFAULT_LOG_BACKFILL};
pub use error::ControlError;
pub use events::{Event, EventPublisher, Progress, Snapshot, SubscriberId, Subscription};
pub use identity::IdentityRotator;
pub use logs::{LogBuffer, LogEntry, Severity};
pub use queue::RecipientQueue;
pub use relay_pool::{HealthPolicy, RelayDisabled, RelayHealth, RelayLease, RelayPool, RelayStatus};
pub use state::{CampaignPhase, CampaignState, Statistics, StatisticsSnapshot};
pub use worker::{DeliveryOutcome, WorkerExit};
