//! RelayPost Core - Campaign dispatch engine
//!
//! This crate provides:
//! - Relay pool with health tracking and round-robin rotation
//! - Sender identity rotation and the per-run recipient queue
//! - Delivery workers and the campaign controller state machine
//! - Event publishing and the campaign log
//! - SMTP relay client and external sender process support

pub mod dispatch;
pub mod external;
pub mod relay;
pub mod template;

pub use dispatch::{
    CampaignController, CampaignPhase, CampaignState, ControlCommand, ControlError,
    ControlResponse, ControllerOptions, Event, LogEntry, Severity, StatisticsSnapshot,
    Subscription,
};
pub use relay::{RelayClient, RelaySession, SmtpRelayClient};
pub use template::TemplateRenderer;
