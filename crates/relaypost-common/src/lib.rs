//! RelayPost Common - Shared types and configuration
//!
//! This crate provides the configuration, error type and domain types
//! shared by the storage, dispatch engine and server crates.

pub mod config;
pub mod error;
pub mod settings;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use settings::CampaignSettings;
pub use types::{EmailAddress, Recipient, RelayEndpoint, SenderIdentity};
