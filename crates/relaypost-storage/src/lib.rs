//! RelayPost Storage - Flat-file persistence for campaigns
//!
//! Recipient and sender lists are newline-delimited files, relays are a
//! headed comma-separated file and campaign settings live in an INI file.
//! Everything is read wholesale and written back wholesale.

pub mod file;
pub mod lists;
pub mod relays;
pub mod settings;
pub mod store;

pub use file::{FileStorage, LocalStorage};
pub use store::{CampaignStore, FileCampaignStore, MemoryCampaignStore};
