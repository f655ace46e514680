//! Control surface errors

use thiserror::Error;

/// Control and pool-level errors. Per-message failures are not errors;
/// they are reported as delivery outcomes.
#[derive(Error, Debug)]
pub enum ControlError {
    #[error("Campaign already running")]
    AlreadyRunning,

    #[error("No campaign is running")]
    NotRunning,

    #[error("No active relay endpoints remain")]
    EmptyRelayPool,

    #[error("No sender identities configured")]
    EmptyIdentityPool,

    #[error("Recipient list is empty")]
    EmptyRecipientList,

    #[error("External sender is not configured")]
    ExternalNotConfigured,

    #[error("Failed to spawn workers: {0}")]
    Spawn(String),

    #[error("Store error: {0}")]
    Store(#[from] relaypost_common::Error),
}

impl ControlError {
    /// Machine-readable reason
    pub fn code(&self) -> &'static str {
        match self {
            ControlError::AlreadyRunning => "ALREADY_RUNNING",
            ControlError::NotRunning => "NOT_RUNNING",
            ControlError::EmptyRelayPool => "EMPTY_RELAY_POOL",
            ControlError::EmptyIdentityPool => "EMPTY_IDENTITY_POOL",
            ControlError::EmptyRecipientList => "EMPTY_RECIPIENT_LIST",
            ControlError::ExternalNotConfigured => "EXTERNAL_NOT_CONFIGURED",
            ControlError::Spawn(_) => "SPAWN_ERROR",
            ControlError::Store(e) => e.code(),
        }
    }
}
