//! Relay client interface
//!
//! The dispatch engine talks to outbound relays only through these traits:
//! connect, authenticate, send one message, close.

mod smtp;

pub use smtp::SmtpRelayClient;

use async_trait::async_trait;
use relaypost_common::{Recipient, RelayEndpoint, SenderIdentity};
use std::fmt;
use thiserror::Error;

/// How a relay failure affects the endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayErrorKind {
    /// Network trouble, timeouts, 4xx replies
    Transient,
    /// Authentication, quota or blacklist rejection
    Permanent,
    /// Anything the client could not make sense of
    Unexpected,
}

impl fmt::Display for RelayErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RelayErrorKind::Transient => "transient",
            RelayErrorKind::Permanent => "permanent",
            RelayErrorKind::Unexpected => "unexpected",
        };
        f.write_str(s)
    }
}

/// Relay client error
#[derive(Error, Debug, Clone)]
#[error("{kind} relay failure: {message}")]
pub struct RelayError {
    pub kind: RelayErrorKind,
    pub message: String,
}

impl RelayError {
    pub fn new(kind: RelayErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(RelayErrorKind::Transient, message)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(RelayErrorKind::Permanent, message)
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::new(RelayErrorKind::Unexpected, message)
    }
}

/// A fully rendered message ready for one relay
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub from: SenderIdentity,
    pub sender_name: Option<String>,
    pub to: Recipient,
    pub subject: String,
    /// HTML body
    pub body: String,
    /// Mark the message high priority
    pub important: bool,
}

/// Opens sessions against relay endpoints
#[async_trait]
pub trait RelayClient: Send + Sync {
    async fn connect(&self, endpoint: &RelayEndpoint) -> Result<Box<dyn RelaySession>, RelayError>;
}

/// One open relay connection
#[async_trait]
pub trait RelaySession: Send {
    async fn authenticate(&mut self) -> Result<(), RelayError>;

    async fn send(&mut self, message: &OutboundMessage) -> Result<(), RelayError>;

    /// Release the connection. Safe to call more than once.
    async fn close(&mut self);
}
