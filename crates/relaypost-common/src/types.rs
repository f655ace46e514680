//! Common types for RelayPost

use serde::{Deserialize, Serialize};
use std::fmt;

/// Email address split into local part and domain
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmailAddress {
    pub local: String,
    pub domain: String,
}

impl EmailAddress {
    /// Create a new email address
    pub fn new(local: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            local: local.into(),
            domain: domain.into(),
        }
    }

    /// Parse an email address from a string
    pub fn parse(s: &str) -> Option<Self> {
        let (local, domain) = s.trim().rsplit_once('@')?;
        if local.is_empty() || domain.is_empty() {
            return None;
        }
        Some(Self::new(local, domain))
    }

    /// First label of the domain with its initial letter upper-cased
    /// (`mail.example.com` -> `Mail`, `example.org` -> `Example`).
    pub fn capitalized_domain(&self) -> String {
        let label = self.domain.split('.').next().unwrap_or_default();
        let mut chars = label.chars();
        match chars.next() {
            Some(first) => first
                .to_uppercase()
                .chain(chars.flat_map(char::to_lowercase))
                .collect(),
            None => String::new(),
        }
    }
}

impl fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.local, self.domain)
    }
}

impl std::str::FromStr for EmailAddress {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| crate::Error::Validation(format!("Invalid email address: {}", s)))
    }
}

/// One target address queued for a single delivery attempt
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Recipient {
    pub address: String,
}

impl Recipient {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address)
    }
}

/// Sender address rotated across outgoing messages
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SenderIdentity {
    pub address: String,
}

impl SenderIdentity {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }

    /// Capitalized first domain label of the identity, empty if the
    /// address has no domain part
    pub fn capitalized_domain(&self) -> String {
        EmailAddress::parse(&self.address)
            .map(|addr| addr.capitalized_domain())
            .unwrap_or_default()
    }
}

impl fmt::Display for SenderIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address)
    }
}

/// Outbound relay credentials and connection target
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelayEndpoint {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub secret: String,
}

impl RelayEndpoint {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            secret: secret.into(),
        }
    }

    /// `host:port` label used in statistics, logs and events
    pub fn key(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// Keeps the secret out of logs.
impl fmt::Debug for RelayEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayEndpoint")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for RelayEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_email_address() {
        let addr = EmailAddress::parse("alice@mail.example.com").unwrap();
        assert_eq!(addr.local, "alice");
        assert_eq!(addr.domain, "mail.example.com");
        assert_eq!(addr.to_string(), "alice@mail.example.com");

        assert!(EmailAddress::parse("no-at-sign").is_none());
        assert!(EmailAddress::parse("@example.com").is_none());
        assert!(EmailAddress::parse("alice@").is_none());
    }

    #[test]
    fn test_capitalized_domain() {
        let identity = SenderIdentity::new("billing@ACME.co.uk");
        assert_eq!(identity.capitalized_domain(), "Acme");

        let identity = SenderIdentity::new("not-an-address");
        assert_eq!(identity.capitalized_domain(), "");
    }

    #[test]
    fn test_relay_debug_hides_secret() {
        let relay = RelayEndpoint::new("smtp.example.com", 587, "user", "hunter2");
        let debug = format!("{:?}", relay);
        assert!(!debug.contains("hunter2"));
        assert_eq!(relay.key(), "smtp.example.com:587");
    }
}
