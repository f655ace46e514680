//! SMTP relay client on top of lettre's async connection

use super::{OutboundMessage, RelayClient, RelayError, RelayErrorKind, RelaySession};
use async_trait::async_trait;
use lettre::address::{Address, Envelope};
use lettre::message::header::{ContentType, Header, HeaderName, HeaderValue};
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::{Credentials, Mechanism};
use lettre::transport::smtp::client::{AsyncSmtpConnection, TlsParameters};
use lettre::transport::smtp::extension::ClientId;
use lettre::Message;
use relaypost_common::config::RelayConfig;
use relaypost_common::RelayEndpoint;
use std::time::Duration;
use tracing::{debug, warn};

/// Port that speaks TLS from the first byte
const IMPLICIT_TLS_PORT: u16 = 465;

/// Reply text that points at the relay account rather than the message
const POLICY_KEYWORDS: &[&str] = &[
    "quota",
    "limit",
    "blacklist",
    "blocked",
    "spam",
    "auth",
    "denied",
    "suspended",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Connect,
    Authenticate,
    Send,
}

/// Relay client that opens one SMTP connection per delivery attempt
pub struct SmtpRelayClient {
    hello: ClientId,
    timeout: Duration,
    starttls: bool,
}

impl SmtpRelayClient {
    pub fn new(config: &RelayConfig) -> Self {
        Self {
            hello: ClientId::Domain(config.hello_name.clone()),
            timeout: Duration::from_secs(config.timeout_secs),
            starttls: config.starttls,
        }
    }
}

#[async_trait]
impl RelayClient for SmtpRelayClient {
    async fn connect(&self, endpoint: &RelayEndpoint) -> Result<Box<dyn RelaySession>, RelayError> {
        let implicit_tls = if endpoint.port == IMPLICIT_TLS_PORT {
            Some(tls_parameters(endpoint)?)
        } else {
            None
        };

        let mut conn = AsyncSmtpConnection::connect_tokio1(
            (endpoint.host.as_str(), endpoint.port),
            Some(self.timeout),
            &self.hello,
            implicit_tls,
            None,
        )
        .await
        .map_err(|e| smtp_error(Stage::Connect, &e))?;

        if self.starttls && endpoint.port != IMPLICIT_TLS_PORT && conn.can_starttls() {
            let params = tls_parameters(endpoint)?;
            if let Err(e) = conn.starttls(params, &self.hello).await {
                // Some relays advertise STARTTLS and then fail it; carry on in plain text
                warn!(relay = %endpoint, error = %e, "STARTTLS failed");
            }
        }

        debug!(relay = %endpoint, "Connected to relay");
        Ok(Box::new(SmtpRelaySession {
            endpoint: endpoint.clone(),
            conn: Some(conn),
        }))
    }
}

fn tls_parameters(endpoint: &RelayEndpoint) -> Result<TlsParameters, RelayError> {
    TlsParameters::new(endpoint.host.clone())
        .map_err(|e| RelayError::unexpected(format!("TLS setup failed: {}", e)))
}

struct SmtpRelaySession {
    endpoint: RelayEndpoint,
    conn: Option<AsyncSmtpConnection>,
}

impl SmtpRelaySession {
    fn connection(&mut self) -> Result<&mut AsyncSmtpConnection, RelayError> {
        self.conn
            .as_mut()
            .ok_or_else(|| RelayError::unexpected("Connection already closed"))
    }
}

#[async_trait]
impl RelaySession for SmtpRelaySession {
    async fn authenticate(&mut self) -> Result<(), RelayError> {
        let credentials = Credentials::new(
            self.endpoint.username.clone(),
            self.endpoint.secret.clone(),
        );
        self.connection()?
            .auth(&[Mechanism::Plain, Mechanism::Login], &credentials)
            .await
            .map(|_| ())
            .map_err(|e| smtp_error(Stage::Authenticate, &e))
    }

    async fn send(&mut self, message: &OutboundMessage) -> Result<(), RelayError> {
        let (envelope, email) = build_message(message)?;
        self.connection()?
            .send(&envelope, &email.formatted())
            .await
            .map(|_| ())
            .map_err(|e| smtp_error(Stage::Send, &e))
    }

    async fn close(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            if let Err(e) = conn.quit().await {
                debug!(relay = %self.endpoint, error = %e, "QUIT failed, dropping connection");
            }
        }
    }
}

fn parse_address(value: &str, field: &str) -> Result<Address, RelayError> {
    value
        .trim()
        .parse()
        .map_err(|e| RelayError::unexpected(format!("Invalid {} address {}: {}", field, value, e)))
}

fn build_message(message: &OutboundMessage) -> Result<(Envelope, Message), RelayError> {
    let from = parse_address(&message.from.address, "from")?;
    let to = parse_address(&message.to.address, "to")?;

    let mut builder = Message::builder()
        .from(Mailbox::new(message.sender_name.clone(), from.clone()))
        .to(Mailbox::new(None, to.clone()))
        .subject(message.subject.as_str())
        .header(ContentType::TEXT_HTML);

    if message.important {
        builder = builder.header(XPriority).header(Importance);
    }

    let email = builder
        .body(message.body.clone())
        .map_err(|e| RelayError::unexpected(format!("Failed to build email: {}", e)))?;
    let envelope = Envelope::new(Some(from), vec![to])
        .map_err(|e| RelayError::unexpected(format!("Invalid envelope: {}", e)))?;

    Ok((envelope, email))
}

fn smtp_error(stage: Stage, err: &lettre::transport::smtp::Error) -> RelayError {
    let text = err.to_string();
    let kind = classify(stage, err.is_permanent(), err.is_timeout(), &text);
    RelayError::new(kind, text)
}

/// Decide how a failure at `stage` affects the relay
fn classify(stage: Stage, permanent_reply: bool, timeout: bool, text: &str) -> RelayErrorKind {
    if timeout || stage == Stage::Connect {
        return RelayErrorKind::Transient;
    }

    let lower = text.to_lowercase();
    let policy = POLICY_KEYWORDS.iter().any(|k| lower.contains(k));

    match stage {
        Stage::Authenticate if permanent_reply || policy => RelayErrorKind::Permanent,
        Stage::Send if policy => RelayErrorKind::Permanent,
        _ => RelayErrorKind::Transient,
    }
}

/// `X-Priority: 1`
#[derive(Debug, Clone, Copy)]
struct XPriority;

impl Header for XPriority {
    fn name() -> HeaderName {
        HeaderName::new_from_ascii_str("X-Priority")
    }

    fn parse(_: &str) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        Ok(Self)
    }

    fn display(&self) -> HeaderValue {
        HeaderValue::new(Self::name(), "1".to_string())
    }
}

/// `Importance: high`
#[derive(Debug, Clone, Copy)]
struct Importance;

impl Header for Importance {
    fn name() -> HeaderName {
        HeaderName::new_from_ascii_str("Importance")
    }

    fn parse(_: &str) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        Ok(Self)
    }

    fn display(&self) -> HeaderValue {
        HeaderValue::new(Self::name(), "high".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaypost_common::{Recipient, SenderIdentity};

    fn outbound(important: bool) -> OutboundMessage {
        OutboundMessage {
            from: SenderIdentity::new("news@acme.com"),
            sender_name: Some("Acme News".into()),
            to: Recipient::new("bob@example.org"),
            subject: "Hello".into(),
            body: "<p>Hi</p>".into(),
            important,
        }
    }

    #[test]
    fn test_connect_failures_are_transient() {
        assert_eq!(
            classify(Stage::Connect, true, false, "authentication refused"),
            RelayErrorKind::Transient
        );
    }

    #[test]
    fn test_auth_rejection_is_permanent() {
        assert_eq!(
            classify(Stage::Authenticate, true, false, "535 5.7.8 bad credentials"),
            RelayErrorKind::Permanent
        );
        assert_eq!(
            classify(Stage::Authenticate, false, false, "454 temporary failure"),
            RelayErrorKind::Transient
        );
        assert_eq!(
            classify(Stage::Authenticate, true, true, "timed out"),
            RelayErrorKind::Transient
        );
    }

    #[test]
    fn test_send_policy_rejection_is_permanent() {
        assert_eq!(
            classify(Stage::Send, true, false, "554 Daily sending quota exceeded"),
            RelayErrorKind::Permanent
        );
        assert_eq!(
            classify(Stage::Send, false, false, "421 Account SUSPENDED"),
            RelayErrorKind::Permanent
        );
        assert_eq!(
            classify(Stage::Send, true, false, "550 5.1.1 user unknown"),
            RelayErrorKind::Transient
        );
    }

    #[test]
    fn test_build_message() {
        let (envelope, email) = build_message(&outbound(true)).unwrap();
        assert_eq!(envelope.to().len(), 1);

        let raw = String::from_utf8(email.formatted()).unwrap();
        assert!(raw.contains("X-Priority: 1"));
        assert!(raw.contains("Importance: high"));
        assert!(raw.contains("Subject: Hello"));
        assert!(raw.contains("text/html"));
    }

    #[test]
    fn test_plain_message_has_no_priority() {
        let (_, email) = build_message(&outbound(false)).unwrap();
        let raw = String::from_utf8(email.formatted()).unwrap();
        assert!(!raw.contains("X-Priority"));
    }

    #[test]
    fn test_invalid_recipient_is_unexpected() {
        let mut message = outbound(false);
        message.to = Recipient::new("not an address");
        let err = build_message(&message).unwrap_err();
        assert_eq!(err.kind, RelayErrorKind::Unexpected);
    }
}
