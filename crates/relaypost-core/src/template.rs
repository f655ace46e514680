//! Template Renderer - merge-variable substitution for outgoing messages

use chrono::Local;
use rand::Rng;
use regex::Regex;
use relaypost_common::{Recipient, SenderIdentity};

/// Date format used by `{{date}}`
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Raw templates for one campaign run
#[derive(Debug, Clone, Default)]
pub struct MessageTemplates {
    pub subject: String,
    pub body: String,
    pub sender_name: Option<String>,
}

/// Merge values for one message
#[derive(Debug, Clone)]
pub struct MergeContext {
    pub email: String,
    pub sender: String,
    /// Random 6-digit number
    pub token: String,
    /// First domain label of the sender, capitalized
    pub domain_name: String,
    /// Random 5-digit number
    pub short_token: String,
    pub date: String,
}

impl MergeContext {
    /// Fresh context with new random tokens and the current local time
    pub fn new(recipient: &Recipient, identity: &SenderIdentity) -> Self {
        let mut rng = rand::rng();
        Self {
            email: recipient.address.clone(),
            sender: identity.address.clone(),
            token: rng.random_range(100_000..=999_999).to_string(),
            domain_name: identity.capitalized_domain(),
            short_token: rng.random_range(10_000..=99_999).to_string(),
            date: Local::now().format(DATE_FORMAT).to_string(),
        }
    }

    fn pairs(&self) -> [(&'static str, &str); 6] {
        [
            ("{{email}}", self.email.as_str()),
            ("{{from}}", self.sender.as_str()),
            ("{{token}}", self.token.as_str()),
            ("{{domain}}", self.domain_name.as_str()),
            ("{{short_token}}", self.short_token.as_str()),
            ("{{date}}", self.date.as_str()),
        ]
    }
}

/// Rendered subject, body and display name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub subject: String,
    pub body: String,
    pub sender_name: Option<String>,
}

/// Template renderer for personalizing email content
pub struct TemplateRenderer {
    placeholder: Regex,
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateRenderer {
    pub fn new() -> Self {
        Self {
            placeholder: Regex::new(r"\{\{[^}]+\}\}").expect("placeholder pattern is valid"),
        }
    }

    /// Render a single template string
    pub fn render_str(&self, template: &str, ctx: &MergeContext) -> String {
        let mut result = template.to_string();
        for (key, value) in ctx.pairs() {
            result = result.replace(key, value);
        }
        self.remove_unused_placeholders(&result)
    }

    pub fn render(&self, templates: &MessageTemplates, ctx: &MergeContext) -> RenderedMessage {
        RenderedMessage {
            subject: self.render_str(&templates.subject, ctx),
            body: self.render_str(&templates.body, ctx),
            sender_name: templates
                .sender_name
                .as_deref()
                .map(|name| self.render_str(name, ctx))
                .filter(|name| !name.trim().is_empty()),
        }
    }

    fn remove_unused_placeholders(&self, content: &str) -> String {
        self.placeholder.replace_all(content, "").to_string()
    }
}
