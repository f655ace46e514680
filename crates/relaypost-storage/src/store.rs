//! Campaign store - the persistence collaborator of the dispatch engine

use crate::file::{FileStorage, LocalStorage};
use crate::{lists, relays, settings};
use async_trait::async_trait;
use relaypost_common::config::StorageConfig;
use relaypost_common::settings::SETTINGS_SECTION;
use relaypost_common::{CampaignSettings, Error, Recipient, RelayEndpoint, Result, SenderIdentity};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Storage of recipients, sender identities, relays, settings and the
/// message template
#[async_trait]
pub trait CampaignStore: Send + Sync {
    /// Recipients in file order
    async fn load_recipients(&self) -> Result<Vec<Recipient>>;

    /// Replace the recipient list
    async fn save_recipients(&self, recipients: &[Recipient]) -> Result<()>;

    /// Sender identities in file order
    async fn load_identities(&self) -> Result<Vec<SenderIdentity>>;

    /// Replace the identity list
    async fn save_identities(&self, identities: &[SenderIdentity]) -> Result<()>;

    /// Configured relays
    async fn load_relays(&self) -> Result<Vec<RelayEndpoint>>;

    /// Replace the relay list
    async fn save_relays(&self, relays: &[RelayEndpoint]) -> Result<()>;

    /// Raw key/value pairs of the settings section
    async fn load_settings(&self) -> Result<HashMap<String, String>>;

    /// Set one settings key
    async fn update_setting(&self, key: &str, value: &str) -> Result<()>;

    /// Replace the settings section
    async fn save_settings(&self, values: &HashMap<String, String>) -> Result<()>;

    /// Message body template
    async fn load_template(&self) -> Result<String>;

    /// Parsed campaign settings
    async fn campaign_settings(&self) -> Result<CampaignSettings> {
        Ok(CampaignSettings::from_values(&self.load_settings().await?))
    }

    /// Append one relay
    async fn add_relay(&self, relay: RelayEndpoint) -> Result<()> {
        let mut relays = self.load_relays().await?;
        relays.push(relay);
        self.save_relays(&relays).await
    }

    /// Remove relays matching host and username; returns how many were removed
    async fn remove_relay(&self, host: &str, username: &str) -> Result<usize> {
        let relays = self.load_relays().await?;
        let before = relays.len();
        let kept: Vec<RelayEndpoint> = relays
            .into_iter()
            .filter(|r| !(r.host == host && r.username == username))
            .collect();
        let removed = before - kept.len();
        if removed > 0 {
            self.save_relays(&kept).await?;
        }
        Ok(removed)
    }

    /// Drop delivered recipients from the persisted list. Each delivered
    /// entry removes one stored occurrence, earliest first, so a duplicate
    /// whose own attempt failed stays on the list.
    async fn remove_recipients(&self, delivered: &[Recipient]) -> Result<usize> {
        if delivered.is_empty() {
            return Ok(0);
        }
        let mut pending: HashMap<&Recipient, usize> = HashMap::new();
        for recipient in delivered {
            *pending.entry(recipient).or_insert(0) += 1;
        }
        let recipients = self.load_recipients().await?;
        let before = recipients.len();
        let remaining: Vec<Recipient> = recipients
            .into_iter()
            .filter(|r| match pending.get_mut(r) {
                Some(count) if *count > 0 => {
                    *count -= 1;
                    false
                }
                _ => true,
            })
            .collect();
        let removed = before - remaining.len();
        self.save_recipients(&remaining).await?;
        Ok(removed)
    }
}

/// Store backed by the files of one campaign directory
pub struct FileCampaignStore<S: FileStorage = LocalStorage> {
    storage: S,
    config: StorageConfig,
}

impl FileCampaignStore<LocalStorage> {
    /// Open the campaign directory named in the configuration
    pub fn open(config: &StorageConfig) -> Result<Self> {
        let storage = LocalStorage::from_path(&config.path)?;
        Ok(Self::new(storage, config.clone()))
    }
}

impl<S: FileStorage> FileCampaignStore<S> {
    pub fn new(storage: S, config: StorageConfig) -> Self {
        Self { storage, config }
    }

    /// Read a file, treating a missing file as empty
    async fn read_or_empty(&self, path: &str) -> Result<String> {
        match self.storage.read_to_string(path).await {
            Ok(content) => Ok(content),
            Err(Error::NotFound(_)) => {
                debug!(path = %path, "File missing, treating as empty");
                Ok(String::new())
            }
            Err(e) => Err(e),
        }
    }

    async fn read_list(&self, path: &str) -> Result<Vec<String>> {
        Ok(lists::parse_lines(&self.read_or_empty(path).await?))
    }

    /// Append one recipient line
    pub async fn append_recipient(&self, recipient: &Recipient) -> Result<()> {
        self.storage
            .append_line(&self.config.recipients_file, &recipient.address)
            .await
    }

    /// Number of non-blank recipient lines
    pub async fn count_recipients(&self) -> Result<usize> {
        Ok(self.read_list(&self.config.recipients_file).await?.len())
    }
}

#[async_trait]
impl<S: FileStorage> CampaignStore for FileCampaignStore<S> {
    async fn load_recipients(&self) -> Result<Vec<Recipient>> {
        let lines = self.read_list(&self.config.recipients_file).await?;
        Ok(lines.into_iter().map(Recipient::new).collect())
    }

    async fn save_recipients(&self, recipients: &[Recipient]) -> Result<()> {
        let content = lists::render_lines(recipients.iter().map(|r| r.address.as_str()));
        self.storage.write(&self.config.recipients_file, &content).await?;
        info!("Saved {} recipients", recipients.len());
        Ok(())
    }

    async fn load_identities(&self) -> Result<Vec<SenderIdentity>> {
        let lines = self.read_list(&self.config.identities_file).await?;
        Ok(lines.into_iter().map(SenderIdentity::new).collect())
    }

    async fn save_identities(&self, identities: &[SenderIdentity]) -> Result<()> {
        let content = lists::render_lines(identities.iter().map(|i| i.address.as_str()));
        self.storage.write(&self.config.identities_file, &content).await
    }

    async fn load_relays(&self) -> Result<Vec<RelayEndpoint>> {
        let content = self.read_or_empty(&self.config.relays_file).await?;
        Ok(relays::parse_relays(&content))
    }

    async fn save_relays(&self, list: &[RelayEndpoint]) -> Result<()> {
        self.storage
            .write(&self.config.relays_file, &relays::render_relays(list))
            .await?;
        info!("Saved {} relays", list.len());
        Ok(())
    }

    async fn load_settings(&self) -> Result<HashMap<String, String>> {
        let content = self.read_or_empty(&self.config.settings_file).await?;
        settings::read_section(&content, SETTINGS_SECTION)
    }

    async fn update_setting(&self, key: &str, value: &str) -> Result<()> {
        let content = self.read_or_empty(&self.config.settings_file).await?;
        let updated = settings::set_value(&content, SETTINGS_SECTION, key, value)?;
        self.storage.write(&self.config.settings_file, &updated).await
    }

    async fn save_settings(&self, values: &HashMap<String, String>) -> Result<()> {
        let content = self.read_or_empty(&self.config.settings_file).await?;
        let updated = settings::replace_section(&content, SETTINGS_SECTION, values)?;
        self.storage.write(&self.config.settings_file, &updated).await
    }

    async fn load_template(&self) -> Result<String> {
        self.read_or_empty(&self.config.template_file).await
    }
}

#[derive(Default)]
struct MemoryState {
    recipients: Vec<Recipient>,
    identities: Vec<SenderIdentity>,
    relays: Vec<RelayEndpoint>,
    settings: HashMap<String, String>,
    template: String,
}

/// In-memory store, for tests and dry runs
#[derive(Default)]
pub struct MemoryCampaignStore {
    state: RwLock<MemoryState>,
}

impl MemoryCampaignStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_recipients<I, S>(mut self, recipients: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state.get_mut().recipients = recipients.into_iter().map(Recipient::new).collect();
        self
    }

    pub fn with_identities<I, S>(mut self, identities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state.get_mut().identities = identities.into_iter().map(SenderIdentity::new).collect();
        self
    }

    pub fn with_relays(mut self, relays: Vec<RelayEndpoint>) -> Self {
        self.state.get_mut().relays = relays;
        self
    }

    pub fn with_setting(mut self, key: &str, value: &str) -> Self {
        self.state
            .get_mut()
            .settings
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_template(mut self, template: &str) -> Self {
        self.state.get_mut().template = template.to_string();
        self
    }
}

#[async_trait]
impl CampaignStore for MemoryCampaignStore {
    async fn load_recipients(&self) -> Result<Vec<Recipient>> {
        Ok(self.state.read().await.recipients.clone())
    }

    async fn save_recipients(&self, recipients: &[Recipient]) -> Result<()> {
        self.state.write().await.recipients = recipients.to_vec();
        Ok(())
    }

    async fn load_identities(&self) -> Result<Vec<SenderIdentity>> {
        Ok(self.state.read().await.identities.clone())
    }

    async fn save_identities(&self, identities: &[SenderIdentity]) -> Result<()> {
        self.state.write().await.identities = identities.to_vec();
        Ok(())
    }

    async fn load_relays(&self) -> Result<Vec<RelayEndpoint>> {
        Ok(self.state.read().await.relays.clone())
    }

    async fn save_relays(&self, relays: &[RelayEndpoint]) -> Result<()> {
        self.state.write().await.relays = relays.to_vec();
        Ok(())
    }

    async fn load_settings(&self) -> Result<HashMap<String, String>> {
        Ok(self.state.read().await.settings.clone())
    }

    async fn update_setting(&self, key: &str, value: &str) -> Result<()> {
        self.state
            .write()
            .await
            .settings
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn save_settings(&self, values: &HashMap<String, String>) -> Result<()> {
        self.state.write().await.settings = values.clone();
        Ok(())
    }

    async fn load_template(&self) -> Result<String> {
        Ok(self.state.read().await.template.clone())
    }
}
