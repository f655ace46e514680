//! Configuration for RelayPost

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Flat-file storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Dispatch engine configuration
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Outbound relay client configuration
    #[serde(default)]
    pub relay: RelayConfig,

    /// External sender process configuration
    #[serde(default)]
    pub external: ExternalConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the campaign files
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,

    #[serde(default = "default_settings_file")]
    pub settings_file: String,

    #[serde(default = "default_relays_file")]
    pub relays_file: String,

    #[serde(default = "default_recipients_file")]
    pub recipients_file: String,

    #[serde(default = "default_identities_file")]
    pub identities_file: String,

    #[serde(default = "default_template_file")]
    pub template_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
            settings_file: default_settings_file(),
            relays_file: default_relays_file(),
            recipients_file: default_recipients_file(),
            identities_file: default_identities_file(),
            template_file: default_template_file(),
        }
    }
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("./campaign")
}

fn default_settings_file() -> String {
    "config.ini".to_string()
}

fn default_relays_file() -> String {
    "smtp.txt".to_string()
}

fn default_recipients_file() -> String {
    "emailx.txt".to_string()
}

fn default_identities_file() -> String {
    "from.txt".to_string()
}

fn default_template_file() -> String {
    "letter.html".to_string()
}

/// Where deliveries are executed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// Workers inside this process talk to the relays directly
    #[default]
    InProcess,
    /// A separate sender process is spawned and its output is followed
    External,
}

/// Dispatch engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default)]
    pub mode: DispatchMode,

    /// Consecutive failures after which a relay is disabled (0 = never)
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Disable a relay immediately on an auth/quota/blacklist rejection
    #[serde(default = "default_disable_on_permanent")]
    pub disable_on_permanent: bool,

    /// Seconds workers get to notice a stop before they are aborted
    #[serde(default = "default_stop_grace_secs")]
    pub stop_grace_secs: u64,

    /// Log ring buffer capacity
    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,

    /// Worker count used when the campaign settings do not name one
    #[serde(default = "default_threads")]
    pub default_threads: usize,

    /// Upper bound on the worker count
    #[serde(default = "default_max_threads")]
    pub max_threads: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            mode: DispatchMode::default(),
            failure_threshold: default_failure_threshold(),
            disable_on_permanent: default_disable_on_permanent(),
            stop_grace_secs: default_stop_grace_secs(),
            log_capacity: default_log_capacity(),
            default_threads: default_threads(),
            max_threads: default_max_threads(),
        }
    }
}

fn default_failure_threshold() -> u32 {
    2
}

fn default_disable_on_permanent() -> bool {
    true
}

fn default_stop_grace_secs() -> u64 {
    5
}

fn default_log_capacity() -> usize {
    1000
}

fn default_threads() -> usize {
    1
}

fn default_max_threads() -> usize {
    10
}

/// Relay client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Name announced in EHLO
    #[serde(default = "default_hello_name")]
    pub hello_name: String,

    /// Connect/command timeout in seconds
    #[serde(default = "default_relay_timeout")]
    pub timeout_secs: u64,

    /// Upgrade plain connections with STARTTLS when offered
    #[serde(default = "default_starttls")]
    pub starttls: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            hello_name: default_hello_name(),
            timeout_secs: default_relay_timeout(),
            starttls: default_starttls(),
        }
    }
}

fn default_hello_name() -> String {
    "localhost".to_string()
}

fn default_relay_timeout() -> u64 {
    30
}

fn default_starttls() -> bool {
    true
}

/// External sender process configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExternalConfig {
    /// Program to spawn
    pub program: Option<String>,

    /// Arguments passed to the program
    #[serde(default)]
    pub args: Vec<String>,

    /// Working directory (defaults to the storage path)
    pub working_dir: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Config {
    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        config::Config::builder()
            .add_source(config::File::from_str(content, config::FileFormat::Toml))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Load configuration from a file, with `RELAYPOST__SECTION__KEY`
    /// environment overrides
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Toml))
            .add_source(config::Environment::with_prefix("RELAYPOST").separator("__"))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| crate::Error::Config(format!("Failed to load {}: {}", path.display(), e)))
    }

    /// Load configuration from `RELAYPOST_CONFIG` or the default locations,
    /// falling back to defaults plus environment overrides
    pub fn load() -> crate::Result<Self> {
        if let Ok(path) = std::env::var("RELAYPOST_CONFIG") {
            return Self::from_file(Path::new(&path));
        }

        let paths = [
            PathBuf::from("./relaypost.toml"),
            PathBuf::from("/etc/relaypost/relaypost.toml"),
        ];

        for path in paths {
            if path.exists() {
                return Self::from_file(&path);
            }
        }

        tracing::debug!("No configuration file found, using defaults");

        config::Config::builder()
            .add_source(config::Environment::with_prefix("RELAYPOST").separator("__"))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| crate::Error::Config(format!("Failed to load config: {}", e)))
    }
}
