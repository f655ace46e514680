//! Campaign settings as stored in the `[Settings]` section
//!
//! Values are kept as strings by the settings store and parsed here.
//! Booleans use `"1"`/`"0"`; anything unparsable falls back to the
//! default with a warning rather than failing the campaign.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::warn;

/// Section holding the campaign settings
pub const SETTINGS_SECTION: &str = "Settings";

/// Parsed campaign settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignSettings {
    /// Subject template
    pub subject: String,
    /// Sender display name template
    pub sender_name: Option<String>,
    /// Number of concurrent workers
    pub threads: Option<usize>,
    /// Pause after each attempt, per worker
    pub sleep_time: Duration,
    /// Leave the persisted recipient list untouched after the run
    pub test_mode: bool,
    /// Verbose relay logging
    pub debug: bool,
    /// Flag the message as high priority
    pub important: bool,
}

impl Default for CampaignSettings {
    fn default() -> Self {
        Self {
            subject: String::new(),
            sender_name: None,
            threads: None,
            sleep_time: Duration::ZERO,
            test_mode: false,
            debug: false,
            important: false,
        }
    }
}

impl CampaignSettings {
    /// Build settings from the raw key/value pairs of the settings section.
    /// Keys are matched case-insensitively.
    pub fn from_values(values: &HashMap<String, String>) -> Self {
        let lookup: HashMap<String, &str> = values
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v.trim()))
            .collect();
        let get = |key: &str| lookup.get(key).copied().filter(|v| !v.is_empty());

        let threads = get("threads").and_then(|raw| match raw.parse::<usize>() {
            Ok(0) | Err(_) => {
                warn!("Ignoring invalid threads setting: {:?}", raw);
                None
            }
            Ok(n) => Some(n),
        });

        let sleep_time = get("sleeptime")
            .map(|raw| match raw.parse::<f64>().ok().map(Duration::try_from_secs_f64) {
                Some(Ok(pause)) => pause,
                _ => {
                    warn!("Ignoring invalid SLEEPTIME setting: {:?}", raw);
                    Duration::ZERO
                }
            })
            .unwrap_or(Duration::ZERO);

        Self {
            subject: get("subject").unwrap_or_default().to_string(),
            sender_name: get("sendername").map(str::to_string),
            threads,
            sleep_time,
            test_mode: parse_flag(get("testmode")),
            debug: parse_flag(get("debug")),
            important: parse_flag(get("important")),
        }
    }

    /// Worker count, bounded to `1..=max`
    pub fn worker_count(&self, default: usize, max: usize) -> usize {
        self.threads.unwrap_or(default).clamp(1, max.max(1))
    }
}

fn parse_flag(value: Option<&str>) -> bool {
    matches!(value, Some("1") | Some("true") | Some("yes"))
}
