//! INI settings file handling
//!
//! Values are strings; callers parse them (see `CampaignSettings`).

use ini::{EscapePolicy, Ini, WriteOption};
use relaypost_common::{Error, Result};
use std::collections::HashMap;

fn load(content: &str) -> Result<Ini> {
    Ini::load_from_str_noescape(content)
        .map_err(|e| Error::Storage(format!("Failed to parse settings: {}", e)))
}

fn render(ini: &Ini) -> Result<String> {
    let mut buf = Vec::new();
    let opt = WriteOption {
        escape_policy: EscapePolicy::Nothing,
        ..Default::default()
    };
    ini.write_to_opt(&mut buf, opt)
        .map_err(|e| Error::Storage(format!("Failed to render settings: {}", e)))?;
    String::from_utf8(buf).map_err(|e| Error::Storage(format!("Settings are not UTF-8: {}", e)))
}

/// Read every key/value pair of one section; a missing section is empty
pub fn read_section(content: &str, section: &str) -> Result<HashMap<String, String>> {
    let ini = load(content)?;
    Ok(ini
        .section(Some(section))
        .map(|props| {
            props
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect()
        })
        .unwrap_or_default())
}

/// Set one key, keeping the rest of the file
pub fn set_value(content: &str, section: &str, key: &str, value: &str) -> Result<String> {
    let mut ini = load(content)?;
    ini.with_section(Some(section)).set(key, value);
    render(&ini)
}

/// Replace one section wholesale, keeping other sections
pub fn replace_section(
    content: &str,
    section: &str,
    values: &HashMap<String, String>,
) -> Result<String> {
    let mut ini = load(content)?;
    ini.delete(Some(section));

    // Sorted so rewrites are stable
    let mut keys: Vec<&String> = values.keys().collect();
    keys.sort();
    for key in keys {
        ini.with_section(Some(section)).set(key.as_str(), values[key].as_str());
    }
    render(&ini)
}
