//! Relay list format
//!
//! A header line followed by `host,port,username,password` rows. Fields are
//! split on every comma; commas inside fields are not supported.

use relaypost_common::RelayEndpoint;
use tracing::warn;

/// Header written at the top of the relay file
pub const RELAY_HEADER: &str = "host,port,user,pass";

/// Parse relay file content. The first non-blank line is the header and is
/// skipped; malformed rows are logged and dropped.
pub fn parse_relays(content: &str) -> Vec<RelayEndpoint> {
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .skip(1)
        .filter_map(|line| {
            let parts: Vec<&str> = line.split(',').map(str::trim).collect();
            if parts.len() < 4 {
                warn!("Skipping malformed relay row ({} fields)", parts.len());
                return None;
            }
            let port = match parts[1].parse::<u16>() {
                Ok(port) => port,
                Err(_) => {
                    warn!("Skipping relay {} with invalid port {:?}", parts[0], parts[1]);
                    return None;
                }
            };
            Some(RelayEndpoint::new(parts[0], port, parts[2], parts[3]))
        })
        .collect()
}

/// Render relays with the header line
pub fn render_relays(relays: &[RelayEndpoint]) -> String {
    let mut content = String::from(RELAY_HEADER);
    content.push('\n');
    for relay in relays {
        content.push_str(&format!(
            "{},{},{},{}\n",
            relay.host, relay.port, relay.username, relay.secret
        ));
    }
    content
}
