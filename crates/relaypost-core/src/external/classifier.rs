//! Line classifier for external sender output
//!
//! Each line is matched against a handful of patterns; anything else is
//! reported as unrecognized. Outcome lines must start with their keyword
//! and carry an address, since the sender repeats the same words inside
//! the detail lines of every result block.

use regex::Regex;

/// What a single output line means
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputLine {
    Sent { recipient: String },
    Failed { recipient: String },
    RelayDisabled { relay: String },
    RelaysLoaded { count: usize },
    Finished { total_sent: u64 },
    Unrecognized,
}

pub struct OutputClassifier {
    ansi: Regex,
    sent: Regex,
    failed: Regex,
    relay: Regex,
    loaded: Regex,
    finished: Regex,
    summary: Regex,
}

impl Default for OutputClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputClassifier {
    pub fn new() -> Self {
        let compile = |pattern: &str| Regex::new(pattern).expect("output pattern is valid");
        Self {
            ansi: compile(r"\x1b\[[0-9;]*[A-Za-z]"),
            sent: compile(r"^SENT\s+(\S+@\S+)"),
            failed: compile(r"^Failed\s+(\S+@\S+)"),
            relay: compile(r"(\S+:\d+)"),
            loaded: compile(r"Loaded\s+(\d+)\s+SMTP servers"),
            finished: compile(r"Total emails sent:\s+(\d+)"),
            summary: compile(r"^\S+:\d+:\s+\d+\s+failures\s+-"),
        }
    }

    pub fn classify(&self, raw: &str) -> OutputLine {
        let line = self.ansi.replace_all(raw, "");
        let line = line.trim();

        if let Some(caps) = self.sent.captures(line) {
            return OutputLine::Sent {
                recipient: clean_address(&caps[1]),
            };
        }

        // End-of-run statistics repeat disablements already reported
        if self.summary.is_match(line) {
            return OutputLine::Unrecognized;
        }

        if line.contains("DISABLED") || line.contains("already failed") {
            if let Some(caps) = self.relay.captures(line) {
                return OutputLine::RelayDisabled {
                    relay: caps[1].to_string(),
                };
            }
        }

        if let Some(caps) = self.failed.captures(line) {
            return OutputLine::Failed {
                recipient: clean_address(&caps[1]),
            };
        }

        if let Some(count) = self.loaded.captures(line).and_then(|c| c[1].parse().ok()) {
            return OutputLine::RelaysLoaded { count };
        }

        if let Some(total) = self.finished.captures(line).and_then(|c| c[1].parse().ok()) {
            return OutputLine::Finished { total_sent: total };
        }

        OutputLine::Unrecognized
    }
}

/// Strip punctuation senders like to wrap addresses in
fn clean_address(raw: &str) -> String {
    raw.trim_matches(|c: char| matches!(c, '<' | '>' | ',' | ':' | ';' | '\'' | '"' | '(' | ')'))
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_sent_and_failed() {
        let c = OutputClassifier::new();
        assert_eq!(
            c.classify("SENT bob@example.org"),
            OutputLine::Sent {
                recipient: "bob@example.org".into()
            }
        );
        assert_eq!(
            c.classify("Failed <amy@example.org>: connection reset"),
            OutputLine::Failed {
                recipient: "amy@example.org".into()
            }
        );
    }

    #[test]
    fn test_ansi_colors_are_ignored() {
        let c = OutputClassifier::new();
        assert_eq!(
            c.classify("\x1b[32mSENT bob@example.org\x1b[0m"),
            OutputLine::Sent {
                recipient: "bob@example.org".into()
            }
        );
    }

    #[test]
    fn test_relay_disabled() {
        let c = OutputClassifier::new();
        assert_eq!(
            c.classify("SMTP smtp.acme.com:587 DISABLED after 2 failures"),
            OutputLine::RelayDisabled {
                relay: "smtp.acme.com:587".into()
            }
        );
        assert_eq!(
            c.classify("Skipping mx.acme.com:25, already failed"),
            OutputLine::RelayDisabled {
                relay: "mx.acme.com:25".into()
            }
        );
        // No host:port, nothing to attribute
        assert_eq!(c.classify("relay DISABLED"), OutputLine::Unrecognized);
    }

    #[test]
    fn test_result_block_counts_once() {
        let c = OutputClassifier::new();
        let block = "\x1b[32m\x1b[1m\n\
                     ===========================================\n\
                     SENT bob@example.org\n\
                     From : Acme News <news@acme.com>\n\
                     USER SENT FROM SMTP: alice@relay.com\n\
                     SMTP SERVER: smtp.relay.com:587\n\
                     Subject: Hello\n\
                     3/10\n\
                     ===========================================";
        let outcomes: Vec<OutputLine> = block
            .lines()
            .map(|line| c.classify(line))
            .filter(|o| *o != OutputLine::Unrecognized)
            .collect();
        assert_eq!(
            outcomes,
            vec![OutputLine::Sent {
                recipient: "bob@example.org".into()
            }]
        );

        let block = "Failed amy@example.org\n\
                     Reason: (535, b'Authentication failed')\n\
                     From : Acme News <news@acme.com>\n\
                     SMTP SERVER: smtp.relay.com:587";
        let outcomes: Vec<OutputLine> = block
            .lines()
            .map(|line| c.classify(line))
            .filter(|o| *o != OutputLine::Unrecognized)
            .collect();
        assert_eq!(
            outcomes,
            vec![OutputLine::Failed {
                recipient: "amy@example.org".into()
            }]
        );
    }

    #[test]
    fn test_failure_summary_is_not_a_new_disablement() {
        let c = OutputClassifier::new();
        assert_eq!(
            c.classify("smtp.acme.com:587: 3 failures - DISABLED"),
            OutputLine::Unrecognized
        );
        assert_eq!(
            c.classify("WARNING: SMTP server smtp.acme.com:587 DISABLED after 2 failures - will be skipped"),
            OutputLine::RelayDisabled {
                relay: "smtp.acme.com:587".into()
            }
        );
    }

    #[test]
    fn test_counts() {
        let c = OutputClassifier::new();
        assert_eq!(
            c.classify("Loaded 4 SMTP servers"),
            OutputLine::RelaysLoaded { count: 4 }
        );
        assert_eq!(
            c.classify("Total emails sent: 120"),
            OutputLine::Finished { total_sent: 120 }
        );
    }

    #[test]
    fn test_partial_and_unknown_lines() {
        let c = OutputClassifier::new();
        assert_eq!(c.classify(""), OutputLine::Unrecognized);
        assert_eq!(c.classify("SENT"), OutputLine::Unrecognized);
        assert_eq!(c.classify("USER SENT FROM SMTP: alice@relay.com"), OutputLine::Unrecognized);
        assert_eq!(c.classify("STARTTLS failed for smtp.acme.com"), OutputLine::Unrecognized);
        assert_eq!(c.classify("Total emails sent: "), OutputLine::Unrecognized);
        assert_eq!(c.classify("Connecting..."), OutputLine::Unrecognized);
    }
}
