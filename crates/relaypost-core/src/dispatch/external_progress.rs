//! Turns external sender output into statistics, logs and events

use super::events::{Event, Progress};
use super::reporter::Reporter;
use super::state::Statistics;
use crate::external::{OutputClassifier, OutputLine, OutputSink};
use async_trait::async_trait;
use std::sync::Arc;

pub(crate) struct ExternalProgress {
    classifier: OutputClassifier,
    stats: Arc<Statistics>,
    reporter: Arc<Reporter>,
}

impl ExternalProgress {
    pub fn new(stats: Arc<Statistics>, reporter: Arc<Reporter>) -> Self {
        Self {
            classifier: OutputClassifier::new(),
            stats,
            reporter,
        }
    }

    async fn progress(&self, current_email: Option<String>) {
        self.reporter
            .publish(Event::Progress(Progress {
                total_sent: self.stats.total_sent(),
                total_failed: self.stats.total_failed(),
                current_email,
            }))
            .await;
    }
}

#[async_trait]
impl OutputSink for ExternalProgress {
    async fn on_stdout_line(&self, line: &str) {
        match self.classifier.classify(line) {
            OutputLine::Sent { recipient } => {
                self.stats.record_sent(&recipient).await;
                self.reporter
                    .success(format!("Successfully sent to {}", recipient))
                    .await;
                self.progress(Some(recipient)).await;
            }
            OutputLine::Failed { recipient } => {
                self.stats.record_failed(None).await;
                self.reporter
                    .error(format!("Failed to send to {}", recipient))
                    .await;
                self.progress(Some(recipient)).await;
            }
            OutputLine::RelayDisabled { relay } => {
                let failures = self.stats.record_relay_failure(&relay).await;
                self.reporter
                    .warning(format!("SMTP server {} disabled", relay))
                    .await;
                self.reporter
                    .publish(Event::RelayDisabled {
                        endpoint: relay,
                        failures,
                    })
                    .await;
            }
            OutputLine::RelaysLoaded { count } => {
                self.reporter
                    .info(format!("Loaded {} SMTP servers", count))
                    .await;
            }
            OutputLine::Finished { total_sent } => {
                self.stats.set_total_sent(total_sent);
                self.reporter
                    .success(format!("Campaign completed. Total emails sent: {}", total_sent))
                    .await;
            }
            OutputLine::Unrecognized => {
                let line = line.trim();
                if !line.is_empty() {
                    self.reporter.info(line).await;
                }
            }
        }
    }

    async fn on_stderr_line(&self, line: &str) {
        let line = line.trim();
        if !line.is_empty() {
            self.reporter.error(line).await;
        }
    }
}
