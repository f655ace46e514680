//! RelayPost - campaign runner entry point

use anyhow::Result;
use relaypost_common::config::{Config, LoggingConfig};
use relaypost_core::dispatch::DEFAULT_LOG_BACKFILL;
use relaypost_core::{CampaignController, ControllerOptions, Event, SmtpRelayClient};
use relaypost_storage::FileCampaignStore;
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    init_logging(&config.logging);

    info!("Starting RelayPost...");

    // Initialize campaign store
    let store = Arc::new(FileCampaignStore::open(&config.storage)?);
    info!("Campaign files at {}", config.storage.path.display());

    // Initialize relay client
    let client = Arc::new(SmtpRelayClient::new(&config.relay));

    let controller = Arc::new(CampaignController::new(
        store,
        client,
        ControllerOptions::from(&config),
    ));

    let mut subscription = controller.subscribe(DEFAULT_LOG_BACKFILL).await;
    controller.start().await?;
    info!(mode = ?config.dispatch.mode, "Campaign started");

    loop {
        tokio::select! {
            event = subscription.recv() => match event {
                Some(Event::Completed { statistics, .. }) => {
                    info!(
                        sent = statistics.total_sent,
                        failed = statistics.total_failed,
                        "Campaign completed"
                    );
                    break;
                }
                Some(Event::Stopped { .. }) => {
                    warn!("Campaign stopped");
                    break;
                }
                Some(Event::Progress(progress)) => {
                    debug!(
                        sent = progress.total_sent,
                        failed = progress.total_failed,
                        "Progress"
                    );
                }
                Some(_) => {}
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                if let Err(e) = controller.stop().await {
                    warn!("Stop failed: {}", e);
                }
            }
        }
    }

    // Let in-flight sends and the recipient write-back finish
    controller.wait().await;

    let statistics = controller.get_statistics().await;
    println!("{}", serde_json::to_string_pretty(&statistics)?);

    info!("RelayPost shutdown complete");

    Ok(())
}

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    let registry = tracing_subscriber::registry().with(filter);
    if config.format == "json" {
        registry
            .with(fmt::layer().json().with_target(true).with_level(true))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    }
}
