use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use gameday::config::Config;
use gameday::feed::{EventFeed, ScoreboardClient};
use gameday::pacing::RequestGate;
use gameday::platform::{ChannelPlatform, RestPlatform};
use gameday::reconcile::{Reconciler, ReconcilerSettings};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise tracing / logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    config.validate()?;
    let leagues = config.resolve_leagues();

    // One gate for every outbound provider call, across all components.
    let gate = Arc::new(RequestGate::new(Duration::from_millis(
        config.min_request_spacing_ms,
    )));

    let feed: Arc<dyn EventFeed> = Arc::new(ScoreboardClient::new(
        &config.feed_api_url,
        &config.feed_ws_url,
        Arc::clone(&gate),
    )?);
    let platform: Arc<dyn ChannelPlatform> = Arc::new(RestPlatform::new(
        &config.platform_api_url,
        &config.platform_token,
        &config.platform_guild_id,
    )?);

    info!(
        "gameday starting: {} league(s), tick {}s, spacing {}ms",
        leagues.len(),
        config.reconcile_interval_secs,
        config.min_request_spacing_ms
    );

    let reconciler = Reconciler::new(
        Arc::clone(&feed),
        Arc::clone(&platform),
        leagues,
        ReconcilerSettings {
            tick: Duration::from_secs(config.reconcile_interval_secs),
            delete_delay: Duration::from_secs(config.channel_delete_delay_secs),
        },
    );
    let reconciler_task = tokio::spawn(reconciler.run());

    // Play-by-play sessions are driven by the embedding command front-end
    // through `gameday::session::SessionTracker`; the daemon itself only
    // runs the ambient reconciler.

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    reconciler_task.abort();
    Ok(())
}
