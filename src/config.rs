use clap::Parser;
use url::Url;

use crate::leagues::{league_config, LeagueConfig, LEAGUES};

/// Live-event channel engine daemon
#[derive(Parser, Debug, Clone)]
#[command(name = "gameday", version, about)]
pub struct Config {
    /// Scoreboard API base URL
    #[arg(
        long,
        env = "FEED_API_URL",
        default_value = "https://site.api.espn.com/apis/site/v2/sports"
    )]
    pub feed_api_url: String,

    /// Update-stream WebSocket base URL
    #[arg(long, env = "FEED_WS_URL")]
    pub feed_ws_url: String,

    /// Channel platform API base URL
    #[arg(
        long,
        env = "PLATFORM_API_URL",
        default_value = "https://discord.com/api/v10"
    )]
    pub platform_api_url: String,

    /// Channel platform bot token
    #[arg(long, env = "PLATFORM_TOKEN")]
    pub platform_token: String,

    /// Guild (server) the engine manages channels in
    #[arg(long, env = "PLATFORM_GUILD_ID")]
    pub platform_guild_id: String,

    /// Leagues to monitor (comma-separated codes)
    #[arg(
        long,
        env = "LEAGUES",
        default_value = "nba,nfl,mlb,nhl",
        value_delimiter = ','
    )]
    pub leagues: Vec<String>,

    /// Reconciler tick interval in seconds
    #[arg(long, env = "RECONCILE_INTERVAL_SECS", default_value = "30")]
    pub reconcile_interval_secs: u64,

    /// Minimum spacing between outbound provider calls in milliseconds
    #[arg(long, env = "MIN_REQUEST_SPACING_MS", default_value = "1200")]
    pub min_request_spacing_ms: u64,

    /// Session liveness poll interval in seconds
    #[arg(long, env = "LIVENESS_INTERVAL_SECS", default_value = "60")]
    pub liveness_interval_secs: u64,

    /// Delay between a session finishing and its channel being archived, in seconds
    #[arg(long, env = "SESSION_CLOSE_DELAY_SECS", default_value = "300")]
    pub session_close_delay_secs: u64,

    /// Delay between an event going final and its channel being deleted, in seconds
    #[arg(long, env = "CHANNEL_DELETE_DELAY_SECS", default_value = "600")]
    pub channel_delete_delay_secs: u64,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        Url::parse(&self.feed_api_url)
            .map_err(|e| anyhow::anyhow!("feed_api_url is not a valid URL: {}", e))?;
        let ws = Url::parse(&self.feed_ws_url)
            .map_err(|e| anyhow::anyhow!("feed_ws_url is not a valid URL: {}", e))?;
        if !matches!(ws.scheme(), "ws" | "wss") {
            anyhow::bail!("feed_ws_url must be a ws:// or wss:// URL");
        }
        Url::parse(&self.platform_api_url)
            .map_err(|e| anyhow::anyhow!("platform_api_url is not a valid URL: {}", e))?;
        if self.reconcile_interval_secs == 0 {
            anyhow::bail!("reconcile_interval_secs must be positive");
        }
        if self.min_request_spacing_ms == 0 {
            anyhow::bail!("min_request_spacing_ms must be positive");
        }
        if self.leagues.is_empty() {
            anyhow::bail!("at least one league must be configured");
        }
        for id in &self.leagues {
            if league_config(id).is_none() {
                anyhow::bail!(
                    "unknown league '{}' (known: {})",
                    id,
                    LEAGUES.iter().map(|l| l.id).collect::<Vec<_>>().join(", ")
                );
            }
        }
        Ok(())
    }

    pub fn resolve_leagues(&self) -> Vec<LeagueConfig> {
        self.leagues
            .iter()
            .filter_map(|id| league_config(id))
            .cloned()
            .collect()
    }
}
