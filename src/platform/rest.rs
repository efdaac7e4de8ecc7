use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info};

use super::{ChannelPlatform, PermissionPolicy, PlatformError};

/// Send-messages permission bit on guild-style platforms.
const SEND_MESSAGES: &str = "2048";

/// Channel platform adapter for a guild-style chat REST API.
#[derive(Clone)]
pub struct RestPlatform {
    http: Client,
    base_url: String,
    token: String,
    guild_id: String,
}

impl RestPlatform {
    pub fn new(base_url: &str, token: &str, guild_id: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(RestPlatform {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            guild_id: guild_id.to_string(),
        })
    }

    fn auth(&self, rb: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        rb.header("Authorization", format!("Bot {}", self.token))
    }

    fn overwrites(&self, policy: PermissionPolicy) -> serde_json::Value {
        match policy {
            PermissionPolicy::Broadcast => serde_json::json!([
                {"id": self.guild_id, "type": 0, "deny": SEND_MESSAGES}
            ]),
            PermissionPolicy::Open => serde_json::json!([]),
        }
    }

    async fn expect_success(
        resp: Result<reqwest::Response, reqwest::Error>,
    ) -> Result<reqwest::Response, PlatformError> {
        let resp = resp.map_err(|e| PlatformError::Transport(e.to_string()))?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        match status.as_u16() {
            404 => Err(PlatformError::NotFound),
            401 | 403 => Err(PlatformError::PermissionDenied),
            429 => Err(PlatformError::RateLimited),
            _ => {
                let body = resp.text().await.unwrap_or_default();
                Err(PlatformError::Transport(format!("HTTP {}: {}", status, body)))
            }
        }
    }

    async fn created_id(resp: reqwest::Response) -> Result<String, PlatformError> {
        let raw: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| PlatformError::Transport(e.to_string()))?;
        raw["id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| PlatformError::Transport("create response missing id".to_string()))
    }
}

#[async_trait]
impl ChannelPlatform for RestPlatform {
    async fn create_category(&self, name: &str) -> Result<String, PlatformError> {
        let url = format!("{}/guilds/{}/channels", self.base_url, self.guild_id);
        let body = serde_json::json!({"name": name, "type": 4});
        let resp = Self::expect_success(self.auth(self.http.post(&url)).json(&body).send().await)
            .await?;
        let id = Self::created_id(resp).await?;
        info!("created category '{}' ({})", name, id);
        Ok(id)
    }

    async fn create_channel(
        &self,
        parent: &str,
        name: &str,
        topic: &str,
        policy: PermissionPolicy,
    ) -> Result<String, PlatformError> {
        let url = format!("{}/guilds/{}/channels", self.base_url, self.guild_id);
        let body = serde_json::json!({
            "name": name,
            "type": 0,
            "parent_id": parent,
            "topic": topic,
            "permission_overwrites": self.overwrites(policy),
        });
        let resp = Self::expect_success(self.auth(self.http.post(&url)).json(&body).send().await)
            .await?;
        let id = Self::created_id(resp).await?;
        info!("created channel #{} ({})", name, id);
        Ok(id)
    }

    async fn rename(&self, channel: &str, name: &str) -> Result<(), PlatformError> {
        let url = format!("{}/channels/{}", self.base_url, channel);
        let body = serde_json::json!({"name": name});
        Self::expect_success(self.auth(self.http.patch(&url)).json(&body).send().await).await?;
        debug!("renamed {} to #{}", channel, name);
        Ok(())
    }

    async fn retopic(&self, channel: &str, topic: &str) -> Result<(), PlatformError> {
        let url = format!("{}/channels/{}", self.base_url, channel);
        let body = serde_json::json!({"topic": topic});
        Self::expect_success(self.auth(self.http.patch(&url)).json(&body).send().await).await?;
        Ok(())
    }

    async fn post(&self, channel: &str, content: &str) -> Result<(), PlatformError> {
        let url = format!("{}/channels/{}/messages", self.base_url, channel);
        let body = serde_json::json!({"content": content});
        Self::expect_success(self.auth(self.http.post(&url)).json(&body).send().await).await?;
        Ok(())
    }

    async fn archive_and_lock(&self, channel: &str) -> Result<(), PlatformError> {
        let url = format!("{}/channels/{}", self.base_url, channel);
        let body = serde_json::json!({"archived": true, "locked": true});
        Self::expect_success(self.auth(self.http.patch(&url)).json(&body).send().await).await?;
        info!("archived and locked {}", channel);
        Ok(())
    }

    async fn delete(&self, channel: &str) -> Result<(), PlatformError> {
        let url = format!("{}/channels/{}", self.base_url, channel);
        match Self::expect_success(self.auth(self.http.delete(&url)).send().await).await {
            Ok(_) => Ok(()),
            // Already gone counts as deleted.
            Err(PlatformError::NotFound) => Ok(()),
            Err(e) => Err(e),
        }
    }
}
