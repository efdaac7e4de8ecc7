pub mod rest;

pub use rest::RestPlatform;

use async_trait::async_trait;
use thiserror::Error;

/// Failure from the channel platform. Callers log and abandon the operation
/// for the current cycle; the next cycle observes the stale state and
/// retries naturally. There is no retry queue.
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("resource not found")]
    NotFound,
    #[error("permission denied")]
    PermissionDenied,
    #[error("rate limited by platform")]
    RateLimited,
    #[error("platform request failed: {0}")]
    Transport(String),
}

/// Who may post into a provisioned channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PermissionPolicy {
    /// Members read, only the engine writes. The default for score channels.
    #[default]
    Broadcast,
    /// Members may post freely.
    Open,
}

/// Seam to the chat platform that hosts categories and channels.
///
/// References are opaque platform ids. Deleting an already-deleted resource
/// is success from the caller's perspective.
#[async_trait]
pub trait ChannelPlatform: Send + Sync {
    async fn create_category(&self, name: &str) -> Result<String, PlatformError>;

    async fn create_channel(
        &self,
        parent: &str,
        name: &str,
        topic: &str,
        policy: PermissionPolicy,
    ) -> Result<String, PlatformError>;

    async fn rename(&self, channel: &str, name: &str) -> Result<(), PlatformError>;

    async fn retopic(&self, channel: &str, topic: &str) -> Result<(), PlatformError>;

    async fn post(&self, channel: &str, content: &str) -> Result<(), PlatformError>;

    async fn archive_and_lock(&self, channel: &str) -> Result<(), PlatformError>;

    async fn delete(&self, channel: &str) -> Result<(), PlatformError>;
}
