pub mod client;
pub mod stream;

pub use client::ScoreboardClient;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::leagues::LeagueConfig;
use crate::models::{EventDetail, EventSnapshot, StreamUpdate};

/// Failure talking to the data provider. Never fatal; callers skip the
/// current cycle and try again on the next one.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("feed request failed: {0}")]
    Request(String),
    #[error("feed returned HTTP {0}")]
    Status(u16),
    #[error("malformed feed payload: {0}")]
    Malformed(String),
}

/// Seam to the live-event data provider.
#[async_trait]
pub trait EventFeed: Send + Sync {
    /// Current snapshot of all of a league's events. No caching; every call
    /// reflects current provider state.
    async fn league_snapshot(
        &self,
        league: &LeagueConfig,
    ) -> Result<Vec<EventSnapshot>, FeedError>;

    /// Detailed state for one event, optionally at a stream token.
    async fn event_detail(
        &self,
        event_id: &str,
        token: Option<&str>,
    ) -> Result<EventDetail, FeedError>;

    /// Open the event-scoped update stream. The receiver yields tokened
    /// updates until the stream is abandoned or the receiver is dropped.
    async fn subscribe(&self, event_id: &str) -> Result<mpsc::Receiver<StreamUpdate>, FeedError>;
}
