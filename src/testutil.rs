//! Hand-rolled test doubles shared by the session and reconciler tests.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

use crate::feed::{EventFeed, FeedError};
use crate::leagues::LeagueConfig;
use crate::models::{Competitor, EventDetail, EventPhase, EventSnapshot, StreamUpdate};
use crate::platform::{ChannelPlatform, PermissionPolicy, PlatformError};

pub(crate) fn competitor(name: &str, abbrev: &str, score: i32) -> Competitor {
    Competitor {
        name: name.into(),
        abbrev: abbrev.into(),
        score,
    }
}

pub(crate) fn snapshot(event_id: &str, phase: EventPhase, home: i32, away: i32) -> EventSnapshot {
    EventSnapshot {
        event_id: event_id.into(),
        home: competitor("Lakers", "LAL", home),
        away: competitor("Celtics", "BOS", away),
        phase,
        status_detail: match phase {
            EventPhase::Scheduled => "7:30 PM ET".into(),
            EventPhase::Live => "Q2 5:00".into(),
            EventPhase::Final => "Final".into(),
        },
    }
}

pub(crate) fn detail(event_id: &str, phase: EventPhase, home: i32, away: i32) -> EventDetail {
    let snap = snapshot(event_id, phase, home, away);
    EventDetail {
        event_id: snap.event_id,
        home: snap.home,
        away: snap.away,
        phase: snap.phase,
        status_detail: snap.status_detail,
        period: Some(2),
        clock: Some("5:00".into()),
        notable: vec![],
    }
}

pub(crate) fn test_league() -> LeagueConfig {
    LeagueConfig {
        id: "nba",
        feed_path: "basketball/nba",
        display_name: "NBA",
        emoji: "\u{1F3C0}",
        category_name: "NBA Games",
    }
}

/// Programmable in-memory feed.
#[derive(Default)]
pub(crate) struct MockFeed {
    snapshots: Mutex<HashMap<String, Vec<EventSnapshot>>>,
    failing_leagues: Mutex<HashSet<String>>,
    details: Mutex<HashMap<String, EventDetail>>,
    failing_details: Mutex<HashSet<String>>,
    streams: Mutex<HashMap<String, mpsc::Sender<StreamUpdate>>>,
    pub snapshot_calls: AtomicUsize,
    pub detail_calls: AtomicUsize,
}

impl MockFeed {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn set_snapshot(&self, league: &str, events: Vec<EventSnapshot>) {
        self.snapshots.lock().await.insert(league.into(), events);
    }

    pub async fn set_league_failing(&self, league: &str, failing: bool) {
        let mut set = self.failing_leagues.lock().await;
        if failing {
            set.insert(league.into());
        } else {
            set.remove(league);
        }
    }

    pub async fn set_detail(&self, d: EventDetail) {
        self.details.lock().await.insert(d.event_id.clone(), d);
    }

    pub async fn set_detail_failing(&self, event_id: &str, failing: bool) {
        let mut set = self.failing_details.lock().await;
        if failing {
            set.insert(event_id.into());
        } else {
            set.remove(event_id);
        }
    }

    /// Push a tokened update into an open subscription.
    pub async fn push_update(&self, event_id: &str, token: &str) {
        let streams = self.streams.lock().await;
        let tx = streams
            .get(event_id)
            .unwrap_or_else(|| panic!("no open subscription for {}", event_id));
        tx.send(StreamUpdate {
            token: token.into(),
        })
        .await
        .expect("subscription receiver dropped");
    }
}

#[async_trait]
impl EventFeed for MockFeed {
    async fn league_snapshot(
        &self,
        league: &LeagueConfig,
    ) -> Result<Vec<EventSnapshot>, FeedError> {
        self.snapshot_calls.fetch_add(1, Ordering::Relaxed);
        if self.failing_leagues.lock().await.contains(league.id) {
            return Err(FeedError::Status(500));
        }
        Ok(self
            .snapshots
            .lock()
            .await
            .get(league.id)
            .cloned()
            .unwrap_or_default())
    }

    async fn event_detail(
        &self,
        event_id: &str,
        _token: Option<&str>,
    ) -> Result<EventDetail, FeedError> {
        self.detail_calls.fetch_add(1, Ordering::Relaxed);
        if self.failing_details.lock().await.contains(event_id) {
            return Err(FeedError::Status(503));
        }
        self.details
            .lock()
            .await
            .get(event_id)
            .cloned()
            .ok_or_else(|| FeedError::Malformed(format!("no detail for {}", event_id)))
    }

    async fn subscribe(&self, event_id: &str) -> Result<mpsc::Receiver<StreamUpdate>, FeedError> {
        let (tx, rx) = mpsc::channel(64);
        self.streams.lock().await.insert(event_id.into(), tx);
        Ok(rx)
    }
}

/// Records every platform operation in order; failures can be scripted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PlatformOp {
    CreateCategory { name: String },
    CreateChannel { parent: String, name: String, topic: String },
    Rename { channel: String, name: String },
    Retopic { channel: String, topic: String },
    Post { channel: String, content: String },
    ArchiveLock { channel: String },
    Delete { target: String },
}

#[derive(Default)]
pub(crate) struct RecordingPlatform {
    ops: Mutex<Vec<PlatformOp>>,
    next_ref: AtomicUsize,
    pub fail_channel_creates: AtomicBool,
    pub fail_deletes: AtomicBool,
}

impl RecordingPlatform {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn ops(&self) -> Vec<PlatformOp> {
        self.ops.lock().await.clone()
    }

    pub async fn ops_len(&self) -> usize {
        self.ops.lock().await.len()
    }

    pub async fn posts_to(&self, channel: &str) -> Vec<String> {
        self.ops
            .lock()
            .await
            .iter()
            .filter_map(|op| match op {
                PlatformOp::Post { channel: c, content } if c == channel => {
                    Some(content.clone())
                }
                _ => None,
            })
            .collect()
    }

    fn make_ref(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, self.next_ref.fetch_add(1, Ordering::Relaxed) + 1)
    }

    async fn record(&self, op: PlatformOp) {
        self.ops.lock().await.push(op);
    }
}

#[async_trait]
impl ChannelPlatform for RecordingPlatform {
    async fn create_category(&self, name: &str) -> Result<String, PlatformError> {
        self.record(PlatformOp::CreateCategory { name: name.into() }).await;
        Ok(self.make_ref("cat"))
    }

    async fn create_channel(
        &self,
        parent: &str,
        name: &str,
        topic: &str,
        _policy: PermissionPolicy,
    ) -> Result<String, PlatformError> {
        self.record(PlatformOp::CreateChannel {
            parent: parent.into(),
            name: name.into(),
            topic: topic.into(),
        })
        .await;
        if self.fail_channel_creates.load(Ordering::Relaxed) {
            return Err(PlatformError::PermissionDenied);
        }
        Ok(self.make_ref("chan"))
    }

    async fn rename(&self, channel: &str, name: &str) -> Result<(), PlatformError> {
        self.record(PlatformOp::Rename {
            channel: channel.into(),
            name: name.into(),
        })
        .await;
        Ok(())
    }

    async fn retopic(&self, channel: &str, topic: &str) -> Result<(), PlatformError> {
        self.record(PlatformOp::Retopic {
            channel: channel.into(),
            topic: topic.into(),
        })
        .await;
        Ok(())
    }

    async fn post(&self, channel: &str, content: &str) -> Result<(), PlatformError> {
        self.record(PlatformOp::Post {
            channel: channel.into(),
            content: content.into(),
        })
        .await;
        Ok(())
    }

    async fn archive_and_lock(&self, channel: &str) -> Result<(), PlatformError> {
        self.record(PlatformOp::ArchiveLock {
            channel: channel.into(),
        })
        .await;
        Ok(())
    }

    async fn delete(&self, channel: &str) -> Result<(), PlatformError> {
        self.record(PlatformOp::Delete {
            target: channel.into(),
        })
        .await;
        if self.fail_deletes.load(Ordering::Relaxed) {
            return Err(PlatformError::RateLimited);
        }
        Ok(())
    }
}
