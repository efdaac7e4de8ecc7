use serde::{Deserialize, Serialize};

/// Coarse lifecycle state of an event as reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventPhase {
    Scheduled,
    Live,
    Final,
}

/// One side of a matchup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Competitor {
    pub name: String,
    /// Short code used in channel names (e.g. "LAL")
    pub abbrev: String,
    pub score: i32,
}

/// Current state of a single event within a league snapshot.
/// Immutable value, re-fetched every cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSnapshot {
    pub event_id: String,
    pub home: Competitor,
    pub away: Competitor,
    pub phase: EventPhase,
    /// Human-readable status line from the provider (e.g. "Q4 2:31", "7:30 PM ET")
    pub status_detail: String,
}

/// Detailed per-event state, fetched on demand (optionally at a stream token).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDetail {
    pub event_id: String,
    pub home: Competitor,
    pub away: Competitor,
    pub phase: EventPhase,
    pub status_detail: String,
    pub period: Option<u32>,
    pub clock: Option<String>,
    /// Notable-play tags since the last update (e.g. scoring plays)
    pub notable: Vec<String>,
}

/// A tokened message from an event's update stream. The token is opaque and
/// monotonically increasing within one event's stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamUpdate {
    pub token: String,
}

impl EventSnapshot {
    /// Events that warrant a provisioned channel: upcoming or in progress.
    pub fn is_relevant(&self) -> bool {
        matches!(self.phase, EventPhase::Scheduled | EventPhase::Live)
    }
}
