//! Per-event tracking sessions.
//!
//! A session binds one live event to one notification channel and narrates
//! it: tokened updates from the event's stream become one-line posts, a
//! liveness poll catches completion even when the stream is quiet or dead,
//! and a finished event's channel is archived after a linger period.
//!
//! Each session is a single runner task that owns all of its state, so no
//! two operations ever mutate the same session concurrently. The registry
//! map only tracks membership.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn};

use crate::feed::{EventFeed, FeedError};
use crate::models::{EventDetail, EventPhase, StreamUpdate};
use crate::platform::ChannelPlatform;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("event {0} is already being tracked")]
    AlreadyTracked(String),
    #[error("initial detail fetch failed: {0}")]
    Startup(#[from] FeedError),
}

/// Lifecycle of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Pending,
    Active,
    Finished,
    Archiving,
    Closed,
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// How often a session re-checks event status outside the stream.
    pub liveness_interval: Duration,
    /// Linger between the final summary and archiving the channel.
    pub close_delay: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        SessionSettings {
            liveness_interval: Duration::from_secs(60),
            close_delay: Duration::from_secs(300),
        }
    }
}

struct SessionHandle {
    cancel: mpsc::Sender<()>,
    phase: watch::Receiver<SessionPhase>,
    epoch: u64,
    #[allow(dead_code)]
    started_at: DateTime<Utc>,
}

type Registry = Arc<Mutex<HashMap<String, SessionHandle>>>;

/// Owns all live sessions, keyed by external event id.
pub struct SessionTracker {
    feed: Arc<dyn EventFeed>,
    platform: Arc<dyn ChannelPlatform>,
    settings: SessionSettings,
    sessions: Registry,
    epochs: AtomicU64,
}

impl SessionTracker {
    pub fn new(
        feed: Arc<dyn EventFeed>,
        platform: Arc<dyn ChannelPlatform>,
        settings: SessionSettings,
    ) -> Self {
        SessionTracker {
            feed,
            platform,
            settings,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            epochs: AtomicU64::new(0),
        }
    }

    /// Begin tracking an event into a channel.
    ///
    /// The registry key is reserved before the first await, so a concurrent
    /// duplicate start is rejected even while the initial fetch is in
    /// flight. A failed initial fetch releases the reservation and leaves no
    /// session behind.
    pub async fn start(&self, event_id: &str, channel: &str) -> Result<(), SessionError> {
        let epoch = self.epochs.fetch_add(1, Ordering::Relaxed);
        let (cancel_tx, cancel_rx) = mpsc::channel(1);
        let (phase_tx, phase_rx) = watch::channel(SessionPhase::Pending);

        {
            let mut sessions = self.sessions.lock().await;
            if sessions.contains_key(event_id) {
                return Err(SessionError::AlreadyTracked(event_id.to_string()));
            }
            sessions.insert(
                event_id.to_string(),
                SessionHandle {
                    cancel: cancel_tx,
                    phase: phase_rx,
                    epoch,
                    started_at: Utc::now(),
                },
            );
        }

        let detail = match self.feed.event_detail(event_id, None).await {
            Ok(d) => d,
            Err(e) => {
                remove_if_epoch(&self.sessions, event_id, epoch).await;
                return Err(SessionError::Startup(e));
            }
        };

        let _ = phase_tx.send(SessionPhase::Active);
        info!(
            "session {} active: {} vs {}",
            event_id, detail.home.name, detail.away.name
        );

        if let Err(e) = self
            .platform
            .post(channel, &initial_summary(&detail))
            .await
        {
            warn!("session {}: initial summary post failed: {}", event_id, e);
        }

        let updates = match self.feed.subscribe(event_id).await {
            Ok(rx) => Some(rx),
            Err(e) => {
                warn!(
                    "session {}: update stream unavailable, polling only: {}",
                    event_id, e
                );
                None
            }
        };

        let ctx = SessionContext {
            event_id: event_id.to_string(),
            channel: channel.to_string(),
            feed: Arc::clone(&self.feed),
            platform: Arc::clone(&self.platform),
            settings: self.settings.clone(),
            sessions: Arc::clone(&self.sessions),
            phase: phase_tx,
            epoch,
            last_token: None,
        };
        tokio::spawn(run_session(ctx, cancel_rx, updates));
        Ok(())
    }

    /// Stop tracking an event. Idempotent: unknown ids and repeat calls are
    /// no-ops.
    pub async fn stop(&self, event_id: &str) {
        let handle = self.sessions.lock().await.remove(event_id);
        match handle {
            Some(h) => {
                let _ = h.cancel.try_send(());
                info!("session {} stopped", event_id);
            }
            None => debug!("stop for untracked event {} ignored", event_id),
        }
    }

    /// Event ids with a session in any phase.
    pub async fn tracked_events(&self) -> Vec<String> {
        self.sessions.lock().await.keys().cloned().collect()
    }

    /// Current phase of an event's session, if one exists.
    pub async fn phase(&self, event_id: &str) -> Option<SessionPhase> {
        self.sessions
            .lock()
            .await
            .get(event_id)
            .map(|h| *h.phase.borrow())
    }
}

async fn remove_if_epoch(sessions: &Registry, event_id: &str, epoch: u64) {
    let mut sessions = sessions.lock().await;
    if sessions.get(event_id).is_some_and(|h| h.epoch == epoch) {
        sessions.remove(event_id);
    }
}

struct SessionContext {
    event_id: String,
    channel: String,
    feed: Arc<dyn EventFeed>,
    platform: Arc<dyn ChannelPlatform>,
    settings: SessionSettings,
    sessions: Registry,
    phase: watch::Sender<SessionPhase>,
    epoch: u64,
    last_token: Option<String>,
}

impl SessionContext {
    fn set_phase(&self, phase: SessionPhase) {
        let _ = self.phase.send(phase);
    }

    async fn handle_update(&mut self, update: StreamUpdate) {
        if self.last_token.as_deref() == Some(update.token.as_str()) {
            debug!(
                "session {}: duplicate token {} ignored",
                self.event_id, update.token
            );
            return;
        }
        match self
            .feed
            .event_detail(&self.event_id, Some(&update.token))
            .await
        {
            Ok(detail) => {
                if let Err(e) = self.platform.post(&self.channel, &update_line(&detail)).await {
                    warn!("session {}: update post failed: {}", self.event_id, e);
                }
            }
            Err(e) => {
                warn!(
                    "session {}: detail fetch at token {} failed: {}",
                    self.event_id, update.token, e
                );
            }
        }
        // Seen even when the fetch failed; the next token carries newer state.
        self.last_token = Some(update.token);
    }

    /// Liveness poll. Returns the detail once the event has gone final.
    async fn poll_completion(&self) -> Option<EventDetail> {
        match self.feed.event_detail(&self.event_id, None).await {
            Ok(detail) if detail.phase == EventPhase::Final => Some(detail),
            Ok(_) => None,
            Err(e) => {
                warn!("session {}: status poll failed: {}", self.event_id, e);
                None
            }
        }
    }

    async fn deregister(&self) {
        remove_if_epoch(&self.sessions, &self.event_id, self.epoch).await;
    }
}

async fn run_session(
    mut ctx: SessionContext,
    mut cancel: mpsc::Receiver<()>,
    mut updates: Option<mpsc::Receiver<StreamUpdate>>,
) {
    let mut liveness = tokio::time::interval(ctx.settings.liveness_interval);
    liveness.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The initial fetch just happened; first poll waits a full interval.
    liveness.tick().await;

    let final_detail = loop {
        tokio::select! {
            _ = cancel.recv() => {
                // stop() already removed the registry entry.
                ctx.set_phase(SessionPhase::Closed);
                return;
            }
            update = next_update(&mut updates) => {
                match update {
                    Some(u) => ctx.handle_update(u).await,
                    None => {
                        warn!(
                            "session {}: update stream closed, relying on status polls",
                            ctx.event_id
                        );
                        updates = None;
                    }
                }
            }
            _ = liveness.tick() => {
                if let Some(detail) = ctx.poll_completion().await {
                    break detail;
                }
            }
        }
    };

    // Event over: close the subscription, post the wrap-up, then linger
    // before archiving so late readers still see the result.
    drop(updates);
    ctx.set_phase(SessionPhase::Finished);
    info!("session {} finished", ctx.event_id);
    if let Err(e) = ctx
        .platform
        .post(&ctx.channel, &final_summary(&final_detail))
        .await
    {
        warn!("session {}: final summary post failed: {}", ctx.event_id, e);
    }

    tokio::select! {
        _ = cancel.recv() => {
            ctx.set_phase(SessionPhase::Closed);
            return;
        }
        _ = tokio::time::sleep(ctx.settings.close_delay) => {}
    }

    ctx.set_phase(SessionPhase::Archiving);
    if let Err(e) = ctx.platform.archive_and_lock(&ctx.channel).await {
        warn!("session {}: archive failed: {}", ctx.event_id, e);
    }
    ctx.set_phase(SessionPhase::Closed);
    ctx.deregister().await;
    info!("session {} closed", ctx.event_id);
}

async fn next_update(rx: &mut Option<mpsc::Receiver<StreamUpdate>>) -> Option<StreamUpdate> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

// ── Rendering ────────────────────────────────────────────────────────────────

fn scoreline(d: &EventDetail) -> String {
    format!(
        "{} {} - {} {}",
        d.home.abbrev, d.home.score, d.away.abbrev, d.away.score
    )
}

fn initial_summary(d: &EventDetail) -> String {
    match d.phase {
        EventPhase::Scheduled => format!(
            "Now tracking {} vs {} | {}",
            d.home.name, d.away.name, d.status_detail
        ),
        _ => format!(
            "Now tracking {} vs {} | {} | {}",
            d.home.name,
            d.away.name,
            scoreline(d),
            d.status_detail
        ),
    }
}

fn update_line(d: &EventDetail) -> String {
    let mut line = scoreline(d);
    if !d.status_detail.is_empty() {
        line.push_str(" | ");
        line.push_str(&d.status_detail);
    }
    for tag in &d.notable {
        line.push_str(" | ");
        line.push_str(tag);
    }
    line
}

fn final_summary(d: &EventDetail) -> String {
    format!(
        "Final: {} {}, {} {}",
        d.home.name, d.home.score, d.away.name, d.away.score
    )
}
