//! Ambient score channels: diff-and-converge across all monitored leagues.
//!
//! One task owns the whole ProvisionedChannel registry and the per-league
//! category map. Every tick it re-fetches each league's snapshot and issues
//! exactly the platform calls needed to converge: create channels for new
//! events, rename/retopic on score or status movement, schedule delayed
//! deletion when an event goes final, and sweep channels whose event
//! vanished from the schedule without ever reporting final.
//!
//! Nothing survives a restart; the first tick after a cold start re-derives
//! all state from the provider.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::feed::EventFeed;
use crate::leagues::LeagueConfig;
use crate::models::{EventPhase, EventSnapshot};
use crate::platform::{ChannelPlatform, PermissionPolicy, PlatformError};

#[derive(Debug, Clone)]
pub struct ReconcilerSettings {
    /// Interval between reconciliation passes.
    pub tick: Duration,
    /// How long a final event's channel lingers before deletion.
    pub delete_delay: Duration,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        ReconcilerSettings {
            tick: Duration::from_secs(30),
            delete_delay: Duration::from_secs(600),
        }
    }
}

/// A channel the reconciler has provisioned for one event.
#[derive(Debug, Clone)]
struct ProvisionedChannel {
    event_id: String,
    league: String,
    channel: String,
    name: String,
    topic: String,
    delete_after: Option<Instant>,
}

pub struct Reconciler {
    feed: Arc<dyn EventFeed>,
    platform: Arc<dyn ChannelPlatform>,
    leagues: Vec<LeagueConfig>,
    settings: ReconcilerSettings,
    /// event id -> channel, unique across all leagues
    channels: HashMap<String, ProvisionedChannel>,
    /// league id -> category reference
    categories: HashMap<String, String>,
    /// league id -> relevant-event count from the last successful fetch
    relevant_counts: HashMap<String, usize>,
}

impl Reconciler {
    pub fn new(
        feed: Arc<dyn EventFeed>,
        platform: Arc<dyn ChannelPlatform>,
        leagues: Vec<LeagueConfig>,
        settings: ReconcilerSettings,
    ) -> Self {
        Reconciler {
            feed,
            platform,
            leagues,
            settings,
            channels: HashMap::new(),
            categories: HashMap::new(),
            relevant_counts: HashMap::new(),
        }
    }

    /// Run forever: fixed-interval ticks interleaved with scheduled channel
    /// deletions. Deletions never hold up a tick.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.settings.tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(
            "reconciler started: {} league(s), tick {:?}",
            self.leagues.len(),
            self.settings.tick
        );
        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                _ = ticker.tick() => self.tick().await,
                _ = sleep_until_deadline(deadline), if deadline.is_some() => {
                    self.expire_due().await;
                }
            }
        }
    }

    /// One reconciliation pass over every league.
    async fn tick(&mut self) {
        let mut seen: HashSet<String> = HashSet::new();
        let mut fetched: HashSet<String> = HashSet::new();

        let leagues = self.leagues.clone();
        for league in &leagues {
            match self.feed.league_snapshot(league).await {
                Ok(events) => {
                    fetched.insert(league.id.to_string());
                    for ev in &events {
                        seen.insert(ev.event_id.clone());
                    }
                    self.reconcile_league(league, &events).await;
                }
                Err(e) => {
                    warn!("{}: snapshot failed, skipping this tick: {}", league.id, e);
                }
            }
        }

        self.sweep_vanished(&fetched, &seen).await;
    }

    async fn reconcile_league(&mut self, league: &LeagueConfig, events: &[EventSnapshot]) {
        let relevant: Vec<&EventSnapshot> =
            events.iter().filter(|e| e.is_relevant()).collect();
        self.relevant_counts
            .insert(league.id.to_string(), relevant.len());

        // Events that reported final get a deletion deadline, once.
        for ev in events.iter().filter(|e| e.phase == EventPhase::Final) {
            if let Some(pc) = self.channels.get_mut(&ev.event_id) {
                if pc.delete_after.is_none() {
                    pc.delete_after = Some(Instant::now() + self.settings.delete_delay);
                    info!(
                        "#{} ({}) final, deleting in {:?}",
                        pc.name, ev.event_id, self.settings.delete_delay
                    );
                }
            }
        }

        if relevant.is_empty() {
            // Channels still registered are either lingering on a deadline
            // or about to be swept; the category follows the last of them.
            let has_channels = self.channels.values().any(|c| c.league == league.id);
            if !has_channels {
                self.teardown_league(league.id).await;
            }
            return;
        }

        let category = match self.ensure_category(league).await {
            Some(c) => c,
            None => return,
        };

        for ev in relevant {
            self.converge_event(league, &category, ev).await;
        }
    }

    async fn ensure_category(&mut self, league: &LeagueConfig) -> Option<String> {
        if let Some(existing) = self.categories.get(league.id) {
            return Some(existing.clone());
        }
        match self.platform.create_category(league.category_name).await {
            Ok(category) => {
                info!("created category '{}' for {}", league.category_name, league.id);
                self.categories
                    .insert(league.id.to_string(), category.clone());
                Some(category)
            }
            Err(e) => {
                warn!("{}: category create failed: {}", league.id, e);
                None
            }
        }
    }

    async fn converge_event(
        &mut self,
        league: &LeagueConfig,
        category: &str,
        ev: &EventSnapshot,
    ) {
        let name = channel_name(ev);
        let topic = channel_topic(league, ev);

        if let Some(mut pc) = self.channels.remove(&ev.event_id) {
            if pc.name != name {
                match self.platform.rename(&pc.channel, &name).await {
                    Ok(()) => pc.name = name,
                    Err(e) => warn!("rename of #{} failed: {}", pc.name, e),
                }
            }
            if pc.topic != topic {
                match self.platform.retopic(&pc.channel, &topic).await {
                    Ok(()) => pc.topic = topic,
                    Err(e) => warn!("retopic of #{} failed: {}", pc.name, e),
                }
            }
            // An event reported live again (corrected feed) keeps its channel.
            if pc.delete_after.take().is_some() {
                info!("deletion of #{} cancelled, {} is active again", pc.name, pc.event_id);
            }
            self.channels.insert(ev.event_id.clone(), pc);
            return;
        }

        let channel = match self
            .platform
            .create_channel(category, &name, &topic, PermissionPolicy::Broadcast)
            .await
        {
            Ok(c) => c,
            Err(PlatformError::NotFound) => {
                // The stored category reference went stale; recreate next tick.
                warn!("{}: category vanished, dropping stored reference", league.id);
                self.categories.remove(league.id);
                return;
            }
            Err(e) => {
                warn!("{}: channel create for {} failed: {}", league.id, ev.event_id, e);
                return;
            }
        };
        info!("created #{} for {} ({})", name, ev.event_id, league.id);
        if let Err(e) = self.platform.post(&channel, &kickoff_line(league, ev)).await {
            warn!("{}: initial post for {} failed: {}", league.id, ev.event_id, e);
        }
        self.channels.insert(
            ev.event_id.clone(),
            ProvisionedChannel {
                event_id: ev.event_id.clone(),
                league: league.id.to_string(),
                channel,
                name,
                topic,
                delete_after: None,
            },
        );
    }

    /// Remove channels whose event disappeared from a successfully fetched
    /// snapshot without ever reporting final (postponed, rescheduled).
    async fn sweep_vanished(&mut self, fetched: &HashSet<String>, seen: &HashSet<String>) {
        let vanished: Vec<String> = self
            .channels
            .values()
            .filter(|c| fetched.contains(&c.league) && !seen.contains(&c.event_id))
            .map(|c| c.event_id.clone())
            .collect();
        for event_id in vanished {
            info!("event {} vanished from the schedule, removing its channel", event_id);
            self.remove_channel(&event_id).await;
        }
    }

    /// Delete one provisioned channel and deregister it, then drop the
    /// parent category if nothing keeps it alive.
    async fn remove_channel(&mut self, event_id: &str) {
        let Some(pc) = self.channels.get(event_id) else {
            return;
        };
        let league = pc.league.clone();
        let channel = pc.channel.clone();
        let name = pc.name.clone();

        match self.platform.delete(&channel).await {
            Ok(()) | Err(PlatformError::NotFound) => {
                self.channels.remove(event_id);
                info!("deleted #{} ({})", name, event_id);
                self.maybe_drop_category(&league).await;
            }
            Err(e) => {
                warn!("delete of #{} failed: {}", name, e);
                // Push a pending deadline out one tick instead of hot-looping.
                if let Some(pc) = self.channels.get_mut(event_id) {
                    if pc.delete_after.is_some() {
                        pc.delete_after = Some(Instant::now() + self.settings.tick);
                    }
                }
            }
        }
    }

    /// Delete the league's category once it has no relevant events and no
    /// remaining channels. Children always go first.
    async fn maybe_drop_category(&mut self, league_id: &str) {
        let still_used = self.channels.values().any(|c| c.league == league_id);
        let relevant = self.relevant_counts.get(league_id).copied().unwrap_or(0);
        if still_used || relevant > 0 {
            return;
        }
        let Some(category) = self.categories.get(league_id).cloned() else {
            return;
        };
        match self.platform.delete(&category).await {
            Ok(()) | Err(PlatformError::NotFound) => {
                self.categories.remove(league_id);
                info!("deleted category for {}", league_id);
            }
            Err(e) => warn!("category delete for {} failed: {}", league_id, e),
        }
    }

    /// Full teardown for a league with nothing relevant left: channels
    /// first, then the category.
    async fn teardown_league(&mut self, league_id: &str) {
        let ids: Vec<String> = self
            .channels
            .values()
            .filter(|c| c.league == league_id)
            .map(|c| c.event_id.clone())
            .collect();
        for event_id in ids {
            self.remove_channel(&event_id).await;
        }
        self.maybe_drop_category(league_id).await;
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.channels.values().filter_map(|c| c.delete_after).min()
    }

    /// Run every deletion whose deadline has passed.
    async fn expire_due(&mut self) {
        let now = Instant::now();
        let due: Vec<String> = self
            .channels
            .values()
            .filter(|c| c.delete_after.is_some_and(|d| d <= now))
            .map(|c| c.event_id.clone())
            .collect();
        for event_id in due {
            self.remove_channel(&event_id).await;
        }
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending().await,
    }
}

// ── Naming ───────────────────────────────────────────────────────────────────

/// Deterministic channel name from abbreviations and scores, e.g.
/// "lal-vs-bos-98-95". Identical state renders an identical name, so an
/// unchanged snapshot issues no platform calls.
fn channel_name(ev: &EventSnapshot) -> String {
    format!(
        "{}-vs-{}-{}-{}",
        ev.home.abbrev, ev.away.abbrev, ev.home.score, ev.away.score
    )
    .to_lowercase()
}

fn channel_topic(league: &LeagueConfig, ev: &EventSnapshot) -> String {
    format!(
        "{} {} vs {} | {}",
        league.emoji, ev.home.name, ev.away.name, ev.status_detail
    )
}

fn kickoff_line(league: &LeagueConfig, ev: &EventSnapshot) -> String {
    match ev.phase {
        EventPhase::Live => format!(
            "{} {} {} - {} {} | {}",
            league.emoji,
            ev.home.abbrev,
            ev.home.score,
            ev.away.abbrev,
            ev.away.score,
            ev.status_detail
        ),
        _ => format!(
            "{} {} vs {} | {}",
            league.emoji, ev.home.name, ev.away.name, ev.status_detail
        ),
    }
}
