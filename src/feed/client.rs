use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use super::{stream, EventFeed, FeedError};
use crate::leagues::LeagueConfig;
use crate::models::{Competitor, EventDetail, EventPhase, EventSnapshot, StreamUpdate};
use crate::pacing::RequestGate;

/// Feed client backed by an ESPN-style scoreboard/summary API.
///
/// Every outbound call (including stream connects, see `stream`) first
/// admits through the shared [`RequestGate`], since the reconciler and all
/// sessions hit the same provider.
pub struct ScoreboardClient {
    http: Client,
    base_url: String,
    ws_url: String,
    gate: Arc<RequestGate>,
}

impl ScoreboardClient {
    pub fn new(base_url: &str, ws_url: &str, gate: Arc<RequestGate>) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(ScoreboardClient {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            ws_url: ws_url.trim_end_matches('/').to_string(),
            gate,
        })
    }

    async fn get_json(&self, url: &str) -> Result<serde_json::Value, FeedError> {
        self.gate.admit().await;
        debug!("GET {}", url);
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| FeedError::Request(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(FeedError::Status(resp.status().as_u16()));
        }
        resp.json()
            .await
            .map_err(|e| FeedError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl EventFeed for ScoreboardClient {
    async fn league_snapshot(
        &self,
        league: &LeagueConfig,
    ) -> Result<Vec<EventSnapshot>, FeedError> {
        let url = format!("{}/{}/scoreboard", self.base_url, league.feed_path);
        let raw = self.get_json(&url).await?;
        parse_scoreboard(&raw)
    }

    async fn event_detail(
        &self,
        event_id: &str,
        token: Option<&str>,
    ) -> Result<EventDetail, FeedError> {
        let mut url = format!("{}/events/{}/summary", self.base_url, event_id);
        if let Some(token) = token {
            url.push_str("?token=");
            url.push_str(token);
        }
        let raw = self.get_json(&url).await?;
        parse_summary(&raw)
    }

    async fn subscribe(&self, event_id: &str) -> Result<mpsc::Receiver<StreamUpdate>, FeedError> {
        Ok(stream::open_update_stream(
            self.ws_url.clone(),
            event_id.to_string(),
            Arc::clone(&self.gate),
        ))
    }
}

// ── Parsing helpers ──────────────────────────────────────────────────────────

fn parse_scoreboard(raw: &serde_json::Value) -> Result<Vec<EventSnapshot>, FeedError> {
    // An empty schedule comes back without an events array at all.
    let events = match raw["events"].as_array() {
        Some(a) => a,
        None => return Ok(vec![]),
    };
    Ok(events.iter().filter_map(parse_event).collect())
}

fn parse_summary(raw: &serde_json::Value) -> Result<EventDetail, FeedError> {
    // Summary responses wrap the event; tolerate a bare event object too.
    let ev = if raw.get("event").is_some() {
        &raw["event"]
    } else {
        raw
    };
    let snapshot = parse_event(ev)
        .ok_or_else(|| FeedError::Malformed("summary missing event fields".into()))?;

    let period = ev["status"]["period"].as_u64().map(|p| p as u32);
    let clock = ev["status"]["displayClock"].as_str().map(str::to_string);
    let notable = raw["plays"]
        .as_array()
        .map(|plays| {
            plays
                .iter()
                .filter(|p| p["scoringPlay"].as_bool().unwrap_or(false))
                .filter_map(|p| p["text"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    Ok(EventDetail {
        event_id: snapshot.event_id,
        home: snapshot.home,
        away: snapshot.away,
        phase: snapshot.phase,
        status_detail: snapshot.status_detail,
        period,
        clock,
        notable,
    })
}

fn parse_event(ev: &serde_json::Value) -> Option<EventSnapshot> {
    let event_id = field_as_string(&ev["id"])?;
    let status = &ev["status"]["type"];
    let phase = phase_from_state(status["state"].as_str().unwrap_or("in"));
    let status_detail = status["detail"]
        .as_str()
        .or_else(|| status["shortDetail"].as_str())
        .unwrap_or("")
        .to_string();

    let competitors = ev["competitions"][0]["competitors"].as_array()?;
    let home = competitors
        .iter()
        .find(|c| c["homeAway"].as_str() == Some("home"))?;
    let away = competitors
        .iter()
        .find(|c| c["homeAway"].as_str() == Some("away"))?;

    Some(EventSnapshot {
        event_id,
        home: parse_competitor(home)?,
        away: parse_competitor(away)?,
        phase,
        status_detail,
    })
}

fn parse_competitor(c: &serde_json::Value) -> Option<Competitor> {
    let team = &c["team"];
    let name = team["displayName"]
        .as_str()
        .or_else(|| team["name"].as_str())?
        .to_string();
    let abbrev = team["abbreviation"]
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| name.chars().take(3).collect::<String>().to_uppercase());
    let score: i32 = c["score"]
        .as_str()
        .and_then(|s| s.parse().ok())
        .or_else(|| c["score"].as_i64().map(|v| v as i32))
        .unwrap_or(0);
    Some(Competitor {
        name,
        abbrev,
        score,
    })
}

fn field_as_string(v: &serde_json::Value) -> Option<String> {
    v.as_str()
        .map(str::to_string)
        .or_else(|| v.as_u64().map(|n| n.to_string()))
}

fn phase_from_state(s: &str) -> EventPhase {
    match s.to_lowercase().as_str() {
        "pre" | "scheduled" => EventPhase::Scheduled,
        "post" | "final" => EventPhase::Final,
        _ => EventPhase::Live,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scoreboard_event() {
        let raw: serde_json::Value = serde_json::from_str(
            r#"{
                "events": [{
                    "id": "401585601",
                    "status": {"type": {"state": "in", "detail": "Q4 2:31"}},
                    "competitions": [{
                        "competitors": [
                            {"homeAway": "home", "score": "98",
                             "team": {"displayName": "Los Angeles Lakers", "abbreviation": "LAL"}},
                            {"homeAway": "away", "score": "95",
                             "team": {"displayName": "Boston Celtics", "abbreviation": "BOS"}}
                        ]
                    }]
                }]
            }"#,
        )
        .unwrap();

        let events = parse_scoreboard(&raw).unwrap();
        assert_eq!(events.len(), 1);
        let ev = &events[0];
        assert_eq!(ev.event_id, "401585601");
        assert_eq!(ev.phase, EventPhase::Live);
        assert_eq!(ev.home.abbrev, "LAL");
        assert_eq!(ev.home.score, 98);
        assert_eq!(ev.away.name, "Boston Celtics");
        assert_eq!(ev.away.score, 95);
        assert_eq!(ev.status_detail, "Q4 2:31");
    }

    #[test]
    fn test_parse_scoreboard_without_events_is_empty() {
        let raw = serde_json::json!({"leagues": []});
        assert!(parse_scoreboard(&raw).unwrap().is_empty());
    }

    #[test]
    fn test_parse_scoreboard_skips_malformed_entries() {
        let raw: serde_json::Value = serde_json::from_str(
            r#"{"events": [
                {"id": "1"},
                {"id": "2",
                 "status": {"type": {"state": "pre", "detail": "7:30 PM ET"}},
                 "competitions": [{"competitors": [
                    {"homeAway": "home", "score": 0, "team": {"displayName": "Knicks", "abbreviation": "NYK"}},
                    {"homeAway": "away", "score": 0, "team": {"displayName": "Heat", "abbreviation": "MIA"}}
                 ]}]}
            ]}"#,
        )
        .unwrap();
        let events = parse_scoreboard(&raw).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_id, "2");
        assert_eq!(events[0].phase, EventPhase::Scheduled);
    }

    #[test]
    fn test_parse_summary_with_plays() {
        let raw: serde_json::Value = serde_json::from_str(
            r#"{
                "event": {
                    "id": "401",
                    "status": {"type": {"state": "in", "detail": "Q3 4:10"},
                               "period": 3, "displayClock": "4:10"},
                    "competitions": [{"competitors": [
                        {"homeAway": "home", "score": "77", "team": {"displayName": "Lakers", "abbreviation": "LAL"}},
                        {"homeAway": "away", "score": "70", "team": {"displayName": "Celtics", "abbreviation": "BOS"}}
                    ]}]
                },
                "plays": [
                    {"scoringPlay": true, "text": "James 3pt jumper"},
                    {"scoringPlay": false, "text": "Timeout"},
                    {"scoringPlay": true, "text": "Tatum dunk"}
                ]
            }"#,
        )
        .unwrap();

        let detail = parse_summary(&raw).unwrap();
        assert_eq!(detail.period, Some(3));
        assert_eq!(detail.clock.as_deref(), Some("4:10"));
        assert_eq!(detail.notable, vec!["James 3pt jumper", "Tatum dunk"]);
    }

    #[test]
    fn test_parse_summary_missing_fields_is_malformed() {
        let raw = serde_json::json!({"event": {"id": "401"}});
        assert!(matches!(
            parse_summary(&raw),
            Err(FeedError::Malformed(_))
        ));
    }

    #[test]
    fn test_phase_from_state() {
        assert_eq!(phase_from_state("pre"), EventPhase::Scheduled);
        assert_eq!(phase_from_state("in"), EventPhase::Live);
        assert_eq!(phase_from_state("post"), EventPhase::Final);
        assert_eq!(phase_from_state("halftime"), EventPhase::Live);
    }

    #[test]
    fn test_competitor_abbrev_falls_back_to_name() {
        let c = serde_json::json!({
            "homeAway": "home", "score": "3",
            "team": {"displayName": "Rangers"}
        });
        let comp = parse_competitor(&c).unwrap();
        assert_eq!(comp.abbrev, "RAN");
        assert_eq!(comp.score, 3);
    }
}
