//! Live "now playing" metadata as reported by the station automation service.
//!
//! The endpoint answers
//!
//! ```text
//! { "nowPlaying": { "title", "artist", "artwork",
//!                   "mode": "dj" | "autodj" | "offline",
//!                   "djName", "playedAt" } | null }
//! ```
//!
//! Every field inside `nowPlaying` may be missing or null; a missing object
//! means "nothing to report" and callers keep their previous snapshot.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Who is driving the live stream right now.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum LiveMode {
    /// A human DJ is hosting.
    #[serde(rename = "dj")]
    DjLive,
    /// AutoDJ rotation; the artist doubles as the show.
    #[default]
    #[serde(rename = "autodj")]
    Automated,
    #[serde(rename = "offline", other)]
    Offline,
}

/// One successful poll.  Replaced wholesale, never merged field by field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LiveMetadataSnapshot {
    pub title: String,
    pub artist: String,
    pub artwork_url: Option<String>,
    pub mode: LiveMode,
    pub dj_name: Option<String>,
    pub played_at: Option<DateTime<Utc>>,
    pub fetched_at: DateTime<Utc>,
}

impl LiveMetadataSnapshot {
    /// Convenience for building snapshots by hand (tests, fixtures).
    pub fn new(mode: LiveMode) -> Self {
        Self {
            title: String::new(),
            artist: String::new(),
            artwork_url: None,
            mode,
            dj_name: None,
            played_at: None,
            fetched_at: Utc::now(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct NowPlayingResponse {
    #[serde(rename = "nowPlaying", default)]
    now_playing: Option<NowPlayingPayload>,
}

#[derive(Debug, Deserialize)]
struct NowPlayingPayload {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    artist: Option<String>,
    #[serde(default)]
    artwork: Option<String>,
    #[serde(default)]
    mode: Option<LiveMode>,
    #[serde(rename = "djName", default)]
    dj_name: Option<String>,
    #[serde(rename = "playedAt", default)]
    played_at: Option<PlayedAt>,
}

/// `playedAt` shows up either as unix seconds or as an RFC 3339 string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PlayedAt {
    Unix(i64),
    Text(String),
}

impl PlayedAt {
    fn to_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            PlayedAt::Unix(secs) => Utc.timestamp_opt(*secs, 0).single(),
            PlayedAt::Text(s) => DateTime::parse_from_rfc3339(s.trim())
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
        }
    }
}

fn clean(value: Option<String>) -> String {
    value.map(|s| s.trim().to_string()).unwrap_or_default()
}

fn clean_opt(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Decode an endpoint body.  `Ok(None)` when the service reports nothing.
pub fn parse_now_playing(
    body: &[u8],
    fetched_at: DateTime<Utc>,
) -> anyhow::Result<Option<LiveMetadataSnapshot>> {
    let response: NowPlayingResponse = serde_json::from_slice(body)?;
    let Some(payload) = response.now_playing else {
        return Ok(None);
    };

    Ok(Some(LiveMetadataSnapshot {
        title: clean(payload.title),
        artist: clean(payload.artist),
        artwork_url: clean_opt(payload.artwork),
        mode: payload.mode.unwrap_or_default(),
        dj_name: clean_opt(payload.dj_name),
        played_at: payload.played_at.as_ref().and_then(PlayedAt::to_datetime),
        fetched_at,
    }))
}
