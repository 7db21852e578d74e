//! Building the initial queue: the live station from config plus an optional
//! playlist file of on-demand entries.

use std::path::Path;

use tracing::{info, warn};

use crate::config::Config;
use crate::queue::Queue;
use crate::track::{Track, TrackKind};

pub const LIVE_TRACK_ID: &str = "live";

/// Parse an m3u list.  `#EXTINF:<secs>,<artist> - <title>` lines name the
/// entry that follows; ids are derived from the position.
pub fn parse_m3u_from_str(content: &str) -> Vec<Track> {
    let mut tracks = Vec::new();
    let mut pending: Option<(Option<f64>, String)> = None;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(rest) = line.strip_prefix("#EXTINF:") {
            if let Some((secs, name)) = rest.split_once(',') {
                let secs = secs.trim().parse::<f64>().ok().filter(|s| *s > 0.0);
                pending = Some((secs, name.trim().to_string()));
            }
            continue;
        }

        if line.starts_with('#') {
            continue;
        }

        let url = line.to_string();
        let (duration_secs, name) = pending.take().unwrap_or((None, String::new()));
        let (artist, title) = match name.split_once(" - ") {
            Some((a, t)) => (a.trim().to_string(), t.trim().to_string()),
            None if name.is_empty() => (String::new(), url.clone()),
            None => (String::new(), name),
        };

        tracks.push(Track {
            id: format!("m3u-{}", tracks.len()),
            title,
            artist,
            source_url: url,
            kind: TrackKind::OnDemandAudio,
            duration_secs,
            ..Track::default()
        });
    }

    tracks
}

// ── TOML playlist ─────────────────────────────────────────────────────────────

/// Matches the `[[track]]` tables of a playlist file.  Kept apart from
/// `Track` so the file format can stay lenient (no id required).
#[derive(Debug, serde::Deserialize)]
struct TomlPlaylistFile {
    #[serde(default)]
    track: Vec<TomlTrack>,
}

#[derive(Debug, serde::Deserialize)]
struct TomlTrack {
    #[serde(default)]
    id: Option<String>,
    title: String,
    #[serde(default)]
    artist: String,
    url: String,
    #[serde(default)]
    artwork_url: Option<String>,
    #[serde(default)]
    kind: Option<TrackKind>,
    #[serde(default)]
    duration_secs: Option<f64>,
    #[serde(default)]
    show_name: Option<String>,
}

pub fn parse_playlist_from_toml_str(content: &str) -> anyhow::Result<Vec<Track>> {
    let file: TomlPlaylistFile = toml::from_str(content)?;
    let tracks = file
        .track
        .into_iter()
        .enumerate()
        .map(|(i, t)| Track {
            id: t.id.unwrap_or_else(|| format!("track-{i}")),
            title: t.title,
            artist: t.artist,
            artwork_url: t.artwork_url,
            source_url: t.url,
            kind: t.kind.unwrap_or_default(),
            duration_secs: t.duration_secs,
            show_name: t.show_name,
        })
        .collect();
    Ok(tracks)
}

pub fn load_playlist(path: &Path) -> anyhow::Result<Vec<Track>> {
    let content = std::fs::read_to_string(path)?;
    let is_m3u = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("m3u") || e.eq_ignore_ascii_case("m3u8"));
    if is_m3u {
        Ok(parse_m3u_from_str(&content))
    } else {
        parse_playlist_from_toml_str(&content)
    }
}

/// The live entry described by `[station]`, if a stream URL is set.
pub fn live_track(config: &Config) -> Option<Track> {
    let station = &config.station;
    if station.stream_url.trim().is_empty() {
        return None;
    }
    Some(Track {
        artwork_url: station.artwork_url.clone(),
        show_name: Some(station.name.clone()),
        ..Track::live(LIVE_TRACK_ID, station.name.clone(), station.stream_url.trim())
    })
}

/// Assemble the session queue.  A broken playlist is logged and skipped; the
/// live entry alone still makes a usable player.
pub fn load_queue(config: &Config) -> anyhow::Result<Queue> {
    let mut tracks: Vec<Track> = live_track(config).into_iter().collect();

    if let Some(path) = &config.queue.playlist {
        match load_playlist(path) {
            Ok(list) => {
                info!("Loaded {} tracks from {}", list.len(), path.display());
                // a stray live entry in the playlist would clash with the station
                tracks.extend(list.into_iter().filter(|t| !t.is_live()));
            }
            Err(e) => warn!("Failed to load playlist {}: {}", path.display(), e),
        }
    }

    Ok(Queue::new(tracks, config.queue.looping)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_m3u() {
        let tracks = parse_m3u_from_str(
            "#EXTM3U\n#EXTINF:215,SZA - Snooze\nhttps://cdn.example/snooze.mp3\n\nhttps://cdn.example/bare.mp3\n",
        );
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].artist, "SZA");
        assert_eq!(tracks[0].title, "Snooze");
        assert_eq!(tracks[0].duration_secs, Some(215.0));
        assert_eq!(tracks[1].title, "https://cdn.example/bare.mp3");
        assert_ne!(tracks[0].id, tracks[1].id);
    }

    #[test]
    fn test_parse_toml_playlist() {
        let tracks = parse_playlist_from_toml_str(
            r#"
            [[track]]
            title = "Interview"
            url = "https://cdn.example/interview.mp4"
            kind = "on-demand-video"

            [[track]]
            id = "clip-1"
            title = "Teaser"
            artist = "Station"
            url = "https://cdn.example/teaser.mp3"
            kind = "preview-clip"
            duration_secs = 30.0
            "#,
        )
        .unwrap();
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].id, "track-0");
        assert_eq!(tracks[0].kind, TrackKind::OnDemandVideo);
        assert_eq!(tracks[1].id, "clip-1");
        assert_eq!(tracks[1].kind, TrackKind::PreviewClip);
    }

    #[test]
    fn test_load_queue_puts_live_first() {
        let mut config = Config::default();
        config.station.stream_url = "https://stream.example/live".into();
        config.station.name = "Radio".into();
        let queue = load_queue(&config).unwrap();
        assert_eq!(queue.len(), 1);
        let live = &queue.tracks()[0];
        assert!(live.is_live());
        assert_eq!(live.show_name.as_deref(), Some("Radio"));
    }

    #[test]
    fn test_load_queue_without_stream_is_empty() {
        let queue = load_queue(&Config::default()).unwrap();
        assert!(queue.is_empty());
    }
}
