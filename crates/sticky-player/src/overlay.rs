//! Folds now-playing snapshots onto the live queue entry.
//!
//! The stored queue track is never touched; `view()` hands back a decorated
//! copy.  Fields only ever move from one non-empty value to another, so a
//! transient empty poll cannot flash "Unknown" on the surfaces.

use crate::nowplaying::{LiveMetadataSnapshot, LiveMode};
use crate::track::Track;

#[derive(Debug, Clone, Default)]
pub struct MetadataOverlay {
    snapshot: Option<LiveMetadataSnapshot>,
    title: Option<String>,
    artist: Option<String>,
    artwork_url: Option<String>,
    show: Option<String>,
}

fn non_empty(value: &str) -> Option<String> {
    let v = value.trim();
    if v.is_empty() {
        None
    } else {
        Some(v.to_string())
    }
}

fn keep_or_replace(slot: &mut Option<String>, candidate: Option<String>) {
    if let Some(value) = candidate {
        *slot = Some(value);
    }
}

impl MetadataOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, snapshot: LiveMetadataSnapshot) {
        keep_or_replace(&mut self.title, non_empty(&snapshot.title));
        keep_or_replace(&mut self.artist, non_empty(&snapshot.artist));
        keep_or_replace(
            &mut self.artwork_url,
            snapshot.artwork_url.as_deref().and_then(non_empty),
        );

        let show = match snapshot.mode {
            LiveMode::DjLive => snapshot
                .dj_name
                .as_deref()
                .and_then(non_empty)
                .or_else(|| non_empty(&snapshot.artist)),
            LiveMode::Automated | LiveMode::Offline => non_empty(&snapshot.artist),
        };
        keep_or_replace(&mut self.show, show);

        self.snapshot = Some(snapshot);
    }

    /// Latest raw snapshot, as received.
    pub fn snapshot(&self) -> Option<&LiveMetadataSnapshot> {
        self.snapshot.as_ref()
    }

    pub fn show_name(&self) -> Option<&str> {
        self.show.as_deref()
    }

    /// Decorated copy of `track` for display.  Non-live tracks pass through.
    pub fn view(&self, track: &Track) -> Track {
        let mut out = track.clone();
        if !track.is_live() {
            return out;
        }
        if let Some(title) = &self.title {
            out.title = title.clone();
        }
        if let Some(artist) = &self.artist {
            out.artist = artist.clone();
        }
        if let Some(art) = &self.artwork_url {
            out.artwork_url = Some(art.clone());
        }
        if let Some(show) = &self.show {
            out.show_name = Some(show.clone());
        }
        out.duration_secs = None;
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(mode: LiveMode, title: &str, artist: &str, dj: Option<&str>) -> LiveMetadataSnapshot {
        LiveMetadataSnapshot {
            title: title.into(),
            artist: artist.into(),
            dj_name: dj.map(Into::into),
            ..LiveMetadataSnapshot::new(mode)
        }
    }

    fn live() -> Track {
        Track {
            artwork_url: Some("https://img.example/station.png".into()),
            show_name: Some("Station".into()),
            ..Track::live("live", "On Air", "https://stream.example/live")
        }
    }

    #[test]
    fn test_empty_poll_does_not_blank_title() {
        let mut overlay = MetadataOverlay::new();
        overlay.apply(snap(LiveMode::Automated, "A", "Artist", None));
        overlay.apply(snap(LiveMode::Automated, "", "", None));
        let view = overlay.view(&live());
        assert_eq!(view.title, "A");
        assert_eq!(view.artist, "Artist");
        // raw snapshot is still replaced wholesale
        assert_eq!(overlay.snapshot().unwrap().title, "");
    }

    #[test]
    fn test_show_name_follows_mode() {
        let mut overlay = MetadataOverlay::new();
        overlay.apply(snap(LiveMode::DjLive, "Track", "Someone", Some("Karesse")));
        assert_eq!(overlay.show_name(), Some("Karesse"));
        overlay.apply(snap(LiveMode::Automated, "Snooze", "SZA", None));
        assert_eq!(overlay.show_name(), Some("SZA"));
    }

    #[test]
    fn test_dj_without_name_falls_back_to_artist() {
        let mut overlay = MetadataOverlay::new();
        overlay.apply(snap(LiveMode::DjLive, "Track", "Guest", Some("  ")));
        assert_eq!(overlay.show_name(), Some("Guest"));
    }

    #[test]
    fn test_view_keeps_stored_track_and_defaults() {
        let mut overlay = MetadataOverlay::new();
        let stored = live();
        assert_eq!(overlay.view(&stored), stored);

        overlay.apply(snap(LiveMode::Automated, "Song", "Band", None));
        let view = overlay.view(&stored);
        assert_eq!(view.title, "Song");
        assert_eq!(view.show_name.as_deref(), Some("Band"));
        assert_eq!(view.artwork_url, stored.artwork_url);
        assert_eq!(stored.title, "On Air");
    }

    #[test]
    fn test_on_demand_passes_through() {
        let mut overlay = MetadataOverlay::new();
        overlay.apply(snap(LiveMode::Automated, "Song", "Band", None));
        let track = Track::on_demand("a", "Mine", "Me", "https://cdn.example/a.mp3");
        assert_eq!(overlay.view(&track), track);
    }
}
