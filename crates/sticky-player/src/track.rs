use serde::{Deserialize, Serialize};

/// What kind of media a queue entry points at.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TrackKind {
    /// The always-on broadcast stream.  No duration, not seekable.
    Live,
    #[default]
    OnDemandAudio,
    OnDemandVideo,
    PreviewClip,
}

impl TrackKind {
    pub fn is_live(self) -> bool {
        self == TrackKind::Live
    }
}

/// A playable unit.
///
/// On the wire the redundant `is_live` flag is emitted next to `kind` for
/// older surfaces; it is ignored when reading.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(into = "TrackWire")]
pub struct Track {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub artist: String,
    #[serde(default)]
    pub artwork_url: Option<String>,
    pub source_url: String,
    #[serde(default)]
    pub kind: TrackKind,
    /// Only known once the resource reports it.  Always `None` for live.
    #[serde(default)]
    pub duration_secs: Option<f64>,
    /// Programme label shown instead of the artist (hosted live slots).
    #[serde(default)]
    pub show_name: Option<String>,
}

impl Track {
    pub fn live(id: impl Into<String>, title: impl Into<String>, source_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            source_url: source_url.into(),
            kind: TrackKind::Live,
            ..Self::default()
        }
    }

    pub fn on_demand(
        id: impl Into<String>,
        title: impl Into<String>,
        artist: impl Into<String>,
        source_url: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            artist: artist.into(),
            source_url: source_url.into(),
            kind: TrackKind::OnDemandAudio,
            ..Self::default()
        }
    }

    pub fn is_live(&self) -> bool {
        self.kind.is_live()
    }
}

#[derive(Serialize)]
struct TrackWire {
    id: String,
    title: String,
    artist: String,
    artwork_url: Option<String>,
    source_url: String,
    kind: TrackKind,
    is_live: bool,
    duration_secs: Option<f64>,
    show_name: Option<String>,
}

impl From<Track> for TrackWire {
    fn from(t: Track) -> Self {
        Self {
            is_live: t.is_live(),
            id: t.id,
            title: t.title,
            artist: t.artist,
            artwork_url: t.artwork_url,
            source_url: t.source_url,
            kind: t.kind,
            duration_secs: t.duration_secs,
            show_name: t.show_name,
        }
    }
}
