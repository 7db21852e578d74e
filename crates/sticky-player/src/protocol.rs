use serde::{Deserialize, Serialize};

use crate::engine::UserIntent;
use crate::nowplaying::LiveMetadataSnapshot;
use crate::track::Track;

/// Current protocol version.  Bump this when the wire format changes in a
/// breaking way.  Surfaces check this on connect and can refuse to talk to an
/// incompatible daemon.
pub const PROTOCOL_VERSION: u32 = 1;

/// Intents sent from a presentation surface to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "cmd")]
pub enum Command {
    TogglePlayPause,
    PlayNext,
    PlayPrev,
    PlayTrackAt { index: usize },
    /// `percent` is a fraction of the duration, 0.0..=1.0.
    Seek { percent: f64 },
    JumpToLive,
    SetVolume { value: f32 },
    ToggleQueueVisible,
    SetExpanded { expanded: bool },
    Enqueue { track: Track },
    EnqueueNext { track: Track },
    RemoveAt { index: usize },
    ReplaceOnDemand { tracks: Vec<Track> },
    GetState,
}

/// Messages sent from the daemon to surfaces.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "broadcast")]
pub enum Broadcast {
    /// Sent immediately on connect: protocol version + full view.
    Hello {
        protocol_version: u32,
        rev: u64,
        view: PlayerView,
    },
    State {
        data: PlayerView,
    },
    Log {
        message: String,
    },
    Error {
        message: String,
    },
}

/// Read-only snapshot of the player, rendered as-is by every surface.
///
/// `current_time` and `duration` are always `None` while the live stream is
/// current.  `rev` increases on every published change so surfaces can spot
/// missed updates.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PlayerView {
    #[serde(default)]
    pub rev: u64,
    pub current_track: Option<Track>,
    pub current_show: Option<String>,
    pub is_live: bool,
    pub is_playing: bool,
    pub current_time: Option<f64>,
    pub duration: Option<f64>,
    pub volume: f32,
    pub queue: Vec<Track>,
    pub current_index: Option<usize>,
    #[serde(default)]
    pub queue_visible: bool,
    #[serde(default)]
    pub expanded: bool,
    #[serde(default)]
    pub last_user_intent: UserIntent,
    /// Automatic playback is held back until the user presses play.
    #[serde(default)]
    pub playback_blocked: bool,
    #[serde(default)]
    pub live_metadata: Option<LiveMetadataSnapshot>,
}

impl PlayerView {
    /// Progress as 0.0..=1.0 for scrubbers; `None` when there is no timeline.
    pub fn progress(&self) -> Option<f64> {
        let (t, d) = (self.current_time?, self.duration?);
        if d > 0.0 {
            Some((t / d).clamp(0.0, 1.0))
        } else {
            None
        }
    }

    pub fn can_seek(&self) -> bool {
        !self.is_live && self.duration.is_some()
    }

    pub fn has_track(&self) -> bool {
        self.current_track.is_some()
    }
}

/// Wrapper for socket communication
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Command(Command),
    Broadcast(Broadcast),
}

impl Message {
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let json = serde_json::to_vec(self)?;
        let len = json.len() as u32;
        let mut result = Vec::with_capacity(4 + json.len());
        result.extend_from_slice(&len.to_be_bytes());
        result.extend_from_slice(&json);
        Ok(result)
    }

    pub fn decode(data: &[u8]) -> anyhow::Result<(Self, usize)> {
        if data.len() < 4 {
            anyhow::bail!("Insufficient data for length header");
        }
        let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if data.len() < 4 + len {
            anyhow::bail!("Insufficient data for message");
        }
        let msg: Self = serde_json::from_slice(&data[4..4 + len])?;
        Ok((msg, 4 + len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_frame() {
        let msg = Message::Command(Command::PlayTrackAt { index: 5 });
        let encoded = msg.encode().unwrap();
        let (decoded, len) = Message::decode(&encoded).unwrap();
        assert_eq!(len, encoded.len());
        match decoded {
            Message::Command(Command::PlayTrackAt { index }) => assert_eq!(index, 5),
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_command_json_shape() {
        let cmd: Command = serde_json::from_str(r#"{"cmd":"Seek","percent":0.5}"#).unwrap();
        assert_eq!(cmd, Command::Seek { percent: 0.5 });
    }

    #[test]
    fn test_hello_frame() {
        let view = PlayerView {
            rev: 42,
            ..Default::default()
        };
        let msg = Message::Broadcast(Broadcast::Hello {
            protocol_version: PROTOCOL_VERSION,
            rev: 42,
            view,
        });
        let encoded = msg.encode().unwrap();
        let (decoded, _) = Message::decode(&encoded).unwrap();
        match decoded {
            Message::Broadcast(Broadcast::Hello {
                protocol_version,
                rev,
                ..
            }) => {
                assert_eq!(protocol_version, PROTOCOL_VERSION);
                assert_eq!(rev, 42);
            }
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_partial_frame_waits_for_more() {
        let encoded = Message::Command(Command::GetState).encode().unwrap();
        assert!(Message::decode(&encoded[..2]).is_err());
        assert!(Message::decode(&encoded[..encoded.len() - 1]).is_err());
    }

    #[test]
    fn test_progress_hidden_for_live() {
        let mut view = PlayerView {
            current_time: Some(30.0),
            duration: Some(120.0),
            ..Default::default()
        };
        assert_eq!(view.progress(), Some(0.25));
        assert!(view.can_seek());
        view.is_live = true;
        view.current_time = None;
        view.duration = None;
        assert_eq!(view.progress(), None);
        assert!(!view.can_seek());
    }
}
