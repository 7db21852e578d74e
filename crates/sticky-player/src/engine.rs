//! PlaybackEngine: sole owner of the audio resource.
//!
//! The resource itself sits behind [`AudioOutput`]; the engine layers the
//! safety rules on top:
//!
//! ```text
//!   load_track ──► generation += 1, in-flight play forgotten
//!   play(User)     ──► always attempted, clears `blocked`
//!   play(Autoplay) ──► dropped while `blocked`
//!   pause(user)    ──► sets `blocked`
//!   Error event    ──► pause + `blocked` + `errored`, never retried here
//!   rejected play  ──► paused, nothing else
//! ```
//!
//! Every load handed to the output bumps `load_seq`.  Resource events are
//! stamped with the load they describe and dropped when that load has since
//! been replaced.
//!
//! `play()` does not wait for the resource.  It hands back a [`PendingPlay`]
//! whose future the owner awaits wherever it likes; the outcome comes back
//! through [`PlaybackEngine::on_play_settled`] and is dropped when the ticket
//! no longer matches (a newer load, a newer play, or a pause happened since).
use chrono::Utc;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::track::{Track, TrackKind};

/// Query parameter appended to live URLs on every load.
pub const CACHE_BUST_PARAM: &str = "_t";

#[derive(Debug, Clone, Error, PartialEq)]
pub enum OutputError {
    /// Platform policy refused to start playback (autoplay restrictions).
    #[error("playback not allowed: {0}")]
    NotAllowed(String),
    #[error("audio output unavailable")]
    Unavailable,
    #[error("playback failed: {0}")]
    Failed(String),
}

/// Resolves once the resource has actually started (or refused to).
pub type PlayFuture = BoxFuture<'static, Result<(), OutputError>>;

/// Narrow interface over the one underlying audio resource.
pub trait AudioOutput: Send {
    /// Point the resource at `url`.  Loading never starts playback.
    fn load(&mut self, url: &str);
    fn play(&mut self) -> PlayFuture;
    fn pause(&mut self);
    fn seek(&mut self, position_secs: f64);
    fn set_volume(&mut self, volume: f32);
}

/// Events reported by the resource.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputEvent {
    TimeUpdate(f64),
    LoadedMetadata { duration_secs: f64 },
    Ended,
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayReason {
    /// Direct user action.  Always attempted.
    User,
    /// Anything the player decided on its own (mount, track advance).
    Autoplay,
}

/// What the user last asked for, independent of what actually happened.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserIntent {
    Playing,
    #[default]
    Paused,
}

/// Identifies one play attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayTicket {
    seq: u64,
    generation: u64,
}

/// A play attempt the owner still has to await.
pub struct PendingPlay {
    pub ticket: PlayTicket,
    pub future: PlayFuture,
}

impl std::fmt::Debug for PendingPlay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingPlay")
            .field("ticket", &self.ticket)
            .finish_non_exhaustive()
    }
}

/// What a resource event means for the layers above.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineSignal {
    Nothing,
    /// An on-demand track played to completion.
    TrackEnded,
    /// The live stream dropped; progress was reset.
    LiveDisconnected,
    /// The resource failed; the engine is blocked until a user play.
    Failed,
}

#[derive(Debug, Clone)]
struct Loaded {
    track_id: String,
    kind: TrackKind,
    source_url: String,
    resolved_url: String,
}

/// Append (or refresh) the cache-busting parameter.
pub fn freshen_url(url: &str, stamp_millis: i64) -> String {
    let (base, fragment) = match url.split_once('#') {
        Some((b, f)) => (b, Some(f)),
        None => (url, None),
    };
    let sep = if base.contains('?') { '&' } else { '?' };
    let mut out = format!("{base}{sep}{CACHE_BUST_PARAM}={stamp_millis}");
    if let Some(f) = fragment {
        out.push('#');
        out.push_str(f);
    }
    out
}

pub struct PlaybackEngine<O: AudioOutput> {
    output: O,
    loaded: Option<Loaded>,
    generation: u64,
    load_seq: u64,
    next_seq: u64,
    in_flight: Option<PlayTicket>,
    is_playing: bool,
    current_time: f64,
    duration: Option<f64>,
    volume: f32,
    blocked: bool,
    errored: bool,
    last_user_intent: UserIntent,
}

impl<O: AudioOutput> PlaybackEngine<O> {
    pub fn new(mut output: O, volume: f32) -> Self {
        let volume = volume.clamp(0.0, 1.0);
        output.set_volume(volume);
        Self {
            output,
            loaded: None,
            generation: 0,
            load_seq: 0,
            next_seq: 0,
            in_flight: None,
            is_playing: false,
            current_time: 0.0,
            duration: None,
            volume,
            blocked: false,
            errored: false,
            last_user_intent: UserIntent::default(),
        }
    }

    // ── accessors ─────────────────────────────────────────────────────────────

    pub fn output(&self) -> &O {
        &self.output
    }

    pub fn output_mut(&mut self) -> &mut O {
        &mut self.output
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing
    }

    pub fn current_time(&self) -> f64 {
        self.current_time
    }

    pub fn duration(&self) -> Option<f64> {
        self.duration
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked
    }

    pub fn is_errored(&self) -> bool {
        self.errored
    }

    pub fn last_user_intent(&self) -> UserIntent {
        self.last_user_intent
    }

    /// Loads handed to the output so far.  Never resets, not even on rebind.
    pub fn load_seq(&self) -> u64 {
        self.load_seq
    }

    pub fn has_play_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn loaded_track_id(&self) -> Option<&str> {
        self.loaded.as_ref().map(|l| l.track_id.as_str())
    }

    /// The URL actually handed to the resource (cache-busted for live).
    pub fn loaded_url(&self) -> Option<&str> {
        self.loaded.as_ref().map(|l| l.resolved_url.as_str())
    }

    fn loaded_is_live(&self) -> bool {
        self.loaded.as_ref().is_some_and(|l| l.kind.is_live())
    }

    // ── primitives ────────────────────────────────────────────────────────────

    /// Make `track` the loaded source.  Returns `true` if the resource was
    /// actually repointed.
    pub fn load_track(&mut self, track: &Track, force: bool) -> bool {
        if track.is_live() {
            let url = freshen_url(&track.source_url, Utc::now().timestamp_millis());
            self.repoint(track, url);
            return true;
        }

        let unchanged = !force
            && !self.errored
            && self
                .loaded
                .as_ref()
                .is_some_and(|l| !l.kind.is_live() && l.source_url == track.source_url);
        if unchanged {
            if let Some(l) = self.loaded.as_mut() {
                l.track_id = track.id.clone();
                l.kind = track.kind;
            }
            return false;
        }

        self.repoint(track, track.source_url.clone());
        self.duration = track.duration_secs.filter(|d| d.is_finite() && *d > 0.0);
        true
    }

    fn repoint(&mut self, track: &Track, resolved_url: String) {
        debug!(
            "engine: load id={} kind={:?} url={}",
            track.id, track.kind, resolved_url
        );
        self.output.load(&resolved_url);
        self.load_seq += 1;
        self.generation += 1;
        self.in_flight = None;
        self.is_playing = false;
        self.errored = false;
        self.current_time = 0.0;
        self.duration = None;
        self.loaded = Some(Loaded {
            track_id: track.id.clone(),
            kind: track.kind,
            source_url: track.source_url.clone(),
            resolved_url,
        });
    }

    pub fn play(&mut self, reason: PlayReason) -> Option<PendingPlay> {
        if self.loaded.is_none() {
            debug!("engine: play({:?}) with nothing loaded", reason);
            return None;
        }
        match reason {
            PlayReason::User => {
                self.blocked = false;
                self.last_user_intent = UserIntent::Playing;
            }
            PlayReason::Autoplay if self.blocked => {
                debug!("engine: autoplay suppressed (blocked restart)");
                return None;
            }
            PlayReason::Autoplay => {}
        }

        self.next_seq += 1;
        let ticket = PlayTicket {
            seq: self.next_seq,
            generation: self.generation,
        };
        self.in_flight = Some(ticket);
        Some(PendingPlay {
            ticket,
            future: self.output.play(),
        })
    }

    /// Apply the outcome of an earlier `play()`.  Returns `false` when the
    /// outcome was stale and ignored.
    pub fn on_play_settled(&mut self, ticket: PlayTicket, result: Result<(), OutputError>) -> bool {
        if self.in_flight != Some(ticket) || ticket.generation != self.generation {
            debug!("engine: ignoring stale play outcome {:?}", ticket);
            return false;
        }
        self.in_flight = None;
        match result {
            Ok(()) => {
                self.is_playing = true;
                self.blocked = false;
            }
            Err(e) => {
                self.is_playing = false;
                match &e {
                    OutputError::NotAllowed(_) => info!("engine: play refused: {}", e),
                    _ => warn!("engine: play failed: {}", e),
                }
            }
        }
        true
    }

    pub fn pause(&mut self, user_initiated: bool) {
        self.output.pause();
        self.in_flight = None;
        self.is_playing = false;
        if user_initiated {
            self.blocked = true;
            self.last_user_intent = UserIntent::Paused;
        }
    }

    /// Seek to `percent` (0.0..=1.0) of the known duration.
    pub fn seek(&mut self, percent: f64) -> bool {
        if self.loaded.is_none() || self.loaded_is_live() || !percent.is_finite() {
            return false;
        }
        let Some(duration) = self.duration else {
            return false;
        };
        let target = percent.clamp(0.0, 1.0) * duration;
        self.current_time = target;
        self.output.seek(target);
        true
    }

    pub fn set_volume(&mut self, volume: f32) -> f32 {
        let volume = if volume.is_finite() {
            volume.clamp(0.0, 1.0)
        } else {
            self.volume
        };
        self.volume = volume;
        self.output.set_volume(volume);
        volume
    }

    /// Swap in a fresh resource.  Nothing counts as loaded afterwards.
    pub fn rebind(&mut self, mut output: O) {
        output.set_volume(self.volume);
        self.output = output;
        self.loaded = None;
        self.generation += 1;
        self.in_flight = None;
        self.is_playing = false;
        self.current_time = 0.0;
        self.duration = None;
    }

    /// Apply a resource event.  `load_seq` is the load the event belongs to;
    /// anything from an earlier load is ignored.
    pub fn handle_event(&mut self, load_seq: u64, event: OutputEvent) -> EngineSignal {
        if self.loaded.is_none() {
            return EngineSignal::Nothing;
        }
        if load_seq != self.load_seq {
            debug!(
                "engine: dropping {:?} from load {} (current {})",
                event, load_seq, self.load_seq
            );
            return EngineSignal::Nothing;
        }
        let live = self.loaded_is_live();
        match event {
            OutputEvent::TimeUpdate(t) => {
                if !live && t.is_finite() && t >= 0.0 {
                    self.current_time = t;
                }
                EngineSignal::Nothing
            }
            OutputEvent::LoadedMetadata { duration_secs } => {
                if !live && duration_secs.is_finite() && duration_secs > 0.0 {
                    self.duration = Some(duration_secs);
                }
                EngineSignal::Nothing
            }
            OutputEvent::Ended => {
                self.in_flight = None;
                self.is_playing = false;
                if live {
                    info!("engine: live stream ended, treating as disconnect");
                    self.current_time = 0.0;
                    EngineSignal::LiveDisconnected
                } else {
                    EngineSignal::TrackEnded
                }
            }
            OutputEvent::Error(message) => {
                warn!("engine: resource error: {}", message);
                self.output.pause();
                self.in_flight = None;
                self.is_playing = false;
                self.blocked = true;
                self.errored = true;
                EngineSignal::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::FutureExt;

    /// Output that records calls and resolves every play immediately.
    #[derive(Default)]
    struct Recorder {
        loads: Vec<String>,
        seeks: Vec<f64>,
        pauses: usize,
        volume: f32,
    }

    impl AudioOutput for Recorder {
        fn load(&mut self, url: &str) {
            self.loads.push(url.to_string());
        }
        fn play(&mut self) -> PlayFuture {
            async { Ok(()) }.boxed()
        }
        fn pause(&mut self) {
            self.pauses += 1;
        }
        fn seek(&mut self, position_secs: f64) {
            self.seeks.push(position_secs);
        }
        fn set_volume(&mut self, volume: f32) {
            self.volume = volume;
        }
    }

    fn live() -> Track {
        Track::live("live", "On Air", "https://stream.example/live?fmt=mp3")
    }

    fn od() -> Track {
        Track::on_demand("a", "A", "Artist", "https://cdn.example/a.mp3")
    }

    fn feed(engine: &mut PlaybackEngine<Recorder>, event: OutputEvent) -> EngineSignal {
        let seq = engine.load_seq();
        engine.handle_event(seq, event)
    }

    fn settle(engine: &mut PlaybackEngine<Recorder>, pending: Option<PendingPlay>, ok: bool) -> bool {
        let pending = pending.expect("play attempted");
        let result = if ok {
            Ok(())
        } else {
            Err(OutputError::NotAllowed("autoplay".into()))
        };
        engine.on_play_settled(pending.ticket, result)
    }

    #[test]
    fn test_freshen_url() {
        assert_eq!(freshen_url("https://s/live", 5), "https://s/live?_t=5");
        assert_eq!(freshen_url("https://s/live?a=1", 5), "https://s/live?a=1&_t=5");
        assert_eq!(freshen_url("https://s/live#x", 5), "https://s/live?_t=5#x");
    }

    #[test]
    fn test_live_always_reloads_with_cache_buster() {
        let mut engine = PlaybackEngine::new(Recorder::default(), 0.5);
        assert!(engine.load_track(&live(), false));
        assert!(engine.load_track(&live(), false));
        let loads = &engine.output().loads;
        assert_eq!(loads.len(), 2);
        assert!(loads[0].starts_with("https://stream.example/live?fmt=mp3&_t="));
    }

    #[test]
    fn test_on_demand_same_source_keeps_progress() {
        let mut engine = PlaybackEngine::new(Recorder::default(), 0.5);
        engine.load_track(&od(), false);
        feed(&mut engine, OutputEvent::LoadedMetadata { duration_secs: 200.0 });
        feed(&mut engine, OutputEvent::TimeUpdate(42.0));
        assert!(!engine.load_track(&od(), false));
        assert_eq!(engine.current_time(), 42.0);
        assert_eq!(engine.output().loads.len(), 1);
        assert!(engine.load_track(&od(), true));
        assert_eq!(engine.current_time(), 0.0);
    }

    #[test]
    fn test_user_pause_blocks_autoplay_but_not_user_play() {
        let mut engine = PlaybackEngine::new(Recorder::default(), 0.5);
        engine.load_track(&od(), false);
        let p = engine.play(PlayReason::User);
        assert!(settle(&mut engine, p, true));
        assert!(engine.is_playing());

        engine.pause(true);
        assert!(!engine.is_playing());
        assert!(engine.play(PlayReason::Autoplay).is_none());
        assert!(!engine.is_playing());

        let p = engine.play(PlayReason::User);
        assert!(settle(&mut engine, p, true));
        assert!(engine.is_playing());
        assert_eq!(engine.last_user_intent(), UserIntent::Playing);
    }

    #[test]
    fn test_rejected_play_only_leaves_engine_paused() {
        let mut engine = PlaybackEngine::new(Recorder::default(), 0.5);
        engine.load_track(&live(), false);
        let p = engine.play(PlayReason::Autoplay);
        assert!(settle(&mut engine, p, false));
        assert!(!engine.is_playing());
        assert!(!engine.is_blocked());
        assert!(!engine.is_errored());
        assert!(engine.play(PlayReason::Autoplay).is_some());
    }

    #[test]
    fn test_events_from_replaced_load_are_ignored() {
        let mut engine = PlaybackEngine::new(Recorder::default(), 0.5);
        engine.load_track(&od(), false);
        let first = engine.load_seq();
        let other = Track::on_demand("b", "B", "Artist", "https://cdn.example/b.mp3");
        engine.load_track(&other, false);
        assert_eq!(engine.load_seq(), first + 1);

        assert_eq!(engine.handle_event(first, OutputEvent::Ended), EngineSignal::Nothing);
        engine.handle_event(first, OutputEvent::TimeUpdate(99.0));
        engine.handle_event(first, OutputEvent::Error("old file".into()));
        assert_eq!(engine.current_time(), 0.0);
        assert!(!engine.is_errored());

        assert_eq!(feed(&mut engine, OutputEvent::Ended), EngineSignal::TrackEnded);
    }

    #[test]
    fn test_load_seq_survives_rebind() {
        let mut engine = PlaybackEngine::new(Recorder::default(), 0.5);
        engine.load_track(&od(), false);
        engine.load_track(&live(), false);
        engine.rebind(Recorder::default());
        assert_eq!(engine.load_seq(), 2);
        // same source, no reload
        engine.load_track(&od(), false);
        assert!(!engine.load_track(&od(), false));
        assert_eq!(engine.load_seq(), 3);
    }

    #[test]
    fn test_stale_outcome_after_reload_is_ignored() {
        let mut engine = PlaybackEngine::new(Recorder::default(), 0.5);
        engine.load_track(&od(), false);
        let first = engine.play(PlayReason::User).unwrap();
        engine.load_track(&live(), false);
        assert!(!engine.on_play_settled(first.ticket, Ok(())));
        assert!(!engine.is_playing());
    }

    #[test]
    fn test_pause_invalidates_in_flight_play() {
        let mut engine = PlaybackEngine::new(Recorder::default(), 0.5);
        engine.load_track(&od(), false);
        let p = engine.play(PlayReason::User).unwrap();
        engine.pause(true);
        assert!(!engine.on_play_settled(p.ticket, Ok(())));
        assert!(!engine.is_playing());
    }

    #[test]
    fn test_seek_rules() {
        let mut engine = PlaybackEngine::new(Recorder::default(), 0.5);
        engine.load_track(&live(), false);
        assert!(!engine.seek(0.5));
        assert_eq!(engine.current_time(), 0.0);

        engine.load_track(&od(), false);
        assert!(!engine.seek(0.5), "duration unknown");
        feed(&mut engine, OutputEvent::LoadedMetadata { duration_secs: 100.0 });
        assert!(engine.seek(0.25));
        assert_eq!(engine.current_time(), 25.0);
        assert!(engine.seek(3.0));
        assert_eq!(engine.output().seeks, vec![25.0, 100.0]);
    }

    #[test]
    fn test_live_ignores_timeline_events() {
        let mut engine = PlaybackEngine::new(Recorder::default(), 0.5);
        engine.load_track(&live(), false);
        feed(&mut engine, OutputEvent::TimeUpdate(12.0));
        feed(&mut engine, OutputEvent::LoadedMetadata { duration_secs: 9.0 });
        assert_eq!(engine.current_time(), 0.0);
        assert_eq!(engine.duration(), None);
        assert_eq!(feed(&mut engine, OutputEvent::Ended), EngineSignal::LiveDisconnected);
    }

    #[test]
    fn test_error_blocks_until_user_play() {
        let mut engine = PlaybackEngine::new(Recorder::default(), 0.5);
        engine.load_track(&od(), false);
        let p = engine.play(PlayReason::User);
        settle(&mut engine, p, true);

        assert_eq!(
            feed(&mut engine, OutputEvent::Error("network".into())),
            EngineSignal::Failed
        );
        assert!(!engine.is_playing());
        assert!(engine.is_errored());
        assert_eq!(engine.output().pauses, 1);
        assert!(engine.play(PlayReason::Autoplay).is_none());

        // errored source is reloaded even when unchanged
        assert!(engine.load_track(&od(), false));
        assert!(engine.play(PlayReason::User).is_some());
    }

    #[test]
    fn test_volume_clamped_and_written_through() {
        let mut engine = PlaybackEngine::new(Recorder::default(), 0.5);
        assert_eq!(engine.output().volume, 0.5);
        assert_eq!(engine.set_volume(1.7), 1.0);
        assert_eq!(engine.output().volume, 1.0);
        assert_eq!(engine.set_volume(f32::NAN), 1.0);
    }

    #[test]
    fn test_rebind_forgets_loaded_source() {
        let mut engine = PlaybackEngine::new(Recorder::default(), 0.3);
        engine.load_track(&od(), false);
        let p = engine.play(PlayReason::User).unwrap();
        engine.rebind(Recorder::default());
        assert!(engine.loaded_track_id().is_none());
        assert_eq!(engine.output().volume, 0.3);
        assert!(!engine.on_play_settled(p.ticket, Ok(())));
        assert!(engine.play(PlayReason::User).is_none());
    }
}
