//! The one object every surface talks to.
//!
//! `PlaybackFacade` composes the engine, the queue and the metadata overlay.
//! Surfaces read [`PlayerView`]s and call intents; they never see the audio
//! resource.  Intents that may start playback return a [`Dispatch`]: the owner
//! awaits the contained future and reports back with
//! [`PlaybackFacade::on_play_settled`].
//!
//! Track changes follow three rules:
//!
//! * a live track arriving gets an autoplay attempt (dropped while blocked);
//! * a user switch to an on-demand track is a user play, always attempted;
//! * an automatic change to an on-demand track only continues playback when
//!   the user's last intent was to play.

use tracing::{debug, info};

use crate::engine::{
    AudioOutput, EngineSignal, OutputError, OutputEvent, PendingPlay, PlayReason, PlayTicket,
    PlaybackEngine, UserIntent,
};
use crate::nowplaying::LiveMetadataSnapshot;
use crate::overlay::MetadataOverlay;
use crate::protocol::{Command, PlayerView};
use crate::queue::{Queue, QueueError};
use crate::track::Track;

/// A play attempt the caller must drive to completion, if any.
pub type Dispatch = Option<PendingPlay>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChangeOrigin {
    User,
    Automatic,
}

pub struct PlaybackFacade<O: AudioOutput> {
    engine: PlaybackEngine<O>,
    queue: Queue,
    overlay: MetadataOverlay,
    queue_visible: bool,
    expanded: bool,
    /// One-shot guard for the autoplay attempt made when a resource binds.
    mount_autoplay_done: bool,
}

impl<O: AudioOutput> PlaybackFacade<O> {
    pub fn new(output: O, queue: Queue, volume: f32) -> Self {
        Self {
            engine: PlaybackEngine::new(output, volume),
            queue,
            overlay: MetadataOverlay::new(),
            queue_visible: false,
            expanded: false,
            mount_autoplay_done: false,
        }
    }

    pub fn engine(&self) -> &PlaybackEngine<O> {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut PlaybackEngine<O> {
        &mut self.engine
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    // ── lifecycle ─────────────────────────────────────────────────────────────

    /// Called once the audio resource is up.  Loads the current track and, if
    /// it is live, makes the single autoplay attempt for this binding.
    pub fn on_output_bound(&mut self) -> Dispatch {
        if self.mount_autoplay_done {
            return None;
        }
        self.mount_autoplay_done = true;

        let track = self.queue.current()?.clone();
        self.engine.load_track(&track, false);
        if track.is_live() {
            info!("facade: autoplay on bind for live track {}", track.id);
            self.engine.play(PlayReason::Autoplay)
        } else {
            None
        }
    }

    /// Replace a dead resource with a fresh one and re-arm the bind autoplay.
    pub fn rebind_output(&mut self, output: O) -> Dispatch {
        self.engine.rebind(output);
        self.mount_autoplay_done = false;
        self.on_output_bound()
    }

    // ── intents ───────────────────────────────────────────────────────────────

    pub fn toggle_play_pause(&mut self) -> Dispatch {
        let track = self.queue.current()?.clone();
        if self.engine.is_playing() || self.engine.has_play_in_flight() {
            self.engine.pause(true);
            return None;
        }
        // Live always comes back on a fresh connection; an errored source is
        // reloaded by the engine as well.
        self.engine.load_track(&track, false);
        self.engine.play(PlayReason::User)
    }

    pub fn play_next(&mut self) -> Dispatch {
        self.queue.next()?;
        self.start_current(ChangeOrigin::User)
    }

    pub fn play_prev(&mut self) -> Dispatch {
        self.queue.prev()?;
        self.start_current(ChangeOrigin::User)
    }

    pub fn play_track_at(&mut self, index: usize) -> Dispatch {
        self.queue.jump_to(index)?;
        self.start_current(ChangeOrigin::User)
    }

    /// Live arrivals are autoplay attempts even when the user asked for
    /// them, so after a user pause this only tunes in and waits for play.
    pub fn jump_to_live(&mut self) -> Dispatch {
        self.queue.jump_to_live()?;
        self.start_current(ChangeOrigin::User)
    }

    pub fn seek(&mut self, percent: f64) -> bool {
        self.engine.seek(percent)
    }

    pub fn set_volume(&mut self, volume: f32) -> f32 {
        self.engine.set_volume(volume)
    }

    pub fn toggle_queue_visible(&mut self) -> bool {
        self.queue_visible = !self.queue_visible;
        self.queue_visible
    }

    pub fn set_expanded(&mut self, expanded: bool) {
        self.expanded = expanded;
    }

    pub fn enqueue(&mut self, track: Track) -> Result<(), QueueError> {
        let before = self.current_id();
        self.queue.enqueue(track)?;
        self.resync_after_edit(before);
        Ok(())
    }

    pub fn enqueue_next(&mut self, track: Track) -> Result<(), QueueError> {
        let before = self.current_id();
        self.queue.enqueue_next(track)?;
        self.resync_after_edit(before);
        Ok(())
    }

    pub fn remove_at(&mut self, index: usize) -> Option<Track> {
        let before = self.current_id();
        let removed = self.queue.remove(index)?;
        self.resync_after_edit(before);
        Some(removed)
    }

    pub fn replace_on_demand(&mut self, tracks: Vec<Track>) -> Result<(), QueueError> {
        let before = self.current_id();
        self.queue.replace_on_demand(tracks)?;
        self.resync_after_edit(before);
        Ok(())
    }

    /// Route a surface command to the matching intent.
    pub fn apply_command(&mut self, cmd: Command) -> Result<Dispatch, QueueError> {
        let dispatch = match cmd {
            Command::TogglePlayPause => self.toggle_play_pause(),
            Command::PlayNext => self.play_next(),
            Command::PlayPrev => self.play_prev(),
            Command::PlayTrackAt { index } => self.play_track_at(index),
            Command::Seek { percent } => {
                self.seek(percent);
                None
            }
            Command::JumpToLive => self.jump_to_live(),
            Command::SetVolume { value } => {
                self.set_volume(value);
                None
            }
            Command::ToggleQueueVisible => {
                self.toggle_queue_visible();
                None
            }
            Command::SetExpanded { expanded } => {
                self.set_expanded(expanded);
                None
            }
            Command::Enqueue { track } => {
                self.enqueue(track)?;
                None
            }
            Command::EnqueueNext { track } => {
                self.enqueue_next(track)?;
                None
            }
            Command::RemoveAt { index } => {
                self.remove_at(index);
                None
            }
            Command::ReplaceOnDemand { tracks } => {
                self.replace_on_demand(tracks)?;
                None
            }
            Command::GetState => None,
        };
        Ok(dispatch)
    }

    // ── inputs from the outside world ─────────────────────────────────────────

    pub fn on_play_settled(&mut self, ticket: PlayTicket, result: Result<(), OutputError>) -> bool {
        self.engine.on_play_settled(ticket, result)
    }

    /// A resource event for the load numbered `load_seq`.  Events from a load
    /// that has since been replaced change nothing.
    pub fn on_output_event(&mut self, load_seq: u64, event: OutputEvent) -> Dispatch {
        match self.engine.handle_event(load_seq, event) {
            EngineSignal::TrackEnded => {
                self.queue.advance_after_end()?;
                self.start_current(ChangeOrigin::Automatic)
            }
            EngineSignal::Nothing | EngineSignal::LiveDisconnected | EngineSignal::Failed => None,
        }
    }

    pub fn on_now_playing(&mut self, snapshot: LiveMetadataSnapshot) {
        self.overlay.apply(snapshot);
    }

    // ── read model ────────────────────────────────────────────────────────────

    pub fn view(&self) -> PlayerView {
        let current_track = self.queue.current().map(|t| self.overlay.view(t));
        let is_live = current_track.as_ref().is_some_and(Track::is_live);
        let current_show = current_track.as_ref().and_then(|t| t.show_name.clone());

        let (current_time, duration) = match &current_track {
            Some(t) if !t.is_live() => {
                let on_loaded = self.engine.loaded_track_id() == Some(t.id.as_str());
                if on_loaded {
                    (
                        Some(self.engine.current_time()),
                        self.engine.duration().or(t.duration_secs),
                    )
                } else {
                    (Some(0.0), t.duration_secs)
                }
            }
            _ => (None, None),
        };

        PlayerView {
            rev: 0,
            current_show,
            is_live,
            is_playing: self.engine.is_playing(),
            current_time,
            duration,
            volume: self.engine.volume(),
            queue: self
                .queue
                .tracks()
                .iter()
                .map(|t| self.overlay.view(t))
                .collect(),
            current_index: self.queue.current_index(),
            queue_visible: self.queue_visible,
            expanded: self.expanded,
            last_user_intent: self.engine.last_user_intent(),
            playback_blocked: self.engine.is_blocked(),
            live_metadata: self.overlay.snapshot().cloned(),
            current_track,
        }
    }

    // ── helpers ───────────────────────────────────────────────────────────────

    fn current_id(&self) -> Option<String> {
        self.queue.current().map(|t| t.id.clone())
    }

    fn start_current(&mut self, origin: ChangeOrigin) -> Dispatch {
        let track = self.queue.current()?.clone();
        self.engine.load_track(&track, false);

        let reason = if track.is_live() {
            PlayReason::Autoplay
        } else if origin == ChangeOrigin::User {
            PlayReason::User
        } else if self.engine.last_user_intent() == UserIntent::Playing {
            PlayReason::Autoplay
        } else {
            debug!("facade: {} loaded, staying paused", track.id);
            return None;
        };
        self.engine.play(reason)
    }

    /// After an edit moved the cursor to a different track, load it paused.
    fn resync_after_edit(&mut self, before: Option<String>) {
        let after = self.current_id();
        if after == before {
            return;
        }
        self.engine.pause(false);
        if let Some(track) = self.queue.current().cloned() {
            self.engine.load_track(&track, false);
        }
    }
}
