/// PlayerCore: single-owner event loop for the playback facade.
///
/// Every input (surface commands, mpv events, settled play attempts, live
/// metadata, heartbeats) arrives as a `PlayerEvent` on one channel.  The core
/// owns the facade and the mpv driver exclusively; nothing else touches them.
///
/// Play attempts are awaited on spawned tasks which report back with
/// `PlaySettled`, so the loop never blocks on mpv.  After each event the view
/// is republished and `BroadcastMessage::StateUpdated` goes out when it
/// changed.
///
/// The heartbeat only checks that mpv is alive.  A dead process counts as a
/// resource error (paused, blocked) and a fresh one is bound in its place.
use std::sync::Arc;
use std::time::Duration;

use sticky_player::config::Config;
use sticky_player::engine::{OutputError, OutputEvent, PendingPlay, PlayTicket};
use sticky_player::facade::{Dispatch, PlaybackFacade};
use sticky_player::nowplaying::LiveMetadataSnapshot;
use sticky_player::playlist::load_queue;
use sticky_player::poller::{NowPlayingPoller, PollerHandle};
use sticky_player::protocol::{Command, PlayerView};
use sticky_player::state::StateManager;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::mpv::{FileCounter, MpvDriver, MpvEvent, MpvHandle, MpvOutput};
use crate::BroadcastMessage;

const HEARTBEAT: Duration = Duration::from_secs(10);

/// All inputs into the PlayerCore loop.
#[derive(Debug)]
pub enum PlayerEvent {
    /// A command from a TCP client or the HTTP API.
    Command(Command),
    /// An mpv event the engine cares about, tagged with its load.
    Output { load_seq: u64, event: OutputEvent },
    PlaySettled {
        ticket: PlayTicket,
        result: Result<(), OutputError>,
    },
    NowPlaying(LiveMetadataSnapshot),
    HeartbeatTick,
    Shutdown,
}

impl From<LiveMetadataSnapshot> for PlayerEvent {
    fn from(snapshot: LiveMetadataSnapshot) -> Self {
        PlayerEvent::NowPlaying(snapshot)
    }
}

pub struct PlayerCore {
    config: Config,
    facade: PlaybackFacade<MpvOutput>,
    state_manager: Arc<StateManager>,
    mpv_driver: MpvDriver,
    mpv_connected: bool,
    poller: Option<PollerHandle>,
    event_tx: mpsc::Sender<PlayerEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
    last_published: Option<PlayerView>,
}

impl PlayerCore {
    pub async fn new(
        config: Config,
        broadcast_tx: broadcast::Sender<BroadcastMessage>,
        event_tx: mpsc::Sender<PlayerEvent>,
    ) -> anyhow::Result<Self> {
        let queue = load_queue(&config)?;
        info!(
            "PlayerCore: queue of {} tracks (live: {})",
            queue.len(),
            queue.has_live()
        );

        let state_manager = Arc::new(StateManager::new(config.daemon.state_file.clone()));
        let volume = state_manager
            .persisted_volume()
            .await
            .unwrap_or(config.audio.default_volume);

        // Bound to nothing until mpv is up; commands before then fail softly.
        let facade = PlaybackFacade::new(MpvOutput::new(MpvHandle::detached()), queue, volume);

        Ok(Self {
            config,
            facade,
            state_manager,
            mpv_driver: MpvDriver::new(volume),
            mpv_connected: false,
            poller: None,
            event_tx,
            broadcast_tx,
            last_published: None,
        })
    }

    pub fn state_manager(&self) -> Arc<StateManager> {
        Arc::clone(&self.state_manager)
    }

    /// Run until `Shutdown` or until every sender is gone.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<PlayerEvent>) -> anyhow::Result<()> {
        info!("PlayerCore: starting event loop");

        let heartbeat_tx = self.event_tx.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(HEARTBEAT).await;
                if heartbeat_tx.send(PlayerEvent::HeartbeatTick).await.is_err() {
                    break;
                }
            }
        });

        self.start_poller();
        self.connect_output().await;
        self.publish().await;

        while let Some(evt) = event_rx.recv().await {
            match evt {
                PlayerEvent::Shutdown => {
                    info!("PlayerCore: shutdown requested");
                    break;
                }
                PlayerEvent::Command(cmd) => {
                    info!("PlayerCore: command {:?}", cmd);
                    self.handle_command(cmd);
                }
                PlayerEvent::Output { load_seq, event } => {
                    let dispatch = self.facade.on_output_event(load_seq, event);
                    self.dispatch(dispatch);
                }
                PlayerEvent::PlaySettled { ticket, result } => {
                    if !self.facade.on_play_settled(ticket, result) {
                        debug!("PlayerCore: stale play outcome dropped");
                    }
                }
                PlayerEvent::NowPlaying(snapshot) => self.facade.on_now_playing(snapshot),
                PlayerEvent::HeartbeatTick => self.heartbeat().await,
            }
            self.publish().await;
        }

        self.cleanup().await;
        Ok(())
    }

    fn handle_command(&mut self, cmd: Command) {
        match self.facade.apply_command(cmd) {
            Ok(dispatch) => self.dispatch(dispatch),
            Err(e) => {
                warn!("PlayerCore: command rejected: {}", e);
                let _ = self.broadcast_tx.send(BroadcastMessage::Error(e.to_string()));
            }
        }
    }

    /// Await a play attempt off-loop and feed the outcome back in.
    fn dispatch(&self, dispatch: Dispatch) {
        let Some(PendingPlay { ticket, future }) = dispatch else {
            return;
        };
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let result = future.await;
            let _ = tx.send(PlayerEvent::PlaySettled { ticket, result }).await;
        });
    }

    fn start_poller(&mut self) {
        let station = &self.config.station;
        if station.now_playing_url.trim().is_empty() {
            info!("PlayerCore: no now-playing endpoint configured");
            return;
        }
        match NowPlayingPoller::new(station.now_playing_url.trim(), station.poll_interval()) {
            Ok(poller) => self.poller = Some(poller.spawn(self.event_tx.clone())),
            Err(e) => error!("PlayerCore: cannot build now-playing client: {}", e),
        }
    }

    /// Spawn mpv and bind it.  The first bind is the player's mount; a later
    /// one replaces a dead process.
    async fn connect_output(&mut self) {
        let (mpv_tx, mut mpv_rx) = mpsc::channel::<MpvEvent>(64);
        let core_tx = self.event_tx.clone();
        // the fresh process has loaded nothing yet
        let mut files = FileCounter::starting_at(self.facade.engine().load_seq());
        tokio::spawn(async move {
            while let Some(evt) = mpv_rx.recv().await {
                let load_seq = files.observe(&evt);
                let Some(event) = evt.to_output_event() else {
                    continue;
                };
                if core_tx
                    .send(PlayerEvent::Output { load_seq, event })
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });

        self.mpv_driver.last_volume = self.facade.engine().volume();
        let handle = match self.mpv_driver.spawn_and_connect(mpv_tx).await {
            Ok(h) => h,
            Err(e) => {
                warn!("PlayerCore: failed to start mpv: {}", e);
                self.mpv_connected = false;
                return;
            }
        };
        handle.observe_properties().await;

        self.mpv_connected = true;
        let dispatch = self.facade.rebind_output(MpvOutput::new(handle));
        self.dispatch(dispatch);
    }

    async fn heartbeat(&mut self) {
        if self.mpv_connected && self.mpv_driver.process_alive() {
            return;
        }
        if self.mpv_connected {
            warn!("PlayerCore: heartbeat: mpv process died");
            self.mpv_connected = false;
            let load_seq = self.facade.engine().load_seq();
            let dispatch = self
                .facade
                .on_output_event(load_seq, OutputEvent::Error("mpv process exited".into()));
            self.dispatch(dispatch);
        }
        self.connect_output().await;
    }

    async fn publish(&mut self) {
        let view = self.facade.view();
        if let Some(last) = &self.last_published {
            if same_to_the_second(last, &view) {
                return;
            }
        }
        self.last_published = Some(view.clone());
        match self.state_manager.publish(view).await {
            Ok(rev) => debug!("PlayerCore: published rev {}", rev),
            Err(e) => warn!("PlayerCore: failed to persist state: {}", e),
        }
        let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
    }

    async fn cleanup(&mut self) {
        if let Some(poller) = self.poller.take() {
            poller.shutdown().await;
        }
        self.mpv_driver.kill().await;
        info!("PlayerCore: stopped");
    }
}

/// Playback position only matters to surfaces at one-second resolution.
fn same_to_the_second(a: &PlayerView, b: &PlayerView) -> bool {
    let floor = |v: &PlayerView| PlayerView {
        rev: 0,
        current_time: v.current_time.map(f64::floor),
        ..v.clone()
    };
    floor(a) == floor(b)
}
