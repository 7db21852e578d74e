/// mpv IPC driver and the `AudioOutput` built on it.
///
/// ```text
///   MpvDriver::spawn_and_connect()
///         │
///         ├── writer_task   ← MpvRequest via mpsc, serialised → socket
///         └── reader_task   ← JSON lines from socket
///                                ├── reply (has request_id) → oneshot
///                                └── event / property-change → event_tx
/// ```
///
/// `MpvHandle::submit` queues a command without awaiting, so the engine's
/// synchronous calls reach mpv in exactly the order they were made.  Only
/// `play` waits for its reply, and it does so inside the returned future.
///
/// Platform notes:
/// - Unix:    Unix domain sockets
/// - Windows: Named pipes  \\.\pipe\<name>
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use sticky_player::engine::{AudioOutput, OutputError, OutputEvent, PlayFuture};
use sticky_player::platform;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

#[cfg(unix)]
use tokio::net::UnixStream;

#[cfg(windows)]
use tokio::net::windows::named_pipe::ClientOptions;

static NEXT_REQ_ID: AtomicU64 = AtomicU64::new(1);

const IPC_TIMEOUT: Duration = Duration::from_secs(5);

pub const OBS_TIME_POS: u64 = 1;
pub const OBS_DURATION: u64 = 2;

type Reply = oneshot::Sender<anyhow::Result<Value>>;
type PendingMap = Arc<Mutex<HashMap<u64, Reply>>>;

struct MpvRequest {
    req_id: u64,
    payload: String, // serialised JSON line, '\n' included
    reply: Reply,
}

/// An mpv event / property-change that arrived unsolicited (no request_id).
#[derive(Debug, Clone)]
pub struct MpvEvent {
    pub raw: Value,
}

impl MpvEvent {
    pub fn as_property_change(&self) -> Option<(u64, &Value)> {
        if self.raw.get("event")?.as_str()? == "property-change" {
            let id = self.raw.get("id")?.as_u64()?;
            let data = self.raw.get("data").unwrap_or(&Value::Null);
            Some((id, data))
        } else {
            None
        }
    }

    pub fn event_name(&self) -> Option<&str> {
        self.raw.get("event")?.as_str()
    }

    /// Translate into what the engine understands.  `None` for everything
    /// the player does not care about (start-file, seek, a replaced file's
    /// `end-file` with reason `stop`, ...).
    pub fn to_output_event(&self) -> Option<OutputEvent> {
        if let Some((id, data)) = self.as_property_change() {
            let value = data.as_f64()?;
            return match id {
                OBS_TIME_POS => Some(OutputEvent::TimeUpdate(value)),
                OBS_DURATION => Some(OutputEvent::LoadedMetadata {
                    duration_secs: value,
                }),
                _ => None,
            };
        }

        if self.event_name()? != "end-file" {
            return None;
        }
        match self.raw.get("reason").and_then(Value::as_str) {
            Some("eof") => Some(OutputEvent::Ended),
            Some("error") => {
                let detail = self
                    .raw
                    .get("file_error")
                    .and_then(Value::as_str)
                    .unwrap_or("playback error");
                Some(OutputEvent::Error(detail.to_string()))
            }
            _ => None,
        }
    }
}

/// Tells which `loadfile` an event belongs to.
///
/// mpv runs commands in order and announces every `loadfile` with one
/// `start-file`, so counting those from the number of loads issued before
/// this connection gives the engine's `load_seq` for each event.
#[derive(Debug, Clone, Copy)]
pub struct FileCounter {
    seq: u64,
}

impl FileCounter {
    pub fn starting_at(seq: u64) -> Self {
        Self { seq }
    }

    /// The load `evt` belongs to.
    pub fn observe(&mut self, evt: &MpvEvent) -> u64 {
        if evt.event_name() == Some("start-file") {
            self.seq += 1;
        }
        self.seq
    }
}

// ── handle ────────────────────────────────────────────────────────────────────

/// Cloneable handle to the mpv writer task.
#[derive(Clone)]
pub struct MpvHandle {
    tx: mpsc::Sender<MpvRequest>,
}

impl MpvHandle {
    /// A handle with no mpv behind it.  Every command fails.
    pub fn detached() -> Self {
        let (tx, _) = mpsc::channel(1);
        Self { tx }
    }

    fn request(command: Value) -> anyhow::Result<(MpvRequest, oneshot::Receiver<anyhow::Result<Value>>)> {
        let req_id = NEXT_REQ_ID.fetch_add(1, Ordering::Relaxed);
        let msg = json!({ "command": command, "request_id": req_id });
        let mut payload = serde_json::to_string(&msg)?;
        payload.push('\n');
        let (reply, reply_rx) = oneshot::channel();
        Ok((
            MpvRequest {
                req_id,
                payload,
                reply,
            },
            reply_rx,
        ))
    }

    /// Queue `command` right now and hand back the reply receiver.
    pub fn submit(&self, command: Value) -> oneshot::Receiver<anyhow::Result<Value>> {
        let (req, reply_rx) = match Self::request(command) {
            Ok(pair) => pair,
            Err(e) => {
                let (tx, rx) = oneshot::channel();
                let _ = tx.send(Err(e));
                return rx;
            }
        };
        if let Err(e) = self.tx.try_send(req) {
            let req = match e {
                mpsc::error::TrySendError::Full(r) => {
                    warn!("mpv: command queue full, dropping req={}", r.req_id);
                    r
                }
                mpsc::error::TrySendError::Closed(r) => r,
            };
            let _ = req.reply.send(Err(anyhow::anyhow!("mpv writer task gone")));
        }
        reply_rx
    }

    /// Fire and forget.  Failures are logged when the reply comes back.
    pub fn fire(&self, command: Value) {
        let label = command.to_string();
        let reply = self.submit(command);
        tokio::spawn(async move {
            match tokio::time::timeout(IPC_TIMEOUT, reply).await {
                Ok(Ok(Ok(_))) => {}
                Ok(Ok(Err(e))) => debug!("mpv: {} failed: {}", label, e),
                Ok(Err(_)) => debug!("mpv: {} reply dropped", label),
                Err(_) => warn!("mpv: {} timed out", label),
            }
        });
    }

    pub async fn send(&self, command: Value) -> anyhow::Result<Value> {
        let reply = self.submit(command);
        tokio::time::timeout(IPC_TIMEOUT, reply)
            .await
            .map_err(|_| anyhow::anyhow!("mpv IPC timeout"))?
            .map_err(|_| anyhow::anyhow!("mpv reply channel dropped"))?
    }

    /// Register the observations the engine needs.  Call after every fresh
    /// connection.
    pub async fn observe_properties(&self) {
        for (id, name) in [(OBS_TIME_POS, "time-pos"), (OBS_DURATION, "duration")] {
            match self.send(json!(["observe_property", id, name])).await {
                Ok(_) => debug!("mpv: observe_property id={} name={}", id, name),
                Err(e) => warn!("mpv: observe_property {} failed: {}", name, e),
            }
        }
    }
}

// ── AudioOutput ───────────────────────────────────────────────────────────────

/// The player's audio resource: one mpv process behind its IPC socket.
pub struct MpvOutput {
    handle: MpvHandle,
}

impl MpvOutput {
    pub fn new(handle: MpvHandle) -> Self {
        Self { handle }
    }
}

fn volume_percent(volume: f32) -> f64 {
    (f64::from(volume) * 100.0).clamp(0.0, 100.0)
}

impl AudioOutput for MpvOutput {
    fn load(&mut self, url: &str) {
        // mpv keeps `pause` across loadfile, so the new file comes up paused
        self.handle.fire(json!(["set_property", "pause", true]));
        self.handle.fire(json!(["loadfile", url, "replace"]));
    }

    fn play(&mut self) -> PlayFuture {
        let reply = self.handle.submit(json!(["set_property", "pause", false]));
        async move {
            match tokio::time::timeout(IPC_TIMEOUT, reply).await {
                Ok(Ok(Ok(_))) => Ok(()),
                Ok(Ok(Err(e))) => Err(OutputError::Failed(e.to_string())),
                Ok(Err(_)) => Err(OutputError::Unavailable),
                Err(_) => Err(OutputError::Failed("mpv did not answer".into())),
            }
        }
        .boxed()
    }

    fn pause(&mut self) {
        self.handle.fire(json!(["set_property", "pause", true]));
    }

    fn seek(&mut self, position_secs: f64) {
        self.handle
            .fire(json!(["set_property", "time-pos", position_secs]));
    }

    fn set_volume(&mut self, volume: f32) {
        self.handle
            .fire(json!(["set_property", "volume", volume_percent(volume)]));
    }
}

// ── driver ────────────────────────────────────────────────────────────────────

/// Owns the mpv child process.
pub struct MpvDriver {
    socket_name: String,
    process: Option<tokio::process::Child>,
    pub last_volume: f32,
}

impl MpvDriver {
    pub fn new(volume: f32) -> Self {
        Self {
            socket_name: platform::mpv_socket_name(),
            process: None,
            last_volume: volume,
        }
    }

    pub fn process_alive(&mut self) -> bool {
        if let Some(ref mut child) = self.process {
            child.try_wait().ok().flatten().is_none()
        } else {
            false
        }
    }

    pub async fn kill(&mut self) {
        if let Some(mut p) = self.process.take() {
            let _ = p.kill().await;
        }
    }

    fn spawn_process(&mut self) -> anyhow::Result<()> {
        info!("mpv: spawning new process");
        let mpv_binary =
            platform::find_mpv_binary().ok_or_else(|| anyhow::anyhow!("mpv binary not found"))?;

        let vol_arg = format!("--volume={}", volume_percent(self.last_volume).round() as i64);
        let child = tokio::process::Command::new(mpv_binary)
            .arg("--no-video")
            .arg("--idle=yes")
            .arg("--pause")
            .arg(platform::mpv_socket_arg())
            .arg("--quiet")
            .arg(vol_arg)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        self.process = Some(child);
        Ok(())
    }

    #[cfg(unix)]
    pub async fn spawn_and_connect(
        &mut self,
        event_tx: mpsc::Sender<MpvEvent>,
    ) -> anyhow::Result<MpvHandle> {
        self.kill().await;

        let socket_path = std::path::PathBuf::from(&self.socket_name);
        let _ = tokio::fs::remove_file(&socket_path).await;

        self.spawn_process()?;

        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if socket_path.exists() {
                break;
            }
        }
        if !socket_path.exists() {
            anyhow::bail!("mpv IPC socket did not appear");
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        let stream = UnixStream::connect(&socket_path).await?;
        info!("mpv: connected to IPC socket");
        let (read_half, write_half) = stream.into_split();
        Ok(start_io_tasks(read_half, write_half, event_tx))
    }

    #[cfg(windows)]
    pub async fn spawn_and_connect(
        &mut self,
        event_tx: mpsc::Sender<MpvEvent>,
    ) -> anyhow::Result<MpvHandle> {
        self.kill().await;
        self.spawn_process()?;

        let pipe_path = format!(r"\\.\pipe\{}", self.socket_name);
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if let Ok(client) = ClientOptions::new().open(&pipe_path) {
                info!("mpv: connected to named pipe");
                let (read_half, write_half) = tokio::io::split(client);
                return Ok(start_io_tasks(read_half, write_half, event_tx));
            }
        }
        anyhow::bail!("mpv named pipe did not appear")
    }
}

fn start_io_tasks<R, W>(read_half: R, write_half: W, event_tx: mpsc::Sender<MpvEvent>) -> MpvHandle
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
    W: tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
    let (cmd_tx, cmd_rx) = mpsc::channel::<MpvRequest>(64);

    tokio::spawn(writer_task(write_half, cmd_rx, pending.clone()));
    tokio::spawn(reader_task(BufReader::new(read_half), pending, event_tx));

    MpvHandle { tx: cmd_tx }
}

// ── reader task ───────────────────────────────────────────────────────────────

async fn fail_all(pending: &PendingMap, why: &str) {
    let mut map = pending.lock().await;
    for (_, tx) in map.drain() {
        let _ = tx.send(Err(anyhow::anyhow!("{}", why)));
    }
}

async fn reader_task<R>(mut reader: BufReader<R>, pending: PendingMap, event_tx: mpsc::Sender<MpvEvent>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("mpv reader: connection closed");
                fail_all(&pending, "mpv IPC connection closed").await;
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let val: Value = match serde_json::from_str(trimmed) {
                    Ok(v) => v,
                    Err(e) => {
                        debug!("mpv reader: invalid json '{}': {}", trimmed, e);
                        continue;
                    }
                };

                if let Some(req_id) = val.get("request_id").and_then(Value::as_u64) {
                    let Some(tx) = pending.lock().await.remove(&req_id) else {
                        debug!("mpv reader: reply for unknown req={}", req_id);
                        continue;
                    };
                    let result = match val["error"].as_str() {
                        Some("success") => Ok(val),
                        other => Err(anyhow::anyhow!(
                            "mpv error: {}",
                            other.unwrap_or("unknown error")
                        )),
                    };
                    let _ = tx.send(result);
                } else if event_tx.send(MpvEvent { raw: val }).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!("mpv reader: read error: {}", e);
                fail_all(&pending, "mpv IPC read error").await;
                break;
            }
        }
    }
}

// ── writer task ───────────────────────────────────────────────────────────────

async fn writer_task<W>(mut writer: W, mut rx: mpsc::Receiver<MpvRequest>, pending: PendingMap)
where
    W: tokio::io::AsyncWrite + Unpin,
{
    while let Some(req) = rx.recv().await {
        // register first so the reader can always match the reply
        pending.lock().await.insert(req.req_id, req.reply);
        debug!("mpv writer: req={} {}", req.req_id, req.payload.trim());
        if let Err(e) = writer.write_all(req.payload.as_bytes()).await {
            warn!("mpv writer: write error: {}", e);
            if let Some(tx) = pending.lock().await.remove(&req.req_id) {
                let _ = tx.send(Err(anyhow::anyhow!("mpv write error: {}", e)));
            }
            break;
        }
    }
    debug!("mpv writer: task exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(raw: Value) -> MpvEvent {
        MpvEvent { raw }
    }

    #[test]
    fn test_property_changes_map_to_timeline_events() {
        let e = event(json!({"event": "property-change", "id": OBS_TIME_POS, "data": 12.5}));
        assert_eq!(e.to_output_event(), Some(OutputEvent::TimeUpdate(12.5)));

        let e = event(json!({"event": "property-change", "id": OBS_DURATION, "data": 300.0}));
        assert_eq!(
            e.to_output_event(),
            Some(OutputEvent::LoadedMetadata { duration_secs: 300.0 })
        );

        // unavailable properties come through as null
        let e = event(json!({"event": "property-change", "id": OBS_DURATION}));
        assert_eq!(e.to_output_event(), None);
    }

    #[test]
    fn test_end_file_reasons() {
        let e = event(json!({"event": "end-file", "reason": "eof"}));
        assert_eq!(e.to_output_event(), Some(OutputEvent::Ended));

        let e = event(json!({"event": "end-file", "reason": "error", "file_error": "loading failed"}));
        assert_eq!(
            e.to_output_event(),
            Some(OutputEvent::Error("loading failed".into()))
        );

        let e = event(json!({"event": "end-file", "reason": "stop"}));
        assert_eq!(e.to_output_event(), None);
        assert_eq!(event(json!({"event": "start-file"})).to_output_event(), None);
    }

    #[test]
    fn test_file_counter_stamps_events_with_their_load() {
        let mut files = FileCounter::starting_at(4);
        let eof_before_switch = event(json!({"event": "end-file", "reason": "eof"}));
        assert_eq!(files.observe(&eof_before_switch), 4);

        assert_eq!(files.observe(&event(json!({"event": "start-file"}))), 5);
        let progress = event(json!({"event": "property-change", "id": OBS_TIME_POS, "data": 1.0}));
        assert_eq!(files.observe(&progress), 5);
        let replaced = event(json!({"event": "end-file", "reason": "stop"}));
        assert_eq!(files.observe(&replaced), 5);
        assert_eq!(files.observe(&event(json!({"event": "start-file"}))), 6);
    }

    fn payload(req: &MpvRequest) -> Value {
        serde_json::from_str::<Value>(req.payload.trim()).unwrap()["command"].clone()
    }

    #[tokio::test]
    async fn test_output_keeps_call_order_and_play_awaits_reply() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut output = MpvOutput::new(MpvHandle { tx });

        output.load("https://cdn.example/a.mp3");
        let play = output.play();

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        let third = rx.recv().await.unwrap();
        assert_eq!(payload(&first), json!(["set_property", "pause", true]));
        assert_eq!(
            payload(&second),
            json!(["loadfile", "https://cdn.example/a.mp3", "replace"])
        );
        assert_eq!(payload(&third), json!(["set_property", "pause", false]));

        let _ = third.reply.send(Ok(json!({"error": "success"})));
        assert_eq!(play.await, Ok(()));
    }

    #[tokio::test]
    async fn test_play_reports_mpv_errors() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut output = MpvOutput::new(MpvHandle { tx });
        let play = output.play();

        let req = rx.recv().await.unwrap();
        let _ = req.reply.send(Err(anyhow::anyhow!("mpv error: property unavailable")));
        assert!(matches!(play.await, Err(OutputError::Failed(_))));
    }

    #[tokio::test]
    async fn test_play_without_writer_is_unavailable() {
        let (tx, rx) = mpsc::channel(16);
        drop(rx);
        let mut output = MpvOutput::new(MpvHandle { tx });
        assert!(output.play().await.is_err());
    }
}
