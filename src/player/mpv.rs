//! mpv backend: a [`MediaSink`] and [`StreamEngine`] driven over mpv's JSON IPC socket.
//!
//! mpv is started idle with an IPC server. One task writes commands, another reads events;
//! the driver pulls [`MpvEvent`]s and turns them into controller input with [`translate`].

use serde_json::{Value, json};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::controls::Key;
use super::media::{
    MediaEvent, MediaSink, StreamEngine, StreamError, StreamErrorKind, StreamEvent,
    StreamSession, TrackMode,
};
use crate::error::{Error, Result};
use crate::types::SubtitleTrack;

const KEY_MESSAGE: &str = "animehub-key";
const POINTER_MESSAGE: &str = "animehub-pointer";
const BOUND_KEYS: [&str; 7] = ["SPACE", "LEFT", "RIGHT", "f", "F", "m", "M"];
const OBSERVED: [&str; 10] = [
    "time-pos",
    "duration",
    "pause",
    "eof-reached",
    "demuxer-cache-time",
    "volume",
    "mute",
    "fullscreen",
    "sid",
    "track-list",
];
const CONNECT_ATTEMPTS: u32 = 50;

/// Raw events read from the IPC socket.
#[derive(Debug, Clone, PartialEq)]
pub enum MpvEvent {
    FileLoaded,
    EndFile {
        reason: String,
        error: Option<String>,
    },
    Property {
        name: String,
        data: Value,
    },
    ClientMessage(Vec<String>),
    Shutdown,
}

impl MpvEvent {
    pub fn parse(message: &Value) -> Option<Self> {
        match message.get("event")?.as_str()? {
            "file-loaded" => Some(MpvEvent::FileLoaded),
            "end-file" => Some(MpvEvent::EndFile {
                reason: message["reason"].as_str().unwrap_or_default().to_string(),
                error: message["file_error"].as_str().map(str::to_string),
            }),
            "property-change" => Some(MpvEvent::Property {
                name: message["name"].as_str()?.to_string(),
                data: message.get("data").cloned().unwrap_or(Value::Null),
            }),
            "client-message" => Some(MpvEvent::ClientMessage(
                message["args"]
                    .as_array()?
                    .iter()
                    .filter_map(|arg| arg.as_str().map(str::to_string))
                    .collect(),
            )),
            "shutdown" => Some(MpvEvent::Shutdown),
            _ => None,
        }
    }
}

/// Controller input decoded from an [`MpvEvent`].
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    Media(MediaEvent),
    Stream(StreamEvent),
    Key(Key),
    Pointer,
    Quit,
}

/// Cloneable command channel into a running mpv.
#[derive(Debug, Clone)]
pub struct MpvHandle {
    commands: mpsc::UnboundedSender<Value>,
    position: Arc<AtomicU64>,
    files: Arc<FileCounter>,
}

/// Counts files handed to mpv and the last one it reported loaded.
#[derive(Debug, Default)]
struct FileCounter {
    requested: AtomicU64,
    loaded: AtomicU64,
}

impl MpvHandle {
    fn new(commands: mpsc::UnboundedSender<Value>) -> Self {
        Self {
            commands,
            position: Arc::new(AtomicU64::new(0f64.to_bits())),
            files: Arc::default(),
        }
    }

    pub fn command(&self, args: Vec<Value>) {
        if self.commands.send(Value::Array(args)).is_err() {
            debug!("mpv command dropped; IPC writer is gone");
        }
    }

    pub fn set_property(&self, name: &str, value: Value) {
        self.command(vec![json!("set_property"), json!(name), value]);
    }

    /// Last `time-pos` reported by mpv.
    pub fn position(&self) -> f64 {
        f64::from_bits(self.position.load(Ordering::Relaxed))
    }

    /// Request headers for the next load, typically the provider's Referer.
    pub fn set_headers(&self, headers: &HashMap<String, String>) {
        let mut fields = Vec::new();
        for (key, value) in headers {
            if key.eq_ignore_ascii_case("referer") {
                self.set_property("referrer", json!(value));
            } else if key.eq_ignore_ascii_case("user-agent") {
                self.set_property("user-agent", json!(value));
            }
            fields.push(format!("{key}: {value}"));
        }
        self.set_property("http-header-fields", json!(fields.join(",")));
    }

    fn load(&self, url: &str) {
        self.files.requested.fetch_add(1, Ordering::AcqRel);
        self.command(vec![json!("loadfile"), json!(url), json!("replace")]);
    }

    fn stop(&self) {
        self.files.requested.fetch_add(1, Ordering::AcqRel);
        self.command(vec![json!("stop")]);
    }

    fn current_file(&self) -> u64 {
        self.files.requested.load(Ordering::Acquire)
    }

    fn mark_loaded(&self) {
        self.files.loaded.store(self.current_file(), Ordering::Release);
    }

    /// False between a `loadfile` and its `file-loaded`.
    fn is_loaded(&self) -> bool {
        self.files.loaded.load(Ordering::Acquire) == self.current_file()
    }
}

/// A spawned mpv process and its IPC tasks. Dropping it kills mpv and removes the socket.
pub struct MpvProcess {
    child: Child,
    socket_path: PathBuf,
    handle: MpvHandle,
    events: mpsc::UnboundedReceiver<MpvEvent>,
    tasks: Vec<JoinHandle<()>>,
}

impl MpvProcess {
    /// Starts `command` (split shell-style) idle with an IPC server and binds the player keys.
    pub async fn spawn(command: &str, title: &str) -> Result<Self> {
        let parts = shlex::split(command)
            .filter(|parts| !parts.is_empty())
            .ok_or_else(|| Error::player(format!("invalid player command: {command}")))?;
        let socket_path =
            std::env::temp_dir().join(format!("animehub-mpv-{}.sock", std::process::id()));
        let _ = std::fs::remove_file(&socket_path);

        let mut cmd = Command::new(&parts[0]);
        cmd.args(&parts[1..])
            .arg("--idle=yes")
            .arg("--force-window=yes")
            .arg("--keep-open=yes")
            .arg("--quiet")
            .arg("--terminal=no")
            .arg(format!("--force-media-title={title}"))
            .arg(format!("--input-ipc-server={}", socket_path.display()))
            .kill_on_drop(true);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::player(format!(
                    "Player '{}' not found. Install mpv or set player.command in the config.",
                    parts[0]
                )));
            }
            Err(err) => return Err(err.into()),
        };
        info!(player = %parts[0], socket = %socket_path.display(), "Spawned mpv");

        let stream = connect(&socket_path).await?;
        let (read_half, mut write_half) = stream.into_split();
        let (command_tx, mut command_rx) = mpsc::unbounded_channel::<Value>();
        let (event_tx, events) = mpsc::unbounded_channel();
        let handle = MpvHandle::new(command_tx);

        let writer = tokio::spawn(async move {
            let mut request_id: u64 = 0;
            while let Some(args) = command_rx.recv().await {
                request_id += 1;
                let line = format!("{}\n", json!({ "command": args, "request_id": request_id }));
                if let Err(err) = write_half.write_all(line.as_bytes()).await {
                    warn!(error = %err, "mpv IPC write failed");
                    break;
                }
            }
        });

        let reader_position = handle.position.clone();
        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(read_half).lines();
            loop {
                let line = match lines.next_line().await {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(err) => {
                        warn!(error = %err, "mpv IPC read failed");
                        break;
                    }
                };
                let Ok(message) = serde_json::from_str::<Value>(&line) else {
                    debug!(%line, "Unparseable mpv message");
                    continue;
                };
                if let Some(error) = message.get("error").and_then(Value::as_str) {
                    if error != "success" {
                        debug!(error, request_id = %message["request_id"], "mpv command failed");
                    }
                    continue;
                }
                let Some(event) = MpvEvent::parse(&message) else {
                    continue;
                };
                if let MpvEvent::Property { name, data } = &event {
                    if name == "time-pos" {
                        if let Some(pos) = data.as_f64() {
                            reader_position.store(pos.to_bits(), Ordering::Relaxed);
                        }
                    }
                }
                if event_tx.send(event).is_err() {
                    break;
                }
            }
        });

        for (id, name) in OBSERVED.iter().enumerate() {
            handle.command(vec![json!("observe_property"), json!(id + 1), json!(name)]);
        }
        for key in BOUND_KEYS {
            handle.command(vec![
                json!("keybind"),
                json!(key),
                json!(format!("script-message {KEY_MESSAGE} {key}")),
            ]);
        }
        handle.command(vec![
            json!("keybind"),
            json!("MOUSE_MOVE"),
            json!(format!("script-message {POINTER_MESSAGE}")),
        ]);

        Ok(Self {
            child,
            socket_path,
            handle,
            events,
            tasks: vec![writer, reader],
        })
    }

    pub fn handle(&self) -> MpvHandle {
        self.handle.clone()
    }

    pub fn sink(&self) -> MpvSink {
        MpvSink::new(self.handle())
    }

    pub fn engine(&self) -> MpvEngine {
        MpvEngine {
            handle: self.handle(),
        }
    }

    /// Next event, or `None` once mpv has gone away.
    pub async fn next_event(&mut self) -> Option<MpvEvent> {
        self.events.recv().await
    }

    pub fn quit(&self) {
        self.handle.command(vec![json!("quit")]);
    }
}

impl Drop for MpvProcess {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
        let _ = self.child.start_kill();
        let _ = std::fs::remove_file(&self.socket_path);
    }
}

async fn connect(socket_path: &Path) -> Result<UnixStream> {
    let mut last_error = None;
    for _ in 0..CONNECT_ATTEMPTS {
        match UnixStream::connect(socket_path).await {
            Ok(stream) => return Ok(stream),
            Err(err) => {
                last_error = Some(err);
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
    Err(Error::player(format!(
        "could not connect to mpv IPC socket {}: {}",
        socket_path.display(),
        last_error.map(|e| e.to_string()).unwrap_or_default()
    )))
}

#[derive(Debug, Clone)]
struct ExternalTrack {
    url: String,
    lang: String,
    sid: Option<i64>,
    /// File the track was added to; mpv forgets external tracks on every load.
    file: Option<u64>,
}

fn sub_add(handle: &MpvHandle, track: &mut ExternalTrack) {
    handle.command(vec![
        json!("sub-add"),
        json!(track.url),
        json!("auto"),
        json!(track.lang),
        json!(track.lang),
    ]);
    track.sid = None;
    track.file = Some(handle.current_file());
}

/// The media element, as far as mpv can play one.
#[derive(Debug)]
pub struct MpvSink {
    handle: MpvHandle,
    tracks: Vec<ExternalTrack>,
    showing_sid: Option<i64>,
    volume: f64,
    muted: bool,
}

impl MpvSink {
    pub fn new(handle: MpvHandle) -> Self {
        Self {
            handle,
            tracks: Vec::new(),
            showing_sid: None,
            volume: 1.0,
            muted: false,
        }
    }

    /// Maps mpv subtitle ids onto our track indices. Returns indices that just got an id.
    pub fn apply_track_list(&mut self, list: &Value) -> Vec<usize> {
        let Some(entries) = list.as_array() else {
            return Vec::new();
        };
        let mut loaded = Vec::new();
        for entry in entries {
            if entry["type"].as_str() != Some("sub") {
                continue;
            }
            let (Some(id), Some(file)) = (entry["id"].as_i64(), entry["external-filename"].as_str())
            else {
                continue;
            };
            for (index, track) in self.tracks.iter_mut().enumerate() {
                if track.sid.is_none() && track.url == file {
                    track.sid = Some(id);
                    loaded.push(index);
                }
            }
        }
        loaded
    }

    /// mpv rejects `sub-add` until the file is loaded, so tracks added while loading are
    /// queued and sent here. Tracks from an earlier file are sent again.
    pub fn file_loaded(&mut self) {
        self.handle.mark_loaded();
        let file = self.handle.current_file();
        let mut resent = false;
        for track in self.tracks.iter_mut().filter(|t| t.file != Some(file)) {
            sub_add(&self.handle, track);
            resent = true;
        }
        if resent {
            debug!(tracks = self.tracks.len(), "Subtitle tracks added after load");
            self.showing_sid = None;
        }
    }

    fn index_of_sid(&self, sid: i64) -> Option<usize> {
        self.tracks.iter().position(|t| t.sid == Some(sid))
    }

    /// mpv id of a track added to the file currently loaded.
    fn live_sid(&self, index: usize) -> Option<i64> {
        if !self.handle.is_loaded() {
            return None;
        }
        let file = self.handle.current_file();
        self.tracks
            .get(index)
            .filter(|t| t.file == Some(file))
            .and_then(|t| t.sid)
    }
}

impl MediaSink for MpvSink {
    fn set_source(&mut self, url: &str) -> Result<()> {
        self.handle.set_property("start", json!("none"));
        self.handle.load(url);
        Ok(())
    }

    fn play(&mut self) {
        self.handle.set_property("pause", json!(false));
    }

    fn pause(&mut self) {
        self.handle.set_property("pause", json!(true));
    }

    fn set_current_time(&mut self, secs: f64) {
        self.handle
            .command(vec![json!("seek"), json!(secs), json!("absolute")]);
    }

    fn set_volume(&mut self, volume: f64) {
        self.handle.set_property("volume", json!(volume * 100.0));
    }

    fn set_muted(&mut self, muted: bool) {
        self.handle.set_property("mute", json!(muted));
    }

    fn add_text_track(&mut self, track: &SubtitleTrack) -> usize {
        let mut external = ExternalTrack {
            url: track.url.clone(),
            lang: track.lang.clone(),
            sid: None,
            file: None,
        };
        if self.handle.is_loaded() {
            sub_add(&self.handle, &mut external);
        }
        self.tracks.push(external);
        self.tracks.len() - 1
    }

    fn clear_text_tracks(&mut self) {
        for index in 0..self.tracks.len() {
            if let Some(sid) = self.live_sid(index) {
                self.handle.command(vec![json!("sub-remove"), json!(sid)]);
            }
        }
        self.tracks.clear();
        self.showing_sid = None;
    }

    fn set_text_track_mode(&mut self, index: usize, mode: TrackMode) {
        // not loaded yet; the activation retries come back for it
        let Some(sid) = self.live_sid(index) else {
            return;
        };
        match mode {
            TrackMode::Showing if self.showing_sid != Some(sid) => {
                self.handle.set_property("sid", json!(sid));
            }
            TrackMode::Disabled if self.showing_sid == Some(sid) => {
                self.handle.set_property("sid", json!("no"));
            }
            _ => {}
        }
    }

    fn request_fullscreen(&mut self) -> Result<()> {
        self.handle.set_property("fullscreen", json!(true));
        Ok(())
    }

    fn exit_fullscreen(&mut self) -> Result<()> {
        self.handle.set_property("fullscreen", json!(false));
        Ok(())
    }

    fn lock_orientation(&mut self, _orientation: &str) -> Result<()> {
        Err(Error::player("mpv windows have no orientation lock"))
    }

    fn unlock_orientation(&mut self) {}

    fn set_controls_visible(&mut self, visible: bool) {
        let mode = if visible { "always" } else { "auto" };
        self.handle
            .command(vec![json!("script-message"), json!("osc-visibility"), json!(mode)]);
    }

    fn set_title(&mut self, title: &str) {
        self.handle.set_property("force-media-title", json!(title));
    }
}

/// mpv demuxes HLS itself, so every session is a `loadfile`.
#[derive(Debug, Clone)]
pub struct MpvEngine {
    handle: MpvHandle,
}

impl StreamEngine for MpvEngine {
    type Session = MpvSession;

    fn is_supported(&self) -> bool {
        true
    }

    fn create(&mut self, url: &str) -> Result<MpvSession> {
        self.handle.set_property("start", json!("none"));
        self.handle.load(url);
        Ok(MpvSession {
            handle: self.handle.clone(),
            url: url.to_string(),
            destroyed: false,
        })
    }
}

#[derive(Debug)]
pub struct MpvSession {
    handle: MpvHandle,
    url: String,
    destroyed: bool,
}

impl StreamSession for MpvSession {
    /// Reloads the stream where it stopped.
    fn start_load(&mut self) {
        let position = self.handle.position();
        self.handle.set_property("start", json!(format!("{position}")));
        self.handle.load(&self.url);
    }

    fn recover_media_error(&mut self) {
        self.handle.command(vec![json!("video-reload")]);
        self.handle.command(vec![json!("audio-reload")]);
    }

    fn destroy(&mut self) {
        if !self.destroyed {
            self.destroyed = true;
            self.handle.stop();
        }
    }
}

impl Drop for MpvSession {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Decodes one mpv event into controller input, updating the sink's track bookkeeping.
pub fn translate(event: MpvEvent, sink: &mut MpvSink) -> Vec<Signal> {
    match event {
        MpvEvent::FileLoaded => {
            sink.file_loaded();
            vec![
                Signal::Stream(StreamEvent::ManifestParsed),
                Signal::Media(MediaEvent::LoadedData),
            ]
        }
        MpvEvent::EndFile { reason, error } => match reason.as_str() {
            "error" => {
                let details = error.unwrap_or_else(|| "unknown error".to_string());
                vec![Signal::Stream(StreamEvent::Error(StreamError {
                    fatal: true,
                    kind: classify_file_error(&details),
                    details,
                }))]
            }
            "eof" => vec![Signal::Media(MediaEvent::Ended)],
            _ => Vec::new(),
        },
        MpvEvent::Property { name, data } => translate_property(&name, &data, sink),
        MpvEvent::ClientMessage(args) => match args.as_slice() {
            [kind, key] if kind == KEY_MESSAGE => vec![Signal::Key(Key::from_name(key))],
            [kind] if kind == POINTER_MESSAGE => vec![Signal::Pointer],
            _ => Vec::new(),
        },
        MpvEvent::Shutdown => vec![Signal::Quit],
    }
}

fn translate_property(name: &str, data: &Value, sink: &mut MpvSink) -> Vec<Signal> {
    let media = |event| vec![Signal::Media(event)];
    match name {
        "time-pos" => data
            .as_f64()
            .map(|current_time| media(MediaEvent::TimeUpdate { current_time }))
            .unwrap_or_default(),
        "duration" => data
            .as_f64()
            .map(|duration| media(MediaEvent::LoadedMetadata { duration }))
            .unwrap_or_default(),
        "pause" => match data.as_bool() {
            Some(true) => media(MediaEvent::Pause),
            Some(false) => media(MediaEvent::Playing),
            None => Vec::new(),
        },
        "eof-reached" if data.as_bool() == Some(true) => media(MediaEvent::Ended),
        "demuxer-cache-time" => data
            .as_f64()
            .map(|buffered_end| media(MediaEvent::Progress { buffered_end }))
            .unwrap_or_default(),
        "volume" | "mute" => {
            if let Some(volume) = data.as_f64() {
                sink.volume = volume / 100.0;
            } else if let Some(muted) = data.as_bool() {
                sink.muted = muted;
            }
            media(MediaEvent::VolumeChange {
                volume: sink.volume,
                muted: sink.muted,
            })
        }
        "fullscreen" => data
            .as_bool()
            .map(|fs| media(MediaEvent::FullscreenChanged(fs)))
            .unwrap_or_default(),
        "sid" => {
            let previous = sink.showing_sid.and_then(|sid| sink.index_of_sid(sid));
            sink.showing_sid = data.as_i64();
            match sink.showing_sid.and_then(|sid| sink.index_of_sid(sid)) {
                Some(index) => media(MediaEvent::TrackModeChanged {
                    index,
                    mode: TrackMode::Showing,
                }),
                None => previous
                    .map(|index| {
                        media(MediaEvent::TrackModeChanged {
                            index,
                            mode: TrackMode::Disabled,
                        })
                    })
                    .unwrap_or_default(),
            }
        }
        "track-list" => sink
            .apply_track_list(data)
            .into_iter()
            .map(|index| Signal::Media(MediaEvent::TrackLoaded { index }))
            .collect(),
        _ => Vec::new(),
    }
}

/// Buckets mpv's `file_error` text the way a streaming library buckets its fatal errors.
pub fn classify_file_error(error: &str) -> StreamErrorKind {
    let error = error.to_lowercase();
    if ["loading failed", "network", "http", "timed out", "tcp"]
        .iter()
        .any(|needle| error.contains(needle))
    {
        StreamErrorKind::Network
    } else if ["unrecognized file format", "no audio or video", "decod"]
        .iter()
        .any(|needle| error.contains(needle))
    {
        StreamErrorKind::Media
    } else {
        StreamErrorKind::Other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink() -> (MpvSink, mpsc::UnboundedReceiver<Value>) {
        let (commands, rx) = mpsc::unbounded_channel();
        (MpvSink::new(MpvHandle::new(commands)), rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Value>) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(value) = rx.try_recv() {
            out.push(value);
        }
        out
    }

    #[test]
    fn parses_ipc_events() {
        let change = json!({"event": "property-change", "id": 1, "name": "time-pos", "data": 12.5});
        assert_eq!(
            MpvEvent::parse(&change),
            Some(MpvEvent::Property {
                name: "time-pos".into(),
                data: json!(12.5)
            })
        );
        let message = json!({"event": "client-message", "args": ["animehub-key", "SPACE"]});
        assert_eq!(
            MpvEvent::parse(&message),
            Some(MpvEvent::ClientMessage(vec!["animehub-key".into(), "SPACE".into()]))
        );
        assert_eq!(MpvEvent::parse(&json!({"request_id": 3, "error": "success"})), None);
    }

    #[test]
    fn end_file_errors_are_classified() {
        assert_eq!(classify_file_error("loading failed"), StreamErrorKind::Network);
        assert_eq!(
            classify_file_error("unrecognized file format"),
            StreamErrorKind::Media
        );
        assert_eq!(classify_file_error("no such thing"), StreamErrorKind::Other);

        let (mut sink, _rx) = sink();
        let signals = translate(
            MpvEvent::EndFile {
                reason: "error".into(),
                error: Some("loading failed".into()),
            },
            &mut sink,
        );
        assert!(matches!(
            &signals[..],
            [Signal::Stream(StreamEvent::Error(StreamError { fatal: true, kind: StreamErrorKind::Network, .. }))]
        ));
    }

    #[test]
    fn key_messages_become_keys() {
        let (mut sink, _rx) = sink();
        let signals = translate(
            MpvEvent::ClientMessage(vec![KEY_MESSAGE.into(), "LEFT".into()]),
            &mut sink,
        );
        assert_eq!(signals, [Signal::Key(Key::ArrowLeft)]);
    }

    #[test]
    fn text_tracks_map_to_mpv_ids() {
        let (mut sink, mut rx) = sink();
        let track = SubtitleTrack {
            url: "https://subs.example/en.vtt".into(),
            lang: "English".into(),
            default: true,
        };
        assert_eq!(sink.add_text_track(&track), 0);
        sink.set_text_track_mode(0, TrackMode::Showing);
        // only sub-add so far: the track has no mpv id yet
        assert_eq!(drain(&mut rx).len(), 1);

        let list = json!([
            {"id": 1, "type": "video"},
            {"id": 3, "type": "sub", "external-filename": "https://subs.example/en.vtt"}
        ]);
        let signals = translate(
            MpvEvent::Property {
                name: "track-list".into(),
                data: list,
            },
            &mut sink,
        );
        assert_eq!(signals, [Signal::Media(MediaEvent::TrackLoaded { index: 0 })]);

        sink.set_text_track_mode(0, TrackMode::Showing);
        let sent = drain(&mut rx);
        assert_eq!(sent, [json!(["set_property", "sid", 3])]);

        let signals = translate(
            MpvEvent::Property {
                name: "sid".into(),
                data: json!(3),
            },
            &mut sink,
        );
        assert_eq!(
            signals,
            [Signal::Media(MediaEvent::TrackModeChanged {
                index: 0,
                mode: TrackMode::Showing
            })]
        );
    }

    #[test]
    fn text_tracks_wait_for_file_loaded() {
        let (mut sink, mut rx) = sink();
        let track = SubtitleTrack {
            url: "https://subs.example/en.vtt".into(),
            lang: "English".into(),
            default: true,
        };
        let sub_add = json!(["sub-add", "https://subs.example/en.vtt", "auto", "English", "English"]);
        let mut engine = MpvEngine {
            handle: sink.handle.clone(),
        };
        let mut session = engine.create("https://cdn.example/ep.m3u8").unwrap();
        sink.clear_text_tracks();
        assert_eq!(sink.add_text_track(&track), 0);
        let sent = drain(&mut rx);
        assert!(!sent.contains(&sub_add));
        assert!(sent.contains(&json!(["loadfile", "https://cdn.example/ep.m3u8", "replace"])));

        let signals = translate(MpvEvent::FileLoaded, &mut sink);
        assert_eq!(signals.len(), 2);
        assert!(matches!(signals[0], Signal::Stream(StreamEvent::ManifestParsed)));
        assert_eq!(drain(&mut rx), [sub_add.clone()]);

        let list = json!([{"id": 2, "type": "sub", "external-filename": "https://subs.example/en.vtt"}]);
        sink.apply_track_list(&list);

        // a reload drops the track on mpv's side
        session.start_load();
        sink.set_text_track_mode(0, TrackMode::Showing);
        sink.clear_text_tracks();
        assert!(
            !drain(&mut rx)
                .iter()
                .any(|cmd| cmd[0] == "sub-remove" || cmd[1] == "sid")
        );
        sink.add_text_track(&track);
        translate(MpvEvent::FileLoaded, &mut sink);
        assert_eq!(drain(&mut rx), [sub_add]);
    }

    #[test]
    fn volume_is_reported_as_fraction() {
        let (mut sink, _rx) = sink();
        let signals = translate(
            MpvEvent::Property {
                name: "volume".into(),
                data: json!(45.0),
            },
            &mut sink,
        );
        assert_eq!(
            signals,
            [Signal::Media(MediaEvent::VolumeChange {
                volume: 0.45,
                muted: false
            })]
        );
    }
}
