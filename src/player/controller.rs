//! The playback state machine.
//!
//! One controller owns one media sink and at most one streaming session. Time never comes
//! from a clock here: callers pass `now`, and deferred work (position restore, controls
//! auto-hide, subtitle retries) is stored as deadlines fired by [`PlaybackController::poll_timers`].

use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::controls::{ControlsTimer, Key, KeyAction, KeyOutcome, key_action, key_outcome};
use super::media::{
    MediaEvent, MediaSink, StreamEngine, StreamErrorKind, StreamEvent, StreamSession,
};
use super::state::{PlaybackState, PlayerStatus, clamp_volume};
use super::subtitles::{Backoff, SubtitleActivator, normalize_language};
use crate::config::PlayerSettings;
use crate::error::Error;
use crate::resolver::ResolvedSource;
use crate::types::{SubtitleTrack, TimeRange};

const ORIENTATIONS: [&str; 2] = ["landscape", "landscape-primary"];

#[derive(Debug, Clone)]
pub struct ControllerOptions {
    pub seek_step: f64,
    pub controls_hide_delay: Duration,
    pub settle_delay: Duration,
    pub initial_volume: f64,
    pub subtitle_language: Option<String>,
    pub subtitle_backoff: Backoff,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            seek_step: 10.0,
            controls_hide_delay: Duration::from_secs(3),
            settle_delay: Duration::from_millis(100),
            initial_volume: 1.0,
            subtitle_language: None,
            subtitle_backoff: Backoff::default(),
        }
    }
}

impl TryFrom<&PlayerSettings> for ControllerOptions {
    type Error = Error;

    fn try_from(settings: &PlayerSettings) -> Result<Self, Error> {
        settings.validate()?;
        Ok(Self {
            seek_step: settings.seek_step_secs,
            controls_hide_delay: settings.controls_hide_delay()?,
            settle_delay: settings.settle_delay(),
            initial_volume: clamp_volume(settings.volume),
            subtitle_language: settings.preferred_subtitle().map(str::to_string),
            subtitle_backoff: Backoff::default(),
        })
    }
}

/// Which skippable range the playhead is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    Intro,
    Outro,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct PendingRestore {
    at: Instant,
    time: f64,
    resume: bool,
}

pub struct PlaybackController<S: MediaSink, E: StreamEngine> {
    sink: S,
    engine: E,
    session: Option<E::Session>,
    status: PlayerStatus,
    state: PlaybackState,
    options: ControllerOptions,
    source: Option<ResolvedSource>,
    subtitles: SubtitleActivator,
    controls: ControlsTimer,
    captured: Option<(f64, bool)>,
    restore: Option<PendingRestore>,
    /// Whether a parsed manifest should start playback.
    autoplay: bool,
    /// Metadata or data has arrived for the current attach.
    media_ready: bool,
    /// Last non-zero volume, restored when unmuting from a zeroed slider.
    restore_volume: f64,
    orientation_locked: bool,
    error: Option<String>,
}

impl<S: MediaSink, E: StreamEngine> PlaybackController<S, E> {
    pub fn new(mut sink: S, engine: E, options: ControllerOptions) -> Self {
        let mut subtitles = SubtitleActivator::new(options.subtitle_backoff);
        let now = Instant::now();
        subtitles.select(&mut sink, options.subtitle_language.as_deref(), now);
        let state = PlaybackState {
            volume: clamp_volume(options.initial_volume),
            ..PlaybackState::default()
        };
        Self {
            controls: ControlsTimer::new(options.controls_hide_delay),
            restore_volume: if state.volume > 0.0 { state.volume } else { 1.0 },
            sink,
            engine,
            session: None,
            status: PlayerStatus::Idle,
            state,
            options,
            source: None,
            subtitles,
            captured: None,
            restore: None,
            autoplay: true,
            media_ready: false,
            orientation_locked: false,
            error: None,
        }
    }

    pub fn status(&self) -> PlayerStatus {
        self.status
    }

    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    pub fn source(&self) -> Option<&ResolvedSource> {
        self.source.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn subtitle_tracks(&self) -> &[SubtitleTrack] {
        self.subtitles.tracks()
    }

    pub fn active_subtitle(&self) -> Option<&SubtitleTrack> {
        self.subtitles.showing()
    }

    /// A source is being resolved; the previous one keeps playing until `attach`.
    pub fn loading(&mut self) {
        self.error = None;
        self.transition(PlayerStatus::Loading);
    }

    /// Resolution failed: surface it instead of falling back silently.
    pub fn fail_load(&mut self, err: &Error) {
        warn!(error = %err, "Source resolution failed");
        self.fail(err.user_message());
    }

    /// Attaches `resolved`, tearing down the previous session first. The subtitle choice
    /// starts over from the configured language, else the source's default track.
    pub fn attach(&mut self, resolved: ResolvedSource, now: Instant) {
        let preferred = self
            .options
            .subtitle_language
            .as_deref()
            .filter(|wanted| has_language(resolved.subtitles(), wanted))
            .or(resolved.default_subtitle())
            .map(str::to_string);
        self.subtitles.prefer(preferred);
        self.load(resolved, now);
    }

    fn load(&mut self, resolved: ResolvedSource, now: Instant) {
        self.teardown_session();
        self.restore = None;
        self.autoplay = true;
        self.media_ready = false;
        self.error = None;
        self.transition(PlayerStatus::Loading);
        self.state.current_time = 0.0;
        self.state.duration = 0.0;
        self.state.buffered = 0.0;

        let url = resolved.stream_url();
        if resolved.is_adaptive() && self.engine.is_supported() {
            match self.engine.create(&url) {
                Ok(session) => self.session = Some(session),
                Err(err) => {
                    warn!(error = %err, "Streaming session could not be created");
                    self.fail(err.user_message());
                    return;
                }
            }
        } else if let Err(err) = self.sink.set_source(&url) {
            warn!(error = %err, "Media source rejected");
            self.fail(err.user_message());
            return;
        }
        self.sink.set_volume(self.state.volume);
        self.sink.set_muted(self.state.muted);
        self.subtitles.attach(&mut self.sink, resolved.subtitles(), now);
        info!(
            episode_id = resolved.episode_id(),
            version = resolved.translation().as_str(),
            quality = resolved.quality(),
            adaptive = resolved.is_adaptive(),
            "Stream attached"
        );
        self.source = Some(resolved);
    }

    /// Captures position and play state ahead of a refetch; the next `switch_variant`
    /// restores this snapshot rather than the state at switch time.
    pub fn begin_variant_switch(&mut self) {
        self.captured = Some((self.state.current_time, self.state.playing));
    }

    /// Reattaches with a new variant, keeping the subtitle choice. Position is restored once
    /// the settle delay has passed and the new media has loaded.
    pub fn switch_variant(&mut self, resolved: ResolvedSource, now: Instant) {
        let (time, resume) = self
            .captured
            .take()
            .unwrap_or((self.state.current_time, self.state.playing));
        debug!(time, resume, "Switching variant");
        self.load(resolved, now);
        if self.status == PlayerStatus::Error {
            return;
        }
        self.autoplay = resume;
        self.restore = Some(PendingRestore {
            at: now + self.options.settle_delay,
            time,
            resume,
        });
    }

    /// Fires every deadline that has passed.
    pub fn poll_timers(&mut self, now: Instant) {
        self.poll_restore(now);
        if self.controls.poll(now) {
            self.state.controls_visible = false;
            self.sink.set_controls_visible(false);
        }
        self.subtitles.poll(&mut self.sink, now);
    }

    /// Earliest pending deadline, for drivers that sleep between polls.
    pub fn next_deadline(&self) -> Option<Instant> {
        [
            self.restore.filter(|_| self.media_ready).map(|r| r.at),
            self.controls.deadline(),
            self.subtitles.deadline(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    pub fn handle_media_event(&mut self, event: MediaEvent, now: Instant) {
        let reassert = event.resets_tracks();
        match event {
            MediaEvent::LoadedMetadata { duration } => {
                self.set_duration(duration);
                if self.status == PlayerStatus::Loading {
                    self.transition(PlayerStatus::Ready);
                }
                self.media_loaded(now);
            }
            MediaEvent::DurationChange { duration } => self.set_duration(duration),
            MediaEvent::LoadedData | MediaEvent::CanPlay => self.media_loaded(now),
            MediaEvent::Play | MediaEvent::Playing => self.mark_playing(now),
            MediaEvent::Pause => self.mark_paused(),
            MediaEvent::Ended => {
                self.state.playing = false;
                self.transition(PlayerStatus::Ended);
                self.show_controls();
            }
            MediaEvent::TimeUpdate { current_time } => {
                self.state.current_time = self.state.clamp_time(current_time);
            }
            MediaEvent::Progress { buffered_end } => {
                if self.state.has_duration() && buffered_end.is_finite() {
                    self.state.buffered = (buffered_end / self.state.duration).clamp(0.0, 1.0);
                }
            }
            MediaEvent::VolumeChange { volume, muted } => {
                self.state.volume = clamp_volume(volume);
                self.state.muted = muted;
                if self.state.volume > 0.0 {
                    self.restore_volume = self.state.volume;
                }
            }
            MediaEvent::PlayRejected => {
                debug!("play() rejected; staying paused");
                self.mark_paused();
            }
            MediaEvent::FullscreenChanged(fullscreen) => {
                self.state.fullscreen = fullscreen;
                if !fullscreen && self.orientation_locked {
                    self.sink.unlock_orientation();
                    self.orientation_locked = false;
                }
            }
            MediaEvent::TrackModeChanged { index, mode } => {
                self.subtitles.mode_changed(&mut self.sink, index, mode);
            }
            MediaEvent::TrackLoaded { .. } => {}
            MediaEvent::Error(message) => {
                warn!(%message, "Media element error");
                self.teardown_session();
                self.fail(message);
            }
        }
        if reassert {
            self.subtitles.apply(&mut self.sink);
        }
    }

    pub fn handle_stream_event(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::ManifestParsed => {
                if self.status == PlayerStatus::Loading {
                    self.transition(PlayerStatus::Ready);
                }
                // a pending restore decides the play state itself
                if self.restore.is_none() && self.autoplay {
                    self.sink.play();
                }
            }
            StreamEvent::Error(err) if !err.fatal => {
                debug!(kind = %err.kind, details = %err.details, "Non-fatal streaming error");
            }
            StreamEvent::Error(err) => {
                warn!(kind = %err.kind, details = %err.details, "Fatal streaming error");
                match (err.kind, self.session.as_mut()) {
                    (StreamErrorKind::Network, Some(session)) => session.start_load(),
                    (StreamErrorKind::Media, Some(session)) => session.recover_media_error(),
                    _ => {
                        self.teardown_session();
                        self.fail(format!("Playback failed: {}", err.details));
                    }
                }
            }
        }
    }

    pub fn play(&mut self) {
        self.sink.play();
        self.state.playing = true;
    }

    pub fn pause(&mut self) {
        self.sink.pause();
        self.mark_paused();
    }

    pub fn toggle_play(&mut self) {
        if self.state.playing {
            self.pause();
        } else {
            self.play();
        }
    }

    pub fn seek(&mut self, time: f64) {
        let time = self.state.clamp_time(time);
        self.sink.set_current_time(time);
        self.state.current_time = time;
    }

    pub fn seek_by(&mut self, delta: f64) {
        self.seek(self.state.current_time + delta);
    }

    /// Slider input. Zero mutes; any other value unmutes.
    pub fn set_volume(&mut self, volume: f64) {
        let volume = clamp_volume(volume);
        self.sink.set_volume(volume);
        self.state.volume = volume;
        if volume > 0.0 {
            self.restore_volume = volume;
        }
        self.set_muted_flag(volume == 0.0);
    }

    pub fn set_muted(&mut self, muted: bool) {
        if !muted && self.state.volume == 0.0 {
            self.state.volume = self.restore_volume;
            self.sink.set_volume(self.state.volume);
        }
        self.set_muted_flag(muted);
    }

    pub fn toggle_mute(&mut self) {
        self.set_muted(!self.state.muted);
    }

    pub fn toggle_fullscreen(&mut self) {
        if self.state.fullscreen {
            self.exit_fullscreen();
        } else {
            self.enter_fullscreen();
        }
    }

    /// Orientation lock is attempted but never required.
    pub fn enter_fullscreen(&mut self) {
        if let Err(err) = self.sink.request_fullscreen() {
            warn!(error = %err, "Fullscreen request refused");
            return;
        }
        self.state.fullscreen = true;
        for orientation in ORIENTATIONS {
            match self.sink.lock_orientation(orientation) {
                Ok(()) => {
                    self.orientation_locked = true;
                    break;
                }
                Err(err) => debug!(orientation, error = %err, "Orientation lock refused"),
            }
        }
    }

    pub fn exit_fullscreen(&mut self) {
        if let Err(err) = self.sink.exit_fullscreen() {
            debug!(error = %err, "Exit fullscreen failed");
        }
        self.state.fullscreen = false;
        if self.orientation_locked {
            self.sink.unlock_orientation();
            self.orientation_locked = false;
        }
    }

    pub fn select_subtitle(&mut self, language: Option<&str>, now: Instant) {
        self.subtitles.select(&mut self.sink, language, now);
    }

    pub fn pointer_activity(&mut self, now: Instant) {
        self.controls.activity(now, self.state.playing);
        if !self.state.controls_visible {
            self.state.controls_visible = true;
            self.sink.set_controls_visible(true);
        }
    }

    pub fn handle_key(&mut self, key: &Key) -> KeyOutcome {
        let action = key_action(key, self.options.seek_step);
        match action {
            Some(KeyAction::TogglePlay) => self.toggle_play(),
            Some(KeyAction::SeekBy(delta)) => self.seek_by(delta),
            Some(KeyAction::ToggleFullscreen) => self.toggle_fullscreen(),
            Some(KeyAction::ToggleMute) => self.toggle_mute(),
            None => {}
        }
        key_outcome(key, action)
    }

    pub fn active_marker(&self) -> Option<Marker> {
        let source = self.source.as_ref()?;
        let now = self.state.current_time;
        let within = |range: Option<TimeRange>| range.is_some_and(|r| r.contains(now));
        if within(source.intro()) {
            Some(Marker::Intro)
        } else if within(source.outro()) {
            Some(Marker::Outro)
        } else {
            None
        }
    }

    /// Seeks past the intro. Returns false when the source has none.
    pub fn skip_intro(&mut self) -> bool {
        self.skip_range(self.source.as_ref().and_then(ResolvedSource::intro))
    }

    pub fn skip_outro(&mut self) -> bool {
        self.skip_range(self.source.as_ref().and_then(ResolvedSource::outro))
    }

    /// Releases the session, timers and text tracks. Mirrors every `attach`.
    pub fn detach(&mut self) {
        self.teardown_session();
        self.subtitles.detach(&mut self.sink);
        self.restore = None;
        self.captured = None;
        self.controls.hold();
        if self.state.fullscreen {
            self.exit_fullscreen();
        }
        self.source = None;
        self.state.playing = false;
        self.transition(PlayerStatus::Idle);
    }

    fn skip_range(&mut self, range: Option<TimeRange>) -> bool {
        match range {
            Some(range) => {
                self.seek(range.end);
                true
            }
            None => false,
        }
    }

    fn media_loaded(&mut self, now: Instant) {
        if !self.media_ready {
            self.media_ready = true;
            self.poll_restore(now);
        }
    }

    /// Seeking before the new media has loaded would be dropped by the sink.
    fn poll_restore(&mut self, now: Instant) {
        match self.restore {
            Some(restore) if self.media_ready && restore.at <= now => {
                self.restore = None;
                self.finish_restore(restore);
            }
            _ => {}
        }
    }

    fn finish_restore(&mut self, restore: PendingRestore) {
        self.seek(restore.time);
        if restore.resume {
            self.play();
        } else {
            self.sink.pause();
            self.state.playing = false;
        }
        debug!(time = restore.time, resume = restore.resume, "Position restored");
    }

    fn mark_playing(&mut self, now: Instant) {
        self.state.playing = true;
        if self.status == PlayerStatus::Loading {
            self.transition(PlayerStatus::Ready);
        }
        self.transition(PlayerStatus::Playing);
        self.controls.playing(now);
    }

    fn mark_paused(&mut self) {
        self.state.playing = false;
        if matches!(self.status, PlayerStatus::Playing | PlayerStatus::Ready) {
            self.transition(PlayerStatus::Paused);
        }
        self.show_controls();
    }

    fn show_controls(&mut self) {
        self.controls.hold();
        if !self.state.controls_visible {
            self.state.controls_visible = true;
            self.sink.set_controls_visible(true);
        }
    }

    fn set_duration(&mut self, duration: f64) {
        if duration.is_finite() && duration > 0.0 {
            self.state.duration = duration;
            self.state.current_time = self.state.clamp_time(self.state.current_time);
        }
    }

    fn set_muted_flag(&mut self, muted: bool) {
        if self.state.muted != muted {
            self.sink.set_muted(muted);
            self.state.muted = muted;
        }
    }

    fn teardown_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.destroy();
            debug!("Streaming session destroyed");
        }
    }

    fn fail(&mut self, message: String) {
        self.restore = None;
        self.state.playing = false;
        self.error = Some(message);
        if self.status != PlayerStatus::Error {
            debug!(from = %self.status, "Player status: error");
            self.status = PlayerStatus::Error;
        }
    }

    fn transition(&mut self, next: PlayerStatus) {
        if self.status == next {
            return;
        }
        if self.status.can_transition_to(next) {
            debug!(from = %self.status, to = %next, "Player status");
            self.status = next;
        } else {
            debug!(from = %self.status, to = %next, "Ignoring illegal status transition");
        }
    }
}

fn has_language(tracks: &[SubtitleTrack], wanted: &str) -> bool {
    let wanted = normalize_language(wanted);
    tracks.iter().any(|track| normalize_language(&track.lang) == wanted)
}

impl<S: MediaSink, E: StreamEngine> Drop for PlaybackController<S, E> {
    fn drop(&mut self) {
        self.teardown_session();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::player::media::{StreamError, TrackMode};
    use crate::providers::StreamLayout;
    use crate::proxy::ProxyPrefix;
    use crate::resolver::Variant;
    use crate::types::{SourceDescriptor, Translation, VideoSource};
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        SetSource(String),
        Play,
        Pause,
        Seek(f64),
        Volume(f64),
        Muted(bool),
        AddTrack(String),
        ClearTracks,
        TrackMode(usize, TrackMode),
        Fullscreen(bool),
        Lock(String),
        Unlock,
        Controls(bool),
    }

    #[derive(Default)]
    struct FakeSink {
        calls: Vec<Call>,
        tracks: usize,
        refuse_orientation: Vec<&'static str>,
    }

    impl FakeSink {
        fn take(&mut self) -> Vec<Call> {
            std::mem::take(&mut self.calls)
        }
    }

    impl MediaSink for FakeSink {
        fn set_source(&mut self, url: &str) -> Result<()> {
            self.calls.push(Call::SetSource(url.to_string()));
            Ok(())
        }
        fn play(&mut self) {
            self.calls.push(Call::Play);
        }
        fn pause(&mut self) {
            self.calls.push(Call::Pause);
        }
        fn set_current_time(&mut self, secs: f64) {
            self.calls.push(Call::Seek(secs));
        }
        fn set_volume(&mut self, volume: f64) {
            self.calls.push(Call::Volume(volume));
        }
        fn set_muted(&mut self, muted: bool) {
            self.calls.push(Call::Muted(muted));
        }
        fn add_text_track(&mut self, track: &SubtitleTrack) -> usize {
            self.calls.push(Call::AddTrack(track.lang.clone()));
            self.tracks += 1;
            self.tracks - 1
        }
        fn clear_text_tracks(&mut self) {
            self.tracks = 0;
            self.calls.push(Call::ClearTracks);
        }
        fn set_text_track_mode(&mut self, index: usize, mode: TrackMode) {
            self.calls.push(Call::TrackMode(index, mode));
        }
        fn request_fullscreen(&mut self) -> Result<()> {
            self.calls.push(Call::Fullscreen(true));
            Ok(())
        }
        fn exit_fullscreen(&mut self) -> Result<()> {
            self.calls.push(Call::Fullscreen(false));
            Ok(())
        }
        fn lock_orientation(&mut self, orientation: &str) -> Result<()> {
            self.calls.push(Call::Lock(orientation.to_string()));
            if self.refuse_orientation.iter().any(|refused| *refused == orientation) {
                Err(Error::player("orientation lock not supported"))
            } else {
                Ok(())
            }
        }
        fn unlock_orientation(&mut self) {
            self.calls.push(Call::Unlock);
        }
        fn set_controls_visible(&mut self, visible: bool) {
            self.calls.push(Call::Controls(visible));
        }
        fn set_title(&mut self, _title: &str) {}
    }

    #[derive(Debug, Default)]
    struct Ledger {
        live: usize,
        max_live: usize,
        created: Vec<String>,
        start_loads: usize,
        recoveries: usize,
    }

    #[derive(Clone, Default)]
    struct FakeEngine {
        ledger: Rc<RefCell<Ledger>>,
    }

    struct FakeSession {
        ledger: Rc<RefCell<Ledger>>,
        alive: bool,
    }

    impl StreamEngine for FakeEngine {
        type Session = FakeSession;

        fn is_supported(&self) -> bool {
            true
        }

        fn create(&mut self, url: &str) -> Result<FakeSession> {
            let mut ledger = self.ledger.borrow_mut();
            ledger.live += 1;
            ledger.max_live = ledger.max_live.max(ledger.live);
            ledger.created.push(url.to_string());
            Ok(FakeSession {
                ledger: self.ledger.clone(),
                alive: true,
            })
        }
    }

    impl StreamSession for FakeSession {
        fn start_load(&mut self) {
            self.ledger.borrow_mut().start_loads += 1;
        }
        fn recover_media_error(&mut self) {
            self.ledger.borrow_mut().recoveries += 1;
        }
        fn destroy(&mut self) {
            if self.alive {
                self.alive = false;
                self.ledger.borrow_mut().live -= 1;
            }
        }
    }

    fn source(quality: &str, m3u8: bool) -> VideoSource {
        VideoSource {
            url: format!("https://cdn.example/{quality}.m3u8"),
            is_m3u8: m3u8,
            kind: None,
            quality: Some(quality.to_string()),
        }
    }

    fn resolved(translation: Translation, quality: &str) -> ResolvedSource {
        let descriptor = SourceDescriptor {
            sources: vec![source("720p", true), source("1080p", true)],
            subtitles: vec![
                SubtitleTrack {
                    url: "en.vtt".into(),
                    lang: "English".into(),
                    default: false,
                },
                SubtitleTrack {
                    url: "es.vtt".into(),
                    lang: "Spanish".into(),
                    default: true,
                },
            ],
            intro: Some(TimeRange {
                start: 30.0,
                end: 120.0,
            }),
            ..Default::default()
        };
        ResolvedSource::new(
            format!("show-{}", translation.as_str()),
            translation,
            descriptor,
            StreamLayout::QualityVariants,
            &Variant::new(translation).with_quality(quality),
            &[],
            ProxyPrefix::new(""),
        )
        .unwrap()
    }

    fn controller() -> (PlaybackController<FakeSink, FakeEngine>, Rc<RefCell<Ledger>>) {
        let engine = FakeEngine::default();
        let ledger = engine.ledger.clone();
        (
            PlaybackController::new(FakeSink::default(), engine, ControllerOptions::default()),
            ledger,
        )
    }

    /// Attached, metadata loaded, playing at `time`.
    fn playing_at(time: f64, now: Instant) -> (PlaybackController<FakeSink, FakeEngine>, Rc<RefCell<Ledger>>) {
        let (mut player, ledger) = controller();
        player.attach(resolved(Translation::Sub, "1080p"), now);
        player.handle_stream_event(StreamEvent::ManifestParsed);
        player.handle_media_event(MediaEvent::LoadedMetadata { duration: 1440.0 }, now);
        player.handle_media_event(MediaEvent::Playing, now);
        player.handle_media_event(MediaEvent::TimeUpdate { current_time: time }, now);
        player.sink_mut().take();
        (player, ledger)
    }

    #[test]
    fn attach_goes_through_loading_to_playing() {
        let now = Instant::now();
        let (mut player, ledger) = controller();
        assert_eq!(player.status(), PlayerStatus::Idle);
        player.attach(resolved(Translation::Sub, "1080p"), now);
        assert_eq!(player.status(), PlayerStatus::Loading);
        assert_eq!(ledger.borrow().created, ["https://cdn.example/1080p.m3u8"]);

        player.handle_stream_event(StreamEvent::ManifestParsed);
        assert_eq!(player.status(), PlayerStatus::Ready);
        assert!(player.sink().calls.contains(&Call::Play));
        player.handle_media_event(MediaEvent::Playing, now);
        assert_eq!(player.status(), PlayerStatus::Playing);
    }

    #[test]
    fn variant_switch_restores_position_and_play_state() {
        let now = Instant::now();
        let (mut player, _) = playing_at(754.0, now);
        player.switch_variant(resolved(Translation::Dub, "720p"), now);
        player.handle_stream_event(StreamEvent::ManifestParsed);
        player.handle_media_event(MediaEvent::LoadedMetadata { duration: 1440.0 }, now);

        player.poll_timers(now + Duration::from_millis(99));
        assert!(!player.sink().calls.contains(&Call::Seek(754.0)));

        player.poll_timers(now + Duration::from_millis(100));
        let calls = player.sink_mut().take();
        let seek = calls.iter().position(|c| *c == Call::Seek(754.0)).unwrap();
        assert_eq!(calls[seek + 1], Call::Play);
        assert!(player.state().playing);
        assert_eq!(player.source().unwrap().translation(), Translation::Dub);
    }

    #[test]
    fn paused_variant_switch_stays_paused() {
        let now = Instant::now();
        let (mut player, _) = playing_at(300.0, now);
        player.pause();
        player.begin_variant_switch();
        player.handle_media_event(MediaEvent::TimeUpdate { current_time: 999.0 }, now);
        player.switch_variant(resolved(Translation::Sub, "720p"), now);
        player.handle_stream_event(StreamEvent::ManifestParsed);
        player.handle_media_event(MediaEvent::LoadedData, now);
        player.poll_timers(now + Duration::from_secs(1));

        let calls = player.sink_mut().take();
        assert!(calls.contains(&Call::Seek(300.0)));
        assert!(!calls.contains(&Call::Play));
        assert!(!player.state().playing);
    }

    #[test]
    fn rejected_restore_play_is_swallowed() {
        let now = Instant::now();
        let (mut player, _) = playing_at(60.0, now);
        player.switch_variant(resolved(Translation::Sub, "720p"), now);
        let later = now + Duration::from_millis(100);
        player.poll_timers(later);
        player.handle_media_event(MediaEvent::LoadedMetadata { duration: 1440.0 }, later);
        assert!(player.sink_mut().take().contains(&Call::Seek(60.0)));
        player.handle_media_event(MediaEvent::PlayRejected, later);
        assert!(!player.state().playing);
        assert_ne!(player.status(), PlayerStatus::Error);
        assert!(player.error().is_none());
    }

    #[test]
    fn restore_waits_for_new_media_to_load() {
        let now = Instant::now();
        let (mut player, _) = playing_at(754.0, now);
        player.switch_variant(resolved(Translation::Dub, "720p"), now);
        player.poll_timers(now + Duration::from_millis(500));
        assert!(!player.sink().calls.iter().any(|c| matches!(c, Call::Seek(_))));
        assert!(player.next_deadline().is_none_or(|at| at > now + Duration::from_millis(500)));

        player.handle_media_event(MediaEvent::LoadedData, now + Duration::from_millis(600));
        let calls = player.sink_mut().take();
        let seek = calls.iter().position(|c| *c == Call::Seek(754.0)).unwrap();
        assert_eq!(calls[seek + 1], Call::Play);
    }

    #[test]
    fn late_manifest_keeps_paused_switch_paused() {
        let now = Instant::now();
        let (mut player, _) = playing_at(300.0, now);
        player.pause();
        player.begin_variant_switch();
        player.switch_variant(resolved(Translation::Dub, "720p"), now);
        player.handle_media_event(MediaEvent::LoadedMetadata { duration: 1440.0 }, now);
        player.poll_timers(now + Duration::from_millis(100));
        assert!(player.sink().calls.contains(&Call::Seek(300.0)));

        player.handle_stream_event(StreamEvent::ManifestParsed);
        assert!(!player.sink_mut().take().contains(&Call::Play));
        assert!(!player.state().playing);
    }

    #[test]
    fn late_manifest_resumes_playing_switch() {
        let now = Instant::now();
        let (mut player, _) = playing_at(300.0, now);
        player.switch_variant(resolved(Translation::Dub, "720p"), now);
        player.handle_media_event(MediaEvent::LoadedData, now + Duration::from_millis(100));
        player.sink_mut().take();
        player.handle_stream_event(StreamEvent::ManifestParsed);
        assert!(player.sink().calls.contains(&Call::Play));
    }

    #[test]
    fn only_one_session_alive_across_switches() {
        let now = Instant::now();
        let (mut player, ledger) = playing_at(10.0, now);
        for n in 0..25 {
            let quality = if n % 2 == 0 { "720p" } else { "1080p" };
            player.switch_variant(resolved(Translation::Sub, quality), now);
            assert_eq!(ledger.borrow().live, 1);
        }
        assert_eq!(ledger.borrow().max_live, 1);
        assert_eq!(ledger.borrow().created.len(), 26);
        player.detach();
        assert_eq!(ledger.borrow().live, 0);
    }

    #[test]
    fn fatal_errors_recover_by_kind() {
        let now = Instant::now();
        let (mut player, ledger) = playing_at(10.0, now);
        let fatal = |kind| {
            StreamEvent::Error(StreamError {
                fatal: true,
                kind,
                details: "boom".into(),
            })
        };

        player.handle_stream_event(fatal(StreamErrorKind::Network));
        player.handle_stream_event(fatal(StreamErrorKind::Media));
        player.handle_stream_event(StreamEvent::Error(StreamError {
            fatal: false,
            kind: StreamErrorKind::Other,
            details: "stall".into(),
        }));
        assert_eq!(ledger.borrow().start_loads, 1);
        assert_eq!(ledger.borrow().recoveries, 1);
        assert_eq!(player.status(), PlayerStatus::Playing);

        player.handle_stream_event(fatal(StreamErrorKind::Other));
        assert_eq!(player.status(), PlayerStatus::Error);
        assert_eq!(ledger.borrow().live, 0);
        assert!(!player.has_session());
        assert!(player.error().unwrap().contains("boom"));
    }

    #[test]
    fn resolution_failure_enters_error_state() {
        let (mut player, _) = controller();
        player.loading();
        player.fail_load(&Error::Http {
            status: 502,
            url: "https://kenjitsu.example".into(),
        });
        assert_eq!(player.status(), PlayerStatus::Error);
        assert_eq!(player.error(), Some("HTTP error! status: 502"));
    }

    #[test]
    fn options_reject_unbounded_hide_delay() {
        let mut settings = crate::config::Settings::defaults().unwrap().player;
        settings.controls_hide_secs = f64::INFINITY;
        assert!(ControllerOptions::try_from(&settings).is_err());
        settings.controls_hide_secs = 1.5;
        let options = ControllerOptions::try_from(&settings).unwrap();
        assert_eq!(options.controls_hide_delay, Duration::from_millis(1500));
    }

    #[test]
    fn mute_round_trip_restores_exact_volume() {
        let (mut player, _) = controller();
        player.set_volume(0.37);
        player.toggle_mute();
        assert!(player.state().muted);
        assert_eq!(player.state().volume, 0.37);
        player.toggle_mute();
        assert!(!player.state().muted);
        assert_eq!(player.state().volume, 0.37);

        player.set_volume(4.0);
        assert_eq!(player.state().volume, 1.0);
        player.set_volume(-1.0);
        assert_eq!(player.state().volume, 0.0);
        assert!(player.state().muted);
        player.set_muted(false);
        assert_eq!(player.state().volume, 1.0);
    }

    #[test]
    fn default_subtitle_is_shown_and_reasserted() {
        let now = Instant::now();
        let (mut player, _) = controller();
        player.attach(resolved(Translation::Sub, "1080p"), now);
        assert_eq!(player.active_subtitle().unwrap().lang, "Spanish");
        let calls = player.sink_mut().take();
        assert!(calls.contains(&Call::TrackMode(1, TrackMode::Showing)));
        assert!(calls.contains(&Call::TrackMode(0, TrackMode::Disabled)));

        player.handle_media_event(MediaEvent::Playing, now);
        assert!(player.sink_mut().take().contains(&Call::TrackMode(1, TrackMode::Showing)));

        player.poll_timers(now + Duration::from_millis(50));
        assert!(player.sink_mut().take().contains(&Call::TrackMode(1, TrackMode::Showing)));

        player.handle_media_event(
            MediaEvent::TrackModeChanged {
                index: 1,
                mode: TrackMode::Showing,
            },
            now,
        );
        player.poll_timers(now + Duration::from_secs(10));
        let calls = player.sink_mut().take();
        assert!(!calls.iter().any(|c| matches!(c, Call::TrackMode(..))));
    }

    #[test]
    fn new_episode_resets_subtitle_choice() {
        let now = Instant::now();
        let (mut player, _) = controller();
        player.attach(resolved(Translation::Sub, "1080p"), now);
        player.select_subtitle(Some("English"), now);
        player.switch_variant(resolved(Translation::Sub, "720p"), now);
        assert_eq!(player.active_subtitle().unwrap().lang, "English");

        player.attach(resolved(Translation::Sub, "1080p"), now);
        assert_eq!(player.active_subtitle().unwrap().lang, "Spanish");
    }

    #[test]
    fn configured_subtitle_language_applies_per_episode() {
        let now = Instant::now();
        let options = ControllerOptions {
            subtitle_language: Some("english".into()),
            ..ControllerOptions::default()
        };
        let mut player = PlaybackController::new(FakeSink::default(), FakeEngine::default(), options);
        player.attach(resolved(Translation::Sub, "1080p"), now);
        assert_eq!(player.active_subtitle().unwrap().lang, "English");
        player.select_subtitle(Some("Spanish"), now);
        player.attach(resolved(Translation::Dub, "1080p"), now);
        assert_eq!(player.active_subtitle().unwrap().lang, "English");
    }

    #[test]
    fn unmatched_subtitle_language_falls_back_to_first() {
        let now = Instant::now();
        let (mut player, _) = controller();
        player.attach(resolved(Translation::Sub, "1080p"), now);
        player.select_subtitle(Some("Portuguese"), now);
        assert_eq!(player.active_subtitle().unwrap().lang, "English");
        player.select_subtitle(Some("spanish"), now);
        assert_eq!(player.active_subtitle().unwrap().lang, "Spanish");
    }

    #[test]
    fn controls_hide_only_while_playing() {
        let now = Instant::now();
        let (mut player, _) = playing_at(10.0, now);
        player.pointer_activity(now);
        player.poll_timers(now + Duration::from_millis(2999));
        assert!(player.state().controls_visible);
        player.poll_timers(now + Duration::from_secs(3));
        assert!(!player.state().controls_visible);

        player.pointer_activity(now + Duration::from_secs(4));
        assert!(player.state().controls_visible);
        player.pause();
        player.poll_timers(now + Duration::from_secs(30));
        assert!(player.state().controls_visible);
    }

    #[test]
    fn keyboard_seek_is_clamped() {
        let now = Instant::now();
        let (mut player, _) = playing_at(4.0, now);
        let outcome = player.handle_key(&Key::ArrowLeft);
        assert!(outcome.handled && outcome.prevent_default);
        assert_eq!(player.state().current_time, 0.0);

        player.seek(1435.0);
        player.handle_key(&Key::ArrowRight);
        assert_eq!(player.state().current_time, 1440.0);
        player.handle_key(&Key::ArrowLeft);
        assert_eq!(player.state().current_time, 1430.0);
    }

    #[test]
    fn keys_toggle_play_mute_and_fullscreen() {
        let now = Instant::now();
        let (mut player, _) = playing_at(10.0, now);
        player.handle_key(&Key::Space);
        assert!(!player.state().playing);
        player.handle_key(&Key::Char('M'));
        assert!(player.state().muted);
        player.handle_key(&Key::Char('f'));
        assert!(player.state().fullscreen);
        let calls = player.sink_mut().take();
        assert!(calls.contains(&Call::Lock("landscape".into())));
        player.handle_key(&Key::Char('F'));
        assert!(!player.state().fullscreen);
        assert!(player.sink_mut().take().contains(&Call::Unlock));
    }

    #[test]
    fn orientation_lock_falls_back_then_gives_up() {
        let (mut player, _) = controller();
        player.sink_mut().refuse_orientation = vec!["landscape"];
        player.enter_fullscreen();
        let calls = player.sink_mut().take();
        assert!(calls.contains(&Call::Lock("landscape-primary".into())));

        player.exit_fullscreen();
        player.sink_mut().refuse_orientation = vec!["landscape", "landscape-primary"];
        player.sink_mut().take();
        player.enter_fullscreen();
        assert!(player.state().fullscreen);
        player.exit_fullscreen();
        assert!(!player.sink_mut().take().contains(&Call::Unlock));
    }

    #[test]
    fn intro_skip_and_markers() {
        let now = Instant::now();
        let (mut player, _) = playing_at(45.0, now);
        assert_eq!(player.active_marker(), Some(Marker::Intro));
        assert!(player.skip_intro());
        assert_eq!(player.state().current_time, 120.0);
        assert!(!player.skip_outro());
    }

    #[test]
    fn buffered_fraction_tracks_progress() {
        let now = Instant::now();
        let (mut player, _) = playing_at(10.0, now);
        player.handle_media_event(MediaEvent::Progress { buffered_end: 360.0 }, now);
        assert_eq!(player.state().buffered, 0.25);
    }
}
