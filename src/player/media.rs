//! Seams between the playback controller and whatever actually renders video.
//!
//! [`MediaSink`] stands in for the media element, [`StreamEngine`] for the adaptive
//! streaming library attached to it. Sink operations are fire-and-forget; outcomes come
//! back later as [`MediaEvent`]s and [`StreamEvent`]s.

use std::fmt;

use crate::error::Result;
use crate::types::SubtitleTrack;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackMode {
    Disabled,
    Showing,
}

pub trait MediaSink {
    /// Native (non-adaptive) playback of `url`.
    fn set_source(&mut self, url: &str) -> Result<()>;

    fn play(&mut self);

    fn pause(&mut self);

    fn set_current_time(&mut self, secs: f64);

    fn set_volume(&mut self, volume: f64);

    fn set_muted(&mut self, muted: bool);

    /// Attaches an out-of-band text track and returns its index.
    fn add_text_track(&mut self, track: &SubtitleTrack) -> usize;

    fn clear_text_tracks(&mut self);

    fn set_text_track_mode(&mut self, index: usize, mode: TrackMode);

    fn request_fullscreen(&mut self) -> Result<()>;

    fn exit_fullscreen(&mut self) -> Result<()>;

    fn lock_orientation(&mut self, orientation: &str) -> Result<()>;

    fn unlock_orientation(&mut self);

    fn set_controls_visible(&mut self, visible: bool);

    fn set_title(&mut self, title: &str);
}

/// The adaptive streaming library.
pub trait StreamEngine {
    type Session: StreamSession;

    fn is_supported(&self) -> bool;

    /// Creates a session playing `url`. The caller destroys any previous session first.
    fn create(&mut self, url: &str) -> Result<Self::Session>;
}

pub trait StreamSession {
    fn start_load(&mut self);

    fn recover_media_error(&mut self);

    fn destroy(&mut self);
}

#[derive(Debug, Clone, PartialEq)]
pub enum MediaEvent {
    LoadedMetadata { duration: f64 },
    LoadedData,
    CanPlay,
    Play,
    Playing,
    Pause,
    Ended,
    TimeUpdate { current_time: f64 },
    DurationChange { duration: f64 },
    Progress { buffered_end: f64 },
    VolumeChange { volume: f64, muted: bool },
    /// `play()` was refused, usually by autoplay policy.
    PlayRejected,
    FullscreenChanged(bool),
    TrackModeChanged { index: usize, mode: TrackMode },
    TrackLoaded { index: usize },
    Error(String),
}

impl MediaEvent {
    /// Events after which a sink may have reset text track visibility.
    pub fn resets_tracks(&self) -> bool {
        matches!(
            self,
            MediaEvent::LoadedMetadata { .. }
                | MediaEvent::LoadedData
                | MediaEvent::CanPlay
                | MediaEvent::Play
                | MediaEvent::Playing
                | MediaEvent::TrackLoaded { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamErrorKind {
    Network,
    Media,
    Other,
}

impl fmt::Display for StreamErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StreamErrorKind::Network => "network",
            StreamErrorKind::Media => "media",
            StreamErrorKind::Other => "other",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamError {
    pub fatal: bool,
    pub kind: StreamErrorKind,
    pub details: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    ManifestParsed,
    Error(StreamError),
}
