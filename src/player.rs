//! Playback: the controller state machine and the backends it drives.

pub mod controller;
pub mod controls;
pub mod media;
#[cfg(unix)]
pub mod mpv;
pub mod state;
pub mod subtitles;

pub use controller::{ControllerOptions, Marker, PlaybackController};
pub use controls::{Key, KeyOutcome};
pub use media::{MediaEvent, MediaSink, StreamEngine, StreamEvent, StreamSession};
pub use state::{PlaybackState, PlayerStatus, format_time};

/// The controller as the CLI runs it.
#[cfg(unix)]
pub type MpvController = PlaybackController<mpv::MpvSink, mpv::MpvEngine>;
