use std::fmt;

/// Lifecycle of the attached stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayerStatus {
    #[default]
    Idle,
    Loading,
    Ready,
    Playing,
    Paused,
    Ended,
    Error,
}

impl PlayerStatus {
    pub fn can_transition_to(self, next: PlayerStatus) -> bool {
        use PlayerStatus::*;
        match (self, next) {
            // any state may start a new load or be torn down
            (_, Loading) | (_, Idle) => true,
            (Loading, Ready) | (Loading, Error) => true,
            (Ready, Playing) | (Ready, Paused) | (Ready, Error) => true,
            (Playing, Paused) | (Playing, Ended) | (Playing, Error) => true,
            (Paused, Playing) | (Paused, Ended) | (Paused, Error) => true,
            (Ended, Playing) | (Ended, Paused) => true,
            _ => false,
        }
    }
}

impl fmt::Display for PlayerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PlayerStatus::Idle => "idle",
            PlayerStatus::Loading => "loading",
            PlayerStatus::Ready => "ready",
            PlayerStatus::Playing => "playing",
            PlayerStatus::Paused => "paused",
            PlayerStatus::Ended => "ended",
            PlayerStatus::Error => "error",
        };
        f.write_str(label)
    }
}

/// What the viewer sees. Mirrored from the media sink, owned by the controller.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackState {
    pub current_time: f64,
    /// Zero until the sink reports metadata.
    pub duration: f64,
    pub volume: f64,
    pub muted: bool,
    pub playing: bool,
    /// Buffered fraction in `[0, 1]`.
    pub buffered: f64,
    pub fullscreen: bool,
    pub controls_visible: bool,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            current_time: 0.0,
            duration: 0.0,
            volume: 1.0,
            muted: false,
            playing: false,
            buffered: 0.0,
            fullscreen: false,
            controls_visible: true,
        }
    }
}

impl PlaybackState {
    pub fn has_duration(&self) -> bool {
        self.duration.is_finite() && self.duration > 0.0
    }

    /// Clamps `time` into `[0, duration]`, or `[0, ∞)` while the duration is unknown.
    pub fn clamp_time(&self, time: f64) -> f64 {
        let time = if time.is_finite() { time.max(0.0) } else { 0.0 };
        if self.has_duration() {
            time.min(self.duration)
        } else {
            time
        }
    }

    pub fn progress(&self) -> f64 {
        if self.has_duration() {
            (self.current_time / self.duration).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

pub fn clamp_volume(volume: f64) -> f64 {
    if volume.is_nan() {
        0.0
    } else {
        volume.clamp(0.0, 1.0)
    }
}

/// `m:ss`, or `h:mm:ss` past an hour. Non-finite input renders as `0:00`.
pub fn format_time(secs: f64) -> String {
    if !secs.is_finite() || secs < 0.0 {
        return "0:00".to_string();
    }
    let total = secs.floor() as u64;
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}
