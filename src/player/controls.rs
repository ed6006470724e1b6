use std::time::{Duration, Instant};

/// Keys the player reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Key {
    Space,
    ArrowLeft,
    ArrowRight,
    Char(char),
    Other(String),
}

impl Key {
    /// Parses browser `KeyboardEvent.key` values as well as mpv key names.
    pub fn from_name(name: &str) -> Self {
        match name {
            " " | "Space" | "SPACE" | "space" => Key::Space,
            "ArrowLeft" | "LEFT" | "left" => Key::ArrowLeft,
            "ArrowRight" | "RIGHT" | "right" => Key::ArrowRight,
            other => {
                let mut chars = other.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Key::Char(c),
                    _ => Key::Other(other.to_string()),
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KeyAction {
    TogglePlay,
    SeekBy(f64),
    ToggleFullscreen,
    ToggleMute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyOutcome {
    pub handled: bool,
    /// Space and the arrows would otherwise scroll the page.
    pub prevent_default: bool,
}

pub fn key_action(key: &Key, seek_step: f64) -> Option<KeyAction> {
    match key {
        Key::Space => Some(KeyAction::TogglePlay),
        Key::ArrowLeft => Some(KeyAction::SeekBy(-seek_step)),
        Key::ArrowRight => Some(KeyAction::SeekBy(seek_step)),
        Key::Char('f' | 'F') => Some(KeyAction::ToggleFullscreen),
        Key::Char('m' | 'M') => Some(KeyAction::ToggleMute),
        _ => None,
    }
}

pub fn key_outcome(key: &Key, action: Option<KeyAction>) -> KeyOutcome {
    KeyOutcome {
        handled: action.is_some(),
        prevent_default: matches!(key, Key::Space | Key::ArrowLeft | Key::ArrowRight),
    }
}

/// Auto-hide for the on-screen controls.
#[derive(Debug)]
pub struct ControlsTimer {
    hide_after: Duration,
    deadline: Option<Instant>,
    visible: bool,
}

impl ControlsTimer {
    pub fn new(hide_after: Duration) -> Self {
        Self {
            hide_after,
            deadline: None,
            visible: true,
        }
    }

    pub fn visible(&self) -> bool {
        self.visible
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Pointer or touch activity: show, and restart the countdown while playing.
    pub fn activity(&mut self, now: Instant, playing: bool) {
        self.visible = true;
        self.deadline = playing.then(|| now + self.hide_after);
    }

    pub fn playing(&mut self, now: Instant) {
        if self.deadline.is_none() {
            self.deadline = Some(now + self.hide_after);
        }
    }

    /// Paused or stopped: controls stay up.
    pub fn hold(&mut self) {
        self.visible = true;
        self.deadline = None;
    }

    /// Returns true when this call hid the controls.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                let was_visible = self.visible;
                self.visible = false;
                was_visible
            }
            _ => false,
        }
    }
}
