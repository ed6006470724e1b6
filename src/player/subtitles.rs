//! Subtitle selection and activation.
//!
//! Sinks may reset text track visibility right after a stream attaches, so the chosen track
//! is re-shown after media events and on a bounded backoff until the sink confirms it.

use std::time::{Duration, Instant};
use tracing::debug;

use super::media::{MediaSink, TrackMode};
use crate::types::SubtitleTrack;

/// Lowercase with whitespace runs collapsed to `-`, so "Brazilian Portuguese" matches
/// "brazilian-portuguese".
pub fn normalize_language(label: &str) -> String {
    label
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
        .to_lowercase()
}

/// Index of the track to show. With no preference, the default-flagged track (else the
/// first); with a preference that matches nothing, the first.
pub fn choose_track(tracks: &[SubtitleTrack], wanted: Option<&str>) -> Option<usize> {
    if tracks.is_empty() {
        return None;
    }
    let Some(wanted) = wanted.map(normalize_language).filter(|w| !w.is_empty()) else {
        return tracks.iter().position(|t| t.default).or(Some(0));
    };
    tracks
        .iter()
        .position(|t| normalize_language(&t.lang) == wanted)
        .or(Some(0))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
    pub attempts: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(50),
            max: Duration::from_secs(3),
            attempts: 7,
        }
    }
}

impl Backoff {
    /// Delay before retry `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.initial.saturating_mul(factor).min(self.max)
    }
}

#[derive(Debug, Default)]
pub struct SubtitleActivator {
    tracks: Vec<SubtitleTrack>,
    wanted: Option<String>,
    backoff: Backoff,
    attempt: u32,
    deadline: Option<Instant>,
}

impl SubtitleActivator {
    pub fn new(backoff: Backoff) -> Self {
        Self {
            backoff,
            ..Self::default()
        }
    }

    /// Replaces the track set, attaches it to `sink` and starts the retry schedule.
    pub fn attach<S: MediaSink>(&mut self, sink: &mut S, tracks: &[SubtitleTrack], now: Instant) {
        sink.clear_text_tracks();
        self.tracks = tracks.to_vec();
        for track in &self.tracks {
            sink.add_text_track(track);
        }
        self.apply(sink);
        self.restart(now);
    }

    pub fn detach<S: MediaSink>(&mut self, sink: &mut S) {
        sink.clear_text_tracks();
        self.tracks.clear();
        self.deadline = None;
    }

    pub fn tracks(&self) -> &[SubtitleTrack] {
        &self.tracks
    }

    pub fn wanted(&self) -> Option<&str> {
        self.wanted.as_deref()
    }

    /// Replaces the wanted language without touching the sink; the next `attach` applies it.
    pub fn prefer(&mut self, wanted: Option<String>) {
        self.wanted = wanted;
    }

    pub fn select<S: MediaSink>(&mut self, sink: &mut S, wanted: Option<&str>, now: Instant) {
        self.wanted = wanted.map(str::to_string);
        self.apply(sink);
        self.restart(now);
    }

    pub fn desired(&self) -> Option<usize> {
        choose_track(&self.tracks, self.wanted.as_deref())
    }

    pub fn showing(&self) -> Option<&SubtitleTrack> {
        self.desired().and_then(|idx| self.tracks.get(idx))
    }

    /// Shows exactly the desired track; every other track is disabled.
    pub fn apply<S: MediaSink>(&self, sink: &mut S) {
        let desired = self.desired();
        for index in 0..self.tracks.len() {
            let mode = if Some(index) == desired {
                TrackMode::Showing
            } else {
                TrackMode::Disabled
            };
            sink.set_text_track_mode(index, mode);
        }
    }

    /// Feedback from the sink. Confirmation of the desired track stops the retries; the
    /// desired track being hidden re-applies at once.
    pub fn mode_changed<S: MediaSink>(&mut self, sink: &mut S, index: usize, mode: TrackMode) {
        if Some(index) != self.desired() {
            return;
        }
        if mode == TrackMode::Showing {
            if self.deadline.take().is_some() {
                debug!(index, "Subtitle track confirmed showing");
            }
        } else {
            self.apply(sink);
        }
    }

    /// Runs a due retry. Returns true if one ran.
    pub fn poll<S: MediaSink>(&mut self, sink: &mut S, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.apply(sink);
                self.attempt += 1;
                self.deadline = (self.attempt < self.backoff.attempts)
                    .then(|| now + self.backoff.delay(self.attempt));
                true
            }
            _ => false,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    fn restart(&mut self, now: Instant) {
        self.attempt = 0;
        self.deadline = (!self.tracks.is_empty() && self.backoff.attempts > 0)
            .then(|| now + self.backoff.delay(0));
    }
}
