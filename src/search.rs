//! Debounced search suggestions for the navigation bar.

use std::time::{Duration, Instant};
use tracing::debug;

use crate::config::SearchSettings;
use crate::error::Result;
use crate::generation::{Generation, GenerationCounter};
use crate::types::{AnimeSummary, Paged};

/// A query that is due to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuggestionRequest {
    pub generation: Generation,
    pub query: String,
}

#[derive(Debug)]
pub struct SuggestionBox {
    debounce: Duration,
    limit: usize,
    text: String,
    due: Option<Instant>,
    generations: GenerationCounter,
    results: Vec<AnimeSummary>,
    has_more: bool,
    open: bool,
}

impl SuggestionBox {
    pub fn new(debounce: Duration, limit: usize) -> Self {
        Self {
            debounce,
            limit,
            text: String::new(),
            due: None,
            generations: GenerationCounter::new(),
            results: Vec::new(),
            has_more: false,
            open: false,
        }
    }

    pub fn from_settings(settings: &SearchSettings) -> Self {
        Self::new(settings.debounce(), settings.suggestion_limit)
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn results(&self) -> &[AnimeSummary] {
        &self.results
    }

    /// More matches exist than are shown; offer "view more".
    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.due
    }

    /// A keystroke. Restarts the debounce; blank input closes without fetching.
    pub fn input(&mut self, text: &str, now: Instant) {
        self.text = text.to_string();
        if text.trim().is_empty() {
            self.clear();
            return;
        }
        self.due = Some(now + self.debounce);
    }

    /// Returns the query to fetch once the debounce has elapsed.
    pub fn poll(&mut self, now: Instant) -> Option<SuggestionRequest> {
        match self.due {
            Some(due) if due <= now => {
                self.due = None;
                let generation = self.generations.bump();
                debug!(query = %self.text, generation = generation.value(), "Suggestion query due");
                Some(SuggestionRequest {
                    generation,
                    query: self.text.trim().to_string(),
                })
            }
            _ => None,
        }
    }

    /// Applies search results. Stale generations and failures leave the box untouched.
    pub fn complete(&mut self, generation: Generation, result: Result<Paged<AnimeSummary>>) -> bool {
        if !self.generations.is_current(generation) {
            return false;
        }
        match result {
            Ok(paged) => {
                self.has_more = paged.results.len() > self.limit || paged.has_next_page;
                self.results = paged.results.into_iter().take(self.limit).collect();
                self.open = !self.results.is_empty();
                true
            }
            Err(err) => {
                debug!(error = %err, "Suggestion search failed");
                false
            }
        }
    }

    /// Outside click or navigation: close and forget any pending query.
    pub fn dismiss(&mut self) {
        self.clear();
    }

    fn clear(&mut self) {
        self.due = None;
        // responses still in flight must not reopen the box
        self.generations.bump();
        self.results.clear();
        self.has_more = false;
        self.open = false;
    }
}
