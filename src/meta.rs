//! Link-preview metadata for the watch page.

use regex::Regex;
use std::sync::LazyLock;

use crate::player::media::MediaSink;
use crate::types::{AnimeTitle, Episode};

const FALLBACK_TITLE: &str = "Anime";

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<br\s*/?>|</?[a-z][^>]*>").expect("tag pattern is valid"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaTags {
    pub title: String,
    pub description: String,
    pub image: Option<String>,
}

pub fn compute_meta_tags(episode: &Episode, title: Option<&AnimeTitle>) -> MetaTags {
    let anime = title
        .and_then(|t| {
            [&t.english, &t.romaji, &t.native]
                .into_iter()
                .flatten()
                .map(String::as_str)
                .find(|s| !s.trim().is_empty())
        })
        .unwrap_or(FALLBACK_TITLE);
    let description = episode
        .overview
        .as_deref()
        .filter(|o| !o.trim().is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("Watch {anime} Episode {}", episode.number));
    MetaTags {
        title: format!("Episode {} - {anime}", episode.number),
        description,
        image: episode.thumbnail.clone().filter(|t| !t.trim().is_empty()),
    }
}

/// Synopsis HTML as terminal text: `<br>` becomes a line break, other tags and the
/// common entities are dropped, and blank-line runs collapse.
pub fn plain_text(html: &str) -> String {
    let text = TAG_RE.replace_all(html, |caps: &regex::Captures<'_>| {
        if caps[0].to_ascii_lowercase().starts_with("<br") {
            "\n"
        } else {
            ""
        }
    });
    let text = text
        .replace("&quot;", "\"")
        .replace("&#039;", "'")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&");
    let mut lines: Vec<&str> = Vec::new();
    for line in text.lines().map(str::trim) {
        if line.is_empty() && lines.last().is_none_or(|last| last.is_empty()) {
            continue;
        }
        lines.push(line);
    }
    while lines.last().is_some_and(|last| last.is_empty()) {
        lines.pop();
    }
    lines.join("\n")
}

impl MetaTags {
    /// The one place page metadata leaves this module.
    pub fn apply<S: MediaSink>(&self, sink: &mut S) {
        sink.set_title(&self.title);
    }
}
