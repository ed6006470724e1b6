use chrono::{DateTime, Datelike, Utc, Weekday};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

pub const UNKNOWN_TITLE: &str = "Unknown Title";
pub const PLACEHOLDER_IMAGE: &str =
    "https://via.placeholder.com/300x400/1a1a1a/666666?text=No+Image";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Translation {
    #[default]
    Sub,
    Dub,
}

impl Translation {
    pub fn as_str(self) -> &'static str {
        match self {
            Translation::Sub => "sub",
            Translation::Dub => "dub",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Translation::Sub => "Sub",
            Translation::Dub => "Dub",
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            Translation::Sub => Translation::Dub,
            Translation::Dub => Translation::Sub,
        }
    }
}

/// Title variants as returned by AniList-backed endpoints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnimeTitle {
    #[serde(default)]
    pub romaji: Option<String>,
    #[serde(default)]
    pub english: Option<String>,
    #[serde(default)]
    pub native: Option<String>,
    #[serde(default)]
    pub user_preferred: Option<String>,
}

impl AnimeTitle {
    /// Preferred display title: english, romaji, native, then the user-preferred form.
    pub fn display(&self) -> &str {
        self.display_opt().unwrap_or(UNKNOWN_TITLE)
    }

    pub fn display_opt(&self) -> Option<&str> {
        [
            &self.english,
            &self.romaji,
            &self.native,
            &self.user_preferred,
        ]
        .into_iter()
        .flatten()
        .map(String::as_str)
        .find(|t| !t.trim().is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Episode {
    #[serde(default)]
    pub episode_id: String,
    #[serde(default, rename = "episodeNumber")]
    pub number: u32,
    #[serde(default)]
    pub title: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub rating: Option<String>,
    #[serde(default)]
    pub aired: bool,
    #[serde(default)]
    pub air_date: Option<String>,
    #[serde(default)]
    pub overview: Option<String>,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
}

impl Episode {
    pub fn label(&self) -> String {
        if self.title.trim().is_empty() {
            format!("Episode {}", self.number)
        } else {
            format!("{:>4}. {}", self.number, self.title)
        }
    }
}

/// Episode listing for one anime and provider.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EpisodeList {
    pub episodes: Vec<Episode>,
    pub title: Option<AnimeTitle>,
    pub image: Option<String>,
}

impl EpisodeList {
    pub fn is_empty(&self) -> bool {
        self.episodes.is_empty()
    }

    pub fn find(&self, episode_id: &str) -> Option<&Episode> {
        self.episodes.iter().find(|ep| ep.episode_id == episode_id)
    }

    /// Episode following `episode_id` in list order.
    pub fn next_after(&self, episode_id: &str) -> Option<&Episode> {
        let idx = self
            .episodes
            .iter()
            .position(|ep| ep.episode_id == episode_id)?;
        self.episodes.get(idx + 1)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoSource {
    #[serde(default)]
    pub url: String,
    #[serde(default, rename = "isM3u8", alias = "isM3U8")]
    pub is_m3u8: bool,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub quality: Option<String>,
}

impl VideoSource {
    pub fn quality_label(&self) -> &str {
        self.quality.as_deref().unwrap_or("auto")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubtitleTrack {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub lang: String,
    #[serde(default)]
    pub default: bool,
}

impl SubtitleTrack {
    /// Sprite index some providers ship alongside real subtitles.
    pub fn is_thumbnails(&self) -> bool {
        self.lang.eq_ignore_ascii_case("thumbnails")
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    #[serde(default)]
    pub start: f64,
    #[serde(default)]
    pub end: f64,
}

impl TimeRange {
    pub fn contains(&self, t: f64) -> bool {
        self.end > self.start && t >= self.start && t < self.end
    }
}

/// Playable stream descriptor returned by a provider for one episode and version.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceDescriptor {
    pub sources: Vec<VideoSource>,
    pub download: Option<String>,
    pub subtitles: Vec<SubtitleTrack>,
    pub intro: Option<TimeRange>,
    pub outro: Option<TimeRange>,
    pub headers: HashMap<String, String>,
}

impl SourceDescriptor {
    /// Subtitles suitable for display.
    pub fn display_subtitles(&self) -> Vec<SubtitleTrack> {
        self.subtitles
            .iter()
            .filter(|sub| !sub.is_thumbnails())
            .cloned()
            .collect()
    }

    pub fn qualities(&self) -> Vec<&str> {
        self.sources.iter().map(VideoSource::quality_label).collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnimeSummary {
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient_title")]
    pub title: AnimeTitle,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default, deserialize_with = "lenient_parse")]
    pub rating: Option<f64>,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default, deserialize_with = "lenient_parse")]
    pub total_episodes: Option<u32>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "lenient_parse")]
    pub release_date: Option<i32>,
    #[serde(default)]
    pub description: Option<String>,
}

impl AnimeSummary {
    pub fn image_or_placeholder(&self) -> &str {
        self.image
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .unwrap_or(PLACEHOLDER_IMAGE)
    }

    pub fn label(&self) -> String {
        let mut label = self.title.display().to_string();
        if let Some(kind) = &self.kind {
            label.push_str(&format!(" [{kind}]"));
        }
        if let Some(eps) = self.total_episodes {
            label.push_str(&format!(" · {eps} eps"));
        }
        if let Some(rating) = self.rating {
            label.push_str(&format!(" · {rating}%"));
        }
        label
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnimeDetails {
    #[serde(flatten)]
    pub summary: AnimeSummary,
    #[serde(default)]
    pub cover: Option<String>,
    #[serde(default, deserialize_with = "lenient_names")]
    pub studios: Vec<String>,
    #[serde(default)]
    pub season: Option<String>,
    /// Minutes per episode.
    #[serde(default, deserialize_with = "lenient_parse")]
    pub duration: Option<u32>,
    #[serde(default, deserialize_with = "lenient_parse")]
    pub popularity: Option<u64>,
}

/// A freshly aired HiAnime episode, keyed by HiAnime's own anime id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentRelease {
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub japanese_title: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub sub: Option<u32>,
    #[serde(default)]
    pub dub: Option<u32>,
    #[serde(default)]
    pub episodes: Option<u32>,
}

impl RecentRelease {
    pub fn label(&self) -> String {
        let title = [Some(&self.title), self.japanese_title.as_ref()]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .find(|t| !t.trim().is_empty())
            .unwrap_or(UNKNOWN_TITLE);
        let mut label = title.to_string();
        if let Some(kind) = &self.kind {
            label.push_str(&format!(" [{kind}]"));
        }
        if let Some(sub) = self.sub {
            label.push_str(&format!(" · SUB {sub}"));
        }
        if let Some(dub) = self.dub.filter(|dub| *dub > 0) {
            label.push_str(&format!(" · DUB {dub}"));
        }
        label
    }
}

/// Entry on the weekly airing schedule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiringEntry {
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: String,
    #[serde(default)]
    pub title: AnimeTitle,
    #[serde(default)]
    pub episode: Option<u32>,
    #[serde(default)]
    pub airing_at: i64,
    #[serde(default)]
    pub image: Option<String>,
}

impl AiringEntry {
    pub fn airs_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.airing_at, 0)
    }

    pub fn weekday(&self) -> Option<Weekday> {
        self.airs_at().map(|at| at.weekday())
    }

    pub fn countdown(&self, now: DateTime<Utc>) -> String {
        let remaining = self.airing_at - now.timestamp();
        if remaining <= 0 {
            return "Airing now".to_string();
        }
        let days = remaining / 86_400;
        let hours = (remaining % 86_400) / 3_600;
        let minutes = (remaining % 3_600) / 60;
        let seconds = remaining % 60;
        format!("{days}d {hours}h {minutes}m {seconds}s")
    }
}

/// One page of an upstream listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Paged<T> {
    #[serde(default = "first_page")]
    pub current_page: u32,
    #[serde(default)]
    pub has_next_page: bool,
    #[serde(default = "Vec::new")]
    pub results: Vec<T>,
}

impl<T> Default for Paged<T> {
    fn default() -> Self {
        Self {
            current_page: 1,
            has_next_page: false,
            results: Vec::new(),
        }
    }
}

fn first_page() -> u32 {
    1
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        Some(serde_json::Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    })
}

fn lenient_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_string(deserializer)?.unwrap_or_default())
}

/// Numbers that some endpoints send as strings. Anything unparseable is `None`.
fn lenient_parse<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: std::str::FromStr,
{
    Ok(lenient_string(deserializer)?.and_then(|value| value.trim().parse().ok()))
}

/// Plain names or `{"name": ...}` objects.
fn lenient_names<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let values = Option::<Vec<serde_json::Value>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(values
        .into_iter()
        .filter_map(|value| match value {
            serde_json::Value::String(name) => Some(name),
            serde_json::Value::Object(fields) => {
                fields.get("name").and_then(|n| n.as_str()).map(str::to_string)
            }
            _ => None,
        })
        .collect())
}

/// Provider pages send a bare string where AniList sends title variants.
fn lenient_title<'de, D>(deserializer: D) -> Result<AnimeTitle, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum TitleForm {
        Plain(String),
        Variants(AnimeTitle),
    }

    Ok(match Option::<TitleForm>::deserialize(deserializer)? {
        Some(TitleForm::Variants(title)) => title,
        Some(TitleForm::Plain(title)) => AnimeTitle {
            user_preferred: Some(title),
            ..Default::default()
        },
        None => AnimeTitle::default(),
    })
}
