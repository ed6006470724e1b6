use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::client::{MetadataClient, endpoint};
use crate::error::{Error, Result};
use crate::proxy::ProxyPrefix;
use crate::types::{
    AnimeDetails, AnimeTitle, Episode, EpisodeList, SourceDescriptor, SubtitleTrack, TimeRange,
    Translation, VideoSource,
};

pub mod animepahe;
pub mod hianime;

/// How a provider exposes its streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamLayout {
    /// One adaptive manifest; quality is chosen by the streaming engine.
    AdaptiveManifest,
    /// One source per quality label; the viewer picks one.
    QualityVariants,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    HiAnime,
    AnimePahe,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 2] = [ProviderKind::HiAnime, ProviderKind::AnimePahe];

    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::HiAnime => "hianime",
            ProviderKind::AnimePahe => "animepahe",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "hianime" | "zoro" => Ok(ProviderKind::HiAnime),
            "animepahe" | "pahe" => Ok(ProviderKind::AnimePahe),
            other => Err(Error::UnknownProvider(other.to_string())),
        }
    }
}

/// A streaming provider behind the kenjitsu API.
pub trait StreamProvider {
    fn kind(&self) -> ProviderKind;

    fn layout(&self) -> StreamLayout;

    fn proxy(&self) -> &ProxyPrefix;

    /// Version actually served for `episode_id` when `requested` is asked for.
    fn version_for(&self, _episode_id: &str, requested: Translation) -> Translation {
        requested
    }

    async fn fetch_episodes(&self, anime_id: &str) -> Result<EpisodeList>;

    /// Details and episodes keyed by the provider's own anime id.
    async fn fetch_anime(&self, provider_anime_id: &str) -> Result<ProviderAnime>;

    async fn fetch_sources(
        &self,
        episode_id: &str,
        translation: Translation,
    ) -> Result<SourceDescriptor>;
}

/// Episode list for `anime_id` as mapped by `provider`.
pub(crate) async fn fetch_provider_episodes(
    client: &MetadataClient,
    provider: ProviderKind,
    anime_id: &str,
) -> Result<EpisodeList> {
    let url = endpoint(
        &client.api().kenjitsu,
        &["api", "anilist", "episodes", anime_id],
        &[("provider", provider.as_str().to_string())],
    )?;
    let response: EpisodesResponse = client.get_json(url).await?;
    Ok(response.into())
}

/// A show as one provider lists it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderAnime {
    pub anilist_id: Option<String>,
    pub details: AnimeDetails,
    pub episodes: EpisodeList,
}

impl ProviderAnime {
    /// Newest episode; providers list episodes oldest first.
    pub fn latest_episode(&self) -> Option<&Episode> {
        self.episodes.episodes.last()
    }
}

pub(crate) async fn fetch_provider_anime(
    client: &MetadataClient,
    provider: ProviderKind,
    provider_anime_id: &str,
) -> Result<ProviderAnime> {
    let url = endpoint(
        &client.api().kenjitsu,
        &["api", provider.as_str(), "anime", provider_anime_id],
        &[],
    )?;
    let response: ProviderAnimeResponse = client.get_json(url).await?;
    Ok(response.into())
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ProviderAnimeResponse {
    #[serde(default)]
    data: Option<ProviderAnimeData>,
    #[serde(default)]
    provider_episodes: Vec<Episode>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProviderAnimeData {
    #[serde(flatten)]
    details: AnimeDetails,
    #[serde(default)]
    anilist_id: Option<serde_json::Value>,
    #[serde(default)]
    name: Option<String>,
}

impl From<ProviderAnimeResponse> for ProviderAnime {
    fn from(response: ProviderAnimeResponse) -> Self {
        let data = response.data.unwrap_or_default();
        let mut details = data.details;
        if details.summary.title.display_opt().is_none() {
            details.summary.title.user_preferred = data.name;
        }
        let anilist_id = match data.anilist_id {
            Some(serde_json::Value::Number(id)) => Some(id.to_string()),
            Some(serde_json::Value::String(id)) if !id.is_empty() => Some(id),
            _ => None,
        };
        ProviderAnime {
            anilist_id,
            episodes: EpisodeList {
                episodes: response.provider_episodes,
                title: Some(details.summary.title.clone()),
                image: details.summary.image.clone(),
            },
            details,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct EpisodesResponse {
    #[serde(default)]
    provider_episodes: Vec<Episode>,
    #[serde(default)]
    title: Option<AnimeTitle>,
    #[serde(default)]
    data: Option<EpisodesMeta>,
}

#[derive(Debug, Default, Deserialize)]
struct EpisodesMeta {
    #[serde(default)]
    title: Option<AnimeTitle>,
    #[serde(default)]
    image: Option<String>,
}

impl From<EpisodesResponse> for EpisodeList {
    fn from(response: EpisodesResponse) -> Self {
        let (meta_title, image) = match response.data {
            Some(meta) => (meta.title, meta.image),
            None => (None, None),
        };
        EpisodeList {
            episodes: response.provider_episodes,
            title: meta_title.or(response.title),
            image,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct SourcesResponse {
    #[serde(default)]
    headers: HashMap<String, String>,
    #[serde(default)]
    data: SourcesData,
}

#[derive(Debug, Default, Deserialize)]
struct SourcesData {
    #[serde(default)]
    sources: Vec<VideoSource>,
    #[serde(default)]
    download: Option<String>,
    #[serde(default)]
    subtitles: Vec<SubtitleTrack>,
    #[serde(default)]
    intro: Option<TimeRange>,
    #[serde(default)]
    outro: Option<TimeRange>,
}

impl From<SourcesResponse> for SourceDescriptor {
    fn from(response: SourcesResponse) -> Self {
        let data = response.data;
        SourceDescriptor {
            sources: data.sources.into_iter().filter(|s| !s.url.is_empty()).collect(),
            download: data.download.filter(|d| !d.is_empty()),
            subtitles: data.subtitles,
            intro: data.intro.filter(|r| r.end > r.start),
            outro: data.outro.filter(|r| r.end > r.start),
            headers: response.headers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_names_parse() {
        assert_eq!("HiAnime".parse::<ProviderKind>().unwrap(), ProviderKind::HiAnime);
        assert_eq!("animepahe".parse::<ProviderKind>().unwrap(), ProviderKind::AnimePahe);
        assert!(matches!(
            "anizone".parse::<ProviderKind>(),
            Err(Error::UnknownProvider(name)) if name == "anizone"
        ));
    }

    #[test]
    fn episode_title_prefers_data_block() {
        let json = r#"{
            "providerEpisodes": [{"episodeId": "a-1", "episodeNumber": 1, "title": "Start"}],
            "title": {"romaji": "Outer"},
            "data": {"title": {"english": "Inner"}, "image": "poster.jpg"}
        }"#;
        let response: EpisodesResponse = serde_json::from_str(json).unwrap();
        let list = EpisodeList::from(response);
        assert_eq!(list.episodes.len(), 1);
        assert_eq!(list.title.unwrap().display(), "Inner");
        assert_eq!(list.image.as_deref(), Some("poster.jpg"));
    }

    #[test]
    fn provider_anime_carries_anilist_id_and_latest_episode() {
        let json = r#"{
            "data": {"id": "1234", "anilistId": 21, "name": "One Piece", "genres": ["Action"], "image": "op.jpg"},
            "providerEpisodes": [
                {"episodeId": "pahe-1234-$session$-a", "episodeNumber": 1},
                {"episodeId": "pahe-1234-$session$-b", "episodeNumber": 2}
            ]
        }"#;
        let response: ProviderAnimeResponse = serde_json::from_str(json).unwrap();
        let anime = ProviderAnime::from(response);
        assert_eq!(anime.anilist_id.as_deref(), Some("21"));
        assert_eq!(anime.details.summary.title.display(), "One Piece");
        assert_eq!(anime.details.summary.genres, ["Action"]);
        assert_eq!(anime.latest_episode().unwrap().number, 2);
        assert_eq!(anime.episodes.image.as_deref(), Some("op.jpg"));
    }

    #[test]
    fn provider_anime_without_data_is_empty() {
        let response: ProviderAnimeResponse = serde_json::from_str("{}").unwrap();
        let anime = ProviderAnime::from(response);
        assert!(anime.anilist_id.is_none());
        assert!(anime.latest_episode().is_none());
    }

    #[test]
    fn empty_provider_episodes_is_not_an_error() {
        let response: EpisodesResponse = serde_json::from_str(r#"{"providerEpisodes": []}"#).unwrap();
        let list = EpisodeList::from(response);
        assert!(list.is_empty());
        assert!(list.title.is_none());
    }

    #[test]
    fn sources_drop_empty_markers_and_urls() {
        let json = r#"{
            "headers": {"Referer": "https://megacloud.club/"},
            "data": {
                "sources": [{"url": "https://cdn/a.m3u8", "isM3u8": true, "type": "hls"}, {"url": ""}],
                "subtitles": [{"url": "en.vtt", "lang": "English", "default": true}],
                "intro": {"start": 0, "end": 0},
                "outro": {"start": 1300, "end": 1390}
            }
        }"#;
        let response: SourcesResponse = serde_json::from_str(json).unwrap();
        let descriptor = SourceDescriptor::from(response);
        assert_eq!(descriptor.sources.len(), 1);
        assert!(descriptor.sources[0].is_m3u8);
        assert!(descriptor.intro.is_none());
        assert_eq!(descriptor.outro.unwrap().end, 1390.0);
        assert_eq!(descriptor.headers["Referer"], "https://megacloud.club/");
    }
}
