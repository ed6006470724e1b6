//! Watch page routes: `/watch/{provider}/{episodeId}?animeId={id}`.
//!
//! `animepahe2` routes carry AnimePahe's own anime id instead of an AniList id.

use url::Url;
use url::form_urlencoded;

use crate::error::Result;
use crate::providers::ProviderKind;
use crate::proxy::encode_component;

const PAHE_NATIVE_SEGMENT: &str = "animepahe2";

/// Catalog an `animeId` belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnimeIds {
    #[default]
    AniList,
    AnimePahe,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchRoute {
    /// Path up to, not including, the episode segment.
    base_path: String,
    /// From the segment before the episode id; `None` when it names no provider.
    pub provider: Option<ProviderKind>,
    pub anime_ids: AnimeIds,
    pub episode_id: String,
    pub anime_id: Option<String>,
    query: Vec<(String, String)>,
}

impl WatchRoute {
    /// Parses a path with optional query. The last path segment is the percent-decoded
    /// episode id.
    pub fn parse(path_and_query: &str) -> Result<Self> {
        // relative routes need a base to parse against
        let url = Url::parse("http://localhost/")?.join(path_and_query)?;
        let path = url.path();
        let (base_path, raw_episode) = path.rsplit_once('/').unwrap_or(("", path));
        let episode_id = percent_decode(raw_episode);
        let query: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        let anime_id = query
            .iter()
            .find(|(key, _)| key == "animeId")
            .map(|(_, value)| value.clone())
            .filter(|value| !value.is_empty());
        let segment = base_path.rsplit('/').next().unwrap_or_default();
        let (provider, anime_ids) = if segment.eq_ignore_ascii_case(PAHE_NATIVE_SEGMENT) {
            (Some(ProviderKind::AnimePahe), AnimeIds::AnimePahe)
        } else {
            (segment.parse().ok(), AnimeIds::AniList)
        };
        Ok(Self {
            base_path: base_path.to_string(),
            provider,
            anime_ids,
            episode_id,
            anime_id,
            query,
        })
    }

    /// Route template for a show; fill in episodes with [`WatchRoute::episode_url`].
    pub fn new(provider: ProviderKind, anime_ids: AnimeIds, anime_id: Option<&str>) -> Self {
        let segment = match (provider, anime_ids) {
            (ProviderKind::AnimePahe, AnimeIds::AnimePahe) => PAHE_NATIVE_SEGMENT,
            _ => provider.as_str(),
        };
        let anime_id = anime_id.filter(|id| !id.is_empty()).map(str::to_string);
        Self {
            base_path: format!("/watch/{segment}"),
            provider: Some(provider),
            anime_ids,
            episode_id: String::new(),
            query: anime_id
                .iter()
                .map(|id| ("animeId".to_string(), id.clone()))
                .collect(),
            anime_id,
        }
    }

    /// Same route pointing at another episode, query preserved.
    pub fn episode_url(&self, episode_id: &str) -> String {
        let mut url = format!("{}/{}", self.base_path, encode_component(episode_id));
        if !self.query.is_empty() {
            let query = form_urlencoded::Serializer::new(String::new())
                .extend_pairs(&self.query)
                .finish();
            url.push('?');
            url.push_str(&query);
        }
        url
    }
}

fn percent_decode(segment: &str) -> String {
    // `+` is literal in a path segment
    let escaped = segment.replace('+', "%2B");
    form_urlencoded::parse(format!("v={escaped}").as_bytes())
        .next()
        .map(|(_, value)| value.into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_encoded_episode_and_anime_id() {
        let route = WatchRoute::parse(
            "/Watch/hianime/one-piece-100%3Fep%3D2142?animeId=21&lang=en",
        )
        .unwrap();
        assert_eq!(route.episode_id, "one-piece-100?ep=2142");
        assert_eq!(route.anime_id.as_deref(), Some("21"));
        assert_eq!(route.provider, Some(ProviderKind::HiAnime));
        assert_eq!(route.anime_ids, AnimeIds::AniList);
    }

    #[test]
    fn missing_anime_id_is_none() {
        let route = WatchRoute::parse("/animepahe/abc%2Fdef").unwrap();
        assert_eq!(route.episode_id, "abc/def");
        assert!(route.anime_id.is_none());
    }

    #[test]
    fn provider_segment_selects_the_provider() {
        let route = WatchRoute::parse("/animepahe/abc%2Fdef?animeId=1").unwrap();
        assert_eq!(route.provider, Some(ProviderKind::AnimePahe));
        assert_eq!(route.anime_ids, AnimeIds::AniList);

        let native = WatchRoute::parse("/Watch/animepahe2/pahe-5678-$session$-abc?animeId=5678")
            .unwrap();
        assert_eq!(native.provider, Some(ProviderKind::AnimePahe));
        assert_eq!(native.anime_ids, AnimeIds::AnimePahe);
        assert_eq!(native.anime_id.as_deref(), Some("5678"));

        assert!(WatchRoute::parse("/watch/ep-1").unwrap().provider.is_none());
    }

    #[test]
    fn built_routes_parse_back() {
        let template = WatchRoute::new(ProviderKind::AnimePahe, AnimeIds::AnimePahe, Some("5678"));
        let url = template.episode_url("pahe-5678-$session$-abc");
        let parsed = WatchRoute::parse(&url).unwrap();
        assert_eq!(parsed.provider, Some(ProviderKind::AnimePahe));
        assert_eq!(parsed.anime_ids, AnimeIds::AnimePahe);
        assert_eq!(parsed.episode_id, "pahe-5678-$session$-abc");
        assert_eq!(parsed.anime_id.as_deref(), Some("5678"));

        let bare = WatchRoute::new(ProviderKind::HiAnime, AnimeIds::AniList, None);
        assert_eq!(bare.episode_url("ep-1"), "/watch/hianime/ep-1");
    }

    #[test]
    fn episode_url_keeps_query() {
        let route = WatchRoute::parse("/Watch/hianime/ep-1?animeId=21").unwrap();
        assert_eq!(
            route.episode_url("one-piece-100?ep=2143"),
            "/Watch/hianime/one-piece-100%3Fep%3D2143?animeId=21"
        );
    }
}
