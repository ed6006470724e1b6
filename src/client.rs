//! Metadata client: URL construction and JSON unwrapping for the upstream catalog APIs.

use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use url::Url;

use crate::config::ApiSettings;
use crate::error::{Error, Result};
use crate::types::{AiringEntry, AnimeDetails, AnimeSummary, Episode, Paged, RecentRelease};

/// Sort keys accepted by the advanced search endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    PopularityDesc,
    Popularity,
    TrendingDesc,
    ScoreDesc,
    Score,
    FavouritesDesc,
    StartDateDesc,
    StartDate,
    TitleEnglish,
    TitleEnglishDesc,
    EpisodesDesc,
    Episodes,
}

impl SortOrder {
    pub const ALL: [SortOrder; 12] = [
        SortOrder::PopularityDesc,
        SortOrder::Popularity,
        SortOrder::TrendingDesc,
        SortOrder::ScoreDesc,
        SortOrder::Score,
        SortOrder::FavouritesDesc,
        SortOrder::StartDateDesc,
        SortOrder::StartDate,
        SortOrder::TitleEnglish,
        SortOrder::TitleEnglishDesc,
        SortOrder::EpisodesDesc,
        SortOrder::Episodes,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SortOrder::PopularityDesc => "POPULARITY_DESC",
            SortOrder::Popularity => "POPULARITY",
            SortOrder::TrendingDesc => "TRENDING_DESC",
            SortOrder::ScoreDesc => "SCORE_DESC",
            SortOrder::Score => "SCORE",
            SortOrder::FavouritesDesc => "FAVOURITES_DESC",
            SortOrder::StartDateDesc => "START_DATE_DESC",
            SortOrder::StartDate => "START_DATE",
            SortOrder::TitleEnglish => "TITLE_ENGLISH",
            SortOrder::TitleEnglishDesc => "TITLE_ENGLISH_DESC",
            SortOrder::EpisodesDesc => "EPISODES_DESC",
            SortOrder::Episodes => "EPISODES",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SortOrder::PopularityDesc => "Most Popular",
            SortOrder::Popularity => "Least Popular",
            SortOrder::TrendingDesc => "Trending",
            SortOrder::ScoreDesc => "Highest Rated",
            SortOrder::Score => "Lowest Rated",
            SortOrder::FavouritesDesc => "Most Favorites",
            SortOrder::StartDateDesc => "Newest",
            SortOrder::StartDate => "Oldest",
            SortOrder::TitleEnglish => "Title A-Z",
            SortOrder::TitleEnglishDesc => "Title Z-A",
            SortOrder::EpisodesDesc => "Most Episodes",
            SortOrder::Episodes => "Least Episodes",
        }
    }
}

pub struct MetadataClient {
    client: Client,
    api: ApiSettings,
}

impl MetadataClient {
    pub fn new(api: ApiSettings) -> Result<Self> {
        let client = Client::builder()
            .user_agent(api.user_agent.clone())
            .timeout(api.timeout())
            .build()?;
        Ok(Self { client, api })
    }

    pub fn api(&self) -> &ApiSettings {
        &self.api
    }

    /// GET `url` and decode the body. Non-2xx statuses become [`Error::Http`].
    pub async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        debug!(url = %url, "GET");
        let response = self
            .client
            .get(url.clone())
            .header("Accept", "application/json")
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            warn!(url = %url, status = status.as_u16(), "Upstream returned an error status");
            return Err(Error::Http {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|source| Error::Decode {
            url: url.to_string(),
            source,
        })
    }

    pub async fn search(&self, query: &str, page: u32) -> Result<Paged<AnimeSummary>> {
        let url = endpoint(
            &self.api.anilist_meta,
            &[query],
            &[("page", page.to_string())],
        )?;
        self.get_json(url).await
    }

    pub async fn anime_info(&self, anime_id: &str) -> Result<AnimeDetails> {
        let url = endpoint(&self.api.anilist_meta, &["info", anime_id], &[])?;
        self.get_json(url).await
    }

    pub async fn trending(&self, page: u32) -> Result<Paged<AnimeSummary>> {
        let url = endpoint(
            &self.api.trending_meta,
            &["trending"],
            &[("page", page.to_string())],
        )?;
        self.get_json(url).await
    }

    pub async fn popular(&self, page: u32) -> Result<Paged<AnimeSummary>> {
        let url = endpoint(
            &self.api.trending_meta,
            &["popular"],
            &[("page", page.to_string())],
        )?;
        self.get_json(url).await
    }

    pub async fn advanced_search(
        &self,
        genres: &[String],
        sort: SortOrder,
        page: u32,
    ) -> Result<Paged<AnimeSummary>> {
        let url = endpoint(
            &self.api.advanced_meta,
            &["advanced-search"],
            &[
                ("genres", json_list(genres.iter().map(String::as_str))),
                ("page", page.to_string()),
                ("sort", json_list([sort.as_str()])),
            ],
        )?;
        self.get_json(url).await
    }

    pub async fn airing_schedule(&self, page: u32) -> Result<Paged<AiringEntry>> {
        let url = endpoint(
            &self.api.advanced_meta,
            &["airing-schedule"],
            &[("page", page.to_string())],
        )?;
        self.get_json(url).await
    }

    /// Recently released episodes. The endpoint has no next-page flag, so a non-empty page
    /// is taken to mean another one may follow.
    pub async fn recent_episodes(&self, page: u32) -> Result<Paged<Episode>> {
        let url = endpoint(
            &self.api.kenjitsu,
            &["api", "animepahe", "episodes", "recent"],
            &[("page", page.to_string())],
        )?;
        let payload: RecentPayload = self.get_json(url).await?;
        Ok(Paged {
            current_page: page,
            has_next_page: !payload.data.is_empty(),
            results: payload.data,
        })
    }

    /// Latest HiAnime releases, keyed by HiAnime anime ids.
    pub async fn recent_releases(&self, page: u32) -> Result<Paged<RecentRelease>> {
        let url = endpoint(
            &self.api.consumet,
            &["anime", "zoro", "recent-episodes"],
            &[("page", page.to_string())],
        )?;
        self.get_json(url).await
    }
}

/// Joins percent-encoded path segments and query pairs onto `base`.
pub fn endpoint(base: &str, segments: &[&str], query: &[(&str, String)]) -> Result<Url> {
    let mut url = Url::parse(base)?;
    {
        let mut path = url
            .path_segments_mut()
            .map_err(|()| url::ParseError::RelativeUrlWithCannotBeABaseBase)?;
        path.pop_if_empty().extend(segments);
    }
    if !query.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (key, value) in query {
            pairs.append_pair(key, value);
        }
    }
    Ok(url)
}

fn json_list<'a>(items: impl IntoIterator<Item = &'a str>) -> String {
    let quoted: Vec<String> = items.into_iter().map(|item| format!("\"{item}\"")).collect();
    format!("[{}]", quoted.join(","))
}

#[derive(Debug, Deserialize)]
struct RecentPayload {
    #[serde(default)]
    data: Vec<Episode>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_encodes_segments_and_query() {
        let url = endpoint(
            "https://makgago.vercel.app/meta/anilist",
            &["one piece"],
            &[("page", "2".to_string())],
        )
        .unwrap();
        assert_eq!(
            url.as_str(),
            "https://makgago.vercel.app/meta/anilist/one%20piece?page=2"
        );
    }

    #[test]
    fn endpoint_tolerates_trailing_slash() {
        let url = endpoint("https://kenjitsu.vercel.app/", &["api", "hianime"], &[]).unwrap();
        assert_eq!(url.as_str(), "https://kenjitsu.vercel.app/api/hianime");
    }

    #[test]
    fn genre_lists_are_json_arrays() {
        let genres = vec!["Action".to_string(), "Slice of Life".to_string()];
        assert_eq!(
            json_list(genres.iter().map(String::as_str)),
            r#"["Action","Slice of Life"]"#
        );
        assert_eq!(json_list([SortOrder::ScoreDesc.as_str()]), r#"["SCORE_DESC"]"#);
    }
}
