//! Paginated listing views and episode-list filtering.
//!
//! A [`ListingView`] never fetches by itself. Every change hands back a [`FetchRequest`]
//! stamped with a fresh generation; the caller runs it and feeds the result to
//! [`ListingView::complete`], which drops anything that is no longer current.

use tracing::debug;

use crate::client::{MetadataClient, SortOrder};
use crate::error::Result;
use crate::generation::{Generation, GenerationCounter};
use crate::types::{AiringEntry, AnimeSummary, Episode, EpisodeList, Paged, RecentRelease};

pub const GENRES: [&str; 13] = [
    "Action",
    "Adventure",
    "Comedy",
    "Drama",
    "Fantasy",
    "Horror",
    "Mystery",
    "Romance",
    "Sci-Fi",
    "Slice of Life",
    "Sports",
    "Supernatural",
    "Thriller",
];

pub const DEFAULT_GENRE: &str = "Action";
pub const EPISODE_RANGE_SIZE: u32 = 25;

/// A listing endpoint and its filter state.
pub trait ListingQuery: Clone {
    type Item: Clone;

    async fn fetch(&self, client: &MetadataClient, page: u32) -> Result<Paged<Self::Item>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub query: String,
}

impl ListingQuery for SearchQuery {
    type Item = AnimeSummary;

    async fn fetch(&self, client: &MetadataClient, page: u32) -> Result<Paged<AnimeSummary>> {
        client.search(&self.query, page).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trending;

impl ListingQuery for Trending {
    type Item = AnimeSummary;

    async fn fetch(&self, client: &MetadataClient, page: u32) -> Result<Paged<AnimeSummary>> {
        client.trending(page).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Popular;

impl ListingQuery for Popular {
    type Item = AnimeSummary;

    async fn fetch(&self, client: &MetadataClient, page: u32) -> Result<Paged<AnimeSummary>> {
        client.popular(page).await
    }
}

/// Genre filter. At least one genre is always selected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenreQuery {
    genres: Vec<String>,
    pub sort: SortOrder,
}

impl Default for GenreQuery {
    fn default() -> Self {
        Self {
            genres: vec![DEFAULT_GENRE.to_string()],
            sort: SortOrder::default(),
        }
    }
}

impl GenreQuery {
    pub fn genres(&self) -> &[String] {
        &self.genres
    }

    /// Adds or removes `genre`. Removing the last selected genre is refused.
    pub fn toggle(&mut self, genre: &str) -> bool {
        match self.genres.iter().position(|g| g == genre) {
            Some(_) if self.genres.len() == 1 => false,
            Some(idx) => {
                self.genres.remove(idx);
                true
            }
            None => {
                self.genres.push(genre.to_string());
                true
            }
        }
    }

    pub fn reset(&mut self) {
        self.genres = vec![DEFAULT_GENRE.to_string()];
    }
}

impl ListingQuery for GenreQuery {
    type Item = AnimeSummary;

    async fn fetch(&self, client: &MetadataClient, page: u32) -> Result<Paged<AnimeSummary>> {
        client.advanced_search(&self.genres, self.sort, page).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecentEpisodes;

impl ListingQuery for RecentEpisodes {
    type Item = Episode;

    async fn fetch(&self, client: &MetadataClient, page: u32) -> Result<Paged<Episode>> {
        client.recent_episodes(page).await
    }
}

/// HiAnime's latest releases. Picks are HiAnime anime ids, not AniList ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecentReleases;

impl ListingQuery for RecentReleases {
    type Item = RecentRelease;

    async fn fetch(&self, client: &MetadataClient, page: u32) -> Result<Paged<RecentRelease>> {
        client.recent_releases(page).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule;

impl ListingQuery for Schedule {
    type Item = AiringEntry;

    async fn fetch(&self, client: &MetadataClient, page: u32) -> Result<Paged<AiringEntry>> {
        client.airing_schedule(page).await
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoadState<T> {
    Idle,
    Loading,
    Ready(Vec<T>),
    /// The request succeeded with no results. Not an error.
    Empty,
    Failed(String),
}

impl<T> LoadState<T> {
    pub fn items(&self) -> &[T] {
        match self {
            LoadState::Ready(items) => items,
            _ => &[],
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, LoadState::Loading)
    }
}

/// One page request, detached from the view so it can run without borrowing it.
#[derive(Debug, Clone)]
pub struct FetchRequest<Q> {
    pub generation: Generation,
    pub query: Q,
    pub page: u32,
}

impl<Q: ListingQuery> FetchRequest<Q> {
    pub async fn run(&self, client: &MetadataClient) -> Result<Paged<Q::Item>> {
        self.query.fetch(client, self.page).await
    }
}

pub struct ListingView<Q: ListingQuery> {
    query: Q,
    page: u32,
    has_next: bool,
    state: LoadState<Q::Item>,
    generations: GenerationCounter,
}

impl<Q: ListingQuery> ListingView<Q> {
    pub fn new(query: Q) -> Self {
        Self {
            query,
            page: 1,
            has_next: false,
            state: LoadState::Idle,
            generations: GenerationCounter::new(),
        }
    }

    pub fn query(&self) -> &Q {
        &self.query
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn state(&self) -> &LoadState<Q::Item> {
        &self.state
    }

    pub fn can_prev(&self) -> bool {
        self.page > 1
    }

    pub fn can_next(&self) -> bool {
        self.has_next
    }

    /// Refetches the current page.
    pub fn refresh(&mut self) -> FetchRequest<Q> {
        let generation = self.generations.bump();
        self.state = LoadState::Loading;
        FetchRequest {
            generation,
            query: self.query.clone(),
            page: self.page,
        }
    }

    pub fn next_page(&mut self) -> Option<FetchRequest<Q>> {
        if !self.can_next() {
            return None;
        }
        self.page += 1;
        Some(self.refresh())
    }

    pub fn prev_page(&mut self) -> Option<FetchRequest<Q>> {
        if !self.can_prev() {
            return None;
        }
        self.page -= 1;
        Some(self.refresh())
    }

    /// Changes filters or sort. Always restarts from page 1.
    pub fn update_query(&mut self, update: impl FnOnce(&mut Q)) -> FetchRequest<Q> {
        update(&mut self.query);
        self.page = 1;
        self.refresh()
    }

    /// Applies a response. Returns false when it belongs to a superseded request.
    pub fn complete(&mut self, generation: Generation, result: Result<Paged<Q::Item>>) -> bool {
        if !self.generations.is_current(generation) {
            debug!(
                stale = generation.value(),
                current = self.generations.current().value(),
                "Dropping stale listing response"
            );
            return false;
        }
        match result {
            Ok(paged) => {
                self.has_next = paged.has_next_page;
                self.state = if paged.results.is_empty() {
                    LoadState::Empty
                } else {
                    LoadState::Ready(paged.results)
                };
            }
            Err(err) => {
                self.has_next = false;
                self.state = LoadState::Failed(err.user_message());
            }
        }
        true
    }
}

/// State of an episode list view. An anime with no episodes on a provider is `Empty`.
pub fn episode_list_state(result: Result<EpisodeList>) -> LoadState<Episode> {
    match result {
        Ok(list) if list.is_empty() => LoadState::Empty,
        Ok(list) => LoadState::Ready(list.episodes),
        Err(err) => LoadState::Failed(err.user_message()),
    }
}

/// One option of the episode range selector, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpisodeRange {
    pub start: u32,
    pub end: u32,
}

impl EpisodeRange {
    pub fn contains(&self, number: u32) -> bool {
        (self.start..=self.end).contains(&number)
    }

    pub fn label(&self) -> String {
        format!("Episodes {}-{}", self.start, self.end)
    }
}

/// `1-25`, `26-50`, ... covering `total` episodes.
pub fn episode_ranges(total: u32, size: u32) -> Vec<EpisodeRange> {
    if size == 0 {
        return Vec::new();
    }
    (1..=total)
        .step_by(size as usize)
        .map(|start| EpisodeRange {
            start,
            end: (start + size - 1).min(total),
        })
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EpisodeFilter {
    pub search: String,
    pub range: Option<EpisodeRange>,
}

impl EpisodeFilter {
    /// Title (case-insensitive) or episode number substring, within the selected range.
    pub fn matches(&self, episode: &Episode) -> bool {
        let needle = self.search.trim();
        let matches_search = needle.is_empty()
            || episode.title.to_lowercase().contains(&needle.to_lowercase())
            || episode.number.to_string().contains(needle);
        let matches_range = self.range.is_none_or(|range| range.contains(episode.number));
        matches_search && matches_range
    }

    pub fn apply<'a>(&self, episodes: &'a [Episode]) -> Vec<&'a Episode> {
        episodes.iter().filter(|ep| self.matches(ep)).collect()
    }
}
