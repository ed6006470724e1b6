use std::{
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::{Parser, Subcommand};
use dialoguer::{Input, MultiSelect, Select, theme::ColorfulTheme};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use animehub::{
    MetadataClient, Settings, SourceResolver,
    catalog::{
        DEFAULT_GENRE, EPISODE_RANGE_SIZE, EpisodeFilter, EpisodeRange, FetchRequest, GENRES,
        GenreQuery, ListingQuery, ListingView, LoadState, Popular, RecentEpisodes,
        RecentReleases, Schedule, SearchQuery, Trending, episode_list_state, episode_ranges,
    },
    client::SortOrder,
    meta::plain_text,
    providers::{
        ProviderKind, StreamProvider,
        animepahe::{AnimePaheProvider, anime_id_from_episode},
        hianime::HiAnimeProvider,
    },
    proxy::image_url,
    route::{AnimeIds, WatchRoute},
    search::SuggestionBox,
    types::{
        AiringEntry, AnimeDetails, AnimeSummary, AnimeTitle, Episode, EpisodeList, RecentRelease,
        Translation,
    },
};

const DEFAULT_LOG_FILTER: &str = "animehub=warn";
const POSTER_WIDTH: u32 = 300;

#[derive(Debug, Parser)]
#[command(
    name = "animehub",
    about = "Browse anime catalogs and stream episodes through mpv.",
    version
)]
struct Cli {
    /// Prefer the dubbed version.
    #[arg(long, global = true)]
    dub: bool,

    /// Streaming provider: hianime or animepahe.
    #[arg(long, global = true)]
    provider: Option<String>,

    /// Player command, split shell-style.
    #[arg(long, global = true, value_name = "CMD")]
    player: Option<String>,

    #[arg(short = 'e', long, value_name = "EPISODE")]
    episode: Option<u32>,

    /// Skip the search and open this AniList id.
    #[arg(long, value_name = "ID")]
    anime_id: Option<String>,

    /// Open a watch route such as `/watch/hianime/{episodeId}?animeId={id}`.
    #[arg(long, value_name = "ROUTE")]
    watch: Option<String>,

    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Print the effective configuration and exit.
    #[arg(long)]
    print_config: bool,

    #[command(subcommand)]
    command: Option<Command>,

    #[arg(value_name = "QUERY")]
    query: Vec<String>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// What is trending right now.
    Trending,
    /// All-time popular anime.
    Popular,
    /// Advanced search by genre.
    Genres {
        #[arg(long = "genre", value_name = "GENRE")]
        genres: Vec<String>,
        #[arg(long, value_name = "SORT")]
        sort: Option<String>,
    },
    /// Latest releases on the selected provider.
    Recent,
    /// Upcoming episodes and their countdowns.
    Schedule,
}

impl Cli {
    fn apply(&self, settings: &mut Settings) {
        if self.dub {
            settings.providers.translation = Translation::Dub;
        }
        if let Some(provider) = &self.provider {
            settings.providers.default = provider.clone();
        }
        if let Some(player) = &self.player {
            settings.player.command = player.clone();
        }
    }
}

/// What the viewer picked from a listing.
enum Pick {
    Anime {
        id: String,
        title: Option<AnimeTitle>,
    },
    /// A show keyed by the provider's own anime id.
    ProviderAnime {
        provider: ProviderKind,
        id: String,
        start: Start,
    },
    Episode {
        provider: ProviderKind,
        episode: Episode,
    },
}

/// What to fetch episodes for.
#[derive(Debug, Clone, PartialEq)]
enum Show {
    AniList {
        id: String,
        title: Option<AnimeTitle>,
    },
    Provider {
        id: String,
    },
    /// A lone episode with no listing behind it.
    Episode {
        episode: Episode,
        title: Option<AnimeTitle>,
    },
}

impl Show {
    fn title(&self) -> Option<AnimeTitle> {
        match self {
            Show::AniList { title, .. } | Show::Episode { title, .. } => title.clone(),
            Show::Provider { .. } => None,
        }
    }
}

/// Where playback starts inside an episode list.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Start {
    Prompt,
    Number(u32),
    Id(String),
    Latest,
}

impl From<Option<u32>> for Start {
    fn from(episode: Option<u32>) -> Self {
        episode.map_or(Start::Prompt, Start::Number)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let result = run().await;
    if let Err(err) = &result {
        eprintln!("error: {err:?}");
    }
    result
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let mut settings =
        Settings::load(cli.config.as_deref()).context("failed to load configuration")?;
    cli.apply(&mut settings);
    if cli.print_config {
        print!(
            "{}",
            settings
                .to_toml()
                .context("failed to render configuration")?
        );
        return Ok(());
    }

    let client = Arc::new(
        MetadataClient::new(settings.api.clone()).context("failed to build HTTP client")?,
    );
    let provider: ProviderKind = settings.providers.default.parse()?;

    if let Some(route) = &cli.watch {
        let route = WatchRoute::parse(route).context("invalid watch route")?;
        let (provider, show, start) = watch_target(route, cli.anime_id.as_deref(), provider);
        return watch_on(&settings, &client, provider, show, start).await;
    }

    if let Some(anime_id) = &cli.anime_id {
        let show = Show::AniList {
            id: anime_id.clone(),
            title: None,
        };
        return watch_on(&settings, &client, provider, show, Start::from(cli.episode)).await;
    }

    let pick = match &cli.command {
        Some(command) => browse_command(&client, command, provider).await?,
        None => search_flow(&client, &settings, &cli.query).await?,
    };
    match pick {
        None => Ok(()),
        Some(Pick::Anime { id, title }) => {
            let provider = if cli.episode.is_some() {
                provider
            } else {
                match show_details(&client, &id, provider).await? {
                    Some(provider) => provider,
                    None => {
                        println!("Cancelled.");
                        return Ok(());
                    }
                }
            };
            let show = Show::AniList { id, title };
            watch_on(&settings, &client, provider, show, Start::from(cli.episode)).await
        }
        Some(Pick::ProviderAnime {
            provider,
            id,
            start,
        }) => watch_on(&settings, &client, provider, Show::Provider { id }, start).await,
        Some(Pick::Episode { provider, episode }) => {
            let title = AnimeTitle {
                english: Some(episode.title.clone()),
                ..Default::default()
            };
            let show = Show::Episode {
                episode,
                title: Some(title),
            };
            watch_on(&settings, &client, provider, show, Start::Latest).await
        }
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Provider, show and start episode named by a watch route. The route's provider segment
/// wins over the configured one.
fn watch_target(
    route: WatchRoute,
    fallback_anime_id: Option<&str>,
    configured: ProviderKind,
) -> (ProviderKind, Show, Start) {
    let provider = route.provider.unwrap_or(configured);
    let anime_id = route
        .anime_id
        .clone()
        .or_else(|| fallback_anime_id.map(str::to_string));
    let show = match (anime_id, route.anime_ids) {
        (Some(id), AnimeIds::AniList) => Show::AniList { id, title: None },
        (Some(id), AnimeIds::AnimePahe) => Show::Provider { id },
        (None, _) => {
            let episode = Episode {
                episode_id: route.episode_id.clone(),
                title: route.episode_id.clone(),
                ..Default::default()
            };
            return (provider, Show::Episode { episode, title: None }, Start::Latest);
        }
    };
    (provider, show, Start::Id(route.episode_id))
}

async fn watch_on(
    settings: &Settings,
    client: &Arc<MetadataClient>,
    provider: ProviderKind,
    show: Show,
    start: Start,
) -> Result<()> {
    let quality = settings.providers.quality_preference.clone();
    match provider {
        ProviderKind::HiAnime => {
            let provider = HiAnimeProvider::new(client.clone(), &settings.providers.hianime);
            watch_anime(settings, &SourceResolver::new(provider, quality), show, start).await
        }
        ProviderKind::AnimePahe => {
            let provider = AnimePaheProvider::new(client.clone(), &settings.providers.animepahe);
            watch_anime(settings, &SourceResolver::new(provider, quality), show, start).await
        }
    }
}

async fn browse_command(
    client: &MetadataClient,
    command: &Command,
    provider: ProviderKind,
) -> Result<Option<Pick>> {
    let anime = |item: Option<AnimeSummary>| {
        item.map(|anime| Pick::Anime {
            id: anime.id,
            title: Some(anime.title),
        })
    };
    let pick = match command {
        Command::Trending => anime(browse(client, Trending, "Trending", AnimeSummary::label).await?),
        Command::Popular => anime(browse(client, Popular, "Popular", AnimeSummary::label).await?),
        Command::Genres { genres, sort } => {
            let Some(query) = genre_query(genres, sort.as_deref())? else {
                println!("Cancelled.");
                return Ok(None);
            };
            anime(browse_genres(client, query).await?)
        }
        Command::Recent => match provider {
            ProviderKind::HiAnime => browse(
                client,
                RecentReleases,
                "Recent HiAnime releases",
                RecentRelease::label,
            )
            .await?
            .map(|release| Pick::ProviderAnime {
                provider,
                id: release.id,
                start: Start::Latest,
            }),
            ProviderKind::AnimePahe => browse(
                client,
                RecentEpisodes,
                "Recent AnimePahe episodes",
                |ep: &Episode| format!("{} · Episode {}", ep.title, ep.number),
            )
            .await?
            .map(recent_pahe_pick),
        },
        Command::Schedule => {
            let now = Utc::now();
            browse(client, Schedule, "Airing schedule", |entry: &AiringEntry| {
                let episode = entry
                    .episode
                    .map(|n| format!("Episode {n}"))
                    .unwrap_or_else(|| "Next episode".to_string());
                let day = entry
                    .weekday()
                    .map(|day| format!("{day} · "))
                    .unwrap_or_default();
                format!(
                    "{day}{} · {episode} · {}",
                    entry.title.display(),
                    entry.countdown(now)
                )
            })
            .await?
            .map(|entry| Pick::Anime {
                id: entry.id,
                title: Some(entry.title),
            })
        }
    };
    Ok(pick)
}

/// Recent AnimePahe episodes open their show's full listing when the id names one.
fn recent_pahe_pick(episode: Episode) -> Pick {
    match anime_id_from_episode(&episode.episode_id) {
        Some(id) => Pick::ProviderAnime {
            provider: ProviderKind::AnimePahe,
            id: id.to_string(),
            start: Start::Id(episode.episode_id.clone()),
        },
        None => Pick::Episode {
            provider: ProviderKind::AnimePahe,
            episode,
        },
    }
}

/// Quick suggestions first; the full paginated listing on request.
async fn search_flow(
    client: &MetadataClient,
    settings: &Settings,
    query: &[String],
) -> Result<Option<Pick>> {
    let theme = theme();
    let query = if query.is_empty() {
        Input::<String>::with_theme(&theme)
            .with_prompt("Search anime")
            .interact_text()?
    } else {
        query.join(" ")
    };

    let mut suggestions = SuggestionBox::from_settings(&settings.search);
    let now = Instant::now();
    suggestions.input(&query, now);
    let Some(request) = suggestions.poll(now + settings.search.debounce()) else {
        println!("No query provided. Use `animehub <name>` or `animehub trending`.");
        return Ok(None);
    };
    let result = client.search(&request.query, 1).await;
    if let Err(err) = &result {
        debug!(error = %err, "Suggestion search failed; falling back to the full listing");
    }
    suggestions.complete(request.generation, result);

    if suggestions.is_open() {
        let mut labels: Vec<String> = suggestions
            .results()
            .iter()
            .map(AnimeSummary::label)
            .collect();
        let count = labels.len();
        if suggestions.has_more() {
            labels.push(format!("View all results for \"{}\"", request.query));
        }
        let selection = Select::with_theme(&theme)
            .with_prompt("Select a show (Esc to cancel)")
            .items(&labels)
            .default(0)
            .interact_opt()?;
        let Some(idx) = selection else {
            println!("Cancelled.");
            return Ok(None);
        };
        if idx < count {
            let anime = suggestions.results()[idx].clone();
            suggestions.dismiss();
            return Ok(Some(Pick::Anime {
                id: anime.id,
                title: Some(anime.title),
            }));
        }
        suggestions.dismiss();
    }

    let listing = SearchQuery {
        query: request.query,
    };
    let prompt = format!("Results for \"{}\"", listing.query);
    Ok(browse(client, listing, &prompt, AnimeSummary::label)
        .await?
        .map(|anime| Pick::Anime {
            id: anime.id,
            title: Some(anime.title),
        }))
}

/// How a listing picker was left.
enum Browse<T> {
    Picked(T),
    Cancelled,
    Filters,
}

enum ListingEntry {
    Item(usize),
    Previous,
    Next,
    Filters,
}

/// Paginated picker over any listing. `None` when the viewer backs out.
async fn browse<Q: ListingQuery>(
    client: &MetadataClient,
    query: Q,
    prompt: &str,
    label: impl Fn(&Q::Item) -> String,
) -> Result<Option<Q::Item>> {
    let mut view = ListingView::new(query);
    let request = view.refresh();
    match browse_view(client, &mut view, Some(request), prompt, &label, false).await? {
        Browse::Picked(item) => Ok(Some(item)),
        Browse::Cancelled | Browse::Filters => Ok(None),
    }
}

async fn browse_view<Q: ListingQuery>(
    client: &MetadataClient,
    view: &mut ListingView<Q>,
    mut request: Option<FetchRequest<Q>>,
    prompt: &str,
    label: impl Fn(&Q::Item) -> String,
    filters: bool,
) -> Result<Browse<Q::Item>> {
    let theme = theme();
    loop {
        if let Some(request) = request.take() {
            println!("Loading page {}...", request.page);
            let result = request.run(client).await;
            view.complete(request.generation, result);
        }
        match view.state() {
            LoadState::Ready(items) => {
                let mut entries: Vec<(String, ListingEntry)> = items
                    .iter()
                    .enumerate()
                    .map(|(idx, item)| (label(item), ListingEntry::Item(idx)))
                    .collect();
                if view.can_prev() {
                    entries.push(("« Previous page".to_string(), ListingEntry::Previous));
                }
                if view.can_next() {
                    entries.push(("Next page »".to_string(), ListingEntry::Next));
                }
                if filters {
                    entries.push(("Change filters".to_string(), ListingEntry::Filters));
                }
                let labels: Vec<&str> = entries.iter().map(|(label, _)| label.as_str()).collect();
                let selection = Select::with_theme(&theme)
                    .with_prompt(format!("{prompt} · page {} (Esc to cancel)", view.page()))
                    .items(&labels)
                    .default(0)
                    .interact_opt()?;
                let Some(idx) = selection else {
                    println!("Cancelled.");
                    return Ok(Browse::Cancelled);
                };
                request = match entries[idx].1 {
                    ListingEntry::Item(item) => return Ok(Browse::Picked(items[item].clone())),
                    ListingEntry::Previous => view.prev_page(),
                    ListingEntry::Next => view.next_page(),
                    ListingEntry::Filters => return Ok(Browse::Filters),
                };
            }
            LoadState::Empty if filters => {
                println!("No results found.");
                return Ok(Browse::Filters);
            }
            LoadState::Empty => {
                println!("No results found.");
                return Ok(Browse::Cancelled);
            }
            LoadState::Failed(message) => {
                println!("{message}");
                if !confirm_retry()? {
                    return Ok(Browse::Cancelled);
                }
                request = Some(view.refresh());
            }
            LoadState::Idle | LoadState::Loading => request = Some(view.refresh()),
        }
    }
}

/// Genre listing whose filters can be changed without leaving it.
async fn browse_genres(
    client: &MetadataClient,
    query: GenreQuery,
) -> Result<Option<AnimeSummary>> {
    let mut view = ListingView::new(query);
    let mut request = Some(view.refresh());
    loop {
        let prompt = format!(
            "{} ({})",
            view.query().genres().join(", "),
            view.query().sort.label()
        );
        match browse_view(client, &mut view, request.take(), &prompt, AnimeSummary::label, true)
            .await?
        {
            Browse::Picked(anime) => return Ok(Some(anime)),
            Browse::Cancelled => return Ok(None),
            Browse::Filters => request = edit_genre_filters(&mut view)?,
        }
    }
}

/// `None` when the viewer backed out of the filter menu.
fn edit_genre_filters(
    view: &mut ListingView<GenreQuery>,
) -> Result<Option<FetchRequest<GenreQuery>>> {
    let theme = theme();
    let selection = Select::with_theme(&theme)
        .with_prompt("Filters")
        .items(&["Genres", "Sort order", "Reset genres"])
        .default(0)
        .interact_opt()?;
    let request = match selection {
        Some(0) => {
            let current = view.query().genres();
            let defaults: Vec<bool> = GENRES
                .iter()
                .map(|genre| current.iter().any(|g| g == genre))
                .collect();
            let Some(picked) = MultiSelect::with_theme(&theme)
                .with_prompt("Genres (Space to toggle, Enter to confirm)")
                .items(&GENRES)
                .defaults(&defaults)
                .interact_opt()?
            else {
                return Ok(None);
            };
            if picked.is_empty() {
                println!("Keep at least one genre selected.");
                return Ok(None);
            }
            let wanted: Vec<&str> = picked.into_iter().map(|idx| GENRES[idx]).collect();
            view.update_query(|query| select_genres(query, &wanted))
        }
        Some(1) => {
            let labels: Vec<&str> = SortOrder::ALL.iter().map(|order| order.label()).collect();
            let current = view.query().sort;
            let default = SortOrder::ALL
                .iter()
                .position(|order| *order == current)
                .unwrap_or(0);
            let Some(idx) = Select::with_theme(&theme)
                .with_prompt("Sort by")
                .items(&labels)
                .default(default)
                .interact_opt()?
            else {
                return Ok(None);
            };
            let sort = SortOrder::ALL[idx];
            view.update_query(|query| query.sort = sort)
        }
        Some(_) => view.update_query(GenreQuery::reset),
        None => return Ok(None),
    };
    Ok(Some(request))
}

/// Makes `wanted` the selection. Genres are added before stale ones are dropped so the
/// query never goes empty.
fn select_genres(query: &mut GenreQuery, wanted: &[&str]) {
    for genre in wanted {
        if !query.genres().iter().any(|g| g == genre) {
            query.toggle(genre);
        }
    }
    let stale: Vec<String> = query
        .genres()
        .iter()
        .filter(|g| !wanted.contains(&g.as_str()))
        .cloned()
        .collect();
    for genre in stale {
        query.toggle(&genre);
    }
}

fn confirm_retry() -> Result<bool> {
    let selection = Select::with_theme(&theme())
        .with_prompt("What now?")
        .items(&["Retry", "Back"])
        .default(0)
        .interact_opt()?;
    Ok(selection == Some(0))
}

/// Builds the genre filter from flags, prompting when none were given. `None` on Esc.
fn genre_query(requested: &[String], sort: Option<&str>) -> Result<Option<GenreQuery>> {
    let genres = if requested.is_empty() {
        let defaults: Vec<bool> = GENRES.iter().map(|g| *g == DEFAULT_GENRE).collect();
        let selection = MultiSelect::with_theme(&theme())
            .with_prompt("Genres (Space to toggle, Enter to confirm)")
            .items(&GENRES)
            .defaults(&defaults)
            .interact_opt()?;
        let Some(selection) = selection else {
            return Ok(None);
        };
        selection.into_iter().map(|idx| GENRES[idx]).collect()
    } else {
        requested
            .iter()
            .map(|genre| canonical_genre(genre))
            .collect::<Result<Vec<_>>>()?
    };

    let mut query = GenreQuery::default();
    if !genres.is_empty() {
        select_genres(&mut query, &genres);
    }
    query.sort = match sort {
        Some(sort) => parse_sort(sort)?,
        None => SortOrder::default(),
    };
    Ok(Some(query))
}

fn canonical_genre(genre: &str) -> Result<&'static str> {
    GENRES
        .iter()
        .copied()
        .find(|known| known.eq_ignore_ascii_case(genre.trim()))
        .with_context(|| format!("unknown genre '{genre}' (expected one of: {})", GENRES.join(", ")))
}

fn parse_sort(sort: &str) -> Result<SortOrder> {
    let wanted = sort.trim();
    SortOrder::ALL
        .into_iter()
        .find(|order| {
            order.as_str().eq_ignore_ascii_case(wanted) || order.label().eq_ignore_ascii_case(wanted)
        })
        .with_context(|| format!("unknown sort order '{sort}'"))
}

/// Synopsis and facts for a show, then the provider to watch it on. `None` on Back.
async fn show_details(
    client: &MetadataClient,
    anime_id: &str,
    configured: ProviderKind,
) -> Result<Option<ProviderKind>> {
    println!("Loading details...");
    match client.anime_info(anime_id).await {
        Ok(details) => print_details(&details),
        Err(err) => {
            debug!(error = %err, "Anime details unavailable");
            println!("{}", err.user_message());
        }
    }
    let mut labels: Vec<String> = ProviderKind::ALL
        .iter()
        .map(|kind| format!("Watch on {kind}"))
        .collect();
    labels.push("Back".to_string());
    let default = ProviderKind::ALL
        .iter()
        .position(|kind| *kind == configured)
        .unwrap_or(0);
    let selection = Select::with_theme(&theme())
        .with_prompt("Episodes from")
        .items(&labels)
        .default(default)
        .interact_opt()?;
    Ok(selection.and_then(|idx| ProviderKind::ALL.get(idx).copied()))
}

fn print_details(details: &AnimeDetails) {
    let summary = &details.summary;
    println!();
    println!("{}", summary.title.display());
    let facts: Vec<String> = [
        summary.kind.clone(),
        summary.status.clone(),
        summary.release_date.map(|year| year.to_string()),
        summary.total_episodes.map(|eps| format!("{eps} eps")),
        details.duration.map(|min| format!("{min} min")),
        summary.rating.map(|rating| format!("{rating}%")),
    ]
    .into_iter()
    .flatten()
    .collect();
    if !facts.is_empty() {
        println!("{}", facts.join(" · "));
    }
    if !summary.genres.is_empty() {
        println!("Genres: {}", summary.genres.join(", "));
    }
    if !details.studios.is_empty() {
        println!("Studios: {}", details.studios.join(", "));
    }
    if let Some(season) = &details.season {
        println!("Season: {season}");
    }
    println!(
        "Poster: {}",
        image_url(summary.image_or_placeholder(), Some(POSTER_WIDTH))
    );
    let synopsis = summary.description.as_deref().map(plain_text);
    if let Some(synopsis) = synopsis.filter(|text| !text.is_empty()) {
        println!();
        println!("{synopsis}");
    }
    println!();
}

/// Episode listing for `show` plus the route template its episodes are shared under.
async fn fetch_show<P: StreamProvider>(
    provider: &P,
    show: &Show,
) -> (WatchRoute, animehub::Result<EpisodeList>) {
    let kind = provider.kind();
    match show {
        Show::AniList { id, .. } => (
            WatchRoute::new(kind, AnimeIds::AniList, Some(id.as_str())),
            provider.fetch_episodes(id).await,
        ),
        Show::Provider { id } => match provider.fetch_anime(id).await {
            Ok(anime) => {
                let route = match kind {
                    ProviderKind::AnimePahe => {
                        WatchRoute::new(kind, AnimeIds::AnimePahe, Some(id.as_str()))
                    }
                    ProviderKind::HiAnime => {
                        WatchRoute::new(kind, AnimeIds::AniList, anime.anilist_id.as_deref())
                    }
                };
                let mut episodes = anime.episodes;
                if episodes.title.is_none() {
                    let title = anime.details.summary.title;
                    episodes.title = title.display_opt().is_some().then_some(title);
                }
                (route, Ok(episodes))
            }
            Err(err) => (WatchRoute::new(kind, AnimeIds::AniList, None), Err(err)),
        },
        Show::Episode { episode, title } => (
            WatchRoute::new(kind, AnimeIds::AniList, None),
            Ok(EpisodeList {
                episodes: vec![episode.clone()],
                title: title.clone(),
                image: None,
            }),
        ),
    }
}

async fn watch_anime<P: StreamProvider>(
    settings: &Settings,
    resolver: &SourceResolver<P>,
    show: Show,
    start: Start,
) -> Result<()> {
    let provider = resolver.provider().kind();
    if !matches!(show, Show::Episode { .. }) {
        println!("Fetching episodes from {provider}...");
    }
    let (route, result) = loop {
        let (route, result) = fetch_show(resolver.provider(), &show).await;
        match result {
            Err(err) if err.is_recoverable() => {
                println!("{}", err.user_message());
                if !confirm_retry()? {
                    return Ok(());
                }
            }
            result => break (route, result),
        }
    };
    let title = result
        .as_ref()
        .ok()
        .and_then(|list| list.title.clone())
        .or_else(|| show.title());
    let episodes = match episode_list_state(result) {
        LoadState::Ready(episodes) => episodes,
        LoadState::Empty => {
            println!("No episodes available on {provider}.");
            return Ok(());
        }
        LoadState::Failed(message) => bail!("{message}"),
        LoadState::Idle | LoadState::Loading => return Ok(()),
    };
    let shown = title.as_ref().map_or("this anime", AnimeTitle::display);
    if episodes.len() > 1 {
        println!("Found {} episodes for {shown}.", episodes.len());
    }

    let start = match start {
        Start::Id(id) => match episodes.iter().position(|ep| ep.episode_id == id) {
            Some(idx) => Some(idx),
            None => {
                println!("Episode '{id}' is not listed. Showing episode list.");
                choose_episode(&episodes, 0)?
            }
        },
        Start::Number(number) => match episodes.iter().position(|ep| ep.number == number) {
            Some(idx) => Some(idx),
            None => {
                println!("Episode {number} does not exist for {shown}. Showing episode list.");
                choose_episode(&episodes, 0)?
            }
        },
        Start::Latest => episodes.len().checked_sub(1),
        Start::Prompt => choose_episode(&episodes, 0)?,
    };
    let Some(start) = start else {
        println!("Cancelled.");
        return Ok(());
    };
    watch_episodes(settings, resolver, route, episodes, start, title).await
}

/// Episode picker with range buckets and title search for long series.
fn choose_episode(episodes: &[Episode], current: usize) -> Result<Option<usize>> {
    let theme = theme();
    let current_id = episodes.get(current).map(|ep| ep.episode_id.as_str());
    let mut filter = EpisodeFilter::default();

    if episodes.len() > EPISODE_RANGE_SIZE as usize {
        let last = episodes.iter().map(|ep| ep.number).max().unwrap_or(0);
        let ranges = episode_ranges(last, EPISODE_RANGE_SIZE);
        let mut labels = vec!["Search by title or number".to_string()];
        labels.extend(ranges.iter().map(EpisodeRange::label));
        let default = episodes
            .get(current)
            .and_then(|ep| ranges.iter().position(|range| range.contains(ep.number)))
            .map_or(1, |idx| idx + 1);
        let selection = Select::with_theme(&theme)
            .with_prompt("Episodes (Esc to cancel)")
            .items(&labels)
            .default(default.min(labels.len() - 1))
            .interact_opt()?;
        let Some(idx) = selection else {
            return Ok(None);
        };
        if idx == 0 {
            filter.search = Input::<String>::with_theme(&theme)
                .with_prompt("Search episodes")
                .allow_empty(true)
                .interact_text()?;
        } else {
            filter.range = ranges.get(idx - 1).copied();
        }
    }

    let visible = filter.apply(episodes);
    if visible.is_empty() {
        println!("No episodes match.");
        return Ok(None);
    }
    let labels: Vec<String> = visible.iter().map(|ep| ep.label()).collect();
    let default = visible
        .iter()
        .position(|ep| Some(ep.episode_id.as_str()) == current_id)
        .unwrap_or(0);
    let selection = Select::with_theme(&theme)
        .with_prompt("Episode to play (Enter to select, Esc to cancel)")
        .items(&labels)
        .default(default)
        .interact_opt()?;
    Ok(selection.and_then(|idx| {
        episodes
            .iter()
            .position(|ep| ep.episode_id == visible[idx].episode_id)
    }))
}

#[cfg(unix)]
async fn watch_episodes<P: StreamProvider>(
    settings: &Settings,
    resolver: &SourceResolver<P>,
    route: WatchRoute,
    episodes: Vec<Episode>,
    start: usize,
    title: Option<AnimeTitle>,
) -> Result<()> {
    session::play(settings, resolver, route, episodes, start, title).await
}

#[cfg(not(unix))]
async fn watch_episodes<P: StreamProvider>(
    _settings: &Settings,
    _resolver: &SourceResolver<P>,
    _route: WatchRoute,
    _episodes: Vec<Episode>,
    _start: usize,
    _title: Option<AnimeTitle>,
) -> Result<()> {
    bail!("Playback drives mpv over a Unix socket and is not available on this platform.")
}

/// The watch loop: mpv events, controller timers and the command menu in one task.
#[cfg(unix)]
mod session {
    use std::{sync::Arc, thread, time::Instant};

    use anyhow::{Context, Result};
    use tokio::sync::{mpsc, watch};
    use tracing::{debug, info, warn};

    use animehub::{
        ResolvedSource, Settings, SourceResolver, Variant,
        meta::compute_meta_tags,
        player::{
            ControllerOptions, MpvController, PlayerStatus, format_time,
            mpv::{MpvHandle, MpvProcess, Signal, translate},
        },
        providers::StreamProvider,
        route::WatchRoute,
        types::{AnimeTitle, Episode, Translation},
    };

    use super::{IDLE_TICK, choose_episode, theme};
    use dialoguer::Select;

    #[derive(Debug, Clone)]
    enum MenuCommand {
        Play(usize),
        ToggleTranslation,
        Quality(String),
        Subtitle(String),
        SkipIntro,
        SkipOutro,
        Download,
        Quit,
    }

    /// What the command menu needs to draw itself.
    #[derive(Debug, Clone, Default)]
    struct MenuState {
        episodes: Arc<[Episode]>,
        current: usize,
        status: PlayerStatus,
        position: String,
        translation: Translation,
        qualities: Vec<String>,
        quality: Option<String>,
        subtitles: Vec<String>,
        subtitle: Option<String>,
        has_intro: bool,
        has_outro: bool,
        has_download: bool,
    }

    #[derive(Debug, Clone, Copy)]
    enum MenuEntry {
        Next,
        Previous,
        Episodes,
        Translation,
        Quality,
        Subtitles,
        SkipIntro,
        SkipOutro,
        Download,
        Quit,
    }

    struct Session<'a, P: StreamProvider> {
        resolver: &'a SourceResolver<P>,
        handle: MpvHandle,
        controller: MpvController,
        route: WatchRoute,
        episodes: Arc<[Episode]>,
        title: Option<AnimeTitle>,
        current: usize,
        variant: Variant,
        ended: bool,
        last_status: PlayerStatus,
        menu: watch::Sender<MenuState>,
    }

    pub(super) async fn play<P: StreamProvider>(
        settings: &Settings,
        resolver: &SourceResolver<P>,
        route: WatchRoute,
        episodes: Vec<Episode>,
        start: usize,
        title: Option<AnimeTitle>,
    ) -> Result<()> {
        let window_title = title
            .as_ref()
            .map_or("animehub", AnimeTitle::display)
            .to_string();
        let mut process = MpvProcess::spawn(&settings.player.command, &window_title)
            .await
            .context("failed to start the player")?;
        let options = ControllerOptions::try_from(&settings.player)?;
        let controller = MpvController::new(process.sink(), process.engine(), options);

        let (menu, menu_state) = watch::channel(MenuState::default());
        let (command_tx, commands) = mpsc::channel(8);
        let mut session = Session {
            resolver,
            handle: process.handle(),
            controller,
            route,
            episodes: episodes.into(),
            title,
            current: start,
            variant: Variant::new(settings.providers.translation),
            ended: false,
            last_status: PlayerStatus::Idle,
            menu,
        };
        session.load(start).await;
        spawn_menu(menu_state, command_tx);

        let result = session.run(&mut process, commands).await;
        session.controller.detach();
        process.quit();
        println!("Player closed.");
        result
    }

    impl<P: StreamProvider> Session<'_, P> {
        async fn run(
            &mut self,
            process: &mut MpvProcess,
            mut commands: mpsc::Receiver<MenuCommand>,
        ) -> Result<()> {
            loop {
                let deadline = self
                    .controller
                    .next_deadline()
                    .unwrap_or_else(|| Instant::now() + IDLE_TICK);
                tokio::select! {
                    event = process.next_event() => {
                        let Some(event) = event else {
                            info!("mpv exited");
                            break;
                        };
                        let signals = translate(event, self.controller.sink_mut());
                        if !self.apply_signals(signals) {
                            break;
                        }
                    }
                    command = commands.recv() => {
                        let Some(command) = command else {
                            break;
                        };
                        if !self.apply_command(command).await? {
                            break;
                        }
                    }
                    _ = tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)) => {
                        self.controller.poll_timers(Instant::now());
                    }
                }
                self.advance_if_ended().await;
                self.report_status();
                self.publish();
            }
            Ok(())
        }

        async fn load(&mut self, index: usize) {
            let Some(episode) = self.episodes.get(index).cloned() else {
                return;
            };
            self.current = index;
            self.ended = false;
            println!("Loading {}...", episode.label().trim());
            self.controller.loading();
            match self
                .resolver
                .resolve(&episode.episode_id, &self.variant)
                .await
            {
                Ok(resolved) => {
                    self.handle.set_headers(&resolved.descriptor().headers);
                    self.controller.attach(resolved, Instant::now());
                    let meta = compute_meta_tags(&episode, self.title.as_ref());
                    meta.apply(self.controller.sink_mut());
                    println!("{}", meta.description);
                    if self.route.anime_id.is_some() {
                        let link = self.route.episode_url(&episode.episode_id);
                        println!("Reopen with: animehub --watch '{link}'");
                    }
                }
                Err(err) => self.controller.fail_load(&err),
            }
            self.report_status();
            self.publish();
        }

        async fn switch_translation(&mut self) {
            let Some(episode) = self.episodes.get(self.current).cloned() else {
                return;
            };
            let requested = self.variant.translation.toggled();
            let served = self
                .resolver
                .provider()
                .version_for(&episode.episode_id, requested);
            if served != requested {
                println!(
                    "{} is not offered for this episode on {}.",
                    requested.label(),
                    self.resolver.provider().kind()
                );
                return;
            }
            let variant = Variant {
                translation: requested,
                ..self.variant.clone()
            };
            self.controller.begin_variant_switch();
            self.controller.loading();
            match self.resolver.resolve(&episode.episode_id, &variant).await {
                Ok(resolved) => {
                    self.handle.set_headers(&resolved.descriptor().headers);
                    self.controller.switch_variant(resolved, Instant::now());
                    self.variant = variant;
                }
                Err(err) => self.controller.fail_load(&err),
            }
        }

        fn switch_quality(&mut self, quality: &str) {
            let Some(source) = self.controller.source() else {
                return;
            };
            match source.select_quality(quality) {
                Ok(resolved) => {
                    self.controller.begin_variant_switch();
                    self.controller.switch_variant(resolved, Instant::now());
                    self.variant = self.variant.clone().with_quality(quality);
                }
                Err(err) => println!("{err}"),
            }
        }

        fn apply_signals(&mut self, signals: Vec<Signal>) -> bool {
            let now = Instant::now();
            for signal in signals {
                match signal {
                    Signal::Media(event) => self.controller.handle_media_event(event, now),
                    Signal::Stream(event) => self.controller.handle_stream_event(event),
                    Signal::Key(key) => {
                        let outcome = self.controller.handle_key(&key);
                        debug!(?key, handled = outcome.handled, "Player key");
                    }
                    Signal::Pointer => self.controller.pointer_activity(now),
                    Signal::Quit => return false,
                }
            }
            true
        }

        /// Returns false when the viewer asked to quit.
        async fn apply_command(&mut self, command: MenuCommand) -> Result<bool> {
            let now = Instant::now();
            match command {
                MenuCommand::Play(index) => self.load(index).await,
                MenuCommand::ToggleTranslation => self.switch_translation().await,
                MenuCommand::Quality(quality) => self.switch_quality(&quality),
                MenuCommand::Subtitle(language) => {
                    self.controller.select_subtitle(Some(language.as_str()), now)
                }
                MenuCommand::SkipIntro => {
                    if !self.controller.skip_intro() {
                        println!("This episode has no intro marker.");
                    }
                }
                MenuCommand::SkipOutro => {
                    if !self.controller.skip_outro() {
                        println!("This episode has no outro marker.");
                    }
                }
                MenuCommand::Download => {
                    if let Some(url) = self.controller.source().and_then(ResolvedSource::download)
                    {
                        open::that(url)
                            .with_context(|| format!("failed to open download link {url}"))?;
                    }
                }
                MenuCommand::Quit => return Ok(false),
            }
            Ok(true)
        }

        async fn advance_if_ended(&mut self) {
            if self.controller.status() != PlayerStatus::Ended || self.ended {
                return;
            }
            self.ended = true;
            let next = self.current + 1;
            if next < self.episodes.len() {
                self.load(next).await;
            } else {
                println!("No further episodes found.");
            }
        }

        fn report_status(&mut self) {
            let status = self.controller.status();
            if status == self.last_status {
                return;
            }
            self.last_status = status;
            if status == PlayerStatus::Error {
                let message = self.controller.error().unwrap_or("Playback failed.");
                warn!(%message, "Playback error");
                println!("Error: {message}");
            }
        }

        fn position(&self) -> String {
            let state = self.controller.state();
            if !state.has_duration() {
                return format_time(state.current_time);
            }
            format!(
                "{} / {} ({:.0}%)",
                format_time(state.current_time),
                format_time(state.duration),
                state.progress() * 100.0
            )
        }

        fn publish(&self) {
            let source = self.controller.source();
            self.menu.send_replace(MenuState {
                episodes: self.episodes.clone(),
                current: self.current,
                status: self.controller.status(),
                position: self.position(),
                translation: self.variant.translation,
                qualities: source.map(ResolvedSource::qualities).unwrap_or_default(),
                quality: source.map(|s| s.quality().to_string()),
                subtitles: self
                    .controller
                    .subtitle_tracks()
                    .iter()
                    .map(|track| track.lang.clone())
                    .collect(),
                subtitle: self.controller.active_subtitle().map(|t| t.lang.clone()),
                has_intro: source.and_then(ResolvedSource::intro).is_some(),
                has_outro: source.and_then(ResolvedSource::outro).is_some(),
                has_download: source.and_then(ResolvedSource::download).is_some(),
            });
        }
    }

    /// Runs the blocking command menu on its own thread until the viewer quits or the
    /// watch loop goes away.
    fn spawn_menu(state: watch::Receiver<MenuState>, commands: mpsc::Sender<MenuCommand>) {
        thread::spawn(move || {
            loop {
                let snapshot = state.borrow().clone();
                let command = match prompt_command(&snapshot) {
                    Ok(Some(command)) => command,
                    Ok(None) => continue,
                    Err(err) => {
                        warn!(error = %err, "Command menu failed");
                        MenuCommand::Quit
                    }
                };
                let quit = matches!(command, MenuCommand::Quit);
                if commands.blocking_send(command).is_err() || quit {
                    break;
                }
            }
        });
    }

    /// `Ok(None)` when a sub-menu was cancelled; Esc on the main menu quits.
    fn prompt_command(state: &MenuState) -> Result<Option<MenuCommand>> {
        let theme = theme();
        let mut entries: Vec<(String, MenuEntry)> = Vec::new();
        if state.current + 1 < state.episodes.len() {
            entries.push(("Next episode".to_string(), MenuEntry::Next));
        }
        if state.current > 0 {
            entries.push(("Previous episode".to_string(), MenuEntry::Previous));
        }
        if state.episodes.len() > 1 {
            entries.push(("Choose episode".to_string(), MenuEntry::Episodes));
        }
        entries.push((
            format!("Switch to {}", state.translation.toggled().label()),
            MenuEntry::Translation,
        ));
        if state.qualities.len() > 1 {
            let current = state.quality.as_deref().unwrap_or("auto");
            entries.push((format!("Quality ({current})"), MenuEntry::Quality));
        }
        if !state.subtitles.is_empty() {
            let current = state.subtitle.as_deref().unwrap_or("none");
            entries.push((format!("Subtitles ({current})"), MenuEntry::Subtitles));
        }
        if state.has_intro {
            entries.push(("Skip intro".to_string(), MenuEntry::SkipIntro));
        }
        if state.has_outro {
            entries.push(("Skip outro".to_string(), MenuEntry::SkipOutro));
        }
        if state.has_download {
            entries.push(("Open download link".to_string(), MenuEntry::Download));
        }
        entries.push(("Quit".to_string(), MenuEntry::Quit));

        let prompt = state
            .episodes
            .get(state.current)
            .map(|ep| {
                format!(
                    "{} · {} · {}",
                    ep.label().trim(),
                    state.status,
                    state.position
                )
            })
            .unwrap_or_else(|| "Player".to_string());
        let labels: Vec<&str> = entries.iter().map(|(label, _)| label.as_str()).collect();
        let selection = Select::with_theme(&theme)
            .with_prompt(prompt)
            .items(&labels)
            .default(0)
            .interact_opt()?;
        let Some(idx) = selection else {
            return Ok(Some(MenuCommand::Quit));
        };

        let command = match entries[idx].1 {
            MenuEntry::Next => Some(MenuCommand::Play(state.current + 1)),
            MenuEntry::Previous => Some(MenuCommand::Play(state.current - 1)),
            MenuEntry::Episodes => {
                choose_episode(&state.episodes, state.current)?.map(MenuCommand::Play)
            }
            MenuEntry::Translation => Some(MenuCommand::ToggleTranslation),
            MenuEntry::Quality => {
                let default = state
                    .quality
                    .as_ref()
                    .and_then(|q| state.qualities.iter().position(|candidate| candidate == q))
                    .unwrap_or(0);
                Select::with_theme(&theme)
                    .with_prompt("Quality")
                    .items(&state.qualities)
                    .default(default)
                    .interact_opt()?
                    .map(|idx| MenuCommand::Quality(state.qualities[idx].clone()))
            }
            MenuEntry::Subtitles => {
                let default = state
                    .subtitle
                    .as_ref()
                    .and_then(|s| state.subtitles.iter().position(|candidate| candidate == s))
                    .unwrap_or(0);
                Select::with_theme(&theme)
                    .with_prompt("Subtitles")
                    .items(&state.subtitles)
                    .default(default)
                    .interact_opt()?
                    .map(|idx| MenuCommand::Subtitle(state.subtitles[idx].clone()))
            }
            MenuEntry::SkipIntro => Some(MenuCommand::SkipIntro),
            MenuEntry::SkipOutro => Some(MenuCommand::SkipOutro),
            MenuEntry::Download => Some(MenuCommand::Download),
            MenuEntry::Quit => Some(MenuCommand::Quit),
        };
        Ok(command)
    }
}

/// Upper bound on the watch loop's sleep when no controller deadline is pending.
#[cfg(unix)]
const IDLE_TICK: Duration = Duration::from_millis(500);

fn theme() -> ColorfulTheme {
    ColorfulTheme::default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(args: &[&str]) -> (ProviderKind, Show, Start) {
        let cli = Cli::parse_from(args.iter().copied());
        let mut settings = Settings::defaults().unwrap();
        cli.apply(&mut settings);
        let configured: ProviderKind = settings.providers.default.parse().unwrap();
        let route = WatchRoute::parse(cli.watch.as_deref().unwrap()).unwrap();
        watch_target(route, cli.anime_id.as_deref(), configured)
    }

    #[test]
    fn watch_route_provider_overrides_configured_one() {
        let (provider, show, start) =
            target(&["animehub", "--watch", "/animepahe/abc%2Fdef?animeId=1"]);
        assert_eq!(provider, ProviderKind::AnimePahe);
        assert_eq!(
            show,
            Show::AniList {
                id: "1".into(),
                title: None
            }
        );
        assert_eq!(start, Start::Id("abc/def".into()));

        let (provider, _, _) = target(&[
            "animehub",
            "--provider",
            "animepahe",
            "--watch",
            "/watch/hianime/ep-1?animeId=21",
        ]);
        assert_eq!(provider, ProviderKind::HiAnime);
    }

    #[test]
    fn unknown_route_segment_uses_configured_provider() {
        let (provider, _, _) = target(&["animehub", "--watch", "/watch/ep-1?animeId=21"]);
        assert_eq!(provider, ProviderKind::HiAnime);
        let (provider, _, _) = target(&[
            "animehub",
            "--provider",
            "animepahe",
            "--watch",
            "/watch/ep-1?animeId=21",
        ]);
        assert_eq!(provider, ProviderKind::AnimePahe);
    }

    #[test]
    fn pahe_native_route_opens_provider_listing() {
        let (provider, show, start) = target(&[
            "animehub",
            "--watch",
            "/watch/animepahe2/pahe-5678-%24session%24-abc?animeId=5678",
        ]);
        assert_eq!(provider, ProviderKind::AnimePahe);
        assert_eq!(show, Show::Provider { id: "5678".into() });
        assert_eq!(start, Start::Id("pahe-5678-$session$-abc".into()));
    }

    #[test]
    fn route_without_anime_id_plays_the_lone_episode() {
        let (_, show, start) = target(&["animehub", "--watch", "/watch/hianime/ep-1"]);
        assert!(matches!(show, Show::Episode { ref episode, .. } if episode.episode_id == "ep-1"));
        assert_eq!(start, Start::Latest);

        let (_, show, _) = target(&[
            "animehub",
            "--anime-id",
            "21",
            "--watch",
            "/watch/hianime/ep-1",
        ]);
        assert_eq!(
            show,
            Show::AniList {
                id: "21".into(),
                title: None
            }
        );
    }

    #[test]
    fn recent_pahe_episode_opens_its_show() {
        let episode = Episode {
            episode_id: "pahe-5678-$session$-abc".into(),
            ..Default::default()
        };
        match recent_pahe_pick(episode) {
            Pick::ProviderAnime {
                provider,
                id,
                start,
            } => {
                assert_eq!(provider, ProviderKind::AnimePahe);
                assert_eq!(id, "5678");
                assert_eq!(start, Start::Id("pahe-5678-$session$-abc".into()));
            }
            _ => panic!("expected the show listing"),
        }

        let loose = Episode {
            episode_id: "abc/ep-3".into(),
            ..Default::default()
        };
        assert!(matches!(recent_pahe_pick(loose), Pick::Episode { .. }));
    }

    #[test]
    fn selecting_genres_replaces_the_set() {
        let mut query = GenreQuery::default();
        select_genres(&mut query, &["Drama", "Romance"]);
        assert_eq!(query.genres(), ["Drama", "Romance"]);
        select_genres(&mut query, &["Romance"]);
        assert_eq!(query.genres(), ["Romance"]);
    }
}
