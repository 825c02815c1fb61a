// HiAnime provider API - search, catalog listings and episode sources

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use crate::cache::{self, TTL_CATALOG, TTL_SOURCES};
use crate::error::GatewayError;
use crate::models::{AnimeInfo, EpisodeIdentifier, EpisodeSources, SearchPage};
use crate::providers::ListKind;
use crate::services::normalize;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/info", get(info))
        .route("/watch", get(watch_by_query))
        .route("/watch/:episodeId", get(watch_by_path))
        .route("/watch_aux", get(watch_by_query))
        .route("/watch_aux/:episodeId", get(watch_by_path))
        .route("/top-airing", get(top_airing))
        .route("/most-popular", get(most_popular))
        .route("/most-favorite", get(most_favorite))
        .route("/latest-completed", get(latest_completed))
        .route("/recently-updated", get(recently_updated))
        .route("/recently-added", get(recently_added))
        .route("/top-upcoming", get(top_upcoming))
        .route("/subbed-anime", get(subbed_anime))
        .route("/dubbed-anime", get(dubbed_anime))
        .route("/movie", get(movie))
        .route("/tv", get(tv))
        .route("/ova", get(ova))
        .route("/ona", get(ona))
        .route("/special", get(special))
        .route("/genres", get(genres))
        .route("/genre/:genre", get(genre))
        .route("/schedule", get(schedule))
        .route("/spotlight", get(spotlight))
        .route("/search-suggestions/:query", get(search_suggestions))
        .route("/:query", get(search))
}

#[derive(Debug, Deserialize)]
struct PageQuery {
    page: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct InfoQuery {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WatchQuery {
    episode_id: Option<String>,
    server: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ScheduleQuery {
    date: Option<String>,
}

/// GET /:query - search the catalog
async fn search(
    State(state): State<Arc<AppState>>,
    Path(query): Path<String>,
    Query(params): Query<PageQuery>,
) -> Result<Json<SearchPage>, GatewayError> {
    let page = params.page.unwrap_or(1);
    let key = cache::key_of("hianime", &["search", &query, &page.to_string()]);

    let res = state
        .cache
        .fetch(&key, TTL_CATALOG, || async {
            state.provider.search(&query, page).await
        })
        .await?;
    Ok(Json(res))
}

/// GET /info?id= - title info with its episode list. Episode ids come back
/// with the `$both` marker so players can pick either audio.
async fn info(
    State(state): State<Arc<AppState>>,
    Query(params): Query<InfoQuery>,
) -> Result<Json<AnimeInfo>, GatewayError> {
    let key = cache::key_of("hianime", &["info", &params.id]);

    let mut res = state
        .cache
        .fetch(&key, TTL_CATALOG, || async {
            state.provider.fetch_info(&params.id).await
        })
        .await?;

    normalize::mark_episodes_both(&mut res.episodes);
    Ok(Json(res))
}

async fn watch_by_path(
    State(state): State<Arc<AppState>>,
    Path(episode_id): Path<String>,
    Query(params): Query<WatchQuery>,
) -> Result<Json<EpisodeSources>, GatewayError> {
    watch_inner(&state, &episode_id, params.server.as_deref()).await
}

async fn watch_by_query(
    State(state): State<Arc<AppState>>,
    Query(params): Query<WatchQuery>,
) -> Result<Json<EpisodeSources>, GatewayError> {
    let episode_id = params
        .episode_id
        .as_deref()
        .ok_or_else(|| GatewayError::InvalidIdentifier("episodeId is required".to_string()))?;
    watch_inner(&state, episode_id, params.server.as_deref()).await
}

/// Shared watch path. The identifier is decoded up front; the dub marker
/// inside it decides the category regardless of any query hints.
async fn watch_inner(
    state: &AppState,
    raw_id: &str,
    server: Option<&str>,
) -> Result<Json<EpisodeSources>, GatewayError> {
    let episode = EpisodeIdentifier::decode(raw_id)?;
    let category = episode.derived_category();

    let key = cache::key_of(
        "hianime",
        &[
            "watch",
            &episode.wire,
            server.unwrap_or("undefined"),
            category.as_str(),
        ],
    );

    let payload = state
        .cache
        .fetch(&key, TTL_SOURCES, || async {
            state.resolver.resolve(&episode, server).await
        })
        .await?;
    Ok(Json(payload))
}

async fn listing(
    state: &AppState,
    kind: ListKind,
    namespace: &str,
    page: u32,
) -> Result<Json<SearchPage>, GatewayError> {
    let key = cache::key_of("hianime", &[namespace, &page.to_string()]);

    let res = state
        .cache
        .fetch(&key, TTL_CATALOG, || async {
            state.provider.fetch_category(kind, page).await
        })
        .await?;
    Ok(Json(res))
}

macro_rules! listing_handler {
    ($name:ident, $kind:expr, $namespace:expr) => {
        async fn $name(
            State(state): State<Arc<AppState>>,
            Query(params): Query<PageQuery>,
        ) -> Result<Json<SearchPage>, GatewayError> {
            listing(&state, $kind, $namespace, params.page.unwrap_or(1)).await
        }
    };
}

listing_handler!(top_airing, ListKind::TopAiring, "top-airing");
listing_handler!(most_popular, ListKind::MostPopular, "most-popular");
listing_handler!(most_favorite, ListKind::MostFavorite, "most-favorite");
listing_handler!(latest_completed, ListKind::LatestCompleted, "latest-completed");
listing_handler!(recently_updated, ListKind::RecentlyUpdated, "recently-updated");
listing_handler!(recently_added, ListKind::RecentlyAdded, "recently-added");
listing_handler!(top_upcoming, ListKind::TopUpcoming, "top-upcoming");
listing_handler!(subbed_anime, ListKind::SubbedAnime, "subbed");
listing_handler!(dubbed_anime, ListKind::DubbedAnime, "dubbed");
listing_handler!(movie, ListKind::Movie, "movie");
listing_handler!(tv, ListKind::Tv, "tv");
listing_handler!(ova, ListKind::Ova, "ova");
listing_handler!(ona, ListKind::Ona, "ona");
listing_handler!(special, ListKind::Special, "special");

async fn genres(State(state): State<Arc<AppState>>) -> Result<Json<Vec<String>>, GatewayError> {
    let key = cache::key_of("hianime", &["genres"]);
    let res = state
        .cache
        .fetch(&key, TTL_CATALOG, || async {
            state.provider.fetch_genres().await
        })
        .await?;
    Ok(Json(res))
}

async fn genre(
    State(state): State<Arc<AppState>>,
    Path(genre): Path<String>,
    Query(params): Query<PageQuery>,
) -> Result<Json<SearchPage>, GatewayError> {
    let page = params.page.unwrap_or(1);
    let key = cache::key_of("hianime", &["genre", &genre, &page.to_string()]);

    let res = state
        .cache
        .fetch(&key, TTL_CATALOG, || async {
            state.provider.fetch_genre(&genre, page).await
        })
        .await?;
    Ok(Json(res))
}

async fn schedule(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ScheduleQuery>,
) -> Result<Json<Value>, GatewayError> {
    let date = params
        .date
        .unwrap_or_else(|| chrono::Local::now().format("%Y-%m-%d").to_string());
    let key = cache::key_of("hianime", &["schedule", &date]);

    let res = state
        .cache
        .fetch(&key, TTL_CATALOG, || async {
            state.provider.fetch_schedule(&date).await
        })
        .await?;
    Ok(Json(res))
}

async fn spotlight(State(state): State<Arc<AppState>>) -> Result<Json<Value>, GatewayError> {
    let key = cache::key_of("hianime", &["spotlight"]);
    let res = state
        .cache
        .fetch(&key, TTL_CATALOG, || async {
            state.provider.fetch_spotlight().await
        })
        .await?;
    Ok(Json(res))
}

async fn search_suggestions(
    State(state): State<Arc<AppState>>,
    Path(query): Path<String>,
) -> Result<Json<Value>, GatewayError> {
    let key = cache::key_of("hianime", &["suggestions", &query]);
    let res = state
        .cache
        .fetch(&key, TTL_CATALOG, || async {
            state.provider.fetch_search_suggestions(&query).await
        })
        .await?;
    Ok(Json(res))
}
