// AniList metadata API - search, listings and reconciled title info

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::cache::{self, TTL_CATALOG, TTL_SOURCES};
use crate::error::GatewayError;
use crate::models::{AnimeInfo, EpisodeIdentifier, EpisodeRecord, EpisodeSources};
use crate::providers::anilist::{AiringPage, AnilistPage};
use crate::services::{normalize, EpisodeReconciler};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/trending", get(trending))
        .route("/popular", get(popular))
        .route("/airing-schedule", get(airing_schedule))
        .route("/data/:id", get(data))
        .route("/info/:id", get(info))
        .route("/episodes/:id", get(episodes))
        .route("/watch/:episodeId", get(watch))
        .route("/:query", get(search))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PagingQuery {
    page: Option<u32>,
    per_page: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScheduleQuery {
    page: Option<u32>,
    per_page: Option<u32>,
    week_start: Option<i64>,
    week_end: Option<i64>,
    not_yet_aired: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct InfoQuery {
    provider: Option<String>,
    dub: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WatchSourceQuery {
    provider: Option<String>,
    server: Option<String>,
    dub: Option<String>,
}

/// Query flags arrive as `true`/`1` strings.
fn parse_flag(value: Option<&str>) -> bool {
    matches!(value, Some("true") | Some("1"))
}

/// Only the hianime-backed catalog (historically called zoro) is wired up as
/// an episode provider.
fn require_known_provider(provider: Option<String>) -> Result<String, GatewayError> {
    let provider = provider.unwrap_or_else(|| "zoro".to_string());
    if provider == "zoro" {
        Ok(provider)
    } else {
        Err(GatewayError::ProviderMismatch(provider))
    }
}

/// GET /:query - AniList search, uncached
async fn search(
    State(state): State<Arc<AppState>>,
    Path(query): Path<String>,
    Query(params): Query<PagingQuery>,
) -> Result<Json<AnilistPage>, GatewayError> {
    let res = state
        .anilist
        .search(&query, params.page.unwrap_or(1), params.per_page.unwrap_or(20))
        .await?;
    Ok(Json(res))
}

async fn trending(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PagingQuery>,
) -> Result<Json<AnilistPage>, GatewayError> {
    let page = params.page.unwrap_or(1);
    let per_page = params.per_page.unwrap_or(20);
    let key = format!("anilist:trending;{page};{per_page}");

    let res = state
        .cache
        .fetch(&key, TTL_CATALOG, || async {
            state.anilist.fetch_trending(page, per_page).await
        })
        .await?;
    Ok(Json(res))
}

async fn popular(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PagingQuery>,
) -> Result<Json<AnilistPage>, GatewayError> {
    let page = params.page.unwrap_or(1);
    let per_page = params.per_page.unwrap_or(20);
    let key = format!("anilist:popular;{page};{per_page}");

    let res = state
        .cache
        .fetch(&key, TTL_CATALOG, || async {
            state.anilist.fetch_popular(page, per_page).await
        })
        .await?;
    Ok(Json(res))
}

/// GET /airing-schedule - defaults to the week starting now
async fn airing_schedule(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ScheduleQuery>,
) -> Result<Json<AiringPage>, GatewayError> {
    let week_start = params
        .week_start
        .unwrap_or_else(|| chrono::Utc::now().timestamp());
    let week_end = params.week_end.unwrap_or(week_start + 604_800);

    let res = state
        .anilist
        .fetch_airing_schedule(
            params.page.unwrap_or(1),
            params.per_page.unwrap_or(20),
            week_start,
            week_end,
            params.not_yet_aired.unwrap_or(true),
        )
        .await?;
    Ok(Json(res))
}

/// GET /data/:id - title info without episodes, uncached
async fn data(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<AnimeInfo>, GatewayError> {
    let res = state.anilist.fetch_info(&id).await?;
    Ok(Json(res))
}

/// GET /info/:id - title info with a reconciled episode list
async fn info(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<InfoQuery>,
) -> Result<Json<AnimeInfo>, GatewayError> {
    let provider = require_known_provider(params.provider)?;
    let dub = parse_flag(params.dub.as_deref());
    let key = format!("anilist:info;{id};{dub};{provider}");

    let mut res = state
        .cache
        .fetch(&key, cache::episode_meta_ttl(), || async {
            state.anilist.fetch_info(&id).await
        })
        .await?;

    // Reconciliation runs on cache hits too: a cached record can fall out of
    // step with the released count while it is still fresh.
    if EpisodeReconciler::needs_reconciliation(&res) {
        state.reconciler.reconcile(&mut res).await;
    }
    normalize::mark_episodes_both(&mut res.episodes);

    Ok(Json(res))
}

/// GET /episodes/:id - the reconciled episode list on its own
async fn episodes(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<InfoQuery>,
) -> Result<Json<Vec<EpisodeRecord>>, (StatusCode, String)> {
    let provider = require_known_provider(params.provider)
        .map_err(|_| (StatusCode::NOT_FOUND, "Anime not found".to_string()))?;
    let dub = parse_flag(params.dub.as_deref());
    let key = format!("anilist:episodes;{id};{dub};{provider}");

    let episodes = state
        .cache
        .fetch(&key, cache::episode_meta_ttl(), || async {
            let mut info = state.anilist.fetch_info(&id).await?;
            state.reconciler.reconcile(&mut info).await;
            Ok(info.episodes)
        })
        .await
        .map_err(|_| (StatusCode::NOT_FOUND, "Anime not found".to_string()))?;

    Ok(Json(episodes))
}

/// GET /watch/:episodeId - resolved sources for one episode
async fn watch(
    State(state): State<Arc<AppState>>,
    Path(episode_id): Path<String>,
    Query(params): Query<WatchSourceQuery>,
) -> Result<Json<EpisodeSources>, GatewayError> {
    let provider = require_known_provider(params.provider)?;
    let is_dub = parse_flag(params.dub.as_deref());

    let mut episode = EpisodeIdentifier::decode(&episode_id)?;
    // A dub query flag counts even when the identifier carries no marker.
    episode.dub = episode.dub || is_dub;

    let key = format!(
        "anilist:watch;{};{provider};{};{}",
        episode.wire,
        params.server.as_deref().unwrap_or("undefined"),
        if episode.dub { "dub" } else { "sub" },
    );

    let payload = state
        .cache
        .fetch(&key, TTL_SOURCES, || async {
            state
                .resolver
                .resolve(&episode, params.server.as_deref())
                .await
        })
        .await?;
    Ok(Json(payload))
}
