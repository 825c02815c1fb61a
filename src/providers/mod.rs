// Upstream provider boundary.
//
// The gateway only ever talks to providers through these capability traits;
// payloads stay provider-native until NormalizationRules is applied. Provider
// instances are constructed once at the composition root and handed to the
// orchestration layers explicitly.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::GatewayError;
use crate::models::{AnimeInfo, EpisodeIdentifier, EpisodeSources, SearchPage, StreamCategory};

pub mod anilist;
pub mod hianime;
pub mod scrape;

pub use anilist::AniListClient;
pub use hianime::HiAnime;
pub use scrape::ScrapeApi;

/// Named catalog listings offered by the streaming provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    TopAiring,
    MostPopular,
    MostFavorite,
    LatestCompleted,
    RecentlyUpdated,
    RecentlyAdded,
    TopUpcoming,
    SubbedAnime,
    DubbedAnime,
    Movie,
    Tv,
    Ova,
    Ona,
    Special,
}

impl ListKind {
    /// Upstream category slug.
    pub fn as_slug(&self) -> &'static str {
        match self {
            ListKind::TopAiring => "top-airing",
            ListKind::MostPopular => "most-popular",
            ListKind::MostFavorite => "most-favorite",
            ListKind::LatestCompleted => "latest-completed",
            ListKind::RecentlyUpdated => "recently-updated",
            ListKind::RecentlyAdded => "recently-added",
            ListKind::TopUpcoming => "top-upcoming",
            ListKind::SubbedAnime => "subbed-anime",
            ListKind::DubbedAnime => "dubbed-anime",
            ListKind::Movie => "movie",
            ListKind::Tv => "tv",
            ListKind::Ova => "ova",
            ListKind::Ona => "ona",
            ListKind::Special => "special",
        }
    }
}

/// A streaming-catalog provider: searchable catalog, per-title info and
/// playable episode sources.
#[async_trait]
pub trait StreamingProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn search(&self, query: &str, page: u32) -> Result<SearchPage, GatewayError>;

    async fn fetch_info(&self, id: &str) -> Result<AnimeInfo, GatewayError>;

    async fn fetch_episode_sources(
        &self,
        episode: &EpisodeIdentifier,
        server: Option<&str>,
        category: StreamCategory,
    ) -> Result<EpisodeSources, GatewayError>;

    async fn fetch_category(&self, kind: ListKind, page: u32) -> Result<SearchPage, GatewayError>;

    async fn fetch_genre(&self, genre: &str, page: u32) -> Result<SearchPage, GatewayError>;

    async fn fetch_genres(&self) -> Result<Vec<String>, GatewayError>;

    // Home-page style payloads are passed through opaque.
    async fn fetch_schedule(&self, date: &str) -> Result<Value, GatewayError>;

    async fn fetch_spotlight(&self) -> Result<Value, GatewayError>;

    async fn fetch_search_suggestions(&self, query: &str) -> Result<Value, GatewayError>;
}
