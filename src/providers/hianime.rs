// HiAnime catalog client. Implements the streaming provider boundary over the
// upstream JSON API; every payload is mapped into the gateway's own records
// before anything else sees it.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::error::GatewayError;
use crate::models::{
    AnimeInfo, AnimeTitle, EpisodeIdentifier, EpisodeRecord, EpisodeSources, SearchPage,
    SearchResult, SourceRecord, StreamCategory, SubtitleTrack,
};
use crate::providers::{ListKind, StreamingProvider};

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    success: bool,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    #[serde(default)]
    animes: Vec<AnimeItem>,
    #[serde(rename = "currentPage")]
    current_page: Option<u32>,
    #[serde(rename = "totalPages")]
    total_pages: Option<u32>,
    #[serde(rename = "hasNextPage", default)]
    has_next_page: bool,
}

#[derive(Debug, Deserialize)]
struct AnimeItem {
    id: String,
    name: Option<String>,
    jname: Option<String>,
    poster: Option<String>,
    #[serde(rename = "type")]
    media_type: Option<String>,
    episodes: Option<EpisodeCounts>,
}

#[derive(Debug, Deserialize)]
struct EpisodeCounts {
    sub: Option<u32>,
    dub: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct InfoData {
    anime: Option<InfoAnime>,
}

#[derive(Debug, Deserialize)]
struct InfoAnime {
    info: Option<InfoCore>,
    #[serde(rename = "moreInfo")]
    more_info: Option<InfoExtra>,
}

#[derive(Debug, Deserialize)]
struct InfoCore {
    id: Option<String>,
    name: Option<String>,
    jname: Option<String>,
    poster: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InfoExtra {
    #[serde(default)]
    genres: Vec<String>,
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EpisodeListData {
    #[serde(rename = "totalEpisodes")]
    total_episodes: Option<u32>,
    #[serde(default)]
    episodes: Vec<EpisodeItem>,
}

#[derive(Debug, Deserialize)]
struct EpisodeItem {
    title: Option<String>,
    #[serde(rename = "episodeId")]
    episode_id: String,
    number: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct HomeData {
    #[serde(default)]
    genres: Vec<String>,
    #[serde(rename = "spotlightAnimes", default)]
    spotlight_animes: Value,
}

#[derive(Debug, Deserialize)]
struct SourcesData {
    #[serde(default)]
    sources: Vec<RawSource>,
    #[serde(default)]
    tracks: Vec<RawTrack>,
    #[serde(default)]
    intro: Value,
    #[serde(default)]
    outro: Value,
}

#[derive(Debug, Deserialize)]
struct RawSource {
    url: String,
    #[serde(rename = "type")]
    source_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawTrack {
    file: String,
    label: Option<String>,
}

pub struct HiAnime {
    client: reqwest::Client,
    base_url: String,
}

impl HiAnime {
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .unwrap_or_default();
        Self { client, base_url }
    }

    async fn get_data<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, GatewayError> {
        tracing::debug!(%url, "hianime request");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(GatewayError::upstream)?;
        if !response.status().is_success() {
            return Err(GatewayError::UpstreamUnavailable(format!(
                "hianime returned {} for {}",
                response.status(),
                url
            )));
        }
        let envelope: Envelope<T> = response.json().await.map_err(GatewayError::upstream)?;
        match envelope.data {
            Some(data) if envelope.success => Ok(data),
            _ => Err(GatewayError::EmptyResult),
        }
    }

    fn map_listing(&self, listing: ListingData, page: u32) -> SearchPage {
        SearchPage {
            current_page: listing.current_page.unwrap_or(page),
            has_next_page: listing.has_next_page,
            total_pages: listing.total_pages,
            results: listing.animes.into_iter().map(|a| self.map_item(a)).collect(),
        }
    }

    fn map_item(&self, item: AnimeItem) -> SearchResult {
        SearchResult {
            url: Some(format!("{}/{}", self.base_url, item.id)),
            title: item.name.unwrap_or_else(|| item.id.clone()),
            japanese_title: item.jname,
            image: item.poster,
            media_type: item.media_type,
            sub: item.episodes.as_ref().and_then(|e| e.sub),
            dub: item.episodes.as_ref().and_then(|e| e.dub),
            id: item.id,
        }
    }
}

/// Upstream episode ids carry the episode number as a query suffix. The
/// gateway's wire format replaces that suffix with `$episode$`.
fn canonical_episode_id(upstream: &str) -> String {
    match upstream.split_once("?ep=") {
        Some((slug, number)) => format!("{slug}$episode${number}"),
        None => upstream.to_string(),
    }
}

fn map_sources(data: SourcesData) -> EpisodeSources {
    EpisodeSources {
        sources: data
            .sources
            .into_iter()
            .map(|s| SourceRecord {
                is_m3u8: matches!(s.source_type.as_deref(), Some("hls")),
                url: s.url,
                source_type: s.source_type,
                quality: None,
            })
            .collect(),
        subtitles: data
            .tracks
            .into_iter()
            .filter_map(|t| {
                t.label.filter(|l| !l.is_empty()).map(|label| SubtitleTrack {
                    url: t.file,
                    lang: label.trim_start_matches("CR_").to_string(),
                })
            })
            .collect(),
        intro: data.intro,
        outro: data.outro,
    }
}

#[async_trait]
impl StreamingProvider for HiAnime {
    fn name(&self) -> &'static str {
        "zoro"
    }

    async fn search(&self, query: &str, page: u32) -> Result<SearchPage, GatewayError> {
        let url = format!(
            "{}/api/v2/hianime/search?q={}&page={}",
            self.base_url,
            urlencoding::encode(query),
            page
        );
        let data: ListingData = self.get_data(&url).await?;
        Ok(self.map_listing(data, page))
    }

    async fn fetch_info(&self, id: &str) -> Result<AnimeInfo, GatewayError> {
        let info_url = format!("{}/api/v2/hianime/anime/{}", self.base_url, id);
        let episodes_url = format!("{}/api/v2/hianime/anime/{}/episodes", self.base_url, id);

        let data: InfoData = self.get_data(&info_url).await?;
        let episode_list: EpisodeListData = self.get_data(&episodes_url).await?;

        let anime = data.anime.ok_or(GatewayError::EmptyResult)?;
        let core = anime.info.unwrap_or(InfoCore {
            id: None,
            name: None,
            jname: None,
            poster: None,
            description: None,
        });
        let extra = anime.more_info.unwrap_or(InfoExtra {
            genres: Vec::new(),
            status: None,
        });

        let poster = core.poster.clone();
        let episodes: Vec<EpisodeRecord> = episode_list
            .episodes
            .into_iter()
            .map(|e| {
                let canonical = canonical_episode_id(&e.episode_id);
                EpisodeRecord {
                    url: Some(format!("{}/watch/{}", self.base_url, e.episode_id)),
                    id_alt: Some(canonical.clone()),
                    id: canonical,
                    title: e.title,
                    number: e.number,
                    image: poster.clone(),
                    description: None,
                }
            })
            .collect();

        let released = episode_list.total_episodes.unwrap_or(episodes.len() as u32);
        Ok(AnimeInfo {
            id: core.id.unwrap_or_else(|| id.to_string()),
            title: AnimeTitle {
                romaji: None,
                english: core.name,
                native: core.jname,
            },
            image: poster,
            cover: None,
            description: core.description,
            status: extra.status,
            release_date: None,
            total_episodes: Some(released),
            current_episode: Some(released),
            genres: extra.genres,
            episodes,
        })
    }

    async fn fetch_episode_sources(
        &self,
        episode: &EpisodeIdentifier,
        server: Option<&str>,
        category: StreamCategory,
    ) -> Result<EpisodeSources, GatewayError> {
        let mut url = format!(
            "{}/api/v2/hianime/episode/sources?animeEpisodeId={}?ep={}&category={}",
            self.base_url, episode.anime_id, episode.episode, category
        );
        if let Some(server) = server {
            url.push_str(&format!("&server={}", server));
        }

        let data: SourcesData = self.get_data(&url).await?;
        if data.sources.is_empty() {
            return Err(GatewayError::EmptyResult);
        }

        Ok(map_sources(data))
    }

    async fn fetch_category(&self, kind: ListKind, page: u32) -> Result<SearchPage, GatewayError> {
        let url = format!(
            "{}/api/v2/hianime/category/{}?page={}",
            self.base_url,
            kind.as_slug(),
            page
        );
        let data: ListingData = self.get_data(&url).await?;
        Ok(self.map_listing(data, page))
    }

    async fn fetch_genre(&self, genre: &str, page: u32) -> Result<SearchPage, GatewayError> {
        let url = format!(
            "{}/api/v2/hianime/genre/{}?page={}",
            self.base_url,
            urlencoding::encode(genre),
            page
        );
        let data: ListingData = self.get_data(&url).await?;
        Ok(self.map_listing(data, page))
    }

    async fn fetch_genres(&self) -> Result<Vec<String>, GatewayError> {
        let url = format!("{}/api/v2/hianime/home", self.base_url);
        let data: HomeData = self.get_data(&url).await?;
        Ok(data.genres)
    }

    async fn fetch_schedule(&self, date: &str) -> Result<Value, GatewayError> {
        let url = format!("{}/api/v2/hianime/schedule?date={}", self.base_url, date);
        self.get_data(&url).await
    }

    async fn fetch_spotlight(&self) -> Result<Value, GatewayError> {
        let url = format!("{}/api/v2/hianime/home", self.base_url);
        let data: HomeData = self.get_data(&url).await?;
        Ok(data.spotlight_animes)
    }

    async fn fetch_search_suggestions(&self, query: &str) -> Result<Value, GatewayError> {
        let url = format!(
            "{}/api/v2/hianime/search/suggestion?q={}",
            self.base_url,
            urlencoding::encode(query)
        );
        self.get_data(&url).await
    }
}
