// Thin client for the HiAnime scrape API, used as the fallback path when the
// primary provider cannot produce sources for an episode.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::error::GatewayError;
use crate::models::{EpisodeSources, SourceRecord, SubtitleTrack};

#[derive(Debug, Deserialize)]
pub struct ServerEntry {
    #[serde(rename = "serverName")]
    pub server_name: String,
}

#[derive(Debug, Deserialize)]
struct ServersEnvelope {
    data: Option<HashMap<String, Value>>,
}

#[derive(Debug, Deserialize)]
struct SourcesEnvelope {
    #[serde(default)]
    success: bool,
    data: Option<SourcesData>,
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

pub struct ScrapeApi {
    client: reqwest::Client,
    base_url: String,
}

impl ScrapeApi {
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_default();
        Self { client, base_url }
    }

    /// Available servers for one episode, grouped by category (`sub`, `dub`,
    /// `raw`). Categories absent upstream are simply missing from the map.
    ///
    /// The upstream expects the episode id verbatim, `?ep=` included, so the
    /// URL deliberately carries two question marks.
    pub async fn episode_servers(
        &self,
        anime_id: &str,
        episode: &str,
    ) -> Result<HashMap<String, Vec<ServerEntry>>, GatewayError> {
        let url = format!(
            "{}/api/v2/hianime/episode/servers?animeEpisodeId={}?ep={}",
            self.base_url, anime_id, episode
        );
        tracing::debug!(%url, "probing episode servers");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(GatewayError::upstream)?;
        if !response.status().is_success() {
            return Err(GatewayError::UpstreamUnavailable(format!(
                "server probe returned {}",
                response.status()
            )));
        }

        let envelope: ServersEnvelope = response.json().await.map_err(GatewayError::upstream)?;
        let mut grouped = HashMap::new();
        if let Some(data) = envelope.data {
            for (category, value) in data {
                if let Ok(entries) = serde_json::from_value::<Vec<ServerEntry>>(value) {
                    grouped.insert(category, entries);
                }
            }
        }
        Ok(grouped)
    }

    /// Sources for one episode from a specific server, or from the upstream
    /// default when `server` is `None`.
    pub async fn episode_sources(
        &self,
        anime_id: &str,
        episode: &str,
        server: Option<&str>,
        category: &str,
    ) -> Result<EpisodeSources, GatewayError> {
        let mut url = format!(
            "{}/api/v2/hianime/episode/sources?animeEpisodeId={}?ep={}&category={}",
            self.base_url, anime_id, episode, category
        );
        if let Some(server) = server {
            url.push_str(&format!("&server={}", server));
        }
        tracing::debug!(%url, "fetching fallback sources");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(GatewayError::upstream)?;
        if !response.status().is_success() {
            return Err(GatewayError::UpstreamUnavailable(format!(
                "source fetch returned {}",
                response.status()
            )));
        }

        let envelope: SourcesEnvelope = response.json().await.map_err(GatewayError::upstream)?;
        let data = match envelope.data {
            Some(data) if envelope.success => data,
            _ => return Err(GatewayError::EmptyResult),
        };

        Ok(map_sources(data))
    }
}

fn map_sources(data: SourcesData) -> EpisodeSources {
    EpisodeSources {
        sources: data
            .sources
            .into_iter()
            .map(|s| SourceRecord {
                // Everything the fallback hands out is an HLS playlist,
                // whatever its `type` field claims.
                is_m3u8: true,
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
