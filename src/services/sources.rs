//! Episode source resolution.
//!
//! Resolution is a strict three-stage sequence: ask the primary provider,
//! then probe the fallback API's server list for the requested category, then
//! try the raw stream as a last resort. A stage that errors or comes back
//! empty simply hands over to the next one; only exhaustion of all three is
//! reported to the caller.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::GatewayError;
use crate::models::{EpisodeIdentifier, EpisodeSources, StreamCategory};
use crate::providers::scrape::ScrapeApi;
use crate::providers::StreamingProvider;
use crate::services::normalize;

/// Fallback side of resolution: server discovery plus per-server source
/// fetches. [`ScrapeApi`] is the production implementation.
#[async_trait]
pub trait FallbackApi: Send + Sync {
    async fn server_names(
        &self,
        anime_id: &str,
        episode: &str,
        category: &str,
    ) -> Result<Vec<String>, GatewayError>;

    async fn sources_from(
        &self,
        anime_id: &str,
        episode: &str,
        server: Option<&str>,
        category: &str,
    ) -> Result<EpisodeSources, GatewayError>;
}

#[async_trait]
impl FallbackApi for ScrapeApi {
    async fn server_names(
        &self,
        anime_id: &str,
        episode: &str,
        category: &str,
    ) -> Result<Vec<String>, GatewayError> {
        let mut grouped: HashMap<_, _> = self.episode_servers(anime_id, episode).await?;
        Ok(grouped
            .remove(category)
            .unwrap_or_default()
            .into_iter()
            .map(|entry| entry.server_name)
            .collect())
    }

    async fn sources_from(
        &self,
        anime_id: &str,
        episode: &str,
        server: Option<&str>,
        category: &str,
    ) -> Result<EpisodeSources, GatewayError> {
        self.episode_sources(anime_id, episode, server, category).await
    }
}

pub struct SourceResolver {
    provider: Arc<dyn StreamingProvider>,
    fallback: Arc<dyn FallbackApi>,
}

impl SourceResolver {
    pub fn new(provider: Arc<dyn StreamingProvider>, fallback: Arc<dyn FallbackApi>) -> Self {
        Self { provider, fallback }
    }

    /// Resolve playable sources for one episode. `server` is only a hint for
    /// the primary stage; fallback stages pick their own servers.
    pub async fn resolve(
        &self,
        episode: &EpisodeIdentifier,
        server: Option<&str>,
    ) -> Result<EpisodeSources, GatewayError> {
        let category = episode.derived_category();

        match self.provider.fetch_episode_sources(episode, server, category).await {
            Ok(mut payload) if !payload.sources.is_empty() => {
                normalize::normalize_sources(&mut payload);
                return Ok(payload);
            }
            Ok(_) => {
                tracing::debug!(episode = %episode.wire, "primary provider returned no sources");
            }
            Err(err) => {
                tracing::debug!(episode = %episode.wire, %err, "primary provider failed");
            }
        }

        if let Some(payload) = self.probe_servers(episode).await {
            return Ok(payload);
        }

        self.raw_sources(episode).await
    }

    /// Stage two: iterate the fallback servers for the episode's category and
    /// take the first one that yields a non-empty source list. A `both`
    /// category probes the sub side.
    async fn probe_servers(&self, episode: &EpisodeIdentifier) -> Option<EpisodeSources> {
        let category = match episode.category.as_deref() {
            Some(raw) => raw.replace("both", "sub"),
            None => episode.derived_category().to_string(),
        };

        let names = match self
            .fallback
            .server_names(&episode.anime_id, &episode.episode, &category)
            .await
        {
            Ok(names) => names,
            Err(err) => {
                tracing::debug!(episode = %episode.wire, %err, "server probe failed");
                return None;
            }
        };

        for name in names.iter().filter(|n| !n.is_empty()) {
            match self
                .fallback
                .sources_from(&episode.anime_id, &episode.episode, Some(name), &category)
                .await
            {
                Ok(mut payload) if !payload.sources.is_empty() => {
                    tracing::info!(episode = %episode.wire, server = %name, "fallback server produced sources");
                    normalize::normalize_sources(&mut payload);
                    return Some(payload);
                }
                Ok(_) => continue,
                Err(err) => {
                    tracing::debug!(server = %name, %err, "fallback server failed");
                    continue;
                }
            }
        }

        None
    }

    /// Stage three: the raw stream, no server selection.
    async fn raw_sources(&self, episode: &EpisodeIdentifier) -> Result<EpisodeSources, GatewayError> {
        let mut payload = self
            .fallback
            .sources_from(
                &episode.anime_id,
                &episode.episode,
                None,
                StreamCategory::Raw.as_str(),
            )
            .await
            .map_err(|err| {
                tracing::warn!(episode = %episode.wire, %err, "all resolution stages exhausted");
                GatewayError::EmptyResult
            })?;

        if payload.sources.is_empty() {
            return Err(GatewayError::EmptyResult);
        }
        normalize::normalize_sources(&mut payload);
        Ok(payload)
    }
}
