// Canonical output schema for the gateway.
//
// Upstream payloads are provider-native and stay opaque until they are mapped
// into these types; everything below is a value type, copied freely and never
// shared across requests.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::GatewayError;

/// Audio-track variant of an episode. `Raw` is only used by the final
/// fallback stage; it never appears in episode identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamCategory {
    Sub,
    Dub,
    Raw,
}

impl StreamCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamCategory::Sub => "sub",
            StreamCategory::Dub => "dub",
            StreamCategory::Raw => "raw",
        }
    }
}

impl std::fmt::Display for StreamCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Composite episode identifier, decoded from its `$`-delimited wire form at
/// the request boundary and re-encoded only when producing output.
///
/// Wire shape: `{animeId}$episode${episodeNumber}[$category]`, where a `$dub`
/// substring marks the dub variant and a trailing `$both` means "addressable
/// as either sub or dub". Player-style `/watch/<slug>?ep=<n>` inputs are
/// rewritten into the wire shape before decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpisodeIdentifier {
    /// Original wire token (after the `/watch/` rewrite), used verbatim for
    /// primary provider calls.
    pub wire: String,
    pub anime_id: String,
    pub episode: String,
    /// Raw category token (`sub`, `dub`, `both`, ...) if present.
    pub category: Option<String>,
    /// Derived dub flag; always overrides any explicitly requested category.
    pub dub: bool,
}

impl EpisodeIdentifier {
    pub fn decode(raw: &str) -> Result<Self, GatewayError> {
        let wire = rewrite_watch_path(raw);

        let parts: Vec<&str> = wire.split('$').collect();
        if parts.len() < 3 {
            return Err(GatewayError::InvalidIdentifier(format!(
                "expected at least animeId$episode$number, got {} token(s)",
                parts.len()
            )));
        }
        if parts[1] != "episode" {
            return Err(GatewayError::InvalidIdentifier(
                "missing 'episode' marker".to_string(),
            ));
        }
        if parts[0].is_empty() || parts[2].is_empty() {
            return Err(GatewayError::InvalidIdentifier(
                "empty anime id or episode number".to_string(),
            ));
        }

        let category = parts
            .get(3)
            .filter(|c| !c.is_empty())
            .map(|c| c.to_string());

        Ok(Self {
            dub: wire.contains("$dub"),
            anime_id: parts[0].to_string(),
            episode: parts[2].to_string(),
            category,
            wire,
        })
    }

    /// Stream category derived from the identifier itself.
    pub fn derived_category(&self) -> StreamCategory {
        if self.dub {
            StreamCategory::Dub
        } else {
            StreamCategory::Sub
        }
    }
}

/// Rewrite a `/watch/<slug>?ep=<n>` player path into the `$`-delimited form.
fn rewrite_watch_path(raw: &str) -> String {
    if let Some(rest) = raw
        .strip_prefix("/watch/")
        .or_else(|| raw.split_once("/watch/").map(|(_, r)| r))
    {
        if let Some((slug, ep)) = rest.split_once("?ep=") {
            return format!("{slug}$episode${ep}");
        }
        return rest.to_string();
    }
    raw.to_string()
}

/// A playable video source. `quality` is canonicalized to `AUTO` and HLS is
/// assumed for everything the fallback stages return.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceRecord {
    pub url: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub source_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<String>,
    #[serde(rename = "isM3U8", default)]
    pub is_m3u8: bool,
}

/// A subtitle track. Thumbnail sprite tracks are not subtitles and are
/// filtered out before output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubtitleTrack {
    pub url: String,
    pub lang: String,
}

/// Response body for an episode-sources request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EpisodeSources {
    pub sources: Vec<SourceRecord>,
    #[serde(default)]
    pub subtitles: Vec<SubtitleTrack>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub intro: Value,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub outro: Value,
}

impl EpisodeSources {
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// One episode of a title, either from the primary provider or substituted
/// wholesale by the reconciler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EpisodeRecord {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_alt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Title variants as reported by the metadata provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnimeTitle {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub romaji: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub english: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub native: Option<String>,
}

/// A full anime record as the gateway returns it from the metadata endpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnimeInfo {
    pub id: String,
    pub title: AnimeTitle,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_date: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_episodes: Option<u32>,
    /// The provider's own "how many episodes exist right now" counter; the
    /// reconciler compares the episode list length against this.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_episode: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub genres: Vec<String>,
    #[serde(default)]
    pub episodes: Vec<EpisodeRecord>,
}

/// A catalog search hit from the streaming provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub japanese_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    /// Episode count available with subtitles.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<u32>,
    /// Episode count available dubbed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dub: Option<u32>,
}

/// One page of results from a paged catalog operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchPage {
    pub current_page: u32,
    pub has_next_page: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_pages: Option<u32>,
    pub results: Vec<SearchResult>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_plain_identifier() {
        let id = EpisodeIdentifier::decode("attack-on-titan-112$episode$3303$both").unwrap();
        assert_eq!(id.anime_id, "attack-on-titan-112");
        assert_eq!(id.episode, "3303");
        assert_eq!(id.category.as_deref(), Some("both"));
        assert!(!id.dub);
        assert_eq!(id.derived_category(), StreamCategory::Sub);
    }

    #[test]
    fn decode_dub_identifier() {
        let id = EpisodeIdentifier::decode("one-piece-100$episode$2142$dub").unwrap();
        assert!(id.dub);
        assert_eq!(id.derived_category(), StreamCategory::Dub);
    }

    #[test]
    fn decode_rewrites_watch_paths() {
        let id = EpisodeIdentifier::decode("/watch/steins-gate-3?ep=213").unwrap();
        assert_eq!(id.anime_id, "steins-gate-3");
        assert_eq!(id.episode, "213");
        assert_eq!(id.wire, "steins-gate-3$episode$213");
        assert!(id.category.is_none());
    }

    #[test]
    fn decode_rejects_malformed_identifiers() {
        assert!(matches!(
            EpisodeIdentifier::decode("just-a-slug"),
            Err(GatewayError::InvalidIdentifier(_))
        ));
        assert!(matches!(
            EpisodeIdentifier::decode("slug$ep$123"),
            Err(GatewayError::InvalidIdentifier(_))
        ));
        assert!(matches!(
            EpisodeIdentifier::decode("$episode$123"),
            Err(GatewayError::InvalidIdentifier(_))
        ));
    }
}
