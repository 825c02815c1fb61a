//! Episode list reconciliation.
//!
//! AniList knows how many episodes have aired but not how to play them; the
//! streaming catalog knows the opposite. When a title's episode list is
//! missing or out of step with its released count, the reconciler searches
//! the streaming catalog by title and swaps in that catalog's episode list.
//!
//! The scan over search candidates deliberately keeps the LAST matching
//! candidate. Franchises list their seasons in upstream order, and the later
//! entries are the more specific ones.

use std::sync::Arc;

use crate::models::{AnimeInfo, EpisodeRecord, SearchResult};
use crate::providers::StreamingProvider;

const MAX_QUERY_WORDS: usize = 15;

pub struct EpisodeReconciler {
    provider: Arc<dyn StreamingProvider>,
}

impl EpisodeReconciler {
    pub fn new(provider: Arc<dyn StreamingProvider>) -> Self {
        Self { provider }
    }

    /// True when the episode list is absent or does not line up with the
    /// number of released episodes.
    pub fn needs_reconciliation(info: &AnimeInfo) -> bool {
        info.episodes.is_empty()
            || info
                .current_episode
                .map_or(true, |current| info.episodes.len() as u32 != current)
    }

    /// Attach a reconciled episode list to `info`, in place. Failures along
    /// the way leave the record untouched; a stale list is still more useful
    /// than none.
    pub async fn reconcile(&self, info: &mut AnimeInfo) {
        let replacement = self.replacement_episodes(info).await;
        if !replacement.is_empty() {
            info.episodes = replacement;
        }
    }

    async fn replacement_episodes(&self, info: &AnimeInfo) -> Vec<EpisodeRecord> {
        let Some(romaji) = info.title.romaji.as_deref() else {
            return Vec::new();
        };
        let english = info.title.english.as_deref().unwrap_or(romaji);
        let current = info.current_episode.unwrap_or(0);

        let query = trim_query(romaji, MAX_QUERY_WORDS);
        let search = match self.provider.search(&query, 1).await {
            Ok(page) => page,
            Err(err) => {
                tracing::debug!(%romaji, %err, "catalog search failed during reconciliation");
                return Vec::new();
            }
        };

        let Some(candidate) = pick_candidate(&search.results, romaji, english, current) else {
            return Vec::new();
        };

        let catalog_info = match self.provider.fetch_info(&candidate).await {
            Ok(catalog_info) => catalog_info,
            Err(err) => {
                tracing::debug!(%candidate, %err, "catalog info failed during reconciliation");
                return Vec::new();
            }
        };

        catalog_info
            .episodes
            .into_iter()
            .map(|episode| EpisodeRecord {
                id_alt: Some(episode.id.clone()),
                id: episode.id,
                title: episode.title,
                number: episode.number,
                image: info.image.clone(),
                url: episode.url,
                description: None,
            })
            .collect()
    }
}

/// Long romaji titles get cut down before hitting catalog search, which
/// tolerates at most a sentence worth of words.
fn trim_query(title: &str, max_words: usize) -> String {
    let words: Vec<&str> = title.split_whitespace().collect();
    if words.len() > max_words {
        words[..max_words].join(" ")
    } else {
        title.to_string()
    }
}

/// Pick the catalog entry for a title. Starts from the first search result
/// and lets every later candidate that matches both the episode count and
/// one of the title variants override it.
fn pick_candidate(
    results: &[SearchResult],
    romaji: &str,
    english: &str,
    current: u32,
) -> Option<String> {
    let mut chosen = results.first()?.id.clone();

    for result in results {
        let name = result.title.trim().replacen('½', "1/2", 1);
        let jname = result
            .japanese_title
            .as_deref()
            .unwrap_or("")
            .trim()
            .replacen('½', "1/2", 1);

        let count_matches = result
            .sub
            .map_or(false, |sub| sub >= current && current <= sub + 1);
        let title_matches = name.contains(romaji)
            || name.contains(english)
            || jname.contains(romaji)
            || jname.contains(english);

        if count_matches && title_matches {
            chosen = result.id.clone();
        }
    }

    Some(chosen)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;
    use crate::models::{
        AnimeTitle, EpisodeIdentifier, EpisodeSources, SearchPage, StreamCategory,
    };
    use crate::providers::ListKind;
    use async_trait::async_trait;
    use serde_json::Value;

    fn result(id: &str, title: &str, jname: Option<&str>, sub: Option<u32>) -> SearchResult {
        SearchResult {
            id: id.to_string(),
            title: title.to_string(),
            japanese_title: jname.map(str::to_string),
            url: None,
            image: None,
            media_type: Some("TV".to_string()),
            sub,
            dub: None,
        }
    }

    #[test]
    fn last_matching_candidate_wins() {
        let results = vec![
            result("aot", "Attack on Titan", Some("Shingeki no Kyojin"), Some(25)),
            result("aot-oad", "Attack on Titan OAD", None, Some(2)),
            result(
                "aot-final",
                "Attack on Titan: The Final Season",
                Some("Shingeki no Kyojin: The Final Season"),
                Some(28),
            ),
        ];
        let chosen = pick_candidate(&results, "Shingeki no Kyojin", "Attack on Titan", 25);
        assert_eq!(chosen.as_deref(), Some("aot-final"));
    }

    #[test]
    fn no_match_falls_back_to_first_result() {
        let results = vec![
            result("a", "Something Else", None, Some(12)),
            result("b", "Another Show", None, Some(3)),
        ];
        let chosen = pick_candidate(&results, "Shingeki no Kyojin", "Attack on Titan", 25);
        assert_eq!(chosen.as_deref(), Some("a"));
    }

    #[test]
    fn half_glyph_is_normalized_before_matching() {
        let results = vec![
            result("wrong", "Unrelated", None, Some(100)),
            result("ranma", "Ranma ½", None, Some(161)),
        ];
        let chosen = pick_candidate(&results, "Ranma 1/2", "Ranma 1/2", 161);
        assert_eq!(chosen.as_deref(), Some("ranma"));
    }

    #[test]
    fn stale_episode_counts_do_not_match() {
        let results = vec![
            result("first", "Attack on Titan", None, Some(25)),
            result("stale", "Attack on Titan Recap", None, Some(3)),
        ];
        // 3 < 25, so the recap entry never overrides.
        let chosen = pick_candidate(&results, "Attack on Titan", "Attack on Titan", 25);
        assert_eq!(chosen.as_deref(), Some("first"));
    }

    #[test]
    fn query_is_trimmed_to_word_budget() {
        let long = "one two three four five six seven eight nine ten eleven twelve thirteen fourteen fifteen sixteen";
        assert_eq!(
            trim_query(long, 15),
            "one two three four five six seven eight nine ten eleven twelve thirteen fourteen fifteen"
        );
        assert_eq!(trim_query("short title", 15), "short title");
    }

    #[test]
    fn reconciliation_trigger_checks_count_alignment() {
        let mut info = sample_info();
        assert!(EpisodeReconciler::needs_reconciliation(&info));

        info.episodes = vec![episode("e1", 1), episode("e2", 2)];
        info.current_episode = Some(2);
        assert!(!EpisodeReconciler::needs_reconciliation(&info));

        info.current_episode = Some(5);
        assert!(EpisodeReconciler::needs_reconciliation(&info));
    }

    fn episode(id: &str, number: u32) -> EpisodeRecord {
        EpisodeRecord {
            id: id.to_string(),
            id_alt: Some(id.to_string()),
            title: None,
            number: Some(number),
            image: None,
            url: None,
            description: None,
        }
    }

    fn sample_info() -> AnimeInfo {
        AnimeInfo {
            id: "16498".to_string(),
            title: AnimeTitle {
                romaji: Some("Shingeki no Kyojin".to_string()),
                english: Some("Attack on Titan".to_string()),
                native: None,
            },
            image: Some("https://img.example/aot.jpg".to_string()),
            cover: None,
            description: None,
            status: Some("RELEASING".to_string()),
            release_date: Some(2013),
            total_episodes: Some(25),
            current_episode: Some(5),
            genres: vec!["Action".to_string()],
            episodes: Vec::new(),
        }
    }

    struct CatalogStub {
        results: Vec<SearchResult>,
        episodes: Vec<EpisodeRecord>,
        expected_id: &'static str,
    }

    #[async_trait]
    impl StreamingProvider for CatalogStub {
        fn name(&self) -> &'static str {
            "stub"
        }

        async fn search(&self, _: &str, _: u32) -> Result<SearchPage, GatewayError> {
            Ok(SearchPage {
                current_page: 1,
                has_next_page: false,
                total_pages: Some(1),
                results: self.results.clone(),
            })
        }

        async fn fetch_info(&self, id: &str) -> Result<AnimeInfo, GatewayError> {
            assert_eq!(id, self.expected_id);
            let mut info = sample_info();
            info.episodes = self.episodes.clone();
            Ok(info)
        }

        async fn fetch_episode_sources(
            &self,
            _: &EpisodeIdentifier,
            _: Option<&str>,
            _: StreamCategory,
        ) -> Result<EpisodeSources, GatewayError> {
            unimplemented!()
        }

        async fn fetch_category(&self, _: ListKind, _: u32) -> Result<SearchPage, GatewayError> {
            unimplemented!()
        }

        async fn fetch_genre(&self, _: &str, _: u32) -> Result<SearchPage, GatewayError> {
            unimplemented!()
        }

        async fn fetch_genres(&self) -> Result<Vec<String>, GatewayError> {
            unimplemented!()
        }

        async fn fetch_schedule(&self, _: &str) -> Result<Value, GatewayError> {
            unimplemented!()
        }

        async fn fetch_spotlight(&self) -> Result<Value, GatewayError> {
            unimplemented!()
        }

        async fn fetch_search_suggestions(&self, _: &str) -> Result<Value, GatewayError> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn reconcile_replaces_episodes_and_keeps_metadata_image() {
        let provider = Arc::new(CatalogStub {
            results: vec![result(
                "attack-on-titan-112",
                "Attack on Titan",
                Some("Shingeki no Kyojin"),
                Some(5),
            )],
            episodes: vec![
                EpisodeRecord {
                    id: "attack-on-titan-112$episode$1".to_string(),
                    id_alt: None,
                    title: Some("To You, in 2000 Years".to_string()),
                    number: Some(1),
                    image: Some("https://catalog.example/poster.jpg".to_string()),
                    url: Some("https://catalog.example/watch/attack-on-titan-112?ep=1".to_string()),
                    description: Some("catalog blurb".to_string()),
                },
            ],
            expected_id: "attack-on-titan-112",
        });
        let reconciler = EpisodeReconciler::new(provider);

        let mut info = sample_info();
        reconciler.reconcile(&mut info).await;

        assert_eq!(info.episodes.len(), 1);
        let ep = &info.episodes[0];
        assert_eq!(ep.id, "attack-on-titan-112$episode$1");
        assert_eq!(ep.id_alt.as_deref(), Some("attack-on-titan-112$episode$1"));
        // image comes from the metadata record, description is dropped
        assert_eq!(ep.image.as_deref(), Some("https://img.example/aot.jpg"));
        assert_eq!(ep.description, None);
    }

    #[tokio::test]
    async fn empty_catalog_leaves_record_untouched() {
        let provider = Arc::new(CatalogStub {
            results: Vec::new(),
            episodes: Vec::new(),
            expected_id: "unused",
        });
        let reconciler = EpisodeReconciler::new(provider);

        let mut info = sample_info();
        info.episodes = vec![episode("keep-me", 1)];
        reconciler.reconcile(&mut info).await;

        assert_eq!(info.episodes[0].id, "keep-me");
    }
}
