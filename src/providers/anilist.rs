use std::sync::OnceLock;

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;
use crate::models::{AnimeInfo, AnimeTitle};

const ANILIST_API_URL: &str = "https://graphql.anilist.co";

const MEDIA_FIELDS: &str = r#"
    id
    idMal
    title {
        romaji
        english
        native
    }
    status
    coverImage {
        extraLarge
        large
        medium
    }
    bannerImage
    description(asHtml: false)
    averageScore
    genres
    episodes
    seasonYear
    format
    nextAiringEpisode {
        episode
        airingAt
    }
"#;

/// AniList metadata client
pub struct AniListClient {
    client: Client,
    api_url: String,
}

/// GraphQL request wrapper
#[derive(Debug, Serialize)]
struct GraphQLRequest {
    query: String,
    variables: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct GraphQLResponse {
    data: Option<ResponseData>,
}

#[derive(Debug, Deserialize)]
struct ResponseData {
    #[serde(rename = "Page")]
    page: Option<PageData>,
    #[serde(rename = "Media")]
    media: Option<MediaData>,
}

#[derive(Debug, Deserialize)]
struct PageData {
    #[serde(rename = "pageInfo")]
    page_info: Option<PageInfo>,
    media: Option<Vec<MediaData>>,
    #[serde(rename = "airingSchedules")]
    airing_schedules: Option<Vec<AiringScheduleData>>,
}

#[derive(Debug, Deserialize)]
struct PageInfo {
    #[serde(rename = "currentPage")]
    current_page: Option<u32>,
    #[serde(rename = "hasNextPage")]
    has_next_page: Option<bool>,
    #[serde(rename = "lastPage")]
    last_page: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaData {
    pub id: i64,
    #[serde(rename = "idMal")]
    pub id_mal: Option<i64>,
    pub title: Option<TitleData>,
    pub status: Option<String>,
    #[serde(rename = "coverImage")]
    pub cover_image: Option<CoverImage>,
    #[serde(rename = "bannerImage")]
    pub banner_image: Option<String>,
    pub description: Option<String>,
    #[serde(rename = "averageScore")]
    pub average_score: Option<i32>,
    pub genres: Option<Vec<String>>,
    pub episodes: Option<u32>,
    #[serde(rename = "seasonYear")]
    pub season_year: Option<i32>,
    pub format: Option<String>,
    #[serde(rename = "nextAiringEpisode")]
    pub next_airing_episode: Option<NextAiringEpisode>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TitleData {
    pub romaji: Option<String>,
    pub english: Option<String>,
    pub native: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CoverImage {
    #[serde(rename = "extraLarge")]
    pub extra_large: Option<String>,
    pub large: Option<String>,
    pub medium: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NextAiringEpisode {
    pub episode: u32,
    #[serde(rename = "airingAt")]
    pub airing_at: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
struct AiringScheduleData {
    episode: u32,
    #[serde(rename = "airingAt")]
    airing_at: i64,
    media: Option<MediaData>,
}

/// One entry of a paged AniList listing. These pages pass through the cache
/// as JSON, so they deserialize too.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnilistHit {
    pub id: String,
    pub mal_id: Option<i64>,
    pub title: AnimeTitle,
    pub status: Option<String>,
    pub image: Option<String>,
    pub cover: Option<String>,
    pub rating: Option<i32>,
    pub genres: Vec<String>,
    pub total_episodes: Option<u32>,
    #[serde(rename = "type")]
    pub media_type: Option<String>,
    pub release_date: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnilistPage {
    pub current_page: u32,
    pub has_next_page: bool,
    pub total_pages: u32,
    pub results: Vec<AnilistHit>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiringHit {
    pub id: String,
    pub episode: u32,
    pub airing_at: i64,
    pub title: Option<AnimeTitle>,
    pub image: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiringPage {
    pub current_page: u32,
    pub has_next_page: bool,
    pub results: Vec<AiringHit>,
}

impl AniListClient {
    pub fn new() -> Self {
        Self::with_api_url(ANILIST_API_URL.to_string())
    }

    pub fn with_api_url(api_url: String) -> Self {
        Self {
            client: Client::new(),
            api_url,
        }
    }

    async fn execute(&self, query: String, variables: serde_json::Value) -> Result<ResponseData, GatewayError> {
        let request = GraphQLRequest { query, variables };

        let response: GraphQLResponse = self
            .client
            .post(&self.api_url)
            .json(&request)
            .send()
            .await
            .map_err(GatewayError::upstream)?
            .json()
            .await
            .map_err(GatewayError::upstream)?;

        response
            .data
            .ok_or_else(|| GatewayError::UpstreamUnavailable("AniList returned no data".into()))
    }

    async fn paged_media(
        &self,
        query: String,
        variables: serde_json::Value,
    ) -> Result<AnilistPage, GatewayError> {
        let data = self.execute(query, variables).await?;
        let page = data
            .page
            .ok_or_else(|| GatewayError::UpstreamUnavailable("AniList returned no page".into()))?;

        let info = page.page_info.unwrap_or(PageInfo {
            current_page: None,
            has_next_page: None,
            last_page: None,
        });

        Ok(AnilistPage {
            current_page: info.current_page.unwrap_or(1),
            has_next_page: info.has_next_page.unwrap_or(false),
            total_pages: info.last_page.unwrap_or(1),
            results: page
                .media
                .unwrap_or_default()
                .iter()
                .map(media_to_hit)
                .collect(),
        })
    }

    /// Search for anime by title
    pub async fn search(&self, query: &str, page: u32, per_page: u32) -> Result<AnilistPage, GatewayError> {
        let graphql_query = format!(
            r#"
            query ($search: String, $page: Int, $perPage: Int) {{
                Page(page: $page, perPage: $perPage) {{
                    pageInfo {{
                        currentPage
                        hasNextPage
                        lastPage
                    }}
                    media(search: $search, type: ANIME, sort: SEARCH_MATCH) {{
                        {MEDIA_FIELDS}
                    }}
                }}
            }}
        "#
        );

        let variables = serde_json::json!({
            "search": query,
            "page": page,
            "perPage": per_page,
        });

        self.paged_media(graphql_query, variables).await
    }

    pub async fn fetch_trending(&self, page: u32, per_page: u32) -> Result<AnilistPage, GatewayError> {
        self.sorted_listing("TRENDING_DESC", page, per_page).await
    }

    pub async fn fetch_popular(&self, page: u32, per_page: u32) -> Result<AnilistPage, GatewayError> {
        self.sorted_listing("POPULARITY_DESC", page, per_page).await
    }

    async fn sorted_listing(
        &self,
        sort: &str,
        page: u32,
        per_page: u32,
    ) -> Result<AnilistPage, GatewayError> {
        let graphql_query = format!(
            r#"
            query ($page: Int, $perPage: Int) {{
                Page(page: $page, perPage: $perPage) {{
                    pageInfo {{
                        currentPage
                        hasNextPage
                        lastPage
                    }}
                    media(type: ANIME, sort: {sort}) {{
                        {MEDIA_FIELDS}
                    }}
                }}
            }}
        "#
        );

        let variables = serde_json::json!({
            "page": page,
            "perPage": per_page,
        });

        self.paged_media(graphql_query, variables).await
    }

    /// Airing schedule for a time window, in Unix seconds.
    pub async fn fetch_airing_schedule(
        &self,
        page: u32,
        per_page: u32,
        week_start: i64,
        week_end: i64,
        not_yet_aired: bool,
    ) -> Result<AiringPage, GatewayError> {
        let graphql_query = format!(
            r#"
            query ($page: Int, $perPage: Int, $weekStart: Int, $weekEnd: Int, $notYetAired: Boolean) {{
                Page(page: $page, perPage: $perPage) {{
                    pageInfo {{
                        currentPage
                        hasNextPage
                    }}
                    airingSchedules(airingAt_greater: $weekStart, airingAt_lesser: $weekEnd, notYetAired: $notYetAired) {{
                        episode
                        airingAt
                        media {{
                            {MEDIA_FIELDS}
                        }}
                    }}
                }}
            }}
        "#
        );

        let variables = serde_json::json!({
            "page": page,
            "perPage": per_page,
            "weekStart": week_start,
            "weekEnd": week_end,
            "notYetAired": not_yet_aired,
        });

        let data = self.execute(graphql_query, variables).await?;
        let page_data = data
            .page
            .ok_or_else(|| GatewayError::UpstreamUnavailable("AniList returned no page".into()))?;

        let info = page_data.page_info.unwrap_or(PageInfo {
            current_page: None,
            has_next_page: None,
            last_page: None,
        });

        Ok(AiringPage {
            current_page: info.current_page.unwrap_or(1),
            has_next_page: info.has_next_page.unwrap_or(false),
            results: page_data
                .airing_schedules
                .unwrap_or_default()
                .into_iter()
                .map(|s| AiringHit {
                    id: s
                        .media
                        .as_ref()
                        .map(|m| m.id.to_string())
                        .unwrap_or_default(),
                    episode: s.episode,
                    airing_at: s.airing_at,
                    title: s.media.as_ref().and_then(|m| m.title.clone()).map(title_to_model),
                    image: s.media.as_ref().and_then(cover_of),
                })
                .collect(),
        })
    }

    /// Title-level info by AniList id. The episode list is attached later by
    /// reconciliation against the streaming catalog.
    pub async fn fetch_info(&self, id: &str) -> Result<AnimeInfo, GatewayError> {
        let numeric: i64 = id
            .parse()
            .map_err(|_| GatewayError::InvalidIdentifier(format!("not an AniList id: {id}")))?;

        let graphql_query = format!(
            r#"
            query ($id: Int) {{
                Media(id: $id, type: ANIME) {{
                    {MEDIA_FIELDS}
                }}
            }}
        "#
        );

        let variables = serde_json::json!({ "id": numeric });

        let data = self.execute(graphql_query, variables).await?;
        let media = data.media.ok_or(GatewayError::EmptyResult)?;
        Ok(media_to_info(&media))
    }
}

impl Default for AniListClient {
    fn default() -> Self {
        Self::new()
    }
}

fn title_to_model(title: TitleData) -> AnimeTitle {
    AnimeTitle {
        romaji: title.romaji,
        english: title.english,
        native: title.native,
    }
}

fn cover_of(media: &MediaData) -> Option<String> {
    media
        .cover_image
        .as_ref()
        .and_then(|c| c.extra_large.clone().or_else(|| c.large.clone()).or_else(|| c.medium.clone()))
}

fn media_to_hit(media: &MediaData) -> AnilistHit {
    AnilistHit {
        id: media.id.to_string(),
        mal_id: media.id_mal,
        title: media.title.clone().map(title_to_model).unwrap_or(AnimeTitle {
            romaji: None,
            english: None,
            native: None,
        }),
        status: media.status.clone(),
        image: cover_of(media),
        cover: media.banner_image.clone(),
        rating: media.average_score,
        genres: media.genres.clone().unwrap_or_default(),
        total_episodes: media.episodes,
        media_type: media.format.clone(),
        release_date: media.season_year,
    }
}

fn media_to_info(media: &MediaData) -> AnimeInfo {
    // While a show is airing, the released count is one behind the next
    // scheduled episode. Finished shows have released everything.
    let current_episode = match &media.next_airing_episode {
        Some(next) => next.episode.saturating_sub(1),
        None => media.episodes.unwrap_or(0),
    };

    // Strip any HTML AniList leaves in descriptions.
    let description = media.description.as_ref().map(|d| {
        static HTML_TAG: OnceLock<regex::Regex> = OnceLock::new();
        // The pattern is a literal; compilation cannot fail at runtime.
        let re = HTML_TAG.get_or_init(|| regex::Regex::new(r"<[^>]+>").unwrap());
        re.replace_all(d, "").trim().to_string()
    });

    AnimeInfo {
        id: media.id.to_string(),
        title: media.title.clone().map(title_to_model).unwrap_or(AnimeTitle {
            romaji: None,
            english: None,
            native: None,
        }),
        image: cover_of(media),
        cover: media.banner_image.clone(),
        description,
        status: media.status.clone(),
        release_date: media.season_year,
        total_episodes: media.episodes,
        current_episode: Some(current_episode),
        genres: media.genres.clone().unwrap_or_default(),
        episodes: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_media(next: Option<NextAiringEpisode>) -> MediaData {
        MediaData {
            id: 16498,
            id_mal: Some(16498),
            title: Some(TitleData {
                romaji: Some("Shingeki no Kyojin".to_string()),
                english: Some("Attack on Titan".to_string()),
                native: Some("進撃の巨人".to_string()),
            }),
            status: Some("RELEASING".to_string()),
            cover_image: Some(CoverImage {
                extra_large: Some("https://example.com/xl.jpg".to_string()),
                large: None,
                medium: None,
            }),
            banner_image: Some("https://example.com/banner.jpg".to_string()),
            description: Some("Humanity fights <i>titans</i>.".to_string()),
            average_score: Some(85),
            genres: Some(vec!["Action".to_string()]),
            episodes: Some(25),
            season_year: Some(2013),
            format: Some("TV".to_string()),
            next_airing_episode: next,
        }
    }

    #[test]
    fn current_episode_trails_next_airing() {
        let media = sample_media(Some(NextAiringEpisode {
            episode: 6,
            airing_at: Some(1_700_000_000),
        }));
        let info = media_to_info(&media);
        assert_eq!(info.current_episode, Some(5));
    }

    #[test]
    fn finished_show_releases_all_episodes() {
        let mut media = sample_media(None);
        media.status = Some("FINISHED".to_string());
        let info = media_to_info(&media);
        assert_eq!(info.current_episode, Some(25));
    }

    #[test]
    fn description_loses_html_tags() {
        let info = media_to_info(&sample_media(None));
        assert_eq!(info.description.as_deref(), Some("Humanity fights titans."));
    }

    #[test]
    fn hit_prefers_extra_large_cover() {
        let hit = media_to_hit(&sample_media(None));
        assert_eq!(hit.image.as_deref(), Some("https://example.com/xl.jpg"));
        assert_eq!(hit.cover.as_deref(), Some("https://example.com/banner.jpg"));
    }

    // Listing pages are stored in the cache as JSON and read back on hits,
    // so they must decode from their own serialized form.
    #[test]
    fn listing_page_survives_cache_encoding() {
        let page = AnilistPage {
            current_page: 2,
            has_next_page: true,
            total_pages: 10,
            results: vec![media_to_hit(&sample_media(None))],
        };

        let raw = serde_json::to_string(&page).unwrap();
        let restored: AnilistPage = serde_json::from_str(&raw).unwrap();
        assert_eq!(restored.current_page, 2);
        assert_eq!(restored.results.len(), 1);
        assert_eq!(restored.results[0].id, "16498");
    }
}
