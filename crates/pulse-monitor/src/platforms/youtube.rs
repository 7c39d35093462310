// YouTube Data API v3: channel search for recent uploads, then per-video
// statistics.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use tracing::debug;

use super::{parse_json, send, PlatformClient, PlatformError};
use crate::models::{CollectedPost, Collection, MonitoredEntity, Platform};

pub const API_BASE: &str = "https://www.googleapis.com";

/// Search pages are capped at 50 results.
const SEARCH_PAGE_MAX: u32 = 50;

pub struct YoutubeClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    max_results: u32,
}

impl YoutubeClient {
    pub fn new(http: reqwest::Client, api_key: &str, max_results: u32) -> Self {
        Self {
            http,
            base_url: API_BASE.to_string(),
            api_key: api_key.to_string(),
            max_results,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<String, PlatformError> {
        let req = self
            .http
            .get(format!("{}{path}", self.base_url.trim_end_matches('/')))
            .query(query)
            .query(&[("key", self.api_key.as_str())]);
        send(Platform::Youtube, req).await
    }
}

#[async_trait]
impl PlatformClient for YoutubeClient {
    async fn collect(
        &self,
        entity: &MonitoredEntity,
        since: DateTime<Utc>,
    ) -> Result<Collection, PlatformError> {
        let channel_id = entity.handle.trim();
        let body = self
            .get(
                "/youtube/v3/search",
                &[
                    ("part", "snippet".to_string()),
                    ("channelId", channel_id.to_string()),
                    ("type", "video".to_string()),
                    ("order", "date".to_string()),
                    (
                        "publishedAfter",
                        since.to_rfc3339_opts(SecondsFormat::Secs, true),
                    ),
                    (
                        "maxResults",
                        self.max_results.clamp(1, SEARCH_PAGE_MAX).to_string(),
                    ),
                ],
            )
            .await?;
        let ids = parse_search_ids(&body)?;
        if ids.is_empty() {
            return Ok(Collection::Posts(Vec::new()));
        }

        let body = self
            .get(
                "/youtube/v3/videos",
                &[
                    ("part", "snippet,statistics".to_string()),
                    ("id", ids.join(",")),
                ],
            )
            .await?;
        let posts = parse_videos(&body)?;
        debug!(channel = channel_id, count = posts.len(), "fetched videos");
        Ok(Collection::Posts(posts))
    }
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Deserialize)]
struct SearchItem {
    id: SearchId,
}

#[derive(Deserialize)]
struct SearchId {
    #[serde(rename = "videoId")]
    video_id: Option<String>,
}

#[derive(Deserialize)]
struct VideosResponse {
    #[serde(default)]
    items: Vec<Video>,
}

#[derive(Deserialize)]
struct Video {
    id: String,
    snippet: Snippet,
    #[serde(default)]
    statistics: Statistics,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snippet {
    title: String,
    #[serde(default)]
    description: String,
    published_at: DateTime<Utc>,
    channel_title: Option<String>,
}

// The API reports counts as decimal strings.
#[derive(Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct Statistics {
    view_count: Option<String>,
    like_count: Option<String>,
    comment_count: Option<String>,
}

fn count(v: &Option<String>) -> i64 {
    v.as_deref().and_then(|s| s.parse().ok()).unwrap_or(0)
}

/// Video ids from a search response; non-video hits are skipped.
pub fn parse_search_ids(body: &str) -> Result<Vec<String>, PlatformError> {
    let resp: SearchResponse = parse_json(Platform::Youtube, body)?;
    Ok(resp.items.into_iter().filter_map(|i| i.id.video_id).collect())
}

/// Videos with statistics. Text is the title followed by the description.
pub fn parse_videos(body: &str) -> Result<Vec<CollectedPost>, PlatformError> {
    let resp: VideosResponse = parse_json(Platform::Youtube, body)?;
    Ok(resp
        .items
        .into_iter()
        .map(|v| {
            let text = if v.snippet.description.trim().is_empty() {
                v.snippet.title.clone()
            } else {
                format!("{}\n{}", v.snippet.title, v.snippet.description)
            };
            CollectedPost {
                external_id: v.id,
                text,
                author: v.snippet.channel_title,
                published_at: v.snippet.published_at,
                likes: count(&v.statistics.like_count),
                shares: 0,
                replies: count(&v.statistics.comment_count),
                views: count(&v.statistics.view_count),
            }
        })
        .collect())
}
