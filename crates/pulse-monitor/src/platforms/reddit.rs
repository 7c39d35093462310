// Reddit: application-only OAuth token, then the newest submissions of a
// subreddit.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use super::{parse_json, send, PlatformClient, PlatformError};
use crate::models::{CollectedPost, Collection, MonitoredEntity, Platform};

pub const AUTH_BASE: &str = "https://www.reddit.com";
pub const API_BASE: &str = "https://oauth.reddit.com";

const LISTING_MAX: u32 = 100;

#[derive(Debug, Clone)]
pub struct RedditCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub user_agent: String,
}

pub struct RedditClient {
    http: reqwest::Client,
    auth_url: String,
    api_url: String,
    creds: RedditCredentials,
    max_results: u32,
}

impl RedditClient {
    pub fn new(http: reqwest::Client, creds: RedditCredentials, max_results: u32) -> Self {
        Self {
            http,
            auth_url: AUTH_BASE.to_string(),
            api_url: API_BASE.to_string(),
            creds,
            max_results,
        }
    }

    pub fn with_base_urls(mut self, auth_url: impl Into<String>, api_url: impl Into<String>) -> Self {
        self.auth_url = auth_url.into();
        self.api_url = api_url.into();
        self
    }

    async fn access_token(&self) -> Result<String, PlatformError> {
        let req = self
            .http
            .post(format!(
                "{}/api/v1/access_token",
                self.auth_url.trim_end_matches('/')
            ))
            .basic_auth(&self.creds.client_id, Some(&self.creds.client_secret))
            .header(reqwest::header::USER_AGENT, &self.creds.user_agent)
            .form(&[("grant_type", "client_credentials")]);
        let body = send(Platform::Reddit, req).await?;
        parse_token(&body)
    }
}

#[async_trait]
impl PlatformClient for RedditClient {
    async fn collect(
        &self,
        entity: &MonitoredEntity,
        since: DateTime<Utc>,
    ) -> Result<Collection, PlatformError> {
        let subreddit = normalize_subreddit(&entity.handle);
        let token = self.access_token().await?;

        let req = self
            .http
            .get(format!(
                "{}/r/{subreddit}/new",
                self.api_url.trim_end_matches('/')
            ))
            .bearer_auth(token)
            .header(reqwest::header::USER_AGENT, &self.creds.user_agent)
            .query(&[("limit", self.max_results.clamp(1, LISTING_MAX).to_string())]);
        let body = send(Platform::Reddit, req).await?;
        let posts = parse_listing(&body, since)?;
        debug!(subreddit, count = posts.len(), "fetched submissions");
        Ok(Collection::Posts(posts))
    }
}

/// Accepts `rust`, `r/rust` and `/r/rust`.
pub fn normalize_subreddit(handle: &str) -> &str {
    let h = handle.trim().trim_start_matches('/');
    h.strip_prefix("r/").unwrap_or(h)
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
}

pub fn parse_token(body: &str) -> Result<String, PlatformError> {
    let resp: TokenResponse = parse_json(Platform::Reddit, body)?;
    resp.access_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| PlatformError::parse(Platform::Reddit, "token response without access_token"))
}

#[derive(Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Deserialize)]
struct ListingData {
    #[serde(default)]
    children: Vec<Child>,
}

#[derive(Deserialize)]
struct Child {
    data: Submission,
}

#[derive(Deserialize)]
struct Submission {
    id: String,
    title: String,
    #[serde(default)]
    selftext: String,
    author: Option<String>,
    created_utc: f64,
    #[serde(default)]
    score: i64,
    #[serde(default)]
    num_comments: i64,
}

/// Submissions created at or after `since`. The score is stored as likes
/// and comments as replies; deleted authors read `[deleted]`.
pub fn parse_listing(body: &str, since: DateTime<Utc>) -> Result<Vec<CollectedPost>, PlatformError> {
    let listing: Listing = parse_json(Platform::Reddit, body)?;
    let mut posts = Vec::new();
    for child in listing.data.children {
        let s = child.data;
        let published_at = DateTime::from_timestamp(s.created_utc as i64, 0).ok_or_else(|| {
            PlatformError::parse(
                Platform::Reddit,
                format!("created_utc out of range: {}", s.created_utc),
            )
        })?;
        if published_at < since {
            continue;
        }
        let text = if s.selftext.trim().is_empty() {
            s.title
        } else {
            format!("{}\n{}", s.title, s.selftext)
        };
        posts.push(CollectedPost {
            external_id: s.id,
            text,
            author: Some(s.author.unwrap_or_else(|| "[deleted]".to_string())),
            published_at,
            likes: s.score,
            shares: 0,
            replies: s.num_comments,
            views: 0,
        });
    }
    Ok(posts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::mock;
    use chrono::TimeZone;

    // 1717243200 = 2024-06-01T12:00:00Z, 1716984000 = 2024-05-29T12:00:00Z
    const LISTING: &str = r#"{
        "kind": "Listing",
        "data": {
            "children": [
                { "kind": "t3", "data": {
                    "id": "p1", "title": "Rust 2.0 when?", "selftext": "asking for a friend",
                    "author": "ferris", "created_utc": 1717243200.0, "score": 120, "num_comments": 40
                } },
                { "kind": "t3", "data": {
                    "id": "p2", "title": "Link post", "selftext": "",
                    "author": null, "created_utc": 1717243200.0, "score": 5, "num_comments": 0
                } },
                { "kind": "t3", "data": {
                    "id": "old", "title": "Too old", "created_utc": 1716984000.0
                } }
            ]
        }
    }"#;

    fn creds() -> RedditCredentials {
        RedditCredentials {
            client_id: "id".into(),
            client_secret: "secret".into(),
            user_agent: "pulse-test/1.0".into(),
        }
    }

    #[test]
    fn subreddit_prefixes_are_stripped() {
        assert_eq!(normalize_subreddit("rust"), "rust");
        assert_eq!(normalize_subreddit("r/rust"), "rust");
        assert_eq!(normalize_subreddit("/r/rust"), "rust");
    }

    #[test]
    fn token_parsing() {
        assert_eq!(
            parse_token(r#"{"access_token":"abc","token_type":"bearer"}"#).unwrap(),
            "abc"
        );
        assert!(parse_token(r#"{"error":"invalid_grant"}"#).is_err());
    }

    #[test]
    fn listing_filters_by_window() {
        let since = Utc.with_ymd_and_hms(2024, 5, 31, 0, 0, 0).unwrap();
        let posts = parse_listing(LISTING, since).unwrap();
        assert_eq!(posts.len(), 2);

        assert_eq!(posts[0].external_id, "p1");
        assert_eq!(posts[0].text, "Rust 2.0 when?\nasking for a friend");
        assert_eq!(posts[0].likes, 120);
        assert_eq!(posts[0].replies, 40);
        assert_eq!(
            posts[0].published_at,
            Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
        );

        assert_eq!(posts[1].text, "Link post");
        assert_eq!(posts[1].author.as_deref(), Some("[deleted]"));
    }

    #[tokio::test]
    async fn collect_fetches_token_then_listing() {
        let server = mock::serve(vec![
            (
                "/api/v1/access_token",
                200,
                r#"{"access_token":"tok","expires_in":3600}"#.to_string(),
            ),
            ("/r/rust/new", 200, LISTING.to_string()),
        ])
        .await;
        let client = RedditClient::new(reqwest::Client::new(), creds(), 25)
            .with_base_urls(server.base_url.clone(), server.base_url.clone());
        let entity = MonitoredEntity {
            id: 9,
            user_id: 1,
            platform: Platform::Reddit,
            handle: "r/rust".into(),
            display_name: None,
            interval_secs: 1800,
            days_to_collect: 7,
            is_monitoring: true,
            total_items: 0,
            last_collected: None,
            created_at: Utc::now(),
        };
        let since = Utc.with_ymd_and_hms(2024, 5, 31, 0, 0, 0).unwrap();

        let Collection::Posts(posts) = client.collect(&entity, since).await.unwrap() else {
            panic!("expected posts");
        };
        assert_eq!(posts.len(), 2);
        assert_eq!(
            server.requests(),
            vec!["POST /api/v1/access_token", "GET /r/rust/new?limit=25"]
        );
    }
}
