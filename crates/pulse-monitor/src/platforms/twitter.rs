// Twitter API v2: user lookup, then the user's recent tweets.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use tracing::debug;

use super::{parse_json, send, PlatformClient, PlatformError};
use crate::models::{CollectedPost, Collection, MonitoredEntity, Platform};

pub const API_BASE: &str = "https://api.twitter.com";

const TWEET_FIELDS: &str = "created_at,public_metrics";

pub struct TwitterClient {
    http: reqwest::Client,
    base_url: String,
    bearer_token: String,
    max_results: u32,
}

impl TwitterClient {
    pub fn new(http: reqwest::Client, bearer_token: &str, max_results: u32) -> Self {
        Self {
            http,
            base_url: API_BASE.to_string(),
            bearer_token: bearer_token.to_string(),
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
            .bearer_auth(&self.bearer_token)
            .query(query);
        send(Platform::Twitter, req).await
    }
}

#[async_trait]
impl PlatformClient for TwitterClient {
    async fn collect(
        &self,
        entity: &MonitoredEntity,
        since: DateTime<Utc>,
    ) -> Result<Collection, PlatformError> {
        let username = normalize_handle(&entity.handle);
        let body = self
            .get(&format!("/2/users/by/username/{username}"), &[])
            .await?;
        let user_id = parse_user_id(&body, username)?;

        // The endpoint accepts 5..=100.
        let max = self.max_results.clamp(5, 100);
        let body = self
            .get(
                &format!("/2/users/{user_id}/tweets"),
                &[
                    ("max_results", max.to_string()),
                    ("start_time", since.to_rfc3339_opts(SecondsFormat::Secs, true)),
                    ("tweet.fields", TWEET_FIELDS.to_string()),
                ],
            )
            .await?;
        let posts = parse_tweets(&body, username)?;
        debug!(handle = username, count = posts.len(), "fetched tweets");
        Ok(Collection::Posts(posts))
    }
}

/// Handles may be entered with a leading `@`.
pub fn normalize_handle(handle: &str) -> &str {
    handle.trim().trim_start_matches('@')
}

#[derive(Deserialize)]
struct UserLookup {
    data: Option<UserData>,
}

#[derive(Deserialize)]
struct UserData {
    id: String,
}

#[derive(Deserialize)]
struct TweetPage {
    #[serde(default)]
    data: Vec<Tweet>,
}

#[derive(Deserialize)]
struct Tweet {
    id: String,
    text: String,
    created_at: DateTime<Utc>,
    #[serde(default)]
    public_metrics: PublicMetrics,
}

#[derive(Default, Deserialize)]
#[serde(default)]
struct PublicMetrics {
    retweet_count: i64,
    reply_count: i64,
    like_count: i64,
    quote_count: i64,
    impression_count: i64,
}

/// User id from a `users/by/username` response. A body without `data`
/// (Twitter reports unknown users as an `errors` array) is `NotFound`.
pub fn parse_user_id(body: &str, username: &str) -> Result<String, PlatformError> {
    let lookup: UserLookup = parse_json(Platform::Twitter, body)?;
    lookup
        .data
        .map(|d| d.id)
        .ok_or_else(|| PlatformError::not_found(Platform::Twitter, username))
}

/// Tweets from a `users/{id}/tweets` page. Quotes count as shares.
pub fn parse_tweets(body: &str, username: &str) -> Result<Vec<CollectedPost>, PlatformError> {
    let page: TweetPage = parse_json(Platform::Twitter, body)?;
    Ok(page
        .data
        .into_iter()
        .map(|t| CollectedPost {
            external_id: t.id,
            text: t.text,
            author: Some(username.to_string()),
            published_at: t.created_at,
            likes: t.public_metrics.like_count,
            shares: t.public_metrics.retweet_count + t.public_metrics.quote_count,
            replies: t.public_metrics.reply_count,
            views: t.public_metrics.impression_count,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::mock;
    use chrono::TimeZone;

    const TWEETS: &str = r#"{
        "data": [
            {
                "id": "1001",
                "text": "shipping a release today",
                "created_at": "2024-03-01T10:00:00.000Z",
                "public_metrics": {
                    "retweet_count": 3, "reply_count": 2, "like_count": 10,
                    "quote_count": 1, "impression_count": 500
                }
            },
            {
                "id": "1002",
                "text": "no metrics on this one",
                "created_at": "2024-03-02T11:30:00Z"
            }
        ],
        "meta": { "result_count": 2 }
    }"#;

    fn entity(handle: &str) -> MonitoredEntity {
        MonitoredEntity {
            id: 1,
            user_id: 1,
            platform: Platform::Twitter,
            handle: handle.into(),
            display_name: None,
            interval_secs: 300,
            days_to_collect: 7,
            is_monitoring: true,
            total_items: 0,
            last_collected: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn strips_at_sign() {
        assert_eq!(normalize_handle("@rustlang"), "rustlang");
        assert_eq!(normalize_handle(" rustlang "), "rustlang");
    }

    #[test]
    fn parses_user_lookup() {
        assert_eq!(
            parse_user_id(r#"{"data":{"id":"42","name":"R","username":"r"}}"#, "r").unwrap(),
            "42"
        );
        assert!(matches!(
            parse_user_id(r#"{"errors":[{"detail":"Could not find user"}]}"#, "ghost"),
            Err(PlatformError::NotFound { kind: "user", .. })
        ));
    }

    #[test]
    fn parses_tweets_with_metrics() {
        let posts = parse_tweets(TWEETS, "rustlang").unwrap();
        assert_eq!(posts.len(), 2);

        let first = &posts[0];
        assert_eq!(first.external_id, "1001");
        assert_eq!(first.likes, 10);
        assert_eq!(first.shares, 4);
        assert_eq!(first.replies, 2);
        assert_eq!(first.views, 500);
        assert_eq!(first.author.as_deref(), Some("rustlang"));
        assert_eq!(
            first.published_at,
            Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()
        );

        assert_eq!(posts[1].likes, 0);
        assert_eq!(posts[1].views, 0);
    }

    #[test]
    fn empty_page_has_no_data_key() {
        let posts = parse_tweets(r#"{"meta":{"result_count":0}}"#, "x").unwrap();
        assert!(posts.is_empty());
    }

    #[test]
    fn garbage_is_parse_error() {
        assert!(matches!(
            parse_tweets("not json", "x"),
            Err(PlatformError::Parse { .. })
        ));
    }

    #[tokio::test]
    async fn collect_against_mock_api() {
        let server = mock::serve(vec![
            (
                "/2/users/by/username/rustlang",
                200,
                r#"{"data":{"id":"42"}}"#.to_string(),
            ),
            ("/2/users/42/tweets", 200, TWEETS.to_string()),
        ])
        .await;

        let client = TwitterClient::new(reqwest::Client::new(), "tok", 500)
            .with_base_url(server.base_url.clone());
        let since = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let Collection::Posts(posts) = client.collect(&entity("@rustlang"), since).await.unwrap()
        else {
            panic!("expected posts");
        };
        assert_eq!(posts.len(), 2);

        let requests = server.requests();
        assert_eq!(requests[0], "GET /2/users/by/username/rustlang");
        assert!(requests[1].starts_with("GET /2/users/42/tweets?"));
        assert!(requests[1].contains("max_results=100"));
        assert!(requests[1].contains("start_time=2024-02-01T00%3A00%3A00Z"));
    }

    #[tokio::test]
    async fn http_error_status_is_reported() {
        let server = mock::serve(vec![(
            "/2/users/by/username/rustlang",
            401,
            r#"{"title":"Unauthorized"}"#.to_string(),
        )])
        .await;
        let client = TwitterClient::new(reqwest::Client::new(), "bad", 10)
            .with_base_url(server.base_url.clone());
        let err = client
            .collect(&entity("rustlang"), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, PlatformError::Status { status: 401, .. }));
    }
}
