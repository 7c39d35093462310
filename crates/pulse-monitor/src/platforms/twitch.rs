// Twitch Helix: app access token, then the live stream (if any) of a channel.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use super::{parse_json, send, PlatformClient, PlatformError};
use crate::models::{Collection, MonitoredEntity, Platform, StreamSnapshot};

pub const AUTH_BASE: &str = "https://id.twitch.tv";
pub const API_BASE: &str = "https://api.twitch.tv";

pub struct TwitchClient {
    http: reqwest::Client,
    auth_url: String,
    api_url: String,
    client_id: String,
    client_secret: String,
}

impl TwitchClient {
    pub fn new(http: reqwest::Client, client_id: &str, client_secret: &str) -> Self {
        Self {
            http,
            auth_url: AUTH_BASE.to_string(),
            api_url: API_BASE.to_string(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
        }
    }

    pub fn with_base_urls(mut self, auth_url: impl Into<String>, api_url: impl Into<String>) -> Self {
        self.auth_url = auth_url.into();
        self.api_url = api_url.into();
        self
    }

    async fn app_token(&self) -> Result<String, PlatformError> {
        let req = self
            .http
            .post(format!("{}/oauth2/token", self.auth_url.trim_end_matches('/')))
            .query(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("grant_type", "client_credentials"),
            ]);
        let body = send(Platform::Twitch, req).await?;
        parse_token(&body)
    }
}

#[async_trait]
impl PlatformClient for TwitchClient {
    async fn collect(
        &self,
        entity: &MonitoredEntity,
        _since: DateTime<Utc>,
    ) -> Result<Collection, PlatformError> {
        let login = entity.handle.trim().to_ascii_lowercase();
        let token = self.app_token().await?;

        let req = self
            .http
            .get(format!("{}/helix/streams", self.api_url.trim_end_matches('/')))
            .header("Client-Id", &self.client_id)
            .bearer_auth(token)
            .query(&[("user_login", login.as_str())]);
        let body = send(Platform::Twitch, req).await?;
        let snapshot = parse_streams(&body, Utc::now())?;
        debug!(
            channel = %login,
            live = snapshot.is_live,
            viewers = snapshot.viewer_count,
            "fetched stream state"
        );
        Ok(Collection::Stream(snapshot))
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
}

pub fn parse_token(body: &str) -> Result<String, PlatformError> {
    let resp: TokenResponse = parse_json(Platform::Twitch, body)?;
    resp.access_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| PlatformError::parse(Platform::Twitch, "token response without access_token"))
}

#[derive(Deserialize)]
struct StreamsResponse {
    #[serde(default)]
    data: Vec<Stream>,
}

#[derive(Deserialize)]
struct Stream {
    #[serde(default)]
    viewer_count: i64,
    title: Option<String>,
    game_name: Option<String>,
}

/// Snapshot from a `helix/streams` response. An empty `data` array means
/// the channel is offline.
pub fn parse_streams(body: &str, captured_at: DateTime<Utc>) -> Result<StreamSnapshot, PlatformError> {
    let resp: StreamsResponse = parse_json(Platform::Twitch, body)?;
    Ok(match resp.data.into_iter().next() {
        Some(s) => StreamSnapshot {
            captured_at,
            is_live: true,
            viewer_count: s.viewer_count,
            title: s.title.filter(|t| !t.is_empty()),
            game_name: s.game_name.filter(|g| !g.is_empty()),
        },
        None => StreamSnapshot {
            captured_at,
            is_live: false,
            viewer_count: 0,
            title: None,
            game_name: None,
        },
    })
}
