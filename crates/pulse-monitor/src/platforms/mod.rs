// Platform API clients. Each client turns one monitored entity into a
// `Collection`; response parsing is kept in pure functions per platform.

pub mod reddit;
pub mod twitch;
pub mod twitter;
pub mod youtube;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{ApiProfile, Collection, Credentials, MonitoredEntity, Platform};

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("missing credential `{field}` for {platform}")]
    MissingCredential {
        platform: Platform,
        field: &'static str,
    },

    #[error("credentials for {platform} must be a JSON object")]
    InvalidCredentials { platform: Platform },

    #[error("{platform} request failed: {source}")]
    Http {
        platform: Platform,
        #[source]
        source: reqwest::Error,
    },

    #[error("{platform} API returned HTTP {status}: {body}")]
    Status {
        platform: Platform,
        status: u16,
        body: String,
    },

    #[error("unexpected {platform} response: {message}")]
    Parse { platform: Platform, message: String },

    #[error("{platform} {kind} not found: {handle}")]
    NotFound {
        platform: Platform,
        kind: &'static str,
        handle: String,
    },
}

impl PlatformError {
    fn parse(platform: Platform, message: impl Into<String>) -> Self {
        PlatformError::Parse {
            platform,
            message: message.into(),
        }
    }

    fn not_found(platform: Platform, handle: &str) -> Self {
        PlatformError::NotFound {
            platform,
            kind: platform.entity_kind(),
            handle: handle.to_string(),
        }
    }
}

/// Check that `value` is an object carrying every credential `platform`
/// requires as a non-empty string. Only the required fields are kept.
pub fn validate_credentials(
    platform: Platform,
    value: &serde_json::Value,
) -> Result<Credentials, PlatformError> {
    let obj = value
        .as_object()
        .ok_or(PlatformError::InvalidCredentials { platform })?;

    let mut creds = Credentials::new();
    for &field in platform.required_credentials() {
        let v = obj
            .get(field)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(PlatformError::MissingCredential { platform, field })?;
        creds.insert(field.to_string(), v.to_string());
    }
    Ok(creds)
}

/// Fetches fresh content for one entity.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Items published at or after `since`. Stream platforms ignore `since`
    /// and return the current state.
    async fn collect(
        &self,
        entity: &MonitoredEntity,
        since: DateTime<Utc>,
    ) -> Result<Collection, PlatformError>;
}

/// Builds a client from a stored credential profile.
pub trait ClientFactory: Send + Sync {
    fn client(&self, profile: &ApiProfile) -> Result<Box<dyn PlatformClient>, PlatformError>;
}

/// Factory for the real HTTP clients.
pub struct HttpClientFactory {
    http: reqwest::Client,
    max_results: u32,
}

impl HttpClientFactory {
    pub fn new(timeout: Duration, max_results: u32) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("pulse-monitor/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http, max_results })
    }
}

fn required<'a>(profile: &'a ApiProfile, field: &'static str) -> Result<&'a str, PlatformError> {
    profile
        .credential(field)
        .ok_or(PlatformError::MissingCredential {
            platform: profile.platform,
            field,
        })
}

impl ClientFactory for HttpClientFactory {
    fn client(&self, profile: &ApiProfile) -> Result<Box<dyn PlatformClient>, PlatformError> {
        let http = self.http.clone();
        let client: Box<dyn PlatformClient> = match profile.platform {
            Platform::Twitter => Box::new(twitter::TwitterClient::new(
                http,
                required(profile, "bearer_token")?,
                self.max_results,
            )),
            Platform::Youtube => Box::new(youtube::YoutubeClient::new(
                http,
                required(profile, "api_key")?,
                self.max_results,
            )),
            Platform::Reddit => Box::new(reddit::RedditClient::new(
                http,
                reddit::RedditCredentials {
                    client_id: required(profile, "client_id")?.to_string(),
                    client_secret: required(profile, "client_secret")?.to_string(),
                    user_agent: required(profile, "user_agent")?.to_string(),
                },
                self.max_results,
            )),
            Platform::Twitch => Box::new(twitch::TwitchClient::new(
                http,
                required(profile, "client_id")?,
                required(profile, "client_secret")?,
            )),
        };
        Ok(client)
    }
}

/// Send a request and return the body, mapping transport failures and
/// non-2xx statuses to `PlatformError`.
pub(crate) async fn send(
    platform: Platform,
    request: reqwest::RequestBuilder,
) -> Result<String, PlatformError> {
    let resp = request
        .send()
        .await
        .map_err(|source| PlatformError::Http { platform, source })?;
    let status = resp.status();
    let body = resp
        .text()
        .await
        .map_err(|source| PlatformError::Http { platform, source })?;
    if !status.is_success() {
        return Err(PlatformError::Status {
            platform,
            status: status.as_u16(),
            body: truncate(&body, 200),
        });
    }
    Ok(body)
}

pub(crate) fn parse_json<T: serde::de::DeserializeOwned>(
    platform: Platform,
    body: &str,
) -> Result<T, PlatformError> {
    serde_json::from_str(body).map_err(|e| PlatformError::parse(platform, e.to_string()))
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

/// Minimal HTTP/1.1 server for client tests. Routes match on the request
/// path without its query string; every request line is recorded.
#[cfg(test)]
pub(crate) mod mock {
    use std::sync::{Arc, Mutex};

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    pub struct MockServer {
        pub base_url: String,
        requests: Arc<Mutex<Vec<String>>>,
    }

    impl MockServer {
        /// Request lines seen so far, e.g. `GET /2/users/1/tweets?x=1`.
        pub fn requests(&self) -> Vec<String> {
            self.requests.lock().unwrap().clone()
        }
    }

    pub async fn serve(routes: Vec<(&'static str, u16, String)>) -> MockServer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = requests.clone();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let routes = routes.clone();
                let seen = seen.clone();
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 8192];
                    let n = socket.read(&mut buf).await.unwrap_or(0);
                    let request = String::from_utf8_lossy(&buf[..n]).to_string();
                    let line = request.lines().next().unwrap_or("").to_string();
                    let target = line.split_whitespace().nth(1).unwrap_or("/").to_string();
                    let path = target.split('?').next().unwrap_or("/").to_string();
                    seen.lock().unwrap().push(format!(
                        "{} {target}",
                        line.split_whitespace().next().unwrap_or("")
                    ));

                    let (code, body) = routes
                        .iter()
                        .find(|(p, _, _)| *p == path)
                        .map(|(_, c, b)| (*c, b.clone()))
                        .unwrap_or((404, String::new()));
                    let response = format!(
                        "HTTP/1.1 {code} X\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.flush().await;
                });
            }
        });
        MockServer {
            base_url: format!("http://{addr}"),
            requests,
        }
    }
}
