// Domain types shared by storage, collection, analytics and export.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Platform
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Twitter,
    Youtube,
    Reddit,
    Twitch,
}

impl Platform {
    pub const ALL: [Platform; 4] = [
        Platform::Twitter,
        Platform::Youtube,
        Platform::Reddit,
        Platform::Twitch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Twitter => "twitter",
            Platform::Youtube => "youtube",
            Platform::Reddit => "reddit",
            Platform::Twitch => "twitch",
        }
    }

    /// Default polling interval. Live streams change fastest, video uploads
    /// slowest.
    pub fn default_interval_secs(&self) -> u64 {
        match self {
            Platform::Twitch => 30,
            Platform::Twitter => 300,
            Platform::Reddit => 1800,
            Platform::Youtube => 3600,
        }
    }

    /// Credential fields an API profile for this platform must carry.
    pub fn required_credentials(&self) -> &'static [&'static str] {
        match self {
            Platform::Twitch => &["client_id", "client_secret"],
            Platform::Twitter => &["bearer_token"],
            Platform::Youtube => &["api_key"],
            Platform::Reddit => &["client_id", "client_secret", "user_agent"],
        }
    }

    /// What a monitored handle names on this platform.
    pub fn entity_kind(&self) -> &'static str {
        match self {
            Platform::Twitter => "user",
            Platform::Youtube => "channel",
            Platform::Reddit => "subreddit",
            Platform::Twitch => "channel",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownPlatform(pub String);

impl fmt::Display for UnknownPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown platform: {:?}", self.0)
    }
}

impl std::error::Error for UnknownPlatform {}

impl FromStr for Platform {
    type Err = UnknownPlatform;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "twitter" => Ok(Platform::Twitter),
            "youtube" => Ok(Platform::Youtube),
            "reddit" => Ok(Platform::Reddit),
            "twitch" => Ok(Platform::Twitch),
            _ => Err(UnknownPlatform(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Users and profiles
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

/// Validated credential fields, keyed by field name.
pub type Credentials = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq)]
pub struct ApiProfile {
    pub id: i64,
    pub user_id: i64,
    pub platform: Platform,
    pub name: String,
    pub credentials: Credentials,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl ApiProfile {
    pub fn credential(&self, key: &str) -> Option<&str> {
        self.credentials.get(key).map(String::as_str)
    }
}

// ---------------------------------------------------------------------------
// Monitored entities
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitoredEntity {
    pub id: i64,
    pub user_id: i64,
    pub platform: Platform,
    /// Username, channel id, or subreddit name depending on platform.
    pub handle: String,
    pub display_name: Option<String>,
    pub interval_secs: u64,
    pub days_to_collect: u32,
    pub is_monitoring: bool,
    pub total_items: i64,
    pub last_collected: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Request to start tracking an entity.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEntity {
    pub platform: Platform,
    pub handle: String,
    pub display_name: Option<String>,
    /// Falls back to the platform (or configured) default.
    pub interval_secs: Option<u64>,
    pub days_to_collect: u32,
}

// ---------------------------------------------------------------------------
// Collected content
// ---------------------------------------------------------------------------

/// A post, video or tweet as returned by a platform client.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectedPost {
    pub external_id: String,
    pub text: String,
    pub author: Option<String>,
    pub published_at: DateTime<Utc>,
    /// Likes, upvotes (reddit score).
    pub likes: i64,
    /// Retweets and quotes. Zero where the platform has no equivalent.
    pub shares: i64,
    /// Replies or comments.
    pub replies: i64,
    /// Impressions or views. Zero when the platform does not report them.
    pub views: i64,
}

/// Twitch stream state at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamSnapshot {
    pub captured_at: DateTime<Utc>,
    pub is_live: bool,
    pub viewer_count: i64,
    pub title: Option<String>,
    pub game_name: Option<String>,
}

/// What one collection run produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Collection {
    Posts(Vec<CollectedPost>),
    Stream(StreamSnapshot),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Post {
    pub id: i64,
    pub entity_id: i64,
    pub user_id: i64,
    pub platform: Platform,
    pub external_id: String,
    pub text: String,
    pub author: Option<String>,
    pub published_at: DateTime<Utc>,
    pub likes: i64,
    pub shares: i64,
    pub replies: i64,
    pub views: i64,
    pub sentiment_compound: Option<f64>,
    pub collected_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Job bookkeeping
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Failed,
    Skipped,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
            RunStatus::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(RunStatus::Success),
            "failed" => Some(RunStatus::Failed),
            "skipped" => Some(RunStatus::Skipped),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobRun {
    pub job_id: String,
    pub entity_id: i64,
    pub user_id: i64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: RunStatus,
    pub new_items: i64,
    pub error: Option<String>,
}

/// Scheduler job id for an entity: `{platform}_monitor_{entity_id}`.
pub fn job_id(platform: Platform, entity_id: i64) -> String {
    format!("{}_monitor_{}", platform.as_str(), entity_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_parse_is_case_insensitive() {
        assert_eq!("Twitter".parse::<Platform>(), Ok(Platform::Twitter));
        assert_eq!(" YOUTUBE ".parse::<Platform>(), Ok(Platform::Youtube));
        assert_eq!("reddit".parse::<Platform>(), Ok(Platform::Reddit));
        assert!("myspace".parse::<Platform>().is_err());
    }

    #[test]
    fn default_intervals() {
        assert_eq!(Platform::Twitch.default_interval_secs(), 30);
        assert_eq!(Platform::Twitter.default_interval_secs(), 300);
        assert_eq!(Platform::Reddit.default_interval_secs(), 1800);
        assert_eq!(Platform::Youtube.default_interval_secs(), 3600);
    }

    #[test]
    fn job_ids_follow_platform_prefix() {
        assert_eq!(job_id(Platform::Twitch, 42), "twitch_monitor_42");
        assert_eq!(job_id(Platform::Reddit, 7), "reddit_monitor_7");
    }

    #[test]
    fn run_status_round_trip() {
        for s in [RunStatus::Success, RunStatus::Failed, RunStatus::Skipped] {
            assert_eq!(RunStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(RunStatus::parse("bogus"), None);
    }
}
