// Engagement metrics per platform and cross-platform summaries.

use serde::Serialize;

use crate::models::{Platform, Post};

pub const DEFAULT_REDDIT_COMMENT_WEIGHT: f64 = 2.0;

/// `(likes + retweets + replies) / impressions * 100`; 0 without impressions.
pub fn twitter_rate(likes: i64, retweets: i64, replies: i64, impressions: i64) -> f64 {
    if impressions == 0 {
        return 0.0;
    }
    (likes + retweets + replies) as f64 / impressions as f64 * 100.0
}

/// Reddit exposes no view counts, so this is a score rather than a rate.
pub fn reddit_score(upvotes: i64, comments: i64, comment_weight: f64) -> f64 {
    upvotes as f64 + comments as f64 * comment_weight
}

/// `(likes + comments) / views * 100`; 0 without views.
pub fn youtube_rate(likes: i64, comments: i64, views: i64) -> f64 {
    if views == 0 {
        return 0.0;
    }
    (likes + comments) as f64 / views as f64 * 100.0
}

/// `messages_per_minute / viewers * 100`; 0 without viewers.
pub fn twitch_rate(messages_per_minute: f64, viewer_count: i64) -> f64 {
    if viewer_count == 0 {
        return 0.0;
    }
    messages_per_minute / viewer_count as f64 * 100.0
}

/// Engagement of a stored post using its platform's formula.
pub fn post_engagement(post: &Post, reddit_comment_weight: f64) -> f64 {
    match post.platform {
        Platform::Twitter => twitter_rate(post.likes, post.shares, post.replies, post.views),
        Platform::Youtube => youtube_rate(post.likes, post.replies, post.views),
        Platform::Reddit => reddit_score(post.likes, post.replies, reddit_comment_weight),
        // Chat rate is not collected; posts never carry twitch content.
        Platform::Twitch => 0.0,
    }
}

pub fn average(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Stable,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EngagementTrend {
    pub change: f64,
    pub percent_change: f64,
    pub direction: Direction,
}

pub fn trend(current: f64, previous: f64) -> EngagementTrend {
    if previous == 0.0 {
        if current > 0.0 {
            return EngagementTrend {
                change: current,
                percent_change: 100.0,
                direction: Direction::Up,
            };
        }
        return EngagementTrend {
            change: 0.0,
            percent_change: 0.0,
            direction: Direction::Stable,
        };
    }

    let change = current - previous;
    let direction = if change > 0.0 {
        Direction::Up
    } else if change < 0.0 {
        Direction::Down
    } else {
        Direction::Stable
    };
    EngagementTrend {
        change,
        percent_change: change / previous * 100.0,
        direction,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EngagementCategory {
    Low,
    Medium,
    High,
    Excellent,
}

impl EngagementCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngagementCategory::Low => "Low",
            EngagementCategory::Medium => "Medium",
            EngagementCategory::High => "High",
            EngagementCategory::Excellent => "Excellent",
        }
    }
}

/// (medium, high, excellent) lower bounds.
fn thresholds(platform: Option<Platform>) -> (f64, f64, f64) {
    match platform {
        Some(Platform::Twitter) => (0.5, 1.5, 3.0),
        Some(Platform::Youtube) => (2.0, 5.0, 10.0),
        Some(Platform::Twitch) => (1.0, 3.0, 5.0),
        Some(Platform::Reddit) => (50.0, 200.0, 500.0),
        None => (1.0, 3.0, 5.0),
    }
}

/// Bucket a rate using the platform's thresholds; `None` uses the generic
/// 1/3/5 scale.
pub fn categorize(rate: f64, platform: Option<Platform>) -> EngagementCategory {
    let (medium, high, excellent) = thresholds(platform);
    if rate >= excellent {
        EngagementCategory::Excellent
    } else if rate >= high {
        EngagementCategory::High
    } else if rate >= medium {
        EngagementCategory::Medium
    } else {
        EngagementCategory::Low
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlatformEngagement {
    pub platform: Platform,
    /// Average rate (score for reddit), rounded to 2 decimals.
    pub average: f64,
    pub total_items: usize,
    /// `"N/A"` when there is no data.
    pub category: String,
}

/// Per-platform averages for every platform, in [`Platform::ALL`] order.
/// Twitch rows come from `(messages_per_minute, viewers)` samples.
pub fn summary(
    posts: &[Post],
    twitch_samples: &[(f64, i64)],
    reddit_comment_weight: f64,
) -> Vec<PlatformEngagement> {
    Platform::ALL
        .iter()
        .map(|&platform| {
            let values: Vec<f64> = if platform == Platform::Twitch {
                twitch_samples
                    .iter()
                    .map(|&(mpm, viewers)| twitch_rate(mpm, viewers))
                    .collect()
            } else {
                posts
                    .iter()
                    .filter(|p| p.platform == platform)
                    .map(|p| post_engagement(p, reddit_comment_weight))
                    .collect()
            };

            if values.is_empty() {
                return PlatformEngagement {
                    platform,
                    average: 0.0,
                    total_items: 0,
                    category: "N/A".into(),
                };
            }
            let avg = average(&values);
            PlatformEngagement {
                platform,
                average: round2(avg),
                total_items: values.len(),
                category: categorize(avg, Some(platform)).as_str().into(),
            }
        })
        .collect()
}

pub(crate) fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
