// Per-user overview and trend report across all platforms for the last N
// days.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::Serialize;

use super::engagement::{self, EngagementTrend, PlatformEngagement};
use super::sentiment::SentimentLabel;
use super::trends::{
    self, Anomaly, Forecast, GrowthRate, PostingTimes, SeriesTrend, SmoothedPoint, TimePoint,
};
use crate::config::AnalyticsConfig;
use crate::db::Database;
use crate::error::MonitorError;
use crate::models::{Platform, Post};

pub const MAX_DASHBOARD_DAYS: u32 = 90;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SentimentCounts {
    pub positive: usize,
    pub neutral: usize,
    pub negative: usize,
}

impl SentimentCounts {
    fn add(&mut self, label: SentimentLabel) {
        match label {
            SentimentLabel::Positive => self.positive += 1,
            SentimentLabel::Neutral => self.neutral += 1,
            SentimentLabel::Negative => self.negative += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.positive + self.neutral + self.negative
    }
}

/// Label counts for posts published on one UTC day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SentimentBucket {
    pub date: NaiveDate,
    #[serde(flatten)]
    pub counts: SentimentCounts,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardSummary {
    pub user_id: i64,
    pub days: u32,
    pub generated_at: DateTime<Utc>,
    pub total_entities: usize,
    pub entities: BTreeMap<Platform, usize>,
    pub total_content: usize,
    /// Posts per platform; twitch counts stream snapshots.
    pub content: BTreeMap<Platform, usize>,
    pub sentiment: SentimentCounts,
    pub engagement: Vec<PlatformEngagement>,
}

pub fn check_days(days: u32) -> Result<(), MonitorError> {
    if days == 0 || days > MAX_DASHBOARD_DAYS {
        return Err(MonitorError::DaysOutOfRange {
            max: MAX_DASHBOARD_DAYS,
            got: days,
        });
    }
    Ok(())
}

/// Build the dashboard for `user_id` over the last `days` days (1..=90).
pub fn dashboard(
    db: &Database,
    user_id: i64,
    days: u32,
    reddit_comment_weight: f64,
) -> Result<DashboardSummary, MonitorError> {
    check_days(days)?;
    let now = Utc::now();
    let since = now - Duration::days(i64::from(days));

    let mut entities: BTreeMap<Platform, usize> = Platform::ALL.iter().map(|&p| (p, 0)).collect();
    let tracked = db.list_entities(user_id)?;
    for e in &tracked {
        *entities.entry(e.platform).or_default() += 1;
    }

    let posts = db.posts_for_user(user_id, since)?;
    let snapshots = db.snapshots_for_user(user_id, since)?;

    let mut content: BTreeMap<Platform, usize> = Platform::ALL.iter().map(|&p| (p, 0)).collect();
    for p in &posts {
        *content.entry(p.platform).or_default() += 1;
    }
    *content.entry(Platform::Twitch).or_default() += snapshots.len();

    // Chat rates are not collected, so twitch engagement reads N/A.
    let engagement = engagement::summary(&posts, &[], reddit_comment_weight);

    Ok(DashboardSummary {
        user_id,
        days,
        generated_at: now,
        total_entities: tracked.len(),
        entities,
        total_content: content.values().sum(),
        content,
        sentiment: sentiment_counts(&posts),
        engagement,
    })
}

/// Label counts over every scored post.
pub fn sentiment_counts(posts: &[Post]) -> SentimentCounts {
    let mut counts = SentimentCounts::default();
    for compound in posts.iter().filter_map(|p| p.sentiment_compound) {
        counts.add(SentimentLabel::from_compound(compound));
    }
    counts
}

/// Daily label counts, oldest day first. Unscored posts are left out.
pub fn sentiment_timeline(posts: &[Post]) -> Vec<SentimentBucket> {
    let mut days: BTreeMap<NaiveDate, SentimentCounts> = BTreeMap::new();
    for p in posts {
        if let Some(compound) = p.sentiment_compound {
            days.entry(p.published_at.date_naive())
                .or_default()
                .add(SentimentLabel::from_compound(compound));
        }
    }
    days.into_iter()
        .map(|(date, counts)| SentimentBucket { date, counts })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendReport {
    pub user_id: i64,
    pub entity_id: Option<i64>,
    pub days: u32,
    /// Mean engagement of this window against the window before it.
    pub engagement_change: EngagementTrend,
    /// Post count of this window against the window before it.
    pub volume_growth: GrowthRate,
    pub daily: Vec<TimePoint>,
    pub trend: SeriesTrend,
    pub anomalies: Vec<Anomaly>,
    pub smoothed: Vec<SmoothedPoint>,
    /// Next day's mean engagement.
    pub forecast: Forecast,
    pub posting_times: PostingTimes,
}

/// Engagement trends for the user's posts (or one entity's) over the last
/// `days` days, compared with the `days` before that.
pub fn trend_report(
    db: &Database,
    user_id: i64,
    entity_id: Option<i64>,
    days: u32,
    settings: &AnalyticsConfig,
) -> Result<TrendReport, MonitorError> {
    check_days(days)?;
    let since = Utc::now() - Duration::days(i64::from(days));
    let window_start = since - Duration::days(i64::from(days));

    let posts = match entity_id {
        Some(id) => {
            db.get_entity(user_id, id)?
                .ok_or(MonitorError::EntityNotFound(id))?;
            db.posts_for_entity(user_id, id, window_start)?
        }
        None => db.posts_for_user(user_id, window_start)?,
    };
    let (current, previous): (Vec<&Post>, Vec<&Post>) =
        posts.iter().partition(|p| p.published_at >= since);

    let weight = settings.reddit_comment_weight;
    let mean_engagement = |ps: &[&Post]| {
        let values: Vec<f64> = ps
            .iter()
            .map(|p| engagement::post_engagement(p, weight))
            .collect();
        engagement::average(&values)
    };

    let daily = daily_engagement(&current, weight);
    let timed: Vec<(DateTime<Utc>, f64)> = current
        .iter()
        .map(|p| (p.published_at, engagement::post_engagement(p, weight)))
        .collect();

    Ok(TrendReport {
        user_id,
        entity_id,
        days,
        engagement_change: engagement::trend(
            mean_engagement(current.as_slice()),
            mean_engagement(previous.as_slice()),
        ),
        volume_growth: trends::growth_rate(current.len() as f64, previous.len() as f64, days),
        trend: trends::series_trend(&daily),
        anomalies: trends::detect_anomalies(&daily, settings.anomaly_threshold),
        smoothed: trends::moving_average(&daily, settings.moving_average_window),
        forecast: trends::forecast(&daily, 1),
        posting_times: trends::best_posting_times(&timed),
        daily,
    })
}

/// Mean engagement per UTC day, stamped at midnight, oldest first.
pub fn daily_engagement(posts: &[&Post], reddit_comment_weight: f64) -> Vec<TimePoint> {
    let mut days: BTreeMap<NaiveDate, Vec<f64>> = BTreeMap::new();
    for p in posts {
        days.entry(p.published_at.date_naive())
            .or_default()
            .push(engagement::post_engagement(p, reddit_comment_weight));
    }
    days.into_iter()
        .map(|(date, values)| TimePoint {
            timestamp: date.and_time(NaiveTime::MIN).and_utc(),
            value: engagement::average(&values),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::CredentialCipher;
    use crate::models::{CollectedPost, Credentials, NewEntity, StreamSnapshot};
    use chrono::TimeZone;

    fn track(db: &Database, user: i64, platform: Platform, handle: &str) -> crate::models::MonitoredEntity {
        db.insert_entity(
            user,
            &NewEntity {
                platform,
                handle: handle.into(),
                display_name: None,
                interval_secs: None,
                days_to_collect: 7,
            },
            platform.default_interval_secs(),
        )
        .unwrap()
    }

    fn collected(id: &str, likes: i64, views: i64, age_days: i64) -> CollectedPost {
        CollectedPost {
            external_id: id.into(),
            text: String::new(),
            author: None,
            published_at: Utc::now() - Duration::days(age_days),
            likes,
            shares: 0,
            replies: 0,
            views,
        }
    }

    #[test]
    fn days_must_be_in_range() {
        assert!(check_days(1).is_ok());
        assert!(check_days(90).is_ok());
        assert!(matches!(
            check_days(0),
            Err(MonitorError::DaysOutOfRange { max: 90, got: 0 })
        ));
        assert!(check_days(91).is_err());
    }

    #[test]
    fn summary_counts_only_the_users_recent_content() {
        let db = Database::open(":memory:", CredentialCipher::random()).unwrap();
        let alice = db.create_user("alice", "a@example.com", "ha").unwrap().id;
        let bob = db.create_user("bob", "b@example.com", "hb").unwrap().id;
        db.insert_profile(alice, Platform::Twitter, "p", &Credentials::new(), true)
            .unwrap();

        let tw = track(&db, alice, Platform::Twitter, "rustlang");
        let tv = track(&db, alice, Platform::Twitch, "shroud");
        let other = track(&db, bob, Platform::Twitter, "rustlang");

        db.upsert_post(&tw, &collected("1", 10, 1000, 1), Some(0.8)).unwrap();
        db.upsert_post(&tw, &collected("2", 0, 1000, 2), Some(-0.5)).unwrap();
        db.upsert_post(&tw, &collected("3", 0, 1000, 3), Some(0.0)).unwrap();
        db.upsert_post(&tw, &collected("old", 0, 1000, 30), Some(0.9)).unwrap();
        db.upsert_post(&other, &collected("9", 5, 10, 1), Some(0.9)).unwrap();
        db.insert_snapshot(
            &tv,
            &StreamSnapshot {
                captured_at: Utc::now(),
                is_live: true,
                viewer_count: 10,
                title: None,
                game_name: None,
            },
        )
        .unwrap();

        let d = dashboard(&db, alice, 7, engagement::DEFAULT_REDDIT_COMMENT_WEIGHT).unwrap();
        assert_eq!(d.total_entities, 2);
        assert_eq!(d.entities[&Platform::Twitter], 1);
        assert_eq!(d.entities[&Platform::Youtube], 0);
        assert_eq!(d.content[&Platform::Twitter], 3);
        assert_eq!(d.content[&Platform::Twitch], 1);
        assert_eq!(d.total_content, 4);
        assert_eq!(
            d.sentiment,
            SentimentCounts {
                positive: 1,
                neutral: 1,
                negative: 1
            }
        );

        let twitter = d
            .engagement
            .iter()
            .find(|e| e.platform == Platform::Twitter)
            .unwrap();
        assert_eq!(twitter.total_items, 3);
        let twitch = d
            .engagement
            .iter()
            .find(|e| e.platform == Platform::Twitch)
            .unwrap();
        assert_eq!(twitch.category, "N/A");

        let v = serde_json::to_value(&d).unwrap();
        assert_eq!(v["entities"]["twitter"], 1);
        assert_eq!(v["sentiment"]["negative"], 1);
    }

    #[test]
    fn daily_engagement_averages_per_day() {
        let reddit = |day: u32, hour: u32, likes: i64| Post {
            id: 0,
            entity_id: 1,
            user_id: 1,
            platform: Platform::Reddit,
            external_id: String::new(),
            text: String::new(),
            author: None,
            published_at: Utc.with_ymd_and_hms(2024, 6, day, hour, 0, 0).unwrap(),
            likes,
            shares: 0,
            replies: 0,
            views: 0,
            sentiment_compound: None,
            collected_at: Utc::now(),
        };
        let posts = [reddit(2, 9, 30), reddit(1, 8, 10), reddit(1, 20, 20)];
        let refs: Vec<&Post> = posts.iter().collect();

        let daily = daily_engagement(&refs, 2.0);
        assert_eq!(daily.len(), 2);
        assert_eq!(daily[0].timestamp, Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap());
        assert_eq!(daily[0].value, 15.0);
        assert_eq!(daily[1].value, 30.0);
    }

    #[test]
    fn trend_report_compares_with_previous_window() {
        let db = Database::open(":memory:", CredentialCipher::random()).unwrap();
        let user = db.create_user("alice", "a@example.com", "ha").unwrap().id;
        let sub = track(&db, user, Platform::Reddit, "rust");
        let reddit_post = |id: &str, likes: i64, age_days: i64| collected(id, likes, 0, age_days);

        db.upsert_post(&sub, &reddit_post("old", 10, 10), None).unwrap();
        db.upsert_post(&sub, &reddit_post("a", 20, 1), None).unwrap();
        db.upsert_post(&sub, &reddit_post("b", 40, 2), None).unwrap();

        let settings = crate::config::MonitorConfig::default().analytics;
        let r = trend_report(&db, user, Some(sub.id), 7, &settings).unwrap();
        assert_eq!(r.volume_growth.absolute_change, 1.0);
        assert_eq!(r.volume_growth.percent_change, 100.0);
        assert_eq!(r.engagement_change.change, 20.0);
        assert_eq!(r.daily.len(), 2);
        assert!(r.posting_times.best_hour.is_some());

        assert!(matches!(
            trend_report(&db, user, Some(999), 7, &settings),
            Err(MonitorError::EntityNotFound(999))
        ));
        assert!(trend_report(&db, user, None, 0, &settings).is_err());
    }

    #[test]
    fn timeline_buckets_by_day() {
        let post = |day: u32, compound: Option<f64>| Post {
            id: 0,
            entity_id: 1,
            user_id: 1,
            platform: Platform::Reddit,
            external_id: String::new(),
            text: String::new(),
            author: None,
            published_at: Utc.with_ymd_and_hms(2024, 6, day, 12, 0, 0).unwrap(),
            likes: 0,
            shares: 0,
            replies: 0,
            views: 0,
            sentiment_compound: compound,
            collected_at: Utc::now(),
        };
        let posts = [
            post(2, Some(0.5)),
            post(1, Some(-0.5)),
            post(1, Some(0.01)),
            post(2, None),
        ];

        let timeline = sentiment_timeline(&posts);
        assert_eq!(timeline.len(), 2);
        assert_eq!(timeline[0].date, NaiveDate::from_ymd_opt(2024, 6, 1).unwrap());
        assert_eq!(timeline[0].counts.negative, 1);
        assert_eq!(timeline[0].counts.neutral, 1);
        assert_eq!(timeline[1].counts.positive, 1);
        assert_eq!(timeline[1].counts.total(), 1);
        assert_eq!(sentiment_counts(&posts).total(), 3);
    }
}
