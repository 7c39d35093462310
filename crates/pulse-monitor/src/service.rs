// Application layer: users, profiles, tracked entities, scheduled
// collection and reports, on top of the database and scheduler.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tracing::{info, warn};

use crate::analytics::dashboard::{self, DashboardSummary, TrendReport};
use crate::auth::{generate_token, hash_token};
use crate::collector::{CollectionSummary, Collector};
use crate::config::{MonitorConfig, MAX_RETENTION_DAYS};
use crate::db::{Database, PurgeCounts};
use crate::error::MonitorError;
use crate::export;
use crate::models::{job_id, ApiProfile, JobRun, MonitoredEntity, NewEntity, Platform, User};
use crate::platforms::{validate_credentials, ClientFactory};
use crate::realtime::ConnectionManager;
use crate::scheduler::{JobSpec, JobStatus, Scheduler};
use crate::validation::{require_non_empty, sanitize_input, validate_email, validate_username};
use crate::ws_server::ServerState;

const MAX_HANDLE_LEN: usize = 255;
const MAX_NAME_LEN: usize = 100;

/// Scheduler id of the daily retention purge.
pub const RETENTION_JOB_ID: &str = "data_retention";
const RETENTION_EVERY: Duration = Duration::from_secs(24 * 3600);

pub struct MonitorService {
    db: Arc<Database>,
    config: MonitorConfig,
    collector: Arc<Collector>,
    scheduler: Arc<Scheduler>,
    realtime: Arc<ConnectionManager>,
}

impl MonitorService {
    pub fn new(db: Arc<Database>, config: MonitorConfig, clients: Arc<dyn ClientFactory>) -> Self {
        let realtime = Arc::new(ConnectionManager::new());
        let collector = Arc::new(Collector::new(db.clone(), clients, realtime.clone()));
        let scheduler = Arc::new(Scheduler::new(config.scheduler.max_workers));
        Self {
            db,
            config,
            collector,
            scheduler,
            realtime,
        }
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn realtime(&self) -> &Arc<ConnectionManager> {
        &self.realtime
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Handles the WebSocket and health endpoints need.
    pub fn server_state(&self) -> ServerState {
        ServerState {
            db: self.db.clone(),
            realtime: self.realtime.clone(),
            scheduler: self.scheduler.clone(),
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Schedule every entity with monitoring on, plus the daily retention
    /// purge, and start the scheduler. Returns the number of entity jobs.
    pub fn start(&self) -> Result<usize, MonitorError> {
        let db = self.db.clone();
        let days = self.config.database.retention_days;
        self.scheduler.add_job(JobSpec::new(RETENTION_JOB_ID, RETENTION_EVERY, move || {
            let db = db.clone();
            async move {
                purge_older_than(&db, days)
                    .map(|_| ())
                    .map_err(anyhow::Error::from)
            }
        }))?;

        let entities = self.db.monitoring_entities()?;
        let mut scheduled = 0;
        for e in &entities {
            match self.schedule(e) {
                Ok(()) => scheduled += 1,
                Err(err) => warn!(entity = e.id, "not scheduled: {err}"),
            }
        }
        self.scheduler.start();
        info!(jobs = scheduled, "monitoring started");
        Ok(scheduled)
    }

    pub fn shutdown(&self) {
        self.scheduler.shutdown();
    }

    fn schedule(&self, entity: &MonitoredEntity) -> Result<(), MonitorError> {
        let collector = self.collector.clone();
        let (user_id, entity_id) = (entity.user_id, entity.id);
        self.scheduler.add_job(JobSpec::new(
            job_id(entity.platform, entity.id),
            Duration::from_secs(entity.interval_secs),
            move || {
                let collector = collector.clone();
                async move {
                    collector
                        .collect_entity(user_id, entity_id)
                        .await
                        .map(|_| ())
                        .map_err(anyhow::Error::from)
                }
            },
        ))?;
        Ok(())
    }

    /// Delete posts, snapshots and job runs older than `retention_days`.
    pub fn cleanup(&self, retention_days: u32) -> Result<PurgeCounts, MonitorError> {
        purge_older_than(&self.db, retention_days)
    }

    // ------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------

    /// Register a user. Returns the user and their API token; the token is
    /// not retrievable later.
    pub fn create_user(&self, username: &str, email: &str) -> Result<(User, String), MonitorError> {
        let username = username.trim();
        let email = email.trim().to_ascii_lowercase();
        validate_username(username)?;
        validate_email(&email)?;
        if self.db.user_exists(username, &email)? {
            return Err(MonitorError::UserExists);
        }

        let token = generate_token();
        let user = self.db.create_user(username, &email, &hash_token(&token))?;
        info!(user_id = user.id, "created user {}", user.username);
        Ok((user, token))
    }

    /// Replace the user's API token, invalidating the old one.
    pub fn rotate_token(&self, user_id: i64) -> Result<String, MonitorError> {
        let token = generate_token();
        if !self.db.set_token_hash(user_id, &hash_token(&token))? {
            return Err(MonitorError::UserNotFound);
        }
        info!(user_id, "rotated API token");
        Ok(token)
    }

    pub fn user_by_token(&self, token: &str) -> Result<User, MonitorError> {
        self.db
            .user_by_token_hash(&hash_token(token.trim()))?
            .ok_or(MonitorError::InvalidToken)
    }

    // ------------------------------------------------------------------
    // Profiles
    // ------------------------------------------------------------------

    /// Store a credential profile. `credentials` must be a JSON object with
    /// every field the platform requires.
    pub fn add_profile(
        &self,
        user_id: i64,
        platform: Platform,
        name: &str,
        credentials: &Value,
        activate: bool,
    ) -> Result<ApiProfile, MonitorError> {
        let name = sanitize_input(name, MAX_NAME_LEN);
        require_non_empty("name", &name)?;
        let creds = validate_credentials(platform, credentials)?;
        self.require_user(user_id)?;
        let profile = self
            .db
            .insert_profile(user_id, platform, &name, &creds, activate)?;
        info!(user_id, profile = profile.id, %platform, "added API profile");
        Ok(profile)
    }

    pub fn activate_profile(&self, user_id: i64, profile_id: i64) -> Result<(), MonitorError> {
        if !self.db.activate_profile(user_id, profile_id)? {
            return Err(MonitorError::ProfileNotFound(profile_id));
        }
        Ok(())
    }

    pub fn delete_profile(&self, user_id: i64, profile_id: i64) -> Result<(), MonitorError> {
        if !self.db.delete_profile(user_id, profile_id)? {
            return Err(MonitorError::ProfileNotFound(profile_id));
        }
        Ok(())
    }

    pub fn list_profiles(&self, user_id: i64) -> Result<Vec<ApiProfile>, MonitorError> {
        Ok(self.db.list_profiles(user_id)?)
    }

    // ------------------------------------------------------------------
    // Entities
    // ------------------------------------------------------------------

    /// Start tracking an entity and schedule its collection job.
    pub fn track_entity(
        &self,
        user_id: i64,
        mut new: NewEntity,
    ) -> Result<MonitoredEntity, MonitorError> {
        new.handle = sanitize_input(&new.handle, MAX_HANDLE_LEN);
        require_non_empty("handle", &new.handle)?;
        new.display_name = new
            .display_name
            .map(|n| sanitize_input(&n, MAX_HANDLE_LEN))
            .filter(|n| !n.is_empty());
        dashboard::check_days(new.days_to_collect)?;

        let (min, max) = (
            self.config.scheduler.min_interval_secs,
            self.config.scheduler.max_interval_secs,
        );
        let interval = new
            .interval_secs
            .unwrap_or_else(|| self.config.scheduler.interval_for(new.platform));
        if interval < min {
            return Err(MonitorError::IntervalTooShort { min, got: interval });
        }
        if interval > max {
            return Err(MonitorError::IntervalTooLong { max, got: interval });
        }

        self.require_user(user_id)?;
        if self.db.find_entity(user_id, new.platform, &new.handle)?.is_some() {
            return Err(MonitorError::EntityExists {
                platform: new.platform,
                handle: new.handle,
            });
        }

        let entity = self.db.insert_entity(user_id, &new, interval)?;
        self.schedule(&entity)?;
        info!(
            user_id,
            entity = entity.id,
            platform = %entity.platform,
            interval_secs = interval,
            "tracking {}",
            entity.handle
        );
        Ok(entity)
    }

    pub fn untrack_entity(&self, user_id: i64, entity_id: i64) -> Result<(), MonitorError> {
        let entity = self.entity(user_id, entity_id)?;
        self.db.delete_entity(user_id, entity_id)?;
        self.scheduler.remove_job(&job_id(entity.platform, entity.id));
        info!(user_id, entity = entity_id, "stopped tracking {}", entity.handle);
        Ok(())
    }

    pub fn pause_entity(&self, user_id: i64, entity_id: i64) -> Result<(), MonitorError> {
        let entity = self.entity(user_id, entity_id)?;
        self.db.set_monitoring(user_id, entity_id, false)?;
        self.scheduler.pause_job(&job_id(entity.platform, entity.id));
        Ok(())
    }

    pub fn resume_entity(&self, user_id: i64, entity_id: i64) -> Result<(), MonitorError> {
        let mut entity = self.entity(user_id, entity_id)?;
        self.db.set_monitoring(user_id, entity_id, true)?;
        entity.is_monitoring = true;
        if !self.scheduler.resume_job(&job_id(entity.platform, entity.id)) {
            self.schedule(&entity)?;
        }
        Ok(())
    }

    pub fn list_entities(&self, user_id: i64) -> Result<Vec<MonitoredEntity>, MonitorError> {
        Ok(self.db.list_entities(user_id)?)
    }

    /// Run one collection right away, outside the schedule.
    pub async fn collect_now(
        &self,
        user_id: i64,
        entity_id: i64,
    ) -> Result<Option<CollectionSummary>, MonitorError> {
        self.collector.collect_entity(user_id, entity_id).await
    }

    pub fn job_status(&self, user_id: i64, entity_id: i64) -> Result<JobStatus, MonitorError> {
        let entity = self.entity(user_id, entity_id)?;
        Ok(self.scheduler.job_status(&job_id(entity.platform, entity.id)))
    }

    pub fn job_history(
        &self,
        user_id: i64,
        entity_id: i64,
        limit: usize,
    ) -> Result<Vec<JobRun>, MonitorError> {
        let entity = self.entity(user_id, entity_id)?;
        Ok(self
            .db
            .recent_job_runs(user_id, &job_id(entity.platform, entity.id), limit)?)
    }

    fn entity(&self, user_id: i64, entity_id: i64) -> Result<MonitoredEntity, MonitorError> {
        self.db
            .get_entity(user_id, entity_id)?
            .ok_or(MonitorError::EntityNotFound(entity_id))
    }

    fn require_user(&self, user_id: i64) -> Result<User, MonitorError> {
        self.db.get_user(user_id)?.ok_or(MonitorError::UserNotFound)
    }

    // ------------------------------------------------------------------
    // Reports
    // ------------------------------------------------------------------

    pub fn dashboard(&self, user_id: i64, days: u32) -> Result<DashboardSummary, MonitorError> {
        dashboard::dashboard(
            &self.db,
            user_id,
            days,
            self.config.analytics.reddit_comment_weight,
        )
    }

    pub fn trends(
        &self,
        user_id: i64,
        entity_id: Option<i64>,
        days: u32,
    ) -> Result<TrendReport, MonitorError> {
        dashboard::trend_report(&self.db, user_id, entity_id, days, &self.config.analytics)
    }

    /// Write the user's posts from the last `days` days as CSV.
    pub fn export_posts_csv(
        &self,
        user_id: i64,
        days: u32,
        path: &Path,
    ) -> Result<usize, MonitorError> {
        dashboard::check_days(days)?;
        let since = Utc::now() - chrono::Duration::days(i64::from(days));
        let posts = self.db.posts_for_user(user_id, since)?;
        let handles: HashMap<i64, String> = self
            .db
            .list_entities(user_id)?
            .into_iter()
            .map(|e| (e.id, e.handle))
            .collect();
        if posts.is_empty() {
            return Err(export::ExportError::NothingToExport.into());
        }
        export::to_file(path, |w| export::write_posts_csv(w, &posts, &handles))?;
        Ok(posts.len())
    }

    pub fn export_entities_csv(&self, user_id: i64, path: &Path) -> Result<usize, MonitorError> {
        let entities = self.db.list_entities(user_id)?;
        if entities.is_empty() {
            return Err(export::ExportError::NothingToExport.into());
        }
        export::to_file(path, |w| export::write_entities_csv(w, &entities))?;
        Ok(entities.len())
    }

    pub fn export_engagement_csv(
        &self,
        user_id: i64,
        days: u32,
        path: &Path,
    ) -> Result<(), MonitorError> {
        let summary = self.dashboard(user_id, days)?;
        export::to_file(path, |w| {
            export::write_engagement_csv(w, &summary.engagement, summary.generated_at)
        })?;
        Ok(())
    }

    pub fn export_sentiment_csv(
        &self,
        user_id: i64,
        days: u32,
        with_timeline: bool,
        path: &Path,
    ) -> Result<(), MonitorError> {
        dashboard::check_days(days)?;
        let since = Utc::now() - chrono::Duration::days(i64::from(days));
        let posts = self.db.posts_for_user(user_id, since)?;
        let totals = dashboard::sentiment_counts(&posts);
        let timeline = with_timeline.then(|| dashboard::sentiment_timeline(&posts));
        export::to_file(path, |w| {
            export::write_sentiment_csv(w, &totals, timeline.as_deref(), Utc::now())
        })?;
        Ok(())
    }

    pub fn export_dashboard_json(
        &self,
        user_id: i64,
        days: u32,
        path: &Path,
    ) -> Result<(), MonitorError> {
        let summary = self.dashboard(user_id, days)?;
        export::to_file(path, |w| export::write_json(w, &summary))?;
        Ok(())
    }
}

fn purge_older_than(db: &Database, days: u32) -> Result<PurgeCounts, MonitorError> {
    if days == 0 || days > MAX_RETENTION_DAYS {
        return Err(MonitorError::DaysOutOfRange {
            max: MAX_RETENTION_DAYS,
            got: days,
        });
    }
    let cutoff = Utc::now() - chrono::Duration::days(i64::from(days));
    let counts = db.purge_before(cutoff)?;
    info!(
        days,
        posts = counts.posts,
        snapshots = counts.snapshots,
        job_runs = counts.job_runs,
        "purged old data"
    );
    Ok(counts)
}
