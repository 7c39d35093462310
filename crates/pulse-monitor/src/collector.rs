// One collection run for one entity: fetch, score, store, report.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::analytics::sentiment::CachedSentimentAnalyzer;
use crate::db::Database;
use crate::error::MonitorError;
use crate::models::{job_id, Collection, JobRun, MonitoredEntity, Platform, RunStatus};
use crate::platforms::ClientFactory;
use crate::realtime::{ConnectionManager, Event, Level};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionSummary {
    pub entity_id: i64,
    pub platform: Platform,
    pub handle: String,
    /// Items returned by the platform this run.
    pub fetched: usize,
    /// Items not seen before.
    pub new_items: i64,
    pub total_items: i64,
    /// Stream state, for live platforms.
    pub live: Option<bool>,
}

pub struct Collector {
    db: Arc<Database>,
    clients: Arc<dyn ClientFactory>,
    sentiment: CachedSentimentAnalyzer,
    realtime: Arc<ConnectionManager>,
}

impl Collector {
    pub fn new(
        db: Arc<Database>,
        clients: Arc<dyn ClientFactory>,
        realtime: Arc<ConnectionManager>,
    ) -> Self {
        Self {
            sentiment: CachedSentimentAnalyzer::new(db.clone()),
            db,
            clients,
            realtime,
        }
    }

    /// Collect `entity_id` for `user_id` and record the run. Returns `None`
    /// when the entity has monitoring switched off. Failures are recorded,
    /// pushed to the user as a notification, and returned.
    pub async fn collect_entity(
        &self,
        user_id: i64,
        entity_id: i64,
    ) -> Result<Option<CollectionSummary>, MonitorError> {
        let entity = self
            .db
            .get_entity(user_id, entity_id)?
            .ok_or(MonitorError::EntityNotFound(entity_id))?;
        let started_at = Utc::now();

        if !entity.is_monitoring {
            self.record(&entity, started_at, RunStatus::Skipped, 0, None);
            return Ok(None);
        }

        match self.run(&entity).await {
            Ok((summary, updates)) => {
                self.record(&entity, started_at, RunStatus::Success, summary.new_items, None);
                info!(
                    platform = %entity.platform,
                    handle = %entity.handle,
                    fetched = summary.fetched,
                    new_items = summary.new_items,
                    "collection finished"
                );
                let status = serde_json::to_value(&summary).unwrap_or_default();
                self.realtime.send_to_user(
                    user_id,
                    &Event::monitoring_update(entity.platform.entity_kind(), entity.id, status),
                );
                for event in &updates {
                    self.realtime.send_to_user(user_id, event);
                }
                Ok(Some(summary))
            }
            Err(e) => {
                let message = e.to_string();
                self.record(&entity, started_at, RunStatus::Failed, 0, Some(message.clone()));
                warn!(
                    platform = %entity.platform,
                    handle = %entity.handle,
                    "collection failed: {message}"
                );
                self.realtime.send_to_user(
                    user_id,
                    &Event::notification(
                        Level::Error,
                        &format!("Collection failed for {} {}", entity.platform, entity.handle),
                        message,
                    ),
                );
                Err(e)
            }
        }
    }

    /// Fetch and store one batch. Besides the summary, returns the platform
    /// and analytics events describing what was collected.
    async fn run(
        &self,
        entity: &MonitoredEntity,
    ) -> Result<(CollectionSummary, Vec<Event>), MonitorError> {
        let profile = self
            .db
            .active_profile(entity.user_id, entity.platform)?
            .ok_or(MonitorError::NoActiveProfile(entity.platform))?;
        let client = self.clients.client(&profile)?;

        let now = Utc::now();
        let since = now - Duration::days(i64::from(entity.days_to_collect));
        let collection = client.collect(entity, since).await?;

        let mut updates = Vec::new();
        let (fetched, new_items, live) = match collection {
            Collection::Posts(posts) => {
                let mut new_items = 0;
                let mut compound_sum = 0.0;
                for post in &posts {
                    let compound = self.sentiment.analyze(&post.text).compound;
                    compound_sum += compound;
                    if self.db.upsert_post(entity, post, Some(compound))? {
                        new_items += 1;
                    }
                }
                if !posts.is_empty() {
                    updates.push(Event::analytics_update(
                        "sentiment",
                        json!({
                            "entity_id": entity.id,
                            "platform": entity.platform,
                            "scored": posts.len(),
                            "average_compound": compound_sum / posts.len() as f64,
                        }),
                    ));
                }
                (posts.len(), new_items, None)
            }
            Collection::Stream(snapshot) => {
                self.db.insert_snapshot(entity, &snapshot)?;
                updates.push(Event::platform_update(
                    entity.platform,
                    json!({
                        "entity_id": entity.id,
                        "handle": entity.handle,
                        "is_live": snapshot.is_live,
                        "viewer_count": snapshot.viewer_count,
                        "title": snapshot.title,
                        "game_name": snapshot.game_name,
                    }),
                ));
                (1, 1, Some(snapshot.is_live))
            }
        };

        let total_items = self
            .db
            .record_collection(entity.user_id, entity.id, new_items, now)?
            .unwrap_or(entity.total_items + new_items);

        let summary = CollectionSummary {
            entity_id: entity.id,
            platform: entity.platform,
            handle: entity.handle.clone(),
            fetched,
            new_items,
            total_items,
            live,
        };
        Ok((summary, updates))
    }

    fn record(
        &self,
        entity: &MonitoredEntity,
        started_at: chrono::DateTime<Utc>,
        status: RunStatus,
        new_items: i64,
        error: Option<String>,
    ) {
        let run = JobRun {
            job_id: job_id(entity.platform, entity.id),
            entity_id: entity.id,
            user_id: entity.user_id,
            started_at,
            finished_at: Utc::now(),
            status,
            new_items,
            error,
        };
        if let Err(e) = self.db.insert_job_run(&run) {
            warn!("failed to record job run for {}: {e:#}", run.job_id);
        }
    }
}
