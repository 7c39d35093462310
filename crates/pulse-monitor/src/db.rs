// SQLite persistence for users, profiles, entities, collected content and
// job history.

use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::analytics::sentiment::SentimentScores;
use crate::crypto::CredentialCipher;
use crate::models::{
    ApiProfile, CollectedPost, Credentials, JobRun, MonitoredEntity, NewEntity, Platform, Post,
    RunStatus, StreamSnapshot, User,
};

/// SQLite-backed store. Every query on user data is scoped by `user_id`;
/// a row owned by someone else behaves exactly like a missing row.
/// Profile credentials are sealed with `cipher` before they are written.
pub struct Database {
    conn: Mutex<Connection>,
    cipher: CredentialCipher,
}

/// Rows removed by [`Database::purge_before`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct PurgeCounts {
    pub posts: usize,
    pub snapshots: usize,
    pub job_runs: usize,
}

const USER_COLUMNS: &str = "id, username, email, created_at";

const PROFILE_COLUMNS: &str = "id, user_id, platform, name, credentials, is_active, created_at";

const ENTITY_COLUMNS: &str = "id, user_id, platform, handle, display_name, interval_secs,
     days_to_collect, is_monitoring, total_items, last_collected, created_at";

const POST_COLUMNS: &str = "id, entity_id, user_id, platform, external_id, text, author,
     published_at, likes, shares, replies, views, sentiment_compound, collected_at";

impl Database {
    /// Open (or create) the database at `path` and ensure the schema exists.
    /// `":memory:"` gives an ephemeral database for tests.
    pub fn open(path: &str, cipher: CredentialCipher) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {path}"))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )
        .context("failed to set database pragmas")?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS users (
                id             INTEGER PRIMARY KEY AUTOINCREMENT,
                username       TEXT NOT NULL UNIQUE,
                email          TEXT NOT NULL UNIQUE,
                api_token_hash TEXT UNIQUE,
                created_at     TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS api_profiles (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id     INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                platform    TEXT NOT NULL,
                name        TEXT NOT NULL,
                credentials TEXT NOT NULL,
                is_active   INTEGER NOT NULL DEFAULT 0,
                created_at  TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS monitored_entities (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id         INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                platform        TEXT NOT NULL,
                handle          TEXT NOT NULL,
                display_name    TEXT,
                interval_secs   INTEGER NOT NULL,
                days_to_collect INTEGER NOT NULL,
                is_monitoring   INTEGER NOT NULL DEFAULT 1,
                total_items     INTEGER NOT NULL DEFAULT 0,
                last_collected  TEXT,
                created_at      TEXT NOT NULL,
                UNIQUE(user_id, platform, handle)
            );

            CREATE TABLE IF NOT EXISTS posts (
                id                 INTEGER PRIMARY KEY AUTOINCREMENT,
                entity_id          INTEGER NOT NULL REFERENCES monitored_entities(id) ON DELETE CASCADE,
                user_id            INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                platform           TEXT NOT NULL,
                external_id        TEXT NOT NULL,
                text               TEXT NOT NULL,
                author             TEXT,
                published_at       TEXT NOT NULL,
                likes              INTEGER NOT NULL DEFAULT 0,
                shares             INTEGER NOT NULL DEFAULT 0,
                replies            INTEGER NOT NULL DEFAULT 0,
                views              INTEGER NOT NULL DEFAULT 0,
                sentiment_compound REAL,
                collected_at       TEXT NOT NULL,
                UNIQUE(platform, external_id, user_id)
            );

            CREATE TABLE IF NOT EXISTS stream_snapshots (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                entity_id    INTEGER NOT NULL REFERENCES monitored_entities(id) ON DELETE CASCADE,
                user_id      INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                captured_at  TEXT NOT NULL,
                is_live      INTEGER NOT NULL,
                viewer_count INTEGER NOT NULL,
                title        TEXT,
                game_name    TEXT
            );

            CREATE TABLE IF NOT EXISTS sentiment_cache (
                text_hash TEXT PRIMARY KEY,
                negative  REAL NOT NULL,
                neutral   REAL NOT NULL,
                positive  REAL NOT NULL,
                compound  REAL NOT NULL
            );

            CREATE TABLE IF NOT EXISTS job_runs (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id      TEXT NOT NULL,
                entity_id   INTEGER NOT NULL,
                user_id     INTEGER NOT NULL,
                started_at  TEXT NOT NULL,
                finished_at TEXT NOT NULL,
                status      TEXT NOT NULL,
                new_items   INTEGER NOT NULL DEFAULT 0,
                error       TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_posts_user_published ON posts(user_id, published_at);
            CREATE INDEX IF NOT EXISTS idx_snapshots_user_captured ON stream_snapshots(user_id, captured_at);
            CREATE INDEX IF NOT EXISTS idx_job_runs_job ON job_runs(job_id);
            CREATE INDEX IF NOT EXISTS idx_job_runs_finished ON job_runs(finished_at);
            ",
        )
        .context("failed to create database schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
            cipher,
        })
    }

    /// Acquire the connection. Panics only if another thread panicked while
    /// holding the lock.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }

    // ------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------

    pub fn create_user(&self, username: &str, email: &str, token_hash: &str) -> Result<User> {
        let conn = self.conn();
        let now = now();
        let id: i64 = conn
            .query_row(
                "INSERT INTO users (username, email, api_token_hash, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 RETURNING id",
                params![username, email, token_hash, fmt_ts(&now)],
                |row| row.get(0),
            )
            .context("failed to insert user")?;
        Ok(User {
            id,
            username: username.to_string(),
            email: email.to_string(),
            created_at: now,
        })
    }

    /// Whether `username` or `email` is already registered.
    pub fn user_exists(&self, username: &str, email: &str) -> Result<bool> {
        let conn = self.conn();
        let exists: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM users WHERE username = ?1 OR email = ?2)",
                params![username, email],
                |row| row.get(0),
            )
            .context("failed to check user existence")?;
        Ok(exists)
    }

    pub fn get_user(&self, user_id: i64) -> Result<Option<User>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
            params![user_id],
            user_from_row,
        )
        .optional()
        .context("failed to load user")
    }

    pub fn user_by_token_hash(&self, token_hash: &str) -> Result<Option<User>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE api_token_hash = ?1"),
            params![token_hash],
            user_from_row,
        )
        .optional()
        .context("failed to look up user by token")
    }

    /// Replace the stored token hash. Returns `false` for an unknown user.
    pub fn set_token_hash(&self, user_id: i64, token_hash: &str) -> Result<bool> {
        let conn = self.conn();
        let n = conn
            .execute(
                "UPDATE users SET api_token_hash = ?1 WHERE id = ?2",
                params![token_hash, user_id],
            )
            .context("failed to update token hash")?;
        Ok(n > 0)
    }

    // ------------------------------------------------------------------
    // API profiles
    // ------------------------------------------------------------------

    /// Store a credential profile. When `activate` is set every other
    /// profile of the same user and platform is deactivated in the same
    /// transaction.
    pub fn insert_profile(
        &self,
        user_id: i64,
        platform: Platform,
        name: &str,
        credentials: &Credentials,
        activate: bool,
    ) -> Result<ApiProfile> {
        let mut conn = self.conn();
        let creds_json =
            serde_json::to_string(credentials).context("failed to serialize credentials")?;
        let sealed = self
            .cipher
            .encrypt(creds_json.as_bytes())
            .context("failed to encrypt credentials")?;
        let now = now();

        let tx = conn.transaction().context("failed to begin transaction")?;
        if activate {
            tx.execute(
                "UPDATE api_profiles SET is_active = 0 WHERE user_id = ?1 AND platform = ?2",
                params![user_id, platform.as_str()],
            )
            .context("failed to deactivate profiles")?;
        }
        let id: i64 = tx
            .query_row(
                "INSERT INTO api_profiles (user_id, platform, name, credentials, is_active, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 RETURNING id",
                params![user_id, platform.as_str(), name, sealed, activate, fmt_ts(&now)],
                |row| row.get(0),
            )
            .context("failed to insert profile")?;
        tx.commit().context("failed to commit profile insert")?;

        Ok(ApiProfile {
            id,
            user_id,
            platform,
            name: name.to_string(),
            credentials: credentials.clone(),
            is_active: activate,
            created_at: now,
        })
    }

    /// Make `profile_id` the active profile for its platform. Returns
    /// `false` when the profile does not belong to `user_id`.
    pub fn activate_profile(&self, user_id: i64, profile_id: i64) -> Result<bool> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin transaction")?;

        let platform: Option<String> = tx
            .query_row(
                "SELECT platform FROM api_profiles WHERE id = ?1 AND user_id = ?2",
                params![profile_id, user_id],
                |row| row.get(0),
            )
            .optional()
            .context("failed to look up profile")?;
        let Some(platform) = platform else {
            return Ok(false);
        };

        tx.execute(
            "UPDATE api_profiles SET is_active = (id = ?1) WHERE user_id = ?2 AND platform = ?3",
            params![profile_id, user_id, platform],
        )
        .context("failed to switch active profile")?;
        tx.commit().context("failed to commit profile activation")?;
        Ok(true)
    }

    pub fn active_profile(&self, user_id: i64, platform: Platform) -> Result<Option<ApiProfile>> {
        let conn = self.conn();
        conn.query_row(
            &format!(
                "SELECT {PROFILE_COLUMNS} FROM api_profiles
                 WHERE user_id = ?1 AND platform = ?2 AND is_active = 1
                 ORDER BY id DESC LIMIT 1"
            ),
            params![user_id, platform.as_str()],
            |row| profile_from_row(row, &self.cipher),
        )
        .optional()
        .context("failed to load active profile")
    }

    pub fn list_profiles(&self, user_id: i64) -> Result<Vec<ApiProfile>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {PROFILE_COLUMNS} FROM api_profiles WHERE user_id = ?1 ORDER BY platform, id"
            ))
            .context("failed to prepare list_profiles query")?;
        let profiles = stmt
            .query_map(params![user_id], |row| profile_from_row(row, &self.cipher))
            .context("failed to query profiles")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map profile rows")?;
        Ok(profiles)
    }

    pub fn delete_profile(&self, user_id: i64, profile_id: i64) -> Result<bool> {
        let conn = self.conn();
        let n = conn
            .execute(
                "DELETE FROM api_profiles WHERE id = ?1 AND user_id = ?2",
                params![profile_id, user_id],
            )
            .context("failed to delete profile")?;
        Ok(n > 0)
    }

    // ------------------------------------------------------------------
    // Monitored entities
    // ------------------------------------------------------------------

    /// Insert a new entity with monitoring enabled. `interval_secs` is the
    /// resolved polling interval.
    pub fn insert_entity(
        &self,
        user_id: i64,
        new: &NewEntity,
        interval_secs: u64,
    ) -> Result<MonitoredEntity> {
        let stored_interval = i64::try_from(interval_secs)
            .with_context(|| format!("interval {interval_secs}s is out of range"))?;
        let conn = self.conn();
        let now = now();
        let id: i64 = conn
            .query_row(
                "INSERT INTO monitored_entities
                    (user_id, platform, handle, display_name, interval_secs, days_to_collect,
                     is_monitoring, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7)
                 RETURNING id",
                params![
                    user_id,
                    new.platform.as_str(),
                    new.handle,
                    new.display_name,
                    stored_interval,
                    new.days_to_collect,
                    fmt_ts(&now),
                ],
                |row| row.get(0),
            )
            .context("failed to insert monitored entity")?;

        Ok(MonitoredEntity {
            id,
            user_id,
            platform: new.platform,
            handle: new.handle.clone(),
            display_name: new.display_name.clone(),
            interval_secs,
            days_to_collect: new.days_to_collect,
            is_monitoring: true,
            total_items: 0,
            last_collected: None,
            created_at: now,
        })
    }

    pub fn find_entity(
        &self,
        user_id: i64,
        platform: Platform,
        handle: &str,
    ) -> Result<Option<MonitoredEntity>> {
        let conn = self.conn();
        conn.query_row(
            &format!(
                "SELECT {ENTITY_COLUMNS} FROM monitored_entities
                 WHERE user_id = ?1 AND platform = ?2 AND handle = ?3"
            ),
            params![user_id, platform.as_str(), handle],
            entity_from_row,
        )
        .optional()
        .context("failed to find monitored entity")
    }

    pub fn get_entity(&self, user_id: i64, entity_id: i64) -> Result<Option<MonitoredEntity>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {ENTITY_COLUMNS} FROM monitored_entities WHERE id = ?1 AND user_id = ?2"),
            params![entity_id, user_id],
            entity_from_row,
        )
        .optional()
        .context("failed to load monitored entity")
    }

    pub fn list_entities(&self, user_id: i64) -> Result<Vec<MonitoredEntity>> {
        self.query_entities(
            &format!(
                "SELECT {ENTITY_COLUMNS} FROM monitored_entities WHERE user_id = ?1 ORDER BY platform, id"
            ),
            params![user_id],
        )
    }

    /// Every entity with monitoring enabled, across all users. Used to
    /// schedule jobs at startup.
    pub fn monitoring_entities(&self) -> Result<Vec<MonitoredEntity>> {
        self.query_entities(
            &format!("SELECT {ENTITY_COLUMNS} FROM monitored_entities WHERE is_monitoring = 1 ORDER BY id"),
            params![],
        )
    }

    fn query_entities(
        &self,
        sql: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<MonitoredEntity>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(sql)
            .context("failed to prepare entity query")?;
        let entities = stmt
            .query_map(args, entity_from_row)
            .context("failed to query entities")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map entity rows")?;
        Ok(entities)
    }

    pub fn set_monitoring(&self, user_id: i64, entity_id: i64, on: bool) -> Result<bool> {
        let conn = self.conn();
        let n = conn
            .execute(
                "UPDATE monitored_entities SET is_monitoring = ?1 WHERE id = ?2 AND user_id = ?3",
                params![on, entity_id, user_id],
            )
            .context("failed to update monitoring flag")?;
        Ok(n > 0)
    }

    /// Delete an entity together with its posts and snapshots.
    pub fn delete_entity(&self, user_id: i64, entity_id: i64) -> Result<bool> {
        let conn = self.conn();
        let n = conn
            .execute(
                "DELETE FROM monitored_entities WHERE id = ?1 AND user_id = ?2",
                params![entity_id, user_id],
            )
            .context("failed to delete monitored entity")?;
        Ok(n > 0)
    }

    /// Bump `total_items` by `new_items` and stamp `last_collected`.
    /// Returns the new total, or `None` if the entity is gone.
    pub fn record_collection(
        &self,
        user_id: i64,
        entity_id: i64,
        new_items: i64,
        at: DateTime<Utc>,
    ) -> Result<Option<i64>> {
        let conn = self.conn();
        conn.query_row(
            "UPDATE monitored_entities
             SET total_items = total_items + ?1, last_collected = ?2
             WHERE id = ?3 AND user_id = ?4
             RETURNING total_items",
            params![new_items, fmt_ts(&at), entity_id, user_id],
            |row| row.get(0),
        )
        .optional()
        .context("failed to record collection")
    }

    // ------------------------------------------------------------------
    // Collected content
    // ------------------------------------------------------------------

    /// Insert a post, or refresh metrics and sentiment of an already
    /// stored one. Returns `true` when the post is new.
    pub fn upsert_post(
        &self,
        entity: &MonitoredEntity,
        post: &CollectedPost,
        sentiment_compound: Option<f64>,
    ) -> Result<bool> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin transaction")?;

        let existed: bool = tx
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM posts
                 WHERE platform = ?1 AND external_id = ?2 AND user_id = ?3)",
                params![entity.platform.as_str(), post.external_id, entity.user_id],
                |row| row.get(0),
            )
            .context("failed to check post existence")?;

        tx.execute(
            "INSERT INTO posts
                (entity_id, user_id, platform, external_id, text, author, published_at,
                 likes, shares, replies, views, sentiment_compound, collected_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
             ON CONFLICT(platform, external_id, user_id) DO UPDATE SET
                likes              = excluded.likes,
                shares             = excluded.shares,
                replies            = excluded.replies,
                views              = excluded.views,
                sentiment_compound = excluded.sentiment_compound,
                collected_at       = excluded.collected_at",
            params![
                entity.id,
                entity.user_id,
                entity.platform.as_str(),
                post.external_id,
                post.text,
                post.author,
                fmt_ts(&post.published_at),
                post.likes,
                post.shares,
                post.replies,
                post.views,
                sentiment_compound,
                fmt_ts(&Utc::now()),
            ],
        )
        .context("failed to upsert post")?;
        tx.commit().context("failed to commit post upsert")?;
        Ok(!existed)
    }

    pub fn insert_snapshot(&self, entity: &MonitoredEntity, snap: &StreamSnapshot) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO stream_snapshots
                (entity_id, user_id, captured_at, is_live, viewer_count, title, game_name)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                entity.id,
                entity.user_id,
                fmt_ts(&snap.captured_at),
                snap.is_live,
                snap.viewer_count,
                snap.title,
                snap.game_name,
            ],
        )
        .context("failed to insert stream snapshot")?;
        Ok(())
    }

    /// Posts of `user_id` published at or after `since`, oldest first.
    pub fn posts_for_user(&self, user_id: i64, since: DateTime<Utc>) -> Result<Vec<Post>> {
        self.query_posts(
            &format!(
                "SELECT {POST_COLUMNS} FROM posts
                 WHERE user_id = ?1 AND published_at >= ?2
                 ORDER BY published_at, id"
            ),
            params![user_id, fmt_ts(&since)],
        )
    }

    pub fn posts_for_entity(
        &self,
        user_id: i64,
        entity_id: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<Post>> {
        self.query_posts(
            &format!(
                "SELECT {POST_COLUMNS} FROM posts
                 WHERE user_id = ?1 AND entity_id = ?2 AND published_at >= ?3
                 ORDER BY published_at, id"
            ),
            params![user_id, entity_id, fmt_ts(&since)],
        )
    }

    fn query_posts(&self, sql: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<Post>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(sql).context("failed to prepare post query")?;
        let posts = stmt
            .query_map(args, post_from_row)
            .context("failed to query posts")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map post rows")?;
        Ok(posts)
    }

    /// `(entity_id, snapshot)` pairs captured at or after `since`.
    pub fn snapshots_for_user(
        &self,
        user_id: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<(i64, StreamSnapshot)>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT entity_id, captured_at, is_live, viewer_count, title, game_name
                 FROM stream_snapshots
                 WHERE user_id = ?1 AND captured_at >= ?2
                 ORDER BY captured_at, id",
            )
            .context("failed to prepare snapshot query")?;
        let snaps = stmt
            .query_map(params![user_id, fmt_ts(&since)], |row| {
                Ok((
                    row.get(0)?,
                    StreamSnapshot {
                        captured_at: get_ts(row, 1)?,
                        is_live: row.get(2)?,
                        viewer_count: row.get(3)?,
                        title: row.get(4)?,
                        game_name: row.get(5)?,
                    },
                ))
            })
            .context("failed to query snapshots")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map snapshot rows")?;
        Ok(snaps)
    }

    // ------------------------------------------------------------------
    // Sentiment cache
    // ------------------------------------------------------------------

    pub fn cached_sentiment(&self, text_hash: &str) -> Result<Option<SentimentScores>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT negative, neutral, positive, compound FROM sentiment_cache WHERE text_hash = ?1",
            params![text_hash],
            |row| {
                Ok(SentimentScores {
                    negative: row.get(0)?,
                    neutral: row.get(1)?,
                    positive: row.get(2)?,
                    compound: row.get(3)?,
                })
            },
        )
        .optional()
        .context("failed to read sentiment cache")
    }

    pub fn store_sentiment(&self, text_hash: &str, scores: &SentimentScores) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT OR REPLACE INTO sentiment_cache (text_hash, negative, neutral, positive, compound)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                text_hash,
                scores.negative,
                scores.neutral,
                scores.positive,
                scores.compound
            ],
        )
        .context("failed to write sentiment cache")?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Retention
    // ------------------------------------------------------------------

    /// Delete collected content and job history older than `cutoff`: posts
    /// by `collected_at`, snapshots by `captured_at`, runs by `finished_at`.
    pub fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<PurgeCounts> {
        let mut conn = self.conn();
        let cutoff = fmt_ts(&cutoff);
        let tx = conn.transaction().context("failed to begin transaction")?;
        let posts = tx
            .execute("DELETE FROM posts WHERE collected_at < ?1", params![cutoff])
            .context("failed to purge posts")?;
        let snapshots = tx
            .execute(
                "DELETE FROM stream_snapshots WHERE captured_at < ?1",
                params![cutoff],
            )
            .context("failed to purge stream snapshots")?;
        let job_runs = tx
            .execute("DELETE FROM job_runs WHERE finished_at < ?1", params![cutoff])
            .context("failed to purge job runs")?;
        tx.commit().context("failed to commit purge")?;
        Ok(PurgeCounts {
            posts,
            snapshots,
            job_runs,
        })
    }

    /// Cheap round trip used by the readiness check.
    pub fn ping(&self) -> bool {
        self.conn()
            .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .is_ok()
    }

    // ------------------------------------------------------------------
    // Job history
    // ------------------------------------------------------------------

    pub fn insert_job_run(&self, run: &JobRun) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO job_runs
                (job_id, entity_id, user_id, started_at, finished_at, status, new_items, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                run.job_id,
                run.entity_id,
                run.user_id,
                fmt_ts(&run.started_at),
                fmt_ts(&run.finished_at),
                run.status.as_str(),
                run.new_items,
                run.error,
            ],
        )
        .context("failed to record job run")?;
        Ok(())
    }

    /// Most recent runs of `job_id` for `user_id`, newest first.
    pub fn recent_job_runs(&self, user_id: i64, job_id: &str, limit: usize) -> Result<Vec<JobRun>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT job_id, entity_id, user_id, started_at, finished_at, status, new_items, error
                 FROM job_runs WHERE user_id = ?1 AND job_id = ?2
                 ORDER BY id DESC LIMIT ?3",
            )
            .context("failed to prepare job run query")?;
        let runs = stmt
            .query_map(params![user_id, job_id, limit as i64], |row| {
                let status: String = row.get(5)?;
                Ok(JobRun {
                    job_id: row.get(0)?,
                    entity_id: row.get(1)?,
                    user_id: row.get(2)?,
                    started_at: get_ts(row, 3)?,
                    finished_at: get_ts(row, 4)?,
                    status: RunStatus::parse(&status).ok_or_else(|| bad_text(5, &status))?,
                    new_items: row.get(6)?,
                    error: row.get(7)?,
                })
            })
            .context("failed to query job runs")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map job run rows")?;
        Ok(runs)
    }
}

// ----------------------------------------------------------------------
// Row mapping
// ----------------------------------------------------------------------

/// Current time at the precision timestamps are stored with.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

fn fmt_ts(t: &DateTime<Utc>) -> String {
    // Fixed width with a `Z` suffix so text comparison orders by time.
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn get_ts(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    parse_ts(idx, &s)
}

fn get_opt_ts(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let s: Option<String> = row.get(idx)?;
    s.map(|s| parse_ts(idx, &s)).transpose()
}

fn parse_ts(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn get_platform(row: &Row, idx: usize) -> rusqlite::Result<Platform> {
    let s: String = row.get(idx)?;
    s.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn bad_text(idx: usize, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        Type::Text,
        format!("unexpected value {value:?}").into(),
    )
}

fn user_from_row(row: &Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        created_at: get_ts(row, 3)?,
    })
}

fn profile_from_row(row: &Row, cipher: &CredentialCipher) -> rusqlite::Result<ApiProfile> {
    let sealed: String = row.get(4)?;
    let creds_json = cipher
        .decrypt(&sealed)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?;
    let credentials: Credentials = serde_json::from_slice(&creds_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?;
    Ok(ApiProfile {
        id: row.get(0)?,
        user_id: row.get(1)?,
        platform: get_platform(row, 2)?,
        name: row.get(3)?,
        credentials,
        is_active: row.get(5)?,
        created_at: get_ts(row, 6)?,
    })
}

fn entity_from_row(row: &Row) -> rusqlite::Result<MonitoredEntity> {
    let interval: i64 = row.get(5)?;
    Ok(MonitoredEntity {
        id: row.get(0)?,
        user_id: row.get(1)?,
        platform: get_platform(row, 2)?,
        handle: row.get(3)?,
        display_name: row.get(4)?,
        interval_secs: u64::try_from(interval).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, Type::Integer, Box::new(e))
        })?,
        days_to_collect: row.get(6)?,
        is_monitoring: row.get(7)?,
        total_items: row.get(8)?,
        last_collected: get_opt_ts(row, 9)?,
        created_at: get_ts(row, 10)?,
    })
}

fn post_from_row(row: &Row) -> rusqlite::Result<Post> {
    Ok(Post {
        id: row.get(0)?,
        entity_id: row.get(1)?,
        user_id: row.get(2)?,
        platform: get_platform(row, 3)?,
        external_id: row.get(4)?,
        text: row.get(5)?,
        author: row.get(6)?,
        published_at: get_ts(row, 7)?,
        likes: row.get(8)?,
        shares: row.get(9)?,
        replies: row.get(10)?,
        views: row.get(11)?,
        sentiment_compound: row.get(12)?,
        collected_at: get_ts(row, 13)?,
    })
}
