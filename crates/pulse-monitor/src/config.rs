// Configuration loading and parsing (config/monitor.toml).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::models::Platform;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("failed to initialize config from defaults: {message}")]
    DefaultsCopyError { message: String },
}

// ---------------------------------------------------------------------------
// monitor.toml structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    pub scheduler: SchedulerConfig,
    pub analytics: AnalyticsConfig,
    pub collection: CollectionConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub ws_host: String,
    pub ws_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file. When omitted the platform data directory is used.
    pub path: Option<String>,
    /// Posts, snapshots and job runs older than this are purged.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    /// File holding the base64 credential key, relative to the base dir.
    /// `PULSE_CREDENTIAL_KEY` takes precedence.
    #[serde(default = "default_key_file")]
    pub key_file: String,
}

pub const MAX_RETENTION_DAYS: u32 = 36_500;

fn default_retention_days() -> u32 {
    90
}

fn default_key_file() -> String {
    "config/credential.key".into()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            retention_days: default_retention_days(),
            key_file: default_key_file(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    pub max_workers: usize,
    pub min_interval_secs: u64,
    #[serde(default = "default_max_interval")]
    pub max_interval_secs: u64,
    /// Per-platform interval overrides, keyed by lowercase platform name.
    #[serde(default)]
    pub intervals: HashMap<String, u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyticsConfig {
    pub reddit_comment_weight: f64,
    pub anomaly_threshold: f64,
    pub moving_average_window: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CollectionConfig {
    pub max_results: u32,
    pub request_timeout_secs: u64,
}

fn default_max_interval() -> u64 {
    7 * 24 * 3600
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                ws_host: "127.0.0.1".into(),
                ws_port: 8765,
            },
            database: DatabaseConfig::default(),
            scheduler: SchedulerConfig {
                max_workers: 10,
                min_interval_secs: 10,
                max_interval_secs: default_max_interval(),
                intervals: HashMap::new(),
            },
            analytics: AnalyticsConfig {
                reddit_comment_weight: 2.0,
                anomaly_threshold: 2.0,
                moving_average_window: 7,
            },
            collection: CollectionConfig {
                max_results: 100,
                request_timeout_secs: 30,
            },
        }
    }
}

impl SchedulerConfig {
    /// Interval for `platform`: configured override or the platform default.
    pub fn interval_for(&self, platform: Platform) -> u64 {
        self.intervals
            .get(platform.as_str())
            .copied()
            .unwrap_or_else(|| platform.default_interval_secs())
    }
}

impl MonitorConfig {
    /// Resolve the database path, falling back to the per-user data dir.
    pub fn db_path(&self) -> Result<PathBuf, ConfigError> {
        if let Some(p) = &self.database.path {
            return Ok(PathBuf::from(p));
        }
        let dirs = directories::ProjectDirs::from("", "", "pulse-monitor").ok_or_else(|| {
            ConfigError::ValidationError {
                field: "database.path".into(),
                message: "not set and no home directory to default to".into(),
            }
        })?;
        Ok(dirs.data_dir().join("pulse-monitor.db"))
    }
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate `config/monitor.toml` relative to `base_dir`. Does not
/// seed defaults; see [`load_config`].
pub fn load_config_from(base_dir: &Path) -> Result<MonitorConfig, ConfigError> {
    let path = base_dir.join("config").join("monitor.toml");
    let text = std::fs::read_to_string(&path).map_err(|_| ConfigError::FileNotFound {
        path: path.clone(),
    })?;
    let config: MonitorConfig = toml::from_str(&text).map_err(|e| ConfigError::ParseError {
        path: path.clone(),
        source: e,
    })?;
    validate(&config)?;
    Ok(config)
}

/// Copy any file in `defaults/` that is missing from `config/`. Existing
/// config files are never overwritten. Returns the files created.
pub fn ensure_config_files(base_dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let defaults_dir = base_dir.join("defaults");
    let config_dir = base_dir.join("config");

    if !defaults_dir.exists() {
        if !config_dir.exists() {
            return Err(ConfigError::DefaultsCopyError {
                message: format!(
                    "neither defaults/ nor config/ directory found in {}",
                    base_dir.display()
                ),
            });
        }
        return Ok(vec![]);
    }

    std::fs::create_dir_all(&config_dir).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("failed to create config directory: {e}"),
    })?;

    let entries = std::fs::read_dir(&defaults_dir).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("failed to read defaults directory: {e}"),
    })?;

    let mut copied = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| ConfigError::DefaultsCopyError {
            message: format!("failed to read defaults entry: {e}"),
        })?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(file_name) = path.file_name() else {
            continue;
        };
        let target = config_dir.join(file_name);

        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
        {
            Ok(mut dest) => {
                let content = std::fs::read(&path).map_err(|e| ConfigError::DefaultsCopyError {
                    message: format!("failed to read {}: {e}", path.display()),
                })?;
                std::io::Write::write_all(&mut dest, &content).map_err(|e| {
                    ConfigError::DefaultsCopyError {
                        message: format!("failed to write {}: {e}", target.display()),
                    }
                })?;
                copied.push(target);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => {
                return Err(ConfigError::DefaultsCopyError {
                    message: format!("failed to create {}: {e}", target.display()),
                });
            }
        }
    }

    Ok(copied)
}

/// Seed missing files from `defaults/`, then load.
pub fn load_config(base_dir: &Path) -> Result<MonitorConfig, ConfigError> {
    ensure_config_files(base_dir)?;
    load_config_from(base_dir)
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.to_string(),
        message: message.into(),
    }
}

fn validate(config: &MonitorConfig) -> Result<(), ConfigError> {
    if config.server.ws_host.trim().is_empty() {
        return Err(invalid("server.ws_host", "must not be empty"));
    }

    let sched = &config.scheduler;
    if sched.max_workers == 0 {
        return Err(invalid("scheduler.max_workers", "must be > 0"));
    }
    if sched.min_interval_secs == 0 {
        return Err(invalid("scheduler.min_interval_secs", "must be > 0"));
    }
    // Intervals are stored as SQLite INTEGER.
    if sched.max_interval_secs < sched.min_interval_secs
        || i64::try_from(sched.max_interval_secs).is_err()
    {
        return Err(invalid(
            "scheduler.max_interval_secs",
            format!(
                "must be between scheduler.min_interval_secs ({}) and {}, got {}",
                sched.min_interval_secs,
                i64::MAX,
                sched.max_interval_secs
            ),
        ));
    }
    for (name, secs) in &sched.intervals {
        let field = format!("scheduler.intervals.{name}");
        if name.parse::<Platform>().is_err() {
            return Err(invalid(&field, "unknown platform"));
        }
        if *secs < sched.min_interval_secs || *secs > sched.max_interval_secs {
            return Err(invalid(
                &field,
                format!(
                    "must be between {} and {} seconds, got {secs}",
                    sched.min_interval_secs, sched.max_interval_secs
                ),
            ));
        }
    }

    let a = &config.analytics;
    if !(a.reddit_comment_weight.is_finite() && a.reddit_comment_weight >= 0.0) {
        return Err(invalid(
            "analytics.reddit_comment_weight",
            format!("must be >= 0, got {}", a.reddit_comment_weight),
        ));
    }
    if !(a.anomaly_threshold.is_finite() && a.anomaly_threshold > 0.0) {
        return Err(invalid(
            "analytics.anomaly_threshold",
            format!("must be > 0, got {}", a.anomaly_threshold),
        ));
    }
    if a.moving_average_window == 0 {
        return Err(invalid("analytics.moving_average_window", "must be > 0"));
    }

    let c = &config.collection;
    if c.max_results == 0 || c.max_results > 100 {
        return Err(invalid(
            "collection.max_results",
            format!("must be between 1 and 100, got {}", c.max_results),
        ));
    }
    let days = config.database.retention_days;
    if days == 0 || days > MAX_RETENTION_DAYS {
        return Err(invalid(
            "database.retention_days",
            format!("must be between 1 and {MAX_RETENTION_DAYS}, got {days}"),
        ));
    }
    if config.database.key_file.trim().is_empty() {
        return Err(invalid("database.key_file", "must not be empty"));
    }

    if c.request_timeout_secs == 0 {
        return Err(invalid("collection.request_timeout_secs", "must be > 0"));
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
