use thiserror::Error;

use crate::config::ConfigError;
use crate::export::ExportError;
use crate::models::Platform;
use crate::platforms::PlatformError;
use crate::scheduler::SchedulerError;
use crate::validation::ValidationError;

/// Errors surfaced by [`crate::service::MonitorService`] operations.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error(transparent)]
    Export(#[from] ExportError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error("username or email already registered")]
    UserExists,

    #[error("user not found")]
    UserNotFound,

    #[error("invalid API token")]
    InvalidToken,

    #[error("profile {0} not found")]
    ProfileNotFound(i64),

    #[error("no active {0} profile; add one with add-profile")]
    NoActiveProfile(Platform),

    #[error("entity {0} not found")]
    EntityNotFound(i64),

    #[error("{platform} {handle} is already tracked")]
    EntityExists { platform: Platform, handle: String },

    #[error("interval must be at least {min} seconds, got {got}")]
    IntervalTooShort { min: u64, got: u64 },

    #[error("interval must be at most {max} seconds, got {got}")]
    IntervalTooLong { max: u64, got: u64 },

    #[error("days must be between 1 and {max}, got {got}")]
    DaysOutOfRange { max: u32, got: u32 },

    #[error("storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}
