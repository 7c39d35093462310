// Error types for the deployment workflows.

use thiserror::Error;

use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum DeployError {
    /// `AWS_ACCOUNT_ID` was unset or empty. Raised before any step runs.
    #[error("AWS_ACCOUNT_ID must be set to the target account identifier")]
    MissingAccountId,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error("`{command}` exited with {}: {stderr}", exit_label(*.code))]
    StepFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("`{command}` did not finish within {secs}s")]
    Timeout { command: String, secs: u64 },

    #[error("unrecognized task definition reference: {0:?}")]
    MalformedTaskDefinition(String),

    #[error("service `{service}` is at revision {revision}; there is no earlier revision to roll back to")]
    NoPreviousRevision { service: String, revision: u32 },

    #[error("health check failed for: {}", .failed.join(", "))]
    HealthCheck { failed: Vec<String> },
}

fn exit_label(code: Option<i32>) -> String {
    match code {
        Some(c) => format!("status {c}"),
        None => "no status (terminated by signal)".to_string(),
    }
}
