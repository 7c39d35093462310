// Deployment configuration: environment variables plus optional TOML
// overrides for cluster, service and image names.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::error::DeployError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

pub const ENV_ENVIRONMENT: &str = "ENVIRONMENT";
pub const ENV_REGION: &str = "AWS_REGION";
pub const ENV_ACCOUNT_ID: &str = "AWS_ACCOUNT_ID";

pub const DEFAULT_ENVIRONMENT: &str = "production";
pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_CLUSTER: &str = "social-analytics-cluster";
pub const DEFAULT_WAIT_TIMEOUT_SECS: u64 = 900;

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
}

// ---------------------------------------------------------------------------
// Settings file
// ---------------------------------------------------------------------------

/// Resource names the workflows operate on. Loaded from a TOML file when one
/// is given, otherwise [`DeploySettings::default`] describes the stock
/// backend + frontend pair.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct DeploySettings {
    pub cluster: String,
    pub services: Vec<ServiceConfig>,
    #[serde(default)]
    pub wait: WaitConfig,
}

/// One ECS service and the image it runs.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ServiceConfig {
    /// ECS service name.
    pub name: String,
    /// ECR repository name (also the local image name).
    pub repository: String,
    /// Docker build context directory.
    pub context: String,
    /// Dockerfile path, relative to the working directory.
    pub dockerfile: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct WaitConfig {
    pub timeout_secs: u64,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_WAIT_TIMEOUT_SECS,
        }
    }
}

impl Default for DeploySettings {
    fn default() -> Self {
        Self {
            cluster: DEFAULT_CLUSTER.to_string(),
            services: vec![
                ServiceConfig {
                    name: "social-analytics-backend-service".into(),
                    repository: "social-analytics-backend".into(),
                    context: "backend".into(),
                    dockerfile: "backend/Dockerfile".into(),
                },
                ServiceConfig {
                    name: "social-analytics-frontend-service".into(),
                    repository: "social-analytics-frontend".into(),
                    context: "frontend".into(),
                    dockerfile: "frontend/Dockerfile".into(),
                },
            ],
            wait: WaitConfig::default(),
        }
    }
}

impl DeploySettings {
    /// Load settings from `path` and validate them.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
            path: path.to_path_buf(),
        })?;
        let settings: DeploySettings =
            toml::from_str(&text).map_err(|e| ConfigError::ParseError {
                path: path.to_path_buf(),
                source: e,
            })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load from `path` when given, else return the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.cluster.trim().is_empty() {
            return Err(ConfigError::ValidationError {
                field: "cluster".into(),
                message: "must not be empty".into(),
            });
        }

        if self.services.is_empty() {
            return Err(ConfigError::ValidationError {
                field: "services".into(),
                message: "at least one service is required".into(),
            });
        }

        let mut seen = HashSet::new();
        for (i, svc) in self.services.iter().enumerate() {
            let fields: &[(&str, &str)] = &[
                ("name", &svc.name),
                ("repository", &svc.repository),
                ("context", &svc.context),
                ("dockerfile", &svc.dockerfile),
            ];
            for (name, value) in fields {
                if value.trim().is_empty() {
                    return Err(ConfigError::ValidationError {
                        field: format!("services[{i}].{name}"),
                        message: "must not be empty".into(),
                    });
                }
            }
            if !seen.insert(svc.name.as_str()) {
                return Err(ConfigError::ValidationError {
                    field: format!("services[{i}].name"),
                    message: format!("duplicate service name `{}`", svc.name),
                });
            }
        }

        if self.wait.timeout_secs == 0 {
            return Err(ConfigError::ValidationError {
                field: "wait.timeout_secs".into(),
                message: "must be > 0".into(),
            });
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Assembled config
// ---------------------------------------------------------------------------

/// Everything a workflow needs: where to deploy, and what.
#[derive(Debug, Clone)]
pub struct DeployConfig {
    pub environment: String,
    pub region: String,
    pub account_id: String,
    pub settings: DeploySettings,
}

impl DeployConfig {
    /// Build from a variable lookup (the process environment in the
    /// binary). Empty values count as unset.
    pub fn from_lookup<F>(lookup: F, settings: DeploySettings) -> Result<Self, DeployError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let account_id = get(ENV_ACCOUNT_ID).ok_or(DeployError::MissingAccountId)?;
        let environment = get(ENV_ENVIRONMENT).unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string());
        let region = get(ENV_REGION).unwrap_or_else(|| DEFAULT_REGION.to_string());

        Ok(Self {
            environment,
            region,
            account_id,
            settings,
        })
    }

    /// ECR registry host for this account and region.
    pub fn registry(&self) -> String {
        format!("{}.dkr.ecr.{}.amazonaws.com", self.account_id, self.region)
    }

    /// Local image reference produced by `docker build`.
    pub fn local_image(&self, service: &ServiceConfig) -> String {
        format!("{}:{}", service.repository, self.environment)
    }

    /// Fully-qualified registry image reference with the given tag.
    pub fn remote_image(&self, service: &ServiceConfig, tag: &str) -> String {
        format!("{}/{}:{}", self.registry(), service.repository, tag)
    }

    /// The tags every image is pushed under: the environment label and `latest`.
    pub fn remote_tags(&self) -> Vec<String> {
        if self.environment == "latest" {
            vec!["latest".to_string()]
        } else {
            vec![self.environment.clone(), "latest".to_string()]
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
