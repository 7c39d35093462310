// Post-deploy health checks against the running API.
//
// Two requests are made: `GET /health` for the API itself and
// `GET /health/ready` whose `checks` object reports the database, redis and
// scheduler. Redis is non-critical: a failed redis check is `Degraded`.

use std::fmt;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tracing::{info, warn};

use crate::error::DeployError;

pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        })
    }
}

/// Outcome of one check.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckResult {
    pub service: &'static str,
    pub endpoint: String,
    pub status: HealthStatus,
    pub status_code: Option<u16>,
    pub response_time_ms: Option<f64>,
    pub error: Option<String>,
}

impl fmt::Display for CheckResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<10} {:<9}", self.service, self.status.to_string())?;
        if let Some(code) = self.status_code {
            write!(f, " http={code}")?;
        }
        if let Some(ms) = self.response_time_ms {
            write!(f, " {ms:.2}ms")?;
        }
        if let Some(err) = &self.error {
            write!(f, " ({err})")?;
        }
        Ok(())
    }
}

/// Body of `/health/ready`. Missing flags read as false.
#[derive(Debug, Default, Deserialize)]
struct ReadyBody {
    #[serde(default)]
    checks: ReadyChecks,
}

#[derive(Debug, Default, Deserialize)]
struct ReadyChecks {
    #[serde(default)]
    database: bool,
    #[serde(default)]
    redis: bool,
    #[serde(default)]
    scheduler: bool,
}

/// Result of a single HTTP request, before interpretation.
#[derive(Debug, Clone)]
pub enum Reply {
    Response {
        code: u16,
        body: String,
        elapsed_ms: f64,
    },
    TimedOut,
    Failed(String),
}

/// Interpret the `/health` reply.
pub fn evaluate_api(endpoint: &str, reply: &Reply, timeout: Duration) -> CheckResult {
    match reply {
        Reply::Response {
            code, elapsed_ms, ..
        } => CheckResult {
            service: "API",
            endpoint: endpoint.to_string(),
            status: if *code == 200 {
                HealthStatus::Healthy
            } else {
                HealthStatus::Unhealthy
            },
            status_code: Some(*code),
            response_time_ms: Some(round2(*elapsed_ms)),
            error: None,
        },
        Reply::TimedOut => CheckResult {
            service: "API",
            endpoint: endpoint.to_string(),
            status: HealthStatus::Unhealthy,
            status_code: None,
            response_time_ms: Some(timeout.as_secs_f64() * 1000.0),
            error: Some("Request timeout".into()),
        },
        Reply::Failed(e) => failed("API", endpoint, HealthStatus::Unhealthy, e),
    }
}

/// Interpret the `/health/ready` reply into database, redis and scheduler
/// results, in that order.
pub fn evaluate_ready(endpoint: &str, reply: &Reply) -> Vec<CheckResult> {
    let (code, elapsed_ms, body) = match reply {
        Reply::Response {
            code,
            body,
            elapsed_ms,
        } => (*code, *elapsed_ms, body),
        Reply::TimedOut => {
            return ready_failures(endpoint, "Request timeout");
        }
        Reply::Failed(e) => {
            return ready_failures(endpoint, e);
        }
    };

    let checks = if code == 200 {
        serde_json::from_str::<ReadyBody>(body)
            .map(|b| b.checks)
            .unwrap_or_default()
    } else {
        ReadyChecks::default()
    };

    let row = |service: &'static str, ok: bool, bad: HealthStatus, msg: &str| CheckResult {
        service,
        endpoint: endpoint.to_string(),
        status: if ok { HealthStatus::Healthy } else { bad },
        status_code: Some(code),
        response_time_ms: Some(round2(elapsed_ms)),
        error: if ok { None } else { Some(msg.to_string()) },
    };

    vec![
        row(
            "Database",
            checks.database,
            HealthStatus::Unhealthy,
            "Database connection failed",
        ),
        row(
            "Redis",
            checks.redis,
            HealthStatus::Degraded,
            "Redis connection degraded (non-critical)",
        ),
        row(
            "Scheduler",
            checks.scheduler,
            HealthStatus::Unhealthy,
            "Scheduler not running",
        ),
    ]
}

fn ready_failures(endpoint: &str, err: &str) -> Vec<CheckResult> {
    vec![
        failed("Database", endpoint, HealthStatus::Unhealthy, err),
        failed("Redis", endpoint, HealthStatus::Degraded, err),
        failed("Scheduler", endpoint, HealthStatus::Unhealthy, err),
    ]
}

fn failed(service: &'static str, endpoint: &str, status: HealthStatus, err: &str) -> CheckResult {
    CheckResult {
        service,
        endpoint: endpoint.to_string(),
        status,
        status_code: None,
        response_time_ms: None,
        error: Some(err.to_string()),
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Convert a set of results into the command outcome: any `Unhealthy` fails.
pub fn verdict(results: &[CheckResult]) -> Result<(), DeployError> {
    let failed: Vec<String> = results
        .iter()
        .filter(|r| r.status == HealthStatus::Unhealthy)
        .map(|r| r.service.to_string())
        .collect();
    if failed.is_empty() {
        Ok(())
    } else {
        Err(DeployError::HealthCheck { failed })
    }
}

// ---------------------------------------------------------------------------
// HTTP checker
// ---------------------------------------------------------------------------

pub struct HealthChecker {
    base_url: String,
    timeout: Duration,
    http: reqwest::Client,
}

impl HealthChecker {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            http: reqwest::Client::new(),
        }
    }

    async fn fetch(&self, endpoint: &str) -> Reply {
        let start = Instant::now();
        let resp = self.http.get(endpoint).timeout(self.timeout).send().await;
        match resp {
            Ok(resp) => {
                let code = resp.status().as_u16();
                let body = resp.text().await.unwrap_or_default();
                Reply::Response {
                    code,
                    body,
                    elapsed_ms: start.elapsed().as_secs_f64() * 1000.0,
                }
            }
            Err(e) if e.is_timeout() => Reply::TimedOut,
            Err(e) => Reply::Failed(e.to_string()),
        }
    }

    /// Run all checks. Never fails; inspect the results or use [`verdict`].
    pub async fn run(&self) -> Vec<CheckResult> {
        let api_endpoint = format!("{}/health", self.base_url);
        let ready_endpoint = format!("{}/health/ready", self.base_url);

        let api = self.fetch(&api_endpoint).await;
        let ready = self.fetch(&ready_endpoint).await;

        let mut results = vec![evaluate_api(&api_endpoint, &api, self.timeout)];
        results.extend(evaluate_ready(&ready_endpoint, &ready));

        for r in &results {
            match r.status {
                HealthStatus::Healthy => info!("{}", r),
                _ => warn!("{}", r),
            }
        }
        results
    }
}
