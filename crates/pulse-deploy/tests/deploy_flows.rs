// Integration tests for the deployment workflows.
//
// A scripted runner stands in for docker and the aws CLI: it records every
// command line it receives and answers `describe-services` lookups with
// canned task definition ARNs.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use clap::Parser;

use pulse_deploy::cli::{execute, Cli};
use pulse_deploy::config::{DeployConfig, DeploySettings};
use pulse_deploy::error::DeployError;
use pulse_deploy::runner::{CommandOutput, CommandRunner, CommandSpec, DryRunRunner};
use pulse_deploy::workflow::Deployer;

// ===========================================================================
// Test helpers
// ===========================================================================

#[derive(Default)]
struct ScriptedRunner {
    calls: Mutex<Vec<CommandSpec>>,
    /// service name -> stdout of its describe-services lookup
    task_definitions: HashMap<String, String>,
    /// first command whose rendering contains this substring exits 1
    fail_on: Option<String>,
    /// commands containing this substring hang for a day
    stall_on: Option<String>,
}

impl ScriptedRunner {
    fn with_revisions(revisions: &[(&str, u32)]) -> Self {
        Self {
            task_definitions: revisions
                .iter()
                .map(|(svc, rev)| {
                    (
                        svc.to_string(),
                        format!(
                            "arn:aws:ecs:us-east-1:111122223333:task-definition/{}:{rev}\n",
                            svc.trim_end_matches("-service")
                        ),
                    )
                })
                .collect(),
            ..Self::default()
        }
    }

    fn failing_on(pattern: &str) -> Self {
        Self {
            fail_on: Some(pattern.to_string()),
            ..Self::default()
        }
    }

    fn stalling_on(pattern: &str) -> Self {
        Self {
            stall_on: Some(pattern.to_string()),
            ..Self::default()
        }
    }

    fn lines(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.to_string())
            .collect()
    }

    fn count(&self, needle: &str) -> usize {
        self.lines().iter().filter(|l| l.contains(needle)).count()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, DeployError> {
        self.calls.lock().unwrap().push(spec.clone());
        let line = spec.to_string();

        if let Some(pattern) = &self.stall_on {
            if line.contains(pattern.as_str()) {
                tokio::time::sleep(std::time::Duration::from_secs(24 * 3600)).await;
            }
        }
        if let Some(pattern) = &self.fail_on {
            if line.contains(pattern.as_str()) {
                return Ok(CommandOutput::failure(1, "boom"));
            }
        }
        if spec.args.get(1).map(String::as_str) == Some("get-login-password") {
            return Ok(CommandOutput::success("ecr-password\n"));
        }
        if spec.is_lookup() {
            let service = spec
                .args
                .iter()
                .skip_while(|a| *a != "--services")
                .nth(1)
                .cloned()
                .unwrap_or_default();
            return Ok(match self.task_definitions.get(&service) {
                Some(arn) => CommandOutput::success(arn.clone()),
                None => CommandOutput::success("None\n"),
            });
        }
        Ok(CommandOutput::success(""))
    }
}

fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

fn account() -> impl Fn(&str) -> Option<String> {
    env(&[("AWS_ACCOUNT_ID", "111122223333")])
}

fn cfg() -> DeployConfig {
    DeployConfig::from_lookup(account(), DeploySettings::default()).unwrap()
}

fn parse(args: &[&str]) -> Cli {
    let mut argv = vec!["pulse-deploy"];
    argv.extend_from_slice(args);
    Cli::try_parse_from(argv).unwrap()
}

const BACKEND: &str = "social-analytics-backend-service";
const FRONTEND: &str = "social-analytics-frontend-service";

// ===========================================================================
// Preconditions
// ===========================================================================

#[tokio::test]
async fn missing_account_id_runs_nothing() {
    for sub in ["deploy", "rollback", "build", "push"] {
        let runner = ScriptedRunner::default();
        let err = execute(&parse(&[sub]), env(&[]), &runner)
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::MissingAccountId), "{sub}: {err}");
        assert!(runner.lines().is_empty(), "{sub} spawned commands");
    }
}

#[tokio::test]
async fn empty_account_id_runs_nothing() {
    let runner = ScriptedRunner::default();
    let err = execute(&parse(&["build"]), env(&[("AWS_ACCOUNT_ID", "")]), &runner)
        .await
        .unwrap_err();
    assert!(matches!(err, DeployError::MissingAccountId));
    assert!(runner.lines().is_empty());
}

#[tokio::test]
async fn dry_run_still_requires_account_id() {
    let runner = DryRunRunner::new(ScriptedRunner::default());
    let err = execute(&parse(&["deploy", "--dry-run"]), env(&[]), &runner)
        .await
        .unwrap_err();
    assert!(matches!(err, DeployError::MissingAccountId));
}

#[test]
fn unknown_or_missing_subcommand_is_rejected() {
    for argv in [
        vec!["pulse-deploy"],
        vec!["pulse-deploy", ""],
        vec!["pulse-deploy", "rollbak"],
        vec!["pulse-deploy", "DEPLOY"],
    ] {
        assert!(Cli::try_parse_from(argv.clone()).is_err(), "{argv:?}");
    }
}

// ===========================================================================
// build / push / deploy
// ===========================================================================

#[tokio::test]
async fn build_never_logs_in_or_pushes() {
    let runner = ScriptedRunner::default();
    execute(&parse(&["build"]), account(), &runner).await.unwrap();

    assert_eq!(runner.count("docker build"), 2);
    assert_eq!(runner.count("docker tag"), 4);
    assert_eq!(runner.count("login"), 0);
    assert_eq!(runner.count("docker push"), 0);
    assert_eq!(runner.count("aws ecs"), 0);
}

#[tokio::test]
async fn push_never_builds() {
    let runner = ScriptedRunner::default();
    execute(&parse(&["push"]), account(), &runner).await.unwrap();

    let lines = runner.lines();
    assert_eq!(runner.count("docker build"), 0);
    assert_eq!(runner.count("docker tag"), 0);
    assert!(lines[0].starts_with("aws ecr get-login-password --region us-east-1"));
    assert_eq!(
        lines[1],
        "docker login --username AWS --password-stdin \
         111122223333.dkr.ecr.us-east-1.amazonaws.com < <stdin>"
    );
    assert_eq!(runner.count("docker push"), 4);
    assert!(lines.contains(
        &"docker push 111122223333.dkr.ecr.us-east-1.amazonaws.com/social-analytics-backend:production"
            .to_string()
    ));
    assert!(lines.contains(
        &"docker push 111122223333.dkr.ecr.us-east-1.amazonaws.com/social-analytics-frontend:latest"
            .to_string()
    ));
}

#[tokio::test]
async fn login_password_is_piped_not_passed() {
    let runner = ScriptedRunner::default();
    Deployer::new(&cfg(), &runner).push().await.unwrap();

    let calls = runner.calls.lock().unwrap();
    let login = calls
        .iter()
        .find(|c| c.args.first().map(String::as_str) == Some("login"))
        .unwrap();
    assert_eq!(login.stdin.as_deref(), Some(&b"ecr-password"[..]));
    assert!(!login.args.iter().any(|a| a.contains("ecr-password")));
}

#[tokio::test]
async fn deploy_runs_build_push_update_wait_in_order() {
    let runner = ScriptedRunner::default();
    execute(&parse(&["deploy"]), account(), &runner).await.unwrap();

    let lines = runner.lines();
    let first = |needle: &str| lines.iter().position(|l| l.contains(needle)).unwrap();
    let last = |needle: &str| lines.iter().rposition(|l| l.contains(needle)).unwrap();

    assert!(last("docker build") < first("get-login-password"));
    assert!(last("docker push") < first("update-service"));
    assert!(last("update-service") < first("services-stable"));
    assert_eq!(runner.count("--force-new-deployment"), 2);
    assert_eq!(
        lines.last().unwrap(),
        &format!(
            "aws ecs wait services-stable --cluster social-analytics-cluster \
             --services {BACKEND} {FRONTEND} --region us-east-1"
        )
    );
}

#[tokio::test(start_paused = true)]
async fn stuck_stability_wait_times_out() {
    let runner = ScriptedRunner::stalling_on("services-stable");
    let mut cfg = cfg();
    cfg.settings.wait.timeout_secs = 60;

    let started = tokio::time::Instant::now();
    let err = Deployer::new(&cfg, &runner).deploy().await.unwrap_err();
    match err {
        DeployError::Timeout { command, secs } => {
            assert_eq!(secs, 60);
            assert!(command.starts_with("aws ecs wait services-stable"));
        }
        other => panic!("expected timeout, got {other:?}"),
    }
    assert!(started.elapsed() >= std::time::Duration::from_secs(60));
    assert!(started.elapsed() < std::time::Duration::from_secs(3600));

    // The wait was the last command issued; nothing ran after it gave up.
    let lines = runner.lines();
    assert_eq!(runner.count("services-stable"), 1);
    assert!(lines.last().unwrap().contains("services-stable"));
}

#[tokio::test]
async fn environment_and_region_flow_into_tags_and_registry() {
    let runner = ScriptedRunner::default();
    let lookup = env(&[
        ("AWS_ACCOUNT_ID", "9"),
        ("AWS_REGION", "eu-west-2"),
        ("ENVIRONMENT", "staging"),
    ]);
    execute(&parse(&["build"]), lookup, &runner).await.unwrap();

    let lines = runner.lines();
    assert!(lines.contains(
        &"docker build -t social-analytics-backend:staging -f backend/Dockerfile backend".to_string()
    ));
    assert!(lines.contains(
        &"docker tag social-analytics-backend:staging 9.dkr.ecr.eu-west-2.amazonaws.com/social-analytics-backend:staging"
            .to_string()
    ));
}

#[tokio::test]
async fn first_failure_aborts_the_run() {
    let runner = ScriptedRunner::failing_on("docker push");
    let err = execute(&parse(&["deploy"]), account(), &runner)
        .await
        .unwrap_err();

    match err {
        DeployError::StepFailed { command, code, .. } => {
            assert!(command.starts_with("docker push"));
            assert_eq!(code, Some(1));
        }
        other => panic!("expected StepFailed, got: {other}"),
    }
    assert_eq!(runner.count("docker push"), 1);
    assert_eq!(runner.count("update-service"), 0);
    assert_eq!(runner.count("services-stable"), 0);
}

#[tokio::test]
async fn failed_login_stops_before_push() {
    let runner = ScriptedRunner::failing_on("docker login");
    assert!(execute(&parse(&["push"]), account(), &runner).await.is_err());
    assert_eq!(runner.count("docker push"), 0);
}

// ===========================================================================
// rollback
// ===========================================================================

#[tokio::test]
async fn rollback_targets_previous_revision() {
    let runner = ScriptedRunner::with_revisions(&[(BACKEND, 7), (FRONTEND, 2)]);
    execute(&parse(&["rollback"]), account(), &runner)
        .await
        .unwrap();

    let lines = runner.lines();
    assert!(lines.contains(&format!(
        "aws ecs update-service --cluster social-analytics-cluster --service {BACKEND} \
         --task-definition social-analytics-backend:6 --region us-east-1"
    )));
    assert!(lines.contains(&format!(
        "aws ecs update-service --cluster social-analytics-cluster --service {FRONTEND} \
         --task-definition social-analytics-frontend:1 --region us-east-1"
    )));
    assert!(lines.last().unwrap().contains("services-stable"));
}

#[tokio::test]
async fn rollback_at_revision_one_is_refused_without_updates() {
    // Backend could roll back, frontend cannot: nothing may be touched.
    let runner = ScriptedRunner::with_revisions(&[(BACKEND, 4), (FRONTEND, 1)]);
    let err = execute(&parse(&["rollback"]), account(), &runner)
        .await
        .unwrap_err();

    match err {
        DeployError::NoPreviousRevision { service, revision } => {
            assert_eq!(service, FRONTEND);
            assert_eq!(revision, 1);
        }
        other => panic!("expected NoPreviousRevision, got: {other}"),
    }
    assert_eq!(runner.count("update-service"), 0);
    assert_eq!(runner.count("services-stable"), 0);
}

#[tokio::test]
async fn rollback_with_unparseable_lookup_fails() {
    let runner = ScriptedRunner::with_revisions(&[(BACKEND, 3)]);
    let err = Deployer::new(&cfg(), &runner).rollback().await.unwrap_err();
    assert!(matches!(err, DeployError::MalformedTaskDefinition(_)));
    assert_eq!(runner.count("update-service"), 0);
}

#[tokio::test]
async fn dry_run_rollback_resolves_but_does_not_update() {
    let dry = DryRunRunner::new(ScriptedRunner::with_revisions(&[(BACKEND, 5), (FRONTEND, 9)]));
    let plans = Deployer::new(&cfg(), &dry).rollback().await.unwrap();

    assert_eq!(plans[0].target.to_string(), "social-analytics-backend:4");
    assert_eq!(plans[1].target.to_string(), "social-analytics-frontend:8");
}

// ===========================================================================
// Settings file
// ===========================================================================

#[tokio::test]
async fn settings_file_overrides_services() {
    let dir = std::env::temp_dir().join("pulse_deploy_flow_settings");
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("deploy.toml");
    std::fs::write(
        &path,
        r#"
cluster = "edge"

[[services]]
name = "api"
repository = "api"
context = "."
dockerfile = "Dockerfile"
"#,
    )
    .unwrap();

    let runner = ScriptedRunner::default();
    let cli = parse(&["build", "--config", path.to_str().unwrap()]);
    execute(&cli, account(), &runner).await.unwrap();

    assert_eq!(runner.count("docker build"), 1);
    assert!(runner.lines()[0].contains("-t api:production -f Dockerfile ."));

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn missing_settings_file_fails_before_any_step() {
    let runner = ScriptedRunner::default();
    let cli = parse(&["deploy", "--config", "/nonexistent/pulse/deploy.toml"]);
    let err = execute(&cli, account(), &runner).await.unwrap_err();
    assert!(matches!(err, DeployError::Config(_)));
    assert!(runner.lines().is_empty());
}
