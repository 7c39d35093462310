// Command-line surface and dispatch.

use std::path::PathBuf;
use std::time::Duration;

use tracing::info;

use crate::config::{DeployConfig, DeploySettings};
use crate::error::DeployError;
use crate::health::{self, HealthChecker};
use crate::runner::{CommandRunner, DryRunRunner, ProcessRunner};
use crate::workflow::Deployer;

/// Build, push and roll out the social analytics containers to ECS.
#[derive(Debug, clap::Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// TOML file overriding cluster and service names
    #[clap(long, env = "DEPLOY_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Print mutating commands instead of running them
    #[clap(long, global = true)]
    pub dry_run: bool,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Debug, clap::Subcommand, PartialEq, Eq)]
pub enum Commands {
    /// Build, push, force a new deployment and wait for stability
    Deploy {
        /// Run the health check against this base URL once stable
        #[clap(long)]
        verify: Option<String>,
    },
    /// Move every service back one task definition revision
    Rollback,
    /// Build and tag images locally
    Build,
    /// Log in to the registry and push the tagged images
    Push,
    /// Check a running deployment's health endpoints
    Health {
        /// Base URL of the API
        #[clap(long, env = "HEALTH_CHECK_URL")]
        url: String,

        /// Per-request timeout in seconds
        #[clap(long, default_value_t = health::DEFAULT_TIMEOUT_SECS)]
        timeout_secs: u64,
    },
}

/// Entry point used by the binary: real processes, real environment.
pub async fn run(cli: Cli) -> Result<(), DeployError> {
    let lookup = |key: &str| std::env::var(key).ok();
    if cli.dry_run {
        let runner = DryRunRunner::new(ProcessRunner);
        execute(&cli, lookup, &runner).await
    } else {
        execute(&cli, lookup, &ProcessRunner).await
    }
}

/// Dispatch with an injected environment lookup and runner.
pub async fn execute<F>(
    cli: &Cli,
    lookup: F,
    runner: &dyn CommandRunner,
) -> Result<(), DeployError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Commands::Health { url, timeout_secs } = &cli.command {
        return check_health(url, *timeout_secs).await;
    }

    let settings = DeploySettings::load_or_default(cli.config.as_deref())?;
    let cfg = DeployConfig::from_lookup(lookup, settings)?;
    info!(
        "environment={} region={} registry={}",
        cfg.environment,
        cfg.region,
        cfg.registry()
    );

    let deployer = Deployer::new(&cfg, runner);
    match &cli.command {
        Commands::Build => deployer.build().await,
        Commands::Push => deployer.push().await,
        Commands::Deploy { verify } => {
            deployer.deploy().await?;
            match verify {
                Some(url) => check_health(url, health::DEFAULT_TIMEOUT_SECS).await,
                None => Ok(()),
            }
        }
        Commands::Rollback => {
            for plan in deployer.rollback().await? {
                println!("{}: {} -> {}", plan.service, plan.current, plan.target);
            }
            Ok(())
        }
        Commands::Health { .. } => Ok(()),
    }
}

async fn check_health(url: &str, timeout_secs: u64) -> Result<(), DeployError> {
    let checker = HealthChecker::new(url, Duration::from_secs(timeout_secs));
    let results = checker.run().await;
    for r in &results {
        println!("{r}");
    }
    health::verdict(&results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn parses_each_subcommand() {
        let cli = Cli::try_parse_from(["pulse-deploy", "build"]).unwrap();
        assert_eq!(cli.command, Commands::Build);
        assert!(!cli.dry_run);

        let cli = Cli::try_parse_from(["pulse-deploy", "rollback", "--dry-run"]).unwrap();
        assert_eq!(cli.command, Commands::Rollback);
        assert!(cli.dry_run);

        let cli =
            Cli::try_parse_from(["pulse-deploy", "deploy", "--verify", "http://x"]).unwrap();
        assert_eq!(
            cli.command,
            Commands::Deploy {
                verify: Some("http://x".into())
            }
        );
    }

    #[test]
    fn health_defaults_timeout() {
        let cli = Cli::try_parse_from(["pulse-deploy", "health", "--url", "http://api"]).unwrap();
        assert_eq!(
            cli.command,
            Commands::Health {
                url: "http://api".into(),
                timeout_secs: 10
            }
        );
    }

    #[test]
    fn missing_or_unknown_subcommand_is_a_usage_error() {
        assert!(Cli::try_parse_from(["pulse-deploy"]).is_err());
        assert!(Cli::try_parse_from(["pulse-deploy", ""]).is_err());
        assert!(Cli::try_parse_from(["pulse-deploy", "deplyo"]).is_err());
    }
}
