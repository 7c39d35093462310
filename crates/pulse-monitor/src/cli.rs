// Command-line surface and dispatch.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::Serialize;
use tracing::{error, info};

use crate::config::{self, MonitorConfig};
use crate::crypto::{CredentialCipher, KEY_ENV};
use crate::db::Database;
use crate::models::{NewEntity, Platform, User};
use crate::platforms::{ClientFactory, HttpClientFactory};
use crate::service::MonitorService;
use crate::ws_server;

/// Collect, analyze and stream social media activity.
#[derive(Debug, clap::Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Directory holding config/, defaults/ and logs/
    #[clap(long, env = "PULSE_HOME", default_value = ".", global = true)]
    pub base_dir: PathBuf,

    /// Log to stderr instead of logs/pulse-monitor.log
    #[clap(long, global = true)]
    pub log_stderr: bool,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Debug, clap::Args, PartialEq, Eq)]
pub struct Auth {
    /// API token printed by create-user
    #[clap(long, env = "PULSE_TOKEN", hide_env_values = true)]
    pub token: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ExportKind {
    Posts,
    Entities,
    Engagement,
    Sentiment,
    Dashboard,
}

#[derive(Debug, clap::Subcommand, PartialEq, Eq)]
pub enum Commands {
    /// Run scheduled collection and the WebSocket server until Ctrl+C
    Serve,
    /// Register a user and print their API token
    CreateUser {
        #[clap(long)]
        username: String,
        #[clap(long)]
        email: String,
    },
    /// Issue a new API token, invalidating the old one
    RotateToken {
        #[clap(flatten)]
        auth: Auth,
    },
    /// Store API credentials for a platform
    AddProfile {
        #[clap(flatten)]
        auth: Auth,
        #[clap(long)]
        platform: Platform,
        #[clap(long)]
        name: String,
        /// JSON object, e.g. '{"bearer_token":"..."}'
        #[clap(long)]
        credentials: String,
        /// Keep the currently active profile active
        #[clap(long)]
        inactive: bool,
    },
    /// Start monitoring an account, channel or subreddit
    Track {
        #[clap(flatten)]
        auth: Auth,
        #[clap(long)]
        platform: Platform,
        #[clap(long)]
        handle: String,
        #[clap(long)]
        display_name: Option<String>,
        /// Polling interval in seconds (platform default otherwise)
        #[clap(long)]
        interval: Option<u64>,
        /// How far back each collection reaches
        #[clap(long, default_value_t = 7)]
        days: u32,
    },
    /// Stop monitoring an entity and delete it
    Untrack {
        #[clap(flatten)]
        auth: Auth,
        entity_id: i64,
    },
    /// Pause scheduled collection for an entity
    Pause {
        #[clap(flatten)]
        auth: Auth,
        entity_id: i64,
    },
    /// Resume scheduled collection for an entity
    Resume {
        #[clap(flatten)]
        auth: Auth,
        entity_id: i64,
    },
    /// List tracked entities
    Entities {
        #[clap(flatten)]
        auth: Auth,
    },
    /// Collect one entity now
    Collect {
        #[clap(flatten)]
        auth: Auth,
        entity_id: i64,
    },
    /// Print the dashboard summary as JSON
    Dashboard {
        #[clap(flatten)]
        auth: Auth,
        #[clap(long, default_value_t = 7)]
        days: u32,
    },
    /// Print the engagement trend report as JSON
    Trends {
        #[clap(flatten)]
        auth: Auth,
        #[clap(long)]
        entity_id: Option<i64>,
        #[clap(long, default_value_t = 30)]
        days: u32,
    },
    /// Delete posts, stream snapshots and job history past the retention window
    Cleanup {
        /// Override `[database] retention_days`
        #[clap(long)]
        days: Option<u32>,
    },
    /// Write a report to a file
    Export {
        #[clap(flatten)]
        auth: Auth,
        #[clap(long, value_enum)]
        kind: ExportKind,
        #[clap(long)]
        out: PathBuf,
        #[clap(long, default_value_t = 7)]
        days: u32,
        /// Include the daily series in sentiment reports
        #[clap(long)]
        timeline: bool,
    },
}

/// Load config, open the database and build the service.
pub fn open_service(base_dir: &Path) -> anyhow::Result<MonitorService> {
    let config = config::load_config(base_dir).context("failed to load configuration")?;
    let mut db_path = config.db_path()?;
    if db_path.is_relative() {
        db_path = base_dir.join(db_path);
    }
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let cipher = credential_cipher(base_dir, &config)?;
    let db = Database::open(&db_path.to_string_lossy(), cipher)
        .context("failed to open database")?;
    info!("Database opened at {}", db_path.display());

    let clients: Arc<dyn ClientFactory> = Arc::new(
        HttpClientFactory::new(
            Duration::from_secs(config.collection.request_timeout_secs),
            config.collection.max_results,
        )
        .context("failed to build HTTP client")?,
    );
    Ok(MonitorService::new(Arc::new(db), config, clients))
}

/// Credential key from `PULSE_CREDENTIAL_KEY`, else from the configured
/// key file (created on first use).
fn credential_cipher(base_dir: &Path, config: &MonitorConfig) -> anyhow::Result<CredentialCipher> {
    if let Ok(key) = std::env::var(KEY_ENV) {
        return CredentialCipher::from_base64_key(&key)
            .with_context(|| format!("{KEY_ENV} is not a valid key"));
    }
    let mut path = PathBuf::from(&config.database.key_file);
    if path.is_relative() {
        path = base_dir.join(path);
    }
    Ok(CredentialCipher::load_or_create(&path)?)
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let service = open_service(&cli.base_dir)?;
    execute(&service, cli.command).await
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn login(service: &MonitorService, auth: &Auth) -> anyhow::Result<User> {
    Ok(service.user_by_token(&auth.token)?)
}

/// Run one command against an opened service.
pub async fn execute(service: &MonitorService, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Serve => serve(service).await,
        Commands::CreateUser { username, email } => {
            let (user, token) = service.create_user(&username, &email)?;
            println!("created user {} (id {})", user.username, user.id);
            println!("token: {token}");
            Ok(())
        }
        Commands::RotateToken { auth } => {
            let user = login(service, &auth)?;
            println!("token: {}", service.rotate_token(user.id)?);
            Ok(())
        }
        Commands::AddProfile {
            auth,
            platform,
            name,
            credentials,
            inactive,
        } => {
            let user = login(service, &auth)?;
            let creds: serde_json::Value =
                serde_json::from_str(&credentials).context("credentials must be JSON")?;
            let profile = service.add_profile(user.id, platform, &name, &creds, !inactive)?;
            println!("added {platform} profile {} (id {})", profile.name, profile.id);
            Ok(())
        }
        Commands::Track {
            auth,
            platform,
            handle,
            display_name,
            interval,
            days,
        } => {
            let user = login(service, &auth)?;
            let entity = service.track_entity(
                user.id,
                NewEntity {
                    platform,
                    handle,
                    display_name,
                    interval_secs: interval,
                    days_to_collect: days,
                },
            )?;
            println!(
                "tracking {} {} (id {}, every {}s)",
                entity.platform, entity.handle, entity.id, entity.interval_secs
            );
            Ok(())
        }
        Commands::Untrack { auth, entity_id } => {
            let user = login(service, &auth)?;
            service.untrack_entity(user.id, entity_id)?;
            println!("untracked {entity_id}");
            Ok(())
        }
        Commands::Pause { auth, entity_id } => {
            let user = login(service, &auth)?;
            service.pause_entity(user.id, entity_id)?;
            println!("paused {entity_id}");
            Ok(())
        }
        Commands::Resume { auth, entity_id } => {
            let user = login(service, &auth)?;
            service.resume_entity(user.id, entity_id)?;
            println!("resumed {entity_id}");
            Ok(())
        }
        Commands::Entities { auth } => {
            let user = login(service, &auth)?;
            print_json(&service.list_entities(user.id)?)
        }
        Commands::Collect { auth, entity_id } => {
            let user = login(service, &auth)?;
            match service.collect_now(user.id, entity_id).await? {
                Some(summary) => print_json(&summary),
                None => {
                    println!("entity {entity_id} is paused; nothing collected");
                    Ok(())
                }
            }
        }
        Commands::Dashboard { auth, days } => {
            let user = login(service, &auth)?;
            print_json(&service.dashboard(user.id, days)?)
        }
        Commands::Trends {
            auth,
            entity_id,
            days,
        } => {
            let user = login(service, &auth)?;
            print_json(&service.trends(user.id, entity_id, days)?)
        }
        Commands::Cleanup { days } => {
            let days = days.unwrap_or(service.config().database.retention_days);
            print_json(&service.cleanup(days)?)
        }
        Commands::Export {
            auth,
            kind,
            out,
            days,
            timeline,
        } => {
            let user = login(service, &auth)?;
            match kind {
                ExportKind::Posts => {
                    let n = service.export_posts_csv(user.id, days, &out)?;
                    println!("wrote {n} posts to {}", out.display());
                }
                ExportKind::Entities => {
                    let n = service.export_entities_csv(user.id, &out)?;
                    println!("wrote {n} entities to {}", out.display());
                }
                ExportKind::Engagement => {
                    service.export_engagement_csv(user.id, days, &out)?;
                    println!("wrote engagement report to {}", out.display());
                }
                ExportKind::Sentiment => {
                    service.export_sentiment_csv(user.id, days, timeline, &out)?;
                    println!("wrote sentiment report to {}", out.display());
                }
                ExportKind::Dashboard => {
                    service.export_dashboard_json(user.id, days, &out)?;
                    println!("wrote dashboard to {}", out.display());
                }
            }
            Ok(())
        }
    }
}

async fn serve(service: &MonitorService) -> anyhow::Result<()> {
    let config = service.config();
    let jobs = service.start()?;
    info!("Scheduled {jobs} collection jobs");

    let result = tokio::select! {
        r = ws_server::run(
            &config.server.ws_host,
            config.server.ws_port,
            service.server_state(),
        ) => r.context("WebSocket server failed"),
        r = tokio::signal::ctrl_c() => {
            r.context("failed to listen for Ctrl+C")?;
            info!("Ctrl+C received, shutting down");
            Ok(())
        }
    };

    service.shutdown();
    if let Err(e) = &result {
        error!("{e:#}");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn parses_track_with_defaults() {
        let cli = Cli::try_parse_from([
            "pulse-monitor",
            "track",
            "--token",
            "pulse_x",
            "--platform",
            "Reddit",
            "--handle",
            "rust",
        ])
        .unwrap();
        assert_eq!(cli.base_dir, PathBuf::from("."));
        assert_eq!(
            cli.command,
            Commands::Track {
                auth: Auth {
                    token: "pulse_x".into()
                },
                platform: Platform::Reddit,
                handle: "rust".into(),
                display_name: None,
                interval: None,
                days: 7,
            }
        );
    }

    #[test]
    fn parses_export_kind_and_global_flags() {
        let cli = Cli::try_parse_from([
            "pulse-monitor",
            "export",
            "--token",
            "t",
            "--kind",
            "sentiment",
            "--out",
            "out/s.csv",
            "--timeline",
            "--base-dir",
            "/srv/pulse",
            "--log-stderr",
        ])
        .unwrap();
        assert!(cli.log_stderr);
        assert_eq!(cli.base_dir, PathBuf::from("/srv/pulse"));
        let Commands::Export { kind, timeline, days, .. } = cli.command else {
            panic!("expected export");
        };
        assert_eq!(kind, ExportKind::Sentiment);
        assert!(timeline);
        assert_eq!(days, 7);
    }

    #[test]
    fn parses_cleanup_override() {
        let cli = Cli::try_parse_from(["pulse-monitor", "cleanup", "--days", "30"]).unwrap();
        assert_eq!(cli.command, Commands::Cleanup { days: Some(30) });
        let cli = Cli::try_parse_from(["pulse-monitor", "cleanup"]).unwrap();
        assert_eq!(cli.command, Commands::Cleanup { days: None });
    }

    #[test]
    fn unknown_platform_is_rejected() {
        assert!(Cli::try_parse_from([
            "pulse-monitor",
            "track",
            "--token",
            "t",
            "--platform",
            "myspace",
            "--handle",
            "x",
        ])
        .is_err());
    }
}
