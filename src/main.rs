//! ps360 CLI - PowerScribe 360 activity tracker.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use ps360::{
    CheckpointManager, Config, EventSink, HealthState, LogSink, Poller, PostgresSink,
    PowerscribeClient, Service,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ps360")]
#[command(version)]
#[command(about = "Track radiologist activity in PowerScribe 360 and record it in autotriage")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file (optional; env vars suffice)
    #[arg(short, long, global = true, default_value = "ps360.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll continuously, recycling the RAS session every day
    Run,

    /// Sign in, run a single pass and sign out
    Once {
        /// Log updates instead of writing them to the database
        #[arg(long)]
        dry_run: bool,
    },

    /// Validate configuration
    Validate,

    /// Show example configuration
    Example,
}

fn setup_logging(verbose: bool, json: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false);

    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

fn print_example_config() {
    let example = r#"# ps360 configuration file
# Every key is optional; secrets normally come from the environment.

[powerscribe]
# host = "ras.example.org"          # or PS360_HOST
# username = "tracker"              # or PS360_USER
# password = "${PS360_PASSWORD}"    # or PS360_PASSWORD
scheme = "http"
version = "7.0.212.0"
locale = "en-NZ"
time_zone_id = "New Zealand Standard Time"
site_id = 0
namespace = "http://tempuri.org/"
addressing = true
timeout_secs = 60
max_retries = 3

[polling]
interval_secs = 60
lookback_minutes = 240
session_hours = 24
retry_delay_secs = 60
page_size = 500
max_pages = 10
concurrency = 4

[database]
# url = "postgres://user:pass@db/autotriage"   # or AUTOTRIAGE_CONN
max_connections = 2

[health]
enabled = true
bind = "0.0.0.0:5001"
stale_after_secs = 300

[state]
# path = "/var/lib/ps360/state.json"
"#;
    println!("{example}");
}

fn load_config(path: &Path) -> Result<Config> {
    Config::load_or_default(path)
        .with_context(|| format!("Failed to load config from {path:?}"))
}

fn build_poller(
    config: &Config,
    sink: Arc<dyn EventSink>,
    health: Arc<HealthState>,
) -> Result<Poller> {
    let checkpoint = config
        .state
        .path
        .as_deref()
        .map(CheckpointManager::new)
        .transpose()
        .context("Failed to prepare checkpoint")?;

    Poller::new(&config.polling, sink, health, checkpoint).context("Failed to load checkpoint")
}

fn postgres_sink(config: &Config) -> Result<Arc<dyn EventSink>> {
    let Some(url) = config.resolve_database_url() else {
        bail!(
            "Missing database URL: set {} env var or database.url in config",
            config.database.url_env
        );
    };
    let sink = PostgresSink::connect_lazy(&url, config.database.max_connections)
        .context("Invalid database URL")?;
    Ok(Arc::new(sink))
}

/// Flip the shutdown flag on SIGINT or SIGTERM.
fn spawn_signal_handler(tx: watch::Sender<bool>) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            match signal(SignalKind::terminate()) {
                Ok(mut term) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {}
                        _ = term.recv() => {}
                    }
                }
                Err(e) => {
                    warn!(error = %e, "SIGTERM handler unavailable");
                    let _ = tokio::signal::ctrl_c().await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }

        info!("Shutdown requested");
        let _ = tx.send(true);
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose, cli.json_logs);

    match cli.command {
        Commands::Example => {
            print_example_config();
        }

        Commands::Validate => {
            let config = load_config(&cli.config)?;
            config.validate().context("Invalid configuration")?;

            info!("Configuration is valid");
            info!("  Host: {}", config.resolve_host()?);
            info!(
                "  Poll: every {}s, {} rows/page, {} concurrent",
                config.polling.interval_secs,
                config.polling.page_size,
                config.polling.concurrency
            );
            match config.resolve_database_url() {
                Some(_) => info!("  Database: configured"),
                None => warn!("  Database: not configured (only `once --dry-run` will work)"),
            }
            if config.health.enabled {
                info!("  Health: {}", config.health.bind);
            }
        }

        Commands::Once { dry_run } => {
            let config = load_config(&cli.config)?;
            config.validate().context("Invalid configuration")?;

            let sink: Arc<dyn EventSink> = if dry_run {
                Arc::new(LogSink)
            } else {
                postgres_sink(&config)?
            };
            let health = Arc::new(HealthState::new(Duration::from_secs(
                config.health.stale_after_secs,
            )));
            let client = PowerscribeClient::new(&config)?;
            let poller = build_poller(&config, sink, Arc::clone(&health))?;
            let credentials = config.resolve_credentials()?;

            let mut service =
                Service::new(client, poller, credentials, config.polling.clone(), health);
            let stats = service.run_once().await.context("Poll pass failed")?;

            println!("\n=== ps360 Pass Complete ===");
            println!("Orders:      {}", stats.orders);
            println!("Reports:     {}", stats.reports_scanned);
            println!("Events:      {}", stats.events_seen);
            println!("Applied:     {}", stats.events_applied);
            println!("Uploaded:    {}", stats.users_uploaded);
            println!("Tracked:     {}", service.poller().registry().len());
            println!("Runtime:     {:.1}s", stats.duration.as_secs_f64());
        }

        Commands::Run => {
            let config = load_config(&cli.config)?;
            config.validate().context("Invalid configuration")?;

            let sink = postgres_sink(&config)?;
            let health = Arc::new(HealthState::new(Duration::from_secs(
                config.health.stale_after_secs,
            )));
            if config.health.enabled {
                ps360::health::start_server(Arc::clone(&health), &config.health.bind)
                    .await
                    .context("Failed to start health endpoint")?;
            }

            let client = PowerscribeClient::new(&config)?;
            let poller = build_poller(&config, sink, Arc::clone(&health))?;
            let credentials = config.resolve_credentials()?;

            let (tx, rx) = watch::channel(false);
            spawn_signal_handler(tx);

            let mut service =
                Service::new(client, poller, credentials, config.polling.clone(), health);
            service.run(rx).await?;
        }
    }

    Ok(())
}
