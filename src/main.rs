//! Storm tracker: binary entrypoint.
//! Runs the ingestion pipeline once, or on a fixed interval.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use storm_tracker::config::AppConfig;
use storm_tracker::{run_once, HttpFeedFetcher, RunOutcome, RunSettings, SqliteStore, StormStore};

#[derive(Debug, Parser)]
#[command(name = "storm-tracker", version, about = "Tropical cyclone bulletin ingester")]
struct Cli {
    /// Log filter, e.g. `info` or `storm_tracker=debug,warn`.
    #[arg(long, env = "LOG_LEVEL")]
    log_level: Option<String>,

    /// Repeat the run every N seconds instead of exiting after one pass.
    #[arg(long, env = "PIPELINE_INTERVAL_SECS")]
    interval_secs: Option<u64>,

    /// SQLite database file.
    #[arg(long, env = "DATABASE_PATH")]
    database: Option<PathBuf>,

    /// Region seed file (TOML or JSON).
    #[arg(long, env = "REGIONS_PATH")]
    regions: Option<PathBuf>,

    /// Keep raw copies of feeds that changed stored state in this directory.
    #[arg(long, env = "RAW_FEED_DIR")]
    raw_feed_dir: Option<PathBuf>,
}

fn init_tracing(level: Option<&str>) {
    let filter = match level {
        Some(l) => EnvFilter::try_new(l).unwrap_or_else(|_| EnvFilter::new("info")),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

async fn tick(store: &mut SqliteStore, fetcher: &HttpFeedFetcher, settings: &RunSettings) {
    match run_once(store, fetcher, settings).await {
        Ok(RunOutcome::Completed(summary)) => {
            tracing::debug!(?summary, "run summary");
        }
        Ok(RunOutcome::Locked) => {
            tracing::info!("previous run still in progress, tick skipped");
        }
        Err(e) => {
            tracing::error!(error = ?e, "pipeline run failed");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    let mut cfg = AppConfig::from_env().context("reading configuration")?;
    if let Some(p) = cli.database {
        cfg.database_path = p;
    }
    if cli.regions.is_some() {
        cfg.regions_path = cli.regions;
    }
    if cli.raw_feed_dir.is_some() {
        cfg.raw_feed_dir = cli.raw_feed_dir;
    }
    if cli.interval_secs.is_some() {
        cfg.interval_secs = cli.interval_secs.filter(|s| *s > 0);
    }

    let mut store = SqliteStore::open(&cfg.database_path)
        .with_context(|| format!("opening database {}", cfg.database_path.display()))?;
    let seeds = cfg.load_regions().context("loading region seeds")?;
    let regions = store
        .sync_regions(&seeds, chrono::Utc::now().naive_utc())
        .context("syncing regions")?;
    tracing::info!(
        regions = regions.len(),
        active = regions.iter().filter(|r| r.active).count(),
        db = %cfg.database_path.display(),
        "storage ready"
    );

    let fetcher = HttpFeedFetcher::new(cfg.feed_timeout).context("building HTTP client")?;
    let settings = cfg.run_settings();

    let Some(interval) = cfg.interval_secs else {
        return match run_once(&mut store, &fetcher, &settings).await? {
            RunOutcome::Completed(_) => Ok(()),
            RunOutcome::Locked => {
                tracing::warn!("exiting without running: another run holds the lock");
                Ok(())
            }
        };
    };

    tracing::info!(interval_secs = interval, "starting scheduled runs");
    let mut ticker = tokio::time::interval(Duration::from_secs(interval));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = ticker.tick() => tick(&mut store, &fetcher, &settings).await,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown requested");
                return Ok(());
            }
        }
    }
}
