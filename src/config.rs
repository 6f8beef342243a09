// src/config.rs
use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::extract::{ExtractorConfig, DEFAULT_WALLET_URL_TEMPLATE};
use crate::feed::DEFAULT_FETCH_TIMEOUT;
use crate::models::RegionSeed;
use crate::pipeline::{RunSettings, DEFAULT_LOCK_STALE_AFTER_SECS};

pub const ENV_DATABASE_PATH: &str = "DATABASE_PATH";
pub const ENV_REGIONS_PATH: &str = "REGIONS_PATH";
pub const ENV_FEED_TIMEOUT_SECS: &str = "FEED_TIMEOUT_SECS";
pub const ENV_WALLET_URL_TEMPLATE: &str = "WALLET_URL_TEMPLATE";
pub const ENV_RUN_LOCK_STALE_SECS: &str = "RUN_LOCK_STALE_SECS";
pub const ENV_PIPELINE_INTERVAL_SECS: &str = "PIPELINE_INTERVAL_SECS";
pub const ENV_RAW_FEED_DIR: &str = "RAW_FEED_DIR";

pub const DEFAULT_DATABASE_PATH: &str = "data/storm_tracker.db";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub database_path: PathBuf,
    pub regions_path: Option<PathBuf>,
    pub feed_timeout: Duration,
    pub wallet_url_template: String,
    pub lock_stale_secs: i64,
    /// `None` means run once and exit.
    pub interval_secs: Option<u64>,
    /// Changed feeds are saved raw here when set.
    pub raw_feed_dir: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from(DEFAULT_DATABASE_PATH),
            regions_path: None,
            feed_timeout: DEFAULT_FETCH_TIMEOUT,
            wallet_url_template: DEFAULT_WALLET_URL_TEMPLATE.to_string(),
            lock_stale_secs: DEFAULT_LOCK_STALE_AFTER_SECS,
            interval_secs: None,
            raw_feed_dir: None,
        }
    }
}

impl AppConfig {
    /// Read settings from the process environment. Unset or blank variables
    /// keep their defaults; malformed numbers are an error.
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        if let Some(p) = env_nonempty(ENV_DATABASE_PATH) {
            cfg.database_path = PathBuf::from(p);
        }
        cfg.regions_path = env_nonempty(ENV_REGIONS_PATH).map(PathBuf::from);
        if let Some(secs) = env_parse::<u64>(ENV_FEED_TIMEOUT_SECS)? {
            if secs == 0 {
                return Err(anyhow!("{ENV_FEED_TIMEOUT_SECS} must be greater than zero"));
            }
            cfg.feed_timeout = Duration::from_secs(secs);
        }
        if let Some(t) = env_nonempty(ENV_WALLET_URL_TEMPLATE) {
            cfg.wallet_url_template = t;
        }
        if let Some(secs) = env_parse::<i64>(ENV_RUN_LOCK_STALE_SECS)? {
            cfg.lock_stale_secs = secs.max(0);
        }
        cfg.interval_secs = env_parse::<u64>(ENV_PIPELINE_INTERVAL_SECS)?.filter(|s| *s > 0);
        cfg.raw_feed_dir = env_nonempty(ENV_RAW_FEED_DIR).map(PathBuf::from);
        Ok(cfg)
    }

    pub fn run_settings(&self) -> RunSettings {
        RunSettings {
            extractor: ExtractorConfig {
                wallet_url_template: self.wallet_url_template.clone(),
                ..ExtractorConfig::default()
            },
            lock_stale_after: chrono::Duration::seconds(self.lock_stale_secs),
            raw_feed_dir: self.raw_feed_dir.clone(),
        }
    }

    /// Region seeds from `regions_path` when set, otherwise the default lookup.
    pub fn load_regions(&self) -> Result<Vec<RegionSeed>> {
        match &self.regions_path {
            Some(p) => load_regions_from(p),
            None => load_regions_default(),
        }
    }
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    env_nonempty(key)
        .map(|v| v.parse::<T>().with_context(|| format!("parsing {key}={v}")))
        .transpose()
}

/// Load region seeds from an explicit path. Supports TOML or JSON formats.
pub fn load_regions_from(path: &Path) -> Result<Vec<RegionSeed>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading regions from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    parse_regions(&content, ext.as_str())
        .with_context(|| format!("parsing regions from {}", path.display()))
}

/// Load region seeds using env var + fallbacks:
/// 1) $REGIONS_PATH
/// 2) config/regions.toml
/// 3) config/regions.json
/// 4) built-in NHC feeds
pub fn load_regions_default() -> Result<Vec<RegionSeed>> {
    if let Some(p) = env_nonempty(ENV_REGIONS_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_regions_from(&pb);
        } else {
            return Err(anyhow!("{ENV_REGIONS_PATH} points to non-existent path"));
        }
    }
    let toml_p = PathBuf::from("config/regions.toml");
    if toml_p.exists() {
        return load_regions_from(&toml_p);
    }
    let json_p = PathBuf::from("config/regions.json");
    if json_p.exists() {
        return load_regions_from(&json_p);
    }
    tracing::info!("no region config found, using built-in NHC feeds");
    Ok(default_seed())
}

/// The three NHC basin index feeds.
pub fn default_seed() -> Vec<RegionSeed> {
    [
        ("Atlantic", "https://www.nhc.noaa.gov/index-at.xml"),
        ("Eastern Pacific", "https://www.nhc.noaa.gov/index-ep.xml"),
        ("Central Pacific", "https://www.nhc.noaa.gov/index-cp.xml"),
    ]
    .into_iter()
    .map(|(name, url)| RegionSeed {
        name: name.to_string(),
        feed_url: url.to_string(),
        category: Some("nhc".to_string()),
        active: true,
    })
    .collect()
}

fn parse_regions(s: &str, hint_ext: &str) -> Result<Vec<RegionSeed>> {
    let try_toml = hint_ext == "toml" || s.contains("[[regions]]");
    if try_toml {
        if let Ok(v) = parse_toml(s) {
            return Ok(v);
        }
    }
    if let Ok(v) = parse_json(s) {
        return Ok(v);
    }
    if !try_toml {
        if let Ok(v) = parse_toml(s) {
            return Ok(v);
        }
    }
    Err(anyhow!("unsupported regions format"))
}

fn parse_toml(s: &str) -> Result<Vec<RegionSeed>> {
    #[derive(serde::Deserialize)]
    struct TomlRegions {
        regions: Vec<RegionSeed>,
    }
    let v: TomlRegions = toml::from_str(s)?;
    Ok(v.regions)
}

fn parse_json(s: &str) -> Result<Vec<RegionSeed>> {
    let v: Vec<RegionSeed> = serde_json::from_str(s)?;
    Ok(v)
}
