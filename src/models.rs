//! Stored entities: regions, current storm state, and storm history.

use chrono::NaiveDateTime;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

/// A monitored bulletin source.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub id: i64,
    pub name: String,
    pub feed_url: String,
    pub category: Option<String>,
    pub active: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Region definition as it appears in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RegionSeed {
    pub name: String,
    pub feed_url: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StormStatus {
    Active,
    Inactive,
}

impl StormStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StormStatus::Active => "active",
            StormStatus::Inactive => "inactive",
        }
    }
}

impl fmt::Display for StormStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StormStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(StormStatus::Active),
            "inactive" => Ok(StormStatus::Inactive),
            other => Err(format!("unknown storm status '{other}'")),
        }
    }
}

/// Current state of one storm, keyed by `storm_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct Storm {
    /// Surrogate key; `None` until first committed.
    pub id: Option<i64>,
    pub storm_id: String,
    pub region_id: i64,
    pub season: i32,
    pub storm_name: String,
    pub storm_type: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub movement: String,
    pub wind_speed: i64,
    pub pressure: i64,
    pub headline: String,
    pub report: String,
    pub report_link: String,
    pub report_date: NaiveDateTime,
    pub wallet: String,
    pub wallet_url: Option<String>,
    pub status: StormStatus,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Immutable snapshot of a storm at the moment a new report arrived.
#[derive(Debug, Clone, PartialEq)]
pub struct StormHistory {
    pub id: Option<i64>,
    pub storm_id: String,
    pub region_id: i64,
    pub season: i32,
    pub storm_name: String,
    pub storm_type: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub movement: String,
    pub wind_speed: i64,
    pub pressure: i64,
    pub headline: String,
    pub report: String,
    pub report_link: String,
    pub report_date: NaiveDateTime,
    pub wallet: String,
    pub wallet_url: Option<String>,
    pub status: StormStatus,
    pub recorded_at: NaiveDateTime,
}

impl StormHistory {
    /// Copy of the committed storm, minus its surrogate key and audit columns.
    pub fn snapshot(storm: &Storm, recorded_at: NaiveDateTime) -> Self {
        Self {
            id: None,
            storm_id: storm.storm_id.clone(),
            region_id: storm.region_id,
            season: storm.season,
            storm_name: storm.storm_name.clone(),
            storm_type: storm.storm_type.clone(),
            latitude: storm.latitude,
            longitude: storm.longitude,
            movement: storm.movement.clone(),
            wind_speed: storm.wind_speed,
            pressure: storm.pressure,
            headline: storm.headline.clone(),
            report: storm.report.clone(),
            report_link: storm.report_link.clone(),
            report_date: storm.report_date,
            wallet: storm.wallet.clone(),
            wallet_url: storm.wallet_url.clone(),
            status: storm.status,
            recorded_at,
        }
    }

    /// True when every snapshotted field equals the storm's.
    pub fn matches(&self, storm: &Storm) -> bool {
        let mut expected = Self::snapshot(storm, self.recorded_at);
        expected.id = self.id;
        &expected == self
    }
}
