//! # Record extraction
//! Turns one feed `<item>` into a [`StormRecord`].
//!
//! The storm element and each of its fields are located with the same
//! two-step lookup: the configured namespace first, then the bare tag name.
//! Absent fields read as empty strings and flow through the normalizers, so a
//! partial bulletin still yields a record. Items without a storm element are
//! not storm bulletins and yield `None`.

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::feed::{lookup, lookup_text, TagCandidate, XmlElement};
use crate::normalize::{clean_numeric, parse_coordinates, parse_report_datetime};

pub const NHC_NAMESPACE_PREFIX: &str = "nhc";
pub const NHC_NAMESPACE_URI: &str = "https://www.nhc.noaa.gov";
pub const DEFAULT_WALLET_URL_TEMPLATE: &str = "https://www.nhc.noaa.gov/nhc_{wallet}.xml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractorConfig {
    pub namespace_prefix: String,
    pub namespace_uri: String,
    /// Element wrapping the storm fields inside an item.
    pub storm_tag: String,
    /// `{wallet}` is replaced by the lower-cased wallet identifier.
    pub wallet_url_template: String,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            namespace_prefix: NHC_NAMESPACE_PREFIX.to_string(),
            namespace_uri: NHC_NAMESPACE_URI.to_string(),
            storm_tag: "Cyclone".to_string(),
            wallet_url_template: DEFAULT_WALLET_URL_TEMPLATE.to_string(),
        }
    }
}

impl ExtractorConfig {
    /// Namespaced spelling first, then bare.
    pub fn candidates<'a>(&'a self, local: &'a str) -> [TagCandidate<'a>; 2] {
        [
            TagCandidate::Namespaced {
                prefix: &self.namespace_prefix,
                uri: &self.namespace_uri,
                local,
            },
            TagCandidate::Bare(local),
        ]
    }

    pub fn wallet_url(&self, wallet: &str) -> Option<String> {
        let w = wallet.trim();
        if w.is_empty() {
            return None;
        }
        Some(
            self.wallet_url_template
                .replace("{wallet}", &w.to_ascii_lowercase()),
        )
    }
}

/// Normalized output for one bulletin item. Never persisted as-is.
#[derive(Debug, Clone, PartialEq)]
pub struct StormRecord {
    pub storm_id: String,
    pub storm_name: String,
    pub storm_type: String,
    pub wallet: String,
    pub movement: String,
    pub headline: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub wind_speed: i64,
    pub pressure: i64,
    pub report: String,
    pub report_link: String,
    pub report_date: NaiveDateTime,
    pub wallet_url: Option<String>,
    /// From the ATCF identifier when it carries a year.
    pub season: Option<i32>,
    /// Fields whose value came from a normalizer fallback.
    pub degraded_fields: Vec<&'static str>,
}

impl StormRecord {
    pub fn is_degraded(&self) -> bool {
        !self.degraded_fields.is_empty()
    }
}

/// Map one feed item to a [`StormRecord`]. `now` stands in for an
/// unreadable report time.
pub fn extract_storm_at(
    item: &XmlElement,
    cfg: &ExtractorConfig,
    now: DateTime<Utc>,
) -> Option<StormRecord> {
    let Some(storm) = lookup(item, &cfg.candidates(&cfg.storm_tag)) else {
        tracing::debug!("item has no storm element");
        return None;
    };
    tracing::debug!(element = %storm.qualified_name(), "storm element found");

    let field = |name: &str| lookup_text(storm, &cfg.candidates(name));

    let storm_id = field("atcf");
    if storm_id.is_empty() {
        tracing::warn!(element = %storm.qualified_name(), "storm element without identifier, skipping");
        return None;
    }

    let mut degraded_fields = Vec::new();

    let center = parse_coordinates(&field("center"));
    if center.degraded {
        degraded_fields.push("center");
    }
    let (latitude, longitude) = center.value;

    let pressure = clean_numeric(&field("pressure"));
    if pressure.degraded {
        degraded_fields.push("pressure");
    }
    let wind = clean_numeric(&field("wind"));
    if wind.degraded {
        degraded_fields.push("wind");
    }
    let report_date = parse_report_datetime(&field("datetime"), now);
    if report_date.degraded {
        degraded_fields.push("datetime");
    }

    let wallet = field("wallet");
    let wallet_url = cfg.wallet_url(&wallet);

    let record = StormRecord {
        season: season_from_atcf(&storm_id),
        storm_name: field("name"),
        storm_type: field("type"),
        movement: field("movement"),
        headline: field("headline"),
        latitude,
        longitude,
        wind_speed: clamp_i64(wind.value),
        pressure: clamp_i64(pressure.value),
        report: lookup_text(item, &[TagCandidate::Bare("description")]),
        report_link: lookup_text(item, &[TagCandidate::Bare("link")]),
        report_date: report_date.value,
        wallet,
        wallet_url,
        storm_id,
        degraded_fields,
    };

    if record.is_degraded() {
        tracing::debug!(
            storm_id = %record.storm_id,
            fields = ?record.degraded_fields,
            "storm record used fallback values"
        );
    }
    Some(record)
}

fn clamp_i64(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

/// ATCF ids look like `AL092026`: basin, number, year.
fn season_from_atcf(atcf: &str) -> Option<i32> {
    let tail = atcf.trim().get(atcf.trim().len().checked_sub(4)?..)?;
    if !tail.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let year: i32 = tail.parse().ok()?;
    (1950..=2200).contains(&year).then_some(year)
}
