//! # Upsert engine
//! Reconciles one extracted [`StormRecord`] with the stored current state.
//!
//! Policy:
//! - unknown storm id: insert as active, always snapshot;
//! - known storm id: overwrite every field from the record, mark active, and
//!   snapshot only when `report_date` moved. Cosmetic re-publishes of the same
//!   advisory therefore never add history rows.
//!
//! The storm write and its optional snapshot are one unit of work in the store.

use chrono::{DateTime, Datelike, NaiveDateTime, Utc};
use std::fmt::Debug;

use crate::extract::StormRecord;
use crate::models::{Storm, StormStatus};
use crate::store::{StoreError, StormStore, StormWrite};

/// A field whose stored value was replaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldChange {
    pub field: &'static str,
    pub before: String,
    pub after: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileOutcome {
    /// The storm as committed.
    pub storm: Storm,
    pub created: bool,
    pub snapshot_written: bool,
    pub changes: Vec<FieldChange>,
}

pub fn reconcile<S: StormStore + ?Sized>(
    store: &mut S,
    record: &StormRecord,
    region_id: i64,
    now: DateTime<Utc>,
) -> Result<ReconcileOutcome, StoreError> {
    let ts = now.naive_utc();

    let (storm, created, snapshot, changes) = match store.storm_by_id(&record.storm_id)? {
        None => {
            let storm = new_storm(record, region_id, now.year(), ts);
            (storm, true, true, Vec::new())
        }
        Some(mut existing) => {
            let report_moved = existing.report_date != record.report_date;
            // Already active means another region reported it earlier this run.
            let region_id = if existing.status == StormStatus::Active {
                existing.region_id
            } else {
                region_id
            };
            let changes = apply_record(&mut existing, record, region_id);
            existing.status = StormStatus::Active;
            existing.updated_at = ts;
            (existing, false, report_moved, changes)
        }
    };

    let storm_id = storm.storm_id.clone();
    let committed = store
        .commit_storm(StormWrite {
            storm,
            snapshot_at: snapshot.then_some(ts),
        })
        .map_err(|e| {
            tracing::error!(storm_id = %storm_id, error = %e, "storm commit failed, rolled back");
            e
        })?;

    if created {
        tracing::info!(storm_id = %committed.storm_id, name = %committed.storm_name, "added new storm");
    } else if !changes.is_empty() {
        let summary: Vec<String> = changes
            .iter()
            .map(|c| format!("{}: {} -> {}", c.field, c.before, c.after))
            .collect();
        tracing::debug!(storm_id = %committed.storm_id, changes = %summary.join(", "), "storm fields changed");
        tracing::info!(storm_id = %committed.storm_id, name = %committed.storm_name, "updated storm");
    } else {
        tracing::debug!(storm_id = %committed.storm_id, "no field changes");
    }
    if snapshot {
        tracing::debug!(storm_id = %committed.storm_id, report_date = %committed.report_date, "history snapshot written");
    }

    Ok(ReconcileOutcome {
        storm: committed,
        created,
        snapshot_written: snapshot,
        changes,
    })
}

fn new_storm(record: &StormRecord, region_id: i64, current_year: i32, ts: NaiveDateTime) -> Storm {
    Storm {
        id: None,
        storm_id: record.storm_id.clone(),
        region_id,
        season: record.season.unwrap_or(current_year),
        storm_name: record.storm_name.clone(),
        storm_type: record.storm_type.clone(),
        latitude: record.latitude,
        longitude: record.longitude,
        movement: record.movement.clone(),
        wind_speed: record.wind_speed,
        pressure: record.pressure,
        headline: record.headline.clone(),
        report: record.report.clone(),
        report_link: record.report_link.clone(),
        report_date: record.report_date,
        wallet: record.wallet.clone(),
        wallet_url: record.wallet_url.clone(),
        status: StormStatus::Active,
        created_at: ts,
        updated_at: ts,
    }
}

fn set<T: PartialEq + Debug>(changes: &mut Vec<FieldChange>, field: &'static str, slot: &mut T, value: T) {
    if *slot != value {
        changes.push(FieldChange {
            field,
            before: format!("{slot:?}"),
            after: format!("{value:?}"),
        });
        *slot = value;
    }
}

/// Overwrite the storm's fields from the record; season is kept when the
/// record has none.
fn apply_record(storm: &mut Storm, r: &StormRecord, region_id: i64) -> Vec<FieldChange> {
    let mut c = Vec::new();
    set(&mut c, "region_id", &mut storm.region_id, region_id);
    if let Some(season) = r.season {
        set(&mut c, "season", &mut storm.season, season);
    }
    set(&mut c, "storm_name", &mut storm.storm_name, r.storm_name.clone());
    set(&mut c, "storm_type", &mut storm.storm_type, r.storm_type.clone());
    set(&mut c, "latitude", &mut storm.latitude, r.latitude);
    set(&mut c, "longitude", &mut storm.longitude, r.longitude);
    set(&mut c, "movement", &mut storm.movement, r.movement.clone());
    set(&mut c, "wind_speed", &mut storm.wind_speed, r.wind_speed);
    set(&mut c, "pressure", &mut storm.pressure, r.pressure);
    set(&mut c, "headline", &mut storm.headline, r.headline.clone());
    set(&mut c, "report", &mut storm.report, r.report.clone());
    set(&mut c, "report_link", &mut storm.report_link, r.report_link.clone());
    set(&mut c, "report_date", &mut storm.report_date, r.report_date);
    set(&mut c, "wallet", &mut storm.wallet, r.wallet.clone());
    set(&mut c, "wallet_url", &mut storm.wallet_url, r.wallet_url.clone());
    c
}
