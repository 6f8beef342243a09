// src/store/sqlite.rs
use chrono::{Duration, NaiveDateTime};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use std::path::Path;

use super::{clean_seeds, StoreError, StormStore, StormWrite};
use crate::models::{Region, RegionSeed, Storm, StormHistory, StormStatus};

const CURRENT_SCHEMA_VERSION: i32 = 1;

const STORM_COLUMNS: &str = "id, storm_id, region_id, season, storm_name, storm_type, latitude, longitude,
     movement, wind_speed, pressure, headline, report, report_link, report_date, wallet, wallet_url,
     status, created_at, updated_at";

const HISTORY_COLUMNS: &str = "id, storm_id, region_id, season, storm_name, storm_type, latitude, longitude,
     movement, wind_speed, pressure, headline, report, report_link, report_date, wallet, wallet_url,
     status, recorded_at";

impl ToSql for StormStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for StormStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: String| FromSqlError::Other(e.into()))
    }
}

/// SQLite-backed store. One connection, used from one task at a time.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (creating if needed) the database file and bring the schema up to date.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(mut conn: Connection) -> Result<Self, StoreError> {
        if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
            tracing::warn!(error = %err, "could not enable WAL mode");
        }
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        run_migrations(&mut conn)?;
        Ok(Self { conn })
    }
}

fn run_migrations(conn: &mut Connection) -> Result<(), StoreError> {
    let version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    if version > CURRENT_SCHEMA_VERSION {
        return Err(StoreError::SchemaTooNew {
            found: version,
            supported: CURRENT_SCHEMA_VERSION,
        });
    }
    if version == CURRENT_SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn.transaction()?;
    tx.execute_batch(include_str!("schemas/schema_v1.sql"))?;
    tx.pragma_update(None, "user_version", CURRENT_SCHEMA_VERSION)?;
    tx.commit()?;
    tracing::info!(version = CURRENT_SCHEMA_VERSION, "database schema ready");
    Ok(())
}

fn row_to_region(row: &Row<'_>) -> rusqlite::Result<Region> {
    Ok(Region {
        id: row.get("id")?,
        name: row.get("name")?,
        feed_url: row.get("feed_url")?,
        category: row.get("category")?,
        active: row.get("active")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn row_to_storm(row: &Row<'_>) -> rusqlite::Result<Storm> {
    Ok(Storm {
        id: row.get("id")?,
        storm_id: row.get("storm_id")?,
        region_id: row.get("region_id")?,
        season: row.get("season")?,
        storm_name: row.get("storm_name")?,
        storm_type: row.get("storm_type")?,
        latitude: row.get("latitude")?,
        longitude: row.get("longitude")?,
        movement: row.get("movement")?,
        wind_speed: row.get("wind_speed")?,
        pressure: row.get("pressure")?,
        headline: row.get("headline")?,
        report: row.get("report")?,
        report_link: row.get("report_link")?,
        report_date: row.get("report_date")?,
        wallet: row.get("wallet")?,
        wallet_url: row.get("wallet_url")?,
        status: row.get("status")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn row_to_history(row: &Row<'_>) -> rusqlite::Result<StormHistory> {
    Ok(StormHistory {
        id: row.get("id")?,
        storm_id: row.get("storm_id")?,
        region_id: row.get("region_id")?,
        season: row.get("season")?,
        storm_name: row.get("storm_name")?,
        storm_type: row.get("storm_type")?,
        latitude: row.get("latitude")?,
        longitude: row.get("longitude")?,
        movement: row.get("movement")?,
        wind_speed: row.get("wind_speed")?,
        pressure: row.get("pressure")?,
        headline: row.get("headline")?,
        report: row.get("report")?,
        report_link: row.get("report_link")?,
        report_date: row.get("report_date")?,
        wallet: row.get("wallet")?,
        wallet_url: row.get("wallet_url")?,
        status: row.get("status")?,
        recorded_at: row.get("recorded_at")?,
    })
}

fn select_storm(conn: &Connection, storm_id: &str) -> rusqlite::Result<Option<Storm>> {
    conn.query_row(
        &format!("SELECT {STORM_COLUMNS} FROM storms WHERE storm_id = ?1"),
        params![storm_id],
        row_to_storm,
    )
    .optional()
}

fn insert_storm(tx: &Transaction<'_>, s: &Storm) -> rusqlite::Result<()> {
    tx.execute(
        "INSERT INTO storms (storm_id, region_id, season, storm_name, storm_type, latitude, longitude,
             movement, wind_speed, pressure, headline, report, report_link, report_date, wallet,
             wallet_url, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
        params![
            s.storm_id,
            s.region_id,
            s.season,
            s.storm_name,
            s.storm_type,
            s.latitude,
            s.longitude,
            s.movement,
            s.wind_speed,
            s.pressure,
            s.headline,
            s.report,
            s.report_link,
            s.report_date,
            s.wallet,
            s.wallet_url,
            s.status,
            s.created_at,
            s.updated_at,
        ],
    )?;
    Ok(())
}

fn update_storm(tx: &Transaction<'_>, id: i64, s: &Storm) -> rusqlite::Result<usize> {
    tx.execute(
        "UPDATE storms SET storm_id = ?2, region_id = ?3, season = ?4, storm_name = ?5,
             storm_type = ?6, latitude = ?7, longitude = ?8, movement = ?9, wind_speed = ?10,
             pressure = ?11, headline = ?12, report = ?13, report_link = ?14, report_date = ?15,
             wallet = ?16, wallet_url = ?17, status = ?18, updated_at = ?19
         WHERE id = ?1",
        params![
            id,
            s.storm_id,
            s.region_id,
            s.season,
            s.storm_name,
            s.storm_type,
            s.latitude,
            s.longitude,
            s.movement,
            s.wind_speed,
            s.pressure,
            s.headline,
            s.report,
            s.report_link,
            s.report_date,
            s.wallet,
            s.wallet_url,
            s.status,
            s.updated_at,
        ],
    )
}

fn insert_history(tx: &Transaction<'_>, h: &StormHistory) -> rusqlite::Result<()> {
    tx.execute(
        "INSERT INTO storm_history (storm_id, region_id, season, storm_name, storm_type, latitude,
             longitude, movement, wind_speed, pressure, headline, report, report_link, report_date,
             wallet, wallet_url, status, recorded_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
        params![
            h.storm_id,
            h.region_id,
            h.season,
            h.storm_name,
            h.storm_type,
            h.latitude,
            h.longitude,
            h.movement,
            h.wind_speed,
            h.pressure,
            h.headline,
            h.report,
            h.report_link,
            h.report_date,
            h.wallet,
            h.wallet_url,
            h.status,
            h.recorded_at,
        ],
    )?;
    Ok(())
}

impl StormStore for SqliteStore {
    fn sync_regions(&mut self, seeds: &[RegionSeed], now: NaiveDateTime) -> Result<Vec<Region>, StoreError> {
        let tx = self.conn.transaction()?;
        for seed in clean_seeds(seeds) {
            let changed = tx.execute(
                "UPDATE regions SET feed_url = ?2, category = ?3, active = ?4, updated_at = ?5
                 WHERE name = ?1 AND (feed_url != ?2 OR category IS NOT ?3 OR active != ?4)",
                params![seed.name, seed.feed_url, seed.category, seed.active, now],
            )?;
            if changed == 0 {
                tx.execute(
                    "INSERT OR IGNORE INTO regions (name, feed_url, category, active, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                    params![seed.name, seed.feed_url, seed.category, seed.active, now],
                )?;
            }
        }
        tx.commit()?;
        self.regions()
    }

    fn regions(&self) -> Result<Vec<Region>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, feed_url, category, active, created_at, updated_at
             FROM regions ORDER BY id ASC",
        )?;
        let rows = stmt.query_map([], row_to_region)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn storm_by_id(&self, storm_id: &str) -> Result<Option<Storm>, StoreError> {
        Ok(select_storm(&self.conn, storm_id)?)
    }

    fn storms(&self) -> Result<Vec<Storm>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {STORM_COLUMNS} FROM storms ORDER BY id ASC"))?;
        let rows = stmt.query_map([], row_to_storm)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn mark_all_inactive(&mut self, now: NaiveDateTime) -> Result<usize, StoreError> {
        Ok(self.conn.execute(
            "UPDATE storms SET status = ?1, updated_at = ?2 WHERE status = ?3",
            params![StormStatus::Inactive, now, StormStatus::Active],
        )?)
    }

    fn commit_storm(&mut self, write: StormWrite) -> Result<Storm, StoreError> {
        let StormWrite { storm, snapshot_at } = write;
        let tx = self.conn.transaction()?;

        match storm.id {
            None => insert_storm(&tx, &storm)?,
            Some(id) => {
                if update_storm(&tx, id, &storm)? == 0 {
                    return Err(StoreError::Invalid(format!(
                        "storm {} (row {id}) vanished before update",
                        storm.storm_id
                    )));
                }
            }
        }

        let stored = select_storm(&tx, &storm.storm_id)?.ok_or_else(|| {
            StoreError::Invalid(format!("storm {} missing after write", storm.storm_id))
        })?;

        if let Some(recorded_at) = snapshot_at {
            insert_history(&tx, &StormHistory::snapshot(&stored, recorded_at))?;
        }

        tx.commit()?;
        Ok(stored)
    }

    fn history_for(&self, storm_id: &str) -> Result<Vec<StormHistory>, StoreError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {HISTORY_COLUMNS} FROM storm_history WHERE storm_id = ?1 ORDER BY id ASC"
        ))?;
        let rows = stmt.query_map(params![storm_id], row_to_history)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn try_acquire_run_lock(
        &mut self,
        token: &str,
        now: NaiveDateTime,
        stale_after: Duration,
    ) -> Result<bool, StoreError> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let held: Option<(String, NaiveDateTime)> = tx
            .query_row("SELECT token, acquired_at FROM run_lock WHERE id = 1", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .optional()?;

        if let Some((holder, at)) = held {
            if holder != token && now.signed_duration_since(at) < stale_after {
                return Ok(false);
            }
            if holder != token {
                tracing::warn!(holder = %holder, acquired_at = %at, "taking over stale run lock");
            }
        }

        tx.execute(
            "INSERT OR REPLACE INTO run_lock (id, token, acquired_at) VALUES (1, ?1, ?2)",
            params![token, now],
        )?;
        tx.commit()?;
        Ok(true)
    }

    fn release_run_lock(&mut self, token: &str) -> Result<(), StoreError> {
        self.conn
            .execute("DELETE FROM run_lock WHERE id = 1 AND token = ?1", params![token])?;
        Ok(())
    }
}
