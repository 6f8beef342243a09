//! Storage collaborator for regions, storms and storm history.
//!
//! The pipeline depends only on [`StormStore`]. Two backends ship with the
//! crate: [`SqliteStore`] for real runs and [`MemoryStore`] for tests and dry
//! runs.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use chrono::{Duration, NaiveDateTime};

use crate::models::{Region, RegionSeed, Storm, StormHistory};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("write rejected for storm {0}")]
    Rejected(String),
    #[error("invalid stored data: {0}")]
    Invalid(String),
    #[error("database schema version {found} is newer than supported {supported}")]
    SchemaTooNew { found: i32, supported: i32 },
}

/// One storm create/update, plus whether a history row must follow it.
#[derive(Debug, Clone, PartialEq)]
pub struct StormWrite {
    /// `id == None` means insert.
    pub storm: Storm,
    /// When set, a [`StormHistory`] row is written from the committed storm
    /// with this `recorded_at`, in the same unit of work.
    pub snapshot_at: Option<NaiveDateTime>,
}

pub trait StormStore {
    /// Insert or update regions by name; returns the stored rows.
    fn sync_regions(&mut self, seeds: &[RegionSeed], now: NaiveDateTime) -> Result<Vec<Region>, StoreError>;

    fn regions(&self) -> Result<Vec<Region>, StoreError>;

    fn active_regions(&self) -> Result<Vec<Region>, StoreError> {
        Ok(self.regions()?.into_iter().filter(|r| r.active).collect())
    }

    fn storm_by_id(&self, storm_id: &str) -> Result<Option<Storm>, StoreError>;

    fn storms(&self) -> Result<Vec<Storm>, StoreError>;

    /// Flip every active storm to inactive; returns how many changed.
    fn mark_all_inactive(&mut self, now: NaiveDateTime) -> Result<usize, StoreError>;

    /// Commit the storm and (optionally) its history row atomically; returns
    /// the storm as stored. On error nothing is written.
    fn commit_storm(&mut self, write: StormWrite) -> Result<Storm, StoreError>;

    /// History rows for one storm, oldest first.
    fn history_for(&self, storm_id: &str) -> Result<Vec<StormHistory>, StoreError>;

    /// Advisory run lock. Returns false while another live token holds it;
    /// a lock older than `stale_after` is taken over.
    fn try_acquire_run_lock(
        &mut self,
        token: &str,
        now: NaiveDateTime,
        stale_after: Duration,
    ) -> Result<bool, StoreError>;

    fn release_run_lock(&mut self, token: &str) -> Result<(), StoreError>;
}

/// Trim names, drop blanks, keep the first definition of each name.
pub(crate) fn clean_seeds(seeds: &[RegionSeed]) -> Vec<RegionSeed> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::with_capacity(seeds.len());
    for s in seeds {
        let name = s.name.trim();
        let url = s.feed_url.trim();
        if name.is_empty() || url.is_empty() || !seen.insert(name.to_string()) {
            continue;
        }
        out.push(RegionSeed {
            name: name.to_string(),
            feed_url: url.to_string(),
            category: s.category.clone().filter(|c| !c.trim().is_empty()),
            active: s.active,
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_seeds_trims_and_dedups() {
        let seeds = vec![
            RegionSeed {
                name: " Atlantic ".into(),
                feed_url: "https://x/at.xml".into(),
                category: Some(" ".into()),
                active: true,
            },
            RegionSeed {
                name: "Atlantic".into(),
                feed_url: "https://x/other.xml".into(),
                category: None,
                active: false,
            },
            RegionSeed {
                name: "".into(),
                feed_url: "https://x/blank.xml".into(),
                category: None,
                active: true,
            },
        ];
        let out = clean_seeds(&seeds);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].name, "Atlantic");
        assert_eq!(out[0].feed_url, "https://x/at.xml");
        assert_eq!(out[0].category, None);
    }
}
