// src/store/memory.rs
use chrono::{Duration, NaiveDateTime};
use std::collections::BTreeMap;

use super::{clean_seeds, StoreError, StormStore, StormWrite};
use crate::models::{Region, RegionSeed, Storm, StormHistory, StormStatus};

/// Process-local store. Each call is trivially atomic.
#[derive(Debug, Default)]
pub struct MemoryStore {
    regions: Vec<Region>,
    storms: BTreeMap<String, Storm>,
    history: Vec<StormHistory>,
    next_storm_id: i64,
    next_history_id: i64,
    run_lock: Option<(String, NaiveDateTime)>,
    #[cfg(test)]
    reject: std::collections::HashSet<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every commit for `storm_id` fail, as a broken database would.
    #[cfg(test)]
    pub(crate) fn reject_commits_for(&mut self, storm_id: impl Into<String>) {
        self.reject.insert(storm_id.into());
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    #[cfg(test)]
    fn check_rejected(&self, storm_id: &str) -> Result<(), StoreError> {
        if self.reject.contains(storm_id) {
            return Err(StoreError::Rejected(storm_id.to_string()));
        }
        Ok(())
    }

    #[cfg(not(test))]
    fn check_rejected(&self, _storm_id: &str) -> Result<(), StoreError> {
        Ok(())
    }
}

impl StormStore for MemoryStore {
    fn sync_regions(&mut self, seeds: &[RegionSeed], now: NaiveDateTime) -> Result<Vec<Region>, StoreError> {
        for seed in clean_seeds(seeds) {
            match self.regions.iter_mut().find(|r| r.name == seed.name) {
                Some(r) => {
                    if r.feed_url != seed.feed_url || r.category != seed.category || r.active != seed.active {
                        r.feed_url = seed.feed_url;
                        r.category = seed.category;
                        r.active = seed.active;
                        r.updated_at = now;
                    }
                }
                None => {
                    let id = self.regions.len() as i64 + 1;
                    self.regions.push(Region {
                        id,
                        name: seed.name,
                        feed_url: seed.feed_url,
                        category: seed.category,
                        active: seed.active,
                        created_at: now,
                        updated_at: now,
                    });
                }
            }
        }
        Ok(self.regions.clone())
    }

    fn regions(&self) -> Result<Vec<Region>, StoreError> {
        Ok(self.regions.clone())
    }

    fn storm_by_id(&self, storm_id: &str) -> Result<Option<Storm>, StoreError> {
        Ok(self.storms.get(storm_id).cloned())
    }

    fn storms(&self) -> Result<Vec<Storm>, StoreError> {
        let mut v: Vec<Storm> = self.storms.values().cloned().collect();
        v.sort_by_key(|s| s.id);
        Ok(v)
    }

    fn mark_all_inactive(&mut self, now: NaiveDateTime) -> Result<usize, StoreError> {
        let mut n = 0;
        for s in self.storms.values_mut() {
            if s.status == StormStatus::Active {
                s.status = StormStatus::Inactive;
                s.updated_at = now;
                n += 1;
            }
        }
        Ok(n)
    }

    fn commit_storm(&mut self, write: StormWrite) -> Result<Storm, StoreError> {
        let StormWrite { mut storm, snapshot_at } = write;
        self.check_rejected(&storm.storm_id)?;

        if storm.id.is_none() {
            if self.storms.contains_key(&storm.storm_id) {
                return Err(StoreError::Rejected(storm.storm_id));
            }
            self.next_storm_id += 1;
            storm.id = Some(self.next_storm_id);
        }
        self.storms.insert(storm.storm_id.clone(), storm.clone());

        if let Some(recorded_at) = snapshot_at {
            self.next_history_id += 1;
            let mut h = StormHistory::snapshot(&storm, recorded_at);
            h.id = Some(self.next_history_id);
            self.history.push(h);
        }
        Ok(storm)
    }

    fn history_for(&self, storm_id: &str) -> Result<Vec<StormHistory>, StoreError> {
        Ok(self
            .history
            .iter()
            .filter(|h| h.storm_id == storm_id)
            .cloned()
            .collect())
    }

    fn try_acquire_run_lock(
        &mut self,
        token: &str,
        now: NaiveDateTime,
        stale_after: Duration,
    ) -> Result<bool, StoreError> {
        if let Some((held, at)) = &self.run_lock {
            if held != token && now.signed_duration_since(*at) < stale_after {
                return Ok(false);
            }
        }
        self.run_lock = Some((token.to_string(), now));
        Ok(true)
    }

    fn release_run_lock(&mut self, token: &str) -> Result<(), StoreError> {
        if matches!(&self.run_lock, Some((held, _)) if held == token) {
            self.run_lock = None;
        }
        Ok(())
    }
}
