//! # Region orchestrator
//! One full pass over every active region.
//!
//! Order of work, all sequential:
//! 1. take the run lock (or report [`RunOutcome::Locked`] and stop);
//! 2. reset every active storm to inactive;
//! 3. for each active region: fetch its feed, extract and reconcile each item,
//!    and for each reconciled storm with a wallet feed, process that feed too.
//!
//! A region whose feed cannot be fetched is skipped. A failing item is logged
//! and skipped. Neither aborts the run.
//!
//! With an archive directory configured, every feed that created a storm or
//! wrote a history row is also saved raw (see [`crate::archive`]).

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use metrics::{counter, describe_counter, describe_gauge, gauge};
use once_cell::sync::OnceCell;
use std::collections::HashSet;
use std::path::PathBuf;

use crate::archive::{wallet_feed_name, RawFeedArchive};
use crate::extract::{extract_storm_at, ExtractorConfig};
use crate::feed::{FeedSource, FetchedFeed, XmlElement};
use crate::models::Region;
use crate::store::StormStore;
use crate::upsert::{reconcile, ReconcileOutcome};

pub const DEFAULT_LOCK_STALE_AFTER_SECS: i64 = 1800;

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("pipeline_items_total", "Feed items examined.");
        describe_counter!("pipeline_storms_created_total", "Storms seen for the first time.");
        describe_counter!(
            "pipeline_history_snapshots_total",
            "History rows written after a report change."
        );
        describe_counter!(
            "pipeline_feed_errors_total",
            "Feeds that could not be fetched or parsed."
        );
        describe_counter!(
            "pipeline_item_errors_total",
            "Items that failed during reconciliation."
        );
        describe_gauge!("pipeline_last_run_ts", "Unix ts of the last completed run.");
    });
}

#[derive(Debug, Clone)]
pub struct RunSettings {
    pub extractor: ExtractorConfig,
    pub lock_stale_after: Duration,
    /// Where changed feeds are saved raw; `None` disables archiving.
    pub raw_feed_dir: Option<PathBuf>,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            extractor: ExtractorConfig::default(),
            lock_stale_after: Duration::seconds(DEFAULT_LOCK_STALE_AFTER_SECS),
            raw_feed_dir: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub storms_reset: usize,
    pub regions_processed: usize,
    pub regions_skipped: usize,
    pub wallet_feeds_processed: usize,
    pub wallet_feeds_skipped: usize,
    pub items_seen: usize,
    pub items_without_storm: usize,
    pub storms_created: usize,
    pub storms_updated: usize,
    pub snapshots_written: usize,
    pub item_errors: usize,
    pub raw_feeds_archived: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed(RunSummary),
    /// Another run holds the lock; nothing was written.
    Locked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FeedKind {
    Primary,
    Wallet,
}

impl FeedKind {
    fn as_str(self) -> &'static str {
        match self {
            FeedKind::Primary => "primary",
            FeedKind::Wallet => "wallet",
        }
    }
}

/// Run the pipeline once against the wall clock.
pub async fn run_once<S, F>(store: &mut S, feeds: &F, settings: &RunSettings) -> Result<RunOutcome>
where
    S: StormStore + ?Sized,
    F: FeedSource + ?Sized,
{
    run_once_at(store, feeds, settings, Utc::now).await
}

/// [`run_once`] with an injectable clock.
pub async fn run_once_at<S, F, C>(
    store: &mut S,
    feeds: &F,
    settings: &RunSettings,
    clock: C,
) -> Result<RunOutcome>
where
    S: StormStore + ?Sized,
    F: FeedSource + ?Sized,
    C: Fn() -> DateTime<Utc>,
{
    ensure_metrics_described();

    let started = clock();
    let token = format!(
        "{}-{}",
        std::process::id(),
        started.timestamp_nanos_opt().unwrap_or_default()
    );
    let acquired = store
        .try_acquire_run_lock(&token, started.naive_utc(), settings.lock_stale_after)
        .context("acquiring run lock")?;
    if !acquired {
        tracing::warn!("another pipeline run holds the lock, skipping this run");
        return Ok(RunOutcome::Locked);
    }

    let result = Orchestrator {
        store: &mut *store,
        feeds,
        settings,
        clock: &clock,
        archive: settings.raw_feed_dir.as_ref().map(RawFeedArchive::new),
        summary: RunSummary::default(),
        wallets_seen: HashSet::new(),
    }
    .run()
    .await;

    if let Err(e) = store.release_run_lock(&token) {
        tracing::error!(error = %e, "failed to release run lock");
    }

    let summary = result?;
    gauge!("pipeline_last_run_ts").set(clock().timestamp() as f64);
    tracing::info!(
        regions = summary.regions_processed,
        regions_skipped = summary.regions_skipped,
        items = summary.items_seen,
        created = summary.storms_created,
        updated = summary.storms_updated,
        snapshots = summary.snapshots_written,
        item_errors = summary.item_errors,
        archived = summary.raw_feeds_archived,
        "pipeline run completed"
    );
    Ok(RunOutcome::Completed(summary))
}

struct Orchestrator<'a, S: ?Sized, F: ?Sized, C> {
    store: &'a mut S,
    feeds: &'a F,
    settings: &'a RunSettings,
    clock: &'a C,
    archive: Option<RawFeedArchive>,
    summary: RunSummary,
    wallets_seen: HashSet<String>,
}

impl<S, F, C> Orchestrator<'_, S, F, C>
where
    S: StormStore + ?Sized,
    F: FeedSource + ?Sized,
    C: Fn() -> DateTime<Utc>,
{
    async fn run(mut self) -> Result<RunSummary> {
        let now = (self.clock)();
        self.summary.storms_reset = self
            .store
            .mark_all_inactive(now.naive_utc())
            .context("resetting storm status")?;
        tracing::debug!(count = self.summary.storms_reset, "storms marked inactive");

        let regions = self.store.active_regions().context("loading active regions")?;
        if regions.is_empty() {
            tracing::warn!("no active regions configured");
        }

        for region in &regions {
            tracing::info!(region = %region.name, url = %region.feed_url, "processing region");
            let Some(feed) = self.feeds.fetch(&region.feed_url).await else {
                tracing::warn!(region = %region.name, "feed unavailable, skipping region this run");
                self.summary.regions_skipped += 1;
                continue;
            };
            self.summary.regions_processed += 1;
            self.process_primary(&feed, region).await;
        }

        Ok(self.summary)
    }

    async fn process_primary(&mut self, feed: &FetchedFeed, region: &Region) {
        let items = feed.document.items();
        tracing::debug!(region = %region.name, count = items.len(), "primary feed items");

        let mut changed = false;
        for (i, item) in items.iter().enumerate() {
            let Some(outcome) = self.handle_item(item, i + 1, region, FeedKind::Primary) else {
                continue;
            };
            changed |= outcome.created || outcome.snapshot_written;
            if let Some(url) = outcome.storm.wallet_url {
                self.process_wallet(&url, region).await;
            }
        }
        if changed {
            self.archive_feed(&region.name, feed);
        }
    }

    async fn process_wallet(&mut self, url: &str, region: &Region) {
        if !self.wallets_seen.insert(url.to_string()) {
            tracing::debug!(url, "wallet feed already processed this run");
            return;
        }
        tracing::info!(region = %region.name, url, "processing wallet feed");
        let Some(feed) = self.feeds.fetch(url).await else {
            self.summary.wallet_feeds_skipped += 1;
            return;
        };
        self.summary.wallet_feeds_processed += 1;

        let items = feed.document.items();
        tracing::debug!(url, count = items.len(), "wallet feed items");
        let mut changed = false;
        for (i, item) in items.iter().enumerate() {
            if let Some(outcome) = self.handle_item(item, i + 1, region, FeedKind::Wallet) {
                changed |= outcome.created || outcome.snapshot_written;
            }
        }
        if changed {
            self.archive_feed(wallet_feed_name(url), &feed);
        }
    }

    fn archive_feed(&mut self, feed_name: &str, feed: &FetchedFeed) {
        let Some(archive) = &self.archive else {
            return;
        };
        match archive.store(feed_name, feed, (self.clock)()) {
            Ok(_) => self.summary.raw_feeds_archived += 1,
            Err(e) => tracing::error!(
                url = %feed.url,
                dir = %archive.dir().display(),
                error = %e,
                "failed to archive raw feed"
            ),
        }
    }

    /// Extract and reconcile one item. Failures are logged and counted here.
    fn handle_item(
        &mut self,
        item: &XmlElement,
        index: usize,
        region: &Region,
        kind: FeedKind,
    ) -> Option<ReconcileOutcome> {
        self.summary.items_seen += 1;
        counter!("pipeline_items_total").increment(1);

        let Some(record) = extract_storm_at(item, &self.settings.extractor, (self.clock)()) else {
            self.summary.items_without_storm += 1;
            return None;
        };

        let outcome = match reconcile(&mut *self.store, &record, region.id, (self.clock)()) {
            Ok(o) => o,
            Err(e) => {
                tracing::error!(
                    region = %region.name,
                    feed = kind.as_str(),
                    item = index,
                    storm_id = %record.storm_id,
                    error = %e,
                    "failed to reconcile storm, continuing with next item"
                );
                self.summary.item_errors += 1;
                counter!("pipeline_item_errors_total").increment(1);
                return None;
            }
        };

        if outcome.created {
            self.summary.storms_created += 1;
            counter!("pipeline_storms_created_total").increment(1);
        } else {
            self.summary.storms_updated += 1;
        }
        if outcome.snapshot_written {
            self.summary.snapshots_written += 1;
            counter!("pipeline_history_snapshots_total").increment(1);
        }
        Some(outcome)
    }
}
