// tests/pipeline_run.rs
use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use std::path::Path;
use storm_tracker::store::StormWrite;
use storm_tracker::{
    run_once_at, FixtureFeeds, MemoryStore, Region, RegionSeed, RunOutcome, RunSettings,
    RunSummary, StoreError, Storm, StormHistory, StormStatus, StormStore,
};

const AT_URL: &str = "https://www.nhc.noaa.gov/index-at.xml";
const EP_URL: &str = "https://www.nhc.noaa.gov/index-ep.xml";
const CP_URL: &str = "https://www.nhc.noaa.gov/index-cp.xml";
const AT2_URL: &str = "https://www.nhc.noaa.gov/nhc_at2.xml";
const AT3_URL: &str = "https://www.nhc.noaa.gov/nhc_at3.xml";

const INDEX_AT: &str = include_str!("fixtures/index_at.xml");
const INDEX_EP: &str = include_str!("fixtures/index_ep.xml");
const WALLET_AT2: &str = include_str!("fixtures/nhc_at2.xml");

fn clock() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 9, 1, 12, 0, 0).unwrap()
}

fn seeded_store() -> MemoryStore {
    let mut store = MemoryStore::new();
    let seeds: Vec<RegionSeed> = [
        ("Atlantic", AT_URL),
        ("Eastern Pacific", EP_URL),
        ("Central Pacific", CP_URL),
    ]
    .into_iter()
    .map(|(name, url)| RegionSeed {
        name: name.into(),
        feed_url: url.into(),
        category: None,
        active: true,
    })
    .collect();
    store.sync_regions(&seeds, clock().naive_utc()).unwrap();
    store
}

// Central Pacific is never registered, so its fetch fails.
fn feeds() -> FixtureFeeds {
    FixtureFeeds::new()
        .with_feed(AT_URL, INDEX_AT)
        .with_feed(EP_URL, INDEX_EP)
        .with_feed(AT2_URL, WALLET_AT2)
}

async fn run(store: &mut MemoryStore, feeds: &FixtureFeeds) -> RunSummary {
    run_with(store, feeds, &RunSettings::default()).await
}

async fn run_with<S: StormStore>(store: &mut S, feeds: &FixtureFeeds, settings: &RunSettings) -> RunSummary {
    match run_once_at(store, feeds, settings, clock).await.unwrap() {
        RunOutcome::Completed(s) => s,
        RunOutcome::Locked => panic!("run unexpectedly locked"),
    }
}

/// Memory store whose commits fail for one storm id.
struct RejectingStore {
    inner: MemoryStore,
    storm_id: &'static str,
}

impl StormStore for RejectingStore {
    fn sync_regions(&mut self, seeds: &[RegionSeed], now: NaiveDateTime) -> Result<Vec<Region>, StoreError> {
        self.inner.sync_regions(seeds, now)
    }
    fn regions(&self) -> Result<Vec<Region>, StoreError> {
        self.inner.regions()
    }
    fn storm_by_id(&self, storm_id: &str) -> Result<Option<Storm>, StoreError> {
        self.inner.storm_by_id(storm_id)
    }
    fn storms(&self) -> Result<Vec<Storm>, StoreError> {
        self.inner.storms()
    }
    fn mark_all_inactive(&mut self, now: NaiveDateTime) -> Result<usize, StoreError> {
        self.inner.mark_all_inactive(now)
    }
    fn commit_storm(&mut self, write: StormWrite) -> Result<Storm, StoreError> {
        if write.storm.storm_id == self.storm_id {
            return Err(StoreError::Rejected(write.storm.storm_id));
        }
        self.inner.commit_storm(write)
    }
    fn history_for(&self, storm_id: &str) -> Result<Vec<StormHistory>, StoreError> {
        self.inner.history_for(storm_id)
    }
    fn try_acquire_run_lock(&mut self, token: &str, now: NaiveDateTime, stale_after: Duration) -> Result<bool, StoreError> {
        self.inner.try_acquire_run_lock(token, now, stale_after)
    }
    fn release_run_lock(&mut self, token: &str) -> Result<(), StoreError> {
        self.inner.release_run_lock(token)
    }
}

fn archived_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect(),
        Err(_) => Vec::new(),
    };
    names.sort();
    names
}

fn status_of(store: &MemoryStore, storm_id: &str) -> StormStatus {
    store.storm_by_id(storm_id).unwrap().unwrap().status
}

#[tokio::test]
async fn first_run_creates_storms_and_skips_failed_region() {
    let mut store = seeded_store();
    let feeds = feeds();
    let summary = run(&mut store, &feeds).await;

    assert_eq!(
        summary,
        RunSummary {
            storms_reset: 0,
            regions_processed: 2,
            regions_skipped: 1,
            wallet_feeds_processed: 1,
            wallet_feeds_skipped: 1,
            items_seen: 6,
            items_without_storm: 2,
            storms_created: 3,
            storms_updated: 1,
            snapshots_written: 3,
            item_errors: 0,
            raw_feeds_archived: 0,
        }
    );

    // Wallet feeds are processed before the next primary item.
    assert_eq!(
        feeds.requested(),
        vec![AT_URL, AT2_URL, AT3_URL, EP_URL, CP_URL]
    );

    let storms = store.storms().unwrap();
    assert_eq!(storms.len(), 3);
    assert!(storms.iter().all(|s| s.status == StormStatus::Active));

    let gabrielle = store.storm_by_id("AL092026").unwrap().unwrap();
    assert_eq!(gabrielle.storm_name, "Gabrielle");
    assert_eq!(gabrielle.region_id, 1);
    assert_eq!(gabrielle.season, 2026);
    assert_eq!(gabrielle.wind_speed, 90);
    assert_eq!(gabrielle.pressure, 972);
    assert_eq!(gabrielle.latitude, Some(24.6));
    assert_eq!(gabrielle.headline, "...GABRIELLE CONTINUES NORTHWESTWARD...");
    assert_eq!(gabrielle.wallet_url.as_deref(), Some(AT2_URL));

    let kiko = store.storm_by_id("EP112026").unwrap().unwrap();
    assert_eq!(kiko.region_id, 2);
    assert_eq!(kiko.longitude, Some(-128.3));
    assert_eq!(kiko.wallet_url, None);

    for id in ["AL092026", "AL102026", "EP112026"] {
        assert_eq!(store.history_for(id).unwrap().len(), 1, "{id}");
    }
}

#[tokio::test]
async fn unchanged_second_run_adds_no_history() {
    let mut store = seeded_store();
    let feeds = feeds();
    run(&mut store, &feeds).await;
    let summary = run(&mut store, &feeds).await;

    assert_eq!(summary.storms_reset, 3);
    assert_eq!(summary.storms_created, 0);
    assert_eq!(summary.storms_updated, 4);
    assert_eq!(summary.snapshots_written, 0);
    assert_eq!(store.history_len(), 3);
    assert!(store
        .storms()
        .unwrap()
        .iter()
        .all(|s| s.status == StormStatus::Active));
}

#[tokio::test]
async fn new_advisory_time_writes_matching_snapshot() {
    let mut store = seeded_store();
    run(&mut store, &feeds()).await;

    let later = |xml: &str| xml.replace("500 AM AST Tue Sep 01 2026", "1100 AM AST Tue Sep 01 2026");
    let at = later(INDEX_AT).replace("90 mph", "100 mph");
    let wallet = later(WALLET_AT2).replace("90 mph", "100 mph");
    let feeds = FixtureFeeds::new()
        .with_feed(AT_URL, at)
        .with_feed(EP_URL, INDEX_EP)
        .with_feed(AT2_URL, wallet);
    let summary = run(&mut store, &feeds).await;
    assert_eq!(summary.snapshots_written, 2);

    let gabrielle = store.storm_by_id("AL092026").unwrap().unwrap();
    assert_eq!(gabrielle.wind_speed, 100);
    let hist = store.history_for("AL092026").unwrap();
    assert_eq!(hist.len(), 2);
    assert!(hist[1].matches(&gabrielle));
    assert_eq!(hist[0].wind_speed, 90);
    assert_eq!(store.history_for("EP112026").unwrap().len(), 1);
}

#[tokio::test]
async fn storms_missing_from_this_run_become_inactive() {
    let mut store = seeded_store();
    run(&mut store, &feeds()).await;

    // Atlantic feed is down this time.
    let feeds = FixtureFeeds::new().with_feed(EP_URL, INDEX_EP);
    let summary = run(&mut store, &feeds).await;
    assert_eq!(summary.regions_skipped, 2);
    assert_eq!(summary.wallet_feeds_processed, 0);

    assert_eq!(status_of(&store, "AL092026"), StormStatus::Inactive);
    assert_eq!(status_of(&store, "AL102026"), StormStatus::Inactive);
    assert_eq!(status_of(&store, "EP112026"), StormStatus::Active);
    assert_eq!(store.history_len(), 3);
}

#[tokio::test]
async fn failed_commit_is_isolated_to_its_item() {
    let mut store = RejectingStore {
        inner: seeded_store(),
        storm_id: "AL092026",
    };
    let feeds = feeds();
    let summary = run_with(&mut store, &feeds, &RunSettings::default()).await;

    assert_eq!(summary.item_errors, 1);
    assert_eq!(summary.storms_created, 2);
    assert!(store.storm_by_id("AL092026").unwrap().is_none());
    assert!(store.storm_by_id("AL102026").unwrap().is_some());
    assert!(store.storm_by_id("EP112026").unwrap().is_some());
    // No committed storm, so no wallet cascade.
    assert!(!feeds.requested().contains(&AT2_URL.to_string()));
}

#[tokio::test]
async fn wallet_feed_is_fetched_once_per_run() {
    let twin = r#"<rss xmlns:nhc="https://www.nhc.noaa.gov"><channel>
        <item><nhc:Cyclone><nhc:atcf>AL092026</nhc:atcf><nhc:wallet>AT2</nhc:wallet></nhc:Cyclone></item>
        <item><nhc:Cyclone><nhc:atcf>AL112026</nhc:atcf><nhc:wallet>AT2</nhc:wallet></nhc:Cyclone></item>
        </channel></rss>"#;
    let mut store = seeded_store();
    let feeds = FixtureFeeds::new()
        .with_feed(AT_URL, twin)
        .with_feed(AT2_URL, WALLET_AT2);
    let summary = run(&mut store, &feeds).await;

    assert_eq!(summary.wallet_feeds_processed, 1);
    let hits = feeds.requested().iter().filter(|u| *u == AT2_URL).count();
    assert_eq!(hits, 1);
}

#[tokio::test]
async fn held_lock_blocks_run_without_writes() {
    let mut store = seeded_store();
    assert!(store
        .try_acquire_run_lock("other-run", clock().naive_utc(), Duration::minutes(30))
        .unwrap());

    let outcome = run_once_at(&mut store, &feeds(), &RunSettings::default(), clock)
        .await
        .unwrap();
    assert_eq!(outcome, RunOutcome::Locked);
    assert!(store.storms().unwrap().is_empty());

    store.release_run_lock("other-run").unwrap();
    let outcome = run_once_at(&mut store, &feeds(), &RunSettings::default(), clock)
        .await
        .unwrap();
    assert!(matches!(outcome, RunOutcome::Completed(_)));
}

#[tokio::test]
async fn inactive_regions_are_not_fetched() {
    let mut store = seeded_store();
    store
        .sync_regions(
            &[RegionSeed {
                name: "Atlantic".into(),
                feed_url: AT_URL.into(),
                category: None,
                active: false,
            }],
            clock().naive_utc(),
        )
        .unwrap();
    let feeds = feeds();
    run(&mut store, &feeds).await;
    assert_eq!(feeds.requested(), vec![EP_URL, CP_URL]);
}

#[tokio::test]
async fn changed_feeds_are_archived_raw_and_unchanged_ones_are_not() {
    let dir = tempfile::tempdir().unwrap();
    let raw = dir.path().join("raw-data");
    let settings = RunSettings {
        raw_feed_dir: Some(raw.clone()),
        ..RunSettings::default()
    };
    let mut store = seeded_store();
    let feeds = feeds();

    let first = run_with(&mut store, &feeds, &settings).await;
    assert_eq!(first.raw_feeds_archived, 2);
    // The AT2 wallet only repeated a known advisory, so it is not kept.
    let files = archived_files(&raw);
    assert_eq!(
        files,
        vec![
            "Atlantic_20260901_090000.xml".to_string(),
            "Eastern-Pacific_20260901_120000.xml".to_string(),
        ]
    );
    assert_eq!(
        std::fs::read_to_string(raw.join(&files[0])).unwrap(),
        INDEX_AT
    );

    let second = run_with(&mut store, &feeds, &settings).await;
    assert_eq!(second.raw_feeds_archived, 0);
    assert_eq!(archived_files(&raw).len(), 2);
}

#[tokio::test]
async fn changed_wallet_feed_is_archived_under_its_key() {
    let primary = r#"<rss xmlns:nhc="https://www.nhc.noaa.gov"><channel>
        <item><nhc:Cyclone><nhc:atcf>AL092026</nhc:atcf><nhc:wallet>AT2</nhc:wallet></nhc:Cyclone></item>
        </channel></rss>"#;
    let dir = tempfile::tempdir().unwrap();
    let settings = RunSettings {
        raw_feed_dir: Some(dir.path().to_path_buf()),
        ..RunSettings::default()
    };
    let mut store = seeded_store();
    let feeds = FixtureFeeds::new()
        .with_feed(AT_URL, primary)
        .with_feed(AT2_URL, WALLET_AT2);

    // The bare primary item falls back to run time; the wallet moves report_date.
    let summary = run_with(&mut store, &feeds, &settings).await;
    assert_eq!(summary.raw_feeds_archived, 2);
    assert!(archived_files(dir.path()).contains(&"nhc_at2_20260901_120000.xml".to_string()));
}

#[tokio::test]
async fn archiving_is_off_by_default() {
    let mut store = seeded_store();
    let summary = run(&mut store, &feeds()).await;
    assert_eq!(summary.storms_created, 3);
    assert_eq!(summary.raw_feeds_archived, 0);
}
