// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod archive;
pub mod config;
pub mod extract;
pub mod feed;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod store;
pub mod upsert;

// ---- Re-exports for stable public API ----
pub use crate::config::AppConfig;
pub use crate::extract::{extract_storm_at, ExtractorConfig, StormRecord};
pub use crate::feed::{FeedDocument, FeedSource, FetchedFeed, FixtureFeeds, HttpFeedFetcher};
pub use crate::models::{Region, RegionSeed, Storm, StormHistory, StormStatus};
pub use crate::pipeline::{run_once, run_once_at, RunOutcome, RunSettings, RunSummary};
pub use crate::store::{MemoryStore, SqliteStore, StoreError, StormStore};
pub use crate::upsert::{reconcile, FieldChange, ReconcileOutcome};
