// src/feed/mod.rs
pub mod document;
pub mod fetcher;

pub use document::{lookup, lookup_text, FeedDocument, FeedParseError, TagCandidate, XmlElement};
pub use fetcher::{
    FeedSource, FetchError, FetchedFeed, FixtureFeeds, HttpFeedFetcher, DEFAULT_FETCH_TIMEOUT,
};
