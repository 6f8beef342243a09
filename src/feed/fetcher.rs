// src/feed/fetcher.rs
use async_trait::async_trait;
use metrics::counter;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use super::document::{FeedDocument, FeedParseError};

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected HTTP status {0}")]
    Status(reqwest::StatusCode),
    #[error("feed body is not usable xml: {0}")]
    Parse(#[from] FeedParseError),
    #[error("no fixture registered for {0}")]
    Missing(String),
}

/// A fetched feed: the body as received plus its parsed tree.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedFeed {
    pub url: String,
    pub body: String,
    pub document: FeedDocument,
}

impl FetchedFeed {
    pub fn parse(url: impl Into<String>, body: impl Into<String>) -> Result<Self, FeedParseError> {
        let body = body.into();
        let document = FeedDocument::parse(&body)?;
        Ok(Self {
            url: url.into(),
            body,
            document,
        })
    }
}

/// Anything that can turn a feed URL into a parsed document.
///
/// Callers only ever see `Option`: `None` means "nothing to process for this
/// source in this run". The reason is logged by [`FeedSource::fetch`].
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn try_fetch(&self, url: &str) -> Result<FetchedFeed, FetchError>;

    async fn fetch(&self, url: &str) -> Option<FetchedFeed> {
        match self.try_fetch(url).await {
            Ok(feed) => {
                tracing::debug!(url, items = feed.document.items().len(), "feed fetched");
                Some(feed)
            }
            Err(e) => {
                tracing::warn!(url, error = %e, "feed unavailable");
                counter!("pipeline_feed_errors_total").increment(1);
                None
            }
        }
    }
}

/// HTTP GET with a bounded timeout.
pub struct HttpFeedFetcher {
    client: reqwest::Client,
}

impl HttpFeedFetcher {
    pub fn new(timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("storm-tracker/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl FeedSource for HttpFeedFetcher {
    async fn try_fetch(&self, url: &str) -> Result<FetchedFeed, FetchError> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }
        let body = resp.text().await?;
        tracing::trace!(url, sample = %body.chars().take(200).collect::<String>(), "feed body");
        Ok(FetchedFeed::parse(url, body)?)
    }
}

/// In-memory URL → body map, for offline runs and tests.
/// Unknown URLs behave like a failed fetch.
#[derive(Default)]
pub struct FixtureFeeds {
    bodies: HashMap<String, String>,
    requested: Mutex<Vec<String>>,
}

impl FixtureFeeds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_feed(mut self, url: impl Into<String>, body: impl Into<String>) -> Self {
        self.bodies.insert(url.into(), body.into());
        self
    }

    pub fn insert(&mut self, url: impl Into<String>, body: impl Into<String>) {
        self.bodies.insert(url.into(), body.into());
    }

    /// URLs asked for so far, in order.
    pub fn requested(&self) -> Vec<String> {
        match self.requested.lock() {
            Ok(v) => v.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl FeedSource for FixtureFeeds {
    async fn try_fetch(&self, url: &str) -> Result<FetchedFeed, FetchError> {
        match self.requested.lock() {
            Ok(mut v) => v.push(url.to_string()),
            Err(poisoned) => poisoned.into_inner().push(url.to_string()),
        }
        let body = self
            .bodies
            .get(url)
            .ok_or_else(|| FetchError::Missing(url.to_string()))?;
        Ok(FetchedFeed::parse(url, body.as_str())?)
    }
}
