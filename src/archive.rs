// src/archive.rs
//! Raw copies of feeds that changed stored state.
//!
//! Files are named `<feed-name>_<pubDate as %Y%m%d_%H%M%S>.xml`, spaces in the
//! feed name replaced by `-`. The stamp is the first `pubDate` in the document
//! (UTC); when it is missing or unreadable the run time is used instead.

use chrono::{DateTime, NaiveDateTime, Utc};
use std::path::{Path, PathBuf};

use crate::feed::{lookup_text, FetchedFeed, TagCandidate};
use crate::normalize::parse_report_datetime;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFeedArchive {
    dir: PathBuf,
}

impl RawFeedArchive {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write the feed body; returns the file written. Re-archiving the same
    /// feed and stamp overwrites the earlier copy.
    pub fn store(
        &self,
        feed_name: &str,
        feed: &FetchedFeed,
        now: DateTime<Utc>,
    ) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(file_name(feed_name, published_at(feed, now)));
        std::fs::write(&path, &feed.body)?;
        tracing::info!(url = %feed.url, path = %path.display(), "raw feed archived");
        Ok(path)
    }
}

fn published_at(feed: &FetchedFeed, now: DateTime<Utc>) -> NaiveDateTime {
    let raw = lookup_text(&feed.document.root, &[TagCandidate::Bare("pubDate")]);
    let parsed = parse_report_datetime(&raw, now);
    if parsed.degraded {
        tracing::debug!(url = %feed.url, "feed has no usable pubDate, stamping with run time");
    }
    parsed.value
}

fn file_name(feed_name: &str, stamp: NaiveDateTime) -> String {
    format!(
        "{}_{}.xml",
        feed_name.trim().replace(' ', "-"),
        stamp.format("%Y%m%d_%H%M%S")
    )
}

/// Archive name for a wallet feed: the last path segment without `.xml`.
pub fn wallet_feed_name(url: &str) -> &str {
    let tail = url.trim_end_matches('/').rsplit('/').next().unwrap_or(url);
    tail.strip_suffix(".xml").unwrap_or(tail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 9, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn name_uses_channel_pub_date() {
        let feed = FetchedFeed::parse(
            "mem://at",
            "<rss><channel><pubDate>Tue, 01 Sep 2026 09:05:30 GMT</pubDate><item/></channel></rss>",
        )
        .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let archive = RawFeedArchive::new(dir.path().join("raw"));
        let path = archive.store("Eastern Pacific", &feed, now()).unwrap();

        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "Eastern-Pacific_20260901_090530.xml"
        );
        assert_eq!(std::fs::read_to_string(&path).unwrap(), feed.body);
    }

    #[test]
    fn missing_pub_date_falls_back_to_run_time() {
        let feed = FetchedFeed::parse("mem://at", "<rss><channel><item/></channel></rss>").unwrap();
        assert_eq!(
            file_name("Atlantic", published_at(&feed, now())),
            "Atlantic_20260901_120000.xml"
        );
    }

    #[test]
    fn wallet_name_is_url_stem() {
        assert_eq!(wallet_feed_name("https://www.nhc.noaa.gov/nhc_at2.xml"), "nhc_at2");
        assert_eq!(wallet_feed_name("mem://wallet"), "wallet");
    }
}
