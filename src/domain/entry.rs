use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use super::links::normalize_url;

/// Identity record for a whole feed (a channel entry) or one item in it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    channel_url: Url,
    entry_url: Url,
    publication_date: Option<DateTime<Utc>>,
    last_seen: Option<DateTime<Utc>>,
    /// Forces the entry to be treated as new. Never persisted.
    #[serde(skip)]
    sticky: bool,
}

impl CacheEntry {
    pub fn new(
        channel_url: &Url,
        entry_url: &Url,
        publication_date: Option<DateTime<Utc>>,
        last_seen: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            channel_url: normalize_url(channel_url),
            entry_url: normalize_url(entry_url),
            publication_date,
            last_seen,
            sticky: false,
        }
    }

    /// A record for the feed itself.
    pub fn channel(
        channel_url: &Url,
        publication_date: Option<DateTime<Utc>>,
        last_seen: Option<DateTime<Utc>>,
    ) -> Self {
        Self::new(channel_url, channel_url, publication_date, last_seen)
    }

    pub fn channel_url(&self) -> &Url {
        &self.channel_url
    }

    pub fn entry_url(&self) -> &Url {
        &self.entry_url
    }

    pub fn publication_date(&self) -> Option<DateTime<Utc>> {
        self.publication_date
    }

    pub fn last_seen(&self) -> Option<DateTime<Utc>> {
        self.last_seen
    }

    pub fn set_last_seen(&mut self, last_seen: Option<DateTime<Utc>>) {
        self.last_seen = last_seen;
    }

    pub fn is_sticky(&self) -> bool {
        self.sticky
    }

    pub fn set_sticky(&mut self, sticky: bool) {
        self.sticky = sticky;
    }

    /// Exact match only: `feed.xml#post-1` is an item of `feed.xml`.
    pub fn is_channel_entry(&self) -> bool {
        self.entry_url == self.channel_url
    }

    /// Lookup key in the entry cache.
    pub fn key(&self) -> &str {
        self.entry_url.as_str()
    }
}
