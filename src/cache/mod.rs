//! In-memory table of every channel and item seen so far.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::debug;
use url::Url;

use crate::domain::{normalize_url, CacheEntry, FeedDescriptor};

/// Decide whether an item is new given what the cache holds for its URL.
///
/// A sticky entry always wins. When the cache has an entry but either side
/// lacks a publication date the item counts as already handled.
pub fn is_new(cached: Option<&CacheEntry>, item_date: Option<DateTime<Utc>>) -> bool {
    let Some(cached) = cached else {
        return true;
    };

    if cached.is_sticky() {
        return true;
    }

    match (cached.publication_date(), item_date) {
        (Some(cached_date), Some(item_date)) => item_date > cached_date,
        _ => false,
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PruneStats {
    pub removed_unconfigured: usize,
    pub removed_expired: usize,
    pub clamped: usize,
}

impl PruneStats {
    pub fn removed(&self) -> usize {
        self.removed_unconfigured + self.removed_expired
    }
}

#[derive(Default)]
struct Tables {
    by_entry: HashMap<String, CacheEntry>,
    by_channel: HashMap<String, BTreeSet<String>>,
}

impl Tables {
    fn insert(&mut self, entry: CacheEntry) {
        let key = entry.key().to_string();
        let channel_key = entry.channel_url().as_str().to_string();

        let previous_channel = self
            .by_entry
            .get(&key)
            .map(|previous| previous.channel_url().as_str().to_string());
        if let Some(previous_channel) = previous_channel {
            if previous_channel != channel_key {
                self.unlink(previous_channel, &key);
            }
        }

        self.by_channel
            .entry(channel_key)
            .or_default()
            .insert(key.clone());
        self.by_entry.insert(key, entry);
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.by_entry.remove(key)?;
        self.unlink(entry.channel_url().as_str().to_string(), key);
        Some(entry)
    }

    fn unlink(&mut self, channel_key: String, key: &str) {
        if let Some(keys) = self.by_channel.get_mut(&channel_key) {
            keys.remove(key);
            if keys.is_empty() {
                self.by_channel.remove(&channel_key);
            }
        }
    }

    fn upsert(
        &mut self,
        channel_url: &Url,
        entry_url: &Url,
        publication_date: Option<DateTime<Utc>>,
        timestamp: DateTime<Utc>,
    ) {
        let mut entry = CacheEntry::new(channel_url, entry_url, publication_date, Some(timestamp));
        if let Some(existing) = self.by_entry.get(entry.key()) {
            entry.set_sticky(existing.is_sticky());
        }
        self.insert(entry);
    }
}

/// Shared by every worker for the duration of a run. All access goes through
/// one lock, so a lookup followed by an upsert can be made atomic.
#[derive(Default)]
pub struct EntryCache {
    tables: Mutex<Tables>,
}

impl EntryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tables.lock().by_entry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.lock().by_entry.is_empty()
    }

    pub fn lookup(&self, url: &Url) -> Option<CacheEntry> {
        let url = normalize_url(url);
        self.tables.lock().by_entry.get(url.as_str()).cloned()
    }

    pub fn contains(&self, url: &Url) -> bool {
        let url = normalize_url(url);
        self.tables.lock().by_entry.contains_key(url.as_str())
    }

    /// All entries belonging to a feed; the channel entry, when present, comes first.
    pub fn all_entries_for_channel(&self, channel_url: &Url) -> Vec<CacheEntry> {
        let channel_url = normalize_url(channel_url);
        let tables = self.tables.lock();

        let Some(keys) = tables.by_channel.get(channel_url.as_str()) else {
            return Vec::new();
        };

        let mut entries: Vec<CacheEntry> = keys
            .iter()
            .filter_map(|key| tables.by_entry.get(key).cloned())
            .collect();
        entries.sort_by_key(|e| !e.is_channel_entry());
        entries
    }

    /// Every entry, ordered by entry URL.
    pub fn all_entries(&self) -> Vec<CacheEntry> {
        let tables = self.tables.lock();
        let mut entries: Vec<CacheEntry> = tables.by_entry.values().cloned().collect();
        entries.sort_by(|a, b| a.key().cmp(b.key()));
        entries
    }

    pub fn channel_urls(&self) -> Vec<Url> {
        let tables = self.tables.lock();
        let mut keys: Vec<&String> = tables.by_channel.keys().collect();
        keys.sort();
        keys.into_iter()
            .filter_map(|key| Url::parse(key).ok())
            .collect()
    }

    /// Insert or replace the entry for `entry_url`. A transient sticky flag on
    /// an existing entry survives the update.
    pub fn upsert(
        &self,
        channel_url: &Url,
        entry_url: &Url,
        publication_date: Option<DateTime<Utc>>,
        timestamp: DateTime<Utc>,
    ) {
        self.tables
            .lock()
            .upsert(channel_url, entry_url, publication_date, timestamp);
    }

    /// Add a persisted entry as-is.
    pub fn load_entry(&self, entry: CacheEntry) {
        self.tables.lock().insert(entry);
    }

    /// Returns false if there is no entry for `entry_url`.
    pub fn mark_sticky(&self, entry_url: &Url) -> bool {
        let entry_url = normalize_url(entry_url);
        match self.tables.lock().by_entry.get_mut(entry_url.as_str()) {
            Some(entry) => {
                entry.set_sticky(true);
                true
            }
            None => false,
        }
    }

    pub fn is_sticky(&self, entry_url: &Url) -> bool {
        let entry_url = normalize_url(entry_url);
        self.tables
            .lock()
            .by_entry
            .get(entry_url.as_str())
            .is_some_and(CacheEntry::is_sticky)
    }

    /// Apply the staleness decision to one downloaded item and record it,
    /// new or not. Returns whether the item is new.
    pub fn record_item(
        &self,
        channel_url: &Url,
        item_url: &Url,
        published: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> bool {
        self.record_items(channel_url, &[(item_url.clone(), published)], now)
            .pop()
            .unwrap_or(false)
    }

    /// Judge a whole channel's items against the cache as it stood before
    /// the call, then record them all, under a single lock acquisition.
    ///
    /// Items sharing a URL get the same verdict. The entry written for them
    /// carries the latest of their publication dates.
    pub fn record_items(
        &self,
        channel_url: &Url,
        items: &[(Url, Option<DateTime<Utc>>)],
        now: DateTime<Utc>,
    ) -> Vec<bool> {
        let mut tables = self.tables.lock();

        let mut latest: HashMap<String, (Url, Option<DateTime<Utc>>)> = HashMap::new();
        let verdicts: Vec<bool> = items
            .iter()
            .map(|(item_url, published)| {
                let item_url = normalize_url(item_url);
                let fresh = is_new(tables.by_entry.get(item_url.as_str()), *published);
                debug!(item = %item_url, new = fresh, "Recorded item");

                latest
                    .entry(item_url.as_str().to_string())
                    .and_modify(|(_, date)| *date = (*date).max(*published))
                    .or_insert((item_url, *published));
                fresh
            })
            .collect();

        for (item_url, published) in latest.into_values() {
            tables.upsert(channel_url, &item_url, published, now);
        }
        verdicts
    }

    /// Drop entries for feeds that are no longer configured and item entries
    /// not seen within their feed's retention window. A configured feed's
    /// channel entry never expires. Timestamps in the future are pulled back
    /// to `now`.
    pub fn prune(&self, feeds: &[FeedDescriptor], now: DateTime<Utc>) -> PruneStats {
        let retention: HashMap<&str, chrono::Duration> = feeds
            .iter()
            .map(|feed| (feed.url.as_str(), feed.cache_duration()))
            .collect();

        let mut stats = PruneStats::default();
        let mut tables = self.tables.lock();

        let mut doomed = Vec::new();
        for (key, entry) in tables.by_entry.iter_mut() {
            let Some(keep_for) = retention.get(entry.channel_url().as_str()) else {
                doomed.push(key.clone());
                stats.removed_unconfigured += 1;
                continue;
            };

            let Some(last_seen) = entry.last_seen() else {
                continue;
            };

            if last_seen > now {
                entry.set_last_seen(Some(now));
                stats.clamped += 1;
            } else if !entry.is_channel_entry() && last_seen + *keep_for < now {
                doomed.push(key.clone());
                stats.removed_expired += 1;
            }
        }

        for key in doomed {
            tables.remove(&key);
        }

        debug!(
            unconfigured = stats.removed_unconfigured,
            expired = stats.removed_expired,
            clamped = stats.clamped,
            "Pruned cache"
        );
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn date(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, 12, 0, 0).unwrap()
    }

    fn cached(published: Option<DateTime<Utc>>) -> CacheEntry {
        CacheEntry::new(
            &url("https://example.com/feed.xml"),
            &url("https://example.com/post/1"),
            published,
            Some(date(1)),
        )
    }

    #[test]
    fn test_absent_entry_is_new() {
        assert!(is_new(None, None));
        assert!(is_new(None, Some(date(1))));
    }

    #[test]
    fn test_sticky_always_new() {
        let mut entry = cached(Some(date(10)));
        entry.set_sticky(true);

        assert!(is_new(Some(&entry), Some(date(10))));
        assert!(is_new(Some(&entry), Some(date(2))));
        assert!(is_new(Some(&entry), None));
    }

    #[test]
    fn test_missing_dates_are_not_new() {
        assert!(!is_new(Some(&cached(None)), Some(date(5))));
        assert!(!is_new(Some(&cached(Some(date(5)))), None));
        assert!(!is_new(Some(&cached(None)), None));
    }

    #[test]
    fn test_strictly_later_date_is_new() {
        let entry = cached(Some(date(5)));
        assert!(is_new(Some(&entry), Some(date(6))));
        assert!(!is_new(Some(&entry), Some(date(5))));
        assert!(!is_new(Some(&entry), Some(date(4))));
    }

    #[test]
    fn test_upsert_and_lookup() {
        let cache = EntryCache::new();
        let feed = url("https://example.com/feed.xml");
        let post = url("https://example.com/post/1");

        cache.upsert(&feed, &post, Some(date(3)), date(4));

        let entry = cache.lookup(&url("https://EXAMPLE.com/post/1")).unwrap();
        assert_eq!(entry.publication_date(), Some(date(3)));
        assert_eq!(entry.last_seen(), Some(date(4)));
        assert_eq!(entry.channel_url(), &feed);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_upsert_keeps_sticky_flag() {
        let cache = EntryCache::new();
        let feed = url("https://example.com/feed.xml");
        let post = url("https://example.com/post/1");

        cache.upsert(&feed, &post, Some(date(3)), date(4));
        assert!(cache.mark_sticky(&post));
        cache.upsert(&feed, &post, Some(date(5)), date(6));

        assert!(cache.is_sticky(&post));
        assert_eq!(cache.lookup(&post).unwrap().publication_date(), Some(date(5)));
    }

    #[test]
    fn test_mark_sticky_unknown_entry() {
        let cache = EntryCache::new();
        assert!(!cache.mark_sticky(&url("https://example.com/missing")));
    }

    #[test]
    fn test_all_entries_for_channel_puts_channel_first() {
        let cache = EntryCache::new();
        let feed = url("https://example.com/feed.xml");

        cache.upsert(&feed, &url("https://example.com/a"), None, date(1));
        cache.upsert(&feed, &feed, None, date(1));
        cache.upsert(&feed, &url("https://example.com/b"), None, date(1));
        cache.upsert(
            &url("https://other.org/rss"),
            &url("https://other.org/x"),
            None,
            date(1),
        );

        let entries = cache.all_entries_for_channel(&feed);
        assert_eq!(entries.len(), 3);
        assert!(entries[0].is_channel_entry());
        assert!(cache
            .all_entries_for_channel(&url("https://nowhere.net/"))
            .is_empty());
    }

    #[test]
    fn test_upsert_moves_entry_between_channels() {
        let cache = EntryCache::new();
        let first = url("https://example.com/feed.xml");
        let second = url("https://example.com/other.xml");
        let post = url("https://example.com/post/1");

        cache.upsert(&first, &post, None, date(1));
        cache.upsert(&second, &post, None, date(2));

        assert!(cache.all_entries_for_channel(&first).is_empty());
        assert_eq!(cache.all_entries_for_channel(&second).len(), 1);
        assert_eq!(cache.channel_urls(), vec![second]);
    }

    #[test]
    fn test_record_item_is_idempotent() {
        let cache = EntryCache::new();
        let feed = url("https://example.com/feed.xml");
        let post = url("https://example.com/post/1");

        assert!(cache.record_item(&feed, &post, Some(date(3)), date(4)));
        assert!(!cache.record_item(&feed, &post, Some(date(3)), date(5)));
        assert!(cache.record_item(&feed, &post, Some(date(6)), date(7)));
        assert_eq!(cache.lookup(&post).unwrap().last_seen(), Some(date(7)));
    }

    #[test]
    fn test_prune_drops_unconfigured_and_expired() {
        let cache = EntryCache::new();
        let kept = FeedDescriptor::parse("https://example.com/feed.xml")
            .unwrap()
            .with_days_to_cache(7);
        let now = date(20);

        cache.upsert(&kept.url, &url("https://example.com/fresh"), None, date(18));
        cache.upsert(&kept.url, &url("https://example.com/stale"), None, date(2));
        cache.upsert(&kept.url, &url("https://example.com/future"), None, now + Duration::days(3));
        cache.upsert(
            &url("https://gone.org/rss"),
            &url("https://gone.org/1"),
            None,
            date(19),
        );

        let stats = cache.prune(std::slice::from_ref(&kept), now);

        assert_eq!(stats.removed_unconfigured, 1);
        assert_eq!(stats.removed_expired, 1);
        assert_eq!(stats.clamped, 1);
        assert_eq!(stats.removed(), 2);
        assert_eq!(cache.len(), 2);
        assert!(cache.contains(&url("https://example.com/fresh")));
        assert_eq!(
            cache.lookup(&url("https://example.com/future")).unwrap().last_seen(),
            Some(now)
        );
        assert!(cache.channel_urls().iter().all(|u| u == &kept.url));
    }

    #[test]
    fn test_prune_keeps_configured_channel_entry() {
        let cache = EntryCache::new();
        let feed = FeedDescriptor::parse("https://example.com/feed.xml")
            .unwrap()
            .with_days_to_cache(7);
        let now = date(20);

        cache.upsert(&feed.url, &feed.url, Some(date(1)), date(1));
        cache.upsert(&feed.url, &url("https://example.com/stale"), None, date(1));

        let stats = cache.prune(std::slice::from_ref(&feed), now);

        assert_eq!(stats.removed_expired, 1);
        assert_eq!(cache.lookup(&feed.url).unwrap().publication_date(), Some(date(1)));
        assert!(!cache.contains(&url("https://example.com/stale")));

        // Once the feed is dropped from the configuration its channel goes too.
        assert_eq!(cache.prune(&[], now).removed_unconfigured, 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_record_items_judges_against_state_before_the_batch() {
        let cache = EntryCache::new();
        let feed = url("https://example.com/feed.xml");
        let post = url("https://example.com/post/1");
        let other = url("https://example.com/post/2");

        let verdicts = cache.record_items(
            &feed,
            &[
                (post.clone(), Some(date(1))),
                (other.clone(), None),
                (post.clone(), Some(date(3))),
            ],
            date(4),
        );

        assert_eq!(verdicts, vec![true, true, true]);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.lookup(&post).unwrap().publication_date(), Some(date(3)));

        let verdicts = cache.record_items(
            &feed,
            &[(post.clone(), Some(date(5))), (post.clone(), Some(date(2)))],
            date(6),
        );
        assert_eq!(verdicts, vec![true, false]);
        assert_eq!(cache.lookup(&post).unwrap().publication_date(), Some(date(5)));
    }

    #[test]
    fn test_concurrent_record_item() {
        let cache = EntryCache::new();
        let feed = url("https://example.com/feed.xml");

        std::thread::scope(|s| {
            for worker in 0..8 {
                let cache = &cache;
                let feed = &feed;
                s.spawn(move || {
                    for n in 0..50 {
                        let post = url(&format!("https://example.com/{worker}/{n}"));
                        assert!(cache.record_item(feed, &post, Some(date(1)), date(2)));
                    }
                });
            }
        });

        assert_eq!(cache.len(), 400);
        assert_eq!(cache.all_entries_for_channel(&feed).len(), 400);
    }

    #[test]
    fn test_concurrent_record_same_item_reports_new_once() {
        let cache = EntryCache::new();
        let feed = url("https://example.com/feed.xml");
        let post = url("https://example.com/post/1");
        let fresh = std::sync::atomic::AtomicUsize::new(0);

        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    if cache.record_item(&feed, &post, Some(date(1)), date(2)) {
                        fresh.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    }
                });
            }
        });

        assert_eq!(fresh.into_inner(), 1);
    }
}
