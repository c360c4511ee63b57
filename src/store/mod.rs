//! Durable form of the entry cache and the metadata extensions attach to it.

pub mod gateway;
pub mod json;
pub mod metadata;
pub mod sqlite;

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::app::{BackendError, StoreError};
use crate::config::StoreBackend;
use crate::domain::{normalize_url, CacheEntry};

pub use gateway::{LoadReport, PersistenceGateway, SaveReport};
pub use json::JsonStore;
pub use metadata::{Metadata, MetadataProducer};
pub use sqlite::SqliteStore;

/// Key/value pairs contributed by one metadata producer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataGroup {
    pub namespace: String,
    pub values: BTreeMap<String, String>,
}

impl MetadataGroup {
    pub fn new(namespace: impl Into<String>, values: Metadata) -> Self {
        Self {
            namespace: namespace.into(),
            values,
        }
    }

    /// Add one value, creating the group for `namespace` if needed.
    pub fn push(groups: &mut Vec<MetadataGroup>, namespace: &str, name: String, value: String) {
        match groups.iter_mut().find(|g| g.namespace == namespace) {
            Some(group) => {
                group.values.insert(name, value);
            }
            None => {
                let mut values = Metadata::new();
                values.insert(name, value);
                groups.push(MetadataGroup::new(namespace, values));
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedItem {
    pub entry: CacheEntry,
    #[serde(default)]
    pub metadata: Vec<MetadataGroup>,
}

/// One feed's slice of the cache: its channel entry, if any, and its items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedFeed {
    pub channel_url: Url,
    pub channel: Option<CacheEntry>,
    #[serde(default)]
    pub items: Vec<PersistedItem>,
    #[serde(default)]
    pub metadata: Vec<MetadataGroup>,
}

impl PersistedFeed {
    pub fn new(channel_url: Url) -> Self {
        Self {
            channel_url,
            channel: None,
            items: Vec::new(),
            metadata: Vec::new(),
        }
    }

    /// Rebuild every URL in canonical form, for records read back from a
    /// backend that stores them as plain text.
    pub fn normalized(mut self) -> Self {
        fn renormalize(entry: &CacheEntry) -> CacheEntry {
            CacheEntry::new(
                entry.channel_url(),
                entry.entry_url(),
                entry.publication_date(),
                entry.last_seen(),
            )
        }

        self.channel_url = normalize_url(&self.channel_url);
        self.channel = self.channel.as_ref().map(renormalize);
        for item in &mut self.items {
            item.entry = renormalize(&item.entry);
        }
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub feeds: Vec<PersistedFeed>,
    #[serde(default)]
    pub extra: Vec<MetadataGroup>,
}

impl Snapshot {
    /// Group flat cache entries into one record per feed, ordered by channel URL.
    pub fn from_entries(entries: impl IntoIterator<Item = CacheEntry>) -> Self {
        let mut feeds: BTreeMap<String, PersistedFeed> = BTreeMap::new();

        for entry in entries {
            let feed = feeds
                .entry(entry.channel_url().as_str().to_string())
                .or_insert_with(|| PersistedFeed::new(entry.channel_url().clone()));

            if entry.is_channel_entry() {
                feed.channel = Some(entry);
            } else {
                feed.items.push(PersistedItem {
                    entry,
                    metadata: Vec::new(),
                });
            }
        }

        Self {
            feeds: feeds.into_values().collect(),
            extra: Vec::new(),
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = &CacheEntry> {
        self.feeds.iter().flat_map(|feed| {
            feed.channel
                .iter()
                .chain(feed.items.iter().map(|item| &item.entry))
        })
    }

    pub fn entry_count(&self) -> usize {
        self.entries().count()
    }

    pub fn is_empty(&self) -> bool {
        self.feeds.is_empty() && self.extra.is_empty()
    }
}

/// A backend able to hold one [`Snapshot`].
pub trait Store: Send + Sync {
    fn is_enabled(&self) -> bool {
        true
    }

    /// Human-readable location, used in error messages.
    fn location(&self) -> String;

    fn load(&self) -> Result<Snapshot, BackendError>;

    /// Replace whatever was stored before with `snapshot`.
    fn save(&self, snapshot: &Snapshot) -> Result<(), BackendError>;
}

/// Persists nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullStore;

impl Store for NullStore {
    fn is_enabled(&self) -> bool {
        false
    }

    fn location(&self) -> String {
        "(disabled)".to_string()
    }

    fn load(&self) -> Result<Snapshot, BackendError> {
        Ok(Snapshot::default())
    }

    fn save(&self, _snapshot: &Snapshot) -> Result<(), BackendError> {
        Ok(())
    }
}

pub fn open(backend: StoreBackend, path: &Path) -> Result<Box<dyn Store>, StoreError> {
    match backend {
        StoreBackend::Sqlite => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::load(path.display().to_string(), e))?;
            }
            let store = SqliteStore::new(path)
                .map_err(|e| StoreError::load(path.display().to_string(), e))?;
            Ok(Box::new(store))
        }
        StoreBackend::Json => Ok(Box::new(JsonStore::new(path))),
        StoreBackend::None => Ok(Box::new(NullStore)),
    }
}
