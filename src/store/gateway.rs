use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::metadata::MetadataProducer;
use super::{MetadataGroup, NullStore, Snapshot, Store};
use crate::app::StoreError;
use crate::cache::EntryCache;
use crate::config::ConfigError;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoadReport {
    pub feeds: usize,
    pub entries: usize,
    pub metadata_groups: usize,
    /// Groups whose namespace has no registered producer.
    pub dropped_groups: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SaveReport {
    pub feeds: usize,
    pub entries: usize,
    pub metadata_groups: usize,
}

/// Moves the entry cache and producer metadata between memory and a [`Store`].
///
/// Producers are registered before the run starts and are read-only after.
pub struct PersistenceGateway {
    store: Box<dyn Store>,
    producers: BTreeMap<String, Arc<dyn MetadataProducer>>,
}

impl PersistenceGateway {
    pub fn new(store: Box<dyn Store>) -> Self {
        Self {
            store,
            producers: BTreeMap::new(),
        }
    }

    pub fn disabled() -> Self {
        Self::new(Box::new(NullStore))
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_enabled()
    }

    pub fn location(&self) -> String {
        self.store.location()
    }

    /// Fails if another producer already claimed the same namespace.
    pub fn register(&mut self, producer: Arc<dyn MetadataProducer>) -> Result<(), ConfigError> {
        let namespace = producer.namespace().to_string();
        if self.producers.contains_key(&namespace) {
            return Err(ConfigError::DuplicateNamespace(namespace));
        }

        debug!(namespace = %namespace, "Registered metadata producer");
        self.producers.insert(namespace, producer);
        Ok(())
    }

    pub fn namespaces(&self) -> impl Iterator<Item = &str> {
        self.producers.keys().map(String::as_str)
    }

    /// Fill `cache` from the store and hand every persisted metadata value
    /// to its producer. Must finish before any feed is fetched.
    pub fn load(&self, cache: &EntryCache) -> Result<LoadReport, StoreError> {
        let mut report = LoadReport::default();
        if !self.is_enabled() {
            return Ok(report);
        }

        let snapshot = self
            .store
            .load()
            .map_err(|e| StoreError::load(self.location(), e))?;

        for feed in snapshot.feeds {
            report.feeds += 1;

            self.dispatch(&feed.metadata, &mut report, |producer, name, value| {
                producer.on_feed_metadata(name, value, &feed.channel_url)
            });

            if let Some(channel) = feed.channel {
                cache.load_entry(channel);
                report.entries += 1;
            }

            for item in feed.items {
                self.dispatch(&item.metadata, &mut report, |producer, name, value| {
                    producer.on_item_metadata(name, value, &item.entry)
                });
                cache.load_entry(item.entry);
                report.entries += 1;
            }
        }

        self.dispatch(&snapshot.extra, &mut report, |producer, name, value| {
            producer.on_extra_metadata(name, value)
        });

        info!(
            location = %self.location(),
            feeds = report.feeds,
            entries = report.entries,
            metadata_groups = report.metadata_groups,
            "Loaded feed cache"
        );
        Ok(report)
    }

    fn dispatch<F>(&self, groups: &[MetadataGroup], report: &mut LoadReport, deliver: F)
    where
        F: Fn(&dyn MetadataProducer, &str, &str),
    {
        for group in groups {
            let Some(producer) = self.producers.get(&group.namespace) else {
                warn!(namespace = %group.namespace, "No producer registered for metadata namespace, dropping");
                report.dropped_groups += 1;
                continue;
            };

            report.metadata_groups += 1;
            for (name, value) in &group.values {
                deliver(producer.as_ref(), name.as_str(), value.as_str());
            }
        }
    }

    /// Build the per-feed tree from `cache` and collect what each producer
    /// wants persisted with it.
    pub fn snapshot(&self, cache: &EntryCache) -> Snapshot {
        let mut snapshot = Snapshot::from_entries(cache.all_entries());

        for feed in &mut snapshot.feeds {
            for (namespace, producer) in &self.producers {
                let values = producer.metadata_for_feed(&feed.channel_url);
                if !values.is_empty() {
                    feed.metadata.push(MetadataGroup::new(namespace.clone(), values));
                }

                for item in &mut feed.items {
                    let values = producer.metadata_for_item(&item.entry, &feed.channel_url);
                    if !values.is_empty() {
                        item.metadata.push(MetadataGroup::new(namespace.clone(), values));
                    }
                }
            }
        }

        for (namespace, producer) in &self.producers {
            let values = producer.extra_metadata();
            if !values.is_empty() {
                snapshot.extra.push(MetadataGroup::new(namespace.clone(), values));
            }
        }

        snapshot
    }

    /// Write `cache` out. Runs only once every worker has finished.
    pub fn save(&self, cache: &EntryCache) -> Result<SaveReport, StoreError> {
        let mut report = SaveReport::default();
        if !self.is_enabled() {
            return Ok(report);
        }

        let snapshot = self.snapshot(cache);
        report.feeds = snapshot.feeds.len();
        report.entries = snapshot.entry_count();
        report.metadata_groups = snapshot.extra.len()
            + snapshot
                .feeds
                .iter()
                .map(|f| f.metadata.len() + f.items.iter().map(|i| i.metadata.len()).sum::<usize>())
                .sum::<usize>();

        self.store
            .save(&snapshot)
            .map_err(|e| StoreError::save(self.location(), e))?;

        info!(
            location = %self.location(),
            feeds = report.feeds,
            entries = report.entries,
            "Saved feed cache"
        );
        Ok(report)
    }
}
