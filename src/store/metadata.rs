use std::collections::BTreeMap;

use url::Url;

use crate::domain::CacheEntry;

pub type Metadata = BTreeMap<String, String>;

/// An extension that keeps its own data alongside the entry cache.
///
/// On load every persisted value is handed back to the producer that owns
/// its namespace. On save the producer is asked what it wants stored for
/// each feed, each item and globally. All methods except `namespace` have
/// no-op defaults.
///
/// Methods take `&self`; producers that collect state on load need their
/// own interior mutability.
pub trait MetadataProducer: Send + Sync {
    /// Globally unique, e.g. a reverse-DNS identifier.
    fn namespace(&self) -> &str;

    fn on_feed_metadata(&self, _name: &str, _value: &str, _feed: &Url) {}

    fn on_item_metadata(&self, _name: &str, _value: &str, _item: &CacheEntry) {}

    fn on_extra_metadata(&self, _name: &str, _value: &str) {}

    fn metadata_for_feed(&self, _feed: &Url) -> Metadata {
        Metadata::new()
    }

    fn metadata_for_item(&self, _item: &CacheEntry, _feed: &Url) -> Metadata {
        Metadata::new()
    }

    fn extra_metadata(&self) -> Metadata {
        Metadata::new()
    }
}
