pub mod entry;
pub mod feed;
pub mod item;
pub mod links;

pub use entry::CacheEntry;
pub use feed::{FeedDescriptor, DEFAULT_DAYS_TO_CACHE};
pub use item::{Channel, Item, Link, LinkKind};
pub use links::{normalize_url, resolve_link};
