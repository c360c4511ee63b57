//! # Freshet
//!
//! Concurrent feed acquisition with a persistent "what have I already seen"
//! cache.
//!
//! ## Architecture
//!
//! Each run follows the same sequence:
//!
//! ```text
//! Store → EntryCache → ParallelFetcher → FeedPipeline → callback → Store
//! ```
//!
//! The persisted cache is loaded and pruned before any worker starts.
//! Workers pull feeds off a shared queue, fetch them conditionally, parse
//! them and keep only items the cache hasn't seen. The cache is written back
//! once every worker has finished.
//!
//! ## Quick Start
//!
//! ```bash
//! # List configured feeds
//! freshet feeds
//!
//! # Fetch everything and print new items
//! freshet run
//!
//! # Show what the cache remembers about one feed
//! freshet cache https://blog.rust-lang.org/feed.xml
//! ```
//!
//! ## Modules
//!
//! - [`app`]: Application context and error types
//! - [`cache`]: In-memory entry cache and the staleness decision
//! - [`cli`]: Command-line interface definitions
//! - [`config`]: TOML configuration
//! - [`domain`]: Cache entries, feed descriptors, parsed channels
//! - [`fetcher`]: Conditional fetching, the per-feed pipeline and the worker pool
//! - [`hooks`]: Extension points around download, parse and persistence
//! - [`normalizer`]: Feed parsing and character decoding
//! - [`store`]: Persistence gateway and its backends

/// Application context and error handling.
///
/// The [`AppContext`](app::AppContext) struct wires together all components:
/// gateway, pipeline, worker pool.
pub mod app;

/// In-memory index of every URL seen so far.
///
/// [`EntryCache`](cache::EntryCache) is shared by all workers and decides
/// whether an item is new.
pub mod cache;

/// Command-line interface using clap.
///
/// - `run [--no-cache] [--no-update]` - Fetch feeds and print new items
/// - `feeds` - List configured feeds
/// - `cache [feed]` - Show persisted cache entries
pub mod cli;

/// Configuration management.
///
/// Loads from `~/.config/freshet/config.toml`.
pub mod config;

/// Core domain models.
///
/// - [`CacheEntry`](domain::CacheEntry): Staleness record for one URL
/// - [`FeedDescriptor`](domain::FeedDescriptor): Static per-feed configuration
/// - [`Channel`](domain::Channel): A parsed feed and its items
pub mod domain;

/// Fetching with conditional requests.
///
/// - [`ConditionalFetcher`](fetcher::ConditionalFetcher): Skips unchanged sources
/// - [`FeedPipeline`](fetcher::FeedPipeline): One feed from request to new items
/// - [`ParallelFetcher`](fetcher::ParallelFetcher): Fixed worker pool over a shared queue
pub mod fetcher;

/// Hook traits and the ordered [`HookRegistry`](hooks::HookRegistry).
pub mod hooks;

/// Feed parsing and normalization.
///
/// Converts RSS 0.9x/1.0/2.0, Atom 0.3/1.0, and JSON Feed 1.0 into a
/// [`Channel`](domain::Channel).
pub mod normalizer;

/// Persistence of the entry cache.
///
/// - [`PersistenceGateway`](store::PersistenceGateway): Load/save plus metadata dispatch
/// - [`SqliteStore`](store::SqliteStore): SQLite backend
/// - [`JsonStore`](store::JsonStore): JSON file backend
pub mod store;
