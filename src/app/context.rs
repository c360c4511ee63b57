use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::app::error::Result;
use crate::cache::EntryCache;
use crate::config::{Config, ConfigError, StoreBackend};
use crate::domain::{Channel, FeedDescriptor};
use crate::fetcher::{ConditionalFetcher, FeedPipeline, ParallelFetcher, RunSummary};
use crate::hooks::HookRegistry;
use crate::normalizer::{FeedParser, Normalizer};
use crate::store::{self, MetadataProducer, NullStore, PersistenceGateway, Store};

/// Everything one run needs: the configured feeds, the persistence gateway,
/// the per-feed pipeline and the worker pool.
pub struct AppContext {
    pub config: Config,
    pub parallel_fetcher: ParallelFetcher,
    gateway: PersistenceGateway,
    pipeline: FeedPipeline,
    feeds: Vec<FeedDescriptor>,
}

impl AppContext {
    pub fn new(config: Config) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn builder(config: Config) -> ContextBuilder {
        ContextBuilder::new(config)
    }

    pub fn feeds(&self) -> &[FeedDescriptor] {
        &self.feeds
    }

    pub fn gateway(&self) -> &PersistenceGateway {
        &self.gateway
    }

    pub fn hooks(&self) -> &HookRegistry {
        self.pipeline.hooks()
    }

    /// Run every enabled feed against a fresh cache.
    pub fn run<F>(&self, on_feed_done: F) -> Result<RunSummary>
    where
        F: Fn(&FeedDescriptor, Channel) + Sync,
    {
        let cache = EntryCache::new();
        self.run_with_cache(&cache, on_feed_done)
    }

    /// Load, fetch, save.
    ///
    /// A load failure returns before any feed is fetched. A save failure is
    /// returned after every worker has finished, so `on_feed_done` has
    /// already seen all new items by then.
    pub fn run_with_cache<F>(&self, cache: &EntryCache, on_feed_done: F) -> Result<RunSummary>
    where
        F: Fn(&FeedDescriptor, Channel) + Sync,
    {
        if self.feeds.iter().all(|feed| feed.disabled) {
            return Err(ConfigError::NoEnabledFeeds.into());
        }

        self.gateway.load(cache)?;

        let pruned = cache.prune(&self.feeds, Utc::now());
        if pruned.removed() > 0 || pruned.clamped > 0 {
            info!(
                removed = pruned.removed(),
                clamped = pruned.clamped,
                "Pruned cache"
            );
        }

        self.hooks().cache_loaded(cache)?;

        let summary = self
            .parallel_fetcher
            .run(&self.feeds, &self.pipeline, cache, on_feed_done);

        if self.config.update_cache {
            self.hooks().pre_cache_save(cache)?;
            self.gateway.save(cache)?;
        }

        Ok(summary)
    }
}

/// Swaps out individual collaborators before the context is assembled.
/// Anything left unset is built from the [`Config`].
pub struct ContextBuilder {
    config: Config,
    store: Option<Box<dyn Store>>,
    fetcher: Option<ConditionalFetcher>,
    parser: Option<Arc<dyn FeedParser>>,
    hooks: HookRegistry,
    producers: Vec<Arc<dyn MetadataProducer>>,
}

impl ContextBuilder {
    fn new(config: Config) -> Self {
        Self {
            config,
            store: None,
            fetcher: None,
            parser: Some(Arc::new(Normalizer::new())),
            hooks: HookRegistry::empty(),
            producers: Vec::new(),
        }
    }

    pub fn store(mut self, store: Box<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn fetcher(mut self, fetcher: ConditionalFetcher) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn parser(mut self, parser: Arc<dyn FeedParser>) -> Self {
        self.parser = Some(parser);
        self
    }

    /// Download only; feeds end as [`FeedOutcome::Downloaded`](crate::fetcher::FeedOutcome::Downloaded).
    pub fn without_parser(mut self) -> Self {
        self.parser = None;
        self
    }

    pub fn hooks(mut self, hooks: HookRegistry) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn metadata_producer(mut self, producer: Arc<dyn MetadataProducer>) -> Self {
        self.producers.push(producer);
        self
    }

    pub fn build(self) -> Result<AppContext> {
        self.config.validate()?;
        let feeds = self.config.feed_descriptors()?;

        let store = match self.store {
            Some(store) => store,
            None if self.config.cache.backend == StoreBackend::None => Box::new(NullStore),
            None => store::open(self.config.cache.backend, &self.config.cache_path()?)?,
        };

        let mut gateway = PersistenceGateway::new(store);
        for producer in self.producers {
            gateway.register(producer)?;
        }

        let fetcher = match self.fetcher {
            Some(fetcher) => fetcher,
            None => ConditionalFetcher::new(self.config.request_timeout(), &self.config.user_agent)?,
        };

        let pipeline = FeedPipeline::new(fetcher, self.parser, Arc::new(self.hooks));
        let parallel_fetcher = ParallelFetcher::with_workers(self.config.workers);

        Ok(AppContext {
            config: self.config,
            parallel_fetcher,
            gateway,
            pipeline,
            feeds,
        })
    }
}
