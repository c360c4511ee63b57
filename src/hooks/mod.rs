//! Extension points called by the per-feed pipeline and around cache
//! load and save.
//!
//! Each kind of hook has its own trait and its own ordered slice in
//! [`HookRegistry`]. A hook that wants a feed dropped returns
//! [`Flow::Stop`]; returning an error means the hook itself broke.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::app::HookError;
use crate::cache::EntryCache;
use crate::domain::{Channel, FeedDescriptor};
use crate::fetcher::{Download, FetchRequest};

pub const DEFAULT_SORT_KEY: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// Where in the pipeline a feed was vetoed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPoint {
    PreDownload,
    PostDownload,
    PostParse,
    PostProcess,
}

impl fmt::Display for HookPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HookPoint::PreDownload => "pre-download",
            HookPoint::PostDownload => "post-download",
            HookPoint::PostParse => "post-parse",
            HookPoint::PostProcess => "post-process",
        };
        f.write_str(name)
    }
}

pub trait Hook: Send + Sync {
    fn name(&self) -> &str;

    /// Lower runs first.
    fn sort_key(&self) -> u32 {
        DEFAULT_SORT_KEY
    }
}

/// Decides whether a feed is downloaded even if the source reports no change.
pub trait ForceDownloadHook: Hook {
    fn force_download(&self, feed: &FeedDescriptor, cache: &EntryCache)
        -> Result<bool, HookError>;
}

/// Called with the request before anything is sent. May add headers.
pub trait PreDownloadHook: Hook {
    fn pre_download(
        &self,
        feed: &FeedDescriptor,
        request: &mut FetchRequest,
    ) -> Result<Flow, HookError>;
}

pub trait PostDownloadHook: Hook {
    fn post_download(
        &self,
        feed: &FeedDescriptor,
        download: &mut Download,
    ) -> Result<Flow, HookError>;
}

pub trait PostParseHook: Hook {
    fn post_parse(
        &self,
        feed: &FeedDescriptor,
        cache: &EntryCache,
        channel: &mut Channel,
    ) -> Result<Flow, HookError>;
}

/// Called with only the new items left in the channel.
pub trait PostProcessHook: Hook {
    fn post_process(&self, feed: &FeedDescriptor, channel: &mut Channel)
        -> Result<Flow, HookError>;
}

/// Called once after the cache is loaded and pruned, before any fetch.
pub trait CacheLoadedHook: Hook {
    fn cache_loaded(&self, cache: &EntryCache) -> Result<(), HookError>;
}

/// Called once after every worker finished, before the cache is saved.
pub trait PreCacheSaveHook: Hook {
    fn pre_cache_save(&self, cache: &EntryCache) -> Result<(), HookError>;
}

/// Every registered hook, grouped by kind and sorted by `(sort_key, name)`.
/// Built once and shared read-only by all workers.
#[derive(Default)]
pub struct HookRegistry {
    force_download: Vec<Arc<dyn ForceDownloadHook>>,
    pre_download: Vec<Arc<dyn PreDownloadHook>>,
    post_download: Vec<Arc<dyn PostDownloadHook>>,
    post_parse: Vec<Arc<dyn PostParseHook>>,
    post_process: Vec<Arc<dyn PostProcessHook>>,
    cache_loaded: Vec<Arc<dyn CacheLoadedHook>>,
    pre_cache_save: Vec<Arc<dyn PreCacheSaveHook>>,
}

impl HookRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn builder() -> HookRegistryBuilder {
        HookRegistryBuilder::default()
    }

    pub fn len(&self) -> usize {
        self.force_download.len()
            + self.pre_download.len()
            + self.post_download.len()
            + self.post_parse.len()
            + self.post_process.len()
            + self.cache_loaded.len()
            + self.pre_cache_save.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True as soon as one hook asks for it.
    pub fn force_download(
        &self,
        feed: &FeedDescriptor,
        cache: &EntryCache,
    ) -> Result<bool, HookError> {
        for hook in &self.force_download {
            if hook.force_download(feed, cache)? {
                debug!(feed = %feed, hook = hook.name(), "Download forced");
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn pre_download(
        &self,
        feed: &FeedDescriptor,
        request: &mut FetchRequest,
    ) -> Result<Flow, HookError> {
        run_chain(feed, &self.pre_download, |hook| {
            hook.pre_download(feed, request)
        })
    }

    pub fn post_download(
        &self,
        feed: &FeedDescriptor,
        download: &mut Download,
    ) -> Result<Flow, HookError> {
        run_chain(feed, &self.post_download, |hook| {
            hook.post_download(feed, download)
        })
    }

    pub fn post_parse(
        &self,
        feed: &FeedDescriptor,
        cache: &EntryCache,
        channel: &mut Channel,
    ) -> Result<Flow, HookError> {
        run_chain(feed, &self.post_parse, |hook| {
            hook.post_parse(feed, cache, channel)
        })
    }

    pub fn post_process(
        &self,
        feed: &FeedDescriptor,
        channel: &mut Channel,
    ) -> Result<Flow, HookError> {
        run_chain(feed, &self.post_process, |hook| {
            hook.post_process(feed, channel)
        })
    }

    pub fn cache_loaded(&self, cache: &EntryCache) -> Result<(), HookError> {
        self.cache_loaded
            .iter()
            .try_for_each(|hook| hook.cache_loaded(cache))
    }

    pub fn pre_cache_save(&self, cache: &EntryCache) -> Result<(), HookError> {
        self.pre_cache_save
            .iter()
            .try_for_each(|hook| hook.pre_cache_save(cache))
    }
}

/// Runs hooks in order until one says stop.
fn run_chain<H, F>(feed: &FeedDescriptor, hooks: &[Arc<H>], mut call: F) -> Result<Flow, HookError>
where
    H: Hook + ?Sized,
    F: FnMut(&H) -> Result<Flow, HookError>,
{
    for hook in hooks {
        if call(hook.as_ref())? == Flow::Stop {
            debug!(feed = %feed, hook = hook.name(), "Feed vetoed");
            return Ok(Flow::Stop);
        }
    }
    Ok(Flow::Continue)
}

#[derive(Default)]
pub struct HookRegistryBuilder {
    registry: HookRegistry,
}

impl HookRegistryBuilder {
    pub fn force_download(mut self, hook: Arc<dyn ForceDownloadHook>) -> Self {
        self.registry.force_download.push(hook);
        self
    }

    pub fn pre_download(mut self, hook: Arc<dyn PreDownloadHook>) -> Self {
        self.registry.pre_download.push(hook);
        self
    }

    pub fn post_download(mut self, hook: Arc<dyn PostDownloadHook>) -> Self {
        self.registry.post_download.push(hook);
        self
    }

    pub fn post_parse(mut self, hook: Arc<dyn PostParseHook>) -> Self {
        self.registry.post_parse.push(hook);
        self
    }

    pub fn post_process(mut self, hook: Arc<dyn PostProcessHook>) -> Self {
        self.registry.post_process.push(hook);
        self
    }

    pub fn cache_loaded(mut self, hook: Arc<dyn CacheLoadedHook>) -> Self {
        self.registry.cache_loaded.push(hook);
        self
    }

    pub fn pre_cache_save(mut self, hook: Arc<dyn PreCacheSaveHook>) -> Self {
        self.registry.pre_cache_save.push(hook);
        self
    }

    pub fn build(mut self) -> HookRegistry {
        let r = &mut self.registry;
        sort_hooks(&mut r.force_download);
        sort_hooks(&mut r.pre_download);
        sort_hooks(&mut r.post_download);
        sort_hooks(&mut r.post_parse);
        sort_hooks(&mut r.post_process);
        sort_hooks(&mut r.cache_loaded);
        sort_hooks(&mut r.pre_cache_save);
        self.registry
    }
}

fn sort_hooks<H: Hook + ?Sized>(hooks: &mut [Arc<H>]) {
    hooks.sort_by(|a, b| {
        a.sort_key()
            .cmp(&b.sort_key())
            .then_with(|| a.name().cmp(b.name()))
    });
}
