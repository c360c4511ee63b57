use std::any::Any;
use std::io::BufReader;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::app::{FeedError, FeedErrorKind, ParseError};
use crate::cache::EntryCache;
use crate::domain::{resolve_link, Channel, FeedDescriptor};
use crate::fetcher::{ConditionalFetcher, Download, FetchRequest, FetchResult};
use crate::hooks::{Flow, HookPoint, HookRegistry};
use crate::normalizer::FeedParser;

/// How one feed's trip through the pipeline ended.
#[derive(Debug)]
pub enum FeedOutcome {
    /// New items for the downstream consumer.
    Delivered(Channel),
    /// The source reported no change, or sent nothing.
    Unchanged,
    Vetoed(HookPoint),
    /// Parsed fine but every item was already known.
    NoNewItems,
    /// Downloaded, but no parser is configured.
    Downloaded,
    Failed(FeedError),
}

/// Runs one feed from request to parsed channel. Never fails; errors and
/// panics raised by hooks or the parser are logged and come back as
/// [`FeedOutcome::Failed`].
pub struct FeedPipeline {
    fetcher: ConditionalFetcher,
    parser: Option<Arc<dyn FeedParser>>,
    hooks: Arc<HookRegistry>,
}

impl FeedPipeline {
    pub fn new(
        fetcher: ConditionalFetcher,
        parser: Option<Arc<dyn FeedParser>>,
        hooks: Arc<HookRegistry>,
    ) -> Self {
        Self {
            fetcher,
            parser,
            hooks,
        }
    }

    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    pub fn process(&self, feed: &FeedDescriptor, cache: &EntryCache) -> FeedOutcome {
        // The cache lock does not poison, so a panic leaves it usable.
        match panic::catch_unwind(AssertUnwindSafe(|| self.try_process(feed, cache))) {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(kind)) => {
                let err = FeedError::new(feed, kind);
                warn!(feed = %feed, error = %err.kind, "Feed failed");
                FeedOutcome::Failed(err)
            }
            Err(payload) => {
                let kind = FeedErrorKind::Panicked(panic_message(payload.as_ref()));
                let err = FeedError::new(feed, kind);
                error!(feed = %feed, error = %err.kind, "Feed processing panicked");
                FeedOutcome::Failed(err)
            }
        }
    }

    fn try_process(
        &self,
        feed: &FeedDescriptor,
        cache: &EntryCache,
    ) -> Result<FeedOutcome, FeedErrorKind> {
        let force = feed.force_download || self.hooks.force_download(feed, cache)?;

        let mut request = FetchRequest::open(feed)?;
        if self.hooks.pre_download(feed, &mut request)? == Flow::Stop {
            return Ok(FeedOutcome::Vetoed(HookPoint::PreDownload));
        }

        let mut download = match self.fetcher.fetch(&mut request, feed, cache, force)? {
            FetchResult::NotModified => {
                info!(feed = %feed, "Feed unchanged");
                return Ok(FeedOutcome::Unchanged);
            }
            FetchResult::Content(download) if download.is_empty() => {
                info!(feed = %feed, "Feed returned no content");
                return Ok(FeedOutcome::Unchanged);
            }
            FetchResult::Content(download) => download,
        };

        let outcome = self.process_download(feed, cache, &mut download)?;
        refresh_channel_entry(feed, cache, download.last_modified);
        Ok(outcome)
    }

    fn process_download(
        &self,
        feed: &FeedDescriptor,
        cache: &EntryCache,
        download: &mut Download,
    ) -> Result<FeedOutcome, FeedErrorKind> {
        if self.hooks.post_download(feed, download)? == Flow::Stop {
            return Ok(FeedOutcome::Vetoed(HookPoint::PostDownload));
        }

        let Some(parser) = &self.parser else {
            return Ok(FeedOutcome::Downloaded);
        };

        let mut reader = BufReader::new(download.open().map_err(ParseError::Io)?);
        let mut channel = parser.parse(&feed.url, &mut reader, download.encoding.as_deref())?;
        if channel.ensure_link(&feed.url) {
            debug!(feed = %feed, "Synthesized self link");
        }

        if self.hooks.post_parse(feed, cache, &mut channel)? == Flow::Stop {
            return Ok(FeedOutcome::Vetoed(HookPoint::PostParse));
        }

        keep_new_items(feed, cache, &mut channel, Utc::now());
        if channel.items.is_empty() {
            info!(feed = %feed, "No new items");
            return Ok(FeedOutcome::NoNewItems);
        }

        if self.hooks.post_process(feed, &mut channel)? == Flow::Stop {
            return Ok(FeedOutcome::Vetoed(HookPoint::PostProcess));
        }

        info!(feed = %feed, new_items = channel.items.len(), "Feed has new items");
        Ok(FeedOutcome::Delivered(channel))
    }
}

/// Drop items without a usable link and items the cache has already seen.
/// Every surviving item is recorded in the cache, new or not, and all of
/// them are judged against the cache as it was before this channel. Nothing
/// is dropped as seen while the feed's own entry is sticky.
fn keep_new_items(
    feed: &FeedDescriptor,
    cache: &EntryCache,
    channel: &mut Channel,
    now: DateTime<Utc>,
) {
    let feed_sticky = cache.is_sticky(&feed.url);

    let mut linked = Vec::with_capacity(channel.items.len());
    let mut keys: Vec<(Url, Option<DateTime<Utc>>)> = Vec::with_capacity(channel.items.len());
    for mut item in std::mem::take(&mut channel.items) {
        let Some(url) = item
            .link
            .as_deref()
            .and_then(|href| resolve_link(&feed.url, href))
        else {
            debug!(
                feed = %feed,
                id = item.id.as_deref().unwrap_or("-"),
                title = item.display_title(),
                "Dropping item without a link"
            );
            continue;
        };

        keys.push((url.clone(), item.published));
        item.link = Some(url.into());
        linked.push(item);
    }

    let verdicts = cache.record_items(&feed.url, &keys, now);
    channel.items = linked
        .into_iter()
        .zip(verdicts)
        .filter_map(|(item, fresh)| (fresh || feed_sticky).then_some(item))
        .collect();
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn refresh_channel_entry(
    feed: &FeedDescriptor,
    cache: &EntryCache,
    last_modified: Option<DateTime<Utc>>,
) {
    let timestamp = last_modified.unwrap_or_else(Utc::now);
    cache.upsert(&feed.url, &feed.url, last_modified, timestamp);
}
