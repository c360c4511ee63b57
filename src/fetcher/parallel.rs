use std::thread;

use crossbeam_channel::Receiver;
use tracing::{error, info};

use crate::cache::EntryCache;
use crate::domain::{Channel, FeedDescriptor};
use crate::fetcher::{FeedOutcome, FeedPipeline};

pub const DEFAULT_WORKERS: usize = 10;

/// Counts of how each queued feed ended.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub queued: usize,
    pub delivered: usize,
    pub unchanged: usize,
    pub vetoed: usize,
    pub no_new_items: usize,
    pub downloaded: usize,
    pub failed: usize,
}

impl RunSummary {
    fn record(&mut self, outcome: &FeedOutcome) {
        match outcome {
            FeedOutcome::Delivered(_) => self.delivered += 1,
            FeedOutcome::Unchanged => self.unchanged += 1,
            FeedOutcome::Vetoed(_) => self.vetoed += 1,
            FeedOutcome::NoNewItems => self.no_new_items += 1,
            FeedOutcome::Downloaded => self.downloaded += 1,
            FeedOutcome::Failed(_) => self.failed += 1,
        }
    }

    fn merge(&mut self, other: RunSummary) {
        self.delivered += other.delivered;
        self.unchanged += other.unchanged;
        self.vetoed += other.vetoed;
        self.no_new_items += other.no_new_items;
        self.downloaded += other.downloaded;
        self.failed += other.failed;
    }

    pub fn processed(&self) -> usize {
        self.delivered
            + self.unchanged
            + self.vetoed
            + self.no_new_items
            + self.downloaded
            + self.failed
    }
}

/// A fixed pool of OS threads draining a pre-filled queue of feeds.
#[derive(Debug, Clone, Copy)]
pub struct ParallelFetcher {
    workers: usize,
}

impl Default for ParallelFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl ParallelFetcher {
    pub fn new() -> Self {
        Self::with_workers(DEFAULT_WORKERS)
    }

    pub fn with_workers(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Process every enabled feed and call `on_feed_done` for each one that
    /// produced new items. Returns once the queue is drained and every
    /// worker has exited. Callback order across feeds is unspecified.
    pub fn run<F>(
        &self,
        feeds: &[FeedDescriptor],
        pipeline: &FeedPipeline,
        cache: &EntryCache,
        on_feed_done: F,
    ) -> RunSummary
    where
        F: Fn(&FeedDescriptor, Channel) + Sync,
    {
        let mut summary = RunSummary::default();

        let (tx, rx) = crossbeam_channel::unbounded();
        for feed in feeds.iter().filter(|feed| !feed.disabled) {
            if tx.send(feed).is_ok() {
                summary.queued += 1;
            }
        }
        // The queue is never refilled; once empty, recv() returns at once.
        drop(tx);

        if summary.queued == 0 {
            return summary;
        }

        let workers = self.workers.min(summary.queued);
        info!(feeds = summary.queued, workers, "Starting feed workers");

        let drain = |rx: Receiver<&FeedDescriptor>| {
            let mut local = RunSummary::default();
            while let Ok(feed) = rx.recv() {
                let outcome = pipeline.process(feed, cache);
                local.record(&outcome);
                if let FeedOutcome::Delivered(channel) = outcome {
                    on_feed_done(feed, channel);
                }
            }
            local
        };
        let drain = &drain;

        thread::scope(|s| {
            let mut handles = Vec::with_capacity(workers);
            for n in 0..workers {
                let rx = rx.clone();
                let spawned = thread::Builder::new()
                    .name(format!("feed-worker-{n}"))
                    .spawn_scoped(s, move || drain(rx));

                match spawned {
                    Ok(handle) => handles.push(handle),
                    Err(e) => error!(worker = n, error = %e, "Failed to spawn feed worker"),
                }
            }

            if handles.is_empty() {
                summary.merge(drain(rx.clone()));
            }

            for handle in handles {
                match handle.join() {
                    Ok(local) => summary.merge(local),
                    Err(_) => error!("Feed worker panicked"),
                }
            }
        });

        info!(
            delivered = summary.delivered,
            unchanged = summary.unchanged,
            no_new_items = summary.no_new_items,
            failed = summary.failed,
            "Feed workers finished"
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_workers_minimum_one() {
        assert_eq!(ParallelFetcher::with_workers(0).workers(), 1);
        assert_eq!(ParallelFetcher::with_workers(4).workers(), 4);
        assert_eq!(ParallelFetcher::new().workers(), DEFAULT_WORKERS);
    }

    #[test]
    fn test_summary_merge() {
        let mut total = RunSummary {
            queued: 3,
            ..Default::default()
        };
        total.merge(RunSummary {
            delivered: 1,
            failed: 1,
            ..Default::default()
        });
        total.merge(RunSummary {
            unchanged: 1,
            ..Default::default()
        });

        assert_eq!(total.processed(), 3);
        assert_eq!(total.queued, 3);
    }
}
