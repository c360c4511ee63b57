use parking_lot::Mutex;
use url::Url;

use crate::app::{AppContext, FetchError, Result};
use crate::cache::EntryCache;
use crate::domain::{normalize_url, Channel};

pub fn run_feeds(ctx: &AppContext) -> Result<()> {
    let enabled = ctx.feeds().iter().filter(|f| !f.disabled).count();
    println!("Fetching {} feeds...", enabled);

    let delivered: Mutex<Vec<(String, Channel)>> = Mutex::new(Vec::new());
    let summary = ctx.run(|feed, channel| {
        delivered.lock().push((feed.url.to_string(), channel));
    })?;

    let mut delivered = delivered.into_inner();
    delivered.sort_by(|a, b| a.0.cmp(&b.0));

    let mut total_new = 0;
    for (url, channel) in &delivered {
        total_new += channel.items.len();
        println!(
            "\n{} ({} new items)\n  {}",
            channel.display_title(url),
            channel.items.len(),
            url
        );

        for item in &channel.items {
            let date = item
                .published
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_else(|| "          ".to_string());
            println!("  {} {}", date, item.display_title());
            if let Some(link) = &item.link {
                println!("             {}", link);
            }
        }
    }

    println!(
        "\nRun complete: {} new items from {} feeds, {} unchanged, {} errors",
        total_new,
        summary.delivered,
        summary.unchanged + summary.no_new_items,
        summary.failed
    );
    Ok(())
}

pub fn list_feeds(ctx: &AppContext) -> Result<()> {
    let feeds = ctx.feeds();

    if feeds.is_empty() {
        println!("No feeds configured");
        return Ok(());
    }

    for feed in feeds {
        let mut flags = Vec::new();
        if feed.disabled {
            flags.push("disabled".to_string());
        }
        if feed.force_download {
            flags.push("force-download".to_string());
        }
        if let Some(encoding) = &feed.forced_encoding {
            flags.push(format!("encoding={}", encoding));
        }

        if flags.is_empty() {
            println!("{}", feed.url);
        } else {
            println!("{} [{}]", feed.url, flags.join(", "));
        }
    }

    Ok(())
}

pub fn show_cache(ctx: &AppContext, feed: Option<&str>) -> Result<()> {
    if !ctx.gateway().is_enabled() {
        println!("Cache is disabled");
        return Ok(());
    }

    let filter = feed
        .map(|f| Url::parse(f).map(|u| normalize_url(&u)))
        .transpose()
        .map_err(FetchError::from)?;

    let cache = EntryCache::new();
    ctx.gateway().load(&cache)?;

    let channels: Vec<Url> = cache
        .channel_urls()
        .into_iter()
        .filter(|c| filter.as_ref().map_or(true, |f| normalize_url(c) == *f))
        .collect();

    if channels.is_empty() {
        println!("No cached entries in {}", ctx.gateway().location());
        return Ok(());
    }

    for channel in channels {
        println!("{}", channel);
        for entry in cache.all_entries_for_channel(&channel) {
            let last_seen = entry
                .last_seen()
                .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "never".to_string());

            if entry.is_channel_entry() {
                println!("  (channel)  last seen {}", last_seen);
            } else {
                let published = entry
                    .publication_date()
                    .map(|d| d.format("%Y-%m-%d").to_string())
                    .unwrap_or_else(|| "          ".to_string());
                println!("  {} {}  last seen {}", published, entry.entry_url(), last_seen);
            }
        }
    }

    Ok(())
}
