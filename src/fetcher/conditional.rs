use std::io::{self, Read, Write};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::app::FetchError;
use crate::cache::EntryCache;
use crate::domain::FeedDescriptor;
use crate::fetcher::{
    Download, FetchRequest, FetchResult, FileTransport, HttpTransport, Scheme, Transport,
    TransportResponse,
};

/// Assumed for local files that declare nothing.
pub const DEFAULT_FILE_ENCODING: &str = "utf-8";

/// Retrieves feed content only when it changed since the last run.
pub struct ConditionalFetcher {
    http: Arc<dyn Transport>,
    file: Arc<dyn Transport>,
}

impl ConditionalFetcher {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, FetchError> {
        Ok(Self::with_transports(
            Arc::new(HttpTransport::with_options(timeout, user_agent)?),
            Arc::new(FileTransport),
        ))
    }

    pub fn with_transports(http: Arc<dyn Transport>, file: Arc<dyn Transport>) -> Self {
        Self { http, file }
    }

    /// Unless `force` is set, ask the source for content newer than the
    /// cached channel entry and double-check its answer ourselves, since
    /// some servers ignore the hint.
    pub fn fetch(
        &self,
        request: &mut FetchRequest,
        feed: &FeedDescriptor,
        cache: &EntryCache,
        force: bool,
    ) -> Result<FetchResult, FetchError> {
        let last_seen = if force {
            None
        } else {
            cache.lookup(&feed.url).and_then(|entry| entry.last_seen())
        };
        request.set_if_modified_since(last_seen);

        let transport = match request.scheme() {
            Scheme::Http => &self.http,
            Scheme::File => &self.file,
        };

        let body = match transport.execute(request)? {
            TransportResponse::NotModified => return Ok(FetchResult::NotModified),
            TransportResponse::Body(body) => body,
        };

        if !force && !has_changed(last_seen, body.last_modified) {
            debug!(feed = %feed, "Source is not newer than the cached copy");
            return Ok(FetchResult::NotModified);
        }

        let encoding = detect_encoding(feed, request.scheme(), body.content_type.as_deref());
        let gzip = body
            .content_encoding
            .as_deref()
            .is_some_and(|e| e.to_ascii_lowercase().contains("gzip"));

        let (file, bytes) = spool(body.reader, gzip)?;
        debug!(feed = %feed, bytes, encoding = ?encoding, "Downloaded feed");

        Ok(FetchResult::Content(Download::new(
            file,
            encoding,
            bytes,
            body.last_modified,
        )))
    }
}

/// A source counts as changed unless both timestamps are known and the
/// cached one is at least as new.
pub fn has_changed(last_seen: Option<DateTime<Utc>>, last_modified: Option<DateTime<Utc>>) -> bool {
    match (last_seen, last_modified) {
        (Some(seen), Some(modified)) => modified > seen,
        _ => true,
    }
}

/// Forced encoding, then the declared charset, then a per-scheme default.
pub fn detect_encoding(
    feed: &FeedDescriptor,
    scheme: Scheme,
    content_type: Option<&str>,
) -> Option<String> {
    feed.forced_encoding
        .clone()
        .or_else(|| content_type.and_then(content_type_charset))
        .or_else(|| (scheme == Scheme::File).then(|| DEFAULT_FILE_ENCODING.to_string()))
}

/// Pull the `charset` parameter out of a Content-Type header value.
pub fn content_type_charset(content_type: &str) -> Option<String> {
    content_type
        .split([';', ' ', '\t'])
        .filter_map(|token| {
            let (key, value) = token.split_once('=')?;
            key.eq_ignore_ascii_case("charset").then_some(value)
        })
        .map(|value| value.trim_matches(|c| c == '"' || c == '\''))
        .find(|value| !value.is_empty())
        .map(String::from)
}

fn spool(mut reader: Box<dyn Read + Send>, gzip: bool) -> Result<(NamedTempFile, u64), FetchError> {
    let mut file = tempfile::Builder::new()
        .prefix("freshet-")
        .suffix(".feed")
        .tempfile()?;

    let bytes = if gzip {
        io::copy(&mut GzDecoder::new(reader), &mut file).map_err(FetchError::Decompress)?
    } else {
        io::copy(&mut reader, &mut file)?
    };
    file.flush()?;

    Ok((file, bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::ResponseBody;
    use chrono::TimeZone;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use parking_lot::Mutex;
    use std::io::Cursor;

    #[derive(Default)]
    struct FakeTransport {
        not_modified: bool,
        body: Vec<u8>,
        content_type: Option<String>,
        content_encoding: Option<String>,
        last_modified: Option<DateTime<Utc>>,
        hints: Mutex<Vec<Option<DateTime<Utc>>>>,
    }

    impl Transport for FakeTransport {
        fn execute(&self, request: &FetchRequest) -> Result<TransportResponse, FetchError> {
            self.hints.lock().push(request.if_modified_since());
            if self.not_modified {
                return Ok(TransportResponse::NotModified);
            }
            Ok(TransportResponse::Body(ResponseBody {
                reader: Box::new(Cursor::new(self.body.clone())),
                content_type: self.content_type.clone(),
                content_encoding: self.content_encoding.clone(),
                last_modified: self.last_modified,
            }))
        }
    }

    fn date(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 1, hour, 0, 0).unwrap()
    }

    fn feed() -> FeedDescriptor {
        FeedDescriptor::parse("https://example.com/feed.xml").unwrap()
    }

    fn fetch_with(
        transport: Arc<FakeTransport>,
        feed: &FeedDescriptor,
        cache: &EntryCache,
        force: bool,
    ) -> FetchResult {
        let fetcher = ConditionalFetcher::with_transports(transport, Arc::new(FileTransport));
        let mut request = FetchRequest::open(feed).unwrap();
        fetcher.fetch(&mut request, feed, cache, force).unwrap()
    }

    fn read_download(download: &Download) -> String {
        let mut content = String::new();
        download.open().unwrap().read_to_string(&mut content).unwrap();
        content
    }

    #[test]
    fn test_uncached_feed_downloads_without_hint() {
        let transport = Arc::new(FakeTransport {
            body: b"<rss/>".to_vec(),
            content_type: Some("application/rss+xml; charset=ISO-8859-1".into()),
            last_modified: Some(date(3)),
            ..Default::default()
        });

        let result = fetch_with(transport.clone(), &feed(), &EntryCache::new(), false);

        let FetchResult::Content(download) = result else {
            panic!("expected content");
        };
        assert_eq!(download.bytes, 6);
        assert_eq!(download.encoding.as_deref(), Some("ISO-8859-1"));
        assert_eq!(download.last_modified, Some(date(3)));
        assert_eq!(read_download(&download), "<rss/>");
        assert_eq!(*transport.hints.lock(), vec![None]);
    }

    #[test]
    fn test_cached_channel_sets_hint_and_honours_not_modified() {
        let feed = feed();
        let cache = EntryCache::new();
        cache.upsert(&feed.url, &feed.url, None, date(5));

        let transport = Arc::new(FakeTransport {
            not_modified: true,
            ..Default::default()
        });

        let result = fetch_with(transport.clone(), &feed, &cache, false);
        assert!(matches!(result, FetchResult::NotModified));
        assert_eq!(*transport.hints.lock(), vec![Some(date(5))]);
    }

    #[test]
    fn test_ignored_hint_is_caught_by_timestamp_check() {
        let feed = feed();
        let cache = EntryCache::new();
        cache.upsert(&feed.url, &feed.url, None, date(5));

        let transport = Arc::new(FakeTransport {
            body: b"<rss/>".to_vec(),
            last_modified: Some(date(5)),
            ..Default::default()
        });

        let result = fetch_with(transport, &feed, &cache, false);
        assert!(matches!(result, FetchResult::NotModified));
    }

    #[test]
    fn test_newer_source_is_downloaded() {
        let feed = feed();
        let cache = EntryCache::new();
        cache.upsert(&feed.url, &feed.url, None, date(5));

        let transport = Arc::new(FakeTransport {
            body: b"<rss/>".to_vec(),
            last_modified: Some(date(6)),
            ..Default::default()
        });

        assert!(matches!(
            fetch_with(transport, &feed, &cache, false),
            FetchResult::Content(_)
        ));
    }

    #[test]
    fn test_force_skips_hint_and_check() {
        let feed = feed();
        let cache = EntryCache::new();
        cache.upsert(&feed.url, &feed.url, None, date(5));

        let transport = Arc::new(FakeTransport {
            body: b"<rss/>".to_vec(),
            last_modified: Some(date(1)),
            ..Default::default()
        });

        let result = fetch_with(transport.clone(), &feed, &cache, true);
        assert!(matches!(result, FetchResult::Content(_)));
        assert_eq!(*transport.hints.lock(), vec![None]);
    }

    #[test]
    fn test_gzip_body_is_decompressed() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"<rss>compressed</rss>").unwrap();
        let compressed = encoder.finish().unwrap();

        let transport = Arc::new(FakeTransport {
            body: compressed,
            content_encoding: Some("x-gzip".into()),
            ..Default::default()
        });

        let FetchResult::Content(download) = fetch_with(transport, &feed(), &EntryCache::new(), false)
        else {
            panic!("expected content");
        };
        assert_eq!(read_download(&download), "<rss>compressed</rss>");
        assert_eq!(download.bytes, 21);
    }

    #[test]
    fn test_corrupt_gzip_is_decompress_error() {
        let transport = Arc::new(FakeTransport {
            body: b"definitely not gzip".to_vec(),
            content_encoding: Some("gzip".into()),
            ..Default::default()
        });

        let feed = feed();
        let fetcher = ConditionalFetcher::with_transports(transport, Arc::new(FileTransport));
        let mut request = FetchRequest::open(&feed).unwrap();
        let err = fetcher
            .fetch(&mut request, &feed, &EntryCache::new(), false)
            .unwrap_err();

        assert!(matches!(err, FetchError::Decompress(_)));
    }

    #[test]
    fn test_empty_body_is_zero_bytes() {
        let transport = Arc::new(FakeTransport::default());
        let FetchResult::Content(download) = fetch_with(transport, &feed(), &EntryCache::new(), false)
        else {
            panic!("expected content");
        };
        assert!(download.is_empty());
    }

    #[test]
    fn test_has_changed() {
        assert!(has_changed(None, Some(date(1))));
        assert!(has_changed(Some(date(1)), None));
        assert!(has_changed(Some(date(1)), Some(date(2))));
        assert!(!has_changed(Some(date(2)), Some(date(2))));
        assert!(!has_changed(Some(date(3)), Some(date(2))));
    }

    #[test]
    fn test_content_type_charset() {
        assert_eq!(
            content_type_charset("text/xml; charset=UTF-8").as_deref(),
            Some("UTF-8")
        );
        assert_eq!(
            content_type_charset("text/xml;\tCharSet=\"windows-1252\"").as_deref(),
            Some("windows-1252")
        );
        assert_eq!(content_type_charset("text/xml"), None);
        assert_eq!(content_type_charset("text/xml; charset="), None);
    }

    #[test]
    fn test_encoding_precedence() {
        let plain = feed();
        let forced = feed().with_forced_encoding("koi8-r");
        let ct = Some("text/xml; charset=iso-8859-1");

        assert_eq!(
            detect_encoding(&forced, Scheme::Http, ct).as_deref(),
            Some("koi8-r")
        );
        assert_eq!(
            detect_encoding(&plain, Scheme::Http, ct).as_deref(),
            Some("iso-8859-1")
        );
        assert_eq!(
            detect_encoding(&plain, Scheme::File, None).as_deref(),
            Some(DEFAULT_FILE_ENCODING)
        );
        assert_eq!(detect_encoding(&plain, Scheme::Http, None), None);
    }
}
