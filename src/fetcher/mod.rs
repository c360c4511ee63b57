pub mod conditional;
pub mod file_fetcher;
pub mod http_fetcher;
pub mod parallel;
pub mod pipeline;

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use tempfile::NamedTempFile;
use url::Url;

use crate::app::FetchError;
use crate::domain::FeedDescriptor;

pub use conditional::ConditionalFetcher;
pub use file_fetcher::FileTransport;
pub use http_fetcher::HttpTransport;
pub use parallel::{ParallelFetcher, RunSummary, DEFAULT_WORKERS};
pub use pipeline::{FeedOutcome, FeedPipeline};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    File,
}

/// A retrieval that has been set up but not sent yet. Pre-download hooks
/// get to see and edit it.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    url: Url,
    scheme: Scheme,
    /// Extra headers for HTTP sources. Ignored for local files.
    pub headers: HeaderMap,
    if_modified_since: Option<DateTime<Utc>>,
}

impl FetchRequest {
    pub fn open(feed: &FeedDescriptor) -> Result<Self, FetchError> {
        let scheme = match feed.url.scheme() {
            "http" | "https" => Scheme::Http,
            "file" => Scheme::File,
            other => return Err(FetchError::UnsupportedScheme(other.to_string())),
        };

        Ok(Self {
            url: feed.url.clone(),
            scheme,
            headers: HeaderMap::new(),
            if_modified_since: None,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn if_modified_since(&self) -> Option<DateTime<Utc>> {
        self.if_modified_since
    }

    pub fn set_if_modified_since(&mut self, since: Option<DateTime<Utc>>) {
        self.if_modified_since = since;
    }
}

/// What a transport hands back before the body is read.
pub struct ResponseBody {
    pub reader: Box<dyn Read + Send>,
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    /// The source's own freshness indicator.
    pub last_modified: Option<DateTime<Utc>>,
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseBody")
            .field("content_type", &self.content_type)
            .field("content_encoding", &self.content_encoding)
            .field("last_modified", &self.last_modified)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub enum TransportResponse {
    /// The source answered the conditional request with "unchanged".
    NotModified,
    Body(ResponseBody),
}

/// Sends a [`FetchRequest`] for one URL scheme.
pub trait Transport: Send + Sync {
    fn execute(&self, request: &FetchRequest) -> Result<TransportResponse, FetchError>;
}

/// Feed content spooled to a private temporary file. The file is removed
/// when the download is dropped.
#[derive(Debug)]
pub struct Download {
    file: NamedTempFile,
    pub encoding: Option<String>,
    pub bytes: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

impl Download {
    pub fn new(
        file: NamedTempFile,
        encoding: Option<String>,
        bytes: u64,
        last_modified: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            file,
            encoding,
            bytes,
            last_modified,
        }
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn open(&self) -> std::io::Result<File> {
        self.file.reopen()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes == 0
    }
}

#[derive(Debug)]
pub enum FetchResult {
    /// Nothing changed since the last run; no body was read.
    NotModified,
    Content(Download),
}

/// Format a timestamp the way HTTP date headers expect it.
pub fn http_date(dt: DateTime<Utc>) -> String {
    dt.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

pub fn parse_http_date(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(s.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_open_request_checks_scheme() {
        let http = FeedDescriptor::parse("https://example.com/feed.xml").unwrap();
        assert_eq!(FetchRequest::open(&http).unwrap().scheme(), Scheme::Http);

        let file = FeedDescriptor::parse("file:///tmp/feed.xml").unwrap();
        assert_eq!(FetchRequest::open(&file).unwrap().scheme(), Scheme::File);

        let ftp = FeedDescriptor::parse("ftp://example.com/feed.xml").unwrap();
        assert!(matches!(
            FetchRequest::open(&ftp),
            Err(FetchError::UnsupportedScheme(s)) if s == "ftp"
        ));
    }

    #[test]
    fn test_http_date_format() {
        let dt = Utc.with_ymd_and_hms(2015, 10, 21, 7, 28, 0).unwrap();
        assert_eq!(http_date(dt), "Wed, 21 Oct 2015 07:28:00 GMT");
        assert_eq!(parse_http_date("Wed, 21 Oct 2015 07:28:00 GMT"), Some(dt));
    }

    #[test]
    fn test_parse_http_date_rejects_garbage() {
        assert_eq!(parse_http_date("yesterday"), None);
    }
}
