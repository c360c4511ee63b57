use std::fmt;

use thiserror::Error;

use crate::config::ConfigError;
use crate::domain::FeedDescriptor;

/// Network, transport or decompression failure for a single feed.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("URL does not name a local file: {0}")]
    InvalidFilePath(String),

    #[error("HTTP error: {0}")]
    Http(reqwest::Error),

    #[error("HTTP status {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Failed to decompress response body: {0}")]
    Decompress(std::io::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout(err.to_string())
        } else {
            FetchError::Http(err)
        }
    }
}

/// Malformed or undecodable feed content.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Feed parsing error: {0}")]
    Syntax(String),

    #[error("Unknown character encoding: {0}")]
    UnknownEncoding(String),

    #[error("IO error while reading downloaded feed: {0}")]
    Io(#[from] std::io::Error),
}

/// A hook implementation failed. A hook that merely vetoes a feed
/// returns [`Flow::Stop`](crate::hooks::Flow) instead.
#[derive(Error, Debug)]
#[error("Hook {hook} failed: {message}")]
pub struct HookError {
    pub hook: String,
    pub message: String,
}

impl HookError {
    pub fn new(hook: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            hook: hook.into(),
            message: message.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum FeedErrorKind {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Hook(#[from] HookError),

    #[error("Panicked: {0}")]
    Panicked(String),
}

/// A per-feed failure, tagged with the feed it happened on.
#[derive(Error, Debug)]
pub struct FeedError {
    pub feed: String,
    #[source]
    pub kind: FeedErrorKind,
}

impl FeedError {
    pub fn new(feed: &FeedDescriptor, kind: FeedErrorKind) -> Self {
        Self {
            feed: feed.url.to_string(),
            kind,
        }
    }
}

impl fmt::Display for FeedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error processing feed {}: {}", self.feed, self.kind)
    }
}

/// Storage-level cause behind a [`StoreError`].
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] rusqlite_migration::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt cache data: {0}")]
    Corrupt(String),
}

/// Persistence failure. Loading and saving fail at different points of a
/// run and callers treat them differently: a load failure aborts before any
/// feed is fetched, a save failure is reported after output was produced.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to load feed cache from {location}: {source}")]
    Load {
        location: String,
        #[source]
        source: BackendError,
    },

    #[error("Failed to save feed cache to {location}: {source}")]
    Save {
        location: String,
        #[source]
        source: BackendError,
    },
}

impl StoreError {
    pub fn load(location: impl Into<String>, source: impl Into<BackendError>) -> Self {
        StoreError::Load {
            location: location.into(),
            source: source.into(),
        }
    }

    pub fn save(location: impl Into<String>, source: impl Into<BackendError>) -> Self {
        StoreError::Save {
            location: location.into(),
            source: source.into(),
        }
    }

    pub fn is_load(&self) -> bool {
        matches!(self, StoreError::Load { .. })
    }
}

#[derive(Error, Debug)]
pub enum FreshetError {
    #[error(transparent)]
    Feed(#[from] FeedError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Hook(#[from] HookError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FreshetError>;
