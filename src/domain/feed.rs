use std::fmt;

use url::Url;

use super::links::normalize_url;

pub const DEFAULT_DAYS_TO_CACHE: u32 = 365;

/// Static configuration for one feed. Immutable for the duration of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedDescriptor {
    pub url: Url,
    /// Character encoding that overrides anything the source declares.
    pub forced_encoding: Option<String>,
    pub disabled: bool,
    /// Download and parse even if the source reports no change.
    pub force_download: bool,
    /// How long cache entries for this feed survive without being seen.
    pub days_to_cache: u32,
}

impl FeedDescriptor {
    pub fn new(url: Url) -> Self {
        Self {
            url: normalize_url(&url),
            forced_encoding: None,
            disabled: false,
            force_download: false,
            days_to_cache: DEFAULT_DAYS_TO_CACHE,
        }
    }

    pub fn parse(url: &str) -> Result<Self, url::ParseError> {
        Ok(Self::new(Url::parse(url.trim())?))
    }

    pub fn with_forced_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.forced_encoding = Some(encoding.into());
        self
    }

    pub fn with_force_download(mut self, force: bool) -> Self {
        self.force_download = force;
        self
    }

    pub fn with_disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    pub fn with_days_to_cache(mut self, days: u32) -> Self {
        self.days_to_cache = days;
        self
    }

    pub fn cache_duration(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.days_to_cache))
    }
}

impl fmt::Display for FeedDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}
