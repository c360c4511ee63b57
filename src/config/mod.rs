//! Configuration management for freshet.
//!
//! Configuration is read from `~/.config/freshet/config.toml` unless another
//! path is given. If the default file doesn't exist, one with comments is
//! created.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{FeedDescriptor, DEFAULT_DAYS_TO_CACHE};
use crate::fetcher::http_fetcher::DEFAULT_USER_AGENT;
use crate::fetcher::DEFAULT_WORKERS;

/// Where the entry cache is kept between runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Sqlite,
    Json,
    /// Nothing is loaded or saved.
    None,
}

impl StoreBackend {
    fn default_file_name(self) -> &'static str {
        match self {
            StoreBackend::Sqlite | StoreBackend::None => "cache.db",
            StoreBackend::Json => "cache.json",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: StoreBackend,

    /// Cache file location (default: `<data dir>/freshet/cache.db` or `cache.json`)
    pub path: Option<PathBuf>,
}

/// One `[[feeds]]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    pub url: String,

    /// Character encoding that overrides whatever the source declares
    #[serde(default)]
    pub encoding: Option<String>,

    #[serde(default)]
    pub disabled: bool,

    /// Download even if the source reports no change
    #[serde(default)]
    pub force_download: bool,

    /// Forget entries not seen for this many days (default: 365)
    #[serde(default = "default_days_to_cache")]
    pub days_to_cache: u32,
}

fn default_days_to_cache() -> u32 {
    DEFAULT_DAYS_TO_CACHE
}

impl FeedConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            encoding: None,
            disabled: false,
            force_download: false,
            days_to_cache: DEFAULT_DAYS_TO_CACHE,
        }
    }

    pub fn descriptor(&self) -> Result<FeedDescriptor, ConfigError> {
        let mut feed = FeedDescriptor::parse(&self.url).map_err(|e| ConfigError::InvalidFeedUrl {
            url: self.url.clone(),
            source: e,
        })?;

        if let Some(encoding) = &self.encoding {
            feed = feed.with_forced_encoding(encoding.clone());
        }

        Ok(feed
            .with_disabled(self.disabled)
            .with_force_download(self.force_download)
            .with_days_to_cache(self.days_to_cache))
    }
}

/// Main configuration struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Number of worker threads (default: 10)
    pub workers: usize,

    /// Per-request network timeout in seconds (default: 30)
    pub request_timeout_secs: u64,

    pub user_agent: String,

    /// Save the cache after a run (default: true)
    pub update_cache: bool,

    pub cache: CacheConfig,

    pub feeds: Vec<FeedConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            request_timeout_secs: 30,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            update_cache: true,
            cache: CacheConfig::default(),
            feeds: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from the default path.
    ///
    /// If the config file doesn't exist, creates a default one with comments.
    /// Missing fields in the config file will use default values.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::default_config_path()?;

        if !config_path.exists() {
            Self::create_default_config(&config_path)?;
            return Ok(Self::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from an explicit path, which must exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        Self::parse(&content, path)
    }

    fn parse(content: &str, path: &Path) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the default config file path: `~/.config/freshet/config.toml`
    pub fn default_config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(config_dir.join("freshet").join("config.toml"))
    }

    fn create_default_config(path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let mut file = fs::File::create(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        file.write_all(Self::default_config_content().as_bytes())
            .map_err(|e| ConfigError::Io {
                path: path.to_path_buf(),
                source: e,
            })?;

        Ok(())
    }

    fn default_config_content() -> String {
        format!(
            r##"# freshet configuration
#
# Feeds are listed as [[feeds]] tables at the end of this file:
#
# [[feeds]]
# url = "https://example.com/feed.xml"
# encoding = "iso-8859-1"   # overrides the charset the source declares
# disabled = false
# force_download = false    # download even if the source reports no change
# days_to_cache = 365       # forget items not seen for this many days

# Number of feeds fetched in parallel
workers = {DEFAULT_WORKERS}

# Per-request network timeout in seconds
request_timeout_secs = 30

user_agent = "{DEFAULT_USER_AGENT}"

# Save the cache after each run
update_cache = true

[cache]
# "sqlite", "json" or "none"
backend = "sqlite"

# Defaults to the platform data directory
# path = "/var/lib/freshet/cache.db"
"##
        )
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::NoWorkers);
        }

        for feed in &self.feeds {
            feed.descriptor()?;
        }

        Ok(())
    }

    pub fn feed_descriptors(&self) -> Result<Vec<FeedDescriptor>, ConfigError> {
        self.feeds.iter().map(FeedConfig::descriptor).collect()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn cache_path(&self) -> Result<PathBuf, ConfigError> {
        if let Some(path) = &self.cache.path {
            return Ok(path.clone());
        }

        let data_dir = dirs::data_dir().ok_or(ConfigError::NoDataDir)?;
        Ok(data_dir
            .join("freshet")
            .join(self.cache.backend.default_file_name()))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Could not determine data directory for the feed cache")]
    NoDataDir,

    #[error("Failed to read/write config file at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid feed URL '{url}': {source}")]
    InvalidFeedUrl {
        url: String,
        source: url::ParseError,
    },

    #[error("At least one worker thread is required")]
    NoWorkers,

    #[error("Metadata namespace '{0}' is registered more than once")]
    DuplicateNamespace(String),

    #[error("All configured feeds are disabled")]
    NoEnabledFeeds,
}
