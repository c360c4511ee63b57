use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;

use super::{MetadataGroup, PersistedFeed, Snapshot, Store};
use crate::app::BackendError;

const FORMAT_VERSION: u32 = 1;

#[derive(Deserialize)]
struct Document {
    version: u32,
    #[serde(default)]
    feeds: Vec<PersistedFeed>,
    #[serde(default)]
    extra: Vec<MetadataGroup>,
}

#[derive(Serialize)]
struct DocumentRef<'a> {
    version: u32,
    feeds: &'a [PersistedFeed],
    extra: &'a [MetadataGroup],
}

/// Keeps the whole cache in one JSON file, rewritten on every save.
#[derive(Debug, Clone)]
pub struct JsonStore {
    path: PathBuf,
}

impl JsonStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Store for JsonStore {
    fn location(&self) -> String {
        self.path.display().to_string()
    }

    fn load(&self) -> Result<Snapshot, BackendError> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "No cache file yet, starting empty");
            return Ok(Snapshot::default());
        }

        let bytes = fs::read(&self.path)?;
        let document: Document = serde_json::from_slice(&bytes)?;
        if document.version != FORMAT_VERSION {
            return Err(BackendError::Corrupt(format!(
                "unsupported cache format version {}",
                document.version
            )));
        }

        Ok(Snapshot {
            feeds: document
                .feeds
                .into_iter()
                .map(PersistedFeed::normalized)
                .collect(),
            extra: document.extra,
        })
    }

    fn save(&self, snapshot: &Snapshot) -> Result<(), BackendError> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent)?;

        let document = DocumentRef {
            version: FORMAT_VERSION,
            feeds: &snapshot.feeds,
            extra: &snapshot.extra,
        };

        // Write beside the target, then rename over it.
        let file = NamedTempFile::new_in(parent)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &document)?;
        writer.flush()?;

        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}
