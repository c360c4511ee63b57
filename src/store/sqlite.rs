use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, Statement};
use rusqlite_migration::{Migrations, M};
use tracing::debug;
use url::Url;

use super::{MetadataGroup, PersistedFeed, PersistedItem, Snapshot, Store};
use crate::app::BackendError;
use crate::domain::CacheEntry;

pub struct SqliteStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

struct EntryRow {
    entry_url: String,
    channel_url: String,
    publication_date: Option<String>,
    last_seen: Option<String>,
}

impl EntryRow {
    fn into_entry(self) -> Result<CacheEntry, BackendError> {
        Ok(CacheEntry::new(
            &parse_url(&self.channel_url)?,
            &parse_url(&self.entry_url)?,
            parse_optional_datetime(self.publication_date.as_deref())?,
            parse_optional_datetime(self.last_seen.as_deref())?,
        ))
    }
}

struct MetadataRow {
    scope: String,
    owner_url: String,
    namespace: String,
    name: String,
    value: String,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, BackendError> {
        let conn = Connection::open(path.as_ref())?;
        let store = Self {
            conn: Mutex::new(conn),
            path: Some(path.as_ref().to_path_buf()),
        };
        store.run_migrations()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self, BackendError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
            path: None,
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> Result<(), BackendError> {
        let migrations = Migrations::new(vec![M::up(include_str!(
            "../../migrations/001-initial/up.sql"
        ))]);

        let mut conn = self.conn.lock();
        migrations.to_latest(&mut conn)?;

        Ok(())
    }

    fn read_entries(conn: &Connection) -> Result<Vec<CacheEntry>, BackendError> {
        let mut stmt = conn.prepare(
            "SELECT entry_url, channel_url, publication_date, last_seen
             FROM entries ORDER BY channel_url, position, entry_url",
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok(EntryRow {
                    entry_url: row.get(0)?,
                    channel_url: row.get(1)?,
                    publication_date: row.get(2)?,
                    last_seen: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter().map(EntryRow::into_entry).collect()
    }

    fn read_metadata(conn: &Connection) -> Result<Vec<MetadataRow>, BackendError> {
        let mut stmt = conn.prepare(
            "SELECT scope, owner_url, namespace, name, value
             FROM metadata ORDER BY scope, owner_url, namespace, name",
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok(MetadataRow {
                    scope: row.get(0)?,
                    owner_url: row.get(1)?,
                    namespace: row.get(2)?,
                    name: row.get(3)?,
                    value: row.get(4)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    fn write_groups(
        stmt: &mut Statement<'_>,
        scope: &str,
        owner_url: &str,
        groups: &[MetadataGroup],
    ) -> Result<(), BackendError> {
        for group in groups {
            for (name, value) in &group.values {
                stmt.execute(params![scope, owner_url, group.namespace, name, value])?;
            }
        }
        Ok(())
    }
}

impl Store for SqliteStore {
    fn location(&self) -> String {
        match &self.path {
            Some(path) => path.display().to_string(),
            None => ":memory:".to_string(),
        }
    }

    fn load(&self) -> Result<Snapshot, BackendError> {
        let conn = self.conn.lock();

        let mut feeds: BTreeMap<String, PersistedFeed> = BTreeMap::new();
        // entry URL -> (channel key, index into that feed's items)
        let mut items: HashMap<String, (String, usize)> = HashMap::new();

        for entry in Self::read_entries(&conn)? {
            let channel_key = entry.channel_url().as_str().to_string();
            let feed = feeds
                .entry(channel_key.clone())
                .or_insert_with(|| PersistedFeed::new(entry.channel_url().clone()));

            if entry.is_channel_entry() {
                feed.channel = Some(entry);
            } else {
                items.insert(entry.key().to_string(), (channel_key, feed.items.len()));
                feed.items.push(PersistedItem {
                    entry,
                    metadata: Vec::new(),
                });
            }
        }

        let mut extra = Vec::new();
        for row in Self::read_metadata(&conn)? {
            match row.scope.as_str() {
                "feed" => {
                    let owner = parse_url(&row.owner_url)?;
                    let feed = feeds
                        .entry(owner.as_str().to_string())
                        .or_insert_with(|| PersistedFeed::new(owner));
                    MetadataGroup::push(&mut feed.metadata, &row.namespace, row.name, row.value);
                }
                "item" => {
                    let Some((channel, index)) = items.get(&row.owner_url) else {
                        debug!(item = %row.owner_url, "Skipping metadata for unknown item");
                        continue;
                    };
                    if let Some(item) = feeds
                        .get_mut(channel)
                        .and_then(|feed| feed.items.get_mut(*index))
                    {
                        MetadataGroup::push(&mut item.metadata, &row.namespace, row.name, row.value);
                    }
                }
                "extra" => MetadataGroup::push(&mut extra, &row.namespace, row.name, row.value),
                other => {
                    return Err(BackendError::Corrupt(format!(
                        "unknown metadata scope '{other}'"
                    )))
                }
            }
        }

        Ok(Snapshot {
            feeds: feeds.into_values().collect(),
            extra,
        })
    }

    fn save(&self, snapshot: &Snapshot) -> Result<(), BackendError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM metadata", [])?;
        tx.execute("DELETE FROM entries", [])?;

        {
            let mut insert_entry = tx.prepare(
                "INSERT OR REPLACE INTO entries (entry_url, channel_url, publication_date, last_seen, position)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            let mut insert_metadata = tx.prepare(
                "INSERT OR REPLACE INTO metadata (scope, owner_url, namespace, name, value)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;

            for feed in &snapshot.feeds {
                let entries = feed
                    .channel
                    .iter()
                    .chain(feed.items.iter().map(|item| &item.entry));

                for (position, entry) in entries.enumerate() {
                    insert_entry.execute(params![
                        entry.entry_url().as_str(),
                        entry.channel_url().as_str(),
                        entry.publication_date().map(format_datetime),
                        entry.last_seen().map(format_datetime),
                        position as i64,
                    ])?;
                }

                Self::write_groups(
                    &mut insert_metadata,
                    "feed",
                    feed.channel_url.as_str(),
                    &feed.metadata,
                )?;
                for item in &feed.items {
                    Self::write_groups(&mut insert_metadata, "item", item.entry.key(), &item.metadata)?;
                }
            }

            Self::write_groups(&mut insert_metadata, "extra", "", &snapshot.extra)?;
        }

        tx.commit()?;
        Ok(())
    }
}

fn parse_url(s: &str) -> Result<Url, BackendError> {
    Url::parse(s).map_err(|e| BackendError::Corrupt(format!("invalid URL '{s}': {e}")))
}

fn format_datetime(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_optional_datetime(s: Option<&str>) -> Result<Option<DateTime<Utc>>, BackendError> {
    s.map(|s| {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| BackendError::Corrupt(format!("invalid timestamp '{s}': {e}")))
    })
    .transpose()
}
