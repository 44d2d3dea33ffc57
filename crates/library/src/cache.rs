use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use common::Leaf;
use parking_lot::RwLock;
use redb::{Database, ReadableTable, TableDefinition, TableError};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::LibraryError;

const TREE_CACHE_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("tree_cache");
const KEY_SEP: char = '\u{1f}';

/// A cached scan of one root set for one entity.
#[derive(Clone, Debug, PartialEq)]
pub struct CacheRecord {
    pub entity_id: i64,
    pub cache_key: String,
    pub stamp: u64,
    pub payload: Vec<Leaf>,
    pub updated_at: i64,
}

impl CacheRecord {
    pub fn new(entity_id: i64, cache_key: &str, stamp: u64, payload: Vec<Leaf>) -> Self {
        Self {
            entity_id,
            cache_key: cache_key.to_string(),
            stamp,
            payload,
            updated_at: now_ms(),
        }
    }

    /// Trusted only when both the key and the stamp still match.
    pub fn is_fresh(&self, cache_key: &str, stamp: u64) -> bool {
        self.cache_key == cache_key && self.stamp == stamp
    }
}

pub trait CacheStore: Send + Sync {
    fn get(&self, entity_id: i64, cache_key: &str) -> Result<Option<CacheRecord>, LibraryError>;

    /// Replaces any prior record for the same `(entity_id, cache_key)`.
    fn put(&self, record: &CacheRecord) -> Result<(), LibraryError>;

    /// Drops every record of an entity; returns how many were removed.
    fn delete_entity(&self, entity_id: i64) -> Result<usize, LibraryError>;
}

/// On-disk row; the payload stays JSON so other readers can parse it.
#[derive(Serialize, Deserialize)]
struct CacheRow {
    entity_id: i64,
    cache_key: String,
    stamp: i64,
    payload_json: String,
    updated_at: i64,
}

impl CacheRow {
    fn from_record(record: &CacheRecord) -> Result<Self, LibraryError> {
        Ok(Self {
            entity_id: record.entity_id,
            cache_key: record.cache_key.clone(),
            stamp: record.stamp as i64,
            payload_json: serde_json::to_string(&record.payload)?,
            updated_at: record.updated_at,
        })
    }

    fn into_record(self) -> Result<CacheRecord, LibraryError> {
        let payload: Vec<Leaf> = serde_json::from_str(&self.payload_json)?;
        Ok(CacheRecord {
            entity_id: self.entity_id,
            cache_key: self.cache_key,
            stamp: self.stamp as u64,
            payload,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Clone)]
pub struct RedbCacheStore {
    db: Arc<Database>,
}

impl RedbCacheStore {
    pub fn open(path: &Path) -> Result<Self, LibraryError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let db = if path.exists() {
            Database::open(path)?
        } else {
            Database::create(path)?
        };
        let store = Self { db: Arc::new(db) };
        store.init_tables()?;
        Ok(store)
    }

    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn init_tables(&self) -> Result<(), LibraryError> {
        let write_txn = self.db.begin_write()?;
        {
            let _ = write_txn.open_table(TREE_CACHE_TABLE)?;
        }
        write_txn.commit()?;
        Ok(())
    }
}

impl CacheStore for RedbCacheStore {
    fn get(&self, entity_id: i64, cache_key: &str) -> Result<Option<CacheRecord>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let table = match read_txn.open_table(TREE_CACHE_TABLE) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let key = record_key(entity_id, cache_key);
        let Some(value) = table.get(key.as_str())? else {
            return Ok(None);
        };
        let decoded = bincode::deserialize::<CacheRow>(value.value())
            .map_err(LibraryError::from)
            .and_then(CacheRow::into_record);
        match decoded {
            Ok(record) => Ok(Some(record)),
            Err(err) => {
                warn!("Discarding unreadable cache record {}: {}", entity_id, err);
                Ok(None)
            }
        }
    }

    fn put(&self, record: &CacheRecord) -> Result<(), LibraryError> {
        let row = CacheRow::from_record(record)?;
        let bytes = bincode::serialize(&row)?;
        let key = record_key(record.entity_id, &record.cache_key);
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(TREE_CACHE_TABLE)?;
            table.insert(key.as_str(), bytes.as_slice())?;
        }
        write_txn.commit()?;
        debug!(
            "Cached {} leaves for entity {}",
            record.payload.len(),
            record.entity_id
        );
        Ok(())
    }

    fn delete_entity(&self, entity_id: i64) -> Result<usize, LibraryError> {
        let prefix = entity_prefix(entity_id);
        let mut end = prefix.clone();
        end.push('\u{10ffff}');

        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(TREE_CACHE_TABLE)?;
            let mut keys = Vec::new();
            for entry in table.range(prefix.as_str()..end.as_str())? {
                let entry = entry?;
                keys.push(entry.0.value().to_string());
            }
            for key in &keys {
                table.remove(key.as_str())?;
            }
            keys.len()
        };
        write_txn.commit()?;
        Ok(removed)
    }
}

/// Process-local store, used for ad hoc runs and tests.
#[derive(Clone, Default)]
pub struct MemoryCacheStore {
    records: Arc<RwLock<HashMap<(i64, String), CacheRecord>>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl CacheStore for MemoryCacheStore {
    fn get(&self, entity_id: i64, cache_key: &str) -> Result<Option<CacheRecord>, LibraryError> {
        Ok(self
            .records
            .read()
            .get(&(entity_id, cache_key.to_string()))
            .cloned())
    }

    fn put(&self, record: &CacheRecord) -> Result<(), LibraryError> {
        self.records
            .write()
            .insert((record.entity_id, record.cache_key.clone()), record.clone());
        Ok(())
    }

    fn delete_entity(&self, entity_id: i64) -> Result<usize, LibraryError> {
        let mut records = self.records.write();
        let before = records.len();
        records.retain(|(id, _), _| *id != entity_id);
        Ok(before - records.len())
    }
}

fn entity_prefix(entity_id: i64) -> String {
    format!("{}{}", entity_id, KEY_SEP)
}

fn record_key(entity_id: i64, cache_key: &str) -> String {
    format!("{}{}", entity_prefix(entity_id), cache_key)
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|value| value.as_millis() as i64)
        .unwrap_or(0)
}
