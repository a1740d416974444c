use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::{debug, info};
use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use super::schema::{self, SCHEMA_VERSION};
use super::spatial_index::{EmitterTree, IndexedEmitter};
use super::{EmitterRecord, EmitterStore, StoreResult};
use crate::coverage::BoundingBox;
use crate::error::StoreError;
use crate::identity::{EmitterType, RfIdentification};

/// Emitter store backed by a single gzip-compressed JSON file
///
/// # Architecture
/// - All committed rows live in a HashMap keyed by unique id
/// - An R-tree over emitter centers answers bounding-box queries
/// - Writes inside a transaction are staged and applied on commit
/// - Commit writes a temporary file and renames it over the store file, so a
///   failed commit leaves both the file and the in-memory rows untouched
///
/// # File Format
/// `{"version": 3, "emitters": [...]}` gzip-compressed; see [`schema`] for the
/// row layouts and migrations from older versions.
///
/// # Usage
/// ```no_run
/// use rf_locator_rs::store::{EmitterStore, FileStore};
/// use std::path::PathBuf;
///
/// let mut store = FileStore::open(PathBuf::from("/sdcard/rf_locator/emitters.json.gz"))?;
/// store.begin_transaction()?;
/// // insert / update / delete ...
/// store.end_transaction()?;
/// # Ok::<(), rf_locator_rs::StoreError>(())
/// ```
pub struct FileStore {
    path: Option<PathBuf>,
    rows: HashMap<String, EmitterRecord>,
    index: EmitterTree,
    /// Open transaction: key -> new row, or `None` for a delete
    staged: Option<HashMap<String, Option<EmitterRecord>>>,
}

impl FileStore {
    /// Open (or create) a store file, migrating older schema versions
    ///
    /// # Arguments
    /// * `path` - Store file; parent directories are created when missing
    ///
    /// # Errors
    /// `UnsupportedVersion` for files written by a newer schema, `Io`/`Codec`
    /// for unreadable files.
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut store = FileStore {
            path: Some(path.clone()),
            rows: HashMap::new(),
            index: EmitterTree::new(),
            staged: None,
        };

        if !path.exists() {
            info!("Creating emitter store {}", path.display());
            return Ok(store);
        }

        let json = read_gz(&path)?;
        let decoded = schema::decode(&json)?;
        if decoded.needs_rewrite() {
            info!(
                "Rewriting {} from schema v{} as v{} ({} rows rekeyed)",
                path.display(),
                decoded.found_version,
                SCHEMA_VERSION,
                decoded.rekeyed
            );
            write_gz_atomic(&path, &schema::encode(decoded.records.values())?)?;
        }

        store.rows = decoded.records;
        store.index = EmitterTree::from_entries(store.rows.values().filter_map(index_entry).collect());
        info!("Loaded {} emitters from {}", store.rows.len(), path.display());
        Ok(store)
    }

    /// Store without a backing file (tests, replays)
    pub fn in_memory() -> Self {
        FileStore {
            path: None,
            rows: HashMap::new(),
            index: EmitterTree::new(),
            staged: None,
        }
    }

    /// Committed rows, in no particular order
    pub fn records(&self) -> impl Iterator<Item = &EmitterRecord> {
        self.rows.values()
    }

    /// Discard the open transaction
    pub fn rollback(&mut self) {
        if let Some(staged) = self.staged.take() {
            debug!("Rolled back {} staged writes", staged.len());
        }
    }

    fn write(&mut self, key: String, value: Option<EmitterRecord>) -> StoreResult<()> {
        match self.staged.as_mut() {
            Some(staged) => {
                staged.insert(key, value);
                Ok(())
            }
            None => {
                // Autocommit a single write
                self.staged = Some(HashMap::from([(key, value)]));
                self.commit()
            }
        }
    }

    fn commit(&mut self) -> StoreResult<()> {
        let staged = self
            .staged
            .take()
            .ok_or_else(|| StoreError::Transaction("no open transaction".to_string()))?;
        if staged.is_empty() {
            return Ok(());
        }

        if let Some(path) = &self.path {
            let merged = self
                .rows
                .iter()
                .filter(|(key, _)| !staged.contains_key(*key))
                .map(|(_, record)| record)
                .chain(staged.values().flatten());
            write_gz_atomic(path, &schema::encode(merged)?)?;
        }

        let count = staged.len();
        for (key, value) in staged {
            if let Some(old) = self.rows.remove(&key) {
                if let Some(entry) = index_entry(&old) {
                    self.index.remove(&entry);
                }
            }
            if let Some(record) = value {
                if let Some(entry) = index_entry(&record) {
                    self.index.insert(entry);
                }
                self.rows.insert(key, record);
            }
        }
        debug!("Committed {} emitter writes", count);
        Ok(())
    }
}

impl EmitterStore for FileStore {
    fn get(&self, ident: &RfIdentification) -> StoreResult<Option<EmitterRecord>> {
        let key = ident.unique_id();
        if let Some(staged) = self.staged.as_ref().and_then(|s| s.get(key)) {
            return Ok(staged.clone());
        }
        Ok(self.rows.get(key).cloned())
    }

    fn insert(&mut self, record: &EmitterRecord) -> StoreResult<()> {
        let exists = match self.staged.as_ref().and_then(|s| s.get(&record.unique_id)) {
            Some(staged) => staged.is_some(),
            None => self.rows.contains_key(&record.unique_id),
        };
        if exists {
            return Err(StoreError::DuplicateKey(record.unique_id.clone()));
        }
        self.write(record.unique_id.clone(), Some(record.clone()))
    }

    fn update(&mut self, record: &EmitterRecord) -> StoreResult<()> {
        self.write(record.unique_id.clone(), Some(record.clone()))
    }

    fn delete(&mut self, ident: &RfIdentification) -> StoreResult<()> {
        self.write(ident.unique_id().to_string(), None)
    }

    fn emitters_in(&self, rf_type: EmitterType, bb: &BoundingBox) -> StoreResult<HashSet<RfIdentification>> {
        let mut found = self.index.emitters_in(rf_type, bb);

        // Staged writes shadow committed rows
        if let Some(staged) = &self.staged {
            found.retain(|id| !staged.contains_key(id.unique_id()));
            for record in staged.values().flatten() {
                if record.rf_type == rf_type && bb.contains(record.latitude, record.longitude) {
                    if let Ok(id) = record.ident() {
                        found.insert(id);
                    }
                }
            }
        }
        Ok(found)
    }

    fn begin_transaction(&mut self) -> StoreResult<()> {
        if self.staged.is_some() {
            return Err(StoreError::Transaction("transaction already open".to_string()));
        }
        self.staged = Some(HashMap::new());
        Ok(())
    }

    fn end_transaction(&mut self) -> StoreResult<()> {
        self.commit()
    }

    fn row_count(&self) -> StoreResult<usize> {
        let Some(staged) = &self.staged else {
            return Ok(self.rows.len());
        };
        let mut count = self.rows.len();
        for (key, value) in staged {
            match (self.rows.contains_key(key), value.is_some()) {
                (false, true) => count += 1,
                (true, false) => count -= 1,
                _ => {}
            }
        }
        Ok(count)
    }

    fn clear(&mut self) -> StoreResult<()> {
        if self.staged.is_some() {
            return Err(StoreError::Transaction("cannot clear inside a transaction".to_string()));
        }
        if let Some(path) = &self.path {
            write_gz_atomic(path, &schema::encode(std::iter::empty())?)?;
        }
        info!("Cleared {} emitters", self.rows.len());
        self.rows.clear();
        self.index = EmitterTree::new();
        Ok(())
    }
}

/// R-tree entry for a row; rows with an unusable id are not indexed
fn index_entry(record: &EmitterRecord) -> Option<IndexedEmitter> {
    let ident = record.ident().ok()?;
    Some(IndexedEmitter::new(ident, record.latitude, record.longitude))
}

fn read_gz(path: &Path) -> StoreResult<String> {
    let file = File::open(path)?;
    let mut decoder = GzDecoder::new(file);
    let mut json = String::new();
    decoder.read_to_string(&mut json)?;
    Ok(json)
}

/// Compress to `<path>.tmp` then rename over `path`
fn write_gz_atomic(path: &Path, bytes: &[u8]) -> StoreResult<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let file = File::create(&tmp)?;
    let mut encoder = GzEncoder::new(file, Compression::default());
    encoder.write_all(bytes)?;
    let file = encoder.finish()?;
    file.sync_all()?;

    fs::rename(&tmp, path)?;
    Ok(())
}
