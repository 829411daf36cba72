//! Ordered key-value store seam.
//!
//! The engine never keeps an in-memory index: every operation walks the
//! store through cursors. [`OrderedStore`] is the contract it needs from a
//! backend: point get/put/delete, seeking in either direction, and a durable
//! sync.
//!
//! Keys MUST be compared as unsigned byte strings. The composite keys of
//! [`crate::record::Key`] rely on that ordering to group records by unit and
//! level; a backend comparing native integers would silently scramble them.
//!
//! Two backends are provided:
//! - [`RedbStore`]: persistent, single file, exclusively locked
//! - [`MemStore`]: volatile `BTreeMap`, used for tests and scratch work

use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::{Path, PathBuf};

use redb::{AccessGuard, Database, Durability, ReadableTable, TableDefinition};

use crate::error::{Result, StorageError, read_failed, write_failed};

/// A raw key/value pair.
pub type Entry = (Vec<u8>, Vec<u8>);

/// How a seek treats a missing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekMode {
    /// Land on the key, or the smallest key after it.
    ExactOrNext,
    /// Land on the key, or the largest key before it.
    ExactOrPrev,
}

/// Ordered byte-keyed persistent map with cursor semantics.
pub trait OrderedStore {
    /// Reads the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::ReadFailed`] on backend failure.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::WriteFailed`] on backend failure.
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Removes `key`, returning whether it existed.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::WriteFailed`] on backend failure.
    fn delete(&mut self, key: &[u8]) -> Result<bool>;

    /// Positions on `key` or its neighbour according to `mode`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::ReadFailed`] on backend failure.
    fn seek(&self, key: &[u8], mode: SeekMode) -> Result<Option<Entry>>;

    /// Returns the first entry strictly after `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::ReadFailed`] on backend failure.
    fn next(&self, key: &[u8]) -> Result<Option<Entry>>;

    /// Returns the last entry strictly before `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::ReadFailed`] on backend failure.
    fn prev(&self, key: &[u8]) -> Result<Option<Entry>>;

    /// Returns the smallest entry.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::ReadFailed`] on backend failure.
    fn first(&self) -> Result<Option<Entry>>;

    /// Returns the largest entry.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::ReadFailed`] on backend failure.
    fn last(&self) -> Result<Option<Entry>>;

    /// Flushes all committed writes to durable storage.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::SyncFailed`] on backend failure.
    fn sync(&mut self) -> Result<()>;

    /// Opens a cursor at `key`.
    ///
    /// An [`SeekMode::ExactOrNext`] cursor walks forward, an
    /// [`SeekMode::ExactOrPrev`] cursor walks backward.
    fn cursor(&self, key: &[u8], mode: SeekMode) -> Cursor<'_, Self>
    where
        Self: Sized,
    {
        Cursor::new(self, key, mode)
    }
}

enum Position {
    Seek(Vec<u8>),
    At(Vec<u8>),
    Done,
}

/// Iterator over store entries in one direction.
///
/// The cursor remembers the last key it returned rather than holding a
/// backend iterator, so the store may be modified between steps. Each step
/// re-seeks strictly past that key. After an error the cursor is exhausted.
pub struct Cursor<'s, S: OrderedStore + ?Sized> {
    store: &'s S,
    mode: SeekMode,
    position: Position,
}

impl<'s, S: OrderedStore + ?Sized> Cursor<'s, S> {
    /// Creates a cursor that will first seek to `key`.
    pub fn new(store: &'s S, key: &[u8], mode: SeekMode) -> Self {
        Self {
            store,
            mode,
            position: Position::Seek(key.to_vec()),
        }
    }
}

impl<S: OrderedStore + ?Sized> Iterator for Cursor<'_, S> {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        let step = match std::mem::replace(&mut self.position, Position::Done) {
            Position::Done => return None,
            Position::Seek(key) => self.store.seek(&key, self.mode),
            Position::At(key) => match self.mode {
                SeekMode::ExactOrNext => self.store.next(&key),
                SeekMode::ExactOrPrev => self.store.prev(&key),
            },
        };

        match step {
            Ok(Some(entry)) => {
                self.position = Position::At(entry.0.clone());
                Some(Ok(entry))
            }
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

/// The single table holding every record. `&[u8]` keys compare bytewise.
const RECORDS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("records");

type Bytes = &'static [u8];

/// Persistent ordered store backed by a redb database file.
///
/// Writes commit with [`Durability::Eventual`]; [`OrderedStore::sync`]
/// commits with [`Durability::Immediate`], which makes every earlier commit
/// durable. redb locks the file, so a second handle on the same path fails
/// to open.
pub struct RedbStore {
    db: Database,
    path: PathBuf,
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore").field("path", &self.path).finish()
    }
}

impl RedbStore {
    /// Opens the database at `path`, creating it if missing.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::OpenFailed`] if the file cannot be created,
    /// is not a redb database, or is held open by another handle.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let open_failed = |source: redb::Error| StorageError::OpenFailed {
            path: path.display().to_string(),
            source: Box::new(source),
        };

        let db = Database::create(&path).map_err(|e| open_failed(e.into()))?;

        // Create the table up front so read transactions can always open it.
        let txn = db.begin_write().map_err(|e| open_failed(e.into()))?;
        txn.open_table(RECORDS).map_err(|e| open_failed(e.into()))?;
        txn.commit().map_err(|e| open_failed(e.into()))?;

        Ok(Self { db, path })
    }

    /// Returns the database file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn probe(&self, op: &'static str, probe: Probe<'_>) -> Result<Option<Entry>> {
        let txn = self.db.begin_read().map_err(read_failed(op))?;
        let table = txn.open_table(RECORDS).map_err(read_failed(op))?;

        match probe {
            Probe::AtOrAfter(key) => {
                let mut range = table.range::<&[u8]>(key..).map_err(read_failed(op))?;
                owned(range.next(), op)
            }
            Probe::AtOrBefore(key) => {
                let mut range = table.range::<&[u8]>(..=key).map_err(read_failed(op))?;
                owned(range.next_back(), op)
            }
            Probe::After(key) => {
                let mut range = table
                    .range::<&[u8]>((Bound::Excluded(key), Bound::Unbounded))
                    .map_err(read_failed(op))?;
                owned(range.next(), op)
            }
            Probe::Before(key) => {
                let mut range = table.range::<&[u8]>(..key).map_err(read_failed(op))?;
                owned(range.next_back(), op)
            }
            Probe::First => {
                let mut range = table.iter().map_err(read_failed(op))?;
                owned(range.next(), op)
            }
            Probe::Last => {
                let mut range = table.iter().map_err(read_failed(op))?;
                owned(range.next_back(), op)
            }
        }
    }
}

enum Probe<'k> {
    AtOrAfter(&'k [u8]),
    AtOrBefore(&'k [u8]),
    After(&'k [u8]),
    Before(&'k [u8]),
    First,
    Last,
}

type Guards<'a> = (AccessGuard<'a, Bytes>, AccessGuard<'a, Bytes>);

fn owned(
    item: Option<std::result::Result<Guards<'_>, redb::StorageError>>,
    op: &'static str,
) -> Result<Option<Entry>> {
    let entry = item.transpose().map_err(read_failed(op))?;
    Ok(entry.map(|(k, v)| (k.value().to_vec(), v.value().to_vec())))
}

impl OrderedStore for RedbStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let txn = self.db.begin_read().map_err(read_failed("get"))?;
        let table = txn.open_table(RECORDS).map_err(read_failed("get"))?;
        let value = table.get(key).map_err(read_failed("get"))?;
        Ok(value.map(|guard| guard.value().to_vec()))
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut txn = self.db.begin_write().map_err(write_failed("put"))?;
        txn.set_durability(Durability::Eventual);
        {
            let mut table = txn.open_table(RECORDS).map_err(write_failed("put"))?;
            table.insert(key, value).map_err(write_failed("put"))?;
        }
        txn.commit().map_err(write_failed("put"))
    }

    fn delete(&mut self, key: &[u8]) -> Result<bool> {
        let mut txn = self.db.begin_write().map_err(write_failed("delete"))?;
        txn.set_durability(Durability::Eventual);
        let existed = {
            let mut table = txn.open_table(RECORDS).map_err(write_failed("delete"))?;
            let removed = table.remove(key).map_err(write_failed("delete"))?;
            removed.is_some()
        };
        txn.commit().map_err(write_failed("delete"))?;
        Ok(existed)
    }

    fn seek(&self, key: &[u8], mode: SeekMode) -> Result<Option<Entry>> {
        match mode {
            SeekMode::ExactOrNext => self.probe("seek", Probe::AtOrAfter(key)),
            SeekMode::ExactOrPrev => self.probe("seek", Probe::AtOrBefore(key)),
        }
    }

    fn next(&self, key: &[u8]) -> Result<Option<Entry>> {
        self.probe("cursor next", Probe::After(key))
    }

    fn prev(&self, key: &[u8]) -> Result<Option<Entry>> {
        self.probe("cursor prev", Probe::Before(key))
    }

    fn first(&self) -> Result<Option<Entry>> {
        self.probe("cursor first", Probe::First)
    }

    fn last(&self) -> Result<Option<Entry>> {
        self.probe("cursor last", Probe::Last)
    }

    fn sync(&mut self) -> Result<()> {
        let sync_failed = |source: redb::Error| StorageError::SyncFailed {
            path: self.path.display().to_string(),
            source: Box::new(source),
        };
        let mut txn = self.db.begin_write().map_err(|e| sync_failed(e.into()))?;
        txn.set_durability(Durability::Immediate);
        txn.commit().map_err(|e| sync_failed(e.into()))?;
        Ok(())
    }
}

/// Volatile ordered store over a `BTreeMap`.
///
/// `Vec<u8>` keys order lexicographically by unsigned byte, matching the
/// persistent backend.
#[derive(Debug, Default, Clone)]
pub struct MemStore {
    map: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl MemStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns true if the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    fn edge(&self, lower: Bound<&[u8]>, upper: Bound<&[u8]>, back: bool) -> Option<Entry> {
        let mut range = self.map.range::<[u8], _>((lower, upper));
        let item = if back { range.next_back() } else { range.next() };
        item.map(|(k, v)| (k.clone(), v.clone()))
    }
}

impl OrderedStore for MemStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.map.get(key).cloned())
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.map.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<bool> {
        Ok(self.map.remove(key).is_some())
    }

    fn seek(&self, key: &[u8], mode: SeekMode) -> Result<Option<Entry>> {
        Ok(match mode {
            SeekMode::ExactOrNext => self.edge(Bound::Included(key), Bound::Unbounded, false),
            SeekMode::ExactOrPrev => self.edge(Bound::Unbounded, Bound::Included(key), true),
        })
    }

    fn next(&self, key: &[u8]) -> Result<Option<Entry>> {
        Ok(self.edge(Bound::Excluded(key), Bound::Unbounded, false))
    }

    fn prev(&self, key: &[u8]) -> Result<Option<Entry>> {
        Ok(self.edge(Bound::Unbounded, Bound::Excluded(key), true))
    }

    fn first(&self) -> Result<Option<Entry>> {
        Ok(self.map.first_key_value().map(|(k, v)| (k.clone(), v.clone())))
    }

    fn last(&self) -> Result<Option<Entry>> {
        Ok(self.map.last_key_value().map(|(k, v)| (k.clone(), v.clone())))
    }

    fn sync(&mut self) -> Result<()> {
        Ok(())
    }
}
