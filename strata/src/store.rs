//! Top-level store handle.
//!
//! [`Store`] owns one ordered key-value backend exclusively for its whole
//! lifetime and routes every operation through it. There is no global
//! state: independent handles on independent files never interact.
//!
//! # Design
//!
//! - Opening takes the backend's exclusive lock; a second handle on the same
//!   file fails to open
//! - Mutating operations take `&mut self`; sharing a handle across threads
//!   needs an external lock around it
//! - Writes become durable on [`Store::sync`] or [`Store::close`]
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use strata::{Store, ValueKind};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut store = Store::open("./metrics.redb")?;
//!
//! // Gauge reading for unit 1.
//! store.put_value(0, 1_700_000_000, 1, 42.0, false)?;
//!
//! // 60 average buckets over the last hour.
//! let (values, meta) = store.get_values(1, 1_699_996_400, 1_700_000_000, ValueKind::Avg, 60)?;
//! println!("level {}: {:?}", meta.level_used, values);
//!
//! store.close()?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use serde::Serialize;
use tracing::{debug, info};

use crate::error::Result;
use crate::ingest::{self, Ingest};
use crate::kv::{MemStore, OrderedStore, RedbStore};
use crate::migrate::{self, CopyStats};
use crate::query::{self, Resampled};
use crate::record::{Key, LastValue, Record, ValueKind};
use crate::retention::{self, TruncateStats};

/// Exclusive handle on a time-series store.
#[derive(Debug)]
pub struct Store<B: OrderedStore = RedbStore> {
    backend: B,
}

impl Store<RedbStore> {
    /// Opens the store file at `path`, creating it if missing.
    ///
    /// # Errors
    ///
    /// Returns `StorageOpenFailed` if the file cannot be created, is not a
    /// store, or is already open.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let backend = RedbStore::open(path)?;
        info!(path = %backend.path().display(), "store opened");
        Ok(Self { backend })
    }

    /// Returns the store file path.
    pub fn path(&self) -> &Path {
        self.backend.path()
    }
}

impl Store<MemStore> {
    /// Creates a volatile store.
    pub fn in_memory() -> Self {
        Self::with_backend(MemStore::new())
    }
}

impl<B: OrderedStore> Store<B> {
    /// Wraps an already-open backend.
    pub fn with_backend(backend: B) -> Self {
        Self { backend }
    }

    /// Returns the backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Records a reading. See [`ingest::put_value`].
    ///
    /// # Errors
    ///
    /// Returns `StorageWriteFailed` if a write fails.
    pub fn put_value(
        &mut self,
        since: u32,
        ts: u32,
        unit: u16,
        value: f64,
        is_counter: bool,
    ) -> Result<Ingest> {
        ingest::put_value(&mut self.backend, since, ts, unit, value, is_counter)
    }

    /// Resamples `unit` over `[beg, end)` into `buckets` fresh buckets.
    ///
    /// # Errors
    ///
    /// See [`query::get_values`].
    pub fn get_values(
        &self,
        unit: u16,
        beg: u32,
        end: u32,
        kind: ValueKind,
        buckets: usize,
    ) -> Result<(Vec<f64>, Resampled)> {
        let mut values = vec![0.0; buckets];
        let meta = query::get_values(&self.backend, unit, beg, end, kind, &mut values)?;
        Ok((values, meta))
    }

    /// Resamples `unit` over `[beg, end)` into the caller's buckets.
    ///
    /// # Errors
    ///
    /// See [`query::get_values`].
    pub fn get_values_into(
        &self,
        unit: u16,
        beg: u32,
        end: u32,
        kind: ValueKind,
        out: &mut [f64],
    ) -> Result<Resampled> {
        query::get_values(&self.backend, unit, beg, end, kind, out)
    }

    /// Prunes expired records using the wall clock.
    ///
    /// # Errors
    ///
    /// See [`retention::truncate`].
    pub fn truncate(&mut self, days_detail: u32, days_compressed: u32) -> Result<TruncateStats> {
        retention::truncate(&mut self.backend, days_detail, days_compressed)
    }

    /// Prunes expired records relative to `now`.
    ///
    /// # Errors
    ///
    /// See [`retention::truncate`].
    pub fn truncate_at(
        &mut self,
        now: u64,
        days_detail: u32,
        days_compressed: u32,
    ) -> Result<TruncateStats> {
        retention::truncate_at(&mut self.backend, now, days_detail, days_compressed)
    }

    /// Copies every well-formed record into a new store file at `path`.
    ///
    /// The destination is synced and closed before returning. On failure it
    /// is left on disk with whatever was copied.
    ///
    /// # Errors
    ///
    /// Returns `StorageOpenFailed` if the destination cannot be opened, and
    /// any error of [`migrate::copy_store`] or of syncing the destination.
    pub fn copy_to<P: AsRef<Path>>(&self, path: P) -> Result<CopyStats> {
        let mut dest = RedbStore::open(path)?;
        let stats = migrate::copy_store(&self.backend, &mut dest)?;
        dest.sync()?;
        info!(dest = %dest.path().display(), copied = stats.copied, "store copied");
        Ok(stats)
    }

    /// Scans the whole store and summarizes what it holds.
    ///
    /// # Errors
    ///
    /// Returns `StorageReadFailed` if the scan fails.
    pub fn summary(&self) -> Result<StoreSummary> {
        let mut summary = StoreSummary::default();
        let mut position = self.backend.first()?;

        while let Some((key, value)) = position {
            match Record::decode(&key, &value) {
                Ok((k, record)) => summary.add(k, record),
                Err(_) => summary.malformed += 1,
            }
            position = self.backend.next(&key)?;
        }

        debug!(units = summary.units.len(), records = summary.records, "summary");
        Ok(summary)
    }

    /// Makes every completed write durable.
    ///
    /// # Errors
    ///
    /// Returns `StorageSyncFailed` if the backend cannot flush.
    pub fn sync(&mut self) -> Result<()> {
        self.backend.sync()
    }

    /// Syncs and releases the store.
    ///
    /// # Errors
    ///
    /// Returns `StorageSyncFailed` if the final sync fails. The handle is
    /// released either way.
    pub fn close(mut self) -> Result<()> {
        self.backend.sync()?;
        debug!("store closed");
        Ok(())
    }

    /// Releases the handle and returns the backend without syncing.
    pub fn into_inner(self) -> B {
        self.backend
    }
}

/// Contents of a store, grouped by unit and level.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreSummary {
    /// Units in ascending id order.
    pub units: Vec<UnitSummary>,
    /// Well-formed records, last-value records included.
    pub records: u64,
    /// Records that could not be decoded.
    pub malformed: u64,
}

/// Contents of one unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnitSummary {
    /// Unit id.
    pub unit: u16,
    /// Sample levels in ascending order.
    pub levels: Vec<LevelSummary>,
    /// The counter last-value record, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last: Option<LastValueSummary>,
}

/// Sample records at one level of one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LevelSummary {
    /// Level number.
    pub level: u16,
    /// Number of samples.
    pub records: u64,
    /// Oldest sample timestamp.
    pub first_ts: u32,
    /// Newest sample timestamp.
    pub last_ts: u32,
}

/// Serializable view of a last-value record.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LastValueSummary {
    /// Epoch marker.
    pub since: u32,
    /// Reading timestamp.
    pub ts: u32,
    /// Raw counter value.
    pub val: f64,
}

impl From<LastValue> for LastValueSummary {
    fn from(last: LastValue) -> Self {
        Self {
            since: last.since,
            ts: last.ts,
            val: last.val,
        }
    }
}

impl StoreSummary {
    /// Returns the summary of `unit`, if it has any records.
    pub fn unit(&self, unit: u16) -> Option<&UnitSummary> {
        self.units.iter().find(|u| u.unit == unit)
    }

    // Keys arrive in ascending order, so new units and levels always append.
    fn add(&mut self, key: Key, record: Record) {
        self.records += 1;
        if self.units.last().is_none_or(|u| u.unit != key.unit) {
            self.units.push(UnitSummary {
                unit: key.unit,
                levels: Vec::new(),
                last: None,
            });
        }
        let Some(unit) = self.units.last_mut() else {
            return;
        };

        match record {
            Record::Last(last) => unit.last = Some(last.into()),
            Record::Sample(_) => match unit.levels.last_mut() {
                Some(level) if level.level == key.level => {
                    level.records += 1;
                    level.last_ts = key.ts;
                }
                _ => unit.levels.push(LevelSummary {
                    level: key.level,
                    records: 1,
                    first_ts: key.ts,
                    last_ts: key.ts,
                }),
            },
        }
    }
}
