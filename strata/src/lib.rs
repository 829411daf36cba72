//! # strata
//!
//! Embedded multi-resolution time-series store on an ordered key-value file.
//!
//! strata keeps periodic scalar measurements per numbered "unit" and
//! consolidates them as they arrive: every ten records at one level roll up
//! into one min/avg/max record at the next, coarser level. Range queries
//! pick the coarsest level dense enough for the requested resolution and
//! resample it onto a fixed number of buckets with time-overlap weighting.
//!
//! ## Key Properties
//!
//! - Fixed 8-byte big-endian keys `(unit, level, ts)`; the store's byte order
//!   is the time order
//! - Consolidation at write time, no background work
//! - Counter units store their per-second rate
//! - Day-based retention per resolution class
//! - One exclusive handle per store file
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use strata::{Store, ValueKind};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut store = Store::open("./metrics.redb")?;
//!
//! // Gauge readings for unit 1, one per minute.
//! for i in 0..60u32 {
//!     store.put_value(0, 1_700_000_000 + i * 60, 1, f64::from(i), false)?;
//! }
//!
//! // Counter readings for unit 2 are stored as rates.
//! store.put_value(0, 1_700_000_000, 2, 1_000.0, true)?;
//! store.put_value(0, 1_700_000_060, 2, 7_000.0, true)?;
//!
//! // 12 average buckets over the hour.
//! let (values, meta) =
//!     store.get_values(1, 1_700_000_000, 1_700_003_600, ValueKind::Avg, 12)?;
//! println!("level {}: {:?}", meta.level_used, values);
//!
//! // Drop raw data older than a month and consolidated data older than a year.
//! store.truncate(31, 365)?;
//! store.close()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`Store`]: top-level handle owning one backend
//! - [`OrderedStore`]: the backend seam, with [`RedbStore`] and [`MemStore`]
//! - [`ValueKind`]: which field of min/avg/max a query reads
//! - [`Config`]: units, retention and charts from a JSON file
//!
//! ## Modules
//!
//! - [`record`]: key and value byte layouts
//! - [`kv`]: ordered store trait, cursors and backends
//! - [`ingest`]: writes, counter rates and the consolidation cascade
//! - [`query`]: level selection and resampling
//! - [`retention`]: pruning by age
//! - [`migrate`]: record-by-record store copy
//! - [`store`]: the handle tying them together
//! - [`config`]: configuration file
//! - [`chart`]: renderer input frames
//! - [`error`]: error types

pub mod chart;
pub mod config;
pub mod error;
pub mod ingest;
pub mod kv;
pub mod migrate;
pub mod query;
pub mod record;
pub mod retention;
pub mod store;

// Re-export primary API types at crate root for convenience.
pub use config::Config;
pub use error::{Result, StrataError};
pub use ingest::{Ingest, SkipReason};
pub use kv::{MemStore, OrderedStore, RedbStore};
pub use query::Resampled;
pub use record::ValueKind;
pub use store::Store;
