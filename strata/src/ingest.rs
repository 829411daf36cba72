//! Ingest and cascading consolidation.
//!
//! Every raw reading lands at level 0. After each insert at level `L` the
//! engine looks at the consolidation window of level `L`: all records at or
//! after the newest level `L+1` timestamp. Once that window holds
//! [`CASCADE_THRESHOLD`] records, it is summarized into one level `L+1`
//! record keyed at the inserted timestamp, and the check repeats one level
//! up.
//!
//! # Consolidation Flow
//!
//! ```text
//! level 0  ●●●●●●●●●● ●●●●●●●●● ●●●●●●●●● ...
//!                   │         │         │
//! level 1           ●─────────●─────────●  ...   (one per 10 records)
//!                                       │
//! level 2                              ... (one per 10 level-1 records)
//! ```
//!
//! The newest level `L+1` record shares its timestamp with a level `L`
//! record, so consecutive windows overlap by that one record. Its weight in
//! the time-weighted average is zero, so nothing is counted twice.
//!
//! Counter units store the per-second rate between successive readings
//! instead of the reading itself. The previous reading lives in the unit's
//! last-value record.

use tracing::{debug, trace, warn};

use crate::error::Result;
use crate::kv::{OrderedStore, SeekMode};
use crate::record::{Key, LastValue, SENTINEL_LEVEL, Sample};

/// Number of level `L` records that trigger a level `L+1` record.
pub const CASCADE_THRESHOLD: u32 = 10;

/// Outcome of a successful [`put_value`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Ingest {
    /// A level 0 sample was written.
    Stored {
        /// The stored observation (the rate, for counters).
        value: f64,
        /// Number of levels written, 1 when no cascade fired.
        levels_written: u16,
    },
    /// No sample was written. The last-value record was still updated.
    Skipped(SkipReason),
}

/// Why a counter reading produced no sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// First reading of this unit, or the previous one was unreadable.
    NoPrevious,
    /// The epoch marker changed since the previous reading.
    EpochChanged,
    /// The timestamp did not advance past the previous reading.
    NotAdvanced,
    /// The counter decreased.
    CounterReset,
}

/// Summary of one consolidation window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConsolidationWindow {
    /// Number of records in the window.
    pub count: u32,
    /// Lower bound used for time weighting.
    pub start_ts: u32,
    /// Timestamp of the newest record in the window.
    pub last_ts: u32,
    /// Combined summary of the window's records.
    pub summary: Sample,
}

impl ConsolidationWindow {
    /// Returns true if the window is full enough to roll up.
    pub fn is_full(&self) -> bool {
        self.count >= CASCADE_THRESHOLD
    }
}

/// Records a reading for `unit` at `ts`.
///
/// For counters (`is_counter`), the stored observation is
/// `(value - last.val) / (ts - last.ts)`. It is computed only when the
/// previous reading exists, shares the `since` epoch, is strictly older and
/// is not larger. Otherwise the reading is skipped. The last-value record is
/// overwritten in every case.
///
/// # Errors
///
/// Returns `StorageWriteFailed` if any write fails. Cascade levels already
/// written stay written.
pub fn put_value<S: OrderedStore>(
    store: &mut S,
    since: u32,
    ts: u32,
    unit: u16,
    value: f64,
    is_counter: bool,
) -> Result<Ingest> {
    debug!(since, ts, unit, value, is_counter, "put_value");

    let observation = if is_counter {
        let previous = read_last(store, unit)?;
        write_last(store, unit, LastValue { since, ts, val: value })?;

        match rate(previous, since, ts, value) {
            Ok(rate) => rate,
            Err(reason) => {
                debug!(unit, ts, ?reason, "counter reading skipped");
                return Ok(Ingest::Skipped(reason));
            }
        }
    } else {
        value
    };

    let levels_written = insert(store, unit, 0, ts, Sample::raw(observation))?;
    Ok(Ingest::Stored {
        value: observation,
        levels_written,
    })
}

fn rate(
    previous: Option<LastValue>,
    since: u32,
    ts: u32,
    value: f64,
) -> std::result::Result<f64, SkipReason> {
    let last = previous.ok_or(SkipReason::NoPrevious)?;
    if last.since != since {
        return Err(SkipReason::EpochChanged);
    }
    if last.ts >= ts {
        return Err(SkipReason::NotAdvanced);
    }
    // Also drops legitimate decreases; stored data depends on this guard.
    if last.val > value {
        return Err(SkipReason::CounterReset);
    }
    Ok((value - last.val) / f64::from(ts - last.ts))
}

/// Reads the last-value record of `unit`. A corrupt record reads as missing.
///
/// # Errors
///
/// Returns `StorageReadFailed` if the store cannot be read.
pub fn read_last<S: OrderedStore>(store: &S, unit: u16) -> Result<Option<LastValue>> {
    let Some(bytes) = store.get(&Key::last_value(unit).encode())? else {
        return Ok(None);
    };
    match LastValue::decode(&bytes) {
        Ok(last) => Ok(Some(last)),
        Err(e) => {
            warn!(unit, error = %e, "ignoring unreadable last-value record");
            Ok(None)
        }
    }
}

fn write_last<S: OrderedStore>(store: &mut S, unit: u16, last: LastValue) -> Result<()> {
    store.put(&Key::last_value(unit).encode(), &last.encode())
}

/// Writes `sample` at `(unit, level, ts)` and runs the cascade above it.
///
/// Returns the number of levels written.
fn insert<S: OrderedStore>(
    store: &mut S,
    unit: u16,
    level: u16,
    ts: u32,
    sample: Sample,
) -> Result<u16> {
    let mut level = level;
    let mut sample = sample;
    let mut written = 0;

    loop {
        store.put(&Key::new(unit, level, ts).encode(), &sample.encode())?;
        written += 1;

        match roll_up(store, unit, level)? {
            Some(window) => {
                debug!(
                    unit,
                    from_level = level,
                    ts,
                    count = window.count,
                    "cascading to next level"
                );
                sample = window.summary;
                level += 1;
            }
            None => return Ok(written),
        }
    }
}

/// Returns the full consolidation window of `level`, if there is one.
fn roll_up<S: OrderedStore>(
    store: &S,
    unit: u16,
    level: u16,
) -> Result<Option<ConsolidationWindow>> {
    let Some(next_level) = level.checked_add(1).filter(|l| *l < SENTINEL_LEVEL) else {
        return Ok(None);
    };
    let boundary = highest_ts(store, unit, next_level)?;
    let window = consolidation_window(store, unit, level, boundary)?;
    trace!(unit, level, boundary, ?window, "consolidation window");
    Ok(window.filter(ConsolidationWindow::is_full))
}

/// Re-runs the cascade check above an existing level `level` record at `ts`.
///
/// A window that already rolled up starts at the level `L+1` record written
/// for it, so repeated checks without new inserts write nothing.
///
/// # Errors
///
/// Returns a storage error if the store cannot be read or written.
pub fn cascade<S: OrderedStore>(
    store: &mut S,
    unit: u16,
    level: u16,
    ts: u32,
) -> Result<u16> {
    match roll_up(store, unit, level)? {
        Some(window) => insert(store, unit, level + 1, ts, window.summary),
        None => Ok(0),
    }
}

/// Newest timestamp stored at `(unit, level)`, or 0 if the level is empty.
///
/// # Errors
///
/// Returns `StorageReadFailed` if the store cannot be read.
pub fn highest_ts<S: OrderedStore>(store: &S, unit: u16, level: u16) -> Result<u32> {
    let probe = Key::new(unit, level, u32::MAX).encode();
    let Some((key, _)) = store.seek(&probe, SeekMode::ExactOrPrev)? else {
        return Ok(0);
    };
    match Key::decode(&key) {
        Ok(key) if key.unit == unit && key.level == level => Ok(key.ts),
        _ => Ok(0),
    }
}

/// Highest sample level present for `unit`, or 0 if it has none.
///
/// # Errors
///
/// Returns `StorageReadFailed` if the store cannot be read.
pub fn highest_level<S: OrderedStore>(store: &S, unit: u16) -> Result<u16> {
    let Some((key, _)) = store.prev(&Key::last_value(unit).encode())? else {
        return Ok(0);
    };
    match Key::decode(&key) {
        Ok(key) if key.unit == unit => Ok(key.level),
        _ => Ok(0),
    }
}

/// Summarizes the records of `(unit, level)` with timestamp `>= boundary`.
///
/// The average weights each record's `avg` by the time elapsed since the
/// record before it. The first record's predecessor is the window's lower
/// bound: `boundary`, or the first record's own timestamp when `boundary`
/// is 0. A corrupt record ends the window.
///
/// Each record is weighted by the interval that ends at it, not the one that
/// starts at it. This differs from the resampler, which treats a record as
/// covering `[ts, newer)`, and from older roll-ups that weighted the
/// preceding record. Stored consolidated averages follow this rule.
///
/// Returns `None` if the window is empty.
///
/// # Errors
///
/// Returns `StorageReadFailed` if the store cannot be read.
pub fn consolidation_window<S: OrderedStore>(
    store: &S,
    unit: u16,
    level: u16,
    boundary: u32,
) -> Result<Option<ConsolidationWindow>> {
    let start = Key::new(unit, level, boundary).encode();

    let mut count = 0u32;
    let mut min = f64::MAX;
    let mut max = f64::MIN;
    let mut weighted = 0.0;
    let mut plain = 0.0;
    let mut start_ts = boundary;
    let mut prev_ts = boundary;

    for entry in store.cursor(&start, SeekMode::ExactOrNext) {
        let (key, value) = entry?;
        let Ok(key) = Key::decode(&key) else { break };
        if key.unit != unit || key.level != level {
            break;
        }
        let sample = match Sample::decode(level, &value) {
            Ok(sample) => sample,
            Err(e) => {
                warn!(unit, level, ts = key.ts, error = %e, "consolidation window cut short");
                break;
            }
        };

        if count == 0 && boundary == 0 {
            start_ts = key.ts;
            prev_ts = key.ts;
        }
        min = min.min(sample.min);
        max = max.max(sample.max);
        weighted += sample.avg * f64::from(key.ts - prev_ts);
        plain += sample.avg;
        prev_ts = key.ts;
        count += 1;
    }

    if count == 0 {
        return Ok(None);
    }

    let span = prev_ts - start_ts;
    let avg = if span > 0 {
        weighted / f64::from(span)
    } else {
        plain / f64::from(count)
    };

    Ok(Some(ConsolidationWindow {
        count,
        start_ts,
        last_ts: prev_ts,
        summary: Sample { min, avg, max },
    }))
}
