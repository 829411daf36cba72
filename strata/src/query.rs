//! Range queries: level selection and resampling onto fixed-width buckets.
//!
//! A query asks for `out.len()` buckets evenly covering `[beg, end)`. The
//! resampler first picks the coarsest level that still has enough records in
//! the range, then walks that level backward from `end` and spreads every
//! record over the buckets its span overlaps.
//!
//! # Spans
//!
//! Walking backward, each record covers `[ts, newer)`, where `newer` is the
//! timestamp of the record visited just before it, or `end` for the first
//! one. A record is a box over its span: for [`ValueKind::Avg`] each bucket
//! receives `value * overlap / bucket_width`, for min and max each bucket
//! with positive overlap takes the running extremum.
//!
//! ```text
//! records        ●──────────●─────●───────────────● end
//! buckets   |  0  |  1  |  2  |  3  |  4  |  5  |
//! ```
//!
//! # Example Usage
//!
//! ```rust
//! # use strata::kv::MemStore;
//! # use strata::ingest::put_value;
//! # use strata::query::get_values;
//! # use strata::record::ValueKind;
//! let mut kv = MemStore::new();
//! for i in 0..=10u32 {
//!     put_value(&mut kv, 0, 100 + i * 100, 1, f64::from(i), false)?;
//! }
//! let mut out = [0.0; 10];
//! let result = get_values(&kv, 1, 100, 1100, ValueKind::Avg, &mut out)?;
//! assert_eq!(result.level_used, 0);
//! assert_eq!(out[3], 3.0);
//! # Ok::<(), strata::StrataError>(())
//! ```

use tracing::{debug, trace, warn};

use crate::error::{QueryError, Result};
use crate::ingest::highest_level;
use crate::kv::{OrderedStore, SeekMode};
use crate::record::{Key, Sample, ValueKind};

/// Extra records a coarser level must have beyond the bucket count to be
/// chosen. Keeps small range changes from flipping levels.
pub const LEVEL_SLACK: usize = 32;

/// Metadata about an executed range query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resampled {
    /// The level the buckets were filled from.
    pub level_used: u16,
    /// Number of records spread over the buckets.
    pub records: usize,
}

/// Picks the level to answer a query for `buckets` buckets over `[beg, end]`.
///
/// Starts from the unit's highest level and walks down until a level holds
/// at least `buckets + LEVEL_SLACK` records in the range. Falls back to
/// level 0.
///
/// # Errors
///
/// Returns `StorageReadFailed` if the store cannot be read.
pub fn select_level<S: OrderedStore>(
    store: &S,
    unit: u16,
    beg: u32,
    end: u32,
    buckets: usize,
) -> Result<u16> {
    let wanted = buckets.saturating_add(LEVEL_SLACK);
    let mut level = highest_level(store, unit)?;

    while level > 0 {
        let count = count_in_range(store, unit, level, beg, end, wanted)?;
        trace!(unit, level, count, wanted, "level candidate");
        if count >= wanted {
            break;
        }
        level -= 1;
    }
    Ok(level)
}

/// Counts records of `(unit, level)` within `[beg, end]`, stopping at `limit`.
fn count_in_range<S: OrderedStore>(
    store: &S,
    unit: u16,
    level: u16,
    beg: u32,
    end: u32,
    limit: usize,
) -> Result<usize> {
    let mut count = 0;
    for entry in store.cursor(&Key::new(unit, level, beg).encode(), SeekMode::ExactOrNext) {
        let (key, _) = entry?;
        let Ok(key) = Key::decode(&key) else { break };
        if key.unit != unit || key.level != level || key.ts > end {
            break;
        }
        count += 1;
        if count >= limit {
            break;
        }
    }
    Ok(count)
}

/// Length of the intersection of `[a0, a1)` and `[b0, b1)`.
fn overlap(a0: f64, a1: f64, b0: f64, b1: f64) -> f64 {
    (a1.min(b1) - a0.max(b0)).max(0.0)
}

/// Spreads one record with span `[ts, newer)` over the buckets of `out`.
///
/// `out` covers `[beg, end)` in equal slices. Buckets must already hold the
/// initial value for `kind`. Timestamps outside `[beg, end]` are clamped.
#[allow(clippy::cast_precision_loss)] // Bucket counts are far below 2^52
pub fn spread(out: &mut [f64], kind: ValueKind, beg: u32, end: u32, ts: u32, newer: u32, value: f64) {
    let n = out.len();
    if n == 0 || end <= beg {
        return;
    }
    let ts = ts.clamp(beg, end);
    let newer = newer.clamp(beg, end);
    if newer <= ts {
        return;
    }

    let range = u64::from(end - beg);
    let index = |t: u32| {
        let i = u64::from(t - beg) * n as u64 / range;
        usize::try_from(i).unwrap_or(usize::MAX).min(n - 1)
    };
    let first = index(ts);
    let last = index(newer);

    let width = f64::from(end - beg) / n as f64;
    let span_lo = f64::from(ts - beg);
    let span_hi = f64::from(newer - beg);

    for (i, bucket) in out.iter_mut().enumerate().take(last + 1).skip(first) {
        let lo = i as f64 * width;
        let f = overlap(span_lo, span_hi, lo, lo + width);
        if f <= 0.0 {
            continue;
        }
        match kind {
            ValueKind::Avg => *bucket += value * (f / width),
            ValueKind::Max => *bucket = bucket.max(value),
            ValueKind::Min => *bucket = bucket.min(value),
        }
    }
}

const fn initial(kind: ValueKind) -> f64 {
    match kind {
        ValueKind::Avg => 0.0,
        ValueKind::Max => f64::MIN,
        ValueKind::Min => f64::MAX,
    }
}

/// Fills `out` with `kind` values of `unit` resampled over `[beg, end)`.
///
/// Buckets that receive no data are 0. A corrupt record ends the walk, so
/// older buckets stay empty rather than mixing in unreadable data.
///
/// # Errors
///
/// Returns [`QueryError::InvalidRange`] if `beg >= end` or `out` is empty,
/// and `StorageReadFailed` if the store cannot be read.
pub fn get_values<S: OrderedStore>(
    store: &S,
    unit: u16,
    beg: u32,
    end: u32,
    kind: ValueKind,
    out: &mut [f64],
) -> Result<Resampled> {
    if beg >= end || out.is_empty() {
        return Err(QueryError::InvalidRange {
            beg,
            end,
            buckets: out.len(),
        }
        .into());
    }

    out.fill(initial(kind));
    let level = select_level(store, unit, beg, end, out.len())?;
    debug!(unit, beg, end, ?kind, buckets = out.len(), level, "get_values");

    let mut newer = end;
    let mut records = 0;
    for entry in store.cursor(&Key::new(unit, level, end).encode(), SeekMode::ExactOrPrev) {
        let (key, value) = entry?;
        let Ok(key) = Key::decode(&key) else { break };
        if key.unit != unit || key.level != level || key.ts < beg {
            break;
        }
        let sample = match Sample::decode(level, &value) {
            Ok(sample) => sample,
            Err(e) => {
                warn!(unit, level, ts = key.ts, error = %e, "resampling stopped at corrupt record");
                break;
            }
        };

        spread(out, kind, beg, end, key.ts, newer, sample.get(kind));
        newer = key.ts;
        records += 1;
    }

    for bucket in out.iter_mut() {
        if *bucket <= f64::MIN || *bucket >= f64::MAX {
            *bucket = 0.0;
        }
    }

    Ok(Resampled {
        level_used: level,
        records,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StrataError;
    use crate::ingest::put_value;
    use crate::kv::MemStore;

    fn put_sample(store: &mut MemStore, unit: u16, level: u16, ts: u32, sample: Sample) {
        store.put(&Key::new(unit, level, ts).encode(), &sample.encode()).unwrap();
    }

    #[test]
    fn test_invalid_range_rejected() {
        let store = MemStore::new();
        let mut out = [0.0; 4];
        for (beg, end) in [(100, 100), (200, 100)] {
            assert!(matches!(
                get_values(&store, 1, beg, end, ValueKind::Avg, &mut out),
                Err(StrataError::Query(QueryError::InvalidRange { .. }))
            ));
        }
        assert!(get_values(&store, 1, 0, 10, ValueKind::Avg, &mut []).is_err());
    }

    #[test]
    fn test_empty_store_gives_zero_buckets() {
        let store = MemStore::new();
        for kind in [ValueKind::Min, ValueKind::Avg, ValueKind::Max] {
            let mut out = [7.0; 5];
            let result = get_values(&store, 1, 0, 500, kind, &mut out).unwrap();
            assert_eq!(result, Resampled { level_used: 0, records: 0 });
            assert_eq!(out, [0.0; 5]);
        }
    }

    #[test]
    fn test_full_cover_has_unit_weight() {
        let mut out = [0.0; 4];
        // One record spanning all of bucket 1 and more.
        spread(&mut out, ValueKind::Avg, 0, 400, 50, 250, 8.0);
        assert_eq!(out[1], 8.0);
        assert_eq!(out[0], 4.0);
        assert_eq!(out[2], 4.0);
        assert_eq!(out[3], 0.0);
    }

    #[test]
    fn test_straddle_splits_half_and_half() {
        let mut out = [0.0; 4];
        // Span [150, 250) straddles buckets 1 and 2 equally.
        spread(&mut out, ValueKind::Avg, 0, 400, 150, 250, 6.0);
        assert_eq!(out, [0.0, 3.0, 3.0, 0.0]);
    }

    #[test]
    fn test_extremes_ignore_overlap_size() {
        let mut max = [f64::MIN; 4];
        spread(&mut max, ValueKind::Max, 0, 400, 390, 400, 5.0);
        spread(&mut max, ValueKind::Max, 0, 400, 300, 390, 9.0);
        assert_eq!(max[3], 9.0);
        assert_eq!(max[2], f64::MIN);

        let mut min = [f64::MAX; 4];
        spread(&mut min, ValueKind::Min, 0, 400, 0, 101, -1.0);
        assert_eq!(min[0], -1.0);
        assert_eq!(min[1], -1.0);
        assert_eq!(min[2], f64::MAX);
    }

    #[test]
    fn test_span_ending_at_end_stays_in_bounds() {
        let mut out = [0.0; 3];
        spread(&mut out, ValueKind::Avg, 0, 300, 200, 300, 3.0);
        assert_eq!(out, [0.0, 0.0, 3.0]);
        // Zero-width and out-of-range spans are ignored.
        spread(&mut out, ValueKind::Avg, 0, 300, 300, 300, 100.0);
        spread(&mut out, ValueKind::Avg, 0, 300, 400, 500, 100.0);
        assert_eq!(out, [0.0, 0.0, 3.0]);
    }

    #[test]
    fn test_values_reproduced_per_slot() {
        let mut store = MemStore::new();
        for i in 0..=10u32 {
            put_value(&mut store, 0, 100 + i * 100, 1, f64::from(i), false).unwrap();
        }
        let mut out = [0.0; 10];
        let result = get_values(&store, 1, 100, 1100, ValueKind::Avg, &mut out).unwrap();
        assert_eq!(result.level_used, 0);
        assert_eq!(result.records, 11);
        for (i, value) in out.iter().enumerate() {
            assert!((value - i as f64).abs() < 1e-9, "bucket {i}: {value}");
        }
    }

    #[test]
    fn test_record_before_range_is_not_spread() {
        let mut store = MemStore::new();
        put_sample(&mut store, 1, 0, 50, Sample::raw(99.0));
        put_sample(&mut store, 1, 0, 100, Sample::raw(1.0));
        let mut out = [0.0; 2];
        let result = get_values(&store, 1, 100, 200, ValueKind::Max, &mut out).unwrap();
        assert_eq!(result.records, 1);
        assert_eq!(out, [1.0, 1.0]);
    }

    #[test]
    fn test_corrupt_record_ends_walk() {
        let mut store = MemStore::new();
        put_sample(&mut store, 1, 0, 100, Sample::raw(1.0));
        store.put(&Key::new(1, 0, 200).encode(), &[0u8; 3]).unwrap();
        put_sample(&mut store, 1, 0, 300, Sample::raw(3.0));
        let mut out = [0.0; 4];
        let result = get_values(&store, 1, 0, 400, ValueKind::Avg, &mut out).unwrap();
        assert_eq!(result.records, 1);
        assert_eq!(out, [0.0, 0.0, 0.0, 3.0]);
    }

    #[test]
    fn test_other_units_do_not_leak() {
        let mut store = MemStore::new();
        put_sample(&mut store, 1, 0, 100, Sample::raw(1.0));
        put_sample(&mut store, 2, 0, 150, Sample::raw(50.0));
        let mut out = [0.0; 2];
        get_values(&store, 2, 200, 400, ValueKind::Max, &mut out).unwrap();
        assert_eq!(out, [0.0, 0.0]);
    }

    #[test]
    fn test_select_level_needs_slack() {
        let mut store = MemStore::new();
        for ts in 0..100u32 {
            put_sample(&mut store, 1, 0, ts, Sample::raw(1.0));
        }
        for ts in 0..40u32 {
            put_sample(&mut store, 1, 1, ts * 2, Sample::raw(1.0));
        }
        // 40 level-1 records: enough for 8 buckets, not for 9.
        assert_eq!(select_level(&store, 1, 0, 100, 8).unwrap(), 1);
        assert_eq!(select_level(&store, 1, 0, 100, 9).unwrap(), 0);
        // Records outside the range do not count.
        assert_eq!(select_level(&store, 1, 10, 100, 8).unwrap(), 0);
    }

    #[test]
    fn test_coarse_level_answers_long_range() {
        let mut store = MemStore::new();
        for i in 0..2_000u32 {
            put_value(&mut store, 0, i * 10, 3, f64::from(i % 7), false).unwrap();
        }
        let mut out = [0.0; 8];
        let result = get_values(&store, 3, 0, 20_000, ValueKind::Max, &mut out).unwrap();
        // Levels 2 and 3 exist but are too sparse for 8 buckets.
        assert_eq!(highest_level(&store, 3).unwrap(), 3);
        assert_eq!(result.level_used, 1);
        assert!(out.iter().all(|v| *v == 6.0));
    }
}
