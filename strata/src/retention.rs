//! Retention pruning.
//!
//! Raw samples and last-value records are kept for `days_detail` days,
//! consolidated samples for `days_compressed` days. Pruning is one forward
//! scan over the whole store that deletes as it goes. Records that cannot be
//! decoded are deleted too, so a scan never aborts on the corruption it is
//! cleaning up. Only a failed delete stops it.

use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::kv::OrderedStore;
use crate::record::{Key, LastValue};

/// Seconds per retention day.
pub const SECS_PER_DAY: u64 = 86_400;

/// Counters from one pruning pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TruncateStats {
    /// Records visited.
    pub seen: u64,
    /// Records deleted, malformed ones included.
    pub deleted: u64,
    /// Records deleted because they could not be decoded.
    pub malformed: u64,
}

/// Prunes expired records relative to the current wall-clock time.
///
/// # Errors
///
/// Returns `StorageReadFailed` or `StorageWriteFailed` if the scan or a
/// delete fails. Deletions made before the failure stay applied.
pub fn truncate<S: OrderedStore>(
    store: &mut S,
    days_detail: u32,
    days_compressed: u32,
) -> Result<TruncateStats> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs());
    truncate_at(store, now, days_detail, days_compressed)
}

/// Prunes expired records relative to `now` (seconds since the epoch).
///
/// # Errors
///
/// See [`truncate`].
pub fn truncate_at<S: OrderedStore>(
    store: &mut S,
    now: u64,
    days_detail: u32,
    days_compressed: u32,
) -> Result<TruncateStats> {
    let detail_cutoff = now.saturating_sub(u64::from(days_detail) * SECS_PER_DAY);
    let compressed_cutoff = now.saturating_sub(u64::from(days_compressed) * SECS_PER_DAY);
    debug!(now, detail_cutoff, compressed_cutoff, "truncate");

    let mut stats = TruncateStats::default();
    let mut position = store.first()?;

    while let Some((key, value)) = position {
        stats.seen += 1;

        let verdict = match Key::decode(&key) {
            Err(e) => Verdict::Malformed(e.to_string()),
            Ok(k) if k.is_sentinel() => match LastValue::decode(&value) {
                Err(e) => Verdict::Malformed(e.to_string()),
                Ok(last) => Verdict::expired(u64::from(last.ts) < detail_cutoff),
            },
            Ok(k) if value.len() != k.value_len() => Verdict::Malformed(format!(
                "sample at level {} is {} bytes",
                k.level,
                value.len()
            )),
            Ok(k) => {
                let cutoff = if k.level == 0 {
                    detail_cutoff
                } else {
                    compressed_cutoff
                };
                Verdict::expired(u64::from(k.ts) < cutoff)
            }
        };

        match verdict {
            Verdict::Keep => {}
            Verdict::Expired => {
                store.delete(&key)?;
                stats.deleted += 1;
            }
            Verdict::Malformed(reason) => {
                warn!(key = ?key, %reason, "deleting malformed record");
                store.delete(&key)?;
                stats.deleted += 1;
                stats.malformed += 1;
            }
        }

        position = store.next(&key)?;
    }

    info!(
        seen = stats.seen,
        deleted = stats.deleted,
        malformed = stats.malformed,
        "truncate complete"
    );
    Ok(stats)
}

enum Verdict {
    Keep,
    Expired,
    Malformed(String),
}

impl Verdict {
    fn expired(expired: bool) -> Self {
        if expired { Self::Expired } else { Self::Keep }
    }
}
