//! Record-by-record store copy.
//!
//! Used to compact or back up a store. Every record whose value length
//! matches its key's level is written verbatim to the destination; anything
//! else is counted and left behind. The copy is not atomic: if it fails
//! halfway, the destination keeps what was already written.

use tracing::{info, warn};

use crate::error::Result;
use crate::kv::OrderedStore;
use crate::record::{KEY_LEN, Key};

/// Counters from one copy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyStats {
    /// Records written to the destination.
    pub copied: u64,
    /// Records skipped as malformed.
    pub skipped: u64,
}

/// Copies every well-formed record of `src` into `dest`.
///
/// `dest` is not synced; callers decide when to make the copy durable.
///
/// # Errors
///
/// Returns `StorageReadFailed` if `src` cannot be scanned and
/// `StorageWriteFailed` if a write to `dest` fails. Both abort the copy.
pub fn copy_store<S: OrderedStore, D: OrderedStore>(src: &S, dest: &mut D) -> Result<CopyStats> {
    let mut stats = CopyStats::default();
    let mut position = src.first()?;

    while let Some((key, value)) = position {
        match Key::decode(&key) {
            Ok(k) if value.len() == k.value_len() => {
                dest.put(&key, &value)?;
                stats.copied += 1;
            }
            Ok(k) => {
                warn!(key = ?k, len = value.len(), expected = k.value_len(), "skipping malformed value");
                stats.skipped += 1;
            }
            Err(_) => {
                warn!(len = key.len(), expected = KEY_LEN, "skipping malformed key");
                stats.skipped += 1;
            }
        }
        position = src.next(&key)?;
    }

    info!(copied = stats.copied, skipped = stats.skipped, "copy complete");
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::{Entry, MemStore, SeekMode};
    use crate::record::{LastValue, Sample};

    fn entries(store: &MemStore) -> Vec<Entry> {
        store.cursor(&[], SeekMode::ExactOrNext).map(|e| e.unwrap()).collect()
    }

    #[test]
    fn test_clean_store_copies_byte_for_byte() {
        let mut src = MemStore::new();
        for ts in [10, 20, 30] {
            src.put(&Key::new(1, 0, ts).encode(), &Sample::raw(f64::from(ts)).encode())
                .unwrap();
        }
        src.put(&Key::new(1, 1, 30).encode(), &Sample { min: 1.0, avg: 2.0, max: 3.0 }.encode())
            .unwrap();
        let last = LastValue { since: 4, ts: 30, val: 9.0 };
        src.put(&Key::last_value(1).encode(), &last.encode()).unwrap();

        let mut dest = MemStore::new();
        let stats = copy_store(&src, &mut dest).unwrap();
        assert_eq!(stats, CopyStats { copied: 5, skipped: 0 });
        assert_eq!(entries(&src), entries(&dest));
    }

    #[test]
    fn test_malformed_records_skipped() {
        let mut src = MemStore::new();
        src.put(b"bad", &Sample::raw(1.0).encode()).unwrap();
        src.put(&Key::new(1, 0, 10).encode(), &Sample::raw(1.0).encode()).unwrap();
        src.put(&Key::new(1, 0, 20).encode(), &[0u8; 16]).unwrap();
        src.put(&Key::last_value(1).encode(), &Sample::raw(1.0).encode()).unwrap();

        let mut dest = MemStore::new();
        let stats = copy_store(&src, &mut dest).unwrap();
        assert_eq!(stats, CopyStats { copied: 1, skipped: 3 });
        assert_eq!(dest.len(), 1);
        assert!(dest.get(&Key::new(1, 0, 10).encode()).unwrap().is_some());
    }

    #[test]
    fn test_empty_source() {
        let src = MemStore::new();
        let mut dest = MemStore::new();
        assert_eq!(copy_store(&src, &mut dest).unwrap(), CopyStats::default());
        assert!(dest.is_empty());
    }
}
