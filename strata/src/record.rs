//! Fixed-width key and record codec.
//!
//! Every record is stored under an 8-byte composite key. All integers and
//! floats are big-endian so that the store's unsigned byte-wise ordering
//! sorts keys by unit, then level, then timestamp.
//!
//! # Layout
//!
//! ```text
//! key         [0..2) unit   [2..4) level   [4..8) ts          (8 bytes)
//! sample      [0..8) min    [8..16) avg    [16..24) max       (24 bytes)
//! last value  [0..4) since  [4..8) ts      [8..16) val        (16 bytes)
//! ```
//!
//! Level [`SENTINEL_LEVEL`] with timestamp 0 holds the per-unit
//! [`LastValue`]. Every other level holds [`Sample`]s.

use serde::{Deserialize, Serialize};

use crate::error::{RecordError, Result};

/// Encoded key length in bytes.
pub const KEY_LEN: usize = 8;

/// Encoded sample length in bytes.
pub const SAMPLE_LEN: usize = 24;

/// Encoded last-value length in bytes.
pub const LAST_VALUE_LEN: usize = 16;

/// Level reserved for the per-unit last-value record.
pub const SENTINEL_LEVEL: u16 = u16::MAX;

/// Composite record key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key {
    /// Measured unit.
    pub unit: u16,
    /// Resolution level, 0 = raw.
    pub level: u16,
    /// Timestamp in seconds since the Unix epoch.
    pub ts: u32,
}

impl Key {
    /// Creates a key.
    pub const fn new(unit: u16, level: u16, ts: u32) -> Self {
        Self { unit, level, ts }
    }

    /// The key of a unit's last-value record.
    pub const fn last_value(unit: u16) -> Self {
        Self::new(unit, SENTINEL_LEVEL, 0)
    }

    /// Returns true if this key addresses a last-value record.
    pub const fn is_sentinel(&self) -> bool {
        self.level == SENTINEL_LEVEL
    }

    /// Encodes the key to its big-endian byte form.
    pub fn encode(&self) -> [u8; KEY_LEN] {
        let mut buf = [0u8; KEY_LEN];
        buf[0..2].copy_from_slice(&self.unit.to_be_bytes());
        buf[2..4].copy_from_slice(&self.level.to_be_bytes());
        buf[4..8].copy_from_slice(&self.ts.to_be_bytes());
        buf
    }

    /// Decodes a key.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::MalformedKey`] if `bytes` is not exactly
    /// [`KEY_LEN`] long.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let bytes: &[u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|_| RecordError::MalformedKey { len: bytes.len() })?;
        Ok(Self {
            unit: u16::from_be_bytes([bytes[0], bytes[1]]),
            level: u16::from_be_bytes([bytes[2], bytes[3]]),
            ts: u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        })
    }

    /// Expected value length for records stored under this key.
    pub const fn value_len(&self) -> usize {
        if self.is_sentinel() {
            LAST_VALUE_LEN
        } else {
            SAMPLE_LEN
        }
    }
}

/// Which field of a [`Sample`] a query reads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    /// Smallest value in the covered span.
    Min,
    /// Time-weighted mean over the covered span.
    #[default]
    Avg,
    /// Largest value in the covered span.
    Max,
}

impl std::str::FromStr for ValueKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "min" => Ok(Self::Min),
            "avg" => Ok(Self::Avg),
            "max" => Ok(Self::Max),
            other => Err(format!("unknown value kind '{other}': use min, avg or max")),
        }
    }
}

/// A min/avg/max summary at some level.
///
/// At level 0 all three fields hold the same raw reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Minimum.
    pub min: f64,
    /// Time-weighted average.
    pub avg: f64,
    /// Maximum.
    pub max: f64,
}

impl Sample {
    /// A raw reading with `min == avg == max`.
    pub const fn raw(value: f64) -> Self {
        Self {
            min: value,
            avg: value,
            max: value,
        }
    }

    /// Returns the field selected by `kind`.
    pub const fn get(&self, kind: ValueKind) -> f64 {
        match kind {
            ValueKind::Min => self.min,
            ValueKind::Avg => self.avg,
            ValueKind::Max => self.max,
        }
    }

    /// Encodes the sample.
    pub fn encode(&self) -> [u8; SAMPLE_LEN] {
        let mut buf = [0u8; SAMPLE_LEN];
        buf[0..8].copy_from_slice(&self.min.to_be_bytes());
        buf[8..16].copy_from_slice(&self.avg.to_be_bytes());
        buf[16..24].copy_from_slice(&self.max.to_be_bytes());
        buf
    }

    /// Decodes a sample stored at `level`.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::MalformedValue`] if `bytes` is not exactly
    /// [`SAMPLE_LEN`] long.
    pub fn decode(level: u16, bytes: &[u8]) -> Result<Self> {
        if bytes.len() != SAMPLE_LEN {
            return Err(RecordError::MalformedValue {
                level,
                expected: SAMPLE_LEN,
                found: bytes.len(),
            }
            .into());
        }
        Ok(Self {
            min: f64_at(bytes, 0),
            avg: f64_at(bytes, 8),
            max: f64_at(bytes, 16),
        })
    }
}

/// The previous raw input of a counter unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LastValue {
    /// Epoch marker the counter was read under.
    pub since: u32,
    /// Timestamp of the reading.
    pub ts: u32,
    /// Raw counter value.
    pub val: f64,
}

impl LastValue {
    /// Encodes the record.
    pub fn encode(&self) -> [u8; LAST_VALUE_LEN] {
        let mut buf = [0u8; LAST_VALUE_LEN];
        buf[0..4].copy_from_slice(&self.since.to_be_bytes());
        buf[4..8].copy_from_slice(&self.ts.to_be_bytes());
        buf[8..16].copy_from_slice(&self.val.to_be_bytes());
        buf
    }

    /// Decodes the record.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::MalformedValue`] if `bytes` is not exactly
    /// [`LAST_VALUE_LEN`] long.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != LAST_VALUE_LEN {
            return Err(RecordError::MalformedValue {
                level: SENTINEL_LEVEL,
                expected: LAST_VALUE_LEN,
                found: bytes.len(),
            }
            .into());
        }
        Ok(Self {
            since: u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            ts: u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            val: f64_at(bytes, 8),
        })
    }
}

/// A decoded record of either shape.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Record {
    /// A level sample.
    Sample(Sample),
    /// A last-value sentinel.
    Last(LastValue),
}

impl Record {
    /// Decodes a raw key/value pair, choosing the value shape from the key level.
    ///
    /// # Errors
    ///
    /// Returns a [`RecordError`] if either part has the wrong length.
    pub fn decode(key: &[u8], value: &[u8]) -> Result<(Key, Self)> {
        let key = Key::decode(key)?;
        let record = if key.is_sentinel() {
            Self::Last(LastValue::decode(value)?)
        } else {
            Self::Sample(Sample::decode(key.level, value)?)
        };
        Ok((key, record))
    }
}

fn f64_at(bytes: &[u8], offset: usize) -> f64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[offset..offset + 8]);
    f64::from_be_bytes(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StrataError;

    #[test]
    fn test_key_sorts_by_unit_level_ts() {
        let keys = [
            Key::new(1, 0, 500),
            Key::new(1, 0, 70_000),
            Key::new(1, 1, 10),
            Key::new(1, SENTINEL_LEVEL, 0),
            Key::new(2, 0, 0),
            Key::new(256, 0, 0),
        ];
        for pair in keys.windows(2) {
            assert!(pair[0].encode() < pair[1].encode(), "{:?} !< {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_key_layout_is_big_endian() {
        let key = Key::new(0x0102, 0x0304, 0x0506_0708);
        assert_eq!(key.encode(), [1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(Key::decode(&key.encode()).unwrap(), key);
    }

    #[test]
    fn test_sample_layout() {
        let sample = Sample { min: 1.0, avg: 2.5, max: -3.0 };
        let bytes = sample.encode();
        assert_eq!(&bytes[0..8], &1.0f64.to_be_bytes());
        assert_eq!(&bytes[16..24], &(-3.0f64).to_be_bytes());
        assert_eq!(Sample::decode(0, &bytes).unwrap(), sample);
    }

    #[test]
    fn test_last_value_layout() {
        let last = LastValue { since: 7, ts: 1_700_000_000, val: 12345.5 };
        let bytes = last.encode();
        assert_eq!(&bytes[0..4], &[0, 0, 0, 7]);
        assert_eq!(LastValue::decode(&bytes).unwrap(), last);
    }

    #[test]
    fn test_wrong_lengths_are_malformed() {
        assert!(matches!(
            Key::decode(&[0u8; 7]),
            Err(StrataError::Record(RecordError::MalformedKey { len: 7 }))
        ));
        assert!(matches!(
            Sample::decode(3, &[0u8; 16]),
            Err(StrataError::Record(RecordError::MalformedValue { level: 3, expected: 24, found: 16 }))
        ));
        assert!(LastValue::decode(&[0u8; 24]).is_err());
    }

    #[test]
    fn test_record_decode_picks_shape_from_level() {
        let sentinel = Key::last_value(4).encode();
        let last = LastValue { since: 1, ts: 2, val: 3.0 };
        assert_eq!(
            Record::decode(&sentinel, &last.encode()).unwrap().1,
            Record::Last(last)
        );

        // A sample-sized payload under the sentinel key is corrupt.
        assert!(Record::decode(&sentinel, &Sample::raw(1.0).encode()).is_err());
    }

    #[test]
    fn test_value_kind_parse() {
        assert_eq!("MAX".parse::<ValueKind>().unwrap(), ValueKind::Max);
        assert!("median".parse::<ValueKind>().is_err());
    }
}
