//! Error types for the strata time-series store.

use thiserror::Error;

/// Boxed error produced by an ordered-store backend.
///
/// Backends differ in their native error types, so the engine carries them
/// opaquely and classifies them by the operation that failed.
pub type BackendError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The main error type for all strata operations.
#[derive(Error, Debug)]
pub enum StrataError {
    /// The underlying ordered store failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A stored record had the wrong shape for its slot.
    #[error("record error: {0}")]
    Record(#[from] RecordError),

    /// A range query was rejected.
    #[error("query error: {0}")]
    Query(#[from] QueryError),

    /// The configuration file could not be loaded or is invalid.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

/// Errors reported by the ordered key-value store.
#[derive(Error, Debug)]
pub enum StorageError {
    /// The store file could not be opened or created.
    #[error("failed to open store '{path}': {source}")]
    OpenFailed {
        /// The path that could not be opened.
        path: String,
        /// The backend error.
        #[source]
        source: BackendError,
    },

    /// A get, seek or cursor step failed.
    #[error("storage read failed during {op}: {source}")]
    ReadFailed {
        /// The operation that failed.
        op: &'static str,
        /// The backend error.
        #[source]
        source: BackendError,
    },

    /// A put or delete failed.
    #[error("storage write failed during {op}: {source}")]
    WriteFailed {
        /// The operation that failed.
        op: &'static str,
        /// The backend error.
        #[source]
        source: BackendError,
    },

    /// Flushing the store to disk failed.
    #[error("failed to sync store '{path}': {source}")]
    SyncFailed {
        /// The store path.
        path: String,
        /// The backend error.
        #[source]
        source: BackendError,
    },
}

/// A key or value read back with the wrong byte length.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RecordError {
    /// The key is not the 8-byte `(unit, level, ts)` layout.
    #[error("malformed key: {len} bytes, expected 8")]
    MalformedKey {
        /// Actual key length.
        len: usize,
    },

    /// The value length does not match the shape implied by the key level.
    #[error("malformed value at level {level}: {found} bytes, expected {expected}")]
    MalformedValue {
        /// Level taken from the key.
        level: u16,
        /// Expected value length for that level.
        expected: usize,
        /// Actual value length.
        found: usize,
    },
}

/// Errors that can occur during range queries.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum QueryError {
    /// The range is empty or no buckets were requested.
    #[error("invalid range: beg {beg} must be < end {end} with at least one bucket (got {buckets})")]
    InvalidRange {
        /// Range start.
        beg: u32,
        /// Range end.
        end: u32,
        /// Requested bucket count.
        buckets: usize,
    },
}

/// Errors that can occur while loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config '{}': {source}", path.display())]
    Read {
        /// The config file path.
        path: std::path::PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid JSON for the expected shape.
    #[error("failed to parse config '{}': {source}", path.display())]
    Parse {
        /// The config file path.
        path: std::path::PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// The configuration parsed but violates a constraint.
    #[error("invalid configuration: {reason}")]
    Invalid {
        /// Description of what is invalid.
        reason: String,
    },
}

/// Type alias for `Result<T, StrataError>`.
pub type Result<T> = std::result::Result<T, StrataError>;

/// Wraps a backend error as a [`StorageError::ReadFailed`] for `op`.
pub(crate) fn read_failed<E>(op: &'static str) -> impl FnOnce(E) -> StrataError
where
    E: std::error::Error + Send + Sync + 'static,
{
    move |e| StorageError::ReadFailed { op, source: Box::new(e) }.into()
}

/// Wraps a backend error as a [`StorageError::WriteFailed`] for `op`.
pub(crate) fn write_failed<E>(op: &'static str) -> impl FnOnce(E) -> StrataError
where
    E: std::error::Error + Send + Sync + 'static,
{
    move |e| StorageError::WriteFailed { op, source: Box::new(e) }.into()
}
