//! Error Types
//!
//! The foreground item API never returns errors: absence is a valid answer and
//! durability problems are logged. Errors only surface from operations that
//! touch the disk directly: opening the store, loading it, compaction, expiry
//! and close.

use crate::log::CodecError;
use thiserror::Error;

/// Result type alias using [`StoreError`].
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors returned by store lifecycle and maintenance operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Opening, writing, syncing or renaming a log file failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A record could not be encoded
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The persistence worker has stopped (the store was closed or the task died)
    #[error("persistence worker is not running")]
    WorkerUnavailable,

    /// Compaction or expiry was asked for before the log was loaded; the
    /// index would not reflect the log
    #[error("store has not been loaded")]
    NotLoaded,

    /// Invalid configuration value
    #[error("configuration error: {0}")]
    Config(String),
}
