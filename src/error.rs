//! Crate-wide error type.

use std::io;

use thiserror::Error;

/// Unified error type returned by every fallible [`crate::store::Database`] operation.
///
/// Mirrors the flat, `#[from]`-wired `thiserror` enums used throughout the rest of the
/// ecosystem this crate draws on (a single enum per crate boundary rather than nested
/// per-module error types), but is shared across `io`, `wal`, `cache`, `record`, `query`
/// and `store` so callers deal with one type end to end.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A caller-supplied argument was invalid (e.g. unknown type name, zero id to `update`).
    #[error("invalid argument: {0}")]
    InvalidArg(String),

    /// A reservation (`try_reserve`) failed; the only allocation failure idiomatic Rust
    /// surfaces without custom-allocator plumbing.
    #[error("allocation failed")]
    NoMem,

    /// No record exists for the given type/id.
    #[error("record not found")]
    NotFound,

    /// A record with that id already exists (reserved for future use; `add` always
    /// allocates a fresh id so this currently only fires on id collisions detected
    /// during recovery).
    #[error("record already exists")]
    Exists,

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A binary framing error from the [`crate::io`] `Writer`/`Reader` layer (bad string
    /// length, invalid UTF-8).
    #[error("framing error: {0}")]
    Frame(#[from] crate::io::IoFrameError),

    /// A write-ahead log error.
    #[error("wal error: {0}")]
    Wal(#[from] crate::wal::WalError),

    /// The file on disk failed a structural or checksum validation.
    #[error("corrupt data: {0}")]
    Corrupt(String),

    /// A fixed-capacity table (cache slot count, query condition count) is full.
    #[error("capacity exceeded: {0}")]
    Full(String),

    /// The instance mutex was not acquired within the configured timeout.
    #[error("lock acquisition timed out")]
    Timeout,

    /// The requested type name has not been registered on this `Database`.
    #[error("type not registered: {0}")]
    NotRegistered(String),
}

impl StoreError {
    /// Reclassifies a framing error as [`StoreError::Corrupt`].
    ///
    /// `Frame` is produced by the general-purpose [`crate::io`] `Writer`/`Reader` pair, but
    /// when it surfaces while decoding a record payload that was just read back off disk
    /// (main file section or WAL entry), it means the on-disk bytes don't conform to the
    /// shape the type's `read_from` expects — structural corruption, not a framing-layer
    /// bug. Call sites that decode already-persisted record bytes normalize to `Corrupt`
    /// here so callers see the documented error taxonomy instead of an internal layer leak.
    pub(crate) fn into_corrupt_if_frame(self) -> Self {
        match self {
            StoreError::Frame(e) => StoreError::Corrupt(format!("record payload framing error: {e}")),
            other => other,
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
