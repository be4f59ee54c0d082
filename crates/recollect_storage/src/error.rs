//! Error types for storage operations.

use recollect_codec::CodecError;
use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors raised by a storage engine.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A stored image or value could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// A named database, store, index or record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A write would violate a key or unique-index constraint.
    #[error("constraint violated: {0}")]
    Constraint(String),

    /// Other connections prevent a version change or deletion.
    #[error("database '{0}' is blocked by open connections")]
    Blocked(String),

    /// The requested version is lower than the stored one.
    #[error("requested version {requested} is lower than current version {current}")]
    Version {
        /// Version asked for by the caller.
        requested: u64,
        /// Version currently stored.
        current: u64,
    },

    /// A value cannot serve as a key, or no key could be derived.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// A write was attempted in a read-only transaction.
    #[error("transaction is read-only")]
    ReadOnly,

    /// The storage directory is held by another process.
    #[error("storage directory is locked by another process")]
    Locked,

    /// A persisted image is malformed.
    #[error("storage corrupted: {0}")]
    Corrupted(String),

    /// A fault armed through the engine's test hook fired.
    #[error("injected fault: {0}")]
    InjectedFault(String),

    /// The connection has been closed.
    #[error("connection is closed")]
    Closed,
}

impl StorageError {
    pub(crate) fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub(crate) fn constraint(message: impl Into<String>) -> Self {
        Self::Constraint(message.into())
    }

    pub(crate) fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey(message.into())
    }
}
