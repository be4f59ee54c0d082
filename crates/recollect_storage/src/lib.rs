//! # Recollect Storage
//!
//! The ordered key-value object-store engine underneath Recollect.
//!
//! A database holds named object stores at a version number. Each store maps
//! [`Key`]s to document [`recollect_codec::Value`]s, may derive keys from a
//! keypath or generate them, and may carry secondary indexes. All access goes
//! through transactions scoped to a set of stores, and iteration goes through
//! cursors that can rewrite or delete the record under them.
//!
//! ## Design Principles
//!
//! - The engine knows nothing about document envelopes or queries
//! - Read-write transactions on one database are serialized; readers see the
//!   last committed state
//! - Schema only changes inside a version upgrade
//! - Connections are counted so callers can check nothing leaks
//!
//! ## Available Engines
//!
//! - [`MemoryEngine`] - in memory, or mirrored to a directory with
//!   [`MemoryEngine::open_dir`]

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod engine;
mod error;
mod key;
mod memory;

pub use engine::{
    Connection, Cursor, CursorEntry, IndexParams, SchemaEditor, StorageEngine, StoreParams,
    Transaction, TransactionMode, UpgradeHook,
};
pub use error::{StorageError, StorageResult};
pub use key::{Key, KeyRange};
pub use memory::{EngineStats, MemoryEngine, DEFAULT_UPGRADE_WAIT};
