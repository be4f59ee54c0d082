//! # Recollect Core
//!
//! Document collections on top of an ordered object-store engine.
//!
//! This crate provides:
//! - Query literals compiled into predicates ([`Query`], [`compile`])
//! - The stored record envelope with creation and modification times
//! - Cursor scans that filter, merge-update, replace and delete
//! - A transaction coordinator that releases every connection it opens
//! - A registry store that remembers each collection's definition
//!
//! ## Example
//!
//! ```rust
//! use recollect_core::{CollectionOptions, Database, IndexOptions, MemoryEngine, Query, Value};
//! use std::sync::Arc;
//!
//! let db = Database::open(Arc::new(MemoryEngine::new()), "shop")?.initialize()?;
//! let items = db.create_collection(
//!     CollectionOptions::new("items").index("kind", IndexOptions::new()),
//! )?;
//!
//! let key = items.insert_one(Value::object([
//!     ("kind", Value::from("pen")),
//!     ("stock", Value::from(3)),
//! ]))?;
//! items.update(&Query::new().eq("kind", "pen"), Value::object([("stock", Value::from(2))]))?;
//!
//! let pens = items.find_by_index("kind", "pen", &Query::new())?;
//! assert_eq!(pens[0].get("stock"), Some(&Value::from(2)));
//! items.delete(key)?;
//! # Ok::<(), recollect_core::CoreError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod collection;
mod config;
pub mod coordinator;
mod database;
pub mod envelope;
mod error;
pub mod query;
pub mod scanner;
pub mod schema;
mod types;

pub use collection::Collection;
pub use config::{CollectionOptions, Config, IndexOptions};
pub use coordinator::{ConnectionState, TransactionCoordinator};
pub use database::Database;
pub use error::{BoxError, CoreError, CoreResult};
pub use query::{compile, Clause, Condition, Operator, Predicate, Query, UserPredicate};
pub use schema::{CollectionSchema, SchemaRegistry};
pub use types::Timestamp;

pub use recollect_codec::{Keypath, Pattern, PatternFlags, Value};
pub use recollect_storage::{Key, MemoryEngine, StorageEngine};
