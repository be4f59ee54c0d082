//! Error types for Recollect core.

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// A boxed cause carried by a [`CoreError`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors surfaced by collection and database operations.
///
/// Engine failures are wrapped in the variant that matches where they
/// happened, with the engine error kept as the source.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Opening, upgrading or deleting a database failed.
    #[error("connection error: {message}")]
    Connection {
        /// What was being attempted.
        message: String,
        /// The engine error.
        #[source]
        source: Option<BoxError>,
    },

    /// A cursor failed while scanning a store.
    #[error("cursor error: {message}")]
    Cursor {
        /// What was being attempted.
        message: String,
        /// The engine error.
        #[source]
        source: Option<BoxError>,
    },

    /// Beginning, writing in or committing a transaction failed.
    #[error("transaction error: {message}")]
    Transaction {
        /// What was being attempted.
        message: String,
        /// The engine error.
        #[source]
        source: Option<BoxError>,
    },

    /// A caller-supplied argument was rejected before any engine work.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Why the argument was rejected.
        message: String,
    },

    /// The record addressed by key does not exist.
    #[error("object not found: {message}")]
    ObjectNotFound {
        /// Which record was missing.
        message: String,
    },

    /// Attaching collections to a database handle failed.
    #[error("initialization error: {message}")]
    Initialization {
        /// Description of the failure.
        message: String,
    },

    /// A `$fnUnsafe` predicate returned an error.
    #[error("predicate failed: {message}")]
    Predicate {
        /// Where the predicate ran.
        message: String,
        /// The error the predicate returned.
        #[source]
        source: Option<BoxError>,
    },
}

impl CoreError {
    /// Creates a connection error wrapping `source`.
    pub fn connection(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Connection {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Creates a cursor error wrapping `source`.
    pub fn cursor(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Cursor {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Creates a transaction error wrapping `source`.
    pub fn transaction(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Transaction {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates an object not found error.
    pub fn object_not_found(message: impl Into<String>) -> Self {
        Self::ObjectNotFound {
            message: message.into(),
        }
    }

    /// Creates an initialization error.
    pub fn initialization(message: impl Into<String>) -> Self {
        Self::Initialization {
            message: message.into(),
        }
    }

    /// Creates a predicate error wrapping the predicate's own error.
    pub fn predicate(message: impl Into<String>, source: BoxError) -> Self {
        Self::Predicate {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Short name of the error kind, as shown by the CLI.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connection { .. } => "ConnectionError",
            Self::Cursor { .. } => "CursorError",
            Self::Transaction { .. } => "TransactionError",
            Self::InvalidArgument { .. } => "InvalidArgumentError",
            Self::ObjectNotFound { .. } => "ObjectNotFoundError",
            Self::Initialization { .. } => "InitializationError",
            Self::Predicate { .. } => "PredicateError",
        }
    }
}
