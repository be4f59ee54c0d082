//! Database and collection configuration.

use std::collections::BTreeMap;

/// Configuration for a [`crate::Database`] handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Key field used when a collection does not name one.
    pub key_field: String,

    /// Whether collections generate their keys unless told otherwise.
    pub auto_key: bool,

    /// Name of the store holding collection definitions.
    pub registry_store: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            key_field: "_id".to_string(),
            auto_key: true,
            registry_store: "_config".to_string(),
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the default key field.
    #[must_use]
    pub fn key_field(mut self, field: impl Into<String>) -> Self {
        self.key_field = field.into();
        self
    }

    /// Sets the default auto-key policy.
    #[must_use]
    pub const fn auto_key(mut self, value: bool) -> Self {
        self.auto_key = value;
        self
    }

    /// Sets the registry store name.
    #[must_use]
    pub fn registry_store(mut self, name: impl Into<String>) -> Self {
        self.registry_store = name.into();
        self
    }
}

/// Options of one secondary index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexOptions {
    /// Reject two records with the same value.
    pub unique: bool,
    /// Index each element of an array separately.
    pub multi_entry: bool,
}

impl IndexOptions {
    /// Creates non-unique, single-entry options.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            unique: false,
            multi_entry: false,
        }
    }

    /// Sets uniqueness.
    #[must_use]
    pub const fn unique(mut self, value: bool) -> Self {
        self.unique = value;
        self
    }

    /// Sets multi-entry indexing.
    #[must_use]
    pub const fn multi_entry(mut self, value: bool) -> Self {
        self.multi_entry = value;
        self
    }
}

/// Options for [`crate::Database::create_collection`].
///
/// Unset fields fall back to the database [`Config`].
///
/// # Example
///
/// ```rust
/// use recollect_core::{CollectionOptions, IndexOptions};
///
/// let options = CollectionOptions::new("people")
///     .key_field("email")
///     .auto_key(false)
///     .index("age", IndexOptions::new())
///     .index("tags", IndexOptions::new().multi_entry(true));
/// assert_eq!(options.indexes.len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionOptions {
    /// Collection name. Required.
    pub name: String,
    /// Keypath of the primary key inside each document.
    pub key_field: Option<String>,
    /// Whether keys are generated on insert.
    pub auto_key: Option<bool>,
    /// Indexed field keypath to index options.
    pub indexes: BTreeMap<String, IndexOptions>,
}

impl CollectionOptions {
    /// Creates options for a collection called `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Sets the key field.
    #[must_use]
    pub fn key_field(mut self, field: impl Into<String>) -> Self {
        self.key_field = Some(field.into());
        self
    }

    /// Sets the auto-key policy.
    #[must_use]
    pub fn auto_key(mut self, value: bool) -> Self {
        self.auto_key = Some(value);
        self
    }

    /// Declares an index on `field`.
    #[must_use]
    pub fn index(mut self, field: impl Into<String>, options: IndexOptions) -> Self {
        self.indexes.insert(field.into(), options);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.key_field, "_id");
        assert!(config.auto_key);
        assert_eq!(config.registry_store, "_config");
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .key_field("id")
            .auto_key(false)
            .registry_store("_schema");

        assert_eq!(config.key_field, "id");
        assert!(!config.auto_key);
        assert_eq!(config.registry_store, "_schema");
    }

    #[test]
    fn collection_options_leave_defaults_unset() {
        let options = CollectionOptions::new("notes");
        assert_eq!(options.name, "notes");
        assert!(options.key_field.is_none());
        assert!(options.auto_key.is_none());
        assert!(options.indexes.is_empty());

        let options = options.index("title", IndexOptions::new().unique(true));
        assert!(options.indexes["title"].unique);
        assert!(!options.indexes["title"].multi_entry);
    }
}
