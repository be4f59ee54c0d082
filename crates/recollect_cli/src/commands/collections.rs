//! Collection commands.

use super::{collection, print_json, CommandResult};
use recollect_core::{CollectionOptions, Database, IndexOptions, Value};
use std::io::Write;

/// Arguments of `create`.
#[derive(Debug, Default)]
pub struct CreateSpec {
    /// Collection name.
    pub name: String,
    /// Key field, if not the database default.
    pub key: Option<String>,
    /// Documents carry their own keys.
    pub manual_key: bool,
    /// Plain indexes.
    pub indexes: Vec<String>,
    /// Unique indexes.
    pub unique: Vec<String>,
    /// Multi-entry indexes.
    pub multi: Vec<String>,
}

impl CreateSpec {
    fn options(self) -> CollectionOptions {
        let mut options = CollectionOptions::new(self.name);
        if let Some(key) = self.key {
            options = options.key_field(key);
        }
        if self.manual_key {
            options = options.auto_key(false);
        }
        let flagged = self
            .indexes
            .into_iter()
            .map(|f| (f, IndexOptions::new()))
            .chain(self.unique.into_iter().map(|f| (f, IndexOptions::new().unique(true))))
            .chain(self.multi.into_iter().map(|f| (f, IndexOptions::new().multi_entry(true))));
        for (field, flags) in flagged {
            let merged = match options.indexes.get(&field) {
                Some(seen) => IndexOptions::new()
                    .unique(seen.unique || flags.unique)
                    .multi_entry(seen.multi_entry || flags.multi_entry),
                None => flags,
            };
            options = options.index(field, merged);
        }
        options
    }
}

/// Prints the collection names as a JSON array.
pub fn list(db: &Database, out: &mut impl Write) -> CommandResult {
    let names = db.collection_names().into_iter().map(Value::from).collect();
    print_json(out, &Value::Array(names))
}

/// Creates a collection and prints its registry definition.
pub fn create(db: &Database, spec: CreateSpec, out: &mut impl Write) -> CommandResult {
    let created = db.create_collection(spec.options())?;
    print_json(out, &created.schema().to_record())
}

/// Drops a collection.
pub fn drop(db: &Database, name: &str) -> CommandResult {
    collection(db, name)?.drop()?;
    tracing::info!(collection = name, "collection dropped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_flags_combine_per_field() {
        let options = CreateSpec {
            name: "people".into(),
            indexes: vec!["team".into()],
            unique: vec!["email".into(), "tags".into()],
            multi: vec!["tags".into()],
            ..CreateSpec::default()
        }
        .options();
        assert_eq!(options.indexes["team"], IndexOptions::new());
        assert!(options.indexes["email"].unique);
        assert!(options.indexes["tags"].unique && options.indexes["tags"].multi_entry);
        assert_eq!(options.auto_key, None);
    }
}
