//! CLI command implementations.

pub mod collections;
pub mod documents;

use recollect_core::{Collection, Database, Key, MemoryEngine, Pattern, PatternFlags, Query, Value};
use std::error::Error;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

/// Result type of every command.
pub type CommandResult<T = ()> = Result<T, Box<dyn Error>>;

/// Opens and initializes database `name` stored in `dir`.
pub fn open(dir: &Path, name: &str) -> CommandResult<Database> {
    let engine = MemoryEngine::open_dir(dir)?;
    Ok(Database::open(Arc::new(engine), name)?.initialize()?)
}

/// The attached collection called `name`.
pub fn collection(db: &Database, name: &str) -> CommandResult<Collection> {
    db.collection(name)
        .ok_or_else(|| format!("no collection named '{name}' in '{}'", db.name()).into())
}

/// Parses a JSON argument.
pub fn parse_json(text: &str) -> CommandResult<Value> {
    serde_json::from_str(text).map_err(|e| format!("invalid JSON {text:?}: {e}").into())
}

/// Parses a query argument.
///
/// `{"$regex": source, "$flags": flags}` objects become patterns, so regex
/// conditions survive the trip through JSON.
pub fn parse_query(text: &str) -> CommandResult<Query> {
    let value = revive_patterns(parse_json(text)?)?;
    Ok(Query::from_value(&value)?)
}

/// Parses a key argument: JSON if it parses, bare text otherwise.
pub fn parse_key(text: &str) -> CommandResult<Key> {
    let value = serde_json::from_str(text).unwrap_or_else(|_| Value::from(text));
    Ok(Key::from_value(&value)?)
}

fn revive_patterns(value: Value) -> CommandResult<Value> {
    match value {
        Value::Map(pairs) => {
            if let Some(pattern) = pattern_object(&pairs)? {
                return Ok(Value::Regex(pattern));
            }
            let pairs = pairs
                .into_iter()
                .map(|(k, v)| Ok((k, revive_patterns(v)?)))
                .collect::<CommandResult<_>>()?;
            Ok(Value::Map(pairs))
        }
        Value::Array(items) => Ok(Value::Array(
            items
                .into_iter()
                .map(revive_patterns)
                .collect::<CommandResult<_>>()?,
        )),
        other => Ok(other),
    }
}

fn pattern_object(pairs: &[(Value, Value)]) -> CommandResult<Option<Pattern>> {
    let field = |name: &str| {
        pairs
            .iter()
            .find(|(k, _)| k.as_text() == Some(name))
            .map(|(_, v)| v)
    };
    let Some(source) = field("$regex").and_then(Value::as_text) else {
        return Ok(None);
    };
    let flags = match field("$flags") {
        Some(flags) => {
            let flags = flags.as_text().ok_or("$flags must be a string")?;
            PatternFlags::parse(flags)?
        }
        None if pairs.len() == 1 => PatternFlags::default(),
        None => return Ok(None),
    };
    if pairs.len() > 2 {
        return Ok(None);
    }
    Ok(Some(Pattern::with_flags(source, flags)))
}

/// Prints `value` as pretty JSON on its own line.
pub fn print_json(out: &mut impl Write, value: &Value) -> CommandResult {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}
