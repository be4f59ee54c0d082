//! Recollect CLI
//!
//! Command-line access to Recollect databases kept in a data directory.
//! Documents and queries are read as JSON and printed as JSON.
//!
//! # Commands
//!
//! - `collections` - List the collections of a database
//! - `create` - Create a collection
//! - `insert` - Insert one document or an array of documents
//! - `find` - Print documents matching a query
//! - `update` - Merge fields into matching documents
//! - `replace` - Replace the document stored under a key
//! - `delete` - Delete the document stored under a key
//! - `drop-collection` - Delete a collection and its documents
//! - `drop-database` - Delete the whole database

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Recollect document store tools.
#[derive(Parser)]
#[command(name = "recollect")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Data directory holding the database images
    #[arg(global = true, short, long, default_value = ".")]
    dir: PathBuf,

    /// Database name
    #[arg(global = true, long, default_value = "recollect")]
    db: String,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the collections of the database
    Collections,

    /// Create a collection
    Create {
        /// Collection name
        name: String,

        /// Keypath of the primary key
        #[arg(short, long)]
        key: Option<String>,

        /// Require documents to carry their own key
        #[arg(long)]
        manual_key: bool,

        /// Field to index (repeatable)
        #[arg(short, long = "index")]
        indexes: Vec<String>,

        /// Field to index with a uniqueness constraint (repeatable)
        #[arg(short, long = "unique")]
        unique: Vec<String>,

        /// Field to index per array element (repeatable)
        #[arg(short, long = "multi")]
        multi: Vec<String>,
    },

    /// Insert a document, or every document of a JSON array
    Insert {
        /// Collection name
        collection: String,

        /// Document JSON
        document: String,
    },

    /// Print documents matching a query
    Find {
        /// Collection name
        collection: String,

        /// Query JSON
        #[arg(default_value = "{}")]
        query: String,

        /// Look up through the index on this field
        #[arg(short, long, requires = "value")]
        index: Option<String>,

        /// Index value JSON
        #[arg(long)]
        value: Option<String>,

        /// Print only the first match
        #[arg(short, long)]
        first: bool,
    },

    /// Merge fields into every document matching a query
    Update {
        /// Collection name
        collection: String,

        /// Query JSON
        query: String,

        /// Fields JSON
        fields: String,
    },

    /// Replace the document stored under a key
    Replace {
        /// Collection name
        collection: String,

        /// Key JSON, or bare text
        key: String,

        /// Document JSON
        document: String,
    },

    /// Delete the document stored under a key
    Delete {
        /// Collection name
        collection: String,

        /// Key JSON, or bare text
        key: String,
    },

    /// Delete a collection and its documents
    DropCollection {
        /// Collection name
        collection: String,
    },

    /// Delete the whole database
    DropDatabase,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let db = commands::open(&cli.dir, &cli.db)?;
    let mut out = std::io::stdout().lock();

    match cli.command {
        Commands::Collections => commands::collections::list(&db, &mut out)?,
        Commands::Create {
            name,
            key,
            manual_key,
            indexes,
            unique,
            multi,
        } => {
            let spec = commands::collections::CreateSpec {
                name,
                key,
                manual_key,
                indexes,
                unique,
                multi,
            };
            commands::collections::create(&db, spec, &mut out)?;
        }
        Commands::Insert {
            collection,
            document,
        } => commands::documents::insert(&db, &collection, &document, &mut out)?,
        Commands::Find {
            collection,
            query,
            index,
            value,
            first,
        } => {
            let lookup = index.zip(value);
            commands::documents::find(&db, &collection, &query, lookup, first, &mut out)?;
        }
        Commands::Update {
            collection,
            query,
            fields,
        } => commands::documents::update(&db, &collection, &query, &fields, &mut out)?,
        Commands::Replace {
            collection,
            key,
            document,
        } => commands::documents::replace(&db, &collection, &key, &document)?,
        Commands::Delete { collection, key } => {
            commands::documents::delete(&db, &collection, &key)?;
        }
        Commands::DropCollection { collection } => {
            commands::collections::drop(&db, &collection)?;
        }
        Commands::DropDatabase => db.drop()?,
    }

    Ok(())
}
