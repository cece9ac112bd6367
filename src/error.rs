//! Error types shared across the import pipeline.
//!
//! Data problems found inside a document never show up here; they are
//! collected into `ParseResult::errors`. These enums cover the failures
//! that stop a unit of work (storage, wiring, cancellation).

use std::path::PathBuf;

use crate::db::EntityKind;
use crate::spl::parsers::Construct;

/// Archive opening and entry extraction errors.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("Archive is empty: {0}")]
    Empty(String),

    #[error("Failed to read archive {name}: {source}")]
    Corrupt {
        name: String,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("Failed to read entry {entry}: {source}")]
    Entry {
        entry: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to open entry {entry}: {source}")]
    EntryCorrupt {
        entry: String,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("Entry {entry} is not valid {encoding} text")]
    Decode { entry: String, encoding: &'static str },

    #[error("Failed to open {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ArchiveError {
    /// Entry the error belongs to, when it concerns a single entry.
    pub fn entry_name(&self) -> Option<&str> {
        match self {
            Self::Entry { entry, .. } | Self::EntryCorrupt { entry, .. } | Self::Decode { entry, .. } => {
                Some(entry)
            }
            _ => None,
        }
    }
}

/// Persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("No persistence handle for {0:?}: table missing from schema")]
    MissingRepository(EntityKind),
}

/// Parser framework errors. Anything returned here aborts the document.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Malformed XML at position {position}: {message}")]
    Xml { position: u64, message: String },

    #[error("Document has no root element")]
    EmptyDocument,

    #[error("No parser registered for {0:?}")]
    Unregistered(Construct),

    #[error("Bulk structure for this document was already built")]
    AlreadyBuilt,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<rusqlite::Error> for ParseError {
    fn from(e: rusqlite::Error) -> Self {
        ParseError::Store(StoreError::Sqlite(e))
    }
}

impl ParseError {
    /// Wiring defects abort the whole batch instead of one entry.
    pub fn is_wiring(&self) -> bool {
        matches!(
            self,
            ParseError::Unregistered(_) | ParseError::Store(StoreError::MissingRepository(_))
        )
    }
}

/// Batch-level errors returned by the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("Import cancelled after {processed} of {total} archives")]
    Cancelled { processed: usize, total: usize },

    #[error("Wiring error: {0}")]
    Wiring(String),

    #[error("Import worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Settings load/validation errors.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Document extension must start with '.': {0}")]
    InvalidExtension(String),

    #[error("Database directory not found: {0}")]
    DatabaseDirNotFound(PathBuf),
}
