//! Archive entry extraction.
//!
//! Labeling submissions arrive as zip archives holding one or more XML
//! documents (plus images and other attachments that are ignored). Entry
//! names carry the document identifier: `<guid>.xml`.

pub mod encoding;

use std::fs::File;
use std::io::{BufReader, Cursor, Read};
use std::path::Path;

use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::ArchiveError;

pub use encoding::{decode_text, detect_encoding, TextEncoding};

/// Default extension of importable documents.
pub const DOCUMENT_EXTENSION: &str = ".xml";

/// An archive held in memory.
#[derive(Debug, Clone)]
pub struct ArchiveSource {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl ArchiveSource {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, ArchiveError> {
        let bytes = std::fs::read(path).map_err(|source| ArchiveError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self { name, bytes })
    }
}

/// A document entry read out of an archive.
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// One line of an archive listing.
#[derive(Debug, Clone, Serialize)]
pub struct ArchiveListing {
    pub name: String,
    pub size: u64,
    pub importable: bool,
}

fn is_document(name: &str, size: u64, extension: &str) -> bool {
    size > 0 && name.to_lowercase().ends_with(&extension.to_lowercase())
}

/// Read every importable entry from an archive, in archive order.
///
/// Directories, empty files and files without the document extension are
/// skipped. The outer error covers archives that cannot be opened at all;
/// an entry that fails to read (bad checksum, unsupported compression)
/// comes back as its own `Err` so the remaining entries are still usable.
pub fn open_entries(
    source: &ArchiveSource,
    extension: &str,
) -> Result<Vec<Result<ArchiveEntry, ArchiveError>>, ArchiveError> {
    if source.bytes.is_empty() {
        return Err(ArchiveError::Empty(source.name.clone()));
    }

    let mut archive =
        zip::ZipArchive::new(Cursor::new(source.bytes.as_slice())).map_err(|e| ArchiveError::Corrupt {
            name: source.name.clone(),
            source: e,
        })?;

    let mut entries = Vec::new();
    for i in 0..archive.len() {
        let (name, size) = match archive.by_index_raw(i) {
            Ok(file) if file.is_dir() => continue,
            Ok(file) => (file.name().to_string(), file.size()),
            Err(e) => {
                entries.push(Err(ArchiveError::EntryCorrupt {
                    entry: format!("{}#{}", source.name, i),
                    source: e,
                }));
                continue;
            }
        };

        if !is_document(&name, size, extension) {
            debug!("Skipping {} in {}", name, source.name);
            continue;
        }

        entries.push(read_entry(&mut archive, i, name));
    }

    debug!("{}: {} document entries", source.name, entries.len());
    Ok(entries)
}

fn read_entry(
    archive: &mut zip::ZipArchive<Cursor<&[u8]>>,
    index: usize,
    name: String,
) -> Result<ArchiveEntry, ArchiveError> {
    let mut file = match archive.by_index(index) {
        Ok(file) => file,
        Err(source) => return Err(ArchiveError::EntryCorrupt { entry: name, source }),
    };
    let mut bytes = Vec::with_capacity(file.size() as usize);
    if let Err(source) = file.read_to_end(&mut bytes) {
        return Err(ArchiveError::Entry { entry: name, source });
    }
    Ok(ArchiveEntry { name, bytes })
}

/// Decode an entry's bytes to text.
pub fn extract_text(entry: &ArchiveEntry) -> Result<String, ArchiveError> {
    decode_text(&entry.name, &entry.bytes)
}

/// Identifier declared by an entry name: the part of the file name before
/// its first `.`. Names that don't carry a GUID yield the nil UUID.
pub fn document_guid_from_name(name: &str) -> Uuid {
    let file_name = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let stem = file_name.split('.').next().unwrap_or(file_name);
    match Uuid::parse_str(stem) {
        Ok(guid) => guid,
        Err(_) => {
            warn!("Entry name '{}' does not carry a document id", name);
            Uuid::nil()
        }
    }
}

/// List every file in an archive on disk, marking what would be imported.
pub fn list_archive(path: &Path, extension: &str) -> Result<Vec<ArchiveListing>, ArchiveError> {
    let name = path.display().to_string();
    let file = File::open(path).map_err(|source| ArchiveError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut archive = zip::ZipArchive::new(BufReader::new(file)).map_err(|source| ArchiveError::Corrupt {
        name: name.clone(),
        source,
    })?;

    let mut files = Vec::new();
    for i in 0..archive.len() {
        let file = archive.by_index_raw(i).map_err(|source| ArchiveError::Corrupt {
            name: name.clone(),
            source,
        })?;
        if !file.is_dir() {
            files.push(ArchiveListing {
                name: file.name().to_string(),
                size: file.size(),
                importable: is_document(file.name(), file.size(), extension),
            });
        }
    }

    Ok(files)
}
