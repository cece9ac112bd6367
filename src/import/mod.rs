//! Batch import of labeling archives.
//!
//! Archives are processed one after another on a blocking worker so the
//! caller's runtime stays free. Each document entry gets its own unit of
//! work: it is checked for duplicates, its raw text is stored and it is
//! parsed, all inside one transaction that commits only if parsing returns.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::archive::{self, ArchiveEntry, ArchiveSource, DOCUMENT_EXTENSION};
use crate::db::{ContentStore, DuplicateDetector, SplDb};
use crate::error::{ImportError, ParseError};
use crate::spl::context::{FeatureFlags, ParseProgress};
use crate::spl::parse_document;
use crate::spl::parsers::ParserRegistry;
use crate::spl::result::{EntityCounts, ParseResult};

/// Progress callback type
pub type ProgressCallback = Arc<dyn Fn(ImportProgress) + Send + Sync>;

/// Import progress information
#[derive(Debug, Clone)]
pub enum ImportProgress {
    ArchiveStarted {
        index: usize,
        total: usize,
        name: String,
    },
    /// Parser event for the entry currently being imported.
    Document { entry: String, event: ParseProgress },
    EntryFinished(EntryImportResult),
    /// Sent after every archive, with everything imported so far.
    Batch {
        percent: u8,
        results: Vec<ArchiveImportResult>,
    },
}

/// Cooperative cancellation, checked before every archive entry.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Outcome of one archive entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntryImportResult {
    pub entry_name: String,
    pub success: bool,
    pub message: String,
    pub document_guid: Option<Uuid>,
    pub skipped_duplicate: bool,
    pub counts: EntityCounts,
    pub errors: Vec<String>,
}

impl EntryImportResult {
    fn failed(entry_name: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            entry_name: entry_name.to_string(),
            success: false,
            errors: vec![message.clone()],
            message,
            document_guid: None,
            skipped_duplicate: false,
            counts: EntityCounts::default(),
        }
    }

    fn duplicate(entry_name: &str, document_guid: Uuid) -> Self {
        Self {
            entry_name: entry_name.to_string(),
            success: true,
            message: "Skipped: already imported".to_string(),
            document_guid: Some(document_guid),
            skipped_duplicate: true,
            counts: EntityCounts::default(),
            errors: Vec::new(),
        }
    }

    fn parsed(entry_name: &str, document_guid: Uuid, result: ParseResult) -> Self {
        let message = if result.success {
            format!("Imported {} entities", result.counts.total())
        } else {
            format!(
                "Imported {} entities with {} errors",
                result.counts.total(),
                result.errors.len()
            )
        };
        Self {
            entry_name: entry_name.to_string(),
            success: result.success,
            message,
            document_guid: Some(document_guid),
            skipped_duplicate: false,
            counts: result.counts,
            errors: result.errors,
        }
    }
}

/// All entry results for one archive.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArchiveImportResult {
    pub archive_name: String,
    pub entries: Vec<EntryImportResult>,
}

impl ArchiveImportResult {
    pub fn success(&self) -> bool {
        self.entries.iter().all(|e| e.success)
    }

    pub fn counts(&self) -> EntityCounts {
        let mut counts = EntityCounts::default();
        for entry in &self.entries {
            counts += entry.counts;
        }
        counts
    }
}

/// Totals over a finished batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchSummary {
    pub archives: usize,
    pub entries: usize,
    pub imported: usize,
    pub skipped: usize,
    pub failed: usize,
    pub counts: EntityCounts,
}

impl BatchSummary {
    pub fn from_results(results: &[ArchiveImportResult]) -> Self {
        let mut summary = Self {
            archives: results.len(),
            ..Default::default()
        };
        for entry in results.iter().flat_map(|r| &r.entries) {
            summary.entries += 1;
            summary.counts += entry.counts;
            if entry.skipped_duplicate {
                summary.skipped += 1;
            } else if entry.success {
                summary.imported += 1;
            } else {
                summary.failed += 1;
            }
        }
        summary
    }
}

/// Integer progress after `processed` of `total` archives.
pub fn progress_percent(processed: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    (processed.min(total) * 100 / total) as u8
}

enum EntryOutcome {
    Duplicate,
    Parsed(ParseResult),
}

/// Everything one worker needs; moved onto the blocking thread.
struct Worker {
    registry: Arc<ParserRegistry>,
    flags: FeatureFlags,
    extension: String,
    user: Uuid,
    cancel: CancelFlag,
    progress_callback: Option<ProgressCallback>,
}

impl Worker {
    fn report(&self, progress: ImportProgress) {
        if let Some(ref callback) = self.progress_callback {
            callback(progress);
        }
    }

    fn run(
        &self,
        db: &mut SplDb,
        archives: Vec<ArchiveSource>,
    ) -> Result<Vec<ArchiveImportResult>, ImportError> {
        let total = archives.len();
        let processed = AtomicUsize::new(0);
        let mut results = Vec::with_capacity(total);

        for (index, archive) in archives.into_iter().enumerate() {
            self.report(ImportProgress::ArchiveStarted {
                index,
                total,
                name: archive.name.clone(),
            });
            let done = processed.load(Ordering::SeqCst);
            results.push(self.import_archive(db, &archive, done, total)?);

            let done = processed.fetch_add(1, Ordering::SeqCst) + 1;
            self.report(ImportProgress::Batch {
                percent: progress_percent(done, total),
                results: results.clone(),
            });
        }

        Ok(results)
    }

    fn import_archive(
        &self,
        db: &mut SplDb,
        archive: &ArchiveSource,
        processed: usize,
        total: usize,
    ) -> Result<ArchiveImportResult, ImportError> {
        info!("Importing archive {} ({} bytes)", archive.name, archive.bytes.len());

        let mut result = ArchiveImportResult {
            archive_name: archive.name.clone(),
            entries: Vec::new(),
        };

        let entries = match archive::open_entries(archive, &self.extension) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("{}", e);
                result.entries.push(EntryImportResult::failed(&archive.name, e.to_string()));
                return Ok(result);
            }
        };
        if entries.is_empty() {
            warn!("Archive {} has no document entries", archive.name);
        }

        for entry in &entries {
            if self.cancel.is_cancelled() {
                info!("Import cancelled in {}", archive.name);
                return Err(ImportError::Cancelled { processed, total });
            }
            let entry_result = match entry {
                Ok(entry) => self.import_entry(db, entry)?,
                Err(e) => {
                    warn!("{}", e);
                    EntryImportResult::failed(e.entry_name().unwrap_or(&archive.name), e.to_string())
                }
            };
            self.report(ImportProgress::EntryFinished(entry_result.clone()));
            result.entries.push(entry_result);
        }

        Ok(result)
    }

    /// Errors returned from here abort the batch; everything else becomes a
    /// failed entry result.
    fn import_entry(&self, db: &mut SplDb, entry: &ArchiveEntry) -> Result<EntryImportResult, ImportError> {
        let text = match archive::extract_text(entry) {
            Ok(text) => text,
            Err(e) => return Ok(EntryImportResult::failed(&entry.name, e.to_string())),
        };
        let document_guid = archive::document_guid_from_name(&entry.name);

        match self.parse_entry(db, &entry.name, &text, document_guid) {
            Ok(EntryOutcome::Duplicate) => {
                info!("Skipping {}: already imported", entry.name);
                Ok(EntryImportResult::duplicate(&entry.name, document_guid))
            }
            Ok(EntryOutcome::Parsed(result)) => {
                debug!(
                    "Parsed {}: {} entities, {} errors",
                    entry.name,
                    result.counts.total(),
                    result.errors.len()
                );
                Ok(EntryImportResult::parsed(&entry.name, document_guid, result))
            }
            Err(e) if e.is_wiring() => Err(ImportError::Wiring(e.to_string())),
            Err(e) => {
                warn!("Failed to import {}: {}", entry.name, e);
                Ok(EntryImportResult::failed(&entry.name, e.to_string()))
            }
        }
    }

    fn parse_entry(
        &self,
        db: &mut SplDb,
        entry_name: &str,
        text: &str,
        document_guid: Uuid,
    ) -> Result<EntryOutcome, ParseError> {
        let uow = db.begin()?;
        if uow.is_duplicate(text, document_guid)? {
            return Ok(EntryOutcome::Duplicate);
        }
        let spl_data_id = uow.store_content(text, document_guid, self.user)?;

        let forward = |event: &ParseProgress| {
            self.report(ImportProgress::Document {
                entry: entry_name.to_string(),
                event: event.clone(),
            })
        };
        let result = parse_document(
            &uow,
            &self.registry,
            self.flags,
            Some(&forward),
            text,
            document_guid,
            Some(spl_data_id),
        )?;

        uow.commit()?;
        Ok(EntryOutcome::Parsed(result))
    }
}

/// Imports batches of archives into one store.
pub struct Importer {
    db: Arc<Mutex<SplDb>>,
    registry: Arc<ParserRegistry>,
    flags: FeatureFlags,
    extension: String,
    progress_callback: Option<ProgressCallback>,
}

impl Importer {
    pub fn new(db: SplDb, flags: FeatureFlags) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            registry: Arc::new(ParserRegistry::standard()),
            flags,
            extension: DOCUMENT_EXTENSION.to_string(),
            progress_callback: None,
        }
    }

    pub fn with_registry(mut self, registry: ParserRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    /// Set progress callback
    pub fn set_progress_callback(&mut self, callback: ProgressCallback) {
        self.progress_callback = Some(callback);
    }

    /// Shared handle to the store, e.g. for queries after an import.
    pub fn db(&self) -> Arc<Mutex<SplDb>> {
        Arc::clone(&self.db)
    }

    pub fn flags(&self) -> FeatureFlags {
        self.flags
    }

    /// Import archives in order.
    ///
    /// Entry and archive failures are reported in the results; only
    /// cancellation, wiring defects and worker failures return an error.
    pub async fn import_batch(
        &self,
        archives: Vec<ArchiveSource>,
        user: Uuid,
        cancel: CancelFlag,
    ) -> Result<Vec<ArchiveImportResult>, ImportError> {
        let worker = Worker {
            registry: Arc::clone(&self.registry),
            flags: self.flags,
            extension: self.extension.clone(),
            user,
            cancel,
            progress_callback: self.progress_callback.clone(),
        };

        if archives.is_empty() {
            worker.report(ImportProgress::Batch {
                percent: progress_percent(0, 0),
                results: Vec::new(),
            });
            return Ok(Vec::new());
        }

        info!(
            "Importing {} archives (staged bulk: {}, bulk: {}, batch save: {})",
            archives.len(),
            self.flags.use_staged_bulk,
            self.flags.use_bulk,
            self.flags.use_batch_save
        );

        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let mut db = db.blocking_lock();
            worker.run(&mut db, archives)
        })
        .await?
    }
}
