//! Shared state threaded through every parser for one document.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::parsers::{Construct, Iteration, ParserRegistry};
use super::result::ParseResult;
use super::xml::{NodeId, XmlTree};
use crate::db::UnitOfWork;
use crate::error::ParseError;

/// Import feature toggles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlags {
    /// Write per-parent child collections (ingredients, packaging,
    /// operations) with one batch call instead of row by row.
    #[serde(default)]
    pub use_bulk: bool,
    /// Build section structure with discovery + bulk build instead of
    /// creating sections while recursing.
    #[serde(default)]
    pub use_staged_bulk: bool,
    /// Run the whole document without per-section savepoints.
    #[serde(default = "default_true")]
    pub use_batch_save: bool,
}

fn default_true() -> bool {
    true
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            use_bulk: false,
            use_staged_bulk: false,
            use_batch_save: true,
        }
    }
}

/// Progress events emitted while a document is parsed.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseProgress {
    DocumentStarted { document_guid: Uuid },
    SectionParsed { document_order: i32, title: Option<String> },
    DocumentFinished { sections: usize },
}

/// Per-document parsing state.
///
/// Holds the open unit of work for the document, the parser registry used
/// for recursive dispatch, and the ids of whatever is currently being built
/// so nested parsers can attach their rows to it.
pub struct ParsingContext<'a> {
    uow: &'a UnitOfWork<'a>,
    registry: &'a ParserRegistry,
    progress: Option<&'a dyn Fn(&ParseProgress)>,
    pub flags: FeatureFlags,

    /// Identifier declared by the caller (from the archive entry name).
    pub file_guid: Uuid,
    pub spl_data_id: Option<i64>,
    /// Identifier used for the document row and for derived section ids.
    pub document_guid: Uuid,

    pub document_id: Option<i64>,
    pub structured_body_id: Option<i64>,
    pub section_id: Option<i64>,
    pub section_level: i32,
    /// Position of the section being dispatched among its siblings.
    pub sequence_number: Option<i32>,
    pub product_id: Option<i64>,
    pub packaging_id: Option<i64>,
    pub packaging_level: i32,
    pub organization_id: Option<i64>,

    section_ids: HashMap<Uuid, i64>,
    created_edges: HashSet<(i64, i64)>,
    next_ordinal: i32,
}

impl<'a> ParsingContext<'a> {
    pub fn new(uow: &'a UnitOfWork<'a>, registry: &'a ParserRegistry, flags: FeatureFlags, file_guid: Uuid) -> Self {
        Self {
            uow,
            registry,
            progress: None,
            flags,
            file_guid,
            spl_data_id: None,
            document_guid: file_guid,
            document_id: None,
            structured_body_id: None,
            section_id: None,
            section_level: 0,
            sequence_number: None,
            product_id: None,
            packaging_id: None,
            packaging_level: 0,
            organization_id: None,
            section_ids: HashMap::new(),
            created_edges: HashSet::new(),
            next_ordinal: 0,
        }
    }

    pub fn with_progress(mut self, progress: Option<&'a dyn Fn(&ParseProgress)>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_spl_data(mut self, spl_data_id: Option<i64>) -> Self {
        self.spl_data_id = spl_data_id;
        self
    }

    /// Persistence handles for this document's unit of work.
    pub fn repo(&self) -> &'a UnitOfWork<'a> {
        self.uow
    }

    /// Hand a node to the parser registered for `construct`.
    pub fn dispatch(
        &mut self,
        construct: Construct,
        tree: &XmlTree,
        node: NodeId,
        iteration: Iteration,
    ) -> Result<ParseResult, ParseError> {
        let registry = self.registry;
        registry.parse(construct, tree, node, self, iteration)
    }

    pub fn report(&self, event: ParseProgress) {
        if let Some(progress) = self.progress {
            progress(&event);
        }
    }

    /// Next section ordinal in pre-order; doubles as document order.
    pub fn next_section_ordinal(&mut self) -> i32 {
        let ordinal = self.next_ordinal;
        self.next_ordinal += 1;
        ordinal
    }

    pub fn section_id_for(&self, guid: &Uuid) -> Option<i64> {
        self.section_ids.get(guid).copied()
    }

    pub fn register_section(&mut self, guid: Uuid, id: i64) {
        self.section_ids.entry(guid).or_insert(id);
    }

    pub fn section_count(&self) -> usize {
        self.section_ids.len()
    }

    /// Returns false when the pair was already written for this document.
    pub fn record_edge(&mut self, parent_id: i64, child_id: i64) -> bool {
        self.created_edges.insert((parent_id, child_id))
    }

    /// Snapshot of the section indices, restored when a savepoint rolls back.
    pub(crate) fn section_state(&self) -> (HashMap<Uuid, i64>, HashSet<(i64, i64)>) {
        (self.section_ids.clone(), self.created_edges.clone())
    }

    pub(crate) fn restore_section_state(&mut self, state: (HashMap<Uuid, i64>, HashSet<(i64, i64)>)) {
        self.section_ids = state.0;
        self.created_edges = state.1;
    }
}
