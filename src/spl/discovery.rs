//! Read-only walk over a structured body that records every section and
//! parent/child edge before anything is written.

use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use super::parsers::{child_sections, read_section};
use super::result::ParseResult;
use super::xml::{NodeId, XmlTree};
use crate::model::CodedValue;

/// One section found by the discovery pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SectionDiscoveryDescriptor {
    pub guid: Uuid,
    pub code: CodedValue,
    pub title: Option<String>,
    pub effective_time: Option<NaiveDate>,
    pub text_content: Option<String>,
    pub level: i32,
    pub parent_guid: Option<Uuid>,
    #[serde(skip)]
    pub node: NodeId,
    pub document_order: i32,
    /// Filled in by the bulk build.
    pub persisted_id: Option<i64>,
}

/// Parent/child relation between two discovered sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HierarchyEdgeDescriptor {
    pub parent_guid: Uuid,
    pub child_guid: Uuid,
    pub sequence_number: Option<i32>,
}

/// Everything the discovery pass learned about one document.
#[derive(Debug, Default)]
pub struct DiscoveryResult {
    /// Unique sections in document order.
    pub sections: Vec<SectionDiscoveryDescriptor>,
    /// Unique (parent, child) edges; the first sequence number wins.
    pub edges: Vec<HierarchyEdgeDescriptor>,
    pub errors: Vec<String>,
    by_guid: HashMap<Uuid, usize>,
    persisted: HashMap<Uuid, i64>,
    edge_keys: HashSet<(Uuid, Uuid)>,
    built: bool,
}

impl DiscoveryResult {
    pub fn descriptor(&self, guid: &Uuid) -> Option<&SectionDiscoveryDescriptor> {
        self.by_guid.get(guid).map(|&i| &self.sections[i])
    }

    pub fn persisted_id(&self, guid: &Uuid) -> Option<i64> {
        self.persisted.get(guid).copied()
    }

    pub fn is_built(&self) -> bool {
        self.built
    }

    pub(crate) fn mark_built(&mut self) {
        self.built = true;
    }

    /// Record the database id assigned to the descriptor at `index`.
    pub(crate) fn set_persisted(&mut self, index: usize, id: i64) {
        let descriptor = &mut self.sections[index];
        descriptor.persisted_id = Some(id);
        self.persisted.insert(descriptor.guid, id);
    }

    fn push_edge(&mut self, edge: HierarchyEdgeDescriptor) {
        if self.edge_keys.insert((edge.parent_guid, edge.child_guid)) {
            self.edges.push(edge);
        }
    }
}

struct Walker<'t> {
    tree: &'t XmlTree,
    namespace: Uuid,
    next_ordinal: i32,
    result: DiscoveryResult,
}

impl Walker<'_> {
    fn visit(&mut self, node: NodeId, parent: Option<Uuid>, level: i32, sequence_number: Option<i32>) {
        let ordinal = self.next_ordinal;
        self.next_ordinal += 1;

        let mut scratch = ParseResult::new();
        let fields = read_section(self.tree, node, self.namespace, ordinal, &mut scratch);
        self.result.errors.extend(scratch.errors);

        if self.result.by_guid.contains_key(&fields.guid) {
            debug!("Section {} seen again at position {}", fields.guid, ordinal);
            match parent {
                Some(p) if p == fields.guid => {
                    self.result
                        .errors
                        .push(format!("Section {} is nested inside itself", fields.guid));
                }
                Some(p) => self.result.push_edge(HierarchyEdgeDescriptor {
                    parent_guid: p,
                    child_guid: fields.guid,
                    sequence_number,
                }),
                None => {}
            }
            return;
        }

        let guid = fields.guid;
        self.result.by_guid.insert(guid, self.result.sections.len());
        self.result.sections.push(SectionDiscoveryDescriptor {
            guid,
            code: fields.code,
            title: fields.title,
            effective_time: fields.effective_time,
            text_content: fields.text_content,
            level,
            parent_guid: parent,
            node,
            document_order: ordinal,
            persisted_id: None,
        });

        if let Some(p) = parent {
            self.result.push_edge(HierarchyEdgeDescriptor {
                parent_guid: p,
                child_guid: guid,
                sequence_number,
            });
        }

        for (index, child) in child_sections(self.tree, node).into_iter().enumerate() {
            self.visit(child, Some(guid), level + 1, Some(index as i32 + 1));
        }
    }
}

/// Walk the sections under `body` in pre-order.
///
/// `namespace` is the document identifier used to derive ids for sections
/// that declare none, so the result matches what the naive parser creates.
pub fn discover_sections(tree: &XmlTree, body: NodeId, namespace: Uuid) -> DiscoveryResult {
    let mut walker = Walker {
        tree,
        namespace,
        next_ordinal: 0,
        result: DiscoveryResult::default(),
    };
    for (index, section) in child_sections(tree, body).into_iter().enumerate() {
        walker.visit(section, None, 0, Some(index as i32 + 1));
    }
    debug!(
        "Discovered {} sections and {} edges",
        walker.result.sections.len(),
        walker.result.edges.len()
    );
    walker.result
}
