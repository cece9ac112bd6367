//! Bulk structural build: writes everything the discovery pass found.

use tracing::debug;

use super::context::ParsingContext;
use super::discovery::DiscoveryResult;
use super::result::ParseResult;
use crate::db::Repository;
use crate::error::ParseError;
use crate::model::{Section, SectionHierarchyEdge};

/// Insert all discovered sections, then all edges, then copy each section's
/// first parent onto its row.
///
/// Sections are written without a parent because parent ids only exist once
/// the batch insert returns. A discovery result can be built exactly once.
pub fn build_structure(
    discovery: &mut DiscoveryResult,
    ctx: &mut ParsingContext<'_>,
) -> Result<ParseResult, ParseError> {
    if discovery.is_built() {
        return Err(ParseError::AlreadyBuilt);
    }
    discovery.mark_built();

    let mut result = ParseResult::new();
    let Some(document_id) = ctx.document_id else {
        result.error("Section structure outside of a document");
        return Ok(result);
    };

    let rows: Vec<Section> = discovery
        .sections
        .iter()
        .map(|d| Section {
            id: None,
            document_id,
            structured_body_id: ctx.structured_body_id,
            section_guid: d.guid,
            code: d.code.clone(),
            title: d.title.clone(),
            effective_time: d.effective_time,
            text_content: d.text_content.clone(),
            level: d.level,
            parent_section_id: None,
            document_order: d.document_order,
        })
        .collect();

    let ids = ctx.repo().insert_many(rows.as_slice())?;
    for (index, id) in ids.iter().copied().enumerate() {
        discovery.set_persisted(index, id);
        ctx.register_section(discovery.sections[index].guid, id);
    }
    result.counts.sections += ids.len();

    let mut edges = Vec::with_capacity(discovery.edges.len());
    for edge in &discovery.edges {
        let (Some(parent), Some(child)) = (
            discovery.persisted_id(&edge.parent_guid),
            discovery.persisted_id(&edge.child_guid),
        ) else {
            result.error(format!(
                "Edge {} -> {} references an unknown section",
                edge.parent_guid, edge.child_guid
            ));
            continue;
        };
        if ctx.record_edge(parent, child) {
            edges.push(SectionHierarchyEdge {
                id: None,
                parent_section_id: parent,
                child_section_id: child,
                sequence_number: edge.sequence_number,
            });
        }
    }
    ctx.repo().insert_many(edges.as_slice())?;
    result.counts.section_hierarchies += edges.len();

    let linked = ctx.repo().backfill_section_parents(document_id)?;
    debug!(
        "Bulk built {} sections, {} edges ({} parent links)",
        ids.len(),
        edges.len(),
        linked
    );

    Ok(result)
}
