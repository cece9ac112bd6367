//! Section parser (naive structure) and section content parser.

use chrono::NaiveDate;
use tracing::debug;
use uuid::Uuid;

use super::{child_coded_value, effective_time, Construct, Iteration};
use crate::db::Repository;
use crate::error::ParseError;
use crate::model::{CodedValue, Section, SectionHierarchyEdge};
use crate::spl::context::{ParseProgress, ParsingContext};
use crate::spl::result::ParseResult;
use crate::spl::xml::{NodeId, XmlTree};

/// Metadata read from a `<section>` element, shared by both structure strategies.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SectionFields {
    pub guid: Uuid,
    pub code: CodedValue,
    pub title: Option<String>,
    pub effective_time: Option<NaiveDate>,
    pub text_content: Option<String>,
}

/// `component/section` children of a section or structured body, in order.
pub(crate) fn child_sections(tree: &XmlTree, node: NodeId) -> Vec<NodeId> {
    tree.children_named(node, "component")
        .flat_map(|component| tree.children_named(component, "section"))
        .collect()
}

/// Sections without a usable `<id root>` get a name-based UUID derived from
/// the document identifier and their pre-order position, so every strategy
/// assigns the same identifier to the same node.
fn derived_guid(namespace: Uuid, ordinal: i32) -> Uuid {
    Uuid::new_v5(&namespace, format!("section:{}", ordinal).as_bytes())
}

pub(crate) fn read_section(
    tree: &XmlTree,
    node: NodeId,
    namespace: Uuid,
    ordinal: i32,
    result: &mut ParseResult,
) -> SectionFields {
    let guid = match tree.child(node, "id").and_then(|id| tree.attr_owned(id, "root")) {
        Some(root) => Uuid::parse_str(&root).unwrap_or_else(|_| {
            result.error(format!("Malformed section id '{}' at position {}", root, ordinal));
            derived_guid(namespace, ordinal)
        }),
        None => derived_guid(namespace, ordinal),
    };

    SectionFields {
        guid,
        code: child_coded_value(tree, node, "code"),
        title: tree.child_text(node, "title"),
        effective_time: effective_time(tree, node, result),
        text_content: tree.child_text(node, "text"),
    }
}

/// Write the parent/child edge once per pair.
fn link_to_parent(
    ctx: &mut ParsingContext<'_>,
    parent_id: i64,
    child_id: i64,
    result: &mut ParseResult,
) -> Result<(), ParseError> {
    if !ctx.record_edge(parent_id, child_id) {
        return Ok(());
    }
    ctx.repo().insert(&SectionHierarchyEdge {
        id: None,
        parent_section_id: parent_id,
        child_section_id: child_id,
        sequence_number: ctx.sequence_number,
    })?;
    result.counts.section_hierarchies += 1;
    Ok(())
}

/// Creates the section, its content and, recursively, its child sections.
pub(super) fn parse_section(
    tree: &XmlTree,
    node: NodeId,
    ctx: &mut ParsingContext<'_>,
    iteration: Iteration,
) -> Result<ParseResult, ParseError> {
    let mut result = ParseResult::new();

    if iteration == Iteration::Internal {
        let saved_sequence = ctx.sequence_number;
        for (index, child) in child_sections(tree, node).into_iter().enumerate() {
            ctx.sequence_number = Some(index as i32 + 1);
            result.merge(ctx.dispatch(Construct::Section, tree, child, Iteration::Caller)?);
        }
        ctx.sequence_number = saved_sequence;
        return Ok(result);
    }

    let ordinal = ctx.next_section_ordinal();
    let fields = read_section(tree, node, ctx.document_guid, ordinal, &mut result);

    let Some(document_id) = ctx.document_id else {
        result.error("Section outside of a document");
        return Ok(result);
    };
    let parent_id = ctx.section_id;

    if let Some(existing) = ctx.section_id_for(&fields.guid) {
        // The same section id appearing twice is redundancy in the source;
        // the section exists once and only the edge is added.
        debug!("Section {} already created, linking only", fields.guid);
        match parent_id {
            Some(parent) if parent == existing => {
                result.error(format!("Section {} is nested inside itself", fields.guid));
            }
            Some(parent) => link_to_parent(ctx, parent, existing, &mut result)?,
            None => {}
        }
        return Ok(result);
    }

    let section = Section {
        id: None,
        document_id,
        structured_body_id: ctx.structured_body_id,
        section_guid: fields.guid,
        code: fields.code,
        title: fields.title,
        effective_time: fields.effective_time,
        text_content: fields.text_content,
        level: ctx.section_level,
        parent_section_id: parent_id,
        document_order: ordinal,
    };
    let section_id = ctx.repo().insert(&section)?;
    ctx.register_section(section.section_guid, section_id);
    result.counts.sections += 1;

    if let Some(parent) = parent_id {
        link_to_parent(ctx, parent, section_id, &mut result)?;
    }

    ctx.report(ParseProgress::SectionParsed {
        document_order: ordinal,
        title: section.title.clone(),
    });

    let saved = (ctx.section_id, ctx.section_level);
    ctx.section_id = Some(section_id);
    result.merge(ctx.dispatch(Construct::SectionContent, tree, node, Iteration::Caller)?);

    ctx.section_level += 1;
    result.merge(ctx.dispatch(Construct::Section, tree, node, Iteration::Internal)?);
    (ctx.section_id, ctx.section_level) = saved;

    Ok(result)
}

/// Everything attached to a section other than child sections.
pub(super) fn parse_section_content(
    tree: &XmlTree,
    node: NodeId,
    ctx: &mut ParsingContext<'_>,
    iteration: Iteration,
) -> Result<ParseResult, ParseError> {
    let mut result = ParseResult::new();

    let sections = match iteration {
        Iteration::Caller => vec![node],
        Iteration::Internal => child_sections(tree, node),
    };

    for section in sections {
        for subject in tree.children_named(section, "subject") {
            for product in tree.children_named(subject, Construct::Product.element()) {
                result.merge(ctx.dispatch(Construct::Product, tree, product, Iteration::Caller)?);
            }
        }
    }

    Ok(result)
}
