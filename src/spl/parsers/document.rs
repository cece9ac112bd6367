//! Document header and structured body.

use tracing::{debug, warn};
use uuid::Uuid;

use super::{child_coded_value, effective_time, Construct, Iteration};
use crate::db::Repository;
use crate::error::ParseError;
use crate::model::{Document, StructuredBody};
use crate::spl::context::{ParseProgress, ParsingContext};
use crate::spl::result::ParseResult;
use crate::spl::strategy;
use crate::spl::xml::{normalize_whitespace, NodeId, XmlTree};

pub(super) fn parse_document(
    tree: &XmlTree,
    node: NodeId,
    ctx: &mut ParsingContext<'_>,
    _iteration: Iteration,
) -> Result<ParseResult, ParseError> {
    let mut result = ParseResult::new();

    if tree.name(node) != Construct::Document.element() {
        result.error(format!("Root element is <{}>, expected <document>", tree.name(node)));
        return Ok(result);
    }

    let document_guid = match tree.child(node, "id").and_then(|id| tree.attr_owned(id, "root")) {
        Some(root) => match Uuid::parse_str(&root) {
            Ok(guid) => guid,
            Err(_) => {
                warn!("Document id '{}' is not a GUID, using entry identifier", root);
                result.error(format!("Malformed document id '{}'", root));
                ctx.file_guid
            }
        },
        None => ctx.file_guid,
    };
    ctx.document_guid = document_guid;
    ctx.report(ParseProgress::DocumentStarted { document_guid });

    let set_guid = tree
        .child(node, "setId")
        .and_then(|s| tree.attr_owned(s, "root"))
        .and_then(|root| Uuid::parse_str(&root).ok());

    let version_number = match tree
        .child(node, "versionNumber")
        .and_then(|v| tree.attr_owned(v, "value"))
    {
        Some(raw) => match raw.parse::<i32>() {
            Ok(v) => Some(v),
            Err(_) => {
                result.error(format!("Malformed versionNumber '{}'", raw));
                None
            }
        },
        None => None,
    };

    let document = Document {
        id: None,
        spl_data_id: ctx.spl_data_id,
        document_guid,
        set_guid,
        version_number,
        code: child_coded_value(tree, node, "code"),
        title: tree.child_text(node, "title").map(|t| normalize_whitespace(&t)),
        effective_time: effective_time(tree, node, &mut result),
    };

    let document_id = ctx.repo().insert(&document)?;
    ctx.document_id = Some(document_id);
    result.counts.documents += 1;
    debug!("Created document {} ({})", document_id, document_guid);

    result.merge(ctx.dispatch(Construct::Author, tree, node, Iteration::Internal)?);

    match tree.path(node, &["component", "structuredBody"]) {
        Some(body) => {
            result.merge(ctx.dispatch(Construct::StructuredBody, tree, body, Iteration::Caller)?);
        }
        None => result.error("Document has no structuredBody"),
    }

    ctx.report(ParseProgress::DocumentFinished {
        sections: ctx.section_count(),
    });

    Ok(result)
}

/// Create the body row, then hand section structure to the configured strategy.
pub(super) fn parse_structured_body(
    tree: &XmlTree,
    node: NodeId,
    ctx: &mut ParsingContext<'_>,
    _iteration: Iteration,
) -> Result<ParseResult, ParseError> {
    let mut result = ParseResult::new();

    let Some(document_id) = ctx.document_id else {
        result.error("structuredBody outside of a document");
        return Ok(result);
    };

    let body_id = ctx.repo().insert(&StructuredBody {
        id: None,
        document_id,
    })?;
    ctx.structured_body_id = Some(body_id);
    result.counts.structured_bodies += 1;

    let strategy = strategy::select(ctx.flags);
    debug!("Building sections with {} strategy", strategy.name());
    result.merge(strategy.build(tree, node, ctx)?);

    Ok(result)
}
