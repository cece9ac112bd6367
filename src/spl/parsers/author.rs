//! Author block: labeler, registrant and establishment organizations.

use super::{coded_value, Construct, Iteration};
use crate::db::Repository;
use crate::error::ParseError;
use crate::model::{BusinessOperation, Organization};
use crate::spl::context::ParsingContext;
use crate::spl::result::ParseResult;
use crate::spl::xml::{normalize_whitespace, NodeId, XmlTree};

/// Organization parser.
///
/// `Internal` starts from the document element and walks
/// `author/assignedEntity/representedOrganization`. `Caller` receives one
/// organization element; nested `assignedEntity/assignedOrganization`
/// elements are parsed recursively as children of it.
pub(super) fn parse_organization(
    tree: &XmlTree,
    node: NodeId,
    ctx: &mut ParsingContext<'_>,
    iteration: Iteration,
) -> Result<ParseResult, ParseError> {
    let mut result = ParseResult::new();

    if iteration == Iteration::Internal {
        for author in tree.children_named(node, "author") {
            for entity in tree.children_named(author, "assignedEntity") {
                for org in tree.children_named(entity, Construct::Author.element()) {
                    result.merge(ctx.dispatch(Construct::Author, tree, org, Iteration::Caller)?);
                }
            }
        }
        return Ok(result);
    }

    let Some(document_id) = ctx.document_id else {
        result.error("Organization outside of a document");
        return Ok(result);
    };

    let organization = Organization {
        id: None,
        document_id,
        parent_organization_id: ctx.organization_id,
        name: tree.child_text(node, "name").map(|n| normalize_whitespace(&n)),
        duns: tree
            .children_named(node, "id")
            .find_map(|id| tree.attr_owned(id, "extension")),
    };
    let organization_id = ctx.repo().insert(&organization)?;
    result.counts.organizations += 1;

    let saved = ctx.organization_id;
    ctx.organization_id = Some(organization_id);

    // Operations sit beside the organization inside its assignedEntity.
    if let Some(entity) = tree.parent(node).filter(|&p| tree.name(p) == "assignedEntity") {
        result.merge(ctx.dispatch(Construct::BusinessOperation, tree, entity, Iteration::Internal)?);
    }

    for entity in tree.children_named(node, "assignedEntity") {
        for child in tree.children_named(entity, "assignedOrganization") {
            result.merge(ctx.dispatch(Construct::Author, tree, child, Iteration::Caller)?);
        }
    }

    ctx.organization_id = saved;
    Ok(result)
}

pub(super) fn parse_business_operations(
    tree: &XmlTree,
    node: NodeId,
    ctx: &mut ParsingContext<'_>,
    iteration: Iteration,
) -> Result<ParseResult, ParseError> {
    let mut result = ParseResult::new();

    let Some(organization_id) = ctx.organization_id else {
        result.error("Business operation outside of an organization");
        return Ok(result);
    };

    let performances: Vec<NodeId> = match iteration {
        Iteration::Caller => vec![node],
        Iteration::Internal => tree
            .children_named(node, Construct::BusinessOperation.element())
            .collect(),
    };

    let rows: Vec<BusinessOperation> = performances
        .into_iter()
        .filter_map(|p| tree.path(p, &["actDefinition", "code"]))
        .map(|code| BusinessOperation {
            id: None,
            organization_id,
            operation: coded_value(tree, code),
        })
        .collect();

    if ctx.flags.use_bulk {
        ctx.repo().insert_many(rows.as_slice())?;
    } else {
        for row in &rows {
            ctx.repo().insert(row)?;
        }
    }
    result.counts.business_operations += rows.len();

    Ok(result)
}
