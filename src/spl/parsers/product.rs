//! Manufactured products and their marketing approvals.

use tracing::debug;

use super::{child_coded_value, Construct, Iteration};
use crate::db::Repository;
use crate::error::ParseError;
use crate::model::{License, Product};
use crate::spl::context::ParsingContext;
use crate::spl::result::ParseResult;
use crate::spl::xml::{normalize_whitespace, NodeId, XmlTree};

/// The product data lives on the inner element of the role:
/// `manufacturedProduct/manufacturedProduct` (or the older
/// `manufacturedMedicine`).
fn product_entity(tree: &XmlTree, role: NodeId) -> NodeId {
    tree.child(role, "manufacturedProduct")
        .or_else(|| tree.child(role, "manufacturedMedicine"))
        .unwrap_or(role)
}

pub(super) fn parse_product(
    tree: &XmlTree,
    node: NodeId,
    ctx: &mut ParsingContext<'_>,
    iteration: Iteration,
) -> Result<ParseResult, ParseError> {
    let mut result = ParseResult::new();

    if iteration == Iteration::Internal {
        for subject in tree.children_named(node, "subject") {
            for role in tree.children_named(subject, Construct::Product.element()) {
                result.merge(ctx.dispatch(Construct::Product, tree, role, Iteration::Caller)?);
            }
        }
        return Ok(result);
    }

    let Some(document_id) = ctx.document_id else {
        result.error("Product outside of a document");
        return Ok(result);
    };

    let entity = product_entity(tree, node);
    let name = tree.child_text(entity, "name").map(|n| normalize_whitespace(&n));
    if name.is_none() {
        result.error(format!(
            "Product without a name in section {}",
            ctx.section_id.map(|id| id.to_string()).unwrap_or_else(|| "-".into())
        ));
    }

    let product = Product {
        id: None,
        document_id,
        section_id: ctx.section_id,
        name,
        code: child_coded_value(tree, entity, "code"),
        form: child_coded_value(tree, entity, "formCode"),
    };
    let product_id = ctx.repo().insert(&product)?;
    result.counts.products += 1;
    debug!("Created product {} ({:?})", product_id, product.name);

    let saved = (ctx.product_id, ctx.packaging_id, ctx.packaging_level);
    ctx.product_id = Some(product_id);
    ctx.packaging_id = None;
    ctx.packaging_level = 0;

    result.merge(ctx.dispatch(Construct::Ingredient, tree, entity, Iteration::Internal)?);
    result.merge(ctx.dispatch(Construct::Packaging, tree, entity, Iteration::Internal)?);
    result.merge(ctx.dispatch(Construct::License, tree, node, Iteration::Internal)?);

    (ctx.product_id, ctx.packaging_id, ctx.packaging_level) = saved;
    Ok(result)
}

/// `subjectOf/approval` under a product role.
pub(super) fn parse_licenses(
    tree: &XmlTree,
    node: NodeId,
    ctx: &mut ParsingContext<'_>,
    iteration: Iteration,
) -> Result<ParseResult, ParseError> {
    let mut result = ParseResult::new();

    let Some(product_id) = ctx.product_id else {
        result.error("Approval outside of a product");
        return Ok(result);
    };

    let approvals: Vec<NodeId> = match iteration {
        Iteration::Caller => vec![node],
        Iteration::Internal => tree
            .children_named(node, "subjectOf")
            .flat_map(|s| tree.children_named(s, Construct::License.element()))
            .collect(),
    };

    for approval in approvals {
        let license = License {
            id: None,
            product_id,
            approval_number: tree.child(approval, "id").and_then(|id| tree.attr_owned(id, "extension")),
            approval: child_coded_value(tree, approval, "code"),
        };
        if license.approval_number.is_none() {
            result.error(format!("Approval without an application number on product {}", product_id));
        }
        ctx.repo().insert(&license)?;
        result.counts.licenses += 1;
    }

    Ok(result)
}
