//! Nested packaging levels (`asContent/containerPackagedProduct`).

use super::{child_coded_value, physical_quantity, Construct, Iteration};
use crate::db::Repository;
use crate::error::ParseError;
use crate::model::PackagingLevel;
use crate::spl::context::ParsingContext;
use crate::spl::result::ParseResult;
use crate::spl::xml::{NodeId, XmlTree};

const CONTAINER: &str = "containerPackagedProduct";

pub(super) fn parse_packaging(
    tree: &XmlTree,
    node: NodeId,
    ctx: &mut ParsingContext<'_>,
    iteration: Iteration,
) -> Result<ParseResult, ParseError> {
    let mut result = ParseResult::new();

    let Some(product_id) = ctx.product_id else {
        result.error("Packaging outside of a product");
        return Ok(result);
    };

    let contents: Vec<NodeId> = match iteration {
        Iteration::Caller => vec![node],
        Iteration::Internal => tree.children_named(node, Construct::Packaging.element()).collect(),
    };

    let level = ctx.packaging_level + 1;
    let mut rows = Vec::with_capacity(contents.len());
    let mut containers = Vec::with_capacity(contents.len());

    for content in contents {
        let Some(container) = tree.child(content, CONTAINER) else {
            result.error(format!("asContent without {} on product {}", CONTAINER, product_id));
            continue;
        };

        let (quantity_value, quantity_unit) = match tree.path(content, &["quantity", "numerator"]) {
            Some(numerator) => physical_quantity(tree, numerator, &mut result),
            None => (None, None),
        };

        rows.push(PackagingLevel {
            id: None,
            product_id,
            parent_packaging_id: ctx.packaging_id,
            package_code: tree.child(container, "code").and_then(|c| tree.attr_owned(c, "code")),
            form: child_coded_value(tree, container, "formCode"),
            quantity_value,
            quantity_unit,
            level,
        });
        containers.push(container);
    }

    let ids = if ctx.flags.use_bulk {
        ctx.repo().insert_many(rows.as_slice())?
    } else {
        let mut ids = Vec::with_capacity(rows.len());
        for row in &rows {
            ids.push(ctx.repo().insert(row)?);
        }
        ids
    };
    result.counts.packaging_levels += rows.len();

    // Outer packages are declared inside the inner container.
    let saved = (ctx.packaging_id, ctx.packaging_level);
    for (id, container) in ids.into_iter().zip(containers) {
        ctx.packaging_id = Some(id);
        ctx.packaging_level = level;
        result.merge(ctx.dispatch(Construct::Packaging, tree, container, Iteration::Internal)?);
    }
    (ctx.packaging_id, ctx.packaging_level) = saved;

    Ok(result)
}
