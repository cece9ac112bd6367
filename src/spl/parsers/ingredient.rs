//! Product ingredients with substance and strength.

use super::{physical_quantity, Iteration};
use crate::db::Repository;
use crate::error::ParseError;
use crate::model::Ingredient;
use crate::spl::context::ParsingContext;
use crate::spl::result::ParseResult;
use crate::spl::xml::{normalize_whitespace, NodeId, XmlTree};

/// Current SPL uses `ingredient`; older documents split active and inactive.
const INGREDIENT_ELEMENTS: [&str; 3] = ["ingredient", "activeIngredient", "inactiveIngredient"];
const SUBSTANCE_ELEMENTS: [&str; 3] = [
    "ingredientSubstance",
    "activeIngredientSubstance",
    "inactiveIngredientSubstance",
];

fn read_ingredient(tree: &XmlTree, node: NodeId, product_id: i64, result: &mut ParseResult) -> Ingredient {
    let mut ingredient = Ingredient {
        product_id,
        class_code: tree.attr_owned(node, "classCode"),
        ..Default::default()
    };

    if let Some(quantity) = tree.child(node, "quantity") {
        if let Some(numerator) = tree.child(quantity, "numerator") {
            (ingredient.numerator_value, ingredient.numerator_unit) =
                physical_quantity(tree, numerator, result);
        }
        if let Some(denominator) = tree.child(quantity, "denominator") {
            (ingredient.denominator_value, ingredient.denominator_unit) =
                physical_quantity(tree, denominator, result);
        }
    }

    let substance = SUBSTANCE_ELEMENTS.iter().find_map(|name| tree.child(node, name));
    match substance {
        Some(substance) => {
            ingredient.substance_name = tree.child_text(substance, "name").map(|n| normalize_whitespace(&n));
            ingredient.unii = tree.child(substance, "code").and_then(|c| tree.attr_owned(c, "code"));
        }
        None => result.error(format!("Ingredient without a substance on product {}", product_id)),
    }

    ingredient
}

pub(super) fn parse_ingredients(
    tree: &XmlTree,
    node: NodeId,
    ctx: &mut ParsingContext<'_>,
    iteration: Iteration,
) -> Result<ParseResult, ParseError> {
    let mut result = ParseResult::new();

    let Some(product_id) = ctx.product_id else {
        result.error("Ingredient outside of a product");
        return Ok(result);
    };

    let nodes: Vec<NodeId> = match iteration {
        Iteration::Caller => vec![node],
        Iteration::Internal => tree
            .children(node)
            .filter(|&c| INGREDIENT_ELEMENTS.contains(&tree.name(c)))
            .collect(),
    };

    let rows: Vec<Ingredient> = nodes
        .into_iter()
        .map(|n| read_ingredient(tree, n, product_id, &mut result))
        .collect();

    if ctx.flags.use_bulk {
        ctx.repo().insert_many(rows.as_slice())?;
    } else {
        for row in &rows {
            ctx.repo().insert(row)?;
        }
    }
    result.counts.ingredients += rows.len();

    Ok(result)
}
