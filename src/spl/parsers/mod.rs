//! Per-construct SPL parsers and the registry that dispatches to them.
//!
//! Every parser has the same shape ([`ParseFn`]): it receives one XML node,
//! the shared [`ParsingContext`] and an [`Iteration`] flag, and returns a
//! [`ParseResult`]. Parsers compose by dispatching other constructs through
//! the context, which keeps the current document/section/product ids
//! visible to nested calls.

mod author;
mod document;
mod ingredient;
mod packaging;
mod product;
mod section;

use std::collections::HashMap;

use chrono::NaiveDate;

use super::context::ParsingContext;
use super::result::ParseResult;
use super::xml::{normalize_whitespace, NodeId, XmlTree};
use crate::error::ParseError;
use crate::model::CodedValue;

pub(crate) use section::{child_sections, read_section};

/// Document constructs with a registered parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Construct {
    Document,
    Author,
    BusinessOperation,
    StructuredBody,
    Section,
    SectionContent,
    Product,
    Ingredient,
    Packaging,
    License,
}

impl Construct {
    pub const ALL: [Construct; 10] = [
        Construct::Document,
        Construct::Author,
        Construct::BusinessOperation,
        Construct::StructuredBody,
        Construct::Section,
        Construct::SectionContent,
        Construct::Product,
        Construct::Ingredient,
        Construct::Packaging,
        Construct::License,
    ];

    /// SPL element name the construct is read from.
    pub fn element(&self) -> &'static str {
        match self {
            Construct::Document => "document",
            Construct::Author => "representedOrganization",
            Construct::BusinessOperation => "performance",
            Construct::StructuredBody => "structuredBody",
            Construct::Section | Construct::SectionContent => "section",
            Construct::Product => "manufacturedProduct",
            Construct::Ingredient => "ingredient",
            Construct::Packaging => "asContent",
            Construct::License => "approval",
        }
    }
}

/// Who walks sibling nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Iteration {
    /// The node *is* the construct; the caller loops over siblings.
    Caller,
    /// The node is a container; the parser finds and loops over the
    /// construct's elements below it.
    Internal,
}

pub type ParseFn =
    fn(&XmlTree, NodeId, &mut ParsingContext<'_>, Iteration) -> Result<ParseResult, ParseError>;

/// Registration table from construct to parser function.
#[derive(Clone)]
pub struct ParserRegistry {
    parsers: HashMap<Construct, ParseFn>,
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl ParserRegistry {
    /// A registry with nothing registered.
    pub fn empty() -> Self {
        Self {
            parsers: HashMap::new(),
        }
    }

    /// All built-in parsers.
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        registry.register(Construct::Document, document::parse_document);
        registry.register(Construct::Author, author::parse_organization);
        registry.register(Construct::BusinessOperation, author::parse_business_operations);
        registry.register(Construct::StructuredBody, document::parse_structured_body);
        registry.register(Construct::Section, section::parse_section);
        registry.register(Construct::SectionContent, section::parse_section_content);
        registry.register(Construct::Product, product::parse_product);
        registry.register(Construct::Ingredient, ingredient::parse_ingredients);
        registry.register(Construct::Packaging, packaging::parse_packaging);
        registry.register(Construct::License, product::parse_licenses);
        registry
    }

    /// Register or replace the parser for a construct.
    pub fn register(&mut self, construct: Construct, parser: ParseFn) {
        self.parsers.insert(construct, parser);
    }

    pub fn get(&self, construct: Construct) -> Option<ParseFn> {
        self.parsers.get(&construct).copied()
    }

    pub fn is_registered(&self, construct: Construct) -> bool {
        self.parsers.contains_key(&construct)
    }

    pub fn parse(
        &self,
        construct: Construct,
        tree: &XmlTree,
        node: NodeId,
        ctx: &mut ParsingContext<'_>,
        iteration: Iteration,
    ) -> Result<ParseResult, ParseError> {
        let parser = self
            .parsers
            .get(&construct)
            .ok_or(ParseError::Unregistered(construct))?;
        parser(tree, node, ctx, iteration)
    }
}

/// Read `code`/`codeSystem`/`displayName` from an element.
pub(crate) fn coded_value(tree: &XmlTree, node: NodeId) -> CodedValue {
    CodedValue {
        code: tree.attr_owned(node, "code"),
        code_system: tree.attr_owned(node, "codeSystem"),
        display_name: tree.attr_owned(node, "displayName").map(|d| normalize_whitespace(&d)),
    }
}

/// Coded value of a named child, empty when the child is missing.
pub(crate) fn child_coded_value(tree: &XmlTree, node: NodeId, name: &str) -> CodedValue {
    tree.child(node, name)
        .map(|c| coded_value(tree, c))
        .unwrap_or_default()
}

/// HL7 `TS` values start with `YYYYMMDD`; time and zone parts are dropped.
pub(crate) fn parse_hl7_date(value: &str) -> Option<NaiveDate> {
    let digits = value.get(..8)?;
    NaiveDate::parse_from_str(digits, "%Y%m%d").ok()
}

/// `effectiveTime@value` of a node, recording unparsable values.
pub(crate) fn effective_time(tree: &XmlTree, node: NodeId, result: &mut ParseResult) -> Option<NaiveDate> {
    let value = tree.child(node, "effectiveTime")?;
    let raw = tree.attr_owned(value, "value")?;
    let date = parse_hl7_date(&raw);
    if date.is_none() {
        result.error(format!("Unparsable effectiveTime '{}'", raw));
    }
    date
}

/// A `PQ` element's value and unit.
pub(crate) fn physical_quantity(
    tree: &XmlTree,
    node: NodeId,
    result: &mut ParseResult,
) -> (Option<f64>, Option<String>) {
    let unit = tree.attr_owned(node, "unit");
    let value = match tree.attr_owned(node, "value") {
        Some(raw) => match raw.parse::<f64>() {
            Ok(v) => Some(v),
            Err(_) => {
                result.error(format!("Malformed quantity value '{}'", raw));
                None
            }
        },
        None => None,
    };
    (value, unit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_registry_covers_all_constructs() {
        let registry = ParserRegistry::standard();
        for construct in Construct::ALL {
            assert!(registry.is_registered(construct), "{:?} not registered", construct);
        }
        assert!(!ParserRegistry::empty().is_registered(Construct::Section));
    }

    #[test]
    fn test_parse_hl7_date() {
        assert_eq!(parse_hl7_date("20240131"), NaiveDate::from_ymd_opt(2024, 1, 31));
        assert_eq!(parse_hl7_date("20240131120000-0500"), NaiveDate::from_ymd_opt(2024, 1, 31));
        assert_eq!(parse_hl7_date("2024"), None);
        assert_eq!(parse_hl7_date("20241340"), None);
    }

    #[test]
    fn test_coded_value() {
        let tree = XmlTree::parse(
            r#"<code code="34067-9" codeSystem="2.16.840.1.113883.6.1" displayName="INDICATIONS &amp;  USAGE"/>"#,
        )
        .unwrap();
        let coded = coded_value(&tree, tree.root());
        assert_eq!(coded.code.as_deref(), Some("34067-9"));
        assert_eq!(coded.code_system.as_deref(), Some("2.16.840.1.113883.6.1"));
        assert_eq!(coded.display_name.as_deref(), Some("INDICATIONS & USAGE"));
    }

    #[test]
    fn test_physical_quantity_records_bad_value() {
        let tree = XmlTree::parse(r#"<numerator value="ten" unit="mg"/>"#).unwrap();
        let mut result = ParseResult::new();
        let (value, unit) = physical_quantity(&tree, tree.root(), &mut result);
        assert_eq!(value, None);
        assert_eq!(unit.as_deref(), Some("mg"));
        assert!(!result.success);
    }
}
