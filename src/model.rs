//! Relational rows produced by the SPL parsers.
//!
//! `id` is `None` until the row has been written by a unit of work.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A `code`/`codeSystem`/`displayName` triple as it appears on SPL elements.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CodedValue {
    pub code: Option<String>,
    pub code_system: Option<String>,
    pub display_name: Option<String>,
}

impl CodedValue {
    pub fn is_empty(&self) -> bool {
        self.code.is_none() && self.code_system.is_none() && self.display_name.is_none()
    }
}

/// One labeling submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: Option<i64>,
    /// Raw content row this document was parsed from.
    pub spl_data_id: Option<i64>,
    /// `<id root>` of the document element.
    pub document_guid: Uuid,
    pub set_guid: Option<Uuid>,
    pub version_number: Option<i32>,
    pub code: CodedValue,
    pub title: Option<String>,
    pub effective_time: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructuredBody {
    pub id: Option<i64>,
    pub document_id: i64,
}

/// A titled, coded content node. Structure lives in [`SectionHierarchyEdge`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub id: Option<i64>,
    pub document_id: i64,
    pub structured_body_id: Option<i64>,
    pub section_guid: Uuid,
    pub code: CodedValue,
    pub title: Option<String>,
    pub effective_time: Option<NaiveDate>,
    pub text_content: Option<String>,
    /// Nesting level, top-level sections are 0.
    pub level: i32,
    pub parent_section_id: Option<i64>,
    /// Position of the section in a pre-order walk of the document.
    pub document_order: i32,
}

/// Parent/child relation between two persisted sections.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SectionHierarchyEdge {
    pub id: Option<i64>,
    pub parent_section_id: i64,
    pub child_section_id: i64,
    pub sequence_number: Option<i32>,
}

/// Labeler/registrant organization from the document author block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    pub id: Option<i64>,
    pub document_id: i64,
    pub parent_organization_id: Option<i64>,
    pub name: Option<String>,
    pub duns: Option<String>,
}

/// An operation (manufacture, pack, label, ...) performed by an organization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BusinessOperation {
    pub id: Option<i64>,
    pub organization_id: i64,
    pub operation: CodedValue,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: Option<i64>,
    pub document_id: i64,
    pub section_id: Option<i64>,
    pub name: Option<String>,
    /// Product code, usually the NDC product code.
    pub code: CodedValue,
    pub form: CodedValue,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ingredient {
    pub id: Option<i64>,
    pub product_id: i64,
    /// ACTIB, ACTIM, IACT, ...
    pub class_code: Option<String>,
    pub substance_name: Option<String>,
    pub unii: Option<String>,
    pub numerator_value: Option<f64>,
    pub numerator_unit: Option<String>,
    pub denominator_value: Option<f64>,
    pub denominator_unit: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PackagingLevel {
    pub id: Option<i64>,
    pub product_id: i64,
    pub parent_packaging_id: Option<i64>,
    pub package_code: Option<String>,
    pub form: CodedValue,
    pub quantity_value: Option<f64>,
    pub quantity_unit: Option<String>,
    /// 1 for the innermost container declared on the product.
    pub level: i32,
}

/// Marketing approval (NDA, ANDA, BLA, ...) attached to a product.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct License {
    pub id: Option<i64>,
    pub product_id: i64,
    pub approval_number: Option<String>,
    pub approval: CodedValue,
}
