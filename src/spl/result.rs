//! Parse outcome and per-entity creation counters.

use std::ops::AddAssign;

use serde::Serialize;

/// Number of rows created per entity kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EntityCounts {
    pub documents: usize,
    pub structured_bodies: usize,
    pub sections: usize,
    pub section_hierarchies: usize,
    pub organizations: usize,
    pub business_operations: usize,
    pub products: usize,
    pub ingredients: usize,
    pub packaging_levels: usize,
    pub licenses: usize,
}

impl EntityCounts {
    pub fn total(&self) -> usize {
        self.documents
            + self.structured_bodies
            + self.sections
            + self.section_hierarchies
            + self.organizations
            + self.business_operations
            + self.products
            + self.ingredients
            + self.packaging_levels
            + self.licenses
    }
}

impl AddAssign for EntityCounts {
    fn add_assign(&mut self, rhs: Self) {
        self.documents += rhs.documents;
        self.structured_bodies += rhs.structured_bodies;
        self.sections += rhs.sections;
        self.section_hierarchies += rhs.section_hierarchies;
        self.organizations += rhs.organizations;
        self.business_operations += rhs.business_operations;
        self.products += rhs.products;
        self.ingredients += rhs.ingredients;
        self.packaging_levels += rhs.packaging_levels;
        self.licenses += rhs.licenses;
    }
}

/// Outcome of one parser invocation.
///
/// Results merge upward: counters add, errors concatenate, and any failed
/// part marks the whole as failed. Counters keep merging after a failure so
/// partial progress is still reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParseResult {
    pub success: bool,
    pub errors: Vec<String>,
    pub counts: EntityCounts,
}

impl Default for ParseResult {
    fn default() -> Self {
        Self {
            success: true,
            errors: Vec::new(),
            counts: EntityCounts::default(),
        }
    }
}

impl ParseResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failure(message: impl Into<String>) -> Self {
        let mut result = Self::default();
        result.error(message);
        result
    }

    /// Record a data error; the result becomes unsuccessful.
    pub fn error(&mut self, message: impl Into<String>) {
        self.success = false;
        self.errors.push(message.into());
    }

    pub fn merge(&mut self, other: ParseResult) {
        self.success &= other.success;
        self.errors.extend(other.errors);
        self.counts += other.counts;
    }
}

impl AddAssign for ParseResult {
    fn add_assign(&mut self, rhs: Self) {
        self.merge(rhs);
    }
}
