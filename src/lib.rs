//! splimport - SPL labeling archive importer
//!
//! Reads structured product labeling documents out of zip archives,
//! stores them in SQLite as documents, sections, hierarchy edges and
//! products, and rebuilds the section tree for rendering.

pub mod archive;
pub mod db;
pub mod error;
pub mod import;
pub mod model;
pub mod render;
pub mod settings;
pub mod spl;

#[cfg(test)]
mod test_support;
