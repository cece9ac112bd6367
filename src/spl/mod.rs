//! SPL document parsing.
//!
//! A document is read into an [`xml::XmlTree`] and handed to the parser
//! registered for [`parsers::Construct::Document`]. Everything it writes
//! goes through the unit of work passed in, so the caller decides whether
//! the document commits.

pub mod bulk;
pub mod context;
pub mod discovery;
pub mod parsers;
pub mod result;
pub mod strategy;
pub mod xml;

use uuid::Uuid;

use crate::db::UnitOfWork;
use crate::error::ParseError;
use context::{FeatureFlags, ParseProgress, ParsingContext};
use parsers::{Construct, Iteration, ParserRegistry};
use result::ParseResult;
use xml::XmlTree;

/// Parse one document's XML into the open unit of work.
///
/// Data problems come back in the [`ParseResult`]; an `Err` means the unit of
/// work must not be committed.
pub fn parse_document(
    uow: &UnitOfWork<'_>,
    registry: &ParserRegistry,
    flags: FeatureFlags,
    progress: Option<&dyn Fn(&ParseProgress)>,
    xml: &str,
    file_guid: Uuid,
    spl_data_id: Option<i64>,
) -> Result<ParseResult, ParseError> {
    let tree = XmlTree::parse(xml)?;
    let mut ctx = ParsingContext::new(uow, registry, flags, file_guid)
        .with_progress(progress)
        .with_spl_data(spl_data_id);
    ctx.dispatch(Construct::Document, &tree, tree.root(), Iteration::Caller)
}
