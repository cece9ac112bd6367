//! How section structure gets built for a structured body.

use tracing::warn;

use super::bulk::build_structure;
use super::context::{FeatureFlags, ParseProgress, ParsingContext};
use super::discovery::discover_sections;
use super::parsers::{child_sections, Construct, Iteration};
use super::result::ParseResult;
use super::xml::{NodeId, XmlTree};
use crate::error::ParseError;

const SUBTREE_SAVEPOINT: &str = "spl_section";

/// Builds the sections, edges and section content below a structured body.
pub trait StructureStrategy {
    fn name(&self) -> &'static str;

    fn build(&self, tree: &XmlTree, body: NodeId, ctx: &mut ParsingContext<'_>) -> Result<ParseResult, ParseError>;
}

/// Create each section as it is visited, recursing through the Section parser.
pub struct NaiveStrategy;

/// Discovery pass, one bulk structural build, then section content.
pub struct StagedBulkStrategy;

/// Pick the strategy for one document.
pub fn select(flags: FeatureFlags) -> Box<dyn StructureStrategy> {
    if flags.use_staged_bulk {
        Box::new(StagedBulkStrategy)
    } else {
        Box::new(NaiveStrategy)
    }
}

/// What a failed subtree takes back with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rollback {
    /// Only the rows written by the subtree.
    Rows,
    /// Rows plus the section ids and edges registered while building it.
    RowsAndSections,
}

/// Run `work` in its own savepoint unless the whole document is saved as one
/// batch. A failed subtree is rolled back and reported; the rest of the
/// document continues. Wiring errors still abort.
fn isolated<F>(
    ctx: &mut ParsingContext<'_>,
    label: &str,
    rollback: Rollback,
    work: F,
) -> Result<ParseResult, ParseError>
where
    F: FnOnce(&mut ParsingContext<'_>) -> Result<ParseResult, ParseError>,
{
    if ctx.flags.use_batch_save {
        return work(ctx);
    }

    let state = (rollback == Rollback::RowsAndSections).then(|| ctx.section_state());
    ctx.repo().savepoint(SUBTREE_SAVEPOINT)?;
    match work(ctx) {
        Ok(result) => {
            ctx.repo().release(SUBTREE_SAVEPOINT)?;
            Ok(result)
        }
        Err(e) if e.is_wiring() => Err(e),
        Err(e) => {
            warn!("Rolled back {}: {}", label, e);
            ctx.repo().rollback_to(SUBTREE_SAVEPOINT)?;
            if let Some(state) = state {
                ctx.restore_section_state(state);
            }
            Ok(ParseResult::failure(format!("{} rolled back: {}", label, e)))
        }
    }
}

impl StructureStrategy for NaiveStrategy {
    fn name(&self) -> &'static str {
        "naive"
    }

    fn build(&self, tree: &XmlTree, body: NodeId, ctx: &mut ParsingContext<'_>) -> Result<ParseResult, ParseError> {
        let mut result = ParseResult::new();
        let saved = (ctx.section_id, ctx.section_level, ctx.sequence_number);

        for (index, section) in child_sections(tree, body).into_iter().enumerate() {
            ctx.section_id = None;
            ctx.section_level = 0;
            ctx.sequence_number = Some(index as i32 + 1);
            let label = format!("top-level section {}", index + 1);
            result.merge(isolated(ctx, &label, Rollback::RowsAndSections, |ctx| {
                ctx.dispatch(Construct::Section, tree, section, Iteration::Caller)
            })?);
        }

        (ctx.section_id, ctx.section_level, ctx.sequence_number) = saved;
        Ok(result)
    }
}

impl StructureStrategy for StagedBulkStrategy {
    fn name(&self) -> &'static str {
        "staged-bulk"
    }

    fn build(&self, tree: &XmlTree, body: NodeId, ctx: &mut ParsingContext<'_>) -> Result<ParseResult, ParseError> {
        let mut result = ParseResult::new();

        let mut discovery = discover_sections(tree, body, ctx.document_guid);
        for error in discovery.errors.drain(..) {
            result.error(error);
        }
        result.merge(build_structure(&mut discovery, ctx)?);

        let saved = (ctx.section_id, ctx.section_level);
        for descriptor in &discovery.sections {
            ctx.section_id = descriptor.persisted_id;
            ctx.section_level = descriptor.level;
            ctx.report(ParseProgress::SectionParsed {
                document_order: descriptor.document_order,
                title: descriptor.title.clone(),
            });
            let label = format!("section {}", descriptor.guid);
            result.merge(isolated(ctx, &label, Rollback::Rows, |ctx| {
                ctx.dispatch(Construct::SectionContent, tree, descriptor.node, Iteration::Caller)
            })?);
        }
        (ctx.section_id, ctx.section_level) = saved;

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use rusqlite::params;
    use uuid::Uuid;

    use super::*;
    use crate::db::{Repository, SplDb};
    use crate::error::StoreError;
    use crate::spl::parse_document;
    use crate::spl::parsers::ParserRegistry;
    use crate::test_support::{spl_document, SAMPLE_SPL};

    type EdgeSet = BTreeSet<(String, String, Option<i32>)>;
    type SectionSet = BTreeSet<(String, Option<String>, i32, i32, Option<String>)>;

    fn flags(staged: bool) -> FeatureFlags {
        FeatureFlags {
            use_staged_bulk: staged,
            ..Default::default()
        }
    }

    fn import(db: &mut SplDb, xml: &str, flags: FeatureFlags) -> ParseResult {
        let registry = ParserRegistry::standard();
        let uow = db.begin().unwrap();
        let result = parse_document(&uow, &registry, flags, None, xml, Uuid::new_v4(), None).unwrap();
        uow.commit().unwrap();
        result
    }

    /// Sections keyed by guid with title, level, order and parent guid.
    fn sections(db: &SplDb) -> SectionSet {
        let mut stmt = db
            .connection()
            .prepare(
                "SELECT s.section_guid, s.title, s.section_level, s.document_order, p.section_guid
                 FROM sections s LEFT JOIN sections p ON p.id = s.parent_section_id",
            )
            .unwrap();
        let rows = stmt
            .query_map([], |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, Option<String>>(1)?,
                    r.get::<_, i32>(2)?,
                    r.get::<_, i32>(3)?,
                    r.get::<_, Option<String>>(4)?,
                ))
            })
            .unwrap();
        let set: SectionSet = rows.map(|r| r.unwrap()).collect();
        set
    }

    fn edges(db: &SplDb) -> EdgeSet {
        let mut stmt = db
            .connection()
            .prepare(
                "SELECT p.section_guid, c.section_guid, h.sequence_number FROM section_hierarchy h
                 JOIN sections p ON p.id = h.parent_section_id
                 JOIN sections c ON c.id = h.child_section_id",
            )
            .unwrap();
        let rows = stmt
            .query_map([], |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?, r.get::<_, Option<i32>>(2)?))
            })
            .unwrap();
        let set: EdgeSet = rows.map(|r| r.unwrap()).collect();
        set
    }

    #[test]
    fn test_select_strategy() {
        assert_eq!(select(flags(false)).name(), "naive");
        assert_eq!(select(flags(true)).name(), "staged-bulk");
    }

    #[test]
    fn test_strategies_produce_same_structure() {
        let mut naive = SplDb::in_memory().unwrap();
        let mut staged = SplDb::in_memory().unwrap();

        let naive_result = import(&mut naive, SAMPLE_SPL, flags(false));
        let staged_result = import(&mut staged, SAMPLE_SPL, flags(true));

        assert!(naive_result.success, "{:?}", naive_result.errors);
        assert!(staged_result.success, "{:?}", staged_result.errors);
        assert_eq!(naive_result.counts, staged_result.counts);
        assert_eq!(sections(&naive), sections(&staged));
        assert_eq!(edges(&naive), edges(&staged));
        assert_eq!(naive.entity_totals().unwrap(), staged.entity_totals().unwrap());
    }

    #[test]
    fn test_sample_counts() {
        let mut db = SplDb::in_memory().unwrap();
        let result = import(&mut db, SAMPLE_SPL, flags(true));

        assert_eq!(result.counts.documents, 1);
        assert_eq!(result.counts.sections, 5);
        assert_eq!(result.counts.section_hierarchies, 3);
        assert_eq!(result.counts.organizations, 2);
        assert_eq!(result.counts.business_operations, 2);
        assert_eq!(result.counts.products, 1);
        assert_eq!(result.counts.ingredients, 2);
        assert_eq!(result.counts.packaging_levels, 2);
        assert_eq!(result.counts.licenses, 1);
        assert_eq!(db.entity_totals().unwrap(), result.counts);
    }

    #[test]
    fn test_repeated_child_keeps_first_sequence() {
        let body = r#"
            <component><section><id root="bbbbbbbb-0000-4000-8000-000000000001"/><title>Parent</title>
              <component><section><id root="bbbbbbbb-0000-4000-8000-000000000002"/><title>Child</title></section></component>
              <component><section><id root="bbbbbbbb-0000-4000-8000-000000000002"/><title>Child</title></section></component>
            </section></component>"#;
        let xml = spl_document("bbbbbbbb-0000-4000-8000-0000000000ff", body);

        for staged in [false, true] {
            let mut db = SplDb::in_memory().unwrap();
            let result = import(&mut db, &xml, flags(staged));
            assert!(result.success);
            assert_eq!(result.counts.sections, 2);
            let edges = edges(&db);
            assert_eq!(edges.len(), 1);
            assert_eq!(edges.iter().next().unwrap().2, Some(1));
        }
    }

    #[test]
    fn test_self_nested_section_recorded_in_both() {
        let body = r#"
            <component><section><id root="cccccccc-0000-4000-8000-000000000001"/><title>Loop</title>
              <component><section><id root="cccccccc-0000-4000-8000-000000000001"/></section></component>
            </section></component>"#;
        let xml = spl_document("cccccccc-0000-4000-8000-0000000000ff", body);

        for staged in [false, true] {
            let mut db = SplDb::in_memory().unwrap();
            let result = import(&mut db, &xml, flags(staged));
            assert!(!result.success);
            assert_eq!(result.errors.len(), 1);
            assert_eq!(result.counts.sections, 1);
            assert!(edges(&db).is_empty());
        }
    }

    #[test]
    fn test_discovery_result_builds_once() {
        let mut db = SplDb::in_memory().unwrap();
        let registry = ParserRegistry::standard();
        let uow = db.begin().unwrap();
        let tree = XmlTree::parse(SAMPLE_SPL).unwrap();
        let body = tree.path(tree.root(), &["component", "structuredBody"]).unwrap();

        let mut ctx = ParsingContext::new(&uow, &registry, flags(true), Uuid::nil());
        ctx.document_id = Some(uow.insert(&crate::model::Document::default()).unwrap());

        let mut discovery = discover_sections(&tree, body, Uuid::nil());
        assert!(build_structure(&mut discovery, &mut ctx).is_ok());
        assert!(discovery.sections.iter().all(|d| d.persisted_id.is_some()));
        assert!(matches!(
            build_structure(&mut discovery, &mut ctx),
            Err(ParseError::AlreadyBuilt)
        ));
    }

    #[test]
    fn test_edge_to_unknown_section_is_recorded() {
        let mut db = SplDb::in_memory().unwrap();
        let registry = ParserRegistry::standard();
        let uow = db.begin().unwrap();
        let tree = XmlTree::parse(SAMPLE_SPL).unwrap();
        let body = tree.path(tree.root(), &["component", "structuredBody"]).unwrap();

        let mut ctx = ParsingContext::new(&uow, &registry, flags(true), Uuid::nil());
        ctx.document_id = Some(uow.insert(&crate::model::Document::default()).unwrap());

        let mut discovery = discover_sections(&tree, body, Uuid::nil());
        let known = discovery.edges.len();
        let parent = discovery.sections[0].guid;
        discovery.edges.push(crate::spl::discovery::HierarchyEdgeDescriptor {
            parent_guid: parent,
            child_guid: Uuid::new_v4(),
            sequence_number: Some(9),
        });

        let result = build_structure(&mut discovery, &mut ctx).unwrap();
        assert!(!result.success);
        assert_eq!(result.counts.section_hierarchies, known);
    }

    fn failing_content(
        tree: &XmlTree,
        node: NodeId,
        _ctx: &mut ParsingContext<'_>,
        _iteration: Iteration,
    ) -> Result<ParseResult, ParseError> {
        if tree.child_text(node, "title").as_deref() == Some("Broken") {
            return Err(ParseError::Store(StoreError::Sqlite(rusqlite::Error::InvalidQuery)));
        }
        Ok(ParseResult::new())
    }

    #[test]
    fn test_savepoint_isolates_failed_section() {
        let body = r#"
            <component><section><id root="dddddddd-0000-4000-8000-000000000001"/><title>Fine</title></section></component>
            <component><section><id root="dddddddd-0000-4000-8000-000000000002"/><title>Broken</title>
              <component><section><id root="dddddddd-0000-4000-8000-000000000003"/><title>Lost</title></section></component>
            </section></component>"#;
        let xml = spl_document("dddddddd-0000-4000-8000-0000000000ff", body);

        let mut registry = ParserRegistry::standard();
        registry.register(Construct::SectionContent, failing_content);

        for staged in [false, true] {
            let mut db = SplDb::in_memory().unwrap();
            let uow = db.begin().unwrap();
            let flags = FeatureFlags {
                use_staged_bulk: staged,
                use_batch_save: false,
                ..Default::default()
            };
            let result = parse_document(&uow, &registry, flags, None, &xml, Uuid::nil(), None).unwrap();
            uow.commit().unwrap();

            assert!(!result.success);
            assert_eq!(result.errors.len(), 1);
            let titles: i64 = db
                .connection()
                .query_row("SELECT COUNT(*) FROM sections WHERE title = ?1", params!["Fine"], |r| r.get(0))
                .unwrap();
            assert_eq!(titles, 1);
            let documents: i64 = db
                .connection()
                .query_row("SELECT COUNT(*) FROM documents", [], |r| r.get(0))
                .unwrap();
            assert_eq!(documents, 1);
        }
    }

    #[test]
    fn test_rollback_scope_of_section_state() {
        let mut db = SplDb::in_memory().unwrap();
        let uow = db.begin().unwrap();
        let registry = ParserRegistry::standard();
        let flags = FeatureFlags {
            use_batch_save: false,
            ..Default::default()
        };
        let mut ctx = ParsingContext::new(&uow, &registry, flags, Uuid::nil());

        let fail = |ctx: &mut ParsingContext<'_>| -> Result<ParseResult, ParseError> {
            ctx.register_section(Uuid::new_v4(), 1);
            Err(ParseError::Store(StoreError::Sqlite(rusqlite::Error::InvalidQuery)))
        };

        let result = isolated(&mut ctx, "restored", Rollback::RowsAndSections, fail).unwrap();
        assert!(!result.success);
        assert_eq!(ctx.section_count(), 0);

        let result = isolated(&mut ctx, "rows only", Rollback::Rows, fail).unwrap();
        assert!(!result.success);
        assert_eq!(ctx.section_count(), 1);
    }

    #[test]
    fn test_staged_content_failure_keeps_structure() {
        let body = r#"
            <component><section><id root="dddddddd-0000-4000-8000-000000000011"/><title>Broken</title>
              <component><section><id root="dddddddd-0000-4000-8000-000000000012"/><title>Kept</title></section></component>
            </section></component>"#;
        let xml = spl_document("dddddddd-0000-4000-8000-0000000000fe", body);

        let mut registry = ParserRegistry::standard();
        registry.register(Construct::SectionContent, failing_content);

        let mut db = SplDb::in_memory().unwrap();
        let uow = db.begin().unwrap();
        let flags = FeatureFlags {
            use_staged_bulk: true,
            use_batch_save: false,
            ..Default::default()
        };
        let result = parse_document(&uow, &registry, flags, None, &xml, Uuid::nil(), None).unwrap();
        uow.commit().unwrap();

        assert_eq!(result.errors.len(), 1);
        let totals = db.entity_totals().unwrap();
        assert_eq!(totals.sections, 2);
        assert_eq!(totals.section_hierarchies, 1);
    }

    #[test]
    fn test_batch_save_propagates_storage_error() {
        let xml = spl_document(
            "eeeeeeee-0000-4000-8000-0000000000ff",
            "<component><section><title>Broken</title></section></component>",
        );
        let mut registry = ParserRegistry::standard();
        registry.register(Construct::SectionContent, failing_content);

        let mut db = SplDb::in_memory().unwrap();
        let uow = db.begin().unwrap();
        let outcome = parse_document(&uow, &registry, FeatureFlags::default(), None, &xml, Uuid::nil(), None);
        assert!(matches!(outcome, Err(ParseError::Store(_))));
    }
}
