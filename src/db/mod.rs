//! SQLite storage for imported labeling documents.
//!
//! Stores:
//! - Raw SPL content (for duplicate detection and re-parsing)
//! - Documents, sections and the section hierarchy edge set
//! - Products with their ingredients, packaging and licenses
//! - Author organizations and their business operations

mod repository;

pub use repository::{content_hash, ContentStore, DuplicateDetector, Repository, UnitOfWork};

use std::path::Path;

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::error::StoreError;
use crate::model::{CodedValue, Document, Section, SectionHierarchyEdge};
use crate::spl::result::EntityCounts;

/// Entity types that have a persistence handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    SplData,
    Document,
    StructuredBody,
    Section,
    SectionHierarchy,
    Organization,
    BusinessOperation,
    Product,
    Ingredient,
    PackagingLevel,
    License,
}

impl EntityKind {
    pub const ALL: [EntityKind; 11] = [
        EntityKind::SplData,
        EntityKind::Document,
        EntityKind::StructuredBody,
        EntityKind::Section,
        EntityKind::SectionHierarchy,
        EntityKind::Organization,
        EntityKind::BusinessOperation,
        EntityKind::Product,
        EntityKind::Ingredient,
        EntityKind::PackagingLevel,
        EntityKind::License,
    ];

    pub fn table(&self) -> &'static str {
        match self {
            EntityKind::SplData => "spl_data",
            EntityKind::Document => "documents",
            EntityKind::StructuredBody => "structured_bodies",
            EntityKind::Section => "sections",
            EntityKind::SectionHierarchy => "section_hierarchy",
            EntityKind::Organization => "organizations",
            EntityKind::BusinessOperation => "business_operations",
            EntityKind::Product => "products",
            EntityKind::Ingredient => "ingredients",
            EntityKind::PackagingLevel => "packaging_levels",
            EntityKind::License => "licenses",
        }
    }
}

/// A persisted document with its flat section rows and hierarchy edges.
#[derive(Debug, Clone)]
pub struct DocumentTree {
    pub document: Document,
    /// Sections in original document order.
    pub sections: Vec<Section>,
    pub edges: Vec<SectionHierarchyEdge>,
}

/// One line of the `documents` listing.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentSummary {
    pub id: i64,
    pub document_guid: Uuid,
    pub title: Option<String>,
    pub version_number: Option<i32>,
    pub section_count: usize,
}

/// SQLite-backed label storage
pub struct SplDb {
    conn: Connection,
}

impl SplDb {
    /// Open or create a label database
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path)?;

        // Configure for performance
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = 10000;
             PRAGMA temp_store = MEMORY;
             PRAGMA foreign_keys = ON;",
        )?;

        let db = Self { conn };
        db.create_tables()?;

        info!("Opened label database at {}", db_path.display());
        Ok(db)
    }

    /// Create an in-memory database (for testing)
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        let db = Self { conn };
        db.create_tables()?;

        Ok(db)
    }

    /// Wrap a connection without creating the schema.
    ///
    /// Used to attach to a database whose schema is managed elsewhere;
    /// `begin` reports any table that is missing.
    pub fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }

    fn create_tables(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            r#"
            -- Raw document content
            CREATE TABLE IF NOT EXISTS spl_data (
                id INTEGER PRIMARY KEY,
                document_guid TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                content TEXT NOT NULL,
                imported_by TEXT NOT NULL,
                imported_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_spl_data_guid_hash ON spl_data(document_guid, content_hash);

            CREATE TABLE IF NOT EXISTS documents (
                id INTEGER PRIMARY KEY,
                spl_data_id INTEGER REFERENCES spl_data(id),
                document_guid TEXT NOT NULL,
                set_guid TEXT,
                version_number INTEGER,
                document_code TEXT,
                document_code_system TEXT,
                document_display_name TEXT,
                title TEXT,
                effective_time TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_documents_guid ON documents(document_guid);

            CREATE TABLE IF NOT EXISTS structured_bodies (
                id INTEGER PRIMARY KEY,
                document_id INTEGER NOT NULL REFERENCES documents(id)
            );

            CREATE TABLE IF NOT EXISTS sections (
                id INTEGER PRIMARY KEY,
                document_id INTEGER NOT NULL REFERENCES documents(id),
                structured_body_id INTEGER REFERENCES structured_bodies(id),
                section_guid TEXT NOT NULL,
                section_code TEXT,
                section_code_system TEXT,
                section_display_name TEXT,
                title TEXT,
                effective_time TEXT,
                text_content TEXT,
                section_level INTEGER NOT NULL DEFAULT 0,
                parent_section_id INTEGER REFERENCES sections(id),
                document_order INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_sections_document ON sections(document_id, document_order);
            CREATE INDEX IF NOT EXISTS idx_sections_guid ON sections(section_guid);

            -- Structure lives here, not on the section rows
            CREATE TABLE IF NOT EXISTS section_hierarchy (
                id INTEGER PRIMARY KEY,
                parent_section_id INTEGER NOT NULL REFERENCES sections(id),
                child_section_id INTEGER NOT NULL REFERENCES sections(id),
                sequence_number INTEGER,
                UNIQUE(parent_section_id, child_section_id)
            );

            CREATE INDEX IF NOT EXISTS idx_hierarchy_child ON section_hierarchy(child_section_id);

            CREATE TABLE IF NOT EXISTS organizations (
                id INTEGER PRIMARY KEY,
                document_id INTEGER NOT NULL REFERENCES documents(id),
                parent_organization_id INTEGER REFERENCES organizations(id),
                name TEXT,
                duns TEXT
            );

            CREATE TABLE IF NOT EXISTS business_operations (
                id INTEGER PRIMARY KEY,
                organization_id INTEGER NOT NULL REFERENCES organizations(id),
                operation_code TEXT,
                operation_code_system TEXT,
                operation_display_name TEXT
            );

            CREATE TABLE IF NOT EXISTS products (
                id INTEGER PRIMARY KEY,
                document_id INTEGER NOT NULL REFERENCES documents(id),
                section_id INTEGER REFERENCES sections(id),
                name TEXT,
                product_code TEXT,
                product_code_system TEXT,
                form_code TEXT,
                form_code_system TEXT,
                form_display_name TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_products_section ON products(section_id);

            CREATE TABLE IF NOT EXISTS ingredients (
                id INTEGER PRIMARY KEY,
                product_id INTEGER NOT NULL REFERENCES products(id),
                class_code TEXT,
                substance_name TEXT,
                unii TEXT,
                numerator_value REAL,
                numerator_unit TEXT,
                denominator_value REAL,
                denominator_unit TEXT
            );

            CREATE TABLE IF NOT EXISTS packaging_levels (
                id INTEGER PRIMARY KEY,
                product_id INTEGER NOT NULL REFERENCES products(id),
                parent_packaging_id INTEGER REFERENCES packaging_levels(id),
                package_code TEXT,
                form_code TEXT,
                form_code_system TEXT,
                form_display_name TEXT,
                quantity_value REAL,
                quantity_unit TEXT,
                package_level INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS licenses (
                id INTEGER PRIMARY KEY,
                product_id INTEGER NOT NULL REFERENCES products(id),
                approval_number TEXT,
                approval_code TEXT,
                approval_code_system TEXT,
                approval_display_name TEXT
            );
            "#,
        )?;

        Ok(())
    }

    /// Start the unit of work for one document.
    ///
    /// The transaction stays open for the whole parse and rolls back on drop
    /// unless [`UnitOfWork::commit`] is called.
    pub fn begin(&mut self) -> Result<UnitOfWork<'_>, StoreError> {
        let tx = self.conn.transaction()?;
        UnitOfWork::new(tx)
    }

    /// Check whether this content was already imported under this identifier.
    pub fn is_duplicate(&self, content: &str, document_guid: Uuid) -> Result<bool, StoreError> {
        repository::content_exists(&self.conn, &content_hash(content), document_guid)
    }

    /// Load a document's flat sections (document order) and its edges.
    pub fn load_document_tree(&self, document_guid: Uuid) -> Result<Option<DocumentTree>, StoreError> {
        let document = self
            .conn
            .query_row(
                "SELECT id, spl_data_id, document_guid, set_guid, version_number, document_code,
                        document_code_system, document_display_name, title, effective_time
                 FROM documents WHERE document_guid = ?1 ORDER BY id DESC LIMIT 1",
                [document_guid.to_string()],
                document_from_row,
            )
            .optional()?;

        let Some(document) = document else {
            return Ok(None);
        };
        let document_id = document.id.unwrap_or_default();

        let mut stmt = self.conn.prepare(
            "SELECT id, document_id, structured_body_id, section_guid, section_code,
                    section_code_system, section_display_name, title, effective_time,
                    text_content, section_level, parent_section_id, document_order
             FROM sections WHERE document_id = ?1 ORDER BY document_order, id",
        )?;
        let sections = stmt
            .query_map([document_id], section_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stmt = self.conn.prepare(
            "SELECT h.id, h.parent_section_id, h.child_section_id, h.sequence_number
             FROM section_hierarchy h
             JOIN sections p ON p.id = h.parent_section_id
             WHERE p.document_id = ?1
             ORDER BY h.id",
        )?;
        let edges = stmt
            .query_map([document_id], |row| {
                Ok(SectionHierarchyEdge {
                    id: Some(row.get(0)?),
                    parent_section_id: row.get(1)?,
                    child_section_id: row.get(2)?,
                    sequence_number: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(DocumentTree {
            document,
            sections,
            edges,
        }))
    }

    /// List imported documents, newest first.
    pub fn list_documents(&self) -> Result<Vec<DocumentSummary>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT d.id, d.document_guid, d.title, d.version_number,
                    (SELECT COUNT(*) FROM sections s WHERE s.document_id = d.id)
             FROM documents d ORDER BY d.id DESC",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(DocumentSummary {
                id: row.get(0)?,
                document_guid: parse_guid(&row.get::<_, String>(1)?),
                title: row.get(2)?,
                version_number: row.get(3)?,
                section_count: row.get::<_, i64>(4)? as usize,
            })
        })?;

        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Row counts per entity table.
    pub fn entity_totals(&self) -> Result<EntityCounts, StoreError> {
        let count = |kind: EntityKind| -> Result<usize, StoreError> {
            let n: i64 = self.conn.query_row(
                &format!("SELECT COUNT(*) FROM {}", kind.table()),
                [],
                |row| row.get(0),
            )?;
            Ok(n as usize)
        };

        Ok(EntityCounts {
            documents: count(EntityKind::Document)?,
            structured_bodies: count(EntityKind::StructuredBody)?,
            sections: count(EntityKind::Section)?,
            section_hierarchies: count(EntityKind::SectionHierarchy)?,
            organizations: count(EntityKind::Organization)?,
            business_operations: count(EntityKind::BusinessOperation)?,
            products: count(EntityKind::Product)?,
            ingredients: count(EntityKind::Ingredient)?,
            packaging_levels: count(EntityKind::PackagingLevel)?,
            licenses: count(EntityKind::License)?,
        })
    }

    /// Number of raw content rows stored for an identifier.
    pub fn content_count(&self, document_guid: Uuid) -> Result<usize, StoreError> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM spl_data WHERE document_guid = ?1",
            params![document_guid.to_string()],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    /// Raw connection for ad-hoc queries.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

pub(crate) fn parse_guid(s: &str) -> Uuid {
    Uuid::parse_str(s).unwrap_or_else(|_| Uuid::nil())
}

pub(crate) fn parse_date(s: Option<String>) -> Option<NaiveDate> {
    s.and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok())
}

fn document_from_row(row: &Row<'_>) -> rusqlite::Result<Document> {
    Ok(Document {
        id: Some(row.get(0)?),
        spl_data_id: row.get(1)?,
        document_guid: parse_guid(&row.get::<_, String>(2)?),
        set_guid: row.get::<_, Option<String>>(3)?.map(|s| parse_guid(&s)),
        version_number: row.get(4)?,
        code: CodedValue {
            code: row.get(5)?,
            code_system: row.get(6)?,
            display_name: row.get(7)?,
        },
        title: row.get(8)?,
        effective_time: parse_date(row.get(9)?),
    })
}

fn section_from_row(row: &Row<'_>) -> rusqlite::Result<Section> {
    Ok(Section {
        id: Some(row.get(0)?),
        document_id: row.get(1)?,
        structured_body_id: row.get(2)?,
        section_guid: parse_guid(&row.get::<_, String>(3)?),
        code: CodedValue {
            code: row.get(4)?,
            code_system: row.get(5)?,
            display_name: row.get(6)?,
        },
        title: row.get(7)?,
        effective_time: parse_date(row.get(8)?),
        text_content: row.get(9)?,
        level: row.get(10)?,
        parent_section_id: row.get(11)?,
        document_order: row.get(12)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Section;

    #[test]
    fn test_create_db() {
        let db = SplDb::in_memory().unwrap();
        let totals = db.entity_totals().unwrap();
        assert_eq!(totals, EntityCounts::default());
    }

    #[test]
    fn test_open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labels.db");

        {
            let mut db = SplDb::open(&path).unwrap();
            let uow = db.begin().unwrap();
            uow.store_content("<document/>", Uuid::nil(), Uuid::nil()).unwrap();
            uow.commit().unwrap();
        }

        let db = SplDb::open(&path).unwrap();
        assert_eq!(db.content_count(Uuid::nil()).unwrap(), 1);
    }

    #[test]
    fn test_uncommitted_unit_of_work_rolls_back() {
        let mut db = SplDb::in_memory().unwrap();
        {
            let uow = db.begin().unwrap();
            uow.insert(&Document::default()).unwrap();
            // dropped without commit
        }
        assert_eq!(db.entity_totals().unwrap().documents, 0);
    }

    #[test]
    fn test_missing_table_is_wiring_error() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE spl_data (id INTEGER PRIMARY KEY);")
            .unwrap();
        let mut db = SplDb::from_connection(conn);

        match db.begin() {
            Err(StoreError::MissingRepository(kind)) => assert_eq!(kind, EntityKind::Document),
            other => panic!("expected missing repository, got {:?}", other.map(|_| ())),
        };
    }

    #[test]
    fn test_load_document_tree_orders_sections() {
        let mut db = SplDb::in_memory().unwrap();
        let doc_guid = Uuid::new_v4();
        {
            let uow = db.begin().unwrap();
            let doc_id = uow
                .insert(&Document {
                    document_guid: doc_guid,
                    title: Some("Label".into()),
                    ..Default::default()
                })
                .unwrap();

            let mk = |order: i32, title: &str| Section {
                document_id: doc_id,
                section_guid: Uuid::new_v4(),
                title: Some(title.into()),
                document_order: order,
                ..Default::default()
            };
            // inserted out of order on purpose
            let ids = uow.insert_many(&[mk(2, "c"), mk(0, "a"), mk(1, "b")]).unwrap();
            uow.insert(&SectionHierarchyEdge {
                parent_section_id: ids[1],
                child_section_id: ids[2],
                sequence_number: Some(1),
                ..Default::default()
            })
            .unwrap();
            uow.commit().unwrap();
        }

        let tree = db.load_document_tree(doc_guid).unwrap().unwrap();
        let titles: Vec<_> = tree.sections.iter().map(|s| s.title.clone().unwrap()).collect();
        assert_eq!(titles, vec!["a", "b", "c"]);
        assert_eq!(tree.edges.len(), 1);
        assert_eq!(tree.document.title.as_deref(), Some("Label"));

        assert!(db.load_document_tree(Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn test_list_documents() {
        let mut db = SplDb::in_memory().unwrap();
        let uow = db.begin().unwrap();
        uow.insert(&Document {
            document_guid: Uuid::new_v4(),
            version_number: Some(2),
            ..Default::default()
        })
        .unwrap();
        uow.commit().unwrap();

        let docs = db.list_documents().unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].version_number, Some(2));
        assert_eq!(docs[0].section_count, 0);
    }
}
