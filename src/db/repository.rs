//! Unit of work and per-entity persistence handles.

use chrono::Utc;
use rusqlite::{params, Connection, Transaction};
use uuid::Uuid;

use super::EntityKind;
use crate::error::StoreError;
use crate::model::{
    BusinessOperation, Document, Ingredient, License, Organization, PackagingLevel, Product,
    Section, SectionHierarchyEdge, StructuredBody,
};

/// xxHash64 of the raw document text, hex encoded.
pub fn content_hash(content: &str) -> String {
    format!("{:016x}", xxhash_rust::xxh64::xxh64(content.as_bytes(), 0))
}

pub(super) fn content_exists(
    conn: &Connection,
    hash: &str,
    document_guid: Uuid,
) -> Result<bool, StoreError> {
    let mut stmt = conn.prepare_cached(
        "SELECT EXISTS(SELECT 1 FROM spl_data WHERE content_hash = ?1 AND document_guid = ?2)",
    )?;
    let exists: bool = stmt.query_row(params![hash, document_guid.to_string()], |row| row.get(0))?;
    Ok(exists)
}

/// Decides whether a document was already imported.
pub trait DuplicateDetector {
    fn is_duplicate(&self, content: &str, document_guid: Uuid) -> Result<bool, StoreError>;
}

/// Keeps the raw document text and returns the stored row id.
pub trait ContentStore {
    fn store_content(&self, content: &str, document_guid: Uuid, user: Uuid) -> Result<i64, StoreError>;
}

/// Persistence handle for one entity type.
pub trait Repository<T> {
    fn insert(&self, row: &T) -> Result<i64, StoreError>;

    /// Write a batch of rows, returning ids in input order.
    fn insert_many(&self, rows: &[T]) -> Result<Vec<i64>, StoreError> {
        rows.iter().map(|row| self.insert(row)).collect()
    }
}

/// One open transaction spanning the parse of a single document.
pub struct UnitOfWork<'conn> {
    tx: Transaction<'conn>,
}

impl<'conn> UnitOfWork<'conn> {
    pub(super) fn new(tx: Transaction<'conn>) -> Result<Self, StoreError> {
        let uow = Self { tx };
        uow.verify_repositories()?;
        Ok(uow)
    }

    /// Every entity type must resolve to a table before any write happens.
    fn verify_repositories(&self) -> Result<(), StoreError> {
        let mut stmt = self
            .tx
            .prepare_cached("SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)")?;
        for kind in EntityKind::ALL {
            let exists: bool = stmt.query_row([kind.table()], |row| row.get(0))?;
            if !exists {
                return Err(StoreError::MissingRepository(kind));
            }
        }
        Ok(())
    }

    pub fn commit(self) -> Result<(), StoreError> {
        self.tx.commit()?;
        Ok(())
    }

    pub fn savepoint(&self, name: &str) -> Result<(), StoreError> {
        self.tx.execute_batch(&format!("SAVEPOINT {name}"))?;
        Ok(())
    }

    pub fn release(&self, name: &str) -> Result<(), StoreError> {
        self.tx.execute_batch(&format!("RELEASE SAVEPOINT {name}"))?;
        Ok(())
    }

    pub fn rollback_to(&self, name: &str) -> Result<(), StoreError> {
        self.tx
            .execute_batch(&format!("ROLLBACK TO SAVEPOINT {name}; RELEASE SAVEPOINT {name}"))?;
        Ok(())
    }

    /// Copy each section's first parent edge onto the section row and return
    /// how many rows gained a parent.
    ///
    /// The bulk builder writes sections before it knows their parent ids.
    pub fn backfill_section_parents(&self, document_id: i64) -> Result<usize, StoreError> {
        let updated = self.tx.execute(
            "UPDATE sections SET parent_section_id = (
                 SELECT h.parent_section_id FROM section_hierarchy h
                 WHERE h.child_section_id = sections.id
                 ORDER BY h.id LIMIT 1)
             WHERE document_id = ?1 AND parent_section_id IS NULL
               AND EXISTS (SELECT 1 FROM section_hierarchy h WHERE h.child_section_id = sections.id)",
            [document_id],
        )?;
        Ok(updated)
    }
}

impl DuplicateDetector for UnitOfWork<'_> {
    fn is_duplicate(&self, content: &str, document_guid: Uuid) -> Result<bool, StoreError> {
        content_exists(&self.tx, &content_hash(content), document_guid)
    }
}

impl ContentStore for UnitOfWork<'_> {
    fn store_content(&self, content: &str, document_guid: Uuid, user: Uuid) -> Result<i64, StoreError> {
        self.tx
            .prepare_cached(
                "INSERT INTO spl_data (document_guid, content_hash, content, imported_by, imported_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?
            .execute(params![
                document_guid.to_string(),
                content_hash(content),
                content,
                user.to_string(),
                Utc::now().to_rfc3339(),
            ])?;
        Ok(self.tx.last_insert_rowid())
    }
}

impl Repository<Document> for UnitOfWork<'_> {
    fn insert(&self, row: &Document) -> Result<i64, StoreError> {
        self.tx
            .prepare_cached(
                "INSERT INTO documents (spl_data_id, document_guid, set_guid, version_number, document_code,
                                        document_code_system, document_display_name, title, effective_time)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?
            .execute(params![
                row.spl_data_id,
                row.document_guid.to_string(),
                row.set_guid.map(|g| g.to_string()),
                row.version_number,
                row.code.code,
                row.code.code_system,
                row.code.display_name,
                row.title,
                row.effective_time.map(|d| d.to_string()),
            ])?;
        Ok(self.tx.last_insert_rowid())
    }
}

impl Repository<StructuredBody> for UnitOfWork<'_> {
    fn insert(&self, row: &StructuredBody) -> Result<i64, StoreError> {
        self.tx
            .prepare_cached("INSERT INTO structured_bodies (document_id) VALUES (?1)")?
            .execute([row.document_id])?;
        Ok(self.tx.last_insert_rowid())
    }
}

impl Repository<Section> for UnitOfWork<'_> {
    fn insert(&self, row: &Section) -> Result<i64, StoreError> {
        self.tx
            .prepare_cached(
                "INSERT INTO sections (document_id, structured_body_id, section_guid, section_code,
                                       section_code_system, section_display_name, title, effective_time,
                                       text_content, section_level, parent_section_id, document_order)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            )?
            .execute(params![
                row.document_id,
                row.structured_body_id,
                row.section_guid.to_string(),
                row.code.code,
                row.code.code_system,
                row.code.display_name,
                row.title,
                row.effective_time.map(|d| d.to_string()),
                row.text_content,
                row.level,
                row.parent_section_id,
                row.document_order,
            ])?;
        Ok(self.tx.last_insert_rowid())
    }
}

impl Repository<SectionHierarchyEdge> for UnitOfWork<'_> {
    /// Keeps the first sequence number when the pair already exists.
    fn insert(&self, row: &SectionHierarchyEdge) -> Result<i64, StoreError> {
        let inserted = self
            .tx
            .prepare_cached(
                "INSERT OR IGNORE INTO section_hierarchy (parent_section_id, child_section_id, sequence_number)
                 VALUES (?1, ?2, ?3)",
            )?
            .execute(params![row.parent_section_id, row.child_section_id, row.sequence_number])?;

        if inserted == 1 {
            return Ok(self.tx.last_insert_rowid());
        }

        let id = self
            .tx
            .prepare_cached(
                "SELECT id FROM section_hierarchy WHERE parent_section_id = ?1 AND child_section_id = ?2",
            )?
            .query_row(params![row.parent_section_id, row.child_section_id], |r| r.get(0))?;
        Ok(id)
    }
}

impl Repository<Organization> for UnitOfWork<'_> {
    fn insert(&self, row: &Organization) -> Result<i64, StoreError> {
        self.tx
            .prepare_cached(
                "INSERT INTO organizations (document_id, parent_organization_id, name, duns)
                 VALUES (?1, ?2, ?3, ?4)",
            )?
            .execute(params![row.document_id, row.parent_organization_id, row.name, row.duns])?;
        Ok(self.tx.last_insert_rowid())
    }
}

impl Repository<BusinessOperation> for UnitOfWork<'_> {
    fn insert(&self, row: &BusinessOperation) -> Result<i64, StoreError> {
        self.tx
            .prepare_cached(
                "INSERT INTO business_operations (organization_id, operation_code, operation_code_system,
                                                  operation_display_name)
                 VALUES (?1, ?2, ?3, ?4)",
            )?
            .execute(params![
                row.organization_id,
                row.operation.code,
                row.operation.code_system,
                row.operation.display_name,
            ])?;
        Ok(self.tx.last_insert_rowid())
    }
}

impl Repository<Product> for UnitOfWork<'_> {
    fn insert(&self, row: &Product) -> Result<i64, StoreError> {
        self.tx
            .prepare_cached(
                "INSERT INTO products (document_id, section_id, name, product_code, product_code_system,
                                       form_code, form_code_system, form_display_name)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?
            .execute(params![
                row.document_id,
                row.section_id,
                row.name,
                row.code.code,
                row.code.code_system,
                row.form.code,
                row.form.code_system,
                row.form.display_name,
            ])?;
        Ok(self.tx.last_insert_rowid())
    }
}

impl Repository<Ingredient> for UnitOfWork<'_> {
    fn insert(&self, row: &Ingredient) -> Result<i64, StoreError> {
        self.tx
            .prepare_cached(
                "INSERT INTO ingredients (product_id, class_code, substance_name, unii, numerator_value,
                                          numerator_unit, denominator_value, denominator_unit)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?
            .execute(params![
                row.product_id,
                row.class_code,
                row.substance_name,
                row.unii,
                row.numerator_value,
                row.numerator_unit,
                row.denominator_value,
                row.denominator_unit,
            ])?;
        Ok(self.tx.last_insert_rowid())
    }
}

impl Repository<PackagingLevel> for UnitOfWork<'_> {
    fn insert(&self, row: &PackagingLevel) -> Result<i64, StoreError> {
        self.tx
            .prepare_cached(
                "INSERT INTO packaging_levels (product_id, parent_packaging_id, package_code, form_code,
                                               form_code_system, form_display_name, quantity_value,
                                               quantity_unit, package_level)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?
            .execute(params![
                row.product_id,
                row.parent_packaging_id,
                row.package_code,
                row.form.code,
                row.form.code_system,
                row.form.display_name,
                row.quantity_value,
                row.quantity_unit,
                row.level,
            ])?;
        Ok(self.tx.last_insert_rowid())
    }
}

impl Repository<License> for UnitOfWork<'_> {
    fn insert(&self, row: &License) -> Result<i64, StoreError> {
        self.tx
            .prepare_cached(
                "INSERT INTO licenses (product_id, approval_number, approval_code, approval_code_system,
                                       approval_display_name)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?
            .execute(params![
                row.product_id,
                row.approval_number,
                row.approval.code,
                row.approval.code_system,
                row.approval.display_name,
            ])?;
        Ok(self.tx.last_insert_rowid())
    }
}

#[cfg(test)]
mod tests {
    use super::super::SplDb;
    use super::*;

    #[test]
    fn test_content_hash_is_stable() {
        assert_eq!(content_hash("abc"), content_hash("abc"));
        assert_ne!(content_hash("abc"), content_hash("abd"));
        assert_eq!(content_hash("").len(), 16);
    }

    #[test]
    fn test_duplicate_requires_same_guid_and_content() {
        let mut db = SplDb::in_memory().unwrap();
        let guid = Uuid::new_v4();
        let uow = db.begin().unwrap();

        assert!(!uow.is_duplicate("<document/>", guid).unwrap());
        uow.store_content("<document/>", guid, Uuid::nil()).unwrap();
        assert!(uow.is_duplicate("<document/>", guid).unwrap());
        assert!(!uow.is_duplicate("<document/>", Uuid::new_v4()).unwrap());
        assert!(!uow.is_duplicate("<document> </document>", guid).unwrap());
        uow.commit().unwrap();

        assert!(db.is_duplicate("<document/>", guid).unwrap());
    }

    #[test]
    fn test_edge_insert_keeps_first_sequence() {
        let mut db = SplDb::in_memory().unwrap();
        let uow = db.begin().unwrap();
        let doc = uow.insert(&Document::default()).unwrap();
        let ids = uow
            .insert_many(&[
                Section { document_id: doc, document_order: 0, ..Default::default() },
                Section { document_id: doc, document_order: 1, ..Default::default() },
            ])
            .unwrap();

        let first = uow
            .insert(&SectionHierarchyEdge {
                parent_section_id: ids[0],
                child_section_id: ids[1],
                sequence_number: Some(1),
                ..Default::default()
            })
            .unwrap();
        let second = uow
            .insert(&SectionHierarchyEdge {
                parent_section_id: ids[0],
                child_section_id: ids[1],
                sequence_number: Some(7),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(first, second);

        let seq: i32 = uow
            .tx
            .query_row("SELECT sequence_number FROM section_hierarchy", [], |r| r.get(0))
            .unwrap();
        assert_eq!(seq, 1);
    }

    #[test]
    fn test_savepoint_rollback_discards_rows() {
        let mut db = SplDb::in_memory().unwrap();
        let uow = db.begin().unwrap();
        uow.insert(&Document::default()).unwrap();

        uow.savepoint("sp_test").unwrap();
        uow.insert(&Document::default()).unwrap();
        uow.rollback_to("sp_test").unwrap();
        uow.commit().unwrap();

        assert_eq!(db.entity_totals().unwrap().documents, 1);
    }

    #[test]
    fn test_backfill_section_parents() {
        let mut db = SplDb::in_memory().unwrap();
        let uow = db.begin().unwrap();
        let doc = uow.insert(&Document::default()).unwrap();
        let ids = uow
            .insert_many(&[
                Section { document_id: doc, document_order: 0, ..Default::default() },
                Section { document_id: doc, document_order: 1, level: 1, ..Default::default() },
            ])
            .unwrap();
        uow.insert(&SectionHierarchyEdge {
            parent_section_id: ids[0],
            child_section_id: ids[1],
            sequence_number: Some(1),
            ..Default::default()
        })
        .unwrap();

        // Only the child gains a parent; the root stays parentless.
        assert_eq!(uow.backfill_section_parents(doc).unwrap(), 1);
        let parent_of = |id: i64| -> Option<i64> {
            uow.tx
                .query_row("SELECT parent_section_id FROM sections WHERE id = ?1", [id], |r| r.get(0))
                .unwrap()
        };
        assert_eq!(parent_of(ids[1]), Some(ids[0]));
        assert_eq!(parent_of(ids[0]), None);

        assert_eq!(uow.backfill_section_parents(doc).unwrap(), 0);
    }
}
