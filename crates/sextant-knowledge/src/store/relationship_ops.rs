//! Relationship (edge) operations.

use rusqlite::{Connection, Row, params};
use tracing::{debug, warn};

use crate::error::{KnowledgeError, Result};
use crate::types::{Relationship, RelationshipType};

use super::KnowledgeStore;
use super::entity_ops::entity_type_on;

/// Whether a SQLite error is a foreign key constraint failure.
pub(crate) fn is_foreign_key_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY
    )
}

fn row_to_relationship(row: &Row) -> Result<Relationship> {
    let type_str: String = row.get(3)?;
    let data: Option<String> = row.get(4)?;
    Ok(Relationship {
        id: row.get(0)?,
        from_id: row.get(1)?,
        to_id: row.get(2)?,
        rel_type: type_str.parse()?,
        data: data.map(|d| serde_json::from_str(&d)).transpose()?,
        created_at: row.get(5)?,
    })
}

/// Create an edge unless the `(from, to, type)` triple already exists.
///
/// Returns `true` if a row was inserted. A missing endpoint fails with
/// `NotFound` naming it.
pub(crate) fn upsert_relationship_on(
    conn: &Connection,
    from_id: &str,
    to_id: &str,
    rel_type: RelationshipType,
    data: Option<&serde_json::Value>,
) -> Result<bool> {
    let data_json = data.map(serde_json::to_string).transpose()?;

    let result = conn.execute(
        r#"
        INSERT INTO relationships (from_id, to_id, type, data, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        ON CONFLICT(from_id, to_id, type) DO NOTHING
        "#,
        params![
            from_id,
            to_id,
            rel_type.as_str(),
            data_json,
            sextant_types::now_ts()
        ],
    );

    match result {
        Ok(inserted) => {
            if inserted > 0 {
                debug!(from = %from_id, to = %to_id, rel = %rel_type, "Created relationship");
            }
            Ok(inserted > 0)
        }
        Err(e) if is_foreign_key_violation(&e) => {
            let missing = if entity_type_on(conn, from_id)?.is_none() {
                from_id
            } else {
                to_id
            };
            Err(KnowledgeError::NotFound(format!(
                "Entity {missing} (endpoint of {rel_type} {from_id} -> {to_id})"
            )))
        }
        Err(e) => Err(e.into()),
    }
}

/// Remove edges of the given types leaving `from_id`.
pub(crate) fn delete_relationships_from_on(
    conn: &Connection,
    from_id: &str,
    types: &[RelationshipType],
) -> Result<usize> {
    let mut removed = 0;
    for rel_type in types {
        removed += conn.execute(
            "DELETE FROM relationships WHERE from_id = ?1 AND type = ?2",
            params![from_id, rel_type.as_str()],
        )?;
    }
    Ok(removed)
}

fn collect_relationships(conn: &Connection, sql: &str, id: &str) -> Result<Vec<Relationship>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params![id])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        match row_to_relationship(row) {
            Ok(rel) => out.push(rel),
            Err(e) => warn!(entity_id = %id, error = %e, "Skipping corrupt relationship row"),
        }
    }
    Ok(out)
}

impl KnowledgeStore {
    /// Create a directed edge. Re-creating an existing triple is a no-op.
    pub fn upsert_relationship(
        &self,
        from_id: &str,
        to_id: &str,
        rel_type: RelationshipType,
        data: Option<&serde_json::Value>,
    ) -> Result<bool> {
        let conn = self.conn.lock();
        upsert_relationship_on(&conn, from_id, to_id, rel_type, data)
    }

    /// Delete a single edge. Returns `false` if it did not exist.
    pub fn delete_relationship(
        &self,
        from_id: &str,
        to_id: &str,
        rel_type: RelationshipType,
    ) -> Result<bool> {
        let conn = self.conn.lock();
        let rows_affected = conn.execute(
            "DELETE FROM relationships WHERE from_id = ?1 AND to_id = ?2 AND type = ?3",
            params![from_id, to_id, rel_type.as_str()],
        )?;
        Ok(rows_affected > 0)
    }

    /// Outgoing edges, oldest first.
    pub fn relationships_from(&self, id: &str) -> Result<Vec<Relationship>> {
        let conn = self.conn.lock();
        collect_relationships(
            &conn,
            "SELECT id, from_id, to_id, type, data, created_at FROM relationships \
             WHERE from_id = ?1 ORDER BY id",
            id,
        )
    }

    /// Incoming edges, oldest first.
    pub fn relationships_to(&self, id: &str) -> Result<Vec<Relationship>> {
        let conn = self.conn.lock();
        collect_relationships(
            &conn,
            "SELECT id, from_id, to_id, type, data, created_at FROM relationships \
             WHERE to_id = ?1 ORDER BY id",
            id,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EntityData, Learning, Pattern};
    use serde_json::json;

    fn store_with_pair() -> KnowledgeStore {
        let store = KnowledgeStore::open_in_memory().unwrap();
        store
            .upsert_entity(&EntityData::Pattern(Pattern::new("P1", "n", "d")), None)
            .unwrap();
        store
            .upsert_entity(&EntityData::Learning(Learning::new("L1", "c")), None)
            .unwrap();
        store
    }

    #[test]
    fn test_relationship_dedup() {
        let store = store_with_pair();
        assert!(
            store
                .upsert_relationship("P1", "L1", RelationshipType::LedTo, None)
                .unwrap()
        );
        for _ in 0..5 {
            assert!(
                !store
                    .upsert_relationship("P1", "L1", RelationshipType::LedTo, None)
                    .unwrap()
            );
        }
        assert_eq!(store.relationships_from("P1").unwrap().len(), 1);
        assert_eq!(store.stats().unwrap().relationships, 1);
    }

    #[test]
    fn test_same_pair_different_types() {
        let store = store_with_pair();
        store
            .upsert_relationship("P1", "L1", RelationshipType::LedTo, None)
            .unwrap();
        store
            .upsert_relationship("P1", "L1", RelationshipType::About, Some(&json!({"w": 1})))
            .unwrap();

        let incoming = store.relationships_to("L1").unwrap();
        assert_eq!(incoming.len(), 2);
        assert_eq!(incoming[1].data, Some(json!({"w": 1})));
    }

    #[test]
    fn test_missing_endpoint_is_not_found() {
        let store = store_with_pair();
        let err = store
            .upsert_relationship("P1", "ghost", RelationshipType::LedTo, None)
            .unwrap_err();
        match err {
            KnowledgeError::NotFound(msg) => assert!(msg.contains("ghost")),
            other => panic!("expected NotFound, got {other:?}"),
        }

        let err = store
            .upsert_relationship("nobody", "L1", RelationshipType::LedTo, None)
            .unwrap_err();
        assert!(matches!(err, KnowledgeError::NotFound(msg) if msg.contains("nobody")));
    }

    #[test]
    fn test_delete_entity_cascades_edges() {
        let store = store_with_pair();
        store
            .upsert_relationship("P1", "L1", RelationshipType::LedTo, None)
            .unwrap();

        store.delete_entity("L1").unwrap();
        assert!(store.relationships_from("P1").unwrap().is_empty());
        assert_eq!(store.stats().unwrap().relationships, 0);
    }

    #[test]
    fn test_delete_relationship() {
        let store = store_with_pair();
        store
            .upsert_relationship("P1", "L1", RelationshipType::LedTo, None)
            .unwrap();
        assert!(
            store
                .delete_relationship("P1", "L1", RelationshipType::LedTo)
                .unwrap()
        );
        assert!(
            !store
                .delete_relationship("P1", "L1", RelationshipType::LedTo)
                .unwrap()
        );
    }
}
