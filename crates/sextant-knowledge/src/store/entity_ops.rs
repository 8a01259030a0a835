//! Entity CRUD operations.

use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::{debug, warn};
use zerocopy::IntoBytes;

use crate::error::{KnowledgeError, Result};
use crate::types::{Entity, EntityData, EntityType};
use crate::validation::validate_entity;

use super::KnowledgeStore;

pub(crate) const ENTITY_COLUMNS: &str = "id, type, data, embedding, created_at, updated_at";

/// Decode a stored vector. `None` for blobs that are not whole `f32`s.
pub(crate) fn decode_embedding(blob: &[u8]) -> Option<Vec<f32>> {
    if blob.len() % size_of::<f32>() != 0 {
        return None;
    }
    // Copy into an f32 buffer: SQLite blobs carry no alignment guarantee.
    let mut vector = vec![0.0f32; blob.len() / size_of::<f32>()];
    vector.as_mut_slice().as_mut_bytes().copy_from_slice(blob);
    Some(vector)
}

/// Map a row selected with [`ENTITY_COLUMNS`].
///
/// Fails with `InvalidData`/`Serialization` when the stored payload is corrupt.
pub(crate) fn row_to_entity(row: &Row) -> Result<Entity> {
    let id: String = row.get(0)?;
    let type_str: String = row.get(1)?;
    let data_json: String = row.get(2)?;
    let blob: Option<Vec<u8>> = row.get(3)?;
    let created_at: String = row.get(4)?;
    let updated_at: String = row.get(5)?;

    let entity_type: EntityType = type_str.parse()?;
    let data = EntityData::from_json(entity_type, &data_json)?;
    if data.id() != id {
        return Err(KnowledgeError::InvalidData(format!(
            "Entity {id} payload carries id {}",
            data.id()
        )));
    }

    let embedding = match blob {
        Some(b) => Some(decode_embedding(&b).ok_or_else(|| {
            KnowledgeError::InvalidData(format!("Entity {id} has a truncated embedding"))
        })?),
        None => None,
    };

    Ok(Entity {
        data,
        embedding,
        created_at,
        updated_at,
    })
}

/// Collect entities from a query, skipping rows that fail to decode.
pub(crate) fn collect_entities(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<Entity>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params)?;
    let mut entities = Vec::new();
    while let Some(row) = rows.next()? {
        match row_to_entity(row) {
            Ok(entity) => entities.push(entity),
            Err(e) => {
                let id: String = row.get(0).unwrap_or_default();
                warn!(entity_id = %id, error = %e, "Skipping corrupt entity row");
            }
        }
    }
    Ok(entities)
}

pub(crate) fn entity_type_on(conn: &Connection, id: &str) -> Result<Option<EntityType>> {
    let type_str: Option<String> = conn
        .query_row(
            "SELECT type FROM entities WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()?;
    type_str.map(|s| s.parse()).transpose()
}

/// Insert or replace an entity's payload, keeping `created_at`.
pub(crate) fn upsert_entity_on(
    conn: &Connection,
    data: &EntityData,
    embedding: Option<&[f32]>,
) -> Result<String> {
    validate_entity(data, embedding)?;

    let id = data.id();
    let attempted = data.entity_type();
    if let Some(existing) = entity_type_on(conn, id)?
        && existing != attempted
    {
        return Err(KnowledgeError::TypeConflict {
            id: id.to_string(),
            existing,
            attempted,
        });
    }

    let now = sextant_types::now_ts();
    conn.execute(
        r#"
        INSERT INTO entities (id, type, data, embedding, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?5)
        ON CONFLICT(id) DO UPDATE SET
            data = excluded.data,
            embedding = excluded.embedding,
            updated_at = excluded.updated_at
        "#,
        params![
            id,
            attempted.as_str(),
            data.to_json()?,
            embedding.map(|e| e.as_bytes()),
            now,
        ],
    )?;

    debug!(entity_id = %id, entity_type = %attempted, "Upserted entity");
    Ok(id.to_string())
}

/// Insert an entity only if its id is free, leaving existing rows untouched.
///
/// Used for derived CodeArea/File nodes, which are merged, never rewritten.
pub(crate) fn ensure_entity_on(conn: &Connection, data: &EntityData) -> Result<String> {
    match entity_type_on(conn, data.id())? {
        Some(existing) if existing == data.entity_type() => Ok(data.id().to_string()),
        Some(existing) => Err(KnowledgeError::TypeConflict {
            id: data.id().to_string(),
            existing,
            attempted: data.entity_type(),
        }),
        None => upsert_entity_on(conn, data, None),
    }
}

pub(crate) fn get_entity_on(conn: &Connection, id: &str) -> Result<Option<Entity>> {
    let sql = format!("SELECT {ENTITY_COLUMNS} FROM entities WHERE id = ?1");
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params![id])?;
    match rows.next()? {
        Some(row) => Ok(Some(row_to_entity(row)?)),
        None => Ok(None),
    }
}

/// Fail with `NotFound` unless `id` exists as an entity of `expected` type.
pub(crate) fn require_entity_on(conn: &Connection, id: &str, expected: EntityType) -> Result<()> {
    match entity_type_on(conn, id)? {
        Some(t) if t == expected => Ok(()),
        _ => Err(KnowledgeError::NotFound(format!("{expected} {id}"))),
    }
}

impl KnowledgeStore {
    /// Insert or replace an entity.
    ///
    /// Repeat writes replace `data` and `embedding` wholesale and bump
    /// `updated_at`. Fails with [`KnowledgeError::TypeConflict`] if the id
    /// is already bound to a different entity type.
    pub fn upsert_entity(&self, data: &EntityData, embedding: Option<&[f32]>) -> Result<String> {
        let conn = self.conn.lock();
        upsert_entity_on(&conn, data, embedding)
    }

    /// Get an entity by ID.
    pub fn get_entity(&self, id: &str) -> Result<Option<Entity>> {
        let conn = self.conn.lock();
        get_entity_on(&conn, id)
    }

    /// Delete an entity and, by cascade, every relationship touching it.
    ///
    /// Returns `false` if no such entity existed.
    pub fn delete_entity(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows_affected = conn.execute("DELETE FROM entities WHERE id = ?1", params![id])?;
        if rows_affected > 0 {
            debug!(entity_id = %id, "Deleted entity");
        }
        Ok(rows_affected > 0)
    }

    /// List all entities of one type, newest first.
    pub fn list_entities(&self, entity_type: EntityType) -> Result<Vec<Entity>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {ENTITY_COLUMNS} FROM entities WHERE type = ?1 \
             ORDER BY created_at DESC, rowid DESC"
        );
        collect_entities(&conn, &sql, params![entity_type.as_str()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CodeArea, FileRef, Learning, Mistake, Pattern, Topic};

    fn store() -> KnowledgeStore {
        KnowledgeStore::open_in_memory().unwrap()
    }

    fn learning(id: &str, content: &str) -> EntityData {
        EntityData::Learning(Learning::new(id, content))
    }

    #[test]
    fn test_upsert_and_get() {
        let store = store();
        let id = store
            .upsert_entity(&learning("L1", "validate input"), Some(&[0.5, -0.25]))
            .unwrap();
        assert_eq!(id, "L1");

        let entity = store.get_entity("L1").unwrap().unwrap();
        assert_eq!(entity.entity_type(), EntityType::Learning);
        assert_eq!(entity.embedding, Some(vec![0.5, -0.25]));
        assert_eq!(entity.created_at, entity.updated_at);
    }

    #[test]
    fn test_upsert_replaces_data_and_keeps_created_at() {
        let store = store();
        store
            .upsert_entity(&learning("L1", "first"), Some(&[1.0]))
            .unwrap();
        let before = store.get_entity("L1").unwrap().unwrap();

        store.upsert_entity(&learning("L1", "second"), None).unwrap();
        let after = store.get_entity("L1").unwrap().unwrap();

        assert_eq!(after.data, learning("L1", "second"));
        assert_eq!(after.embedding, None);
        assert_eq!(after.created_at, before.created_at);
        assert!(after.updated_at >= before.updated_at);
        assert_eq!(store.stats().unwrap().learnings, 1);
    }

    #[test]
    fn test_type_conflict_for_every_pair() {
        let samples = [
            EntityData::Learning(Learning::new("X", "c")),
            EntityData::CodeArea(CodeArea {
                id: "X".into(),
                name: "area".into(),
            }),
            EntityData::File(FileRef {
                id: "X".into(),
                path: "a.rs".into(),
            }),
            EntityData::Pattern(Pattern::new("X", "n", "d")),
            EntityData::Mistake(Mistake::new("X", "d", "f")),
            EntityData::Topic(Topic::new("X", "c")),
        ];

        for first in &samples {
            for second in &samples {
                if first.entity_type() == second.entity_type() {
                    continue;
                }
                let store = store();
                store.upsert_entity(first, None).unwrap();
                let err = store.upsert_entity(second, None).unwrap_err();
                assert!(
                    matches!(err, KnowledgeError::TypeConflict { ref existing, .. } if *existing == first.entity_type()),
                    "{} then {}",
                    first.entity_type(),
                    second.entity_type()
                );
                let kept = store.get_entity("X").unwrap().unwrap();
                assert_eq!(&kept.data, first);
            }
        }
    }

    #[test]
    fn test_delete_entity() {
        let store = store();
        store.upsert_entity(&learning("L1", "c"), None).unwrap();
        assert!(store.delete_entity("L1").unwrap());
        assert!(!store.delete_entity("L1").unwrap());
        assert!(store.get_entity("L1").unwrap().is_none());
    }

    #[test]
    fn test_list_entities_skips_corrupt_rows() {
        let store = store();
        store.upsert_entity(&learning("L1", "good"), None).unwrap();
        store.upsert_entity(&learning("L2", "also good"), None).unwrap();
        {
            let conn = store.conn.lock();
            conn.execute(
                "UPDATE entities SET data = '{not json' WHERE id = 'L1'",
                [],
            )
            .unwrap();
        }

        let listed = store.list_entities(EntityType::Learning).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id(), "L2");
    }

    #[test]
    fn test_decode_embedding_rejects_partial() {
        assert_eq!(decode_embedding(&[0, 0, 0]), None);
        assert_eq!(decode_embedding(&[]), Some(vec![]));
    }

    #[test]
    fn test_decode_embedding_unaligned_blob() {
        let vector = [0.25f32, -1.5, 3.0];
        let mut buf = vec![0u8];
        buf.extend_from_slice(vector.as_bytes());
        // Offset by one byte so the slice is not f32-aligned.
        assert_eq!(decode_embedding(&buf[1..]), Some(vector.to_vec()));
    }
}
