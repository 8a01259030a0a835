//! Graph-level writes: learnings with their derived code areas and files,
//! patterns, mistakes and topics.
//!
//! Each operation runs in one transaction so a failure anywhere leaves the
//! graph untouched.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::Result;
use crate::types::{
    CodeArea, EntityData, EntityType, FileRef, Learning, Mistake, Pattern, RelationshipType, Topic,
};

use super::KnowledgeStore;
use super::entity_ops::{ensure_entity_on, require_entity_on, upsert_entity_on};
use super::relationship_ops::{delete_relationships_from_on, upsert_relationship_on};

/// Upsert a code area node and return its id.
fn ensure_code_area_on(conn: &Connection, name: &str) -> Result<String> {
    ensure_entity_on(conn, &EntityData::CodeArea(CodeArea::new(name)))
}

/// Upsert a file node and return its id.
fn ensure_file_on(conn: &Connection, path: &str) -> Result<String> {
    ensure_entity_on(conn, &EntityData::File(FileRef::new(path)))
}

fn store_learning_on(conn: &Connection, learning: &Learning, embedding: Option<&[f32]>) -> Result<()> {
    let id = upsert_entity_on(conn, &EntityData::Learning(learning.clone()), embedding)?;

    // A previous version may have pointed at another area or file.
    delete_relationships_from_on(
        conn,
        &id,
        &[RelationshipType::About, RelationshipType::InFile],
    )?;

    if let Some(area) = &learning.code_area {
        let area_id = ensure_code_area_on(conn, area)?;
        upsert_relationship_on(conn, &id, &area_id, RelationshipType::About, None)?;
    }
    if let Some(path) = &learning.file_path {
        let file_id = ensure_file_on(conn, path)?;
        upsert_relationship_on(conn, &id, &file_id, RelationshipType::InFile, None)?;
    }
    Ok(())
}

impl KnowledgeStore {
    /// Store learnings without embeddings.
    pub fn store(&self, learnings: &[Learning]) -> Result<usize> {
        let batch: Vec<(Learning, Option<Vec<f32>>)> =
            learnings.iter().cloned().map(|l| (l, None)).collect();
        self.store_embedded(&batch)
    }

    /// Store learnings, each with an optional embedding, in one transaction.
    ///
    /// Each learning gets `ABOUT` and `IN_FILE` edges to its code area and
    /// file, replacing any edges left by an earlier version of the same id.
    pub fn store_embedded(&self, batch: &[(Learning, Option<Vec<f32>>)]) -> Result<usize> {
        if batch.is_empty() {
            return Ok(0);
        }

        self.with_transaction(|conn| {
            for (learning, embedding) in batch {
                store_learning_on(conn, learning, embedding.as_deref())?;
            }
            Ok(())
        })?;

        info!(count = batch.len(), "Stored learnings");
        Ok(batch.len())
    }

    /// Store a pattern and link it to the learnings that justified it.
    ///
    /// Every id in `learning_ids` must be an existing learning.
    pub fn store_pattern(&self, pattern: &Pattern, learning_ids: &[String]) -> Result<String> {
        self.with_transaction(|conn| {
            let id = upsert_entity_on(conn, &EntityData::Pattern(pattern.clone()), None)?;
            delete_relationships_from_on(conn, &id, &[RelationshipType::AppliesTo])?;

            if let Some(area) = &pattern.code_area {
                let area_id = ensure_code_area_on(conn, area)?;
                upsert_relationship_on(conn, &id, &area_id, RelationshipType::AppliesTo, None)?;
            }

            for learning_id in learning_ids {
                require_entity_on(conn, learning_id, EntityType::Learning)?;
                upsert_relationship_on(conn, &id, learning_id, RelationshipType::LedTo, None)?;
            }

            debug!(pattern_id = %id, learnings = learning_ids.len(), "Stored pattern");
            Ok(id)
        })
    }

    /// Store a mistake, its file, and optionally the learning that fixed it.
    pub fn store_mistake(&self, mistake: &Mistake, learning_id: Option<&str>) -> Result<String> {
        self.with_transaction(|conn| {
            let id = upsert_entity_on(conn, &EntityData::Mistake(mistake.clone()), None)?;
            delete_relationships_from_on(conn, &id, &[RelationshipType::InFile])?;

            if let Some(path) = &mistake.file_path {
                let file_id = ensure_file_on(conn, path)?;
                upsert_relationship_on(conn, &id, &file_id, RelationshipType::InFile, None)?;
            }

            if let Some(learning_id) = learning_id {
                require_entity_on(conn, learning_id, EntityType::Learning)?;
                upsert_relationship_on(conn, &id, learning_id, RelationshipType::LedTo, None)?;
            }

            debug!(mistake_id = %id, "Stored mistake");
            Ok(id)
        })
    }

    /// Store a topic. Topics carry no derived edges.
    pub fn store_topic(&self, topic: &Topic, embedding: Option<&[f32]>) -> Result<String> {
        let conn = self.conn.lock();
        upsert_entity_on(&conn, &EntityData::Topic(topic.clone()), embedding)
    }

    /// Record that `new_id` replaces `old_id`.
    ///
    /// Superseded learnings stay in the graph but drop out of queries and
    /// semantic search.
    pub fn supersede_learning(&self, old_id: &str, new_id: &str) -> Result<()> {
        self.with_transaction(|conn| {
            require_entity_on(conn, old_id, EntityType::Learning)?;
            require_entity_on(conn, new_id, EntityType::Learning)?;
            upsert_relationship_on(conn, new_id, old_id, RelationshipType::Supersedes, None)?;
            Ok(())
        })?;
        info!(old = %old_id, new = %new_id, "Learning superseded");
        Ok(())
    }
}
