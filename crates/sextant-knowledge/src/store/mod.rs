//! Knowledge store implementation using SQLite.
//!
//! One table of typed entities and one table of typed directed edges.
//! Entity payloads are JSON in the `data` column and are decoded through
//! [`EntityData`](crate::types::EntityData) according to the `type` column.
//!
//! Operations come in two layers:
//!
//! - connection-level functions (`*_on`) that the graph operations compose
//!   inside a single transaction
//! - `KnowledgeStore` methods that lock the connection and delegate

mod entity_ops;
mod graph_ops;
mod query_ops;
mod relationship_ops;

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags};
use sextant_types::PathPin;
use tracing::{debug, error, info};

use crate::error::{KnowledgeError, Result};
use crate::types::EntityType;

// ─────────────────────────────────────────────────────────────────────────────
// Schema Version
// ─────────────────────────────────────────────────────────────────────────────

/// Current schema version for migrations.
const SCHEMA_VERSION: i32 = 2;

/// Namespace used when pinning database paths.
const PIN_NAMESPACE: &str = "knowledge";

// ─────────────────────────────────────────────────────────────────────────────
// Knowledge Store
// ─────────────────────────────────────────────────────────────────────────────

/// Knowledge store backed by SQLite.
///
/// Uses WAL mode and enforces foreign keys so that deleting an entity
/// cascades to every edge touching it.
pub struct KnowledgeStore {
    pub(crate) conn: Mutex<Connection>,
    /// Held for the lifetime of a file-backed store.
    pin: Option<PathPin>,
}

impl std::fmt::Debug for KnowledgeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KnowledgeStore")
            .field("path", &self.pin.as_ref().map(|p| p.path()))
            .finish_non_exhaustive()
    }
}

/// Row counts for the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct StoreStats {
    pub learnings: usize,
    pub patterns: usize,
    pub mistakes: usize,
    pub topics: usize,
    pub code_areas: usize,
    pub files: usize,
    pub relationships: usize,
    /// Entities carrying an embedding vector.
    pub embedded: usize,
}

// ─────────────────────────────────────────────────────────────────────────────
// Initialization
// ─────────────────────────────────────────────────────────────────────────────

impl KnowledgeStore {
    /// Open or create a knowledge store at the given path.
    ///
    /// Fails with [`KnowledgeError::AlreadyOpen`] if another live
    /// `KnowledgeStore` in this process holds the same file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|_| {
                KnowledgeError::Database(rusqlite::Error::InvalidPath(path.to_path_buf()))
            })?;
        }

        let pin = PathPin::acquire(PIN_NAMESPACE, path)?;

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_FULL_MUTEX,
        )?;

        let store = Self {
            conn: Mutex::new(conn),
            pin: Some(pin),
        };
        store.initialize()?;

        info!(path = %path.display(), "Knowledge store opened");
        Ok(store)
    }

    /// Create an in-memory store (useful for testing). Never pinned.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
            pin: None,
        };
        store.initialize()?;

        debug!("In-memory knowledge store created");
        Ok(store)
    }

    fn initialize(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        Self::create_schema(&conn)
    }

    fn create_schema(conn: &Connection) -> Result<()> {
        let current_version: i32 =
            conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

        if current_version >= SCHEMA_VERSION {
            debug!(version = current_version, "Knowledge schema up to date");
            return Ok(());
        }

        info!(
            from = current_version,
            to = SCHEMA_VERSION,
            "Migrating knowledge schema"
        );

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS entities (
                id TEXT PRIMARY KEY,
                type TEXT NOT NULL,
                data TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_entities_type_created
                ON entities(type, created_at);

            CREATE TABLE IF NOT EXISTS relationships (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                from_id TEXT NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
                to_id TEXT NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
                type TEXT NOT NULL,
                data TEXT,
                created_at TEXT NOT NULL,
                UNIQUE(from_id, to_id, type)
            );

            CREATE INDEX IF NOT EXISTS idx_relationships_to
                ON relationships(to_id, type);
            "#,
        )?;

        if current_version < 2 {
            Self::migrate_v2(conn)?;
        }

        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;

        info!(version = SCHEMA_VERSION, "Knowledge schema ready");
        Ok(())
    }

    /// Migration v2: embeddings live beside the entity row.
    fn migrate_v2(conn: &Connection) -> Result<()> {
        let has_column = conn.prepare("SELECT embedding FROM entities LIMIT 0").is_ok();
        if !has_column {
            conn.execute_batch("ALTER TABLE entities ADD COLUMN embedding BLOB;")?;
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Transactions
// ─────────────────────────────────────────────────────────────────────────────

impl KnowledgeStore {
    /// Execute a function within a transaction.
    ///
    /// If the closure returns an error every change is rolled back and that
    /// error is returned. A rollback that itself fails is logged as critical;
    /// the caller still receives the original error.
    pub fn with_transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| KnowledgeError::TransactionFailure(format!("begin: {e}")))?;

        match f(&tx) {
            Ok(result) => {
                tx.commit()
                    .map_err(|e| KnowledgeError::TransactionFailure(format!("commit: {e}")))?;
                Ok(result)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback() {
                    error!(
                        critical = true,
                        error = %rollback_err,
                        original = %e,
                        "Knowledge transaction rollback failed"
                    );
                }
                Err(e)
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Utility Operations
// ─────────────────────────────────────────────────────────────────────────────

impl KnowledgeStore {
    /// Get database statistics.
    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.conn.lock();

        let mut stats = StoreStats::default();
        let mut stmt = conn.prepare("SELECT type, COUNT(*) FROM entities GROUP BY type")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (entity_type, count) = row?;
            let count = count as usize;
            match entity_type.parse::<EntityType>() {
                Ok(EntityType::Learning) => stats.learnings = count,
                Ok(EntityType::Pattern) => stats.patterns = count,
                Ok(EntityType::Mistake) => stats.mistakes = count,
                Ok(EntityType::Topic) => stats.topics = count,
                Ok(EntityType::CodeArea) => stats.code_areas = count,
                Ok(EntityType::File) => stats.files = count,
                Err(_) => {}
            }
        }

        let relationships: i64 =
            conn.query_row("SELECT COUNT(*) FROM relationships", [], |row| row.get(0))?;
        let embedded: i64 = conn.query_row(
            "SELECT COUNT(*) FROM entities WHERE embedding IS NOT NULL",
            [],
            |row| row.get(0),
        )?;
        stats.relationships = relationships as usize;
        stats.embedded = embedded as usize;

        Ok(stats)
    }
}
