//! Error types for the knowledge crate.

use sextant_types::PinError;
use thiserror::Error;

use crate::types::EntityType;

/// Errors that can occur in the knowledge crate.
#[derive(Debug, Error)]
pub enum KnowledgeError {
    /// Database connection or operation failed.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An id was reused under a different entity type.
    #[error("Entity {id} is a {existing}, cannot store it as a {attempted}")]
    TypeConflict {
        id: String,
        existing: EntityType,
        attempted: EntityType,
    },

    /// Requested resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Vectors of different lengths were compared.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// A transaction could not be started or committed.
    #[error("Transaction failed: {0}")]
    TransactionFailure(String),

    /// Another live store handle owns the database path.
    #[error(transparent)]
    AlreadyOpen(#[from] PinError),

    /// Invalid data or state.
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Result type alias for knowledge operations.
pub type Result<T> = std::result::Result<T, KnowledgeError>;
