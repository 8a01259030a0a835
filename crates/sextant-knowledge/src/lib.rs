//! Knowledge graph for Sextant.
//!
//! Learnings, patterns, mistakes and conversational topics captured during
//! development sessions are stored as typed entities joined by typed edges
//! in a single SQLite file, then served back with relevance ranking and
//! token-budgeted formatting.
//!
//! - [`KnowledgeStore`]: synchronous entity/relationship persistence and the
//!   graph-level operations built on it (store, query, 2-hop traversal)
//! - [`Knowledge`]: async facade adding embeddings and semantic search
//! - [`vector`]: cosine similarity and top-k ranking
//! - [`format`]: priority scoring and budgeted rendering

pub mod error;
pub mod format;
pub mod knowledge;
pub mod store;
pub mod types;
pub mod validation;
pub mod vector;

pub use error::{KnowledgeError, Result};
pub use format::{
    FormatInput, FormatOptions, FormattedContext, OutputFormat, PriorityContext, estimate_tokens,
    format_context,
};
pub use knowledge::{ContextRequest, Knowledge, SearchOptions};
pub use store::{KnowledgeStore, StoreStats};
pub use types::{
    CodeArea, Entity, EntityData, EntityType, FileRef, Learning, Metadata, Mistake, Pattern,
    QueryContext, QueryResult, Relationship, RelationshipType, Topic, TopicQuery,
};
pub use vector::{SimilarityMatch, SimilarityOptions};
