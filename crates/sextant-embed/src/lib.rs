//! Text embedding providers for Sextant.
//!
//! The knowledge graph treats embeddings as an optional capability: every
//! caller holds an `Option<SharedEmbedder>` and degrades to keyword matching
//! when it is absent or failing.
//!
//! # Implementations
//!
//! - [`MockEmbedder`]: deterministic hash embeddings for testing
//! - [`KeyedEmbedder`]: fixed text-to-vector table for tests (feature `testing`)
//! - [`OpenAiEmbedder`]: OpenAI-compatible `/embeddings` endpoint

pub mod embeddings;
pub mod error;

pub use embeddings::{
    Embedder, MockEmbedder, OpenAiEmbedder, OpenAiEmbedderConfig, SharedEmbedder,
};
#[cfg(any(test, feature = "testing"))]
pub use embeddings::KeyedEmbedder;
pub use error::{EmbedError, Result};
