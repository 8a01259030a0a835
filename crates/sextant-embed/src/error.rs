//! Error types for embedding providers.

use thiserror::Error;

/// Result type alias using the embedding error type.
pub type Result<T> = std::result::Result<T, EmbedError>;

/// Errors raised while generating embeddings.
#[derive(Debug, Error)]
pub enum EmbedError {
    /// Provider configuration is missing or invalid.
    #[error("Embedding config error: {0}")]
    Config(String),

    /// HTTP transport failure.
    #[error("Embedding request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The provider answered with an error status.
    #[error("Embedding backend error: {0}")]
    Backend(String),

    /// Response could not be decoded.
    #[error("Embedding response error: {0}")]
    Serialization(String),

    /// The provider has no vector for this input.
    #[error("No embedding available: {0}")]
    Unavailable(String),
}
