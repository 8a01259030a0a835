//! The [`Embedder`] trait and its implementations.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use crate::error::{EmbedError, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Embedder Trait
// ─────────────────────────────────────────────────────────────────────────────

/// Trait for generating text embeddings.
///
/// Embedders convert text into dense fixed-length vectors whose cosine
/// similarity approximates semantic relatedness.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate an embedding for a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts in a batch.
    ///
    /// Default implementation calls `embed` for each text sequentially.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// Dimensionality of the vectors this embedder produces.
    fn dimensions(&self) -> usize;

    /// Provider name, recorded alongside stored vectors in logs.
    fn name(&self) -> &str;
}

/// A shared embedder that can be used across threads.
pub type SharedEmbedder = Arc<dyn Embedder>;

// ─────────────────────────────────────────────────────────────────────────────
// Mock Embedder
// ─────────────────────────────────────────────────────────────────────────────

/// Deterministic embedder for testing.
///
/// The same text always yields the same unit vector; different texts yield
/// unrelated vectors.
#[derive(Debug, Clone)]
pub struct MockEmbedder {
    dimensions: usize,
}

impl MockEmbedder {
    /// Create a new mock embedder with the specified dimensions.
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new(384)
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut state = simple_hash(text);
        let mut embedding = vec![0.0f32; self.dimensions];

        for value in embedding.iter_mut() {
            state = state.wrapping_mul(1103515245).wrapping_add(12345);
            *value = ((state >> 16) as u16 as f32 / 32768.0) - 1.0;
        }

        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut embedding {
                *x /= norm;
            }
        }

        Ok(embedding)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// djb2 hash.
fn simple_hash(s: &str) -> u64 {
    let mut hash: u64 = 5381;
    for byte in s.bytes() {
        hash = hash.wrapping_mul(33).wrapping_add(byte as u64);
    }
    hash
}

// ─────────────────────────────────────────────────────────────────────────────
// Keyed Embedder
// ─────────────────────────────────────────────────────────────────────────────

/// Embedder with hand-picked vectors per keyword.
///
/// A text embeds to the sum of the vectors of every keyword it contains
/// (case-insensitive). Text containing no keyword embeds to the zero vector.
/// Lets tests state exactly which texts are "semantically" close.
#[cfg(any(test, feature = "testing"))]
#[derive(Debug, Clone, Default)]
pub struct KeyedEmbedder {
    dimensions: usize,
    keys: Vec<(String, Vec<f32>)>,
    failing: bool,
}

#[cfg(any(test, feature = "testing"))]
impl KeyedEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            keys: Vec::new(),
            failing: false,
        }
    }

    /// Register the vector for a keyword. Panics on a dimension mismatch.
    pub fn with_key(mut self, keyword: &str, vector: Vec<f32>) -> Self {
        assert_eq!(vector.len(), self.dimensions, "keyword vector dimension");
        self.keys.push((keyword.to_lowercase(), vector));
        self
    }

    /// An embedder whose every call fails, for degradation tests.
    pub fn failing(dimensions: usize) -> Self {
        Self {
            dimensions,
            keys: Vec::new(),
            failing: true,
        }
    }
}

#[cfg(any(test, feature = "testing"))]
#[async_trait]
impl Embedder for KeyedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if self.failing {
            return Err(EmbedError::Unavailable("keyed embedder set to fail".into()));
        }

        let lowered = text.to_lowercase();
        let mut out = vec![0.0f32; self.dimensions];
        for (keyword, vector) in &self.keys {
            if lowered.contains(keyword.as_str()) {
                for (o, v) in out.iter_mut().zip(vector) {
                    *o += v;
                }
            }
        }
        Ok(out)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        "keyed"
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// OpenAI Embedder
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration for an OpenAI-compatible embeddings endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiEmbedderConfig {
    /// API key for authentication.
    pub api_key: String,
    /// Base URL for the API.
    pub base_url: String,
    /// Model to use for embeddings.
    pub model: String,
    /// Output dimensions; inferred from the model when unset.
    pub dimensions: Option<usize>,
    /// Request timeout.
    pub timeout: Duration,
}

impl OpenAiEmbedderConfig {
    /// Create a new config with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: "text-embedding-3-small".to_string(),
            dimensions: None,
            timeout: Duration::from_secs(30),
        }
    }

    /// Read the API key from the named environment variable.
    pub fn from_env_var(var: &str) -> Result<Self> {
        let api_key = std::env::var(var)
            .map_err(|_| EmbedError::Config(format!("{var} environment variable not set")))?;
        Ok(Self::new(api_key))
    }

    /// Set a custom base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set the model to use.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Override the output dimensions.
    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = Some(dimensions);
        self
    }
}

/// OpenAI embeddings API client.
pub struct OpenAiEmbedder {
    client: Client,
    config: OpenAiEmbedderConfig,
    dimensions: usize,
}

impl OpenAiEmbedder {
    /// Create a new OpenAI embedder.
    pub fn new(config: OpenAiEmbedderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| EmbedError::Config(format!("Failed to create HTTP client: {e}")))?;

        let dimensions = config
            .dimensions
            .unwrap_or_else(|| model_dimensions(&config.model));

        Ok(Self {
            client,
            config,
            dimensions,
        })
    }

    fn embeddings_url(&self) -> String {
        format!("{}/embeddings", self.config.base_url.trim_end_matches('/'))
    }
}

/// Known output sizes for OpenAI embedding models.
fn model_dimensions(model: &str) -> usize {
    match model {
        "text-embedding-3-large" => 3072,
        _ => 1536,
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let results = self.embed_batch(&[text]).await?;
        results
            .into_iter()
            .next()
            .ok_or_else(|| EmbedError::Unavailable("No embedding returned".to_string()))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbeddingRequest {
            model: self.config.model.clone(),
            input: texts.iter().map(|s| s.to_string()).collect(),
            dimensions: self.config.dimensions,
        };

        let response = self
            .client
            .post(self.embeddings_url())
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EmbedError::Backend(format!("HTTP {status} - {body}")));
        }

        let result: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EmbedError::Serialization(format!("Failed to parse response: {e}")))?;

        let mut embeddings = result.data;
        embeddings.sort_by_key(|e| e.index);

        debug!(count = embeddings.len(), model = %self.config.model, "Embedded batch");
        Ok(embeddings.into_iter().map(|e| e.embedding).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        "openai"
    }
}

#[derive(Debug, serde::Serialize)]
struct EmbeddingRequest {
    model: String,
    input: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, serde::Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, serde::Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}
