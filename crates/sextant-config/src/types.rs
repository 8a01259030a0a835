//! Configuration types.
//!
//! ```toml
//! data_dir = "~/.sextant"
//!
//! [knowledge]
//! database = "knowledge.db"
//! max_tokens = 2000
//! format = "markdown"
//!
//! [checkpoint]
//! database = "checkpoint.db"
//! stale_after_hours = 24
//!
//! [session]
//! handoff_dir = "sessions"
//! handoff_ttl_hours = 24
//!
//! [embedding]
//! provider = "openai"
//!
//! [embedding.openai]
//! model = "text-embedding-3-small"
//! api_key_env = "OPENAI_API_KEY"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "SEXTANT_DATA_DIR";

// ─────────────────────────────────────────────────────────────────────────────
// Root
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration.
///
/// Every section is optional; absent sections fall back to their defaults
/// through the accessor methods.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SextantConfig {
    /// Directory holding databases, handoff files and logs.
    pub data_dir: Option<PathBuf>,
    /// Knowledge graph settings.
    pub knowledge: Option<KnowledgeConfig>,
    /// Checkpoint store settings.
    pub checkpoint: Option<CheckpointConfig>,
    /// Session hook settings.
    pub session: Option<SessionConfig>,
    /// Embedding provider settings.
    pub embedding: Option<EmbeddingConfig>,
    /// Logging settings.
    pub logging: Option<LoggingConfig>,
}

impl SextantConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> crate::Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> crate::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Merge another config on top of this one (other takes priority).
    ///
    /// Sections are replaced whole, not merged field by field.
    pub fn merge(&mut self, other: SextantConfig) {
        if other.data_dir.is_some() {
            self.data_dir = other.data_dir;
        }
        if other.knowledge.is_some() {
            self.knowledge = other.knowledge;
        }
        if other.checkpoint.is_some() {
            self.checkpoint = other.checkpoint;
        }
        if other.session.is_some() {
            self.session = other.session;
        }
        if other.embedding.is_some() {
            self.embedding = other.embedding;
        }
        if other.logging.is_some() {
            self.logging = other.logging;
        }
    }

    /// Effective data directory.
    ///
    /// Resolution order:
    /// 1. `SEXTANT_DATA_DIR` environment variable
    /// 2. Configured `data_dir`
    /// 3. Default: `~/.sextant`
    pub fn effective_data_dir(&self) -> PathBuf {
        if let Ok(dir) = std::env::var(DATA_DIR_ENV)
            && !dir.is_empty()
        {
            return PathBuf::from(dir);
        }

        self.data_dir
            .as_deref()
            .map(expand_home)
            .unwrap_or_else(|| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join(".sextant")
            })
    }

    /// Resolve a possibly relative path against the data directory.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        let path = expand_home(path);
        if path.is_absolute() {
            path
        } else {
            self.effective_data_dir().join(path)
        }
    }

    pub fn knowledge(&self) -> KnowledgeConfig {
        self.knowledge.clone().unwrap_or_default()
    }

    pub fn checkpoint(&self) -> CheckpointConfig {
        self.checkpoint.clone().unwrap_or_default()
    }

    pub fn session(&self) -> SessionConfig {
        self.session.clone().unwrap_or_default()
    }

    pub fn embedding(&self) -> EmbeddingConfig {
        self.embedding.clone().unwrap_or_default()
    }

    pub fn logging(&self) -> LoggingConfig {
        self.logging.clone().unwrap_or_default()
    }

    /// Absolute path of the knowledge database.
    pub fn knowledge_db_path(&self) -> PathBuf {
        self.resolve(&self.knowledge().database)
    }

    /// Absolute path of the checkpoint database.
    pub fn checkpoint_db_path(&self) -> PathBuf {
        self.resolve(&self.checkpoint().database)
    }

    /// Absolute path of the session handoff directory.
    pub fn handoff_dir(&self) -> PathBuf {
        self.resolve(&self.session().handoff_dir)
    }

    /// Absolute path of the log directory.
    pub fn log_dir(&self) -> PathBuf {
        self.effective_data_dir().join("logs")
    }
}

/// Expand a leading `~/` to the home directory.
fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Knowledge
// ─────────────────────────────────────────────────────────────────────────────

/// Output shape for injected context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextFormat {
    /// Header-bearing structured form.
    #[default]
    Markdown,
    /// Flat bullet list.
    Bullets,
    /// Tag-delimited form.
    Tagged,
}

impl std::str::FromStr for ContextFormat {
    type Err = crate::ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "markdown" | "md" => Ok(Self::Markdown),
            "bullets" | "flat" => Ok(Self::Bullets),
            "tagged" | "xml" => Ok(Self::Tagged),
            other => Err(crate::ConfigError::InvalidValue {
                field: "format".to_string(),
                reason: format!("unknown context format '{other}'"),
            }),
        }
    }
}

/// Knowledge graph configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct KnowledgeConfig {
    /// SQLite database path. Relative paths resolve against the data directory.
    pub database: PathBuf,
    /// Token budget for injected context.
    pub max_tokens: usize,
    /// Output shape for injected context.
    pub format: ContextFormat,
    /// Maximum learnings per keyword/structured query.
    pub query_limit: usize,
    /// Minimum cosine similarity for semantic matches.
    pub similarity_threshold: f32,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from("knowledge.db"),
            max_tokens: 2000,
            format: ContextFormat::Markdown,
            query_limit: 50,
            similarity_threshold: 0.5,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Checkpoint
// ─────────────────────────────────────────────────────────────────────────────

/// Checkpoint store configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CheckpointConfig {
    /// SQLite database path. Relative paths resolve against the data directory.
    pub database: PathBuf,
    /// Running workflows idle longer than this are marked failed by cleanup.
    pub stale_after_hours: u32,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from("checkpoint.db"),
            stale_after_hours: 24,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────────────────────────────────────

/// Session hook configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Directory for session-start to session-end handoff files.
    pub handoff_dir: PathBuf,
    /// Handoff files older than this are garbage-collected.
    pub handoff_ttl_hours: u32,
    /// Fetch issue details from the issue tracker.
    pub fetch_issues: bool,
    /// Commits inspected at session end when none are supplied.
    pub commit_scan_limit: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            handoff_dir: PathBuf::from("sessions"),
            handoff_ttl_hours: 24,
            fetch_issues: true,
            commit_scan_limit: 20,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Embedding
// ─────────────────────────────────────────────────────────────────────────────

/// Embedding provider selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// Semantic search disabled.
    #[default]
    None,
    /// Deterministic hash embeddings (testing).
    Mock,
    /// OpenAI-compatible embeddings endpoint.
    OpenAi,
}

/// Embedding provider configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Provider: "none", "mock", or "openai".
    pub provider: EmbeddingProvider,
    /// Output embedding dimensions. Default depends on provider.
    pub dimensions: Option<usize>,
    /// OpenAI-specific settings.
    pub openai: Option<EmbeddingOpenAiConfig>,
}

impl EmbeddingConfig {
    /// Effective dimensions for the configured provider.
    pub fn effective_dimensions(&self) -> usize {
        if let Some(d) = self.dimensions {
            return d;
        }
        match self.provider {
            EmbeddingProvider::OpenAi => 1536,
            EmbeddingProvider::Mock | EmbeddingProvider::None => 384,
        }
    }
}

/// OpenAI-compatible embedding endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingOpenAiConfig {
    /// API base URL.
    pub base_url: String,
    /// Embedding model name.
    pub model: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
}

impl Default for EmbeddingOpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "text-embedding-3-small".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Logging
// ─────────────────────────────────────────────────────────────────────────────

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Write a rolling JSON log under `<data_dir>/logs`.
    pub file: bool,
    /// Console filter directive (e.g. "info", "sextant_hooks=debug").
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file: true,
            level: "warn".to_string(),
        }
    }
}
