//! CLI command handlers.

pub mod knowledge;
pub mod session;
pub mod workflow;

use std::io::{IsTerminal, Read};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use serde::de::DeserializeOwned;
use sextant_checkpoint::CheckpointStore;
use sextant_config::{EmbeddingConfig, EmbeddingProvider, SextantConfig};
use sextant_embed::{MockEmbedder, OpenAiEmbedder, OpenAiEmbedderConfig, SharedEmbedder};
use sextant_hooks::{GhCli, GitCli, HandoffDir, SessionHooks, SessionHooksConfig};
use sextant_knowledge::{Knowledge, KnowledgeStore, SearchOptions};

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
    /// Merged configuration.
    pub config: SextantConfig,
    /// Working directory, used as the repository for git and gh.
    pub project_dir: PathBuf,
}

impl Context {
    pub fn open_knowledge_store(&self) -> Result<Arc<KnowledgeStore>> {
        let path = self.config.knowledge_db_path();
        let store = KnowledgeStore::open(&path)
            .with_context(|| format!("Failed to open knowledge store at {}", path.display()))?;
        Ok(Arc::new(store))
    }

    pub fn open_checkpoints(&self) -> Result<Arc<CheckpointStore>> {
        let path = self.config.checkpoint_db_path();
        let store = CheckpointStore::open(&path)
            .with_context(|| format!("Failed to open checkpoint store at {}", path.display()))?;
        Ok(Arc::new(store))
    }

    /// Knowledge facade with the configured embedder, if it can be built.
    pub fn open_knowledge(&self) -> Result<Knowledge> {
        let knowledge_config = self.config.knowledge();
        let mut knowledge = Knowledge::new(self.open_knowledge_store()?).with_search_defaults(
            SearchOptions {
                threshold: knowledge_config.similarity_threshold,
                ..SearchOptions::default()
            },
        );
        match build_embedder(&self.config.embedding()) {
            Ok(Some(embedder)) => knowledge = knowledge.with_embedder(embedder),
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "Embedder unavailable, semantic search disabled"),
        }
        Ok(knowledge)
    }

    pub fn build_hooks(&self) -> Result<SessionHooks> {
        let session = self.config.session();
        let hooks = SessionHooks::new(
            self.open_knowledge()?,
            self.open_checkpoints()?,
            HandoffDir::new(self.config.handoff_dir(), session.handoff_ttl_hours),
        )
        .with_config(SessionHooksConfig::from_config(&self.config))
        .with_vcs(Arc::new(GitCli::new(&self.project_dir)))
        .with_issue_tracker(Arc::new(GhCli::new(&self.project_dir)));
        Ok(hooks)
    }
}

/// Build the configured embedder. `None` when semantic search is disabled.
pub fn build_embedder(config: &EmbeddingConfig) -> Result<Option<SharedEmbedder>> {
    let embedder: SharedEmbedder = match config.provider {
        EmbeddingProvider::None => return Ok(None),
        EmbeddingProvider::Mock => Arc::new(MockEmbedder::new(config.effective_dimensions())),
        EmbeddingProvider::OpenAi => {
            let openai = config.openai.clone().unwrap_or_default();
            let mut embedder_config = OpenAiEmbedderConfig::from_env_var(&openai.api_key_env)?
                .with_base_url(openai.base_url)
                .with_model(openai.model);
            if let Some(dims) = config.dimensions {
                embedder_config = embedder_config.with_dimensions(dims);
            }
            Arc::new(OpenAiEmbedder::new(embedder_config)?)
        }
    };
    Ok(Some(embedder))
}

/// Parse JSON piped on stdin. A terminal or empty input yields the default.
pub fn read_stdin_json<T: DeserializeOwned + Default>() -> Result<T> {
    let stdin = std::io::stdin();
    if stdin.is_terminal() {
        return Ok(T::default());
    }
    let mut input = String::new();
    stdin.lock().read_to_string(&mut input)?;
    parse_json_input(&input)
}

fn parse_json_input<T: DeserializeOwned + Default>(input: &str) -> Result<T> {
    if input.trim().is_empty() {
        return Ok(T::default());
    }
    serde_json::from_str(input).context("Invalid JSON on stdin")
}
