//! Async knowledge facade.
//!
//! [`Knowledge`] pairs a [`KnowledgeStore`] with an optional embedder.
//! Embedding is always best-effort: a missing or failing embedder degrades
//! semantic operations to keyword behavior or empty results, never errors.

use std::sync::Arc;

use sextant_embed::SharedEmbedder;
use tracing::{debug, warn};

use crate::error::Result;
use crate::format::{FormatInput, FormatOptions, FormattedContext, format_context};
use crate::store::KnowledgeStore;
use crate::types::{Learning, Mistake, Pattern, QueryContext, QueryResult, Topic, TopicQuery};
use crate::vector::{SimilarityOptions, find_most_similar};

/// Options for [`Knowledge::search_similar`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchOptions {
    pub limit: usize,
    /// Minimum cosine similarity.
    pub threshold: f32,
    /// Attach patterns and mistakes that led to each learning.
    pub include_related: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            threshold: 0.5,
            include_related: true,
        }
    }
}

/// What to render in [`Knowledge::format_for_context`].
#[derive(Debug, Clone, PartialEq)]
pub enum ContextRequest {
    /// Keyword/filter query.
    Query(QueryContext),
    /// Free text, matched semantically.
    Text(String),
}

/// Knowledge graph with optional semantic search.
#[derive(Clone)]
pub struct Knowledge {
    store: Arc<KnowledgeStore>,
    embedder: Option<SharedEmbedder>,
    search_defaults: SearchOptions,
}

impl std::fmt::Debug for Knowledge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Knowledge")
            .field("store", &self.store)
            .field("embedder", &self.embedder.as_ref().map(|e| e.name().to_string()))
            .finish()
    }
}

impl Knowledge {
    pub fn new(store: Arc<KnowledgeStore>) -> Self {
        Self {
            store,
            embedder: None,
            search_defaults: SearchOptions::default(),
        }
    }

    pub fn with_embedder(mut self, embedder: SharedEmbedder) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Defaults used when rendering `ContextRequest::Text`.
    pub fn with_search_defaults(mut self, options: SearchOptions) -> Self {
        self.search_defaults = options;
        self
    }

    /// The underlying store.
    pub fn graph(&self) -> &Arc<KnowledgeStore> {
        &self.store
    }

    pub fn has_embedder(&self) -> bool {
        self.embedder.is_some()
    }

    /// Embed text, logging and swallowing failures.
    async fn embed_soft(&self, text: &str) -> Option<Vec<f32>> {
        let embedder = self.embedder.as_ref()?;
        match embedder.embed(text).await {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(embedder = embedder.name(), error = %e, "Embedding failed, continuing without vector");
                None
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Writes
    // ─────────────────────────────────────────────────────────────────────────

    /// Embed and store learnings in one transaction.
    pub async fn store(&self, learnings: &[Learning]) -> Result<usize> {
        if learnings.is_empty() {
            return Ok(0);
        }
        let mut batch = Vec::with_capacity(learnings.len());
        for learning in learnings {
            let embedding = self.embed_soft(&learning.content).await;
            batch.push((learning.clone(), embedding));
        }
        self.store.store_embedded(&batch)
    }

    pub fn store_pattern(&self, pattern: &Pattern, learning_ids: &[String]) -> Result<String> {
        self.store.store_pattern(pattern, learning_ids)
    }

    pub fn store_mistake(&self, mistake: &Mistake, learning_id: Option<&str>) -> Result<String> {
        self.store.store_mistake(mistake, learning_id)
    }

    pub async fn store_topic(&self, topic: &Topic) -> Result<String> {
        let embedding = self.embed_soft(&topic.content).await;
        self.store.store_topic(topic, embedding.as_deref())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────────

    pub fn query(&self, context: &QueryContext) -> Result<Vec<QueryResult>> {
        self.store.query(context)
    }

    pub fn get_mistakes_for_file(&self, path: &str) -> Result<Vec<Mistake>> {
        self.store.get_mistakes_for_file(path)
    }

    pub fn get_patterns_for_area(&self, area: &str) -> Result<Vec<Pattern>> {
        self.store.get_patterns_for_area(area)
    }

    /// Learnings ranked by cosine similarity to `query_text`.
    ///
    /// Returns an empty list for empty text, no embedder, a failed
    /// embedding, storage errors, or an empty corpus. Stored vectors of a
    /// different dimension are skipped.
    pub async fn search_similar(&self, query_text: &str, options: &SearchOptions) -> Vec<QueryResult> {
        if query_text.trim().is_empty() {
            return Vec::new();
        }
        let Some(query) = self.embed_soft(query_text).await else {
            return Vec::new();
        };

        let corpus = match self.store.learning_embeddings() {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "Failed to load learning embeddings");
                return Vec::new();
            }
        };

        let (learnings, vectors): (Vec<Learning>, Vec<Vec<f32>>) = corpus
            .into_iter()
            .filter(|(l, v)| {
                let keep = v.len() == query.len();
                if !keep {
                    debug!(learning_id = %l.id, dims = v.len(), "Skipping embedding of other dimension");
                }
                keep
            })
            .unzip();

        let matches = match find_most_similar(
            &query,
            &vectors,
            SimilarityOptions {
                limit: options.limit,
                threshold: options.threshold,
            },
        ) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "Similarity ranking failed");
                return Vec::new();
            }
        };

        let mut results = Vec::with_capacity(matches.len());
        for m in matches {
            let learning = learnings[m.index].clone();
            let mut result = QueryResult::new(learning);
            result.relevance_score = Some(m.score);
            if options.include_related {
                match self.store.related_for(&result.learning.id) {
                    Ok((patterns, mistakes)) => {
                        result.related_patterns = patterns;
                        result.related_mistakes = mistakes;
                    }
                    Err(e) => {
                        warn!(learning_id = %result.learning.id, error = %e, "Failed to load related entities");
                    }
                }
            }
            results.push(result);
        }
        results
    }

    /// Topics for a session.
    ///
    /// With `text` and a working embedder topics are ranked by similarity;
    /// otherwise they are keyword matched.
    pub async fn query_topics(&self, query: &TopicQuery) -> Result<Vec<Topic>> {
        if let Some(text) = query.text.as_deref().filter(|t| !t.trim().is_empty())
            && let Some(vector) = self.embed_soft(text).await
        {
            let (topics, vectors): (Vec<Topic>, Vec<Vec<f32>>) = self
                .store
                .all_topics()?
                .into_iter()
                .filter_map(|(t, v)| v.filter(|v| v.len() == vector.len()).map(|v| (t, v)))
                .unzip();

            let matches = find_most_similar(
                &vector,
                &vectors,
                SimilarityOptions {
                    limit: query.limit,
                    threshold: query.threshold,
                },
            )?;
            return Ok(matches.into_iter().map(|m| topics[m.index].clone()).collect());
        }

        self.store.query_topics(query)
    }

    /// Query or search, then render under the budget.
    ///
    /// Storage failures degrade to an empty result.
    pub async fn format_for_context(
        &self,
        request: ContextRequest,
        options: &FormatOptions,
    ) -> FormattedContext {
        let results = match request {
            ContextRequest::Query(context) => match self.store.query(&context) {
                Ok(r) => r,
                Err(e) => {
                    warn!(error = %e, "Knowledge query failed, rendering empty context");
                    return FormattedContext::empty();
                }
            },
            ContextRequest::Text(text) => self.search_similar(&text, &self.search_defaults).await,
        };

        format_context(FormatInput::results(&results), options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sextant_embed::{KeyedEmbedder, MockEmbedder};

    fn keyed() -> SharedEmbedder {
        Arc::new(
            KeyedEmbedder::new(3)
                .with_key("sql", vec![1.0, 0.0, 0.0])
                .with_key("injection", vec![0.5, 0.0, 0.0])
                .with_key("css", vec![0.0, 1.0, 0.0])
                .with_key("deploy", vec![0.0, 0.0, 1.0]),
        )
    }

    fn knowledge(embedder: Option<SharedEmbedder>) -> Knowledge {
        let store = Arc::new(KnowledgeStore::open_in_memory().unwrap());
        let k = Knowledge::new(store);
        match embedder {
            Some(e) => k.with_embedder(e),
            None => k,
        }
    }

    #[tokio::test]
    async fn test_store_embeds_learnings() {
        let k = knowledge(Some(Arc::new(MockEmbedder::new(8))));
        k.store(&[Learning::new("L1", "validate input")]).await.unwrap();

        let entity = k.graph().get_entity("L1").unwrap().unwrap();
        assert_eq!(entity.embedding.map(|v| v.len()), Some(8));
    }

    #[tokio::test]
    async fn test_embedding_failure_is_soft() {
        let k = knowledge(Some(Arc::new(KeyedEmbedder::failing(3))));
        assert_eq!(k.store(&[Learning::new("L1", "content")]).await.unwrap(), 1);

        let entity = k.graph().get_entity("L1").unwrap().unwrap();
        assert!(entity.embedding.is_none());
        assert!(k.search_similar("content", &SearchOptions::default()).await.is_empty());
    }

    #[tokio::test]
    async fn test_search_similar_ranks_by_cosine() {
        let k = knowledge(Some(keyed()));
        k.store(&[
            Learning::new("sql", "Use parameterized SQL to stop injection"),
            Learning::new("css", "CSS grid beats floats"),
            Learning::new("deploy", "Deploy on Tuesdays"),
        ])
        .await
        .unwrap();
        let pattern = Pattern::new("P1", "Bind params", "Never interpolate");
        k.store_pattern(&pattern, &["sql".into()]).unwrap();

        let results = k.search_similar("sql injection", &SearchOptions::default()).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].learning.id, "sql");
        assert!(results[0].relevance_score.unwrap() > 0.99);
        assert_eq!(results[0].related_patterns, vec![pattern]);

        let bare = k
            .search_similar(
                "sql",
                &SearchOptions {
                    include_related: false,
                    ..SearchOptions::default()
                },
            )
            .await;
        assert!(bare[0].related_patterns.is_empty());
    }

    #[tokio::test]
    async fn test_search_similar_degenerate_inputs() {
        let k = knowledge(Some(keyed()));
        assert!(k.search_similar("sql", &SearchOptions::default()).await.is_empty());
        assert!(k.search_similar("   ", &SearchOptions::default()).await.is_empty());

        let plain = knowledge(None);
        plain.store(&[Learning::new("L1", "sql")]).await.unwrap();
        assert!(plain.search_similar("sql", &SearchOptions::default()).await.is_empty());
    }

    #[tokio::test]
    async fn test_search_skips_other_dimensions() {
        let k = knowledge(Some(keyed()));
        k.graph()
            .store_embedded(&[(Learning::new("old", "sql from old model"), Some(vec![1.0; 5]))])
            .unwrap();
        k.store(&[Learning::new("new", "sql today")]).await.unwrap();

        let results = k.search_similar("sql", &SearchOptions::default()).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].learning.id, "new");
    }

    #[tokio::test]
    async fn test_query_topics_semantic_and_keyword() {
        let k = knowledge(Some(keyed()));
        k.store_topic(&Topic::new("T1", "talked about sql migrations").with_keywords(["db"]))
            .await
            .unwrap();
        k.store_topic(&Topic::new("T2", "deploy pipeline").with_keywords(["ops"]))
            .await
            .unwrap();

        let semantic = k
            .query_topics(&TopicQuery::default().with_text("deploy friday"))
            .await
            .unwrap();
        assert_eq!(semantic.len(), 1);
        assert_eq!(semantic[0].id, "T2");

        let keyword = k.query_topics(&TopicQuery::keywords(["db"])).await.unwrap();
        assert_eq!(keyword.len(), 1);
        assert_eq!(keyword[0].id, "T1");
    }

    #[tokio::test]
    async fn test_format_for_context_query_and_text() {
        let k = knowledge(Some(keyed()));
        k.store(&[Learning::new("L1", "sql needs params")
            .with_code_area("Database")
            .with_confidence(0.9)])
            .await
            .unwrap();

        let by_query = k
            .format_for_context(
                ContextRequest::Query(QueryContext::new().with_code_area("Database")),
                &FormatOptions::default(),
            )
            .await;
        assert_eq!(by_query.result_count, 1);
        assert!(by_query.content.contains("sql needs params"));

        let by_text = k
            .format_for_context(ContextRequest::Text("sql".into()), &FormatOptions::default())
            .await;
        assert_eq!(by_text.result_count, 1);
    }

    #[tokio::test]
    async fn test_format_for_context_degrades_on_storage_failure() {
        let k = knowledge(None);
        k.store(&[Learning::new("L1", "x")]).await.unwrap();
        k.graph()
            .conn
            .lock()
            .execute_batch("DROP TABLE relationships; DROP TABLE entities;")
            .unwrap();

        let out = k
            .format_for_context(
                ContextRequest::Query(QueryContext::new()),
                &FormatOptions::default(),
            )
            .await;
        assert_eq!(out, FormattedContext::empty());
    }

    #[tokio::test]
    async fn test_token_budget_scenario() {
        let k = knowledge(None);
        let learnings: Vec<Learning> = (0..40)
            .map(|i| {
                Learning::new(format!("L{i}"), format!("learning number {i} ").repeat(8))
                    .with_code_area(format!("Area{}", i % 7))
            })
            .collect();
        k.store(&learnings).await.unwrap();

        let mut last = 0;
        for max_tokens in [100, 250, 500, 1000, 4000] {
            let out = k
                .format_for_context(
                    ContextRequest::Query(QueryContext::new()),
                    &FormatOptions::default().with_max_tokens(max_tokens),
                )
                .await;
            assert!(out.token_count <= max_tokens);
            assert!(out.result_count >= last);
            last = out.result_count;
        }
        assert_eq!(last, 40);
    }
}
