//! Entity, relationship and query types for the knowledge graph.
//!
//! Entity payloads are a closed sum type ([`EntityData`]). The untyped JSON
//! form only exists inside the store, which decodes it back through
//! [`EntityData::from_json`] using the row's type column.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{KnowledgeError, Result};

/// Free-form metadata attached to learnings and topics.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Confidence assumed for learnings stored without one.
pub const DEFAULT_CONFIDENCE: f32 = 0.5;

// ─────────────────────────────────────────────────────────────────────────────
// Entity & Relationship Types
// ─────────────────────────────────────────────────────────────────────────────

/// Kind of node in the knowledge graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityType {
    Learning,
    CodeArea,
    File,
    Pattern,
    Mistake,
    Topic,
}

impl EntityType {
    pub const ALL: [EntityType; 6] = [
        Self::Learning,
        Self::CodeArea,
        Self::File,
        Self::Pattern,
        Self::Mistake,
        Self::Topic,
    ];

    /// Get the string representation stored in the `type` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Learning => "Learning",
            Self::CodeArea => "CodeArea",
            Self::File => "File",
            Self::Pattern => "Pattern",
            Self::Mistake => "Mistake",
            Self::Topic => "Topic",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = KnowledgeError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| KnowledgeError::InvalidData(format!("Unknown entity type: {s}")))
    }
}

/// Kind of directed edge in the knowledge graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationshipType {
    /// Learning is about a code area.
    About,
    /// Learning or mistake concerns a file.
    InFile,
    /// Pattern or mistake produced a learning.
    LedTo,
    /// Pattern applies to a code area.
    AppliesTo,
    /// Newer learning replaces an older one.
    Supersedes,
}

impl RelationshipType {
    pub const ALL: [RelationshipType; 5] = [
        Self::About,
        Self::InFile,
        Self::LedTo,
        Self::AppliesTo,
        Self::Supersedes,
    ];

    /// Get the string representation stored in the `type` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::About => "ABOUT",
            Self::InFile => "IN_FILE",
            Self::LedTo => "LED_TO",
            Self::AppliesTo => "APPLIES_TO",
            Self::Supersedes => "SUPERSEDES",
        }
    }
}

impl fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RelationshipType {
    type Err = KnowledgeError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| KnowledgeError::InvalidData(format!("Unknown relationship type: {s}")))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Entity Payloads
// ─────────────────────────────────────────────────────────────────────────────

/// The atomic unit of captured knowledge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Learning {
    pub id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_issue: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_area: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Learning {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            source_issue: None,
            code_area: None,
            file_path: None,
            confidence: None,
            metadata: Metadata::new(),
        }
    }

    pub fn with_source_issue(mut self, issue: u64) -> Self {
        self.source_issue = Some(issue);
        self
    }

    pub fn with_code_area(mut self, area: impl Into<String>) -> Self {
        self.code_area = Some(area.into());
        self
    }

    pub fn with_file_path(mut self, path: impl Into<String>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Confidence, falling back to [`DEFAULT_CONFIDENCE`].
    pub fn effective_confidence(&self) -> f32 {
        self.confidence.unwrap_or(DEFAULT_CONFIDENCE)
    }
}

/// A recurring approach, justified by the learnings it led to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_area: Option<String>,
}

impl Pattern {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            code_area: None,
        }
    }

    pub fn with_code_area(mut self, area: impl Into<String>) -> Self {
        self.code_area = Some(area.into());
        self
    }
}

/// Something that went wrong and how it was fixed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mistake {
    pub id: String,
    pub description: String,
    pub how_fixed: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
}

impl Mistake {
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        how_fixed: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            how_fixed: how_fixed.into(),
            file_path: None,
        }
    }

    pub fn with_file_path(mut self, path: impl Into<String>) -> Self {
        self.file_path = Some(path.into());
        self
    }
}

/// A conversational memory, matched by keyword or embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topic {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub keywords: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_session: Option<String>,
    pub confidence: f32,
    /// RFC 3339 time the topic was captured.
    pub timestamp: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Topic {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            keywords: BTreeSet::new(),
            source_session: None,
            confidence: DEFAULT_CONFIDENCE,
            timestamp: sextant_types::now_ts(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords.extend(keywords.into_iter().map(Into::into));
        self
    }

    pub fn with_source_session(mut self, session: impl Into<String>) -> Self {
        self.source_session = Some(session.into());
        self
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }

    /// Whether any keyword matches this topic's keyword set or content.
    pub fn matches_any(&self, keywords: &[String]) -> bool {
        let content = self.content.to_lowercase();
        keywords.iter().any(|k| {
            let k = k.to_lowercase();
            content.contains(&k) || self.keywords.iter().any(|own| own.to_lowercase() == k)
        })
    }
}

/// A named region of the codebase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeArea {
    pub id: String,
    pub name: String,
}

impl CodeArea {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: code_area_id(&name),
            name,
        }
    }
}

/// A file path referenced by learnings and mistakes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    pub id: String,
    pub path: String,
}

impl FileRef {
    pub fn new(path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            id: file_id(&path),
            path,
        }
    }
}

/// Entity id for a code area name: `area:<slug>`.
pub fn code_area_id(name: &str) -> String {
    format!("area:{}", slugify(name))
}

/// Entity id for a file path: `file:<first 16 hex chars of sha256>`.
pub fn file_id(path: &str) -> String {
    let digest = Sha256::digest(path.as_bytes());
    let hex = hex::encode(digest);
    format!("file:{}", &hex[..16])
}

/// Lowercase, alphanumerics kept, every other run collapsed to `-`.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;
    for c in name.chars() {
        if c.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.extend(c.to_lowercase());
        } else {
            pending_dash = true;
        }
    }
    if slug.is_empty() {
        slug.push_str("unnamed");
    }
    slug
}

/// Typed payload of an entity.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityData {
    Learning(Learning),
    CodeArea(CodeArea),
    File(FileRef),
    Pattern(Pattern),
    Mistake(Mistake),
    Topic(Topic),
}

impl EntityData {
    pub fn id(&self) -> &str {
        match self {
            Self::Learning(l) => &l.id,
            Self::CodeArea(a) => &a.id,
            Self::File(f) => &f.id,
            Self::Pattern(p) => &p.id,
            Self::Mistake(m) => &m.id,
            Self::Topic(t) => &t.id,
        }
    }

    pub fn entity_type(&self) -> EntityType {
        match self {
            Self::Learning(_) => EntityType::Learning,
            Self::CodeArea(_) => EntityType::CodeArea,
            Self::File(_) => EntityType::File,
            Self::Pattern(_) => EntityType::Pattern,
            Self::Mistake(_) => EntityType::Mistake,
            Self::Topic(_) => EntityType::Topic,
        }
    }

    /// Encode the payload for the `data` column.
    pub fn to_json(&self) -> Result<String> {
        let json = match self {
            Self::Learning(l) => serde_json::to_string(l)?,
            Self::CodeArea(a) => serde_json::to_string(a)?,
            Self::File(f) => serde_json::to_string(f)?,
            Self::Pattern(p) => serde_json::to_string(p)?,
            Self::Mistake(m) => serde_json::to_string(m)?,
            Self::Topic(t) => serde_json::to_string(t)?,
        };
        Ok(json)
    }

    /// Decode a `data` column according to its `type` column.
    pub fn from_json(entity_type: EntityType, json: &str) -> Result<Self> {
        let data = match entity_type {
            EntityType::Learning => Self::Learning(serde_json::from_str(json)?),
            EntityType::CodeArea => Self::CodeArea(serde_json::from_str(json)?),
            EntityType::File => Self::File(serde_json::from_str(json)?),
            EntityType::Pattern => Self::Pattern(serde_json::from_str(json)?),
            EntityType::Mistake => Self::Mistake(serde_json::from_str(json)?),
            EntityType::Topic => Self::Topic(serde_json::from_str(json)?),
        };
        Ok(data)
    }
}

/// A stored entity with its bookkeeping columns.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub data: EntityData,
    pub embedding: Option<Vec<f32>>,
    pub created_at: String,
    pub updated_at: String,
}

impl Entity {
    pub fn id(&self) -> &str {
        self.data.id()
    }

    pub fn entity_type(&self) -> EntityType {
        self.data.entity_type()
    }
}

/// A stored directed edge.
#[derive(Debug, Clone, PartialEq)]
pub struct Relationship {
    pub id: i64,
    pub from_id: String,
    pub to_id: String,
    pub rel_type: RelationshipType,
    pub data: Option<serde_json::Value>,
    pub created_at: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Queries
// ─────────────────────────────────────────────────────────────────────────────

/// Default number of learnings returned by a query.
pub const DEFAULT_QUERY_LIMIT: usize = 50;

/// Filters for [`crate::KnowledgeStore::query`]. All provided filters must match.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryContext {
    pub code_area: Option<String>,
    pub file_path: Option<String>,
    /// Every keyword must appear in the learning content (case-insensitive).
    pub keywords: Vec<String>,
    pub issue_number: Option<u64>,
    pub limit: usize,
}

impl Default for QueryContext {
    fn default() -> Self {
        Self {
            code_area: None,
            file_path: None,
            keywords: Vec::new(),
            issue_number: None,
            limit: DEFAULT_QUERY_LIMIT,
        }
    }
}

impl QueryContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_code_area(mut self, area: impl Into<String>) -> Self {
        self.code_area = Some(area.into());
        self
    }

    pub fn with_file_path(mut self, path: impl Into<String>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    pub fn with_keyword(mut self, keyword: impl Into<String>) -> Self {
        self.keywords.push(keyword.into());
        self
    }

    pub fn with_issue(mut self, issue: u64) -> Self {
        self.issue_number = Some(issue);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Whether a learning satisfies every filter.
    pub fn matches(&self, learning: &Learning) -> bool {
        if let Some(area) = &self.code_area
            && learning.code_area.as_deref().map(code_area_id) != Some(code_area_id(area))
        {
            return false;
        }
        if let Some(path) = &self.file_path
            && learning.file_path.as_deref() != Some(path.as_str())
        {
            return false;
        }
        if let Some(issue) = self.issue_number
            && learning.source_issue != Some(issue)
        {
            return false;
        }
        let content = learning.content.to_lowercase();
        self.keywords
            .iter()
            .all(|k| content.contains(&k.to_lowercase()))
    }
}

/// A learning with the patterns and mistakes that led to it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    pub learning: Learning,
    pub related_patterns: Vec<Pattern>,
    pub related_mistakes: Vec<Mistake>,
    /// Cosine similarity to the query text, for semantic results.
    pub relevance_score: Option<f32>,
}

impl QueryResult {
    pub fn new(learning: Learning) -> Self {
        Self {
            learning,
            related_patterns: Vec::new(),
            related_mistakes: Vec::new(),
            relevance_score: None,
        }
    }
}

/// Filters for topic lookups.
#[derive(Debug, Clone, PartialEq)]
pub struct TopicQuery {
    /// Any keyword matching the topic's keywords or content selects it.
    pub keywords: Vec<String>,
    /// Free text for semantic ranking when an embedder is available.
    pub text: Option<String>,
    pub limit: usize,
    /// Minimum similarity for semantic matches.
    pub threshold: f32,
}

impl Default for TopicQuery {
    fn default() -> Self {
        Self {
            keywords: Vec::new(),
            text: None,
            limit: 10,
            threshold: 0.5,
        }
    }
}

impl TopicQuery {
    pub fn keywords<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keywords: keywords.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Security"), "security");
        assert_eq!(slugify("Auth / Sessions"), "auth-sessions");
        assert_eq!(slugify("  --API v2--  "), "api-v2");
        assert_eq!(slugify("!!!"), "unnamed");
    }

    #[test]
    fn test_derived_ids_are_stable() {
        assert_eq!(CodeArea::new("Data Layer").id, "area:data-layer");
        assert_eq!(CodeArea::new("data layer").id, CodeArea::new("Data-Layer").id);

        let a = FileRef::new("src/lib.rs");
        let b = FileRef::new("src/lib.rs");
        assert_eq!(a.id, b.id);
        assert_eq!(a.id.len(), "file:".len() + 16);
        assert_ne!(a.id, FileRef::new("src/main.rs").id);
    }

    #[test]
    fn test_entity_type_roundtrip() {
        for t in EntityType::ALL {
            assert_eq!(t.as_str().parse::<EntityType>().unwrap(), t);
        }
        assert!("Widget".parse::<EntityType>().is_err());
        for r in RelationshipType::ALL {
            assert_eq!(r.as_str().parse::<RelationshipType>().unwrap(), r);
        }
    }

    #[test]
    fn test_entity_data_json_uses_type_column() {
        let data = EntityData::Learning(
            Learning::new("L1", "validate input").with_code_area("Security"),
        );
        let json = data.to_json().unwrap();
        assert!(!json.contains("\"type\""));

        let back = EntityData::from_json(EntityType::Learning, &json).unwrap();
        assert_eq!(back, data);
        assert!(EntityData::from_json(EntityType::Pattern, &json).is_err());
    }

    #[test]
    fn test_query_context_matches_all_filters() {
        let learning = Learning::new("L1", "Always Validate input at the boundary")
            .with_code_area("Security")
            .with_source_issue(7);

        assert!(QueryContext::new().matches(&learning));
        assert!(
            QueryContext::new()
                .with_code_area("Security")
                .with_keyword("validate")
                .with_keyword("BOUNDARY")
                .matches(&learning)
        );
        assert!(
            !QueryContext::new()
                .with_keyword("validate")
                .with_keyword("sanitize")
                .matches(&learning)
        );
        assert!(!QueryContext::new().with_issue(8).matches(&learning));
        assert!(!QueryContext::new().with_file_path("a.rs").matches(&learning));
    }

    #[test]
    fn test_topic_matches_any_keyword() {
        let topic = Topic::new("T1", "Discussed retry backoff").with_keywords(["Networking"]);
        assert!(topic.matches_any(&["networking".into()]));
        assert!(topic.matches_any(&["unrelated".into(), "BACKOFF".into()]));
        assert!(!topic.matches_any(&["database".into()]));
    }

    #[test]
    fn test_learning_default_confidence() {
        assert_eq!(Learning::new("L", "c").effective_confidence(), 0.5);
        assert_eq!(
            Learning::new("L", "c").with_confidence(0.9).effective_confidence(),
            0.9
        );
    }
}
