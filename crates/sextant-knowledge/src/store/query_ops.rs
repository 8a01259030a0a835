//! Read-side graph operations: filtered learning queries with 2-hop
//! traversal, single-hop lookups, topic matching, and embedding scans.

use rusqlite::{Connection, params};

use crate::error::Result;
use crate::types::{
    EntityData, Learning, Mistake, Pattern, QueryContext, QueryResult, RelationshipType, Topic,
    TopicQuery, code_area_id, file_id,
};

use super::KnowledgeStore;
use super::entity_ops::collect_entities;

const E_COLUMNS: &str = "e.id, e.type, e.data, e.embedding, e.created_at, e.updated_at";

/// Learnings that nothing supersedes, newest first.
fn active_learnings_sql() -> String {
    format!(
        "SELECT {E_COLUMNS} FROM entities e \
         WHERE e.type = 'Learning' \
           AND NOT EXISTS (SELECT 1 FROM relationships r \
                           WHERE r.to_id = e.id AND r.type = '{}') \
         ORDER BY e.created_at DESC, e.rowid DESC",
        RelationshipType::Supersedes.as_str()
    )
}

/// Entities with an edge of `rel_type` pointing at `target`, newest first.
fn sources_of_sql(rel_type: RelationshipType) -> String {
    format!(
        "SELECT {E_COLUMNS} FROM relationships r JOIN entities e ON e.id = r.from_id \
         WHERE r.to_id = ?1 AND r.type = '{}' \
         ORDER BY e.created_at DESC, e.rowid DESC",
        rel_type.as_str()
    )
}

/// Patterns and mistakes with a `LED_TO` edge into `learning_id`.
pub(crate) fn related_on(
    conn: &Connection,
    learning_id: &str,
) -> Result<(Vec<Pattern>, Vec<Mistake>)> {
    let mut patterns = Vec::new();
    let mut mistakes = Vec::new();
    let sql = sources_of_sql(RelationshipType::LedTo);
    for entity in collect_entities(conn, &sql, params![learning_id])? {
        match entity.data {
            EntityData::Pattern(p) => patterns.push(p),
            EntityData::Mistake(m) => mistakes.push(m),
            _ => {}
        }
    }
    Ok((patterns, mistakes))
}

impl KnowledgeStore {
    /// Learnings matching every filter in `context`, newest first, each
    /// annotated with the patterns and mistakes that led to it.
    ///
    /// Rows whose stored payload cannot be decoded are logged and skipped.
    pub fn query(&self, context: &QueryContext) -> Result<Vec<QueryResult>> {
        let conn = self.conn.lock();

        let learnings: Vec<Learning> = collect_entities(&conn, &active_learnings_sql(), params![])?
            .into_iter()
            .filter_map(|e| match e.data {
                EntityData::Learning(l) => Some(l),
                _ => None,
            })
            .filter(|l| context.matches(l))
            .take(context.limit)
            .collect();

        let mut results = Vec::with_capacity(learnings.len());
        for learning in learnings {
            let (related_patterns, related_mistakes) = related_on(&conn, &learning.id)?;
            results.push(QueryResult {
                learning,
                related_patterns,
                related_mistakes,
                relevance_score: None,
            });
        }
        Ok(results)
    }

    /// Patterns and mistakes that led to a learning.
    pub fn related_for(&self, learning_id: &str) -> Result<(Vec<Pattern>, Vec<Mistake>)> {
        let conn = self.conn.lock();
        related_on(&conn, learning_id)
    }

    /// Mistakes recorded against a file path, newest first.
    pub fn get_mistakes_for_file(&self, path: &str) -> Result<Vec<Mistake>> {
        let conn = self.conn.lock();
        let sql = sources_of_sql(RelationshipType::InFile);
        Ok(collect_entities(&conn, &sql, params![file_id(path)])?
            .into_iter()
            .filter_map(|e| match e.data {
                EntityData::Mistake(m) => Some(m),
                _ => None,
            })
            .collect())
    }

    /// Patterns that apply to a code area, newest first.
    pub fn get_patterns_for_area(&self, area: &str) -> Result<Vec<Pattern>> {
        let conn = self.conn.lock();
        let sql = sources_of_sql(RelationshipType::AppliesTo);
        Ok(collect_entities(&conn, &sql, params![code_area_id(area)])?
            .into_iter()
            .filter_map(|e| match e.data {
                EntityData::Pattern(p) => Some(p),
                _ => None,
            })
            .collect())
    }

    /// Topics matching any keyword, newest first.
    ///
    /// With no keywords the newest topics are returned.
    pub fn query_topics(&self, query: &TopicQuery) -> Result<Vec<Topic>> {
        Ok(self
            .all_topics()?
            .into_iter()
            .map(|(topic, _)| topic)
            .filter(|t| query.keywords.is_empty() || t.matches_any(&query.keywords))
            .take(query.limit)
            .collect())
    }

    /// Every non-superseded learning that carries an embedding.
    pub fn learning_embeddings(&self) -> Result<Vec<(Learning, Vec<f32>)>> {
        let conn = self.conn.lock();
        Ok(collect_entities(&conn, &active_learnings_sql(), params![])?
            .into_iter()
            .filter_map(|e| match (e.data, e.embedding) {
                (EntityData::Learning(l), Some(v)) => Some((l, v)),
                _ => None,
            })
            .collect())
    }

    /// Every topic with its embedding if it has one, newest first.
    pub fn all_topics(&self) -> Result<Vec<(Topic, Option<Vec<f32>>)>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {E_COLUMNS} FROM entities e WHERE e.type = 'Topic' \
             ORDER BY e.created_at DESC, e.rowid DESC"
        );
        Ok(collect_entities(&conn, &sql, params![])?
            .into_iter()
            .filter_map(|e| match e.data {
                EntityData::Topic(t) => Some((t, e.embedding)),
                _ => None,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> KnowledgeStore {
        KnowledgeStore::open_in_memory().unwrap()
    }

    #[test]
    fn test_query_by_code_area_scenario() {
        let store = store();
        store
            .store(&[Learning::new("L1", "validate input")
                .with_code_area("Security")
                .with_confidence(0.95)])
            .unwrap();

        let results = store
            .query(&QueryContext::new().with_code_area("Security"))
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].learning.id, "L1");
    }

    #[test]
    fn test_query_code_area_matches_merged_area() {
        let store = store();
        store
            .store(&[
                Learning::new("L1", "validate input").with_code_area("Security"),
                Learning::new("L2", "cache headers").with_code_area("Caching"),
            ])
            .unwrap();
        store
            .store_pattern(&Pattern::new("P1", "Allowlist", "d").with_code_area("Security"), &[])
            .unwrap();

        for area in ["security", "SECURITY", "Security"] {
            let results = store.query(&QueryContext::new().with_code_area(area)).unwrap();
            assert_eq!(results.len(), 1, "area {area}");
            assert_eq!(results[0].learning.id, "L1");
            assert_eq!(store.get_patterns_for_area(area).unwrap().len(), 1);
        }
    }

    #[test]
    fn test_query_two_hop_traversal() {
        let store = store();
        store
            .store(&[Learning::new("L", "use prepared statements").with_code_area("Database")])
            .unwrap();
        let pattern = Pattern::new("P", "Parameterized SQL", "Never interpolate");
        store.store_pattern(&pattern, &["L".into()]).unwrap();
        let mistake = Mistake::new("M", "string-built query", "switched to params");
        store.store_mistake(&mistake, Some("L")).unwrap();

        let results = store
            .query(&QueryContext::new().with_code_area("Database"))
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].related_patterns, vec![pattern]);
        assert_eq!(results[0].related_mistakes, vec![mistake]);
    }

    #[test]
    fn test_query_and_semantics_and_order() {
        let store = store();
        store
            .store(&[
                Learning::new("L1", "Cache invalidation on write").with_source_issue(1),
                Learning::new("L2", "cache warming at boot").with_source_issue(2),
                Learning::new("L3", "Write-through CACHE").with_source_issue(1),
            ])
            .unwrap();

        let ids = |r: Vec<QueryResult>| r.into_iter().map(|r| r.learning.id).collect::<Vec<_>>();

        let all = store.query(&QueryContext::new().with_keyword("cache")).unwrap();
        assert_eq!(ids(all), vec!["L3", "L2", "L1"]);

        let both = store
            .query(&QueryContext::new().with_keyword("cache").with_keyword("write"))
            .unwrap();
        assert_eq!(ids(both), vec!["L3", "L1"]);

        let issue = store
            .query(&QueryContext::new().with_keyword("cache").with_issue(2))
            .unwrap();
        assert_eq!(ids(issue), vec!["L2"]);

        let limited = store
            .query(&QueryContext::new().with_keyword("cache").with_limit(1))
            .unwrap();
        assert_eq!(ids(limited), vec!["L3"]);
    }

    #[test]
    fn test_query_skips_corrupt_rows() {
        let store = store();
        store
            .store(&[
                Learning::new("L1", "one").with_code_area("A"),
                Learning::new("L2", "two").with_code_area("A"),
            ])
            .unwrap();
        store
            .conn
            .lock()
            .execute("UPDATE entities SET data = 'garbage' WHERE id = 'L1'", [])
            .unwrap();

        let results = store.query(&QueryContext::new().with_code_area("A")).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].learning.id, "L2");
    }

    #[test]
    fn test_query_excludes_superseded() {
        let store = store();
        store
            .store(&[Learning::new("old", "retry 3 times"), Learning::new("new", "retry 5 times")])
            .unwrap();
        store.supersede_learning("old", "new").unwrap();

        let results = store.query(&QueryContext::new().with_keyword("retry")).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].learning.id, "new");
    }

    #[test]
    fn test_single_hop_lookups() {
        let store = store();
        assert!(store.get_mistakes_for_file("none.rs").unwrap().is_empty());
        assert!(store.get_patterns_for_area("Nowhere").unwrap().is_empty());

        store
            .store_mistake(&Mistake::new("M1", "a", "b").with_file_path("x.rs"), None)
            .unwrap();
        store
            .store_mistake(&Mistake::new("M2", "c", "d").with_file_path("x.rs"), None)
            .unwrap();
        store
            .store_pattern(&Pattern::new("P1", "n", "d").with_code_area("Core"), &[])
            .unwrap();

        let mistakes = store.get_mistakes_for_file("x.rs").unwrap();
        assert_eq!(
            mistakes.iter().map(|m| m.id.as_str()).collect::<Vec<_>>(),
            vec!["M2", "M1"]
        );
        assert_eq!(store.get_patterns_for_area("core").unwrap().len(), 1);
    }

    #[test]
    fn test_query_topics() {
        let store = store();
        store
            .store_topic(&Topic::new("T1", "retry policies").with_keywords(["networking"]), None)
            .unwrap();
        store
            .store_topic(&Topic::new("T2", "schema migrations").with_keywords(["database"]), None)
            .unwrap();

        let hits = store
            .query_topics(&TopicQuery::keywords(["Database", "unrelated"]))
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "T2");

        let newest = store.query_topics(&TopicQuery::default().with_limit(1)).unwrap();
        assert_eq!(newest[0].id, "T2");
    }

    #[test]
    fn test_learning_embeddings() {
        let store = store();
        store
            .store_embedded(&[
                (Learning::new("L1", "a"), Some(vec![1.0, 0.0])),
                (Learning::new("L2", "b"), None),
            ])
            .unwrap();
        let embedded = store.learning_embeddings().unwrap();
        assert_eq!(embedded.len(), 1);
        assert_eq!(embedded[0].0.id, "L1");
        assert_eq!(embedded[0].1, vec![1.0, 0.0]);
    }
}
