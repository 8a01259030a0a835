//! Session lifecycle orchestration.
//!
//! [`SessionHooks`] is the only component that talks to both the knowledge
//! graph and the checkpoint store. Every external step (git, issue tracker,
//! embeddings, handoff files, even the stores) is individually fallible: a
//! failure is logged and the session continues with less context.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sextant_checkpoint::{CheckpointStore, NewContextMetrics, Workflow};
use sextant_config::{ContextFormat, SextantConfig};
use sextant_knowledge::{
    FormatInput, FormatOptions, Knowledge, Learning, Mistake, OutputFormat, Pattern,
    PriorityContext, QueryContext, QueryResult, SearchOptions, Topic, TopicQuery, format_context,
};
use tracing::{debug, info, warn};

use crate::capabilities::{CommitInfo, IssueInfo, IssueTracker, VersionControl};
use crate::extract::extract_learnings;
use crate::handoff::{HandoffDir, SessionHandoff};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Tuning for [`SessionHooks`].
#[derive(Debug, Clone, PartialEq)]
pub struct SessionHooksConfig {
    pub max_tokens: usize,
    pub format: OutputFormat,
    /// Learnings per knowledge query.
    pub query_limit: usize,
    pub similarity_threshold: f32,
    pub fetch_issues: bool,
    /// Commits inspected at session end when none are supplied.
    pub commit_scan_limit: usize,
}

impl Default for SessionHooksConfig {
    fn default() -> Self {
        Self::from_config(&SextantConfig::default())
    }
}

impl SessionHooksConfig {
    pub fn from_config(config: &SextantConfig) -> Self {
        let knowledge = config.knowledge();
        let session = config.session();
        Self {
            max_tokens: knowledge.max_tokens,
            format: output_format(knowledge.format),
            query_limit: knowledge.query_limit,
            similarity_threshold: knowledge.similarity_threshold,
            fetch_issues: session.fetch_issues,
            commit_scan_limit: session.commit_scan_limit,
        }
    }
}

/// Map the configured context format onto the renderer's.
pub fn output_format(format: ContextFormat) -> OutputFormat {
    match format {
        ContextFormat::Markdown => OutputFormat::Markdown,
        ContextFormat::Bullets => OutputFormat::Bullets,
        ContextFormat::Tagged => OutputFormat::Tagged,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Inputs & Outputs
// ─────────────────────────────────────────────────────────────────────────────

/// What the caller knows when a session starts. Provided values win over
/// anything the hooks would discover.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionStartContext {
    pub session_id: Option<String>,
    pub issue_number: Option<u64>,
    pub branch: Option<String>,
    pub modified_files: Option<Vec<String>>,
    /// Extra keywords to search for.
    pub keywords: Vec<String>,
    pub max_tokens: Option<usize>,
    pub format: Option<ContextFormat>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStartResult {
    pub learnings: Vec<QueryResult>,
    pub patterns: Vec<Pattern>,
    pub mistakes: Vec<Mistake>,
    pub topics: Vec<Topic>,
    /// Rendered context for injection.
    pub summary: String,
    pub token_count: usize,
    pub workflow: Option<Workflow>,
    pub session_metadata: SessionHandoff,
}

/// What the caller reports when a session ends.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionEndSummary {
    pub session_id: Option<String>,
    pub issue_number: Option<u64>,
    /// Commits made during the session. Fetched from version control when absent.
    pub commits: Option<Vec<CommitInfo>>,
    pub transcript: Option<String>,
    /// Learnings the caller captured directly.
    pub learnings: Vec<Learning>,
    pub files_read: u32,
    pub compacted: bool,
    /// Derived from the handoff start time when absent.
    pub duration_minutes: Option<u32>,
    pub review_findings: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionEndResult {
    pub session_id: String,
    pub learnings_stored: usize,
    pub learning_ids: Vec<String>,
    pub commits_logged: usize,
    pub metrics_recorded: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Hooks
// ─────────────────────────────────────────────────────────────────────────────

pub struct SessionHooks {
    knowledge: Knowledge,
    checkpoints: Arc<CheckpointStore>,
    handoff: HandoffDir,
    vcs: Option<Arc<dyn VersionControl>>,
    issues: Option<Arc<dyn IssueTracker>>,
    config: SessionHooksConfig,
}

impl std::fmt::Debug for SessionHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHooks")
            .field("knowledge", &self.knowledge)
            .field("handoff", &self.handoff)
            .field("vcs", &self.vcs.is_some())
            .field("issues", &self.issues.is_some())
            .field("config", &self.config)
            .finish()
    }
}

impl SessionHooks {
    pub fn new(knowledge: Knowledge, checkpoints: Arc<CheckpointStore>, handoff: HandoffDir) -> Self {
        Self {
            knowledge,
            checkpoints,
            handoff,
            vcs: None,
            issues: None,
            config: SessionHooksConfig::default(),
        }
    }

    pub fn with_vcs(mut self, vcs: Arc<dyn VersionControl>) -> Self {
        self.vcs = Some(vcs);
        self
    }

    pub fn with_issue_tracker(mut self, issues: Arc<dyn IssueTracker>) -> Self {
        self.issues = Some(issues);
        self
    }

    pub fn with_config(mut self, config: SessionHooksConfig) -> Self {
        self.config = config;
        self
    }

    pub fn knowledge(&self) -> &Knowledge {
        &self.knowledge
    }

    pub fn checkpoints(&self) -> &Arc<CheckpointStore> {
        &self.checkpoints
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Session start
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn on_session_start(&self, ctx: SessionStartContext) -> SessionStartResult {
        let session_id = ctx
            .session_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        // 1. Gather context.
        let branch = match ctx.branch.clone() {
            Some(b) => Some(b),
            None => self.current_branch().await,
        };
        let modified_files = match ctx.modified_files.clone() {
            Some(files) => files,
            None => self.modified_files().await,
        };
        let issue_number = ctx
            .issue_number
            .or_else(|| branch.as_deref().and_then(issue_from_branch));
        let issue = match issue_number {
            Some(n) => self.fetch_issue(n).await,
            None => None,
        };

        let mut keywords = ctx.keywords.clone();
        if let Some(info) = &issue {
            keywords.extend(info.keywords());
        }
        let keywords = dedup_strings(keywords);

        debug!(
            %session_id,
            branch = ?branch,
            issue = ?issue_number,
            files = modified_files.len(),
            keywords = keywords.len(),
            "Session start context"
        );

        // 2. Query knowledge.
        let learnings = self
            .collect_learnings(issue_number, &keywords, issue.as_ref())
            .await;
        let mistakes = self.collect_mistakes(&modified_files);
        let patterns = self.collect_patterns(&learnings);
        let topics = self.collect_topics(&keywords, issue.as_ref()).await;

        // 3. Active workflow.
        let workflow = issue_number.and_then(|n| self.active_workflow(n));

        // 4. Render.
        let options = FormatOptions::default()
            .with_max_tokens(ctx.max_tokens.unwrap_or(self.config.max_tokens))
            .with_format(ctx.format.map_or(self.config.format, output_format))
            .with_context(PriorityContext {
                issue_number,
                modified_files: modified_files.clone(),
            });
        let rendered = format_context(
            FormatInput {
                results: &learnings,
                patterns: &patterns,
                mistakes: &mistakes,
            },
            &options,
        );
        let summary = match &workflow {
            Some(wf) if rendered.content.is_empty() => workflow_status_line(wf),
            Some(wf) => format!("{}\n\n{}", workflow_status_line(wf), rendered.content),
            None => rendered.content.clone(),
        };

        // 5. Hand off to session end.
        let session_metadata = SessionHandoff {
            session_id: session_id.clone(),
            started_at: Utc::now(),
            branch,
            issue_number,
            workflow_id: workflow.as_ref().map(|w| w.id.clone()),
            modified_files,
            keywords,
            learnings_injected: rendered.result_count as u32,
        };
        if let Err(e) = self.handoff.write(&session_metadata) {
            warn!(%session_id, error = %e, "Failed to write session handoff");
        }

        info!(
            %session_id,
            learnings = learnings.len(),
            patterns = patterns.len(),
            mistakes = mistakes.len(),
            topics = topics.len(),
            tokens = rendered.token_count,
            "Session started"
        );

        SessionStartResult {
            token_count: sextant_knowledge::estimate_tokens(&summary),
            learnings,
            patterns,
            mistakes,
            topics,
            summary,
            workflow,
            session_metadata,
        }
    }

    async fn current_branch(&self) -> Option<String> {
        let vcs = self.vcs.as_ref()?;
        vcs.current_branch()
            .await
            .map_err(|e| debug!(error = %e, "Could not read current branch"))
            .ok()
    }

    async fn modified_files(&self) -> Vec<String> {
        let Some(vcs) = &self.vcs else {
            return Vec::new();
        };
        vcs.modified_files()
            .await
            .map_err(|e| debug!(error = %e, "Could not read modified files"))
            .unwrap_or_default()
    }

    async fn fetch_issue(&self, number: u64) -> Option<IssueInfo> {
        if !self.config.fetch_issues {
            return None;
        }
        let tracker = self.issues.as_ref()?;
        tracker
            .fetch_issue(number)
            .await
            .map_err(|e| warn!(issue = number, error = %e, "Could not fetch issue"))
            .ok()
    }

    async fn collect_learnings(
        &self,
        issue_number: Option<u64>,
        keywords: &[String],
        issue: Option<&IssueInfo>,
    ) -> Vec<QueryResult> {
        let limit = self.config.query_limit;
        let mut queries = Vec::new();
        if let Some(n) = issue_number {
            queries.push(QueryContext::new().with_issue(n).with_limit(limit));
        }
        for keyword in keywords {
            queries.push(QueryContext::new().with_keyword(keyword).with_limit(limit));
        }

        let mut seen = HashSet::new();
        let mut results = Vec::new();
        for query in &queries {
            match self.knowledge.query(query) {
                Ok(found) => results.extend(found.into_iter().filter(|r| seen.insert(r.learning.id.clone()))),
                Err(e) => warn!(error = %e, "Knowledge query failed"),
            }
        }

        if let Some(info) = issue {
            let options = SearchOptions {
                limit,
                threshold: self.config.similarity_threshold,
                include_related: true,
            };
            let similar = self.knowledge.search_similar(&info.title, &options).await;
            results.extend(similar.into_iter().filter(|r| seen.insert(r.learning.id.clone())));
        }
        results
    }

    fn collect_mistakes(&self, files: &[String]) -> Vec<Mistake> {
        let mut seen = HashSet::new();
        let mut mistakes = Vec::new();
        for file in files {
            match self.knowledge.get_mistakes_for_file(file) {
                Ok(found) => mistakes.extend(found.into_iter().filter(|m| seen.insert(m.id.clone()))),
                Err(e) => warn!(file = %file, error = %e, "Mistake lookup failed"),
            }
        }
        mistakes
    }

    fn collect_patterns(&self, learnings: &[QueryResult]) -> Vec<Pattern> {
        let areas = dedup_strings(
            learnings
                .iter()
                .filter_map(|r| r.learning.code_area.clone())
                .collect(),
        );
        let mut seen = HashSet::new();
        let mut patterns = Vec::new();
        for area in &areas {
            match self.knowledge.get_patterns_for_area(area) {
                Ok(found) => patterns.extend(found.into_iter().filter(|p| seen.insert(p.id.clone()))),
                Err(e) => warn!(area = %area, error = %e, "Pattern lookup failed"),
            }
        }
        patterns
    }

    async fn collect_topics(&self, keywords: &[String], issue: Option<&IssueInfo>) -> Vec<Topic> {
        if keywords.is_empty() && issue.is_none() {
            return Vec::new();
        }
        let mut query = TopicQuery::keywords(keywords.iter().cloned());
        if let Some(info) = issue {
            query = query.with_text(info.title.clone());
        }
        query.threshold = self.config.similarity_threshold;
        self.knowledge
            .query_topics(&query)
            .await
            .map_err(|e| warn!(error = %e, "Topic lookup failed"))
            .unwrap_or_default()
    }

    fn active_workflow(&self, issue_number: u64) -> Option<Workflow> {
        match self.checkpoints.find_by_issue(issue_number) {
            Ok(found) => found.filter(|w| w.status.is_active()),
            Err(e) => {
                warn!(issue = issue_number, error = %e, "Workflow lookup failed");
                None
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Session end
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn on_session_end(&self, summary: SessionEndSummary) -> SessionEndResult {
        // 1. Handoff from session start.
        let handoff = self
            .handoff
            .take(summary.session_id.as_deref())
            .map_err(|e| warn!(error = %e, "Failed to read session handoff"))
            .ok()
            .flatten();

        let session_id = summary
            .session_id
            .clone()
            .or_else(|| handoff.as_ref().map(|h| h.session_id.clone()))
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let issue_number = summary
            .issue_number
            .or_else(|| handoff.as_ref().and_then(|h| h.issue_number));

        // 2. Commits.
        let commits = match summary.commits.clone() {
            Some(c) => c,
            None => self.session_commits(handoff.as_ref()).await,
        };

        // 3. Extract.
        let learnings = extract_learnings(
            &summary.learnings,
            &commits,
            summary.transcript.as_deref(),
            issue_number,
        );

        // 4. Store.
        let (learnings_stored, learning_ids) = match self.knowledge.store(&learnings).await {
            Ok(n) => (n, learnings.iter().map(|l| l.id.clone()).collect()),
            Err(e) => {
                warn!(%session_id, count = learnings.len(), error = %e, "Failed to store learnings");
                (0, Vec::new())
            }
        };

        // 5. Checkpoint bookkeeping.
        let workflow_id = handoff
            .as_ref()
            .and_then(|h| h.workflow_id.clone())
            .or_else(|| issue_number.and_then(|n| self.active_workflow(n)).map(|w| w.id));
        let commits_logged = match &workflow_id {
            Some(id) => self.log_commits(id, &commits),
            None => 0,
        };

        let duration_minutes = summary.duration_minutes.unwrap_or_else(|| {
            handoff
                .as_ref()
                .map(|h| (Utc::now() - h.started_at).num_minutes().max(0) as u32)
                .unwrap_or(0)
        });
        let metrics = NewContextMetrics {
            session_id: session_id.clone(),
            issue_number,
            files_read: summary.files_read,
            compacted: summary.compacted,
            duration_minutes,
            review_findings: summary.review_findings,
            learnings_injected: handoff.as_ref().map_or(0, |h| h.learnings_injected),
            learnings_captured: learnings_stored as u32,
        };
        let metrics_recorded = match self.checkpoints.record_metrics(&metrics) {
            Ok(_) => true,
            Err(e) => {
                warn!(%session_id, error = %e, "Failed to record context metrics");
                false
            }
        };

        info!(
            %session_id,
            learnings_stored,
            commits_logged,
            metrics_recorded,
            "Session ended"
        );

        SessionEndResult {
            session_id,
            learnings_stored,
            learning_ids,
            commits_logged,
            metrics_recorded,
        }
    }

    /// Recent commits, limited to those after the session started when known.
    async fn session_commits(&self, handoff: Option<&SessionHandoff>) -> Vec<CommitInfo> {
        let Some(vcs) = &self.vcs else {
            return Vec::new();
        };
        let commits = match vcs.recent_commits(self.config.commit_scan_limit).await {
            Ok(c) => c,
            Err(e) => {
                debug!(error = %e, "Could not read recent commits");
                return Vec::new();
            }
        };
        match handoff {
            Some(h) => commits
                .into_iter()
                .filter(|c| c.committed_at.is_none_or(|at| at >= h.started_at))
                .collect(),
            None => commits,
        }
    }

    fn log_commits(&self, workflow_id: &str, commits: &[CommitInfo]) -> usize {
        commits
            .iter()
            .filter(|c| match self.checkpoints.log_commit(workflow_id, &c.sha, c.subject()) {
                Ok(_) => true,
                Err(e) => {
                    warn!(%workflow_id, sha = %c.sha, error = %e, "Failed to log commit");
                    false
                }
            })
            .count()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Issue number embedded in a branch name.
///
/// Prefixed forms (`issue-123`, `gh-45`, `#7`) match in any path segment.
/// A bare leading number (`123-thing`) only counts as the first segment or
/// right after a work-type segment such as `feat/` or `fix/`, and never when
/// it reads like a date (`2024-10-19`).
pub fn issue_from_branch(branch: &str) -> Option<u64> {
    const PREFIXES: &[&str] = &["issues-", "issue-", "issues_", "issue_", "gh-", "#"];
    const WORK_TYPES: &[&str] = &[
        "feat", "feature", "fix", "bugfix", "hotfix", "bug", "chore", "docs", "refactor", "perf",
        "test", "issue", "issues",
    ];

    let segments: Vec<String> = branch.split('/').map(str::to_ascii_lowercase).collect();

    let prefixed = segments.iter().find_map(|segment| {
        let rest = PREFIXES.iter().find_map(|p| segment.strip_prefix(p))?;
        leading_number(rest, false)
    });
    if prefixed.is_some() {
        return prefixed;
    }

    let bare = match segments.as_slice() {
        [first, ..] if !WORK_TYPES.contains(&first.as_str()) => first,
        [_, second, ..] => second,
        _ => return None,
    };
    leading_number(bare, true)
}

/// Digits at the start of `s`, ending the segment or followed by `-`/`_`.
fn leading_number(s: &str, reject_dates: bool) -> Option<u64> {
    let digits_len = s.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits_len == 0 {
        return None;
    }
    let tail = &s[digits_len..];
    if !(tail.is_empty() || tail.starts_with(['-', '_'])) {
        return None;
    }
    if reject_dates && tail[1.min(tail.len())..].starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }
    s[..digits_len].parse().ok()
}

fn workflow_status_line(wf: &Workflow) -> String {
    format!(
        "Active workflow: issue #{} on `{}` (phase {}, status {}, retries {})",
        wf.issue_number, wf.branch, wf.phase, wf.status, wf.retry_count
    )
}

fn dedup_strings(items: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty() && seen.insert(s.to_lowercase()))
        .collect()
}
