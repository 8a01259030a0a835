//! Learning extraction from commits and session transcripts.
//!
//! Ids are derived from normalized content, so extracting the same text in
//! a later session merges into the existing learning instead of duplicating it.

use std::collections::HashSet;

use sextant_knowledge::Learning;
use sha2::{Digest, Sha256};

use crate::capabilities::CommitInfo;

/// Line prefixes that mark an explicit learning in a transcript.
pub const TRANSCRIPT_MARKERS: &[&str] = &["LEARNING:", "LEARNED:", "TIL:", "INSIGHT:"];

/// Confidence for learnings the assistant stated explicitly.
const MARKER_CONFIDENCE: f32 = 0.8;

/// Content-derived learning id.
pub fn learning_id(content: &str) -> String {
    let normalized = content.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
    let digest = Sha256::digest(normalized.as_bytes());
    format!("learning:{}", &hex::encode(digest)[..16])
}

/// A parsed conventional-commit header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConventionalCommit<'a> {
    pub kind: &'a str,
    pub scope: Option<&'a str>,
    pub breaking: bool,
    pub subject: &'a str,
}

/// Parse `type(scope)!: subject`.
pub fn parse_conventional(header: &str) -> Option<ConventionalCommit<'_>> {
    let (prefix, subject) = header.split_once(':')?;
    let subject = subject.trim();
    let (prefix, breaking) = match prefix.strip_suffix('!') {
        Some(p) => (p, true),
        None => (prefix, false),
    };
    let (kind, scope) = match prefix.split_once('(') {
        Some((kind, rest)) => (kind, Some(rest.strip_suffix(')')?.trim())),
        None => (prefix, None),
    };
    if kind.is_empty() || !kind.chars().all(|c| c.is_ascii_alphabetic()) || subject.is_empty() {
        return None;
    }
    Some(ConventionalCommit {
        kind,
        scope: scope.filter(|s| !s.is_empty()),
        breaking,
        subject,
    })
}

/// Label and confidence for commit types that carry a lesson.
fn commit_lesson(kind: &str) -> Option<(&'static str, f32)> {
    match kind.to_ascii_lowercase().as_str() {
        "fix" => Some(("Fixed", 0.7)),
        "security" => Some(("Security", 0.8)),
        "perf" => Some(("Performance", 0.6)),
        "refactor" => Some(("Refactored", 0.5)),
        _ => None,
    }
}

/// Learnings from conventional commits and from markers in commit bodies.
pub fn from_commits(commits: &[CommitInfo], issue: Option<u64>) -> Vec<Learning> {
    let mut learnings = Vec::new();
    for commit in commits {
        if let Some(cc) = parse_conventional(commit.subject())
            && let Some((label, confidence)) = commit_lesson(cc.kind)
        {
            let content = format!("{label}: {}", cc.subject);
            let mut learning = Learning::new(learning_id(&content), content)
                .with_confidence(confidence)
                .with_metadata("source", "commit".into())
                .with_metadata("commit", commit.sha.clone().into())
                .with_metadata("commit_type", cc.kind.to_ascii_lowercase().into())
                .with_metadata("timestamp", extraction_time(commit).into());
            if let Some(scope) = cc.scope {
                learning = learning.with_code_area(scope);
            }
            if cc.breaking {
                learning = learning.with_metadata("breaking", true.into());
            }
            learnings.push(with_issue(learning, issue));
        }

        for mut learning in from_transcript(&commit.message, issue) {
            learning = learning.with_metadata("commit", commit.sha.clone().into());
            learnings.push(learning);
        }
    }
    learnings
}

fn extraction_time(commit: &CommitInfo) -> String {
    commit
        .committed_at
        .map(sextant_types::format_ts)
        .unwrap_or_else(sextant_types::now_ts)
}

/// Learnings from lines starting with a [`TRANSCRIPT_MARKERS`] entry.
///
/// Markers match case-insensitively and may follow a list bullet.
pub fn from_transcript(text: &str, issue: Option<u64>) -> Vec<Learning> {
    text.lines()
        .filter_map(|line| {
            let line = line.trim().trim_start_matches(['-', '*', '>']).trim_start();
            let content = TRANSCRIPT_MARKERS.iter().find_map(|marker| {
                let head = line.get(..marker.len())?;
                head.eq_ignore_ascii_case(marker)
                    .then(|| line[marker.len()..].trim())
            })?;
            if content.is_empty() {
                return None;
            }
            let learning = Learning::new(learning_id(content), content)
                .with_confidence(MARKER_CONFIDENCE)
                .with_metadata("source", "transcript".into())
                .with_metadata("timestamp", sextant_types::now_ts().into());
            Some(with_issue(learning, issue))
        })
        .collect()
}

fn with_issue(learning: Learning, issue: Option<u64>) -> Learning {
    match issue {
        Some(n) if learning.source_issue.is_none() => learning.with_source_issue(n),
        _ => learning,
    }
}

/// Everything a session produced, deduplicated by id.
///
/// Explicit learnings come first and win over extracted ones with the same id.
pub fn extract_learnings(
    explicit: &[Learning],
    commits: &[CommitInfo],
    transcript: Option<&str>,
    issue: Option<u64>,
) -> Vec<Learning> {
    let mut seen = HashSet::new();
    explicit
        .iter()
        .cloned()
        .map(|l| with_issue(l, issue))
        .chain(from_commits(commits, issue))
        .chain(transcript.map(|t| from_transcript(t, issue)).unwrap_or_default())
        .filter(|l| seen.insert(l.id.clone()))
        .collect()
}
