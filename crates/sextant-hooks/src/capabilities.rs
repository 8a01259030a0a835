//! External capabilities consulted by the session hooks.
//!
//! Each capability is optional and independently fallible. The hooks treat
//! any error as missing context.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{HookError, Result};

/// Default timeout for `git` and `gh` subprocesses.
const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// Field and record separators for `git log` output.
const FIELD_SEP: char = '\u{1f}';
const RECORD_SEP: char = '\u{1e}';

// ─────────────────────────────────────────────────────────────────────────────
// Version control
// ─────────────────────────────────────────────────────────────────────────────

/// A commit as reported by version control or supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub sha: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub committed_at: Option<DateTime<Utc>>,
}

impl CommitInfo {
    pub fn new(sha: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            sha: sha.into(),
            message: message.into(),
            committed_at: None,
        }
    }

    /// First line of the message.
    pub fn subject(&self) -> &str {
        self.message.lines().next().unwrap_or_default().trim()
    }
}

#[async_trait]
pub trait VersionControl: Send + Sync {
    async fn current_branch(&self) -> Result<String>;

    /// Paths with uncommitted changes, relative to the repository root.
    async fn modified_files(&self) -> Result<Vec<String>>;

    /// Most recent commits on the current branch, newest first.
    async fn recent_commits(&self, limit: usize) -> Result<Vec<CommitInfo>>;
}

/// [`VersionControl`] backed by the `git` executable.
#[derive(Debug, Clone)]
pub struct GitCli {
    repo_dir: PathBuf,
    timeout: Duration,
}

impl GitCli {
    pub fn new(repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn git(&self, args: &[&str]) -> Result<String> {
        run_command("git", args, &self.repo_dir, self.timeout).await
    }
}

#[async_trait]
impl VersionControl for GitCli {
    async fn current_branch(&self) -> Result<String> {
        let branch = self.git(&["rev-parse", "--abbrev-ref", "HEAD"]).await?;
        let branch = branch.trim();
        if branch.is_empty() || branch == "HEAD" {
            return Err(HookError::Parse {
                command: "git rev-parse".to_string(),
                message: "detached HEAD".to_string(),
            });
        }
        Ok(branch.to_string())
    }

    async fn modified_files(&self) -> Result<Vec<String>> {
        let output = self.git(&["status", "--porcelain"]).await?;
        Ok(parse_porcelain(&output))
    }

    async fn recent_commits(&self, limit: usize) -> Result<Vec<CommitInfo>> {
        let count = limit.to_string();
        let format = format!("--format=%H{FIELD_SEP}%cI{FIELD_SEP}%B{RECORD_SEP}");
        let output = self.git(&["log", "-n", &count, &format]).await?;
        Ok(parse_log(&output))
    }
}

/// Paths from `git status --porcelain`. Renames report the new path.
pub fn parse_porcelain(output: &str) -> Vec<String> {
    output
        .lines()
        .filter(|line| line.len() > 3)
        .map(|line| {
            let path = &line[3..];
            let path = path.rsplit_once(" -> ").map_or(path, |(_, new)| new);
            path.trim().trim_matches('"').to_string()
        })
        .filter(|p| !p.is_empty())
        .collect()
}

fn parse_log(output: &str) -> Vec<CommitInfo> {
    output
        .split(RECORD_SEP)
        .filter_map(|record| {
            let mut fields = record.trim_start_matches('\n').splitn(3, FIELD_SEP);
            let sha = fields.next()?.trim();
            let date = fields.next()?.trim();
            let message = fields.next()?.trim();
            if sha.is_empty() {
                return None;
            }
            Some(CommitInfo {
                sha: sha.to_string(),
                message: message.to_string(),
                committed_at: DateTime::parse_from_rfc3339(date)
                    .ok()
                    .map(|dt| dt.with_timezone(&Utc)),
            })
        })
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Issue tracker
// ─────────────────────────────────────────────────────────────────────────────

/// Issue details used to seed knowledge queries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueInfo {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub labels: Vec<String>,
}

const STOP_WORDS: &[&str] = &[
    "about", "after", "also", "because", "been", "before", "being", "both", "could", "does",
    "each", "from", "have", "into", "just", "make", "more", "most", "need", "only", "other",
    "should", "some", "such", "than", "that", "their", "them", "then", "there", "these", "they",
    "this", "when", "where", "which", "while", "will", "with", "would", "your",
];

/// Upper bound on keywords derived from one issue.
const MAX_ISSUE_KEYWORDS: usize = 10;

impl IssueInfo {
    /// Labels, then distinctive title words (lowercased, deduplicated).
    pub fn keywords(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let labels = self.labels.iter().map(|l| l.to_lowercase());
        let words = self
            .title
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|w| w.chars().count() >= 4)
            .map(str::to_lowercase)
            .filter(|w| !STOP_WORDS.contains(&w.as_str()));

        labels
            .chain(words)
            .filter(|k| seen.insert(k.clone()))
            .take(MAX_ISSUE_KEYWORDS)
            .collect()
    }
}

#[async_trait]
pub trait IssueTracker: Send + Sync {
    async fn fetch_issue(&self, number: u64) -> Result<IssueInfo>;
}

/// [`IssueTracker`] backed by the GitHub `gh` executable.
#[derive(Debug, Clone)]
pub struct GhCli {
    repo_dir: PathBuf,
    timeout: Duration,
}

impl GhCli {
    pub fn new(repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Deserialize)]
struct GhIssue {
    title: String,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    labels: Vec<GhLabel>,
}

#[derive(Deserialize)]
struct GhLabel {
    name: String,
}

#[async_trait]
impl IssueTracker for GhCli {
    async fn fetch_issue(&self, number: u64) -> Result<IssueInfo> {
        let n = number.to_string();
        let output = run_command(
            "gh",
            &["issue", "view", &n, "--json", "title,body,labels"],
            &self.repo_dir,
            self.timeout,
        )
        .await?;
        parse_gh_issue(number, &output)
    }
}

fn parse_gh_issue(number: u64, json: &str) -> Result<IssueInfo> {
    let issue: GhIssue = serde_json::from_str(json).map_err(|e| HookError::Parse {
        command: "gh issue view".to_string(),
        message: e.to_string(),
    })?;
    Ok(IssueInfo {
        number,
        title: issue.title,
        body: issue.body.unwrap_or_default(),
        labels: issue.labels.into_iter().map(|l| l.name).collect(),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Subprocess
// ─────────────────────────────────────────────────────────────────────────────

async fn run_command(program: &str, args: &[&str], dir: &Path, timeout: Duration) -> Result<String> {
    let command = format!("{program} {}", args.first().copied().unwrap_or_default());
    let child = tokio::process::Command::new(program)
        .args(args)
        .current_dir(dir)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| HookError::Command {
            command: command.clone(),
            message: format!("failed to spawn: {e}"),
        })?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            return Err(HookError::Command {
                command,
                message: format!("process error: {e}"),
            });
        }
        Err(_) => {
            return Err(HookError::Command {
                command,
                message: format!("timed out after {}s", timeout.as_secs()),
            });
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        debug!(%command, stderr = %stderr.trim(), "command failed");
        return Err(HookError::Command {
            command,
            message: stderr.trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_porcelain() {
        let output = " M src/lib.rs\n?? new file.txt\nR  old.rs -> new.rs\nA  \"quoted.rs\"\n";
        assert_eq!(
            parse_porcelain(output),
            vec!["src/lib.rs", "new file.txt", "new.rs", "quoted.rs"]
        );
        assert!(parse_porcelain("").is_empty());
    }

    #[test]
    fn test_parse_log() {
        let output = format!(
            "abc{FIELD_SEP}2026-01-02T03:04:05+00:00{FIELD_SEP}fix(auth): handle expiry\n\nbody{RECORD_SEP}\n\
             def{FIELD_SEP}not-a-date{FIELD_SEP}feat: thing{RECORD_SEP}\n"
        );
        let commits = parse_log(&output);
        assert_eq!(commits.len(), 2);
        assert_eq!(commits[0].sha, "abc");
        assert_eq!(commits[0].subject(), "fix(auth): handle expiry");
        assert!(commits[0].committed_at.is_some());
        assert_eq!(commits[1].sha, "def");
        assert!(commits[1].committed_at.is_none());
    }

    #[test]
    fn test_parse_gh_issue() {
        let json = r#"{"title":"Retry flaky uploads","body":null,"labels":[{"name":"Storage"}]}"#;
        let issue = parse_gh_issue(7, json).unwrap();
        assert_eq!(issue.number, 7);
        assert_eq!(issue.body, "");
        assert_eq!(issue.labels, vec!["Storage"]);

        assert!(matches!(
            parse_gh_issue(7, "not json"),
            Err(HookError::Parse { .. })
        ));
    }

    #[test]
    fn test_issue_keywords() {
        let issue = IssueInfo {
            number: 1,
            title: "Validate input before writing to the cache".to_string(),
            body: String::new(),
            labels: vec!["Security".to_string(), "cache".to_string()],
        };
        assert_eq!(
            issue.keywords(),
            vec!["security", "cache", "validate", "input", "writing"]
        );
    }

    #[tokio::test]
    async fn test_missing_program_is_command_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = run_command(
            "sextant-definitely-not-a-real-binary",
            &["x"],
            dir.path(),
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, HookError::Command { .. }));
    }
}
