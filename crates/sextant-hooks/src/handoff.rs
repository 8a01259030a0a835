//! File-based handoff between session-start and session-end.
//!
//! Session-start writes `session-<unix-millis>-<session-id>.json`. Session-end
//! takes the most recent non-stale file, preferring one for its own session,
//! and deletes it after reading. Every scan removes stale and unreadable
//! files. There is no locking: distinct session ids never share a filename.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;

const FILE_PREFIX: &str = "session-";
const FILE_SUFFIX: &str = ".json";

/// State carried from session start to session end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionHandoff {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub issue_number: Option<u64>,
    #[serde(default)]
    pub workflow_id: Option<String>,
    #[serde(default)]
    pub modified_files: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Learnings rendered into the session's context.
    #[serde(default)]
    pub learnings_injected: u32,
}

impl SessionHandoff {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            started_at: Utc::now(),
            branch: None,
            issue_number: None,
            workflow_id: None,
            modified_files: Vec::new(),
            keywords: Vec::new(),
            learnings_injected: 0,
        }
    }
}

/// A handoff file found during a scan.
#[derive(Debug)]
struct Candidate {
    path: PathBuf,
    written_at: DateTime<Utc>,
    session_id: String,
}

/// Directory of handoff files with a staleness window.
#[derive(Debug, Clone)]
pub struct HandoffDir {
    dir: PathBuf,
    ttl: Duration,
}

impl HandoffDir {
    pub fn new(dir: impl Into<PathBuf>, ttl_hours: u32) -> Self {
        Self {
            dir: dir.into(),
            ttl: Duration::hours(i64::from(ttl_hours)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Write a handoff file and return its path.
    pub fn write(&self, handoff: &SessionHandoff) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let name = format!(
            "{FILE_PREFIX}{}-{}{FILE_SUFFIX}",
            Utc::now().timestamp_millis(),
            sanitize_session_id(&handoff.session_id)
        );
        let path = self.dir.join(name);
        std::fs::write(&path, serde_json::to_vec_pretty(handoff)?)?;
        debug!(path = %path.display(), session_id = %handoff.session_id, "Wrote session handoff");
        Ok(path)
    }

    /// Remove the best matching handoff and return its contents.
    ///
    /// Prefers the newest file for `session_id`; otherwise the newest file
    /// overall. Unreadable candidates are removed and skipped.
    pub fn take(&self, session_id: Option<&str>) -> Result<Option<SessionHandoff>> {
        let mut candidates = self.scan()?;
        candidates.sort_by(|a, b| b.written_at.cmp(&a.written_at));

        if let Some(id) = session_id {
            let wanted = sanitize_session_id(id);
            // Stable partition: this session's files first, newest first within each group.
            candidates.sort_by_key(|c| c.session_id != wanted);
        }

        for candidate in candidates {
            match read_handoff(&candidate.path) {
                Ok(handoff) => {
                    remove_quietly(&candidate.path);
                    debug!(
                        path = %candidate.path.display(),
                        session_id = %handoff.session_id,
                        "Took session handoff"
                    );
                    return Ok(Some(handoff));
                }
                Err(e) => {
                    warn!(path = %candidate.path.display(), error = %e, "Removing unreadable handoff file");
                    remove_quietly(&candidate.path);
                }
            }
        }
        Ok(None)
    }

    /// Remove stale handoff files. Returns how many were removed.
    pub fn gc(&self) -> Result<usize> {
        let before = self.count_files()?;
        let remaining = self.scan()?.len();
        Ok(before.saturating_sub(remaining))
    }

    fn count_files(&self) -> Result<usize> {
        if !self.dir.exists() {
            return Ok(0);
        }
        Ok(std::fs::read_dir(&self.dir)?
            .filter_map(|e| e.ok())
            .filter(|e| parse_file_name(&e.file_name().to_string_lossy()).is_some())
            .count())
    }

    /// List fresh handoff files, deleting stale ones on the way.
    fn scan(&self) -> Result<Vec<Candidate>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let cutoff = Utc::now() - self.ttl;
        let mut fresh = Vec::new();

        for entry in std::fs::read_dir(&self.dir)? {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!(error = %e, "Failed to read handoff directory entry");
                    continue;
                }
            };
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some((written_at, session_id)) = parse_file_name(&name) else {
                continue;
            };
            let path = entry.path();
            if written_at < cutoff {
                debug!(path = %path.display(), "Removing stale handoff file");
                remove_quietly(&path);
                continue;
            }
            fresh.push(Candidate {
                path,
                written_at,
                session_id,
            });
        }
        Ok(fresh)
    }
}

fn read_handoff(path: &Path) -> Result<SessionHandoff> {
    let bytes = std::fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn remove_quietly(path: &Path) {
    if let Err(e) = std::fs::remove_file(path)
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!(path = %path.display(), error = %e, "Failed to remove handoff file");
    }
}

/// Keep filename-safe characters only.
fn sanitize_session_id(id: &str) -> String {
    let cleaned: String = id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "anonymous".to_string()
    } else {
        cleaned
    }
}

/// `session-<millis>-<id>.json` into its timestamp and session id.
fn parse_file_name(name: &str) -> Option<(DateTime<Utc>, String)> {
    let stem = name.strip_prefix(FILE_PREFIX)?.strip_suffix(FILE_SUFFIX)?;
    let (millis, id) = stem.split_once('-')?;
    let written_at = DateTime::from_timestamp_millis(millis.parse().ok()?)?;
    Some((written_at, id.to_string()))
}
