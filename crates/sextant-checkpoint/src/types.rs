//! Checkpoint records.
//!
//! Workflow phases and milestone phases are distinct enums: a workflow moves
//! through issue work (research to finalize) while a milestone moves through
//! release work (planning to cleanup). Both share [`Status`].

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CheckpointError;

/// Generate `as_str`, `Display` and `FromStr` for a lowercase string enum.
macro_rules! string_enum {
    ($name:ident, $label:literal { $($variant:ident => $s:literal),+ $(,)? }) => {
        impl $name {
            pub const ALL: &'static [$name] = &[$(Self::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.pad(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = CheckpointError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant),)+
                    other => Err(CheckpointError::InvalidData(format!(
                        concat!("Unknown ", $label, ": {}"),
                        other
                    ))),
                }
            }
        }
    };
}

/// Phase of issue work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowPhase {
    Research,
    Implement,
    Review,
    Finalize,
}

string_enum!(WorkflowPhase, "workflow phase" {
    Research => "research",
    Implement => "implement",
    Review => "review",
    Finalize => "finalize",
});

/// Phase of milestone work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MilestonePhase {
    Planning,
    Execute,
    Review,
    Merge,
    Cleanup,
}

string_enum!(MilestonePhase, "milestone phase" {
    Planning => "planning",
    Execute => "execute",
    Review => "review",
    Merge => "merge",
    Cleanup => "cleanup",
});

/// Lifecycle status shared by workflows and milestones.
///
/// Transitions are caller-driven; `Failed` is terminal by convention only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Running,
    Paused,
    Completed,
    Failed,
}

string_enum!(Status, "status" {
    Running => "running",
    Paused => "paused",
    Completed => "completed",
    Failed => "failed",
});

impl Status {
    /// Running or paused.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }
}

/// Outcome recorded on an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionResult {
    Success,
    Failed,
    Pending,
}

string_enum!(ActionResult, "action result" {
    Success => "success",
    Failed => "failed",
    Pending => "pending",
});

/// Persisted state of one development task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub issue_number: u64,
    pub branch: String,
    pub worktree: Option<String>,
    pub phase: WorkflowPhase,
    pub status: Status,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Arguments for creating a workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewWorkflow {
    pub issue_number: u64,
    pub branch: String,
    pub worktree: Option<String>,
}

impl NewWorkflow {
    pub fn new(issue_number: u64, branch: impl Into<String>) -> Self {
        Self {
            issue_number,
            branch: branch.into(),
            worktree: None,
        }
    }

    pub fn with_worktree(mut self, worktree: impl Into<String>) -> Self {
        self.worktree = Some(worktree.into());
        self
    }
}

/// Append-only log entry for a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub id: i64,
    pub workflow_id: String,
    pub action: String,
    pub result: ActionResult,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// A commit made while a workflow ran.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    pub id: i64,
    pub workflow_id: String,
    pub sha: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// A group of workflows tracked together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Milestone {
    pub id: String,
    pub name: String,
    pub github_milestone_number: Option<u64>,
    pub phase: MilestonePhase,
    pub status: Status,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Lint and typecheck results at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaselineSnapshot {
    pub lint_exit_code: i32,
    pub lint_warnings: u32,
    pub lint_errors: u32,
    pub typecheck_exit_code: i32,
    pub typecheck_errors: u32,
}

/// A milestone's stored quality baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub id: i64,
    pub milestone_id: String,
    pub captured_at: DateTime<Utc>,
    #[serde(flatten)]
    pub snapshot: BaselineSnapshot,
}

/// A workflow linked to a milestone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MilestoneWorkflow {
    pub workflow: Workflow,
    pub wave_number: Option<u32>,
}

/// Per-session context usage, recorded once at session end.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewContextMetrics {
    pub session_id: String,
    pub issue_number: Option<u64>,
    pub files_read: u32,
    pub compacted: bool,
    pub duration_minutes: u32,
    pub review_findings: u32,
    pub learnings_injected: u32,
    pub learnings_captured: u32,
}

/// A stored metrics row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextMetrics {
    pub id: i64,
    #[serde(flatten)]
    pub metrics: NewContextMetrics,
    pub created_at: DateTime<Utc>,
}

/// Totals and averages over all recorded sessions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub sessions: u64,
    pub compacted_sessions: u64,
    pub total_files_read: u64,
    pub total_duration_minutes: u64,
    pub total_review_findings: u64,
    pub total_learnings_injected: u64,
    pub total_learnings_captured: u64,
    pub avg_files_read: f64,
    pub avg_duration_minutes: f64,
}
