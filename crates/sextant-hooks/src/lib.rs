//! Session lifecycle hooks for Sextant.
//!
//! Session start gathers branch, issue and file context, queries the
//! knowledge graph, and renders a token-budgeted summary for injection.
//! Session end extracts learnings from commits and transcripts, stores them,
//! and records checkpoint bookkeeping. The two halves communicate through a
//! [`handoff`] directory.

pub mod capabilities;
pub mod error;
pub mod extract;
pub mod handoff;
pub mod hooks;

pub use capabilities::{CommitInfo, GhCli, GitCli, IssueInfo, IssueTracker, VersionControl};
pub use error::{HookError, Result};
pub use extract::{extract_learnings, learning_id};
pub use handoff::{HandoffDir, SessionHandoff};
pub use hooks::{
    SessionEndResult, SessionEndSummary, SessionHooks, SessionHooksConfig, SessionStartContext,
    SessionStartResult, issue_from_branch, output_format,
};
