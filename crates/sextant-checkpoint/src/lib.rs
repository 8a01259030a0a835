//! Workflow checkpoint store.
//!
//! Persists the phase, status and history of long-running development
//! tasks so a new session can resume where a previous one stopped:
//!
//! - workflows with their action and commit logs ([`store`])
//! - milestones, baselines and wave-ordered workflow links ([`milestone`])
//! - per-session context metrics ([`metrics`])
//! - stale workflow cleanup ([`cleanup`])

pub mod cleanup;
pub mod error;
pub mod metrics;
pub mod milestone;
pub mod store;
pub mod types;

pub use cleanup::{DEFAULT_STALE_HOURS, STALE_CLEANUP_ACTION};
pub use error::{CheckpointError, Result};
pub use store::CheckpointStore;
pub use types::{
    Action, ActionResult, Baseline, BaselineSnapshot, Commit, ContextMetrics, MetricsSummary,
    Milestone, MilestonePhase, MilestoneWorkflow, NewContextMetrics, NewWorkflow, Status, Workflow,
    WorkflowPhase,
};
