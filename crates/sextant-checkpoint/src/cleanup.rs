//! Stale workflow detection.
//!
//! A crashed session leaves its workflow `running` forever. Cleanup marks
//! running workflows that have not been touched within a threshold as
//! `failed` and records why.

use chrono::{TimeDelta, Utc};
use rusqlite::params;
use sextant_types::format_ts;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::store::{CheckpointStore, WORKFLOW_COLUMNS, log_action_on, row_to_workflow};
use crate::types::{ActionResult, Status, Workflow};

/// Default age after which a running workflow counts as stale.
pub const DEFAULT_STALE_HOURS: u64 = 24;

/// Action name recorded on each cleaned-up workflow.
pub const STALE_CLEANUP_ACTION: &str = "stale_cleanup";

impl CheckpointStore {
    /// Running workflows last updated more than `threshold_hours` ago.
    ///
    /// A threshold reaching back before the representable time range selects
    /// nothing.
    pub fn stale_workflows(&self, threshold_hours: u64) -> Result<Vec<Workflow>> {
        let Some(cutoff) = stale_cutoff(threshold_hours) else {
            return Ok(Vec::new());
        };
        let cutoff = format_ts(cutoff);
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {WORKFLOW_COLUMNS} FROM workflows
             WHERE status = 'running' AND updated_at < ?1
             ORDER BY updated_at"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![cutoff], row_to_workflow)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Mark stale running workflows as failed. Returns how many were marked.
    ///
    /// Each workflow is handled in its own transaction; one failure is logged
    /// and does not stop the rest.
    pub fn cleanup_stale_workflows(&self, threshold_hours: u64) -> Result<usize> {
        let stale = self.stale_workflows(threshold_hours)?;
        let mut cleaned = 0;

        for workflow in &stale {
            match self.mark_stale(workflow, threshold_hours) {
                Ok(true) => cleaned += 1,
                Ok(false) => debug!(
                    workflow_id = %workflow.id,
                    "Workflow left running before cleanup, skipped"
                ),
                Err(e) => warn!(
                    workflow_id = %workflow.id,
                    error = %e,
                    "Failed to clean up stale workflow"
                ),
            }
        }

        if cleaned > 0 {
            info!(cleaned, threshold_hours, "Marked stale workflows as failed");
        }
        Ok(cleaned)
    }

    /// Fail one workflow found stale. `false` when it is no longer running.
    fn mark_stale(&self, workflow: &Workflow, threshold_hours: u64) -> Result<bool> {
        self.with_transaction(|conn| {
            let rows = conn.execute(
                "UPDATE workflows SET status = ?2, updated_at = ?3
                 WHERE id = ?1 AND status = 'running'",
                params![workflow.id, Status::Failed.as_str(), sextant_types::now_ts()],
            )?;
            if rows != 1 {
                return Ok(false);
            }
            let metadata = serde_json::json!({
                "reason": "stale",
                "threshold_hours": threshold_hours,
                "last_updated": format_ts(workflow.updated_at),
            });
            log_action_on(
                conn,
                &workflow.id,
                STALE_CLEANUP_ACTION,
                ActionResult::Failed,
                Some(&metadata),
            )?;
            Ok(true)
        })
    }
}

fn stale_cutoff(threshold_hours: u64) -> Option<chrono::DateTime<Utc>> {
    let hours = i64::try_from(threshold_hours).ok()?;
    Utc::now().checked_sub_signed(TimeDelta::try_hours(hours)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::{backdate, test_store};

    #[test]
    fn test_cleanup_marks_only_old_running() {
        let store = test_store();
        let old = store.create(1, "old", None).unwrap();
        let fresh = store.create(2, "fresh", None).unwrap();
        let paused = store.create(3, "paused", None).unwrap();
        store.set_status(&paused.id, Status::Paused).unwrap();
        backdate(&store, &old.id, 25);
        backdate(&store, &fresh.id, 1);
        backdate(&store, &paused.id, 48);

        assert_eq!(store.cleanup_stale_workflows(24).unwrap(), 1);

        assert_eq!(store.load(&old.id).unwrap().unwrap().status, Status::Failed);
        assert_eq!(store.load(&fresh.id).unwrap().unwrap().status, Status::Running);
        assert_eq!(store.load(&paused.id).unwrap().unwrap().status, Status::Paused);

        let actions = store.get_actions(&old.id).unwrap();
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].action, STALE_CLEANUP_ACTION);
        assert_eq!(actions[0].result, ActionResult::Failed);
        let meta = actions[0].metadata.as_ref().unwrap();
        assert_eq!(meta["reason"], "stale");
        assert_eq!(meta["threshold_hours"], 24);
    }

    #[test]
    fn test_cleanup_is_idempotent() {
        let store = test_store();
        let wf = store.create(1, "b", None).unwrap();
        backdate(&store, &wf.id, 30);

        assert_eq!(store.cleanup_stale_workflows(24).unwrap(), 1);
        assert_eq!(store.cleanup_stale_workflows(24).unwrap(), 0);
        assert_eq!(store.get_actions(&wf.id).unwrap().len(), 1);
    }

    #[test]
    fn test_threshold_respected() {
        let store = test_store();
        let wf = store.create(1, "b", None).unwrap();
        backdate(&store, &wf.id, 3);

        assert_eq!(store.cleanup_stale_workflows(4).unwrap(), 0);
        assert_eq!(store.cleanup_stale_workflows(2).unwrap(), 1);
    }

    #[test]
    fn test_huge_threshold_marks_nothing() {
        let store = test_store();
        let fresh = store.create(1, "feat/fresh", None).unwrap();
        let old = store.create(2, "feat/old", None).unwrap();
        backdate(&store, &old.id, 24 * 365);

        assert_eq!(store.cleanup_stale_workflows(u64::MAX).unwrap(), 0);
        assert_eq!(store.cleanup_stale_workflows(10_000_000_000).unwrap(), 0);
        assert!(store.stale_workflows(u64::MAX).unwrap().is_empty());
        assert_eq!(store.load(&fresh.id).unwrap().unwrap().status, Status::Running);
        assert_eq!(store.load(&old.id).unwrap().unwrap().status, Status::Running);
    }

    #[test]
    fn test_workflow_paused_after_scan_is_skipped() {
        let store = test_store();
        let wf = store.create(1, "b", None).unwrap();
        backdate(&store, &wf.id, 30);
        let stale = store.stale_workflows(24).unwrap();
        assert_eq!(stale.len(), 1);

        store.set_status(&wf.id, Status::Paused).unwrap();

        assert!(!store.mark_stale(&stale[0], 24).unwrap());
        assert_eq!(store.load(&wf.id).unwrap().unwrap().status, Status::Paused);
        assert!(store.get_actions(&wf.id).unwrap().is_empty());
    }
}
