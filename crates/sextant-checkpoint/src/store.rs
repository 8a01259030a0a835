use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use sextant_types::{PathPin, format_ts};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::error::{CheckpointError, Result, is_foreign_key_violation};
use crate::types::{
    Action, ActionResult, Commit, NewWorkflow, Status, Workflow, WorkflowPhase,
};

mod embedded {
    use refinery::embed_migrations;
    embed_migrations!("migrations");
}

const PIN_NAMESPACE: &str = "checkpoint";

pub(crate) const WORKFLOW_COLUMNS: &str =
    "id, issue_number, branch, worktree, phase, status, retry_count, created_at, updated_at";

/// Thin repository over SQLite for workflow checkpoints.
///
/// Thread-safe via internal `Mutex<Connection>`. A file-backed store pins
/// its path: a second live handle on the same file fails with
/// [`CheckpointError::AlreadyOpen`].
pub struct CheckpointStore {
    pub(crate) conn: Mutex<Connection>,
    pin: Option<PathPin>,
}

impl std::fmt::Debug for CheckpointStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointStore")
            .field("path", &self.pin.as_ref().map(|p| p.path()))
            .finish_non_exhaustive()
    }
}

impl CheckpointStore {
    /// Open (or create) the database at `path` and run pending migrations.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|_| {
                CheckpointError::Database(rusqlite::Error::InvalidPath(path.to_path_buf()))
            })?;
        }

        let pin = PathPin::acquire(PIN_NAMESPACE, path)?;
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;

        let mut store = Self {
            conn: Mutex::new(conn),
            pin: Some(pin),
        };
        store.run_migrations()?;
        info!(path = %path.display(), "Checkpoint store opened");
        Ok(store)
    }

    /// Open an in-memory database (for testing). Never pinned.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        let mut store = Self {
            conn: Mutex::new(conn),
            pin: None,
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&mut self) -> Result<()> {
        let conn = self.conn.get_mut();
        let report = embedded::migrations::runner()
            .run(conn)
            .map_err(|e| CheckpointError::Migration(e.to_string()))?;
        for migration in report.applied_migrations() {
            debug!(version = migration.version(), name = migration.name(), "Applied migration");
        }
        Ok(())
    }

    /// Run `f` in a transaction, rolling back on error.
    ///
    /// A failed rollback is logged as critical; the original error is returned.
    pub(crate) fn with_transaction<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T>,
    ) -> Result<T> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        match f(&tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback() {
                    error!(
                        critical = true,
                        error = %rollback_err,
                        original = %e,
                        "Checkpoint transaction rollback failed"
                    );
                }
                Err(e)
            }
        }
    }

    // ── Workflow lifecycle ──────────────────────────────────────────

    /// Start tracking an issue: phase `research`, status `running`, no retries.
    pub fn create(&self, issue_number: u64, branch: &str, worktree: Option<&str>) -> Result<Workflow> {
        let conn = self.conn.lock();
        let new_wf = NewWorkflow {
            issue_number,
            branch: branch.to_string(),
            worktree: worktree.map(String::from),
        };
        insert_workflow_on(&conn, &new_wf)
    }

    /// Create several workflows atomically.
    pub fn create_batch(&self, workflows: &[NewWorkflow]) -> Result<Vec<Workflow>> {
        let created = self.with_transaction(|conn| {
            workflows.iter().map(|s| insert_workflow_on(conn, s)).collect::<Result<Vec<_>>>()
        })?;
        info!(count = created.len(), "Created workflow batch");
        Ok(created)
    }

    /// Overwrite every mutable column from `workflow`.
    ///
    /// Fails with `NotFound` if the row was deleted, so a stale local copy is
    /// never silently dropped.
    pub fn save(&self, workflow: &Workflow) -> Result<()> {
        let rows = self.conn.lock().execute(
            "UPDATE workflows
             SET issue_number = ?2, branch = ?3, worktree = ?4, phase = ?5, status = ?6,
                 retry_count = ?7, updated_at = ?8
             WHERE id = ?1",
            params![
                workflow.id,
                workflow.issue_number as i64,
                workflow.branch,
                workflow.worktree,
                workflow.phase.as_str(),
                workflow.status.as_str(),
                workflow.retry_count,
                sextant_types::now_ts(),
            ],
        )?;
        if rows == 0 {
            return Err(CheckpointError::NotFound(format!("Workflow {}", workflow.id)));
        }
        debug!(workflow_id = %workflow.id, "Saved workflow");
        Ok(())
    }

    pub fn load(&self, id: &str) -> Result<Option<Workflow>> {
        let sql = format!("SELECT {WORKFLOW_COLUMNS} FROM workflows WHERE id = ?1");
        Ok(self
            .conn
            .lock()
            .query_row(&sql, params![id], row_to_workflow)
            .optional()?)
    }

    /// The most recently updated workflow for an issue, whatever its status.
    pub fn find_by_issue(&self, issue_number: u64) -> Result<Option<Workflow>> {
        let sql = format!(
            "SELECT {WORKFLOW_COLUMNS} FROM workflows WHERE issue_number = ?1
             ORDER BY updated_at DESC, rowid DESC LIMIT 1"
        );
        Ok(self
            .conn
            .lock()
            .query_row(&sql, params![issue_number as i64], row_to_workflow)
            .optional()?)
    }

    pub fn set_phase(&self, id: &str, phase: WorkflowPhase) -> Result<()> {
        self.update_column(id, "phase", phase.as_str())
    }

    pub fn set_status(&self, id: &str, status: Status) -> Result<()> {
        self.update_column(id, "status", status.as_str())
    }

    fn update_column(&self, id: &str, column: &'static str, value: &str) -> Result<()> {
        let sql = format!("UPDATE workflows SET {column} = ?2, updated_at = ?3 WHERE id = ?1");
        let rows = self
            .conn
            .lock()
            .execute(&sql, params![id, value, sextant_types::now_ts()])?;
        if rows == 0 {
            return Err(CheckpointError::NotFound(format!("Workflow {id}")));
        }
        debug!(workflow_id = %id, column, value, "Updated workflow");
        Ok(())
    }

    /// Atomically bump the retry counter and return the new value.
    pub fn increment_retry(&self, id: &str) -> Result<u32> {
        let count: Option<u32> = self
            .conn
            .lock()
            .query_row(
                "UPDATE workflows SET retry_count = retry_count + 1, updated_at = ?2
                 WHERE id = ?1 RETURNING retry_count",
                params![id, sextant_types::now_ts()],
                |row| row.get(0),
            )
            .optional()?;
        count.ok_or_else(|| CheckpointError::NotFound(format!("Workflow {id}")))
    }

    /// Running and paused workflows, most recently updated first.
    pub fn list_active(&self) -> Result<Vec<Workflow>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {WORKFLOW_COLUMNS} FROM workflows WHERE status IN ('running', 'paused')
             ORDER BY updated_at DESC, rowid DESC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], row_to_workflow)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Delete a workflow with its actions and commits, and detach it from
    /// milestones. Deleting a missing id is not an error.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn
            .lock()
            .execute("DELETE FROM workflows WHERE id = ?1", params![id])?;
        if rows > 0 {
            debug!(workflow_id = %id, "Deleted workflow");
        }
        Ok(rows > 0)
    }

    // ── Action & commit logs ────────────────────────────────────────

    pub fn log_action(
        &self,
        workflow_id: &str,
        action: &str,
        result: ActionResult,
        metadata: Option<&serde_json::Value>,
    ) -> Result<i64> {
        let conn = self.conn.lock();
        log_action_on(&conn, workflow_id, action, result, metadata)
    }

    pub fn log_commit(&self, workflow_id: &str, sha: &str, message: &str) -> Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO commits (workflow_id, sha, message, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![workflow_id, sha, message, sextant_types::now_ts()],
        )
        .map_err(|e| missing_workflow(e, workflow_id))?;
        Ok(conn.last_insert_rowid())
    }

    /// Actions for a workflow, oldest first.
    pub fn get_actions(&self, workflow_id: &str) -> Result<Vec<Action>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, workflow_id, action, result, metadata, created_at
             FROM actions WHERE workflow_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![workflow_id], row_to_action)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Commits for a workflow, oldest first.
    pub fn get_commits(&self, workflow_id: &str) -> Result<Vec<Commit>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, workflow_id, sha, message, created_at
             FROM commits WHERE workflow_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![workflow_id], |row| {
            Ok(Commit {
                id: row.get(0)?,
                workflow_id: row.get(1)?,
                sha: row.get(2)?,
                message: row.get(3)?,
                created_at: parse_dt(&row.get::<_, String>(4)?),
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

// ── Connection-level helpers ────────────────────────────────────────

fn insert_workflow_on(conn: &Connection, new_wf: &NewWorkflow) -> Result<Workflow> {
    let id = Uuid::new_v4().to_string();
    let now = Utc::now();
    let now_str = format_ts(now);

    conn.execute(
        "INSERT INTO workflows (id, issue_number, branch, worktree, phase, status, retry_count, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, ?7)",
        params![
            id,
            new_wf.issue_number as i64,
            new_wf.branch,
            new_wf.worktree,
            WorkflowPhase::Research.as_str(),
            Status::Running.as_str(),
            now_str,
        ],
    )?;

    debug!(workflow_id = %id, issue = new_wf.issue_number, branch = %new_wf.branch, "Created workflow");
    Ok(Workflow {
        id,
        issue_number: new_wf.issue_number,
        branch: new_wf.branch.clone(),
        worktree: new_wf.worktree.clone(),
        phase: WorkflowPhase::Research,
        status: Status::Running,
        retry_count: 0,
        created_at: parse_dt(&now_str),
        updated_at: parse_dt(&now_str),
    })
}

pub(crate) fn log_action_on(
    conn: &Connection,
    workflow_id: &str,
    action: &str,
    result: ActionResult,
    metadata: Option<&serde_json::Value>,
) -> Result<i64> {
    let metadata_json = metadata.map(serde_json::to_string).transpose()?;
    conn.execute(
        "INSERT INTO actions (workflow_id, action, result, metadata, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            workflow_id,
            action,
            result.as_str(),
            metadata_json,
            sextant_types::now_ts()
        ],
    )
    .map_err(|e| missing_workflow(e, workflow_id))?;
    Ok(conn.last_insert_rowid())
}

/// Translate a foreign key failure on a workflow child row into `NotFound`.
fn missing_workflow(err: rusqlite::Error, workflow_id: &str) -> CheckpointError {
    if is_foreign_key_violation(&err) {
        CheckpointError::NotFound(format!("Workflow {workflow_id}"))
    } else {
        err.into()
    }
}

pub(crate) fn parse_dt(s: &str) -> DateTime<Utc> {
    sextant_types::parse_ts(s).unwrap_or_default()
}

/// Parse a text column into a string enum.
pub(crate) fn parse_col<T>(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = CheckpointError>,
{
    let s: String = row.get(idx)?;
    s.parse().map_err(|e: CheckpointError| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

pub(crate) fn row_to_workflow(row: &rusqlite::Row<'_>) -> rusqlite::Result<Workflow> {
    Ok(Workflow {
        id: row.get(0)?,
        issue_number: row.get::<_, i64>(1)? as u64,
        branch: row.get(2)?,
        worktree: row.get(3)?,
        phase: parse_col(row, 4)?,
        status: parse_col(row, 5)?,
        retry_count: row.get(6)?,
        created_at: parse_dt(&row.get::<_, String>(7)?),
        updated_at: parse_dt(&row.get::<_, String>(8)?),
    })
}

fn row_to_action(row: &rusqlite::Row<'_>) -> rusqlite::Result<Action> {
    let metadata: Option<String> = row.get(4)?;
    Ok(Action {
        id: row.get(0)?,
        workflow_id: row.get(1)?,
        action: row.get(2)?,
        result: parse_col(row, 3)?,
        metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()),
        created_at: parse_dt(&row.get::<_, String>(5)?),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::Duration;
    use serial_test::serial;

    pub(crate) fn test_store() -> CheckpointStore {
        CheckpointStore::open_in_memory().expect("failed to open in-memory store")
    }

    /// Pretend a workflow was last touched `hours` ago.
    pub(crate) fn backdate(store: &CheckpointStore, id: &str, hours: i64) {
        let ts = format_ts(Utc::now() - Duration::hours(hours));
        store
            .conn
            .lock()
            .execute(
                "UPDATE workflows SET updated_at = ?2 WHERE id = ?1",
                params![id, ts],
            )
            .unwrap();
    }

    #[test]
    fn test_migrations_run() {
        let _store = test_store();
    }

    #[test]
    fn test_create_defaults() {
        let store = test_store();
        let wf = store.create(123, "feat/x", Some("/tmp/wt")).unwrap();
        assert_eq!(wf.phase, WorkflowPhase::Research);
        assert_eq!(wf.status, Status::Running);
        assert_eq!(wf.retry_count, 0);

        let loaded = store.load(&wf.id).unwrap().unwrap();
        assert_eq!(loaded, wf);
    }

    #[test]
    fn test_completed_leaves_active_list_but_is_findable() {
        let store = test_store();
        let wf = store.create(123, "feat/x", None).unwrap();
        store.set_status(&wf.id, Status::Completed).unwrap();

        assert!(store.list_active().unwrap().iter().all(|w| w.id != wf.id));
        let found = store.find_by_issue(123).unwrap().unwrap();
        assert_eq!(found.id, wf.id);
        assert_eq!(found.status, Status::Completed);
    }

    #[test]
    fn test_find_by_issue_prefers_recent() {
        let store = test_store();
        let old = store.create(9, "a", None).unwrap();
        let new = store.create(9, "b", None).unwrap();
        backdate(&store, &old.id, 5);

        assert_eq!(store.find_by_issue(9).unwrap().unwrap().id, new.id);
        assert!(store.find_by_issue(10).unwrap().is_none());
    }

    #[test]
    fn test_save_full_row_and_not_found() {
        let store = test_store();
        let mut wf = store.create(1, "b", None).unwrap();
        wf.phase = WorkflowPhase::Review;
        wf.status = Status::Paused;
        wf.worktree = Some("/w".into());
        store.save(&wf).unwrap();

        let loaded = store.load(&wf.id).unwrap().unwrap();
        assert_eq!(loaded.phase, WorkflowPhase::Review);
        assert_eq!(loaded.status, Status::Paused);
        assert_eq!(loaded.worktree.as_deref(), Some("/w"));

        store.delete(&wf.id).unwrap();
        assert!(matches!(store.save(&wf), Err(CheckpointError::NotFound(_))));
    }

    #[test]
    fn test_setters_not_found() {
        let store = test_store();
        assert!(matches!(
            store.set_phase("nope", WorkflowPhase::Implement),
            Err(CheckpointError::NotFound(_))
        ));
        assert!(matches!(
            store.set_status("nope", Status::Failed),
            Err(CheckpointError::NotFound(_))
        ));
    }

    #[test]
    fn test_increment_retry_monotonic() {
        let store = test_store();
        let wf = store.create(1, "b", None).unwrap();
        let counts: Vec<u32> = (0..5).map(|_| store.increment_retry(&wf.id).unwrap()).collect();
        assert_eq!(counts, vec![1, 2, 3, 4, 5]);
        assert_eq!(store.load(&wf.id).unwrap().unwrap().retry_count, 5);

        for _ in 0..3 {
            assert!(matches!(
                store.increment_retry("missing"),
                Err(CheckpointError::NotFound(_))
            ));
        }
    }

    #[test]
    fn test_log_action_and_commit() {
        let store = test_store();
        let wf = store.create(1, "b", None).unwrap();
        store
            .log_action(&wf.id, "tests", ActionResult::Success, Some(&serde_json::json!({"n": 3})))
            .unwrap();
        store
            .log_action(&wf.id, "lint", ActionResult::Pending, None)
            .unwrap();
        store.log_commit(&wf.id, "abc123", "fix: thing").unwrap();

        let actions = store.get_actions(&wf.id).unwrap();
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0].action, "tests");
        assert_eq!(actions[0].metadata, Some(serde_json::json!({"n": 3})));
        assert_eq!(actions[1].result, ActionResult::Pending);

        let commits = store.get_commits(&wf.id).unwrap();
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].sha, "abc123");
    }

    #[test]
    fn test_log_on_missing_workflow_is_not_found() {
        let store = test_store();
        let err = store
            .log_action("ghost", "x", ActionResult::Success, None)
            .unwrap_err();
        assert!(matches!(err, CheckpointError::NotFound(ref m) if m.contains("ghost")));

        let err = store.log_commit("ghost", "sha", "msg").unwrap_err();
        assert!(matches!(err, CheckpointError::NotFound(ref m) if m.contains("ghost")));
    }

    #[test]
    fn test_delete_cascades_and_is_idempotent() {
        let store = test_store();
        let wf = store.create(1, "b", None).unwrap();
        store.log_action(&wf.id, "a", ActionResult::Success, None).unwrap();
        store.log_commit(&wf.id, "s", "m").unwrap();

        assert!(store.delete(&wf.id).unwrap());
        assert!(store.get_actions(&wf.id).unwrap().is_empty());
        assert!(store.get_commits(&wf.id).unwrap().is_empty());
        assert!(!store.delete(&wf.id).unwrap());
    }

    #[test]
    fn test_list_active_order() {
        let store = test_store();
        let a = store.create(1, "a", None).unwrap();
        let b = store.create(2, "b", None).unwrap();
        let c = store.create(3, "c", None).unwrap();
        backdate(&store, &b.id, 3);
        backdate(&store, &a.id, 2);
        store.set_status(&a.id, Status::Paused).unwrap();
        store.set_status(&c.id, Status::Failed).unwrap();

        let ids: Vec<String> = store.list_active().unwrap().into_iter().map(|w| w.id).collect();
        assert_eq!(ids, vec![a.id, b.id]);
    }

    #[test]
    fn test_create_batch_is_atomic() {
        let store = test_store();
        let created = store
            .create_batch(&[NewWorkflow::new(1, "a"), NewWorkflow::new(2, "b").with_worktree("/w")])
            .unwrap();
        assert_eq!(created.len(), 2);
        assert_eq!(store.list_active().unwrap().len(), 2);
    }

    #[test]
    #[serial]
    fn test_file_store_pins_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoints.db");
        let store = CheckpointStore::open(&path).unwrap();
        assert!(matches!(
            CheckpointStore::open(&path),
            Err(CheckpointError::AlreadyOpen(_))
        ));
        let wf = store.create(5, "x", None).unwrap();
        drop(store);

        let reopened = CheckpointStore::open(&path).unwrap();
        assert!(reopened.load(&wf.id).unwrap().is_some());
    }

    proptest::proptest! {
        #![proptest_config(proptest::prelude::ProptestConfig::with_cases(16))]

        #[test]
        fn prop_retry_count_matches_increments(n in 0u32..20, phase_idx in 0usize..4) {
            let store = test_store();
            let wf = store.create(1, "p", None).unwrap();
            store.set_phase(&wf.id, WorkflowPhase::ALL[phase_idx]).unwrap();
            let mut last = 0;
            for _ in 0..n {
                let next = store.increment_retry(&wf.id).unwrap();
                proptest::prop_assert_eq!(next, last + 1);
                last = next;
            }
            let loaded = store.load(&wf.id).unwrap().unwrap();
            proptest::prop_assert_eq!(loaded.retry_count, n);
            proptest::prop_assert_eq!(loaded.phase, WorkflowPhase::ALL[phase_idx]);
        }
    }
}
