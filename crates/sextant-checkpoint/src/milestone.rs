//! Milestones: groups of workflows executed in waves, with a quality
//! baseline captured before work starts.

use chrono::Utc;
use rusqlite::{OptionalExtension, params};
use sextant_types::format_ts;
use tracing::debug;
use uuid::Uuid;

use crate::error::{CheckpointError, Result, is_foreign_key_violation};
use crate::store::{CheckpointStore, parse_col, parse_dt, row_to_workflow};
use crate::types::{Baseline, BaselineSnapshot, Milestone, MilestonePhase, MilestoneWorkflow, Status};

const MILESTONE_COLUMNS: &str =
    "id, name, github_milestone_number, phase, status, created_at, updated_at";

fn row_to_milestone(row: &rusqlite::Row<'_>) -> rusqlite::Result<Milestone> {
    Ok(Milestone {
        id: row.get(0)?,
        name: row.get(1)?,
        github_milestone_number: row.get::<_, Option<i64>>(2)?.map(|n| n as u64),
        phase: parse_col(row, 3)?,
        status: parse_col(row, 4)?,
        created_at: parse_dt(&row.get::<_, String>(5)?),
        updated_at: parse_dt(&row.get::<_, String>(6)?),
    })
}

impl CheckpointStore {
    /// Start a milestone in the `planning` phase.
    pub fn create_milestone(
        &self,
        name: &str,
        github_milestone_number: Option<u64>,
    ) -> Result<Milestone> {
        let id = Uuid::new_v4().to_string();
        let now = format_ts(Utc::now());
        self.conn.lock().execute(
            "INSERT INTO milestones (id, name, github_milestone_number, phase, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                id,
                name,
                github_milestone_number.map(|n| n as i64),
                MilestonePhase::Planning.as_str(),
                Status::Running.as_str(),
                now,
            ],
        )?;
        debug!(milestone_id = %id, name, "Created milestone");

        Ok(Milestone {
            id,
            name: name.to_string(),
            github_milestone_number,
            phase: MilestonePhase::Planning,
            status: Status::Running,
            created_at: parse_dt(&now),
            updated_at: parse_dt(&now),
        })
    }

    pub fn load_milestone(&self, id: &str) -> Result<Option<Milestone>> {
        let sql = format!("SELECT {MILESTONE_COLUMNS} FROM milestones WHERE id = ?1");
        Ok(self
            .conn
            .lock()
            .query_row(&sql, params![id], row_to_milestone)
            .optional()?)
    }

    /// Full-row update. `NotFound` if the milestone no longer exists.
    pub fn save_milestone(&self, milestone: &Milestone) -> Result<()> {
        let rows = self.conn.lock().execute(
            "UPDATE milestones
             SET name = ?2, github_milestone_number = ?3, phase = ?4, status = ?5, updated_at = ?6
             WHERE id = ?1",
            params![
                milestone.id,
                milestone.name,
                milestone.github_milestone_number.map(|n| n as i64),
                milestone.phase.as_str(),
                milestone.status.as_str(),
                sextant_types::now_ts(),
            ],
        )?;
        if rows == 0 {
            return Err(CheckpointError::NotFound(format!("Milestone {}", milestone.id)));
        }
        Ok(())
    }

    pub fn set_milestone_phase(&self, id: &str, phase: MilestonePhase) -> Result<()> {
        self.update_milestone_column(id, "phase", phase.as_str())
    }

    pub fn set_milestone_status(&self, id: &str, status: Status) -> Result<()> {
        self.update_milestone_column(id, "status", status.as_str())
    }

    fn update_milestone_column(&self, id: &str, column: &'static str, value: &str) -> Result<()> {
        let sql = format!("UPDATE milestones SET {column} = ?2, updated_at = ?3 WHERE id = ?1");
        let rows = self
            .conn
            .lock()
            .execute(&sql, params![id, value, sextant_types::now_ts()])?;
        if rows == 0 {
            return Err(CheckpointError::NotFound(format!("Milestone {id}")));
        }
        Ok(())
    }

    /// Running and paused milestones, most recently updated first.
    pub fn list_active_milestones(&self) -> Result<Vec<Milestone>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {MILESTONE_COLUMNS} FROM milestones WHERE status IN ('running', 'paused')
             ORDER BY updated_at DESC, rowid DESC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], row_to_milestone)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Delete a milestone, its baseline and its workflow links. The linked
    /// workflows themselves are kept.
    pub fn delete_milestone(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn
            .lock()
            .execute("DELETE FROM milestones WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    // ── Baselines ───────────────────────────────────────────────────

    /// Store the milestone's baseline, replacing any previous capture.
    pub fn save_baseline(&self, milestone_id: &str, snapshot: BaselineSnapshot) -> Result<Baseline> {
        let captured_at = format_ts(Utc::now());
        let conn = self.conn.lock();
        let id: i64 = conn
            .query_row(
                "INSERT INTO baselines
                     (milestone_id, captured_at, lint_exit_code, lint_warnings, lint_errors,
                      typecheck_exit_code, typecheck_errors)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(milestone_id) DO UPDATE SET
                     captured_at = excluded.captured_at,
                     lint_exit_code = excluded.lint_exit_code,
                     lint_warnings = excluded.lint_warnings,
                     lint_errors = excluded.lint_errors,
                     typecheck_exit_code = excluded.typecheck_exit_code,
                     typecheck_errors = excluded.typecheck_errors
                 RETURNING id",
                params![
                    milestone_id,
                    captured_at,
                    snapshot.lint_exit_code,
                    snapshot.lint_warnings,
                    snapshot.lint_errors,
                    snapshot.typecheck_exit_code,
                    snapshot.typecheck_errors,
                ],
                |row| row.get(0),
            )
            .map_err(|e| {
                if is_foreign_key_violation(&e) {
                    CheckpointError::NotFound(format!("Milestone {milestone_id}"))
                } else {
                    e.into()
                }
            })?;

        debug!(milestone_id, "Saved baseline");
        Ok(Baseline {
            id,
            milestone_id: milestone_id.to_string(),
            captured_at: parse_dt(&captured_at),
            snapshot,
        })
    }

    pub fn get_baseline(&self, milestone_id: &str) -> Result<Option<Baseline>> {
        Ok(self
            .conn
            .lock()
            .query_row(
                "SELECT id, milestone_id, captured_at, lint_exit_code, lint_warnings, lint_errors,
                        typecheck_exit_code, typecheck_errors
                 FROM baselines WHERE milestone_id = ?1",
                params![milestone_id],
                |row| {
                    Ok(Baseline {
                        id: row.get(0)?,
                        milestone_id: row.get(1)?,
                        captured_at: parse_dt(&row.get::<_, String>(2)?),
                        snapshot: BaselineSnapshot {
                            lint_exit_code: row.get(3)?,
                            lint_warnings: row.get(4)?,
                            lint_errors: row.get(5)?,
                            typecheck_exit_code: row.get(6)?,
                            typecheck_errors: row.get(7)?,
                        },
                    })
                },
            )
            .optional()?)
    }

    // ── Workflow links ──────────────────────────────────────────────

    /// Attach a workflow to a milestone. Re-linking updates the wave.
    pub fn link_workflow(
        &self,
        milestone_id: &str,
        workflow_id: &str,
        wave_number: Option<u32>,
    ) -> Result<()> {
        let conn = self.conn.lock();
        let result = conn.execute(
            "INSERT INTO milestone_workflows (milestone_id, workflow_id, wave_number)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(milestone_id, workflow_id) DO UPDATE SET wave_number = excluded.wave_number",
            params![milestone_id, workflow_id, wave_number],
        );

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_foreign_key_violation(&e) => {
                let milestone_exists: bool = conn.query_row(
                    "SELECT EXISTS(SELECT 1 FROM milestones WHERE id = ?1)",
                    params![milestone_id],
                    |row| row.get(0),
                )?;
                Err(CheckpointError::NotFound(if milestone_exists {
                    format!("Workflow {workflow_id}")
                } else {
                    format!("Milestone {milestone_id}")
                }))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn unlink_workflow(&self, milestone_id: &str, workflow_id: &str) -> Result<bool> {
        let rows = self.conn.lock().execute(
            "DELETE FROM milestone_workflows WHERE milestone_id = ?1 AND workflow_id = ?2",
            params![milestone_id, workflow_id],
        )?;
        Ok(rows > 0)
    }

    /// Linked workflows ordered by wave, unassigned waves last.
    pub fn milestone_workflows(&self, milestone_id: &str) -> Result<Vec<MilestoneWorkflow>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT w.id, w.issue_number, w.branch, w.worktree, w.phase, w.status,
                    w.retry_count, w.created_at, w.updated_at, mw.wave_number
             FROM milestone_workflows mw
             JOIN workflows w ON w.id = mw.workflow_id
             WHERE mw.milestone_id = ?1
             ORDER BY mw.wave_number IS NULL, mw.wave_number, w.created_at, w.rowid",
        )?;
        let rows = stmt.query_map(params![milestone_id], |row| {
            Ok(MilestoneWorkflow {
                workflow: row_to_workflow(row)?,
                wave_number: row.get(9)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}
