//! Per-session context metrics.

use rusqlite::{OptionalExtension, params};
use tracing::debug;

use crate::error::{CheckpointError, Result, is_unique_violation};
use crate::store::{CheckpointStore, parse_dt};
use crate::types::{ContextMetrics, MetricsSummary, NewContextMetrics};

const METRICS_COLUMNS: &str = "id, session_id, issue_number, files_read, compacted, duration_minutes, \
     review_findings, learnings_injected, learnings_captured, created_at";

fn row_to_metrics(row: &rusqlite::Row<'_>) -> rusqlite::Result<ContextMetrics> {
    Ok(ContextMetrics {
        id: row.get(0)?,
        metrics: NewContextMetrics {
            session_id: row.get(1)?,
            issue_number: row.get::<_, Option<i64>>(2)?.map(|n| n as u64),
            files_read: row.get(3)?,
            compacted: row.get(4)?,
            duration_minutes: row.get(5)?,
            review_findings: row.get(6)?,
            learnings_injected: row.get(7)?,
            learnings_captured: row.get(8)?,
        },
        created_at: parse_dt(&row.get::<_, String>(9)?),
    })
}

impl CheckpointStore {
    /// Record metrics for a session. Each session records at most once.
    pub fn record_metrics(&self, metrics: &NewContextMetrics) -> Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO context_metrics
                 (session_id, issue_number, files_read, compacted, duration_minutes,
                  review_findings, learnings_injected, learnings_captured, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                metrics.session_id,
                metrics.issue_number.map(|n| n as i64),
                metrics.files_read,
                metrics.compacted,
                metrics.duration_minutes,
                metrics.review_findings,
                metrics.learnings_injected,
                metrics.learnings_captured,
                sextant_types::now_ts(),
            ],
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                CheckpointError::InvalidData(format!(
                    "Metrics already recorded for session {}",
                    metrics.session_id
                ))
            } else {
                e.into()
            }
        })?;
        debug!(session_id = %metrics.session_id, "Recorded context metrics");
        Ok(conn.last_insert_rowid())
    }

    pub fn metrics_for_session(&self, session_id: &str) -> Result<Option<ContextMetrics>> {
        let sql = format!("SELECT {METRICS_COLUMNS} FROM context_metrics WHERE session_id = ?1");
        Ok(self
            .conn
            .lock()
            .query_row(&sql, params![session_id], row_to_metrics)
            .optional()?)
    }

    /// Most recent sessions first.
    pub fn recent_metrics(&self, limit: usize) -> Result<Vec<ContextMetrics>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {METRICS_COLUMNS} FROM context_metrics ORDER BY created_at DESC, id DESC LIMIT ?1"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![limit as i64], row_to_metrics)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn metrics_summary(&self) -> Result<MetricsSummary> {
        let conn = self.conn.lock();
        let summary = conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(compacted), 0),
                    COALESCE(SUM(files_read), 0),
                    COALESCE(SUM(duration_minutes), 0),
                    COALESCE(SUM(review_findings), 0),
                    COALESCE(SUM(learnings_injected), 0),
                    COALESCE(SUM(learnings_captured), 0)
             FROM context_metrics",
            [],
            |row| {
                Ok(MetricsSummary {
                    sessions: row.get::<_, i64>(0)? as u64,
                    compacted_sessions: row.get::<_, i64>(1)? as u64,
                    total_files_read: row.get::<_, i64>(2)? as u64,
                    total_duration_minutes: row.get::<_, i64>(3)? as u64,
                    total_review_findings: row.get::<_, i64>(4)? as u64,
                    total_learnings_injected: row.get::<_, i64>(5)? as u64,
                    total_learnings_captured: row.get::<_, i64>(6)? as u64,
                    ..Default::default()
                })
            },
        )?;

        Ok(if summary.sessions == 0 {
            summary
        } else {
            let n = summary.sessions as f64;
            MetricsSummary {
                avg_files_read: summary.total_files_read as f64 / n,
                avg_duration_minutes: summary.total_duration_minutes as f64 / n,
                ..summary
            }
        })
    }
}
