//! Ingestion run repository — lock acquisition + lifecycle (`spec.md` §3,
//! §4.1, §5).

use super::Store;
use crate::domain::{IngestionRun, RunStatus, RunType};
use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::params;
use uuid::Uuid;

/// Returned by [`Store::begin_run`]. `Rejected` means no row was inserted:
/// the caller must surface `RUN_ALREADY_ACTIVE` without creating a run.
pub enum BeginRunOutcome {
    Started(Uuid),
    Rejected,
}

impl Store {
    /// Atomically check-and-insert a new `started` run row for `account`.
    /// The `idx_run_single_active` partial unique index is the actual lock:
    /// a second concurrent insert fails with a constraint violation, which
    /// this method translates into `Rejected` rather than propagating.
    pub fn begin_run(
        &self,
        account: &str,
        run_type: RunType,
        period_key: &str,
        flex_query_id: &str,
    ) -> Result<BeginRunOutcome> {
        let conn = self.conn.lock().unwrap();
        let id = Uuid::new_v4();
        let now = Utc::now().to_rfc3339();
        let result = conn.execute(
            "INSERT INTO ingestion_run
                (id, account, run_type, status, period_key, flex_query_id,
                 local_report_date, started_at, ended_at, duration_ms,
                 error_code, error_message, diagnostics)
             VALUES (?1, ?2, ?3, 'started', ?4, ?5, NULL, ?6, NULL, NULL, NULL, NULL, '[]')",
            params![
                id.to_string(),
                account,
                run_type.as_str(),
                period_key,
                flex_query_id,
                now
            ],
        );

        match result {
            Ok(_) => Ok(BeginRunOutcome::Started(id)),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Ok(BeginRunOutcome::Rejected)
            }
            Err(e) => Err(e).context("failed to insert ingestion_run"),
        }
    }

    /// The statement's real period key is only known after download; the
    /// lock row is inserted with a placeholder beforehand (`spec.md` §4.1
    /// "Lock protocol" is account-scoped, not period-scoped, so this does
    /// not affect lock correctness).
    pub fn set_run_period_key(&self, run_id: Uuid, period_key: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE ingestion_run SET period_key = ?1 WHERE id = ?2",
            params![period_key, run_id.to_string()],
        )
        .context("failed to set ingestion_run period_key")?;
        Ok(())
    }

    pub fn finalize_run_success(
        &self,
        run_id: Uuid,
        local_report_date: chrono::NaiveDate,
        diagnostics: &serde_json::Value,
    ) -> Result<()> {
        self.finalize_run(
            run_id,
            RunStatus::Success,
            Some(local_report_date),
            None,
            None,
            diagnostics,
        )
    }

    pub fn finalize_run_failed(
        &self,
        run_id: Uuid,
        error_code: &str,
        error_message: &str,
        diagnostics: &serde_json::Value,
    ) -> Result<()> {
        self.finalize_run(
            run_id,
            RunStatus::Failed,
            None,
            Some(error_code),
            Some(error_message),
            diagnostics,
        )
    }

    fn finalize_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        local_report_date: Option<chrono::NaiveDate>,
        error_code: Option<&str>,
        error_message: Option<&str>,
        diagnostics: &serde_json::Value,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now();
        let started_at: String = conn.query_row(
            "SELECT started_at FROM ingestion_run WHERE id = ?1",
            params![run_id.to_string()],
            |row| row.get(0),
        )?;
        let started_at = super::parse_timestamp(&started_at)?;
        let duration_ms = (now - started_at).num_milliseconds();

        conn.execute(
            "UPDATE ingestion_run
             SET status = ?1, local_report_date = ?2, ended_at = ?3,
                 duration_ms = ?4, error_code = ?5, error_message = ?6,
                 diagnostics = ?7
             WHERE id = ?8",
            params![
                status.as_str(),
                local_report_date.map(|d| d.format("%Y-%m-%d").to_string()),
                now.to_rfc3339(),
                duration_ms,
                error_code,
                error_message,
                diagnostics.to_string(),
                run_id.to_string(),
            ],
        )
        .context("failed to finalize ingestion_run")?;
        Ok(())
    }

    pub fn get_run(&self, run_id: Uuid) -> Result<IngestionRun> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, account, run_type, status, period_key, flex_query_id,
                    local_report_date, started_at, ended_at, duration_ms,
                    error_code, error_message, diagnostics
             FROM ingestion_run WHERE id = ?1",
            params![run_id.to_string()],
            row_to_run,
        )
        .context("failed to load ingestion_run")
    }

    /// All raw-record-bearing runs for a period/query, most recent first —
    /// used by the reprocess orchestrator (C10) to scope its raw-record
    /// read without re-running the transport/poll stages.
    pub fn list_runs_for_period(
        &self,
        account: &str,
        period_key: Option<&str>,
        flex_query_id: Option<&str>,
    ) -> Result<Vec<IngestionRun>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, account, run_type, status, period_key, flex_query_id,
                    local_report_date, started_at, ended_at, duration_ms,
                    error_code, error_message, diagnostics
             FROM ingestion_run
             WHERE account = ?1
               AND (?2 IS NULL OR period_key = ?2)
               AND (?3 IS NULL OR flex_query_id = ?3)
             ORDER BY started_at DESC",
        )?;
        let rows = stmt
            .query_map(params![account, period_key, flex_query_id], row_to_run)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

fn row_to_run(row: &rusqlite::Row) -> rusqlite::Result<IngestionRun> {
    let id: String = row.get(0)?;
    let run_type: String = row.get(2)?;
    let status: String = row.get(3)?;
    let local_report_date: Option<String> = row.get(6)?;
    let started_at: String = row.get(7)?;
    let ended_at: Option<String> = row.get(8)?;
    let diagnostics: String = row.get(12)?;

    Ok(IngestionRun {
        id: super::parse_uuid(&id).unwrap(),
        account: row.get(1)?,
        run_type: run_type.parse().unwrap(),
        status: status.parse().unwrap(),
        period_key: row.get(4)?,
        flex_query_id: row.get(5)?,
        local_report_date: local_report_date.map(|d| super::parse_date(&d).unwrap()),
        started_at: super::parse_timestamp(&started_at).unwrap(),
        ended_at: ended_at.map(|e| super::parse_timestamp(&e).unwrap()),
        duration_ms: row.get(9)?,
        error_code: row.get(10)?,
        error_message: row.get(11)?,
        diagnostics: serde_json::from_str(&diagnostics).unwrap_or(serde_json::Value::Null),
    })
}
