//! Raw record repository — section-row extraction target (`spec.md` §4.4 #2).

use super::Store;
use crate::domain::RawRecord;
use anyhow::{Context, Result};
use rusqlite::params;
use uuid::Uuid;

/// One row to insert, pre-built by raw persistence (C5).
pub struct NewRawRecord<'a> {
    pub account: &'a str,
    pub local_report_date: Option<chrono::NaiveDate>,
    pub section_name: &'a str,
    pub source_row_ref: &'a str,
    pub source_payload: &'a serde_json::Value,
}

pub struct RawRecordInsertSummary {
    pub inserted: Vec<Uuid>,
    pub deduplicated: usize,
}

impl Store {
    /// Insert every row; conflicts on (artifact, section, source_row_ref)
    /// are ignored (`spec.md` §4.4: "do-nothing"). Returns the ids that
    /// were actually inserted, in input order, so the canonical mapper can
    /// scope itself to rows belonging to the current run.
    pub fn insert_raw_records(
        &self,
        run_id: Uuid,
        artifact_id: Uuid,
        rows: &[NewRawRecord<'_>],
    ) -> Result<RawRecordInsertSummary> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().context("begin raw_record tx")?;
        let mut inserted = Vec::with_capacity(rows.len());
        let mut deduplicated = 0usize;

        for row in rows {
            let id = Uuid::new_v4();
            let changed = tx
                .execute(
                    "INSERT OR IGNORE INTO raw_record
                        (id, run_id, artifact_id, account, local_report_date,
                         section_name, source_row_ref, source_payload)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        id.to_string(),
                        run_id.to_string(),
                        artifact_id.to_string(),
                        row.account,
                        row.local_report_date.map(|d| d.format("%Y-%m-%d").to_string()),
                        row.section_name,
                        row.source_row_ref,
                        row.source_payload.to_string(),
                    ],
                )
                .context("failed to insert raw_record")?;

            if changed == 1 {
                inserted.push(id);
            } else {
                deduplicated += 1;
            }
        }

        tx.commit().context("commit raw_record tx")?;
        Ok(RawRecordInsertSummary {
            inserted,
            deduplicated,
        })
    }

    /// Raw records belonging to a specific run (used by canonical mapping,
    /// scoped to "only raw rows belonging to the current run", `spec.md`
    /// §4.5).
    pub fn raw_records_for_run(&self, run_id: Uuid) -> Result<Vec<RawRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, run_id, artifact_id, account, local_report_date,
                    section_name, source_row_ref, source_payload
             FROM raw_record WHERE run_id = ?1",
        )?;
        let rows = stmt
            .query_map(params![run_id.to_string()], row_to_raw_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Every raw record belonging to any run over a period/query scope —
    /// used by the reprocess orchestrator (C10), which has no single
    /// originating run to scope against.
    pub fn raw_records_for_period(
        &self,
        account: &str,
        period_key: Option<&str>,
        flex_query_id: Option<&str>,
    ) -> Result<Vec<RawRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT r.id, r.run_id, r.artifact_id, r.account, r.local_report_date,
                    r.section_name, r.source_row_ref, r.source_payload
             FROM raw_record r
             JOIN raw_artifact a ON a.id = r.artifact_id
             WHERE r.account = ?1
               AND (?2 IS NULL OR a.period_key = ?2)
               AND (?3 IS NULL OR a.flex_query_id = ?3)",
        )?;
        let rows = stmt
            .query_map(params![account, period_key, flex_query_id], row_to_raw_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

fn row_to_raw_record(row: &rusqlite::Row) -> rusqlite::Result<RawRecord> {
    let id: String = row.get(0)?;
    let run_id: String = row.get(1)?;
    let artifact_id: String = row.get(2)?;
    let local_report_date: Option<String> = row.get(4)?;
    let source_payload: String = row.get(7)?;

    Ok(RawRecord {
        id: super::parse_uuid(&id).unwrap(),
        run_id: super::parse_uuid(&run_id).unwrap(),
        artifact_id: super::parse_uuid(&artifact_id).unwrap(),
        account: row.get(3)?,
        local_report_date: local_report_date.map(|d| super::parse_date(&d).unwrap()),
        section_name: row.get(5)?,
        source_row_ref: row.get(6)?,
        source_payload: serde_json::from_str(&source_payload).unwrap_or(serde_json::Value::Null),
    })
}
