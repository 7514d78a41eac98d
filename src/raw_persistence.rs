//! Raw persistence (C5, `spec.md` §4.4). Content-addressed artifact upsert
//! plus section-row extraction. Has no awareness of canonical semantics —
//! the provenance floor everything else is checked against.

use crate::flex::FlexStatementRaw;
use crate::store::{ArtifactUpsertResult, Store};
use anyhow::Result;
use chrono::NaiveDate;
use uuid::Uuid;

/// Derives the artifact's period key from the statement's `fromDate`/
/// `toDate` attributes (IBKR's native `YYYYMMDD` strings, joined verbatim —
/// `spec.md` leaves the exact format open, so this crate defines it once
/// here rather than reconstructing it ad hoc at each call site).
pub fn period_key_of(statement: &FlexStatementRaw) -> String {
    let from = statement.attributes.get("fromDate").map(String::as_str).unwrap_or("");
    let to = statement.attributes.get("toDate").map(String::as_str).unwrap_or("");
    format!("{from}_{to}")
}

/// Parses `whenGenerated` (`YYYYMMDD;HHMMSS`) into the statement's own
/// notion of its generation date — used only as a fallback local report
/// date for raw rows before canonical mapping has run.
pub fn statement_generated_date(statement: &FlexStatementRaw) -> Option<NaiveDate> {
    let raw = statement.attributes.get("whenGenerated")?;
    let date_part = raw.split(';').next()?;
    NaiveDate::parse_from_str(date_part, "%Y%m%d").ok()
}

pub struct PersistOutcome {
    pub artifact: ArtifactUpsertResult,
    pub raw_rows_inserted: usize,
    pub raw_rows_deduplicated: usize,
}

/// One extracted row, owning its JSON payload so the borrowed
/// `NewRawRecord` built from it can outlive this function's locals.
struct ExtractedRow {
    section_name: String,
    source_row_ref: String,
    payload: serde_json::Value,
}

/// Persist one downloaded Flex statement payload: upsert the content-
/// addressed artifact, then extract and insert every section row.
/// Idempotent end to end — a retried run over identical bytes converges to
/// the same store state.
pub fn persist_statement(
    store: &Store,
    run_id: Uuid,
    account: &str,
    flex_query_id: &str,
    payload: &[u8],
    statement: &FlexStatementRaw,
) -> Result<PersistOutcome> {
    use crate::store::NewRawRecord;

    let period_key = period_key_of(statement);
    let artifact = store.upsert_artifact(account, &period_key, flex_query_id, payload)?;
    let local_report_date = statement_generated_date(statement);

    let extracted = extract_rows(statement);
    let rows: Vec<NewRawRecord<'_>> = extracted
        .iter()
        .map(|row| NewRawRecord {
            account,
            local_report_date,
            section_name: row.section_name.as_str(),
            source_row_ref: row.source_row_ref.as_str(),
            source_payload: &row.payload,
        })
        .collect();

    let summary = store.insert_raw_records(run_id, artifact.artifact_id, &rows)?;

    Ok(PersistOutcome {
        artifact,
        raw_rows_inserted: summary.inserted.len(),
        raw_rows_deduplicated: summary.deduplicated,
    })
}

fn extract_rows(statement: &FlexStatementRaw) -> Vec<ExtractedRow> {
    let mut rows = Vec::new();
    for section in &statement.sections {
        for (index, row) in section.rows.iter().enumerate() {
            let source_row_ref = deterministic_row_ref(section.name.as_str(), index, row);
            rows.push(ExtractedRow {
                section_name: section.name.clone(),
                source_row_ref,
                payload: serde_json::to_value(row).unwrap_or(serde_json::Value::Null),
            });
        }
    }
    rows
}

/// `section:element_index`, unless the row carries one of IBKR's own stable
/// row identifiers, in which case that id is used instead (`spec.md` §3).
fn deterministic_row_ref(
    section_name: &str,
    element_index: usize,
    row: &crate::flex::xml::RowAttrs,
) -> String {
    const IBKR_ID_ATTRS: &[&str] = &["transactionID", "tradeID", "actionID"];
    for key in IBKR_ID_ATTRS {
        if let Some(value) = row.get(*key) {
            if !value.is_empty() {
                return value.clone();
            }
        }
    }
    format!("{section_name}:{element_index}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flex::SectionRaw;
    use std::collections::BTreeMap;

    fn statement() -> FlexStatementRaw {
        let mut attrs = BTreeMap::new();
        attrs.insert("fromDate".to_string(), "20260201".to_string());
        attrs.insert("toDate".to_string(), "20260228".to_string());
        attrs.insert("whenGenerated".to_string(), "20260301;061500".to_string());

        let mut with_id = BTreeMap::new();
        with_id.insert("transactionID".to_string(), "T7".to_string());
        let mut without_id = BTreeMap::new();
        without_id.insert("symbol".to_string(), "AAPL".to_string());

        FlexStatementRaw {
            attributes: attrs,
            sections: vec![SectionRaw {
                name: "Trades".to_string(),
                rows: vec![with_id, without_id],
            }],
        }
    }

    #[test]
    fn period_key_joins_from_and_to_dates() {
        assert_eq!(period_key_of(&statement()), "20260201_20260228");
    }

    #[test]
    fn generated_date_parses_ibkr_date_time_format() {
        assert_eq!(
            statement_generated_date(&statement()),
            Some(NaiveDate::from_ymd_opt(2026, 3, 1).unwrap())
        );
    }

    #[test]
    fn row_ref_prefers_ibkr_id_then_falls_back_to_positional() {
        let stmt = statement();
        let section = &stmt.sections[0];
        assert_eq!(
            deterministic_row_ref(&section.name, 0, &section.rows[0]),
            "T7"
        );
        assert_eq!(
            deterministic_row_ref(&section.name, 1, &section.rows[1]),
            "Trades:1"
        );
    }

    #[test]
    fn persist_statement_is_idempotent_on_retry() {
        use crate::domain::RunType;
        use crate::store::BeginRunOutcome;

        let store = Store::open_in_memory().unwrap();
        let run_a = match store.begin_run("U1", RunType::Manual, "p1", "q1").unwrap() {
            BeginRunOutcome::Started(id) => id,
            BeginRunOutcome::Rejected => panic!("expected first run to start"),
        };
        store
            .finalize_run_success(run_a, chrono::NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(), &serde_json::json!([]))
            .unwrap();
        let run_b = match store.begin_run("U1", RunType::Manual, "p1", "q1").unwrap() {
            BeginRunOutcome::Started(id) => id,
            BeginRunOutcome::Rejected => panic!("expected second run to start"),
        };
        let stmt = statement();
        let payload = b"<FlexQueryResponse/>";

        let first = persist_statement(&store, run_a, "U1", "q1", payload, &stmt).unwrap();
        assert!(first.artifact.created_now);
        assert_eq!(first.raw_rows_inserted, 2);

        let second = persist_statement(&store, run_b, "U1", "q1", payload, &stmt).unwrap();
        assert!(!second.artifact.created_now);
        assert_eq!(second.raw_rows_inserted, 0);
        assert_eq!(second.raw_rows_deduplicated, 2);
        assert_eq!(first.artifact.artifact_id, second.artifact.artifact_id);
    }
}
