//! Ingestion & reprocess orchestrators (C9/C10, `spec.md` §4.1, §4.10).

pub mod ingestion;
pub mod reprocess;
pub mod timeline;

pub use ingestion::run_ingestion;
pub use reprocess::run_reprocess;
pub use timeline::{StageEvent, StageTimeline};

use crate::canonical;
use crate::config::Settings;
use crate::domain::RawRecord;
use crate::error::{IngestionErrorCode, IngestionFailure};
use crate::ledger::snapshot;
use crate::store::Store;
use chrono::{NaiveDate, Utc};
use serde_json::json;
use uuid::Uuid;

/// Result of a trigger call: either a run was started (and has already
/// finalized to success or failed by the time this returns), or the
/// account-level lock rejected it outright with no new run row.
pub enum TriggerOutcome {
    Started(Uuid),
    Rejected,
}

pub(super) fn internal(err: anyhow::Error) -> IngestionFailure {
    IngestionFailure::new(IngestionErrorCode::Internal, err.to_string())
}

/// Shared canonical-mapping + snapshot tail, identical for ingestion and
/// reprocess runs (`spec.md` §4.10: "executes canonical_mapping and
/// snapshot with identical semantics to ingestion").
///
/// `mapping_input_rows` is the set of raw rows this run should map: for
/// ingestion, only the rows freshly inserted by this run (empty when the
/// artifact deduped); for reprocess, the full scoped set. Valuation
/// inputs (`OpenPositions`/`Trades`) are always read from the full
/// `(period_key, flex_query_id)` scope regardless, since EOD marks can
/// depend on rows from earlier runs.
pub(super) fn run_stages(
    store: &Store,
    run_id: Uuid,
    account: &str,
    period_key: &str,
    flex_query_id: &str,
    settings: &Settings,
    mapping_input_rows: &[RawRecord],
    report_date: NaiveDate,
    timeline: &mut timeline::StageTimeline,
) -> Result<(), IngestionFailure> {
    let mapping_start = Utc::now();
    if mapping_input_rows.is_empty() {
        timeline.record(
            "canonical_mapping",
            "success",
            mapping_start,
            json!({ "canonical_skip_reason": "no_new_raw_rows_for_run" }),
        );
    } else {
        let batch = canonical::build_canonical_batch(mapping_input_rows).map_err(|e| {
            let code = IngestionErrorCode::from(&e);
            IngestionFailure::new(code, e.to_string()).with_diagnostics(json!({
                "section": e.section,
                "source_row_ref": e.source_row_ref,
                "field": e.field,
                "raw_value": e.raw_value,
            }))
        })?;
        let summary = canonical::apply_canonical_batch(store, run_id, settings, &batch)
            .map_err(internal)?;
        timeline.record(
            "canonical_mapping",
            "success",
            mapping_start,
            json!({
                "trade_fills_upserted": summary.trade_fills_upserted,
                "cashflows_upserted": summary.cashflows_upserted,
                "fx_events_upserted": summary.fx_events_upserted,
                "corporate_actions_upserted": summary.corporate_actions_upserted,
                "corporate_actions_manual_case": summary.corporate_actions_manual_case,
            }),
        );
    }

    let snapshot_start = Utc::now();
    let period_rows = store
        .raw_records_for_period(account, Some(period_key), Some(flex_query_id))
        .map_err(internal)?;
    let open_positions: Vec<RawRecord> = period_rows
        .iter()
        .filter(|r| r.section_name == "OpenPositions")
        .cloned()
        .collect();
    let trades: Vec<RawRecord> = period_rows
        .iter()
        .filter(|r| r.section_name == "Trades")
        .cloned()
        .collect();

    let instruments = store.list_instruments(account).map_err(internal)?;
    let mut snapshots = Vec::with_capacity(instruments.len());
    for instrument in &instruments {
        let currency = instrument
            .currency
            .clone()
            .unwrap_or_else(|| crate::config::BASE_CURRENCY.to_string());
        let snap = snapshot::assemble(
            store,
            run_id,
            account,
            instrument.id,
            instrument.conid,
            &currency,
            report_date,
            &open_positions,
            &trades,
        )
        .map_err(internal)?;
        snapshots.push(snap);
    }
    store.upsert_snapshots(&snapshots).map_err(internal)?;
    timeline.record(
        "snapshot",
        "success",
        snapshot_start,
        json!({ "instrument_count": snapshots.len() }),
    );

    Ok(())
}
