//! Reprocess orchestrator (C10, `spec.md` §4.10). Skips the
//! request/poll/download stages and replays canonical_mapping + snapshot
//! over already-persisted raw records, scoped by `(period_key,
//! flex_query_id)` or unscoped for a full replay.

use super::{internal, run_stages, TriggerOutcome};
use crate::config::{Settings, LOCAL_BUSINESS_ZONE};
use crate::domain::RunType;
use crate::error::IngestionFailure;
use crate::store::{BeginRunOutcome, Store};
use anyhow::Result;
use chrono::{NaiveDate, Utc};

use super::timeline::StageTimeline;

pub async fn run_reprocess(
    store: &Store,
    settings: &Settings,
    period_key: Option<&str>,
    flex_query_id: Option<&str>,
) -> Result<TriggerOutcome> {
    let lock_period_key = period_key.unwrap_or("full-replay");
    let lock_query_id = flex_query_id.unwrap_or(&settings.flex_query_id);

    let begun = store.begin_run(
        &settings.account_id,
        RunType::Reprocess,
        lock_period_key,
        lock_query_id,
    )?;
    let run_id = match begun {
        BeginRunOutcome::Started(id) => id,
        BeginRunOutcome::Rejected => {
            tracing::warn!(account = %settings.account_id, "reprocess rejected: run already active");
            return Ok(TriggerOutcome::Rejected);
        }
    };

    let mut timeline = StageTimeline::new();
    let result = execute(
        store,
        settings,
        run_id,
        period_key,
        flex_query_id,
        &mut timeline,
    );
    match result {
        Ok(local_report_date) => {
            store.finalize_run_success(run_id, local_report_date, &timeline.to_json())?;
            tracing::info!(run_id = %run_id, "reprocess run succeeded");
        }
        Err(failure) => {
            tracing::error!(run_id = %run_id, code = %failure.code, message = %failure.message, "reprocess run failed");
            store.finalize_run_failed(
                run_id,
                failure.code.as_str(),
                &failure.message,
                &failure.diagnostics,
            )?;
        }
    }

    Ok(TriggerOutcome::Started(run_id))
}

fn execute(
    store: &Store,
    settings: &Settings,
    run_id: uuid::Uuid,
    period_key: Option<&str>,
    flex_query_id: Option<&str>,
    timeline: &mut StageTimeline,
) -> Result<NaiveDate, IngestionFailure> {
    let effective_period_key = period_key.unwrap_or("full-replay");
    let effective_query_id = flex_query_id.unwrap_or(&settings.flex_query_id);

    let rows = store
        .raw_records_for_period(&settings.account_id, period_key, flex_query_id)
        .map_err(internal)?;
    let report_date = Utc::now().with_timezone(&LOCAL_BUSINESS_ZONE).date_naive();

    run_stages(
        store,
        run_id,
        &settings.account_id,
        effective_period_key,
        effective_query_id,
        settings,
        &rows,
        report_date,
        timeline,
    )?;

    Ok(report_date)
}
