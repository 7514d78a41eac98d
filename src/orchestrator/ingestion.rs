//! Ingestion orchestrator (C9, `spec.md` §4.1). A plain async function
//! taking its collaborators by reference, matching the teacher's
//! `main.rs` style of wiring concrete components together directly
//! rather than behind a DI container.

use super::{internal, run_stages, TriggerOutcome};
use crate::config::{LOCAL_BUSINESS_ZONE, Settings};
use crate::domain::RunType;
use crate::error::{FlexTransportError, IngestionErrorCode, IngestionFailure, PreflightError};
use crate::flex::{xml, FlexClient};
use crate::preflight;
use crate::raw_persistence;
use crate::store::{BeginRunOutcome, Store};
use anyhow::Result;
use chrono::{NaiveDate, Utc};
use serde_json::json;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::timeline::StageTimeline;

/// Drive one ingestion run end to end. Returns [`TriggerOutcome::Rejected`]
/// when the account already has a `started` run (`spec.md` §4.1 "Lock
/// protocol"); otherwise the run has already been finalized to `success`
/// or `failed` by the time this returns (`spec.md`'s terminal invariant).
pub async fn run_ingestion(
    store: &Store,
    client: &FlexClient,
    settings: &Settings,
    run_type: RunType,
) -> Result<TriggerOutcome> {
    let placeholder_period_key = format!("pending:{}", Uuid::new_v4());
    let begun = store.begin_run(
        &settings.account_id,
        run_type,
        &placeholder_period_key,
        &settings.flex_query_id,
    )?;
    let run_id = match begun {
        BeginRunOutcome::Started(id) => id,
        BeginRunOutcome::Rejected => {
            tracing::warn!(account = %settings.account_id, "ingestion rejected: run already active");
            return Ok(TriggerOutcome::Rejected);
        }
    };

    let mut timeline = StageTimeline::new();
    match execute(store, client, settings, run_id, &mut timeline).await {
        Ok(local_report_date) => {
            store.finalize_run_success(run_id, local_report_date, &timeline.to_json())?;
            tracing::info!(run_id = %run_id, "ingestion run succeeded");
        }
        Err(failure) => {
            tracing::error!(run_id = %run_id, code = %failure.code, message = %failure.message, "ingestion run failed");
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

async fn execute(
    store: &Store,
    client: &FlexClient,
    settings: &Settings,
    run_id: Uuid,
    timeline: &mut StageTimeline,
) -> Result<NaiveDate, IngestionFailure> {
    let request_start = Utc::now();
    let poll_start = Utc::now();
    let fetch = client
        .fetch_statement(&settings.flex_token, &settings.flex_query_id, &settings.retry)
        .await
        .map_err(|e| {
            let code = IngestionErrorCode::from(&e);
            let failure = IngestionFailure::new(code, e.to_string());
            match &e {
                FlexTransportError::PollTimeout { attempts } => {
                    failure.with_diagnostics(json!({ "poll_attempts": attempts }))
                }
                _ => failure,
            }
        })?;
    timeline.record(
        "request",
        "success",
        request_start,
        json!({ "reference_code": fetch.reference_code }),
    );
    let poll_attempt_events: Vec<serde_json::Value> = fetch
        .poll_attempts
        .iter()
        .map(|a| {
            json!({
                "poll_attempt": a.attempt,
                "error_code": a.error_code,
                "error_message": a.error_message,
                "retry_after_seconds": a.retry_after_seconds,
            })
        })
        .collect();
    timeline.record(
        "poll",
        "success",
        poll_start,
        json!({
            "attempts": poll_attempt_events,
            "final_status": "ready",
        }),
    );
    let body = fetch.body;

    let download_start = Utc::now();
    let document = xml::parse_statement_body(&body).map_err(|e| {
        IngestionFailure::new(IngestionErrorCode::StatementError, e.to_string())
    })?;
    let statement = document.statements.into_iter().next().ok_or_else(|| {
        IngestionFailure::new(
            IngestionErrorCode::StatementError,
            "Flex response contained no FlexStatement element".to_string(),
        )
    })?;
    preflight::check(&statement, false).map_err(|e| {
        let code = IngestionErrorCode::from(&e);
        let PreflightError::MissingRequiredSection(missing) = &e;
        IngestionFailure::new(code, e.to_string())
            .with_diagnostics(json!({ "missing_sections": missing }))
    })?;
    timeline.record("download", "success", download_start, json!({}));

    let persist_start = Utc::now();
    let period_key = raw_persistence::period_key_of(&statement);
    store.set_run_period_key(run_id, &period_key).map_err(internal)?;
    let outcome = raw_persistence::persist_statement(
        store,
        run_id,
        &settings.account_id,
        &settings.flex_query_id,
        body.as_bytes(),
        &statement,
    )
    .map_err(internal)?;
    let payload_sha256 = hex::encode(Sha256::digest(body.as_bytes()));
    timeline.record(
        "persist",
        "success",
        persist_start,
        json!({
            "payload_sha256": payload_sha256,
            "raw_artifact_id": outcome.artifact.artifact_id,
            "artifact_deduped": !outcome.artifact.created_now,
            "raw_rows_inserted": outcome.raw_rows_inserted,
            "raw_rows_deduplicated": outcome.raw_rows_deduplicated,
        }),
    );

    let report_date = Utc::now().with_timezone(&LOCAL_BUSINESS_ZONE).date_naive();
    let mapping_rows = if outcome.raw_rows_inserted > 0 {
        store.raw_records_for_run(run_id).map_err(internal)?
    } else {
        Vec::new()
    };

    run_stages(
        store,
        run_id,
        &settings.account_id,
        &period_key,
        &settings.flex_query_id,
        settings,
        &mapping_rows,
        report_date,
        timeline,
    )?;

    Ok(report_date)
}
