//! Daily P&L snapshot assembly (C8/C9, `spec.md` §4.9). Combines a FIFO
//! replay, the EOD mark resolver, and cashflow totals into one
//! [`PnlSnapshotDaily`] per instrument for the run's local report date.

use crate::decimal::normalize_money;
use crate::domain::{DiagnosticCode, PnlSnapshotDaily, RawRecord};
use crate::store::{LotUpsert, Store};
use crate::valuation::eod_mark;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use uuid::Uuid;

fn is_fee(cash_action: &str) -> bool {
    cash_action.to_ascii_uppercase().contains("FEE")
}

fn is_withholding(cash_action: &str) -> bool {
    let upper = cash_action.to_ascii_uppercase();
    upper.contains("WITHHOLDING") || upper.contains("WTAX")
}

/// Diff `lots` (the full recomputed FIFO state) against the store's
/// existing rows for this instrument and emit the minimal set of
/// [`LotUpsert`]s — new ids insert, known ids update in place.
fn diff_lot_upserts(
    store: &Store,
    account: &str,
    instrument_id: Uuid,
    lots: &[crate::domain::PositionLot],
) -> Result<()> {
    let existing = store.lots_for_instrument(account, instrument_id)?;
    let existing_ids: std::collections::HashSet<Uuid> = existing.iter().map(|l| l.id).collect();

    let upserts: Vec<LotUpsert> = lots
        .iter()
        .map(|lot| {
            if existing_ids.contains(&lot.id) {
                LotUpsert::Update {
                    id: lot.id,
                    remaining_quantity: lot.remaining_quantity,
                    realized_pnl_to_date: lot.realized_pnl_to_date,
                    status: lot.status,
                    close_timestamp_utc: lot.close_timestamp_utc,
                }
            } else {
                LotUpsert::New(lot.clone())
            }
        })
        .collect();

    store
        .apply_lot_upserts(&upserts)
        .context("failed to persist FIFO lot upserts")
}

/// Assemble the snapshot for one instrument on `report_date`, persisting
/// the FIFO lots it depends on along the way. `open_positions_rows` and
/// `trade_rows` are the period's raw rows for this conid, passed through
/// from the orchestrator so the EOD mark resolver stays a pure function
/// over candidate inputs (`spec.md` §4.6).
#[allow(clippy::too_many_arguments)]
pub fn assemble(
    store: &Store,
    run_id: Uuid,
    account: &str,
    instrument_id: Uuid,
    conid: i64,
    currency: &str,
    report_date: NaiveDate,
    open_positions_rows: &[RawRecord],
    trade_rows: &[RawRecord],
) -> Result<PnlSnapshotDaily> {
    let fills = store
        .trade_fills_for_instrument(account, instrument_id)
        .context("failed to load trade fills for FIFO replay")?;
    let fifo = super::fifo::run_fifo(account, instrument_id, &fills);
    diff_lot_upserts(store, account, instrument_id, &fifo.lots)?;

    let position_qty: Decimal = fifo.lots.iter().map(|l| l.remaining_quantity).sum();
    let cost_basis: Decimal = fifo
        .lots
        .iter()
        .filter(|l| !l.remaining_quantity.is_zero())
        .map(|l| l.opening_cost_basis * l.remaining_quantity / l.open_quantity)
        .sum();
    let realized_from_lots: Decimal = fifo
        .realized_pnl_events
        .iter()
        .filter(|e| e.date <= report_date)
        .map(|e| e.amount)
        .sum();

    let cashflows_to_date = store
        .cashflows_for_instrument_up_to_date(account, instrument_id, report_date)
        .context("failed to load cumulative cashflows")?;
    let withholding_to_date: Decimal = cashflows_to_date
        .iter()
        .filter(|c| is_withholding(&c.cash_action))
        .map(|c| c.amount.abs())
        .sum();
    let realized_pnl = normalize_money(realized_from_lots - withholding_to_date);

    let mark_resolution = eod_mark::resolve(conid, report_date, open_positions_rows, trade_rows);
    let eod_mark = mark_resolution.mark.unwrap_or(Decimal::ZERO);
    let unrealized_pnl = normalize_money(position_qty * eod_mark - cost_basis);
    let total_pnl = normalize_money(realized_pnl + unrealized_pnl);

    let todays_cashflows = store
        .cashflows_for_instrument_on_date(account, instrument_id, report_date)
        .context("failed to load today's cashflows")?;
    let fees: Decimal = todays_cashflows
        .iter()
        .filter(|c| is_fee(&c.cash_action))
        .map(|c| c.amount.abs())
        .sum();
    let withholding_tax: Decimal = todays_cashflows
        .iter()
        .filter(|c| is_withholding(&c.cash_action))
        .map(|c| c.amount.abs())
        .sum();

    let fx_source = store
        .latest_fx_source_for_instrument_on_date(account, instrument_id, report_date)
        .context("failed to load latest fx source")?;

    let manual_corp_action = store
        .has_unresolved_manual_corp_action(account, conid)
        .context("failed to check manual corporate action cases")?;
    let provisional = mark_resolution.provisional || manual_corp_action;
    if let Some(diagnostic) = mark_resolution.diagnostic {
        debug_assert!(matches!(
            diagnostic,
            DiagnosticCode::EodMarkFallbackLastTrade | DiagnosticCode::EodMarkMissingAllSources
        ));
    }

    Ok(PnlSnapshotDaily {
        id: Uuid::new_v4(),
        account: account.to_string(),
        local_report_date: report_date,
        instrument_id,
        position_qty: normalize_money(position_qty),
        cost_basis: normalize_money(cost_basis),
        realized_pnl,
        unrealized_pnl,
        total_pnl,
        fees: normalize_money(fees),
        withholding_tax: normalize_money(withholding_tax),
        currency: currency.to_string(),
        provisional,
        valuation_source: Some(mark_resolution.source),
        fx_source,
        run_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::{apply_canonical_batch, build_canonical_batch};
    use crate::config::{RetryTuning, Settings};
    use serde_json::json;

    fn settings() -> Settings {
        Settings {
            account_id: "U1".to_string(),
            flex_token: "t".to_string(),
            flex_query_id: "q".to_string(),
            database_url: ":memory:".to_string(),
            retry: RetryTuning::default(),
        }
    }

    fn persist_raw_row(
        store: &Store,
        run_id: Uuid,
        account: &str,
        section: &str,
        row_ref: &str,
        payload: serde_json::Value,
    ) -> RawRecord {
        let artifact = store
            .upsert_artifact(account, "p1", "q1", row_ref.as_bytes())
            .unwrap();
        let new_row = crate::store::raw_records::NewRawRecord {
            account,
            local_report_date: None,
            section_name: section,
            source_row_ref: row_ref,
            source_payload: &payload,
        };
        store
            .insert_raw_records(run_id, artifact.artifact_id, &[new_row])
            .unwrap();
        store
            .raw_records_for_run(run_id)
            .unwrap()
            .into_iter()
            .find(|r| r.section_name == section && r.source_row_ref == row_ref)
            .unwrap()
    }

    #[test]
    fn assembles_snapshot_from_trades_and_open_position_mark() {
        let store = Store::open_in_memory().unwrap();
        let run_id = match store
            .begin_run("U1", crate::domain::RunType::Manual, "p1", "q1")
            .unwrap()
        {
            crate::store::BeginRunOutcome::Started(id) => id,
            crate::store::BeginRunOutcome::Rejected => panic!("expected run to start"),
        };
        let settings = settings();

        let trade_row = persist_raw_row(
            &store,
            run_id,
            "U1",
            "Trades",
            "Trades:0",
            json!({
                "ibExecID": "E1", "conid": "1000", "symbol": "AAPL", "buySell": "BUY",
                "quantity": "100", "tradePrice": "50.00", "ibCommission": "-1.00",
                "netCash": "-5001.00", "currency": "USD",
                "dateTime": "2026-02-10T14:30:00Z", "reportDate": "2026-02-10"
            }),
        );
        let batch = build_canonical_batch(&[trade_row]).unwrap();
        apply_canonical_batch(&store, run_id, &settings, &batch).unwrap();

        let instrument_id = store.list_instruments("U1").unwrap()[0].id;
        let open_position = persist_raw_row(
            &store,
            run_id,
            "U1",
            "OpenPositions",
            "OpenPositions:0",
            json!({"conid": "1000", "reportDate": "2026-02-10", "markPrice": "51.25"}),
        );

        let report_date = NaiveDate::from_ymd_opt(2026, 2, 10).unwrap();
        let snapshot = assemble(
            &store,
            run_id,
            "U1",
            instrument_id,
            1000,
            "USD",
            report_date,
            &[open_position],
            &[],
        )
        .unwrap();

        assert_eq!(snapshot.position_qty, Decimal::from(100));
        assert_eq!(snapshot.unrealized_pnl, normalize_money(Decimal::from(100) * Decimal::new(5125, 2) - snapshot.cost_basis));
        assert!(!snapshot.provisional);

        let lots = store.lots_for_instrument("U1", instrument_id).unwrap();
        assert_eq!(lots.len(), 1);
    }
}
