//! Daily P&L snapshot repository (`spec.md` §3, §4.9).

use super::Store;
use crate::domain::{FxSource, PnlSnapshotDaily, ValuationSource};
use anyhow::{Context, Result};
use rusqlite::params;
use uuid::Uuid;

impl Store {
    /// One atomic batch UPSERT keyed by (account, report_date_local,
    /// instrument) — reruns converge (`spec.md` §4.9).
    pub fn upsert_snapshots(&self, snapshots: &[PnlSnapshotDaily]) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().context("begin snapshot upsert tx")?;

        for s in snapshots {
            tx.execute(
                "INSERT INTO pnl_snapshot_daily
                    (id, account, local_report_date, instrument_id, position_qty,
                     cost_basis, realized_pnl, unrealized_pnl, total_pnl, fees,
                     withholding_tax, currency, provisional, valuation_source,
                     fx_source, run_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
                 ON CONFLICT (account, local_report_date, instrument_id) DO UPDATE SET
                    position_qty = excluded.position_qty,
                    cost_basis = excluded.cost_basis,
                    realized_pnl = excluded.realized_pnl,
                    unrealized_pnl = excluded.unrealized_pnl,
                    total_pnl = excluded.total_pnl,
                    fees = excluded.fees,
                    withholding_tax = excluded.withholding_tax,
                    currency = excluded.currency,
                    provisional = excluded.provisional,
                    valuation_source = excluded.valuation_source,
                    fx_source = excluded.fx_source,
                    run_id = excluded.run_id",
                params![
                    s.id.to_string(),
                    s.account,
                    s.local_report_date.format("%Y-%m-%d").to_string(),
                    s.instrument_id.to_string(),
                    s.position_qty.to_string(),
                    s.cost_basis.to_string(),
                    s.realized_pnl.to_string(),
                    s.unrealized_pnl.to_string(),
                    s.total_pnl.to_string(),
                    s.fees.to_string(),
                    s.withholding_tax.to_string(),
                    s.currency,
                    s.provisional as i64,
                    s.valuation_source.map(|v| v.as_str()),
                    s.fx_source.map(|v| v.as_str()),
                    s.run_id.to_string(),
                ],
            )
            .context("failed to upsert pnl_snapshot_daily")?;
        }

        tx.commit().context("commit snapshot upsert tx")?;
        Ok(())
    }

    pub fn snapshots_for_date(
        &self,
        account: &str,
        date: chrono::NaiveDate,
    ) -> Result<Vec<PnlSnapshotDaily>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, account, local_report_date, instrument_id, position_qty,
                    cost_basis, realized_pnl, unrealized_pnl, total_pnl, fees,
                    withholding_tax, currency, provisional, valuation_source,
                    fx_source, run_id
             FROM pnl_snapshot_daily WHERE account = ?1 AND local_report_date = ?2",
        )?;
        let rows = stmt
            .query_map(
                params![account, date.format("%Y-%m-%d").to_string()],
                row_to_snapshot,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    #[allow(dead_code)]
    pub fn snapshot_for_instrument_on_date(
        &self,
        account: &str,
        instrument_id: Uuid,
        date: chrono::NaiveDate,
    ) -> Result<Option<PnlSnapshotDaily>> {
        use rusqlite::OptionalExtension;
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, account, local_report_date, instrument_id, position_qty,
                    cost_basis, realized_pnl, unrealized_pnl, total_pnl, fees,
                    withholding_tax, currency, provisional, valuation_source,
                    fx_source, run_id
             FROM pnl_snapshot_daily
             WHERE account = ?1 AND instrument_id = ?2 AND local_report_date = ?3",
            params![account, instrument_id.to_string(), date.format("%Y-%m-%d").to_string()],
            row_to_snapshot,
        )
        .optional()
        .context("failed to load pnl_snapshot_daily")
    }
}

fn row_to_snapshot(row: &rusqlite::Row) -> rusqlite::Result<PnlSnapshotDaily> {
    let id: String = row.get(0)?;
    let local_report_date: String = row.get(2)?;
    let instrument_id: String = row.get(3)?;
    let position_qty: String = row.get(4)?;
    let cost_basis: String = row.get(5)?;
    let realized_pnl: String = row.get(6)?;
    let unrealized_pnl: String = row.get(7)?;
    let total_pnl: String = row.get(8)?;
    let fees: String = row.get(9)?;
    let withholding_tax: String = row.get(10)?;
    let provisional: i64 = row.get(12)?;
    let valuation_source: Option<String> = row.get(13)?;
    let fx_source: Option<String> = row.get(14)?;
    let run_id: String = row.get(15)?;

    Ok(PnlSnapshotDaily {
        id: super::parse_uuid(&id).unwrap(),
        account: row.get(1)?,
        local_report_date: super::parse_date(&local_report_date).unwrap(),
        instrument_id: super::parse_uuid(&instrument_id).unwrap(),
        position_qty: super::parse_decimal(&position_qty).unwrap(),
        cost_basis: super::parse_decimal(&cost_basis).unwrap(),
        realized_pnl: super::parse_decimal(&realized_pnl).unwrap(),
        unrealized_pnl: super::parse_decimal(&unrealized_pnl).unwrap(),
        total_pnl: super::parse_decimal(&total_pnl).unwrap(),
        fees: super::parse_decimal(&fees).unwrap(),
        withholding_tax: super::parse_decimal(&withholding_tax).unwrap(),
        currency: row.get(11)?,
        provisional: provisional != 0,
        valuation_source: valuation_source.map(|v| parse_valuation_source(&v)),
        fx_source: fx_source.map(|v| parse_fx_source(&v)),
        run_id: super::parse_uuid(&run_id).unwrap(),
    })
}

fn parse_valuation_source(s: &str) -> ValuationSource {
    match s {
        "open_position_mark" => ValuationSource::OpenPositionMark,
        "trade_close_price" => ValuationSource::TradeClosePrice,
        "trade_price_on_or_before" => ValuationSource::TradePriceOnOrBefore,
        _ => ValuationSource::Missing,
    }
}

fn parse_fx_source(s: &str) -> FxSource {
    match s {
        "trade_fx_rate" => FxSource::TradeFxRate,
        "derived" => FxSource::Derived,
        "conversion_rates" => FxSource::ConversionRates,
        _ => FxSource::Identity,
    }
}
