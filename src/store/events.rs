//! Canonical event repositories (`spec.md` §3 "Canonical events", §4.5
//! upsert semantics).

use super::Store;
use crate::domain::{Cashflow, CorporateAction, FxEvent, FxSource, ReorgCode, TradeFill, TradeSide};
use anyhow::{Context, Result};
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

pub struct TradeFillUpsertResult {
    pub id: Uuid,
    /// `true` when an existing row's mutable numeric fields were updated
    /// rather than a new row inserted.
    pub updated: bool,
}

impl Store {
    /// UPSERT on (account, ib_exec_id): updates `commission`, `realized_pnl`,
    /// `net_cash`, `cost` on collision while preserving the
    /// `ingestion_run_id` of the earliest observation (`spec.md` §4.5
    /// "Trade-fill UPSERT").
    pub fn upsert_trade_fill(&self, fill: &TradeFill) -> Result<TradeFillUpsertResult> {
        let conn = self.conn.lock().unwrap();
        let existing_id: Option<String> = conn
            .query_row(
                "SELECT id FROM event_trade_fill WHERE account = ?1 AND ib_exec_id = ?2",
                params![fill.account, fill.ib_exec_id],
                |row| row.get(0),
            )
            .optional()
            .context("failed to look up event_trade_fill")?;

        if let Some(id) = existing_id {
            conn.execute(
                "UPDATE event_trade_fill SET
                    commission = ?1, realized_pnl = ?2, net_cash = ?3, cost = ?4
                 WHERE id = ?5",
                params![
                    fill.commission.to_string(),
                    fill.realized_pnl.to_string(),
                    fill.net_cash.to_string(),
                    fill.cost.to_string(),
                    id,
                ],
            )
            .context("failed to update event_trade_fill")?;
            return Ok(TradeFillUpsertResult {
                id: super::parse_uuid(&id)?,
                updated: true,
            });
        }

        conn.execute(
            "INSERT INTO event_trade_fill
                (id, run_id, raw_record_id, account, ib_exec_id, instrument_id, conid,
                 side, quantity, price, commission, net_cash, cost, realized_pnl,
                 currency, trade_timestamp_utc, report_date_local)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
            params![
                fill.id.to_string(),
                fill.run_id.to_string(),
                fill.raw_record_id.to_string(),
                fill.account,
                fill.ib_exec_id,
                fill.instrument_id.to_string(),
                fill.conid,
                fill.side.as_str(),
                fill.quantity.to_string(),
                fill.price.to_string(),
                fill.commission.to_string(),
                fill.net_cash.to_string(),
                fill.cost.to_string(),
                fill.realized_pnl.to_string(),
                fill.currency,
                fill.trade_timestamp_utc.to_rfc3339(),
                fill.report_date_local.format("%Y-%m-%d").to_string(),
            ],
        )
        .context("failed to insert event_trade_fill")?;
        Ok(TradeFillUpsertResult {
            id: fill.id,
            updated: false,
        })
    }

    pub fn trade_fills_for_instrument(
        &self,
        account: &str,
        instrument_id: Uuid,
    ) -> Result<Vec<TradeFill>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT tf.id, tf.run_id, tf.raw_record_id, tf.account, tf.ib_exec_id,
                    tf.instrument_id, tf.conid, tf.side, tf.quantity, tf.price,
                    tf.commission, tf.net_cash, tf.cost, tf.realized_pnl, tf.currency,
                    tf.trade_timestamp_utc, tf.report_date_local, rr.id as source_raw_record_id
             FROM event_trade_fill tf
             JOIN raw_record rr ON rr.id = tf.raw_record_id
             WHERE tf.account = ?1 AND tf.instrument_id = ?2
             ORDER BY tf.trade_timestamp_utc ASC, rr.rowid ASC",
        )?;
        let rows = stmt
            .query_map(params![account, instrument_id.to_string()], row_to_trade_fill)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// `spec.md` §4.5 "Cashflow correction semantics": a duplicate natural
    /// key with a different amount or date rewrites the numeric fields and
    /// sets `is_correction = true`; identical amount/date is a no-op.
    pub fn upsert_cashflow(&self, cf: &Cashflow) -> Result<Uuid> {
        let conn = self.conn.lock().unwrap();
        let existing: Option<(String, String, String)> = conn
            .query_row(
                "SELECT id, amount, report_date_local FROM event_cashflow
                 WHERE account = ?1 AND transaction_id = ?2 AND cash_action = ?3 AND currency = ?4",
                params![cf.account, cf.transaction_id, cf.cash_action, cf.currency],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .context("failed to look up event_cashflow")?;

        if let Some((id, amount, report_date)) = existing {
            let new_amount = cf.amount.to_string();
            let new_date = cf.report_date_local.format("%Y-%m-%d").to_string();
            if amount == new_amount && report_date == new_date {
                return super::parse_uuid(&id);
            }
            conn.execute(
                "UPDATE event_cashflow SET
                    amount = ?1, report_date_local = ?2, instrument_id = ?3, is_correction = 1
                 WHERE id = ?4",
                params![
                    new_amount,
                    new_date,
                    cf.instrument_id.map(|i| i.to_string()),
                    id,
                ],
            )
            .context("failed to correct event_cashflow")?;
            return super::parse_uuid(&id);
        }

        conn.execute(
            "INSERT INTO event_cashflow
                (id, run_id, raw_record_id, account, transaction_id, cash_action,
                 currency, amount, report_date_local, instrument_id, is_correction)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 0)",
            params![
                cf.id.to_string(),
                cf.run_id.to_string(),
                cf.raw_record_id.to_string(),
                cf.account,
                cf.transaction_id,
                cf.cash_action,
                cf.currency,
                cf.amount.to_string(),
                cf.report_date_local.format("%Y-%m-%d").to_string(),
                cf.instrument_id.map(|i| i.to_string()),
            ],
        )
        .context("failed to insert event_cashflow")?;
        Ok(cf.id)
    }

    pub fn cashflows_for_instrument_on_date(
        &self,
        account: &str,
        instrument_id: Uuid,
        date: chrono::NaiveDate,
    ) -> Result<Vec<Cashflow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, run_id, raw_record_id, account, transaction_id, cash_action,
                    currency, amount, report_date_local, instrument_id, is_correction
             FROM event_cashflow
             WHERE account = ?1 AND instrument_id = ?2 AND report_date_local = ?3",
        )?;
        let rows = stmt
            .query_map(
                params![account, instrument_id.to_string(), date.format("%Y-%m-%d").to_string()],
                row_to_cashflow,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// FX resolution is re-run freely; last write wins on rate/source.
    pub fn upsert_fx(&self, fx: &FxEvent) -> Result<Uuid> {
        let conn = self.conn.lock().unwrap();
        let existing: Option<String> = conn
            .query_row(
                "SELECT id FROM event_fx
                 WHERE account = ?1 AND transaction_id = ?2 AND currency = ?3 AND functional_currency = ?4",
                params![fx.account, fx.transaction_id, fx.currency, fx.functional_currency],
                |row| row.get(0),
            )
            .optional()
            .context("failed to look up event_fx")?;

        if let Some(id) = existing {
            conn.execute(
                "UPDATE event_fx SET rate = ?1, source = ?2 WHERE id = ?3",
                params![fx.rate.to_string(), fx.source.as_str(), id],
            )
            .context("failed to update event_fx")?;
            return super::parse_uuid(&id);
        }

        conn.execute(
            "INSERT INTO event_fx
                (id, run_id, raw_record_id, account, transaction_id, currency,
                 functional_currency, rate, source, report_date_local)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                fx.id.to_string(),
                fx.run_id.to_string(),
                fx.raw_record_id.to_string(),
                fx.account,
                fx.transaction_id,
                fx.currency,
                fx.functional_currency,
                fx.rate.to_string(),
                fx.source.as_str(),
                fx.report_date_local.format("%Y-%m-%d").to_string(),
            ],
        )
        .context("failed to insert event_fx")?;
        Ok(fx.id)
    }

    /// `spec.md` §4.5 "Corporate action fallback key" + §9 Open Question:
    /// a collision on both the primary and fallback key opens a manual
    /// case, marks `provisional = true`, and skips the conflicting upsert
    /// rather than overwriting the existing row.
    pub fn upsert_corporate_action(&self, action: &CorporateAction) -> Result<(Uuid, bool)> {
        let conn = self.conn.lock().unwrap();

        let existing_by_action_id: Option<String> = if let Some(action_id) = &action.action_id {
            conn.query_row(
                "SELECT id FROM event_corporate_action WHERE account = ?1 AND action_id = ?2",
                params![action.account, action_id],
                |row| row.get(0),
            )
            .optional()
            .context("failed to look up event_corporate_action by action_id")?
        } else {
            None
        };

        let existing_by_fallback: Option<String> = if action.action_id.is_none() {
            conn.query_row(
                "SELECT id FROM event_corporate_action
                 WHERE account = ?1 AND transaction_id = ?2 AND conid = ?3
                   AND report_date_local = ?4 AND reorg_code = ?5",
                params![
                    action.account,
                    action.transaction_id,
                    action.conid,
                    action.report_date_local.map(|d| d.format("%Y-%m-%d").to_string()),
                    action.reorg_code.map(|c| c.as_str()),
                ],
                |row| row.get(0),
            )
            .optional()
            .context("failed to look up event_corporate_action by fallback key")?
        } else {
            None
        };

        if let Some(id) = existing_by_action_id.or(existing_by_fallback) {
            // Collision on the natural key: open a manual case, mark
            // provisional, skip the conflicting upsert.
            conn.execute(
                "UPDATE event_corporate_action SET manual_case = 1, provisional = 1 WHERE id = ?1",
                params![id],
            )
            .context("failed to flag manual corporate action case")?;
            return Ok((super::parse_uuid(&id)?, true));
        }

        conn.execute(
            "INSERT INTO event_corporate_action
                (id, run_id, raw_record_id, account, action_id, transaction_id, conid,
                 report_date_local, reorg_code, provisional, manual_case)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 0)",
            params![
                action.id.to_string(),
                action.run_id.to_string(),
                action.raw_record_id.to_string(),
                action.account,
                action.action_id,
                action.transaction_id,
                action.conid,
                action.report_date_local.map(|d| d.format("%Y-%m-%d").to_string()),
                action.reorg_code.map(|c| c.as_str()),
                action.provisional as i64,
            ],
        )
        .context("failed to insert event_corporate_action")?;
        Ok((action.id, false))
    }

    /// Every cashflow for `instrument_id` with `report_date_local <= date` —
    /// the ledger's source for cumulative fee/withholding-tax adjustments
    /// up to a snapshot's report date (`spec.md` §4.9).
    pub fn cashflows_for_instrument_up_to_date(
        &self,
        account: &str,
        instrument_id: Uuid,
        date: chrono::NaiveDate,
    ) -> Result<Vec<Cashflow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, run_id, raw_record_id, account, transaction_id, cash_action,
                    currency, amount, report_date_local, instrument_id, is_correction
             FROM event_cashflow
             WHERE account = ?1 AND instrument_id = ?2 AND report_date_local <= ?3",
        )?;
        let rows = stmt
            .query_map(
                params![account, instrument_id.to_string(), date.format("%Y-%m-%d").to_string()],
                row_to_cashflow,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// The FX source of the most recent trade fill on `date` for
    /// `instrument_id`, joining `event_fx` to `event_trade_fill` on the
    /// shared `(account, transaction_id)` key — feeds the snapshot's
    /// `fx_source` label (`spec.md` §4.9).
    pub fn latest_fx_source_for_instrument_on_date(
        &self,
        account: &str,
        instrument_id: Uuid,
        date: chrono::NaiveDate,
    ) -> Result<Option<FxSource>> {
        let conn = self.conn.lock().unwrap();
        let source: Option<String> = conn
            .query_row(
                "SELECT fx.source FROM event_fx fx
                 JOIN event_trade_fill tf
                   ON tf.account = fx.account AND tf.ib_exec_id = fx.transaction_id
                 WHERE tf.account = ?1 AND tf.instrument_id = ?2 AND tf.report_date_local = ?3
                 ORDER BY tf.trade_timestamp_utc DESC LIMIT 1",
                params![account, instrument_id.to_string(), date.format("%Y-%m-%d").to_string()],
                |row| row.get(0),
            )
            .optional()
            .context("failed to look up latest fx source for instrument")?;
        Ok(source.map(|s| parse_fx_source(&s)))
    }

    /// Whether any corporate action affecting `instrument_id`'s `conid` is
    /// an unresolved manual case — feeds the snapshot's `provisional` flag.
    pub fn has_unresolved_manual_corp_action(&self, account: &str, conid: i64) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM event_corporate_action
             WHERE account = ?1 AND conid = ?2 AND manual_case = 1",
            params![account, conid],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}

fn row_to_trade_fill(row: &rusqlite::Row) -> rusqlite::Result<TradeFill> {
    let id: String = row.get(0)?;
    let run_id: String = row.get(1)?;
    let raw_record_id: String = row.get(2)?;
    let instrument_id: String = row.get(5)?;
    let side: String = row.get(7)?;
    let quantity: String = row.get(8)?;
    let price: String = row.get(9)?;
    let commission: String = row.get(10)?;
    let net_cash: String = row.get(11)?;
    let cost: String = row.get(12)?;
    let realized_pnl: String = row.get(13)?;
    let trade_timestamp_utc: String = row.get(15)?;
    let report_date_local: String = row.get(16)?;

    Ok(TradeFill {
        id: super::parse_uuid(&id).unwrap(),
        run_id: super::parse_uuid(&run_id).unwrap(),
        raw_record_id: super::parse_uuid(&raw_record_id).unwrap(),
        account: row.get(3)?,
        ib_exec_id: row.get(4)?,
        instrument_id: super::parse_uuid(&instrument_id).unwrap(),
        conid: row.get(6)?,
        side: side.parse::<TradeSide>().unwrap(),
        quantity: super::parse_decimal(&quantity).unwrap(),
        price: super::parse_decimal(&price).unwrap(),
        commission: super::parse_decimal(&commission).unwrap(),
        net_cash: super::parse_decimal(&net_cash).unwrap(),
        cost: super::parse_decimal(&cost).unwrap(),
        realized_pnl: super::parse_decimal(&realized_pnl).unwrap(),
        currency: row.get(14)?,
        trade_timestamp_utc: super::parse_timestamp(&trade_timestamp_utc).unwrap(),
        report_date_local: super::parse_date(&report_date_local).unwrap(),
    })
}

fn row_to_cashflow(row: &rusqlite::Row) -> rusqlite::Result<Cashflow> {
    let id: String = row.get(0)?;
    let run_id: String = row.get(1)?;
    let raw_record_id: String = row.get(2)?;
    let amount: String = row.get(7)?;
    let report_date_local: String = row.get(8)?;
    let instrument_id: Option<String> = row.get(9)?;

    Ok(Cashflow {
        id: super::parse_uuid(&id).unwrap(),
        run_id: super::parse_uuid(&run_id).unwrap(),
        raw_record_id: super::parse_uuid(&raw_record_id).unwrap(),
        account: row.get(3)?,
        transaction_id: row.get(4)?,
        cash_action: row.get(5)?,
        currency: row.get(6)?,
        amount: super::parse_decimal(&amount).unwrap(),
        report_date_local: super::parse_date(&report_date_local).unwrap(),
        instrument_id: instrument_id.map(|i| super::parse_uuid(&i).unwrap()),
        is_correction: row.get::<_, i64>(10)? != 0,
    })
}

#[allow(dead_code)]
fn row_to_fx(row: &rusqlite::Row) -> rusqlite::Result<FxEvent> {
    let id: String = row.get(0)?;
    let run_id: String = row.get(1)?;
    let raw_record_id: String = row.get(2)?;
    let rate: String = row.get(7)?;
    let source: String = row.get(8)?;
    let report_date_local: String = row.get(9)?;

    Ok(FxEvent {
        id: super::parse_uuid(&id).unwrap(),
        run_id: super::parse_uuid(&run_id).unwrap(),
        raw_record_id: super::parse_uuid(&raw_record_id).unwrap(),
        account: row.get(3)?,
        transaction_id: row.get(4)?,
        currency: row.get(5)?,
        functional_currency: row.get(6)?,
        rate: super::parse_decimal(&rate).unwrap(),
        source: parse_fx_source(&source),
        report_date_local: super::parse_date(&report_date_local).unwrap(),
    })
}

fn parse_fx_source(s: &str) -> FxSource {
    match s {
        "trade_fx_rate" => FxSource::TradeFxRate,
        "derived" => FxSource::Derived,
        "conversion_rates" => FxSource::ConversionRates,
        _ => FxSource::Identity,
    }
}

#[allow(dead_code)]
fn parse_reorg_code(s: Option<&str>) -> Option<ReorgCode> {
    s.and_then(|s| s.parse().ok())
}
