//! Position lot repository (`spec.md` §3 "Position lot", §4.8 outputs).

use super::Store;
use crate::domain::{LotStatus, PositionLot};
use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::params;
use uuid::Uuid;

/// One lot mutation emitted by the FIFO ledger: either a brand new lot or
/// an update to an existing one's remaining quantity / status / realized
/// P&L. The ledger computes these purely in memory; this repository is
/// the only place they touch the store.
pub enum LotUpsert {
    New(PositionLot),
    Update {
        id: Uuid,
        remaining_quantity: rust_decimal::Decimal,
        realized_pnl_to_date: rust_decimal::Decimal,
        status: LotStatus,
        close_timestamp_utc: Option<chrono::DateTime<Utc>>,
    },
}

impl Store {
    pub fn apply_lot_upserts(&self, upserts: &[LotUpsert]) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().context("begin lot upsert tx")?;
        let now = Utc::now().to_rfc3339();

        for upsert in upserts {
            match upsert {
                LotUpsert::New(lot) => {
                    tx.execute(
                        "INSERT INTO position_lot
                            (id, account, instrument_id, opening_trade_fill_id,
                             open_timestamp_utc, close_timestamp_utc, open_quantity,
                             remaining_quantity, open_price, opening_cost_basis,
                             realized_pnl_to_date, status, created_at, updated_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13)",
                        params![
                            lot.id.to_string(),
                            lot.account,
                            lot.instrument_id.to_string(),
                            lot.opening_trade_fill_id.to_string(),
                            lot.open_timestamp_utc.to_rfc3339(),
                            lot.close_timestamp_utc.map(|t| t.to_rfc3339()),
                            lot.open_quantity.to_string(),
                            lot.remaining_quantity.to_string(),
                            lot.open_price.to_string(),
                            lot.opening_cost_basis.to_string(),
                            lot.realized_pnl_to_date.to_string(),
                            lot.status.as_str(),
                            now,
                        ],
                    )
                    .context("failed to insert position_lot")?;
                }
                LotUpsert::Update {
                    id,
                    remaining_quantity,
                    realized_pnl_to_date,
                    status,
                    close_timestamp_utc,
                } => {
                    tx.execute(
                        "UPDATE position_lot SET
                            remaining_quantity = ?1, realized_pnl_to_date = ?2,
                            status = ?3, close_timestamp_utc = ?4, updated_at = ?5
                         WHERE id = ?6",
                        params![
                            remaining_quantity.to_string(),
                            realized_pnl_to_date.to_string(),
                            status.as_str(),
                            close_timestamp_utc.map(|t| t.to_rfc3339()),
                            now,
                            id.to_string(),
                        ],
                    )
                    .context("failed to update position_lot")?;
                }
            }
        }

        tx.commit().context("commit lot upsert tx")?;
        Ok(())
    }

    pub fn lots_for_instrument(
        &self,
        account: &str,
        instrument_id: Uuid,
    ) -> Result<Vec<PositionLot>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, account, instrument_id, opening_trade_fill_id, open_timestamp_utc,
                    close_timestamp_utc, open_quantity, remaining_quantity, open_price,
                    opening_cost_basis, realized_pnl_to_date, status
             FROM position_lot WHERE account = ?1 AND instrument_id = ?2
             ORDER BY open_timestamp_utc ASC",
        )?;
        let rows = stmt
            .query_map(params![account, instrument_id.to_string()], row_to_lot)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

fn row_to_lot(row: &rusqlite::Row) -> rusqlite::Result<PositionLot> {
    let id: String = row.get(0)?;
    let instrument_id: String = row.get(2)?;
    let opening_trade_fill_id: String = row.get(3)?;
    let open_timestamp_utc: String = row.get(4)?;
    let close_timestamp_utc: Option<String> = row.get(5)?;
    let open_quantity: String = row.get(6)?;
    let remaining_quantity: String = row.get(7)?;
    let open_price: String = row.get(8)?;
    let opening_cost_basis: String = row.get(9)?;
    let realized_pnl_to_date: String = row.get(10)?;
    let status: String = row.get(11)?;

    Ok(PositionLot {
        id: super::parse_uuid(&id).unwrap(),
        account: row.get(1)?,
        instrument_id: super::parse_uuid(&instrument_id).unwrap(),
        opening_trade_fill_id: super::parse_uuid(&opening_trade_fill_id).unwrap(),
        open_timestamp_utc: super::parse_timestamp(&open_timestamp_utc).unwrap(),
        close_timestamp_utc: close_timestamp_utc.map(|t| super::parse_timestamp(&t).unwrap()),
        open_quantity: super::parse_decimal(&open_quantity).unwrap(),
        remaining_quantity: super::parse_decimal(&remaining_quantity).unwrap(),
        open_price: super::parse_decimal(&open_price).unwrap(),
        opening_cost_basis: super::parse_decimal(&opening_cost_basis).unwrap(),
        realized_pnl_to_date: super::parse_decimal(&realized_pnl_to_date).unwrap(),
        status: status.parse::<LotStatus>().unwrap(),
    })
}
