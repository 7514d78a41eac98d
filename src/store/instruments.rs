//! Instrument repository — conid-first identity (`spec.md` §3, §4.5).

use super::Store;
use crate::domain::Instrument;
use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

/// Alias attributes collected from a mapped row; `conid` is authoritative,
/// everything else is carried as an alias and last-write-wins on upsert.
#[derive(Debug, Clone, Default)]
pub struct InstrumentAttrs {
    pub symbol: Option<String>,
    pub local_symbol: Option<String>,
    pub isin: Option<String>,
    pub cusip: Option<String>,
    pub figi: Option<String>,
    pub asset_category: Option<String>,
    pub currency: Option<String>,
    pub description: Option<String>,
}

impl Store {
    /// Upsert by (account, conid); must run before any dependent event
    /// upsert so every event row resolves `instrument_id` deterministically
    /// (`spec.md` §4.5 "Instrument upsert").
    pub fn upsert_instrument(
        &self,
        account: &str,
        conid: i64,
        attrs: &InstrumentAttrs,
    ) -> Result<Uuid> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();

        let existing: Option<String> = conn
            .query_row(
                "SELECT id FROM instrument WHERE account = ?1 AND conid = ?2",
                params![account, conid],
                |row| row.get(0),
            )
            .optional()
            .context("failed to look up instrument")?;

        if let Some(id) = existing {
            conn.execute(
                "UPDATE instrument SET
                    symbol = COALESCE(?1, symbol),
                    local_symbol = COALESCE(?2, local_symbol),
                    isin = COALESCE(?3, isin),
                    cusip = COALESCE(?4, cusip),
                    figi = COALESCE(?5, figi),
                    asset_category = COALESCE(?6, asset_category),
                    currency = COALESCE(?7, currency),
                    description = COALESCE(?8, description),
                    updated_at = ?9
                 WHERE id = ?10",
                params![
                    attrs.symbol,
                    attrs.local_symbol,
                    attrs.isin,
                    attrs.cusip,
                    attrs.figi,
                    attrs.asset_category,
                    attrs.currency,
                    attrs.description,
                    now,
                    id,
                ],
            )
            .context("failed to update instrument")?;
            return super::parse_uuid(&id);
        }

        let id = Uuid::new_v4();
        conn.execute(
            "INSERT INTO instrument
                (id, account, conid, symbol, local_symbol, isin, cusip, figi,
                 asset_category, currency, description, active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 1, ?12, ?12)",
            params![
                id.to_string(),
                account,
                conid,
                attrs.symbol,
                attrs.local_symbol,
                attrs.isin,
                attrs.cusip,
                attrs.figi,
                attrs.asset_category,
                attrs.currency,
                attrs.description,
                now,
            ],
        )
        .context("failed to insert instrument")?;
        Ok(id)
    }

    pub fn get_instrument(&self, id: Uuid) -> Result<Instrument> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, account, conid, symbol, local_symbol, isin, cusip, figi,
                    asset_category, currency, description, active
             FROM instrument WHERE id = ?1",
            params![id.to_string()],
            row_to_instrument,
        )
        .context("failed to load instrument")
    }

    pub fn list_instruments(&self, account: &str) -> Result<Vec<Instrument>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, account, conid, symbol, local_symbol, isin, cusip, figi,
                    asset_category, currency, description, active
             FROM instrument WHERE account = ?1",
        )?;
        let rows = stmt
            .query_map(params![account], row_to_instrument)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

fn row_to_instrument(row: &rusqlite::Row) -> rusqlite::Result<Instrument> {
    let id: String = row.get(0)?;
    Ok(Instrument {
        id: super::parse_uuid(&id).unwrap(),
        account: row.get(1)?,
        conid: row.get(2)?,
        symbol: row.get(3)?,
        local_symbol: row.get(4)?,
        isin: row.get(5)?,
        cusip: row.get(6)?,
        figi: row.get(7)?,
        asset_category: row.get(8)?,
        currency: row.get(9)?,
        description: row.get(10)?,
        active: row.get::<_, i64>(11)? != 0,
    })
}
