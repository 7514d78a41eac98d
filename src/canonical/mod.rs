//! Canonical mapper (C6, `spec.md` §4.5). Fail-fast deterministic
//! transformation from raw rows into four canonical event kinds plus a
//! derived instrument slice, with frozen natural-key UPSERT semantics.

pub mod normalize;
pub mod sections;

use crate::config::Settings;
use crate::domain::{Cashflow, CorporateAction, FxEvent, RawRecord, TradeFill};
use crate::error::MappingContractViolationError;
use crate::store::{InstrumentAttrs, Store};
use crate::valuation::fx;
use anyhow::{Context, Result};
use sections::{
    map_cashflow, map_corporate_action, map_conversion_rate, map_trade, MappedCashflow,
    MappedConversionRate, MappedCorporateAction, MappedTradeFill,
};
use std::collections::BTreeMap;
use uuid::Uuid;

/// The pure output of mapping one run's raw rows: four event-kind slices,
/// keyed by `conid` rather than `instrument_id` since instrument identity
/// is only resolved once these are applied against the store.
pub struct CanonicalBatch {
    pub instruments: Vec<(i64, InstrumentAttrs)>,
    pub trade_fills: Vec<MappedTradeFill>,
    pub cashflows: Vec<MappedCashflow>,
    pub conversion_rates: Vec<MappedConversionRate>,
    pub corporate_actions: Vec<MappedCorporateAction>,
}

/// `build_canonical_batch(raw_rows)` (`spec.md` §4.5 "Entry point").
/// Routes strictly by `section_name`; other sections are left unmapped.
pub fn build_canonical_batch(raw_rows: &[RawRecord]) -> Result<CanonicalBatch, MappingContractViolationError> {
    let mut instruments: BTreeMap<i64, InstrumentAttrs> = BTreeMap::new();
    let mut trade_fills = Vec::new();
    let mut cashflows = Vec::new();
    let mut conversion_rates = Vec::new();
    let mut corporate_actions = Vec::new();

    for row in raw_rows {
        match row.section_name.as_str() {
            "Trades" => {
                let fill = map_trade(row)?;
                let attrs = instruments.entry(fill.conid).or_default();
                if attrs.symbol.is_none() {
                    attrs.symbol = fill.symbol.clone();
                }
                if attrs.currency.is_none() {
                    attrs.currency = Some(fill.currency.clone());
                }
                trade_fills.push(fill);
            }
            "CashTransactions" => cashflows.push(map_cashflow(row)?),
            "ConversionRates" => conversion_rates.push(map_conversion_rate(row)?),
            "CorporateActions" => {
                let action = map_corporate_action(row)?;
                if let Some(conid) = action.conid {
                    instruments.entry(conid).or_default();
                }
                corporate_actions.push(action);
            }
            _ => {}
        }
    }

    Ok(CanonicalBatch {
        instruments: instruments.into_iter().collect(),
        trade_fills,
        cashflows,
        conversion_rates,
        corporate_actions,
    })
}

pub struct ApplySummary {
    pub trade_fills_upserted: usize,
    pub cashflows_upserted: usize,
    pub fx_events_upserted: usize,
    pub corporate_actions_upserted: usize,
    pub corporate_actions_manual_case: usize,
}

/// Apply a [`CanonicalBatch`] to the store: instrument upsert first (so
/// every event row resolves `instrument_id` deterministically), then FX
/// resolution per trade (`spec.md` §4.6), then the four event upserts.
pub fn apply_canonical_batch(
    store: &Store,
    run_id: Uuid,
    settings: &Settings,
    batch: &CanonicalBatch,
) -> Result<ApplySummary> {
    let mut instrument_ids: BTreeMap<i64, Uuid> = BTreeMap::new();
    for (conid, attrs) in &batch.instruments {
        let id = store
            .upsert_instrument(&settings.account_id, *conid, attrs)
            .context("failed to upsert instrument")?;
        instrument_ids.insert(*conid, id);
    }

    let mut trade_fills_upserted = 0;
    let mut fx_events_upserted = 0;

    for mapped in &batch.trade_fills {
        let instrument_id = *instrument_ids
            .get(&mapped.conid)
            .context("instrument upsert did not cover a mapped trade's conid")?;

        let fill = TradeFill {
            id: Uuid::new_v4(),
            run_id,
            raw_record_id: mapped.raw_record_id,
            account: mapped.account.clone(),
            ib_exec_id: mapped.ib_exec_id.clone(),
            instrument_id,
            conid: mapped.conid,
            side: mapped.side,
            quantity: mapped.quantity,
            price: mapped.price,
            commission: mapped.commission,
            net_cash: mapped.net_cash,
            cost: mapped.cost,
            realized_pnl: mapped.realized_pnl,
            currency: mapped.currency.clone(),
            trade_timestamp_utc: mapped.trade_timestamp_utc,
            report_date_local: mapped.report_date_local,
        };
        store.upsert_trade_fill(&fill).context("failed to upsert trade fill")?;
        trade_fills_upserted += 1;

        let resolution = fx::resolve(mapped, &batch.conversion_rates, crate::config::BASE_CURRENCY);
        if let Some(rate) = resolution.rate {
            let fx_event = FxEvent {
                id: Uuid::new_v4(),
                run_id,
                raw_record_id: mapped.raw_record_id,
                account: mapped.account.clone(),
                transaction_id: mapped.ib_exec_id.clone(),
                currency: mapped.currency.clone(),
                functional_currency: crate::config::BASE_CURRENCY.to_string(),
                rate,
                source: resolution.source,
                report_date_local: mapped.report_date_local,
            };
            store.upsert_fx(&fx_event).context("failed to upsert fx event")?;
            fx_events_upserted += 1;
        }
    }

    let mut cashflows_upserted = 0;
    for mapped in &batch.cashflows {
        let instrument_id = mapped.conid.and_then(|c| instrument_ids.get(&c).copied());
        let cf = Cashflow {
            id: Uuid::new_v4(),
            run_id,
            raw_record_id: mapped.raw_record_id,
            account: mapped.account.clone(),
            transaction_id: mapped.transaction_id.clone(),
            cash_action: mapped.cash_action.clone(),
            currency: mapped.currency.clone(),
            amount: mapped.amount,
            report_date_local: mapped.report_date_local,
            instrument_id,
            is_correction: false,
        };
        store.upsert_cashflow(&cf).context("failed to upsert cashflow")?;
        cashflows_upserted += 1;
    }

    let mut corporate_actions_upserted = 0;
    let mut corporate_actions_manual_case = 0;
    for mapped in &batch.corporate_actions {
        let action = CorporateAction {
            id: Uuid::new_v4(),
            run_id,
            raw_record_id: mapped.raw_record_id,
            account: mapped.account.clone(),
            action_id: mapped.action_id.clone(),
            transaction_id: mapped.transaction_id.clone(),
            conid: mapped.conid,
            report_date_local: mapped.report_date_local,
            reorg_code: mapped.reorg_code,
            provisional: false,
            manual_case: false,
        };
        let (_, manual_case) = store
            .upsert_corporate_action(&action)
            .context("failed to upsert corporate action")?;
        corporate_actions_upserted += 1;
        if manual_case {
            corporate_actions_manual_case += 1;
        }
    }

    Ok(ApplySummary {
        trade_fills_upserted,
        cashflows_upserted,
        fx_events_upserted,
        corporate_actions_upserted,
        corporate_actions_manual_case,
    })
}
