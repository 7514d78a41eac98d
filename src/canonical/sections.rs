//! Per-section tagged mapping (`spec.md` §4.5 "Row routing", §9
//! "Polymorphism over XML payload types"): one function per section name,
//! each building a typed intermediate from the raw attribute mapping with
//! explicit field normalizers. None of these resolve `instrument_id` —
//! that happens after the instrument upsert pass in [`super::build_canonical_batch`]'s caller.

use super::normalize::*;
use crate::domain::{RawRecord, ReorgCode, TradeSide};
use crate::error::MappingContractViolationError;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;

fn get<'a>(row: &'a RawRecord, key: &str) -> Option<&'a str> {
    row.source_payload.get(key).and_then(|v| v.as_str())
}

#[derive(Debug, Clone)]
pub struct MappedTradeFill {
    pub raw_record_id: uuid::Uuid,
    pub account: String,
    pub ib_exec_id: String,
    pub conid: i64,
    pub symbol: Option<String>,
    pub side: TradeSide,
    pub quantity: Decimal,
    pub price: Decimal,
    pub commission: Decimal,
    pub net_cash: Decimal,
    pub net_cash_in_base: Option<Decimal>,
    pub fx_rate_to_base: Option<Decimal>,
    pub cost: Decimal,
    pub realized_pnl: Decimal,
    pub currency: String,
    pub trade_timestamp_utc: DateTime<Utc>,
    pub report_date_local: NaiveDate,
}

pub fn map_trade(row: &RawRecord) -> Result<MappedTradeFill, MappingContractViolationError> {
    let section = "Trades";
    let r = row.source_row_ref.as_str();

    Ok(MappedTradeFill {
        raw_record_id: row.id,
        account: row.account.clone(),
        ib_exec_id: required_str(get(row, "ibExecID"), section, r, "ibExecID")?,
        conid: required_i64(get(row, "conid"), section, r, "conid")?,
        symbol: optional_str(get(row, "symbol")),
        side: required_str(get(row, "buySell"), section, r, "buySell")?
            .parse::<TradeSide>()
            .map_err(|_| MappingContractViolationError {
                section: section.to_string(),
                source_row_ref: r.to_string(),
                field: "buySell".to_string(),
                raw_value: get(row, "buySell").map(|s| s.to_string()),
            })?,
        quantity: required_decimal(get(row, "quantity"), section, r, "quantity")?,
        price: required_decimal(get(row, "tradePrice"), section, r, "tradePrice")?,
        commission: optional_decimal(get(row, "ibCommission"))
            .unwrap_or(Decimal::ZERO)
            .abs(),
        net_cash: required_decimal(get(row, "netCash"), section, r, "netCash")?,
        net_cash_in_base: optional_decimal(get(row, "netCashInBase")),
        fx_rate_to_base: optional_decimal(get(row, "fxRateToBase")),
        cost: optional_decimal(get(row, "cost")).unwrap_or(Decimal::ZERO),
        realized_pnl: optional_decimal(get(row, "fifoPnlRealized")).unwrap_or(Decimal::ZERO),
        currency: required_str(get(row, "currency"), section, r, "currency")?,
        trade_timestamp_utc: required_timestamp_utc(get(row, "dateTime"), section, r, "dateTime")?,
        report_date_local: required_date(get(row, "reportDate"), section, r, "reportDate")?,
    })
}

#[derive(Debug, Clone)]
pub struct MappedCashflow {
    pub raw_record_id: uuid::Uuid,
    pub account: String,
    pub transaction_id: String,
    pub cash_action: String,
    pub currency: String,
    pub amount: Decimal,
    pub report_date_local: NaiveDate,
    pub conid: Option<i64>,
}

pub fn map_cashflow(row: &RawRecord) -> Result<MappedCashflow, MappingContractViolationError> {
    let section = "CashTransactions";
    let r = row.source_row_ref.as_str();

    Ok(MappedCashflow {
        raw_record_id: row.id,
        account: row.account.clone(),
        transaction_id: required_str(get(row, "transactionID"), section, r, "transactionID")?,
        cash_action: required_str(get(row, "cashAction"), section, r, "cashAction")?,
        currency: required_str(get(row, "currency"), section, r, "currency")?,
        amount: required_decimal(get(row, "amount"), section, r, "amount")?,
        report_date_local: required_date(get(row, "reportDate"), section, r, "reportDate")?,
        conid: optional_i64(get(row, "conid")),
    })
}

#[derive(Debug, Clone)]
pub struct MappedConversionRate {
    pub raw_record_id: uuid::Uuid,
    pub currency: String,
    pub functional_currency: String,
    pub rate: Decimal,
    pub report_date_local: NaiveDate,
}

pub fn map_conversion_rate(
    row: &RawRecord,
) -> Result<MappedConversionRate, MappingContractViolationError> {
    let section = "ConversionRates";
    let r = row.source_row_ref.as_str();

    Ok(MappedConversionRate {
        raw_record_id: row.id,
        currency: required_str(get(row, "fromCurrency"), section, r, "fromCurrency")?,
        functional_currency: required_str(get(row, "toCurrency"), section, r, "toCurrency")?,
        rate: required_decimal(get(row, "rate"), section, r, "rate")?,
        report_date_local: required_date(get(row, "reportDate"), section, r, "reportDate")?,
    })
}

#[derive(Debug, Clone)]
pub struct MappedCorporateAction {
    pub raw_record_id: uuid::Uuid,
    pub account: String,
    pub action_id: Option<String>,
    pub transaction_id: Option<String>,
    pub conid: Option<i64>,
    pub report_date_local: Option<NaiveDate>,
    pub reorg_code: Option<ReorgCode>,
}

pub fn map_corporate_action(
    row: &RawRecord,
) -> Result<MappedCorporateAction, MappingContractViolationError> {
    Ok(MappedCorporateAction {
        raw_record_id: row.id,
        account: row.account.clone(),
        action_id: optional_str(get(row, "actionID")),
        transaction_id: optional_str(get(row, "transactionID")),
        conid: optional_i64(get(row, "conid")),
        report_date_local: optional_date(get(row, "reportDate")),
        reorg_code: optional_str(get(row, "code")).and_then(|c| c.parse::<ReorgCode>().ok()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(section: &str, payload: serde_json::Value) -> RawRecord {
        RawRecord {
            id: uuid::Uuid::new_v4(),
            run_id: uuid::Uuid::new_v4(),
            artifact_id: uuid::Uuid::new_v4(),
            account: "U1".to_string(),
            local_report_date: None,
            section_name: section.to_string(),
            source_row_ref: format!("{section}:0"),
            source_payload: payload,
        }
    }

    #[test]
    fn maps_a_trade_row() {
        let r = row(
            "Trades",
            json!({
                "ibExecID": "E1", "conid": "1000", "symbol": "AAPL", "buySell": "BUY",
                "quantity": "100", "tradePrice": "50.00", "ibCommission": "-1.00",
                "netCash": "-5001.00", "currency": "USD",
                "dateTime": "2026-02-10T14:30:00Z", "reportDate": "2026-02-10"
            }),
        );
        let fill = map_trade(&r).unwrap();
        assert_eq!(fill.ib_exec_id, "E1");
        assert_eq!(fill.conid, 1000);
        assert_eq!(fill.commission, Decimal::new(100, 2));
        assert!(matches!(fill.side, TradeSide::Buy));
    }

    #[test]
    fn missing_required_field_raises_contract_violation() {
        let r = row(
            "Trades",
            json!({
                "ibExecID": "E1", "conid": "1000", "buySell": "BUY",
                "quantity": "100", "tradePrice": "N/A",
                "netCash": "-5001.00", "currency": "USD",
                "dateTime": "2026-02-10T14:30:00Z", "reportDate": "2026-02-10"
            }),
        );
        let err = map_trade(&r).unwrap_err();
        assert_eq!(err.field, "tradePrice");
    }
}
