//! EOD mark resolution (`spec.md` §4.6 "EOD mark"). A pure function over
//! raw `OpenPositions`/`Trades` rows for one (conid, local report date)
//! key — it never touches the store directly.

use crate::domain::{DiagnosticCode, RawRecord, ValuationSource};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct EodMarkResolution {
    pub mark: Option<Decimal>,
    pub source: ValuationSource,
    pub provisional: bool,
    pub diagnostic: Option<DiagnosticCode>,
}

struct OpenPositionCandidate {
    conid: i64,
    report_date: NaiveDate,
    mark_price: Decimal,
}

struct TradeCandidate {
    conid: i64,
    report_date: NaiveDate,
    date_time: DateTime<Utc>,
    transaction_id: i64,
    raw_record_id: Uuid,
    close_price: Option<Decimal>,
    trade_price: Decimal,
}

fn attr<'a>(row: &'a RawRecord, key: &str) -> Option<&'a str> {
    row.source_payload.get(key).and_then(|v| v.as_str())
}

fn parse_open_position(row: &RawRecord) -> Option<OpenPositionCandidate> {
    Some(OpenPositionCandidate {
        conid: attr(row, "conid")?.parse().ok()?,
        report_date: NaiveDate::parse_from_str(attr(row, "reportDate")?, "%Y-%m-%d").ok()?,
        mark_price: attr(row, "markPrice")?.parse().ok()?,
    })
}

fn parse_trade_candidate(row: &RawRecord) -> Option<TradeCandidate> {
    Some(TradeCandidate {
        conid: attr(row, "conid")?.parse().ok()?,
        report_date: NaiveDate::parse_from_str(attr(row, "reportDate")?, "%Y-%m-%d").ok()?,
        date_time: DateTime::parse_from_rfc3339(attr(row, "dateTime")?)
            .ok()?
            .with_timezone(&Utc),
        transaction_id: attr(row, "transactionID")?.parse().ok()?,
        raw_record_id: row.id,
        close_price: attr(row, "closePrice").and_then(|v| v.parse().ok()),
        trade_price: attr(row, "tradePrice")?.parse().ok()?,
    })
}

/// Resolve the EOD mark for `conid` on `report_date` from the raw
/// `OpenPositions` and `Trades` rows belonging to a period (`spec.md`
/// §4.6 priority table).
pub fn resolve(
    conid: i64,
    report_date: NaiveDate,
    open_positions_rows: &[RawRecord],
    trade_rows: &[RawRecord],
) -> EodMarkResolution {
    if let Some(mark) = open_positions_rows
        .iter()
        .filter_map(parse_open_position)
        .find(|c| c.conid == conid && c.report_date == report_date)
        .map(|c| c.mark_price)
    {
        return EodMarkResolution {
            mark: Some(mark),
            source: ValuationSource::OpenPositionMark,
            provisional: false,
            diagnostic: None,
        };
    }

    let trades: Vec<TradeCandidate> = trade_rows
        .iter()
        .filter_map(parse_trade_candidate)
        .filter(|c| c.conid == conid)
        .collect();

    let same_day_close = trades
        .iter()
        .filter(|c| c.report_date == report_date && c.close_price.is_some())
        .max_by(|a, b| (a.date_time, a.transaction_id).cmp(&(b.date_time, b.transaction_id)));

    if let Some(c) = same_day_close {
        return EodMarkResolution {
            mark: c.close_price,
            source: ValuationSource::TradeClosePrice,
            provisional: false,
            diagnostic: None,
        };
    }

    let last_trade_on_or_before = trades
        .iter()
        .filter(|c| c.report_date <= report_date)
        .max_by(|a, b| {
            (a.date_time, a.transaction_id, a.raw_record_id)
                .cmp(&(b.date_time, b.transaction_id, b.raw_record_id))
        });

    if let Some(c) = last_trade_on_or_before {
        return EodMarkResolution {
            mark: Some(c.trade_price),
            source: ValuationSource::TradePriceOnOrBefore,
            provisional: true,
            diagnostic: Some(DiagnosticCode::EodMarkFallbackLastTrade),
        };
    }

    EodMarkResolution {
        mark: None,
        source: ValuationSource::Missing,
        provisional: true,
        diagnostic: Some(DiagnosticCode::EodMarkMissingAllSources),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn row(section: &str, payload: serde_json::Value) -> RawRecord {
        RawRecord {
            id: Uuid::new_v4(),
            run_id: Uuid::new_v4(),
            artifact_id: Uuid::new_v4(),
            account: "U1".to_string(),
            local_report_date: None,
            section_name: section.to_string(),
            source_row_ref: "x".to_string(),
            source_payload: payload,
        }
    }

    #[test]
    fn open_position_mark_wins_when_present() {
        let open_positions = vec![row(
            "OpenPositions",
            json!({"conid": "1000", "reportDate": "2026-02-10", "markPrice": "51.25"}),
        )];
        let res = resolve(1000, NaiveDate::from_ymd_opt(2026, 2, 10).unwrap(), &open_positions, &[]);
        assert_eq!(res.source, ValuationSource::OpenPositionMark);
        assert!(!res.provisional);
    }

    #[test]
    fn falls_back_to_last_trade_price_and_marks_provisional() {
        let trades = vec![row(
            "Trades",
            json!({
                "conid": "1000", "reportDate": "2026-02-09",
                "dateTime": "2026-02-09T20:00:00Z", "transactionID": "5",
                "tradePrice": "42.17"
            }),
        )];
        let res = resolve(1000, NaiveDate::from_ymd_opt(2026, 2, 10).unwrap(), &[], &trades);
        assert_eq!(res.source, ValuationSource::TradePriceOnOrBefore);
        assert!(res.provisional);
        assert_eq!(res.mark, Some(Decimal::new(4217, 2)));
        assert_eq!(res.diagnostic, Some(DiagnosticCode::EodMarkFallbackLastTrade));
    }

    #[test]
    fn missing_all_sources_is_provisional() {
        let res = resolve(1000, NaiveDate::from_ymd_opt(2026, 2, 10).unwrap(), &[], &[]);
        assert_eq!(res.source, ValuationSource::Missing);
        assert!(res.provisional);
    }
}
