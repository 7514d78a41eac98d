//! Execution FX resolution (`spec.md` §4.6 "Execution FX"). A pure
//! function over one trade's own fields plus its candidate
//! `ConversionRates` rows.

use crate::canonical::sections::{MappedConversionRate, MappedTradeFill};
use crate::decimal::normalize_fx_rate;
use crate::domain::{DiagnosticCode, FxSource};
use rust_decimal::Decimal;

#[derive(Debug, Clone, PartialEq)]
pub struct FxResolution {
    pub rate: Option<Decimal>,
    pub source: FxSource,
    pub provisional: bool,
    pub diagnostic: Option<DiagnosticCode>,
}

/// Resolve the execution FX rate for `trade` against `base_currency`,
/// using `conversion_rates` as priority-3 candidates (`spec.md` §4.6).
pub fn resolve(
    trade: &MappedTradeFill,
    conversion_rates: &[MappedConversionRate],
    base_currency: &str,
) -> FxResolution {
    if trade.currency == base_currency {
        return FxResolution {
            rate: Some(Decimal::ONE),
            source: FxSource::Identity,
            provisional: false,
            diagnostic: None,
        };
    }

    if let Some(rate) = trade.fx_rate_to_base {
        return FxResolution {
            rate: Some(normalize_fx_rate(rate)),
            source: FxSource::TradeFxRate,
            provisional: false,
            diagnostic: None,
        };
    }

    if let Some(in_base) = trade.net_cash_in_base {
        if !trade.net_cash.is_zero() {
            let rate = normalize_fx_rate(in_base.abs() / trade.net_cash.abs());
            return FxResolution {
                rate: Some(rate),
                source: FxSource::Derived,
                provisional: false,
                diagnostic: None,
            };
        }
    }

    let mut candidates: Vec<&MappedConversionRate> = conversion_rates
        .iter()
        .filter(|c| {
            c.currency == trade.currency
                && c.functional_currency == base_currency
                && c.report_date_local <= trade.report_date_local
        })
        .collect();

    candidates.sort_by(|a, b| {
        (a.report_date_local, a.raw_record_id).cmp(&(b.report_date_local, b.raw_record_id))
    });

    if let Some(best) = candidates.last() {
        return FxResolution {
            rate: Some(normalize_fx_rate(best.rate)),
            source: FxSource::ConversionRates,
            provisional: false,
            diagnostic: None,
        };
    }

    FxResolution {
        rate: None,
        source: FxSource::Identity,
        provisional: true,
        diagnostic: Some(DiagnosticCode::FxRateMissingAllSources),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TradeSide;
    use chrono::{NaiveDate, Utc};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn base_trade() -> MappedTradeFill {
        MappedTradeFill {
            raw_record_id: Uuid::new_v4(),
            account: "U1".to_string(),
            ib_exec_id: "E1".to_string(),
            conid: 1000,
            symbol: Some("AAPL".to_string()),
            side: TradeSide::Sell,
            quantity: dec!(1000),
            price: dec!(1.0),
            commission: dec!(0),
            net_cash: dec!(-1000.00),
            net_cash_in_base: Some(dec!(-3600.00)),
            fx_rate_to_base: None,
            cost: dec!(0),
            realized_pnl: dec!(0),
            currency: "ILS".to_string(),
            trade_timestamp_utc: Utc::now(),
            report_date_local: NaiveDate::from_ymd_opt(2026, 2, 10).unwrap(),
        }
    }

    #[test]
    fn derives_rate_from_net_cash_when_no_direct_rate() {
        let trade = base_trade();
        let res = resolve(&trade, &[], "USD");
        assert_eq!(res.source, FxSource::Derived);
        assert_eq!(res.rate, Some(dec!(3.6000000000)));
        assert!(!res.provisional);
    }

    #[test]
    fn trade_fx_rate_wins_over_derived() {
        let mut trade = base_trade();
        trade.fx_rate_to_base = Some(dec!(3.5));
        let res = resolve(&trade, &[], "USD");
        assert_eq!(res.source, FxSource::TradeFxRate);
        assert_eq!(res.rate, Some(dec!(3.5000000000)));
    }

    #[test]
    fn same_currency_is_identity() {
        let mut trade = base_trade();
        trade.currency = "USD".to_string();
        trade.net_cash_in_base = None;
        let res = resolve(&trade, &[], "USD");
        assert_eq!(res.source, FxSource::Identity);
        assert_eq!(res.rate, Some(Decimal::ONE));
    }

    #[test]
    fn missing_all_sources_is_provisional() {
        let mut trade = base_trade();
        trade.net_cash_in_base = None;
        let res = resolve(&trade, &[], "USD");
        assert!(res.provisional);
        assert_eq!(res.diagnostic, Some(DiagnosticCode::FxRateMissingAllSources));
    }
}
