//! FIFO lot matching (C8, `spec.md` §4.8). A pure function over one
//! instrument's full ordered fill sequence — replayed from scratch on
//! every run rather than applied incrementally, so that two runs over an
//! identical fill sequence always produce byte-identical lots.

use crate::decimal::normalize_money;
use crate::domain::{LotStatus, PositionLot, TradeFill, TradeSide};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::collections::VecDeque;
use uuid::Uuid;

/// Fixed namespace for lot-id derivation — arbitrary but frozen, so
/// `lot_id` is stable across process restarts and crate versions.
const LOT_ID_NAMESPACE: Uuid = Uuid::from_bytes([
    0x6b, 0x1b, 0x4a, 0x3e, 0x6e, 0x0c, 0x4f, 0x9a, 0x9d, 0x34, 0x3f, 0x2e, 0x61, 0x0a, 0x7c, 0x11,
]);

/// Deterministic lot id from (account, instrument, opening fill) — the
/// same triple always yields the same id, so replaying the full fill
/// sequence on a later run updates existing lot rows instead of
/// duplicating them.
fn lot_id(account: &str, instrument_id: Uuid, opening_trade_fill_id: Uuid) -> Uuid {
    let name = format!("{account}:{instrument_id}:{opening_trade_fill_id}");
    Uuid::new_v5(&LOT_ID_NAMESPACE, name.as_bytes())
}

struct WorkingLot {
    id: Uuid,
    opening_trade_fill_id: Uuid,
    open_timestamp_utc: DateTime<Utc>,
    close_timestamp_utc: Option<DateTime<Utc>>,
    open_quantity: Decimal,
    remaining_quantity: Decimal,
    open_price: Decimal,
    opening_cost_basis: Decimal,
    realized_pnl_to_date: Decimal,
}

/// One dated realized-P&L contribution from closing part or all of a lot.
pub struct RealizedPnlEvent {
    pub date: NaiveDate,
    pub amount: Decimal,
}

pub struct FifoResult {
    pub lots: Vec<PositionLot>,
    pub realized_pnl_events: Vec<RealizedPnlEvent>,
}

/// Replay `fills` — already ordered by `trade_timestamp_utc` ascending,
/// then by raw-record insertion order, per the store's own query — into a
/// full FIFO lot set for `(account, instrument_id)`.
///
/// BUY appends a new open lot. SELL consumes from the head of the queue;
/// when a single sell spans more than one lot, its own commission is
/// allocated across them proportionally to the quantity drawn from each,
/// so the full closing commission is still "consumed in full at close"
/// (`spec.md` §4.8) rather than charged once per lot touched. Opening
/// fees are allocated the same way against the lot's own original
/// quantity. Short positions (a sell with no open lot left to consume)
/// are out of scope — the spec only describes long FIFO over stock
/// positions — so any unmatched sell quantity is silently dropped rather
/// than opening a negative-quantity lot.
pub fn run_fifo(account: &str, instrument_id: Uuid, fills: &[TradeFill]) -> FifoResult {
    let mut open_lots: VecDeque<WorkingLot> = VecDeque::new();
    let mut closed_lots: Vec<WorkingLot> = Vec::new();
    let mut realized_pnl_events = Vec::new();

    for fill in fills {
        match fill.side {
            TradeSide::Buy => {
                open_lots.push_back(WorkingLot {
                    id: lot_id(account, instrument_id, fill.id),
                    opening_trade_fill_id: fill.id,
                    open_timestamp_utc: fill.trade_timestamp_utc,
                    close_timestamp_utc: None,
                    open_quantity: fill.quantity,
                    remaining_quantity: fill.quantity,
                    open_price: fill.price,
                    opening_cost_basis: fill.quantity * fill.price + fill.commission,
                    realized_pnl_to_date: Decimal::ZERO,
                });
            }
            TradeSide::Sell => {
                let mut remaining_to_close = fill.quantity;
                while remaining_to_close > Decimal::ZERO {
                    let Some(front) = open_lots.front_mut() else {
                        break;
                    };
                    let closed_qty = remaining_to_close.min(front.remaining_quantity);

                    let opening_commission =
                        front.opening_cost_basis - front.open_quantity * front.open_price;
                    let opening_fee_alloc = opening_commission * closed_qty / front.open_quantity;
                    let closing_fee_alloc = fill.commission * closed_qty / fill.quantity;

                    let realized = fill.price * closed_qty
                        - front.open_price * closed_qty
                        - opening_fee_alloc
                        - closing_fee_alloc;

                    front.realized_pnl_to_date += realized;
                    front.remaining_quantity -= closed_qty;
                    remaining_to_close -= closed_qty;
                    realized_pnl_events.push(RealizedPnlEvent {
                        date: fill.report_date_local,
                        amount: realized,
                    });

                    if front.remaining_quantity.is_zero() {
                        front.close_timestamp_utc = Some(fill.trade_timestamp_utc);
                        closed_lots.push(open_lots.pop_front().unwrap());
                    }
                }
            }
        }
    }

    let mut lots: Vec<PositionLot> = closed_lots
        .into_iter()
        .chain(open_lots)
        .map(|w| PositionLot {
            id: w.id,
            account: account.to_string(),
            instrument_id,
            opening_trade_fill_id: w.opening_trade_fill_id,
            open_timestamp_utc: w.open_timestamp_utc,
            close_timestamp_utc: w.close_timestamp_utc,
            open_quantity: w.open_quantity,
            remaining_quantity: normalize_money(w.remaining_quantity),
            open_price: w.open_price,
            opening_cost_basis: normalize_money(w.opening_cost_basis),
            realized_pnl_to_date: normalize_money(w.realized_pnl_to_date),
            status: if w.remaining_quantity.is_zero() {
                LotStatus::Closed
            } else {
                LotStatus::Open
            },
        })
        .collect();
    lots.sort_by_key(|l| l.open_timestamp_utc);

    FifoResult {
        lots,
        realized_pnl_events,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn fill(
        side: TradeSide,
        quantity: Decimal,
        price: Decimal,
        commission: Decimal,
        timestamp: DateTime<Utc>,
    ) -> TradeFill {
        TradeFill {
            id: Uuid::new_v4(),
            run_id: Uuid::new_v4(),
            raw_record_id: Uuid::new_v4(),
            account: "U1".to_string(),
            ib_exec_id: Uuid::new_v4().to_string(),
            instrument_id: Uuid::new_v4(),
            conid: 1000,
            side,
            quantity,
            price,
            commission,
            net_cash: Decimal::ZERO,
            cost: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            currency: "USD".to_string(),
            trade_timestamp_utc: timestamp,
            report_date_local: timestamp.date_naive(),
        }
    }

    #[test]
    fn partial_close_realizes_proportional_fees() {
        let instrument_id = Uuid::new_v4();
        let t1 = DateTime::parse_from_rfc3339("2026-02-10T14:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let t2 = DateTime::parse_from_rfc3339("2026-02-12T14:30:00Z")
            .unwrap()
            .with_timezone(&Utc);

        let buy = fill(TradeSide::Buy, dec!(100), dec!(50.00), dec!(1.00), t1);
        let sell = fill(TradeSide::Sell, dec!(40), dec!(55.00), dec!(0.60), t2);
        let fills = vec![buy, sell];

        let result = run_fifo("U1", instrument_id, &fills);
        assert_eq!(result.realized_pnl_events.len(), 1);
        assert_eq!(result.realized_pnl_events[0].amount, dec!(199.00));

        assert_eq!(result.lots.len(), 1);
        let lot = &result.lots[0];
        assert_eq!(lot.status, LotStatus::Open);
        assert_eq!(lot.remaining_quantity, dec!(60));
        assert_eq!(lot.realized_pnl_to_date, dec!(199.00));
    }

    #[test]
    fn full_close_moves_lot_to_closed() {
        let instrument_id = Uuid::new_v4();
        let t1 = Utc::now();
        let buy = fill(TradeSide::Buy, dec!(10), dec!(20.00), dec!(0), t1);
        let sell = fill(TradeSide::Sell, dec!(10), dec!(25.00), dec!(0), t1);
        let result = run_fifo("U1", instrument_id, &[buy, sell]);

        assert_eq!(result.lots.len(), 1);
        assert_eq!(result.lots[0].status, LotStatus::Closed);
        assert_eq!(result.lots[0].remaining_quantity, Decimal::ZERO);
        assert_eq!(result.lots[0].realized_pnl_to_date, dec!(50.00));
    }

    #[test]
    fn sell_spans_two_lots_in_purchase_order() {
        let instrument_id = Uuid::new_v4();
        let t1 = Utc::now();
        let buy_a = fill(TradeSide::Buy, dec!(10), dec!(10.00), dec!(0), t1);
        let buy_b = fill(
            TradeSide::Buy,
            dec!(10),
            dec!(12.00),
            dec!(0),
            t1 + chrono::Duration::seconds(1),
        );
        let sell = fill(
            TradeSide::Sell,
            dec!(15),
            dec!(20.00),
            dec!(0),
            t1 + chrono::Duration::seconds(2),
        );
        let result = run_fifo("U1", instrument_id, &[buy_a, buy_b, sell]);

        assert_eq!(result.realized_pnl_events.len(), 2);
        assert_eq!(result.realized_pnl_events[0].amount, dec!(100.00));
        assert_eq!(result.realized_pnl_events[1].amount, dec!(40.00));

        let remaining_open: Vec<_> = result
            .lots
            .iter()
            .filter(|l| l.status == LotStatus::Open)
            .collect();
        assert_eq!(remaining_open.len(), 1);
        assert_eq!(remaining_open[0].remaining_quantity, dec!(5));
    }

    #[test]
    fn identical_fill_sequence_reproduces_identical_lot_ids() {
        let instrument_id = Uuid::new_v4();
        let t1 = Utc::now();
        let mut buy = fill(TradeSide::Buy, dec!(10), dec!(10.00), dec!(0), t1);
        buy.id = Uuid::new_v4();
        let fills = vec![buy];

        let first = run_fifo("U1", instrument_id, &fills);
        let second = run_fifo("U1", instrument_id, &fills);
        assert_eq!(first.lots[0].id, second.lots[0].id);
    }
}
