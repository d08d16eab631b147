//! Counterparty selection over the live order set of one instrument
//!
//! Only admitted orders (`processed = true`) that are still live and have
//! quantity left rest in the book. Callers pass the ids already passed over
//! in the current matching pass so a skipped counterparty is not picked
//! again.

use std::cmp::Ordering;
use std::collections::HashSet;

use common::{Decimal, Trade, TradeAction, TradeId};
use rust_decimal::prelude::ToPrimitive;

/// Earlier submission first; id breaks ties between equal timestamps
fn time_priority(a: &Trade, b: &Trade) -> Ordering {
    a.submitted_at
        .cmp(&b.submitted_at)
        .then_with(|| a.id.cmp(&b.id))
}

fn resting<'a>(
    orders: &'a [Trade],
    action: TradeAction,
    passed: &'a HashSet<TradeId>,
) -> impl Iterator<Item = &'a Trade> + 'a {
    orders.iter().filter(move |t| {
        t.action == action
            && t.processed
            && t.status.is_live()
            && t.remaining_quantity() > 0
            && !passed.contains(&t.id)
    })
}

/// Sell limit order with the lowest ask, earliest first on ties
pub fn best_ask<'a>(orders: &'a [Trade], passed: &'a HashSet<TradeId>) -> Option<&'a Trade> {
    resting(orders, TradeAction::Sell, passed)
        .filter(|t| !t.is_market())
        .min_by(|a, b| a.ask.cmp(&b.ask).then_with(|| time_priority(a, b)))
}

/// Buy limit order with the highest bid, earliest first on ties
pub fn best_bid<'a>(orders: &'a [Trade], passed: &'a HashSet<TradeId>) -> Option<&'a Trade> {
    resting(orders, TradeAction::Buy, passed)
        .filter(|t| !t.is_market())
        .min_by(|a, b| b.bid.cmp(&a.bid).then_with(|| time_priority(a, b)))
}

/// Oldest resting market order on the `action` side
pub fn oldest_market<'a>(
    orders: &'a [Trade],
    action: TradeAction,
    passed: &'a HashSet<TradeId>,
) -> Option<&'a Trade> {
    resting(orders, action, passed)
        .filter(|t| t.is_market())
        .min_by(|a, b| time_priority(a, b))
}

/// Whole lots of `lot_size` units that `funds` can pay for at `price`,
/// expressed in units. Rounds down.
pub fn affordable_quantity(funds: Decimal, price: Decimal, lot_size: u32) -> u32 {
    if lot_size == 0 || price <= Decimal::ZERO || funds <= Decimal::ZERO {
        return 0;
    }
    let lot_cost = price * Decimal::from(lot_size);
    let lots = match funds.checked_div(lot_cost) {
        Some(lots) => lots.floor(),
        None => return 0,
    };
    lots.to_u32()
        .map(|lots| lots.saturating_mul(lot_size))
        .unwrap_or(u32::MAX - u32::MAX % lot_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use common::{AccountId, CustomerId, TradeStatus};
    use rust_decimal_macros::dec;

    fn order(id: u64, action: TradeAction, price: Decimal, minute: i64) -> Trade {
        let open = Utc.with_ymd_and_hms(2024, 3, 4, 1, 0, 0).unwrap();
        let mut trade = Trade::new(
            action,
            "XYZ",
            100,
            price,
            AccountId(id),
            CustomerId(id),
            open + Duration::minutes(minute),
        );
        trade.id = TradeId(id);
        trade.processed = true;
        trade.version = 1;
        trade
    }

    #[test]
    fn test_best_ask_price_then_time() {
        let orders = vec![
            order(1, TradeAction::Sell, dec!(10), 2),
            order(2, TradeAction::Sell, dec!(10), 1),
            order(3, TradeAction::Sell, dec!(11), 0),
            order(4, TradeAction::Sell, dec!(0), 0),
            order(5, TradeAction::Buy, dec!(9), 0),
        ];
        let passed = HashSet::new();
        assert_eq!(best_ask(&orders, &passed).map(|t| t.id), Some(TradeId(2)));

        let passed = HashSet::from([TradeId(2)]);
        assert_eq!(best_ask(&orders, &passed).map(|t| t.id), Some(TradeId(1)));
    }

    #[test]
    fn test_best_bid_price_then_time() {
        let orders = vec![
            order(1, TradeAction::Buy, dec!(15), 0),
            order(2, TradeAction::Buy, dec!(16), 5),
            order(3, TradeAction::Buy, dec!(16), 3),
            order(4, TradeAction::Buy, dec!(0), 0),
        ];
        let passed = HashSet::new();
        assert_eq!(best_bid(&orders, &passed).map(|t| t.id), Some(TradeId(3)));
    }

    #[test]
    fn test_equal_timestamps_fall_back_to_id() {
        let orders = vec![
            order(7, TradeAction::Sell, dec!(10), 0),
            order(6, TradeAction::Sell, dec!(10), 0),
        ];
        let passed = HashSet::new();
        assert_eq!(best_ask(&orders, &passed).map(|t| t.id), Some(TradeId(6)));
    }

    #[test]
    fn test_unadmitted_and_terminal_orders_do_not_rest() {
        let mut pending = order(1, TradeAction::Sell, dec!(9), 0);
        pending.processed = false;
        let mut expired = order(2, TradeAction::Sell, dec!(9), 0);
        expired.status = TradeStatus::Expired;
        let mut partial = order(3, TradeAction::Sell, dec!(12), 0);
        partial.apply_fill(40, dec!(12));

        let orders = vec![pending, expired, partial];
        let passed = HashSet::new();
        assert_eq!(best_ask(&orders, &passed).map(|t| t.id), Some(TradeId(3)));
    }

    #[test]
    fn test_oldest_market_order() {
        let orders = vec![
            order(1, TradeAction::Buy, dec!(0), 4),
            order(2, TradeAction::Buy, dec!(15), 0),
            order(3, TradeAction::Buy, dec!(0), 2),
        ];
        let passed = HashSet::new();
        assert_eq!(
            oldest_market(&orders, TradeAction::Buy, &passed).map(|t| t.id),
            Some(TradeId(3))
        );
        assert!(oldest_market(&orders, TradeAction::Sell, &passed).is_none());
    }

    #[test]
    fn test_affordable_quantity_rounds_down_to_lots() {
        // Funds for exactly 150 units buy one lot
        assert_eq!(affordable_quantity(dec!(1500), dec!(10), 100), 100);
        assert_eq!(affordable_quantity(dec!(1999.99), dec!(10), 100), 100);
        assert_eq!(affordable_quantity(dec!(2000), dec!(10), 100), 200);
        assert_eq!(affordable_quantity(dec!(999), dec!(10), 100), 0);
    }

    #[test]
    fn test_affordable_quantity_degenerate_inputs() {
        assert_eq!(affordable_quantity(dec!(1000), dec!(0), 100), 0);
        assert_eq!(affordable_quantity(dec!(-5), dec!(10), 100), 0);
        assert_eq!(affordable_quantity(dec!(1000), dec!(10), 0), 0);
    }
}
