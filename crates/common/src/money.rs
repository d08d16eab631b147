//! Decimal helpers shared by settlement and order bookkeeping

use rust_decimal::Decimal;

/// Quantity-weighted average of two (price, quantity) pairs.
///
/// Returns `Decimal::ZERO` when both quantities are zero.
pub fn weighted_average(price1: Decimal, qty1: u32, price2: Decimal, qty2: u32) -> Decimal {
    let total = qty1 as u64 + qty2 as u64;
    if total == 0 {
        return Decimal::ZERO;
    }
    (price1 * Decimal::from(qty1) + price2 * Decimal::from(qty2)) / Decimal::from(total)
}

/// Notional value of `quantity` units at `price`
pub fn notional(price: Decimal, quantity: u32) -> Decimal {
    price * Decimal::from(quantity)
}

/// Notional value, or `None` when it does not fit in a `Decimal`
pub fn checked_notional(price: Decimal, quantity: u32) -> Option<Decimal> {
    price.checked_mul(Decimal::from(quantity))
}
