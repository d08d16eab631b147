//! Order lifecycle domain types

use common::{AccountId, CustomerId, Decimal, TradeAction};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A customer's request to place an order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub customer_id: CustomerId,
    /// Cash account funding a buy (and credited by a sell)
    pub account_id: AccountId,
    /// "buy" or "sell"
    pub action: String,
    pub symbol: String,
    pub quantity: u32,
    /// Limit price; zero for a market order
    pub price: Decimal,
}

impl OrderRequest {
    pub fn new(
        customer_id: CustomerId,
        account_id: AccountId,
        action: TradeAction,
        symbol: impl Into<String>,
        quantity: u32,
        price: Decimal,
    ) -> Self {
        Self {
            customer_id,
            account_id,
            action: action.as_str().to_string(),
            symbol: symbol.into(),
            quantity,
            price,
        }
    }
}

/// Which scheduled batch a report belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchKind {
    /// Session open: match the backlog of unprocessed orders
    Admission,
    /// Session close: expire every live order
    Expiry,
}

impl BatchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchKind::Admission => "admission",
            BatchKind::Expiry => "expiry",
        }
    }
}

impl fmt::Display for BatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BatchKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "admission" => Ok(BatchKind::Admission),
            "expiry" => Ok(BatchKind::Expiry),
            other => Err(format!("unknown batch: {}", other)),
        }
    }
}

/// Outcome counts of one batch run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub batch: BatchKind,
    /// Orders the batch looked at
    pub examined: usize,
    /// Orders that went through a matching pass
    pub admitted: usize,
    /// Orders moved to `expired`
    pub expired: usize,
    /// Orders left unprocessed because the session was closed
    pub deferred: usize,
    /// Orders exempt from this batch (liquidity provider, already terminal)
    pub skipped: usize,
    /// Orders whose step failed and were left as they were
    pub failed: usize,
    /// Fills settled during the batch
    pub fills: usize,
}

impl BatchReport {
    pub fn new(batch: BatchKind) -> Self {
        Self {
            batch,
            examined: 0,
            admitted: 0,
            expired: 0,
            deferred: 0,
            skipped: 0,
            failed: 0,
            fills: 0,
        }
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} batch: examined={} admitted={} expired={} deferred={} skipped={} failed={} fills={}",
            self.batch,
            self.examined,
            self.admitted,
            self.expired,
            self.deferred,
            self.skipped,
            self.failed,
            self.fills
        )
    }
}

/// What the admission gate did with one order
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// Matched; the order as committed afterwards and the number of fills
    Matched { order: common::Trade, fills: usize },
    /// Session closed; the order waits for the next admission batch
    Deferred(common::Trade),
}

impl Admission {
    pub fn order(&self) -> &common::Trade {
        match self {
            Admission::Matched { order, .. } => order,
            Admission::Deferred(order) => order,
        }
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, Admission::Deferred(_))
    }
}
