//! Ledger entities used across the brokerage ledger
//!
//! This module provides the records the matching and settlement core
//! reads and mutates: trades (orders), accounts, portfolio assets,
//! portfolios, stocks and transfers. Cross references between entities
//! are plain identifiers resolved through the ledger store.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::money::{notional, weighted_average};

macro_rules! ledger_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }
    };
}

ledger_id!(
    /// Identifier of a trade (order). Zero until the store assigns one.
    TradeId
);
ledger_id!(
    /// Identifier of a cash account
    AccountId
);
ledger_id!(
    /// Identifier of a customer
    CustomerId
);
ledger_id!(
    /// Identifier of a portfolio asset row. Zero until the store assigns one.
    AssetId
);
ledger_id!(
    /// Identifier of a portfolio
    PortfolioId
);
ledger_id!(
    /// Identifier of a transfer record. Zero until the store assigns one.
    TransferId
);

impl AccountId {
    /// Sentinel account used by liquidity-provider orders
    pub const LIQUIDITY_PROVIDER: AccountId = AccountId(0);

    /// Returns true for the liquidity-provider sentinel
    pub fn is_liquidity_provider(&self) -> bool {
        *self == Self::LIQUIDITY_PROVIDER
    }
}

/// Buy or sell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeAction {
    Buy,
    Sell,
}

impl TradeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeAction::Buy => "buy",
            TradeAction::Sell => "sell",
        }
    }
}

impl std::fmt::Display for TradeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TradeAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "buy" => Ok(TradeAction::Buy),
            "sell" => Ok(TradeAction::Sell),
            other => Err(Error::invalid_input(format!("unknown trade action: {other:?}"))),
        }
    }
}

/// Trade (order) status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TradeStatus {
    /// Accepted, nothing filled yet
    Open,
    /// Some but not all of the quantity filled
    PartialFilled,
    /// Fully filled
    Filled,
    /// Expired at session close
    Expired,
    /// Cancelled by the customer
    Cancelled,
}

impl TradeStatus {
    /// Statuses of orders that can still receive fills
    pub const LIVE: [TradeStatus; 2] = [TradeStatus::Open, TradeStatus::PartialFilled];

    /// Returns true if the order can still receive fills
    pub fn is_live(&self) -> bool {
        matches!(self, TradeStatus::Open | TradeStatus::PartialFilled)
    }

    /// Returns true for filled, expired and cancelled
    pub fn is_terminal(&self) -> bool {
        !self.is_live()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Open => "open",
            TradeStatus::PartialFilled => "partial-filled",
            TradeStatus::Filled => "filled",
            TradeStatus::Expired => "expired",
            TradeStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TradeStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(TradeStatus::Open),
            "partial-filled" => Ok(TradeStatus::PartialFilled),
            "filled" => Ok(TradeStatus::Filled),
            "expired" => Ok(TradeStatus::Expired),
            "cancelled" => Ok(TradeStatus::Cancelled),
            other => Err(Error::invalid_input(format!("unknown trade status: {other:?}"))),
        }
    }
}

/// A customer order to buy or sell an instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: TradeId,
    pub action: TradeAction,
    pub symbol: String,
    /// Requested quantity
    pub quantity: u32,
    /// Buy limit price; zero for market buys and for sells
    pub bid: Decimal,
    /// Sell limit price; zero for market sells and for buys
    pub ask: Decimal,
    /// Running average fill price
    pub avg_price: Decimal,
    pub filled_quantity: u32,
    pub submitted_at: DateTime<Utc>,
    pub account_id: AccountId,
    pub customer_id: CustomerId,
    pub status: TradeStatus,
    /// Set once the order has entered a matching pass
    pub processed: bool,
    /// Funds held for a buy order
    pub amount_reserved: Decimal,
    /// Optimistic concurrency version, zero before the first commit
    pub version: u64,
}

impl Trade {
    /// Create a new open, unprocessed order.
    ///
    /// `price` is the limit price (bid for buys, ask for sells); zero makes
    /// it a market order.
    pub fn new(
        action: TradeAction,
        symbol: impl Into<String>,
        quantity: u32,
        price: Decimal,
        account_id: AccountId,
        customer_id: CustomerId,
        submitted_at: DateTime<Utc>,
    ) -> Self {
        let (bid, ask) = match action {
            TradeAction::Buy => (price, Decimal::ZERO),
            TradeAction::Sell => (Decimal::ZERO, price),
        };
        Self {
            id: TradeId::default(),
            action,
            symbol: symbol.into(),
            quantity,
            bid,
            ask,
            avg_price: Decimal::ZERO,
            filled_quantity: 0,
            submitted_at,
            account_id,
            customer_id,
            status: TradeStatus::Open,
            processed: false,
            amount_reserved: Decimal::ZERO,
            version: 0,
        }
    }

    /// Reserve funds for a buy order
    pub fn with_reserved(mut self, amount: Decimal) -> Self {
        self.amount_reserved = amount;
        self
    }

    /// The order's own limit price (bid for buys, ask for sells)
    pub fn limit_price(&self) -> Decimal {
        match self.action {
            TradeAction::Buy => self.bid,
            TradeAction::Sell => self.ask,
        }
    }

    /// Market orders carry a zero limit price
    pub fn is_market(&self) -> bool {
        self.limit_price().is_zero()
    }

    pub fn is_buy(&self) -> bool {
        self.action == TradeAction::Buy
    }

    pub fn is_filled(&self) -> bool {
        self.filled_quantity >= self.quantity
    }

    pub fn remaining_quantity(&self) -> u32 {
        self.quantity.saturating_sub(self.filled_quantity)
    }

    /// Reserved funds not yet spent on fills
    pub fn remaining_funds(&self) -> Decimal {
        self.amount_reserved - notional(self.avg_price, self.filled_quantity)
    }

    pub fn is_liquidity_provider(&self) -> bool {
        self.account_id.is_liquidity_provider()
    }

    /// Record one fill against this order and move its status forward
    pub fn apply_fill(&mut self, quantity: u32, price: Decimal) {
        self.avg_price = weighted_average(self.avg_price, self.filled_quantity, price, quantity);
        self.filled_quantity += quantity;
        self.status = if self.is_filled() {
            TradeStatus::Filled
        } else {
            TradeStatus::PartialFilled
        };
    }
}

/// A customer's cash account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub customer_id: CustomerId,
    /// Ledger truth
    pub balance: Decimal,
    /// Balance minus funds reserved by open buy orders
    pub available_balance: Decimal,
    pub version: u64,
}

impl Account {
    pub fn new(id: AccountId, customer_id: CustomerId, balance: Decimal) -> Self {
        Self {
            id,
            customer_id,
            balance,
            available_balance: balance,
            version: 0,
        }
    }
}

/// One instrument position inside a customer's portfolio
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub id: AssetId,
    /// Customer owning the portfolio this asset belongs to
    pub customer_id: CustomerId,
    pub symbol: String,
    pub quantity: u32,
    /// Quantity minus units reserved by open sell orders
    pub available_quantity: u32,
    /// Average cost basis
    pub avg_price: Decimal,
    pub version: u64,
}

impl Asset {
    pub fn new(customer_id: CustomerId, symbol: impl Into<String>, quantity: u32, avg_price: Decimal) -> Self {
        Self {
            id: AssetId::default(),
            customer_id,
            symbol: symbol.into(),
            quantity,
            available_quantity: quantity,
            avg_price,
            version: 0,
        }
    }
}

/// A customer's portfolio
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Portfolio {
    pub id: PortfolioId,
    pub customer_id: CustomerId,
    /// Cumulative realized gain or loss
    pub realized_gain_loss: Decimal,
    pub version: u64,
}

impl Portfolio {
    pub fn new(id: PortfolioId, customer_id: CustomerId) -> Self {
        Self {
            id,
            customer_id,
            realized_gain_loss: Decimal::ZERO,
            version: 0,
        }
    }
}

/// A tradable instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stock {
    pub symbol: String,
    pub last_price: Decimal,
    pub version: u64,
}

impl Stock {
    pub fn new(symbol: impl Into<String>, last_price: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            last_price,
            version: 0,
        }
    }
}

/// Immutable record of one funds movement.
///
/// `None` on either side stands for a non-ledger counterparty such as
/// a liquidity provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transfer {
    pub id: TransferId,
    pub from: Option<AccountId>,
    pub to: Option<AccountId>,
    pub amount: Decimal,
    pub created_at: DateTime<Utc>,
}

impl Transfer {
    pub fn new(
        from: Option<AccountId>,
        to: Option<AccountId>,
        amount: Decimal,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TransferId::default(),
            from,
            to,
            amount,
            created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn create_test_trade(action: TradeAction, price: Decimal, quantity: u32) -> Trade {
        Trade::new(
            action,
            "XYZ",
            quantity,
            price,
            AccountId(1),
            CustomerId(1),
            Utc::now(),
        )
    }

    #[test]
    fn test_trade_new() {
        let buy = create_test_trade(TradeAction::Buy, dec!(15.00), 200);
        assert_eq!(buy.status, TradeStatus::Open);
        assert!(!buy.processed);
        assert_eq!(buy.bid, dec!(15.00));
        assert_eq!(buy.ask, Decimal::ZERO);
        assert!(!buy.is_market());

        let sell = create_test_trade(TradeAction::Sell, Decimal::ZERO, 200);
        assert!(sell.is_market());
        assert_eq!(sell.limit_price(), Decimal::ZERO);
    }

    #[test]
    fn test_trade_apply_fill() {
        let mut trade = create_test_trade(TradeAction::Buy, dec!(15), 300);

        trade.apply_fill(100, dec!(14));
        assert_eq!(trade.filled_quantity, 100);
        assert_eq!(trade.status, TradeStatus::PartialFilled);
        assert_eq!(trade.avg_price, dec!(14));

        trade.apply_fill(200, dec!(15.5));
        assert_eq!(trade.filled_quantity, 300);
        assert_eq!(trade.status, TradeStatus::Filled);
        assert_eq!(trade.avg_price, dec!(15));
        assert_eq!(trade.remaining_quantity(), 0);
    }

    #[test]
    fn test_remaining_funds() {
        let mut trade = create_test_trade(TradeAction::Buy, Decimal::ZERO, 500)
            .with_reserved(dec!(1500));
        assert_eq!(trade.remaining_funds(), dec!(1500));

        trade.apply_fill(100, dec!(10));
        assert_eq!(trade.remaining_funds(), dec!(500));
    }

    #[test]
    fn test_status_liveness() {
        assert!(TradeStatus::Open.is_live());
        assert!(TradeStatus::PartialFilled.is_live());
        assert!(TradeStatus::Filled.is_terminal());
        assert!(TradeStatus::Expired.is_terminal());
        assert!(TradeStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_status_serde() {
        let json = serde_json::to_string(&TradeStatus::PartialFilled).unwrap();
        assert_eq!(json, "\"partial-filled\"");
        assert_eq!("partial-filled".parse::<TradeStatus>().unwrap(), TradeStatus::PartialFilled);
    }

    #[test]
    fn test_action_from_str() {
        assert_eq!("buy".parse::<TradeAction>().unwrap(), TradeAction::Buy);
        assert_eq!("SELL".parse::<TradeAction>().unwrap(), TradeAction::Sell);
        assert!("hold".parse::<TradeAction>().is_err());
    }

    #[test]
    fn test_liquidity_provider_sentinel() {
        let mut trade = create_test_trade(TradeAction::Sell, dec!(10), 100);
        assert!(!trade.is_liquidity_provider());
        trade.account_id = AccountId::LIQUIDITY_PROVIDER;
        assert!(trade.is_liquidity_provider());
    }
}
