//! LedgerStore trait definition

use async_trait::async_trait;
use common::{
    Account, AccountId, Asset, CustomerId, Portfolio, Stock, Trade, TradeAction, TradeId,
    TradeStatus, Transfer,
};

use crate::error::{StorageError, StorageResult};

/// A set of entity writes applied atomically by [`LedgerStore::commit`].
///
/// Every entity carries the version it was read at. A commit succeeds only
/// if each version still matches the stored row (zero means "new row");
/// otherwise nothing is written and [`StorageError::Conflict`] is returned.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnitOfWork {
    pub trades: Vec<Trade>,
    pub accounts: Vec<Account>,
    pub assets: Vec<Asset>,
    pub portfolios: Vec<Portfolio>,
    pub stocks: Vec<Stock>,
    pub transfers: Vec<Transfer>,
}

impl UnitOfWork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trade(mut self, trade: Trade) -> Self {
        self.trades.push(trade);
        self
    }

    pub fn account(mut self, account: Account) -> Self {
        self.accounts.push(account);
        self
    }

    pub fn asset(mut self, asset: Asset) -> Self {
        self.assets.push(asset);
        self
    }

    pub fn portfolio(mut self, portfolio: Portfolio) -> Self {
        self.portfolios.push(portfolio);
        self
    }

    pub fn stock(mut self, stock: Stock) -> Self {
        self.stocks.push(stock);
        self
    }

    pub fn transfer(mut self, transfer: Transfer) -> Self {
        self.transfers.push(transfer);
        self
    }

    /// Committed copy of the trade with the given id
    pub fn find_trade(&self, id: TradeId) -> Option<&Trade> {
        self.trades.iter().find(|t| t.id == id)
    }
}

/// LedgerStore trait - the persistence interface of the ledger core
///
/// This trait allows different storage implementations (in-memory,
/// PostgreSQL) to be swapped without changing matching or settlement logic.
/// Lookups return `Ok(None)` for missing rows; deciding whether that is a
/// data-integrity violation is up to the caller.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    // ------------------------------------------------------------------------
    // Trades
    // ------------------------------------------------------------------------

    /// Get a trade by ID
    async fn get_trade(&self, id: TradeId) -> StorageResult<Option<Trade>>;

    /// Find trades by their `processed` flag
    async fn find_trades_by_processed(&self, processed: bool) -> StorageResult<Vec<Trade>>;

    /// Find trades whose status is in `statuses`
    async fn find_trades_by_status(&self, statuses: &[TradeStatus]) -> StorageResult<Vec<Trade>>;

    /// Find trades for one action and symbol whose status is in `statuses`
    async fn find_trades(
        &self,
        action: TradeAction,
        symbol: &str,
        statuses: &[TradeStatus],
    ) -> StorageResult<Vec<Trade>>;

    /// Find market trades (limit price zero) for one action and symbol
    async fn find_market_trades(
        &self,
        action: TradeAction,
        symbol: &str,
        statuses: &[TradeStatus],
    ) -> StorageResult<Vec<Trade>>;

    // ------------------------------------------------------------------------
    // Accounts, portfolios, instruments
    // ------------------------------------------------------------------------

    /// Get an account by ID
    async fn get_account(&self, id: AccountId) -> StorageResult<Option<Account>>;

    /// Get the asset a customer's portfolio holds for `symbol`
    async fn get_asset(&self, customer_id: CustomerId, symbol: &str) -> StorageResult<Option<Asset>>;

    /// Get a customer's portfolio
    async fn get_portfolio(&self, customer_id: CustomerId) -> StorageResult<Option<Portfolio>>;

    /// Get an instrument by symbol
    async fn get_stock(&self, symbol: &str) -> StorageResult<Option<Stock>>;

    /// Transfers sent or received by an account
    async fn find_transfers(&self, account_id: AccountId) -> StorageResult<Vec<Transfer>>;

    // ------------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------------

    /// Apply a unit of work atomically.
    ///
    /// Returns the committed rows with ids assigned and versions bumped.
    async fn commit(&self, work: UnitOfWork) -> StorageResult<UnitOfWork>;

    /// Save a single trade
    async fn save_trade(&self, trade: Trade) -> StorageResult<Trade> {
        let mut committed = self.commit(UnitOfWork::new().trade(trade)).await?;
        committed
            .trades
            .pop()
            .ok_or_else(|| StorageError::Backend("commit returned no trade".to_string()))
    }

    /// Save a single account
    async fn save_account(&self, account: Account) -> StorageResult<Account> {
        let mut committed = self.commit(UnitOfWork::new().account(account)).await?;
        committed
            .accounts
            .pop()
            .ok_or_else(|| StorageError::Backend("commit returned no account".to_string()))
    }

    /// Save a single asset
    async fn save_asset(&self, asset: Asset) -> StorageResult<Asset> {
        let mut committed = self.commit(UnitOfWork::new().asset(asset)).await?;
        committed
            .assets
            .pop()
            .ok_or_else(|| StorageError::Backend("commit returned no asset".to_string()))
    }

    /// Save a single portfolio
    async fn save_portfolio(&self, portfolio: Portfolio) -> StorageResult<Portfolio> {
        let mut committed = self.commit(UnitOfWork::new().portfolio(portfolio)).await?;
        committed
            .portfolios
            .pop()
            .ok_or_else(|| StorageError::Backend("commit returned no portfolio".to_string()))
    }

    /// Save a single stock
    async fn save_stock(&self, stock: Stock) -> StorageResult<Stock> {
        let mut committed = self.commit(UnitOfWork::new().stock(stock)).await?;
        committed
            .stocks
            .pop()
            .ok_or_else(|| StorageError::Backend("commit returned no stock".to_string()))
    }

    /// Append a transfer record
    async fn save_transfer(&self, transfer: Transfer) -> StorageResult<Transfer> {
        let mut committed = self.commit(UnitOfWork::new().transfer(transfer)).await?;
        committed
            .transfers
            .pop()
            .ok_or_else(|| StorageError::Backend("commit returned no transfer".to_string()))
    }
}
