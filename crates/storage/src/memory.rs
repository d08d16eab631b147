//! In-memory ledger store implementation

use async_trait::async_trait;
use common::{
    Account, AccountId, Asset, AssetId, CustomerId, Portfolio, Stock, Trade, TradeAction, TradeId,
    TradeStatus, Transfer, TransferId,
};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::Display;
use std::hash::Hash;

use crate::error::{StorageError, StorageResult};
use crate::traits::{LedgerStore, UnitOfWork};

#[derive(Default)]
struct Tables {
    /// Keyed by id so scans come back in creation order
    trades: BTreeMap<TradeId, Trade>,
    accounts: HashMap<AccountId, Account>,
    assets: HashMap<(CustomerId, String), Asset>,
    portfolios: HashMap<CustomerId, Portfolio>,
    stocks: HashMap<String, Stock>,
    transfers: Vec<Transfer>,
    last_trade_id: u64,
    last_asset_id: u64,
}

/// Checks one entity's version against the stored row and rejects
/// duplicates within the same unit of work.
fn check_version<K: Eq + Hash + Display>(
    kind: &str,
    key: K,
    given: u64,
    stored: Option<u64>,
    seen: &mut HashSet<K>,
) -> StorageResult<()> {
    let expected = stored.unwrap_or(0);
    if given != expected {
        return Err(StorageError::Conflict(format!(
            "{} {} is at version {}, write was based on version {}",
            kind, key, expected, given
        )));
    }
    let label = key.to_string();
    if !seen.insert(key) {
        return Err(StorageError::Conflict(format!(
            "{} {} appears twice in one unit of work",
            kind, label
        )));
    }
    Ok(())
}

impl Tables {
    fn check(&self, work: &UnitOfWork) -> StorageResult<()> {
        let mut trade_ids = HashSet::new();
        for trade in &work.trades {
            if trade.id == TradeId::default() {
                if trade.version != 0 {
                    return Err(StorageError::Conflict(format!(
                        "unsaved trade carries version {}",
                        trade.version
                    )));
                }
                continue;
            }
            let stored = self.trades.get(&trade.id).map(|t| t.version);
            check_version("trade", trade.id, trade.version, stored, &mut trade_ids)?;
        }

        let mut account_ids = HashSet::new();
        for account in &work.accounts {
            let stored = self.accounts.get(&account.id).map(|a| a.version);
            check_version("account", account.id, account.version, stored, &mut account_ids)?;
        }

        let mut asset_keys = HashSet::new();
        for asset in &work.assets {
            let key = format!("{}/{}", asset.customer_id, asset.symbol);
            let stored = self
                .assets
                .get(&(asset.customer_id, asset.symbol.clone()))
                .map(|a| a.version);
            check_version("asset", key, asset.version, stored, &mut asset_keys)?;
        }

        let mut portfolio_keys = HashSet::new();
        for portfolio in &work.portfolios {
            let stored = self.portfolios.get(&portfolio.customer_id).map(|p| p.version);
            check_version(
                "portfolio of customer",
                portfolio.customer_id,
                portfolio.version,
                stored,
                &mut portfolio_keys,
            )?;
        }

        let mut symbols = HashSet::new();
        for stock in &work.stocks {
            let stored = self.stocks.get(&stock.symbol).map(|s| s.version);
            check_version("stock", stock.symbol.clone(), stock.version, stored, &mut symbols)?;
        }

        Ok(())
    }

    fn apply(&mut self, work: &mut UnitOfWork) {
        for trade in &mut work.trades {
            if trade.id == TradeId::default() {
                self.last_trade_id += 1;
                trade.id = TradeId(self.last_trade_id);
            } else {
                self.last_trade_id = self.last_trade_id.max(trade.id.0);
            }
            trade.version += 1;
            self.trades.insert(trade.id, trade.clone());
        }

        for account in &mut work.accounts {
            account.version += 1;
            self.accounts.insert(account.id, account.clone());
        }

        for asset in &mut work.assets {
            if asset.id == AssetId::default() {
                self.last_asset_id += 1;
                asset.id = AssetId(self.last_asset_id);
            }
            asset.version += 1;
            self.assets
                .insert((asset.customer_id, asset.symbol.clone()), asset.clone());
        }

        for portfolio in &mut work.portfolios {
            portfolio.version += 1;
            self.portfolios.insert(portfolio.customer_id, portfolio.clone());
        }

        for stock in &mut work.stocks {
            stock.version += 1;
            self.stocks.insert(stock.symbol.clone(), stock.clone());
        }

        for transfer in &mut work.transfers {
            transfer.id = TransferId(self.transfers.len() as u64 + 1);
            self.transfers.push(transfer.clone());
        }
    }

    fn scan<F>(&self, predicate: F) -> Vec<Trade>
    where
        F: Fn(&Trade) -> bool,
    {
        self.trades.values().filter(|t| predicate(t)).cloned().collect()
    }
}

/// In-memory ledger store for testing and development.
///
/// A single lock guards every table, so a commit is validated and applied
/// without any reader observing a partial unit of work.
pub struct InMemoryLedgerStore {
    tables: RwLock<Tables>,
}

impl InMemoryLedgerStore {
    /// Create a new in-memory ledger store
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
        }
    }

    /// Every transfer recorded so far, in creation order
    pub fn transfers(&self) -> Vec<Transfer> {
        self.tables.read().transfers.clone()
    }
}

impl Default for InMemoryLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn get_trade(&self, id: TradeId) -> StorageResult<Option<Trade>> {
        Ok(self.tables.read().trades.get(&id).cloned())
    }

    async fn find_trades_by_processed(&self, processed: bool) -> StorageResult<Vec<Trade>> {
        Ok(self.tables.read().scan(|t| t.processed == processed))
    }

    async fn find_trades_by_status(&self, statuses: &[TradeStatus]) -> StorageResult<Vec<Trade>> {
        Ok(self.tables.read().scan(|t| statuses.contains(&t.status)))
    }

    async fn find_trades(
        &self,
        action: TradeAction,
        symbol: &str,
        statuses: &[TradeStatus],
    ) -> StorageResult<Vec<Trade>> {
        Ok(self.tables.read().scan(|t| {
            t.action == action && t.symbol == symbol && statuses.contains(&t.status)
        }))
    }

    async fn find_market_trades(
        &self,
        action: TradeAction,
        symbol: &str,
        statuses: &[TradeStatus],
    ) -> StorageResult<Vec<Trade>> {
        Ok(self.tables.read().scan(|t| {
            t.action == action
                && t.symbol == symbol
                && t.is_market()
                && statuses.contains(&t.status)
        }))
    }

    async fn get_account(&self, id: AccountId) -> StorageResult<Option<Account>> {
        Ok(self.tables.read().accounts.get(&id).cloned())
    }

    async fn get_asset(&self, customer_id: CustomerId, symbol: &str) -> StorageResult<Option<Asset>> {
        Ok(self
            .tables
            .read()
            .assets
            .get(&(customer_id, symbol.to_string()))
            .cloned())
    }

    async fn get_portfolio(&self, customer_id: CustomerId) -> StorageResult<Option<Portfolio>> {
        Ok(self.tables.read().portfolios.get(&customer_id).cloned())
    }

    async fn get_stock(&self, symbol: &str) -> StorageResult<Option<Stock>> {
        Ok(self.tables.read().stocks.get(symbol).cloned())
    }

    async fn find_transfers(&self, account_id: AccountId) -> StorageResult<Vec<Transfer>> {
        Ok(self
            .tables
            .read()
            .transfers
            .iter()
            .filter(|t| t.from == Some(account_id) || t.to == Some(account_id))
            .cloned()
            .collect())
    }

    async fn commit(&self, mut work: UnitOfWork) -> StorageResult<UnitOfWork> {
        let mut tables = self.tables.write();
        tables.check(&work)?;
        tables.apply(&mut work);
        Ok(work)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn create_test_trade(action: TradeAction, price: rust_decimal::Decimal) -> Trade {
        Trade::new(action, "XYZ", 100, price, AccountId(1), CustomerId(1), Utc::now())
    }

    #[tokio::test]
    async fn test_save_and_get_trade() {
        let store = InMemoryLedgerStore::new();

        let saved = store
            .save_trade(create_test_trade(TradeAction::Buy, dec!(10)))
            .await
            .unwrap();
        assert_eq!(saved.id, TradeId(1));
        assert_eq!(saved.version, 1);

        let retrieved = store.get_trade(saved.id).await.unwrap();
        assert_eq!(retrieved, Some(saved));
    }

    #[tokio::test]
    async fn test_stale_version_rejected() {
        let store = InMemoryLedgerStore::new();
        let saved = store
            .save_trade(create_test_trade(TradeAction::Buy, dec!(10)))
            .await
            .unwrap();

        let mut first = saved.clone();
        first.processed = true;
        store.save_trade(first).await.unwrap();

        let mut stale = saved;
        stale.status = TradeStatus::Cancelled;
        let result = store.save_trade(stale).await;
        assert_matches!(result, Err(StorageError::Conflict(_)));

        let stored = store.get_trade(TradeId(1)).await.unwrap().unwrap();
        assert_eq!(stored.status, TradeStatus::Open);
        assert!(stored.processed);
    }

    #[tokio::test]
    async fn test_commit_is_all_or_nothing() {
        let store = InMemoryLedgerStore::new();
        store
            .save_account(Account::new(AccountId(1), CustomerId(1), dec!(1000)))
            .await
            .unwrap();

        // Second account entry is stale (version 0 against a stored row)
        let mut fresh = store.get_account(AccountId(1)).await.unwrap().unwrap();
        fresh.balance = dec!(500);
        let work = UnitOfWork::new()
            .stock(Stock::new("XYZ", dec!(10)))
            .account(Account::new(AccountId(1), CustomerId(1), dec!(1)))
            .transfer(Transfer::new(None, None, dec!(1), Utc::now()));

        assert_matches!(store.commit(work).await, Err(StorageError::Conflict(_)));
        assert!(store.get_stock("XYZ").await.unwrap().is_none());
        assert!(store.transfers().is_empty());
        assert_eq!(
            store.get_account(AccountId(1)).await.unwrap().unwrap().balance,
            dec!(1000)
        );

        store.save_account(fresh).await.unwrap();
        assert_eq!(
            store.get_account(AccountId(1)).await.unwrap().unwrap().balance,
            dec!(500)
        );
    }

    #[tokio::test]
    async fn test_duplicate_asset_rejected() {
        let store = InMemoryLedgerStore::new();
        store
            .save_asset(Asset::new(CustomerId(7), "XYZ", 100, dec!(10)))
            .await
            .unwrap();

        let result = store
            .save_asset(Asset::new(CustomerId(7), "XYZ", 50, dec!(12)))
            .await;
        assert_matches!(result, Err(StorageError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_find_market_trades() {
        let store = InMemoryLedgerStore::new();
        store.save_trade(create_test_trade(TradeAction::Sell, dec!(10))).await.unwrap();
        store.save_trade(create_test_trade(TradeAction::Sell, dec!(0))).await.unwrap();
        store.save_trade(create_test_trade(TradeAction::Buy, dec!(0))).await.unwrap();

        let market_sells = store
            .find_market_trades(TradeAction::Sell, "XYZ", &TradeStatus::LIVE)
            .await
            .unwrap();
        assert_eq!(market_sells.len(), 1);
        assert_eq!(market_sells[0].id, TradeId(2));

        let sells = store
            .find_trades(TradeAction::Sell, "XYZ", &TradeStatus::LIVE)
            .await
            .unwrap();
        assert_eq!(sells.len(), 2);

        let unprocessed = store.find_trades_by_processed(false).await.unwrap();
        assert_eq!(unprocessed.len(), 3);
    }

    #[tokio::test]
    async fn test_find_transfers() {
        let store = InMemoryLedgerStore::new();
        store
            .save_transfer(Transfer::new(Some(AccountId(1)), Some(AccountId(2)), dec!(5), Utc::now()))
            .await
            .unwrap();
        store
            .save_transfer(Transfer::new(Some(AccountId(3)), None, dec!(7), Utc::now()))
            .await
            .unwrap();

        assert_eq!(store.find_transfers(AccountId(2)).await.unwrap().len(), 1);
        assert_eq!(store.find_transfers(AccountId(3)).await.unwrap()[0].id, TransferId(2));
        assert!(store.find_transfers(AccountId(9)).await.unwrap().is_empty());
    }
}
