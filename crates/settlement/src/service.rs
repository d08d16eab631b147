//! One-fill settlement between a buy and a sell order

use std::sync::Arc;

use common::money::{checked_notional, notional, weighted_average};
use common::{
    Account, AccountId, Asset, Clock, CustomerId, Decimal, Portfolio, Trade, TradeAction, TradeId,
    Transfer,
};
use storage::{LedgerStore, UnitOfWork};
use tracing::{debug, info};

use crate::error::SettlementError;
use crate::Result;

/// A fill that was settled and committed
#[derive(Debug, Clone, PartialEq)]
pub struct Fill {
    pub buy_id: TradeId,
    pub sell_id: TradeId,
    pub symbol: String,
    pub price: Decimal,
    pub quantity: u32,
    /// Audit record of the funds movement
    pub transfer: Transfer,
}

impl Fill {
    pub fn notional(&self) -> Decimal {
        notional(self.price, self.quantity)
    }
}

/// Result of one settlement attempt
#[derive(Debug, Clone, PartialEq)]
pub enum SettlementOutcome {
    Settled(Fill),
    /// Both orders belong to the same customer; nothing was written
    SelfTradeSkipped,
}

/// Settlement Service - applies fills to the ledger
pub struct SettlementService {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
}

impl SettlementService {
    /// Create a new SettlementService
    pub fn new(store: Arc<dyn LedgerStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Settle `quantity` units between `buy` and `sell` at `price`.
    ///
    /// On success both orders are replaced with their committed copies.
    /// On error neither the ledger nor the two orders are modified.
    pub async fn settle(
        &self,
        buy: &mut Trade,
        sell: &mut Trade,
        price: Decimal,
        quantity: u32,
    ) -> Result<SettlementOutcome> {
        if buy.customer_id == sell.customer_id {
            debug!(
                buy_id = %buy.id,
                sell_id = %sell.id,
                customer_id = %buy.customer_id,
                "Skipping self-trade"
            );
            return Ok(SettlementOutcome::SelfTradeSkipped);
        }

        Self::check_pair(buy, sell, quantity)?;

        let amount = checked_notional(price, quantity).ok_or_else(|| {
            SettlementError::InvalidFill(format!("{} x {} is out of range", quantity, price))
        })?;
        let mut work = UnitOfWork::new();

        // 1. Funds
        let buyer_account = self.load_account(buy.account_id).await?;
        let seller_account = self.load_account(sell.account_id).await?;
        let transfer = Transfer::new(
            buyer_account.as_ref().map(|a| a.id),
            seller_account.as_ref().map(|a| a.id),
            amount,
            self.clock.now(),
        );

        if let Some(mut account) = buyer_account {
            account.balance -= amount;
            // The reservation was taken at submission; only keep it within the balance
            account.available_balance = account.available_balance.min(account.balance);
            work = work.account(account);
        }
        if let Some(mut account) = seller_account {
            account.balance += amount;
            account.available_balance += amount;
            work = work.account(account);
        }
        work = work.transfer(transfer.clone());

        // 2. Seller position and realized gain/loss
        if !sell.is_liquidity_provider() {
            let mut portfolio = self.load_portfolio(sell.customer_id).await?;
            let mut asset = self.load_asset(sell.customer_id, &sell.symbol).await?;
            portfolio.realized_gain_loss += (price - asset.avg_price) * Decimal::from(quantity);
            asset.quantity = asset.quantity.saturating_sub(quantity);
            asset.available_quantity = asset.available_quantity.min(asset.quantity);
            work = work.portfolio(portfolio).asset(asset);
        }

        // 3. Buyer position
        if !buy.is_liquidity_provider() {
            self.load_portfolio(buy.customer_id).await?;
            let asset = match self.store.get_asset(buy.customer_id, &buy.symbol).await? {
                Some(mut asset) => {
                    asset.avg_price =
                        weighted_average(asset.avg_price, asset.quantity, price, quantity);
                    asset.quantity += quantity;
                    asset.available_quantity += quantity;
                    asset
                }
                None => Asset::new(buy.customer_id, buy.symbol.clone(), quantity, price),
            };
            work = work.asset(asset);
        }

        // 4. Instrument last price
        let mut stock = self
            .store
            .get_stock(&buy.symbol)
            .await?
            .ok_or_else(|| SettlementError::NotFound(format!("stock {}", buy.symbol)))?;
        stock.last_price = price;
        work = work.stock(stock);

        // 5. Both orders
        let mut filled_buy = buy.clone();
        filled_buy.apply_fill(quantity, price);
        let mut filled_sell = sell.clone();
        filled_sell.apply_fill(quantity, price);
        work = work.trade(filled_buy).trade(filled_sell);

        let committed = self.store.commit(work).await?;
        if let [committed_buy, committed_sell] = committed.trades.as_slice() {
            *buy = committed_buy.clone();
            *sell = committed_sell.clone();
        }
        let transfer = committed.transfers.first().cloned().unwrap_or(transfer);

        info!(
            buy_id = %buy.id,
            sell_id = %sell.id,
            symbol = %buy.symbol,
            %price,
            quantity,
            %amount,
            "Fill settled"
        );

        Ok(SettlementOutcome::Settled(Fill {
            buy_id: buy.id,
            sell_id: sell.id,
            symbol: buy.symbol.clone(),
            price,
            quantity,
            transfer,
        }))
    }

    fn check_pair(buy: &Trade, sell: &Trade, quantity: u32) -> Result<()> {
        if buy.action != TradeAction::Buy || sell.action != TradeAction::Sell {
            return Err(SettlementError::InvalidFill(format!(
                "trade {} must buy and trade {} must sell",
                buy.id, sell.id
            )));
        }
        if buy.symbol != sell.symbol {
            return Err(SettlementError::InvalidFill(format!(
                "symbol mismatch: {} vs {}",
                buy.symbol, sell.symbol
            )));
        }
        if buy.status.is_terminal() || sell.status.is_terminal() {
            return Err(SettlementError::InvalidFill(format!(
                "trade {} or {} is already terminal",
                buy.id, sell.id
            )));
        }
        if quantity == 0
            || quantity > buy.remaining_quantity()
            || quantity > sell.remaining_quantity()
        {
            return Err(SettlementError::InvalidFill(format!(
                "quantity {} exceeds what trades {} and {} have left",
                quantity, buy.id, sell.id
            )));
        }
        Ok(())
    }

    /// Liquidity-provider legs have no ledger account
    async fn load_account(&self, id: AccountId) -> Result<Option<Account>> {
        if id.is_liquidity_provider() {
            return Ok(None);
        }
        self.store
            .get_account(id)
            .await?
            .map(Some)
            .ok_or_else(|| SettlementError::NotFound(format!("account {}", id)))
    }

    async fn load_portfolio(&self, customer_id: CustomerId) -> Result<Portfolio> {
        self.store
            .get_portfolio(customer_id)
            .await?
            .ok_or_else(|| SettlementError::NotFound(format!("portfolio of customer {}", customer_id)))
    }

    async fn load_asset(&self, customer_id: CustomerId, symbol: &str) -> Result<Asset> {
        self.store
            .get_asset(customer_id, symbol)
            .await?
            .ok_or_else(|| {
                SettlementError::NotFound(format!("asset {} of customer {}", symbol, customer_id))
            })
    }
}
