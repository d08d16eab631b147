//! Order Manager - submission and cancellation surface
//!
//! Submission validates the request, reserves funds (buy) or units (sell),
//! stores the order unprocessed and then passes it through the admission
//! gate.

use std::str::FromStr;
use std::sync::Arc;

use common::money::checked_notional;
use common::{CustomerId, Decimal, Trade, TradeAction, TradeId};
use observability::LedgerMetrics;
use storage::{LedgerStore, UnitOfWork};
use tracing::{info, warn};

use crate::error::{OmsError, Result};
use crate::lifecycle::Lifecycle;
use crate::types::OrderRequest;

/// Order Manager - handles order lifecycle requests
pub struct OrderManager {
    store: Arc<dyn LedgerStore>,
    lifecycle: Arc<Lifecycle>,
    metrics: LedgerMetrics,
}

impl OrderManager {
    pub fn new(store: Arc<dyn LedgerStore>, lifecycle: Arc<Lifecycle>) -> Self {
        Self {
            store,
            lifecycle,
            metrics: LedgerMetrics::new(),
        }
    }

    /// Submit a new order
    ///
    /// Flow:
    /// 1. Validate the request
    /// 2. Reserve funds or units and store the order `open`, unprocessed
    /// 3. Run the admission gate: match now inside the session, defer
    ///    otherwise
    ///
    /// A matching failure after the order is stored does not reject the
    /// submission; the order stays unprocessed for the next admission
    /// batch.
    pub async fn submit_order(&self, request: OrderRequest) -> Result<Trade> {
        let order = match self.place(&request).await {
            Ok(order) => order,
            Err(e) => {
                self.metrics.record_rejection(e.reason_code());
                warn!(
                    customer_id = %request.customer_id,
                    symbol = %request.symbol,
                    reason = e.reason_code(),
                    error = %e,
                    "Order rejected"
                );
                return Err(e);
            }
        };
        self.metrics.record_orders("submitted", 1);
        info!(
            trade_id = %order.id,
            customer_id = %order.customer_id,
            action = %order.action,
            symbol = %order.symbol,
            quantity = order.quantity,
            price = %order.limit_price(),
            reserved = %order.amount_reserved,
            "Order submitted"
        );

        let id = order.id;
        match self.lifecycle.admit(order.clone()).await {
            Ok(admission) => Ok(admission.order().clone()),
            Err(e) => {
                warn!(trade_id = %id, error = %e, "Matching at submission failed, order left for the next batch");
                Ok(self.store.get_trade(id).await?.unwrap_or(order))
            }
        }
    }

    async fn place(&self, request: &OrderRequest) -> Result<Trade> {
        let action = TradeAction::from_str(&request.action)
            .map_err(|e| OmsError::InvalidOrder(e.to_string()))?;
        if request.quantity == 0 {
            return Err(OmsError::InvalidOrder("quantity must be positive".to_string()));
        }
        if request.price.is_sign_negative() {
            return Err(OmsError::InvalidOrder(format!(
                "price must not be negative: {}",
                request.price
            )));
        }
        let stock = self
            .store
            .get_stock(&request.symbol)
            .await?
            .ok_or_else(|| OmsError::InvalidOrder(format!("unknown symbol '{}'", request.symbol)))?;

        let mut account = self
            .store
            .get_account(request.account_id)
            .await?
            .ok_or_else(|| OmsError::NotFound(format!("account {}", request.account_id)))?;
        if account.customer_id != request.customer_id {
            return Err(OmsError::InvalidOrder(format!(
                "account {} does not belong to customer {}",
                request.account_id, request.customer_id
            )));
        }

        let now = self.lifecycle.clock().now();
        let trade = Trade::new(
            action,
            &request.symbol,
            request.quantity,
            request.price,
            request.account_id,
            request.customer_id,
            now,
        );
        let value = |unit_price: Decimal| {
            checked_notional(unit_price, request.quantity)
                .ok_or_else(|| OmsError::InvalidOrder("order value out of range".to_string()))
        };

        let work = match action {
            TradeAction::Buy => {
                let unit_price = if request.price.is_zero() {
                    stock.last_price
                } else {
                    request.price
                };
                let reserve = value(unit_price)?;
                if account.available_balance < reserve {
                    return Err(OmsError::InsufficientFunds(format!(
                        "account {} has {} available, order needs {}",
                        account.id, account.available_balance, reserve
                    )));
                }
                account.available_balance -= reserve;
                UnitOfWork::new().account(account).trade(trade.with_reserved(reserve))
            }
            TradeAction::Sell => {
                value(request.price)?;
                let mut asset = self
                    .store
                    .get_asset(request.customer_id, &request.symbol)
                    .await?
                    .ok_or_else(|| {
                        OmsError::InsufficientQuantity(format!(
                            "customer {} holds no {}",
                            request.customer_id, request.symbol
                        ))
                    })?;
                if asset.available_quantity < request.quantity {
                    return Err(OmsError::InsufficientQuantity(format!(
                        "{} of {} available, order needs {}",
                        asset.available_quantity, request.symbol, request.quantity
                    )));
                }
                asset.available_quantity -= request.quantity;
                UnitOfWork::new().asset(asset).trade(trade)
            }
        };

        let committed = self.store.commit(work).await?;
        committed
            .trades
            .into_iter()
            .next()
            .ok_or_else(|| OmsError::NotFound("submitted trade missing from commit".to_string()))
    }

    /// Cancel an order; only the customer who placed it may do so
    pub async fn cancel_order(&self, id: TradeId, customer_id: CustomerId) -> Result<Trade> {
        self.lifecycle.cancel(id, customer_id).await.map_err(|e| {
            self.metrics.record_rejection(e.reason_code());
            warn!(trade_id = %id, customer_id = %customer_id, reason = e.reason_code(), "Cancellation rejected");
            e
        })
    }

    pub async fn get_order(&self, id: TradeId) -> Result<Trade> {
        self.store
            .get_trade(id)
            .await?
            .ok_or_else(|| OmsError::NotFound(format!("trade {}", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::TradingCalendar;
    use assert_matches::assert_matches;
    use chrono::{DateTime, TimeZone, Utc};
    use common::{Account, AccountId, Asset, FixedClock, Portfolio, PortfolioId, Stock, TradeStatus};
    use matching_engine::MatchingEngine;
    use rust_decimal_macros::dec;
    use storage::InMemoryLedgerStore;

    fn monday_at(hour_utc: u32) -> DateTime<Utc> {
        // UTC+8 venue: 02:00 UTC is 10:00 local, 12:00 UTC is 20:00 local
        Utc.with_ymd_and_hms(2024, 3, 4, hour_utc, 0, 0).unwrap()
    }

    async fn manager(now: DateTime<Utc>) -> (Arc<InMemoryLedgerStore>, OrderManager) {
        let store = Arc::new(InMemoryLedgerStore::new());
        for id in 1..=2u64 {
            store
                .save_account(Account::new(AccountId(id), CustomerId(id), dec!(5000)))
                .await
                .unwrap();
            store
                .save_portfolio(Portfolio::new(PortfolioId(id), CustomerId(id)))
                .await
                .unwrap();
        }
        store
            .save_asset(Asset::new(CustomerId(2), "XYZ", 500, dec!(12)))
            .await
            .unwrap();
        store.save_stock(Stock::new("XYZ", dec!(14))).await.unwrap();

        let clock = Arc::new(FixedClock::new(now));
        let engine = MatchingEngine::new(store.clone(), clock.clone());
        let lifecycle = Arc::new(Lifecycle::new(
            store.clone(),
            engine,
            TradingCalendar::standard(),
            clock,
        ));
        (store.clone(), OrderManager::new(store, lifecycle))
    }

    fn buy(quantity: u32, price: Decimal) -> OrderRequest {
        OrderRequest::new(CustomerId(1), AccountId(1), TradeAction::Buy, "XYZ", quantity, price)
    }

    fn sell(quantity: u32, price: Decimal) -> OrderRequest {
        OrderRequest::new(CustomerId(2), AccountId(2), TradeAction::Sell, "XYZ", quantity, price)
    }

    #[tokio::test]
    async fn test_submit_buy_reserves_funds() {
        let (store, manager) = manager(monday_at(12)).await;

        let order = manager.submit_order(buy(100, dec!(15))).await.unwrap();

        assert_eq!(order.status, TradeStatus::Open);
        assert!(!order.processed);
        assert_eq!(order.amount_reserved, dec!(1500));
        let account = store.get_account(AccountId(1)).await.unwrap().unwrap();
        assert_eq!(account.available_balance, dec!(3500));
        assert_eq!(account.balance, dec!(5000));
    }

    #[tokio::test]
    async fn test_submit_market_buy_reserves_at_last_price() {
        let (_, manager) = manager(monday_at(12)).await;

        let order = manager.submit_order(buy(100, dec!(0))).await.unwrap();

        assert!(order.is_market());
        assert_eq!(order.amount_reserved, dec!(1400));
    }

    #[tokio::test]
    async fn test_submit_sell_reserves_units() {
        let (store, manager) = manager(monday_at(12)).await;

        manager.submit_order(sell(200, dec!(20))).await.unwrap();

        let asset = store.get_asset(CustomerId(2), "XYZ").await.unwrap().unwrap();
        assert_eq!((asset.quantity, asset.available_quantity), (500, 300));
    }

    #[tokio::test]
    async fn test_submit_rejections() {
        let (_, manager) = manager(monday_at(12)).await;

        assert_matches!(manager.submit_order(buy(0, dec!(15))).await, Err(OmsError::InvalidOrder(_)));
        assert_matches!(manager.submit_order(buy(10, dec!(-1))).await, Err(OmsError::InvalidOrder(_)));
        let mut bad_action = buy(10, dec!(15));
        bad_action.action = "hold".to_string();
        assert_matches!(manager.submit_order(bad_action).await, Err(OmsError::InvalidOrder(_)));
        let mut unknown = buy(10, dec!(15));
        unknown.symbol = "NOPE".to_string();
        assert_matches!(manager.submit_order(unknown).await, Err(OmsError::InvalidOrder(_)));
        let mut foreign = buy(10, dec!(15));
        foreign.account_id = AccountId(2);
        assert_matches!(manager.submit_order(foreign).await, Err(OmsError::InvalidOrder(_)));
        assert_matches!(
            manager.submit_order(buy(1000, dec!(15))).await,
            Err(OmsError::InsufficientFunds(_))
        );
        assert_matches!(
            manager.submit_order(sell(501, dec!(15))).await,
            Err(OmsError::InsufficientQuantity(_))
        );
    }

    #[tokio::test]
    async fn test_submit_rejects_order_value_out_of_range() {
        let (store, manager) = manager(monday_at(12)).await;
        let huge = Decimal::MAX / dec!(2);

        assert_matches!(
            manager.submit_order(buy(u32::MAX, huge)).await,
            Err(OmsError::InvalidOrder(ref reason)) if reason.contains("out of range")
        );
        assert_matches!(
            manager.submit_order(sell(4, huge)).await,
            Err(OmsError::InvalidOrder(_))
        );

        let account = store.get_account(AccountId(1)).await.unwrap().unwrap();
        assert_eq!(account.available_balance, dec!(5000));
        let asset = store.get_asset(CustomerId(2), "XYZ").await.unwrap().unwrap();
        assert_eq!(asset.available_quantity, 500);
    }

    #[tokio::test]
    async fn test_submit_inside_session_matches_immediately() {
        let (store, manager) = manager(monday_at(2)).await;

        let resting = manager.submit_order(sell(100, dec!(14))).await.unwrap();
        assert!(resting.processed);
        let order = manager.submit_order(buy(100, dec!(15))).await.unwrap();

        assert_eq!(order.status, TradeStatus::Filled);
        assert_eq!(order.avg_price, dec!(14));
        let seller = store.get_account(AccountId(2)).await.unwrap().unwrap();
        assert_eq!(seller.balance, dec!(6400));
    }

    #[tokio::test]
    async fn test_cancel_order_releases_funds() {
        let (store, manager) = manager(monday_at(12)).await;
        let order = manager.submit_order(buy(100, dec!(15))).await.unwrap();

        assert_matches!(
            manager.cancel_order(order.id, CustomerId(2)).await,
            Err(OmsError::NotOwner(_))
        );
        let cancelled = manager.cancel_order(order.id, CustomerId(1)).await.unwrap();

        assert_eq!(cancelled.status, TradeStatus::Cancelled);
        let account = store.get_account(AccountId(1)).await.unwrap().unwrap();
        assert_eq!(account.available_balance, dec!(5000));
        assert_eq!(manager.get_order(order.id).await.unwrap(), cancelled);
    }
}
