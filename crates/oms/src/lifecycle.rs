//! Order lifecycle: admission gate, session batches and cancellation
//!
//! Matching is strictly sequential. The admission gate and both batches
//! run under one async mutex, so a batch never overlaps another batch or
//! a submit-time match. Cancellation does not take the mutex; it relies on
//! the store's optimistic versions to lose or win a race cleanly.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use common::{Clock, CustomerId, Trade, TradeAction, TradeId, TradeStatus};
use matching_engine::MatchingEngine;
use observability::LedgerMetrics;
use storage::{LedgerStore, StorageError, UnitOfWork};
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use crate::calendar::TradingCalendar;
use crate::error::{OmsError, Result};
use crate::types::{Admission, BatchKind, BatchReport};

/// Reload-and-retry attempts for a single status write that hits a
/// version conflict
const MAX_WRITE_ATTEMPTS: u32 = 3;

pub struct Lifecycle {
    store: Arc<dyn LedgerStore>,
    engine: MatchingEngine,
    calendar: TradingCalendar,
    clock: Arc<dyn Clock>,
    metrics: LedgerMetrics,
    gate: Mutex<()>,
}

impl Lifecycle {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        engine: MatchingEngine,
        calendar: TradingCalendar,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            engine,
            calendar,
            clock,
            metrics: LedgerMetrics::new(),
            gate: Mutex::new(()),
        }
    }

    pub fn calendar(&self) -> &TradingCalendar {
        &self.calendar
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Admission gate for a freshly stored order, evaluated at the
    /// current time.
    ///
    /// Inside the session the order is matched and marked processed,
    /// whether or not it filled. Outside the session it is left
    /// unprocessed for the next admission batch.
    pub async fn admit(&self, order: Trade) -> Result<Admission> {
        let _guard = self.gate.lock().await;
        let now = self.clock.now();
        self.admit_at(order, now).await
    }

    async fn admit_at(&self, order: Trade, at: DateTime<Utc>) -> Result<Admission> {
        if !self.calendar.is_open(at) {
            debug!(
                trade_id = %order.id,
                at = %self.calendar.local(at),
                "Outside the trading session, deferring"
            );
            self.metrics.record_orders("deferred", 1);
            return Ok(Admission::Deferred(order));
        }

        let result = self.engine.match_order(order).await?;
        let fills = result.fills.len();
        let order = self.mark_processed(result.order).await?;
        self.metrics.record_orders("admitted", 1);

        info!(
            trade_id = %order.id,
            fills,
            filled = order.filled_quantity,
            status = %order.status,
            "Order admitted"
        );
        Ok(Admission::Matched { order, fills })
    }

    async fn mark_processed(&self, mut order: Trade) -> Result<Trade> {
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            order.processed = true;
            match self.store.save_trade(order.clone()).await {
                Ok(saved) => return Ok(saved),
                Err(StorageError::Conflict(msg)) => {
                    warn!(trade_id = %order.id, attempt, %msg, "Conflict marking order processed");
                    order = self.load(order.id).await?;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(StorageError::Conflict(format!(
            "trade {} kept changing while being marked processed",
            order.id
        ))
        .into())
    }

    /// Admission batch evaluated at the current time
    pub async fn run_admission_batch(&self) -> Result<BatchReport> {
        let now = self.clock.now();
        self.run_admission_batch_at(now).await
    }

    /// Match every unprocessed order in submission order, as of `at`.
    ///
    /// A failing order is logged, counted and left unprocessed for the
    /// next batch; the batch carries on with the following order.
    #[instrument(skip(self), fields(batch = "admission"))]
    pub async fn run_admission_batch_at(&self, at: DateTime<Utc>) -> Result<BatchReport> {
        let _guard = self.gate.lock().await;
        let started = Instant::now();
        let mut report = BatchReport::new(BatchKind::Admission);

        let mut pending = self.store.find_trades_by_processed(false).await?;
        pending.sort_by(|a, b| {
            a.submitted_at
                .cmp(&b.submitted_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        info!(pending = pending.len(), "Running admission batch");

        for order in pending {
            report.examined += 1;
            if !order.status.is_live() {
                report.skipped += 1;
                continue;
            }
            let id = order.id;
            match self.admit_at(order, at).await {
                Ok(Admission::Matched { fills, .. }) => {
                    report.admitted += 1;
                    report.fills += fills;
                }
                Ok(Admission::Deferred(_)) => report.deferred += 1,
                Err(e) => {
                    report.failed += 1;
                    error!(trade_id = %id, error = %e, "Admission failed, order kept for the next batch");
                }
            }
        }

        self.finish(&report, started);
        Ok(report)
    }

    /// Expire every live order except liquidity-provider orders,
    /// releasing what each one still holds.
    ///
    /// Running it again finds nothing left to expire.
    #[instrument(skip(self), fields(batch = "expiry"))]
    pub async fn run_expiry_batch(&self) -> Result<BatchReport> {
        let _guard = self.gate.lock().await;
        let started = Instant::now();
        let mut report = BatchReport::new(BatchKind::Expiry);

        let live = self.store.find_trades_by_status(&TradeStatus::LIVE).await?;
        info!(live = live.len(), "Running expiry batch");

        for order in live {
            report.examined += 1;
            if order.is_liquidity_provider() {
                report.skipped += 1;
                continue;
            }
            match self.release(order.id, TradeStatus::Expired).await {
                Ok(Some(expired)) => {
                    report.expired += 1;
                    debug!(trade_id = %expired.id, action = %expired.action, "Order expired");
                }
                Ok(None) => report.skipped += 1,
                Err(e) => {
                    report.failed += 1;
                    error!(trade_id = %order.id, error = %e, "Expiry failed, order left live");
                }
            }
        }

        self.metrics.record_orders("expired", report.expired as u64);
        self.finish(&report, started);
        Ok(report)
    }

    /// Cancel a live order on behalf of the customer who placed it
    pub async fn cancel(&self, id: TradeId, customer_id: CustomerId) -> Result<Trade> {
        let order = self.load(id).await?;
        if order.customer_id != customer_id {
            return Err(OmsError::NotOwner(id));
        }
        if order.status.is_terminal() {
            return Err(OmsError::NotCancellable(format!("trade {} is {}", id, order.status)));
        }

        let cancelled = self
            .release(id, TradeStatus::Cancelled)
            .await?
            .ok_or_else(|| OmsError::NotCancellable(format!("trade {} finished meanwhile", id)))?;

        self.metrics.record_orders("cancelled", 1);
        info!(trade_id = %id, customer_id = %customer_id, "Order cancelled");
        Ok(cancelled)
    }

    /// Move a live order to `status` and hand back what it reserved: a buy
    /// resets the account's available balance to its balance, a sell
    /// returns its unfilled quantity to the asset.
    ///
    /// Returns `None` when the order is already terminal.
    async fn release(&self, id: TradeId, status: TradeStatus) -> Result<Option<Trade>> {
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let mut order = self.load(id).await?;
            if order.status.is_terminal() {
                return Ok(None);
            }

            let work = match order.action {
                TradeAction::Buy => {
                    let mut account = self
                        .store
                        .get_account(order.account_id)
                        .await?
                        .ok_or_else(|| {
                            OmsError::NotFound(format!("account {}", order.account_id))
                        })?;
                    account.available_balance = account.balance;
                    UnitOfWork::new().account(account)
                }
                TradeAction::Sell => {
                    let mut asset = self
                        .store
                        .get_asset(order.customer_id, &order.symbol)
                        .await?
                        .ok_or_else(|| {
                            OmsError::NotFound(format!(
                                "asset {} of customer {}",
                                order.symbol, order.customer_id
                            ))
                        })?;
                    asset.available_quantity = asset
                        .available_quantity
                        .saturating_add(order.remaining_quantity())
                        .min(asset.quantity);
                    UnitOfWork::new().asset(asset)
                }
            };

            order.status = status;
            match self.store.commit(work.trade(order)).await {
                Ok(committed) => return Ok(committed.find_trade(id).cloned()),
                Err(StorageError::Conflict(msg)) => {
                    warn!(trade_id = %id, attempt, %msg, "Conflict releasing order, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(StorageError::Conflict(format!("trade {} kept changing while being released", id)).into())
    }

    async fn load(&self, id: TradeId) -> Result<Trade> {
        self.store
            .get_trade(id)
            .await?
            .ok_or_else(|| OmsError::NotFound(format!("trade {}", id)))
    }

    fn finish(&self, report: &BatchReport, started: Instant) {
        self.metrics.record_batch(
            report.batch.as_str(),
            started.elapsed(),
            report.examined,
            report.failed,
        );
        info!(%report, elapsed_ms = started.elapsed().as_millis() as u64, "Batch finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::{Duration, FixedOffset, TimeZone};
    use common::{Account, AccountId, Asset, FixedClock, Portfolio, PortfolioId, Stock};
    use rust_decimal_macros::dec;
    use storage::InMemoryLedgerStore;

    /// Venue local time on Monday 4 March 2024 at UTC+8
    fn monday(hour: u32, minute: u32) -> DateTime<Utc> {
        FixedOffset::east_opt(8 * 3600)
            .unwrap()
            .with_ymd_and_hms(2024, 3, 4, hour, minute, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    struct Harness {
        store: Arc<InMemoryLedgerStore>,
        clock: Arc<FixedClock>,
        lifecycle: Lifecycle,
    }

    async fn harness(now: DateTime<Utc>) -> Harness {
        let store = Arc::new(InMemoryLedgerStore::new());
        for id in 1..=3u64 {
            store
                .save_account(Account::new(AccountId(id), CustomerId(id), dec!(10000)))
                .await
                .unwrap();
            store
                .save_portfolio(Portfolio::new(PortfolioId(id), CustomerId(id)))
                .await
                .unwrap();
            store
                .save_asset(Asset::new(CustomerId(id), "XYZ", 1000, dec!(10)))
                .await
                .unwrap();
        }
        store.save_stock(Stock::new("XYZ", dec!(14))).await.unwrap();

        let clock = Arc::new(FixedClock::new(now));
        let engine = MatchingEngine::new(store.clone(), clock.clone());
        let lifecycle = Lifecycle::new(
            store.clone(),
            engine,
            TradingCalendar::standard(),
            clock.clone(),
        );
        Harness {
            store,
            clock,
            lifecycle,
        }
    }

    /// Store an unprocessed order, reserving what a submission would
    async fn place(
        store: &InMemoryLedgerStore,
        action: TradeAction,
        customer: u64,
        quantity: u32,
        price: common::Decimal,
        at: DateTime<Utc>,
    ) -> Trade {
        let trade = Trade::new(
            action,
            "XYZ",
            quantity,
            price,
            AccountId(customer),
            CustomerId(customer),
            at,
        );
        let amount = price * common::Decimal::from(quantity);
        match action {
            TradeAction::Buy => {
                let mut account = store.get_account(AccountId(customer)).await.unwrap().unwrap();
                account.available_balance -= amount;
                store.save_account(account).await.unwrap();
                store.save_trade(trade.with_reserved(amount)).await.unwrap()
            }
            TradeAction::Sell => {
                let mut asset = store.get_asset(CustomerId(customer), "XYZ").await.unwrap().unwrap();
                asset.available_quantity -= quantity;
                store.save_asset(asset).await.unwrap();
                store.save_trade(trade).await.unwrap()
            }
        }
    }

    #[tokio::test]
    async fn test_admit_outside_session_defers() {
        let h = harness(monday(8, 30)).await;
        let buy = place(&h.store, TradeAction::Buy, 1, 100, dec!(15), monday(8, 30)).await;

        let admission = h.lifecycle.admit(buy.clone()).await.unwrap();

        assert!(admission.is_deferred());
        let stored = h.store.get_trade(buy.id).await.unwrap().unwrap();
        assert!(!stored.processed);
        assert_eq!(stored.status, TradeStatus::Open);
    }

    #[tokio::test]
    async fn test_admit_inside_session_marks_processed_without_fill() {
        let h = harness(monday(10, 0)).await;
        let buy = place(&h.store, TradeAction::Buy, 1, 100, dec!(15), monday(10, 0)).await;

        let admission = h.lifecycle.admit(buy).await.unwrap();

        assert_matches!(admission, Admission::Matched { fills: 0, .. });
        assert!(admission.order().processed);
        assert_eq!(admission.order().status, TradeStatus::Open);
    }

    #[tokio::test]
    async fn test_admission_batch_runs_in_submission_order() {
        let h = harness(monday(8, 0)).await;
        let sell = place(&h.store, TradeAction::Sell, 1, 200, dec!(14.50), monday(7, 0)).await;
        let late = place(&h.store, TradeAction::Buy, 2, 200, dec!(15), monday(7, 30)).await;
        let early = place(&h.store, TradeAction::Buy, 3, 200, dec!(15), monday(7, 10)).await;

        let report = h.lifecycle.run_admission_batch_at(monday(9, 0)).await.unwrap();

        assert_eq!(report.examined, 3);
        assert_eq!(report.admitted, 3);
        assert_eq!(report.fills, 1);
        let early = h.store.get_trade(early.id).await.unwrap().unwrap();
        let late = h.store.get_trade(late.id).await.unwrap().unwrap();
        assert_eq!(early.status, TradeStatus::Filled);
        assert_eq!(late.status, TradeStatus::Open);
        assert!(late.processed);
        let sell = h.store.get_trade(sell.id).await.unwrap().unwrap();
        assert_eq!(sell.avg_price, dec!(14.50));
    }

    #[tokio::test]
    async fn test_admission_batch_isolates_failures() {
        let h = harness(monday(8, 0)).await;
        // Seller 9 has no account: settlement cannot credit it
        let mut orphan = Trade::new(
            TradeAction::Sell,
            "XYZ",
            100,
            dec!(14),
            AccountId(9),
            CustomerId(9),
            monday(7, 0),
        );
        orphan.processed = true;
        h.store.save_trade(orphan).await.unwrap();
        let doomed = place(&h.store, TradeAction::Buy, 1, 100, dec!(15), monday(7, 5)).await;
        let quiet = place(&h.store, TradeAction::Sell, 2, 100, dec!(20), monday(7, 10)).await;

        let report = h.lifecycle.run_admission_batch_at(monday(9, 0)).await.unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(report.admitted, 1);
        let doomed = h.store.get_trade(doomed.id).await.unwrap().unwrap();
        assert!(!doomed.processed);
        assert_eq!(doomed.status, TradeStatus::Open);
        assert!(h.store.get_trade(quiet.id).await.unwrap().unwrap().processed);
    }

    #[tokio::test]
    async fn test_expiry_releases_and_skips_liquidity_provider() {
        let h = harness(monday(10, 0)).await;
        let buy = place(&h.store, TradeAction::Buy, 1, 100, dec!(15), monday(10, 0)).await;
        let sell = place(&h.store, TradeAction::Sell, 2, 300, dec!(30), monday(10, 0)).await;
        let mut lp = Trade::new(
            TradeAction::Sell,
            "XYZ",
            1000,
            dec!(40),
            AccountId::LIQUIDITY_PROVIDER,
            CustomerId(0),
            monday(9, 0),
        );
        lp.processed = true;
        let lp = h.store.save_trade(lp).await.unwrap();
        assert_eq!(
            h.store.get_account(AccountId(1)).await.unwrap().unwrap().available_balance,
            dec!(8500)
        );

        h.clock.set(monday(17, 0));
        let report = h.lifecycle.run_expiry_batch().await.unwrap();

        assert_eq!(report.expired, 2);
        assert_eq!(report.skipped, 1);
        let account = h.store.get_account(AccountId(1)).await.unwrap().unwrap();
        assert_eq!(account.available_balance, account.balance);
        let asset = h.store.get_asset(CustomerId(2), "XYZ").await.unwrap().unwrap();
        assert_eq!(asset.available_quantity, 1000);
        for id in [buy.id, sell.id] {
            let trade = h.store.get_trade(id).await.unwrap().unwrap();
            assert_eq!(trade.status, TradeStatus::Expired);
        }
        let lp = h.store.get_trade(lp.id).await.unwrap().unwrap();
        assert_eq!(lp.status, TradeStatus::Open);
    }

    #[tokio::test]
    async fn test_expiry_is_idempotent() {
        let h = harness(monday(10, 0)).await;
        place(&h.store, TradeAction::Buy, 1, 100, dec!(15), monday(10, 0)).await;
        place(&h.store, TradeAction::Sell, 2, 100, dec!(30), monday(10, 0)).await;

        let first = h.lifecycle.run_expiry_batch().await.unwrap();
        let accounts_before = h.store.get_account(AccountId(1)).await.unwrap().unwrap();
        let second = h.lifecycle.run_expiry_batch().await.unwrap();

        assert_eq!(first.expired, 2);
        assert_eq!(second.examined, 0);
        assert_eq!(second.expired, 0);
        assert_eq!(h.store.get_account(AccountId(1)).await.unwrap().unwrap(), accounts_before);
    }

    #[tokio::test]
    async fn test_expiry_returns_only_unfilled_quantity() {
        let h = harness(monday(10, 0)).await;
        let sell = place(&h.store, TradeAction::Sell, 1, 300, dec!(14), monday(9, 30)).await;
        h.lifecycle.admit(sell.clone()).await.unwrap();
        let buy = place(&h.store, TradeAction::Buy, 2, 100, dec!(14), monday(9, 45)).await;
        h.lifecycle.admit(buy).await.unwrap();

        h.lifecycle.run_expiry_batch().await.unwrap();

        let asset = h.store.get_asset(CustomerId(1), "XYZ").await.unwrap().unwrap();
        assert_eq!(asset.quantity, 900);
        assert_eq!(asset.available_quantity, 900);
        let sell = h.store.get_trade(sell.id).await.unwrap().unwrap();
        assert_eq!((sell.status, sell.filled_quantity), (TradeStatus::Expired, 100));
    }

    #[tokio::test]
    async fn test_cancel_checks_owner_and_status() {
        let h = harness(monday(10, 0)).await;
        let sell = place(&h.store, TradeAction::Sell, 1, 100, dec!(30), monday(10, 0)).await;

        assert_matches!(
            h.lifecycle.cancel(sell.id, CustomerId(2)).await,
            Err(OmsError::NotOwner(id)) if id == sell.id
        );

        let cancelled = h.lifecycle.cancel(sell.id, CustomerId(1)).await.unwrap();
        assert_eq!(cancelled.status, TradeStatus::Cancelled);
        let asset = h.store.get_asset(CustomerId(1), "XYZ").await.unwrap().unwrap();
        assert_eq!(asset.available_quantity, 1000);

        assert_matches!(
            h.lifecycle.cancel(sell.id, CustomerId(1)).await,
            Err(OmsError::NotCancellable(_))
        );
        assert_matches!(
            h.lifecycle.cancel(TradeId(999), CustomerId(1)).await,
            Err(OmsError::NotFound(_))
        );
    }

    #[tokio::test]
    async fn test_cancelled_order_is_skipped_by_admission() {
        let h = harness(monday(8, 0)).await;
        let buy = place(&h.store, TradeAction::Buy, 1, 100, dec!(15), monday(8, 0)).await;
        h.lifecycle.cancel(buy.id, CustomerId(1)).await.unwrap();

        h.clock.advance(Duration::hours(1));
        let report = h.lifecycle.run_admission_batch().await.unwrap();

        assert_eq!((report.examined, report.skipped, report.admitted), (1, 1, 0));
    }
}
