//! Core Matching Engine
//!
//! Matches a single incoming order against the live order set of its
//! instrument. The order set is re-read from the ledger store before every
//! counterparty selection, so each fill sees the effects of the previous one.

use std::collections::HashSet;
use std::sync::Arc;

use common::{Clock, Decimal, Trade, TradeAction, TradeId, TradeStatus};
use observability::LedgerMetrics;
use rust_decimal::prelude::ToPrimitive;
use settlement::{SettlementOutcome, SettlementService};
use storage::LedgerStore;
use tracing::{debug, info, warn};

use crate::book;
use crate::error::MatchingError;
use crate::result::MatchResult;
use crate::{Result, DEFAULT_LOT_SIZE};

/// Version conflicts tolerated per matching pass before giving up
const MAX_CONFLICT_RETRIES: u32 = 3;

/// State of one matching pass
struct MatchRun {
    result: MatchResult,
    /// Counterparties not to select again in this pass
    passed: HashSet<TradeId>,
    conflicts: u32,
    halted: bool,
}

impl MatchRun {
    fn new(order: Trade) -> Self {
        Self {
            result: MatchResult::new(order),
            passed: HashSet::new(),
            conflicts: 0,
            halted: false,
        }
    }

    fn order(&self) -> &Trade {
        &self.result.order
    }

    fn is_active(&self) -> bool {
        !self.halted && self.order().status.is_live() && !self.order().is_filled()
    }
}

/// What happened to one attempted pairing
enum Step {
    Settled,
    SelfTrade,
    /// The incoming order changed underneath us and was reloaded
    Retry,
}

/// Matching Engine
///
/// Holds no book of its own: the ledger store is the book. Callers must
/// serialize passes (one incoming order at a time) for price/time priority
/// to be well defined.
pub struct MatchingEngine {
    store: Arc<dyn LedgerStore>,
    settlement: SettlementService,
    lot_size: u32,
    metrics: LedgerMetrics,
}

impl MatchingEngine {
    /// Create a new matching engine with the default lot size
    pub fn new(store: Arc<dyn LedgerStore>, clock: Arc<dyn Clock>) -> Self {
        Self::with_lot_size(store, clock, DEFAULT_LOT_SIZE)
    }

    pub fn with_lot_size(store: Arc<dyn LedgerStore>, clock: Arc<dyn Clock>, lot_size: u32) -> Self {
        Self {
            settlement: SettlementService::new(store.clone(), clock),
            store,
            lot_size,
            metrics: LedgerMetrics::new(),
        }
    }

    /// Match a stored order, dispatching on its action and order type
    pub async fn match_order(&self, order: Trade) -> Result<MatchResult> {
        if order.version == 0 {
            return Err(MatchingError::InvalidOrder(format!(
                "trade {} must be stored before matching",
                order.id
            )));
        }
        if order.quantity == 0 {
            return Err(MatchingError::InvalidOrder(format!(
                "trade {} has zero quantity",
                order.id
            )));
        }
        if !order.status.is_live() {
            return Err(MatchingError::InvalidOrder(format!(
                "trade {} is {}",
                order.id, order.status
            )));
        }

        info!(
            trade_id = %order.id,
            symbol = %order.symbol,
            action = %order.action,
            price = %order.limit_price(),
            quantity = order.remaining_quantity(),
            "Matching order"
        );

        let result = match (order.action, order.is_market()) {
            (TradeAction::Buy, false) => self.process_buy(order).await?,
            (TradeAction::Sell, false) => self.process_sell(order).await?,
            (TradeAction::Buy, true) => self.process_market_buy(order).await?,
            (TradeAction::Sell, true) => self.process_market_sell(order).await?,
        };

        debug!(
            trade_id = %result.order.id,
            fills = result.fills.len(),
            filled = result.filled_quantity(),
            status = %result.order.status,
            "Matching pass finished"
        );
        Ok(result)
    }

    /// Limit buy: cross asks up to the bid, then take resting market sells
    /// at the bid
    pub async fn process_buy(&self, buy: Trade) -> Result<MatchResult> {
        let mut run = MatchRun::new(buy);

        while run.is_active() {
            let asks = self.book(TradeAction::Sell, &run).await?;
            let Some(mut sell) = book::best_ask(&asks, &run.passed).cloned() else {
                break;
            };
            if sell.ask > run.order().bid {
                break;
            }
            let quantity = run.order().remaining_quantity().min(sell.remaining_quantity());
            let price = run.order().bid.min(sell.ask);
            self.execute(&mut run, &mut sell, price, quantity).await?;
        }

        self.sweep_market_sells(&mut run).await?;
        Ok(run.result)
    }

    /// Limit sell: cross bids down to the ask, then fill resting market buys
    /// at the ask as far as their reserved funds reach
    pub async fn process_sell(&self, sell: Trade) -> Result<MatchResult> {
        let mut run = MatchRun::new(sell);

        while run.is_active() {
            let bids = self.book(TradeAction::Buy, &run).await?;
            let Some(mut buy) = book::best_bid(&bids, &run.passed).cloned() else {
                break;
            };
            if buy.bid < run.order().ask {
                break;
            }
            let quantity = run.order().remaining_quantity().min(buy.remaining_quantity());
            let price = run.order().ask.max(buy.bid);
            self.execute(&mut run, &mut buy, price, quantity).await?;
        }

        self.sweep_market_buys(&mut run).await?;
        Ok(run.result)
    }

    /// Market buy: take the lowest asks while reserved funds cover a lot
    pub async fn process_market_buy(&self, buy: Trade) -> Result<MatchResult> {
        let mut run = MatchRun::new(buy);

        while run.is_active() {
            let asks = self.book(TradeAction::Sell, &run).await?;
            let Some(mut sell) = book::best_ask(&asks, &run.passed).cloned() else {
                break;
            };
            let funds = run.order().remaining_funds();
            let affordable = book::affordable_quantity(funds, sell.ask, self.lot_size);
            if affordable == 0 {
                debug!(
                    trade_id = %run.order().id,
                    %funds,
                    ask = %sell.ask,
                    "Reserved funds no longer cover a lot"
                );
                break;
            }
            let quantity = sell
                .remaining_quantity()
                .min(affordable)
                .min(run.order().remaining_quantity());
            let price = sell.ask;
            self.execute(&mut run, &mut sell, price, quantity).await?;
        }

        Ok(run.result)
    }

    /// Market sell: hit the highest bids at their price until filled
    pub async fn process_market_sell(&self, sell: Trade) -> Result<MatchResult> {
        let mut run = MatchRun::new(sell);

        while run.is_active() {
            let bids = self.book(TradeAction::Buy, &run).await?;
            let Some(mut buy) = book::best_bid(&bids, &run.passed).cloned() else {
                break;
            };
            let quantity = run.order().remaining_quantity().min(buy.remaining_quantity());
            let price = buy.bid;
            self.execute(&mut run, &mut buy, price, quantity).await?;
        }

        Ok(run.result)
    }

    /// Resting market sells, oldest first, filled at the incoming bid
    async fn sweep_market_sells(&self, run: &mut MatchRun) -> Result<()> {
        while run.is_active() {
            let sells = self.market_book(TradeAction::Sell, run).await?;
            let Some(mut sell) = book::oldest_market(&sells, TradeAction::Sell, &run.passed).cloned()
            else {
                break;
            };
            let quantity = run.order().remaining_quantity().min(sell.remaining_quantity());
            let price = run.order().bid;
            if let Step::Settled = self.execute(run, &mut sell, price, quantity).await? {
                run.passed.insert(sell.id);
            }
        }
        Ok(())
    }

    /// Resting market buys, oldest first, filled at the incoming ask and
    /// capped by what each buyer's reserved funds still cover
    async fn sweep_market_buys(&self, run: &mut MatchRun) -> Result<()> {
        while run.is_active() {
            let buys = self.market_book(TradeAction::Buy, run).await?;
            let Some(mut buy) = book::oldest_market(&buys, TradeAction::Buy, &run.passed).cloned()
            else {
                break;
            };
            let price = run.order().ask;
            let affordable = book::affordable_quantity(buy.remaining_funds(), price, self.lot_size);
            let quantity = run
                .order()
                .remaining_quantity()
                .min(buy.remaining_quantity())
                .min(affordable);
            if quantity == 0 {
                run.passed.insert(buy.id);
                continue;
            }
            if let Step::Settled = self.execute(run, &mut buy, price, quantity).await? {
                run.passed.insert(buy.id);
            }
        }
        Ok(())
    }

    async fn book(&self, side: TradeAction, run: &MatchRun) -> Result<Vec<Trade>> {
        Ok(self
            .store
            .find_trades(side, &run.order().symbol, &TradeStatus::LIVE)
            .await?)
    }

    async fn market_book(&self, side: TradeAction, run: &MatchRun) -> Result<Vec<Trade>> {
        Ok(self
            .store
            .find_market_trades(side, &run.order().symbol, &TradeStatus::LIVE)
            .await?)
    }

    /// Settle one pairing between the incoming order and `counter`
    async fn execute(
        &self,
        run: &mut MatchRun,
        counter: &mut Trade,
        price: Decimal,
        quantity: u32,
    ) -> Result<Step> {
        let order = &mut run.result.order;
        let outcome = if order.is_buy() {
            self.settlement.settle(order, counter, price, quantity).await
        } else {
            self.settlement.settle(counter, order, price, quantity).await
        };

        match outcome {
            Ok(SettlementOutcome::Settled(fill)) => {
                self.metrics
                    .record_fill(fill.quantity, fill.notional().to_f64().unwrap_or_default());
                run.result.fills.push(fill);
                Ok(Step::Settled)
            }
            Ok(SettlementOutcome::SelfTradeSkipped) => {
                self.metrics.record_self_trade();
                run.result.self_trades_skipped += 1;
                run.passed.insert(counter.id);
                Ok(Step::SelfTrade)
            }
            Err(e) if e.is_conflict() => {
                run.conflicts += 1;
                let id = run.result.order.id;
                warn!(
                    trade_id = %id,
                    counterparty_id = %counter.id,
                    attempt = run.conflicts,
                    "Version conflict while settling, reloading"
                );
                if run.conflicts > MAX_CONFLICT_RETRIES {
                    return Err(MatchingError::Contention(id));
                }
                let fresh = self.store.get_trade(id).await?.ok_or_else(|| {
                    MatchingError::InvalidOrder(format!("trade {} disappeared while matching", id))
                })?;
                if !fresh.status.is_live() {
                    info!(trade_id = %id, status = %fresh.status, "Order left the book while matching");
                    run.halted = true;
                }
                run.result.order = fresh;
                Ok(Step::Retry)
            }
            Err(e) => Err(e.into()),
        }
    }
}
