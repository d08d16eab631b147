//! Startup seeding of instruments and standing liquidity

use common::{AccountId, Clock, CustomerId, Decimal, Stock, Trade, TradeAction, TradeStatus};
use config::{InstrumentSeed, LiquiditySeed, MarketConfig};
use storage::LedgerStore;
use tracing::{debug, info};

use crate::error::Result;

/// Customer id carried by liquidity-provider orders
pub const LIQUIDITY_PROVIDER_CUSTOMER: CustomerId = CustomerId(0);

/// What a seeding run created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedSummary {
    pub stocks_created: usize,
    pub orders_created: usize,
}

/// Create missing stocks and the liquidity-provider orders configured for
/// them. Existing stocks keep their last price, and a side that already
/// has a live liquidity-provider order gets no second one.
pub async fn seed_market(
    store: &dyn LedgerStore,
    market: &MarketConfig,
    clock: &dyn Clock,
) -> Result<SeedSummary> {
    let mut summary = SeedSummary::default();

    for instrument in &market.instruments {
        if store.get_stock(&instrument.symbol).await?.is_none() {
            store
                .save_stock(Stock::new(&instrument.symbol, instrument.last_price))
                .await?;
            summary.stocks_created += 1;
            debug!(symbol = %instrument.symbol, last_price = %instrument.last_price, "Stock created");
        }

        if let Some(liquidity) = &instrument.liquidity {
            summary.orders_created += seed_liquidity(store, instrument, liquidity, clock).await?;
        }
    }

    info!(
        instruments = market.instruments.len(),
        stocks_created = summary.stocks_created,
        orders_created = summary.orders_created,
        "Market seeded"
    );
    Ok(summary)
}

async fn seed_liquidity(
    store: &dyn LedgerStore,
    instrument: &InstrumentSeed,
    liquidity: &LiquiditySeed,
    clock: &dyn Clock,
) -> Result<usize> {
    let mut created = 0;
    for (action, price) in [
        (TradeAction::Buy, liquidity.bid),
        (TradeAction::Sell, liquidity.ask),
    ] {
        let live = store
            .find_trades(action, &instrument.symbol, &TradeStatus::LIVE)
            .await?;
        if live.iter().any(Trade::is_liquidity_provider) {
            continue;
        }

        let mut order = Trade::new(
            action,
            &instrument.symbol,
            liquidity.quantity,
            price,
            AccountId::LIQUIDITY_PROVIDER,
            LIQUIDITY_PROVIDER_CUSTOMER,
            clock.now(),
        );
        if action == TradeAction::Buy {
            order.amount_reserved = price * Decimal::from(liquidity.quantity);
        }
        order.processed = true;
        let order = store.save_trade(order).await?;
        debug!(
            trade_id = %order.id,
            symbol = %order.symbol,
            action = %action,
            %price,
            quantity = order.quantity,
            "Liquidity order placed"
        );
        created += 1;
    }
    Ok(created)
}
