//! PostgreSQL ledger store implementation

use async_trait::async_trait;
use common::{
    Account, AccountId, Asset, AssetId, CustomerId, Portfolio, PortfolioId, Stock, Trade,
    TradeAction, TradeId, TradeStatus, Transfer, TransferId,
};
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{StorageError, StorageResult};
use crate::traits::{LedgerStore, UnitOfWork};

const SCHEMA: &str = include_str!("../migrations/0001_ledger.sql");

const TRADE_COLUMNS: &str = "id, action, symbol, quantity, bid, ask, avg_price, filled_quantity, \
     submitted_at, account_id, customer_id, status, processed, amount_reserved, version";

fn backend(e: sqlx::Error) -> StorageError {
    if let Some(db) = e.as_database_error() {
        if db.is_unique_violation() {
            return StorageError::Conflict(db.message().to_string());
        }
    }
    StorageError::Backend(e.to_string())
}

fn stale(kind: &str, key: impl std::fmt::Display, version: u64) -> StorageError {
    StorageError::Conflict(format!(
        "{} {} changed since version {} was read",
        kind, key, version
    ))
}

fn status_names(statuses: &[TradeStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

/// PostgreSQL ledger store
pub struct PostgresLedgerStore {
    pool: Arc<PgPool>,
}

impl PostgresLedgerStore {
    /// Create a new PostgreSQL ledger store
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Connect to `url` with a bounded pool
    pub async fn connect(url: &str, max_connections: u32) -> StorageResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(backend)?;
        info!(max_connections, "Connected to PostgreSQL ledger store");
        Ok(Self::new(pool))
    }

    /// Create the ledger tables if they do not exist yet
    pub async fn ensure_schema(&self) -> StorageResult<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(backend)?;
        debug!("Ledger schema ensured");
        Ok(())
    }

    fn row_to_trade(row: &PgRow) -> StorageResult<Trade> {
        let get_err = |e: sqlx::Error| StorageError::InvalidData(e.to_string());
        let action: String = row.try_get("action").map_err(get_err)?;
        let status: String = row.try_get("status").map_err(get_err)?;

        Ok(Trade {
            id: TradeId(row.try_get::<i64, _>("id").map_err(get_err)? as u64),
            action: action
                .parse::<TradeAction>()
                .map_err(|e| StorageError::InvalidData(e.to_string()))?,
            symbol: row.try_get("symbol").map_err(get_err)?,
            quantity: row.try_get::<i64, _>("quantity").map_err(get_err)? as u32,
            bid: row.try_get("bid").map_err(get_err)?,
            ask: row.try_get("ask").map_err(get_err)?,
            avg_price: row.try_get("avg_price").map_err(get_err)?,
            filled_quantity: row.try_get::<i64, _>("filled_quantity").map_err(get_err)? as u32,
            submitted_at: row.try_get("submitted_at").map_err(get_err)?,
            account_id: AccountId(row.try_get::<i64, _>("account_id").map_err(get_err)? as u64),
            customer_id: CustomerId(row.try_get::<i64, _>("customer_id").map_err(get_err)? as u64),
            status: status
                .parse::<TradeStatus>()
                .map_err(|e| StorageError::InvalidData(e.to_string()))?,
            processed: row.try_get("processed").map_err(get_err)?,
            amount_reserved: row.try_get("amount_reserved").map_err(get_err)?,
            version: row.try_get::<i64, _>("version").map_err(get_err)? as u64,
        })
    }

    async fn fetch_trades(
        &self,
        query: sqlx::query::Query<'_, sqlx::Postgres, sqlx::postgres::PgArguments>,
    ) -> StorageResult<Vec<Trade>> {
        let rows = query.fetch_all(&*self.pool).await.map_err(backend)?;
        rows.iter().map(Self::row_to_trade).collect()
    }
}

async fn write_trade(conn: &mut PgConnection, trade: &mut Trade) -> StorageResult<()> {
    if trade.version == 0 {
        let id_bind: Option<i64> = (trade.id != TradeId::default()).then_some(trade.id.0 as i64);
        let row = sqlx::query(
            r#"
            INSERT INTO trades (
                id, action, symbol, quantity, bid, ask, avg_price, filled_quantity,
                submitted_at, account_id, customer_id, status, processed, amount_reserved, version
            ) VALUES (COALESCE($1, nextval('trades_id_seq')), $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, 1)
            RETURNING id
            "#,
        )
        .bind(id_bind)
        .bind(trade.action.as_str())
        .bind(&trade.symbol)
        .bind(trade.quantity as i64)
        .bind(trade.bid)
        .bind(trade.ask)
        .bind(trade.avg_price)
        .bind(trade.filled_quantity as i64)
        .bind(trade.submitted_at)
        .bind(trade.account_id.0 as i64)
        .bind(trade.customer_id.0 as i64)
        .bind(trade.status.as_str())
        .bind(trade.processed)
        .bind(trade.amount_reserved)
        .fetch_one(&mut *conn)
        .await
        .map_err(backend)?;
        trade.id = TradeId(row.try_get::<i64, _>("id").map_err(backend)? as u64);
        if id_bind.is_some() {
            // Keep generated ids clear of explicitly inserted ones
            sqlx::query("SELECT setval('trades_id_seq', GREATEST((SELECT MAX(id) FROM trades), 1))")
                .execute(&mut *conn)
                .await
                .map_err(backend)?;
        }
    } else {
        let affected = sqlx::query(
            r#"
            UPDATE trades SET
                avg_price = $1,
                filled_quantity = $2,
                status = $3,
                processed = $4,
                amount_reserved = $5,
                version = version + 1
            WHERE id = $6 AND version = $7
            "#,
        )
        .bind(trade.avg_price)
        .bind(trade.filled_quantity as i64)
        .bind(trade.status.as_str())
        .bind(trade.processed)
        .bind(trade.amount_reserved)
        .bind(trade.id.0 as i64)
        .bind(trade.version as i64)
        .execute(&mut *conn)
        .await
        .map_err(backend)?
        .rows_affected();
        if affected != 1 {
            return Err(stale("trade", trade.id, trade.version));
        }
    }
    trade.version += 1;
    Ok(())
}

async fn write_account(conn: &mut PgConnection, account: &mut Account) -> StorageResult<()> {
    let affected = if account.version == 0 {
        sqlx::query(
            "INSERT INTO accounts (id, customer_id, balance, available_balance, version) \
             VALUES ($1, $2, $3, $4, 1)",
        )
        .bind(account.id.0 as i64)
        .bind(account.customer_id.0 as i64)
        .bind(account.balance)
        .bind(account.available_balance)
        .execute(&mut *conn)
        .await
        .map_err(backend)?
        .rows_affected()
    } else {
        sqlx::query(
            "UPDATE accounts SET balance = $1, available_balance = $2, version = version + 1 \
             WHERE id = $3 AND version = $4",
        )
        .bind(account.balance)
        .bind(account.available_balance)
        .bind(account.id.0 as i64)
        .bind(account.version as i64)
        .execute(&mut *conn)
        .await
        .map_err(backend)?
        .rows_affected()
    };
    if affected != 1 {
        return Err(stale("account", account.id, account.version));
    }
    account.version += 1;
    Ok(())
}

async fn write_asset(conn: &mut PgConnection, asset: &mut Asset) -> StorageResult<()> {
    if asset.version == 0 {
        let row = sqlx::query(
            "INSERT INTO assets (customer_id, symbol, quantity, available_quantity, avg_price, version) \
             VALUES ($1, $2, $3, $4, $5, 1) RETURNING id",
        )
        .bind(asset.customer_id.0 as i64)
        .bind(&asset.symbol)
        .bind(asset.quantity as i64)
        .bind(asset.available_quantity as i64)
        .bind(asset.avg_price)
        .fetch_one(&mut *conn)
        .await
        .map_err(backend)?;
        asset.id = AssetId(row.try_get::<i64, _>("id").map_err(backend)? as u64);
    } else {
        let affected = sqlx::query(
            "UPDATE assets SET quantity = $1, available_quantity = $2, avg_price = $3, \
             version = version + 1 WHERE customer_id = $4 AND symbol = $5 AND version = $6",
        )
        .bind(asset.quantity as i64)
        .bind(asset.available_quantity as i64)
        .bind(asset.avg_price)
        .bind(asset.customer_id.0 as i64)
        .bind(&asset.symbol)
        .bind(asset.version as i64)
        .execute(&mut *conn)
        .await
        .map_err(backend)?
        .rows_affected();
        if affected != 1 {
            let key = format!("{}/{}", asset.customer_id, asset.symbol);
            return Err(stale("asset", key, asset.version));
        }
    }
    asset.version += 1;
    Ok(())
}

async fn write_portfolio(conn: &mut PgConnection, portfolio: &mut Portfolio) -> StorageResult<()> {
    let affected = if portfolio.version == 0 {
        sqlx::query(
            "INSERT INTO portfolios (id, customer_id, realized_gain_loss, version) VALUES ($1, $2, $3, 1)",
        )
        .bind(portfolio.id.0 as i64)
        .bind(portfolio.customer_id.0 as i64)
        .bind(portfolio.realized_gain_loss)
        .execute(&mut *conn)
        .await
        .map_err(backend)?
        .rows_affected()
    } else {
        sqlx::query(
            "UPDATE portfolios SET realized_gain_loss = $1, version = version + 1 \
             WHERE customer_id = $2 AND version = $3",
        )
        .bind(portfolio.realized_gain_loss)
        .bind(portfolio.customer_id.0 as i64)
        .bind(portfolio.version as i64)
        .execute(&mut *conn)
        .await
        .map_err(backend)?
        .rows_affected()
    };
    if affected != 1 {
        return Err(stale("portfolio of customer", portfolio.customer_id, portfolio.version));
    }
    portfolio.version += 1;
    Ok(())
}

async fn write_stock(conn: &mut PgConnection, stock: &mut Stock) -> StorageResult<()> {
    let affected = if stock.version == 0 {
        sqlx::query("INSERT INTO stocks (symbol, last_price, version) VALUES ($1, $2, 1)")
            .bind(&stock.symbol)
            .bind(stock.last_price)
            .execute(&mut *conn)
            .await
            .map_err(backend)?
            .rows_affected()
    } else {
        sqlx::query(
            "UPDATE stocks SET last_price = $1, version = version + 1 WHERE symbol = $2 AND version = $3",
        )
        .bind(stock.last_price)
        .bind(&stock.symbol)
        .bind(stock.version as i64)
        .execute(&mut *conn)
        .await
        .map_err(backend)?
        .rows_affected()
    };
    if affected != 1 {
        return Err(stale("stock", &stock.symbol, stock.version));
    }
    stock.version += 1;
    Ok(())
}

async fn write_transfer(conn: &mut PgConnection, transfer: &mut Transfer) -> StorageResult<()> {
    let row = sqlx::query(
        "INSERT INTO transfers (from_id, to_id, amount, created_at) VALUES ($1, $2, $3, $4) RETURNING id",
    )
    .bind(transfer.from.map(|a| a.0 as i64))
    .bind(transfer.to.map(|a| a.0 as i64))
    .bind(transfer.amount)
    .bind(transfer.created_at)
    .fetch_one(&mut *conn)
    .await
    .map_err(backend)?;
    transfer.id = TransferId(row.try_get::<i64, _>("id").map_err(backend)? as u64);
    Ok(())
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    async fn get_trade(&self, id: TradeId) -> StorageResult<Option<Trade>> {
        let row = sqlx::query(&format!("SELECT {} FROM trades WHERE id = $1", TRADE_COLUMNS))
            .bind(id.0 as i64)
            .fetch_optional(&*self.pool)
            .await
            .map_err(backend)?;

        match row {
            Some(row) => Ok(Some(Self::row_to_trade(&row)?)),
            None => Ok(None),
        }
    }

    async fn find_trades_by_processed(&self, processed: bool) -> StorageResult<Vec<Trade>> {
        let sql = format!("SELECT {} FROM trades WHERE processed = $1 ORDER BY id", TRADE_COLUMNS);
        self.fetch_trades(sqlx::query(&sql).bind(processed)).await
    }

    async fn find_trades_by_status(&self, statuses: &[TradeStatus]) -> StorageResult<Vec<Trade>> {
        let sql = format!(
            "SELECT {} FROM trades WHERE status = ANY($1) ORDER BY id",
            TRADE_COLUMNS
        );
        self.fetch_trades(sqlx::query(&sql).bind(status_names(statuses)))
            .await
    }

    async fn find_trades(
        &self,
        action: TradeAction,
        symbol: &str,
        statuses: &[TradeStatus],
    ) -> StorageResult<Vec<Trade>> {
        let sql = format!(
            "SELECT {} FROM trades WHERE action = $1 AND symbol = $2 AND status = ANY($3) ORDER BY id",
            TRADE_COLUMNS
        );
        self.fetch_trades(
            sqlx::query(&sql)
                .bind(action.as_str())
                .bind(symbol)
                .bind(status_names(statuses)),
        )
        .await
    }

    async fn find_market_trades(
        &self,
        action: TradeAction,
        symbol: &str,
        statuses: &[TradeStatus],
    ) -> StorageResult<Vec<Trade>> {
        let price_column = match action {
            TradeAction::Buy => "bid",
            TradeAction::Sell => "ask",
        };
        let sql = format!(
            "SELECT {} FROM trades WHERE action = $1 AND symbol = $2 AND {} = 0 \
             AND status = ANY($3) ORDER BY id",
            TRADE_COLUMNS, price_column
        );
        self.fetch_trades(
            sqlx::query(&sql)
                .bind(action.as_str())
                .bind(symbol)
                .bind(status_names(statuses)),
        )
        .await
    }

    async fn get_account(&self, id: AccountId) -> StorageResult<Option<Account>> {
        let row = sqlx::query(
            "SELECT id, customer_id, balance, available_balance, version FROM accounts WHERE id = $1",
        )
        .bind(id.0 as i64)
        .fetch_optional(&*self.pool)
        .await
        .map_err(backend)?;

        row.map(|row| -> StorageResult<Account> {
            Ok(Account {
                id: AccountId(row.try_get::<i64, _>("id").map_err(backend)? as u64),
                customer_id: CustomerId(row.try_get::<i64, _>("customer_id").map_err(backend)? as u64),
                balance: row.try_get("balance").map_err(backend)?,
                available_balance: row.try_get("available_balance").map_err(backend)?,
                version: row.try_get::<i64, _>("version").map_err(backend)? as u64,
            })
        })
        .transpose()
    }

    async fn get_asset(&self, customer_id: CustomerId, symbol: &str) -> StorageResult<Option<Asset>> {
        let row = sqlx::query(
            "SELECT id, customer_id, symbol, quantity, available_quantity, avg_price, version \
             FROM assets WHERE customer_id = $1 AND symbol = $2",
        )
        .bind(customer_id.0 as i64)
        .bind(symbol)
        .fetch_optional(&*self.pool)
        .await
        .map_err(backend)?;

        row.map(|row| -> StorageResult<Asset> {
            Ok(Asset {
                id: AssetId(row.try_get::<i64, _>("id").map_err(backend)? as u64),
                customer_id: CustomerId(row.try_get::<i64, _>("customer_id").map_err(backend)? as u64),
                symbol: row.try_get("symbol").map_err(backend)?,
                quantity: row.try_get::<i64, _>("quantity").map_err(backend)? as u32,
                available_quantity: row.try_get::<i64, _>("available_quantity").map_err(backend)? as u32,
                avg_price: row.try_get("avg_price").map_err(backend)?,
                version: row.try_get::<i64, _>("version").map_err(backend)? as u64,
            })
        })
        .transpose()
    }

    async fn get_portfolio(&self, customer_id: CustomerId) -> StorageResult<Option<Portfolio>> {
        let row = sqlx::query(
            "SELECT id, customer_id, realized_gain_loss, version FROM portfolios WHERE customer_id = $1",
        )
        .bind(customer_id.0 as i64)
        .fetch_optional(&*self.pool)
        .await
        .map_err(backend)?;

        row.map(|row| -> StorageResult<Portfolio> {
            Ok(Portfolio {
                id: PortfolioId(row.try_get::<i64, _>("id").map_err(backend)? as u64),
                customer_id: CustomerId(row.try_get::<i64, _>("customer_id").map_err(backend)? as u64),
                realized_gain_loss: row.try_get("realized_gain_loss").map_err(backend)?,
                version: row.try_get::<i64, _>("version").map_err(backend)? as u64,
            })
        })
        .transpose()
    }

    async fn get_stock(&self, symbol: &str) -> StorageResult<Option<Stock>> {
        let row = sqlx::query("SELECT symbol, last_price, version FROM stocks WHERE symbol = $1")
            .bind(symbol)
            .fetch_optional(&*self.pool)
            .await
            .map_err(backend)?;

        row.map(|row| -> StorageResult<Stock> {
            Ok(Stock {
                symbol: row.try_get("symbol").map_err(backend)?,
                last_price: row.try_get("last_price").map_err(backend)?,
                version: row.try_get::<i64, _>("version").map_err(backend)? as u64,
            })
        })
        .transpose()
    }

    async fn find_transfers(&self, account_id: AccountId) -> StorageResult<Vec<Transfer>> {
        let rows = sqlx::query(
            "SELECT id, from_id, to_id, amount, created_at FROM transfers \
             WHERE from_id = $1 OR to_id = $1 ORDER BY id",
        )
        .bind(account_id.0 as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(backend)?;

        rows.iter()
            .map(|row| -> StorageResult<Transfer> {
                Ok(Transfer {
                    id: TransferId(row.try_get::<i64, _>("id").map_err(backend)? as u64),
                    from: row
                        .try_get::<Option<i64>, _>("from_id")
                        .map_err(backend)?
                        .map(|id| AccountId(id as u64)),
                    to: row
                        .try_get::<Option<i64>, _>("to_id")
                        .map_err(backend)?
                        .map(|id| AccountId(id as u64)),
                    amount: row.try_get("amount").map_err(backend)?,
                    created_at: row.try_get("created_at").map_err(backend)?,
                })
            })
            .collect()
    }

    async fn commit(&self, mut work: UnitOfWork) -> StorageResult<UnitOfWork> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        // Any error drops `tx`, which rolls the whole unit back
        for trade in &mut work.trades {
            write_trade(&mut *tx, trade).await?;
        }
        for account in &mut work.accounts {
            write_account(&mut *tx, account).await?;
        }
        for asset in &mut work.assets {
            write_asset(&mut *tx, asset).await?;
        }
        for portfolio in &mut work.portfolios {
            write_portfolio(&mut *tx, portfolio).await?;
        }
        for stock in &mut work.stocks {
            write_stock(&mut *tx, stock).await?;
        }
        for transfer in &mut work.transfers {
            write_transfer(&mut *tx, transfer).await?;
        }

        tx.commit().await.map_err(backend)?;
        Ok(work)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    /// Runs against `LEDGER_TEST_DATABASE_URL` when set, otherwise skips
    async fn store() -> Option<PostgresLedgerStore> {
        let url = std::env::var("LEDGER_TEST_DATABASE_URL").ok()?;
        let store = PostgresLedgerStore::connect(&url, 2).await.unwrap();
        store.ensure_schema().await.unwrap();
        Some(store)
    }

    fn trade() -> Trade {
        Trade::new(
            TradeAction::Sell,
            "XYZ",
            100,
            dec!(14),
            AccountId(1),
            CustomerId(1),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_explicit_id_advances_sequence() {
        let Some(store) = store().await else {
            return;
        };
        let highest: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(id), 0) FROM trades")
            .fetch_one(&*store.pool)
            .await
            .unwrap();

        let mut explicit = trade();
        explicit.id = TradeId(highest as u64 + 1_000_000);
        let explicit = store.save_trade(explicit).await.unwrap();
        let generated = store.save_trade(trade()).await.unwrap();

        assert!(generated.id.0 > explicit.id.0);
    }
}
