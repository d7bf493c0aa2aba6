//! SQLite persistence for portfolios and trades.
//!
//! One portfolio row per user, created lazily with the default balance, plus
//! an append-only trades table. The trade commit is a single transaction
//! pairing a version-guarded portfolio update with the trade insert, so a
//! racing trade for the same user either fully lands or fully fails.

use crate::portfolio::engine::{Holdings, Portfolio, TradeSide, TradeStatus, INITIAL_BALANCE};
use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Immutable record of one executed trade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: String,
    pub user_id: String,
    pub symbol: String,
    pub side: TradeSide,
    pub quantity: f64,
    pub price: f64,
    pub status: TradeStatus,
    pub created_at: i64,
}

impl TradeRecord {
    /// Build the record the engine persists for a successful execution.
    pub fn completed(user_id: &str, symbol: &str, side: TradeSide, quantity: f64, price: f64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            symbol: symbol.to_string(),
            side,
            quantity,
            price,
            status: TradeStatus::Completed,
            created_at: Utc::now().timestamp(),
        }
    }
}

/// Failure modes of the transactional trade commit.
#[derive(Debug)]
pub enum CommitError {
    /// The version guard did not match: another trade for the same user
    /// committed between our read and our write. Nothing was applied.
    VersionConflict,
    Storage(anyhow::Error),
}

impl std::fmt::Display for CommitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommitError::VersionConflict => write!(f, "Concurrent update detected"),
            CommitError::Storage(e) => write!(f, "Storage error: {}", e),
        }
    }
}

impl std::error::Error for CommitError {}

impl From<rusqlite::Error> for CommitError {
    fn from(e: rusqlite::Error) -> Self {
        CommitError::Storage(e.into())
    }
}

impl From<serde_json::Error> for CommitError {
    fn from(e: serde_json::Error) -> Self {
        CommitError::Storage(e.into())
    }
}

#[derive(Clone)]
pub struct PortfolioStore {
    conn: Arc<Mutex<Connection>>,
}

impl PortfolioStore {
    pub fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).context("open portfolio db")?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS portfolios (
                user_id TEXT PRIMARY KEY,
                balance REAL NOT NULL,
                holdings_json TEXT NOT NULL,
                avg_cost_json TEXT NOT NULL,
                realized_pnl REAL NOT NULL DEFAULT 0,
                version INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS trades (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                quantity REAL NOT NULL,
                price REAL NOT NULL,
                status TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_trades_user_ts ON trades(user_id, created_at DESC)",
            [],
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Load a user's portfolio, creating it with the default balance and
    /// empty holdings on first access.
    pub async fn load_or_create(&self, user_id: &str) -> Result<Portfolio> {
        let conn = self.conn.lock().await;

        let mut stmt = conn.prepare_cached(
            "SELECT balance, holdings_json, avg_cost_json, realized_pnl, version
             FROM portfolios WHERE user_id = ?1 LIMIT 1",
        )?;
        let mut rows = stmt.query(params![user_id])?;
        if let Some(row) = rows.next()? {
            return row_to_portfolio(user_id, row);
        }
        drop(rows);
        drop(stmt);

        let now = Utc::now().timestamp();
        conn.execute(
            "INSERT OR IGNORE INTO portfolios
             (user_id, balance, holdings_json, avg_cost_json, realized_pnl, version, created_at, updated_at)
             VALUES (?1, ?2, '{}', '{}', 0, 0, ?3, ?3)",
            params![user_id, INITIAL_BALANCE, now],
        )?;

        Ok(Portfolio::new(user_id))
    }

    /// Commit an executed trade: conditionally write the updated portfolio
    /// (compare-and-swap on the version column) and append the trade record,
    /// both inside one transaction. On [`CommitError::VersionConflict`] the
    /// caller should re-read and re-execute; nothing has been applied.
    pub async fn commit_trade(
        &self,
        updated: &Portfolio,
        trade: &TradeRecord,
    ) -> Result<(), CommitError> {
        let holdings_json = serde_json::to_string(updated.holdings.shares_map())?;
        let avg_cost_json = serde_json::to_string(updated.holdings.avg_cost_map())?;
        let now = Utc::now().timestamp();

        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(CommitError::from)?;

        let changed = tx.execute(
            "UPDATE portfolios
             SET balance = ?1, holdings_json = ?2, avg_cost_json = ?3,
                 realized_pnl = ?4, version = ?5, updated_at = ?6
             WHERE user_id = ?7 AND version = ?8",
            params![
                updated.balance,
                holdings_json,
                avg_cost_json,
                updated.realized_pnl,
                updated.version,
                now,
                updated.user_id,
                updated.version - 1,
            ],
        )?;
        if changed == 0 {
            // Rolls back implicitly on drop.
            return Err(CommitError::VersionConflict);
        }

        tx.execute(
            "INSERT INTO trades (id, user_id, symbol, side, quantity, price, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                trade.id,
                trade.user_id,
                trade.symbol,
                trade.side.as_str(),
                trade.quantity,
                trade.price,
                trade.status.as_str(),
                trade.created_at,
            ],
        )?;

        tx.commit().map_err(CommitError::from)?;
        Ok(())
    }

    /// Unconditional upsert, used by the raw portfolio-save endpoint. Bumps
    /// the version so in-flight conditional trade commits lose cleanly.
    pub async fn save(&self, portfolio: &Portfolio) -> Result<()> {
        let holdings_json = serde_json::to_string(portfolio.holdings.shares_map())?;
        let avg_cost_json = serde_json::to_string(portfolio.holdings.avg_cost_map())?;
        let now = Utc::now().timestamp();

        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO portfolios
             (user_id, balance, holdings_json, avg_cost_json, realized_pnl, version, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?6)
             ON CONFLICT(user_id) DO UPDATE SET
                balance = excluded.balance,
                holdings_json = excluded.holdings_json,
                avg_cost_json = excluded.avg_cost_json,
                realized_pnl = excluded.realized_pnl,
                version = portfolios.version + 1,
                updated_at = excluded.updated_at",
            params![
                portfolio.user_id,
                portfolio.balance,
                holdings_json,
                avg_cost_json,
                portfolio.realized_pnl,
                now,
            ],
        )?;
        Ok(())
    }

    /// Recent trades for a user, newest first.
    pub async fn recent_trades(&self, user_id: &str, limit: usize) -> Result<Vec<TradeRecord>> {
        let limit = limit.clamp(1, 100) as i64;
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT id, user_id, symbol, side, quantity, price, status, created_at
             FROM trades WHERE user_id = ?1
             ORDER BY created_at DESC, rowid DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![user_id, limit], |row| {
            let side_str: String = row.get(3)?;
            let side = TradeSide::from_str(&side_str).ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(
                    3,
                    rusqlite::types::Type::Text,
                    format!("unknown trade side: {}", side_str).into(),
                )
            })?;
            let status_str: String = row.get(6)?;
            let status = TradeStatus::from_str(&status_str).ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(
                    6,
                    rusqlite::types::Type::Text,
                    format!("unknown trade status: {}", status_str).into(),
                )
            })?;
            Ok(TradeRecord {
                id: row.get(0)?,
                user_id: row.get(1)?,
                symbol: row.get(2)?,
                side,
                quantity: row.get(4)?,
                price: row.get(5)?,
                status,
                created_at: row.get(7)?,
            })
        })?;

        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    /// All portfolios, for the leaderboard.
    pub async fn list_all(&self) -> Result<Vec<Portfolio>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT user_id, balance, holdings_json, avg_cost_json, realized_pnl, version
             FROM portfolios ORDER BY user_id ASC",
        )?;

        let mut out = Vec::new();
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let user_id: String = row.get(0)?;
            let balance: f64 = row.get(1)?;
            let holdings_json: String = row.get(2)?;
            let avg_cost_json: String = row.get(3)?;
            let realized_pnl: f64 = row.get(4)?;
            let version: i64 = row.get(5)?;
            out.push(parse_portfolio(
                &user_id,
                balance,
                &holdings_json,
                &avg_cost_json,
                realized_pnl,
                version,
            )?);
        }
        Ok(out)
    }
}

fn row_to_portfolio(user_id: &str, row: &rusqlite::Row<'_>) -> Result<Portfolio> {
    let balance: f64 = row.get(0)?;
    let holdings_json: String = row.get(1)?;
    let avg_cost_json: String = row.get(2)?;
    let realized_pnl: f64 = row.get(3)?;
    let version: i64 = row.get(4)?;
    parse_portfolio(
        user_id,
        balance,
        &holdings_json,
        &avg_cost_json,
        realized_pnl,
        version,
    )
}

fn parse_portfolio(
    user_id: &str,
    balance: f64,
    holdings_json: &str,
    avg_cost_json: &str,
    realized_pnl: f64,
    version: i64,
) -> Result<Portfolio> {
    let shares: HashMap<String, f64> =
        serde_json::from_str(holdings_json).context("parse holdings column")?;
    let avg_cost: HashMap<String, f64> =
        serde_json::from_str(avg_cost_json).context("parse avg cost column")?;
    Ok(Portfolio {
        user_id: user_id.to_string(),
        balance,
        holdings: Holdings::from_maps(shares, avg_cost),
        realized_pnl,
        version,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::portfolio::engine::TradeRequest;
    use tempfile::NamedTempFile;

    fn create_test_store() -> (PortfolioStore, NamedTempFile) {
        let temp_file = NamedTempFile::new().unwrap();
        let store = PortfolioStore::new(temp_file.path().to_str().unwrap()).unwrap();
        (store, temp_file)
    }

    fn buy(symbol: &str, quantity: f64, price: f64) -> TradeRequest {
        TradeRequest {
            symbol: symbol.to_string(),
            side: TradeSide::Buy,
            quantity,
            price,
        }
    }

    #[tokio::test]
    async fn test_lazy_creation_with_defaults() {
        let (store, _temp) = create_test_store();

        let portfolio = store.load_or_create("user-a").await.unwrap();
        assert_eq!(portfolio.balance, INITIAL_BALANCE);
        assert!(portfolio.holdings.is_empty());
        assert_eq!(portfolio.version, 0);

        // Second load sees the persisted row, not a fresh default.
        let again = store.load_or_create("user-a").await.unwrap();
        assert_eq!(again.balance, INITIAL_BALANCE);
    }

    #[tokio::test]
    async fn test_commit_trade_round_trip() {
        let (store, _temp) = create_test_store();

        let portfolio = store.load_or_create("user-a").await.unwrap();
        let exec = portfolio.execute(&buy("BTCUSDT", 10.0, 100.0)).unwrap();
        let trade = TradeRecord::completed("user-a", &exec.symbol, TradeSide::Buy, 10.0, 100.0);
        store.commit_trade(&exec.portfolio, &trade).await.unwrap();

        let loaded = store.load_or_create("user-a").await.unwrap();
        assert_eq!(loaded.balance, 99_000.0);
        assert_eq!(loaded.holdings.quantity("BTCUSDT"), 10.0);
        assert_eq!(loaded.holdings.average_cost("BTCUSDT"), 100.0);
        assert_eq!(loaded.version, 1);

        let trades = store.recent_trades("user-a", 20).await.unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].symbol, "BTCUSDT");
        assert_eq!(trades[0].status, TradeStatus::Completed);
    }

    #[tokio::test]
    async fn test_version_conflict_applies_nothing() {
        let (store, _temp) = create_test_store();

        let portfolio = store.load_or_create("user-a").await.unwrap();

        // Two executions from the same snapshot: only the first commit wins.
        let first = portfolio.execute(&buy("BTCUSDT", 1.0, 100.0)).unwrap();
        let second = portfolio.execute(&buy("ETHUSDT", 1.0, 2_000.0)).unwrap();

        let t1 = TradeRecord::completed("user-a", "BTCUSDT", TradeSide::Buy, 1.0, 100.0);
        store.commit_trade(&first.portfolio, &t1).await.unwrap();

        let t2 = TradeRecord::completed("user-a", "ETHUSDT", TradeSide::Buy, 1.0, 2_000.0);
        let err = store.commit_trade(&second.portfolio, &t2).await.unwrap_err();
        assert!(matches!(err, CommitError::VersionConflict));

        // The losing trade left no record and no portfolio change.
        let loaded = store.load_or_create("user-a").await.unwrap();
        assert_eq!(loaded.holdings.quantity("ETHUSDT"), 0.0);
        assert_eq!(store.recent_trades("user-a", 20).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_recent_trades_newest_first() {
        let (store, _temp) = create_test_store();

        let mut portfolio = store.load_or_create("user-a").await.unwrap();
        for (i, symbol) in ["AAAUSDT", "BBBUSDT", "CCCUSDT"].iter().enumerate() {
            let exec = portfolio.execute(&buy(symbol, 1.0, 10.0)).unwrap();
            let mut trade = TradeRecord::completed("user-a", symbol, TradeSide::Buy, 1.0, 10.0);
            trade.created_at = 1_000 + i as i64;
            store.commit_trade(&exec.portfolio, &trade).await.unwrap();
            portfolio = exec.portfolio;
        }

        let trades = store.recent_trades("user-a", 2).await.unwrap();
        assert_eq!(trades.len(), 2);
        assert_eq!(trades[0].symbol, "CCCUSDT");
        assert_eq!(trades[1].symbol, "BBBUSDT");
    }

    #[tokio::test]
    async fn test_save_upsert_bumps_version() {
        let (store, _temp) = create_test_store();

        let mut portfolio = store.load_or_create("user-a").await.unwrap();
        portfolio.balance = 50_000.0;
        store.save(&portfolio).await.unwrap();

        let loaded = store.load_or_create("user-a").await.unwrap();
        assert_eq!(loaded.balance, 50_000.0);
        assert_eq!(loaded.version, 1);

        let all = store.list_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].user_id, "user-a");
    }

    #[tokio::test]
    async fn test_corrupt_side_column_is_an_error() {
        let (store, _temp) = create_test_store();

        {
            let conn = store.conn.lock().await;
            conn.execute(
                "INSERT INTO trades (id, user_id, symbol, side, quantity, price, status, created_at)
                 VALUES ('t1', 'user-a', 'BTCUSDT', 'HOLD', 1.0, 100.0, 'completed', 1)",
                [],
            )
            .unwrap();
        }

        // An unrecognized side must surface, not be rewritten as a buy.
        let err = store.recent_trades("user-a", 10).await.unwrap_err();
        assert!(err.to_string().contains("unknown trade side"));
    }

    #[tokio::test]
    async fn test_corrupt_status_column_is_an_error() {
        let (store, _temp) = create_test_store();

        {
            let conn = store.conn.lock().await;
            conn.execute(
                "INSERT INTO trades (id, user_id, symbol, side, quantity, price, status, created_at)
                 VALUES ('t1', 'user-a', 'BTCUSDT', 'BUY', 1.0, 100.0, 'settled', 1)",
                [],
            )
            .unwrap();
        }

        let err = store.recent_trades("user-a", 10).await.unwrap_err();
        assert!(err.to_string().contains("unknown trade status"));
    }
}
