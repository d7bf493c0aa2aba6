//! End-to-end trade flow against a real SQLite database: execute trades via
//! the accounting engine, commit them through the version-guarded store, and
//! check balances, cost basis, realized P&L, and trade history.

use papertrader_backend::leaderboard;
use papertrader_backend::portfolio::{
    CommitError, PortfolioStore, TradeRecord, TradeRequest, TradeSide, INITIAL_BALANCE,
};
use std::collections::HashMap;
use tempfile::NamedTempFile;

fn trade(symbol: &str, side: TradeSide, quantity: f64, price: f64) -> TradeRequest {
    TradeRequest {
        symbol: symbol.to_string(),
        side,
        quantity,
        price,
    }
}

async fn commit(
    store: &PortfolioStore,
    user: &str,
    req: &TradeRequest,
) -> anyhow::Result<f64> {
    let current = store.load_or_create(user).await?;
    let exec = current.execute(req)?;
    let record = TradeRecord::completed(user, &exec.symbol, req.side, req.quantity, req.price);
    store.commit_trade(&exec.portfolio, &record).await?;
    Ok(exec.realized_delta)
}

#[tokio::test]
async fn test_buy_sell_sequence_end_to_end() {
    let temp = NamedTempFile::new().unwrap();
    let store = PortfolioStore::new(temp.path().to_str().unwrap()).unwrap();
    let user = "user-1";

    // Buy 10 @ 100, buy 10 @ 200, sell 15 @ 160.
    commit(&store, user, &trade("BTCUSDT", TradeSide::Buy, 10.0, 100.0))
        .await
        .unwrap();
    commit(&store, user, &trade("btcusdt", TradeSide::Buy, 10.0, 200.0))
        .await
        .unwrap();

    let mid = store.load_or_create(user).await.unwrap();
    assert_eq!(mid.balance, 97_000.0);
    assert_eq!(mid.holdings.quantity("BTCUSDT"), 20.0);
    assert_eq!(mid.holdings.average_cost("BTCUSDT"), 150.0);

    let realized = commit(&store, user, &trade("BTCUSDT", TradeSide::Sell, 15.0, 160.0))
        .await
        .unwrap();
    assert_eq!(realized, 150.0);

    let end = store.load_or_create(user).await.unwrap();
    assert_eq!(end.balance, 99_400.0);
    assert_eq!(end.holdings.quantity("BTCUSDT"), 5.0);
    // Partial sell keeps the basis.
    assert_eq!(end.holdings.average_cost("BTCUSDT"), 150.0);
    assert_eq!(end.realized_pnl, 150.0);
    assert_eq!(end.version, 3);
}

#[tokio::test]
async fn test_rejected_trade_leaves_everything_untouched() {
    let temp = NamedTempFile::new().unwrap();
    let store = PortfolioStore::new(temp.path().to_str().unwrap()).unwrap();
    let user = "user-2";

    commit(&store, user, &trade("ETHUSDT", TradeSide::Buy, 1.0, 2_000.0))
        .await
        .unwrap();

    // Overspend and oversell must both fail without touching state.
    assert!(
        commit(&store, user, &trade("ETHUSDT", TradeSide::Buy, 1_000.0, 2_000.0))
            .await
            .is_err()
    );
    assert!(
        commit(&store, user, &trade("ETHUSDT", TradeSide::Sell, 2.0, 2_000.0))
            .await
            .is_err()
    );

    let portfolio = store.load_or_create(user).await.unwrap();
    assert_eq!(portfolio.balance, INITIAL_BALANCE - 2_000.0);
    assert_eq!(portfolio.holdings.quantity("ETHUSDT"), 1.0);
    assert_eq!(portfolio.version, 1);

    let trades = store.recent_trades(user, 10).await.unwrap();
    assert_eq!(trades.len(), 1);
}

#[tokio::test]
async fn test_stale_snapshot_commit_is_refused() {
    let temp = NamedTempFile::new().unwrap();
    let store = PortfolioStore::new(temp.path().to_str().unwrap()).unwrap();
    let user = "user-3";

    let base = store.load_or_create(user).await.unwrap();

    // Two executions off the same snapshot; only the first may land.
    let first = base
        .execute(&trade("BTCUSDT", TradeSide::Buy, 1.0, 100.0))
        .unwrap();
    let second = base
        .execute(&trade("ETHUSDT", TradeSide::Buy, 1.0, 200.0))
        .unwrap();

    let rec1 = TradeRecord::completed(user, "BTCUSDT", TradeSide::Buy, 1.0, 100.0);
    store.commit_trade(&first.portfolio, &rec1).await.unwrap();

    let rec2 = TradeRecord::completed(user, "ETHUSDT", TradeSide::Buy, 1.0, 200.0);
    let err = store.commit_trade(&second.portfolio, &rec2).await;
    assert!(matches!(err, Err(CommitError::VersionConflict)));

    // The loser re-reads and re-executes successfully.
    let realized = commit(&store, user, &trade("ETHUSDT", TradeSide::Buy, 1.0, 200.0))
        .await
        .unwrap();
    assert_eq!(realized, 0.0);

    let portfolio = store.load_or_create(user).await.unwrap();
    assert_eq!(portfolio.balance, INITIAL_BALANCE - 300.0);
    assert_eq!(portfolio.holdings.quantity("BTCUSDT"), 1.0);
    assert_eq!(portfolio.holdings.quantity("ETHUSDT"), 1.0);

    let trades = store.recent_trades(user, 10).await.unwrap();
    assert_eq!(trades.len(), 2);
}

#[tokio::test]
async fn test_leaderboard_over_persisted_portfolios() {
    let temp = NamedTempFile::new().unwrap();
    let store = PortfolioStore::new(temp.path().to_str().unwrap()).unwrap();

    // Trader A converts 10k of cash into BTC that then doubles; trader B
    // stays in cash; trader C holds a symbol we cannot price.
    commit(&store, "a", &trade("BTCUSDT", TradeSide::Buy, 10.0, 1_000.0))
        .await
        .unwrap();
    store.load_or_create("b").await.unwrap();
    commit(&store, "c", &trade("XYZEUR", TradeSide::Buy, 5.0, 100.0))
        .await
        .unwrap();

    let portfolios = store.list_all().await.unwrap();
    assert_eq!(portfolios.len(), 3);

    let symbols = leaderboard::quotable_symbols(&portfolios, "USDT");
    assert_eq!(symbols, vec!["BTCUSDT".to_string()]);

    let mut prices = HashMap::new();
    prices.insert("BTCUSDT".to_string(), 2_000.0);

    let board = leaderboard::rank(&portfolios, &prices, 2, "c", &HashMap::new());
    assert_eq!(board.top.len(), 2);
    assert_eq!(board.top[0].user_id, "a");
    assert_eq!(board.top[0].equity, 110_000.0);
    assert_eq!(board.top[0].return_pct, 10.0);
    assert_eq!(board.top[1].user_id, "b");
    assert_eq!(board.top[1].equity, INITIAL_BALANCE);

    // Requester is outside the top-N but still gets their own row; the
    // unpriceable holding contributes nothing to equity.
    let you = board.you.unwrap();
    assert_eq!(you.user_id, "c");
    assert_eq!(you.rank, 3);
    assert_eq!(you.equity, INITIAL_BALANCE - 500.0);
}
