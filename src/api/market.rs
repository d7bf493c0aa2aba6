//! Market-data proxy and leaderboard endpoints.

use crate::api::{ApiError, AppState};
use crate::auth::models::Claims;
use crate::leaderboard::{self, Leaderboard};
use crate::market::{Candle, SymbolInfo, TickerStats};
use axum::{
    extract::{Query, State},
    Extension, Json,
};
use chrono::Utc;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

const OHLC_TTL: Duration = Duration::from_secs(15);
const DEFAULT_OHLC_LIMIT: usize = 200;
const MAX_OHLC_LIMIT: usize = 1000;
const TICKERS_TTL: Duration = Duration::from_secs(10);
const SYMBOLS_TTL: Duration = Duration::from_secs(12 * 3600);
const PRICES_TTL: Duration = Duration::from_secs(10);

const LEADERBOARD_QUOTE: &str = "USDT";
const DEFAULT_LEADERBOARD_LIMIT: usize = 4;
const MAX_LEADERBOARD_LIMIT: usize = 20;

/// GET /api/health
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "timestamp": Utc::now().timestamp(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct OhlcQuery {
    pub symbol: Option<String>,
    pub interval: Option<String>,
    pub limit: Option<usize>,
}

/// GET /api/market/ohlc
pub async fn get_ohlc(
    State(state): State<AppState>,
    Query(query): Query<OhlcQuery>,
) -> Result<Json<Vec<Candle>>, ApiError> {
    let symbol = query
        .symbol
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_ascii_uppercase)
        .ok_or_else(|| ApiError::BadRequest("symbol is required".to_string()))?;
    let interval = query.interval.unwrap_or_else(|| "1h".to_string());
    let limit = ohlc_limit(query.limit);

    let key = format!("ohlc:{}:{}:{}", symbol, interval, limit);
    let candles = state
        .cache
        .get_or_fetch(&key, OHLC_TTL, || {
            let market = state.market.clone();
            let symbol = symbol.clone();
            let interval = interval.clone();
            async move { market.fetch_ohlc(&symbol, &interval, limit).await }
        })
        .await
        .map_err(ApiError::Upstream)?;

    Ok(Json(candles))
}

fn ohlc_limit(requested: Option<usize>) -> usize {
    requested.unwrap_or(DEFAULT_OHLC_LIMIT).clamp(1, MAX_OHLC_LIMIT)
}

#[derive(Debug, Deserialize)]
pub struct TickersQuery {
    pub symbols: Option<String>,
}

/// GET /api/market/tickers
///
/// `symbols` is a comma-separated list, e.g. `symbols=BTCUSDT,ETHUSDT`.
pub async fn get_tickers(
    State(state): State<AppState>,
    Query(query): Query<TickersQuery>,
) -> Result<Json<Vec<TickerStats>>, ApiError> {
    let mut symbols: Vec<String> = query
        .symbols
        .as_deref()
        .unwrap_or("")
        .split(',')
        .map(|s| s.trim().to_ascii_uppercase())
        .filter(|s| !s.is_empty())
        .collect();
    if symbols.is_empty() {
        return Err(ApiError::BadRequest("symbols is required".to_string()));
    }
    symbols.sort();
    symbols.dedup();

    let key = format!("tickers:{}", symbols.join(","));
    let stats = state
        .cache
        .get_or_fetch(&key, TICKERS_TTL, || {
            let market = state.market.clone();
            let symbols = symbols.clone();
            async move { market.fetch_tickers(&symbols).await }
        })
        .await
        .map_err(ApiError::Upstream)?;

    Ok(Json(stats))
}

#[derive(Debug, Deserialize)]
pub struct SymbolsQuery {
    pub quote: Option<String>,
}

/// GET /api/market/symbols
pub async fn get_symbols(
    State(state): State<AppState>,
    Query(query): Query<SymbolsQuery>,
) -> Result<Json<Vec<SymbolInfo>>, ApiError> {
    let quote = query
        .quote
        .map(|q| q.trim().to_ascii_uppercase())
        .filter(|q| !q.is_empty())
        .unwrap_or_else(|| LEADERBOARD_QUOTE.to_string());

    let key = format!("symbols:{}", quote);
    let symbols = state
        .cache
        .get_or_fetch(&key, SYMBOLS_TTL, || {
            let market = state.market.clone();
            let quote = quote.clone();
            async move { market.fetch_symbols(&quote).await }
        })
        .await
        .map_err(ApiError::Upstream)?;

    Ok(Json(symbols))
}

#[derive(Debug, Deserialize)]
pub struct LeaderboardQuery {
    pub limit: Option<usize>,
}

/// GET /api/leaderboard
///
/// Open endpoint; a valid bearer token additionally yields the requester's
/// own row even when they fall outside the top-N.
pub async fn get_leaderboard(
    State(state): State<AppState>,
    claims: Option<Extension<Claims>>,
    Query(query): Query<LeaderboardQuery>,
) -> Result<Json<Leaderboard>, ApiError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LEADERBOARD_LIMIT)
        .clamp(1, MAX_LEADERBOARD_LIMIT);

    let requesting_user = match &claims {
        Some(Extension(c)) => {
            // Make sure first-time users appear with the starting balance.
            state.portfolios.load_or_create(&c.sub).await?;
            c.sub.clone()
        }
        None => String::new(),
    };

    let portfolios = state.portfolios.list_all().await?;
    let symbols = leaderboard::quotable_symbols(&portfolios, LEADERBOARD_QUOTE);

    let prices: HashMap<String, f64> = if symbols.is_empty() {
        HashMap::new()
    } else {
        let key = format!("prices:{}", symbols.join(","));
        state
            .cache
            .get_or_fetch(&key, PRICES_TTL, || {
                let market = state.market.clone();
                let symbols = symbols.clone();
                async move { market.last_prices(&symbols).await }
            })
            .await
            .map_err(ApiError::Upstream)?
    };

    let display_names = state.users.display_names().map_err(ApiError::Internal)?;

    Ok(Json(leaderboard::rank(
        &portfolios,
        &prices,
        limit,
        &requesting_user,
        &display_names,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ohlc_limit_default_and_clamp() {
        assert_eq!(ohlc_limit(None), 200);
        assert_eq!(ohlc_limit(Some(0)), 1);
        assert_eq!(ohlc_limit(Some(50)), 50);
        assert_eq!(ohlc_limit(Some(5_000)), 1000);
    }
}
