//! HTTP API: shared state, error mapping, and endpoint handlers.

pub mod market;
pub mod trading;

use crate::auth::UserStore;
use crate::market::{BinanceClient, MarketCache};
use crate::portfolio::{CommitError, PortfolioStore, TradeError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use std::sync::Arc;
use tracing::error;

#[derive(Clone)]
pub struct AppState {
    pub portfolios: Arc<PortfolioStore>,
    pub users: Arc<UserStore>,
    pub market: Arc<BinanceClient>,
    pub cache: Arc<MarketCache>,
}

/// Portfolio, trade, and profile routes. Mount behind the auth middleware.
pub fn trading_router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/portfolio",
            get(trading::get_portfolio).post(trading::save_portfolio),
        )
        .route(
            "/api/trades",
            get(trading::list_trades).post(trading::execute_trade),
        )
        .route(
            "/api/profile",
            get(trading::get_profile).post(trading::update_profile),
        )
}

/// Health and market-data proxy routes. No authentication required.
pub fn market_router() -> Router<AppState> {
    Router::new()
        .route("/api/health", get(market::health))
        .route("/api/market/ohlc", get(market::get_ohlc))
        .route("/api/market/tickers", get(market::get_tickers))
        .route("/api/market/symbols", get(market::get_symbols))
}

/// Error surface for portfolio, trade, and market endpoints.
#[derive(Debug)]
pub enum ApiError {
    /// Malformed request body or query parameters.
    BadRequest(String),
    /// A well-formed trade the accounting rules refuse.
    TradeRejected(TradeError),
    /// The trade lost the concurrency race too many times.
    Conflict,
    NotFound(&'static str),
    /// The market-data upstream failed and no cached fallback existed.
    Upstream(anyhow::Error),
    Internal(anyhow::Error),
}

impl From<TradeError> for ApiError {
    fn from(e: TradeError) -> Self {
        ApiError::TradeRejected(e)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(e)
    }
}

impl From<CommitError> for ApiError {
    fn from(e: CommitError) -> Self {
        match e {
            CommitError::VersionConflict => ApiError::Conflict,
            CommitError::Storage(e) => ApiError::Internal(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone()),
            ApiError::TradeRejected(e) => {
                let code = match e {
                    TradeError::InsufficientBalance { .. } => "insufficient_balance",
                    TradeError::InsufficientHoldings { .. } => "insufficient_holdings",
                    _ => "invalid_trade",
                };
                (StatusCode::BAD_REQUEST, code, e.to_string())
            }
            ApiError::Conflict => (
                StatusCode::CONFLICT,
                "conflict",
                "Portfolio was modified concurrently, please retry".to_string(),
            ),
            ApiError::NotFound(what) => {
                (StatusCode::NOT_FOUND, "not_found", format!("{} not found", what))
            }
            ApiError::Upstream(e) => {
                error!("market upstream error: {:#}", e);
                (
                    StatusCode::BAD_GATEWAY,
                    "upstream_error",
                    "Market data provider unavailable".to_string(),
                )
            }
            ApiError::Internal(e) => {
                error!("internal error: {:#}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "Internal server error".to_string(),
                )
            }
        };

        (
            status,
            Json(serde_json::json!({ "error": code, "message": message })),
        )
            .into_response()
    }
}
