//! Portfolio, trade, and profile endpoints.

use crate::api::{ApiError, AppState};
use crate::auth::models::{Claims, ProfileUpdate, UserResponse};
use crate::portfolio::{
    CommitError, Holdings, Portfolio, TradeRecord, TradeRequest, TradeStatus,
};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

/// Bounded retries for the optimistic trade commit. A version conflict means
/// nothing was applied, so re-reading and re-executing is safe.
const MAX_COMMIT_RETRIES: usize = 3;

#[derive(Debug, Serialize)]
pub struct PortfolioResponse {
    pub user_id: String,
    pub balance: f64,
    pub holdings: HashMap<String, f64>,
    pub avg_cost: HashMap<String, f64>,
    pub realized_pnl: f64,
}

impl PortfolioResponse {
    fn from_portfolio(p: &Portfolio) -> Self {
        Self {
            user_id: p.user_id.clone(),
            balance: p.balance,
            holdings: p.holdings.shares_map().clone(),
            avg_cost: p.holdings.avg_cost_map().clone(),
            realized_pnl: p.realized_pnl,
        }
    }
}

/// GET /api/portfolio
pub async fn get_portfolio(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<PortfolioResponse>, ApiError> {
    let portfolio = state.portfolios.load_or_create(&claims.sub).await?;
    Ok(Json(PortfolioResponse::from_portfolio(&portfolio)))
}

#[derive(Debug, Deserialize)]
pub struct SavePortfolioRequest {
    pub balance: Option<f64>,
    pub holdings: Option<HashMap<String, f64>>,
    pub avg_cost: Option<HashMap<String, f64>>,
    pub realized_pnl: Option<f64>,
}

/// POST /api/portfolio
///
/// Raw snapshot save used by the frontend's local-first sync. The trade
/// endpoint is the authoritative mutation path; this one writes whatever
/// the client sends, after shape checks.
pub async fn save_portfolio(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<SavePortfolioRequest>,
) -> Result<Json<PortfolioResponse>, ApiError> {
    let balance = payload
        .balance
        .ok_or_else(|| ApiError::BadRequest("balance is required".to_string()))?;
    let holdings = payload
        .holdings
        .ok_or_else(|| ApiError::BadRequest("holdings is required".to_string()))?;
    let avg_cost = payload
        .avg_cost
        .ok_or_else(|| ApiError::BadRequest("avg_cost is required".to_string()))?;
    if !balance.is_finite() || balance < 0.0 {
        return Err(ApiError::BadRequest(
            "balance must be a non-negative number".to_string(),
        ));
    }

    let current = state.portfolios.load_or_create(&claims.sub).await?;
    let portfolio = Portfolio {
        user_id: claims.sub.clone(),
        balance,
        holdings: Holdings::from_maps(holdings, avg_cost),
        realized_pnl: payload.realized_pnl.unwrap_or(current.realized_pnl),
        version: current.version,
    };

    state.portfolios.save(&portfolio).await?;
    Ok(Json(PortfolioResponse::from_portfolio(&portfolio)))
}

#[derive(Debug, Serialize)]
pub struct TradeResponse {
    pub message: &'static str,
    pub data: ExecutedTrade,
}

#[derive(Debug, Serialize)]
pub struct ExecutedTrade {
    pub id: String,
    pub symbol: String,
    pub side: String,
    pub quantity: f64,
    pub price: f64,
    pub status: TradeStatus,
    pub created_at: i64,
    /// Profit realized by this trade alone; 0 for buys.
    pub realized_profit: f64,
    pub balance: f64,
}

/// POST /api/trades
pub async fn execute_trade(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<TradeRequest>,
) -> Result<(StatusCode, Json<TradeResponse>), ApiError> {
    for attempt in 0..MAX_COMMIT_RETRIES {
        let current = state.portfolios.load_or_create(&claims.sub).await?;
        let exec = current.execute(&req)?;
        let record =
            TradeRecord::completed(&claims.sub, &exec.symbol, req.side, req.quantity, req.price);

        match state.portfolios.commit_trade(&exec.portfolio, &record).await {
            Ok(()) => {
                info!(
                    user = %claims.username,
                    symbol = %exec.symbol,
                    side = req.side.as_str(),
                    quantity = req.quantity,
                    price = req.price,
                    realized = exec.realized_delta,
                    "trade executed"
                );
                return Ok((
                    StatusCode::CREATED,
                    Json(TradeResponse {
                        message: "Trade executed",
                        data: ExecutedTrade {
                            id: record.id,
                            symbol: record.symbol,
                            side: record.side.as_str().to_string(),
                            quantity: record.quantity,
                            price: record.price,
                            status: record.status,
                            created_at: record.created_at,
                            realized_profit: exec.realized_delta,
                            balance: exec.portfolio.balance,
                        },
                    }),
                ));
            }
            Err(CommitError::VersionConflict) => {
                debug!(
                    user = %claims.username,
                    attempt = attempt + 1,
                    "trade commit lost version race, retrying"
                );
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(ApiError::Conflict)
}

#[derive(Debug, Deserialize)]
pub struct TradesQuery {
    pub limit: Option<usize>,
}

/// GET /api/trades
pub async fn list_trades(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<TradesQuery>,
) -> Result<Json<Vec<TradeRecord>>, ApiError> {
    let limit = query.limit.unwrap_or(20);
    let trades = state.portfolios.recent_trades(&claims.sub, limit).await?;
    Ok(Json(trades))
}

/// GET /api/profile
pub async fn get_profile(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<UserResponse>, ApiError> {
    let user = state
        .users
        .get_user_by_id(&claims.sub)
        .map_err(ApiError::Internal)?
        .ok_or(ApiError::NotFound("user"))?;
    Ok(Json(UserResponse::from_user(&user)))
}

/// POST /api/profile
pub async fn update_profile(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<ProfileUpdate>,
) -> Result<Json<UserResponse>, ApiError> {
    if payload.display_name.is_none() && payload.photo_url.is_none() {
        return Err(ApiError::BadRequest(
            "display_name or photo_url is required".to_string(),
        ));
    }
    if let Some(name) = payload.display_name.as_deref() {
        if name.trim().is_empty() {
            return Err(ApiError::BadRequest(
                "display_name must not be empty".to_string(),
            ));
        }
    }

    let user = state
        .users
        .update_profile(
            &claims.sub,
            payload.display_name.as_deref(),
            payload.photo_url.as_deref(),
        )
        .map_err(ApiError::Internal)?
        .ok_or(ApiError::NotFound("user"))?;

    Ok(Json(UserResponse::from_user(&user)))
}
