//! Leaderboard ranking over portfolios and current market prices.
//!
//! Read-only computation: equity is cash plus the marked value of open
//! holdings, return is measured against the fixed starting balance. Symbols
//! without a usable price contribute nothing to equity.

use crate::portfolio::{Portfolio, INITIAL_BALANCE};
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize)]
pub struct LeaderboardRow {
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub equity: f64,
    pub return_pct: f64,
    pub rank: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct Leaderboard {
    pub top: Vec<LeaderboardRow>,
    /// The requesting user's own row, present even when outside the top-N.
    pub you: Option<LeaderboardRow>,
}

/// Cash balance plus marked value of open holdings. Unpriceable symbols
/// (missing or non-positive price) are ignored in the sum.
pub fn equity(portfolio: &Portfolio, prices: &HashMap<String, f64>) -> f64 {
    let mut positions_value = 0.0;
    for (symbol, qty, _avg) in portfolio.holdings.iter() {
        if let Some(&price) = prices.get(symbol) {
            if price > 0.0 && qty > 0.0 {
                positions_value += qty * price;
            }
        }
    }
    portfolio.balance + positions_value
}

pub fn return_pct(equity: f64) -> f64 {
    (equity - INITIAL_BALANCE) / INITIAL_BALANCE * 100.0
}

/// Unique symbols held across all portfolios that can be marked against the
/// given quote asset (e.g. "USDT").
pub fn quotable_symbols(portfolios: &[Portfolio], quote: &str) -> Vec<String> {
    let mut unique: Vec<String> = Vec::new();
    for p in portfolios {
        for (symbol, qty, _avg) in p.holdings.iter() {
            if qty > 0.0 && symbol.ends_with(quote) && !unique.iter().any(|s| s == symbol) {
                unique.push(symbol.to_string());
            }
        }
    }
    unique.sort();
    unique
}

/// Rank portfolios by descending equity, truncated to `limit`, and include
/// the requesting user's row regardless of rank.
pub fn rank(
    portfolios: &[Portfolio],
    prices: &HashMap<String, f64>,
    limit: usize,
    requesting_user: &str,
    display_names: &HashMap<String, String>,
) -> Leaderboard {
    let mut rows: Vec<LeaderboardRow> = portfolios
        .iter()
        .map(|p| {
            let eq = equity(p, prices);
            LeaderboardRow {
                user_id: p.user_id.clone(),
                display_name: display_names.get(&p.user_id).cloned(),
                equity: eq,
                return_pct: return_pct(eq),
                rank: 0,
            }
        })
        .collect();

    rows.sort_by(|a, b| {
        b.equity
            .partial_cmp(&a.equity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    for (i, row) in rows.iter_mut().enumerate() {
        row.rank = i + 1;
    }

    let you = rows.iter().find(|r| r.user_id == requesting_user).cloned();
    rows.truncate(limit);

    Leaderboard { top: rows, you }
}
