//! Portfolio accounting engine.
//!
//! Applies a BUY or SELL to a portfolio snapshot: cash balance,
//! weighted-average cost basis, and realized P&L. Pure state in, state out;
//! persistence lives in [`crate::portfolio::store`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Cash balance every portfolio starts with.
pub const INITIAL_BALANCE: f64 = 100_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeSide {
    #[serde(rename = "BUY")]
    Buy,
    #[serde(rename = "SELL")]
    Sell,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "BUY",
            TradeSide::Sell => "SELL",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "BUY" => Some(TradeSide::Buy),
            "SELL" => Some(TradeSide::Sell),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeStatus {
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "cancelled")]
    Cancelled,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Completed => "completed",
            TradeStatus::Pending => "pending",
            TradeStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "completed" => Some(TradeStatus::Completed),
            "pending" => Some(TradeStatus::Pending),
            "cancelled" => Some(TradeStatus::Cancelled),
            _ => None,
        }
    }
}

/// Open positions: symbol -> (shares, average entry price).
///
/// Fields are private so the invariant holds by construction: a symbol has an
/// average cost entry if and only if it has a share count, and share counts
/// are strictly positive. Closed positions are removed, never stored as zero.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Holdings {
    shares: HashMap<String, f64>,
    avg_cost: HashMap<String, f64>,
}

impl Holdings {
    /// Rebuild from raw maps (e.g. a stored row), dropping zero/negative
    /// quantities and any average-cost entry without a matching position.
    pub fn from_maps(shares: HashMap<String, f64>, avg_cost: HashMap<String, f64>) -> Self {
        let mut out = Self::default();
        for (symbol, qty) in shares {
            if qty > 0.0 {
                let avg = avg_cost.get(&symbol).copied().unwrap_or(0.0);
                out.set(&symbol, qty, avg);
            }
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.shares.is_empty()
    }

    pub fn quantity(&self, symbol: &str) -> f64 {
        self.shares.get(symbol).copied().unwrap_or(0.0)
    }

    pub fn average_cost(&self, symbol: &str) -> f64 {
        self.avg_cost.get(symbol).copied().unwrap_or(0.0)
    }

    /// Set or close a position. A non-positive quantity removes both the
    /// share count and the cost basis, so a future re-entry starts fresh.
    fn set(&mut self, symbol: &str, quantity: f64, avg_cost: f64) {
        if quantity > 0.0 {
            self.shares.insert(symbol.to_string(), quantity);
            self.avg_cost.insert(symbol.to_string(), avg_cost);
        } else {
            self.shares.remove(symbol);
            self.avg_cost.remove(symbol);
        }
    }

    /// Iterate open positions as (symbol, shares, average cost).
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64, f64)> {
        self.shares.iter().map(|(symbol, qty)| {
            let avg = self.avg_cost.get(symbol).copied().unwrap_or(0.0);
            (symbol.as_str(), *qty, avg)
        })
    }

    pub fn shares_map(&self) -> &HashMap<String, f64> {
        &self.shares
    }

    pub fn avg_cost_map(&self) -> &HashMap<String, f64> {
        &self.avg_cost
    }
}

/// One portfolio document per user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Portfolio {
    pub user_id: String,
    pub balance: f64,
    pub holdings: Holdings,
    pub realized_pnl: f64,
    /// Bumped on every committed trade; the store's conditional write
    /// compares against it so a racing trade for the same user cannot
    /// silently lose an update.
    pub version: i64,
}

impl Portfolio {
    pub fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            balance: INITIAL_BALANCE,
            holdings: Holdings::default(),
            realized_pnl: 0.0,
            version: 0,
        }
    }

    /// Apply a validated trade request to this snapshot.
    ///
    /// Returns the updated portfolio and the realized P&L attributable to
    /// this one trade (always 0 for buys). The snapshot itself is untouched,
    /// so a rejected trade has no partial effect by construction.
    pub fn execute(&self, req: &TradeRequest) -> Result<TradeExecution, TradeError> {
        let symbol = req.validate()?;

        let cost = req.quantity * req.price;
        let current_qty = self.holdings.quantity(&symbol);
        let current_avg = self.holdings.average_cost(&symbol);

        let mut next = self.clone();
        let realized_delta = match req.side {
            TradeSide::Buy => {
                if self.balance < cost {
                    return Err(TradeError::InsufficientBalance {
                        required: cost,
                        available: self.balance,
                    });
                }
                next.balance -= cost;
                let new_qty = current_qty + req.quantity;
                // Weighted average from the pre-trade average and quantity, so
                // repeated partial buys converge to the true blended cost.
                let new_avg = if current_qty > 0.0 {
                    (current_avg * current_qty + req.price * req.quantity) / new_qty
                } else {
                    req.price
                };
                next.holdings.set(&symbol, new_qty, new_avg);
                0.0
            }
            TradeSide::Sell => {
                // No short selling.
                if current_qty < req.quantity {
                    return Err(TradeError::InsufficientHoldings {
                        requested: req.quantity,
                        held: current_qty,
                    });
                }
                next.balance += cost;
                let new_qty = current_qty - req.quantity;
                // Realized P&L against the average cost basis at time of
                // sale; the basis itself does not change on a partial sell.
                let realized = (req.price - current_avg) * req.quantity;
                next.realized_pnl += realized;
                next.holdings.set(&symbol, new_qty, current_avg);
                realized
            }
        };

        next.version = self.version + 1;
        Ok(TradeExecution {
            portfolio: next,
            symbol,
            realized_delta,
        })
    }
}

/// Incoming trade request, as the API boundary deserializes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRequest {
    pub symbol: String,
    pub side: TradeSide,
    pub quantity: f64,
    pub price: f64,
}

impl TradeRequest {
    /// Check preconditions and return the normalized (uppercase) symbol.
    pub fn validate(&self) -> Result<String, TradeError> {
        let symbol = self.symbol.trim().to_ascii_uppercase();
        if symbol.is_empty() {
            return Err(TradeError::EmptySymbol);
        }
        if !(self.quantity > 0.0) {
            return Err(TradeError::NonPositiveQuantity);
        }
        if !(self.price > 0.0) {
            return Err(TradeError::NonPositivePrice);
        }
        Ok(symbol)
    }
}

/// Result of a successful execution, prior to persistence.
#[derive(Debug, Clone)]
pub struct TradeExecution {
    pub portfolio: Portfolio,
    /// Normalized symbol the trade applied to.
    pub symbol: String,
    /// Realized profit for this specific transaction; 0 for buys.
    pub realized_delta: f64,
}

/// Rejections raised before any state is touched.
#[derive(Debug, Clone, PartialEq)]
pub enum TradeError {
    EmptySymbol,
    NonPositiveQuantity,
    NonPositivePrice,
    InsufficientBalance { required: f64, available: f64 },
    InsufficientHoldings { requested: f64, held: f64 },
}

impl TradeError {
    /// True for validation failures (malformed request), false for
    /// business-rule rejections raised after reading current state.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            TradeError::EmptySymbol
                | TradeError::NonPositiveQuantity
                | TradeError::NonPositivePrice
        )
    }
}

impl std::fmt::Display for TradeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeError::EmptySymbol => write!(f, "Missing or invalid symbol"),
            TradeError::NonPositiveQuantity => write!(f, "Quantity must be greater than zero"),
            TradeError::NonPositivePrice => write!(f, "Price must be greater than zero"),
            TradeError::InsufficientBalance {
                required,
                available,
            } => write!(
                f,
                "Insufficient balance: need {:.2}, have {:.2}",
                required, available
            ),
            TradeError::InsufficientHoldings { requested, held } => write!(
                f,
                "Insufficient holdings: requested {}, holding {}",
                requested, held
            ),
        }
    }
}

impl std::error::Error for TradeError {}
