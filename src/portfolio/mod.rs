//! Portfolio accounting: the trade-execution engine and its SQLite store.

pub mod engine;
pub mod store;

pub use engine::{
    Holdings, Portfolio, TradeError, TradeExecution, TradeRequest, TradeSide, TradeStatus,
    INITIAL_BALANCE,
};
pub use store::{CommitError, PortfolioStore, TradeRecord};
