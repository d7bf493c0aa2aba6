//! Virtual crypto trading backend: portfolio accounting, JWT auth,
//! Binance market-data proxy, and a returns leaderboard.

pub mod api;
pub mod auth;
pub mod leaderboard;
pub mod market;
pub mod middleware;
pub mod portfolio;
