pub mod binance;
pub mod cache;

pub use binance::{BinanceClient, Candle, SymbolInfo, TickerStats, DEFAULT_BINANCE_API_URL};
pub use cache::MarketCache;
