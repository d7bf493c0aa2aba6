//! REST client for the Binance public market-data API.
//!
//! Only public, unauthenticated endpoints are used: klines, 24hr ticker
//! statistics, and exchange info. Responses are normalized into the shapes
//! the frontend charts expect (epoch seconds, numeric fields instead of
//! Binance's string-encoded numbers).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, time::Duration};
use tracing::debug;

pub const DEFAULT_BINANCE_API_URL: &str = "https://api.binance.com";

pub const MAX_OHLC_LIMIT: usize = 1000;

/// One candlestick, normalized from a Binance kline row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    /// Open time in epoch seconds.
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// 24-hour rolling statistics for one symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickerStats {
    pub symbol: String,
    pub last_price: f64,
    pub price_change_percent: f64,
    pub high_price: f64,
    pub low_price: f64,
    pub volume: f64,
}

/// A tradable symbol from exchange info, filtered to active spot pairs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTicker {
    symbol: String,
    last_price: String,
    price_change_percent: String,
    high_price: String,
    low_price: String,
    volume: String,
}

#[derive(Deserialize)]
struct RawExchangeInfo {
    symbols: Vec<RawSymbol>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSymbol {
    symbol: String,
    status: String,
    base_asset: String,
    quote_asset: String,
    #[serde(default)]
    is_spot_trading_allowed: bool,
}

pub struct BinanceClient {
    client: reqwest::Client,
    base_url: String,
}

impl BinanceClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .context("building binance http client")?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let url = self.url(path);
        let resp = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .with_context(|| format!("GET {}", url))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("GET {} {}: {}", url, status, body);
        }
        resp.json::<T>()
            .await
            .with_context(|| format!("decoding response from {}", url))
    }

    /// Fetch candlesticks for a symbol. `limit` is clamped to 1..=1000.
    pub async fn fetch_ohlc(&self, symbol: &str, interval: &str, limit: usize) -> Result<Vec<Candle>> {
        let limit = limit.clamp(1, MAX_OHLC_LIMIT);
        let rows: Vec<Vec<serde_json::Value>> = self
            .get_json(
                "/api/v3/klines",
                &[
                    ("symbol", symbol.to_string()),
                    ("interval", interval.to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;

        debug!(symbol = %symbol, interval = %interval, rows = rows.len(), "fetched klines");

        let mut candles = Vec::with_capacity(rows.len());
        for row in rows {
            candles.push(parse_kline(&row)?);
        }
        Ok(candles)
    }

    /// Fetch 24hr stats for the given symbols in one batched request.
    pub async fn fetch_tickers(&self, symbols: &[String]) -> Result<Vec<TickerStats>> {
        if symbols.is_empty() {
            return Ok(Vec::new());
        }
        // Binance expects the symbols parameter as a JSON-encoded array.
        let symbols_param =
            serde_json::to_string(symbols).context("encoding ticker symbols parameter")?;
        let raw: Vec<RawTicker> = self
            .get_json("/api/v3/ticker/24hr", &[("symbols", symbols_param)])
            .await?;

        let mut stats = Vec::with_capacity(raw.len());
        for t in raw {
            stats.push(TickerStats {
                last_price: parse_num(&t.last_price, "lastPrice")?,
                price_change_percent: parse_num(&t.price_change_percent, "priceChangePercent")?,
                high_price: parse_num(&t.high_price, "highPrice")?,
                low_price: parse_num(&t.low_price, "lowPrice")?,
                volume: parse_num(&t.volume, "volume")?,
                symbol: t.symbol,
            });
        }
        Ok(stats)
    }

    /// Fetch all actively trading spot symbols for one quote asset.
    pub async fn fetch_symbols(&self, quote_asset: &str) -> Result<Vec<SymbolInfo>> {
        let info: RawExchangeInfo = self.get_json("/api/v3/exchangeInfo", &[]).await?;
        let symbols = info
            .symbols
            .into_iter()
            .filter(|s| {
                s.status == "TRADING" && s.is_spot_trading_allowed && s.quote_asset == quote_asset
            })
            .map(|s| SymbolInfo {
                symbol: s.symbol,
                base_asset: s.base_asset,
                quote_asset: s.quote_asset,
            })
            .collect();
        Ok(symbols)
    }

    /// Last traded price per symbol, for equity valuation. Symbols the
    /// exchange does not recognize are simply absent from the result.
    pub async fn last_prices(&self, symbols: &[String]) -> Result<HashMap<String, f64>> {
        let stats = self.fetch_tickers(symbols).await?;
        Ok(stats.into_iter().map(|t| (t.symbol, t.last_price)).collect())
    }
}

fn parse_kline(row: &[serde_json::Value]) -> Result<Candle> {
    if row.len() < 6 {
        anyhow::bail!("kline row too short: {} fields", row.len());
    }
    let open_time_ms = row[0]
        .as_i64()
        .ok_or_else(|| anyhow::anyhow!("kline open time is not an integer"))?;
    Ok(Candle {
        time: open_time_ms / 1000,
        open: parse_value_num(&row[1], "open")?,
        high: parse_value_num(&row[2], "high")?,
        low: parse_value_num(&row[3], "low")?,
        close: parse_value_num(&row[4], "close")?,
        volume: parse_value_num(&row[5], "volume")?,
    })
}

fn parse_value_num(v: &serde_json::Value, field: &str) -> Result<f64> {
    match v {
        serde_json::Value::String(s) => parse_num(s, field),
        serde_json::Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| anyhow::anyhow!("kline field {} out of f64 range", field)),
        other => anyhow::bail!("kline field {} has unexpected type: {}", field, other),
    }
}

fn parse_num(s: &str, field: &str) -> Result<f64> {
    s.parse::<f64>()
        .with_context(|| format!("parsing numeric field {}: {:?}", field, s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_kline_row() {
        let row = vec![
            json!(1700000000000i64),
            json!("100.5"),
            json!("110.0"),
            json!("99.25"),
            json!("105.75"),
            json!("1234.5"),
            json!(1700000059999i64),
        ];
        let c = parse_kline(&row).unwrap();
        assert_eq!(c.time, 1700000000);
        assert_eq!(c.open, 100.5);
        assert_eq!(c.high, 110.0);
        assert_eq!(c.low, 99.25);
        assert_eq!(c.close, 105.75);
        assert_eq!(c.volume, 1234.5);
    }

    #[test]
    fn test_parse_kline_rejects_short_row() {
        let row = vec![json!(1700000000000i64), json!("1.0")];
        assert!(parse_kline(&row).is_err());
    }

    #[test]
    fn test_raw_ticker_deserializes_binance_shape() {
        let raw: RawTicker = serde_json::from_value(json!({
            "symbol": "BTCUSDT",
            "lastPrice": "64250.10",
            "priceChangePercent": "-1.25",
            "highPrice": "65000.00",
            "lowPrice": "63100.00",
            "volume": "12345.678",
            "quoteVolume": "790000000.0"
        }))
        .unwrap();
        assert_eq!(raw.symbol, "BTCUSDT");
        assert_eq!(parse_num(&raw.last_price, "lastPrice").unwrap(), 64250.10);
    }

    #[test]
    fn test_exchange_info_filter_shape() {
        let info: RawExchangeInfo = serde_json::from_value(json!({
            "symbols": [
                {"symbol": "BTCUSDT", "status": "TRADING", "baseAsset": "BTC",
                 "quoteAsset": "USDT", "isSpotTradingAllowed": true},
                {"symbol": "OLDBTC", "status": "BREAK", "baseAsset": "OLD",
                 "quoteAsset": "USDT", "isSpotTradingAllowed": true},
                {"symbol": "BTCEUR", "status": "TRADING", "baseAsset": "BTC",
                 "quoteAsset": "EUR", "isSpotTradingAllowed": true}
            ]
        }))
        .unwrap();
        let active: Vec<_> = info
            .symbols
            .iter()
            .filter(|s| s.status == "TRADING" && s.is_spot_trading_allowed && s.quote_asset == "USDT")
            .collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].symbol, "BTCUSDT");
    }
}
