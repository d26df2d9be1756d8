//! Market data value types
//!
//! Price bars, ticker snapshots, candle timeframes and the coarse asset-class
//! split used for leverage ceilings.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One OHLCV bar. Immutable once produced by a feed or history provider.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl PriceBar {
    pub fn new(timestamp: DateTime<Utc>, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self { timestamp, open, high, low, close, volume }
    }

    /// Validate OHLC data integrity
    pub fn is_valid(&self) -> bool {
        self.high >= self.low
            && self.close >= self.low
            && self.close <= self.high
            && self.open >= self.low
            && self.open <= self.high
            && self.volume >= 0.0
            && self.high.is_finite()
            && self.low.is_finite()
            && self.close.is_finite()
            && self.open.is_finite()
    }

    /// Build the next bar in a series from a ticker update, opening at the
    /// previous close.
    pub fn from_ticker(previous_close: f64, ticker: &PriceTicker) -> Self {
        let open = previous_close;
        let close = ticker.price;
        Self {
            timestamp: ticker.timestamp,
            open,
            high: open.max(close),
            low: open.min(close),
            close,
            volume: ticker.volume,
        }
    }
}

/// Point-in-time quote returned by a price feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceTicker {
    pub symbol: String,
    pub price: f64,
    /// 24h change in percent
    pub change_24h: f64,
    pub volume: f64,
    pub high_24h: f64,
    pub low_24h: f64,
    pub open_price: f64,
    pub timestamp: DateTime<Utc>,
}

impl PriceTicker {
    /// Flat ticker with every price field set to `price`
    pub fn flat(symbol: &str, price: f64, volume: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.to_string(),
            price,
            change_24h: 0.0,
            volume,
            high_24h: price,
            low_24h: price,
            open_price: price,
            timestamp,
        }
    }
}

/// Candle timeframe of a plan or history request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
}

impl Timeframe {
    pub fn duration(&self) -> Duration {
        match self {
            Timeframe::M1 => Duration::minutes(1),
            Timeframe::M5 => Duration::minutes(5),
            Timeframe::M15 => Duration::minutes(15),
            Timeframe::H1 => Duration::hours(1),
            Timeframe::H4 => Duration::hours(4),
            Timeframe::D1 => Duration::days(1),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
        }
    }
}

impl Default for Timeframe {
    fn default() -> Self {
        Timeframe::H1
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1m" => Ok(Timeframe::M1),
            "5m" => Ok(Timeframe::M5),
            "15m" => Ok(Timeframe::M15),
            "1h" => Ok(Timeframe::H1),
            "4h" => Ok(Timeframe::H4),
            "1d" => Ok(Timeframe::D1),
            other => Err(format!("unknown timeframe '{}'", other)),
        }
    }
}

/// Tokenised equities listed on the perp venue. Everything else is treated as crypto.
const STOCK_SYMBOLS: &[&str] = &[
    "AAPL", "TSLA", "NVDA", "MSFT", "AMZN", "GOOGL", "META", "NFLX", "COIN", "SPY", "QQQ",
];

/// Coarse instrument class; decides the venue leverage ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetClass {
    Crypto,
    Stock,
}

impl AssetClass {
    pub fn classify(symbol: &str) -> Self {
        let base = base_asset(symbol);
        if STOCK_SYMBOLS.contains(&base.as_str()) {
            AssetClass::Stock
        } else {
            AssetClass::Crypto
        }
    }

    /// Maximum leverage the venue accepts for this class
    pub fn max_leverage(&self) -> f64 {
        match self {
            AssetClass::Crypto => 50.0,
            AssetClass::Stock => 5.0,
        }
    }
}

/// Strip quote suffixes: "btc-usd", "BTC/USDT", "BTCUSDT" all map to "BTC".
pub fn base_asset(symbol: &str) -> String {
    let upper = symbol.trim().to_uppercase();
    let head = upper
        .split(|c| c == '-' || c == '/' || c == '_')
        .next()
        .unwrap_or("")
        .to_string();
    for quote in ["USDT", "USDC", "USD"] {
        if head.len() > quote.len() && head.ends_with(quote) {
            return head[..head.len() - quote.len()].to_string();
        }
    }
    head
}
