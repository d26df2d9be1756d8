use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::domain::{PriceBar, PriceTicker, Timeframe};

/// Market data error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MarketDataError {
    #[error("Price feed unavailable: {0}")]
    Unavailable(String),

    #[error("Unknown symbol: {0}")]
    UnknownSymbol(String),

    #[error("Data parsing error: {0}")]
    ParseError(String),

    #[error("Subscription error: {0}")]
    SubscriptionError(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

/// Historical bar query
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryQuery {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub limit: usize,
    /// Latest known price; lets fallback providers anchor their series
    pub reference_price: Option<f64>,
}

impl HistoryQuery {
    pub fn new(symbol: &str, timeframe: Timeframe, limit: usize) -> Self {
        Self {
            symbol: symbol.to_string(),
            timeframe,
            limit,
            reference_price: None,
        }
    }

    pub fn anchored_at(mut self, price: f64) -> Self {
        self.reference_price = Some(price);
        self
    }
}

/// Live quotes for a symbol
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// Current quote
    async fn get_price(&self, symbol: &str) -> Result<PriceTicker, MarketDataError>;

    /// Push stream of quotes; the stream ends when the sender side drops
    async fn subscribe(&self, symbol: &str) -> Result<mpsc::Receiver<PriceTicker>, MarketDataError>;
}

/// Source of historical bars, oldest first
#[async_trait]
pub trait PriceHistoryProvider: Send + Sync {
    async fn fetch_history(&self, query: HistoryQuery) -> Result<Vec<PriceBar>, MarketDataError>;

    /// Provider name for logging
    fn name(&self) -> &'static str;
}
