//! Synthetic price history
//!
//! Deterministic random-walk bars for paper mode and tests. This is a
//! fallback provider: it is only used when wired in explicitly, and every
//! fetch is logged as synthetic.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use statrs::distribution::Normal;
use tracing::warn;

use crate::domain::{PriceBar, Timeframe};
use crate::ports::{HistoryQuery, MarketDataError, PriceHistoryProvider};

/// Anchor prices used when a query carries no reference price
pub fn default_base_prices() -> HashMap<String, f64> {
    [("BTC", 45_000.0), ("ETH", 3_000.0), ("SOL", 100.0), ("ARB", 1.2), ("AVAX", 35.0)]
        .into_iter()
        .map(|(s, p)| (s.to_string(), p))
        .collect()
}

const FALLBACK_BASE_PRICE: f64 = 50.0;

#[derive(Debug, Clone)]
pub struct SyntheticHistory {
    seed: u64,
    /// Standard deviation of per-bar log returns
    volatility: f64,
    base_prices: HashMap<String, f64>,
    /// Fixed end of the series; `None` means the current bar
    end: Option<DateTime<Utc>>,
}

impl SyntheticHistory {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            volatility: 0.01,
            base_prices: default_base_prices(),
            end: None,
        }
    }

    pub fn with_volatility(mut self, volatility: f64) -> Self {
        self.volatility = volatility.abs();
        self
    }

    pub fn with_base_price(mut self, symbol: &str, price: f64) -> Self {
        self.base_prices.insert(symbol.to_string(), price);
        self
    }

    pub fn ending_at(mut self, end: DateTime<Utc>) -> Self {
        self.end = Some(end);
        self
    }

    fn rng_for(&self, symbol: &str, timeframe: Timeframe) -> StdRng {
        // FNV-1a over the symbol and timeframe keeps series stable across runs
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in symbol.bytes().chain(timeframe.as_str().bytes()) {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        StdRng::seed_from_u64(self.seed ^ hash)
    }

    /// Bars oldest first, the last bar closing exactly at `anchor`
    pub fn generate(&self, symbol: &str, timeframe: Timeframe, limit: usize, anchor: f64) -> Vec<PriceBar> {
        if limit == 0 || !(anchor > 0.0) {
            return Vec::new();
        }
        let mut rng = self.rng_for(symbol, timeframe);
        let returns = match Normal::new(0.0, self.volatility.max(1e-6)) {
            Ok(dist) => dist,
            Err(_) => return Vec::new(),
        };

        let mut closes = Vec::with_capacity(limit + 1);
        let mut price = anchor;
        closes.push(price);
        for _ in 0..limit {
            price *= rng.sample(returns).exp();
            closes.push(price);
        }
        let scale = anchor / price;
        for close in &mut closes {
            *close *= scale;
        }

        let step = timeframe.duration();
        let step_secs = step.num_seconds().max(1);
        let end = self.end.unwrap_or_else(Utc::now);
        let aligned = Utc
            .timestamp_opt(end.timestamp() - end.timestamp().rem_euclid(step_secs), 0)
            .single()
            .unwrap_or(end);

        (0..limit)
            .map(|i| {
                let open = closes[i];
                let close = closes[i + 1];
                let wick = self.volatility * 0.5;
                let high = open.max(close) * (1.0 + rng.gen_range(0.0..=wick));
                let low = open.min(close) * (1.0 - rng.gen_range(0.0..=wick));
                let volume = 1_000.0 * rng.gen_range(0.5..1.5);
                let timestamp = aligned - step * (limit - 1 - i) as i32;
                PriceBar::new(timestamp, open, high, low, close, volume)
            })
            .collect()
    }
}

#[async_trait]
impl PriceHistoryProvider for SyntheticHistory {
    async fn fetch_history(&self, query: HistoryQuery) -> Result<Vec<PriceBar>, MarketDataError> {
        let anchor = query
            .reference_price
            .or_else(|| self.base_prices.get(&query.symbol).copied())
            .unwrap_or(FALLBACK_BASE_PRICE);
        warn!(symbol = %query.symbol, timeframe = %query.timeframe.as_str(), bars = query.limit, "Serving synthetic price history");
        Ok(self.generate(&query.symbol, query.timeframe, query.limit, anchor))
    }

    fn name(&self) -> &'static str {
        "synthetic"
    }
}
