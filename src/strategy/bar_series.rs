//! Rolling bar series built from price ticks
//!
//! Ticks inside the current timeframe bucket update the last bar in place; a
//! tick at least one timeframe after the last bar opens a new one. Ticks older
//! than the last bar are stale and dropped.

use crate::domain::{PriceBar, PriceTicker, Timeframe};

#[derive(Debug, Clone, PartialEq)]
pub struct BarSeries {
    timeframe: Timeframe,
    max_len: usize,
    bars: Vec<PriceBar>,
}

impl BarSeries {
    pub fn new(timeframe: Timeframe, max_len: usize) -> Self {
        Self {
            timeframe,
            max_len: max_len.max(1),
            bars: Vec::new(),
        }
    }

    /// Seed from history; invalid bars are skipped and only the newest `max_len` kept
    pub fn with_history(mut self, history: Vec<PriceBar>) -> Self {
        let mut bars: Vec<PriceBar> = history.into_iter().filter(PriceBar::is_valid).collect();
        bars.sort_by_key(|b| b.timestamp);
        self.bars = bars;
        self.trim();
        self
    }

    /// Apply a tick. Returns false when the tick is older than the last bar.
    pub fn apply_ticker(&mut self, ticker: &PriceTicker) -> bool {
        if !ticker.price.is_finite() || ticker.price <= 0.0 {
            return false;
        }

        let Some(last) = self.bars.last_mut() else {
            self.bars.push(PriceBar::new(
                ticker.timestamp,
                ticker.price,
                ticker.price,
                ticker.price,
                ticker.price,
                ticker.volume,
            ));
            return true;
        };

        if ticker.timestamp < last.timestamp {
            return false;
        }

        if ticker.timestamp - last.timestamp >= self.timeframe.duration() {
            let bar = PriceBar::from_ticker(last.close, ticker);
            self.bars.push(bar);
            self.trim();
        } else {
            last.close = ticker.price;
            last.high = last.high.max(ticker.price);
            last.low = last.low.min(ticker.price);
            last.volume = last.volume.max(ticker.volume);
        }
        true
    }

    pub fn bars(&self) -> &[PriceBar] {
        &self.bars
    }

    pub fn last(&self) -> Option<&PriceBar> {
        self.bars.last()
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    fn trim(&mut self) {
        if self.bars.len() > self.max_len {
            let excess = self.bars.len() - self.max_len;
            self.bars.drain(..excess);
        }
    }
}
