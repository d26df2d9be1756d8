use serde::{Deserialize, Serialize};

use super::signal::Direction;

/// Open perp position as reported in an account snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenPosition {
    pub symbol: String,
    pub side: Direction,
    /// Notional exposure in quote currency
    pub size: f64,
    pub entry_price: f64,
    pub current_price: f64,
}

impl OpenPosition {
    pub fn new(symbol: &str, side: Direction, size: f64, entry_price: f64) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            size,
            entry_price,
            current_price: entry_price,
        }
    }

    pub fn update_price(&mut self, price: f64) {
        self.current_price = price;
    }

    pub fn unrealized_pnl(&self) -> f64 {
        if self.entry_price <= 0.0 {
            return 0.0;
        }
        self.side.sign() * (self.current_price - self.entry_price) / self.entry_price * self.size
    }

    /// Unrealized P&L in percent of the entry notional
    pub fn unrealized_pnl_percent(&self) -> f64 {
        if self.entry_price <= 0.0 {
            return 0.0;
        }
        self.side.sign() * (self.current_price - self.entry_price) / self.entry_price * 100.0
    }
}
