use serde::{Deserialize, Serialize};

use super::position::OpenPosition;

/// Account state handed to the risk manager by the wallet layer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub balance: f64,
    pub equity: f64,
    /// Highest equity seen; drawdown is measured against it
    pub peak_equity: f64,
    pub daily_pnl: f64,
    pub positions: Vec<OpenPosition>,
}

impl AccountSnapshot {
    pub fn new(balance: f64) -> Self {
        Self {
            balance,
            equity: balance,
            peak_equity: balance,
            daily_pnl: 0.0,
            positions: Vec::new(),
        }
    }

    pub fn with_position(mut self, position: OpenPosition) -> Self {
        self.positions.push(position);
        self
    }

    pub fn update_position_price(&mut self, symbol: &str, price: f64) -> bool {
        for position in &mut self.positions {
            if position.symbol == symbol {
                position.update_price(price);
                return true;
            }
        }
        false
    }

    pub fn total_exposure(&self) -> f64 {
        self.positions.iter().map(|p| p.size.abs()).sum()
    }

    pub fn total_unrealized_pnl(&self) -> f64 {
        self.positions.iter().map(|p| p.unrealized_pnl()).sum()
    }

    /// Drawdown from peak equity as a fraction (0.2 = 20%)
    pub fn drawdown(&self) -> f64 {
        if self.peak_equity <= 0.0 {
            return 0.0;
        }
        ((self.peak_equity - self.equity) / self.peak_equity).max(0.0)
    }
}
