use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Indicator snapshot key holding ATR as percent of price
pub const ATR_PERCENT_INDICATOR: &str = "atr_pct";

/// What the signal asks the desk to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    Entry,
    Exit,
    StopLoss,
    TakeProfit,
}

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// +1 for long, -1 for short
    pub fn sign(&self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Long => write!(f, "LONG"),
            Direction::Short => write!(f, "SHORT"),
        }
    }
}

/// Directional recommendation produced by a single strategy rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingSignal {
    #[serde(rename = "type")]
    pub signal_type: SignalType,
    pub direction: Direction,
    /// 0-100
    pub strength: f64,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
    pub indicators: HashMap<String, f64>,
}

impl TradingSignal {
    /// Creates an entry signal; strength is clamped to [0, 100]
    pub fn entry(direction: Direction, strength: f64, price: f64, timestamp: DateTime<Utc>, reason: impl Into<String>) -> Self {
        Self {
            signal_type: SignalType::Entry,
            direction,
            strength: clamp_strength(strength),
            price,
            timestamp,
            reason: reason.into(),
            indicators: HashMap::new(),
        }
    }

    pub fn indicator(&self, name: &str) -> Option<f64> {
        self.indicators.get(name).copied()
    }

    /// Attach a named indicator reading to the snapshot
    pub fn with_indicator(mut self, name: &str, value: f64) -> Self {
        self.indicators.insert(name.to_string(), value);
        self
    }

    /// Validates the signal meets basic criteria
    pub fn validate(&self) -> Result<(), String> {
        if self.strength.is_nan() || !(0.0..=100.0).contains(&self.strength) {
            return Err(format!("Invalid strength value: {}", self.strength));
        }
        if !self.price.is_finite() || self.price <= 0.0 {
            return Err(format!("Invalid signal price: {}", self.price));
        }
        Ok(())
    }
}

fn clamp_strength(strength: f64) -> f64 {
    if strength.is_nan() {
        0.0
    } else {
        strength.clamp(0.0, 100.0)
    }
}
