//! Market regime classification types

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegimeType {
    Trending,
    Ranging,
    Volatile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Bullish,
    Bearish,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolatilityLevel {
    Low,
    Medium,
    High,
}

/// Snapshot of current market behaviour. Recomputed fresh on every scan.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarketRegime {
    #[serde(rename = "type")]
    pub regime_type: RegimeType,
    /// Trend persistence, 0-100
    pub strength: f64,
    pub direction: TrendDirection,
    pub volatility: VolatilityLevel,
    /// 0-100
    pub confidence: f64,
}

impl MarketRegime {
    /// Regime reported when there is not enough data to classify
    pub fn undetermined() -> Self {
        Self {
            regime_type: RegimeType::Ranging,
            strength: 0.0,
            direction: TrendDirection::Neutral,
            volatility: VolatilityLevel::Medium,
            confidence: 0.0,
        }
    }

    pub fn is_trending(&self) -> bool {
        self.regime_type == RegimeType::Trending
    }
}

impl fmt::Display for MarketRegime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?}/{:?} strength {:.0} volatility {:?} confidence {:.0}",
            self.regime_type, self.direction, self.strength, self.volatility, self.confidence
        )
    }
}
