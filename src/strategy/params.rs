//! Strategy Parameters
//!
//! Per-strategy configuration: on/off toggle, confidence gate and the sizing
//! parameters used when that strategy's signal wins.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which signal generator a configuration drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Breakout,
    Bounce,
    Momentum,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyKind::Breakout => write!(f, "breakout"),
            StrategyKind::Bounce => write!(f, "bounce"),
            StrategyKind::Momentum => write!(f, "momentum"),
        }
    }
}

/// Main strategy configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Display name, copied onto plans
    pub name: String,
    pub kind: StrategyKind,
    pub enabled: bool,
    /// Signals weaker than this never win (0-100)
    pub min_confidence: f64,
    /// Sizing used when this strategy's signal wins
    pub risk: SizingConfig,
}

impl StrategyConfig {
    pub fn breakout() -> Self {
        Self {
            name: "Trend Breakout".to_string(),
            kind: StrategyKind::Breakout,
            enabled: true,
            min_confidence: 70.0,
            risk: SizingConfig {
                stop_loss_percent: 2.0,
                take_profit_percent: 4.0,
                ..SizingConfig::default()
            },
        }
    }

    pub fn bounce() -> Self {
        Self {
            name: "Support/Resistance Bounce".to_string(),
            kind: StrategyKind::Bounce,
            enabled: true,
            min_confidence: 65.0,
            risk: SizingConfig {
                stop_loss_percent: 1.5,
                take_profit_percent: 3.0,
                ..SizingConfig::default()
            },
        }
    }

    pub fn momentum() -> Self {
        Self {
            name: "Momentum Continuation".to_string(),
            kind: StrategyKind::Momentum,
            enabled: true,
            min_confidence: 60.0,
            risk: SizingConfig {
                stop_loss_percent: 2.5,
                take_profit_percent: 5.0,
                ..SizingConfig::default()
            },
        }
    }

    pub fn defaults_for(kind: StrategyKind) -> Self {
        match kind {
            StrategyKind::Breakout => Self::breakout(),
            StrategyKind::Bounce => Self::bounce(),
            StrategyKind::Momentum => Self::momentum(),
        }
    }

    /// Create a new config with a custom confidence gate
    pub fn with_min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::MissingName);
        }
        if !(0.0..=100.0).contains(&self.min_confidence) {
            return Err(ConfigError::InvalidMinConfidence(self.min_confidence));
        }
        self.risk.validate()
    }
}

/// Position sizing configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SizingConfig {
    /// Share of the account balance put at risk per trade (percent)
    pub account_risk_percent: f64,
    /// Minimum stop distance (percent of price)
    pub stop_loss_percent: f64,
    /// Base take-profit distance (percent of price)
    pub take_profit_percent: f64,
    /// Notional cap as percent of the account balance
    pub max_position_size: f64,
    pub max_leverage: f64,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            account_risk_percent: 1.0,
            stop_loss_percent: 2.0,
            take_profit_percent: 4.0,
            max_position_size: 50.0,
            max_leverage: 10.0,
        }
    }
}

impl SizingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.account_risk_percent <= 0.0 || self.account_risk_percent > 10.0 {
            return Err(ConfigError::InvalidAccountRisk(self.account_risk_percent));
        }
        if self.stop_loss_percent <= 0.0 || self.stop_loss_percent > 50.0 {
            return Err(ConfigError::InvalidStopLoss(self.stop_loss_percent));
        }
        if self.take_profit_percent <= 0.0 || self.take_profit_percent > 100.0 {
            return Err(ConfigError::InvalidTakeProfit(self.take_profit_percent));
        }
        if self.max_position_size <= 0.0 || self.max_position_size > 100.0 {
            return Err(ConfigError::InvalidPositionSize(self.max_position_size));
        }
        if self.max_leverage < 1.0 {
            return Err(ConfigError::InvalidLeverage(self.max_leverage));
        }
        Ok(())
    }
}

/// The three registered strategies, in registration order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategySet {
    pub breakout: StrategyConfig,
    pub bounce: StrategyConfig,
    pub momentum: StrategyConfig,
}

impl Default for StrategySet {
    fn default() -> Self {
        Self {
            breakout: StrategyConfig::breakout(),
            bounce: StrategyConfig::bounce(),
            momentum: StrategyConfig::momentum(),
        }
    }
}

impl StrategySet {
    /// Registration order decides ties: earlier wins
    pub fn ordered(&self) -> [&StrategyConfig; 3] {
        [&self.breakout, &self.bounce, &self.momentum]
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (expected, config) in [StrategyKind::Breakout, StrategyKind::Bounce, StrategyKind::Momentum]
            .into_iter()
            .zip(self.ordered())
        {
            if config.kind != expected {
                return Err(ConfigError::KindMismatch {
                    slot: expected,
                    found: config.kind,
                });
            }
            config.validate()?;
        }
        Ok(())
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("Strategy name must not be empty")]
    MissingName,
    #[error("Invalid minimum confidence: {0} (must be 0-100)")]
    InvalidMinConfidence(f64),
    #[error("Invalid account risk: {0}% (must be 0 < risk <= 10)")]
    InvalidAccountRisk(f64),
    #[error("Invalid stop loss: {0}% (must be 0 < loss <= 50)")]
    InvalidStopLoss(f64),
    #[error("Invalid take profit: {0}% (must be 0 < profit <= 100)")]
    InvalidTakeProfit(f64),
    #[error("Invalid position size: {0}% (must be 0 < size <= 100)")]
    InvalidPositionSize(f64),
    #[error("Invalid max leverage: {0} (minimum 1)")]
    InvalidLeverage(f64),
    #[error("Strategy slot {slot} holds a {found} configuration")]
    KindMismatch { slot: StrategyKind, found: StrategyKind },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_configs_validate() {
        let set = StrategySet::default();
        assert!(set.validate().is_ok());
        assert_eq!(set.breakout.min_confidence, 70.0);
        assert_eq!(set.bounce.risk.stop_loss_percent, 1.5);
        assert_eq!(set.momentum.risk.take_profit_percent, 5.0);
    }

    #[test]
    fn test_config_builder() {
        let config = StrategyConfig::breakout().with_min_confidence(80.0).disabled();
        assert_eq!(config.min_confidence, 80.0);
        assert!(!config.enabled);
    }

    #[test]
    fn test_invalid_min_confidence() {
        let config = StrategyConfig::bounce().with_min_confidence(120.0);
        assert!(matches!(config.validate(), Err(ConfigError::InvalidMinConfidence(_))));
    }

    #[test]
    fn test_sizing_validation() {
        let mut risk = SizingConfig::default();
        assert!(risk.validate().is_ok());

        risk.stop_loss_percent = 0.0;
        assert!(matches!(risk.validate(), Err(ConfigError::InvalidStopLoss(_))));

        let risk = SizingConfig {
            max_leverage: 0.5,
            ..SizingConfig::default()
        };
        assert!(matches!(risk.validate(), Err(ConfigError::InvalidLeverage(_))));
    }

    #[test]
    fn test_swapped_slots_rejected() {
        let set = StrategySet {
            breakout: StrategyConfig::momentum(),
            ..StrategySet::default()
        };
        assert!(matches!(set.validate(), Err(ConfigError::KindMismatch { .. })));
    }
}
