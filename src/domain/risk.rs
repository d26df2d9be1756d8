//! Risk configuration, user risk profiles and assessment results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::market::base_asset;
use super::plan::TradingPlan;

/// Key of the fallback entry in [`RiskParameters::max_leverage_per_asset`]
pub const DEFAULT_LEVERAGE_KEY: &str = "default";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTolerance {
    Low,
    Medium,
    High,
    Extreme,
}

impl Default for RiskTolerance {
    fn default() -> Self {
        RiskTolerance::Medium
    }
}

/// Limit configuration for one user. Presets are the only default source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskParameters {
    /// Absolute daily loss (quote currency) that blocks new trades
    pub daily_loss_limit: f64,
    pub total_exposure_limit: f64,
    pub max_positions_count: usize,
    /// Absolute notional cap per position
    pub max_position_size: f64,
    /// Per base asset; always contains [`DEFAULT_LEVERAGE_KEY`]
    pub max_leverage_per_asset: HashMap<String, f64>,
    pub min_risk_reward_ratio: f64,
    /// |correlation| above which two symbols count as the same exposure
    pub correlation_limit: f64,
    pub max_correlated_exposure: f64,
    /// Size multiplier suggested for high-volatility markets
    pub volatility_adjustment_factor: f64,
    /// ATR percent treated as high volatility
    pub high_volatility_threshold: f64,
    /// Per-position unrealized loss percent that triggers a forced close
    pub emergency_stop_loss: f64,
    /// Drawdown fraction from peak equity that triggers liquidation
    pub max_drawdown: f64,
    pub risk_tolerance: RiskTolerance,
    pub auto_stop_loss: bool,
    pub emergency_controls: bool,
}

impl RiskParameters {
    pub fn preset(tolerance: RiskTolerance) -> Self {
        let (daily, exposure, count, size, leverage, rr, corr, corr_exposure, vol_factor, vol_threshold, stop, drawdown) =
            match tolerance {
                RiskTolerance::Low => (500.0, 10_000.0, 3, 2_000.0, [3.0, 5.0, 5.0, 3.0], 2.0, 0.7, 3_000.0, 0.5, 3.0, 10.0, 0.10),
                RiskTolerance::Medium => (1_000.0, 25_000.0, 5, 5_000.0, [5.0, 10.0, 10.0, 8.0], 1.5, 0.7, 8_000.0, 0.7, 4.0, 15.0, 0.15),
                RiskTolerance::High => (2_500.0, 50_000.0, 8, 10_000.0, [10.0, 20.0, 20.0, 15.0], 1.2, 0.8, 20_000.0, 0.85, 5.0, 20.0, 0.25),
                RiskTolerance::Extreme => (5_000.0, 100_000.0, 12, 25_000.0, [20.0, 50.0, 50.0, 25.0], 1.0, 0.9, 50_000.0, 1.0, 8.0, 30.0, 0.40),
            };

        let max_leverage_per_asset = [DEFAULT_LEVERAGE_KEY, "BTC", "ETH", "SOL"]
            .iter()
            .zip(leverage)
            .map(|(asset, lev)| (asset.to_string(), lev))
            .collect();

        Self {
            daily_loss_limit: daily,
            total_exposure_limit: exposure,
            max_positions_count: count,
            max_position_size: size,
            max_leverage_per_asset,
            min_risk_reward_ratio: rr,
            correlation_limit: corr,
            max_correlated_exposure: corr_exposure,
            volatility_adjustment_factor: vol_factor,
            high_volatility_threshold: vol_threshold,
            emergency_stop_loss: stop,
            max_drawdown: drawdown,
            risk_tolerance: tolerance,
            auto_stop_loss: tolerance != RiskTolerance::Extreme,
            emergency_controls: true,
        }
    }

    /// Leverage cap for a symbol, falling back to the default entry
    pub fn max_leverage_for(&self, symbol: &str) -> f64 {
        self.max_leverage_per_asset
            .get(&base_asset(symbol))
            .or_else(|| self.max_leverage_per_asset.get(DEFAULT_LEVERAGE_KEY))
            .copied()
            .unwrap_or(1.0)
    }

    /// Merge overrides on top of these parameters. The default leverage
    /// key survives any override map.
    pub fn merged(&self, overrides: &RiskParameterOverrides) -> Self {
        let mut merged = self.clone();
        if let Some(v) = overrides.daily_loss_limit {
            merged.daily_loss_limit = v;
        }
        if let Some(v) = overrides.total_exposure_limit {
            merged.total_exposure_limit = v;
        }
        if let Some(v) = overrides.max_positions_count {
            merged.max_positions_count = v;
        }
        if let Some(v) = overrides.max_position_size {
            merged.max_position_size = v;
        }
        if let Some(map) = &overrides.max_leverage_per_asset {
            for (asset, lev) in map {
                let key = if asset == DEFAULT_LEVERAGE_KEY { asset.clone() } else { base_asset(asset) };
                merged.max_leverage_per_asset.insert(key, *lev);
            }
        }
        if let Some(v) = overrides.min_risk_reward_ratio {
            merged.min_risk_reward_ratio = v;
        }
        if let Some(v) = overrides.correlation_limit {
            merged.correlation_limit = v;
        }
        if let Some(v) = overrides.max_correlated_exposure {
            merged.max_correlated_exposure = v;
        }
        if let Some(v) = overrides.volatility_adjustment_factor {
            merged.volatility_adjustment_factor = v;
        }
        if let Some(v) = overrides.high_volatility_threshold {
            merged.high_volatility_threshold = v;
        }
        if let Some(v) = overrides.emergency_stop_loss {
            merged.emergency_stop_loss = v;
        }
        if let Some(v) = overrides.max_drawdown {
            merged.max_drawdown = v;
        }
        if let Some(v) = overrides.auto_stop_loss {
            merged.auto_stop_loss = v;
        }
        if let Some(v) = overrides.emergency_controls {
            merged.emergency_controls = v;
        }
        merged.ensure_default_leverage();
        merged
    }

    fn ensure_default_leverage(&mut self) {
        if !self.max_leverage_per_asset.contains_key(DEFAULT_LEVERAGE_KEY) {
            let fallback = RiskParameters::preset(self.risk_tolerance).max_leverage_for(DEFAULT_LEVERAGE_KEY);
            self.max_leverage_per_asset.insert(DEFAULT_LEVERAGE_KEY.to_string(), fallback);
        }
    }
}

impl Default for RiskParameters {
    fn default() -> Self {
        Self::preset(RiskTolerance::Medium)
    }
}

/// Partial update applied on top of a preset
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskParameterOverrides {
    pub daily_loss_limit: Option<f64>,
    pub total_exposure_limit: Option<f64>,
    pub max_positions_count: Option<usize>,
    pub max_position_size: Option<f64>,
    pub max_leverage_per_asset: Option<HashMap<String, f64>>,
    pub min_risk_reward_ratio: Option<f64>,
    pub correlation_limit: Option<f64>,
    pub max_correlated_exposure: Option<f64>,
    pub volatility_adjustment_factor: Option<f64>,
    pub high_volatility_threshold: Option<f64>,
    pub emergency_stop_loss: Option<f64>,
    pub max_drawdown: Option<f64>,
    pub auto_stop_loss: Option<bool>,
    pub emergency_controls: Option<bool>,
}

/// Per-address risk state kept for the session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRiskProfile {
    pub address: String,
    pub parameters: RiskParameters,
    pub current_exposure: f64,
    pub daily_pnl: f64,
    /// Worst drawdown fraction observed this session
    pub max_drawdown: f64,
    pub last_risk_check: Option<DateTime<Utc>>,
    pub violation_count: u32,
    pub is_blocked: bool,
    /// 0-100, score of the last assessment
    pub risk_score: f64,
}

impl UserRiskProfile {
    pub fn new(address: &str, tolerance: RiskTolerance) -> Self {
        Self {
            address: address.to_string(),
            parameters: RiskParameters::preset(tolerance),
            current_exposure: 0.0,
            daily_pnl: 0.0,
            max_drawdown: 0.0,
            last_risk_check: None,
            violation_count: 0,
            is_blocked: false,
            risk_score: 0.0,
        }
    }

    pub fn daily_loss_breached(&self) -> bool {
        self.daily_pnl <= -self.parameters.daily_loss_limit
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    PositionSize,
    Leverage,
    RiskReward,
    Volatility,
    DailyLoss,
    Correlation,
    TotalExposure,
    PositionCount,
}

/// One failed risk check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskViolation {
    pub kind: ViolationKind,
    pub severity: Severity,
    pub message: String,
    pub current_value: f64,
    pub limit: f64,
    /// Contribution to the additive risk score
    pub points: f64,
}

/// Scored verdict on a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub plan_id: String,
    /// 0-100
    pub risk_score: f64,
    pub is_acceptable: bool,
    pub violations: Vec<RiskViolation>,
    pub suggestions: Vec<String>,
    /// Plan resized to fit size and leverage limits, when needed
    pub adjusted_plan: Option<TradingPlan>,
    pub assessed_at: DateTime<Utc>,
}

impl RiskAssessment {
    pub fn has_critical(&self) -> bool {
        self.violations.iter().any(|v| v.severity == Severity::Critical)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmergencyActionType {
    StopTrading,
    LiquidateAll,
    ClosePosition,
}

/// Decision reported by the emergency-stop evaluation. Execution is left to
/// the contract gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergencyAction {
    pub action: EmergencyActionType,
    /// 1-10, higher is more urgent
    pub priority: u8,
    pub address: String,
    pub symbol: Option<String>,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_have_default_leverage() {
        for tolerance in [RiskTolerance::Low, RiskTolerance::Medium, RiskTolerance::High, RiskTolerance::Extreme] {
            let params = RiskParameters::preset(tolerance);
            assert!(params.max_leverage_per_asset.contains_key(DEFAULT_LEVERAGE_KEY));
            assert_eq!(params.risk_tolerance, tolerance);
        }
    }

    #[test]
    fn test_presets_are_ordered() {
        let low = RiskParameters::preset(RiskTolerance::Low);
        let extreme = RiskParameters::preset(RiskTolerance::Extreme);
        assert!(low.max_position_size < extreme.max_position_size);
        assert!(low.daily_loss_limit < extreme.daily_loss_limit);
        assert!(low.min_risk_reward_ratio > extreme.min_risk_reward_ratio);
    }

    #[test]
    fn test_leverage_lookup_falls_back_to_default() {
        let params = RiskParameters::preset(RiskTolerance::Medium);
        assert_eq!(params.max_leverage_for("BTC-USD"), 10.0);
        assert_eq!(params.max_leverage_for("DOGE"), 5.0);
    }

    #[test]
    fn test_merge_overrides_keeps_default_key() {
        let params = RiskParameters::preset(RiskTolerance::Medium);
        let mut leverage = HashMap::new();
        leverage.insert("doge".to_string(), 2.0);
        let overrides = RiskParameterOverrides {
            max_position_size: Some(1_234.0),
            max_leverage_per_asset: Some(leverage),
            ..Default::default()
        };
        let merged = params.merged(&overrides);
        assert_eq!(merged.max_position_size, 1_234.0);
        assert_eq!(merged.max_leverage_for("DOGE"), 2.0);
        assert_eq!(merged.max_leverage_for("PEPE"), 5.0);
        assert_eq!(merged.daily_loss_limit, params.daily_loss_limit);
    }

    #[test]
    fn test_daily_loss_breached() {
        let mut profile = UserRiskProfile::new("0xabc", RiskTolerance::Medium);
        assert!(!profile.daily_loss_breached());
        profile.daily_pnl = -1_200.0;
        assert!(profile.daily_loss_breached());
    }
}
