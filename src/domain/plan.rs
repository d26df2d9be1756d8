//! Trading plan - the central work item
//!
//! Created by the strategy engine, validated by the risk manager, converted to
//! an execution plan by the execution engine and tracked by the performance
//! tracker. A plan is never mutated in place; risk assessment hands back a
//! separate adjusted copy when limits force a resize.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::market::Timeframe;
use super::regime::MarketRegime;
use super::signal::{Direction, TradingSignal};

/// Take-profit ladder multipliers applied to the base take-profit percent
pub const TAKE_PROFIT_LADDER: [f64; 3] = [0.5, 1.0, 1.5];

/// What the execution engine should do with the plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanAction {
    #[serde(alias = "buy")]
    Long,
    #[serde(alias = "sell")]
    Short,
    CloseLong,
    CloseShort,
}

impl PlanAction {
    pub fn is_close(&self) -> bool {
        matches!(self, PlanAction::CloseLong | PlanAction::CloseShort)
    }
}

impl From<Direction> for PlanAction {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Long => PlanAction::Long,
            Direction::Short => PlanAction::Short,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntrySpec {
    pub price: f64,
    pub order_type: OrderType,
    pub conditions: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StopLoss {
    pub price: f64,
    pub percent: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TakeProfitTarget {
    pub price: f64,
    pub percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TakeProfit {
    pub price: f64,
    pub percent: f64,
    /// Always three targets, scaled by [`TAKE_PROFIT_LADDER`]
    pub targets: Vec<TakeProfitTarget>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PositionSizing {
    pub notional_size: f64,
    pub leverage: f64,
    pub margin: f64,
    pub risk_amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingPlan {
    pub id: String,
    pub symbol: String,
    pub strategy: String,
    pub action: PlanAction,
    pub signal: TradingSignal,
    pub entry: EntrySpec,
    pub stop_loss: StopLoss,
    pub take_profit: TakeProfit,
    pub position_sizing: PositionSizing,
    pub market_regime: MarketRegime,
    pub risk_reward: f64,
    /// 0-100
    pub confidence: f64,
    pub timeframe: Timeframe,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub notes: Vec<String>,
}

impl TradingPlan {
    pub fn direction(&self) -> Direction {
        self.signal.direction
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(false, |expiry| now > expiry)
    }

    /// Copy of this plan that closes the position it opened
    pub fn closing(&self) -> Self {
        let mut plan = self.clone();
        plan.action = match self.direction() {
            Direction::Long => PlanAction::CloseLong,
            Direction::Short => PlanAction::CloseShort,
        };
        plan
    }
}

/// |takeProfit - entry| / |entry - stopLoss|; zero when the stop sits on the entry
pub fn risk_reward_ratio(entry: f64, stop_loss: f64, take_profit: f64) -> f64 {
    let risk = (entry - stop_loss).abs();
    if risk <= f64::EPSILON {
        return 0.0;
    }
    (take_profit - entry).abs() / risk
}

/// Outcome of the engine's lightweight local plan check
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanValidation {
    pub valid: bool,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_reward_ratio() {
        assert!((risk_reward_ratio(100.0, 98.0, 104.0) - 2.0).abs() < 1e-9);
        assert!((risk_reward_ratio(100.0, 102.0, 96.0) - 2.0).abs() < 1e-9);
        assert_eq!(risk_reward_ratio(100.0, 100.0, 104.0), 0.0);
    }

    #[test]
    fn test_plan_action_aliases() {
        let action: PlanAction = serde_json::from_str("\"buy\"").unwrap();
        assert_eq!(action, PlanAction::Long);
        let action: PlanAction = serde_json::from_str("\"close_short\"").unwrap();
        assert_eq!(action, PlanAction::CloseShort);
        assert!(action.is_close());
    }
}
