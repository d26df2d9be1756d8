//! Performance records kept by the tracker

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::plan::TradingPlan;
use super::signal::Direction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Planning,
    Entered,
    /// Entered and repriced at least once
    Active,
    Closed,
    Cancelled,
    Expired,
}

impl RecordStatus {
    pub fn is_open(&self) -> bool {
        matches!(self, RecordStatus::Entered | RecordStatus::Active)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RecordStatus::Closed | RecordStatus::Cancelled | RecordStatus::Expired)
    }
}

/// Lifecycle of one trading plan from recording to exit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingPlanExecution {
    pub plan_id: String,
    pub plan: TradingPlan,
    pub status: RecordStatus,
    pub actual_entry_price: Option<f64>,
    pub actual_exit_price: Option<f64>,
    /// Position size in units of the base asset
    pub size: f64,
    pub fees: f64,
    /// Entry deviation from the planned price, percent
    pub slippage: f64,
    pub current_price: Option<f64>,
    pub unrealized_pnl: f64,
    pub pnl: Option<f64>,
    pub pnl_percentage: Option<f64>,
    pub actual_risk_reward: Option<f64>,
    pub is_win: Option<bool>,
    pub exit_reason: Option<String>,
    pub recorded_at: DateTime<Utc>,
    pub entered_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl TradingPlanExecution {
    pub fn new(plan: TradingPlan, recorded_at: DateTime<Utc>) -> Self {
        Self {
            plan_id: plan.id.clone(),
            plan,
            status: RecordStatus::Planning,
            actual_entry_price: None,
            actual_exit_price: None,
            size: 0.0,
            fees: 0.0,
            slippage: 0.0,
            current_price: None,
            unrealized_pnl: 0.0,
            pnl: None,
            pnl_percentage: None,
            actual_risk_reward: None,
            is_win: None,
            exit_reason: None,
            recorded_at,
            entered_at: None,
            closed_at: None,
        }
    }

    pub fn direction(&self) -> Direction {
        self.plan.direction()
    }

    pub fn strategy(&self) -> &str {
        &self.plan.strategy
    }

    /// Cancelled or expired before any fill; carries no trade data
    pub fn is_abandoned(&self) -> bool {
        self.actual_entry_price.is_none() && self.status.is_terminal()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PeriodStats {
    pub trades: u32,
    pub pnl: f64,
    pub win_rate: f64,
}

/// Aggregates for one strategy
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategyPerformance {
    pub strategy: String,
    pub total_trades: u32,
    pub winning_trades: u32,
    pub losing_trades: u32,
    /// Percent
    pub win_rate: f64,
    pub total_pnl: f64,
    pub average_win: f64,
    /// Magnitude of the average losing trade
    pub average_loss: f64,
    pub profit_factor: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    /// Positive for a win streak, negative for a loss streak
    pub current_streak: i32,
    pub max_win_streak: u32,
    pub max_loss_streak: u32,
    pub last_7_days: PeriodStats,
    pub last_30_days: PeriodStats,
    pub last_updated: Option<DateTime<Utc>>,
}

impl StrategyPerformance {
    pub fn new(strategy: &str) -> Self {
        Self {
            strategy: strategy.to_string(),
            ..Self::default()
        }
    }

    pub fn consecutive_losses(&self) -> u32 {
        if self.current_streak < 0 {
            self.current_streak.unsigned_abs()
        } else {
            0
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceAlertKind {
    ConsecutiveLosses,
    Drawdown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceAlert {
    pub id: String,
    pub kind: PerformanceAlertKind,
    pub strategy: Option<String>,
    pub message: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

/// Portfolio-wide summary
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OverallStats {
    pub total_trades: u32,
    pub winning_trades: u32,
    pub win_rate: f64,
    pub total_pnl: f64,
    pub unrealized_pnl: f64,
    pub open_positions: usize,
    pub equity: f64,
    pub peak_equity: f64,
    /// Percent below peak equity
    pub current_drawdown: f64,
    pub best_strategy: Option<String>,
}
