//! Domain Layer - Core value types for the dexpilot trading desk
//!
//! Pure data with no I/O. Everything that talks to a wallet, a price feed or a
//! store goes through the ports layer.

pub mod alert;
pub mod execution;
pub mod market;
pub mod performance;
pub mod plan;
pub mod portfolio;
pub mod position;
pub mod regime;
pub mod risk;
pub mod signal;

pub use alert::{AlertPriority, AlertType, OpportunityAlert};
pub use execution::{
    ExecutionEvent, ExecutionEventType, ExecutionPlan, ExecutionState, ExecutionStatus, ExecutionStep, StepStatus,
    StepTransitionError, StepType,
};
pub use market::{base_asset, AssetClass, PriceBar, PriceTicker, Timeframe};
pub use plan::{
    risk_reward_ratio, EntrySpec, OrderType, PlanAction, PlanValidation, PositionSizing, StopLoss, TakeProfit,
    TakeProfitTarget, TradingPlan, TAKE_PROFIT_LADDER,
};
pub use performance::{
    OverallStats, PerformanceAlert, PerformanceAlertKind, PeriodStats, RecordStatus, StrategyPerformance,
    TradingPlanExecution,
};
pub use portfolio::AccountSnapshot;
pub use position::OpenPosition;
pub use regime::{MarketRegime, RegimeType, TrendDirection, VolatilityLevel};
pub use risk::{
    EmergencyAction, EmergencyActionType, RiskAssessment, RiskParameterOverrides, RiskParameters, RiskTolerance,
    RiskViolation, Severity, UserRiskProfile, ViolationKind, DEFAULT_LEVERAGE_KEY,
};
pub use signal::{Direction, SignalType, TradingSignal, ATR_PERCENT_INDICATOR};
