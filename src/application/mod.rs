//! Application Layer - Services and use cases
//!
//! - Risk manager: scores plans against per-address limits, emergency stops
//! - Opportunity radar: periodic and push-driven market scanning with alerts
//! - Execution engine: turns a plan into ordered on-chain steps
//! - Performance tracker: per-trade records and per-strategy aggregates
//! - Context: wires every service to its adapters

pub mod context;
pub mod execution_engine;
pub mod performance_tracker;
pub mod radar;
pub mod risk_manager;

pub use context::{Adapters, AppContext, AssessedPlan, ContextError};
pub use execution_engine::{ExecutionConfig, ExecutionEngine, ExecutionError, ExecutionListener, PreflightCheck, PreflightReport};
pub use performance_tracker::{PerformanceTracker, TrackerConfig, TrackerError, TrackerExport};
pub use radar::{MarketSnapshot, OpportunityRadar, RadarConfig, RadarError, TradingHours};
pub use risk_manager::{assess_plan_risk, correlation, RiskError, RiskManager};
