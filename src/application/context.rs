//! Application context
//!
//! Owns one instance of every service, built from the configuration and a
//! set of adapters. Nothing in the crate keeps global state; everything a
//! command needs hangs off an `AppContext`.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};

use crate::application::execution_engine::{ExecutionEngine, ExecutionError};
use crate::application::performance_tracker::{PerformanceTracker, TrackerError};
use crate::application::radar::{OpportunityRadar, RadarError};
use crate::application::risk_manager::{RiskError, RiskManager};
use crate::config::AppConfig;
use crate::domain::{
    AccountSnapshot, ExecutionState, ExecutionStatus, RiskAssessment, Timeframe, TradingPlan, UserRiskProfile,
};
use crate::ports::{AccountGateway, KeyValueStore, NotificationSink, PriceFeed, PriceHistoryProvider, Repository};
use crate::strategy::{StrategyEngine, StrategyError};

#[derive(Debug, Error)]
pub enum ContextError {
    #[error(transparent)]
    Strategy(#[from] StrategyError),
    #[error(transparent)]
    Risk(#[from] RiskError),
    #[error(transparent)]
    Radar(#[from] RadarError),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    #[error(transparent)]
    Tracker(#[from] TrackerError),
}

/// External collaborators the services are wired to
#[derive(Clone)]
pub struct Adapters {
    pub feed: Arc<dyn PriceFeed>,
    pub history: Arc<dyn PriceHistoryProvider>,
    pub gateway: Arc<dyn AccountGateway>,
    pub notifier: Arc<dyn NotificationSink>,
    pub store: Arc<dyn KeyValueStore>,
    pub profiles: Arc<dyn Repository<UserRiskProfile>>,
    pub statuses: Arc<dyn Repository<ExecutionStatus>>,
}

/// A plan that survived generation, with its risk verdict
#[derive(Debug, Clone)]
pub struct AssessedPlan {
    pub plan: TradingPlan,
    pub assessment: RiskAssessment,
}

impl AssessedPlan {
    /// The plan to act on: the risk-adjusted one when limits forced a resize
    pub fn actionable(&self) -> &TradingPlan {
        self.assessment.adjusted_plan.as_ref().unwrap_or(&self.plan)
    }
}

pub struct AppContext {
    pub config: AppConfig,
    pub adapters: Adapters,
    pub strategy_engine: Arc<StrategyEngine>,
    pub risk_manager: Arc<RiskManager>,
    pub radar: Arc<OpportunityRadar>,
    pub execution_engine: Arc<ExecutionEngine>,
    pub tracker: Arc<PerformanceTracker>,
}

impl AppContext {
    pub fn build(config: AppConfig, adapters: Adapters) -> Result<Self, ContextError> {
        let strategy_engine = StrategyEngine::new(
            adapters.feed.clone(),
            adapters.history.clone(),
            &config.strategies,
            config.engine.clone(),
        )?;
        let risk_manager = RiskManager::new(adapters.profiles.clone());
        let radar = OpportunityRadar::new(
            adapters.feed.clone(),
            adapters.history.clone(),
            adapters.notifier.clone(),
            config.radar.clone(),
            config.engine.periods.clone(),
        )?;
        let execution_engine = ExecutionEngine::new(
            adapters.gateway.clone(),
            adapters.feed.clone(),
            adapters.statuses.clone(),
            config.execution.clone(),
        )?;
        let tracker = PerformanceTracker::new(
            adapters.feed.clone(),
            adapters.notifier.clone(),
            adapters.store.clone(),
            config.tracker.clone(),
        )?;

        info!(history = adapters.history.name(), "Application context ready");
        Ok(Self {
            config,
            adapters,
            strategy_engine: Arc::new(strategy_engine),
            risk_manager: Arc::new(risk_manager),
            radar: Arc::new(radar),
            execution_engine: Arc::new(execution_engine),
            tracker: Arc::new(tracker),
        })
    }

    /// Profile for `address`, created from the configured preset and overrides on first use
    pub async fn ensure_profile(&self, address: &str) -> Result<UserRiskProfile, ContextError> {
        if let Ok(profile) = self.risk_manager.get_profile(address) {
            return Ok(profile);
        }
        self.risk_manager
            .get_or_create_profile(address, self.config.risk.tolerance)
            .await?;
        Ok(self
            .risk_manager
            .update_preferences(address, None, &self.config.risk.overrides)
            .await?)
    }

    /// Generate a plan for `symbol` and run it past the risk manager
    pub async fn plan_trade(
        &self,
        address: &str,
        symbol: &str,
        timeframe: Timeframe,
        account: &AccountSnapshot,
    ) -> Result<Option<AssessedPlan>, ContextError> {
        self.ensure_profile(address).await?;
        let Some(plan) = self
            .strategy_engine
            .generate_trading_plan(symbol, account.balance, timeframe)
            .await?
        else {
            return Ok(None);
        };
        let assessment = self.risk_manager.assess_plan(address, &plan, account).await?;
        Ok(Some(AssessedPlan { plan, assessment }))
    }

    /// Execute a plan. Opening plans are recorded with the tracker once the
    /// run finishes: entered on completion, cancelled otherwise.
    pub async fn execute_trade(&self, address: &str, plan: &TradingPlan) -> Result<ExecutionStatus, ContextError> {
        let tracked = !plan.action.is_close();
        if tracked {
            if let Some(existing) = self.tracker.get_execution(&plan.id).await {
                if !existing.is_abandoned() {
                    return Err(TrackerError::DuplicatePlan(plan.id.clone()).into());
                }
            }
        }

        let mut execution = self.execution_engine.create_execution_plan(address, plan).await?;
        let status = self.execution_engine.execute_plan(address, &mut execution).await?;
        if !tracked {
            return Ok(status);
        }

        self.tracker.record_plan(plan, status.start_time).await?;
        if status.status == ExecutionState::Completed {
            let fill = self.adapters.feed.get_price(&plan.symbol).await.map_err(ExecutionError::from)?;
            let units = plan.position_sizing.notional_size / fill.price;
            self.tracker
                .record_entry(&plan.id, fill.price, units, 0.0, status.end_time.unwrap_or_else(Utc::now))
                .await?;
        } else {
            warn!(plan_id = %plan.id, state = ?status.status, "Execution did not complete");
            self.tracker.cancel_plan(&plan.id).await?;
        }
        Ok(status)
    }
}
