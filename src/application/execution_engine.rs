//! Trading Execution Engine
//!
//! Turns an accepted trading plan into the minimal sequence of on-chain steps
//! and runs them strictly in order:
//!
//! preparing -> confirming (preflight) -> executing -> completed | failed | cancelled | timed_out
//!
//! A failed step halts the run and leaves later steps pending. Completed steps
//! are not rolled back. Each step's confirmation is bounded by a timeout.

use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::domain::{
    AssetClass, ExecutionEvent, ExecutionEventType, ExecutionPlan, ExecutionState, ExecutionStatus, ExecutionStep,
    PlanAction, StepStatus, StepTransitionError, StepType, TradingPlan,
};
use crate::ports::{AccountGateway, GatewayError, MarketDataError, OpenPositionRequest, PriceFeed, Repository, StoreError};

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),
    #[error("Market data error: {0}")]
    MarketData(#[from] MarketDataError),
    #[error("No {side} position on {symbol} to close")]
    NoPositionToClose { symbol: String, side: String },
    #[error("Unknown execution plan: {0}")]
    PlanNotFound(String),
    #[error("Execution {0} already finished")]
    AlreadyFinished(String),
    #[error("Execution {0} is already running")]
    AlreadyRunning(String),
    #[error("Malformed step {step_id}: {reason}")]
    InvalidStep { step_id: String, reason: String },
    #[error(transparent)]
    Transition(#[from] StepTransitionError),
    #[error("Invalid execution config: {0}")]
    InvalidConfig(String),
    #[error("Execution status store failed: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Max price deviation from the plan entry, percent
    pub slippage_tolerance: f64,
    /// Deposit target as a multiple of required margin
    pub deposit_buffer: f64,
    pub step_timeout_secs: u64,
    /// Append a withdraw step after closing a position
    pub withdraw_after_close: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            slippage_tolerance: 1.0,
            deposit_buffer: 1.1,
            step_timeout_secs: 120,
            withdraw_after_close: false,
        }
    }
}

impl ExecutionConfig {
    pub fn validate(&self) -> Result<(), ExecutionError> {
        if !(self.slippage_tolerance > 0.0 && self.slippage_tolerance <= 50.0) {
            return Err(ExecutionError::InvalidConfig(format!(
                "slippage_tolerance must be within (0, 50], got {}",
                self.slippage_tolerance
            )));
        }
        if self.deposit_buffer < 1.0 {
            return Err(ExecutionError::InvalidConfig(format!(
                "deposit_buffer must be at least 1.0, got {}",
                self.deposit_buffer
            )));
        }
        if self.step_timeout_secs == 0 {
            return Err(ExecutionError::InvalidConfig("step_timeout_secs must be positive".to_string()));
        }
        Ok(())
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }
}

/// Receives every lifecycle event. Errors and panics are logged, never propagated.
pub trait ExecutionListener: Send + Sync {
    fn on_event(&self, event: &ExecutionEvent) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreflightCheck {
    pub passed: bool,
    pub message: String,
}

impl PreflightCheck {
    fn pass(message: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
        }
    }

    fn fail(message: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreflightReport {
    pub balance: PreflightCheck,
    /// A failing allowance is only a warning; the approve step fixes it
    pub allowance: PreflightCheck,
    pub market: PreflightCheck,
    pub leverage: PreflightCheck,
    pub margin: PreflightCheck,
    pub overall: bool,
    pub warnings: Vec<String>,
}

impl PreflightReport {
    pub fn blockers(&self) -> Vec<&str> {
        [&self.balance, &self.market, &self.leverage, &self.margin]
            .into_iter()
            .filter(|c| !c.passed)
            .map(|c| c.message.as_str())
            .collect()
    }
}

pub struct ExecutionEngine {
    gateway: Arc<dyn AccountGateway>,
    feed: Arc<dyn PriceFeed>,
    statuses: Arc<dyn Repository<ExecutionStatus>>,
    listeners: RwLock<Vec<Arc<dyn ExecutionListener>>>,
    cancelled: Mutex<HashSet<String>>,
    config: ExecutionConfig,
}

impl ExecutionEngine {
    pub fn new(
        gateway: Arc<dyn AccountGateway>,
        feed: Arc<dyn PriceFeed>,
        statuses: Arc<dyn Repository<ExecutionStatus>>,
        config: ExecutionConfig,
    ) -> Result<Self, ExecutionError> {
        config.validate()?;
        Ok(Self {
            gateway,
            feed,
            statuses,
            listeners: RwLock::new(Vec::new()),
            cancelled: Mutex::new(HashSet::new()),
            config,
        })
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    pub fn add_listener(&self, listener: Arc<dyn ExecutionListener>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    fn emit(&self, event: ExecutionEvent) {
        debug!(plan_id = %event.plan_id, event = ?event.event_type, "Execution event");
        let listeners = self.listeners.read().unwrap_or_else(PoisonError::into_inner).clone();
        for listener in listeners {
            match catch_unwind(AssertUnwindSafe(|| listener.on_event(&event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(plan_id = %event.plan_id, error = %e, "Execution listener failed"),
                Err(_) => error!(plan_id = %event.plan_id, "Execution listener panicked"),
            }
        }
    }

    /// Minimal step list for the plan: approve and deposit only when needed
    pub async fn create_execution_plan(&self, address: &str, plan: &TradingPlan) -> Result<ExecutionPlan, ExecutionError> {
        let account = self.gateway.get_account_info(address).await?;
        let allowance = self.gateway.check_allowance(address).await?;
        let position = self.gateway.get_position(address, &plan.symbol).await?;

        let mut steps = Vec::new();
        let mut required_balance = 0.0;
        let mut required_allowance = 0.0;
        let step_id = |n: usize| format!("{}-step-{}", plan.id, n);

        match plan.action {
            PlanAction::Long | PlanAction::Short => {
                let ticker = self.feed.get_price(&plan.symbol).await?;
                let sizing = plan.position_sizing;
                let target_margin = sizing.margin * self.config.deposit_buffer;
                let available = account.available_margin();

                if available < target_margin {
                    let amount = target_margin - available;
                    required_balance = amount;
                    required_allowance = amount;
                    if allowance < amount {
                        steps.push(ExecutionStep::new(
                            step_id(steps.len() + 1),
                            StepType::Approve,
                            format!("Approve {:.2} collateral", amount),
                            json!({ "amount": amount }),
                        ));
                    }
                    steps.push(ExecutionStep::new(
                        step_id(steps.len() + 1),
                        StepType::Deposit,
                        format!("Deposit {:.2} collateral", amount),
                        json!({ "amount": amount }),
                    ));
                }

                let side = plan.direction();
                let slip = self.config.slippage_tolerance / 100.0;
                let request = OpenPositionRequest {
                    symbol: plan.symbol.clone(),
                    side,
                    size: sizing.notional_size,
                    leverage: sizing.leverage,
                    acceptable_price: ticker.price * (1.0 + side.sign() * slip),
                };
                let params = serde_json::to_value(&request).map_err(|e| ExecutionError::InvalidStep {
                    step_id: step_id(steps.len() + 1),
                    reason: e.to_string(),
                })?;
                steps.push(ExecutionStep::new(
                    step_id(steps.len() + 1),
                    StepType::OpenPosition,
                    format!(
                        "Open {:?} {} size {:.2} at {:.1}x",
                        side, plan.symbol, sizing.notional_size, sizing.leverage
                    ),
                    params,
                ));
            }
            PlanAction::CloseLong | PlanAction::CloseShort => {
                let (matches, side) = match plan.action {
                    PlanAction::CloseLong => (position > 0.0, "long"),
                    _ => (position < 0.0, "short"),
                };
                if !matches {
                    return Err(ExecutionError::NoPositionToClose {
                        symbol: plan.symbol.clone(),
                        side: side.to_string(),
                    });
                }

                let size = position.abs();
                steps.push(ExecutionStep::new(
                    step_id(1),
                    StepType::ClosePosition,
                    format!("Close {} {} size {:.2}", side, plan.symbol, size),
                    json!({ "symbol": plan.symbol, "size": size }),
                ));
                if self.config.withdraw_after_close {
                    let amount = plan.position_sizing.margin;
                    steps.push(ExecutionStep::new(
                        step_id(2),
                        StepType::Withdraw,
                        format!("Withdraw {:.2} released margin", amount),
                        json!({ "amount": amount }),
                    ));
                }
            }
        }

        let execution = ExecutionPlan {
            id: plan.id.clone(),
            trading_plan: plan.clone(),
            total_estimated_gas: steps.iter().map(|s| s.estimated_gas).sum(),
            steps,
            required_balance,
            required_allowance,
            created_at: Utc::now(),
        };

        info!(
            plan_id = %execution.id,
            symbol = %plan.symbol,
            steps = execution.steps.len(),
            "Execution plan created"
        );
        self.emit(
            ExecutionEvent::new(ExecutionEventType::PlanCreated, &execution.id)
                .with_message(format!("{} steps", execution.steps.len())),
        );
        Ok(execution)
    }

    /// Balance, allowance, market, leverage and margin checks
    pub async fn preflight(&self, address: &str, execution: &ExecutionPlan) -> Result<PreflightReport, ExecutionError> {
        self.emit(ExecutionEvent::new(ExecutionEventType::PreflightStarted, &execution.id));

        let plan = &execution.trading_plan;
        let account = self.gateway.get_account_info(address).await?;
        let allowance = self.gateway.check_allowance(address).await?;
        let opening = !plan.action.is_close();

        let balance = if account.balance >= execution.required_balance {
            PreflightCheck::pass(format!("Wallet balance {:.2} covers {:.2}", account.balance, execution.required_balance))
        } else {
            PreflightCheck::fail(format!(
                "Wallet balance {:.2} is short of the {:.2} deposit",
                account.balance, execution.required_balance
            ))
        };

        let allowance = if allowance >= execution.required_allowance {
            PreflightCheck::pass(format!("Allowance {:.2} is sufficient", allowance))
        } else {
            PreflightCheck::fail(format!(
                "Allowance {:.2} below {:.2}; approve step will raise it",
                allowance, execution.required_allowance
            ))
        };

        let market = if !opening {
            PreflightCheck::pass("Closing at market")
        } else if plan.is_expired(Utc::now()) {
            PreflightCheck::fail("Trading plan has expired")
        } else {
            let ticker = self.feed.get_price(&plan.symbol).await?;
            let entry = plan.entry.price;
            let deviation = if entry > 0.0 { (ticker.price - entry).abs() / entry * 100.0 } else { f64::INFINITY };
            if deviation <= self.config.slippage_tolerance {
                PreflightCheck::pass(format!("Price {:.4} within {:.2}% of entry", ticker.price, deviation))
            } else {
                PreflightCheck::fail(format!(
                    "Price {:.4} moved {:.2}% from entry {:.4}, tolerance {:.2}%",
                    ticker.price, deviation, entry, self.config.slippage_tolerance
                ))
            }
        };

        let cap = AssetClass::classify(&plan.symbol).max_leverage();
        let leverage = if !opening || plan.position_sizing.leverage <= cap {
            PreflightCheck::pass(format!("Leverage {:.1}x within {:.0}x cap", plan.position_sizing.leverage, cap))
        } else {
            PreflightCheck::fail(format!(
                "Leverage {:.1}x exceeds the {:.0}x venue cap",
                plan.position_sizing.leverage, cap
            ))
        };

        let margin = if !opening {
            PreflightCheck::pass("No margin required to close")
        } else {
            let available = account.available_margin() + execution.deposit_amount();
            if available >= plan.position_sizing.margin {
                PreflightCheck::pass(format!("Available margin {:.2} covers {:.2}", available, plan.position_sizing.margin))
            } else {
                PreflightCheck::fail(format!(
                    "Available margin {:.2} below required {:.2}",
                    available, plan.position_sizing.margin
                ))
            }
        };

        let warnings = if allowance.passed { Vec::new() } else { vec![allowance.message.clone()] };
        let overall = balance.passed && leverage.passed && margin.passed && market.passed;
        let report = PreflightReport {
            balance,
            allowance,
            market,
            leverage,
            margin,
            overall,
            warnings,
        };

        self.emit(
            ExecutionEvent::new(ExecutionEventType::PreflightCompleted, &execution.id)
                .with_message(if overall { "passed".to_string() } else { report.blockers().join("; ") }),
        );
        Ok(report)
    }

    /// Preflight then run every step in order
    pub async fn execute_plan(&self, address: &str, execution: &mut ExecutionPlan) -> Result<ExecutionStatus, ExecutionError> {
        let plan_id = execution.id.clone();
        if let Some(existing) = self.statuses.get(&plan_id) {
            if !existing.status.is_terminal() {
                return Err(ExecutionError::AlreadyRunning(plan_id));
            }
        }

        if let Some(step) = execution.steps.iter().find(|s| s.status != StepStatus::Pending) {
            return Err(ExecutionError::InvalidStep {
                step_id: step.id.clone(),
                reason: format!("step is {:?}; build a fresh execution plan to run again", step.status),
            });
        }
        // a request left over from an earlier run of this plan id
        self.take_cancel(&plan_id);

        let total = execution.steps.len();
        let mut status = ExecutionStatus::new(&plan_id, total);
        status.status = ExecutionState::Confirming;
        if let Err(e) = self.save(&status).await {
            self.fail(&mut status, format!("Execution aborted: {}", e)).await?;
            return Ok(status);
        }

        let report = match self.preflight(address, execution).await {
            Ok(report) => report,
            Err(e) => {
                self.fail(&mut status, format!("Preflight error: {}", e)).await?;
                return Ok(status);
            }
        };
        if !report.overall {
            self.fail(&mut status, format!("Preflight failed: {}", report.blockers().join("; ")))
                .await?;
            return Ok(status);
        }
        for warning in &report.warnings {
            warn!(plan_id = %plan_id, "{}", warning);
        }

        match self.run_steps(address, execution, &mut status).await {
            Ok(()) => Ok(status),
            // the terminal status is set but could not be stored
            Err(e) if status.status.is_terminal() => Err(e),
            Err(e) => {
                self.fail(&mut status, format!("Execution aborted: {}", e)).await?;
                Ok(status)
            }
        }
    }

    /// Step loop. `Ok` leaves `status` terminal and stored; an `Err` on a
    /// non-terminal status is turned into a failure by the caller.
    async fn run_steps(
        &self,
        address: &str,
        execution: &mut ExecutionPlan,
        status: &mut ExecutionStatus,
    ) -> Result<(), ExecutionError> {
        let plan_id = execution.id.clone();
        let total = execution.steps.len();

        status.status = ExecutionState::Executing;
        self.save(status).await?;
        self.emit(ExecutionEvent::new(ExecutionEventType::ExecutionStarted, &plan_id));
        info!(plan_id = %plan_id, steps = total, "Execution started");

        for index in 0..total {
            if self.take_cancel(&plan_id) {
                for step in execution.steps.iter_mut().skip(index) {
                    step.transition(StepStatus::Skipped)?;
                }
                status.finish(ExecutionState::Cancelled, Some("Cancelled by user".to_string()));
                self.save(status).await?;
                self.emit(ExecutionEvent::new(ExecutionEventType::ExecutionCancelled, &plan_id));
                info!(plan_id = %plan_id, completed = status.completed_steps.len(), "Execution cancelled");
                return Ok(());
            }

            status.current_step = index;
            let step = &mut execution.steps[index];
            step.transition(StepStatus::InProgress)?;
            self.save(status).await?;
            self.emit(
                ExecutionEvent::new(ExecutionEventType::StepStarted, &plan_id)
                    .for_step(&step.id)
                    .with_message(step.description.clone()),
            );

            let outcome = tokio::time::timeout(self.config.step_timeout(), self.run_step(address, step)).await;
            match outcome {
                Ok(Ok(hash)) => {
                    step.transition(StepStatus::Completed)?;
                    step.tx_hash = Some(hash.clone());
                    status.completed_steps.push(step.id.clone());
                    status.transactions.push(hash);
                    status.progress = (index + 1) as f64 / total as f64 * 100.0;
                    self.save(status).await?;
                    self.emit(ExecutionEvent::new(ExecutionEventType::StepCompleted, &plan_id).for_step(&step.id));
                    info!(plan_id = %plan_id, step_id = %step.id, progress = status.progress, "Step completed");
                }
                Ok(Err(e)) => {
                    step.transition(StepStatus::Failed)?;
                    let message = format!("Step {} ({:?}) failed: {}", step.id, step.step_type, e);
                    step.error = Some(e.to_string());
                    self.emit(
                        ExecutionEvent::new(ExecutionEventType::StepFailed, &plan_id)
                            .for_step(&step.id)
                            .with_message(e.to_string()),
                    );
                    return self.fail(status, message).await;
                }
                Err(_) => {
                    step.transition(StepStatus::TimedOut)?;
                    let message = format!(
                        "Step {} ({:?}) not confirmed within {}s",
                        step.id, step.step_type, self.config.step_timeout_secs
                    );
                    step.error = Some(message.clone());
                    self.emit(
                        ExecutionEvent::new(ExecutionEventType::StepFailed, &plan_id)
                            .for_step(&step.id)
                            .with_message(message.clone()),
                    );
                    error!(plan_id = %plan_id, step_id = %step.id, "{}", message);
                    self.take_cancel(&plan_id);
                    status.finish(ExecutionState::TimedOut, Some(message.clone()));
                    self.save(status).await?;
                    self.emit(ExecutionEvent::new(ExecutionEventType::ExecutionFailed, &plan_id).with_message(message));
                    return Ok(());
                }
            }
        }

        self.take_cancel(&plan_id);
        status.progress = 100.0;
        status.finish(ExecutionState::Completed, None);
        self.save(status).await?;
        self.emit(ExecutionEvent::new(ExecutionEventType::ExecutionCompleted, &plan_id));
        info!(plan_id = %plan_id, txs = status.transactions.len(), "Execution completed");
        Ok(())
    }

    async fn fail(&self, status: &mut ExecutionStatus, message: String) -> Result<(), ExecutionError> {
        self.take_cancel(&status.plan_id);
        error!(plan_id = %status.plan_id, "{}", message);
        status.finish(ExecutionState::Failed, Some(message.clone()));
        let saved = self.save(status).await;
        self.emit(ExecutionEvent::new(ExecutionEventType::ExecutionFailed, &status.plan_id).with_message(message));
        saved
    }

    async fn save(&self, status: &ExecutionStatus) -> Result<(), ExecutionError> {
        self.statuses.put(&status.plan_id, status.clone()).await?;
        Ok(())
    }

    async fn run_step(&self, address: &str, step: &ExecutionStep) -> Result<String, ExecutionError> {
        let invalid = |reason: &str| ExecutionError::InvalidStep {
            step_id: step.id.clone(),
            reason: reason.to_string(),
        };
        let amount = || step.params.get("amount").and_then(|v| v.as_f64()).ok_or_else(|| invalid("missing amount"));

        let tx = match step.step_type {
            StepType::Approve => self.gateway.approve(address, amount()?).await?,
            StepType::Deposit => self.gateway.deposit(address, amount()?).await?,
            StepType::Withdraw => self.gateway.withdraw(address, amount()?).await?,
            StepType::OpenPosition => {
                let request: OpenPositionRequest =
                    serde_json::from_value(step.params.clone()).map_err(|e| invalid(&e.to_string()))?;
                self.gateway.open_position(address, request).await?
            }
            StepType::ClosePosition => {
                let symbol = step
                    .params
                    .get("symbol")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| invalid("missing symbol"))?;
                let size = step.params.get("size").and_then(|v| v.as_f64()).ok_or_else(|| invalid("missing size"))?;
                self.gateway.close_position(address, symbol, size).await?
            }
        };

        let hash = tx.hash().to_string();
        debug!(step_id = %step.id, tx = %hash, "Transaction submitted");
        let receipt = tx.wait().await?;
        if !receipt.success {
            return Err(GatewayError::Reverted(format!("transaction {} reverted", receipt.hash)).into());
        }
        Ok(hash)
    }

    /// Stop the execution before its next step. In-flight transactions still land.
    pub fn cancel_execution(&self, plan_id: &str) -> Result<(), ExecutionError> {
        let status = self
            .statuses
            .get(plan_id)
            .ok_or_else(|| ExecutionError::PlanNotFound(plan_id.to_string()))?;
        if status.status.is_terminal() {
            return Err(ExecutionError::AlreadyFinished(plan_id.to_string()));
        }
        self.cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(plan_id.to_string());
        info!(plan_id, "Cancellation requested");
        Ok(())
    }

    fn take_cancel(&self, plan_id: &str) -> bool {
        self.cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(plan_id)
    }

    pub fn get_execution_status(&self, plan_id: &str) -> Option<ExecutionStatus> {
        self.statuses.get(plan_id)
    }
}
