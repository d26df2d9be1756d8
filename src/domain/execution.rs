//! Execution plan and step state machine types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::plan::TradingPlan;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Approve,
    Deposit,
    OpenPosition,
    ClosePosition,
    Withdraw,
}

impl StepType {
    /// Gas budget used for plan estimates
    pub fn estimated_gas(&self) -> u64 {
        match self {
            StepType::Approve => 50_000,
            StepType::Deposit => 120_000,
            StepType::OpenPosition => 250_000,
            StepType::ClosePosition => 200_000,
            StepType::Withdraw => 100_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
    /// No receipt within the step deadline
    TimedOut,
}

impl StepStatus {
    /// Allowed forward transitions
    pub fn can_transition_to(&self, next: StepStatus) -> bool {
        use StepStatus::*;
        matches!(
            (self, next),
            (Pending, InProgress) | (Pending, Skipped) | (InProgress, Completed) | (InProgress, Failed) | (InProgress, TimedOut)
        )
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, StepStatus::Pending | StepStatus::InProgress)
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
#[error("Illegal step transition {from:?} -> {to:?} for step {step_id}")]
pub struct StepTransitionError {
    pub step_id: String,
    pub from: StepStatus,
    pub to: StepStatus,
}

/// One atomic on-chain action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStep {
    pub id: String,
    #[serde(rename = "type")]
    pub step_type: StepType,
    pub description: String,
    pub params: Value,
    pub estimated_gas: u64,
    pub status: StepStatus,
    pub tx_hash: Option<String>,
    pub error: Option<String>,
}

impl ExecutionStep {
    pub fn new(id: impl Into<String>, step_type: StepType, description: impl Into<String>, params: Value) -> Self {
        Self {
            id: id.into(),
            step_type,
            description: description.into(),
            params,
            estimated_gas: step_type.estimated_gas(),
            status: StepStatus::Pending,
            tx_hash: None,
            error: None,
        }
    }

    /// Move the step forward; backward or sideways moves are rejected
    pub fn transition(&mut self, next: StepStatus) -> Result<(), StepTransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(StepTransitionError {
                step_id: self.id.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }
}

/// Ordered on-chain steps derived from one trading plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    /// Same as the trading plan id
    pub id: String,
    pub trading_plan: TradingPlan,
    pub steps: Vec<ExecutionStep>,
    pub total_estimated_gas: u64,
    pub required_balance: f64,
    pub required_allowance: f64,
    pub created_at: DateTime<Utc>,
}

impl ExecutionPlan {
    pub fn step(&self, step_type: StepType) -> Option<&ExecutionStep> {
        self.steps.iter().find(|s| s.step_type == step_type)
    }

    /// Amount the deposit step moves into the contract, zero when absent
    pub fn deposit_amount(&self) -> f64 {
        self.step(StepType::Deposit)
            .and_then(|s| s.params.get("amount"))
            .and_then(Value::as_f64)
            .unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Preparing,
    Confirming,
    Executing,
    Completed,
    Failed,
    Cancelled,
    /// A step never confirmed within its deadline
    TimedOut,
}

impl ExecutionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionState::Completed | ExecutionState::Failed | ExecutionState::Cancelled | ExecutionState::TimedOut
        )
    }
}

/// Progress of one execution attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStatus {
    pub plan_id: String,
    pub status: ExecutionState,
    pub current_step: usize,
    pub total_steps: usize,
    /// 0-100
    pub progress: f64,
    pub completed_steps: Vec<String>,
    pub transactions: Vec<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl ExecutionStatus {
    pub fn new(plan_id: &str, total_steps: usize) -> Self {
        Self {
            plan_id: plan_id.to_string(),
            status: ExecutionState::Preparing,
            current_step: 0,
            total_steps,
            progress: 0.0,
            completed_steps: Vec::new(),
            transactions: Vec::new(),
            start_time: Utc::now(),
            end_time: None,
            error: None,
        }
    }

    pub fn finish(&mut self, state: ExecutionState, error: Option<String>) {
        self.status = state;
        self.error = error;
        self.end_time = Some(Utc::now());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionEventType {
    PlanCreated,
    PreflightStarted,
    PreflightCompleted,
    ExecutionStarted,
    StepStarted,
    StepCompleted,
    StepFailed,
    ExecutionCompleted,
    ExecutionFailed,
    ExecutionCancelled,
}

/// Lifecycle event broadcast to execution listeners
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionEvent {
    pub event_type: ExecutionEventType,
    pub plan_id: String,
    pub step_id: Option<String>,
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ExecutionEvent {
    pub fn new(event_type: ExecutionEventType, plan_id: &str) -> Self {
        Self {
            event_type,
            plan_id: plan_id.to_string(),
            step_id: None,
            message: None,
            timestamp: Utc::now(),
        }
    }

    pub fn for_step(mut self, step_id: &str) -> Self {
        self.step_id = Some(step_id.to_string());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}
