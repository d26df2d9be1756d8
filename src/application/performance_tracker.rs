//! Performance Tracker
//!
//! Follows each trading plan through planning -> entered -> active -> closed
//! (or cancelled / expired), computes realised metrics on exit and keeps
//! per-strategy aggregates.
//!
//! Raw per-trade records are kept alongside the running aggregates, so
//! `rebuild_strategy_performance` can always re-derive the aggregates from
//! history. Two background timers reprice open trades and evaluate alert
//! conditions; alerts are edge-triggered and the log is capped, newest first.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::domain::{
    OverallStats, PerformanceAlert, PerformanceAlertKind, PeriodStats, RecordStatus, StrategyPerformance, TradingPlan,
    TradingPlanExecution,
};
use crate::ports::{KeyValueStore, Notification, NotificationLevel, NotificationSink, PriceFeed, StoreError};

pub const EXPORT_VERSION: u32 = 1;
/// Reported when a strategy has wins and no losses yet
const PROFIT_FACTOR_CAP: f64 = 100.0;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Unknown plan: {0}")]
    PlanNotFound(String),
    #[error("Plan {0} is already tracked")]
    DuplicatePlan(String),
    #[error("Cannot {action} plan {plan_id} in status {from:?}")]
    InvalidTransition {
        plan_id: String,
        from: RecordStatus,
        action: &'static str,
    },
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Unsupported export version {0}")]
    UnsupportedVersion(u32),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub starting_capital: f64,
    pub reprice_interval_secs: u64,
    pub alert_interval_secs: u64,
    pub consecutive_loss_alert: u32,
    /// Percent below peak equity
    pub drawdown_alert_percent: f64,
    pub alert_log_cap: usize,
    pub storage_key: String,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            starting_capital: 10_000.0,
            reprice_interval_secs: 30,
            alert_interval_secs: 60,
            consecutive_loss_alert: 5,
            drawdown_alert_percent: 10.0,
            alert_log_cap: 100,
            storage_key: "performance_tracker".to_string(),
        }
    }
}

impl TrackerConfig {
    pub fn validate(&self) -> Result<(), TrackerError> {
        if !(self.starting_capital > 0.0) {
            return Err(TrackerError::InvalidInput("starting_capital must be positive".to_string()));
        }
        if self.reprice_interval_secs == 0 || self.alert_interval_secs == 0 {
            return Err(TrackerError::InvalidInput("timer intervals must be positive".to_string()));
        }
        if self.consecutive_loss_alert == 0 {
            return Err(TrackerError::InvalidInput("consecutive_loss_alert must be at least 1".to_string()));
        }
        if !(self.drawdown_alert_percent > 0.0 && self.drawdown_alert_percent < 100.0) {
            return Err(TrackerError::InvalidInput("drawdown_alert_percent must be within (0, 100)".to_string()));
        }
        if self.alert_log_cap == 0 {
            return Err(TrackerError::InvalidInput("alert_log_cap must be at least 1".to_string()));
        }
        if self.storage_key.trim().is_empty() {
            return Err(TrackerError::InvalidInput("storage_key cannot be empty".to_string()));
        }
        Ok(())
    }
}

/// Versioned JSON export of the whole tracker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerExport {
    pub version: u32,
    pub exported_at: DateTime<Utc>,
    pub peak_equity: f64,
    pub executions: BTreeMap<String, TradingPlanExecution>,
    pub strategy_performance: BTreeMap<String, StrategyPerformance>,
    pub alerts: Vec<PerformanceAlert>,
}

#[derive(Debug, Default)]
struct TrackerState {
    executions: HashMap<String, TradingPlanExecution>,
    performance: HashMap<String, StrategyPerformance>,
    alerts: VecDeque<PerformanceAlert>,
    /// Alert conditions currently true; an alert fires only on the rising edge
    raised: HashSet<String>,
    peak_equity: f64,
}

impl TrackerState {
    fn realized_pnl(&self) -> f64 {
        self.executions.values().filter_map(|e| e.pnl).sum()
    }

    fn unrealized_pnl(&self) -> f64 {
        self.executions
            .values()
            .filter(|e| e.status.is_open())
            .map(|e| e.unrealized_pnl)
            .sum()
    }

    fn equity(&self, starting_capital: f64) -> f64 {
        starting_capital + self.realized_pnl() + self.unrealized_pnl()
    }

    /// Raise peak equity if needed; returns drawdown percent
    fn mark_equity(&mut self, starting_capital: f64) -> f64 {
        let equity = self.equity(starting_capital);
        self.peak_equity = self.peak_equity.max(equity).max(starting_capital);
        if self.peak_equity <= 0.0 {
            return 0.0;
        }
        ((self.peak_equity - equity) / self.peak_equity * 100.0).max(0.0)
    }

    fn period_stats(&self, strategy: &str, since: DateTime<Utc>) -> PeriodStats {
        let pnls: Vec<f64> = self
            .executions
            .values()
            .filter(|e| e.strategy() == strategy && e.status == RecordStatus::Closed)
            .filter(|e| e.closed_at.map_or(false, |t| t >= since))
            .filter_map(|e| e.pnl)
            .collect();
        let wins = pnls.iter().filter(|p| **p > 0.0).count();
        PeriodStats {
            trades: pnls.len() as u32,
            pnl: pnls.iter().sum(),
            win_rate: if pnls.is_empty() { 0.0 } else { wins as f64 / pnls.len() as f64 * 100.0 },
        }
    }

    fn refresh_rollups(&mut self, strategy: &str, now: DateTime<Utc>) {
        let week = self.period_stats(strategy, now - Duration::days(7));
        let month = self.period_stats(strategy, now - Duration::days(30));
        if let Some(perf) = self.performance.get_mut(strategy) {
            perf.last_7_days = week;
            perf.last_30_days = month;
        }
    }
}

/// Fold one closed trade into the running aggregates
pub fn apply_trade(perf: &mut StrategyPerformance, pnl: f64, at: DateTime<Utc>) {
    perf.total_trades += 1;
    perf.total_pnl += pnl;

    if pnl > 0.0 {
        perf.winning_trades += 1;
        perf.average_win += (pnl - perf.average_win) / perf.winning_trades as f64;
        perf.largest_win = perf.largest_win.max(pnl);
        perf.current_streak = if perf.current_streak > 0 { perf.current_streak + 1 } else { 1 };
        perf.max_win_streak = perf.max_win_streak.max(perf.current_streak.unsigned_abs());
    } else {
        perf.losing_trades += 1;
        perf.average_loss += (pnl.abs() - perf.average_loss) / perf.losing_trades as f64;
        perf.largest_loss = perf.largest_loss.max(pnl.abs());
        perf.current_streak = if perf.current_streak < 0 { perf.current_streak - 1 } else { -1 };
        perf.max_loss_streak = perf.max_loss_streak.max(perf.current_streak.unsigned_abs());
    }

    perf.win_rate = perf.winning_trades as f64 / perf.total_trades as f64 * 100.0;
    let gross_win = perf.average_win * perf.winning_trades as f64;
    let gross_loss = perf.average_loss * perf.losing_trades as f64;
    perf.profit_factor = if gross_loss > 0.0 {
        gross_win / gross_loss
    } else if gross_win > 0.0 {
        PROFIT_FACTOR_CAP
    } else {
        0.0
    };
    perf.last_updated = Some(at);
}

pub struct PerformanceTracker {
    feed: Arc<dyn PriceFeed>,
    notifier: Arc<dyn NotificationSink>,
    store: Arc<dyn KeyValueStore>,
    config: TrackerConfig,
    state: RwLock<TrackerState>,
    is_running: Arc<RwLock<bool>>,
}

impl PerformanceTracker {
    pub fn new(
        feed: Arc<dyn PriceFeed>,
        notifier: Arc<dyn NotificationSink>,
        store: Arc<dyn KeyValueStore>,
        config: TrackerConfig,
    ) -> Result<Self, TrackerError> {
        config.validate()?;
        let state = TrackerState {
            peak_equity: config.starting_capital,
            ..TrackerState::default()
        };
        Ok(Self {
            feed,
            notifier,
            store,
            config,
            state: RwLock::new(state),
            is_running: Arc::new(RwLock::new(false)),
        })
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Start tracking a plan. An abandoned record for the same id is replaced.
    pub async fn record_plan(&self, plan: &TradingPlan, now: DateTime<Utc>) -> Result<(), TrackerError> {
        let mut state = self.state.write().await;
        if let Some(existing) = state.executions.get(&plan.id) {
            if !existing.is_abandoned() {
                return Err(TrackerError::DuplicatePlan(plan.id.clone()));
            }
            debug!(plan_id = %plan.id, status = ?existing.status, "Replacing abandoned record");
        }
        state
            .executions
            .insert(plan.id.clone(), TradingPlanExecution::new(plan.clone(), now));
        debug!(plan_id = %plan.id, strategy = %plan.strategy, "Plan recorded");
        Ok(())
    }

    /// Fill details; `size` is in units of the base asset
    pub async fn record_entry(
        &self,
        plan_id: &str,
        entry_price: f64,
        size: f64,
        fees: f64,
        now: DateTime<Utc>,
    ) -> Result<(), TrackerError> {
        if !(entry_price > 0.0) || !(size > 0.0) || fees < 0.0 {
            return Err(TrackerError::InvalidInput(format!(
                "entry price {} and size {} must be positive, fees {} non-negative",
                entry_price, size, fees
            )));
        }

        let mut state = self.state.write().await;
        let record = state
            .executions
            .get_mut(plan_id)
            .ok_or_else(|| TrackerError::PlanNotFound(plan_id.to_string()))?;
        if record.status != RecordStatus::Planning {
            return Err(TrackerError::InvalidTransition {
                plan_id: plan_id.to_string(),
                from: record.status,
                action: "enter",
            });
        }

        let planned = record.plan.entry.price;
        record.status = RecordStatus::Entered;
        record.actual_entry_price = Some(entry_price);
        record.current_price = Some(entry_price);
        record.size = size;
        record.fees = fees;
        record.slippage = if planned > 0.0 { (entry_price - planned) / planned * 100.0 } else { 0.0 };
        record.entered_at = Some(now);
        info!(plan_id, entry_price, size, slippage = record.slippage, "Entry recorded");
        Ok(())
    }

    /// Close the trade and compute its metrics. Returns false when nothing was entered.
    pub async fn record_exit(
        &self,
        plan_id: &str,
        exit_price: f64,
        fees: f64,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, TrackerError> {
        if !(exit_price > 0.0) || fees < 0.0 {
            return Err(TrackerError::InvalidInput(format!(
                "exit price {} must be positive, fees {} non-negative",
                exit_price, fees
            )));
        }

        let mut state = self.state.write().await;
        let record = state
            .executions
            .get_mut(plan_id)
            .ok_or_else(|| TrackerError::PlanNotFound(plan_id.to_string()))?;
        let Some(entry) = record.actual_entry_price else {
            debug!(plan_id, "Exit ignored, no entry recorded");
            return Ok(false);
        };
        if !record.status.is_open() {
            return Err(TrackerError::InvalidTransition {
                plan_id: plan_id.to_string(),
                from: record.status,
                action: "exit",
            });
        }

        let sign = record.direction().sign();
        let total_fees = record.fees + fees;
        let pnl = sign * (exit_price - entry) * record.size - total_fees;
        let notional = entry * record.size;
        let planned_risk = (entry - record.plan.stop_loss.price).abs() * record.size;
        let risk = if pnl > 0.0 {
            planned_risk
        } else {
            planned_risk.max(record.plan.position_sizing.margin)
        };

        record.status = RecordStatus::Closed;
        record.actual_exit_price = Some(exit_price);
        record.current_price = Some(exit_price);
        record.unrealized_pnl = 0.0;
        record.fees = total_fees;
        record.pnl = Some(pnl);
        record.pnl_percentage = Some(if notional > 0.0 { pnl / notional * 100.0 } else { 0.0 });
        record.actual_risk_reward = Some(if risk > 0.0 { pnl / risk } else { 0.0 });
        record.is_win = Some(pnl > 0.0);
        record.exit_reason = Some(reason.to_string());
        record.closed_at = Some(now);
        let strategy = record.strategy().to_string();

        let perf = state
            .performance
            .entry(strategy.clone())
            .or_insert_with(|| StrategyPerformance::new(&strategy));
        apply_trade(perf, pnl, now);
        state.refresh_rollups(&strategy, now);
        state.mark_equity(self.config.starting_capital);

        info!(plan_id, strategy = %strategy, pnl, reason, "Exit recorded");
        Ok(true)
    }

    pub async fn cancel_plan(&self, plan_id: &str) -> Result<(), TrackerError> {
        let mut state = self.state.write().await;
        let record = state
            .executions
            .get_mut(plan_id)
            .ok_or_else(|| TrackerError::PlanNotFound(plan_id.to_string()))?;
        if record.status != RecordStatus::Planning {
            return Err(TrackerError::InvalidTransition {
                plan_id: plan_id.to_string(),
                from: record.status,
                action: "cancel",
            });
        }
        record.status = RecordStatus::Cancelled;
        Ok(())
    }

    /// Mark never-entered plans past their expiry; returns how many changed
    pub async fn expire_stale_plans(&self, now: DateTime<Utc>) -> usize {
        let mut state = self.state.write().await;
        let mut expired = 0;
        for record in state.executions.values_mut() {
            if record.status == RecordStatus::Planning && record.plan.is_expired(now) {
                record.status = RecordStatus::Expired;
                expired += 1;
            }
        }
        if expired > 0 {
            info!(expired, "Stale plans expired");
        }
        expired
    }

    /// Refresh unrealised P&L for every open trade. Feed failures skip that trade.
    pub async fn reprice_open_positions(&self) -> usize {
        let open: Vec<(String, String)> = {
            let state = self.state.read().await;
            state
                .executions
                .values()
                .filter(|e| e.status.is_open())
                .map(|e| (e.plan_id.clone(), e.plan.symbol.clone()))
                .collect()
        };

        let mut prices = Vec::with_capacity(open.len());
        for (plan_id, symbol) in open {
            match self.feed.get_price(&symbol).await {
                Ok(ticker) => prices.push((plan_id, ticker.price)),
                Err(e) => warn!(plan_id = %plan_id, symbol = %symbol, error = %e, "Reprice failed"),
            }
        }

        let mut state = self.state.write().await;
        let mut updated = 0;
        for (plan_id, price) in prices {
            let Some(record) = state.executions.get_mut(&plan_id) else {
                continue;
            };
            let (Some(entry), true) = (record.actual_entry_price, record.status.is_open()) else {
                continue;
            };
            record.current_price = Some(price);
            record.unrealized_pnl = record.direction().sign() * (price - entry) * record.size - record.fees;
            record.status = RecordStatus::Active;
            updated += 1;
        }
        state.mark_equity(self.config.starting_capital);
        updated
    }

    /// Raise alerts for conditions that just became true
    pub async fn evaluate_alerts(&self, now: DateTime<Utc>) -> Vec<PerformanceAlert> {
        let mut raised = Vec::new();
        {
            let mut state = self.state.write().await;
            let mut conditions: Vec<(String, PerformanceAlertKind, Option<String>, f64, String)> = Vec::new();

            for perf in state.performance.values() {
                let losses = perf.consecutive_losses();
                if losses >= self.config.consecutive_loss_alert {
                    conditions.push((
                        format!("losses:{}", perf.strategy),
                        PerformanceAlertKind::ConsecutiveLosses,
                        Some(perf.strategy.clone()),
                        losses as f64,
                        format!("{} has lost {} trades in a row", perf.strategy, losses),
                    ));
                }
            }

            let drawdown = state.mark_equity(self.config.starting_capital);
            if drawdown > self.config.drawdown_alert_percent {
                conditions.push((
                    "drawdown".to_string(),
                    PerformanceAlertKind::Drawdown,
                    None,
                    drawdown,
                    format!("Equity is {:.1}% below its peak", drawdown),
                ));
            }

            let active: HashSet<String> = conditions.iter().map(|c| c.0.clone()).collect();
            for (key, kind, strategy, value, message) in conditions {
                if state.raised.contains(&key) {
                    continue;
                }
                raised.push(PerformanceAlert {
                    id: uuid::Uuid::new_v4().to_string(),
                    kind,
                    strategy,
                    message,
                    value,
                    timestamp: now,
                });
            }
            state.raised = active;

            for alert in &raised {
                state.alerts.push_front(alert.clone());
            }
            state.alerts.truncate(self.config.alert_log_cap);
        }

        for alert in &raised {
            warn!(kind = ?alert.kind, value = alert.value, "{}", alert.message);
            self.notifier
                .notify(Notification::new(NotificationLevel::Warning, "Performance alert", alert.message.clone()));
        }
        raised
    }

    /// Run both timers until [`stop`](Self::stop) is called
    pub async fn run(self: Arc<Self>) {
        *self.is_running.write().await = true;
        info!(
            reprice_secs = self.config.reprice_interval_secs,
            alert_secs = self.config.alert_interval_secs,
            "Performance tracker timers started"
        );

        let mut reprice = tokio::time::interval(StdDuration::from_secs(self.config.reprice_interval_secs));
        let mut alerts = tokio::time::interval(StdDuration::from_secs(self.config.alert_interval_secs));
        loop {
            tokio::select! {
                _ = reprice.tick() => {
                    let updated = self.reprice_open_positions().await;
                    debug!(updated, "Open trades repriced");
                }
                _ = alerts.tick() => {
                    self.evaluate_alerts(Utc::now()).await;
                }
            }
            if !*self.is_running.read().await {
                break;
            }
        }
        info!("Performance tracker timers stopped");
    }

    pub async fn stop(&self) {
        *self.is_running.write().await = false;
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    pub async fn get_execution(&self, plan_id: &str) -> Option<TradingPlanExecution> {
        self.state.read().await.executions.get(plan_id).cloned()
    }

    pub async fn executions(&self) -> Vec<TradingPlanExecution> {
        let state = self.state.read().await;
        let mut records: Vec<_> = state.executions.values().cloned().collect();
        records.sort_by_key(|r| r.recorded_at);
        records
    }

    pub async fn strategy_performance(&self, strategy: &str) -> Option<StrategyPerformance> {
        self.state.read().await.performance.get(strategy).cloned()
    }

    pub async fn all_strategy_performance(&self) -> Vec<StrategyPerformance> {
        let state = self.state.read().await;
        let mut all: Vec<_> = state.performance.values().cloned().collect();
        all.sort_by(|a, b| a.strategy.cmp(&b.strategy));
        all
    }

    pub async fn alerts(&self) -> Vec<PerformanceAlert> {
        self.state.read().await.alerts.iter().cloned().collect()
    }

    pub async fn overall_stats(&self) -> OverallStats {
        let state = self.state.read().await;
        let closed: Vec<f64> = state
            .executions
            .values()
            .filter(|e| e.status == RecordStatus::Closed)
            .filter_map(|e| e.pnl)
            .collect();
        let winning = closed.iter().filter(|p| **p > 0.0).count() as u32;
        let total = closed.len() as u32;
        let equity = state.equity(self.config.starting_capital);
        let peak = state.peak_equity.max(equity);
        let best_strategy = state
            .performance
            .values()
            .max_by(|a, b| a.total_pnl.total_cmp(&b.total_pnl))
            .map(|p| p.strategy.clone());

        OverallStats {
            total_trades: total,
            winning_trades: winning,
            win_rate: if total > 0 { winning as f64 / total as f64 * 100.0 } else { 0.0 },
            total_pnl: closed.iter().sum(),
            unrealized_pnl: state.unrealized_pnl(),
            open_positions: state.executions.values().filter(|e| e.status.is_open()).count(),
            equity,
            peak_equity: peak,
            current_drawdown: if peak > 0.0 { ((peak - equity) / peak * 100.0).max(0.0) } else { 0.0 },
            best_strategy,
        }
    }

    /// Re-derive every strategy aggregate from the closed trade records
    pub async fn rebuild_strategy_performance(&self, now: DateTime<Utc>) {
        let mut state = self.state.write().await;
        let mut closed: Vec<(String, f64, DateTime<Utc>)> = state
            .executions
            .values()
            .filter(|e| e.status == RecordStatus::Closed)
            .filter_map(|e| Some((e.strategy().to_string(), e.pnl?, e.closed_at?)))
            .collect();
        closed.sort_by_key(|(_, _, at)| *at);

        let mut rebuilt: HashMap<String, StrategyPerformance> = HashMap::new();
        for (strategy, pnl, at) in closed {
            let perf = rebuilt
                .entry(strategy.clone())
                .or_insert_with(|| StrategyPerformance::new(&strategy));
            apply_trade(perf, pnl, at);
        }
        let strategies: Vec<String> = rebuilt.keys().cloned().collect();
        state.performance = rebuilt;
        for strategy in strategies {
            state.refresh_rollups(&strategy, now);
        }
        info!(strategies = state.performance.len(), "Strategy performance rebuilt from trade records");
    }

    pub async fn export_data(&self) -> Result<String, TrackerError> {
        let state = self.state.read().await;
        let export = TrackerExport {
            version: EXPORT_VERSION,
            exported_at: Utc::now(),
            peak_equity: state.peak_equity,
            executions: state.executions.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            strategy_performance: state.performance.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            alerts: state.alerts.iter().cloned().collect(),
        };
        Ok(serde_json::to_string_pretty(&export)?)
    }

    /// Replace all state with an export; returns the number of executions loaded
    pub async fn import_data(&self, json: &str) -> Result<usize, TrackerError> {
        let export: TrackerExport = serde_json::from_str(json)?;
        if export.version != EXPORT_VERSION {
            return Err(TrackerError::UnsupportedVersion(export.version));
        }

        let mut state = self.state.write().await;
        state.executions = export.executions.into_iter().collect();
        state.performance = export.strategy_performance.into_iter().collect();
        state.alerts = export.alerts.into_iter().take(self.config.alert_log_cap).collect();
        state.raised.clear();
        state.peak_equity = export.peak_equity.max(self.config.starting_capital);
        info!(executions = state.executions.len(), "Tracker state imported");
        Ok(state.executions.len())
    }

    pub async fn persist(&self) -> Result<(), TrackerError> {
        let json = self.export_data().await?;
        self.store.set(&self.config.storage_key, &json).await?;
        debug!(key = %self.config.storage_key, "Tracker state persisted");
        Ok(())
    }

    /// Load persisted state; false when nothing has been stored yet
    pub async fn load(&self) -> Result<bool, TrackerError> {
        match self.store.get(&self.config.storage_key).await? {
            Some(json) => {
                self.import_data(&json).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
