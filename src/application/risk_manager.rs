//! Risk Manager
//!
//! Per-address risk profiles and the scored plan assessment pipeline.
//!
//! Score contributions:
//! - Position size over limit: +25 (high)
//! - Leverage over per-asset cap: +20 (high)
//! - Risk/reward under minimum: +15 (medium)
//! - High volatility: +10 (medium)
//! - Daily loss limit breached: +40 (critical, always unacceptable)
//! - Correlated exposure over budget: +15 (medium)
//!
//! Total exposure and position count are reported as low-severity warnings
//! worth zero points. Emergency-stop evaluation is independent of plans and
//! only decides; acting on the result is the gateway's job.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::domain::{
    base_asset, AccountSnapshot, EmergencyAction, EmergencyActionType, RiskAssessment, RiskParameterOverrides,
    RiskParameters, RiskTolerance, RiskViolation, Severity, TradingPlan, UserRiskProfile, ViolationKind,
    VolatilityLevel, ATR_PERCENT_INDICATOR,
};
use crate::ports::{Repository, StoreError};

pub const POSITION_SIZE_POINTS: f64 = 25.0;
pub const LEVERAGE_POINTS: f64 = 20.0;
pub const RISK_REWARD_POINTS: f64 = 15.0;
pub const VOLATILITY_POINTS: f64 = 10.0;
pub const DAILY_LOSS_POINTS: f64 = 40.0;
pub const CORRELATION_POINTS: f64 = 15.0;

/// Plans scoring at or above this are rejected
pub const MAX_ACCEPTABLE_SCORE: f64 = 70.0;
/// Scores at or above this add emergency suggestions
pub const EMERGENCY_SCORE: f64 = 80.0;

/// Fixed pairwise correlations between base assets
const CORRELATIONS: &[(&str, &str, f64)] = &[
    ("BTC", "ETH", 0.85),
    ("BTC", "SOL", 0.75),
    ("ETH", "SOL", 0.80),
    ("BTC", "BNB", 0.70),
    ("ETH", "BNB", 0.70),
    ("BTC", "AVAX", 0.65),
    ("ETH", "AVAX", 0.70),
    ("SOL", "AVAX", 0.75),
    ("AAPL", "MSFT", 0.70),
    ("NVDA", "QQQ", 0.75),
    ("SPY", "QQQ", 0.90),
];

/// Correlation between two symbols; identical assets are perfectly correlated
pub fn correlation(a: &str, b: &str) -> f64 {
    let (a, b) = (base_asset(a), base_asset(b));
    if a == b {
        return 1.0;
    }
    CORRELATIONS
        .iter()
        .find(|(x, y, _)| (*x == a && *y == b) || (*x == b && *y == a))
        .map(|(_, _, c)| *c)
        .unwrap_or(0.0)
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RiskError {
    #[error("No risk profile for address {0}")]
    ProfileNotFound(String),
    #[error("Invalid risk parameters: {0}")]
    InvalidParameters(String),
    #[error("Risk profile store failed: {0}")]
    Store(#[from] StoreError),
}

pub struct RiskManager {
    profiles: Arc<dyn Repository<UserRiskProfile>>,
    emergency_active: AtomicBool,
    emergency_log: Mutex<Vec<EmergencyAction>>,
}

impl RiskManager {
    pub fn new(profiles: Arc<dyn Repository<UserRiskProfile>>) -> Self {
        Self {
            profiles,
            emergency_active: AtomicBool::new(false),
            emergency_log: Mutex::new(Vec::new()),
        }
    }

    /// Existing profile, or a fresh one on the given preset
    pub async fn get_or_create_profile(
        &self,
        address: &str,
        tolerance: RiskTolerance,
    ) -> Result<UserRiskProfile, RiskError> {
        if let Some(profile) = self.profiles.get(address) {
            return Ok(profile);
        }
        let profile = UserRiskProfile::new(address, tolerance);
        self.profiles.put(address, profile.clone()).await?;
        info!(address, ?tolerance, "Created risk profile");
        Ok(profile)
    }

    pub fn get_profile(&self, address: &str) -> Result<UserRiskProfile, RiskError> {
        self.profiles
            .get(address)
            .ok_or_else(|| RiskError::ProfileNotFound(address.to_string()))
    }

    /// Switch preset and/or apply overrides on top of it
    pub async fn update_preferences(
        &self,
        address: &str,
        tolerance: Option<RiskTolerance>,
        overrides: &RiskParameterOverrides,
    ) -> Result<UserRiskProfile, RiskError> {
        let mut profile = self.get_profile(address)?;
        let tolerance = tolerance.unwrap_or(profile.parameters.risk_tolerance);
        let base = if tolerance == profile.parameters.risk_tolerance {
            profile.parameters.clone()
        } else {
            RiskParameters::preset(tolerance)
        };
        let parameters = base.merged(overrides);
        validate_parameters(&parameters)?;

        profile.parameters = parameters;
        self.profiles.put(address, profile.clone()).await?;
        info!(address, ?tolerance, "Risk preferences updated");
        Ok(profile)
    }

    /// Score a plan against the address's profile and record the outcome on it
    pub async fn assess_plan(
        &self,
        address: &str,
        plan: &TradingPlan,
        account: &AccountSnapshot,
    ) -> Result<RiskAssessment, RiskError> {
        let profile = self.get_profile(address)?;
        let now = Utc::now();
        let assessment = assess_plan_risk(plan, &profile, account, now);

        let escalated = assessment
            .violations
            .iter()
            .any(|v| v.severity >= Severity::High);
        let critical = assessment.has_critical();
        let exposure = account.total_exposure();
        let score = assessment.risk_score;
        self.profiles
            .update(address, &mut |p| {
                p.last_risk_check = Some(now);
                p.risk_score = score;
                p.current_exposure = exposure;
                if escalated {
                    p.violation_count += 1;
                }
                if critical {
                    p.is_blocked = true;
                }
            })
            .await?;

        if assessment.is_acceptable {
            info!(address, plan_id = %plan.id, score = assessment.risk_score, "Plan accepted by risk manager");
        } else {
            warn!(
                address,
                plan_id = %plan.id,
                score = assessment.risk_score,
                violations = assessment.violations.len(),
                "Plan rejected by risk manager"
            );
        }
        Ok(assessment)
    }

    /// Hard triggers: daily loss, drawdown, per-position stop
    pub async fn check_emergency_stop(
        &self,
        address: &str,
        account: &AccountSnapshot,
    ) -> Result<Vec<EmergencyAction>, RiskError> {
        let profile = self.get_profile(address)?;
        let drawdown = account.drawdown();
        self.profiles
            .update(address, &mut |p| {
                p.max_drawdown = p.max_drawdown.max(drawdown);
            })
            .await?;

        let params = &profile.parameters;
        if !params.emergency_controls {
            return Ok(Vec::new());
        }

        let now = Utc::now();
        let mut actions = Vec::new();

        let daily_pnl = profile.daily_pnl.min(account.daily_pnl);
        if daily_pnl <= -params.daily_loss_limit {
            actions.push(EmergencyAction {
                action: EmergencyActionType::StopTrading,
                priority: 9,
                address: address.to_string(),
                symbol: None,
                reason: format!(
                    "Daily loss {:.2} reached the limit of {:.2}",
                    -daily_pnl, params.daily_loss_limit
                ),
                timestamp: now,
            });
        }

        if drawdown > params.max_drawdown {
            actions.push(EmergencyAction {
                action: EmergencyActionType::LiquidateAll,
                priority: 10,
                address: address.to_string(),
                symbol: None,
                reason: format!(
                    "Drawdown {:.1}% exceeds the maximum of {:.1}%",
                    drawdown * 100.0,
                    params.max_drawdown * 100.0
                ),
                timestamp: now,
            });
        }

        for position in &account.positions {
            let loss_pct = position.unrealized_pnl_percent();
            if loss_pct < -params.emergency_stop_loss {
                actions.push(EmergencyAction {
                    action: EmergencyActionType::ClosePosition,
                    priority: 8,
                    address: address.to_string(),
                    symbol: Some(position.symbol.clone()),
                    reason: format!(
                        "{} is down {:.1}%, past the {:.1}% emergency stop",
                        position.symbol, -loss_pct, params.emergency_stop_loss
                    ),
                    timestamp: now,
                });
            }
        }

        if !actions.is_empty() {
            self.lock_log().extend(actions.iter().cloned());
            if actions.iter().any(|a| a.priority >= 9) {
                self.emergency_active.store(true, Ordering::SeqCst);
                error!(address, actions = actions.len(), "Emergency stop triggered");
            } else {
                warn!(address, actions = actions.len(), "Emergency position closes suggested");
            }
        }
        Ok(actions)
    }

    /// Book a realised result; crossing the daily limit blocks the address
    pub async fn record_trade_result(&self, address: &str, pnl: f64) -> Result<UserRiskProfile, RiskError> {
        let mut profile = self.get_profile(address)?;
        profile.daily_pnl += pnl;
        if profile.daily_loss_breached() && !profile.is_blocked {
            profile.is_blocked = true;
            warn!(address, daily_pnl = profile.daily_pnl, "Daily loss limit reached, trading blocked");
        }
        self.profiles.put(address, profile.clone()).await?;
        Ok(profile)
    }

    /// Start a new trading day
    pub async fn reset_daily(&self, address: &str) -> Result<(), RiskError> {
        let found = self
            .profiles
            .update(address, &mut |p| {
                p.daily_pnl = 0.0;
                p.is_blocked = false;
            })
            .await?;
        if !found {
            return Err(RiskError::ProfileNotFound(address.to_string()));
        }
        info!(address, "Daily risk counters reset");
        Ok(())
    }

    pub async fn unblock(&self, address: &str) -> Result<(), RiskError> {
        if !self.profiles.update(address, &mut |p| p.is_blocked = false).await? {
            return Err(RiskError::ProfileNotFound(address.to_string()));
        }
        Ok(())
    }

    /// False when the address is blocked or an emergency stop is active
    pub fn is_trading_allowed(&self, address: &str) -> bool {
        !self.is_emergency_active() && self.profiles.get(address).map_or(false, |p| !p.is_blocked)
    }

    pub fn emergency_log(&self) -> Vec<EmergencyAction> {
        self.lock_log().clone()
    }

    pub fn is_emergency_active(&self) -> bool {
        self.emergency_active.load(Ordering::SeqCst)
    }

    pub fn clear_emergency(&self) {
        self.emergency_active.store(false, Ordering::SeqCst);
        info!("Emergency flag cleared");
    }

    fn lock_log(&self) -> std::sync::MutexGuard<'_, Vec<EmergencyAction>> {
        self.emergency_log.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub fn validate_parameters(params: &RiskParameters) -> Result<(), RiskError> {
    let positive = [
        ("daily_loss_limit", params.daily_loss_limit),
        ("total_exposure_limit", params.total_exposure_limit),
        ("max_position_size", params.max_position_size),
        ("min_risk_reward_ratio", params.min_risk_reward_ratio),
        ("max_correlated_exposure", params.max_correlated_exposure),
        ("emergency_stop_loss", params.emergency_stop_loss),
    ];
    for (name, value) in positive {
        if !(value > 0.0) {
            return Err(RiskError::InvalidParameters(format!("{} must be positive, got {}", name, value)));
        }
    }
    if !(0.0..=1.0).contains(&params.correlation_limit) {
        return Err(RiskError::InvalidParameters(format!(
            "correlation_limit must be within 0-1, got {}",
            params.correlation_limit
        )));
    }
    if !(params.max_drawdown > 0.0 && params.max_drawdown < 1.0) {
        return Err(RiskError::InvalidParameters(format!(
            "max_drawdown must be a fraction between 0 and 1, got {}",
            params.max_drawdown
        )));
    }
    if params.max_positions_count == 0 {
        return Err(RiskError::InvalidParameters("max_positions_count must be at least 1".to_string()));
    }
    if let Some((asset, lev)) = params.max_leverage_per_asset.iter().find(|(_, lev)| **lev < 1.0) {
        return Err(RiskError::InvalidParameters(format!("leverage cap for {} must be >= 1, got {}", asset, lev)));
    }
    Ok(())
}

fn violation(kind: ViolationKind, severity: Severity, points: f64, current_value: f64, limit: f64, message: String) -> RiskViolation {
    RiskViolation {
        kind,
        severity,
        message,
        current_value,
        limit,
        points,
    }
}

/// Pure scoring pipeline. Profile bookkeeping is left to the caller.
pub fn assess_plan_risk(
    plan: &TradingPlan,
    profile: &UserRiskProfile,
    account: &AccountSnapshot,
    now: DateTime<Utc>,
) -> RiskAssessment {
    let params = &profile.parameters;
    let sizing = &plan.position_sizing;
    let notional = sizing.notional_size;
    let mut violations = Vec::new();
    let mut suggestions = Vec::new();

    if notional > params.max_position_size {
        violations.push(violation(
            ViolationKind::PositionSize,
            Severity::High,
            POSITION_SIZE_POINTS,
            notional,
            params.max_position_size,
            format!("Position size {:.2} exceeds limit {:.2}", notional, params.max_position_size),
        ));
        suggestions.push(format!("Reduce position size to {:.2} or less", params.max_position_size));
    }

    let leverage_cap = params.max_leverage_for(&plan.symbol);
    if sizing.leverage > leverage_cap {
        violations.push(violation(
            ViolationKind::Leverage,
            Severity::High,
            LEVERAGE_POINTS,
            sizing.leverage,
            leverage_cap,
            format!("Leverage {:.1}x exceeds {:.1}x cap for {}", sizing.leverage, leverage_cap, plan.symbol),
        ));
        suggestions.push(format!("Reduce leverage to {:.1}x", leverage_cap));
    }

    if plan.risk_reward < params.min_risk_reward_ratio {
        violations.push(violation(
            ViolationKind::RiskReward,
            Severity::Medium,
            RISK_REWARD_POINTS,
            plan.risk_reward,
            params.min_risk_reward_ratio,
            format!(
                "Risk/reward {:.2} below minimum {:.2}",
                plan.risk_reward, params.min_risk_reward_ratio
            ),
        ));
        suggestions.push(format!(
            "Widen the target or tighten the stop to reach {:.1}:1",
            params.min_risk_reward_ratio
        ));
    }

    let atr_pct = plan.signal.indicator(ATR_PERCENT_INDICATOR).unwrap_or(0.0);
    if plan.market_regime.volatility == VolatilityLevel::High || atr_pct > params.high_volatility_threshold {
        violations.push(violation(
            ViolationKind::Volatility,
            Severity::Medium,
            VOLATILITY_POINTS,
            atr_pct,
            params.high_volatility_threshold,
            format!("High volatility on {} (ATR {:.2}% of price)", plan.symbol, atr_pct),
        ));
        suggestions.push(format!(
            "Scale the position by {:.0}% while volatility is elevated",
            params.volatility_adjustment_factor * 100.0
        ));
    }

    let daily_pnl = profile.daily_pnl.min(account.daily_pnl);
    if daily_pnl <= -params.daily_loss_limit {
        violations.push(violation(
            ViolationKind::DailyLoss,
            Severity::Critical,
            DAILY_LOSS_POINTS,
            -daily_pnl,
            params.daily_loss_limit,
            format!(
                "Daily loss {:.2} has reached the limit of {:.2}",
                -daily_pnl, params.daily_loss_limit
            ),
        ));
        suggestions.push("Stop trading for the rest of the day".to_string());
    }

    let correlated: f64 = account
        .positions
        .iter()
        .filter(|p| correlation(&plan.symbol, &p.symbol).abs() > params.correlation_limit)
        .map(|p| p.size.abs())
        .sum();
    if correlated > 0.0 && correlated + notional > params.max_correlated_exposure {
        violations.push(violation(
            ViolationKind::Correlation,
            Severity::Medium,
            CORRELATION_POINTS,
            correlated + notional,
            params.max_correlated_exposure,
            format!(
                "Correlated exposure {:.2} exceeds budget {:.2}",
                correlated + notional,
                params.max_correlated_exposure
            ),
        ));
        suggestions.push("Diversify into assets uncorrelated with open positions".to_string());
    }

    let total_exposure = account.total_exposure() + notional;
    if total_exposure > params.total_exposure_limit {
        violations.push(violation(
            ViolationKind::TotalExposure,
            Severity::Low,
            0.0,
            total_exposure,
            params.total_exposure_limit,
            format!(
                "Total exposure {:.2} would exceed {:.2}",
                total_exposure, params.total_exposure_limit
            ),
        ));
    }

    let position_count = account.positions.len() + 1;
    if position_count > params.max_positions_count {
        violations.push(violation(
            ViolationKind::PositionCount,
            Severity::Low,
            0.0,
            position_count as f64,
            params.max_positions_count as f64,
            format!(
                "{} open positions would exceed the limit of {}",
                position_count, params.max_positions_count
            ),
        ));
    }

    let risk_score = violations.iter().map(|v| v.points).sum::<f64>().min(100.0);
    let has_critical = violations.iter().any(|v| v.severity == Severity::Critical);
    let is_acceptable = risk_score < MAX_ACCEPTABLE_SCORE && !has_critical;

    if risk_score >= EMERGENCY_SCORE {
        suggestions.push("Emergency: pause automated trading".to_string());
        suggestions.push("Emergency: review and reduce open positions".to_string());
    }

    let adjusted_plan = adjust_plan(plan, params.max_position_size, leverage_cap);

    RiskAssessment {
        plan_id: plan.id.clone(),
        risk_score,
        is_acceptable,
        violations,
        suggestions,
        adjusted_plan,
        assessed_at: now,
    }
}

/// Plan scaled down to the size and leverage limits, if it breaches either
fn adjust_plan(plan: &TradingPlan, max_size: f64, max_leverage: f64) -> Option<TradingPlan> {
    let sizing = plan.position_sizing;
    if sizing.notional_size <= max_size && sizing.leverage <= max_leverage {
        return None;
    }

    let mut adjusted = plan.clone();
    let notional = sizing.notional_size.min(max_size);
    let leverage = sizing.leverage.min(max_leverage).max(1.0);
    let scale = if sizing.notional_size > 0.0 { notional / sizing.notional_size } else { 1.0 };

    adjusted.position_sizing.notional_size = notional;
    adjusted.position_sizing.leverage = leverage;
    adjusted.position_sizing.margin = notional / leverage;
    adjusted.position_sizing.risk_amount = sizing.risk_amount * scale;
    adjusted.notes.push(format!(
        "Adjusted by risk manager: size {:.2} -> {:.2}, leverage {:.1}x -> {:.1}x",
        sizing.notional_size, notional, sizing.leverage, leverage
    ));
    Some(adjusted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::storage::InMemoryRepository;
    use crate::domain::{
        Direction, EntrySpec, MarketRegime, OpenPosition, OrderType, PlanAction, PositionSizing, RegimeType, StopLoss,
        TakeProfit, TakeProfitTarget, Timeframe, TradingSignal, TrendDirection,
    };
    use approx::assert_relative_eq;
    use std::collections::HashMap;

    fn plan(symbol: &str, notional: f64, leverage: f64, risk_reward: f64) -> TradingPlan {
        TradingPlan {
            id: "plan-1".to_string(),
            symbol: symbol.to_string(),
            strategy: "Trend Breakout".to_string(),
            action: PlanAction::Long,
            signal: TradingSignal::entry(Direction::Long, 80.0, 100.0, Utc::now(), "test"),
            entry: EntrySpec {
                price: 100.0,
                order_type: OrderType::Market,
                conditions: vec![],
            },
            stop_loss: StopLoss { price: 98.0, percent: 2.0 },
            take_profit: TakeProfit {
                price: 104.0,
                percent: 4.0,
                targets: vec![TakeProfitTarget { price: 104.0, percent: 4.0 }],
            },
            position_sizing: PositionSizing {
                notional_size: notional,
                leverage,
                margin: notional / leverage,
                risk_amount: 100.0,
            },
            market_regime: MarketRegime {
                regime_type: RegimeType::Trending,
                strength: 80.0,
                direction: TrendDirection::Bullish,
                volatility: VolatilityLevel::Medium,
                confidence: 80.0,
            },
            risk_reward,
            confidence: 80.0,
            timeframe: Timeframe::H1,
            created_at: Utc::now(),
            expires_at: None,
            notes: vec![],
        }
    }

    fn manager() -> RiskManager {
        RiskManager::new(Arc::new(InMemoryRepository::<UserRiskProfile>::new()))
    }

    #[tokio::test]
    async fn test_clean_plan_scores_zero() {
        let rm = manager();
        rm.get_or_create_profile("0xabc", RiskTolerance::Medium).await.unwrap();
        let assessment = rm
            .assess_plan("0xabc", &plan("BTC", 1_000.0, 5.0, 2.0), &AccountSnapshot::new(10_000.0))
            .await
            .unwrap();
        assert_eq!(assessment.risk_score, 0.0);
        assert!(assessment.is_acceptable);
        assert!(assessment.violations.is_empty());
        assert!(assessment.adjusted_plan.is_none());
    }

    #[tokio::test]
    async fn test_position_size_violation_is_exactly_25() {
        let rm = manager();
        rm.get_or_create_profile("0xabc", RiskTolerance::Medium).await.unwrap();
        let assessment = rm
            .assess_plan("0xabc", &plan("BTC", 6_000.0, 5.0, 2.0), &AccountSnapshot::new(10_000.0))
            .await
            .unwrap();
        assert_eq!(assessment.violations.len(), 1);
        let v = &assessment.violations[0];
        assert_eq!(v.kind, ViolationKind::PositionSize);
        assert_eq!(v.severity, Severity::High);
        assert_relative_eq!(assessment.risk_score, 25.0);
        assert!(assessment.is_acceptable);

        let adjusted = assessment.adjusted_plan.unwrap();
        assert_relative_eq!(adjusted.position_sizing.notional_size, 5_000.0);
        assert_relative_eq!(adjusted.position_sizing.margin, 1_000.0);
        assert_eq!(rm.get_profile("0xabc").unwrap().violation_count, 1);
    }

    #[tokio::test]
    async fn test_leverage_cap_uses_default_for_unlisted() {
        let rm = manager();
        rm.get_or_create_profile("0xabc", RiskTolerance::Medium).await.unwrap();
        // BTC allows 10x, DOGE falls back to 5x
        let btc = rm
            .assess_plan("0xabc", &plan("BTC-USD", 1_000.0, 8.0, 2.0), &AccountSnapshot::new(10_000.0))
            .await
            .unwrap();
        assert!(btc.violations.is_empty());
        let doge = rm
            .assess_plan("0xabc", &plan("DOGE", 1_000.0, 8.0, 2.0), &AccountSnapshot::new(10_000.0))
            .await
            .unwrap();
        assert_eq!(doge.violations[0].kind, ViolationKind::Leverage);
        assert_relative_eq!(doge.risk_score, 20.0);
    }

    #[tokio::test]
    async fn test_daily_loss_is_critical_regardless_of_score() {
        let rm = manager();
        rm.get_or_create_profile("0xabc", RiskTolerance::Medium).await.unwrap();
        rm.record_trade_result("0xabc", -1_200.0).await.unwrap();

        let assessment = rm
            .assess_plan("0xabc", &plan("BTC", 1_000.0, 5.0, 2.0), &AccountSnapshot::new(10_000.0))
            .await
            .unwrap();
        assert!(assessment.has_critical());
        assert_relative_eq!(assessment.risk_score, 40.0);
        assert!(!assessment.is_acceptable);
        assert!(rm.get_profile("0xabc").unwrap().is_blocked);
        assert!(!rm.is_trading_allowed("0xabc"));
    }

    #[tokio::test]
    async fn test_score_over_threshold_rejected_with_emergency_suggestions() {
        let rm = manager();
        rm.get_or_create_profile("0xabc", RiskTolerance::Medium).await.unwrap();
        let mut risky = plan("DOGE", 9_000.0, 20.0, 1.0);
        risky.market_regime.volatility = VolatilityLevel::High;
        let account = AccountSnapshot::new(10_000.0).with_position(OpenPosition::new("DOGE", Direction::Long, 500.0, 0.1));

        let assessment = rm.assess_plan("0xabc", &risky, &account).await.unwrap();
        // 25 + 20 + 15 + 10 + 15
        assert_relative_eq!(assessment.risk_score, 85.0);
        assert!(!assessment.is_acceptable);
        assert!(assessment.suggestions.iter().any(|s| s.starts_with("Emergency")));
    }

    #[tokio::test]
    async fn test_correlation_budget() {
        let rm = manager();
        rm.get_or_create_profile("0xabc", RiskTolerance::Medium).await.unwrap();
        let account = AccountSnapshot::new(50_000.0)
            .with_position(OpenPosition::new("ETH", Direction::Long, 4_000.0, 3_000.0))
            .with_position(OpenPosition::new("AAPL", Direction::Long, 4_000.0, 150.0));
        let assessment = rm.assess_plan("0xabc", &plan("BTC", 4_500.0, 5.0, 2.0), &account).await.unwrap();
        let corr: Vec<_> = assessment
            .violations
            .iter()
            .filter(|v| v.kind == ViolationKind::Correlation)
            .collect();
        assert_eq!(corr.len(), 1);
        // only ETH counts: 4000 + 4500
        assert_relative_eq!(corr[0].current_value, 8_500.0);
    }

    #[tokio::test]
    async fn test_exposure_and_count_are_zero_point_warnings() {
        let rm = manager();
        rm.get_or_create_profile("0xabc", RiskTolerance::Low).await.unwrap();
        let mut account = AccountSnapshot::new(50_000.0);
        for symbol in ["AAPL", "TSLA", "NFLX"] {
            account = account.with_position(OpenPosition::new(symbol, Direction::Long, 1_900.0, 100.0));
        }
        let mut p = plan("XRP", 1_900.0, 2.0, 2.5);
        p.position_sizing.margin = 950.0;
        let assessment = rm.assess_plan("0xabc", &p, &account).await.unwrap();
        let kinds: Vec<_> = assessment.violations.iter().map(|v| v.kind).collect();
        assert!(kinds.contains(&ViolationKind::PositionCount));
        assert!(assessment.violations.iter().all(|v| v.severity == Severity::Low));
        assert_eq!(assessment.risk_score, 0.0);
        assert!(assessment.is_acceptable);
    }

    #[tokio::test]
    async fn test_missing_profile_is_error() {
        let rm = manager();
        let result = rm.assess_plan("0xnone", &plan("BTC", 1.0, 1.0, 2.0), &AccountSnapshot::new(1.0)).await;
        assert_eq!(result.unwrap_err(), RiskError::ProfileNotFound("0xnone".to_string()));
        assert!(rm.check_emergency_stop("0xnone", &AccountSnapshot::new(1.0)).await.is_err());
    }

    #[tokio::test]
    async fn test_emergency_stop_triggers() {
        let rm = manager();
        rm.get_or_create_profile("0xabc", RiskTolerance::Medium).await.unwrap();

        let mut account = AccountSnapshot::new(10_000.0);
        account.equity = 8_000.0;
        account.daily_pnl = -1_500.0;
        let mut position = OpenPosition::new("SOL", Direction::Long, 1_000.0, 100.0);
        position.update_price(80.0);
        account = account.with_position(position);

        let actions = rm.check_emergency_stop("0xabc", &account).await.unwrap();
        let types: Vec<_> = actions.iter().map(|a| (a.action, a.priority)).collect();
        assert!(types.contains(&(EmergencyActionType::StopTrading, 9)));
        assert!(types.contains(&(EmergencyActionType::LiquidateAll, 10)));
        assert!(types.contains(&(EmergencyActionType::ClosePosition, 8)));
        assert!(rm.is_emergency_active());
        assert_eq!(rm.emergency_log().len(), 3);
        assert_relative_eq!(rm.get_profile("0xabc").unwrap().max_drawdown, 0.2);

        rm.clear_emergency();
        assert!(!rm.is_emergency_active());
    }

    #[tokio::test]
    async fn test_position_stop_alone_does_not_flip_flag() {
        let rm = manager();
        rm.get_or_create_profile("0xabc", RiskTolerance::Medium).await.unwrap();
        let mut position = OpenPosition::new("ETH", Direction::Short, 1_000.0, 100.0);
        position.update_price(120.0);
        let account = AccountSnapshot::new(10_000.0).with_position(position);

        let actions = rm.check_emergency_stop("0xabc", &account).await.unwrap();
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].symbol.as_deref(), Some("ETH"));
        assert!(!rm.is_emergency_active());
    }

    #[tokio::test]
    async fn test_emergency_controls_disabled() {
        let rm = manager();
        rm.get_or_create_profile("0xabc", RiskTolerance::Medium).await.unwrap();
        let overrides = RiskParameterOverrides {
            emergency_controls: Some(false),
            ..Default::default()
        };
        rm.update_preferences("0xabc", None, &overrides).await.unwrap();
        let mut account = AccountSnapshot::new(10_000.0);
        account.daily_pnl = -5_000.0;
        assert!(rm.check_emergency_stop("0xabc", &account).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_preferences_merges_and_validates() {
        let rm = manager();
        rm.get_or_create_profile("0xabc", RiskTolerance::Medium).await.unwrap();
        let mut leverage = HashMap::new();
        leverage.insert("DOGE".to_string(), 2.0);
        let overrides = RiskParameterOverrides {
            max_leverage_per_asset: Some(leverage),
            ..Default::default()
        };
        let profile = rm.update_preferences("0xabc", Some(RiskTolerance::High), &overrides).await.unwrap();
        assert_eq!(profile.parameters.risk_tolerance, RiskTolerance::High);
        assert_eq!(profile.parameters.max_leverage_for("DOGE"), 2.0);
        assert_eq!(profile.parameters.max_leverage_for("XRP"), 10.0);

        let bad = RiskParameterOverrides {
            max_drawdown: Some(1.5),
            ..Default::default()
        };
        assert!(matches!(
            rm.update_preferences("0xabc", None, &bad).await,
            Err(RiskError::InvalidParameters(_))
        ));
    }

    #[tokio::test]
    async fn test_reset_daily_unblocks() {
        let rm = manager();
        rm.get_or_create_profile("0xabc", RiskTolerance::Low).await.unwrap();
        let profile = rm.record_trade_result("0xabc", -600.0).await.unwrap();
        assert!(profile.is_blocked);
        rm.reset_daily("0xabc").await.unwrap();
        let profile = rm.get_profile("0xabc").unwrap();
        assert_eq!(profile.daily_pnl, 0.0);
        assert!(rm.is_trading_allowed("0xabc"));
        assert!(rm.reset_daily("0xnone").await.is_err());
    }

    /// Profile store whose writes always fail
    struct ReadOnlyProfiles(InMemoryRepository<UserRiskProfile>);

    #[async_trait::async_trait]
    impl Repository<UserRiskProfile> for ReadOnlyProfiles {
        fn get(&self, key: &str) -> Option<UserRiskProfile> {
            self.0.get(key)
        }

        async fn put(&self, key: &str, _value: UserRiskProfile) -> Result<(), StoreError> {
            Err(StoreError::WriteError(key.to_string(), "read-only".to_string()))
        }

        async fn remove(&self, key: &str) -> Result<Option<UserRiskProfile>, StoreError> {
            Err(StoreError::WriteError(key.to_string(), "read-only".to_string()))
        }

        fn keys(&self) -> Vec<String> {
            self.0.keys()
        }

        fn values(&self) -> Vec<UserRiskProfile> {
            self.0.values()
        }
    }

    #[tokio::test]
    async fn test_store_failures_surface_as_errors() {
        let seeded = InMemoryRepository::<UserRiskProfile>::new();
        seeded
            .put("0xabc", UserRiskProfile::new("0xabc", RiskTolerance::Medium))
            .await
            .unwrap();
        let rm = RiskManager::new(Arc::new(ReadOnlyProfiles(seeded)));

        let created = rm.get_or_create_profile("0xnew", RiskTolerance::Low).await;
        assert!(matches!(created, Err(RiskError::Store(StoreError::WriteError(_, _)))));
        assert!(matches!(
            rm.record_trade_result("0xabc", -100.0).await,
            Err(RiskError::Store(_))
        ));
        assert!(matches!(
            rm.assess_plan("0xabc", &plan("BTC", 1_000.0, 5.0, 2.0), &AccountSnapshot::new(10_000.0))
                .await,
            Err(RiskError::Store(_))
        ));
        assert!(matches!(rm.reset_daily("0xabc").await, Err(RiskError::Store(_))));
        // the stored profile is untouched
        assert_eq!(rm.get_profile("0xabc").unwrap().daily_pnl, 0.0);
    }

    #[test]
    fn test_correlation_table() {
        assert_eq!(correlation("BTC", "btc-usd"), 1.0);
        assert_eq!(correlation("ETH", "BTC"), 0.85);
        assert_eq!(correlation("BTC", "DOGE"), 0.0);
    }
}
