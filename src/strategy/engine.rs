//! Strategy Engine
//!
//! Runs every enabled signal generator over a symbol's rolling bar series,
//! keeps the strongest signal that clears its own strategy's confidence gate,
//! sizes it with that strategy's risk settings and assembles a TradingPlan.
//! Ties go to the strategy registered first (breakout, bounce, momentum).

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::domain::{
    risk_reward_ratio, AssetClass, EntrySpec, MarketRegime, OrderType, PlanAction, PlanValidation, PriceBar,
    PriceTicker, Timeframe, TradingPlan, TradingSignal, VolatilityLevel, ATR_PERCENT_INDICATOR,
};
use crate::ports::{HistoryQuery, MarketDataError, PriceFeed, PriceHistoryProvider};
use crate::strategy::bar_series::BarSeries;
use crate::strategy::indicators::{IndicatorError, IndicatorPeriods, TechnicalIndicators};
use crate::strategy::params::{ConfigError, StrategyConfig, StrategySet};
use crate::strategy::regime_detector::analyze_market_regime;
use crate::strategy::signals::{generator_for, SignalGenerator};
use crate::strategy::sizing::{calculate_position_size, calculate_stop_loss_and_take_profit, effective_percents};

/// Warn below this reward-to-risk ratio
const MIN_COMFORTABLE_RISK_REWARD: f64 = 1.5;
/// Warn below this plan confidence
const MIN_COMFORTABLE_CONFIDENCE: f64 = 70.0;

#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("Market data error: {0}")]
    MarketData(#[from] MarketDataError),
    #[error("Invalid strategy configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("Indicator error: {0}")]
    Indicator(#[from] IndicatorError),
}

/// Engine-wide settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Bars kept per symbol and timeframe
    pub history_length: usize,
    /// Plan lifetime in bars of the plan's timeframe
    pub plan_ttl_bars: u32,
    pub periods: IndicatorPeriods,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            history_length: 100,
            plan_ttl_bars: 4,
            periods: IndicatorPeriods::default(),
        }
    }
}

/// A generator's signal together with the strategy that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateSignal {
    pub strategy: StrategyConfig,
    pub signal: TradingSignal,
}

pub struct StrategyEngine {
    feed: Arc<dyn PriceFeed>,
    history: Arc<dyn PriceHistoryProvider>,
    strategies: Vec<(Box<dyn SignalGenerator>, StrategyConfig)>,
    settings: EngineSettings,
    series: RwLock<HashMap<(String, Timeframe), BarSeries>>,
}

impl StrategyEngine {
    pub fn new(
        feed: Arc<dyn PriceFeed>,
        history: Arc<dyn PriceHistoryProvider>,
        strategies: &StrategySet,
        settings: EngineSettings,
    ) -> Result<Self, StrategyError> {
        strategies.validate()?;
        settings.periods.validate()?;

        let strategies = strategies
            .ordered()
            .into_iter()
            .map(|config| (generator_for(config.kind), config.clone()))
            .collect();

        Ok(Self {
            feed,
            history,
            strategies,
            settings,
            series: RwLock::new(HashMap::new()),
        })
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn strategies(&self) -> impl Iterator<Item = &StrategyConfig> {
        self.strategies.iter().map(|(_, config)| config)
    }

    /// Fetch the price, refresh the series and build a plan. `Ok(None)` means
    /// no strategy qualified, which is a normal outcome.
    pub async fn generate_trading_plan(
        &self,
        symbol: &str,
        account_balance: f64,
        timeframe: Timeframe,
    ) -> Result<Option<TradingPlan>, StrategyError> {
        let ticker = self.feed.get_price(symbol).await?;
        let bars = self.refresh_series(symbol, timeframe, &ticker).await?;

        let plan = self.build_plan(symbol, &bars, ticker.price, account_balance, timeframe, Utc::now());
        match &plan {
            Some(plan) => info!(
                symbol,
                strategy = %plan.strategy,
                action = ?plan.action,
                confidence = plan.confidence,
                "Trading plan generated"
            ),
            None => debug!(symbol, "No qualifying signal"),
        }
        Ok(plan)
    }

    /// Current cached bars for a symbol, extended by the ticker
    async fn refresh_series(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        ticker: &PriceTicker,
    ) -> Result<Vec<PriceBar>, StrategyError> {
        let key = (symbol.to_string(), timeframe);
        {
            let mut cache = self.series.write().await;
            if let Some(series) = cache.get_mut(&key) {
                if !series.apply_ticker(ticker) {
                    debug!(symbol, "Dropped stale ticker");
                }
                return Ok(series.bars().to_vec());
            }
        }

        let query = HistoryQuery::new(symbol, timeframe, self.settings.history_length).anchored_at(ticker.price);
        let history = self.history.fetch_history(query).await?;
        debug!(symbol, provider = self.history.name(), bars = history.len(), "Loaded price history");

        let mut series = BarSeries::new(timeframe, self.settings.history_length).with_history(history);
        series.apply_ticker(ticker);
        let bars = series.bars().to_vec();

        // another caller may have seeded the series meanwhile; keep the first
        self.series.write().await.entry(key).or_insert(series);
        Ok(bars)
    }

    /// Every enabled generator's signal, in registration order
    pub fn evaluate_signals(
        &self,
        bars: &[PriceBar],
        indicators: &TechnicalIndicators,
        regime: &MarketRegime,
    ) -> Vec<CandidateSignal> {
        self.strategies
            .iter()
            .filter(|(_, config)| config.enabled)
            .filter_map(|(generator, config)| {
                generator.detect(bars, indicators, regime, config).map(|signal| CandidateSignal {
                    strategy: config.clone(),
                    signal,
                })
            })
            .collect()
    }

    /// Strongest candidate meeting its strategy's gate; the first wins ties
    pub fn select_signal(candidates: Vec<CandidateSignal>) -> Option<CandidateSignal> {
        let mut best: Option<CandidateSignal> = None;
        for candidate in candidates {
            if candidate.signal.strength < candidate.strategy.min_confidence {
                continue;
            }
            let stronger = best
                .as_ref()
                .map_or(true, |b| candidate.signal.strength > b.signal.strength);
            if stronger {
                best = Some(candidate);
            }
        }
        best
    }

    /// Pure plan construction from a bar series
    pub fn build_plan(
        &self,
        symbol: &str,
        bars: &[PriceBar],
        current_price: f64,
        account_balance: f64,
        timeframe: Timeframe,
        now: DateTime<Utc>,
    ) -> Option<TradingPlan> {
        let indicators = match TechnicalIndicators::compute(bars, &self.settings.periods) {
            Ok(indicators) => indicators,
            Err(e) => {
                debug!(symbol, "Skipping plan: {}", e);
                return None;
            }
        };
        let regime = analyze_market_regime(bars, &indicators);
        let winner = Self::select_signal(self.evaluate_signals(bars, &indicators, &regime))?;

        let atr = indicators.last_atr().unwrap_or(0.0);
        let risk = &winner.strategy.risk;
        let sizing = calculate_position_size(&winner.signal, account_balance, risk, current_price, atr);
        if sizing.notional_size <= 0.0 {
            warn!(symbol, strategy = %winner.strategy.name, "Signal produced a zero-size position");
            return None;
        }

        let mut signal = winner.signal;
        if current_price > 0.0 {
            signal = signal.with_indicator(ATR_PERCENT_INDICATOR, atr / current_price * 100.0);
        }
        let direction = signal.direction;
        let (stop_percent, target_percent) = effective_percents(current_price, atr, risk);
        let (stop_loss, take_profit) =
            calculate_stop_loss_and_take_profit(direction, current_price, stop_percent, target_percent);
        let risk_reward = risk_reward_ratio(current_price, stop_loss.price, take_profit.price);

        let expires_at = now + timeframe.duration() * self.settings.plan_ttl_bars as i32;
        let notes = vec![
            format!("Regime: {}", regime),
            format!("Signal: {}", signal.reason),
            format!(
                "Risking {:.2} with stop {:.2}% / target {:.2}%",
                sizing.risk_amount, stop_percent, target_percent
            ),
        ];

        Some(TradingPlan {
            id: uuid::Uuid::new_v4().to_string(),
            symbol: symbol.to_string(),
            strategy: winner.strategy.name.clone(),
            action: PlanAction::from(direction),
            confidence: signal.strength.clamp(0.0, 100.0),
            entry: EntrySpec {
                price: current_price,
                order_type: OrderType::Market,
                conditions: vec![signal.reason.clone()],
            },
            signal,
            stop_loss,
            take_profit,
            position_sizing: sizing,
            market_regime: regime,
            risk_reward,
            timeframe,
            created_at: now,
            expires_at: Some(expires_at),
            notes,
        })
    }

    /// Fast local gate before the account-aware risk manager
    pub fn validate_trading_plan(plan: &TradingPlan, account_balance: f64) -> PlanValidation {
        let mut validation = PlanValidation::default();
        let sizing = &plan.position_sizing;

        if sizing.margin > account_balance {
            validation.errors.push(format!(
                "Insufficient balance: margin {:.2} exceeds balance {:.2}",
                sizing.margin, account_balance
            ));
        }

        let class = AssetClass::classify(&plan.symbol);
        if sizing.leverage > class.max_leverage() {
            validation.errors.push(format!(
                "Leverage {:.1}x exceeds the {:?} ceiling of {:.0}x",
                sizing.leverage,
                class,
                class.max_leverage()
            ));
        }

        if plan.risk_reward < MIN_COMFORTABLE_RISK_REWARD {
            validation
                .warnings
                .push(format!("Low risk/reward ratio: {:.2}", plan.risk_reward));
        }
        if plan.confidence < MIN_COMFORTABLE_CONFIDENCE {
            validation
                .warnings
                .push(format!("Low confidence: {:.0}", plan.confidence));
        }
        if plan.market_regime.volatility == VolatilityLevel::High {
            validation
                .warnings
                .push("High volatility: consider a smaller position".to_string());
        }

        validation.valid = validation.errors.is_empty();
        validation
    }
}
