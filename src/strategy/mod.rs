//! Strategy Layer - Indicators, regime detection and plan generation
//!
//! Turns a rolling bar series into a sized trading plan:
//! - Technical indicators (SMA, EMA, RSI, ATR, Bollinger Bands, volume ratios)
//! - Market regime classification (trending / ranging / volatile)
//! - Rule-based signal generators (breakout, bounce, momentum)
//! - Fixed-fractional position sizing with an ATR stop floor
//! - The strategy engine that picks one winning signal per scan

pub mod bar_series;
pub mod engine;
pub mod indicators;
pub mod params;
pub mod regime_detector;
pub mod signals;
pub mod sizing;

pub use bar_series::BarSeries;
pub use engine::{CandidateSignal, EngineSettings, StrategyEngine, StrategyError};
pub use indicators::{
    analyze_volume, atr, bollinger_bands, ema, rsi, sma, BollingerBands, IndicatorError, IndicatorPeriods,
    TechnicalIndicators, VolumeAnalysis, VolumeTrend,
};
pub use params::{ConfigError, SizingConfig, StrategyConfig, StrategyKind, StrategySet};
pub use regime_detector::analyze_market_regime;
pub use signals::{generator_for, MomentumContinuation, SignalGenerator, SupportResistanceBounce, TrendBreakout};
pub use sizing::{calculate_position_size, calculate_stop_loss_and_take_profit, effective_percents, stop_loss_distance};
