//! Strategy Signal Generators
//!
//! Independent rule-based detectors. Each looks at the latest bar, the
//! indicator bundle and the regime and emits at most one entry signal per
//! scan. Generators never vote together; the engine picks one winner.

use chrono::{DateTime, Utc};

use crate::domain::{Direction, MarketRegime, PriceBar, RegimeType, TradingSignal, TrendDirection};
use crate::strategy::indicators::TechnicalIndicators;
use crate::strategy::params::{StrategyConfig, StrategyKind};

/// Bars averaged for the breakout volume check
const VOLUME_LOOKBACK: usize = 20;
const BREAKOUT_VOLUME_MULTIPLIER: f64 = 1.5;
const BREAKOUT_VOLUME_BONUS: f64 = 15.0;
const BREAKOUT_MAX_STRENGTH: f64 = 90.0;

const BOUNCE_OVERSOLD: f64 = 30.0;
const BOUNCE_OVERBOUGHT: f64 = 70.0;
const BOUNCE_BASE_STRENGTH: f64 = 70.0;
const BOUNCE_MAX_STRENGTH: f64 = 85.0;

const MOMENTUM_MIN_STRENGTH: f64 = 60.0;
const MOMENTUM_MAX_PULLBACK: f64 = 0.02;
const MOMENTUM_MAX_STRENGTH: f64 = 80.0;

/// One rule-based entry detector
pub trait SignalGenerator: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Returns a signal when the rule fires; `None` when disabled or quiet
    fn detect(
        &self,
        bars: &[PriceBar],
        indicators: &TechnicalIndicators,
        regime: &MarketRegime,
        config: &StrategyConfig,
    ) -> Option<TradingSignal>;
}

/// Generator for a strategy kind
pub fn generator_for(kind: StrategyKind) -> Box<dyn SignalGenerator> {
    match kind {
        StrategyKind::Breakout => Box::new(TrendBreakout),
        StrategyKind::Bounce => Box::new(SupportResistanceBounce),
        StrategyKind::Momentum => Box::new(MomentumContinuation),
    }
}

fn signal_time(bars: &[PriceBar]) -> DateTime<Utc> {
    bars.last().map(|b| b.timestamp).unwrap_or_else(Utc::now)
}

/// Mean volume of up to `lookback` bars before the latest one
fn trailing_volume_average(bars: &[PriceBar], lookback: usize) -> Option<f64> {
    let n = bars.len();
    if n < 2 {
        return None;
    }
    let window = &bars[n.saturating_sub(lookback + 1)..n - 1];
    Some(window.iter().map(|b| b.volume).sum::<f64>() / window.len() as f64)
}

/// Trend breakout: EMA over SMA with price above SMA on a volume surge
#[derive(Debug, Clone, Copy, Default)]
pub struct TrendBreakout;

impl SignalGenerator for TrendBreakout {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Breakout
    }

    fn detect(
        &self,
        bars: &[PriceBar],
        indicators: &TechnicalIndicators,
        regime: &MarketRegime,
        config: &StrategyConfig,
    ) -> Option<TradingSignal> {
        if !config.enabled || regime.regime_type == RegimeType::Ranging {
            return None;
        }

        let last = bars.last()?;
        let price = last.close;
        let sma = indicators.last_sma()?;
        let ema = indicators.last_ema()?;
        let avg_volume = trailing_volume_average(bars, VOLUME_LOOKBACK)?;

        let volume_confirmed = avg_volume > 0.0 && last.volume > avg_volume * BREAKOUT_VOLUME_MULTIPLIER;
        if !volume_confirmed {
            return None;
        }

        let direction = if ema > sma && price > sma && regime.direction == TrendDirection::Bullish {
            Direction::Long
        } else if ema < sma && price < sma && regime.direction == TrendDirection::Bearish {
            Direction::Short
        } else {
            return None;
        };

        let strength = (regime.strength + BREAKOUT_VOLUME_BONUS).min(BREAKOUT_MAX_STRENGTH);
        let reason = match direction {
            Direction::Long => "Bullish breakout above SMA with volume confirmation",
            Direction::Short => "Bearish breakdown below SMA with volume confirmation",
        };

        Some(
            TradingSignal::entry(direction, strength, price, signal_time(bars), reason)
                .with_indicator("ema", ema)
                .with_indicator("sma", sma)
                .with_indicator("volume_ratio", last.volume / avg_volume),
        )
    }
}

/// Support/resistance bounce: RSI extreme at a Bollinger band
#[derive(Debug, Clone, Copy, Default)]
pub struct SupportResistanceBounce;

impl SignalGenerator for SupportResistanceBounce {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Bounce
    }

    fn detect(
        &self,
        bars: &[PriceBar],
        indicators: &TechnicalIndicators,
        _regime: &MarketRegime,
        config: &StrategyConfig,
    ) -> Option<TradingSignal> {
        if !config.enabled {
            return None;
        }

        let price = bars.last()?.close;
        let rsi = indicators.last_rsi()?;
        let (upper, _, lower) = indicators.bollinger.last()?;

        let (direction, strength, reason) = if rsi < BOUNCE_OVERSOLD && price <= lower * 1.02 {
            (
                Direction::Long,
                BOUNCE_BASE_STRENGTH + (BOUNCE_OVERSOLD - rsi) / 2.0,
                "Oversold bounce off lower band",
            )
        } else if rsi > BOUNCE_OVERBOUGHT && price >= upper * 0.98 {
            (
                Direction::Short,
                BOUNCE_BASE_STRENGTH + (rsi - BOUNCE_OVERBOUGHT) / 2.0,
                "Overbought rejection at upper band",
            )
        } else {
            return None;
        };

        Some(
            TradingSignal::entry(direction, strength.min(BOUNCE_MAX_STRENGTH), price, signal_time(bars), reason)
                .with_indicator("rsi", rsi)
                .with_indicator("bb_upper", upper)
                .with_indicator("bb_lower", lower),
        )
    }
}

/// Momentum continuation: shallow pullback inside an established trend
#[derive(Debug, Clone, Copy, Default)]
pub struct MomentumContinuation;

impl SignalGenerator for MomentumContinuation {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Momentum
    }

    fn detect(
        &self,
        bars: &[PriceBar],
        indicators: &TechnicalIndicators,
        regime: &MarketRegime,
        config: &StrategyConfig,
    ) -> Option<TradingSignal> {
        if !config.enabled || regime.regime_type != RegimeType::Trending || regime.strength < MOMENTUM_MIN_STRENGTH {
            return None;
        }

        let price = bars.last()?.close;
        let sma = indicators.last_sma()?;
        let rsi = indicators.last_rsi()?;
        if sma <= 0.0 {
            return None;
        }
        let distance = (price - sma) / sma;

        let direction = if price > sma
            && regime.direction != TrendDirection::Bearish
            && (40.0..=55.0).contains(&rsi)
            && distance <= MOMENTUM_MAX_PULLBACK
        {
            Direction::Long
        } else if price < sma
            && regime.direction != TrendDirection::Bullish
            && (45.0..=60.0).contains(&rsi)
            && -distance <= MOMENTUM_MAX_PULLBACK
        {
            Direction::Short
        } else {
            return None;
        };

        let strength = (regime.strength * 0.9).min(MOMENTUM_MAX_STRENGTH);
        let reason = match direction {
            Direction::Long => "Pullback in uptrend, momentum continuation",
            Direction::Short => "Relief rally in downtrend, momentum continuation",
        };

        Some(
            TradingSignal::entry(direction, strength, price, signal_time(bars), reason)
                .with_indicator("rsi", rsi)
                .with_indicator("sma", sma)
                .with_indicator("sma_distance_pct", distance * 100.0),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::VolatilityLevel;
    use crate::strategy::indicators::{analyze_volume, BollingerBands, IndicatorPeriods};
    use approx::assert_relative_eq;
    use chrono::{Duration, TimeZone};

    fn series(closes: &[f64], volumes: &[f64]) -> Vec<PriceBar> {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        closes
            .iter()
            .zip(volumes)
            .enumerate()
            .map(|(i, (c, v))| PriceBar::new(start + Duration::hours(i as i64), *c, c + 0.2, c - 0.2, *c, *v))
            .collect()
    }

    fn regime(regime_type: RegimeType, strength: f64, direction: TrendDirection) -> MarketRegime {
        MarketRegime {
            regime_type,
            strength,
            direction,
            volatility: VolatilityLevel::Medium,
            confidence: 70.0,
        }
    }

    /// Hand-built indicator bundle for the last bar only
    fn snapshot(sma: f64, ema: f64, rsi: f64, upper: f64, lower: f64) -> TechnicalIndicators {
        TechnicalIndicators {
            sma: vec![sma],
            ema: vec![ema],
            rsi: vec![rsi],
            atr: vec![1.0],
            bollinger: BollingerBands {
                upper: vec![upper],
                middle: vec![sma],
                lower: vec![lower],
            },
            volume: analyze_volume(&[], 20),
        }
    }

    #[test]
    fn test_breakout_long_on_volume_surge() {
        // 30 rising bars, last bar at double volume
        let closes: Vec<f64> = (0..30).map(|i| 100.0 + i as f64 * 0.5).collect();
        let mut volumes = vec![1_000.0; 30];
        volumes[29] = 2_000.0;
        let bars = series(&closes, &volumes);
        let ind = TechnicalIndicators::compute(&bars, &IndicatorPeriods::default()).unwrap();
        assert!(ind.last_ema().unwrap() > ind.last_sma().unwrap());

        let signal = TrendBreakout
            .detect(&bars, &ind, &regime(RegimeType::Trending, 75.0, TrendDirection::Bullish), &StrategyConfig::breakout())
            .unwrap();
        assert_eq!(signal.direction, Direction::Long);
        assert_relative_eq!(signal.strength, 90.0);
        assert_relative_eq!(signal.indicators["volume_ratio"], 2.0);
    }

    #[test]
    fn test_breakout_needs_volume_and_trend() {
        let closes: Vec<f64> = (0..30).map(|i| 100.0 + i as f64 * 0.5).collect();
        let bars = series(&closes, &vec![1_000.0; 30]);
        let ind = TechnicalIndicators::compute(&bars, &IndicatorPeriods::default()).unwrap();
        let trending = regime(RegimeType::Trending, 75.0, TrendDirection::Bullish);
        assert!(TrendBreakout.detect(&bars, &ind, &trending, &StrategyConfig::breakout()).is_none());

        let mut volumes = vec![1_000.0; 30];
        volumes[29] = 2_000.0;
        let bars = series(&closes, &volumes);
        let ranging = regime(RegimeType::Ranging, 75.0, TrendDirection::Bullish);
        assert!(TrendBreakout.detect(&bars, &ind, &ranging, &StrategyConfig::breakout()).is_none());

        let disabled = StrategyConfig::breakout().disabled();
        assert!(TrendBreakout.detect(&bars, &ind, &trending, &disabled).is_none());
    }

    #[test]
    fn test_breakout_strength_below_cap() {
        let closes: Vec<f64> = (0..30).map(|i| 100.0 - i as f64 * 0.5).collect();
        let mut volumes = vec![1_000.0; 30];
        volumes[29] = 3_000.0;
        let bars = series(&closes, &volumes);
        let ind = TechnicalIndicators::compute(&bars, &IndicatorPeriods::default()).unwrap();
        let signal = TrendBreakout
            .detect(&bars, &ind, &regime(RegimeType::Volatile, 50.0, TrendDirection::Bearish), &StrategyConfig::breakout())
            .unwrap();
        assert_eq!(signal.direction, Direction::Short);
        assert_relative_eq!(signal.strength, 65.0);
    }

    #[test]
    fn test_bounce_oversold_long() {
        let bars = series(&[95.0], &[1_000.0]);
        let ind = snapshot(100.0, 99.0, 20.0, 105.0, 94.0);
        let signal = SupportResistanceBounce
            .detect(&bars, &ind, &MarketRegime::undetermined(), &StrategyConfig::bounce())
            .unwrap();
        assert_eq!(signal.direction, Direction::Long);
        assert_relative_eq!(signal.strength, 75.0);
    }

    #[test]
    fn test_bounce_overbought_short() {
        let bars = series(&[106.0], &[1_000.0]);
        let ind = snapshot(100.0, 101.0, 99.0, 105.0, 95.0);
        let signal = SupportResistanceBounce
            .detect(&bars, &ind, &MarketRegime::undetermined(), &StrategyConfig::bounce())
            .unwrap();
        assert_eq!(signal.direction, Direction::Short);
        assert_relative_eq!(signal.strength, 84.5);
        assert!(signal.strength <= 85.0);
    }

    #[test]
    fn test_bounce_requires_band_touch() {
        let bars = series(&[100.0], &[1_000.0]);
        let ind = snapshot(100.0, 100.0, 20.0, 105.0, 94.0);
        assert!(SupportResistanceBounce
            .detect(&bars, &ind, &MarketRegime::undetermined(), &StrategyConfig::bounce())
            .is_none());
    }

    #[test]
    fn test_momentum_pullback_long() {
        let bars = series(&[101.0], &[1_000.0]);
        let ind = snapshot(100.0, 100.5, 48.0, 104.0, 96.0);
        let signal = MomentumContinuation
            .detect(&bars, &ind, &regime(RegimeType::Trending, 80.0, TrendDirection::Neutral), &StrategyConfig::momentum())
            .unwrap();
        assert_eq!(signal.direction, Direction::Long);
        assert_relative_eq!(signal.strength, 72.0);
    }

    #[test]
    fn test_momentum_rejects_extended_price_and_weak_trend() {
        let bars = series(&[103.0], &[1_000.0]);
        let ind = snapshot(100.0, 101.0, 50.0, 106.0, 96.0);
        let strong = regime(RegimeType::Trending, 80.0, TrendDirection::Bullish);
        assert!(MomentumContinuation.detect(&bars, &ind, &strong, &StrategyConfig::momentum()).is_none());

        let bars = series(&[101.0], &[1_000.0]);
        let weak = regime(RegimeType::Trending, 55.0, TrendDirection::Bullish);
        assert!(MomentumContinuation.detect(&bars, &ind, &weak, &StrategyConfig::momentum()).is_none());
    }

    #[test]
    fn test_momentum_downtrend_short() {
        let bars = series(&[99.0], &[1_000.0]);
        let ind = snapshot(100.0, 99.5, 52.0, 104.0, 96.0);
        let signal = MomentumContinuation
            .detect(&bars, &ind, &regime(RegimeType::Trending, 100.0, TrendDirection::Bearish), &StrategyConfig::momentum())
            .unwrap();
        assert_eq!(signal.direction, Direction::Short);
        assert_relative_eq!(signal.strength, 80.0);
    }

    #[test]
    fn test_generator_registry() {
        for kind in [StrategyKind::Breakout, StrategyKind::Bounce, StrategyKind::Momentum] {
            assert_eq!(generator_for(kind).kind(), kind);
        }
    }
}
