//! Market Regime Detection
//!
//! Classifies the latest state of a bar series from its indicators:
//! - Trend strength: how many recent closes stay on the same side of the SMA
//! - Volatility bucket: ATR as percent of price
//! - Direction: price vs SMA combined with the last bar's return
//! - Confidence: additive score from trend, volatility and volume expansion
//!
//! Volatility wins over trend when naming the regime type.

use crate::domain::{MarketRegime, PriceBar, RegimeType, TrendDirection, VolatilityLevel};
use crate::strategy::indicators::TechnicalIndicators;

/// Bars inspected for trend persistence
const TREND_LOOKBACK: usize = 20;
/// Strength above which a non-volatile market counts as trending
const TRENDING_STRENGTH: f64 = 60.0;
/// ATR percent thresholds
const HIGH_VOLATILITY_PCT: f64 = 3.0;
const LOW_VOLATILITY_PCT: f64 = 1.0;
/// Minimum one-bar return (percent) for a directional call
const DIRECTION_RETURN_PCT: f64 = 0.1;

pub fn analyze_market_regime(bars: &[PriceBar], indicators: &TechnicalIndicators) -> MarketRegime {
    let (Some(last), Some(sma)) = (bars.last(), indicators.last_sma()) else {
        return MarketRegime::undetermined();
    };
    let price = last.close;
    if price <= 0.0 {
        return MarketRegime::undetermined();
    }

    let strength = trend_strength(bars, sma);
    let volatility = volatility_level(indicators.last_atr(), price);
    let direction = trend_direction(bars, price, sma);

    let mut confidence: f64 = 50.0;
    if strength > 70.0 {
        confidence += 20.0;
    } else if strength > 50.0 {
        confidence += 10.0;
    }
    match volatility {
        VolatilityLevel::Low => confidence += 15.0,
        VolatilityLevel::High => confidence -= 10.0,
        VolatilityLevel::Medium => {}
    }
    if volume_expanding(bars) {
        confidence += 10.0;
    }

    let regime_type = if volatility == VolatilityLevel::High {
        RegimeType::Volatile
    } else if strength > TRENDING_STRENGTH {
        RegimeType::Trending
    } else {
        RegimeType::Ranging
    };

    MarketRegime {
        regime_type,
        strength,
        direction,
        volatility,
        confidence: confidence.clamp(0.0, 100.0),
    }
}

/// Consecutive latest closes on the same side of `sma` as the last close, as a percentage
fn trend_strength(bars: &[PriceBar], sma: f64) -> f64 {
    let Some(last) = bars.last() else {
        return 0.0;
    };
    let above = last.close > sma;
    let count = bars
        .iter()
        .rev()
        .take(TREND_LOOKBACK)
        .take_while(|b| (b.close > sma) == above)
        .count();
    count as f64 / TREND_LOOKBACK as f64 * 100.0
}

fn volatility_level(atr: Option<f64>, price: f64) -> VolatilityLevel {
    let Some(atr) = atr else {
        return VolatilityLevel::Medium;
    };
    let atr_pct = atr / price * 100.0;
    if atr_pct > HIGH_VOLATILITY_PCT {
        VolatilityLevel::High
    } else if atr_pct < LOW_VOLATILITY_PCT {
        VolatilityLevel::Low
    } else {
        VolatilityLevel::Medium
    }
}

fn trend_direction(bars: &[PriceBar], price: f64, sma: f64) -> TrendDirection {
    let one_bar_return = match bars.len() {
        n if n >= 2 && bars[n - 2].close > 0.0 => (price - bars[n - 2].close) / bars[n - 2].close * 100.0,
        _ => 0.0,
    };
    if price > sma && one_bar_return > DIRECTION_RETURN_PCT {
        TrendDirection::Bullish
    } else if price < sma && one_bar_return < -DIRECTION_RETURN_PCT {
        TrendDirection::Bearish
    } else {
        TrendDirection::Neutral
    }
}

/// Last-5 average volume more than 20% above the bars 20..5 back
fn volume_expanding(bars: &[PriceBar]) -> bool {
    let n = bars.len();
    if n < 20 {
        return false;
    }
    let recent = bars[n - 5..].iter().map(|b| b.volume).sum::<f64>() / 5.0;
    let baseline = bars[n - 20..n - 5].iter().map(|b| b.volume).sum::<f64>() / 15.0;
    baseline > 0.0 && recent > baseline * 1.2
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::indicators::IndicatorPeriods;
    use approx::assert_relative_eq;
    use chrono::{Duration, TimeZone, Utc};

    fn bars(closes: &[f64], spread: f64, volumes: impl Fn(usize) -> f64) -> Vec<PriceBar> {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let open = if i == 0 { *c } else { closes[i - 1] };
                PriceBar::new(
                    start + Duration::hours(i as i64),
                    open,
                    open.max(*c) + spread,
                    open.min(*c) - spread,
                    *c,
                    volumes(i),
                )
            })
            .collect()
    }

    fn regime_for(bars: &[PriceBar]) -> MarketRegime {
        let ind = TechnicalIndicators::compute(bars, &IndicatorPeriods::default()).unwrap();
        analyze_market_regime(bars, &ind)
    }

    #[test]
    fn test_steady_uptrend_is_trending_bullish() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 * 1.003f64.powi(i)).collect();
        let regime = regime_for(&bars(&closes, 0.05, |_| 1_000.0));

        assert_eq!(regime.regime_type, RegimeType::Trending);
        assert_eq!(regime.direction, TrendDirection::Bullish);
        assert_eq!(regime.volatility, VolatilityLevel::Low);
        assert_relative_eq!(regime.strength, 100.0);
        // 50 + 20 (strength) + 15 (low vol)
        assert_relative_eq!(regime.confidence, 85.0);
    }

    #[test]
    fn test_downtrend_is_bearish() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 * 0.997f64.powi(i)).collect();
        let regime = regime_for(&bars(&closes, 0.05, |_| 1_000.0));
        assert_eq!(regime.direction, TrendDirection::Bearish);
        assert!(regime.is_trending());
    }

    #[test]
    fn test_wide_ranges_are_volatile() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 * 1.003f64.powi(i)).collect();
        let regime = regime_for(&bars(&closes, 4.0, |_| 1_000.0));
        assert_eq!(regime.volatility, VolatilityLevel::High);
        assert_eq!(regime.regime_type, RegimeType::Volatile);
    }

    #[test]
    fn test_choppy_market_is_ranging() {
        let closes: Vec<f64> = (0..60).map(|i| if i % 2 == 0 { 100.0 } else { 101.0 }).collect();
        let regime = regime_for(&bars(&closes, 0.2, |_| 1_000.0));
        assert_eq!(regime.regime_type, RegimeType::Ranging);
        assert!(regime.strength <= 10.0);
    }

    #[test]
    fn test_volume_expansion_adds_confidence() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 * 1.003f64.powi(i)).collect();
        let quiet = regime_for(&bars(&closes, 0.05, |_| 1_000.0));
        let loud = regime_for(&bars(&closes, 0.05, |i| if i >= 55 { 2_000.0 } else { 1_000.0 }));
        assert_relative_eq!(loud.confidence - quiet.confidence, 10.0);
    }

    #[test]
    fn test_empty_indicators_are_undetermined() {
        let ind = TechnicalIndicators {
            sma: vec![],
            ema: vec![],
            rsi: vec![],
            atr: vec![],
            bollinger: Default::default(),
            volume: crate::strategy::indicators::analyze_volume(&[], 20),
        };
        assert_eq!(analyze_market_regime(&[], &ind), MarketRegime::undetermined());
    }
}
