//! Technical Analysis Library
//!
//! Stateless indicator functions over price and bar series. Trimmed outputs
//! carry no warm-up padding: index 0 of an SMA-style series corresponds to the
//! first full window. EMA is the exception and keeps the input length.
//!
//! Formulas are deliberately simple (population standard deviation, SMA
//! smoothed ATR) and are not meant to match charting packages bar for bar.

use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use thiserror::Error;

use crate::domain::PriceBar;

/// Small positive stand-in for a zero average loss in RSI
const RSI_EPSILON: f64 = 1e-10;

/// Number of trailing volume ratios that decide the volume trend
const VOLUME_TREND_WINDOW: usize = 5;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum IndicatorError {
    #[error("Insufficient data: need {required} bars, have {available}")]
    InsufficientData { required: usize, available: usize },
    #[error("Invalid period: {0}")]
    InvalidPeriod(usize),
}

/// Simple moving average. Output length is `len - period + 1`, empty when the
/// input is shorter than the period.
pub fn sma(prices: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || prices.len() < period {
        return Vec::new();
    }
    prices
        .windows(period)
        .map(|w| w.iter().sum::<f64>() / period as f64)
        .collect()
}

/// Exponential moving average seeded with the first price. Same length as the input.
pub fn ema(prices: &[f64], period: usize) -> Vec<f64> {
    let Some(&seed) = prices.first() else {
        return Vec::new();
    };
    let k = 2.0 / (period as f64 + 1.0);
    let mut out = Vec::with_capacity(prices.len());
    let mut current = seed;
    out.push(current);
    for price in &prices[1..] {
        current = price * k + current * (1.0 - k);
        out.push(current);
    }
    out
}

/// Relative strength index with Wilder smoothing. Output length is `len - period`.
pub fn rsi(prices: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || prices.len() <= period {
        return Vec::new();
    }

    let changes: Vec<f64> = prices.windows(2).map(|w| w[1] - w[0]).collect();
    let p = period as f64;

    let mut avg_gain = changes[..period].iter().map(|c| c.max(0.0)).sum::<f64>() / p;
    let mut avg_loss = changes[..period].iter().map(|c| (-c).max(0.0)).sum::<f64>() / p;

    let mut out = Vec::with_capacity(prices.len() - period);
    out.push(rsi_value(avg_gain, avg_loss));

    for change in &changes[period..] {
        avg_gain = (avg_gain * (p - 1.0) + change.max(0.0)) / p;
        avg_loss = (avg_loss * (p - 1.0) + (-change).max(0.0)) / p;
        out.push(rsi_value(avg_gain, avg_loss));
    }
    out
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    let loss = if avg_loss == 0.0 { RSI_EPSILON } else { avg_loss };
    let rs = avg_gain / loss;
    (100.0 - 100.0 / (1.0 + rs)).clamp(0.0, 100.0)
}

/// True range per consecutive bar pair
pub fn true_ranges(bars: &[PriceBar]) -> Vec<f64> {
    bars.windows(2)
        .map(|w| {
            let prev_close = w[0].close;
            let bar = &w[1];
            (bar.high - bar.low)
                .max((bar.high - prev_close).abs())
                .max((bar.low - prev_close).abs())
        })
        .collect()
}

/// Average true range: SMA of the true range. Output length is `len - period`.
pub fn atr(bars: &[PriceBar], period: usize) -> Vec<f64> {
    sma(&true_ranges(bars), period)
}

/// Bollinger band series, all three the same length as the SMA
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BollingerBands {
    pub upper: Vec<f64>,
    pub middle: Vec<f64>,
    pub lower: Vec<f64>,
}

impl BollingerBands {
    pub fn last(&self) -> Option<(f64, f64, f64)> {
        Some((*self.upper.last()?, *self.middle.last()?, *self.lower.last()?))
    }
}

/// Middle = SMA, bands at `std_dev` population standard deviations
pub fn bollinger_bands(prices: &[f64], period: usize, std_dev: f64) -> BollingerBands {
    if period == 0 || prices.len() < period {
        return BollingerBands::default();
    }

    let mut bands = BollingerBands::default();
    for window in prices.windows(period) {
        let mean = window.iter().mean();
        let sigma = window.iter().population_std_dev();
        bands.middle.push(mean);
        bands.upper.push(mean + std_dev * sigma);
        bands.lower.push(mean - std_dev * sigma);
    }
    bands
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeTrend {
    Increasing,
    Decreasing,
    Stable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeAnalysis {
    /// Trailing average volume (SMA)
    pub average: Vec<f64>,
    /// Volume of the window's last bar over the window average
    pub ratios: Vec<f64>,
    pub trend: VolumeTrend,
}

impl VolumeAnalysis {
    pub fn last_ratio(&self) -> Option<f64> {
        self.ratios.last().copied()
    }
}

pub fn analyze_volume(volumes: &[f64], period: usize) -> VolumeAnalysis {
    let average = sma(volumes, period);
    let ratios: Vec<f64> = average
        .iter()
        .enumerate()
        .map(|(j, avg)| if *avg > 0.0 { volumes[j + period - 1] / avg } else { 1.0 })
        .collect();

    let recent = &ratios[ratios.len().saturating_sub(VOLUME_TREND_WINDOW)..];
    let trend = if recent.is_empty() {
        VolumeTrend::Stable
    } else {
        let mean = recent.iter().sum::<f64>() / recent.len() as f64;
        if mean > 1.2 {
            VolumeTrend::Increasing
        } else if mean < 0.8 {
            VolumeTrend::Decreasing
        } else {
            VolumeTrend::Stable
        }
    };

    VolumeAnalysis { average, ratios, trend }
}

/// Lookback periods for [`TechnicalIndicators::compute`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorPeriods {
    pub sma: usize,
    pub ema: usize,
    pub rsi: usize,
    pub atr: usize,
    pub bollinger: usize,
    pub bollinger_std_dev: f64,
    pub volume: usize,
}

impl Default for IndicatorPeriods {
    fn default() -> Self {
        Self {
            sma: 20,
            ema: 12,
            rsi: 14,
            atr: 14,
            bollinger: 20,
            bollinger_std_dev: 2.0,
            volume: 20,
        }
    }
}

impl IndicatorPeriods {
    /// Bars needed before every series has at least one value
    pub fn required_bars(&self) -> usize {
        self.sma
            .max(self.bollinger)
            .max(self.volume)
            .max(self.rsi + 1)
            .max(self.atr + 1)
    }

    pub fn validate(&self) -> Result<(), IndicatorError> {
        for period in [self.sma, self.ema, self.rsi, self.atr, self.bollinger, self.volume] {
            if period == 0 {
                return Err(IndicatorError::InvalidPeriod(period));
            }
        }
        Ok(())
    }
}

/// Indicator bundle over one bar series. Computed on demand, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TechnicalIndicators {
    pub sma: Vec<f64>,
    pub ema: Vec<f64>,
    pub rsi: Vec<f64>,
    pub atr: Vec<f64>,
    pub bollinger: BollingerBands,
    pub volume: VolumeAnalysis,
}

impl TechnicalIndicators {
    pub fn compute(bars: &[PriceBar], periods: &IndicatorPeriods) -> Result<Self, IndicatorError> {
        periods.validate()?;
        let required = periods.required_bars();
        if bars.len() < required {
            return Err(IndicatorError::InsufficientData {
                required,
                available: bars.len(),
            });
        }

        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let volumes: Vec<f64> = bars.iter().map(|b| b.volume).collect();

        Ok(Self {
            sma: sma(&closes, periods.sma),
            ema: ema(&closes, periods.ema),
            rsi: rsi(&closes, periods.rsi),
            atr: atr(bars, periods.atr),
            bollinger: bollinger_bands(&closes, periods.bollinger, periods.bollinger_std_dev),
            volume: analyze_volume(&volumes, periods.volume),
        })
    }

    pub fn last_sma(&self) -> Option<f64> {
        self.sma.last().copied()
    }

    pub fn last_ema(&self) -> Option<f64> {
        self.ema.last().copied()
    }

    pub fn last_rsi(&self) -> Option<f64> {
        self.rsi.last().copied()
    }

    pub fn last_atr(&self) -> Option<f64> {
        self.atr.last().copied()
    }
}
