//! Opportunity Radar
//!
//! Continuous scanner with two drivers: a periodic poll of every tracked
//! symbol and a push subscription per symbol. Both paths funnel into
//! [`OpportunityRadar::on_ticker`], which updates that symbol's snapshot under
//! its own mutex and drops ticks older than the snapshot's last bar.
//!
//! Alerts pass a fixed gate before they are emitted: confidence floor, no
//! active alert for the same (symbol, type), hourly cap, per-symbol cooldown.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::{
    AlertPriority, AlertType, MarketRegime, OpportunityAlert, PriceBar, PriceTicker, Timeframe,
};
use crate::ports::{
    HistoryQuery, MarketDataError, Notification, NotificationLevel, NotificationSink, PriceFeed,
    PriceHistoryProvider,
};
use crate::strategy::{
    analyze_market_regime, generator_for, BarSeries, IndicatorPeriods, StrategyConfig, TechnicalIndicators,
};

const VOLUME_SPIKE_RATIO: f64 = 3.0;
const VOLUME_SPIKE_MIN_CHANGE: f64 = 2.0;
const VOLUME_SPIKE_MAX_CONFIDENCE: f64 = 95.0;

#[derive(Debug, Error)]
pub enum RadarError {
    #[error("Market data error: {0}")]
    MarketData(#[from] MarketDataError),
    #[error("Invalid radar config: {0}")]
    InvalidConfig(String),
}

/// Daily HH:MM window (UTC) outside of which the radar stays idle.
/// `start > end` wraps over midnight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradingHours {
    pub start: String,
    pub end: String,
}

impl TradingHours {
    pub fn new(start: &str, end: &str) -> Self {
        Self {
            start: start.to_string(),
            end: end.to_string(),
        }
    }

    fn bounds(&self) -> Result<(NaiveTime, NaiveTime), RadarError> {
        let parse = |s: &str| {
            NaiveTime::parse_from_str(s, "%H:%M")
                .map_err(|_| RadarError::InvalidConfig(format!("trading hours must be HH:MM, got '{}'", s)))
        };
        Ok((parse(&self.start)?, parse(&self.end)?))
    }

    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        let Ok((start, end)) = self.bounds() else {
            return true;
        };
        let t = now.time();
        if start <= end {
            t >= start && t < end
        } else {
            t >= start || t < end
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadarConfig {
    pub symbols: Vec<String>,
    pub timeframe: Timeframe,
    pub scan_interval_secs: u64,
    pub min_confidence: f64,
    pub max_alerts_per_hour: usize,
    pub cooldown_minutes: i64,
    /// Bars kept per symbol snapshot
    pub history_length: usize,
    /// Emitted alerts remembered for reporting
    pub alert_history_cap: usize,
    pub trading_hours: Option<TradingHours>,
}

impl Default for RadarConfig {
    fn default() -> Self {
        Self {
            symbols: vec!["BTC".to_string(), "ETH".to_string(), "SOL".to_string()],
            timeframe: Timeframe::M15,
            scan_interval_secs: 300,
            min_confidence: 70.0,
            max_alerts_per_hour: 10,
            cooldown_minutes: 15,
            history_length: 100,
            alert_history_cap: 200,
            trading_hours: None,
        }
    }
}

impl RadarConfig {
    pub fn validate(&self) -> Result<(), RadarError> {
        if self.scan_interval_secs == 0 {
            return Err(RadarError::InvalidConfig("scan_interval_secs must be positive".to_string()));
        }
        if !(0.0..=100.0).contains(&self.min_confidence) {
            return Err(RadarError::InvalidConfig(format!(
                "min_confidence must be within 0-100, got {}",
                self.min_confidence
            )));
        }
        if self.max_alerts_per_hour == 0 {
            return Err(RadarError::InvalidConfig("max_alerts_per_hour must be at least 1".to_string()));
        }
        if self.cooldown_minutes < 0 {
            return Err(RadarError::InvalidConfig("cooldown_minutes cannot be negative".to_string()));
        }
        if self.history_length < 2 {
            return Err(RadarError::InvalidConfig("history_length must be at least 2".to_string()));
        }
        if let Some(hours) = &self.trading_hours {
            hours.bounds()?;
        }
        Ok(())
    }

    fn cooldown(&self) -> Duration {
        Duration::minutes(self.cooldown_minutes)
    }
}

/// Latest view of one symbol
#[derive(Debug, Clone)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub series: BarSeries,
    pub indicators: Option<TechnicalIndicators>,
    pub regime: MarketRegime,
    pub last_ticker: Option<PriceTicker>,
    pub updated_at: Option<DateTime<Utc>>,
    seeded: bool,
}

impl MarketSnapshot {
    fn new(symbol: &str, timeframe: Timeframe, max_len: usize) -> Self {
        Self {
            symbol: symbol.to_string(),
            series: BarSeries::new(timeframe, max_len),
            indicators: None,
            regime: MarketRegime::undetermined(),
            last_ticker: None,
            updated_at: None,
            seeded: false,
        }
    }

    fn refresh(&mut self, periods: &IndicatorPeriods) {
        match TechnicalIndicators::compute(self.series.bars(), periods) {
            Ok(indicators) => {
                self.regime = analyze_market_regime(self.series.bars(), &indicators);
                self.indicators = Some(indicators);
            }
            Err(e) => {
                debug!(symbol = %self.symbol, error = %e, "Snapshot not ready for indicators");
                self.indicators = None;
                self.regime = MarketRegime::undetermined();
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Suppression {
    BelowConfidence,
    Duplicate,
    HourlyCap,
    Cooldown,
}

#[derive(Debug, Default)]
struct AlertBook {
    active: Vec<OpportunityAlert>,
    history: VecDeque<OpportunityAlert>,
    sent: VecDeque<DateTime<Utc>>,
    last_alert: HashMap<String, DateTime<Utc>>,
}

impl AlertBook {
    fn purge_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.active.len();
        self.active.retain(|a| !a.is_expired(now));
        before - self.active.len()
    }

    fn admit(&mut self, alert: &OpportunityAlert, now: DateTime<Utc>, config: &RadarConfig) -> Result<(), Suppression> {
        if alert.confidence < config.min_confidence {
            return Err(Suppression::BelowConfidence);
        }

        self.purge_expired(now);
        if self
            .active
            .iter()
            .any(|a| a.symbol == alert.symbol && a.alert_type == alert.alert_type)
        {
            return Err(Suppression::Duplicate);
        }

        let hour_ago = now - Duration::hours(1);
        while self.sent.front().map_or(false, |t| *t <= hour_ago) {
            self.sent.pop_front();
        }
        if self.sent.len() >= config.max_alerts_per_hour {
            return Err(Suppression::HourlyCap);
        }

        if let Some(last) = self.last_alert.get(&alert.symbol) {
            if now - *last < config.cooldown() {
                return Err(Suppression::Cooldown);
            }
        }

        self.active.push(alert.clone());
        self.history.push_front(alert.clone());
        self.history.truncate(config.alert_history_cap);
        self.sent.push_back(now);
        self.last_alert.insert(alert.symbol.clone(), now);
        Ok(())
    }
}

/// Volume/news spike: heavy volume with a meaningful daily move
pub fn detect_volume_spike(
    symbol: &str,
    volume_ratio: f64,
    change_24h: f64,
    now: DateTime<Utc>,
) -> Option<OpportunityAlert> {
    if volume_ratio <= VOLUME_SPIKE_RATIO || change_24h.abs() <= VOLUME_SPIKE_MIN_CHANGE {
        return None;
    }
    let confidence = (60.0 + (volume_ratio - VOLUME_SPIKE_RATIO) * 10.0 + change_24h.abs() * 2.0)
        .min(VOLUME_SPIKE_MAX_CONFIDENCE);
    let mut details = HashMap::new();
    details.insert("volume_ratio".to_string(), volume_ratio);
    details.insert("change_24h".to_string(), change_24h);
    Some(
        OpportunityAlert::new(
            symbol,
            AlertType::VolumeSpike,
            confidence,
            format!(
                "{} volume at {:.1}x average with a {:+.2}% daily move",
                symbol, volume_ratio, change_24h
            ),
            now,
        )
        .with_details(details),
    )
}

fn notification_for(alert: &OpportunityAlert) -> Notification {
    let level = match alert.priority {
        AlertPriority::Critical => NotificationLevel::Critical,
        AlertPriority::High => NotificationLevel::Warning,
        AlertPriority::Medium | AlertPriority::Low => NotificationLevel::Info,
    };
    Notification::new(
        level,
        format!("{} {:?} opportunity", alert.symbol, alert.alert_type),
        alert.message.clone(),
    )
}

pub struct OpportunityRadar {
    feed: Arc<dyn PriceFeed>,
    history: Arc<dyn PriceHistoryProvider>,
    notifier: Arc<dyn NotificationSink>,
    config: RadarConfig,
    periods: IndicatorPeriods,
    /// Pattern detectors run with an open gate; the radar applies its own floor
    detectors: Vec<(AlertType, StrategyConfig)>,
    tracked: RwLock<Vec<String>>,
    snapshots: RwLock<HashMap<String, Arc<Mutex<MarketSnapshot>>>>,
    book: Mutex<AlertBook>,
    subscriptions: Mutex<HashMap<String, JoinHandle<()>>>,
    is_running: Arc<RwLock<bool>>,
}

impl OpportunityRadar {
    pub fn new(
        feed: Arc<dyn PriceFeed>,
        history: Arc<dyn PriceHistoryProvider>,
        notifier: Arc<dyn NotificationSink>,
        config: RadarConfig,
        periods: IndicatorPeriods,
    ) -> Result<Self, RadarError> {
        config.validate()?;
        periods
            .validate()
            .map_err(|e| RadarError::InvalidConfig(e.to_string()))?;

        let detectors = vec![
            (AlertType::Breakout, StrategyConfig::breakout().with_min_confidence(0.0)),
            (AlertType::Reversal, StrategyConfig::bounce().with_min_confidence(0.0)),
            (AlertType::Momentum, StrategyConfig::momentum().with_min_confidence(0.0)),
        ];
        let tracked = config.symbols.iter().map(|s| s.to_uppercase()).collect();

        Ok(Self {
            feed,
            history,
            notifier,
            config,
            periods,
            detectors,
            tracked: RwLock::new(tracked),
            snapshots: RwLock::new(HashMap::new()),
            book: Mutex::new(AlertBook::default()),
            subscriptions: Mutex::new(HashMap::new()),
            is_running: Arc::new(RwLock::new(false)),
        })
    }

    pub fn config(&self) -> &RadarConfig {
        &self.config
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    pub async fn tracked_symbols(&self) -> Vec<String> {
        self.tracked.read().await.clone()
    }

    /// Run the scan loop until [`stop`](Self::stop) is called
    pub async fn run(self: Arc<Self>) {
        *self.is_running.write().await = true;
        let symbols = self.tracked_symbols().await;
        info!(
            symbols = ?symbols,
            interval_secs = self.config.scan_interval_secs,
            "Opportunity radar started"
        );

        for symbol in symbols {
            Arc::clone(&self).subscribe(&symbol).await;
        }

        let mut interval = tokio::time::interval(StdDuration::from_secs(self.config.scan_interval_secs));
        loop {
            interval.tick().await;
            if !*self.is_running.read().await {
                break;
            }
            let emitted = self.scan(Utc::now()).await;
            debug!(alerts = emitted.len(), "Radar scan finished");
        }

        info!("Opportunity radar stopped");
    }

    pub async fn stop(&self) {
        *self.is_running.write().await = false;
        let mut subs = self.subscriptions.lock().await;
        for (_, handle) in subs.drain() {
            handle.abort();
        }
        info!("Stop signal sent to opportunity radar");
    }

    /// Add a symbol; subscribes immediately when the radar is running
    pub async fn track_symbol(self: Arc<Self>, symbol: &str) {
        let symbol = symbol.to_uppercase();
        {
            let mut tracked = self.tracked.write().await;
            if tracked.contains(&symbol) {
                return;
            }
            tracked.push(symbol.clone());
        }
        info!(symbol = %symbol, "Tracking symbol");
        if self.is_running().await {
            self.subscribe(&symbol).await;
        }
    }

    pub async fn untrack_symbol(&self, symbol: &str) {
        let symbol = symbol.to_uppercase();
        self.tracked.write().await.retain(|s| *s != symbol);
        if let Some(handle) = self.subscriptions.lock().await.remove(&symbol) {
            handle.abort();
        }
        self.snapshots.write().await.remove(&symbol);
        info!(symbol = %symbol, "Stopped tracking symbol");
    }

    async fn subscribe(self: Arc<Self>, symbol: &str) {
        let mut rx = match self.feed.subscribe(symbol).await {
            Ok(rx) => rx,
            Err(e) => {
                warn!(symbol, error = %e, "Price subscription failed, relying on periodic scans");
                return;
            }
        };
        let radar = Arc::clone(&self);
        let handle = tokio::spawn(async move {
            while let Some(ticker) = rx.recv().await {
                let now = ticker.timestamp;
                radar.on_ticker(ticker, now).await;
            }
        });
        if let Some(previous) = self.subscriptions.lock().await.insert(symbol.to_string(), handle) {
            previous.abort();
        }
    }

    /// Poll every tracked symbol once. A failing symbol is logged and skipped.
    pub async fn scan(&self, now: DateTime<Utc>) -> Vec<OpportunityAlert> {
        if !self.within_trading_hours(now) {
            debug!("Outside trading hours, scan skipped");
            return Vec::new();
        }

        let mut emitted = Vec::new();
        for symbol in self.tracked_symbols().await {
            match self.feed.get_price(&symbol).await {
                Ok(ticker) => emitted.extend(self.on_ticker(ticker, now).await),
                Err(e) => warn!(symbol = %symbol, error = %e, "Price fetch failed during scan"),
            }
        }
        emitted
    }

    pub fn within_trading_hours(&self, now: DateTime<Utc>) -> bool {
        self.config.trading_hours.as_ref().map_or(true, |h| h.contains(now))
    }

    /// Feed one price update through snapshot, detectors and the alert gate
    pub async fn on_ticker(&self, ticker: PriceTicker, now: DateTime<Utc>) -> Vec<OpportunityAlert> {
        if !self.within_trading_hours(now) {
            return Vec::new();
        }

        let symbol = ticker.symbol.to_uppercase();
        let Some((bars, indicators, regime)) = self.update_snapshot(&symbol, &ticker).await else {
            return Vec::new();
        };

        let candidates = self.detect(&symbol, &bars, &indicators, &regime, &ticker, now);
        let mut emitted = Vec::new();
        {
            let mut book = self.book.lock().await;
            for alert in candidates {
                match book.admit(&alert, now, &self.config) {
                    Ok(()) => emitted.push(alert),
                    Err(reason) => debug!(
                        symbol = %symbol,
                        alert_type = ?alert.alert_type,
                        ?reason,
                        "Alert suppressed"
                    ),
                }
            }
        }

        for alert in &emitted {
            info!(
                symbol = %alert.symbol,
                alert_type = ?alert.alert_type,
                confidence = alert.confidence,
                "Opportunity alert"
            );
            self.notifier.notify(notification_for(alert));
        }
        emitted
    }

    async fn update_snapshot(
        &self,
        symbol: &str,
        ticker: &PriceTicker,
    ) -> Option<(Vec<PriceBar>, TechnicalIndicators, MarketRegime)> {
        let slot = {
            let mut snapshots = self.snapshots.write().await;
            Arc::clone(snapshots.entry(symbol.to_string()).or_insert_with(|| {
                Arc::new(Mutex::new(MarketSnapshot::new(
                    symbol,
                    self.config.timeframe,
                    self.config.history_length,
                )))
            }))
        };

        let mut snapshot = slot.lock().await;
        if !snapshot.seeded {
            let query = HistoryQuery::new(symbol, self.config.timeframe, self.config.history_length)
                .anchored_at(ticker.price);
            match self.history.fetch_history(query).await {
                Ok(bars) => {
                    snapshot.series = BarSeries::new(self.config.timeframe, self.config.history_length).with_history(bars);
                }
                Err(e) => warn!(symbol, error = %e, "History unavailable, building snapshot from ticks"),
            }
            snapshot.seeded = true;
        }

        if !snapshot.series.apply_ticker(ticker) {
            debug!(symbol, ts = %ticker.timestamp, "Stale tick dropped");
            return None;
        }
        snapshot.last_ticker = Some(ticker.clone());
        snapshot.updated_at = Some(ticker.timestamp);
        snapshot.refresh(&self.periods);

        let indicators = snapshot.indicators.clone()?;
        Some((snapshot.series.bars().to_vec(), indicators, snapshot.regime))
    }

    fn detect(
        &self,
        symbol: &str,
        bars: &[PriceBar],
        indicators: &TechnicalIndicators,
        regime: &MarketRegime,
        ticker: &PriceTicker,
        now: DateTime<Utc>,
    ) -> Vec<OpportunityAlert> {
        let mut alerts: Vec<OpportunityAlert> = self
            .detectors
            .iter()
            .filter_map(|(alert_type, config)| {
                let signal = generator_for(config.kind).detect(bars, indicators, regime, config)?;
                let message = format!("{} {:?}: {}", symbol, signal.direction, signal.reason);
                let details = signal.indicators.clone();
                Some(
                    OpportunityAlert::new(symbol, *alert_type, signal.strength, message, now).with_details(details),
                )
            })
            .collect();

        if let Some(ratio) = indicators.volume.last_ratio() {
            alerts.extend(detect_volume_spike(symbol, ratio, ticker.change_24h, now));
        }
        alerts
    }

    pub async fn snapshot(&self, symbol: &str) -> Option<MarketSnapshot> {
        let slot = self.snapshots.read().await.get(&symbol.to_uppercase()).cloned()?;
        let snapshot = slot.lock().await;
        Some(snapshot.clone())
    }

    pub async fn active_alerts(&self) -> Vec<OpportunityAlert> {
        self.book.lock().await.active.clone()
    }

    pub async fn alert_history(&self) -> Vec<OpportunityAlert> {
        self.book.lock().await.history.iter().cloned().collect()
    }

    pub async fn dismiss_alert(&self, id: &str) -> bool {
        let mut book = self.book.lock().await;
        let before = book.active.len();
        book.active.retain(|a| a.id != id);
        before != book.active.len()
    }

    pub async fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        self.book.lock().await.purge_expired(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::mocks::{RecordingNotifier, ScriptedPriceFeed, StaticHistory};
    use crate::ports::MockNotificationSink;
    use chrono::TimeZone;

    fn uptrend_with_surge(n: usize) -> Vec<PriceBar> {
        let start = Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap();
        (0..n)
            .map(|i| {
                let close = 100.0 * 1.004f64.powi(i as i32);
                let open = if i == 0 { close } else { 100.0 * 1.004f64.powi(i as i32 - 1) };
                let volume = if i == n - 1 { 3_000.0 } else { 1_000.0 };
                PriceBar::new(start + Duration::hours(i as i64), open, close + 0.05, open - 0.05, close, volume)
            })
            .collect()
    }

    fn config() -> RadarConfig {
        RadarConfig {
            symbols: vec!["ETH".to_string()],
            timeframe: Timeframe::H1,
            ..RadarConfig::default()
        }
    }

    fn radar_with(config: RadarConfig, notifier: Arc<dyn NotificationSink>) -> (OpportunityRadar, Vec<PriceBar>) {
        let bars = uptrend_with_surge(60);
        let history = StaticHistory::new().with_series("ETH", bars.clone());
        let radar = OpportunityRadar::new(
            Arc::new(ScriptedPriceFeed::new()),
            Arc::new(history),
            notifier,
            config,
            IndicatorPeriods::default(),
        )
        .unwrap();
        (radar, bars)
    }

    fn surge_tick(bars: &[PriceBar], offset: Duration) -> PriceTicker {
        let last = bars.last().unwrap();
        PriceTicker::flat("ETH", last.close, last.volume, last.timestamp + offset)
    }

    #[tokio::test]
    async fn test_breakout_alert_emitted_and_notified() {
        let notifier = Arc::new(RecordingNotifier::new());
        let (radar, bars) = radar_with(config(), notifier.clone());
        let tick = surge_tick(&bars, Duration::zero());

        let alerts = radar.on_ticker(tick.clone(), tick.timestamp).await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_type, AlertType::Breakout);
        assert!(alerts[0].confidence >= 70.0);
        assert_eq!(notifier.received().len(), 1);
        assert_eq!(radar.active_alerts().await.len(), 1);

        let snapshot = radar.snapshot("eth").await.unwrap();
        assert_eq!(snapshot.series.len(), 60);
        assert!(snapshot.indicators.is_some());
    }

    #[tokio::test]
    async fn test_cooldown_blocks_second_alert_within_window() {
        let (radar, bars) = radar_with(config(), Arc::new(RecordingNotifier::new()));
        let first = surge_tick(&bars, Duration::zero());
        assert_eq!(radar.on_ticker(first.clone(), first.timestamp).await.len(), 1);

        let second = surge_tick(&bars, Duration::minutes(5));
        assert!(radar.on_ticker(second.clone(), second.timestamp).await.is_empty());
        assert_eq!(radar.alert_history().await.len(), 1);
    }

    #[tokio::test]
    async fn test_cooldown_applies_after_dismissal() {
        let (radar, bars) = radar_with(config(), Arc::new(RecordingNotifier::new()));
        let first = surge_tick(&bars, Duration::zero());
        let alert = radar.on_ticker(first.clone(), first.timestamp).await.remove(0);
        assert!(radar.dismiss_alert(&alert.id).await);
        assert!(!radar.dismiss_alert(&alert.id).await);

        let inside = surge_tick(&bars, Duration::minutes(5));
        assert!(radar.on_ticker(inside.clone(), inside.timestamp).await.is_empty());

        let after = surge_tick(&bars, Duration::minutes(16));
        assert_eq!(radar.on_ticker(after.clone(), after.timestamp).await.len(), 1);
    }

    #[tokio::test]
    async fn test_stale_tick_dropped() {
        let (radar, bars) = radar_with(config(), Arc::new(RecordingNotifier::new()));
        let tick = surge_tick(&bars, Duration::zero());
        radar.on_ticker(tick.clone(), tick.timestamp).await;

        let stale = surge_tick(&bars, -Duration::hours(3));
        assert!(radar.on_ticker(stale, tick.timestamp).await.is_empty());
        let snapshot = radar.snapshot("ETH").await.unwrap();
        assert_eq!(snapshot.updated_at, Some(tick.timestamp));
    }

    #[tokio::test]
    async fn test_trading_hours_suppress_everything() {
        let mut cfg = config();
        cfg.trading_hours = Some(TradingHours::new("09:30", "16:00"));
        let mut notifier = MockNotificationSink::new();
        notifier.expect_notify().times(0).return_const(());
        let (radar, bars) = radar_with(cfg, Arc::new(notifier));

        // last bar sits at 11:00 UTC, inside the window
        let inside = surge_tick(&bars, Duration::zero());
        assert!(radar.within_trading_hours(inside.timestamp));
        let night = Utc.with_ymd_and_hms(2024, 7, 3, 2, 0, 0).unwrap();
        assert!(radar.on_ticker(inside, night).await.is_empty());
        assert!(radar.snapshot("ETH").await.is_none());
    }

    #[test]
    fn test_overnight_trading_hours() {
        let hours = TradingHours::new("22:00", "04:00");
        assert!(hours.contains(Utc.with_ymd_and_hms(2024, 1, 1, 23, 0, 0).unwrap()));
        assert!(hours.contains(Utc.with_ymd_and_hms(2024, 1, 1, 3, 59, 0).unwrap()));
        assert!(!hours.contains(Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()));
    }

    #[test]
    fn test_volume_spike_detector() {
        let now = Utc::now();
        assert!(detect_volume_spike("SOL", 2.5, 5.0, now).is_none());
        assert!(detect_volume_spike("SOL", 4.0, 1.0, now).is_none());

        let alert = detect_volume_spike("SOL", 4.0, -3.0, now).unwrap();
        assert_eq!(alert.alert_type, AlertType::VolumeSpike);
        assert!((alert.confidence - 76.0).abs() < 1e-9);
        assert_eq!(alert.expires_at - now, Duration::minutes(30));

        let capped = detect_volume_spike("SOL", 10.0, 20.0, now).unwrap();
        assert_eq!(capped.confidence, 95.0);
    }

    #[test]
    fn test_alert_book_gates() {
        let cfg = RadarConfig {
            max_alerts_per_hour: 2,
            cooldown_minutes: 0,
            ..RadarConfig::default()
        };
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let alert = |symbol: &str, t: AlertType, conf: f64| OpportunityAlert::new(symbol, t, conf, String::new(), now);
        let mut book = AlertBook::default();

        assert_eq!(book.admit(&alert("BTC", AlertType::Breakout, 50.0), now, &cfg), Err(Suppression::BelowConfidence));
        assert!(book.admit(&alert("BTC", AlertType::Breakout, 80.0), now, &cfg).is_ok());
        assert_eq!(book.admit(&alert("BTC", AlertType::Breakout, 90.0), now, &cfg), Err(Suppression::Duplicate));
        assert!(book.admit(&alert("ETH", AlertType::Momentum, 80.0), now, &cfg).is_ok());
        assert_eq!(book.admit(&alert("SOL", AlertType::Momentum, 80.0), now, &cfg), Err(Suppression::HourlyCap));

        // an hour later the cap window has rolled over and the breakout expired
        let later = now + Duration::hours(2) + Duration::minutes(1);
        let fresh = OpportunityAlert::new("BTC", AlertType::Breakout, 80.0, String::new(), later);
        assert!(book.admit(&fresh, later, &cfg).is_ok());
        assert_eq!(book.active.iter().filter(|a| a.symbol == "BTC").count(), 1);
    }

    #[test]
    fn test_purge_removes_only_expired() {
        let now = Utc::now();
        let mut book = AlertBook::default();
        book.active.push(OpportunityAlert::new("BTC", AlertType::VolumeSpike, 80.0, String::new(), now));
        book.active.push(OpportunityAlert::new("ETH", AlertType::Momentum, 80.0, String::new(), now));
        assert_eq!(book.purge_expired(now + Duration::minutes(31)), 1);
        assert_eq!(book.active[0].symbol, "ETH");
    }

    #[test]
    fn test_config_validation() {
        assert!(RadarConfig::default().validate().is_ok());
        let bad = RadarConfig {
            trading_hours: Some(TradingHours::new("9am", "5pm")),
            ..RadarConfig::default()
        };
        assert!(matches!(bad.validate(), Err(RadarError::InvalidConfig(_))));
        let bad = RadarConfig {
            min_confidence: 120.0,
            ..RadarConfig::default()
        };
        assert!(bad.validate().is_err());
    }

    #[tokio::test]
    async fn test_scan_skips_failing_symbols() {
        let feed = ScriptedPriceFeed::new().with_price("BTC", 50_000.0);
        feed.fail_symbol("ETH");
        let radar = OpportunityRadar::new(
            Arc::new(feed),
            Arc::new(StaticHistory::new()),
            Arc::new(RecordingNotifier::new()),
            RadarConfig {
                symbols: vec!["ETH".to_string(), "BTC".to_string()],
                ..RadarConfig::default()
            },
            IndicatorPeriods::default(),
        )
        .unwrap();
        assert!(radar.scan(Utc::now()).await.is_empty());
        // BTC still got a snapshot from its tick despite ETH failing
        assert!(radar.snapshot("BTC").await.is_some());
        assert!(radar.snapshot("ETH").await.is_none());
    }

    #[tokio::test]
    async fn test_track_and_untrack() {
        let (radar, _) = radar_with(config(), Arc::new(RecordingNotifier::new()));
        let radar = Arc::new(radar);
        Arc::clone(&radar).track_symbol("sol").await;
        Arc::clone(&radar).track_symbol("SOL").await;
        assert_eq!(radar.tracked_symbols().await, vec!["ETH".to_string(), "SOL".to_string()]);
        radar.untrack_symbol("eth").await;
        assert_eq!(radar.tracked_symbols().await, vec!["SOL".to_string()]);
    }

    #[tokio::test]
    async fn test_subscription_pushes_reach_detectors() {
        let bars = uptrend_with_surge(60);
        let feed = ScriptedPriceFeed::new();
        let notifier = Arc::new(RecordingNotifier::new());
        let radar = Arc::new(
            OpportunityRadar::new(
                Arc::new(feed.clone()),
                Arc::new(StaticHistory::new().with_series("ETH", bars.clone())),
                notifier.clone(),
                RadarConfig {
                    scan_interval_secs: 3_600,
                    ..config()
                },
                IndicatorPeriods::default(),
            )
            .unwrap(),
        );

        *radar.is_running.write().await = true;
        Arc::clone(&radar).subscribe("ETH").await;
        feed.push(surge_tick(&bars, Duration::zero())).await;

        for _ in 0..50 {
            if !notifier.received().is_empty() {
                break;
            }
            tokio::time::sleep(StdDuration::from_millis(10)).await;
        }
        assert_eq!(notifier.received().len(), 1);
        radar.stop().await;
        assert!(!radar.is_running().await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_run_spawns_on_worker_threads() {
        let config = RadarConfig {
            scan_interval_secs: 1,
            ..config()
        };
        let (radar, _) = radar_with(config, Arc::new(RecordingNotifier::new()));
        let radar = Arc::new(radar);
        let handle = tokio::spawn(Arc::clone(&radar).run());

        for _ in 0..100 {
            if radar.is_running().await {
                break;
            }
            tokio::time::sleep(StdDuration::from_millis(10)).await;
        }
        assert!(radar.is_running().await);

        radar.stop().await;
        let joined = tokio::time::timeout(StdDuration::from_secs(5), handle).await;
        tokio_test::assert_ok!(tokio_test::assert_ok!(joined));
        assert!(!radar.is_running().await);
    }
}
