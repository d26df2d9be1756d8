//! Scriptable in-memory port implementations
//!
//! Used by unit and integration tests. Each mock records its calls and lets
//! the test decide responses up front.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::mpsc;

use crate::domain::{
    Direction, EntrySpec, MarketRegime, OrderType, PlanAction, PositionSizing, PriceBar, PriceTicker, StepType, Timeframe,
    TradingPlan, TradingSignal,
};
use crate::strategy::calculate_stop_loss_and_take_profit;
use crate::ports::gateway::{AccountGateway, AccountInfo, GatewayError, OpenPositionRequest, PendingTx, TxReceipt};
use crate::ports::market_data::{HistoryQuery, MarketDataError, PriceFeed, PriceHistoryProvider};
use crate::ports::notification::{Notification, NotificationSink};

/// Price feed returning configured quotes
#[derive(Debug, Default, Clone)]
pub struct ScriptedPriceFeed {
    tickers: Arc<Mutex<HashMap<String, PriceTicker>>>,
    failing: Arc<Mutex<HashSet<String>>>,
    subscribers: Arc<Mutex<HashMap<String, Vec<mpsc::Sender<PriceTicker>>>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl ScriptedPriceFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to set a flat quote for a symbol
    pub fn with_price(self, symbol: &str, price: f64) -> Self {
        self.set_ticker(PriceTicker::flat(symbol, price, 1_000.0, Utc::now()));
        self
    }

    pub fn set_ticker(&self, ticker: PriceTicker) {
        self.tickers.lock().unwrap_or_else(PoisonError::into_inner).insert(ticker.symbol.clone(), ticker);
    }

    /// Make every request for `symbol` fail
    pub fn fail_symbol(&self, symbol: &str) {
        self.failing.lock().unwrap_or_else(PoisonError::into_inner).insert(symbol.to_string());
    }

    /// Deliver a quote to every subscriber of its symbol
    pub async fn push(&self, ticker: PriceTicker) {
        let senders = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&ticker.symbol)
            .cloned()
            .unwrap_or_default();
        for sender in senders {
            let _ = sender.send(ticker.clone()).await;
        }
    }

    /// Drop all subscription senders so the receiving streams end
    pub fn close_streams(&self) {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    pub fn get_calls(&self) -> Vec<String> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl PriceFeed for ScriptedPriceFeed {
    async fn get_price(&self, symbol: &str) -> Result<PriceTicker, MarketDataError> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).push(symbol.to_string());
        if self.failing.lock().unwrap_or_else(PoisonError::into_inner).contains(symbol) {
            return Err(MarketDataError::Unavailable(format!("scripted failure for {}", symbol)));
        }
        self.tickers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(symbol)
            .cloned()
            .ok_or_else(|| MarketDataError::UnknownSymbol(symbol.to_string()))
    }

    async fn subscribe(&self, symbol: &str) -> Result<mpsc::Receiver<PriceTicker>, MarketDataError> {
        let (tx, rx) = mpsc::channel(64);
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(symbol.to_string())
            .or_default()
            .push(tx);
        Ok(rx)
    }
}

/// History provider serving fixed bar series per symbol
#[derive(Debug, Default, Clone)]
pub struct StaticHistory {
    series: Arc<Mutex<HashMap<String, Vec<PriceBar>>>>,
}

impl StaticHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_series(self, symbol: &str, bars: Vec<PriceBar>) -> Self {
        self.series.lock().unwrap_or_else(PoisonError::into_inner).insert(symbol.to_string(), bars);
        self
    }
}

#[async_trait]
impl PriceHistoryProvider for StaticHistory {
    async fn fetch_history(&self, query: HistoryQuery) -> Result<Vec<PriceBar>, MarketDataError> {
        let bars = self
            .series
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&query.symbol)
            .cloned()
            .ok_or_else(|| MarketDataError::UnknownSymbol(query.symbol.clone()))?;
        let start = bars.len().saturating_sub(query.limit);
        Ok(bars[start..].to_vec())
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

#[derive(Debug, Default)]
struct GatewayState {
    account: AccountInfo,
    allowance: f64,
    positions: HashMap<String, f64>,
    failures: HashMap<StepType, String>,
    stalls: HashSet<StepType>,
    calls: Vec<(StepType, f64)>,
    tx_counter: u64,
}

/// Account gateway with scriptable balances, failures and stalls
#[derive(Debug, Default, Clone)]
pub struct ScriptedGateway {
    state: Arc<Mutex<GatewayState>>,
}

impl ScriptedGateway {
    pub fn new(account: AccountInfo, allowance: f64) -> Self {
        let gateway = Self::default();
        {
            let mut state = gateway.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.account = account;
            state.allowance = allowance;
        }
        gateway
    }

    pub fn with_position(self, symbol: &str, signed_size: f64) -> Self {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).positions.insert(symbol.to_string(), signed_size);
        self
    }

    /// Submission of this step type fails with the given message
    pub fn fail_on(self, step_type: StepType, message: &str) -> Self {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).failures.insert(step_type, message.to_string());
        self
    }

    /// Transactions of this step type are submitted but never confirm
    pub fn stall_on(self, step_type: StepType) -> Self {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).stalls.insert(step_type);
        self
    }

    pub fn get_calls(&self) -> Vec<(StepType, f64)> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).calls.clone()
    }

    pub fn account(&self) -> AccountInfo {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).account
    }

    fn submit(&self, step_type: StepType, amount: f64, apply: impl FnOnce(&mut GatewayState)) -> Result<Box<dyn PendingTx>, GatewayError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.calls.push((step_type, amount));
        if let Some(message) = state.failures.get(&step_type) {
            return Err(GatewayError::Reverted(message.clone()));
        }
        apply(&mut state);
        state.tx_counter += 1;
        Ok(Box::new(ScriptedTx {
            hash: format!("0x{:064x}", state.tx_counter),
            stall: state.stalls.contains(&step_type),
        }))
    }
}

struct ScriptedTx {
    hash: String,
    stall: bool,
}

#[async_trait]
impl PendingTx for ScriptedTx {
    fn hash(&self) -> &str {
        &self.hash
    }

    async fn wait(self: Box<Self>) -> Result<TxReceipt, GatewayError> {
        if self.stall {
            std::future::pending::<()>().await;
        }
        Ok(TxReceipt {
            hash: self.hash,
            success: true,
            gas_used: 21_000,
        })
    }
}

#[async_trait]
impl AccountGateway for ScriptedGateway {
    async fn get_account_info(&self, _address: &str) -> Result<AccountInfo, GatewayError> {
        Ok(self.state.lock().unwrap_or_else(PoisonError::into_inner).account)
    }

    async fn get_position(&self, _address: &str, symbol: &str) -> Result<f64, GatewayError> {
        Ok(self.state.lock().unwrap_or_else(PoisonError::into_inner).positions.get(symbol).copied().unwrap_or(0.0))
    }

    async fn check_allowance(&self, _address: &str) -> Result<f64, GatewayError> {
        Ok(self.state.lock().unwrap_or_else(PoisonError::into_inner).allowance)
    }

    async fn approve(&self, _address: &str, amount: f64) -> Result<Box<dyn PendingTx>, GatewayError> {
        self.submit(StepType::Approve, amount, |s| s.allowance = amount)
    }

    async fn deposit(&self, _address: &str, amount: f64) -> Result<Box<dyn PendingTx>, GatewayError> {
        self.submit(StepType::Deposit, amount, |s| {
            s.account.balance -= amount;
            s.account.equity += amount;
            s.allowance -= amount;
        })
    }

    async fn withdraw(&self, _address: &str, amount: f64) -> Result<Box<dyn PendingTx>, GatewayError> {
        self.submit(StepType::Withdraw, amount, |s| {
            s.account.balance += amount;
            s.account.equity -= amount;
        })
    }

    async fn open_position(&self, _address: &str, request: OpenPositionRequest) -> Result<Box<dyn PendingTx>, GatewayError> {
        let margin = request.size / request.leverage.max(1.0);
        self.submit(StepType::OpenPosition, request.size, |s| {
            *s.positions.entry(request.symbol.clone()).or_insert(0.0) += request.side.sign() * request.size;
            s.account.total_margin += margin;
        })
    }

    async fn close_position(&self, _address: &str, symbol: &str, size: f64) -> Result<Box<dyn PendingTx>, GatewayError> {
        self.submit(StepType::ClosePosition, size, |s| {
            s.positions.remove(symbol);
            s.account.total_margin = 0.0;
        })
    }
}

/// Notification sink that keeps everything it was handed
#[derive(Debug, Default, Clone)]
pub struct RecordingNotifier {
    received: Arc<Mutex<Vec<Notification>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn received(&self) -> Vec<Notification> {
        self.received.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl NotificationSink for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        self.received.lock().unwrap_or_else(PoisonError::into_inner).push(notification);
    }
}

/// Hand-built long/short plan with a 2% stop and 4% target ladder
pub fn sample_plan(symbol: &str, direction: Direction, entry: f64, notional: f64, leverage: f64) -> TradingPlan {
    sample_plan_at(symbol, direction, entry, notional, leverage, Utc::now())
}

pub fn sample_plan_at(
    symbol: &str,
    direction: Direction,
    entry: f64,
    notional: f64,
    leverage: f64,
    created_at: DateTime<Utc>,
) -> TradingPlan {
    let (stop_loss, take_profit) = calculate_stop_loss_and_take_profit(direction, entry, 2.0, 4.0);
    let leverage = leverage.max(1.0);
    TradingPlan {
        id: uuid::Uuid::new_v4().to_string(),
        symbol: symbol.to_string(),
        strategy: "Trend Breakout".to_string(),
        action: PlanAction::from(direction),
        signal: TradingSignal::entry(direction, 80.0, entry, created_at, "fixture"),
        entry: EntrySpec {
            price: entry,
            order_type: OrderType::Market,
            conditions: Vec::new(),
        },
        stop_loss,
        take_profit,
        position_sizing: PositionSizing {
            notional_size: notional,
            leverage,
            margin: notional / leverage,
            risk_amount: notional * 0.02,
        },
        market_regime: MarketRegime::undetermined(),
        risk_reward: 2.0,
        confidence: 80.0,
        timeframe: Timeframe::H1,
        created_at,
        expires_at: Some(created_at + Duration::hours(4)),
        notes: Vec::new(),
    }
}
