//! Paper market
//!
//! In-process stand-in for the price feed and the perp contract so the CLI
//! runs without network access. Quotes follow a seeded random walk; wallet,
//! deposits and positions are simulated per address and every transaction
//! confirms immediately.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use statrs::distribution::Normal;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::adapters::synthetic::default_base_prices;
use crate::domain::{AccountSnapshot, Direction, OpenPosition, PriceTicker};
use crate::ports::{
    AccountGateway, AccountInfo, GatewayError, MarketDataError, OpenPositionRequest, PendingTx, PriceFeed, TxReceipt,
};

const SUBSCRIPTION_BUFFER: usize = 64;
const PAPER_GAS: u64 = 21_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaperConfig {
    /// Collateral each new address starts with
    pub starting_balance: f64,
    /// Per-tick standard deviation of log returns
    pub volatility: f64,
    pub seed: u64,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            starting_balance: 10_000.0,
            volatility: 0.002,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone)]
struct PaperPosition {
    side: Direction,
    /// Notional in quote currency
    size: f64,
    entry_price: f64,
    margin: f64,
}

#[derive(Debug, Clone, Default)]
struct PaperAccount {
    info: AccountInfo,
    allowance: f64,
    peak_equity: f64,
    realized_today: f64,
    positions: HashMap<String, PaperPosition>,
}

struct PaperState {
    tickers: HashMap<String, PriceTicker>,
    accounts: HashMap<String, PaperAccount>,
    rng: StdRng,
    tx_counter: u64,
}

pub struct PaperMarket {
    config: PaperConfig,
    state: Mutex<PaperState>,
    subscribers: Mutex<HashMap<String, Vec<mpsc::Sender<PriceTicker>>>>,
}

impl PaperMarket {
    pub fn new(config: PaperConfig) -> Self {
        let now = Utc::now();
        let tickers = default_base_prices()
            .into_iter()
            .map(|(symbol, price)| {
                let ticker = PriceTicker::flat(&symbol, price, 1_000.0, now);
                (symbol, ticker)
            })
            .collect();
        Self {
            state: Mutex::new(PaperState {
                tickers,
                accounts: HashMap::new(),
                rng: StdRng::seed_from_u64(config.seed),
                tx_counter: 0,
            }),
            subscribers: Mutex::new(HashMap::new()),
            config,
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, PaperState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_price(&self, symbol: &str, price: f64, now: DateTime<Utc>) {
        let mut state = self.lock_state();
        let ticker = state
            .tickers
            .entry(symbol.to_string())
            .or_insert_with(|| PriceTicker::flat(symbol, price, 1_000.0, now));
        apply_price(ticker, price, now);
    }

    pub fn price(&self, symbol: &str) -> Option<f64> {
        self.lock_state().tickers.get(symbol).map(|t| t.price)
    }

    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.lock_state().tickers.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    /// Advance every quote one random-walk step and push it to subscribers
    pub async fn tick(&self, now: DateTime<Utc>) {
        let updated: Vec<PriceTicker> = {
            let mut state = self.lock_state();
            let Ok(returns) = Normal::new(0.0, self.config.volatility.max(1e-9)) else {
                return;
            };
            let PaperState { tickers, rng, .. } = &mut *state;
            let mut symbols: Vec<&String> = tickers.keys().collect();
            symbols.sort();
            let steps: Vec<(String, f64)> = symbols
                .into_iter()
                .map(|s| (s.clone(), rng.sample(returns).exp()))
                .collect();
            steps
                .into_iter()
                .filter_map(|(symbol, factor)| {
                    let ticker = tickers.get_mut(&symbol)?;
                    let volume = ticker.volume;
                    let price = ticker.price * factor;
                    apply_price(ticker, price, now);
                    ticker.volume = volume;
                    Some(ticker.clone())
                })
                .collect()
        };

        for ticker in updated {
            self.publish(ticker).await;
        }
    }

    async fn publish(&self, ticker: PriceTicker) {
        let senders = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&ticker.symbol)
            .cloned()
            .unwrap_or_default();
        for sender in senders {
            // slow or closed receivers miss this tick
            let _ = sender.try_send(ticker.clone());
        }
    }

    /// Tick on a fixed interval until the handle is aborted
    pub fn spawn_ticker(self: Arc<Self>, every: StdDuration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                self.tick(Utc::now()).await;
            }
        })
    }

    /// Account state for the risk manager, positions marked to the current quote
    pub fn account_snapshot(&self, address: &str) -> AccountSnapshot {
        let mut state = self.lock_state();
        let starting = self.config.starting_balance;
        let tickers = state.tickers.clone();
        let account = account_mut(&mut state.accounts, address, starting);

        let positions: Vec<OpenPosition> = account
            .positions
            .iter()
            .map(|(symbol, p)| {
                let mut position = OpenPosition::new(symbol, p.side, p.size, p.entry_price);
                if let Some(ticker) = tickers.get(symbol) {
                    position.update_price(ticker.price);
                }
                position
            })
            .collect();
        let unrealized: f64 = positions.iter().map(|p| p.unrealized_pnl()).sum();
        let equity = account.info.balance + account.info.equity + unrealized;
        account.peak_equity = account.peak_equity.max(equity);

        AccountSnapshot {
            balance: account.info.balance,
            equity,
            peak_equity: account.peak_equity,
            daily_pnl: account.realized_today + unrealized,
            positions,
        }
    }

    fn submit(&self, label: &str) -> Box<dyn PendingTx> {
        let mut state = self.lock_state();
        state.tx_counter += 1;
        let hash = format!("0x{:064x}", state.tx_counter);
        debug!(tx = %hash, kind = label, "Paper transaction confirmed");
        Box::new(PaperTx { hash })
    }

    fn quote(state: &PaperState, symbol: &str) -> Result<f64, GatewayError> {
        state
            .tickers
            .get(symbol)
            .map(|t| t.price)
            .ok_or_else(|| GatewayError::Rpc(format!("no market for {}", symbol)))
    }
}

fn apply_price(ticker: &mut PriceTicker, price: f64, now: DateTime<Utc>) {
    ticker.price = price;
    ticker.high_24h = ticker.high_24h.max(price);
    ticker.low_24h = ticker.low_24h.min(price);
    ticker.change_24h = if ticker.open_price > 0.0 {
        (price - ticker.open_price) / ticker.open_price * 100.0
    } else {
        0.0
    };
    ticker.timestamp = now;
}

fn account_mut<'a>(accounts: &'a mut HashMap<String, PaperAccount>, address: &str, starting: f64) -> &'a mut PaperAccount {
    accounts.entry(address.to_string()).or_insert_with(|| PaperAccount {
        info: AccountInfo {
            balance: starting,
            total_margin: 0.0,
            equity: 0.0,
        },
        peak_equity: starting,
        ..PaperAccount::default()
    })
}

struct PaperTx {
    hash: String,
}

#[async_trait]
impl PendingTx for PaperTx {
    fn hash(&self) -> &str {
        &self.hash
    }

    async fn wait(self: Box<Self>) -> Result<TxReceipt, GatewayError> {
        Ok(TxReceipt {
            hash: self.hash,
            success: true,
            gas_used: PAPER_GAS,
        })
    }
}

#[async_trait]
impl PriceFeed for PaperMarket {
    async fn get_price(&self, symbol: &str) -> Result<PriceTicker, MarketDataError> {
        self.lock_state()
            .tickers
            .get(symbol)
            .cloned()
            .ok_or_else(|| MarketDataError::UnknownSymbol(symbol.to_string()))
    }

    async fn subscribe(&self, symbol: &str) -> Result<mpsc::Receiver<PriceTicker>, MarketDataError> {
        if !self.lock_state().tickers.contains_key(symbol) {
            return Err(MarketDataError::UnknownSymbol(symbol.to_string()));
        }
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = subscribers.entry(symbol.to_string()).or_default();
        entry.retain(|s| !s.is_closed());
        entry.push(tx);
        Ok(rx)
    }
}

#[async_trait]
impl AccountGateway for PaperMarket {
    async fn get_account_info(&self, address: &str) -> Result<AccountInfo, GatewayError> {
        let mut state = self.lock_state();
        Ok(account_mut(&mut state.accounts, address, self.config.starting_balance).info)
    }

    async fn get_position(&self, address: &str, symbol: &str) -> Result<f64, GatewayError> {
        let mut state = self.lock_state();
        let account = account_mut(&mut state.accounts, address, self.config.starting_balance);
        Ok(account
            .positions
            .get(symbol)
            .map(|p| p.side.sign() * p.size)
            .unwrap_or(0.0))
    }

    async fn check_allowance(&self, address: &str) -> Result<f64, GatewayError> {
        let mut state = self.lock_state();
        Ok(account_mut(&mut state.accounts, address, self.config.starting_balance).allowance)
    }

    async fn approve(&self, address: &str, amount: f64) -> Result<Box<dyn PendingTx>, GatewayError> {
        {
            let mut state = self.lock_state();
            account_mut(&mut state.accounts, address, self.config.starting_balance).allowance = amount;
        }
        Ok(self.submit("approve"))
    }

    async fn deposit(&self, address: &str, amount: f64) -> Result<Box<dyn PendingTx>, GatewayError> {
        {
            let mut state = self.lock_state();
            let account = account_mut(&mut state.accounts, address, self.config.starting_balance);
            if account.allowance < amount {
                return Err(GatewayError::Rejected(format!(
                    "allowance {:.2} below deposit {:.2}",
                    account.allowance, amount
                )));
            }
            if account.info.balance < amount {
                return Err(GatewayError::InsufficientFunds(format!(
                    "balance {:.2} below deposit {:.2}",
                    account.info.balance, amount
                )));
            }
            account.allowance -= amount;
            account.info.balance -= amount;
            account.info.equity += amount;
        }
        Ok(self.submit("deposit"))
    }

    async fn withdraw(&self, address: &str, amount: f64) -> Result<Box<dyn PendingTx>, GatewayError> {
        {
            let mut state = self.lock_state();
            let account = account_mut(&mut state.accounts, address, self.config.starting_balance);
            if account.info.available_margin() < amount {
                return Err(GatewayError::InsufficientFunds(format!(
                    "available margin {:.2} below withdrawal {:.2}",
                    account.info.available_margin(),
                    amount
                )));
            }
            account.info.equity -= amount;
            account.info.balance += amount;
        }
        Ok(self.submit("withdraw"))
    }

    async fn open_position(&self, address: &str, request: OpenPositionRequest) -> Result<Box<dyn PendingTx>, GatewayError> {
        {
            let mut state = self.lock_state();
            let price = Self::quote(&state, &request.symbol)?;
            let slipped = match request.side {
                Direction::Long => price > request.acceptable_price,
                Direction::Short => price < request.acceptable_price,
            };
            if slipped {
                return Err(GatewayError::Reverted(format!(
                    "price {:.4} beyond acceptable {:.4}",
                    price, request.acceptable_price
                )));
            }

            let account = account_mut(&mut state.accounts, address, self.config.starting_balance);
            let margin = request.size / request.leverage.max(1.0);
            if account.info.available_margin() < margin {
                return Err(GatewayError::InsufficientFunds(format!(
                    "available margin {:.2} below required {:.2}",
                    account.info.available_margin(),
                    margin
                )));
            }
            if account.positions.contains_key(&request.symbol) {
                return Err(GatewayError::Reverted(format!("position already open on {}", request.symbol)));
            }
            account.info.total_margin += margin;
            account.positions.insert(
                request.symbol.clone(),
                PaperPosition {
                    side: request.side,
                    size: request.size,
                    entry_price: price,
                    margin,
                },
            );
            info!(address, symbol = %request.symbol, side = ?request.side, size = request.size, price, "Paper position opened");
        }
        Ok(self.submit("open_position"))
    }

    async fn close_position(&self, address: &str, symbol: &str, size: f64) -> Result<Box<dyn PendingTx>, GatewayError> {
        {
            let mut state = self.lock_state();
            let price = Self::quote(&state, symbol)?;
            let account = account_mut(&mut state.accounts, address, self.config.starting_balance);
            let Some(position) = account.positions.get(symbol).cloned() else {
                return Err(GatewayError::Reverted(format!("no open position on {}", symbol)));
            };

            let closed = size.abs().min(position.size);
            let fraction = if position.size > 0.0 { closed / position.size } else { 1.0 };
            let pnl = position.side.sign() * (price - position.entry_price) / position.entry_price * closed;
            let released = position.margin * fraction;

            account.info.total_margin = (account.info.total_margin - released).max(0.0);
            account.info.equity += pnl;
            account.realized_today += pnl;
            if fraction >= 1.0 - f64::EPSILON {
                account.positions.remove(symbol);
            } else if let Some(open) = account.positions.get_mut(symbol) {
                open.size -= closed;
                open.margin -= released;
            }
            info!(address, symbol, closed, pnl, "Paper position closed");
        }
        Ok(self.submit("close_position"))
    }
}
