//! Account / contract gateway port
//!
//! Everything that touches the wallet or the perp contract. Transaction
//! submitting calls hand back a pending-transaction handle; awaiting
//! [`PendingTx::wait`] blocks until the transaction is mined.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::Direction;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum GatewayError {
    #[error("RPC request failed: {0}")]
    Rpc(String),
    #[error("Transaction rejected by wallet: {0}")]
    Rejected(String),
    #[error("Transaction reverted: {0}")]
    Reverted(String),
    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountInfo {
    /// Collateral token balance held by the wallet
    pub balance: f64,
    /// Margin currently locked by open positions
    pub total_margin: f64,
    /// Collateral deposited in the perp contract, including locked margin
    pub equity: f64,
}

impl AccountInfo {
    /// Deposited collateral not locked by positions
    pub fn available_margin(&self) -> f64 {
        (self.equity - self.total_margin).max(0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub hash: String,
    pub success: bool,
    pub gas_used: u64,
}

/// Submitted transaction awaiting confirmation
#[async_trait]
pub trait PendingTx: Send {
    fn hash(&self) -> &str;

    async fn wait(self: Box<Self>) -> Result<TxReceipt, GatewayError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenPositionRequest {
    pub symbol: String,
    pub side: Direction,
    pub size: f64,
    pub leverage: f64,
    pub acceptable_price: f64,
}

#[async_trait]
pub trait AccountGateway: Send + Sync {
    async fn get_account_info(&self, address: &str) -> Result<AccountInfo, GatewayError>;

    /// Signed position size; positive long, negative short, zero flat
    async fn get_position(&self, address: &str, symbol: &str) -> Result<f64, GatewayError>;

    /// Amount the contract may pull from the wallet
    async fn check_allowance(&self, address: &str) -> Result<f64, GatewayError>;

    async fn approve(&self, address: &str, amount: f64) -> Result<Box<dyn PendingTx>, GatewayError>;

    async fn deposit(&self, address: &str, amount: f64) -> Result<Box<dyn PendingTx>, GatewayError>;

    async fn withdraw(&self, address: &str, amount: f64) -> Result<Box<dyn PendingTx>, GatewayError>;

    async fn open_position(&self, address: &str, request: OpenPositionRequest) -> Result<Box<dyn PendingTx>, GatewayError>;

    async fn close_position(&self, address: &str, symbol: &str, size: f64) -> Result<Box<dyn PendingTx>, GatewayError>;
}
