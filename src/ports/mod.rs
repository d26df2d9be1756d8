//! Ports Layer - Trait definitions for external dependencies
//!
//! This module defines the interfaces (ports) that adapters must implement.
//! Following hexagonal architecture, these traits abstract:
//! - Market data (live quotes, historical bars)
//! - The wallet / perp contract gateway
//! - Persistence (key-value blobs, keyed repositories)
//! - User-facing notifications

pub mod gateway;
pub mod market_data;
#[cfg(any(test, feature = "testing"))]
pub mod mocks;
pub mod notification;
pub mod storage;

// Re-export main traits and types
pub use gateway::{AccountGateway, AccountInfo, GatewayError, OpenPositionRequest, PendingTx, TxReceipt};
pub use market_data::{HistoryQuery, MarketDataError, PriceFeed, PriceHistoryProvider};
pub use notification::{Notification, NotificationLevel, NotificationSink};
pub use storage::{KeyValueStore, Repository, StoreError};

#[cfg(test)]
pub use market_data::MockPriceFeed;
#[cfg(test)]
pub use notification::MockNotificationSink;
