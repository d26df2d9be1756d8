//! Adapters Layer - External System Implementations
//!
//! This module contains implementations of the port traits:
//! - Paper: simulated price feed and perp contract gateway
//! - Synthetic: seeded random-walk price history (fallback only)
//! - Storage: in-memory and JSON-file stores and repositories
//! - Notifier: notifications routed to tracing
//! - CLI: Command-line interface handlers

pub mod cli;
pub mod notifier;
pub mod paper;
pub mod storage;
pub mod synthetic;

pub use cli::CliApp;
pub use notifier::TracingNotifier;
pub use paper::{PaperConfig, PaperMarket};
pub use storage::{FileStore, InMemoryRepository, InMemoryStore, JsonFileRepository};
pub use synthetic::SyntheticHistory;
