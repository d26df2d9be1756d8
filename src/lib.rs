//! dexpilot - Strategy, risk and execution core for a DEX trading desk
//!
//! Turns price history into regime-aware trading plans, scores them against
//! per-address risk limits, executes them as ordered contract steps and
//! tracks how each strategy performs.
//!
//! # Modules
//!
//! - `domain`: Value types (PriceBar, TradingPlan, RiskAssessment, ExecutionPlan)
//! - `ports`: Trait abstractions (PriceFeed, AccountGateway, KeyValueStore, Repository)
//! - `strategy`: Indicators, regime detection, signal generators, sizing, StrategyEngine
//! - `application`: RiskManager, OpportunityRadar, ExecutionEngine, PerformanceTracker
//! - `adapters`: Paper market, synthetic history, storage, CLI
//! - `config`: Configuration loading and validation

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
pub mod strategy;
