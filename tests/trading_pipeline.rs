//! Trading pipeline integration tests
//!
//! Drives the services through `AppContext` the way the CLI does:
//! 1. Plan -> risk -> execution -> tracker for an accepted trade
//! 2. Funding failure halting the step sequence and cancelling the record
//! 3. Daily loss limit blocking the address and raising an emergency stop
//! 4. Paper market with synthetic history end to end
//!
//! Nothing here touches the network; ports are scripted or simulated.

use std::sync::Arc;

use approx::assert_relative_eq;
use chrono::{Duration, Utc};

use dexpilot::adapters::{InMemoryRepository, InMemoryStore, PaperConfig, PaperMarket, SyntheticHistory, TracingNotifier};
use dexpilot::application::{Adapters, AppContext, ContextError, TrackerError};
use dexpilot::config::{AppConfig, StorageBackend};
use dexpilot::domain::{
    AccountSnapshot, Direction, EmergencyActionType, ExecutionState, ExecutionStatus, PriceTicker, RecordStatus, Severity,
    StepStatus, StepType, Timeframe, UserRiskProfile, ViolationKind,
};
use dexpilot::ports::mocks::{sample_plan, RecordingNotifier, ScriptedGateway, ScriptedPriceFeed, StaticHistory};
use dexpilot::ports::AccountInfo;
use dexpilot::strategy::StrategyEngine;

// ============================================================================
// Test Fixtures
// ============================================================================

const ADDRESS: &str = "0x00000000000000000000000000000000000000aa";

fn wallet_only() -> AccountInfo {
    AccountInfo {
        balance: 10_000.0,
        total_margin: 0.0,
        equity: 0.0,
    }
}

fn scripted_context(gateway: ScriptedGateway, feed: ScriptedPriceFeed) -> AppContext {
    let adapters = Adapters {
        feed: Arc::new(feed),
        history: Arc::new(StaticHistory::new()),
        gateway: Arc::new(gateway),
        notifier: Arc::new(RecordingNotifier::new()),
        store: Arc::new(InMemoryStore::new()),
        profiles: Arc::new(InMemoryRepository::<UserRiskProfile>::new()),
        statuses: Arc::new(InMemoryRepository::<ExecutionStatus>::new()),
    };
    AppContext::build(AppConfig::default(), adapters).unwrap()
}

fn memory_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.storage.backend = StorageBackend::Memory;
    config
}

// ============================================================================
// Accepted trade
// ============================================================================

#[tokio::test]
async fn test_accepted_plan_is_executed_and_tracked() {
    let gateway = ScriptedGateway::new(wallet_only(), 0.0);
    let feed = ScriptedPriceFeed::new().with_price("ETH", 3_000.0);
    let context = scripted_context(gateway.clone(), feed);

    context.ensure_profile(ADDRESS).await.unwrap();
    let plan = sample_plan("ETH", Direction::Long, 3_000.0, 2_400.0, 4.0);
    let assessment = context
        .risk_manager
        .assess_plan(ADDRESS, &plan, &AccountSnapshot::new(10_000.0))
        .await
        .unwrap();
    assert!(assessment.is_acceptable, "violations: {:?}", assessment.violations);
    assert_eq!(assessment.risk_score, 0.0);
    assert!(assessment.adjusted_plan.is_none());

    let status = context.execute_trade(ADDRESS, &plan).await.unwrap();
    assert_eq!(status.status, ExecutionState::Completed);
    assert_eq!(status.completed_steps.len(), 3);
    assert_relative_eq!(status.progress, 100.0);

    let calls: Vec<StepType> = gateway.get_calls().into_iter().map(|(t, _)| t).collect();
    assert_eq!(calls, vec![StepType::Approve, StepType::Deposit, StepType::OpenPosition]);

    let record = context.tracker.get_execution(&plan.id).await.unwrap();
    assert_eq!(record.status, RecordStatus::Entered);
    assert_relative_eq!(record.size, 0.8, epsilon = 1e-12);

    // close 5% higher: 150 per unit on 0.8 units
    let closed = context
        .tracker
        .record_exit(&plan.id, 3_150.0, 0.0, "take profit", Utc::now())
        .await
        .unwrap();
    assert!(closed);
    let record = context.tracker.get_execution(&plan.id).await.unwrap();
    assert_relative_eq!(record.pnl.unwrap(), 120.0, epsilon = 1e-9);
    assert_eq!(record.is_win, Some(true));

    let stats = context.tracker.overall_stats().await;
    assert_eq!(stats.total_trades, 1);
    assert_relative_eq!(stats.total_pnl, 120.0, epsilon = 1e-9);

    let persisted = context.execution_engine.get_execution_status(&plan.id).unwrap();
    assert_eq!(persisted.status, ExecutionState::Completed);
}

#[tokio::test]
async fn test_close_plan_is_not_tracked() {
    let gateway = ScriptedGateway::new(wallet_only(), 0.0).with_position("ETH", 0.8);
    let feed = ScriptedPriceFeed::new().with_price("ETH", 3_000.0);
    let context = scripted_context(gateway.clone(), feed);

    let plan = sample_plan("ETH", Direction::Long, 3_000.0, 2_400.0, 4.0).closing();
    let status = context.execute_trade(ADDRESS, &plan).await.unwrap();

    assert_eq!(status.status, ExecutionState::Completed);
    assert!(context.tracker.get_execution(&plan.id).await.is_none());
    assert_eq!(gateway.get_calls()[0].0, StepType::ClosePosition);
}

// ============================================================================
// Funding failure
// ============================================================================

#[tokio::test]
async fn test_deposit_failure_leaves_open_step_pending() {
    let gateway = ScriptedGateway::new(wallet_only(), 0.0).fail_on(StepType::Deposit, "execution reverted");
    let feed = ScriptedPriceFeed::new().with_price("ETH", 3_000.0);
    let context = scripted_context(gateway.clone(), feed);

    let plan = sample_plan("ETH", Direction::Long, 3_000.0, 2_400.0, 4.0);
    let mut execution = context
        .execution_engine
        .create_execution_plan(ADDRESS, &plan)
        .await
        .unwrap();
    assert_eq!(execution.steps.len(), 3);

    let status = context
        .execution_engine
        .execute_plan(ADDRESS, &mut execution)
        .await
        .unwrap();
    assert_eq!(status.status, ExecutionState::Failed);
    assert_eq!(status.completed_steps, vec![execution.steps[0].id.clone()]);
    assert_eq!(execution.steps[0].status, StepStatus::Completed);
    assert_eq!(execution.steps[1].status, StepStatus::Failed);
    assert_eq!(execution.steps[2].status, StepStatus::Pending);
    assert!(!gateway.get_calls().iter().any(|(t, _)| *t == StepType::OpenPosition));
}

#[tokio::test]
async fn test_failed_execution_cancels_tracker_record() {
    let gateway = ScriptedGateway::new(wallet_only(), 0.0).fail_on(StepType::Deposit, "execution reverted");
    let feed = ScriptedPriceFeed::new().with_price("ETH", 3_000.0);
    let context = scripted_context(gateway, feed);

    let plan = sample_plan("ETH", Direction::Long, 3_000.0, 2_400.0, 4.0);
    let status = context.execute_trade(ADDRESS, &plan).await.unwrap();

    assert_eq!(status.status, ExecutionState::Failed);
    let record = context.tracker.get_execution(&plan.id).await.unwrap();
    assert_eq!(record.status, RecordStatus::Cancelled);
    assert!(record.actual_entry_price.is_none());
    assert_eq!(context.tracker.overall_stats().await.total_trades, 0);
}

#[tokio::test]
async fn test_retry_after_failed_run_is_tracked() {
    let gateway = ScriptedGateway::new(wallet_only(), 0.0);
    let feed = ScriptedPriceFeed::new().with_price("ETH", 3_300.0);
    let context = scripted_context(gateway.clone(), feed.clone());

    // 10% away from the plan entry: preflight blocks the first run
    let plan = sample_plan("ETH", Direction::Long, 3_000.0, 2_400.0, 4.0);
    let first = context.execute_trade(ADDRESS, &plan).await.unwrap();
    assert_eq!(first.status, ExecutionState::Failed);
    assert_eq!(
        context.tracker.get_execution(&plan.id).await.unwrap().status,
        RecordStatus::Cancelled
    );

    feed.set_ticker(PriceTicker::flat("ETH", 3_000.0, 1_000.0, Utc::now()));
    let second = context.execute_trade(ADDRESS, &plan).await.unwrap();
    assert_eq!(second.status, ExecutionState::Completed);
    let record = context.tracker.get_execution(&plan.id).await.unwrap();
    assert_eq!(record.status, RecordStatus::Entered);

    // an entered plan is refused before anything reaches the gateway
    let calls = gateway.get_calls().len();
    let third = context.execute_trade(ADDRESS, &plan).await;
    assert!(matches!(third, Err(ContextError::Tracker(TrackerError::DuplicatePlan(_)))));
    assert_eq!(gateway.get_calls().len(), calls);
}

#[tokio::test]
async fn test_execution_error_leaves_no_tracker_record() {
    let feed = ScriptedPriceFeed::new().with_price("ETH", 3_000.0);
    feed.fail_symbol("ETH");
    let context = scripted_context(ScriptedGateway::new(wallet_only(), 0.0), feed);

    let plan = sample_plan("ETH", Direction::Long, 3_000.0, 2_400.0, 4.0);
    assert!(context.execute_trade(ADDRESS, &plan).await.is_err());
    assert!(context.tracker.get_execution(&plan.id).await.is_none());
}

// ============================================================================
// Daily loss and emergency stop
// ============================================================================

#[tokio::test]
async fn test_daily_loss_blocks_address() {
    let gateway = ScriptedGateway::new(wallet_only(), 0.0);
    let feed = ScriptedPriceFeed::new().with_price("ETH", 3_000.0);
    let context = scripted_context(gateway, feed);

    context.ensure_profile(ADDRESS).await.unwrap();
    let profile = context.risk_manager.record_trade_result(ADDRESS, -1_200.0).await.unwrap();
    assert!(profile.is_blocked);
    assert!(!context.risk_manager.is_trading_allowed(ADDRESS));

    // an otherwise clean plan still carries the critical daily-loss violation
    let plan = sample_plan("ETH", Direction::Long, 3_000.0, 1_000.0, 2.0);
    let assessment = context
        .risk_manager
        .assess_plan(ADDRESS, &plan, &AccountSnapshot::new(10_000.0))
        .await
        .unwrap();
    assert!(!assessment.is_acceptable);
    assert!(assessment
        .violations
        .iter()
        .any(|v| v.kind == ViolationKind::DailyLoss && v.severity == Severity::Critical));

    let actions = context
        .risk_manager
        .check_emergency_stop(ADDRESS, &AccountSnapshot::new(10_000.0))
        .await
        .unwrap();
    assert!(actions.iter().any(|a| a.action == EmergencyActionType::StopTrading));
    assert!(context.risk_manager.is_emergency_active());

    context.risk_manager.reset_daily(ADDRESS).await.unwrap();
    context.risk_manager.clear_emergency();
    assert!(context.risk_manager.is_trading_allowed(ADDRESS));
}

// ============================================================================
// Tracker round trip
// ============================================================================

#[tokio::test]
async fn test_tracker_export_survives_fresh_context() {
    let feed = ScriptedPriceFeed::new().with_price("BTC", 45_000.0);
    let context = scripted_context(ScriptedGateway::new(wallet_only(), 0.0), feed.clone());

    let now = Utc::now();
    let plan = sample_plan("BTC", Direction::Long, 45_000.0, 45_000.0, 5.0);
    context.tracker.record_plan(&plan, now).await.unwrap();
    context
        .tracker
        .record_entry(&plan.id, 45_050.0, 1.0, 15.0, now + Duration::minutes(1))
        .await
        .unwrap();
    context
        .tracker
        .record_exit(&plan.id, 46_800.0, 15.0, "target", now + Duration::hours(2))
        .await
        .unwrap();

    let record = context.tracker.get_execution(&plan.id).await.unwrap();
    assert_relative_eq!(record.pnl.unwrap(), 1_720.0, epsilon = 1e-9);
    assert_eq!(record.is_win, Some(true));

    let exported = context.tracker.export_data().await.unwrap();
    let fresh = scripted_context(ScriptedGateway::new(wallet_only(), 0.0), feed);
    let imported = fresh.tracker.import_data(&exported).await.unwrap();
    assert_eq!(imported, 1);

    let restored = fresh.tracker.get_execution(&plan.id).await.unwrap();
    assert_eq!(restored.pnl, record.pnl);
    assert_eq!(
        fresh.tracker.strategy_performance(&plan.strategy).await,
        context.tracker.strategy_performance(&plan.strategy).await
    );
}

// ============================================================================
// Paper market
// ============================================================================

#[tokio::test]
async fn test_paper_pipeline_produces_consistent_plans() {
    let market = Arc::new(PaperMarket::new(PaperConfig::default()));
    let adapters = Adapters {
        feed: market.clone(),
        history: Arc::new(SyntheticHistory::new(11)),
        gateway: market.clone(),
        notifier: Arc::new(TracingNotifier::new()),
        store: Arc::new(InMemoryStore::new()),
        profiles: Arc::new(InMemoryRepository::<UserRiskProfile>::new()),
        statuses: Arc::new(InMemoryRepository::<ExecutionStatus>::new()),
    };
    let context = AppContext::build(memory_config(), adapters).unwrap();

    for symbol in market.symbols() {
        let account = market.account_snapshot(ADDRESS);
        let Some(assessed) = context
            .plan_trade(ADDRESS, &symbol, Timeframe::H1, &account)
            .await
            .unwrap()
        else {
            continue;
        };

        let plan = assessed.actionable();
        assert!((0.0..=100.0).contains(&plan.confidence));
        assert_eq!(plan.take_profit.targets.len(), 3);
        let distances: Vec<f64> = plan
            .take_profit
            .targets
            .iter()
            .map(|t| (t.price - plan.entry.price).abs())
            .collect();
        assert!(distances.windows(2).all(|w| w[0] < w[1]));
        assert!((0.0..=100.0).contains(&assessed.assessment.risk_score));
        if assessed.assessment.has_critical() {
            assert!(!assessed.assessment.is_acceptable);
        }
        if assessed.assessment.adjusted_plan.is_some() {
            let limits = context.risk_manager.get_profile(ADDRESS).unwrap().parameters;
            assert!(plan.position_sizing.notional_size <= limits.max_position_size + 1e-9);
        }

        let validation = StrategyEngine::validate_trading_plan(plan, account.balance);
        assert!(validation.errors.is_empty(), "{:?}", validation.errors);
    }
}
