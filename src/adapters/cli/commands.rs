//! CLI Command Handlers
//!
//! Every command runs against the paper market and synthetic history; the
//! tracker and repositories persist according to the `[storage]` section.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::adapters::notifier::TracingNotifier;
use crate::adapters::paper::{PaperConfig, PaperMarket};
use crate::adapters::storage::{FileStore, InMemoryRepository, InMemoryStore, JsonFileRepository};
use crate::adapters::synthetic::SyntheticHistory;
use crate::application::{Adapters, AppContext};
use crate::config::{load_config, write_default_config, AppConfig, StorageBackend};
use crate::domain::{ExecutionState, ExecutionStatus, Timeframe, UserRiskProfile};
use crate::ports::{KeyValueStore, Repository};

/// dexpilot - strategy, risk and execution core for a DEX trading desk
#[derive(Parser, Debug)]
#[command(
    name = "dexpilot",
    version = env!("CARGO_PKG_VERSION"),
    author = env!("CARGO_PKG_AUTHORS"),
    about = "Regime-aware trading plans, risk scoring and step-by-step execution",
    long_about = "dexpilot generates trading plans from technical signals, scores them against \
                  per-address risk limits and executes them as ordered contract steps. \
                  All commands run against a simulated paper market."
)]
pub struct CliApp {
    /// The command to execute
    #[command(subcommand)]
    pub command: Command,

    /// Path to configuration file (defaults are used when omitted)
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Generate, validate and risk-assess a plan for a symbol
    Plan(PlanCmd),

    /// Plan, assess, preflight and execute a trade on the paper market
    Execute(ExecuteCmd),

    /// Run the opportunity radar for a while
    Radar(RadarCmd),

    /// Print performance statistics from the tracker store
    Report(ReportCmd),

    /// Write a default configuration file
    InitConfig(InitConfigCmd),
}

#[derive(Parser, Debug)]
pub struct PlanCmd {
    /// Symbol to analyse (e.g., BTC)
    #[arg(value_name = "SYMBOL")]
    pub symbol: String,

    /// Candle timeframe
    #[arg(short, long, default_value = "1h")]
    pub timeframe: Timeframe,

    /// Account address the risk profile belongs to
    #[arg(long, default_value = "paper")]
    pub address: String,

    /// Output format (text, json)
    #[arg(short, long, value_name = "FORMAT", default_value = "text")]
    pub format: String,
}

#[derive(Parser, Debug)]
pub struct ExecuteCmd {
    /// Symbol to trade (e.g., ETH)
    #[arg(value_name = "SYMBOL")]
    pub symbol: String,

    /// Candle timeframe
    #[arg(short, long, default_value = "1h")]
    pub timeframe: Timeframe,

    /// Account address
    #[arg(long, default_value = "paper")]
    pub address: String,

    /// Keep the position open this long, then close it and record the exit
    #[arg(long, value_name = "SECS")]
    pub hold_secs: Option<u64>,
}

#[derive(Parser, Debug)]
pub struct RadarCmd {
    /// How long to scan
    #[arg(short, long, value_name = "SECS", default_value = "60")]
    pub duration: u64,

    /// Paper market tick interval in milliseconds
    #[arg(long, value_name = "MS", default_value = "1000")]
    pub tick_ms: u64,

    /// Symbols to watch instead of the configured list
    #[arg(short, long, value_name = "SYMBOL")]
    pub symbol: Vec<String>,
}

#[derive(Parser, Debug)]
pub struct ReportCmd {
    /// Output format (text, json)
    #[arg(short, long, value_name = "FORMAT", default_value = "text")]
    pub format: String,

    /// Re-derive strategy aggregates from trade records first
    #[arg(long)]
    pub rebuild: bool,
}

#[derive(Parser, Debug)]
pub struct InitConfigCmd {
    /// Where to write the configuration
    #[arg(value_name = "FILE", default_value = "dexpilot.toml")]
    pub path: PathBuf,
}

/// Execute the CLI command
pub async fn execute(app: CliApp) -> Result<()> {
    if let Command::InitConfig(cmd) = &app.command {
        init_logging(app.verbose, app.debug, "warn")?;
        return init_config_command(cmd);
    }

    let config = load_config(app.config.as_deref()).context("Failed to load configuration")?;
    init_logging(app.verbose, app.debug, &config.logging.level)?;

    match app.command {
        Command::Plan(cmd) => plan_command(config, cmd).await,
        Command::Execute(cmd) => execute_command(config, cmd).await,
        Command::Radar(cmd) => radar_command(config, cmd).await,
        Command::Report(cmd) => report_command(config, cmd).await,
        Command::InitConfig(_) => Ok(()),
    }
}

/// Initialize logging system; `RUST_LOG` wins over flags and config
fn init_logging(verbose: bool, debug: bool, configured: &str) -> Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    let level = if debug {
        "debug"
    } else if verbose {
        "info"
    } else {
        configured
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialise logging: {}", e))?;
    Ok(())
}

/// Wire the services to the paper market and the configured storage
pub async fn paper_context(config: AppConfig) -> Result<(AppContext, Arc<PaperMarket>)> {
    let market = Arc::new(PaperMarket::new(PaperConfig {
        starting_balance: config.tracker.starting_capital,
        ..PaperConfig::default()
    }));

    type Stores = (
        Arc<dyn KeyValueStore>,
        Arc<dyn Repository<UserRiskProfile>>,
        Arc<dyn Repository<ExecutionStatus>>,
    );
    let (store, profiles, statuses): Stores = match config.storage.backend {
        StorageBackend::Memory => {
            let store: Arc<dyn KeyValueStore> = Arc::new(InMemoryStore::new());
            let profiles: Arc<dyn Repository<UserRiskProfile>> = Arc::new(InMemoryRepository::<UserRiskProfile>::new());
            let statuses: Arc<dyn Repository<ExecutionStatus>> = Arc::new(InMemoryRepository::<ExecutionStatus>::new());
            (store, profiles, statuses)
        }
        StorageBackend::File => {
            let dir = config.storage.resolved_data_dir()?;
            tracing::info!(dir = %dir.display(), "Using file storage");
            let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(&dir));
            let profiles: Arc<dyn Repository<UserRiskProfile>> =
                Arc::new(JsonFileRepository::<UserRiskProfile>::open(dir.join("risk_profiles.json")).await?);
            let statuses: Arc<dyn Repository<ExecutionStatus>> =
                Arc::new(JsonFileRepository::<ExecutionStatus>::open(dir.join("execution_statuses.json")).await?);
            (store, profiles, statuses)
        }
    };

    let adapters = Adapters {
        feed: market.clone(),
        history: Arc::new(SyntheticHistory::new(PaperConfig::default().seed)),
        gateway: market.clone(),
        notifier: Arc::new(TracingNotifier::new()),
        store,
        profiles,
        statuses,
    };
    let context = AppContext::build(config, adapters)?;
    Ok((context, market))
}

async fn plan_command(config: AppConfig, cmd: PlanCmd) -> Result<()> {
    let (context, market) = paper_context(config).await?;
    let symbol = cmd.symbol.to_uppercase();
    let account = market.account_snapshot(&cmd.address);

    let Some(assessed) = context
        .plan_trade(&cmd.address, &symbol, cmd.timeframe, &account)
        .await
        .with_context(|| format!("Failed to plan {}", symbol))?
    else {
        println!("No strategy produced a qualifying signal for {} ({})", symbol, cmd.timeframe);
        return Ok(());
    };
    let validation = crate::strategy::StrategyEngine::validate_trading_plan(assessed.actionable(), account.balance);

    if cmd.format == "json" {
        let output = serde_json::json!({
            "plan": assessed.plan,
            "validation": validation,
            "assessment": assessed.assessment,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    let plan = &assessed.plan;
    let assessment = &assessed.assessment;
    println!("Plan {} ({})", plan.id, plan.strategy);
    println!("  Action:      {:?} {} @ {:.4}", plan.action, plan.symbol, plan.entry.price);
    println!("  Stop loss:   {:.4} ({:.2}%)", plan.stop_loss.price, plan.stop_loss.percent);
    println!("  Take profit: {:.4} ({:.2}%)", plan.take_profit.price, plan.take_profit.percent);
    println!(
        "  Size:        {:.2} notional, {:.1}x, {:.2} margin",
        plan.position_sizing.notional_size, plan.position_sizing.leverage, plan.position_sizing.margin
    );
    println!("  Regime:      {:?} / {:?}", plan.market_regime.regime_type, plan.market_regime.volatility);
    println!("  Confidence:  {:.1}  R:R {:.2}", plan.confidence, plan.risk_reward);
    println!("Validation: {}", if validation.valid { "valid" } else { "invalid" });
    for error in &validation.errors {
        println!("  error:   {}", error);
    }
    for warning in &validation.warnings {
        println!("  warning: {}", warning);
    }
    println!(
        "Risk: score {:.0}, {}",
        assessment.risk_score,
        if assessment.is_acceptable { "acceptable" } else { "rejected" }
    );
    for violation in &assessment.violations {
        println!("  [{:?}] {}", violation.severity, violation.message);
    }
    for suggestion in &assessment.suggestions {
        println!("  suggestion: {}", suggestion);
    }
    Ok(())
}

async fn execute_command(config: AppConfig, cmd: ExecuteCmd) -> Result<()> {
    let (context, market) = paper_context(config).await?;
    context.tracker.load().await.context("Failed to load tracker state")?;
    let symbol = cmd.symbol.to_uppercase();
    let account = market.account_snapshot(&cmd.address);

    let Some(assessed) = context.plan_trade(&cmd.address, &symbol, cmd.timeframe, &account).await? else {
        println!("No strategy produced a qualifying signal for {} ({})", symbol, cmd.timeframe);
        return Ok(());
    };
    if !assessed.assessment.is_acceptable {
        bail!(
            "Plan {} rejected by risk manager (score {:.0})",
            assessed.plan.id,
            assessed.assessment.risk_score
        );
    }
    let plan = assessed.actionable().clone();

    let status = context.execute_trade(&cmd.address, &plan).await?;
    println!("Execution {}: {:?} ({:.0}%)", status.plan_id, status.status, status.progress);
    for tx in &status.transactions {
        println!("  tx {}", tx);
    }
    if let Some(error) = &status.error {
        println!("  error: {}", error);
    }

    if let (Some(hold), ExecutionState::Completed) = (cmd.hold_secs, status.status) {
        let ticker = market.clone().spawn_ticker(Duration::from_millis(500));
        tokio::time::sleep(Duration::from_secs(hold)).await;
        ticker.abort();

        let closing = plan.closing();
        let close_status = context.execute_trade(&cmd.address, &closing).await?;
        println!("Close {:?}", close_status.status);
        if close_status.status == ExecutionState::Completed {
            let exit = market
                .price(&symbol)
                .with_context(|| format!("No paper quote for {}", symbol))?;
            context
                .tracker
                .record_exit(&plan.id, exit, 0.0, "manual close", Utc::now())
                .await?;
            let pnl = market.account_snapshot(&cmd.address).daily_pnl;
            context.risk_manager.record_trade_result(&cmd.address, pnl).await?;
            println!("  exit {:.4}, realized {:.2}", exit, pnl);
        }
    }

    context.tracker.persist().await.context("Failed to persist tracker state")?;
    Ok(())
}

async fn radar_command(mut config: AppConfig, cmd: RadarCmd) -> Result<()> {
    if !cmd.symbol.is_empty() {
        config.radar.symbols = cmd.symbol.iter().map(|s| s.to_uppercase()).collect();
    }
    let (context, market) = paper_context(config).await?;
    let radar = context.radar.clone();

    let ticker = market.clone().spawn_ticker(Duration::from_millis(cmd.tick_ms.max(10)));
    let runner = tokio::spawn(radar.clone().run());

    tokio::time::sleep(Duration::from_secs(cmd.duration)).await;
    radar.stop().await;
    ticker.abort();
    runner.abort();

    let alerts = radar.alert_history().await;
    println!("{} alert(s) raised", alerts.len());
    for alert in alerts {
        println!(
            "  {} {:?} {:?} {:.0}% - {}",
            alert.timestamp.format("%H:%M:%S"),
            alert.priority,
            alert.alert_type,
            alert.confidence,
            alert.message
        );
    }
    Ok(())
}

async fn report_command(config: AppConfig, cmd: ReportCmd) -> Result<()> {
    let (context, _) = paper_context(config).await?;
    let tracker = &context.tracker;
    if !tracker.load().await? {
        println!("No tracker data stored yet");
        return Ok(());
    }
    if cmd.rebuild {
        tracker.rebuild_strategy_performance(Utc::now()).await;
    }

    if cmd.format == "json" {
        println!("{}", tracker.export_data().await?);
        return Ok(());
    }

    let stats = tracker.overall_stats().await;
    println!("Trades:      {} ({} won, {:.1}%)", stats.total_trades, stats.winning_trades, stats.win_rate);
    println!("Realized:    {:.2}", stats.total_pnl);
    println!("Unrealized:  {:.2} over {} open", stats.unrealized_pnl, stats.open_positions);
    println!("Equity:      {:.2} (peak {:.2}, drawdown {:.2}%)", stats.equity, stats.peak_equity, stats.current_drawdown);
    if let Some(best) = &stats.best_strategy {
        println!("Best:        {}", best);
    }
    for perf in tracker.all_strategy_performance().await {
        println!(
            "  {:<24} {:>4} trades  win {:>5.1}%  pnl {:>10.2}  pf {:>6.2}  streak {:>3}",
            perf.strategy, perf.total_trades, perf.win_rate, perf.total_pnl, perf.profit_factor, perf.current_streak
        );
    }
    for alert in tracker.alerts().await.iter().take(10) {
        println!("  alert {} {}", alert.timestamp.format("%Y-%m-%d %H:%M"), alert.message);
    }
    Ok(())
}

fn init_config_command(cmd: &InitConfigCmd) -> Result<()> {
    write_default_config(&cmd.path).with_context(|| format!("Failed to write {}", cmd.path.display()))?;
    println!("Wrote default configuration to {}", cmd.path.display());
    Ok(())
}
