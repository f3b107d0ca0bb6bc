use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::Parser;
use tokio::sync::{mpsc, watch};
use tracing_subscriber::EnvFilter;

use signalbot::arbiter::SignalArbiter;
use signalbot::config::BotConfig;
use signalbot::engine::{run_sweeper, DecisionEngine, EngineSettings, MonitorWorker};
use signalbot::feed::RestPriceSource;
use signalbot::ledger::PositionLedger;
use signalbot::models::{Owner, SignalEvent, Symbol};

#[derive(Parser)]
#[command(name = "signalbot", about = "Signal arbitration and position tracking bot")]
struct Cli {
    /// Path to a TOML config file (optional; env vars override)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();
    let config = BotConfig::load(cli.config.as_deref())?;

    tracing::info!("🚀 signalbot starting");
    tracing::info!("📊 Configuration:");
    tracing::info!("  Owner: {}", config.owner);
    tracing::info!("  Venue: {}", config.venue);
    tracing::info!("  Symbols: {}", config.symbols.join(", "));
    tracing::info!("  Poll interval: {}s", config.poll_interval_secs);
    tracing::info!(
        "  Stop-loss: {}%, take-profit: {}%",
        config.stop_loss_pct,
        config.take_profit_pct
    );
    tracing::info!("  Retention: {}h", config.retention_hours);

    let owner = Owner::new(&config.owner);
    let arbiter = Arc::new(Mutex::new(SignalArbiter::new(config.arbiter_config())));
    let ledger = Arc::new(Mutex::new(PositionLedger::new()));
    let engine = Arc::new(DecisionEngine::new(
        arbiter.clone(),
        ledger.clone(),
        EngineSettings {
            owner: owner.clone(),
            venue: config.venue.clone(),
            max_notional: config.max_notional,
            stop_loss_pct: config.stop_loss_pct,
            take_profit_pct: config.take_profit_pct,
        },
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    // Ingest surface: indicator-calculator and webhook collaborators push
    // signals through clones of this sender.
    let (signal_tx, signal_rx) = mpsc::channel::<SignalEvent>(256);

    let mut handles = Vec::new();

    handles.push(tokio::spawn(run_signal_ingest(
        engine.clone(),
        signal_rx,
        shutdown_rx.clone(),
    )));

    for symbol in &config.symbols {
        let worker = MonitorWorker::new(
            Symbol::new(symbol),
            &config.venue,
            &config.timeframe,
            Duration::from_secs(config.poll_interval_secs),
            RestPriceSource::new(&config.feed.base_url),
            ledger.clone(),
        );
        handles.push(tokio::spawn(worker.run(shutdown_rx.clone())));
    }

    handles.push(tokio::spawn(run_sweeper(
        arbiter.clone(),
        ledger.clone(),
        config.retention(),
        Duration::from_secs(config.sweep_interval_secs),
        shutdown_rx.clone(),
    )));

    handles.push(tokio::spawn(run_reporter(
        arbiter.clone(),
        ledger.clone(),
        owner,
        Duration::from_secs(config.report_interval_secs),
        shutdown_rx.clone(),
    )));

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested, stopping workers");
    let _ = shutdown_tx.send(true);
    drop(signal_tx);

    for handle in handles {
        let _ = handle.await;
    }

    tracing::info!("signalbot stopped");
    Ok(())
}

/// Drains the signal channel into the decision engine
async fn run_signal_ingest(
    engine: Arc<DecisionEngine>,
    mut signals: mpsc::Receiver<SignalEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            maybe = signals.recv() => {
                let Some(signal) = maybe else { break };
                match engine.handle_signal(&signal) {
                    Ok(decision) => {
                        tracing::info!(
                            source = %signal.source,
                            symbol = %signal.symbol,
                            direction = %signal.direction,
                            reason = %decision.reason,
                            "Signal processed"
                        );
                    }
                    Err(e) => {
                        // Invalid ledger input; the signal is dropped, the
                        // loop lives on
                        tracing::error!(
                            symbol = %signal.symbol,
                            error = %e,
                            "Failed to apply admitted signal"
                        );
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

/// Periodically logs the reporting surface: portfolio PnL, exposure and
/// admission counters
async fn run_reporter(
    arbiter: Arc<Mutex<SignalArbiter>>,
    ledger: Arc<Mutex<PositionLedger>>,
    owner: Owner,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let (pnl, exposure) = {
                    let ledger = ledger.lock().unwrap();
                    (ledger.portfolio_pnl(&owner), ledger.total_exposure(&owner, None))
                };
                let submissions = arbiter.lock().unwrap().stats().total_submissions();

                tracing::info!(
                    unrealized = pnl.unrealized_total,
                    realized = pnl.realized_total,
                    win_rate = pnl.win_rate,
                    open = pnl.open_positions,
                    closed = pnl.closed_positions,
                    exposure,
                    submissions,
                    "Portfolio report"
                );
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

fn setup_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
