use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use crate::arbiter::SignalArbiter;
use crate::feed::PriceSource;
use crate::ledger::{PositionLedger, TriggerKind};
use crate::models::{CloseReason, PositionId, PriceTick, Symbol};

/// One polling loop per monitored (venue, symbol, timeframe) combination.
///
/// Each cycle fetches a price, refreshes every open position on the symbol
/// and closes the ones whose stop-loss/take-profit triggered. A failed
/// fetch skips the cycle; the worker never dies on upstream errors.
/// Workers interact only through the shared ledger, so independent symbols
/// proceed in parallel.
pub struct MonitorWorker<P: PriceSource> {
    symbol: Symbol,
    venue: String,
    timeframe: String,
    poll_interval: Duration,
    source: P,
    ledger: Arc<Mutex<PositionLedger>>,
}

impl<P: PriceSource> MonitorWorker<P> {
    pub fn new(
        symbol: Symbol,
        venue: &str,
        timeframe: &str,
        poll_interval: Duration,
        source: P,
        ledger: Arc<Mutex<PositionLedger>>,
    ) -> Self {
        Self {
            symbol,
            venue: venue.to_string(),
            timeframe: timeframe.to_string(),
            poll_interval,
            source,
            ledger,
        }
    }

    /// Run until the shutdown flag flips. A tick in progress finishes its
    /// ledger mutation before the loop observes the flag, so no position is
    /// left half-updated.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            symbol = %self.symbol,
            venue = %self.venue,
            timeframe = %self.timeframe,
            interval_secs = self.poll_interval.as_secs(),
            "Monitor worker started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.source.fetch_price(&self.symbol).await {
                        Ok(tick) => self.apply_tick(&tick),
                        Err(e) => {
                            tracing::warn!(
                                symbol = %self.symbol,
                                error = %e,
                                "Price fetch failed, skipping cycle"
                            );
                        }
                    }
                }
                changed = shutdown.changed() => {
                    // A dropped sender counts as shutdown
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!(symbol = %self.symbol, "Monitor worker stopped");
    }

    fn apply_tick(&self, tick: &PriceTick) {
        let mut ledger = self.ledger.lock().unwrap();

        let ids: Vec<PositionId> = ledger
            .open_positions_for_symbol(&self.symbol)
            .iter()
            .map(|p| p.id.clone())
            .collect();

        for id in ids {
            ledger.update_price(&id, tick.price);

            if let Some(trigger) = ledger.check_trigger(&id) {
                let reason = match trigger {
                    TriggerKind::StopLoss => CloseReason::StopLoss,
                    TriggerKind::TakeProfit => CloseReason::TakeProfit,
                };
                // Log before mutating so the hit is visible even if the
                // close itself is lost to a crash.
                tracing::info!(
                    id = %id,
                    symbol = %self.symbol,
                    price = tick.price,
                    reason = %reason,
                    "Trigger hit, closing position"
                );
                ledger.close(&id, tick.price, reason);
            }
        }
    }
}

/// Periodically retires aged closed positions and stale arbitration records
pub async fn run_sweeper(
    arbiter: Arc<Mutex<SignalArbiter>>,
    ledger: Arc<Mutex<PositionLedger>>,
    retention: chrono::Duration,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let positions = ledger.lock().unwrap().sweep(retention);
                let records = arbiter.lock().unwrap().sweep_records(retention);
                if positions > 0 || records > 0 {
                    tracing::info!(positions, records, "Retention sweep complete");
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
