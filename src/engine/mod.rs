// Decision and monitoring module
pub mod monitor;

pub use monitor::{run_sweeper, MonitorWorker};

use std::sync::{Arc, Mutex};

use crate::arbiter::{SignalArbiter, Verdict};
use crate::ledger::PositionLedger;
use crate::models::{CloseReason, Direction, Owner, PositionId, Side, SignalEvent};

/// What the engine did with an admitted signal
#[derive(Debug, Clone, PartialEq)]
pub enum EngineAction {
    Opened { position_id: PositionId },
    Closed { position_ids: Vec<PositionId> },
    Skip,
}

/// Outcome of one signal submission, for logging and notification
#[derive(Debug, Clone)]
pub struct EngineDecision {
    pub verdict: Verdict,
    pub action: EngineAction,
    pub reason: String,
}

/// Account and sizing parameters the engine applies to admitted signals
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub owner: Owner,
    pub venue: String,
    pub max_notional: f64,
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
}

/// Routes signals through arbitration into ledger mutations.
///
/// Holds one lock per logical table and never both at once: arbitration
/// completes and releases before the ledger lock is taken. The admitted
/// decision is logged before the mutation so a recovery pass can spot
/// decisions with no matching position.
pub struct DecisionEngine {
    arbiter: Arc<Mutex<SignalArbiter>>,
    ledger: Arc<Mutex<PositionLedger>>,
    settings: EngineSettings,
}

impl DecisionEngine {
    pub fn new(
        arbiter: Arc<Mutex<SignalArbiter>>,
        ledger: Arc<Mutex<PositionLedger>>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            arbiter,
            ledger,
            settings,
        }
    }

    /// Arbitrate a signal and, if admitted, apply it to the ledger
    pub fn handle_signal(&self, signal: &SignalEvent) -> anyhow::Result<EngineDecision> {
        let verdict = self.arbiter.lock().unwrap().submit(signal);

        let reason = match verdict {
            Verdict::Admit => "admitted".to_string(),
            Verdict::Reject(reason) => {
                return Ok(EngineDecision {
                    verdict,
                    action: EngineAction::Skip,
                    reason: format!("rejected: {}", reason),
                });
            }
        };

        tracing::info!(
            source = %signal.source,
            symbol = %signal.symbol,
            direction = %signal.direction,
            price = signal.price,
            "Admitted signal decision"
        );

        let mut ledger = self.ledger.lock().unwrap();
        match signal.direction {
            Direction::Buy => {
                if ledger.has_open_position(&self.settings.owner, &signal.symbol) {
                    return Ok(EngineDecision {
                        verdict,
                        action: EngineAction::Skip,
                        reason: "already have open position".to_string(),
                    });
                }

                let quantity = self.settings.max_notional / signal.price;
                let position = ledger.open(
                    self.settings.owner.clone(),
                    &self.settings.venue,
                    signal.symbol.clone(),
                    &signal.source.to_string(),
                    Side::Long,
                    signal.price,
                    quantity,
                    self.settings.stop_loss_pct,
                    self.settings.take_profit_pct,
                )?;

                Ok(EngineDecision {
                    verdict,
                    action: EngineAction::Opened {
                        position_id: position.id,
                    },
                    reason,
                })
            }
            Direction::Sell => {
                let ids: Vec<PositionId> = ledger
                    .open_positions_for_symbol(&signal.symbol)
                    .iter()
                    .filter(|p| p.owner == self.settings.owner)
                    .map(|p| p.id.clone())
                    .collect();

                if ids.is_empty() {
                    return Ok(EngineDecision {
                        verdict,
                        action: EngineAction::Skip,
                        reason: "no open position to close".to_string(),
                    });
                }

                for id in &ids {
                    ledger.close(id, signal.price, CloseReason::Signal);
                }

                Ok(EngineDecision {
                    verdict,
                    action: EngineAction::Closed { position_ids: ids },
                    reason,
                })
            }
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }
}
