use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::models::{CloseReason, Owner, PositionId, Side, Symbol};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    Open,
    Closed,
}

/// Trigger condition detected against a position's thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    StopLoss,
    TakeProfit,
}

#[derive(Debug, Error, PartialEq)]
pub enum LedgerError {
    #[error("invalid entry price: {0}")]
    InvalidEntryPrice(f64),
    #[error("invalid quantity: {0}")]
    InvalidQuantity(f64),
}

/// One tracked exposure, from open through close.
///
/// Only the ledger mutates these; everything outside sees clones or
/// borrows. `realized_pnl` is written exactly once, at close.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    pub owner: Owner,
    pub venue: String,
    pub strategy_id: String,
    pub symbol: Symbol,
    pub side: Side,
    pub entry_price: f64,
    pub quantity: f64,
    pub entry_time: DateTime<Utc>,
    pub stop_loss_price: Option<f64>,
    pub take_profit_price: Option<f64>,
    pub current_price: f64,
    pub unrealized_pnl: f64,
    pub realized_pnl: Option<f64>,
    pub status: PositionStatus,
    pub close_reason: Option<CloseReason>,
    pub close_time: Option<DateTime<Utc>>,
}

impl Position {
    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    pub fn notional(&self) -> f64 {
        self.entry_price * self.quantity
    }
}

/// Side-aware PnL: long profits as price rises, short as it falls
fn signed_pnl(side: Side, entry_price: f64, price: f64, quantity: f64) -> f64 {
    match side {
        Side::Long => (price - entry_price) * quantity,
        Side::Short => (entry_price - price) * quantity,
    }
}

/// Aggregate PnL view for one owner
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortfolioPnl {
    pub unrealized_total: f64,
    pub realized_total: f64,
    pub win_rate: f64,
    pub open_positions: usize,
    pub closed_positions: usize,
}

/// Authoritative in-memory table of positions plus owner/symbol indexes.
///
/// All mutation goes through these methods; share behind a mutex so
/// concurrent monitors serialize on the table and its indexes.
#[derive(Debug, Default)]
pub struct PositionLedger {
    positions: HashMap<PositionId, Position>,
    by_owner: HashMap<Owner, Vec<PositionId>>,
    by_symbol: HashMap<Symbol, Vec<PositionId>>,
}

impl PositionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new position, computing stop-loss/take-profit prices from the
    /// percentage inputs. A percentage of zero or less suppresses that
    /// threshold.
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        &mut self,
        owner: Owner,
        venue: &str,
        symbol: Symbol,
        strategy_id: &str,
        side: Side,
        entry_price: f64,
        quantity: f64,
        stop_loss_pct: f64,
        take_profit_pct: f64,
    ) -> Result<Position, LedgerError> {
        self.open_at(
            owner,
            venue,
            symbol,
            strategy_id,
            side,
            entry_price,
            quantity,
            stop_loss_pct,
            take_profit_pct,
            Utc::now(),
        )
    }

    /// Open with an explicit entry timestamp (for tests and replays)
    #[allow(clippy::too_many_arguments)]
    pub fn open_at(
        &mut self,
        owner: Owner,
        venue: &str,
        symbol: Symbol,
        strategy_id: &str,
        side: Side,
        entry_price: f64,
        quantity: f64,
        stop_loss_pct: f64,
        take_profit_pct: f64,
        entry_time: DateTime<Utc>,
    ) -> Result<Position, LedgerError> {
        if !entry_price.is_finite() || entry_price <= 0.0 {
            return Err(LedgerError::InvalidEntryPrice(entry_price));
        }
        if !quantity.is_finite() || quantity <= 0.0 {
            return Err(LedgerError::InvalidQuantity(quantity));
        }

        let (stop_loss_price, take_profit_price) =
            threshold_prices(side, entry_price, stop_loss_pct, take_profit_pct);

        let id = PositionId::generate(&owner, venue, &symbol, strategy_id, entry_time);
        let position = Position {
            id: id.clone(),
            owner: owner.clone(),
            venue: venue.to_string(),
            strategy_id: strategy_id.to_string(),
            symbol: symbol.clone(),
            side,
            entry_price,
            quantity,
            entry_time,
            stop_loss_price,
            take_profit_price,
            current_price: entry_price,
            unrealized_pnl: 0.0,
            realized_pnl: None,
            status: PositionStatus::Open,
            close_reason: None,
            close_time: None,
        };

        self.by_owner.entry(owner).or_default().push(id.clone());
        self.by_symbol.entry(symbol).or_default().push(id.clone());
        self.positions.insert(id, position.clone());

        tracing::info!(
            id = %position.id,
            symbol = %position.symbol,
            side = %position.side,
            entry_price,
            quantity,
            stop_loss = ?position.stop_loss_price,
            take_profit = ?position.take_profit_price,
            "Opened position"
        );

        Ok(position)
    }

    /// Refresh current price and unrealized PnL. No-op if the position is
    /// missing or already closed.
    pub fn update_price(&mut self, id: &PositionId, current_price: f64) {
        if let Some(position) = self.positions.get_mut(id) {
            if position.status != PositionStatus::Open {
                return;
            }
            position.current_price = current_price;
            position.unrealized_pnl = signed_pnl(
                position.side,
                position.entry_price,
                current_price,
                position.quantity,
            );
        }
    }

    /// Evaluate the stored current price against the position's thresholds.
    ///
    /// Read-only: closing is the caller's explicit next step, so a hit can
    /// be logged or notified before any state changes.
    pub fn check_trigger(&self, id: &PositionId) -> Option<TriggerKind> {
        let position = self.positions.get(id)?;
        if position.status != PositionStatus::Open {
            return None;
        }

        let price = position.current_price;
        match position.side {
            Side::Long => {
                if matches!(position.stop_loss_price, Some(sl) if price <= sl) {
                    return Some(TriggerKind::StopLoss);
                }
                if matches!(position.take_profit_price, Some(tp) if price >= tp) {
                    return Some(TriggerKind::TakeProfit);
                }
            }
            Side::Short => {
                if matches!(position.stop_loss_price, Some(sl) if price >= sl) {
                    return Some(TriggerKind::StopLoss);
                }
                if matches!(position.take_profit_price, Some(tp) if price <= tp) {
                    return Some(TriggerKind::TakeProfit);
                }
            }
        }
        None
    }

    /// Close a position, realizing PnL at `close_price`. Returns `false` if
    /// the position is unknown or already closed; a duplicate close never
    /// changes state.
    pub fn close(&mut self, id: &PositionId, close_price: f64, reason: CloseReason) -> bool {
        self.close_at(id, close_price, reason, Utc::now())
    }

    pub fn close_at(
        &mut self,
        id: &PositionId,
        close_price: f64,
        reason: CloseReason,
        close_time: DateTime<Utc>,
    ) -> bool {
        let Some(position) = self.positions.get_mut(id) else {
            return false;
        };
        if position.status == PositionStatus::Closed {
            return false;
        }

        let pnl = signed_pnl(
            position.side,
            position.entry_price,
            close_price,
            position.quantity,
        );

        position.status = PositionStatus::Closed;
        position.current_price = close_price;
        position.unrealized_pnl = 0.0;
        position.realized_pnl = Some(pnl);
        position.close_reason = Some(reason);
        position.close_time = Some(close_time);

        tracing::info!(
            id = %position.id,
            symbol = %position.symbol,
            close_price,
            realized_pnl = pnl,
            reason = %reason,
            "Closed position"
        );
        true
    }

    /// Sum of entry notional over the owner's open positions, optionally
    /// restricted to one symbol
    pub fn total_exposure(&self, owner: &Owner, symbol: Option<&Symbol>) -> f64 {
        self.positions_for_owner(owner)
            .filter(|p| p.is_open())
            .filter(|p| symbol.map_or(true, |s| &p.symbol == s))
            .map(|p| p.notional())
            .sum()
    }

    /// Aggregate PnL across all of the owner's positions. Win rate is 0.0
    /// when nothing has closed yet.
    pub fn portfolio_pnl(&self, owner: &Owner) -> PortfolioPnl {
        let mut unrealized_total = 0.0;
        let mut realized_total = 0.0;
        let mut open_positions = 0;
        let mut closed_positions = 0;
        let mut wins = 0usize;

        for position in self.positions_for_owner(owner) {
            if position.is_open() {
                open_positions += 1;
                unrealized_total += position.unrealized_pnl;
            } else {
                closed_positions += 1;
                let pnl = position.realized_pnl.unwrap_or(0.0);
                realized_total += pnl;
                if pnl > 0.0 {
                    wins += 1;
                }
            }
        }

        let win_rate = if closed_positions > 0 {
            wins as f64 / closed_positions as f64
        } else {
            0.0
        };

        PortfolioPnl {
            unrealized_total,
            realized_total,
            win_rate,
            open_positions,
            closed_positions,
        }
    }

    /// Remove closed positions entered before `now - max_age` from the table
    /// and both indexes. Open positions are never swept, whatever their age.
    pub fn sweep(&mut self, max_age: Duration) -> usize {
        self.sweep_at(max_age, Utc::now())
    }

    pub fn sweep_at(&mut self, max_age: Duration, now: DateTime<Utc>) -> usize {
        let cutoff = now - max_age;
        let stale: Vec<PositionId> = self
            .positions
            .values()
            .filter(|p| p.status == PositionStatus::Closed && p.entry_time < cutoff)
            .map(|p| p.id.clone())
            .collect();

        for id in &stale {
            if let Some(position) = self.positions.remove(id) {
                if let Some(ids) = self.by_owner.get_mut(&position.owner) {
                    ids.retain(|i| i != id);
                }
                if let Some(ids) = self.by_symbol.get_mut(&position.symbol) {
                    ids.retain(|i| i != id);
                }
            }
        }
        self.by_owner.retain(|_, ids| !ids.is_empty());
        self.by_symbol.retain(|_, ids| !ids.is_empty());

        if !stale.is_empty() {
            tracing::info!(removed = stale.len(), "Swept retired positions");
        }
        stale.len()
    }

    pub fn get(&self, id: &PositionId) -> Option<&Position> {
        self.positions.get(id)
    }

    pub fn has_open_position(&self, owner: &Owner, symbol: &Symbol) -> bool {
        self.positions_for_owner(owner)
            .any(|p| p.is_open() && &p.symbol == symbol)
    }

    /// All open positions on a symbol, across owners
    pub fn open_positions_for_symbol(&self, symbol: &Symbol) -> Vec<&Position> {
        self.by_symbol
            .get(symbol)
            .into_iter()
            .flatten()
            .filter_map(|id| self.positions.get(id))
            .filter(|p| p.is_open())
            .collect()
    }

    pub fn positions_for_owner<'a>(
        &'a self,
        owner: &Owner,
    ) -> impl Iterator<Item = &'a Position> + 'a {
        self.by_owner
            .get(owner)
            .into_iter()
            .flatten()
            .filter_map(|id| self.positions.get(id))
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// Threshold prices from percentage offsets; signs invert for shorts
fn threshold_prices(
    side: Side,
    entry_price: f64,
    stop_loss_pct: f64,
    take_profit_pct: f64,
) -> (Option<f64>, Option<f64>) {
    let stop_loss = (stop_loss_pct > 0.0).then(|| match side {
        Side::Long => entry_price * (1.0 - stop_loss_pct / 100.0),
        Side::Short => entry_price * (1.0 + stop_loss_pct / 100.0),
    });
    let take_profit = (take_profit_pct > 0.0).then(|| match side {
        Side::Long => entry_price * (1.0 + take_profit_pct / 100.0),
        Side::Short => entry_price * (1.0 - take_profit_pct / 100.0),
    });
    (stop_loss, take_profit)
}
