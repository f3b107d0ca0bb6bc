use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Normalized instrument identifier.
///
/// All signal and ledger lookups key on the canonical form: trimmed,
/// ASCII-uppercased, with `-` and `_` rewritten to `/`. "btc-usdt",
/// "BTC_USDT" and "BTC/USDT" are the same symbol.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Symbol(String);

// Canonicalize on the way in so deserialized symbols and constructed
// symbols always agree on the key form
impl<'de> Deserialize<'de> for Symbol {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(Symbol::new(&raw))
    }
}

impl Symbol {
    pub fn new(raw: &str) -> Self {
        let canonical: String = raw
            .trim()
            .chars()
            .map(|c| match c {
                '-' | '_' => '/',
                c => c.to_ascii_uppercase(),
            })
            .collect();
        Self(canonical)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Account that owns positions in the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Owner(String);

impl Owner {
    pub fn new(raw: &str) -> Self {
        Self(raw.trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unique position key: owner + venue + symbol + strategy + entry time,
/// plus a uuid fragment so two opens in the same instant never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PositionId(String);

impl PositionId {
    pub fn generate(
        owner: &Owner,
        venue: &str,
        symbol: &Symbol,
        strategy_id: &str,
        entry_time: DateTime<Utc>,
    ) -> Self {
        let tag = Uuid::new_v4().simple().to_string();
        Self(format!(
            "{}:{}:{}:{}:{}:{}",
            owner,
            venue,
            symbol.as_str().replace('/', ""),
            strategy_id,
            entry_time.timestamp_millis(),
            &tag[..8]
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PositionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a signal came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalSource {
    InternalIndicator,
    ExternalIndicator,
    WebhookAlert,
}

impl SignalSource {
    pub const ALL: [SignalSource; 3] = [
        SignalSource::InternalIndicator,
        SignalSource::ExternalIndicator,
        SignalSource::WebhookAlert,
    ];
}

impl fmt::Display for SignalSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SignalSource::InternalIndicator => "internal_indicator",
            SignalSource::ExternalIndicator => "external_indicator",
            SignalSource::WebhookAlert => "webhook_alert",
        };
        f.write_str(s)
    }
}

/// Direction of a trading signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Buy,
    Sell,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Buy => f.write_str("buy"),
            Direction::Sell => f.write_str("sell"),
        }
    }
}

/// Side of an open exposure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Long,
    Short,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Long => f.write_str("long"),
            Side::Short => f.write_str("short"),
        }
    }
}

/// Why a position was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    StopLoss,
    TakeProfit,
    Signal,
    Manual,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CloseReason::StopLoss => "stop_loss",
            CloseReason::TakeProfit => "take_profit",
            CloseReason::Signal => "signal",
            CloseReason::Manual => "manual",
        };
        f.write_str(s)
    }
}

/// A directional trading suggestion from one source at one point in time.
/// Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalEvent {
    pub source: SignalSource,
    pub symbol: Symbol,
    pub direction: Direction,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
}

impl SignalEvent {
    pub fn new(source: SignalSource, symbol: &str, direction: Direction, price: f64) -> Self {
        Self {
            source,
            symbol: Symbol::new(symbol),
            direction,
            price,
            timestamp: Utc::now(),
        }
    }

    /// A signal is usable if it names an instrument and carries a real price
    pub fn is_valid(&self) -> bool {
        !self.symbol.is_empty() && self.price.is_finite() && self.price > 0.0
    }
}

/// One market price sample
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceTick {
    pub symbol: Symbol,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
}
