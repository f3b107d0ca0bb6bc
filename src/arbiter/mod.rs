// Signal arbitration module
pub mod stats;

pub use stats::{AdmissionCounter, AdmissionStats};

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};

use crate::models::{Direction, SignalEvent, SignalSource, Symbol};

/// Per-source arbitration policy. Lower priority ordinal = stronger source.
#[derive(Debug, Clone, Deserialize)]
pub struct SourcePolicy {
    pub enabled: bool,
    pub priority: u8,
    pub cooldown_secs: u64,
}

impl SourcePolicy {
    pub fn new(enabled: bool, priority: u8, cooldown_secs: u64) -> Self {
        Self {
            enabled,
            priority,
            cooldown_secs,
        }
    }
}

/// Arbiter configuration: one policy per source plus the symbol allow-list
#[derive(Debug, Clone)]
pub struct ArbiterConfig {
    pub policies: HashMap<SignalSource, SourcePolicy>,
    pub allowed_symbols: HashSet<Symbol>,
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        let mut policies = HashMap::new();
        policies.insert(
            SignalSource::InternalIndicator,
            SourcePolicy::new(true, 0, 300),
        );
        policies.insert(
            SignalSource::ExternalIndicator,
            SourcePolicy::new(true, 1, 300),
        );
        policies.insert(SignalSource::WebhookAlert, SourcePolicy::new(true, 2, 300));

        Self {
            policies,
            allowed_symbols: HashSet::new(),
        }
    }
}

impl ArbiterConfig {
    pub fn allow_symbol(&mut self, raw: &str) {
        self.allowed_symbols.insert(Symbol::new(raw));
    }
}

/// Why a signal was turned away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    InvalidSignal,
    SourceDisabled,
    SymbolNotAllowed,
    Cooldown,
    Outranked,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::InvalidSignal => "invalid-signal",
            RejectReason::SourceDisabled => "source-disabled",
            RejectReason::SymbolNotAllowed => "symbol-not-allowed",
            RejectReason::Cooldown => "cooldown",
            RejectReason::Outranked => "outranked",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Arbitration outcome for one submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Admit,
    Reject(RejectReason),
}

impl Verdict {
    pub fn is_admit(&self) -> bool {
        matches!(self, Verdict::Admit)
    }
}

/// Decides, for each incoming signal, whether it may act.
///
/// Owns its arbitration record table and admission counters; construct one
/// per bot (or per test) instead of sharing globals. Callers that share an
/// arbiter across tasks wrap it in a mutex, which also makes the
/// admit-then-record step atomic per submission.
pub struct SignalArbiter {
    config: ArbiterConfig,
    // (symbol, direction) -> last accepted time per source
    records: HashMap<(Symbol, Direction), HashMap<SignalSource, DateTime<Utc>>>,
    stats: AdmissionStats,
}

impl SignalArbiter {
    pub fn new(config: ArbiterConfig) -> Self {
        Self {
            config,
            records: HashMap::new(),
            stats: AdmissionStats::default(),
        }
    }

    /// Arbitrate one signal against policy, cooldown and cross-source priority
    pub fn submit(&mut self, signal: &SignalEvent) -> Verdict {
        self.submit_at(signal, Utc::now())
    }

    /// Arbitrate with an explicit clock (for tests and replays)
    pub fn submit_at(&mut self, signal: &SignalEvent, now: DateTime<Utc>) -> Verdict {
        let verdict = self.evaluate(signal, now);

        self.stats
            .record(signal.source, &signal.symbol, verdict.is_admit());

        if verdict.is_admit() {
            // Record before returning so no later submission under the same
            // lock can observe an admitted signal without its record.
            self.records
                .entry((signal.symbol.clone(), signal.direction))
                .or_default()
                .insert(signal.source, now);

            tracing::debug!(
                source = %signal.source,
                symbol = %signal.symbol,
                direction = %signal.direction,
                "Signal admitted"
            );
        } else if let Verdict::Reject(reason) = verdict {
            tracing::debug!(
                source = %signal.source,
                symbol = %signal.symbol,
                direction = %signal.direction,
                reason = %reason,
                "Signal rejected"
            );
        }

        verdict
    }

    fn evaluate(&self, signal: &SignalEvent, now: DateTime<Utc>) -> Verdict {
        if !signal.is_valid() {
            return Verdict::Reject(RejectReason::InvalidSignal);
        }

        // A disabled source is rejected before any symbol or timing check
        let policy = match self.config.policies.get(&signal.source) {
            Some(p) if p.enabled => p,
            _ => return Verdict::Reject(RejectReason::SourceDisabled),
        };

        if !self.config.allowed_symbols.contains(&signal.symbol) {
            return Verdict::Reject(RejectReason::SymbolNotAllowed);
        }

        let key = (signal.symbol.clone(), signal.direction);
        if let Some(per_source) = self.records.get(&key) {
            // Cooldown: same (symbol, direction, source) accepted too recently
            if let Some(&last) = per_source.get(&signal.source) {
                if Self::within_window(last, now, policy.cooldown_secs) {
                    return Verdict::Reject(RejectReason::Cooldown);
                }
            }

            // Priority conflict: a strictly stronger enabled source holds an
            // unexpired record for the same (symbol, direction). Equal
            // priority never blocks.
            for (other_source, &last) in per_source {
                if *other_source == signal.source {
                    continue;
                }
                let other_policy = match self.config.policies.get(other_source) {
                    Some(p) if p.enabled => p,
                    _ => continue,
                };
                if other_policy.priority < policy.priority
                    && Self::within_window(last, now, other_policy.cooldown_secs)
                {
                    return Verdict::Reject(RejectReason::Outranked);
                }
            }
        }

        Verdict::Admit
    }

    fn within_window(last: DateTime<Utc>, now: DateTime<Utc>, window_secs: u64) -> bool {
        now.signed_duration_since(last) < Duration::seconds(window_secs as i64)
    }

    /// Drop arbitration records older than `max_age`. The only deletion path
    /// for the record table.
    pub fn sweep_records(&mut self, max_age: Duration) -> usize {
        self.sweep_records_at(max_age, Utc::now())
    }

    pub fn sweep_records_at(&mut self, max_age: Duration, now: DateTime<Utc>) -> usize {
        let cutoff = now - max_age;
        let mut removed = 0;

        for per_source in self.records.values_mut() {
            let before = per_source.len();
            per_source.retain(|_, &mut last| last >= cutoff);
            removed += before - per_source.len();
        }
        self.records.retain(|_, per_source| !per_source.is_empty());

        if removed > 0 {
            tracing::debug!(removed, "Swept stale arbitration records");
        }
        removed
    }

    pub fn stats(&self) -> &AdmissionStats {
        &self.stats
    }

    pub fn config(&self) -> &ArbiterConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Direction;

    fn test_config() -> ArbiterConfig {
        let mut config = ArbiterConfig::default();
        config.allow_symbol("BTC/USDT");
        config.allow_symbol("ETH/USDT");
        config
    }

    fn signal(source: SignalSource, symbol: &str, direction: Direction) -> SignalEvent {
        SignalEvent::new(source, symbol, direction, 50_000.0)
    }

    #[test]
    fn test_admit_allowed_symbol() {
        let mut arbiter = SignalArbiter::new(test_config());
        let s = signal(SignalSource::InternalIndicator, "BTC/USDT", Direction::Buy);
        assert_eq!(arbiter.submit(&s), Verdict::Admit);
    }

    #[test]
    fn test_reject_symbol_not_allowed() {
        let mut arbiter = SignalArbiter::new(test_config());
        let s = signal(SignalSource::InternalIndicator, "DOGE/USDT", Direction::Buy);
        assert_eq!(
            arbiter.submit(&s),
            Verdict::Reject(RejectReason::SymbolNotAllowed)
        );
    }

    #[test]
    fn test_symbol_variants_share_one_allowlist_key() {
        let mut arbiter = SignalArbiter::new(test_config());
        let s = signal(SignalSource::InternalIndicator, "btc-usdt", Direction::Buy);
        assert_eq!(arbiter.submit(&s), Verdict::Admit);
    }

    #[test]
    fn test_disabled_source_always_rejected() {
        let mut config = test_config();
        config
            .policies
            .get_mut(&SignalSource::WebhookAlert)
            .unwrap()
            .enabled = false;
        let mut arbiter = SignalArbiter::new(config);

        // Disallowed symbol, allowed symbol, repeated submissions: always
        // source-disabled, never any other reason.
        for symbol in ["BTC/USDT", "DOGE/USDT", "BTC/USDT"] {
            let s = signal(SignalSource::WebhookAlert, symbol, Direction::Buy);
            assert_eq!(
                arbiter.submit(&s),
                Verdict::Reject(RejectReason::SourceDisabled)
            );
        }
    }

    #[test]
    fn test_invalid_signal_rejected_without_record() {
        let mut arbiter = SignalArbiter::new(test_config());
        let bad = SignalEvent::new(SignalSource::InternalIndicator, "", Direction::Buy, 1.0);
        assert_eq!(
            arbiter.submit(&bad),
            Verdict::Reject(RejectReason::InvalidSignal)
        );
        assert!(arbiter.records.is_empty());

        let bad_price = SignalEvent::new(
            SignalSource::InternalIndicator,
            "BTC/USDT",
            Direction::Buy,
            -5.0,
        );
        assert_eq!(
            arbiter.submit(&bad_price),
            Verdict::Reject(RejectReason::InvalidSignal)
        );
        assert!(arbiter.records.is_empty());
    }

    #[test]
    fn test_cooldown_blocks_then_expires() {
        let mut arbiter = SignalArbiter::new(test_config());
        let s = signal(SignalSource::InternalIndicator, "BTC/USDT", Direction::Buy);
        let t0 = Utc::now();

        assert_eq!(arbiter.submit_at(&s, t0), Verdict::Admit);
        assert_eq!(
            arbiter.submit_at(&s, t0 + Duration::seconds(10)),
            Verdict::Reject(RejectReason::Cooldown)
        );
        // Default cooldown is 300s
        assert_eq!(
            arbiter.submit_at(&s, t0 + Duration::seconds(301)),
            Verdict::Admit
        );
    }

    #[test]
    fn test_cooldown_is_per_direction_and_source() {
        let mut arbiter = SignalArbiter::new(test_config());
        let t0 = Utc::now();

        let buy = signal(SignalSource::WebhookAlert, "BTC/USDT", Direction::Buy);
        let sell = signal(SignalSource::WebhookAlert, "BTC/USDT", Direction::Sell);

        assert_eq!(arbiter.submit_at(&buy, t0), Verdict::Admit);
        // Opposite direction is a different tuple, no cooldown hit
        assert_eq!(
            arbiter.submit_at(&sell, t0 + Duration::seconds(1)),
            Verdict::Admit
        );
    }

    #[test]
    fn test_higher_priority_outranks_within_its_cooldown() {
        let mut arbiter = SignalArbiter::new(test_config());
        let t0 = Utc::now();

        // Internal (priority 0) admitted first
        let strong = signal(SignalSource::InternalIndicator, "BTC/USDT", Direction::Buy);
        assert_eq!(arbiter.submit_at(&strong, t0), Verdict::Admit);

        // Webhook (priority 2) within internal's cooldown: outranked
        let weak = signal(SignalSource::WebhookAlert, "BTC/USDT", Direction::Buy);
        assert_eq!(
            arbiter.submit_at(&weak, t0 + Duration::seconds(5)),
            Verdict::Reject(RejectReason::Outranked)
        );

        // After internal's cooldown expires, the weaker source may act
        assert_eq!(
            arbiter.submit_at(&weak, t0 + Duration::seconds(301)),
            Verdict::Admit
        );
    }

    #[test]
    fn test_lower_priority_never_blocks_stronger_source() {
        let mut arbiter = SignalArbiter::new(test_config());
        let t0 = Utc::now();

        let weak = signal(SignalSource::WebhookAlert, "ETH/USDT", Direction::Sell);
        assert_eq!(arbiter.submit_at(&weak, t0), Verdict::Admit);

        let strong = signal(SignalSource::InternalIndicator, "ETH/USDT", Direction::Sell);
        assert_eq!(
            arbiter.submit_at(&strong, t0 + Duration::seconds(5)),
            Verdict::Admit
        );
    }

    #[test]
    fn test_equal_priority_sources_do_not_block_each_other() {
        let mut config = test_config();
        config
            .policies
            .get_mut(&SignalSource::ExternalIndicator)
            .unwrap()
            .priority = 0;
        let mut arbiter = SignalArbiter::new(config);
        let t0 = Utc::now();

        let a = signal(SignalSource::InternalIndicator, "BTC/USDT", Direction::Buy);
        let b = signal(SignalSource::ExternalIndicator, "BTC/USDT", Direction::Buy);

        assert_eq!(arbiter.submit_at(&a, t0), Verdict::Admit);
        assert_eq!(
            arbiter.submit_at(&b, t0 + Duration::seconds(1)),
            Verdict::Admit
        );
    }

    #[test]
    fn test_disabled_source_record_does_not_outrank() {
        let mut config = test_config();
        let mut arbiter = SignalArbiter::new(config.clone());
        let t0 = Utc::now();

        let strong = signal(SignalSource::InternalIndicator, "BTC/USDT", Direction::Buy);
        assert_eq!(arbiter.submit_at(&strong, t0), Verdict::Admit);

        // Disable the stronger source after it left a record; its stale
        // record must no longer block anyone.
        config
            .policies
            .get_mut(&SignalSource::InternalIndicator)
            .unwrap()
            .enabled = false;
        let mut arbiter = {
            let mut fresh = SignalArbiter::new(config);
            fresh.records = arbiter.records.clone();
            fresh
        };

        let weak = signal(SignalSource::WebhookAlert, "BTC/USDT", Direction::Buy);
        assert_eq!(
            arbiter.submit_at(&weak, t0 + Duration::seconds(5)),
            Verdict::Admit
        );
    }

    #[test]
    fn test_stats_count_every_submission() {
        let mut arbiter = SignalArbiter::new(test_config());
        let t0 = Utc::now();
        let s = signal(SignalSource::InternalIndicator, "BTC/USDT", Direction::Buy);

        arbiter.submit_at(&s, t0);
        arbiter.submit_at(&s, t0 + Duration::seconds(1)); // cooldown reject

        let counter = arbiter.stats().for_source(SignalSource::InternalIndicator);
        assert_eq!(counter.admitted, 1);
        assert_eq!(counter.rejected, 1);
        assert_eq!(arbiter.stats().for_symbol(&Symbol::new("BTC/USDT")).total(), 2);
    }

    #[test]
    fn test_sweep_records() {
        let mut arbiter = SignalArbiter::new(test_config());
        let t0 = Utc::now();

        let s = signal(SignalSource::InternalIndicator, "BTC/USDT", Direction::Buy);
        arbiter.submit_at(&s, t0);

        // Not old enough yet
        let removed = arbiter.sweep_records_at(Duration::hours(1), t0 + Duration::minutes(30));
        assert_eq!(removed, 0);

        let removed = arbiter.sweep_records_at(Duration::hours(1), t0 + Duration::hours(2));
        assert_eq!(removed, 1);
        assert!(arbiter.records.is_empty());
    }
}
