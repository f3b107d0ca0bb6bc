use std::collections::HashMap;

use serde::Serialize;

use crate::models::{SignalSource, Symbol};

/// Running admit/reject tally for one key
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AdmissionCounter {
    pub admitted: u64,
    pub rejected: u64,
}

impl AdmissionCounter {
    pub fn total(&self) -> u64 {
        self.admitted + self.rejected
    }
}

/// Per-source and per-symbol submission counters.
///
/// Every submission is counted, admitted or not, so a dashboard can
/// distinguish a quiet source from a consistently rejected one.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AdmissionStats {
    by_source: HashMap<SignalSource, AdmissionCounter>,
    by_symbol: HashMap<Symbol, AdmissionCounter>,
}

impl AdmissionStats {
    pub fn record(&mut self, source: SignalSource, symbol: &Symbol, admitted: bool) {
        let source_counter = self.by_source.entry(source).or_default();
        let symbol_counter = self.by_symbol.entry(symbol.clone()).or_default();
        if admitted {
            source_counter.admitted += 1;
            symbol_counter.admitted += 1;
        } else {
            source_counter.rejected += 1;
            symbol_counter.rejected += 1;
        }
    }

    pub fn for_source(&self, source: SignalSource) -> AdmissionCounter {
        self.by_source.get(&source).copied().unwrap_or_default()
    }

    pub fn for_symbol(&self, symbol: &Symbol) -> AdmissionCounter {
        self.by_symbol.get(symbol).copied().unwrap_or_default()
    }

    pub fn total_submissions(&self) -> u64 {
        self.by_source.values().map(|c| c.total()).sum()
    }
}
