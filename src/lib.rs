// Core modules
pub mod arbiter;
pub mod config;
pub mod engine;
pub mod feed;
pub mod ledger;
pub mod models;

// Re-export commonly used types
pub use arbiter::{RejectReason, SignalArbiter, Verdict};
pub use ledger::{PositionLedger, TriggerKind};
pub use models::*;

// Error handling
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
