use std::path::Path;

use anyhow::Context;
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::arbiter::{ArbiterConfig, SourcePolicy};
use crate::models::SignalSource;

/// Full configuration surface of the bot.
///
/// Loaded from an optional TOML file with `SIGNALBOT__`-prefixed environment
/// overrides (e.g. `SIGNALBOT__ARBITER__COOLDOWN_SECS=60`). Every field has
/// a default so the bot starts with no config file at all.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub owner: String,
    pub venue: String,
    pub symbols: Vec<String>,
    pub timeframe: String,
    pub poll_interval_secs: u64,
    /// Default stop-loss offset in percent; 0 disables the threshold
    pub stop_loss_pct: f64,
    /// Default take-profit offset in percent; 0 disables the threshold
    pub take_profit_pct: f64,
    /// Entry notional per admitted open, in quote currency
    pub max_notional: f64,
    /// Closed positions older than this are swept from the ledger
    pub retention_hours: u64,
    pub sweep_interval_secs: u64,
    pub report_interval_secs: u64,
    pub feed: FeedConfig,
    pub arbiter: ArbiterSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ArbiterSettings {
    /// Fallback cooldown for sources that do not set their own
    pub cooldown_secs: u64,
    /// Instruments signals may act on, in any notational variant
    pub allowed_symbols: Vec<String>,
    pub sources: SourceSettings,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SourceSettings {
    pub internal_indicator: SourceToggle,
    pub external_indicator: SourceToggle,
    pub webhook_alert: SourceToggle,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceToggle {
    pub enabled: bool,
    pub priority: Option<u8>,
    pub cooldown_secs: Option<u64>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            owner: "default".to_string(),
            venue: "binance".to_string(),
            symbols: vec!["BTC/USDT".to_string(), "ETH/USDT".to_string()],
            timeframe: "1m".to_string(),
            poll_interval_secs: 5,
            stop_loss_pct: 5.0,
            take_profit_pct: 10.0,
            max_notional: 1_000.0,
            retention_hours: 24,
            sweep_interval_secs: 3_600,
            report_interval_secs: 60,
            feed: FeedConfig::default(),
            arbiter: ArbiterSettings::default(),
        }
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
        }
    }
}

impl Default for ArbiterSettings {
    fn default() -> Self {
        Self {
            cooldown_secs: 300,
            allowed_symbols: vec!["BTC/USDT".to_string(), "ETH/USDT".to_string()],
            sources: SourceSettings::default(),
        }
    }
}

impl Default for SourceToggle {
    fn default() -> Self {
        Self {
            enabled: true,
            priority: None,
            cooldown_secs: None,
        }
    }
}

impl BotConfig {
    /// Load configuration: defaults, then the optional file, then
    /// environment overrides
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        let settings = builder
            .add_source(
                Environment::with_prefix("SIGNALBOT")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()
            .context("failed to assemble configuration")?;

        settings
            .try_deserialize()
            .context("failed to deserialize configuration")
    }

    /// Translate the serde-facing settings into the arbiter's typed config.
    /// Priorities default to internal (0) < external (1) < webhook (2);
    /// unset cooldowns fall back to the shared `cooldown_secs`.
    pub fn arbiter_config(&self) -> ArbiterConfig {
        let fallback = self.arbiter.cooldown_secs;
        let toggle = |t: &SourceToggle, default_priority: u8| {
            SourcePolicy::new(
                t.enabled,
                t.priority.unwrap_or(default_priority),
                t.cooldown_secs.unwrap_or(fallback),
            )
        };

        let mut config = ArbiterConfig::default();
        config.policies.insert(
            SignalSource::InternalIndicator,
            toggle(&self.arbiter.sources.internal_indicator, 0),
        );
        config.policies.insert(
            SignalSource::ExternalIndicator,
            toggle(&self.arbiter.sources.external_indicator, 1),
        );
        config.policies.insert(
            SignalSource::WebhookAlert,
            toggle(&self.arbiter.sources.webhook_alert, 2),
        );

        config.allowed_symbols.clear();
        for symbol in &self.arbiter.allowed_symbols {
            config.allow_symbol(symbol);
        }
        config
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::hours(self.retention_hours as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Symbol;
    use config::FileFormat;

    #[test]
    fn test_defaults_are_usable() {
        let config = BotConfig::default();
        assert!(config.poll_interval_secs > 0);
        assert!(config.max_notional > 0.0);

        let arbiter = config.arbiter_config();
        assert!(arbiter.allowed_symbols.contains(&Symbol::new("BTC/USDT")));
        let internal = &arbiter.policies[&SignalSource::InternalIndicator];
        let webhook = &arbiter.policies[&SignalSource::WebhookAlert];
        assert!(internal.priority < webhook.priority);
        assert_eq!(internal.cooldown_secs, 300);
    }

    #[test]
    fn test_toml_overrides() {
        let toml = r#"
            owner = "desk-7"
            stop_loss_pct = 3.5
            retention_hours = 48

            [arbiter]
            cooldown_secs = 120
            allowed_symbols = ["sol-usdt"]

            [arbiter.sources.webhook_alert]
            enabled = false

            [arbiter.sources.external_indicator]
            enabled = true
            priority = 5
            cooldown_secs = 30
        "#;

        let config: BotConfig = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.owner, "desk-7");
        assert_eq!(config.stop_loss_pct, 3.5);
        assert_eq!(config.retention(), chrono::Duration::hours(48));
        // Untouched fields keep defaults
        assert_eq!(config.venue, "binance");

        let arbiter = config.arbiter_config();
        assert!(!arbiter.policies[&SignalSource::WebhookAlert].enabled);
        assert_eq!(
            arbiter.policies[&SignalSource::ExternalIndicator].priority,
            5
        );
        assert_eq!(
            arbiter.policies[&SignalSource::ExternalIndicator].cooldown_secs,
            30
        );
        // Internal falls back to the shared cooldown
        assert_eq!(
            arbiter.policies[&SignalSource::InternalIndicator].cooldown_secs,
            120
        );
        // Allow-list replaced and canonicalized
        assert_eq!(arbiter.allowed_symbols.len(), 1);
        assert!(arbiter.allowed_symbols.contains(&Symbol::new("SOL/USDT")));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = BotConfig::load(Some(Path::new("/nonexistent/signalbot.toml")));
        assert!(result.is_err());
    }
}
