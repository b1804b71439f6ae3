//! Configuration management for the trailing-stop trader.
//!
//! Loads settings from an optional `config.toml` and `TST_`-prefixed
//! environment variables (e.g. `TST_BROKER__API_KEY`).

use crate::exchange::Direction;
use crate::stream::{StreamRule, TickerPolicy};
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Broker credentials and endpoint
    #[serde(default)]
    pub broker: BrokerConfig,
    /// Draft position defaults
    #[serde(default)]
    pub position: PositionConfig,
    /// Trailing-stop rule applied after opening
    #[serde(default)]
    pub trailing_stop: TrailingStopRule,
    /// Confirmation polling and stop-distance parameters
    #[serde(default)]
    pub execution: ExecutionConfig,
    /// Post stream ingestion
    #[serde(default)]
    pub stream: StreamConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// API key sent as `X-IG-API-KEY`
    #[serde(default)]
    pub api_key: String,
    /// Login identifier
    #[serde(default)]
    pub identifier: String,
    /// Login password
    #[serde(default)]
    pub password: String,
    /// Account whose available balance sizes new positions
    #[serde(default)]
    pub account_id: String,
    /// API root; must match the account type (demo or live)
    #[serde(default = "default_root_endpoint")]
    pub root_endpoint: String,
    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionConfig {
    /// Fraction of leveraged available funds to commit (0.0-1.0)
    #[serde(default = "default_allocation_fraction")]
    pub allocation_fraction: Decimal,
    /// Direction of new positions
    #[serde(default = "default_direction")]
    pub direction: Direction,
    /// Currency code of new positions
    #[serde(default = "default_currency_code")]
    pub currency_code: String,
}

/// Caller-supplied trailing-stop parameters, as fractions of the entry level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrailingStopRule {
    /// Must stay enabled; the risk update always submits a trailing stop
    #[serde(default = "default_true")]
    pub trailing_stop: bool,
    /// Trailing distance as a fraction of entry level
    #[serde(default = "default_trailing_stop_distance")]
    pub trailing_stop_distance: Decimal,
    /// Trailing increment as a fraction of entry level
    #[serde(default = "default_trailing_step")]
    pub trailing_step: Decimal,
    /// Stop level as a multiple of entry level
    #[serde(default = "default_stop_level")]
    pub stop_level: Decimal,
    /// Limit level as a multiple of entry level
    #[serde(default)]
    pub limit_level: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Open-position list polls before giving up on a deal reference
    #[serde(default = "default_poll_attempts")]
    pub poll_attempts: u32,
    /// Base delay between polls; attempt `n` waits `n * interval`
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Absolute price buffer added on top of the broker's minimum stop distance
    #[serde(default = "default_stop_distance_buffer")]
    pub stop_distance_buffer: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Bearer token for the stream API
    #[serde(default)]
    pub bearer_token: String,
    #[serde(default = "default_rules_url")]
    pub rules_url: String,
    #[serde(default = "default_stream_url")]
    pub stream_url: String,
    /// Directory that receives one JSON file per post
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    /// Filter rules installed before streaming
    #[serde(default)]
    pub rules: Vec<StreamRule>,
    #[serde(default)]
    pub ticker_policy: TickerPolicy,
}

// Default value functions
fn default_root_endpoint() -> String {
    "https://demo-api.ig.com/gateway/deal/".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_allocation_fraction() -> Decimal {
    Decimal::new(5, 2) // 0.05
}

fn default_direction() -> Direction {
    Direction::Sell
}

fn default_currency_code() -> String {
    "USD".to_string()
}

fn default_true() -> bool {
    true
}

fn default_trailing_stop_distance() -> Decimal {
    Decimal::new(23, 3) // 0.023
}

fn default_trailing_step() -> Decimal {
    Decimal::new(1, 2) // 0.01
}

fn default_stop_level() -> Decimal {
    Decimal::new(105, 2) // 1.05
}

fn default_poll_attempts() -> u32 {
    5
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_stop_distance_buffer() -> Decimal {
    Decimal::new(20, 0)
}

fn default_rules_url() -> String {
    "https://api.twitter.com/2/tweets/search/stream/rules".to_string()
}

fn default_stream_url() -> String {
    "https://api.twitter.com/2/tweets/search/stream".to_string()
}

fn default_output_dir() -> String {
    "log_twitter".to_string()
}

/// `TST_SECTION__FIELD` environment variables.
fn environment() -> config::Environment {
    config::Environment::with_prefix("TST")
        .prefix_separator("_")
        .separator("__")
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(environment())
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.trailing_stop.trailing_stop,
            "trailing_stop cannot be disabled"
        );

        anyhow::ensure!(
            self.position.allocation_fraction > Decimal::ZERO
                && self.position.allocation_fraction <= Decimal::ONE,
            "allocation_fraction must be between 0 and 1"
        );

        anyhow::ensure!(
            self.trailing_stop.trailing_stop_distance > Decimal::ZERO
                && self.trailing_stop.trailing_step > Decimal::ZERO,
            "trailing_stop_distance and trailing_step must be positive"
        );

        anyhow::ensure!(
            self.trailing_stop.stop_level > Decimal::ZERO,
            "stop_level must be positive"
        );

        anyhow::ensure!(
            self.execution.poll_attempts >= 1,
            "poll_attempts must be at least 1"
        );

        anyhow::ensure!(
            self.execution.stop_distance_buffer >= Decimal::ZERO,
            "stop_distance_buffer must not be negative"
        );

        Ok(())
    }

    /// Validate that broker credentials are present (live trading only).
    pub fn validate_credentials(&self) -> Result<()> {
        let broker = &self.broker;
        anyhow::ensure!(
            !broker.api_key.is_empty()
                && !broker.identifier.is_empty()
                && !broker.password.is_empty()
                && !broker.account_id.is_empty(),
            "broker api_key, identifier, password and account_id are required"
        );
        Ok(())
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            identifier: String::new(),
            password: String::new(),
            account_id: String::new(),
            root_endpoint: default_root_endpoint(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for PositionConfig {
    fn default() -> Self {
        Self {
            allocation_fraction: default_allocation_fraction(),
            direction: default_direction(),
            currency_code: default_currency_code(),
        }
    }
}

impl Default for TrailingStopRule {
    fn default() -> Self {
        Self {
            trailing_stop: default_true(),
            trailing_stop_distance: default_trailing_stop_distance(),
            trailing_step: default_trailing_step(),
            stop_level: default_stop_level(),
            limit_level: None,
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            poll_attempts: default_poll_attempts(),
            poll_interval_ms: default_poll_interval_ms(),
            stop_distance_buffer: default_stop_distance_buffer(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            bearer_token: String::new(),
            rules_url: default_rules_url(),
            stream_url: default_stream_url(),
            output_dir: default_output_dir(),
            rules: Vec::new(),
            ticker_policy: TickerPolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_rule_matches_reference_rule() {
        let rule = TrailingStopRule::default();
        assert!(rule.trailing_stop);
        assert_eq!(rule.trailing_stop_distance, dec!(0.023));
        assert_eq!(rule.trailing_step, dec!(0.01));
        assert_eq!(rule.stop_level, dec!(1.05));
        assert_eq!(rule.limit_level, None);
    }

    #[test]
    fn test_allocation_out_of_range_rejected() {
        let mut config = Config::default();
        config.position.allocation_fraction = dec!(1.5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_disabled_trailing_stop_rejected() {
        let mut config = Config::default();
        config.trailing_stop.trailing_stop = false;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_environment_uses_single_underscore_prefix() {
        let vars: config::Map<String, String> = [
            ("TST_BROKER__ACCOUNT_ID", "ABC123"),
            ("TST_BROKER__API_KEY", "key"),
            ("TST_STREAM__OUTPUT_DIR", "posts"),
            ("OTHER_BROKER__ACCOUNT_ID", "ignored"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let config: Config = config::Config::builder()
            .add_source(environment().source(Some(vars)))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.broker.account_id, "ABC123");
        assert_eq!(config.broker.api_key, "key");
        assert_eq!(config.stream.output_dir, "posts");
    }

    #[test]
    fn test_missing_credentials_rejected() {
        let config = Config::default();
        assert!(config.validate_credentials().is_err());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let toml = r#"
            [broker]
            api_key = "key"
            account_id = "ABC123"

            [trailing_stop]
            trailing_step = 0.02
        "#;
        let config: Config = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.broker.account_id, "ABC123");
        assert_eq!(config.broker.timeout_secs, 30);
        assert_eq!(config.trailing_stop.trailing_step, dec!(0.02));
        assert_eq!(config.trailing_stop.stop_level, dec!(1.05));
        assert_eq!(config.position.direction, Direction::Sell);
        assert_eq!(config.execution.stop_distance_buffer, dec!(20));
    }

    #[test]
    fn test_stream_rules_from_toml() {
        let toml = r#"
            [stream]
            bearer_token = "token"
            ticker_policy = "strict"

            [[stream.rules]]
            value = "from:alice -is:retweet"
            tag = "alice"
        "#;
        let config: Config = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.stream.rules, vec![StreamRule::new("from:alice -is:retweet", "alice")]);
        assert_eq!(config.stream.ticker_policy, TickerPolicy::Strict);
        assert_eq!(config.stream.output_dir, "log_twitter");
        assert!(config.stream.stream_url.ends_with("/search/stream"));
    }
}
