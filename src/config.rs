//! Configuration management for the port-relay application.
//!
//! The configuration file is YAML (which also accepts JSON). It is either a
//! bare list of rule records or a mapping with `logging`, `timeouts` and
//! `rules` sections. Every section falls back to its defaults.

use crate::error::{ForwardError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Log output format.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable pretty format.
    #[default]
    Pretty,
    /// Compact single-line format.
    Compact,
    /// JSON format for structured logging.
    Json,
}

/// Logging configuration section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    pub level: String,

    /// Output destination: stdout, stderr, or file path.
    pub output: String,

    /// Log format.
    pub format: LogFormat,

    /// Include timestamps in logs.
    pub timestamps: bool,

    /// Include target (module path) in logs.
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            output: "stdout".to_string(),
            format: LogFormat::Pretty,
            timestamps: true,
            include_target: true,
        }
    }
}

/// Timeout and interval section, all values in seconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Absolute lifetime of one relayed TCP connection.
    pub relay_lifetime: u64,

    /// Deadline for one UDP request/response exchange with the target.
    pub udp_round_trip: u64,

    /// Per-read deadline of the UDP receive loop.
    pub udp_read_deadline: u64,

    /// Re-check interval for targets that are already numeric.
    pub resolve_numeric: u64,

    /// Wait after a failed lookup.
    pub resolve_retry: u64,

    /// Wait after a successful lookup.
    pub resolve_refresh: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            relay_lifetime: 1200,
            udp_round_trip: 15,
            udp_read_deadline: 1,
            resolve_numeric: 60,
            resolve_retry: 5,
            resolve_refresh: 1,
        }
    }
}

impl TimeoutConfig {
    fn validate(&self) -> Result<()> {
        let fields = [
            ("relay_lifetime", self.relay_lifetime),
            ("udp_round_trip", self.udp_round_trip),
            ("udp_read_deadline", self.udp_read_deadline),
            ("resolve_numeric", self.resolve_numeric),
            ("resolve_retry", self.resolve_retry),
            ("resolve_refresh", self.resolve_refresh),
        ];
        for (name, value) in fields {
            if value == 0 {
                return Err(ForwardError::config_validation(format!(
                    "timeouts.{} must be greater than zero",
                    name
                )));
            }
        }
        Ok(())
    }
}

/// Runtime form of [`TimeoutConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub relay_lifetime: Duration,
    pub udp_round_trip: Duration,
    pub udp_read_deadline: Duration,
    pub resolve_numeric: Duration,
    pub resolve_retry: Duration,
    pub resolve_refresh: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self::from(&TimeoutConfig::default())
    }
}

impl From<&TimeoutConfig> for Timeouts {
    fn from(cfg: &TimeoutConfig) -> Self {
        Self {
            relay_lifetime: Duration::from_secs(cfg.relay_lifetime),
            udp_round_trip: Duration::from_secs(cfg.udp_round_trip),
            udp_read_deadline: Duration::from_secs(cfg.udp_read_deadline),
            resolve_numeric: Duration::from_secs(cfg.resolve_numeric),
            resolve_retry: Duration::from_secs(cfg.resolve_retry),
            resolve_refresh: Duration::from_secs(cfg.resolve_refresh),
        }
    }
}

/// One forwarding record as it appears in the configuration.
///
/// Addresses are kept as raw strings here; splitting them is the
/// dispatcher's job so that one bad record does not reject the file.
/// A missing address reads as empty and is rejected there.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleConfig {
    /// Local `host:port` to listen on.
    #[serde(default)]
    pub listen: String,

    /// Remote `host:port` to forward to.
    #[serde(default)]
    pub forward: String,

    /// "tcp", "udp", or absent for both.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proto: Option<String>,

    /// Maximum in-flight connections/datagrams for this rule.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<usize>,
}

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Logging configuration.
    pub logging: LoggingConfig,

    /// Timeouts and resolver intervals.
    pub timeouts: TimeoutConfig,

    /// Forwarding rules, in order.
    pub rules: Vec<RuleConfig>,
}

impl AppConfig {
    /// Loads configuration from a YAML or JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ForwardError::ConfigNotFound {
                path: path.display().to_string(),
            });
        }

        let contents = fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parses and validates configuration text.
    pub fn parse(contents: &str) -> Result<Self> {
        let document: serde_yaml::Value =
            serde_yaml::from_str(contents).map_err(|e| ForwardError::config_parse(e.to_string()))?;

        let config = match document {
            serde_yaml::Value::Null => AppConfig::default(),
            serde_yaml::Value::Sequence(records) => AppConfig {
                rules: serde_yaml::from_value(serde_yaml::Value::Sequence(records))
                    .map_err(|e| ForwardError::config_parse(e.to_string()))?,
                ..Default::default()
            },
            other => serde_yaml::from_value(other)
                .map_err(|e| ForwardError::config_parse(e.to_string()))?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Builds the configuration for single-rule mode.
    pub fn single_rule(listen: String, forward: String, proto: Option<String>) -> Self {
        Self {
            rules: vec![RuleConfig {
                listen,
                forward,
                proto,
                max_connections: None,
            }],
            ..Default::default()
        }
    }

    /// Validates the configuration.
    ///
    /// Rule addresses are not checked here; see [`crate::dispatcher`].
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(ForwardError::config_validation(format!(
                "Invalid log level: {}. Must be one of: {:?}",
                self.logging.level, valid_levels
            )));
        }

        self.timeouts.validate()?;

        if let Some(index) = self
            .rules
            .iter()
            .position(|r| r.max_connections == Some(0))
        {
            return Err(ForwardError::config_validation(format!(
                "rules[{}].max_connections must be greater than zero",
                index
            )));
        }

        Ok(())
    }
}
