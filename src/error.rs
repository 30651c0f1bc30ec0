//! Error types for the port-relay application.
//!
//! Fatal startup errors carry a distinct process exit code (see
//! [`ForwardError::exit_code`]). Per-rule and per-connection errors use the
//! same type but are only logged by their owning loop.

use thiserror::Error;

/// Main error type for the port-relay application.
#[derive(Error, Debug)]
pub enum ForwardError {
    /// Configuration file could not be found.
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    /// Configuration validation failed.
    #[error("Invalid configuration: {message}")]
    ConfigValidation { message: String },

    /// The configuration contains no rules at all.
    #[error("Configuration contains no forwarding rules")]
    EmptyRuleSet,

    /// Every configured rule was rejected during validation.
    #[error("None of the {count} configured rules is valid")]
    NoValidRules { count: usize },

    /// Single-rule mode without both addresses.
    #[error("Both --listen and --forward are required when no config file is given")]
    MissingAddress,

    /// A single rule could not be validated.
    #[error("Invalid {field} {value:?}: {reason}")]
    InvalidRule {
        field: &'static str,
        value: String,
        reason: String,
    },

    /// A listener could not be bound.
    #[error("Failed to bind {protocol} listener on {addr}: {source}")]
    Bind {
        protocol: &'static str,
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// An operation against the forward target failed.
    #[error("Failed to {stage} {addr}: {source}")]
    Upstream {
        stage: &'static str,
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// I/O error wrapper.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ForwardError {
    /// Creates a new configuration parse error.
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
        }
    }

    /// Creates a new configuration validation error.
    pub fn config_validation(message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            message: message.into(),
        }
    }

    /// Creates a new rule validation error.
    pub fn invalid_rule(
        field: &'static str,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidRule {
            field,
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Returns a closure that wraps an I/O error from the given stage.
    pub fn upstream<'a>(
        stage: &'static str,
        addr: &'a str,
    ) -> impl FnOnce(std::io::Error) -> Self + 'a {
        move |source| Self::Upstream {
            stage,
            addr: addr.to_string(),
            source,
        }
    }

    /// Process exit status used when this error aborts startup.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConfigNotFound { .. }
            | Self::ConfigParse { .. }
            | Self::ConfigValidation { .. }
            | Self::InvalidRule { .. }
            | Self::Upstream { .. }
            | Self::Io(_) => 1,
            Self::EmptyRuleSet | Self::NoValidRules { .. } => 2,
            Self::MissingAddress => 4,
            Self::Bind { .. } => 8,
        }
    }
}

/// Result type alias using ForwardError.
pub type Result<T> = std::result::Result<T, ForwardError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_error_display() {
        let err = ForwardError::ConfigNotFound {
            path: "/etc/port-relay.yaml".to_string(),
        };
        assert!(err.to_string().contains("/etc/port-relay.yaml"));

        let err = ForwardError::config_parse("invalid yaml");
        assert!(err.to_string().contains("invalid yaml"));

        let err = ForwardError::invalid_rule("listen", "127.0.0.1", "missing ':'");
        assert_eq!(err.to_string(), "Invalid listen \"127.0.0.1\": missing ':'");
    }

    #[test]
    fn test_upstream_wraps_io_error() {
        let addr = String::from("10.0.0.1:53");
        let wrap = ForwardError::upstream("connect", &addr);
        let err = wrap(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
        assert_eq!(err.to_string(), "Failed to connect 10.0.0.1:53: refused");
        assert!(matches!(
            err,
            ForwardError::Upstream { stage: "connect", ref addr, .. } if addr == "10.0.0.1:53"
        ));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err: ForwardError = io_err.into();
        assert!(matches!(err, ForwardError::Io(_)));
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(ForwardError::config_parse("bad").exit_code(), 1);
        assert_eq!(ForwardError::EmptyRuleSet.exit_code(), 2);
        assert_eq!(ForwardError::NoValidRules { count: 3 }.exit_code(), 2);
        assert_eq!(ForwardError::MissingAddress.exit_code(), 4);

        let err = ForwardError::Bind {
            protocol: "tcp",
            addr: "0.0.0.0:80".to_string(),
            source: io::Error::new(io::ErrorKind::AddrInUse, "in use"),
        };
        assert_eq!(err.exit_code(), 8);
    }
}
