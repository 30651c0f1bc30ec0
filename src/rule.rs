//! Forwarding rule model.
//!
//! A [`ForwardRule`] is the validated form of a [`RuleConfig`] record:
//! both addresses split into host and port, and the protocol selection
//! resolved.

use crate::config::RuleConfig;
use crate::error::{ForwardError, Result};
use std::fmt;
use std::net::{IpAddr, Ipv6Addr};
use tracing::warn;

/// Which forwarders a rule runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Protocol {
    Tcp,
    Udp,
    /// TCP and UDP on the same listen/forward pair.
    #[default]
    Both,
}

impl Protocol {
    /// Parses the optional `proto` field.
    ///
    /// Only "tcp" and "udp" narrow the rule; anything else runs both.
    pub fn parse(value: Option<&str>) -> Self {
        let value = value.map(str::trim).unwrap_or("");
        match value.to_ascii_lowercase().as_str() {
            "" => Self::Both,
            "tcp" => Self::Tcp,
            "udp" => Self::Udp,
            _ => {
                warn!(proto = value, "Unknown protocol, forwarding both tcp and udp");
                Self::Both
            }
        }
    }

    pub fn runs_tcp(self) -> bool {
        matches!(self, Self::Tcp | Self::Both)
    }

    pub fn runs_udp(self) -> bool {
        matches!(self, Self::Udp | Self::Both)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => f.write_str("tcp"),
            Self::Udp => f.write_str("udp"),
            Self::Both => f.write_str("tcp+udp"),
        }
    }
}

/// A `host:port` pair. IPv6 literals are stored without brackets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPort {
    pub host: String,
    pub port: u16,
}

impl HostPort {
    /// Splits `value` on its last colon into a non-empty host and a port.
    ///
    /// `field` names the input for error messages ("listen" or "forward").
    pub fn parse(field: &'static str, value: &str) -> Result<Self> {
        let invalid = |reason: &str| ForwardError::invalid_rule(field, value, reason);

        let (host, port) = value
            .trim()
            .rsplit_once(':')
            .ok_or_else(|| invalid("missing ':' between host and port"))?;

        let host = match host.strip_prefix('[').and_then(|h| h.strip_suffix(']')) {
            Some(inner) => {
                inner
                    .parse::<Ipv6Addr>()
                    .map_err(|_| invalid("bracketed host is not an IPv6 address"))?;
                inner
            }
            None if host.contains(':') => {
                return Err(invalid("host contains ':'; wrap IPv6 addresses in brackets"));
            }
            None => host,
        };

        if host.is_empty() {
            return Err(invalid("empty host"));
        }
        if port.is_empty() {
            return Err(invalid("empty port"));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| invalid("port must be a number between 0 and 65535"))?;

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    /// Whether the host is already a numeric IP address.
    pub fn is_numeric(&self) -> bool {
        self.host.parse::<IpAddr>().is_ok()
    }
}

impl fmt::Display for HostPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// One validated listen → forward intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardRule {
    pub listen: HostPort,
    pub target: HostPort,
    pub protocol: Protocol,
    /// Upper bound on in-flight connections/datagrams; `None` is unbounded.
    pub max_connections: Option<usize>,
}

impl ForwardRule {
    /// Builds a rule from raw `listen`/`forward` strings.
    pub fn new(listen: &str, forward: &str, protocol: Protocol) -> Result<Self> {
        Ok(Self {
            listen: HostPort::parse("listen", listen)?,
            target: HostPort::parse("forward", forward)?,
            protocol,
            max_connections: None,
        })
    }
}

impl TryFrom<&RuleConfig> for ForwardRule {
    type Error = ForwardError;

    fn try_from(record: &RuleConfig) -> Result<Self> {
        let protocol = Protocol::parse(record.proto.as_deref());
        let mut rule = Self::new(&record.listen, &record.forward, protocol)?;
        rule.max_connections = record.max_connections;
        Ok(rule)
    }
}

impl fmt::Display for ForwardRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}] -> {}", self.listen, self.protocol, self.target)
    }
}
