//! # Port Relay Library
//!
//! TCP/UDP port forwarding that follows DNS changes of its targets.
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and validation
//! - [`error`]: Error types and exit codes
//! - [`logging`]: Logging setup and configuration
//! - [`rule`]: Forwarding rule model and address parsing
//! - [`resolver`]: Background target resolution
//! - [`relay`]: Bidirectional stream relay with a lifetime cap
//! - [`tcp`]: TCP accept loop
//! - [`udp`]: UDP request/response loop
//! - [`admission`]: Optional per-rule concurrency limit
//! - [`dispatcher`]: Starts the forwarders of every rule
//!
//! ## Example
//!
//! ```ignore
//! use port_relay::config::{AppConfig, Timeouts};
//! use port_relay::dispatcher::RuleDispatcher;
//!
//! let config = AppConfig::load("port-relay.yaml")?;
//! let dispatcher = RuleDispatcher::new(Timeouts::from(&config.timeouts));
//! let dispatch = dispatcher.start(&config.rules).await?;
//! ```

pub mod admission;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod logging;
pub mod relay;
pub mod resolver;
pub mod rule;
pub mod tcp;
pub mod udp;

pub use config::{AppConfig, RuleConfig, Timeouts};
pub use dispatcher::{Dispatch, RuleDispatcher, StartedRule};
pub use error::{ForwardError, Result};
pub use resolver::{HostLookup, ResolvedTarget, SystemLookup, TargetWatcher};
pub use rule::{ForwardRule, HostPort, Protocol};
