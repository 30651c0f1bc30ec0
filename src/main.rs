//! # Port Relay
//!
//! Forwards local TCP and UDP ports to remote endpoints, re-resolving the
//! remote hostnames in the background.
//!
//! ## Usage
//!
//! ```bash
//! # Forward one port (TCP and UDP)
//! port-relay -l 0.0.0.0:5353 -f dns.example.com:53
//!
//! # TCP only
//! port-relay -l 127.0.0.1:8080 -f backend.internal:80 -p tcp
//!
//! # Many rules from a config file
//! port-relay -c /etc/port-relay/config.yaml
//! ```
//!
//! ## Exit codes
//!
//! 1 bad config, 2 no usable rules, 4 missing `-l`/`-f`, 8 bind failure.

use clap::Parser;
use port_relay::config::{AppConfig, Timeouts};
use port_relay::dispatcher::RuleDispatcher;
use port_relay::error::{ForwardError, Result};
use port_relay::logging;
use std::path::PathBuf;
use tracing::{error, info, warn};

/// TCP/UDP port forwarder that follows DNS changes.
#[derive(Parser, Debug)]
#[command(name = "port-relay")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML or JSON)
    #[arg(short, long, env = "PORT_RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Local endpoint to listen on (host:port)
    #[arg(short, long)]
    listen: Option<String>,

    /// Remote endpoint to forward to (host:port)
    #[arg(short, long)]
    forward: Option<String>,

    /// Protocol for single-rule mode: tcp or udp (default both)
    #[arg(short, long)]
    proto: Option<String>,

    /// Increase verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (only errors)
    #[arg(short, long)]
    quiet: bool,
}

impl Args {
    /// Converts verbosity count to log level string
    fn log_level(&self) -> Option<&'static str> {
        if self.quiet {
            return Some("error");
        }
        match self.verbose {
            0 => None, // Use config default
            1 => Some("info"),
            2 => Some("debug"),
            _ => Some("trace"),
        }
    }

    fn single_rule_flags(&self) -> bool {
        self.listen.is_some() || self.forward.is_some() || self.proto.is_some()
    }
}

/// Application entry point.
#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = run(args).await {
        eprintln!("port-relay: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(args: Args) -> Result<()> {
    let config = load_config(&args)?;

    let _log_guard = logging::init_logging(&config.logging, args.log_level())?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        rules = config.rules.len(),
        "Starting port-relay"
    );
    if args.config.is_some() && args.single_rule_flags() {
        warn!("--listen/--forward/--proto are ignored when a config file is given");
    }

    let dispatcher = RuleDispatcher::new(Timeouts::from(&config.timeouts));
    let dispatch = dispatcher.start(&config.rules).await.map_err(|e| {
        error!(error = %e, "Startup failed");
        e
    })?;

    wait_for_shutdown().await;

    info!("Shutting down");
    dispatch.shutdown().await;
    Ok(())
}

/// Builds the configuration from `--config`, or from `--listen`/`--forward`.
fn load_config(args: &Args) -> Result<AppConfig> {
    if let Some(ref path) = args.config {
        return AppConfig::load(path);
    }

    match (&args.listen, &args.forward) {
        (Some(listen), Some(forward)) if !listen.is_empty() && !forward.is_empty() => {
            Ok(AppConfig::single_rule(
                listen.clone(),
                forward.clone(),
                args.proto.clone(),
            ))
        }
        _ => Err(ForwardError::MissingAddress),
    }
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Args {
        Args::parse_from(std::iter::once("port-relay").chain(argv.iter().copied()))
    }

    #[test]
    fn test_single_rule_mode() {
        let args = parse(&["-l", "127.0.0.1:8001", "-f", "127.0.0.1:8002"]);
        let config = load_config(&args).unwrap();
        assert_eq!(config.rules.len(), 1);
        assert_eq!(config.rules[0].listen, "127.0.0.1:8001");
        assert_eq!(config.rules[0].proto, None);
    }

    #[test]
    fn test_missing_forward() {
        let args = parse(&["-l", "127.0.0.1:8001"]);
        let err = load_config(&args).unwrap_err();
        assert!(matches!(err, ForwardError::MissingAddress));
        assert_eq!(err.exit_code(), 4);
    }

    #[test]
    fn test_unreadable_config() {
        let args = parse(&["-c", "/nonexistent/port-relay.json"]);
        let err = load_config(&args).unwrap_err();
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_log_level() {
        assert_eq!(parse(&[]).log_level(), None);
        assert_eq!(parse(&["-vv"]).log_level(), Some("debug"));
        assert_eq!(parse(&["-v", "-q"]).log_level(), Some("error"));
    }
}
