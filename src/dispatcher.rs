//! Rule dispatcher: validates rules and starts their forwarders.

use crate::admission::Admission;
use crate::config::{RuleConfig, Timeouts};
use crate::error::{ForwardError, Result};
use crate::resolver::{HostLookup, ResolvedTarget, SystemLookup, TargetWatcher, WatchIntervals};
use crate::rule::ForwardRule;
use crate::tcp::TcpForwarder;
use crate::udp::UdpForwarder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Starts forwarders for a list of rules.
pub struct RuleDispatcher {
    timeouts: Timeouts,
    lookup: Arc<dyn HostLookup>,
}

impl RuleDispatcher {
    /// Creates a dispatcher that resolves targets with the system resolver.
    pub fn new(timeouts: Timeouts) -> Self {
        Self::with_lookup(timeouts, Arc::new(SystemLookup))
    }

    pub fn with_lookup(timeouts: Timeouts, lookup: Arc<dyn HostLookup>) -> Self {
        Self { timeouts, lookup }
    }

    /// Validates every record, logging and skipping the ones that fail.
    pub fn validate(records: &[RuleConfig]) -> Vec<ForwardRule> {
        records
            .iter()
            .enumerate()
            .filter_map(|(index, record)| match ForwardRule::try_from(record) {
                Ok(rule) => Some(rule),
                Err(e) => {
                    warn!(rule = index, error = %e, "Skipping invalid rule");
                    None
                }
            })
            .collect()
    }

    /// Validates `records`, binds their listeners and spawns forwarders and
    /// watchers in the background.
    ///
    /// Fails on an empty list, when no record is valid, or when any listener
    /// cannot be bound.
    pub async fn start(&self, records: &[RuleConfig]) -> Result<Dispatch> {
        if records.is_empty() {
            return Err(ForwardError::EmptyRuleSet);
        }

        let rules = Self::validate(records);
        if rules.is_empty() {
            return Err(ForwardError::NoValidRules {
                count: records.len(),
            });
        }

        let mut dispatch = Dispatch {
            rules: Vec::with_capacity(rules.len()),
            tasks: JoinSet::new(),
        };
        for rule in rules {
            let started = self.start_rule(rule, &mut dispatch.tasks).await?;
            dispatch.rules.push(started);
        }

        info!(rules = dispatch.rules.len(), "All forwarders started");
        Ok(dispatch)
    }

    /// Binds one rule's listeners, then spawns its watcher and forwarders
    /// into `tasks`.
    pub async fn start_rule(
        &self,
        rule: ForwardRule,
        tasks: &mut JoinSet<()>,
    ) -> Result<StartedRule> {
        let (watcher, target) = TargetWatcher::new(
            &rule.target,
            self.lookup.clone(),
            WatchIntervals::from(&self.timeouts),
        );
        let admission = Admission::new(rule.max_connections);

        let tcp = if rule.protocol.runs_tcp() {
            Some(
                TcpForwarder::bind(
                    &rule.listen,
                    target.clone(),
                    self.timeouts.relay_lifetime,
                    admission.clone(),
                )
                .await?,
            )
        } else {
            None
        };
        let udp = if rule.protocol.runs_udp() {
            Some(
                UdpForwarder::bind(&rule.listen, target.clone(), &self.timeouts, admission)
                    .await?,
            )
        } else {
            None
        };

        let tcp_addr = tcp.as_ref().and_then(|f| f.local_addr().ok());
        let udp_addr = udp.as_ref().and_then(|f| f.local_addr().ok());
        debug!(rule = %rule, ?tcp_addr, ?udp_addr, "Listeners bound");

        tasks.spawn(watcher.run());
        if let Some(forwarder) = tcp {
            tasks.spawn(forwarder.run());
        }
        if let Some(forwarder) = udp {
            tasks.spawn(forwarder.run());
        }

        Ok(StartedRule {
            rule,
            tcp_addr,
            udp_addr,
            target,
        })
    }
}

/// A rule whose forwarders are running.
#[derive(Debug, Clone)]
pub struct StartedRule {
    pub rule: ForwardRule,
    /// Bound TCP address, if the rule runs TCP.
    pub tcp_addr: Option<SocketAddr>,
    /// Bound UDP address, if the rule runs UDP.
    pub udp_addr: Option<SocketAddr>,
    /// The rule's current target.
    pub target: ResolvedTarget,
}

/// Owns every background task started by [`RuleDispatcher::start`].
///
/// Dropping it aborts forwarders and watchers. Relays already in flight are
/// separate tasks and run until they finish on their own.
pub struct Dispatch {
    rules: Vec<StartedRule>,
    tasks: JoinSet<()>,
}

impl Dispatch {
    pub fn rules(&self) -> &[StartedRule] {
        &self.rules
    }

    /// Aborts all forwarders and watchers and waits for them to stop.
    pub async fn shutdown(mut self) {
        self.tasks.shutdown().await;
        debug!(rules = self.rules.len(), "Forwarders stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::Protocol;

    fn record(listen: &str, forward: &str, proto: Option<&str>) -> RuleConfig {
        RuleConfig {
            listen: listen.to_string(),
            forward: forward.to_string(),
            proto: proto.map(str::to_string),
            max_connections: None,
        }
    }

    #[test]
    fn test_validate_skips_bad_rules() {
        let records = vec![
            record("127.0.0.1:9000", "127.0.0.1:9001", Some("tcp")),
            record("127.0.0.1", "127.0.0.1:9001", None),
            record("127.0.0.1:9002", "backend", None),
            record("127.0.0.1:9003", "backend:80", Some("quic")),
            record("127.0.0.1:9004", "backend:80", None),
        ];

        let rules = RuleDispatcher::validate(&records);
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].listen.port, 9000);
        assert_eq!(rules[0].protocol, Protocol::Tcp);
        assert_eq!(rules[1].listen.port, 9004);
        assert_eq!(rules[1].protocol, Protocol::Both);
    }

    #[tokio::test]
    async fn test_start_empty() {
        let dispatcher = RuleDispatcher::new(Timeouts::default());
        let result = dispatcher.start(&[]).await;
        assert!(matches!(result, Err(ForwardError::EmptyRuleSet)));
    }

    #[tokio::test]
    async fn test_start_all_invalid() {
        let dispatcher = RuleDispatcher::new(Timeouts::default());
        let result = dispatcher.start(&[record("nope", "127.0.0.1:1", None)]).await;
        assert!(matches!(result, Err(ForwardError::NoValidRules { count: 1 })));
    }

    #[tokio::test]
    async fn test_start_selects_forwarders() {
        let dispatcher = RuleDispatcher::new(Timeouts::default());
        let records = vec![
            record("127.0.0.1:0", "127.0.0.1:1", Some("tcp")),
            record("127.0.0.1:0", "127.0.0.1:1", Some("udp")),
        ];

        let dispatch = dispatcher.start(&records).await.unwrap();
        let rules = dispatch.rules();
        assert_eq!(rules.len(), 2);
        assert!(rules[0].tcp_addr.is_some() && rules[0].udp_addr.is_none());
        assert!(rules[1].tcp_addr.is_none() && rules[1].udp_addr.is_some());
        dispatch.shutdown().await;
    }

    #[tokio::test]
    async fn test_bind_failure_is_fatal() {
        let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap().to_string();

        let dispatcher = RuleDispatcher::new(Timeouts::default());
        let result = dispatcher.start(&[record(&addr, "127.0.0.1:1", Some("tcp"))]).await;
        match result {
            Err(e @ ForwardError::Bind { .. }) => assert_eq!(e.exit_code(), 8),
            other => panic!("expected bind error, got {:?}", other.map(|d| d.rules().len())),
        }
    }
}
