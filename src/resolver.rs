//! Target host resolution.
//!
//! Each rule owns one [`TargetWatcher`] that keeps the rule's resolved
//! target address current. Dial tasks read it through cheap
//! [`ResolvedTarget`] handles backed by a `watch` channel, so every read
//! sees a complete address and the watcher never blocks a forwarder.

use crate::config::Timeouts;
use crate::rule::HostPort;
use async_trait::async_trait;
use std::io;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Hostname lookup backend.
#[async_trait]
pub trait HostLookup: Send + Sync {
    /// Returns the addresses for `host`, in resolver order.
    async fn lookup(&self, host: &str) -> io::Result<Vec<IpAddr>>;
}

/// Lookup through the operating system resolver.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLookup;

#[async_trait]
impl HostLookup for SystemLookup {
    async fn lookup(&self, host: &str) -> io::Result<Vec<IpAddr>> {
        let addrs = tokio::net::lookup_host((host, 0)).await?;
        Ok(addrs.map(|addr| addr.ip()).collect())
    }
}

/// Read handle on a rule's current target.
#[derive(Debug, Clone)]
pub struct ResolvedTarget {
    host: watch::Receiver<String>,
    port: u16,
}

impl ResolvedTarget {
    /// The last published host: a numeric address once a lookup succeeded,
    /// otherwise the configured host.
    pub fn host(&self) -> String {
        self.host.borrow().clone()
    }

    /// `host:port` string to dial right now.
    pub fn dial_addr(&self) -> String {
        HostPort {
            host: self.host(),
            port: self.port,
        }
        .to_string()
    }
}

/// Sleep intervals of the watcher loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchIntervals {
    /// After checking a target that is already numeric.
    pub numeric: Duration,
    /// After a failed lookup.
    pub retry: Duration,
    /// After a successful lookup.
    pub refresh: Duration,
}

impl Default for WatchIntervals {
    fn default() -> Self {
        Self::from(&Timeouts::default())
    }
}

impl From<&Timeouts> for WatchIntervals {
    fn from(timeouts: &Timeouts) -> Self {
        Self {
            numeric: timeouts.resolve_numeric,
            retry: timeouts.resolve_retry,
            refresh: timeouts.resolve_refresh,
        }
    }
}

/// Keeps one rule's [`ResolvedTarget`] in sync with DNS.
pub struct TargetWatcher {
    target: HostPort,
    lookup: Arc<dyn HostLookup>,
    intervals: WatchIntervals,
    published: watch::Sender<String>,
}

impl TargetWatcher {
    /// Creates a watcher and the first read handle.
    ///
    /// The handle initially holds the configured host unchanged.
    pub fn new(
        target: &HostPort,
        lookup: Arc<dyn HostLookup>,
        intervals: WatchIntervals,
    ) -> (Self, ResolvedTarget) {
        let (published, rx) = watch::channel(target.host.clone());
        let handle = ResolvedTarget {
            host: rx,
            port: target.port,
        };
        let watcher = Self {
            target: target.clone(),
            lookup,
            intervals,
            published,
        };
        (watcher, handle)
    }

    /// Runs one resolution step and returns how long to wait before the next.
    pub async fn check(&self) -> Duration {
        if self.target.is_numeric() {
            return self.intervals.numeric;
        }

        let host = &self.target.host;
        match self.lookup.lookup(host).await {
            Ok(addrs) => match addrs.first() {
                Some(ip) => {
                    self.publish(ip.to_string());
                    self.intervals.refresh
                }
                None => {
                    warn!(host = %host, "DNS resolve returned no addresses");
                    self.intervals.retry
                }
            },
            Err(e) => {
                warn!(host = %host, error = %e, "DNS resolve error");
                self.intervals.retry
            }
        }
    }

    fn publish(&self, resolved: String) {
        let host = &self.target.host;
        let changed = self.published.send_if_modified(|current| {
            if *current == resolved {
                return false;
            }
            info!(host = %host, from = %current, to = %resolved, "Target address changed");
            *current = resolved.clone();
            true
        });
        if !changed {
            debug!(host = %host, address = %resolved, "Target address unchanged");
        }
    }

    /// Loops [`check`](Self::check) until every read handle is dropped.
    pub async fn run(self) {
        loop {
            let wait = self.check().await;
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = self.published.closed() => {
                    debug!(host = %self.target.host, "No readers left, stopping watcher");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Lookup that returns whatever the test last stored.
    struct StaticLookup {
        answer: Mutex<io::Result<Vec<IpAddr>>>,
    }

    impl StaticLookup {
        fn answering(addrs: &[&str]) -> Arc<Self> {
            let lookup = Arc::new(Self {
                answer: Mutex::new(Ok(Vec::new())),
            });
            lookup.set(addrs);
            lookup
        }

        fn set(&self, addrs: &[&str]) {
            *self.answer.lock().unwrap() = Ok(addrs.iter().map(|a| a.parse().unwrap()).collect());
        }

        fn fail(&self) {
            *self.answer.lock().unwrap() = Err(io::Error::new(io::ErrorKind::NotFound, "nxdomain"));
        }
    }

    #[async_trait]
    impl HostLookup for StaticLookup {
        async fn lookup(&self, _host: &str) -> io::Result<Vec<IpAddr>> {
            match &*self.answer.lock().unwrap() {
                Ok(addrs) => Ok(addrs.clone()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            }
        }
    }

    fn target(value: &str) -> HostPort {
        HostPort::parse("forward", value).unwrap()
    }

    #[tokio::test]
    async fn test_numeric_target_is_never_resolved() {
        let lookup = StaticLookup::answering(&["10.9.9.9"]);
        let (watcher, handle) =
            TargetWatcher::new(&target("192.168.1.10:80"), lookup, WatchIntervals::default());

        for _ in 0..3 {
            assert_eq!(watcher.check().await, Duration::from_secs(60));
            assert_eq!(handle.host(), "192.168.1.10");
        }
        assert_eq!(handle.dial_addr(), "192.168.1.10:80");
    }

    #[tokio::test]
    async fn test_hostname_takes_first_address() {
        let lookup = StaticLookup::answering(&["10.0.0.1", "10.0.0.2"]);
        let (watcher, handle) =
            TargetWatcher::new(&target("api.internal:443"), lookup, WatchIntervals::default());

        assert_eq!(handle.host(), "api.internal");
        assert_eq!(watcher.check().await, Duration::from_secs(1));
        assert_eq!(handle.dial_addr(), "10.0.0.1:443");
    }

    #[tokio::test]
    async fn test_failed_lookup_keeps_last_address() {
        let lookup = StaticLookup::answering(&["10.0.0.1"]);
        let (watcher, handle) = TargetWatcher::new(
            &target("api.internal:443"),
            lookup.clone(),
            WatchIntervals::default(),
        );

        watcher.check().await;
        lookup.fail();
        assert_eq!(watcher.check().await, Duration::from_secs(5));
        assert_eq!(handle.host(), "10.0.0.1");

        lookup.set(&[]);
        assert_eq!(watcher.check().await, Duration::from_secs(5));
        assert_eq!(handle.host(), "10.0.0.1");
    }

    #[tokio::test]
    async fn test_ipv6_dial_addr() {
        let lookup = StaticLookup::answering(&["fd00::1"]);
        let (watcher, handle) =
            TargetWatcher::new(&target("v6.internal:53"), lookup, WatchIntervals::default());

        watcher.check().await;
        assert_eq!(handle.dial_addr(), "[fd00::1]:53");
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_follows_dns_changes() {
        let lookup = StaticLookup::answering(&["10.0.0.1"]);
        let (watcher, handle) = TargetWatcher::new(
            &target("api.internal:443"),
            lookup.clone(),
            WatchIntervals::default(),
        );
        let task = tokio::spawn(watcher.run());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(handle.host(), "10.0.0.1");

        lookup.set(&["10.0.0.2"]);
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(handle.host(), "10.0.0.2");

        drop(handle);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_system_lookup_localhost() {
        let addrs = SystemLookup.lookup("localhost").await.unwrap();
        assert!(!addrs.is_empty());
        assert!(addrs.iter().all(|ip| ip.is_loopback()));
    }
}
