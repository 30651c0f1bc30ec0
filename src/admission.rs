//! Optional per-rule concurrency limit.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Gate shared by all forwarders of one rule.
///
/// Unbounded unless the rule sets `max_connections`. Permits are held by
/// the per-connection (or per-datagram) task until it finishes.
#[derive(Debug, Clone, Default)]
pub struct Admission {
    gate: Option<Arc<Semaphore>>,
}

impl Admission {
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            gate: limit.map(|n| Arc::new(Semaphore::new(n))),
        }
    }

    /// Waits for a free slot. Returns `None` when the gate is unbounded.
    pub async fn admit(&self) -> Option<OwnedSemaphorePermit> {
        let gate = self.gate.clone()?;
        // The semaphore is never closed, so acquiring only fails if that changes.
        gate.acquire_owned().await.ok()
    }

    /// Free slots, or `None` when unbounded.
    pub fn available(&self) -> Option<usize> {
        self.gate.as_ref().map(|gate| gate.available_permits())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_unbounded() {
        let admission = Admission::new(None);
        assert!(admission.admit().await.is_none());
        assert_eq!(admission.available(), None);
    }

    #[tokio::test]
    async fn test_limit_blocks_until_release() {
        let admission = Admission::new(Some(1));
        let first = admission.admit().await;
        assert!(first.is_some());
        assert_eq!(admission.available(), Some(0));

        let waiting = tokio::time::timeout(Duration::from_millis(50), admission.admit()).await;
        assert!(waiting.is_err());

        drop(first);
        let second = tokio::time::timeout(Duration::from_millis(50), admission.admit()).await;
        assert!(matches!(second, Ok(Some(_))));
    }
}
