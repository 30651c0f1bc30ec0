//! TCP forwarder: accept loop plus one relay task per connection.

use crate::admission::Admission;
use crate::error::{ForwardError, Result};
use crate::relay::{relay, RelayOutcome};
use crate::resolver::ResolvedTarget;
use crate::rule::HostPort;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::OwnedSemaphorePermit;
use tracing::{debug, info, warn};

/// A bound TCP listener for one rule.
pub struct TcpForwarder {
    listener: TcpListener,
    listen: HostPort,
    target: ResolvedTarget,
    lifetime: Duration,
    admission: Admission,
}

impl TcpForwarder {
    /// Binds the rule's listen address.
    pub async fn bind(
        listen: &HostPort,
        target: ResolvedTarget,
        lifetime: Duration,
        admission: Admission,
    ) -> Result<Self> {
        let addr = listen.to_string();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ForwardError::Bind {
                protocol: "tcp",
                addr,
                source,
            })?;

        Ok(Self {
            listener,
            listen: listen.clone(),
            target,
            lifetime,
            admission,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections forever. Accept errors are logged and skipped.
    pub async fn run(self) {
        info!(
            listen = %self.listen,
            forward = %self.target.dial_addr(),
            "Forwarding TCP"
        );

        loop {
            let permit = self.admission.admit().await;
            match self.listener.accept().await {
                Ok((inbound, peer)) => {
                    let target = self.target.clone();
                    let lifetime = self.lifetime;
                    tokio::spawn(handle_connection(inbound, peer, target, lifetime, permit));
                }
                Err(e) => {
                    warn!(listen = %self.listen, error = %e, "Accept error");
                }
            }
        }
    }
}

async fn handle_connection(
    inbound: TcpStream,
    peer: SocketAddr,
    target: ResolvedTarget,
    lifetime: Duration,
    _permit: Option<OwnedSemaphorePermit>,
) {
    let addr = target.dial_addr();
    info!(client = %peer, target = %addr, "TCP connection");

    let outbound = match TcpStream::connect(&addr)
        .await
        .map_err(ForwardError::upstream("connect to", &addr))
    {
        Ok(stream) => stream,
        Err(e) => {
            warn!(client = %peer, error = %e, "Dropping connection");
            return;
        }
    };

    if let Err(e) = outbound.set_nodelay(true) {
        debug!(target = %addr, error = %e, "Failed to set TCP_NODELAY");
    }

    match relay(inbound, outbound, lifetime).await {
        RelayOutcome::Completed => {
            info!(client = %peer, target = %addr, "TCP relay finished");
        }
        RelayOutcome::TimedOut => {
            info!(
                client = %peer,
                target = %addr,
                lifetime_secs = lifetime.as_secs(),
                "TCP relay timed out"
            );
        }
    }
}
