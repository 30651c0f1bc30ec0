//! UDP forwarder: one request/response exchange per received datagram.
//!
//! Every datagram gets its own outbound socket, one send to the target and
//! at most one reply back to the sender. Multi-packet sessions are not
//! tracked.

use crate::admission::Admission;
use crate::config::Timeouts;
use crate::error::{ForwardError, Result};
use crate::resolver::ResolvedTarget;
use crate::rule::HostPort;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::OwnedSemaphorePermit;
use tracing::{info, warn};

/// Receive and reply buffer size.
pub const DATAGRAM_BUFFER: usize = 1024;

/// A bound UDP socket for one rule.
pub struct UdpForwarder {
    socket: Arc<UdpSocket>,
    listen: HostPort,
    target: ResolvedTarget,
    read_deadline: Duration,
    round_trip: Duration,
    admission: Admission,
}

impl UdpForwarder {
    /// Binds the rule's listen address.
    pub async fn bind(
        listen: &HostPort,
        target: ResolvedTarget,
        timeouts: &Timeouts,
        admission: Admission,
    ) -> Result<Self> {
        let addr = listen.to_string();
        let socket = UdpSocket::bind(&addr)
            .await
            .map_err(|source| ForwardError::Bind {
                protocol: "udp",
                addr,
                source,
            })?;

        Ok(Self {
            socket: Arc::new(socket),
            listen: listen.clone(),
            target,
            read_deadline: timeouts.udp_read_deadline,
            round_trip: timeouts.udp_round_trip,
            admission,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Receives datagrams forever.
    ///
    /// Each read is bounded by the read deadline; an expired deadline just
    /// starts the next iteration.
    pub async fn run(self) {
        info!(
            listen = %self.listen,
            forward = %self.target.dial_addr(),
            "Forwarding UDP"
        );

        let mut buf = [0u8; DATAGRAM_BUFFER];
        loop {
            let received =
                tokio::time::timeout(self.read_deadline, self.socket.recv_from(&mut buf)).await;

            let (len, peer) = match received {
                Err(_) => continue,
                Ok(Err(e)) => {
                    warn!(listen = %self.listen, error = %e, "UDP receive error");
                    continue;
                }
                Ok(Ok(datagram)) => datagram,
            };

            let permit = self.admission.admit().await;
            tokio::spawn(relay_datagram(
                self.socket.clone(),
                peer,
                buf[..len].to_vec(),
                self.target.clone(),
                self.round_trip,
                permit,
            ));
        }
    }
}

async fn relay_datagram(
    listener: Arc<UdpSocket>,
    peer: SocketAddr,
    payload: Vec<u8>,
    target: ResolvedTarget,
    round_trip: Duration,
    _permit: Option<OwnedSemaphorePermit>,
) {
    let addr = target.dial_addr();
    info!(client = %peer, target = %addr, bytes = payload.len(), "UDP packet");

    let reply = match tokio::time::timeout(round_trip, exchange(&addr, &payload)).await {
        Ok(Ok(reply)) => reply,
        Ok(Err(e)) => {
            warn!(client = %peer, error = %e, "UDP relay failed");
            return;
        }
        Err(_) => {
            warn!(
                client = %peer,
                target = %addr,
                timeout_secs = round_trip.as_secs(),
                "UDP relay timed out waiting for reply"
            );
            return;
        }
    };

    if let Err(e) = listener.send_to(&reply, peer).await {
        warn!(client = %peer, error = %e, "Failed to send UDP reply");
    }
}

/// Sends `payload` to `addr` from a fresh socket and returns the first reply.
async fn exchange(addr: &str, payload: &[u8]) -> Result<Vec<u8>> {
    let remote = tokio::net::lookup_host(addr)
        .await
        .map_err(ForwardError::upstream("resolve", addr))?
        .next()
        .ok_or_else(|| {
            ForwardError::upstream("resolve", addr)(io::Error::new(
                io::ErrorKind::NotFound,
                "no addresses",
            ))
        })?;

    let local = match remote.ip() {
        IpAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
        IpAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
    };
    let socket = UdpSocket::bind(local)
        .await
        .map_err(ForwardError::upstream("bind a socket for", addr))?;
    socket
        .connect(remote)
        .await
        .map_err(ForwardError::upstream("connect to", addr))?;

    socket
        .send(payload)
        .await
        .map_err(ForwardError::upstream("write to", addr))?;

    let mut reply = vec![0u8; DATAGRAM_BUFFER];
    let len = socket
        .recv(&mut reply)
        .await
        .map_err(ForwardError::upstream("read from", addr))?;
    reply.truncate(len);

    Ok(reply)
}
