//! Bidirectional byte relay between two connected streams.

use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;
use tracing::trace;

/// How a relay ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Both directions reached EOF or an error.
    Completed,
    /// The lifetime elapsed first; both streams were dropped.
    TimedOut,
}

/// Copies `inbound -> outbound` and `outbound -> inbound` concurrently.
///
/// Each direction is its own task and ends at EOF or on the first I/O
/// error, after shutting down the write side it was feeding. The relay
/// returns once both directions are done or `lifetime` has elapsed since
/// the call, whichever is first. Both streams are closed when it returns.
pub async fn relay<A, B>(inbound: A, outbound: B, lifetime: Duration) -> RelayOutcome
where
    A: AsyncRead + AsyncWrite + Send + 'static,
    B: AsyncRead + AsyncWrite + Send + 'static,
{
    let (inbound_rx, inbound_tx) = tokio::io::split(inbound);
    let (outbound_rx, outbound_tx) = tokio::io::split(outbound);

    let mut upload = tokio::spawn(pipe("upload", inbound_rx, outbound_tx));
    let mut download = tokio::spawn(pipe("download", outbound_rx, inbound_tx));

    let both = async {
        let _ = (&mut upload).await;
        let _ = (&mut download).await;
    };
    let finished = tokio::time::timeout(lifetime, both).await;

    match finished {
        Ok(()) => RelayOutcome::Completed,
        Err(_) => {
            stop(upload).await;
            stop(download).await;
            RelayOutcome::TimedOut
        }
    }
}

async fn pipe<R, W>(
    direction: &'static str,
    mut reader: ReadHalf<R>,
    mut writer: WriteHalf<W>,
) -> u64
where
    R: AsyncRead,
    W: AsyncWrite,
{
    let copied = match tokio::io::copy(&mut reader, &mut writer).await {
        Ok(n) => n,
        Err(e) => {
            trace!(direction, error = %e, "Relay direction ended with error");
            0
        }
    };
    let _ = writer.shutdown().await;
    trace!(direction, bytes = copied, "Relay direction finished");
    copied
}

/// Aborts a direction task and waits until its halves are dropped.
async fn stop(task: JoinHandle<u64>) {
    task.abort();
    let _ = task.await;
}
