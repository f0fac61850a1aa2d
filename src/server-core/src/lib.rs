//! Core functions shared by the gateway's three inbound servers (command
//! service, telemetry service, shell bastion): binding a listener, deriving
//! bounded sub-deadlines, and waiting for a shutdown signal.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::time::Instant;
use tokio_stream::wrappers::TcpListenerStream;

/// The per-operation deadline for backend connects and for telemetry unary
/// RPCs (§5).
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Binds a TCP listener and wraps it as a stream of accepted connections,
/// suitable for `tonic::transport::Server::serve_with_incoming`.
pub async fn bind(addr: SocketAddr) -> io::Result<TcpListenerStream> {
    tracing::info!(%addr, "binding listener");
    let listener = TcpListener::bind(addr).await?;
    Ok(TcpListenerStream::new(listener))
}

pub async fn bind_raw(addr: SocketAddr) -> io::Result<TcpListener> {
    tracing::info!(%addr, "binding listener");
    TcpListener::bind(addr).await
}

/// A point-in-time deadline that can be derived into a bounded sub-deadline
/// no later than itself (§5: "Parent RPC deadlines propagate to backend
/// RPCs by attaching a derived deadline no later than the parent's").
#[derive(Debug, Clone, Copy)]
pub struct Deadline(Instant);

impl Deadline {
    pub fn after(duration: Duration) -> Self {
        Deadline(Instant::now() + duration)
    }

    pub fn remaining(&self) -> Duration {
        self.0.saturating_duration_since(Instant::now())
    }

    /// Returns a duration no greater than both `requested` and the time
    /// remaining until this deadline.
    pub fn bound(&self, requested: Duration) -> Duration {
        requested.min(self.remaining())
    }

    pub fn derive(&self, requested: Duration) -> Deadline {
        Deadline::after(self.bound(requested))
    }
}

/// Runs `fut` to completion or until `addr`'s peer TCP stream errors are no
/// longer relevant; a small helper kept around call sites that need a
/// connect-with-timeout primitive distinct from tonic's own client timeout.
pub async fn connect_timeout<A: ToSocketAddrs>(
    addr: A,
    timeout: Duration,
) -> io::Result<TcpStream> {
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("connect timed out after {timeout:?}"),
        )),
    }
}

/// Resolves once the process receives an interrupt or terminate signal.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => tracing::warn!("failed to install SIGTERM handler: {e}"),
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_deadline_never_exceeds_parent() {
        let parent = Deadline::after(Duration::from_millis(50));
        let bounded = parent.bound(Duration::from_secs(30));
        assert!(bounded <= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn bind_accepts_connections() {
        let stream = bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        drop(stream);
    }
}
