//! Local listener that forwards every accepted connection to a remote dialer.
//!
//! The forwarding machinery knows nothing about SSH: the tunnel plugs in a
//! dialer that opens `direct-tcpip` channels, tests plug in a plain TCP dialer.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use super::error::TunnelError;
use super::types::format_host_port;

/// Pause after a failed accept so a persistent error does not spin the loop.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Byte stream to the far end of a forwarded connection.
pub trait TunnelStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> TunnelStream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Opens one outbound stream per accepted local connection.
pub trait RemoteDialer: Send + Sync + 'static {
    fn dial(
        &self,
        peer: SocketAddr,
    ) -> impl Future<Output = io::Result<Box<dyn TunnelStream>>> + Send;
}

/// A running accept loop bound to a local address.
pub struct Forwarder {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    accept_task: Option<JoinHandle<()>>,
}

impl Forwarder {
    /// Bind `bind_host:0` and start accepting connections.
    pub async fn bind<D: RemoteDialer>(bind_host: &str, dialer: D) -> Result<Self, TunnelError> {
        let addr = format_host_port(bind_host, 0);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| TunnelError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| TunnelError::Bind { addr, source })?;

        let cancel = CancellationToken::new();
        let accept_task = tokio::spawn(accept_loop(listener, Arc::new(dialer), cancel.clone()));

        tracing::debug!("Forwarder listening on {}", local_addr);
        Ok(Self {
            local_addr,
            cancel,
            accept_task: Some(accept_task),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Signal the accept loop and every forwarding task to stop.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the accept loop, which drains all forwarding tasks before exiting.
    pub async fn join(&mut self) {
        if let Some(task) = self.accept_task.take() {
            if let Err(e) = task.await {
                tracing::error!("Forwarder accept loop panicked: {}", e);
            }
        }
    }

    pub async fn shutdown(&mut self) {
        self.cancel();
        self.join().await;
    }
}

impl Drop for Forwarder {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn accept_loop<D: RemoteDialer>(
    listener: TcpListener,
    dialer: Arc<D>,
    cancel: CancellationToken,
) {
    let mut tasks = JoinSet::new();

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tracing::debug!("Accepted forwarded connection from {}", peer);
                    tasks.spawn(forward_connection(
                        stream,
                        peer,
                        dialer.clone(),
                        cancel.child_token(),
                    ));
                }
                Err(e) => {
                    if cancel.is_cancelled() {
                        break;
                    }
                    tracing::warn!("Failed to accept connection: {}", e);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },

            Some(done) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(e) = done {
                    tracing::error!("Forwarding task panicked: {}", e);
                }
            }
        }
    }

    // stop accepting before draining so late clients are refused
    drop(listener);

    while let Some(done) = tasks.join_next().await {
        if let Err(e) = done {
            tracing::error!("Forwarding task panicked: {}", e);
        }
    }
    tracing::debug!("Forwarder stopped");
}

async fn forward_connection<D: RemoteDialer>(
    mut local: TcpStream,
    peer: SocketAddr,
    dialer: Arc<D>,
    cancel: CancellationToken,
) {
    let remote = tokio::select! {
        _ = cancel.cancelled() => return,
        dialed = dialer.dial(peer) => match dialed {
            Ok(remote) => remote,
            Err(e) => {
                tracing::warn!("Failed to open remote stream for {}: {}", peer, e);
                return;
            }
        },
    };

    let (mut local_read, mut local_write) = local.split();
    let (mut remote_read, mut remote_write) = tokio::io::split(remote);

    // The first direction to finish ends the connection; both streams are
    // dropped on return.
    tokio::select! {
        _ = cancel.cancelled() => {
            tracing::debug!("Forwarded connection from {} cancelled", peer);
        }
        sent = tokio::io::copy(&mut local_read, &mut remote_write) => match sent {
            Ok(n) => tracing::debug!("Client {} closed after sending {} bytes", peer, n),
            Err(e) => tracing::debug!("Forwarded connection from {} ended: {}", peer, e),
        },
        received = tokio::io::copy(&mut remote_read, &mut local_write) => match received {
            Ok(n) => tracing::debug!("Remote closed connection for {} after {} bytes", peer, n),
            Err(e) => tracing::debug!("Forwarded connection from {} ended: {}", peer, e),
        },
    }
}
