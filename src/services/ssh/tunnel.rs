//! SSH tunnel: one authenticated russh session plus a local forwarding listener.

use super::client::{ClientHandler, open_session};
use super::error::TunnelError;
use super::forward::{Forwarder, RemoteDialer, TunnelStream};
use super::types::SshTunnelConfig;
use async_trait::async_trait;
use russh::client::Handle;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

/// Lifecycle of an [`SshTunnel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    /// Constructed, no network activity yet
    Idle,
    /// Session authenticated and listener accepting
    Active,
    /// Closed; cannot be restarted
    Closed,
}

/// Running tunnel as seen by the connection manager.
#[async_trait]
pub trait Tunnel: Send + Sync {
    /// Loopback address that forwards to the remote target.
    fn local_addr(&self) -> Option<SocketAddr>;

    /// Stop forwarding and disconnect. Idempotent.
    async fn close(&mut self) -> Result<(), TunnelError>;
}

/// Builds started tunnels from a configuration.
#[async_trait]
pub trait TunnelOpener: Send + Sync {
    async fn open(&self, config: SshTunnelConfig) -> Result<Box<dyn Tunnel>, TunnelError>;
}

/// Opens real [`SshTunnel`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct SshTunnelOpener;

#[async_trait]
impl TunnelOpener for SshTunnelOpener {
    async fn open(&self, config: SshTunnelConfig) -> Result<Box<dyn Tunnel>, TunnelError> {
        let mut tunnel = SshTunnel::new(config)?;
        tunnel.start().await?;
        Ok(Box::new(tunnel))
    }
}

/// Opens a `direct-tcpip` channel to the fixed remote target for every dial.
struct ChannelDialer {
    session: Arc<Handle<ClientHandler>>,
    remote_host: String,
    remote_port: u16,
}

impl RemoteDialer for ChannelDialer {
    async fn dial(&self, peer: SocketAddr) -> io::Result<Box<dyn TunnelStream>> {
        let channel = self
            .session
            .channel_open_direct_tcpip(
                self.remote_host.as_str(),
                self.remote_port as u32,
                peer.ip().to_string(),
                peer.port() as u32,
            )
            .await
            .map_err(|e| io::Error::other(format!("direct-tcpip channel failed: {}", e)))?;
        Ok(Box::new(channel.into_stream()))
    }
}

/// An SSH port-forward from a local ephemeral port to one remote address.
pub struct SshTunnel {
    config: SshTunnelConfig,
    state: TunnelState,
    session: Option<Arc<Handle<ClientHandler>>>,
    forwarder: Option<Forwarder>,
}

impl SshTunnel {
    /// Validate the configuration. No network activity happens here.
    pub fn new(config: SshTunnelConfig) -> Result<Self, TunnelError> {
        if config.ssh_host.trim().is_empty() {
            return Err(TunnelError::Config("SSH host is required".to_string()));
        }
        if config.auth_methods.is_empty() {
            return Err(TunnelError::Config(
                "no SSH authentication method provided (password or private key)".to_string(),
            ));
        }
        Ok(Self {
            config,
            state: TunnelState::Idle,
            session: None,
            forwarder: None,
        })
    }

    /// Connect, authenticate and start forwarding. Returns the local address.
    pub async fn start(&mut self) -> Result<SocketAddr, TunnelError> {
        if self.state != TunnelState::Idle {
            return Err(TunnelError::Config(format!(
                "tunnel cannot be started from state {:?}",
                self.state
            )));
        }

        let session = Arc::new(open_session(&self.config).await?);
        let dialer = ChannelDialer {
            session: session.clone(),
            remote_host: self.config.remote_host.clone(),
            remote_port: self.config.remote_port,
        };

        let forwarder = match Forwarder::bind(&self.config.local_bind_host, dialer).await {
            Ok(forwarder) => forwarder,
            Err(e) => {
                disconnect(&session).await.ok();
                self.state = TunnelState::Closed;
                return Err(e);
            }
        };

        let local_addr = forwarder.local_addr();
        tracing::info!(
            "SSH tunnel active: {} -> {} via {}",
            local_addr,
            self.config.remote_addr(),
            self.config.ssh_url()
        );

        self.session = Some(session);
        self.forwarder = Some(forwarder);
        self.state = TunnelState::Active;
        Ok(local_addr)
    }

    pub fn state(&self) -> TunnelState {
        self.state
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.forwarder.as_ref().map(Forwarder::local_addr)
    }

    /// Address the tunnel forwards to, as seen from the jump host.
    pub fn remote_addr(&self) -> String {
        self.config.remote_addr()
    }

    pub fn config(&self) -> &SshTunnelConfig {
        &self.config
    }

    /// Stop accepting, disconnect the session and wait for every forwarding
    /// task to exit.
    pub async fn close(&mut self) -> Result<(), TunnelError> {
        if self.state == TunnelState::Closed {
            return Ok(());
        }
        self.state = TunnelState::Closed;

        if let Some(forwarder) = &self.forwarder {
            forwarder.cancel();
        }

        let mut result = Ok(());
        if let Some(session) = self.session.take() {
            result = disconnect(&session).await;
        }

        if let Some(mut forwarder) = self.forwarder.take() {
            forwarder.join().await;
        }

        tracing::info!("SSH tunnel to {} closed", self.config.remote_addr());
        result
    }
}

#[async_trait]
impl Tunnel for SshTunnel {
    fn local_addr(&self) -> Option<SocketAddr> {
        SshTunnel::local_addr(self)
    }

    async fn close(&mut self) -> Result<(), TunnelError> {
        SshTunnel::close(self).await
    }
}

async fn disconnect(session: &Handle<ClientHandler>) -> Result<(), TunnelError> {
    if session.is_closed() {
        return Ok(());
    }
    session
        .disconnect(russh::Disconnect::ByApplication, "", "en")
        .await
        .map_err(TunnelError::from)
}
