//! SSH tunneling for database connections.
//!
//! This module provides:
//! - `SshTunnel` - russh session to a jump host plus a local port-forward
//! - `Forwarder` - the SSH-agnostic accept/forward loop behind it
//! - `TunnelOpener` - seam used by the connection manager to open tunnels

mod client;
mod error;
mod forward;
mod tunnel;
mod types;

pub use client::load_private_key;
pub use error::TunnelError;
pub use forward::{Forwarder, RemoteDialer, TunnelStream};
pub use tunnel::{SshTunnel, SshTunnelOpener, Tunnel, TunnelOpener, TunnelState};
pub use types::{DEFAULT_SSH_PORT, SshAuthMethod, SshTunnelConfig, format_host_port};
