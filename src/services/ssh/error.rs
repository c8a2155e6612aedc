use std::time::Duration;
use thiserror::Error;

/// Errors raised while setting up or tearing down an SSH tunnel.
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("SSH tunnel configuration error: {0}")]
    Config(String),

    #[error("failed to connect to SSH server {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: russh::Error,
    },

    #[error("SSH connection to {addr} timed out after {timeout:?}")]
    Timeout { addr: String, timeout: Duration },

    #[error("SSH authentication failed for {user}: {reason}")]
    Authentication { user: String, reason: String },

    #[error("failed to load SSH private key: {0}")]
    Key(String),

    #[error("failed to bind local listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("SSH protocol error: {0}")]
    Ssh(#[from] russh::Error),
}

impl TunnelError {
    /// Whether retrying the same tunnel setup could succeed.
    ///
    /// Configuration, key and authentication failures never fix themselves;
    /// timeouts and refused/unreachable jump hosts may.
    pub fn is_retriable(&self) -> bool {
        match self {
            TunnelError::Timeout { .. } | TunnelError::Connect { .. } => true,
            TunnelError::Bind { source, .. } => {
                source.kind() == std::io::ErrorKind::AddrInUse
            }
            _ => false,
        }
    }
}
