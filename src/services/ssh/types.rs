//! SSH tunnel configuration types.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default SSH port used when the jump host port is left unset.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Authentication method for the jump host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum SshAuthMethod {
    /// Password authentication
    Password(String),
    /// Private key, given either as PEM/OpenSSH content or as a file path
    PrivateKey {
        key: String,
        passphrase: Option<String>,
    },
}

impl SshAuthMethod {
    /// Short name used in logs and error messages
    pub fn label(&self) -> &'static str {
        match self {
            SshAuthMethod::Password(_) => "password",
            SshAuthMethod::PrivateKey { .. } => "publickey",
        }
    }
}

/// Configuration for one SSH port-forward to a fixed remote address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshTunnelConfig {
    /// SSH server hostname
    pub ssh_host: String,
    /// SSH server port (0 means 22)
    pub ssh_port: u16,
    /// SSH username
    pub ssh_user: String,
    /// Authentication methods, tried in order until one succeeds
    pub auth_methods: Vec<SshAuthMethod>,
    /// Remote host to tunnel to (as seen from SSH server)
    pub remote_host: String,
    /// Remote port to tunnel to
    pub remote_port: u16,
    /// Local bind address (default: 127.0.0.1)
    pub local_bind_host: String,
    /// Upper bound for connecting and authenticating to the jump host
    pub connect_timeout: Duration,
}

impl SshTunnelConfig {
    /// Create a configuration with no authentication methods yet.
    pub fn new(
        ssh_host: impl Into<String>,
        ssh_port: u16,
        ssh_user: impl Into<String>,
        remote_host: impl Into<String>,
        remote_port: u16,
    ) -> Self {
        Self {
            ssh_host: ssh_host.into(),
            ssh_port,
            ssh_user: ssh_user.into(),
            auth_methods: Vec::new(),
            remote_host: remote_host.into(),
            remote_port,
            local_bind_host: "127.0.0.1".to_string(),
            connect_timeout: Duration::from_secs(15),
        }
    }

    /// Create a new SSH tunnel configuration with password authentication
    pub fn with_password(
        ssh_host: impl Into<String>,
        ssh_port: u16,
        ssh_user: impl Into<String>,
        password: impl Into<String>,
        remote_host: impl Into<String>,
        remote_port: u16,
    ) -> Self {
        Self::new(ssh_host, ssh_port, ssh_user, remote_host, remote_port)
            .add_auth(SshAuthMethod::Password(password.into()))
    }

    /// Create a new SSH tunnel configuration with private key authentication
    pub fn with_private_key(
        ssh_host: impl Into<String>,
        ssh_port: u16,
        ssh_user: impl Into<String>,
        key: impl Into<String>,
        passphrase: Option<String>,
        remote_host: impl Into<String>,
        remote_port: u16,
    ) -> Self {
        Self::new(ssh_host, ssh_port, ssh_user, remote_host, remote_port).add_auth(
            SshAuthMethod::PrivateKey {
                key: key.into(),
                passphrase,
            },
        )
    }

    /// Append an authentication method
    pub fn add_auth(mut self, method: SshAuthMethod) -> Self {
        self.auth_methods.push(method);
        self
    }

    /// Set the local bind host
    pub fn with_local_bind_host(mut self, host: impl Into<String>) -> Self {
        self.local_bind_host = host.into();
        self
    }

    /// Set the connect + authenticate timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Jump host port with the default applied
    pub fn effective_ssh_port(&self) -> u16 {
        if self.ssh_port == 0 {
            DEFAULT_SSH_PORT
        } else {
            self.ssh_port
        }
    }

    /// Address of the jump host (host:port)
    pub fn ssh_addr(&self) -> String {
        format_host_port(&self.ssh_host, self.effective_ssh_port())
    }

    /// Address the tunnel forwards to, as seen from the jump host
    pub fn remote_addr(&self) -> String {
        format_host_port(&self.remote_host, self.remote_port)
    }

    /// Build the SSH URL (user@host)
    pub fn ssh_url(&self) -> String {
        if self.ssh_user.is_empty() {
            self.ssh_host.clone()
        } else {
            format!("{}@{}", self.ssh_user, self.ssh_host)
        }
    }
}

/// Join a host and port, bracketing bare IPv6 literals.
pub fn format_host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}
