use std::time::Duration;

/// Default number of rows per page when a request leaves it unset.
pub const DEFAULT_PAGE_SIZE: i64 = 50;

/// Timeouts and pool limits applied to every connection the manager opens.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Upper bound for opening the pool (and acquiring a connection from it)
    pub connect_timeout: Duration,
    /// Upper bound for the post-connect liveness probe
    pub ping_timeout: Duration,
    /// Upper bound for SSH connect + authentication
    pub ssh_timeout: Duration,
    pub max_connections: u32,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            ping_timeout: Duration::from_secs(5),
            ssh_timeout: Duration::from_secs(15),
            max_connections: 10,
            idle_timeout: Duration::from_secs(60),
            max_lifetime: Duration::from_secs(5 * 60),
        }
    }
}

impl ClientSettings {
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_ping_timeout(mut self, timeout: Duration) -> Self {
        self.ping_timeout = timeout;
        self
    }

    pub fn with_ssh_timeout(mut self, timeout: Duration) -> Self {
        self.ssh_timeout = timeout;
        self
    }

    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max.max(1);
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_max_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_lifetime = lifetime;
        self
    }
}
