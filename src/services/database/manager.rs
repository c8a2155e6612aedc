use async_lock::{Mutex, RwLock};
use std::sync::Arc;

use super::driver::{Connection, Driver, DriverRegistry};
use super::error::{DatabaseError, Result};
use super::settings::ClientSettings;
use super::types::{ConnectionConfig, ExecuteResult, QueryResult};
use crate::services::ssh::{SshTunnelOpener, Tunnel, TunnelOpener};

/// The single live database session.
struct Session {
    connection: Arc<dyn Connection>,
    driver: Arc<dyn Driver>,
    /// Configuration as handed to `connect`
    config: ConnectionConfig,
    /// Configuration the driver actually connected with (tunnel-local address)
    effective: ConnectionConfig,
    /// Logical `host:port` before any tunnel rewrite
    display_target: String,
    tunnel: Option<Box<dyn Tunnel>>,
}

impl Session {
    /// Close the connection, then the tunnel. Both are attempted; the first
    /// error is returned.
    async fn close(self) -> Result<()> {
        let mut result = self.connection.close().await;
        if let Err(e) = &result {
            tracing::warn!("Error closing connection to {}: {}", self.display_target, e);
        }

        if let Some(mut tunnel) = self.tunnel {
            if let Err(e) = tunnel.close().await {
                tracing::warn!("Error closing SSH tunnel for {}: {}", self.display_target, e);
                if result.is_ok() {
                    result = Err(e.into());
                }
            }
        }

        tracing::info!("Disconnected from {}", self.display_target);
        result
    }
}

enum SessionState {
    Disconnected,
    Connecting,
    Connected(Session),
}

/// Owns at most one database session and the tunnel underneath it.
///
/// The state lock is only held to swap state, never across network I/O.
/// `connect` and `disconnect` are serialized end to end by `lifecycle`.
#[derive(Clone)]
pub struct DatabaseManager {
    state: Arc<RwLock<SessionState>>,
    lifecycle: Arc<Mutex<()>>,
    drivers: Arc<DriverRegistry>,
    tunnels: Arc<dyn TunnelOpener>,
    settings: ClientSettings,
}

impl Default for DatabaseManager {
    fn default() -> Self {
        Self::new()
    }
}

impl DatabaseManager {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(SessionState::Disconnected)),
            lifecycle: Arc::new(Mutex::new(())),
            drivers: Arc::new(DriverRegistry::with_defaults()),
            tunnels: Arc::new(SshTunnelOpener),
            settings: ClientSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: ClientSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_drivers(mut self, drivers: DriverRegistry) -> Self {
        self.drivers = Arc::new(drivers);
        self
    }

    pub fn with_tunnel_opener(mut self, tunnels: Arc<dyn TunnelOpener>) -> Self {
        self.tunnels = tunnels;
        self
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    /// Replace the current session with a new one for `config`.
    ///
    /// Any existing session is torn down first. On failure the manager is
    /// left disconnected and any tunnel opened along the way is closed.
    pub async fn connect(&self, config: ConnectionConfig) -> Result<()> {
        let _guard = self.lifecycle.lock().await;

        let previous = std::mem::replace(&mut *self.state.write().await, SessionState::Connecting);
        if let SessionState::Connected(session) = previous {
            if let Err(e) = session.close().await {
                tracing::warn!("Previous session did not close cleanly: {}", e);
            }
        }

        match self.establish(config).await {
            Ok(session) => {
                tracing::info!(
                    "Connected to {} ({})",
                    session.display_target,
                    session.driver.dialect()
                );
                *self.state.write().await = SessionState::Connected(session);
                Ok(())
            }
            Err(e) => {
                tracing::error!("Connection failed: {}", e);
                *self.state.write().await = SessionState::Disconnected;
                Err(e)
            }
        }
    }

    async fn establish(&self, config: ConnectionConfig) -> Result<Session> {
        // resolve before any network activity
        let driver = self.drivers.resolve(&config.db_type)?;

        let mut effective = config.clone();
        if effective.port == 0 {
            effective.port = driver.default_port();
        }
        let display_target = effective.address();

        let tunnel = self.open_tunnel(&mut effective).await?;

        match driver.connect(&effective, &self.settings).await {
            Ok(connection) => Ok(Session {
                connection,
                driver,
                config,
                effective,
                display_target,
                tunnel,
            }),
            Err(e) => {
                if let Some(mut tunnel) = tunnel {
                    if let Err(close_err) = tunnel.close().await {
                        tracing::warn!("Error closing SSH tunnel after failed connect: {}", close_err);
                    }
                }
                Err(e)
            }
        }
    }

    /// Open a tunnel if `config` asks for one and point `config` at its
    /// local end.
    async fn open_tunnel(&self, config: &mut ConnectionConfig) -> Result<Option<Box<dyn Tunnel>>> {
        let Some(tunnel_config) = config.ssh_tunnel_config(self.settings.ssh_timeout) else {
            return Ok(None);
        };

        let mut tunnel = self.tunnels.open(tunnel_config).await?;
        let Some(local) = tunnel.local_addr() else {
            tunnel.close().await.ok();
            return Err(DatabaseError::Config(
                "SSH tunnel started without a local address".to_string(),
            ));
        };

        tracing::debug!("Routing {} through tunnel at {}", config.address(), local);
        config.host = local.ip().to_string();
        config.port = local.port();
        Ok(Some(tunnel))
    }

    /// Close the current session, if any. The manager is disconnected
    /// afterwards even when closing reports an error.
    pub async fn disconnect(&self) -> Result<()> {
        let _guard = self.lifecycle.lock().await;

        let previous =
            std::mem::replace(&mut *self.state.write().await, SessionState::Disconnected);
        match previous {
            SessionState::Connected(session) => session.close().await,
            _ => Ok(()),
        }
    }

    /// Connect, probe and close without touching the current session.
    ///
    /// A configured SSH tunnel is opened privately for the test and closed
    /// before returning.
    pub async fn test_connection(&self, config: &ConnectionConfig) -> Result<bool> {
        let driver = self.drivers.resolve(&config.db_type)?;

        let mut effective = config.clone();
        if effective.port == 0 {
            effective.port = driver.default_port();
        }
        let tunnel = self.open_tunnel(&mut effective).await?;

        let probe = async {
            let connection = driver.connect(&effective, &self.settings).await?;
            let pinged = connection.ping().await;
            let closed = connection.close().await;
            pinged.and(closed)
        }
        .await;

        if let Some(mut tunnel) = tunnel {
            if let Err(e) = tunnel.close().await {
                tracing::warn!("Error closing test tunnel: {}", e);
            }
        }

        probe.map(|_| true)
    }

    pub async fn is_connected(&self) -> bool {
        matches!(*self.state.read().await, SessionState::Connected(_))
    }

    /// Configuration of the current session as originally given.
    pub async fn current_config(&self) -> Option<ConnectionConfig> {
        match &*self.state.read().await {
            SessionState::Connected(session) => Some(session.config.clone()),
            _ => None,
        }
    }

    /// Configuration the driver connected with, tunnel rewrite included.
    pub async fn effective_config(&self) -> Option<ConnectionConfig> {
        match &*self.state.read().await {
            SessionState::Connected(session) => Some(session.effective.clone()),
            _ => None,
        }
    }

    pub async fn display_target(&self) -> Option<String> {
        match &*self.state.read().await {
            SessionState::Connected(session) => Some(session.display_target.clone()),
            _ => None,
        }
    }

    /// Connection and driver of the current session.
    pub(crate) async fn active(&self) -> Result<(Arc<dyn Connection>, Arc<dyn Driver>)> {
        match &*self.state.read().await {
            SessionState::Connected(session) => {
                Ok((session.connection.clone(), session.driver.clone()))
            }
            _ => Err(DatabaseError::NotConnected),
        }
    }

    /// Run a query that returns rows.
    pub async fn execute_query(&self, sql: &str) -> Result<QueryResult> {
        let (connection, _) = self.active().await?;
        let sql = non_empty(sql)?;
        connection.fetch(sql, &[]).await
    }

    /// Run a statement that returns no rows.
    pub async fn execute_statement(&self, sql: &str) -> Result<ExecuteResult> {
        let (connection, _) = self.active().await?;
        let sql = non_empty(sql)?;
        connection.execute(sql, &[]).await
    }
}

fn non_empty(sql: &str) -> Result<&str> {
    let sql = sql.trim();
    if sql.is_empty() {
        Err(DatabaseError::InvalidInput("empty query".to_string()))
    } else {
        Ok(sql)
    }
}

#[cfg(test)]
pub(crate) mod fakes {
    use super::*;
    use crate::services::database::mysql::MySqlDriver;
    use crate::services::database::types::{
        ColumnInfo, Dialect, IndexInfo, TableAlteration, TableDataRequest, TableInfo,
    };
    use crate::services::ssh::{SshTunnelConfig, TunnelError};
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::net::SocketAddr;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Connection that records statements and answers fetches with canned rows.
    pub struct FakeConnection {
        pub closed: AtomicBool,
        pub close_error: bool,
        pub count: i64,
        pub rows: Vec<Vec<Value>>,
        pub statements: StdMutex<Vec<(String, Vec<Value>)>>,
    }

    impl FakeConnection {
        pub fn new(close_error: bool) -> Self {
            Self {
                closed: AtomicBool::new(false),
                close_error,
                count: 3,
                rows: vec![
                    vec![json!(1), json!("ada")],
                    vec![json!(2), json!("grace")],
                    vec![json!(3), json!("linus")],
                ],
                statements: StdMutex::new(Vec::new()),
            }
        }

        pub fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }

        pub fn statements(&self) -> Vec<(String, Vec<Value>)> {
            self.statements.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Connection for FakeConnection {
        async fn fetch(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
            self.statements
                .lock()
                .unwrap()
                .push((sql.to_string(), params.to_vec()));
            if sql.starts_with("SELECT COUNT(*)") {
                return Ok(QueryResult::new(
                    vec!["COUNT(*)".into()],
                    vec![vec![json!(self.count)]],
                ));
            }
            Ok(QueryResult::new(
                vec!["id".into(), "name".into()],
                self.rows.clone(),
            ))
        }

        async fn execute(&self, sql: &str, params: &[Value]) -> Result<ExecuteResult> {
            self.statements
                .lock()
                .unwrap()
                .push((sql.to_string(), params.to_vec()));
            if sql.contains("DROP COLUMN `broken`") {
                return Err(DatabaseError::Query(sqlx::Error::Protocol(
                    "Unknown column 'broken'".into(),
                )));
            }
            Ok(ExecuteResult {
                rows_affected: params.len().max(1) as u64,
                last_insert_id: 0,
            })
        }

        async fn ping(&self) -> Result<()> {
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            self.closed.store(true, Ordering::SeqCst);
            if self.close_error {
                Err(DatabaseError::Query(sqlx::Error::PoolClosed))
            } else {
                Ok(())
            }
        }
    }

    /// Driver that fakes connect and introspection but renders SQL with the
    /// real MySQL builders.
    #[derive(Default)]
    pub struct FakeDriver {
        pub inner: MySqlDriver,
        pub fail_connect: AtomicBool,
        pub close_error: bool,
        pub connects: StdMutex<Vec<ConnectionConfig>>,
        pub connections: StdMutex<Vec<Arc<FakeConnection>>>,
    }

    impl FakeDriver {
        pub fn failing() -> Self {
            Self {
                fail_connect: AtomicBool::new(true),
                ..Default::default()
            }
        }

        pub fn connect_count(&self) -> usize {
            self.connects.lock().unwrap().len()
        }

        pub fn last_connect(&self) -> Option<ConnectionConfig> {
            self.connects.lock().unwrap().last().cloned()
        }

        pub fn connection(&self, i: usize) -> Arc<FakeConnection> {
            self.connections.lock().unwrap()[i].clone()
        }
    }

    #[async_trait]
    impl Driver for FakeDriver {
        fn dialect(&self) -> Dialect {
            Dialect::MySql
        }

        async fn connect(
            &self,
            config: &ConnectionConfig,
            _settings: &ClientSettings,
        ) -> Result<Arc<dyn Connection>> {
            self.connects.lock().unwrap().push(config.clone());
            if self.fail_connect.load(Ordering::SeqCst) {
                return Err(DatabaseError::Connect {
                    target: config.address(),
                    source: sqlx::Error::Protocol("access denied".into()),
                });
            }
            let connection = Arc::new(FakeConnection::new(self.close_error));
            self.connections.lock().unwrap().push(connection.clone());
            Ok(connection)
        }

        async fn list_databases(&self, _conn: &dyn Connection) -> Result<Vec<String>> {
            Ok(vec!["app".into(), "mysql".into()])
        }

        async fn list_tables(&self, _conn: &dyn Connection, _database: &str) -> Result<Vec<TableInfo>> {
            Ok(vec![TableInfo {
                name: "users".into(),
                engine: "InnoDB".into(),
                ..Default::default()
            }])
        }

        async fn list_columns(
            &self,
            _conn: &dyn Connection,
            _database: &str,
            _table: &str,
        ) -> Result<Vec<ColumnInfo>> {
            Ok(vec![
                ColumnInfo {
                    name: "id".into(),
                    data_type: "int".into(),
                    key: "PRI".into(),
                    ..Default::default()
                },
                ColumnInfo {
                    name: "name".into(),
                    data_type: "varchar(64)".into(),
                    nullable: true,
                    ..Default::default()
                },
            ])
        }

        async fn list_indexes(
            &self,
            _conn: &dyn Connection,
            _database: &str,
            _table: &str,
        ) -> Result<Vec<IndexInfo>> {
            Ok(vec![IndexInfo {
                name: "PRIMARY".into(),
                columns: vec!["id".into()],
                is_unique: true,
                is_primary: true,
            }])
        }

        fn build_table_data_query(&self, req: &TableDataRequest, primary_key: &str) -> String {
            self.inner.build_table_data_query(req, primary_key)
        }

        fn build_count_query(&self, database: &str, table: &str, filters: &str) -> String {
            self.inner.build_count_query(database, table, filters)
        }

        fn build_alter_table(
            &self,
            database: &str,
            table: &str,
            alteration: &TableAlteration,
        ) -> Result<Vec<String>> {
            self.inner.build_alter_table(database, table, alteration)
        }

        fn build_truncate(&self, database: &str, table: &str) -> String {
            self.inner.build_truncate(database, table)
        }

        fn build_drop(&self, database: &str, table: &str) -> String {
            self.inner.build_drop(database, table)
        }

        fn build_insert(&self, database: &str, table: &str, columns: &[String]) -> String {
            self.inner.build_insert(database, table, columns)
        }

        fn build_update(
            &self,
            database: &str,
            table: &str,
            primary_key: &str,
            columns: &[String],
        ) -> String {
            self.inner.build_update(database, table, primary_key, columns)
        }

        fn build_delete(&self, database: &str, table: &str, primary_key: &str) -> String {
            self.inner.build_delete(database, table, primary_key)
        }

        fn build_batch_delete(
            &self,
            database: &str,
            table: &str,
            primary_key: &str,
            count: usize,
        ) -> String {
            self.inner.build_batch_delete(database, table, primary_key, count)
        }

        fn quote_identifier(&self, name: &str) -> String {
            self.inner.quote_identifier(name)
        }
    }

    /// Tunnel backed by a plain loopback listener that is dropped on close.
    pub struct FakeTunnel {
        listener: Option<tokio::net::TcpListener>,
        local_addr: SocketAddr,
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Tunnel for FakeTunnel {
        fn local_addr(&self) -> Option<SocketAddr> {
            Some(self.local_addr)
        }

        async fn close(&mut self) -> std::result::Result<(), TunnelError> {
            self.listener.take();
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct FakeTunnelOpener {
        pub fail: bool,
        pub opens: AtomicUsize,
        pub configs: StdMutex<Vec<SshTunnelConfig>>,
        pub addrs: StdMutex<Vec<SocketAddr>>,
        pub closed: StdMutex<Vec<Arc<AtomicBool>>>,
    }

    impl FakeTunnelOpener {
        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Default::default()
            }
        }

        pub fn open_count(&self) -> usize {
            self.opens.load(Ordering::SeqCst)
        }

        pub fn all_closed(&self) -> bool {
            self.closed
                .lock()
                .unwrap()
                .iter()
                .all(|c| c.load(Ordering::SeqCst))
        }
    }

    #[async_trait]
    impl TunnelOpener for FakeTunnelOpener {
        async fn open(
            &self,
            config: SshTunnelConfig,
        ) -> std::result::Result<Box<dyn Tunnel>, TunnelError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            self.configs.lock().unwrap().push(config.clone());
            if self.fail {
                return Err(TunnelError::Authentication {
                    user: config.ssh_user,
                    reason: "password rejected".into(),
                });
            }

            let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
                .await
                .map_err(|source| TunnelError::Bind {
                    addr: "127.0.0.1:0".into(),
                    source,
                })?;
            let local_addr = listener.local_addr().map_err(|source| TunnelError::Bind {
                addr: "127.0.0.1:0".into(),
                source,
            })?;
            let closed = Arc::new(AtomicBool::new(false));
            self.addrs.lock().unwrap().push(local_addr);
            self.closed.lock().unwrap().push(closed.clone());

            Ok(Box::new(FakeTunnel {
                listener: Some(listener),
                local_addr,
                closed,
            }))
        }
    }

    pub fn manager_with(driver: Arc<FakeDriver>, opener: Arc<FakeTunnelOpener>) -> DatabaseManager {
        let mut registry = DriverRegistry::empty();
        registry.register(driver);
        DatabaseManager::new()
            .with_drivers(registry)
            .with_tunnel_opener(opener)
    }

    pub fn mysql_config() -> ConnectionConfig {
        ConnectionConfig {
            db_type: "mysql".into(),
            host: "db.internal".into(),
            port: 3306,
            user: "app".into(),
            password: "secret".into(),
            database: "app".into(),
            ..Default::default()
        }
    }

    pub fn tunneled_config() -> ConnectionConfig {
        ConnectionConfig {
            use_ssh_tunnel: true,
            ssh_host: "bastion".into(),
            ssh_user: "deploy".into(),
            ssh_password: "pw".into(),
            ..mysql_config()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fakes::*;
    use super::*;
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn test_connect_installs_session() {
        let driver = Arc::new(FakeDriver::default());
        let opener = Arc::new(FakeTunnelOpener::default());
        let manager = manager_with(driver.clone(), opener.clone());

        assert!(!manager.is_connected().await);
        manager.connect(mysql_config()).await.unwrap();

        assert!(manager.is_connected().await);
        assert_eq!(manager.current_config().await, Some(mysql_config()));
        assert_eq!(manager.display_target().await.as_deref(), Some("db.internal:3306"));
        assert_eq!(opener.open_count(), 0);
        assert_eq!(driver.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_default_port_applied_before_connect() {
        let driver = Arc::new(FakeDriver::default());
        let manager = manager_with(driver.clone(), Arc::new(FakeTunnelOpener::default()));

        let config = ConnectionConfig {
            port: 0,
            ..mysql_config()
        };
        manager.connect(config.clone()).await.unwrap();

        assert_eq!(driver.last_connect().unwrap().port, 3306);
        assert_eq!(manager.current_config().await, Some(config));
    }

    #[tokio::test]
    async fn test_unsupported_dialect_opens_no_tunnel() {
        let driver = Arc::new(FakeDriver::default());
        let opener = Arc::new(FakeTunnelOpener::default());
        let manager = manager_with(driver.clone(), opener.clone());

        let config = ConnectionConfig {
            db_type: "oracle".into(),
            ..tunneled_config()
        };
        let err = manager.connect(config).await.unwrap_err();

        assert!(matches!(err, DatabaseError::UnsupportedDialect(_)));
        assert_eq!(opener.open_count(), 0);
        assert_eq!(driver.connect_count(), 0);
        assert!(!manager.is_connected().await);
    }

    #[tokio::test]
    async fn test_tunnel_failure_skips_driver() {
        let driver = Arc::new(FakeDriver::default());
        let opener = Arc::new(FakeTunnelOpener::failing());
        let manager = manager_with(driver.clone(), opener.clone());

        let err = manager.connect(tunneled_config()).await.unwrap_err();

        assert!(matches!(err, DatabaseError::Tunnel(_)));
        assert_eq!(opener.open_count(), 1);
        assert_eq!(driver.connect_count(), 0);
        assert!(!manager.is_connected().await);
        assert!(manager.current_config().await.is_none());
    }

    #[tokio::test]
    async fn test_tunnel_rewrites_effective_address() {
        let driver = Arc::new(FakeDriver::default());
        let opener = Arc::new(FakeTunnelOpener::default());
        let manager = manager_with(driver.clone(), opener.clone());

        manager.connect(tunneled_config()).await.unwrap();

        let tunnel_addr = opener.addrs.lock().unwrap()[0];
        let seen = driver.last_connect().unwrap();
        assert_eq!(seen.host, "127.0.0.1");
        assert_eq!(seen.port, tunnel_addr.port());

        let tunnel_config = opener.configs.lock().unwrap()[0].clone();
        assert_eq!(tunnel_config.remote_addr(), "db.internal:3306");
        assert_eq!(tunnel_config.ssh_addr(), "bastion:22");

        assert_eq!(manager.display_target().await.as_deref(), Some("db.internal:3306"));
        assert_eq!(manager.current_config().await.unwrap().host, "db.internal");
        assert_eq!(manager.effective_config().await.unwrap().port, tunnel_addr.port());
    }

    #[tokio::test]
    async fn test_driver_failure_closes_tunnel() {
        let driver = Arc::new(FakeDriver::failing());
        let opener = Arc::new(FakeTunnelOpener::default());
        let manager = manager_with(driver.clone(), opener.clone());

        let err = manager.connect(tunneled_config()).await.unwrap_err();

        assert!(matches!(err, DatabaseError::Connect { .. }));
        assert_eq!(driver.connect_count(), 1);
        assert!(opener.all_closed());
        assert!(!manager.is_connected().await);

        let tunnel_addr = opener.addrs.lock().unwrap()[0];
        assert!(tokio::net::TcpStream::connect(tunnel_addr).await.is_err());
    }

    #[tokio::test]
    async fn test_disconnect_clears_state_on_close_error() {
        let driver = Arc::new(FakeDriver {
            close_error: true,
            ..Default::default()
        });
        let opener = Arc::new(FakeTunnelOpener::default());
        let manager = manager_with(driver.clone(), opener.clone());

        manager.connect(tunneled_config()).await.unwrap();
        let err = manager.disconnect().await.unwrap_err();

        assert!(matches!(err, DatabaseError::Query(_)));
        assert!(!manager.is_connected().await);
        assert!(driver.connection(0).is_closed());
        // tunnel is closed even though the connection close failed
        assert!(opener.all_closed());

        // second disconnect is a no-op
        manager.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_second_connect_tears_down_first() {
        let driver = Arc::new(FakeDriver::default());
        let opener = Arc::new(FakeTunnelOpener::default());
        let manager = manager_with(driver.clone(), opener.clone());

        manager.connect(tunneled_config()).await.unwrap();
        let first = driver.connection(0);
        let first_tunnel = opener.addrs.lock().unwrap()[0];

        let second = ConnectionConfig {
            host: "replica.internal".into(),
            ..mysql_config()
        };
        manager.connect(second.clone()).await.unwrap();

        assert!(first.is_closed());
        assert!(opener.all_closed());
        assert!(tokio::net::TcpStream::connect(first_tunnel).await.is_err());
        assert!(!driver.connection(1).is_closed());
        assert_eq!(manager.current_config().await, Some(second));
    }

    #[tokio::test]
    async fn test_failed_reconnect_leaves_disconnected() {
        let driver = Arc::new(FakeDriver::default());
        let manager = manager_with(driver.clone(), Arc::new(FakeTunnelOpener::default()));

        manager.connect(mysql_config()).await.unwrap();
        let bad = ConnectionConfig {
            db_type: "mssql".into(),
            ..mysql_config()
        };
        assert!(manager.connect(bad).await.is_err());

        assert!(driver.connection(0).is_closed());
        assert!(!manager.is_connected().await);
    }

    #[tokio::test]
    async fn test_queries_require_session() {
        let manager = manager_with(
            Arc::new(FakeDriver::default()),
            Arc::new(FakeTunnelOpener::default()),
        );

        assert!(matches!(
            manager.execute_query("SELECT 1").await,
            Err(DatabaseError::NotConnected)
        ));
        assert!(matches!(
            manager.execute_statement("DELETE FROM t").await,
            Err(DatabaseError::NotConnected)
        ));

        manager.connect(mysql_config()).await.unwrap();
        assert!(matches!(
            manager.execute_query("   ").await,
            Err(DatabaseError::InvalidInput(_))
        ));
        let result = manager.execute_query("SELECT id, name FROM users").await.unwrap();
        assert_eq!(result.columns, vec!["id", "name"]);
        assert_eq!(result.row_count, 3);
    }

    #[tokio::test]
    async fn test_test_connection_leaves_session_alone() {
        let driver = Arc::new(FakeDriver::default());
        let opener = Arc::new(FakeTunnelOpener::default());
        let manager = manager_with(driver.clone(), opener.clone());

        manager.connect(mysql_config()).await.unwrap();
        assert!(manager.test_connection(&tunneled_config()).await.unwrap());

        // private tunnel and connection are both gone
        assert_eq!(opener.open_count(), 1);
        assert!(opener.all_closed());
        assert!(driver.connection(1).is_closed());

        assert!(manager.is_connected().await);
        assert!(!driver.connection(0).is_closed());
        assert_eq!(manager.current_config().await, Some(mysql_config()));
    }

    #[tokio::test]
    async fn test_failed_test_connection_closes_private_tunnel() {
        let driver = Arc::new(FakeDriver::default());
        let opener = Arc::new(FakeTunnelOpener::default());
        let manager = manager_with(driver.clone(), opener.clone());
        manager.connect(mysql_config()).await.unwrap();

        driver.fail_connect.store(true, Ordering::SeqCst);
        let err = manager
            .test_connection(&tunneled_config())
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Connect { .. }));

        assert_eq!(opener.open_count(), 1);
        assert!(opener.all_closed());

        assert!(manager.is_connected().await);
        assert!(!driver.connection(0).is_closed());
        assert_eq!(manager.current_config().await, Some(mysql_config()));
        assert!(manager.execute_query("SELECT 1").await.is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_connects_serialize() {
        let driver = Arc::new(FakeDriver::default());
        let manager = manager_with(driver.clone(), Arc::new(FakeTunnelOpener::default()));

        let a = manager.clone();
        let b = manager.clone();
        let (ra, rb) = tokio::join!(a.connect(mysql_config()), b.connect(mysql_config()));
        ra.unwrap();
        rb.unwrap();

        assert_eq!(driver.connect_count(), 2);
        let closed: Vec<_> = (0..2).map(|i| driver.connection(i).is_closed()).collect();
        assert_eq!(closed, vec![true, false]);
        assert!(manager.is_connected().await);
    }
}
