//! Connection configuration, dialect selection and result record types.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::mysql::MySqlSslMode;
use sqlx::postgres::PgSslMode;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use super::error::DatabaseError;
use crate::services::ssh::{SshAuthMethod, SshTunnelConfig, format_host_port};

/// SQL dialect a connection speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    MySql,
    Postgres,
}

impl Dialect {
    /// Parse a profile's `type` tag. An empty tag means MySQL.
    pub fn from_tag(tag: &str) -> Result<Self, DatabaseError> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "" | "mysql" => Ok(Dialect::MySql),
            "postgres" | "postgresql" => Ok(Dialect::Postgres),
            _ => Err(DatabaseError::UnsupportedDialect(tag.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::MySql => "mysql",
            Dialect::Postgres => "postgres",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Dialect::MySql => 3306,
            Dialect::Postgres => 5432,
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dialect {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Dialect::from_tag(s)
    }
}

/// SSL mode options, shared by both dialects
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SslMode {
    Disable,
    #[default]
    Prefer,
    Require,
    VerifyCa,
    VerifyFull,
}

impl SslMode {
    /// Parse an SSL mode from the profile string
    pub fn from_config_str(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "disable" => SslMode::Disable,
            "prefer" => SslMode::Prefer,
            "require" => SslMode::Require,
            "verify-ca" => SslMode::VerifyCa,
            "verify-full" => SslMode::VerifyFull,
            _ => SslMode::Prefer,
        }
    }

    pub fn to_config_str(&self) -> &'static str {
        match self {
            SslMode::Disable => "disable",
            SslMode::Prefer => "prefer",
            SslMode::Require => "require",
            SslMode::VerifyCa => "verify-ca",
            SslMode::VerifyFull => "verify-full",
        }
    }

    /// Convert to sqlx PgSslMode
    pub fn to_pg_ssl_mode(&self) -> PgSslMode {
        match self {
            SslMode::Disable => PgSslMode::Disable,
            SslMode::Prefer => PgSslMode::Prefer,
            SslMode::Require => PgSslMode::Require,
            SslMode::VerifyCa => PgSslMode::VerifyCa,
            SslMode::VerifyFull => PgSslMode::VerifyFull,
        }
    }

    /// Convert to sqlx MySqlSslMode
    pub fn to_mysql_ssl_mode(&self) -> MySqlSslMode {
        match self {
            SslMode::Disable => MySqlSslMode::Disabled,
            SslMode::Prefer => MySqlSslMode::Preferred,
            SslMode::Require => MySqlSslMode::Required,
            SslMode::VerifyCa => MySqlSslMode::VerifyCa,
            SslMode::VerifyFull => MySqlSslMode::VerifyIdentity,
        }
    }
}

/// Database connection settings as stored in a profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConnectionConfig {
    /// Dialect tag; empty means MySQL
    #[serde(rename = "type")]
    pub db_type: String,
    pub host: String,
    /// 0 means the dialect's default port
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,

    /// Display color for environment coding, e.g. "#ef4444" for prod
    pub color: String,

    #[serde(rename = "useSSL")]
    pub use_ssl: bool,
    pub ssl_mode: String,
    /// CA certificate path
    #[serde(rename = "sslCACert")]
    pub ssl_ca_cert: String,
    pub ssl_client_cert: String,
    pub ssl_client_key: String,

    #[serde(rename = "useSSHTunnel")]
    pub use_ssh_tunnel: bool,
    pub ssh_host: String,
    pub ssh_port: u16,
    pub ssh_user: String,
    pub ssh_password: String,
    /// PEM content or file path
    pub ssh_private_key: String,
    pub ssh_passphrase: String,
}

impl ConnectionConfig {
    pub fn dialect(&self) -> Result<Dialect, DatabaseError> {
        Dialect::from_tag(&self.db_type)
    }

    pub fn ssl(&self) -> SslMode {
        SslMode::from_config_str(&self.ssl_mode)
    }

    /// `host:port` of the configured target.
    pub fn address(&self) -> String {
        format_host_port(&self.host, self.port)
    }

    /// Tunnel settings for this profile, or `None` when tunneling is off.
    ///
    /// A private key is tried before the password when both are set.
    pub fn ssh_tunnel_config(&self, timeout: Duration) -> Option<SshTunnelConfig> {
        if !self.use_ssh_tunnel {
            return None;
        }

        let mut config = SshTunnelConfig::new(
            self.ssh_host.clone(),
            self.ssh_port,
            self.ssh_user.clone(),
            self.host.clone(),
            self.port,
        )
        .with_timeout(timeout);

        if !self.ssh_private_key.is_empty() {
            config = config.add_auth(SshAuthMethod::PrivateKey {
                key: self.ssh_private_key.clone(),
                passphrase: Some(self.ssh_passphrase.clone()).filter(|p| !p.is_empty()),
            });
        }
        if !self.ssh_password.is_empty() {
            config = config.add_auth(SshAuthMethod::Password(self.ssh_password.clone()));
        }
        Some(config)
    }
}

/// A profile saved under a user-chosen name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedConnection {
    pub name: String,
    pub config: ConnectionConfig,
}

/// Rows returned by a query, with cells as JSON values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub row_count: usize,
}

impl QueryResult {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        let row_count = rows.len();
        Self {
            columns,
            rows,
            row_count,
        }
    }

    /// Iterate rows with access by column name.
    pub fn records(&self) -> impl Iterator<Item = Record<'_>> {
        self.rows.iter().map(|values| Record {
            columns: &self.columns,
            values,
        })
    }
}

/// One row of a [`QueryResult`], addressed by case-insensitive column name.
#[derive(Debug, Clone, Copy)]
pub struct Record<'a> {
    columns: &'a [String],
    values: &'a [Value],
}

impl<'a> Record<'a> {
    pub fn get(&self, column: &str) -> Option<&'a Value> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(column))
            .and_then(|i| self.values.get(i))
    }

    /// Cell as text; NULL and missing columns read as empty.
    pub fn text(&self, column: &str) -> String {
        match self.get(column) {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        }
    }

    pub fn int(&self, column: &str) -> i64 {
        match self.get(column) {
            Some(Value::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_u64().map(|u| i64::try_from(u).unwrap_or(i64::MAX)))
                .or_else(|| n.as_f64().map(|f| f as i64))
                .unwrap_or_default(),
            Some(Value::String(s)) => s.trim().parse().unwrap_or_default(),
            Some(Value::Bool(b)) => i64::from(*b),
            _ => 0,
        }
    }

    pub fn flag(&self, column: &str) -> bool {
        match self.get(column) {
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
            Some(Value::String(s)) => matches!(
                s.trim().to_ascii_lowercase().as_str(),
                "yes" | "y" | "true" | "t" | "1"
            ),
            _ => false,
        }
    }
}

/// Result of a statement that returns no rows
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteResult {
    pub rows_affected: u64,
    pub last_insert_id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseInfo {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableInfo {
    pub name: String,
    pub engine: String,
    pub row_count: i64,
    pub data_size: i64,
    pub create_time: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ColumnInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    pub nullable: bool,
    pub key: String,
    pub default: String,
    pub extra: String,
    /// Previous name when a modification renames the column
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_name: Option<String>,
}

impl ColumnInfo {
    pub fn is_primary_key(&self) -> bool {
        self.key == "PRI"
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexInfo {
    pub name: String,
    pub columns: Vec<String>,
    pub is_unique: bool,
    pub is_primary: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDetails {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
    pub indexes: Vec<IndexInfo>,
}

/// Request for one page of table rows
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TableDataRequest {
    pub database: String,
    pub table: String,
    pub page: i64,
    pub page_size: i64,
    pub order_by: String,
    pub order_dir: String,
    /// Raw SQL condition appended as `WHERE <filters>`
    pub filters: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDataResponse {
    pub columns: Vec<ColumnInfo>,
    pub rows: Vec<Vec<Value>>,
    pub total_rows: i64,
    pub page: i64,
    pub page_size: i64,
    pub total_pages: i64,
    pub primary_key: String,
}

/// Schema changes applied to one table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TableAlteration {
    pub add_columns: Vec<ColumnInfo>,
    pub modify_columns: Vec<ColumnInfo>,
    pub drop_columns: Vec<String>,
    pub rename_to: String,
}

/// Column name to value for a single row
pub type RowData = serde_json::Map<String, Value>;
