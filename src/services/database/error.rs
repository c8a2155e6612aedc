use std::time::Duration;
use thiserror::Error;

use super::types::Dialect;
use crate::services::ssh::TunnelError;

pub type Result<T, E = DatabaseError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("unsupported database type: {0:?}")]
    UnsupportedDialect(String),

    #[error("invalid connection configuration: {0}")]
    Config(String),

    #[error("failed to connect to {target}: {source}")]
    Connect {
        target: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("failed to ping {target}: {source}")]
    Ping {
        target: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("SSH tunnel failed: {0}")]
    Tunnel(#[from] TunnelError),

    #[error("query failed: {0}")]
    Query(#[from] sqlx::Error),

    #[error("{operation} is not supported for {dialect}")]
    Unsupported {
        operation: &'static str,
        dialect: Dialect,
    },

    #[error("not connected to database")]
    NotConnected,

    #[error("failed to execute [{statement}]: {source}")]
    Statement {
        statement: String,
        #[source]
        source: Box<DatabaseError>,
    },

    #[error("{0}")]
    InvalidInput(String),
}

impl DatabaseError {
    /// Whether the same operation could succeed if retried later.
    pub fn is_retriable(&self) -> bool {
        match self {
            DatabaseError::Timeout { .. } => true,
            DatabaseError::Tunnel(e) => e.is_retriable(),
            DatabaseError::Connect { source, .. }
            | DatabaseError::Ping { source, .. }
            | DatabaseError::Query(source) => is_transient(source),
            DatabaseError::Statement { source, .. } => source.is_retriable(),
            _ => false,
        }
    }
}

fn is_transient(error: &sqlx::Error) -> bool {
    matches!(
        error,
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::WorkerCrashed
    )
}
