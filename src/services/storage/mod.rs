//! Persistence for named connection profiles.

mod connections;

use std::path::PathBuf;

use thiserror::Error;

pub use connections::ConnectionStore;

pub type Result<T, E = StorageError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("could not determine home directory")]
    HomeDirNotFound,

    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize connections: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("connection not found: {0}")]
    ProfileNotFound(String),

    #[error("connection already exists: {0}")]
    AlreadyExists(String),
}
