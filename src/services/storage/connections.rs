use std::path::{Path, PathBuf};

use super::{Result, StorageError};
use crate::services::database::{ConnectionConfig, SavedConnection};

const APP_DIR: &str = ".dbdeck";
const FILE_NAME: &str = "connections.json";

/// Named connection profiles kept as a pretty-printed JSON array.
///
/// Every operation re-reads the file, so edits made by another process are
/// picked up. A missing file reads as an empty list.
#[derive(Debug, Clone)]
pub struct ConnectionStore {
    path: PathBuf,
}

impl ConnectionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `~/.dbdeck/connections.json`
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir().ok_or(StorageError::HomeDirNotFound)?;
        Ok(home.join(APP_DIR).join(FILE_NAME))
    }

    /// Store rooted at [`ConnectionStore::default_path`].
    pub fn open_default() -> Result<Self> {
        Ok(Self::new(Self::default_path()?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load_all(&self) -> Result<Vec<SavedConnection>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StorageError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        serde_json::from_str(&content).map_err(|source| StorageError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    pub async fn get(&self, name: &str) -> Result<SavedConnection> {
        self.load_all()
            .await?
            .into_iter()
            .find(|c| c.name == name)
            .ok_or_else(|| StorageError::ProfileNotFound(name.to_string()))
    }

    /// Insert or replace the profile called `name`. Existing profiles keep
    /// their position in the file.
    pub async fn save(&self, name: &str, config: ConnectionConfig) -> Result<()> {
        let mut connections = self.load_all().await?;

        match connections.iter_mut().find(|c| c.name == name) {
            Some(existing) => existing.config = config,
            None => connections.push(SavedConnection {
                name: name.to_string(),
                config,
            }),
        }

        self.write_all(&connections).await?;
        tracing::info!("Saved connection profile '{}'", name);
        Ok(())
    }

    pub async fn rename(&self, old_name: &str, new_name: &str) -> Result<()> {
        let mut connections = self.load_all().await?;

        if old_name != new_name && connections.iter().any(|c| c.name == new_name) {
            return Err(StorageError::AlreadyExists(new_name.to_string()));
        }

        let entry = connections
            .iter_mut()
            .find(|c| c.name == old_name)
            .ok_or_else(|| StorageError::ProfileNotFound(old_name.to_string()))?;
        entry.name = new_name.to_string();

        self.write_all(&connections).await?;
        tracing::info!("Renamed connection profile '{}' to '{}'", old_name, new_name);
        Ok(())
    }

    /// Remove `name`. Deleting a profile that does not exist is not an error.
    pub async fn delete(&self, name: &str) -> Result<()> {
        let mut connections = self.load_all().await?;
        let before = connections.len();
        connections.retain(|c| c.name != name);

        if connections.len() == before {
            tracing::debug!("No connection profile named '{}' to delete", name);
            return Ok(());
        }

        self.write_all(&connections).await?;
        tracing::info!("Deleted connection profile '{}'", name);
        Ok(())
    }

    async fn write_all(&self, connections: &[SavedConnection]) -> Result<()> {
        let io_err = |source| StorageError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }

        let content =
            serde_json::to_string_pretty(connections).map_err(StorageError::Serialize)?;
        tokio::fs::write(&self.path, content).await.map_err(io_err)?;

        // Profiles carry passwords
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))
                .await
                .map_err(io_err)?;
        }

        Ok(())
    }
}
