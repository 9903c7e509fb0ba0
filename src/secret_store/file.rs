use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::memory::upsert_row;
use super::{BackendError, SecretBackend, SecretRow};
use crate::provider::Provider;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SecretTable {
    version: u32,
    #[serde(default)]
    rows: Vec<SecretRow>,
}

impl Default for SecretTable {
    fn default() -> Self {
        Self {
            version: 1,
            rows: Vec::new(),
        }
    }
}

/// Secret backend over a single JSON document (`store/secrets.json` under the data dir).
///
/// With `require_existing`, a missing `store/` directory is reported as
/// [`BackendError::TableMissing`] instead of being created on first write.
#[derive(Debug)]
pub struct FileSecretBackend {
    path: PathBuf,
    require_existing: bool,
    // Held across every read and rewrite; the document is replaced in place.
    lock: Mutex<()>,
}

impl FileSecretBackend {
    pub fn open_under(root_dir: &Path) -> Self {
        Self::new(root_dir.join("store").join("secrets.json"))
    }

    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            require_existing: false,
            lock: Mutex::new(()),
        }
    }

    pub fn require_existing(mut self, require: bool) -> Self {
        self.require_existing = require;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_table(&self) -> Result<(), BackendError> {
        if !self.require_existing {
            return Ok(());
        }
        match self.path.parent() {
            Some(parent) if parent.as_os_str().is_empty() || parent.is_dir() => Ok(()),
            None => Ok(()),
            Some(_) => Err(BackendError::TableMissing),
        }
    }

    async fn read_table(&self) -> Result<SecretTable, BackendError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => serde_json::from_str(&raw)
                .map_err(|e| BackendError::Io(format!("corrupt secret table: {e}"))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(SecretTable::default()),
            Err(e) => Err(BackendError::Io(e.to_string())),
        }
    }

    async fn write_table(&self, table: &SecretTable) -> Result<(), BackendError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| BackendError::Io(e.to_string()))?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let _ = tokio::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o700))
                    .await;
            }
        }
        let raw = serde_json::to_string_pretty(table).map_err(|e| BackendError::Io(e.to_string()))?;
        tokio::fs::write(&self.path, raw)
            .await
            .map_err(|e| BackendError::Io(e.to_string()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = tokio::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))
                .await;
        }
        Ok(())
    }
}

#[async_trait]
impl SecretBackend for FileSecretBackend {
    async fn select(
        &self,
        user_id: &str,
        provider: Provider,
    ) -> Result<Option<SecretRow>, BackendError> {
        self.ensure_table()?;
        let _guard = self.lock.lock().await;
        let table = self.read_table().await?;
        Ok(table
            .rows
            .into_iter()
            .find(|r| r.user_id == user_id && r.provider == provider))
    }

    async fn upsert(&self, row: SecretRow) -> Result<(), BackendError> {
        self.ensure_table()?;
        let _guard = self.lock.lock().await;
        let mut table = self.read_table().await?;
        upsert_row(&mut table.rows, row);
        self.write_table(&table).await
    }
}
