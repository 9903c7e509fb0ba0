use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

#[cfg(unix)]
fn chmod_best_effort(path: &Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;
    let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode));
}

#[derive(thiserror::Error, Debug)]
pub enum LocalStoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Small durable key-value area local to the device.
///
/// Reads and writes are synchronous so callers can consult it without suspending.
pub trait LocalStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, LocalStoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), LocalStoreError>;
}

#[derive(Debug, Default)]
pub struct MemoryLocalStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryLocalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocalStore for MemoryLocalStore {
    fn get(&self, key: &str) -> Result<Option<String>, LocalStoreError> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), LocalStoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LocalStoreData {
    version: u32,
    #[serde(default)]
    entries: BTreeMap<String, String>,
}

impl Default for LocalStoreData {
    fn default() -> Self {
        Self {
            version: 1,
            entries: BTreeMap::new(),
        }
    }
}

/// JSON-file backed [`LocalStore`]; every `set` is written through.
#[derive(Debug)]
pub struct FileLocalStore {
    path: PathBuf,
    data: Mutex<LocalStoreData>,
}

impl FileLocalStore {
    pub fn open_under(root_dir: &Path) -> Result<Self, LocalStoreError> {
        Self::load(&root_dir.join("local.json"))
    }

    pub fn load(path: &Path) -> Result<Self, LocalStoreError> {
        if !path.exists() {
            return Ok(Self {
                path: path.to_path_buf(),
                data: Mutex::new(LocalStoreData::default()),
            });
        }
        let raw = std::fs::read_to_string(path)?;
        let data: LocalStoreData = serde_json::from_str(&raw)?;
        Ok(Self {
            path: path.to_path_buf(),
            data: Mutex::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self, data: &LocalStoreData) -> Result<(), LocalStoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
            #[cfg(unix)]
            {
                chmod_best_effort(parent, 0o700);
            }
        }
        let raw = serde_json::to_string_pretty(data)?;
        std::fs::write(&self.path, raw)?;
        #[cfg(unix)]
        {
            chmod_best_effort(&self.path, 0o600);
        }
        Ok(())
    }
}

impl LocalStore for FileLocalStore {
    fn get(&self, key: &str) -> Result<Option<String>, LocalStoreError> {
        let data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        Ok(data.entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), LocalStoreError> {
        let mut data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        if data.entries.get(key).map(String::as_str) == Some(value) {
            return Ok(());
        }
        let mut next = data.clone();
        next.entries.insert(key.to_string(), value.to_string());
        self.save(&next)?;
        *data = next;
        Ok(())
    }
}
