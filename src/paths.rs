use std::path::{Path, PathBuf};

/// Best-effort home directory resolution.
///
/// `dirs::home_dir()` can return `None` in some service/test environments; fall back to
/// common environment variables.
pub fn user_home_dir() -> Option<PathBuf> {
    dirs::home_dir()
        .or_else(|| std::env::var_os("HOME").map(PathBuf::from))
        .or_else(|| std::env::var_os("USERPROFILE").map(PathBuf::from))
}

fn env_dir_override() -> Option<PathBuf> {
    let dir = std::env::var("CAPGATE_DIR").ok()?;
    let trimmed = dir.trim();
    (!trimmed.is_empty()).then(|| PathBuf::from(trimmed))
}

/// On-disk layout of everything capgate keeps locally.
#[derive(Debug, Clone)]
pub struct CapgatePaths {
    root_dir: PathBuf,
}

impl CapgatePaths {
    /// `$CAPGATE_DIR`, else `~/.capgate`. Without a home directory, an absolute temp dir
    /// is used so nothing lands in the working directory.
    pub fn discover() -> Self {
        if let Some(root_dir) = env_dir_override() {
            return Self { root_dir };
        }
        let root_dir = match user_home_dir() {
            Some(home) => home.join(".capgate"),
            None => std::env::temp_dir().join("capgate-no-home"),
        };
        Self { root_dir }
    }

    pub fn at(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn config_path(&self) -> PathBuf {
        self.root_dir.join("config.json")
    }

    pub fn audit_dir(&self) -> PathBuf {
        self.root_dir.join("audit")
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root_dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(&self.root_dir, std::fs::Permissions::from_mode(0o700));
        }
        Ok(())
    }
}
