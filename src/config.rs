use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::credential::Credential;
use crate::paths::CapgatePaths;
use crate::validator::DEFAULT_BASE_URL;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("{var} must be a positive integer (got '{value}')")]
    InvalidEnv { var: &'static str, value: String },
}

/// Runtime settings. Loaded from `<root>/config.json` when present, then overridden by
/// `CAPGATE_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CapgateConfig {
    pub secret_store_timeout_ms: u64,
    pub validation_timeout_ms: u64,
    /// Name of the environment variable holding the deployment-wide primary credential.
    pub fallback_env_var: String,
    pub provider_base_url: String,
    pub require_existing_store: bool,
}

impl Default for CapgateConfig {
    fn default() -> Self {
        Self {
            secret_store_timeout_ms: 2_000,
            validation_timeout_ms: 8_000,
            fallback_env_var: "API_KEY".to_string(),
            provider_base_url: DEFAULT_BASE_URL.to_string(),
            require_existing_store: false,
        }
    }
}

impl CapgateConfig {
    pub fn load(paths: &CapgatePaths) -> Result<Self, ConfigError> {
        let path = paths.config_path();
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
                path: path.clone(),
                source,
            })?;
            serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.clone(),
                source,
            })?
        } else {
            debug!(path = %path.display(), "no config file; using defaults");
            Self::default()
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(ms) = env_millis("CAPGATE_STORE_TIMEOUT_MS")? {
            self.secret_store_timeout_ms = ms;
        }
        if let Some(ms) = env_millis("CAPGATE_VALIDATION_TIMEOUT_MS")? {
            self.validation_timeout_ms = ms;
        }
        if let Some(var) = env_non_empty("CAPGATE_FALLBACK_ENV") {
            self.fallback_env_var = var;
        }
        if let Some(url) = env_non_empty("CAPGATE_PROVIDER_BASE_URL") {
            self.provider_base_url = url;
        }
        Ok(())
    }

    pub fn secret_store_timeout(&self) -> Duration {
        Duration::from_millis(self.secret_store_timeout_ms)
    }

    pub fn validation_timeout(&self) -> Duration {
        Duration::from_millis(self.validation_timeout_ms)
    }

    /// Reads the fallback variable now. Callers capture this once at startup.
    pub fn fallback_credential(&self) -> Option<Credential> {
        std::env::var(&self.fallback_env_var)
            .ok()
            .and_then(Credential::new)
    }
}

fn env_non_empty(var: &str) -> Option<String> {
    std::env::var(var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_millis(var: &'static str) -> Result<Option<u64>, ConfigError> {
    let Some(raw) = env_non_empty(var) else {
        return Ok(None);
    };
    match raw.parse::<u64>() {
        Ok(ms) if ms > 0 => Ok(Some(ms)),
        _ => Err(ConfigError::InvalidEnv { var, value: raw }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScopedEnvVar, ENV_LOCK};

    fn clear_env() -> Vec<ScopedEnvVar> {
        [
            "CAPGATE_STORE_TIMEOUT_MS",
            "CAPGATE_VALIDATION_TIMEOUT_MS",
            "CAPGATE_FALLBACK_ENV",
            "CAPGATE_PROVIDER_BASE_URL",
        ]
        .into_iter()
        .map(ScopedEnvVar::remove)
        .collect()
    }

    #[test]
    fn defaults_without_file_or_env() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let _env = clear_env();
        let dir = tempfile::tempdir().unwrap();
        let config = CapgateConfig::load(&CapgatePaths::at(dir.path())).unwrap();
        assert_eq!(config, CapgateConfig::default());
        assert_eq!(config.secret_store_timeout(), Duration::from_secs(2));
        assert_eq!(config.fallback_env_var, "API_KEY");
    }

    #[test]
    fn file_values_are_partial_and_env_wins() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let _env = clear_env();
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.json"),
            r#"{"secretStoreTimeoutMs": 500, "requireExistingStore": true}"#,
        )
        .unwrap();
        let _timeout = ScopedEnvVar::set("CAPGATE_STORE_TIMEOUT_MS", "250");
        let _url = ScopedEnvVar::set("CAPGATE_PROVIDER_BASE_URL", "http://127.0.0.1:1");

        let config = CapgateConfig::load(&CapgatePaths::at(dir.path())).unwrap();
        assert_eq!(config.secret_store_timeout_ms, 250);
        assert!(config.require_existing_store);
        assert_eq!(config.validation_timeout_ms, 8_000);
        assert_eq!(config.provider_base_url, "http://127.0.0.1:1");
    }

    #[test]
    fn bad_env_and_bad_file_are_errors() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let _env = clear_env();
        let dir = tempfile::tempdir().unwrap();
        {
            let _timeout = ScopedEnvVar::set("CAPGATE_VALIDATION_TIMEOUT_MS", "0");
            let err = CapgateConfig::load(&CapgatePaths::at(dir.path())).unwrap_err();
            assert!(matches!(err, ConfigError::InvalidEnv { .. }));
        }
        std::fs::write(dir.path().join("config.json"), "{").unwrap();
        let err = CapgateConfig::load(&CapgatePaths::at(dir.path())).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn fallback_credential_uses_configured_variable() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let _key = ScopedEnvVar::set("CAPGATE_TEST_KEY", "AIza-fallback");
        let config = CapgateConfig {
            fallback_env_var: "CAPGATE_TEST_KEY".to_string(),
            ..CapgateConfig::default()
        };
        assert_eq!(
            config.fallback_credential().unwrap().expose(),
            "AIza-fallback"
        );
    }
}
