use std::ffi::{OsStr, OsString};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::classifier::ProviderError;
use crate::credential::Credential;
use crate::local_store::{LocalStore, LocalStoreError};
use crate::provider::Provider;
use crate::secret_store::{BackendError, SecretBackend, SecretRow};
use crate::validator::Validator;

pub static ENV_LOCK: Mutex<()> = Mutex::new(());

/// RAII guard for temporarily setting/removing an environment variable in tests.
///
/// IMPORTANT: This does not prevent other tests from mutating the environment.
/// Pair usage with `ENV_LOCK` when the variable is shared/global (e.g. HOME).
pub struct ScopedEnvVar {
    key: String,
    old: Option<OsString>,
}

impl ScopedEnvVar {
    pub fn set(key: &str, value: impl AsRef<OsStr>) -> Self {
        let old = std::env::var_os(key);
        std::env::set_var(key, value);
        Self {
            key: key.to_string(),
            old,
        }
    }

    pub fn remove(key: &str) -> Self {
        let old = std::env::var_os(key);
        std::env::remove_var(key);
        Self {
            key: key.to_string(),
            old,
        }
    }
}

impl Drop for ScopedEnvVar {
    fn drop(&mut self) {
        match &self.old {
            Some(v) => std::env::set_var(&self.key, v),
            None => std::env::remove_var(&self.key),
        }
    }
}

/// Local store whose every call fails.
pub struct FailingLocalStore;

impl LocalStore for FailingLocalStore {
    fn get(&self, _key: &str) -> Result<Option<String>, LocalStoreError> {
        Err(LocalStoreError::Io(std::io::Error::other("disk unavailable")))
    }

    fn set(&self, _key: &str, _value: &str) -> Result<(), LocalStoreError> {
        Err(LocalStoreError::Io(std::io::Error::other("disk unavailable")))
    }
}

/// Secret backend that never answers.
pub struct StalledBackend;

#[async_trait]
impl SecretBackend for StalledBackend {
    async fn select(
        &self,
        _user_id: &str,
        _provider: Provider,
    ) -> Result<Option<SecretRow>, BackendError> {
        std::future::pending().await
    }

    async fn upsert(&self, _row: SecretRow) -> Result<(), BackendError> {
        std::future::pending().await
    }
}

/// Validator with a fixed answer that counts its calls.
pub struct StaticValidator {
    result: Result<(), ProviderError>,
    calls: AtomicUsize,
}

impl StaticValidator {
    pub fn ok() -> Self {
        Self {
            result: Ok(()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn err(error: ProviderError) -> Self {
        Self {
            result: Err(error),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Validator for StaticValidator {
    async fn validate(
        &self,
        _provider: Provider,
        _credential: &Credential,
    ) -> Result<(), ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.clone()
    }
}

/// Validator that never answers.
pub struct StalledValidator;

#[async_trait]
impl Validator for StalledValidator {
    async fn validate(
        &self,
        _provider: Provider,
        _credential: &Credential,
    ) -> Result<(), ProviderError> {
        std::future::pending().await
    }
}
