mod file;
mod memory;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cache::CredentialCache;
use crate::credential::Credential;
use crate::identity::Session;
use crate::provider::Provider;

pub use file::FileSecretBackend;
pub use memory::MemorySecretBackend;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// One stored credential. (user_id, provider) is unique.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SecretRow {
    pub user_id: String,
    pub provider: Provider,
    pub secret: String,
    pub updated_at_ms: i64,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The backing table/collection does not exist (deployment or migration problem).
    #[error("secret table missing")]
    TableMissing,
    #[error("{0}")]
    Io(String),
}

/// The remote, per-user secret store collaborator.
#[async_trait]
pub trait SecretBackend: Send + Sync {
    async fn select(
        &self,
        user_id: &str,
        provider: Provider,
    ) -> Result<Option<SecretRow>, BackendError>;

    /// Insert or replace the row for `(row.user_id, row.provider)`.
    async fn upsert(&self, row: SecretRow) -> Result<(), BackendError>;
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SecretStoreError {
    #[error("an identity session is required to access the secret store")]
    IdentityRequired,
    #[error("secret store unavailable: backing table is missing")]
    StoreUnavailable,
    #[error("secret store call timed out after {0:?}")]
    Timeout(Duration),
    #[error("secret store i/o error: {0}")]
    Io(String),
}

impl From<BackendError> for SecretStoreError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::TableMissing => SecretStoreError::StoreUnavailable,
            BackendError::Io(message) => SecretStoreError::Io(message),
        }
    }
}

/// Time-bounded access to the secret backend.
///
/// Every call either completes or fails within the timeout budget measured from issuance.
/// Successful stores and non-empty fetches set the provider's cache flag.
#[derive(Clone)]
pub struct SecretStoreClient {
    backend: Arc<dyn SecretBackend>,
    cache: CredentialCache,
    timeout: Duration,
}

impl SecretStoreClient {
    pub fn new(backend: Arc<dyn SecretBackend>, cache: CredentialCache) -> Self {
        Self {
            backend,
            cache,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn try_fetch(
        &self,
        session: Option<&Session>,
        provider: Provider,
    ) -> Result<Option<Credential>, SecretStoreError> {
        let session = session.ok_or(SecretStoreError::IdentityRequired)?;
        let selected = tokio::time::timeout(
            self.timeout,
            self.backend.select(&session.user_id, provider),
        )
        .await
        .map_err(|_| SecretStoreError::Timeout(self.timeout))?;
        let credential = selected?.and_then(|row| Credential::new(row.secret));
        if credential.is_some() {
            self.cache.set_flag(provider);
        }
        Ok(credential)
    }

    /// Like [`Self::try_fetch`], with every failure degraded to "not found".
    pub async fn fetch(&self, session: Option<&Session>, provider: Provider) -> Option<Credential> {
        match self.try_fetch(session, provider).await {
            Ok(credential) => credential,
            Err(SecretStoreError::StoreUnavailable) => {
                warn!(provider = %provider, "secret table missing; treating credential as absent");
                None
            }
            Err(err) => {
                debug!(provider = %provider, error = %err, "secret fetch failed");
                None
            }
        }
    }

    pub async fn store(
        &self,
        session: Option<&Session>,
        provider: Provider,
        credential: &Credential,
    ) -> Result<(), SecretStoreError> {
        let session = session.ok_or(SecretStoreError::IdentityRequired)?;
        let row = SecretRow {
            user_id: session.user_id.clone(),
            provider,
            secret: credential.expose().to_string(),
            updated_at_ms: chrono::Utc::now().timestamp_millis(),
        };
        tokio::time::timeout(self.timeout, self.backend.upsert(row))
            .await
            .map_err(|_| SecretStoreError::Timeout(self.timeout))??;
        self.cache.set_flag(provider);
        info!(
            provider = %provider,
            user_id = %session.user_id,
            fingerprint = %credential.fingerprint(),
            "credential stored"
        );
        Ok(())
    }

    /// Whether a credential is on file for each provider. No session means nothing is.
    pub async fn provider_status(&self, session: Option<&Session>) -> BTreeMap<Provider, bool> {
        let mut out = BTreeMap::new();
        for provider in Provider::ALL {
            let present = match session {
                Some(_) => self.fetch(session, provider).await.is_some(),
                None => false,
            };
            out.insert(provider, present);
        }
        out
    }
}
