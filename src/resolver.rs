use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::cache::CredentialCache;
use crate::classifier::ProviderError;
use crate::credential::Credential;
use crate::identity::{IdentityProvider, Session};
use crate::provider::Provider;
use crate::secret_store::{SecretStoreClient, SecretStoreError};
use crate::state::CapabilityStore;

/// Where a resolved credential came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
    /// The local flag says a credential exists; the value itself was not loaded.
    Cached,
    SecretStore(Credential),
    Environment(Credential),
}

impl CredentialSource {
    pub fn label(&self) -> &'static str {
        match self {
            CredentialSource::Cached => "cached",
            CredentialSource::SecretStore(_) => "secret_store",
            CredentialSource::Environment(_) => "environment",
        }
    }

    pub fn credential(&self) -> Option<&Credential> {
        match self {
            CredentialSource::Cached => None,
            CredentialSource::SecretStore(c) | CredentialSource::Environment(c) => Some(c),
        }
    }
}

/// Handle a feature uses to call its provider after a successful resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderClient {
    pub provider: Provider,
    pub source: CredentialSource,
}

impl ProviderClient {
    pub fn credential(&self) -> Option<&Credential> {
        self.source.credential()
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("no credential available for {0}")]
    NoCredential(Provider),
    #[error("an identity session is required to resolve {0}")]
    IdentityRequired(Provider),
    #[error("secret store unavailable while resolving {0}")]
    StoreUnavailable(Provider),
}

pub struct ResolutionContext {
    pub provider: Provider,
    pub session: Option<Session>,
}

#[derive(Debug)]
pub enum StrategyOutcome {
    Resolved(CredentialSource),
    Miss,
    /// The tier exists but its backing store is not provisioned.
    Unavailable,
}

/// One tier of the resolution order.
#[async_trait]
pub trait ResolutionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn applies_to(&self, provider: Provider) -> bool;

    /// Whether a hit carries the credential value (as opposed to an existence signal).
    fn yields_credential(&self) -> bool;

    async fn attempt(&self, ctx: &ResolutionContext) -> StrategyOutcome;
}

pub struct CacheFlagStrategy {
    cache: CredentialCache,
}

impl CacheFlagStrategy {
    pub fn new(cache: CredentialCache) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl ResolutionStrategy for CacheFlagStrategy {
    fn name(&self) -> &'static str {
        "cache_flag"
    }

    fn applies_to(&self, provider: Provider) -> bool {
        provider.is_primary()
    }

    fn yields_credential(&self) -> bool {
        false
    }

    async fn attempt(&self, ctx: &ResolutionContext) -> StrategyOutcome {
        if self.cache.has_flag(ctx.provider) {
            StrategyOutcome::Resolved(CredentialSource::Cached)
        } else {
            StrategyOutcome::Miss
        }
    }
}

pub struct SecretStoreStrategy {
    client: SecretStoreClient,
}

impl SecretStoreStrategy {
    pub fn new(client: SecretStoreClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ResolutionStrategy for SecretStoreStrategy {
    fn name(&self) -> &'static str {
        "secret_store"
    }

    fn applies_to(&self, _provider: Provider) -> bool {
        true
    }

    fn yields_credential(&self) -> bool {
        true
    }

    async fn attempt(&self, ctx: &ResolutionContext) -> StrategyOutcome {
        match self.client.try_fetch(ctx.session.as_ref(), ctx.provider).await {
            Ok(Some(credential)) => {
                StrategyOutcome::Resolved(CredentialSource::SecretStore(credential))
            }
            Ok(None) => StrategyOutcome::Miss,
            Err(SecretStoreError::StoreUnavailable) => {
                warn!(provider = %ctx.provider, "secret table missing during resolution");
                StrategyOutcome::Unavailable
            }
            Err(err) => {
                debug!(provider = %ctx.provider, error = %err, "secret store tier skipped");
                StrategyOutcome::Miss
            }
        }
    }
}

/// Deployment-wide fallback for the primary provider, captured once at construction.
pub struct EnvFallbackStrategy {
    credential: Option<Credential>,
}

impl EnvFallbackStrategy {
    pub fn new(credential: Option<Credential>) -> Self {
        Self { credential }
    }

    pub fn from_env(var: &str) -> Self {
        Self::new(std::env::var(var).ok().and_then(Credential::new))
    }

    pub fn is_configured(&self) -> bool {
        self.credential.is_some()
    }
}

#[async_trait]
impl ResolutionStrategy for EnvFallbackStrategy {
    fn name(&self) -> &'static str {
        "environment"
    }

    fn applies_to(&self, provider: Provider) -> bool {
        provider.is_primary()
    }

    fn yields_credential(&self) -> bool {
        true
    }

    async fn attempt(&self, _ctx: &ResolutionContext) -> StrategyOutcome {
        match &self.credential {
            Some(credential) => {
                StrategyOutcome::Resolved(CredentialSource::Environment(credential.clone()))
            }
            None => StrategyOutcome::Miss,
        }
    }
}

/// Ordered strategy list evaluated first-hit-wins.
///
/// A successful primary-provider resolution marks the capability online; nothing here ever
/// marks it offline.
pub struct CredentialResolver {
    identity: Arc<dyn IdentityProvider>,
    state: CapabilityStore,
    strategies: Vec<Box<dyn ResolutionStrategy>>,
}

impl CredentialResolver {
    pub fn new(identity: Arc<dyn IdentityProvider>, state: CapabilityStore) -> Self {
        Self {
            identity,
            state,
            strategies: Vec::new(),
        }
    }

    pub fn with_strategy(mut self, strategy: impl ResolutionStrategy + 'static) -> Self {
        self.strategies.push(Box::new(strategy));
        self
    }

    /// Cache flag, then secret store, then environment fallback.
    pub fn standard(
        identity: Arc<dyn IdentityProvider>,
        state: CapabilityStore,
        cache: CredentialCache,
        client: SecretStoreClient,
        fallback: EnvFallbackStrategy,
    ) -> Self {
        Self::new(identity, state)
            .with_strategy(CacheFlagStrategy::new(cache))
            .with_strategy(SecretStoreStrategy::new(client))
            .with_strategy(fallback)
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub async fn resolve(&self, provider: Provider) -> Result<ProviderClient, ResolveError> {
        self.run(provider, false).await
    }

    /// Resolve to a client that actually holds the credential value.
    ///
    /// The cache tier only proves existence, so it is skipped here. Any miss is reported
    /// the way a provider reports a missing key.
    pub async fn materialize(&self, provider: Provider) -> Result<ProviderClient, ProviderError> {
        self.run(provider, true)
            .await
            .map_err(|_| ProviderError::Disconnected)
    }

    async fn run(
        &self,
        provider: Provider,
        need_value: bool,
    ) -> Result<ProviderClient, ResolveError> {
        let ctx = ResolutionContext {
            provider,
            session: self.identity.current_session(),
        };
        if !provider.is_primary() && ctx.session.is_none() {
            return Err(ResolveError::IdentityRequired(provider));
        }

        let mut store_unavailable = false;
        for strategy in self
            .strategies
            .iter()
            .filter(|s| s.applies_to(provider) && (!need_value || s.yields_credential()))
        {
            match strategy.attempt(&ctx).await {
                StrategyOutcome::Resolved(source) => {
                    info!(provider = %provider, tier = strategy.name(), "credential resolved");
                    if provider.is_primary() {
                        self.state.mark_online();
                    }
                    return Ok(ProviderClient { provider, source });
                }
                StrategyOutcome::Miss => {
                    debug!(provider = %provider, tier = strategy.name(), "resolution tier missed");
                }
                StrategyOutcome::Unavailable => store_unavailable = true,
            }
        }

        if store_unavailable {
            Err(ResolveError::StoreUnavailable(provider))
        } else {
            debug!(provider = %provider, "no credential in any tier");
            Err(ResolveError::NoCredential(provider))
        }
    }
}
