use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::audit::{AuditEvent, AuditLog};
use crate::cache::CredentialCache;
use crate::classifier::{Classification, ErrorClassifier, ProviderError};
use crate::config::CapgateConfig;
use crate::credential::Credential;
use crate::guard::{CapabilityGuard, GuardOutcome};
use crate::identity::{IdentityEvent, IdentityEventKind, IdentityProvider};
use crate::local_store::{FileLocalStore, LocalStore};
use crate::navigator::{Navigator, RecordingNavigator};
use crate::onboarding::{OnboardingDeps, OnboardingError, OnboardingSession, StoredOutcome};
use crate::paths::CapgatePaths;
use crate::preferences::Preferences;
use crate::provider::Provider;
use crate::resolver::{CredentialResolver, EnvFallbackStrategy, ProviderClient, ResolveError};
use crate::secret_store::{
    FileSecretBackend, SecretBackend, SecretStoreClient, SecretStoreError, DEFAULT_TIMEOUT,
};
use crate::state::{CapabilityState, CapabilityStore};
use crate::validator::{HttpValidator, SkippedValidator, Validator};

fn env_flag_true(name: &str) -> bool {
    std::env::var(name)
        .ok()
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false)
}

pub fn disk_logs_disabled() -> bool {
    env_flag_true("CAPGATE_DISABLE_DISK_LOGS")
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeStatus {
    pub state: CapabilityState,
    pub offline: bool,
    pub ai_enabled: bool,
    pub user_id: Option<String>,
    pub cache_flags: BTreeMap<Provider, bool>,
    pub fallback_configured: bool,
    pub strategies: Vec<&'static str>,
    pub skipped_onboarding: bool,
}

pub struct RuntimeBuilder {
    identity: Arc<dyn IdentityProvider>,
    local: Arc<dyn LocalStore>,
    backend: Arc<dyn SecretBackend>,
    navigator: Arc<dyn Navigator>,
    validator: Arc<dyn Validator>,
    fallback: Option<Credential>,
    store_timeout: Duration,
    validation_timeout: Duration,
    audit: AuditLog,
}

impl RuntimeBuilder {
    pub fn navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
        self.navigator = navigator;
        self
    }

    pub fn validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn fallback_credential(mut self, credential: Option<Credential>) -> Self {
        self.fallback = credential;
        self
    }

    pub fn store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub fn validation_timeout(mut self, timeout: Duration) -> Self {
        self.validation_timeout = timeout;
        self
    }

    pub fn audit(mut self, audit: AuditLog) -> Self {
        self.audit = audit;
        self
    }

    pub fn build(self) -> CapabilityRuntime {
        let state = CapabilityStore::new();
        let cache = CredentialCache::new(self.local.clone());
        let preferences = Preferences::new(self.local);
        let client = SecretStoreClient::new(self.backend, cache.clone())
            .with_timeout(self.store_timeout);
        let fallback = EnvFallbackStrategy::new(self.fallback);
        let fallback_configured = fallback.is_configured();
        let resolver = Arc::new(CredentialResolver::standard(
            self.identity.clone(),
            state.clone(),
            cache.clone(),
            client.clone(),
            fallback,
        ));
        let classifier = ErrorClassifier::new(
            state.clone(),
            self.identity.clone(),
            self.navigator.clone(),
        );
        let guard = CapabilityGuard::new(
            self.identity.clone(),
            resolver.clone(),
            preferences.clone(),
            self.navigator.clone(),
        );
        CapabilityRuntime {
            identity: self.identity,
            state,
            cache,
            preferences,
            client,
            resolver,
            classifier,
            guard,
            validator: self.validator,
            validation_timeout: self.validation_timeout,
            skipped: Arc::new(AtomicBool::new(false)),
            fallback_configured,
            audit: self.audit,
        }
    }
}

/// Everything a feature needs, wired once per process.
pub struct CapabilityRuntime {
    identity: Arc<dyn IdentityProvider>,
    state: CapabilityStore,
    cache: CredentialCache,
    preferences: Preferences,
    client: SecretStoreClient,
    resolver: Arc<CredentialResolver>,
    classifier: ErrorClassifier,
    guard: CapabilityGuard,
    validator: Arc<dyn Validator>,
    validation_timeout: Duration,
    skipped: Arc<AtomicBool>,
    fallback_configured: bool,
    audit: AuditLog,
}

impl CapabilityRuntime {
    /// In-memory defaults: recording navigator, no validation probe, no fallback, no audit.
    pub fn builder(
        identity: Arc<dyn IdentityProvider>,
        local: Arc<dyn LocalStore>,
        backend: Arc<dyn SecretBackend>,
    ) -> RuntimeBuilder {
        RuntimeBuilder {
            identity,
            local,
            backend,
            navigator: Arc::new(RecordingNavigator::new()),
            validator: Arc::new(SkippedValidator),
            fallback: None,
            store_timeout: DEFAULT_TIMEOUT,
            validation_timeout: Duration::from_secs(8),
            audit: AuditLog::disabled(),
        }
    }

    /// File-backed stores under the data dir, HTTP validation, fallback read from the
    /// environment now.
    pub fn builder_from_config(
        config: &CapgateConfig,
        paths: &CapgatePaths,
        identity: Arc<dyn IdentityProvider>,
    ) -> Result<RuntimeBuilder, String> {
        paths.ensure_dirs().map_err(|e| e.to_string())?;
        let local = FileLocalStore::open_under(paths.root_dir()).map_err(|e| e.to_string())?;
        let backend = FileSecretBackend::open_under(paths.root_dir())
            .require_existing(config.require_existing_store);
        let validator = HttpValidator::new(&config.provider_base_url, config.validation_timeout())?;
        Ok(Self::builder(identity, Arc::new(local), Arc::new(backend))
            .validator(Arc::new(validator))
            .fallback_credential(config.fallback_credential())
            .store_timeout(config.secret_store_timeout())
            .validation_timeout(config.validation_timeout())
            .audit(AuditLog::new(paths.audit_dir(), !disk_logs_disabled())))
    }

    pub async fn guard<F, Fut, T>(&self, action: F) -> GuardOutcome<T>
    where
        F: FnOnce(ProviderClient) -> Fut,
        Fut: Future<Output = T>,
    {
        self.guard.guard(action).await
    }

    pub fn re_enable(&self) -> bool {
        self.guard.re_enable()
    }

    pub async fn resolve(&self, provider: Provider) -> Result<ProviderClient, ResolveError> {
        self.resolver.resolve(provider).await
    }

    pub async fn materialize(&self, provider: Provider) -> Result<ProviderClient, ProviderError> {
        self.resolver.materialize(provider).await
    }

    pub fn classify(&self, error: &ProviderError) -> Classification {
        let classification = self.classifier.classify(error);
        if classification == Classification::CapabilityFailure {
            self.audit.record(
                AuditEvent::now("capability.offline")
                    .user(self.user_id().as_deref())
                    .note(error.to_string()),
            );
        }
        classification
    }

    pub fn is_offline(&self) -> bool {
        self.state.is_offline()
    }

    pub fn state(&self) -> CapabilityState {
        self.state.get()
    }

    pub fn subscribe(&self) -> watch::Receiver<CapabilityState> {
        self.state.subscribe()
    }

    pub fn status(&self) -> RuntimeStatus {
        RuntimeStatus {
            state: self.state.get(),
            offline: self.state.is_offline(),
            ai_enabled: self.preferences.ai_enabled(),
            user_id: self.user_id(),
            cache_flags: Provider::ALL
                .into_iter()
                .map(|p| (p, self.cache.has_flag(p)))
                .collect(),
            fallback_configured: self.fallback_configured,
            strategies: self.resolver.strategy_names(),
            skipped_onboarding: self.has_skipped_onboarding(),
        }
    }

    pub fn begin_onboarding(&self, provider: Provider) -> OnboardingSession {
        OnboardingSession::new(
            provider,
            OnboardingDeps {
                client: self.client.clone(),
                validator: self.validator.clone(),
                state: self.state.clone(),
                preferences: self.preferences.clone(),
                identity: self.identity.clone(),
                validation_timeout: self.validation_timeout,
                skipped: self.skipped.clone(),
            },
        )
    }

    pub async fn submit_onboarding(
        &self,
        session: &mut OnboardingSession,
    ) -> Result<StoredOutcome, OnboardingError> {
        let result = session.submit().await;
        let event = AuditEvent::now("onboarding.submit")
            .provider(session.provider())
            .user(self.user_id().as_deref());
        match &result {
            Ok(stored) if stored.validated => self.audit.record(event.outcome("validated")),
            Ok(stored) => {
                let event = event.outcome("saved_unvalidated");
                let event = match &stored.warning {
                    Some(warning) => event.note(warning.clone()),
                    None => event,
                };
                self.audit.record(event)
            }
            Err(err) => self.audit.record(event.outcome("failed").note(err.to_string())),
        }
        result
    }

    pub fn skip_onboarding(&self, session: &mut OnboardingSession) -> Result<(), OnboardingError> {
        session.skip()?;
        self.audit.record(
            AuditEvent::now("onboarding.skipped")
                .provider(session.provider())
                .user(self.user_id().as_deref()),
        );
        Ok(())
    }

    pub fn confirm_disable(&self, session: &mut OnboardingSession) -> Result<(), OnboardingError> {
        session.confirm_disable()?;
        self.audit.record(AuditEvent::now("ai.disabled").user(self.user_id().as_deref()));
        Ok(())
    }

    pub fn has_skipped_onboarding(&self) -> bool {
        self.skipped.load(Ordering::SeqCst)
    }

    /// Store without the onboarding flow (no validation, no state change).
    pub async fn store_credential(
        &self,
        provider: Provider,
        credential: &Credential,
    ) -> Result<(), SecretStoreError> {
        let session = self.identity.current_session();
        self.client
            .store(session.as_ref(), provider, credential)
            .await?;
        self.audit.record(
            AuditEvent::now("credential.store")
                .provider(provider)
                .user(session.as_ref().map(|s| s.user_id.as_str()))
                .fingerprint(credential.fingerprint()),
        );
        Ok(())
    }

    pub async fn provider_status(&self) -> BTreeMap<Provider, bool> {
        let session = self.identity.current_session();
        self.client.provider_status(session.as_ref()).await
    }

    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    /// Initial resolution at process start, with or without a session.
    pub async fn startup_sync(&self) -> Result<ProviderClient, ResolveError> {
        let result = self.resolver.resolve(Provider::PRIMARY).await;
        if let Err(err) = &result {
            debug!(error = %err, "startup resolution found no credential");
        }
        result
    }

    pub async fn on_identity_event(&self, event: &IdentityEvent) {
        match event.kind {
            IdentityEventKind::SignedIn => self.resolve_after_identity_change("sign_in").await,
            IdentityEventKind::SignedOut => {
                debug!("signed out; capability state left as is");
            }
        }
    }

    /// Re-resolve on every identity event until the identity source goes away. The caller
    /// decides where this runs.
    pub async fn sync_identity(&self) {
        let mut rx = self.identity.subscribe();
        loop {
            match rx.recv().await {
                Ok(event) => self.on_identity_event(&event).await,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "identity events dropped; re-resolving");
                    if self.identity.current_session().is_some() {
                        self.resolve_after_identity_change("lagged").await;
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    async fn resolve_after_identity_change(&self, trigger: &'static str) {
        if let Err(err) = self.resolver.resolve(Provider::PRIMARY).await {
            info!(error = %err, trigger, "no primary credential after identity change");
        }
    }

    fn user_id(&self) -> Option<String> {
        self.identity.current_session().map(|s| s.user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{LocalIdentity, Session};
    use crate::local_store::MemoryLocalStore;
    use crate::secret_store::MemorySecretBackend;
    use crate::test_support::StaticValidator;

    fn runtime(
        identity: Arc<LocalIdentity>,
        backend: Arc<MemorySecretBackend>,
    ) -> CapabilityRuntime {
        CapabilityRuntime::builder(identity, Arc::new(MemoryLocalStore::new()), backend)
            .validator(Arc::new(StaticValidator::ok()))
            .build()
    }

    #[tokio::test]
    async fn sign_in_event_resolves_and_goes_online() {
        let identity = Arc::new(LocalIdentity::new());
        let backend = Arc::new(MemorySecretBackend::new());
        backend.insert_row("u1", Provider::Gemini, "AIza-1");
        let rt = runtime(identity.clone(), backend);

        assert!(rt.startup_sync().await.is_err());
        assert_eq!(rt.state(), CapabilityState::Unknown);

        identity.sign_in(Session::new("u1"));
        rt.on_identity_event(&IdentityEvent {
            kind: IdentityEventKind::SignedIn,
            session: identity.current_session(),
        })
        .await;
        assert!(!rt.is_offline());
        assert!(rt.status().cache_flags[&Provider::Gemini]);
    }

    #[tokio::test]
    async fn sync_identity_loop_reacts_to_broadcast() {
        let identity = Arc::new(LocalIdentity::new());
        let backend = Arc::new(MemorySecretBackend::new());
        backend.insert_row("u1", Provider::Gemini, "AIza-1");
        let rt = Arc::new(runtime(identity.clone(), backend));
        let mut states = rt.subscribe();

        let task = tokio::spawn({
            let rt = rt.clone();
            async move { rt.sync_identity().await }
        });
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }
        identity.sign_in(Session::new("u1"));

        tokio::time::timeout(Duration::from_secs(2), states.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rt.state(), CapabilityState::Online);
        task.abort();
    }

    /// Signed-in identity whose event stream is pre-filled before the loop subscribes.
    struct BufferedIdentity {
        session: Session,
        rx: std::sync::Mutex<Option<broadcast::Receiver<IdentityEvent>>>,
    }

    impl IdentityProvider for BufferedIdentity {
        fn current_session(&self) -> Option<Session> {
            Some(self.session.clone())
        }

        fn subscribe(&self) -> broadcast::Receiver<IdentityEvent> {
            self.rx
                .lock()
                .unwrap()
                .take()
                .expect("subscribed once")
        }
    }

    #[tokio::test]
    async fn lagged_identity_stream_re_resolves_then_exits_on_close() {
        let (tx, rx) = broadcast::channel(1);
        let signed_out = IdentityEvent {
            kind: IdentityEventKind::SignedOut,
            session: None,
        };
        for _ in 0..3 {
            tx.send(signed_out.clone()).unwrap();
        }
        drop(tx);

        let backend = Arc::new(MemorySecretBackend::new());
        backend.insert_row("u1", Provider::Gemini, "AIza-1");
        let identity = Arc::new(BufferedIdentity {
            session: Session::new("u1"),
            rx: std::sync::Mutex::new(Some(rx)),
        });
        let rt = CapabilityRuntime::builder(identity, Arc::new(MemoryLocalStore::new()), backend)
            .build();

        // Only sign-out events survive in the buffer, so the lag is what brings it online.
        tokio::time::timeout(Duration::from_secs(2), rt.sync_identity())
            .await
            .unwrap();
        assert_eq!(rt.state(), CapabilityState::Online);
    }

    #[tokio::test]
    async fn onboarding_through_runtime_tracks_skip() {
        let identity = Arc::new(LocalIdentity::signed_in(Session::new("u1")));
        let rt = runtime(identity, Arc::new(MemorySecretBackend::new()));
        let mut session = rt.begin_onboarding(Provider::Gemini);
        assert!(!rt.has_skipped_onboarding());
        rt.skip_onboarding(&mut session).unwrap();
        assert!(rt.has_skipped_onboarding());
        assert!(rt.status().skipped_onboarding);
    }

    #[tokio::test]
    async fn audit_records_store_without_secret_value() {
        let dir = tempfile::tempdir().unwrap();
        let identity = Arc::new(LocalIdentity::signed_in(Session::new("u1")));
        let rt = CapabilityRuntime::builder(
            identity,
            Arc::new(MemoryLocalStore::new()),
            Arc::new(MemorySecretBackend::new()),
        )
        .audit(AuditLog::new(dir.path().join("audit"), true))
        .build();

        let key = Credential::new("sk-very-secret").unwrap();
        rt.store_credential(Provider::OpenAi, &key).await.unwrap();

        let events = rt.audit_log().read(10, None).unwrap();
        assert_eq!(events[0].kind, "credential.store");
        assert_eq!(events[0].fingerprint.as_deref(), Some(key.fingerprint().as_str()));
        let raw = serde_json::to_string(&events).unwrap();
        assert!(!raw.contains("sk-very-secret"));
    }

    #[tokio::test]
    async fn capability_failure_is_audited() {
        let dir = tempfile::tempdir().unwrap();
        let identity = Arc::new(LocalIdentity::signed_in(Session::new("u1")));
        let rt = CapabilityRuntime::builder(
            identity,
            Arc::new(MemoryLocalStore::new()),
            Arc::new(MemorySecretBackend::new()),
        )
        .audit(AuditLog::new(dir.path().join("audit"), true))
        .build();

        assert_eq!(rt.classify(&ProviderError::RateLimited), Classification::Transient);
        assert_eq!(
            rt.classify(&ProviderError::InvalidKey),
            Classification::CapabilityFailure
        );
        let events = rt.audit_log().read(10, None).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, "capability.offline");
    }
}
