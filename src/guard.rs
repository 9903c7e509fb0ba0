use std::future::Future;
use std::sync::Arc;

use tracing::{debug, info};

use crate::identity::IdentityProvider;
use crate::navigator::Navigator;
use crate::preferences::Preferences;
use crate::provider::Provider;
use crate::resolver::{CredentialResolver, ProviderClient, ResolveError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardOutcome<T> {
    Ran(T),
    SignInRequired,
    OnboardingRequired,
    StoreUnavailable,
    /// The user switched AI features off.
    Disabled,
}

impl<T> GuardOutcome<T> {
    pub fn ran(self) -> Option<T> {
        match self {
            GuardOutcome::Ran(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_ran(&self) -> bool {
        matches!(self, GuardOutcome::Ran(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            GuardOutcome::Ran(_) => "ran",
            GuardOutcome::SignInRequired => "sign_in_required",
            GuardOutcome::OnboardingRequired => "onboarding_required",
            GuardOutcome::StoreUnavailable => "store_unavailable",
            GuardOutcome::Disabled => "disabled",
        }
    }
}

/// Mandatory checkpoint for every AI-gated action.
///
/// The action only runs after a successful primary-provider resolution in the same call.
/// Failures of the action itself are the caller's to classify.
#[derive(Clone)]
pub struct CapabilityGuard {
    identity: Arc<dyn IdentityProvider>,
    resolver: Arc<CredentialResolver>,
    preferences: Preferences,
    navigator: Arc<dyn Navigator>,
}

impl CapabilityGuard {
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        resolver: Arc<CredentialResolver>,
        preferences: Preferences,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        Self {
            identity,
            resolver,
            preferences,
            navigator,
        }
    }

    pub async fn guard<F, Fut, T>(&self, action: F) -> GuardOutcome<T>
    where
        F: FnOnce(ProviderClient) -> Fut,
        Fut: Future<Output = T>,
    {
        if self.identity.current_session().is_none() {
            debug!("guarded action without session; routing to sign-in");
            self.navigator.open_sign_in();
            return GuardOutcome::SignInRequired;
        }
        if !self.preferences.ai_enabled() {
            debug!("ai features disabled; guarded action skipped");
            return GuardOutcome::Disabled;
        }

        match self.resolver.resolve(Provider::PRIMARY).await {
            Ok(client) => GuardOutcome::Ran(action(client).await),
            Err(ResolveError::NoCredential(_)) => {
                self.navigator.open_onboarding(false);
                GuardOutcome::OnboardingRequired
            }
            Err(ResolveError::StoreUnavailable(_)) => {
                self.navigator.show_store_diagnostic();
                GuardOutcome::StoreUnavailable
            }
            Err(ResolveError::IdentityRequired(_)) => {
                self.navigator.open_sign_in();
                GuardOutcome::SignInRequired
            }
        }
    }

    /// Turn AI features back on. Signed-out users are sent to sign in first.
    pub fn re_enable(&self) -> bool {
        if self.identity.current_session().is_none() {
            self.navigator.open_sign_in();
            return false;
        }
        self.preferences.set_ai_enabled(true);
        info!("ai features re-enabled; reopening onboarding");
        self.navigator.open_onboarding(false);
        true
    }
}
