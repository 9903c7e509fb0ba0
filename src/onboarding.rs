use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::classifier::ProviderError;
use crate::credential::Credential;
use crate::identity::IdentityProvider;
use crate::preferences::Preferences;
use crate::provider::Provider;
use crate::secret_store::{SecretStoreClient, SecretStoreError};
use crate::state::CapabilityStore;
use crate::validator::Validator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnboardingStep {
    EnteringCredential,
    Saving,
    Validating,
    Validated,
    SavedUnvalidated,
    Done,
    Skipped,
    ConfirmingDisable,
    Disabled,
    Failed,
}

impl OnboardingStep {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OnboardingStep::Done | OnboardingStep::Skipped | OnboardingStep::Disabled
        )
    }
}

/// Result of a successful save. `validated == false` still means the credential is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredOutcome {
    pub validated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OnboardingOutcome {
    Pending,
    Stored(StoredOutcome),
    Failed(String),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum OnboardingError {
    #[error("credential input is empty")]
    EmptyInput,
    #[error("sign in before linking a {0} credential")]
    IdentityRequired(Provider),
    #[error("failed to store credential: {0}")]
    Store(#[from] SecretStoreError),
    #[error("cannot {action} while onboarding is {step:?}")]
    InvalidTransition {
        step: OnboardingStep,
        action: &'static str,
    },
}

/// Collaborators an onboarding session needs. Cheap to clone.
#[derive(Clone)]
pub struct OnboardingDeps {
    pub client: SecretStoreClient,
    pub validator: Arc<dyn Validator>,
    pub state: CapabilityStore,
    pub preferences: Preferences,
    pub identity: Arc<dyn IdentityProvider>,
    pub validation_timeout: Duration,
    /// Set once the user skips; remembered for the rest of the process.
    pub skipped: Arc<AtomicBool>,
}

/// One pass through the credential entry flow. Never persisted.
pub struct OnboardingSession {
    id: Uuid,
    provider: Provider,
    input: Zeroizing<String>,
    step: OnboardingStep,
    outcome: OnboardingOutcome,
    deps: OnboardingDeps,
}

impl OnboardingSession {
    pub fn new(provider: Provider, deps: OnboardingDeps) -> Self {
        let id = Uuid::new_v4();
        info!(session = %id, provider = %provider, "onboarding opened");
        Self {
            id,
            provider,
            input: Zeroizing::new(String::new()),
            step: OnboardingStep::EnteringCredential,
            outcome: OnboardingOutcome::Pending,
            deps,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub fn step(&self) -> OnboardingStep {
        self.step
    }

    pub fn outcome(&self) -> &OnboardingOutcome {
        &self.outcome
    }

    pub fn set_input(&mut self, value: &str) -> Result<(), OnboardingError> {
        match self.step {
            OnboardingStep::EnteringCredential => {}
            OnboardingStep::Failed => {
                self.enter(OnboardingStep::EnteringCredential);
                self.outcome = OnboardingOutcome::Pending;
            }
            from => {
                return Err(OnboardingError::InvalidTransition {
                    step: from,
                    action: "edit input",
                })
            }
        }
        self.input = Zeroizing::new(value.to_string());
        Ok(())
    }

    /// Store first, then probe. A failed or slow probe leaves the credential stored and
    /// ends in `SavedUnvalidated` with a warning.
    pub async fn submit(&mut self) -> Result<StoredOutcome, OnboardingError> {
        if self.step != OnboardingStep::EnteringCredential {
            return Err(OnboardingError::InvalidTransition {
                step: self.step,
                action: "submit",
            });
        }
        let credential = Credential::new(self.input.as_str()).ok_or(OnboardingError::EmptyInput)?;
        let session = self
            .deps
            .identity
            .current_session()
            .ok_or(OnboardingError::IdentityRequired(self.provider))?;

        self.enter(OnboardingStep::Saving);
        if let Err(err) = self
            .deps
            .client
            .store(Some(&session), self.provider, &credential)
            .await
        {
            warn!(session = %self.id, provider = %self.provider, error = %err, "onboarding save failed");
            self.outcome = OnboardingOutcome::Failed(err.to_string());
            self.enter(OnboardingStep::Failed);
            return Err(err.into());
        }
        self.input = Zeroizing::new(String::new());

        if !self.provider.is_primary() {
            let stored = StoredOutcome {
                validated: false,
                warning: None,
            };
            return Ok(self.finish(OnboardingStep::SavedUnvalidated, stored));
        }

        self.enter(OnboardingStep::Validating);
        let probe = tokio::time::timeout(
            self.deps.validation_timeout,
            self.deps.validator.validate(self.provider, &credential),
        )
        .await;
        let (step, stored) = match probe {
            Ok(Ok(())) => (
                OnboardingStep::Validated,
                StoredOutcome {
                    validated: true,
                    warning: None,
                },
            ),
            Ok(Err(ProviderError::ValidationSkipped)) => (
                OnboardingStep::SavedUnvalidated,
                StoredOutcome {
                    validated: false,
                    warning: Some("credential saved; validation skipped".to_string()),
                },
            ),
            Ok(Err(err)) => (
                OnboardingStep::SavedUnvalidated,
                StoredOutcome {
                    validated: false,
                    warning: Some(format!("credential saved, but validation failed: {err}")),
                },
            ),
            Err(_) => (
                OnboardingStep::SavedUnvalidated,
                StoredOutcome {
                    validated: false,
                    warning: Some(format!(
                        "credential saved, but validation timed out after {:?}",
                        self.deps.validation_timeout
                    )),
                },
            ),
        };
        self.deps.state.mark_online();
        self.deps.preferences.set_ai_enabled(true);
        Ok(self.finish(step, stored))
    }

    pub fn close(&mut self) -> Result<(), OnboardingError> {
        match self.step {
            OnboardingStep::Validated | OnboardingStep::SavedUnvalidated => {
                self.enter(OnboardingStep::Done);
                Ok(())
            }
            from => Err(OnboardingError::InvalidTransition {
                step: from,
                action: "close",
            }),
        }
    }

    pub fn skip(&mut self) -> Result<(), OnboardingError> {
        self.require_editable("skip")?;
        self.deps.skipped.store(true, Ordering::SeqCst);
        self.enter(OnboardingStep::Skipped);
        Ok(())
    }

    /// First half of the opt-out. Nothing changes until [`Self::confirm_disable`].
    pub fn request_disable(&mut self) -> Result<(), OnboardingError> {
        self.require_editable("disable")?;
        self.enter(OnboardingStep::ConfirmingDisable);
        Ok(())
    }

    pub fn cancel_disable(&mut self) -> Result<(), OnboardingError> {
        self.require_step(OnboardingStep::ConfirmingDisable, "cancel disable")?;
        self.enter(OnboardingStep::EnteringCredential);
        Ok(())
    }

    pub fn confirm_disable(&mut self) -> Result<(), OnboardingError> {
        self.require_step(OnboardingStep::ConfirmingDisable, "confirm disable")?;
        self.deps.preferences.set_ai_enabled(false);
        self.enter(OnboardingStep::Disabled);
        Ok(())
    }

    fn require_editable(&self, action: &'static str) -> Result<(), OnboardingError> {
        match self.step {
            OnboardingStep::EnteringCredential | OnboardingStep::Failed => Ok(()),
            step => Err(OnboardingError::InvalidTransition { step, action }),
        }
    }

    fn require_step(
        &self,
        step: OnboardingStep,
        action: &'static str,
    ) -> Result<(), OnboardingError> {
        if self.step == step {
            Ok(())
        } else {
            Err(OnboardingError::InvalidTransition {
                step: self.step,
                action,
            })
        }
    }

    fn finish(&mut self, step: OnboardingStep, stored: StoredOutcome) -> StoredOutcome {
        if let Some(warning) = &stored.warning {
            warn!(session = %self.id, provider = %self.provider, warning = %warning, "credential stored unvalidated");
        }
        self.outcome = OnboardingOutcome::Stored(stored.clone());
        self.enter(step);
        stored
    }

    fn enter(&mut self, next: OnboardingStep) {
        info!(session = %self.id, from = ?self.step, to = ?next, "onboarding step");
        self.step = next;
    }
}
