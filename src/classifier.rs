use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::identity::IdentityProvider;
use crate::navigator::Navigator;
use crate::state::CapabilityStore;

const DISCONNECTED_MARKER: &str = "NEURAL_LINK_DISCONNECTED";
const ENTITY_NOT_FOUND_MARKER: &str = "Requested entity was not found";
const INVALID_KEY_MARKER: &str = "API_KEY_INVALID";

/// Failure surfaced by an AI-provider call, typed at the client boundary.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("provider link disconnected: no usable credential")]
    Disconnected,
    #[error("requested entity was not found")]
    EntityNotFound,
    #[error("provider rejected the api key")]
    InvalidKey,
    #[error("provider rate limited the request")]
    RateLimited,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("provider returned {status}: {message}")]
    Upstream { status: u16, message: String },
    /// The caller opted out of probing the credential.
    #[error("validation skipped")]
    ValidationSkipped,
    #[error("{0}")]
    Other(String),
}

impl ProviderError {
    /// Map a raw provider message onto a variant. Marker strings are only inspected here.
    pub fn from_message(message: &str) -> Self {
        if message.contains(DISCONNECTED_MARKER) {
            ProviderError::Disconnected
        } else if message.contains(ENTITY_NOT_FOUND_MARKER) {
            ProviderError::EntityNotFound
        } else if message.contains(INVALID_KEY_MARKER) {
            ProviderError::InvalidKey
        } else {
            ProviderError::Other(message.to_string())
        }
    }

    pub fn from_http(status: u16, body: &str) -> Self {
        match status {
            401 => ProviderError::Disconnected,
            400 | 403 if body.contains(INVALID_KEY_MARKER) => ProviderError::InvalidKey,
            404 => ProviderError::EntityNotFound,
            429 => ProviderError::RateLimited,
            _ => ProviderError::Upstream {
                status,
                message: truncate(body, 200),
            },
        }
    }
}

fn truncate(body: &str, max_chars: usize) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let mut out: String = trimmed.chars().take(max_chars).collect();
    out.push('…');
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    CapabilityFailure,
    Transient,
}

/// Pure decision on the error variant.
pub fn classify(error: &ProviderError) -> Classification {
    match error {
        ProviderError::Disconnected | ProviderError::EntityNotFound | ProviderError::InvalidKey => {
            Classification::CapabilityFailure
        }
        ProviderError::RateLimited
        | ProviderError::Transport(_)
        | ProviderError::Upstream { .. }
        | ProviderError::ValidationSkipped
        | ProviderError::Other(_) => Classification::Transient,
    }
}

/// Applies a classification: capability failures take the capability offline and, for a
/// signed-in user, reopen onboarding. Transient failures change nothing.
#[derive(Clone)]
pub struct ErrorClassifier {
    state: CapabilityStore,
    identity: Arc<dyn IdentityProvider>,
    navigator: Arc<dyn Navigator>,
}

impl ErrorClassifier {
    pub fn new(
        state: CapabilityStore,
        identity: Arc<dyn IdentityProvider>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        Self {
            state,
            identity,
            navigator,
        }
    }

    pub fn classify(&self, error: &ProviderError) -> Classification {
        let classification = classify(error);
        match classification {
            Classification::CapabilityFailure => {
                warn!(error = %error, "provider credential rejected; capability offline");
                self.state.mark_offline();
                if self.identity.current_session().is_some() {
                    self.navigator.open_onboarding(true);
                }
            }
            Classification::Transient => {
                debug!(error = %error, "transient provider failure");
            }
        }
        classification
    }
}
