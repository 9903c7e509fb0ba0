use std::sync::Arc;

use tracing::{info, warn};

use crate::local_store::LocalStore;

const AI_ENABLED_KEY: &str = "capgate.ai_enabled";

/// User-level switches persisted next to the credential cache.
#[derive(Clone)]
pub struct Preferences {
    store: Arc<dyn LocalStore>,
}

impl Preferences {
    pub fn new(store: Arc<dyn LocalStore>) -> Self {
        Self { store }
    }

    /// AI features are on unless the user explicitly turned them off.
    pub fn ai_enabled(&self) -> bool {
        match self.store.get(AI_ENABLED_KEY) {
            Ok(Some(value)) => value != "false",
            Ok(None) => true,
            Err(err) => {
                warn!(error = %err, "preferences read failed; assuming ai enabled");
                true
            }
        }
    }

    pub fn set_ai_enabled(&self, enabled: bool) {
        let value = if enabled { "true" } else { "false" };
        match self.store.set(AI_ENABLED_KEY, value) {
            Ok(()) => info!(enabled, "ai features toggled"),
            Err(err) => warn!(error = %err, enabled, "preferences write failed"),
        }
    }
}
