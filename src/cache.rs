use std::sync::Arc;

use tracing::{debug, warn};

use crate::local_store::LocalStore;
use crate::provider::Provider;

const FLAG_PREFIX: &str = "capgate.has_key.";

pub fn flag_key(provider: Provider) -> String {
    format!("{}{}", FLAG_PREFIX, provider)
}

/// Existence cache: "a credential for this provider has been confirmed at least once".
///
/// Flags are additive; there is no clear operation and no expiry. A flag may outlive a
/// revoked credential, which surfaces later as a provider-call failure.
#[derive(Clone)]
pub struct CredentialCache {
    store: Arc<dyn LocalStore>,
}

impl CredentialCache {
    pub fn new(store: Arc<dyn LocalStore>) -> Self {
        Self { store }
    }

    pub fn has_flag(&self, provider: Provider) -> bool {
        match self.store.get(&flag_key(provider)) {
            Ok(value) => value.as_deref() == Some("true"),
            Err(err) => {
                warn!(provider = %provider, error = %err, "credential cache read failed");
                false
            }
        }
    }

    pub fn set_flag(&self, provider: Provider) {
        if self.has_flag(provider) {
            return;
        }
        match self.store.set(&flag_key(provider), "true") {
            Ok(()) => debug!(provider = %provider, "credential cache flag set"),
            Err(err) => {
                warn!(provider = %provider, error = %err, "credential cache write failed")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local_store::MemoryLocalStore;
    use crate::test_support::FailingLocalStore;

    #[test]
    fn flags_are_per_provider() {
        let cache = CredentialCache::new(Arc::new(MemoryLocalStore::new()));
        assert!(!cache.has_flag(Provider::Gemini));

        cache.set_flag(Provider::Gemini);
        assert!(cache.has_flag(Provider::Gemini));
        assert!(!cache.has_flag(Provider::OpenAi));
    }

    #[test]
    fn set_flag_is_idempotent() {
        let store = Arc::new(MemoryLocalStore::new());
        let cache = CredentialCache::new(store.clone());
        cache.set_flag(Provider::Perplexity);
        cache.set_flag(Provider::Perplexity);
        assert_eq!(
            store.get(&flag_key(Provider::Perplexity)).unwrap().as_deref(),
            Some("true")
        );
    }

    #[test]
    fn unreadable_store_reads_as_unset_and_writes_do_not_panic() {
        let cache = CredentialCache::new(Arc::new(FailingLocalStore));
        cache.set_flag(Provider::Gemini);
        assert!(!cache.has_flag(Provider::Gemini));
    }

    #[test]
    fn only_literal_true_counts() {
        let store = Arc::new(MemoryLocalStore::new());
        store.set(&flag_key(Provider::Gemini), "yes").unwrap();
        let cache = CredentialCache::new(store);
        assert!(!cache.has_flag(Provider::Gemini));
    }
}
