use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityState {
    Unknown,
    Online,
    Offline,
}

/// Online/offline status of AI-dependent features, shared by everything built from one
/// runtime.
///
/// Advisory and read-mostly: transitions land in the order their triggering events
/// complete, and callers re-read it right before acting instead of holding on to a value.
#[derive(Clone)]
pub struct CapabilityStore {
    tx: Arc<watch::Sender<CapabilityState>>,
}

impl Default for CapabilityStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CapabilityStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(CapabilityState::Unknown);
        Self { tx: Arc::new(tx) }
    }

    pub fn get(&self) -> CapabilityState {
        *self.tx.borrow()
    }

    /// Anything short of a confirmed `Online` counts as offline.
    pub fn is_offline(&self) -> bool {
        self.get() != CapabilityState::Online
    }

    pub fn subscribe(&self) -> watch::Receiver<CapabilityState> {
        self.tx.subscribe()
    }

    pub(crate) fn mark_online(&self) -> bool {
        self.transition(CapabilityState::Online)
    }

    pub(crate) fn mark_offline(&self) -> bool {
        self.transition(CapabilityState::Offline)
    }

    fn transition(&self, next: CapabilityState) -> bool {
        let mut previous = next;
        let changed = self.tx.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            previous = *current;
            *current = next;
            true
        });
        if changed {
            info!(from = ?previous, to = ?next, "capability state changed");
        }
        changed
    }
}
