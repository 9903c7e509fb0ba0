use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl Session {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            email: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityEventKind {
    SignedIn,
    SignedOut,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityEvent {
    pub kind: IdentityEventKind,
    pub session: Option<Session>,
}

/// The identity collaborator: current session plus a stream of sign-in/sign-out events.
pub trait IdentityProvider: Send + Sync {
    fn current_session(&self) -> Option<Session>;
    fn subscribe(&self) -> broadcast::Receiver<IdentityEvent>;
}

const EVENT_CAPACITY: usize = 16;

/// In-process identity source. Sign-in state lives only in memory.
#[derive(Debug)]
pub struct LocalIdentity {
    session: Mutex<Option<Session>>,
    events: broadcast::Sender<IdentityEvent>,
}

impl Default for LocalIdentity {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalIdentity {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            session: Mutex::new(None),
            events,
        }
    }

    pub fn signed_in(session: Session) -> Self {
        let identity = Self::new();
        *identity.session.lock().unwrap_or_else(|e| e.into_inner()) = Some(session);
        identity
    }

    pub fn sign_in(&self, session: Session) {
        info!(user_id = %session.user_id, "signed in");
        *self.session.lock().unwrap_or_else(|e| e.into_inner()) = Some(session.clone());
        // No subscribers is fine; nobody is listening yet.
        let _ = self.events.send(IdentityEvent {
            kind: IdentityEventKind::SignedIn,
            session: Some(session),
        });
    }

    pub fn sign_out(&self) {
        let previous = self.session.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(previous) = previous {
            info!(user_id = %previous.user_id, "signed out");
        }
        let _ = self.events.send(IdentityEvent {
            kind: IdentityEventKind::SignedOut,
            session: None,
        });
    }
}

impl IdentityProvider for LocalIdentity {
    fn current_session(&self) -> Option<Session> {
        self.session.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<IdentityEvent> {
        self.events.subscribe()
    }
}
