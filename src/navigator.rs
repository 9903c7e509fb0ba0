use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

/// A request for the presentation layer to move the user somewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NavigationRequest {
    SignIn,
    Onboarding { reopened: bool },
    StoreDiagnostic,
}

/// Navigation sink. Requests are fire-and-forget.
pub trait Navigator: Send + Sync {
    fn request(&self, request: NavigationRequest);

    fn open_sign_in(&self) {
        self.request(NavigationRequest::SignIn);
    }

    fn open_onboarding(&self, reopened: bool) {
        self.request(NavigationRequest::Onboarding { reopened });
    }

    fn show_store_diagnostic(&self) {
        self.request(NavigationRequest::StoreDiagnostic);
    }
}

/// Forwards requests to whoever holds the receiving end (typically a UI task).
#[derive(Debug, Clone)]
pub struct ChannelNavigator {
    tx: mpsc::UnboundedSender<NavigationRequest>,
}

impl ChannelNavigator {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<NavigationRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Navigator for ChannelNavigator {
    fn request(&self, request: NavigationRequest) {
        if self.tx.send(request).is_err() {
            debug!(?request, "navigation receiver dropped");
        }
    }
}

/// Keeps every request in memory; the CLI reports them after a command finishes.
#[derive(Debug, Default)]
pub struct RecordingNavigator {
    requests: Mutex<Vec<NavigationRequest>>,
}

impl RecordingNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<NavigationRequest> {
        std::mem::take(&mut *self.requests.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

impl Navigator for RecordingNavigator {
    fn request(&self, request: NavigationRequest) {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request);
    }
}
