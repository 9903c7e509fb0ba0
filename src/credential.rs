use std::fmt;

use sha2::{Digest, Sha256};
use zeroize::Zeroize;

/// An opaque provider secret.
///
/// The value never appears in `Debug` output and is wiped when dropped. Use
/// [`Credential::fingerprint`] when a stable, loggable handle is needed.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Returns `None` for blank input; surrounding whitespace is not part of a key.
    pub fn new(value: impl Into<String>) -> Option<Self> {
        let mut value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            value.zeroize();
            return None;
        }
        let credential = Self(trimmed.to_string());
        value.zeroize();
        Some(credential)
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    /// First 12 hex chars of the SHA-256 of the value.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.0.as_bytes());
        hex::encode(&digest[..6])
    }
}

impl Drop for Credential {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential(<redacted {}>)", self.fingerprint())
    }
}
