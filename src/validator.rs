use std::error::Error as _;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::redirect::Policy as RedirectPolicy;
use reqwest::Client;
use tracing::debug;

use crate::classifier::ProviderError;
use crate::credential::Credential;
use crate::provider::Provider;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const PROBE_MODEL: &str = "gemini-3-flash-preview";

/// Lightweight "does this key work" probe run after a credential is stored.
#[async_trait]
pub trait Validator: Send + Sync {
    async fn validate(&self, provider: Provider, credential: &Credential)
        -> Result<(), ProviderError>;
}

/// Probes the primary provider with a single-token generation request.
#[derive(Debug, Clone)]
pub struct HttpValidator {
    client: Client,
    base_url: String,
}

impl HttpValidator {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, String> {
        let client = Client::builder()
            .redirect(RedirectPolicy::none())
            .timeout(timeout)
            .build()
            .map_err(|e| format_reqwest_error(&e))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn probe_url(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, PROBE_MODEL
        )
    }
}

#[async_trait]
impl Validator for HttpValidator {
    async fn validate(
        &self,
        provider: Provider,
        credential: &Credential,
    ) -> Result<(), ProviderError> {
        if !provider.is_primary() {
            return Err(ProviderError::Other(format!(
                "no validation probe for provider '{provider}'"
            )));
        }
        let body = serde_json::json!({
            "contents": [{ "parts": [{ "text": "ping" }] }],
            "generationConfig": { "maxOutputTokens": 1 }
        });
        let response = self
            .client
            .post(self.probe_url())
            .header("x-goog-api-key", credential.expose())
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(format_reqwest_error(&e)))?;

        let status = response.status();
        if status.is_success() {
            debug!(provider = %provider, fingerprint = %credential.fingerprint(), "validation probe passed");
            return Ok(());
        }
        let text = response.text().await.unwrap_or_default();
        Err(ProviderError::from_http(status.as_u16(), &text))
    }
}

/// Stands in when the caller opted out of probing; every credential stays unvalidated.
#[derive(Debug, Clone, Copy, Default)]
pub struct SkippedValidator;

#[async_trait]
impl Validator for SkippedValidator {
    async fn validate(
        &self,
        _provider: Provider,
        _credential: &Credential,
    ) -> Result<(), ProviderError> {
        Err(ProviderError::ValidationSkipped)
    }
}

fn format_reqwest_error(error: &reqwest::Error) -> String {
    let mut message = error.to_string();
    let mut current = error.source();
    while let Some(source) = current {
        message.push_str(": ");
        message.push_str(&source.to_string());
        current = source.source();
    }
    message
}
