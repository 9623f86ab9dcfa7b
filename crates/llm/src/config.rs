use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use scriptorium_common::{Provider, Result, ScriptoriumError};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::debug;

use crate::anthropic::AnthropicClient;
use crate::client::{LlmClient, LlmRequest, LlmResponse};
use crate::google::GoogleClient;
use crate::openai::OpenAiClient;

/// Per-provider endpoint and credential settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// Override of the provider's public API base URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    /// Environment variable holding the API key. Defaults to the
    /// provider's conventional variable (e.g. `OPENAI_API_KEY`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    /// Inline API key. Prefer `api_key_env`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl ProviderSettings {
    pub fn key_env(&self, provider: Provider) -> &str {
        self.api_key_env
            .as_deref()
            .unwrap_or_else(|| provider.default_api_key_env())
    }

    /// Resolve the API key from config or environment variables.
    ///
    /// An explicit non-empty `api_key` wins; otherwise the configured (or
    /// default) environment variable is read. A missing key is not an error
    /// here: the client reports it when a completion is attempted.
    pub fn resolve_api_key(&self, provider: Provider) -> Option<String> {
        if let Some(ref key) = self.api_key {
            if !key.is_empty() {
                return Some(key.clone());
            }
        }

        std::env::var(self.key_env(provider))
            .ok()
            .filter(|k| !k.is_empty())
    }
}

/// Settings shared by every completion client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Upper bound on in-flight requests per provider.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,
    #[serde(default)]
    pub openai: ProviderSettings,
    #[serde(default)]
    pub anthropic: ProviderSettings,
    #[serde(default)]
    pub google: ProviderSettings,
    #[serde(default)]
    pub xai: ProviderSettings,
}

fn default_max_concurrent() -> usize {
    4
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            temperature: None,
            max_tokens: None,
            max_concurrent_requests: default_max_concurrent(),
            openai: ProviderSettings::default(),
            anthropic: ProviderSettings::default(),
            google: ProviderSettings::default(),
            xai: ProviderSettings::default(),
        }
    }
}

impl LlmSettings {
    pub fn provider(&self, provider: Provider) -> &ProviderSettings {
        match provider {
            Provider::OpenAi => &self.openai,
            Provider::Anthropic => &self.anthropic,
            Provider::Google => &self.google,
            Provider::XAi => &self.xai,
        }
    }

    /// Providers whose API key cannot currently be resolved.
    pub fn providers_missing_keys(&self) -> Vec<Provider> {
        Provider::ALL
            .into_iter()
            .filter(|p| self.provider(*p).resolve_api_key(*p).is_none())
            .collect()
    }
}

/// Wraps a client so that at most N requests share one semaphore.
pub struct SemaphoredClient {
    inner: Arc<dyn LlmClient>,
    semaphore: Arc<Semaphore>,
}

impl SemaphoredClient {
    pub fn new(inner: Arc<dyn LlmClient>, max_concurrent: usize) -> Self {
        Self::with_semaphore(inner, Arc::new(Semaphore::new(max_concurrent.max(1))))
    }

    /// Share an existing semaphore, e.g. one per provider.
    pub fn with_semaphore(inner: Arc<dyn LlmClient>, semaphore: Arc<Semaphore>) -> Self {
        Self { inner, semaphore }
    }
}

#[async_trait]
impl LlmClient for SemaphoredClient {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| ScriptoriumError::Runtime(format!("Semaphore acquire failed: {e}")))?;
        self.inner.complete(request).await
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn provider(&self) -> Provider {
        self.inner.provider()
    }
}

/// Builds completion clients bound to a provider and model.
pub trait ClientFactory: Send + Sync {
    fn build(&self, provider: Provider, model: &str) -> Result<Arc<dyn LlmClient>>;
}

/// Build a bare HTTP client for `provider`/`model` from settings.
pub fn build_llm_client(
    provider: Provider,
    model: &str,
    settings: &ProviderSettings,
    http_client: reqwest::Client,
) -> Box<dyn LlmClient> {
    let api_url = settings.api_url.clone();
    let api_key = settings.resolve_api_key(provider);
    let key_env = settings.key_env(provider);
    let model = model.to_string();

    match provider {
        Provider::OpenAi => Box::new(
            OpenAiClient::new(api_url, model, api_key)
                .with_key_env(key_env)
                .with_http_client(http_client),
        ),
        Provider::XAi => Box::new(
            OpenAiClient::xai(api_url, model, api_key)
                .with_key_env(key_env)
                .with_http_client(http_client),
        ),
        Provider::Anthropic => Box::new(
            AnthropicClient::new(api_url, model, api_key)
                .with_key_env(key_env)
                .with_http_client(http_client),
        ),
        Provider::Google => Box::new(
            GoogleClient::new(api_url, model, api_key)
                .with_key_env(key_env)
                .with_http_client(http_client),
        ),
    }
}

/// Factory producing real HTTP clients, one concurrency limit per provider.
pub struct HttpClientFactory {
    settings: LlmSettings,
    http_client: reqwest::Client,
    limits: HashMap<Provider, Arc<Semaphore>>,
}

impl HttpClientFactory {
    pub fn new(settings: LlmSettings) -> Self {
        let limits = Provider::ALL
            .into_iter()
            .map(|p| {
                (
                    p,
                    Arc::new(Semaphore::new(settings.max_concurrent_requests.max(1))),
                )
            })
            .collect();

        Self {
            settings,
            http_client: reqwest::Client::new(),
            limits,
        }
    }

    pub fn settings(&self) -> &LlmSettings {
        &self.settings
    }
}

impl ClientFactory for HttpClientFactory {
    fn build(&self, provider: Provider, model: &str) -> Result<Arc<dyn LlmClient>> {
        if model.trim().is_empty() {
            return Err(scriptorium_common::ConfigError::Invalid(format!(
                "model name for provider {provider} cannot be empty"
            ))
            .into());
        }

        debug!(%provider, model, "Building completion client");

        let base = build_llm_client(
            provider,
            model,
            self.settings.provider(provider),
            self.http_client.clone(),
        );
        let semaphore = self
            .limits
            .get(&provider)
            .cloned()
            .unwrap_or_else(|| Arc::new(Semaphore::new(1)));

        Ok(Arc::new(SemaphoredClient::with_semaphore(
            Arc::from(base),
            semaphore,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOML_CONFIG: &str = r#"
temperature = 0.4
max_concurrent_requests = 2

[openai]
api_url = "http://localhost:11434"
api_key = "sk-inline"

[anthropic]
api_key_env = "SCRIPTORIUM_TEST_ANTHROPIC_KEY_UNSET"
"#;

    #[test]
    fn deserialize_settings_from_toml() {
        let settings: LlmSettings = toml::from_str(TOML_CONFIG).unwrap();
        assert_eq!(settings.temperature, Some(0.4));
        assert_eq!(settings.max_concurrent_requests, 2);
        assert_eq!(
            settings.openai.api_url.as_deref(),
            Some("http://localhost:11434")
        );
        assert_eq!(
            settings.anthropic.key_env(Provider::Anthropic),
            "SCRIPTORIUM_TEST_ANTHROPIC_KEY_UNSET"
        );
        assert!(settings.google.api_url.is_none());
    }

    #[test]
    fn deserialize_settings_defaults() {
        let settings: LlmSettings = toml::from_str("").unwrap();
        assert_eq!(settings.max_concurrent_requests, 4);
        assert!(settings.temperature.is_none());
        assert_eq!(settings.xai.key_env(Provider::XAi), "GROK_API_KEY");
    }

    #[test]
    fn inline_key_wins_over_environment() {
        let settings: LlmSettings = toml::from_str(TOML_CONFIG).unwrap();
        assert_eq!(
            settings.openai.resolve_api_key(Provider::OpenAi).as_deref(),
            Some("sk-inline")
        );
        assert!(
            settings
                .anthropic
                .resolve_api_key(Provider::Anthropic)
                .is_none()
        );
        assert!(
            settings
                .providers_missing_keys()
                .contains(&Provider::Anthropic)
        );
    }

    #[test]
    fn factory_builds_every_provider_without_keys() {
        let factory = HttpClientFactory::new(LlmSettings::default());
        for provider in Provider::ALL {
            let client = factory.build(provider, "some-model").unwrap();
            assert_eq!(client.provider(), provider);
            assert_eq!(client.model_name(), "some-model");
        }
    }

    #[tokio::test]
    async fn missing_key_names_configured_variable() {
        let settings: LlmSettings = toml::from_str(
            r#"
[google]
api_key_env = "SCRIPTORIUM_TEST_GEMINI_KEY_UNSET"
"#,
        )
        .unwrap();
        let client = build_llm_client(
            Provider::Google,
            "gemini-2.0-flash",
            &settings.google,
            reqwest::Client::new(),
        );
        let err = client
            .complete(LlmRequest::single_turn("s", "u"))
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("SCRIPTORIUM_TEST_GEMINI_KEY_UNSET"));
        assert!(!message.contains("GOOGLE_GEMINI_API_KEY"));
    }

    #[test]
    fn factory_rejects_empty_model() {
        let factory = HttpClientFactory::new(LlmSettings::default());
        assert!(factory.build(Provider::OpenAi, "  ").is_err());
    }

    #[tokio::test]
    async fn semaphored_client_limits_concurrency() {
        use std::sync::atomic::{AtomicU32, Ordering};

        struct CountingClient {
            concurrent: Arc<AtomicU32>,
            max_seen: Arc<AtomicU32>,
        }

        #[async_trait]
        impl LlmClient for CountingClient {
            async fn complete(&self, _request: LlmRequest) -> Result<LlmResponse> {
                let current = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_seen.fetch_max(current, Ordering::SeqCst);
                tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
                self.concurrent.fetch_sub(1, Ordering::SeqCst);
                Ok(LlmResponse {
                    content: "ok".to_string(),
                    model: "test".to_string(),
                    usage: None,
                    finish_reason: None,
                })
            }
            fn model_name(&self) -> &str {
                "test"
            }
            fn provider(&self) -> Provider {
                Provider::OpenAi
            }
        }

        let concurrent = Arc::new(AtomicU32::new(0));
        let max_seen = Arc::new(AtomicU32::new(0));

        let inner = Arc::new(CountingClient {
            concurrent: concurrent.clone(),
            max_seen: max_seen.clone(),
        });

        let semaphored = Arc::new(SemaphoredClient::new(inner, 2));

        let mut handles = vec![];
        for _ in 0..6 {
            let client = semaphored.clone();
            handles.push(tokio::spawn(async move {
                client.complete(LlmRequest::default()).await.unwrap();
            }));
        }

        for h in handles {
            h.await.unwrap();
        }

        assert!(max_seen.load(Ordering::SeqCst) <= 2);
    }
}
