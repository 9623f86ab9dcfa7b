//! OpenAI chat-completions client. Also serves xAI, whose API is
//! wire-compatible with OpenAI's.

use async_trait::async_trait;
use scriptorium_common::{Provider, Result, ScriptoriumError};
use serde::{Deserialize, Serialize};

use crate::client::{
    LlmClient, LlmRequest, LlmResponse, MessageRole, TokenUsage, missing_key, status_error,
};

pub const OPENAI_BASE_URL: &str = "https://api.openai.com";
pub const XAI_BASE_URL: &str = "https://api.x.ai";

#[derive(Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct OpenAiMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
    model: String,
    usage: Option<OpenAiUsage>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

pub struct OpenAiClient {
    provider: Provider,
    base_url: String,
    model: String,
    api_key: Option<String>,
    key_env: String,
    http_client: reqwest::Client,
}

impl OpenAiClient {
    pub fn new(base_url: Option<String>, model: String, api_key: Option<String>) -> Self {
        Self {
            provider: Provider::OpenAi,
            base_url: base_url.unwrap_or_else(|| OPENAI_BASE_URL.to_string()),
            model,
            api_key,
            key_env: Provider::OpenAi.default_api_key_env().to_string(),
            http_client: reqwest::Client::new(),
        }
    }

    /// Client for xAI's Grok models.
    pub fn xai(base_url: Option<String>, model: String, api_key: Option<String>) -> Self {
        Self {
            provider: Provider::XAi,
            base_url: base_url.unwrap_or_else(|| XAI_BASE_URL.to_string()),
            model,
            api_key,
            key_env: Provider::XAi.default_api_key_env().to_string(),
            http_client: reqwest::Client::new(),
        }
    }

    /// Name of the variable the key was read from, for error messages.
    pub fn with_key_env(mut self, key_env: impl Into<String>) -> Self {
        self.key_env = key_env.into();
        self
    }

    /// Share a connection pool with other clients.
    pub fn with_http_client(mut self, http_client: reqwest::Client) -> Self {
        self.http_client = http_client;
        self
    }

    fn role_to_string(role: &MessageRole) -> &'static str {
        match role {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }

    fn build_messages(request: &LlmRequest) -> Vec<OpenAiMessage> {
        let mut messages = Vec::new();
        if let Some(ref system) = request.system_prompt {
            messages.push(OpenAiMessage {
                role: "system".to_string(),
                content: system.clone(),
            });
        }
        for msg in &request.messages {
            messages.push(OpenAiMessage {
                role: Self::role_to_string(&msg.role).to_string(),
                content: msg.content.clone(),
            });
        }
        messages
    }

    fn build_request_body(&self, request: &LlmRequest) -> OpenAiRequest {
        OpenAiRequest {
            model: self.model.clone(),
            messages: Self::build_messages(request),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        }
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| missing_key(self.provider, &self.key_env))?;

        let url = format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'));
        let body = self.build_request_body(&request);

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ScriptoriumError::provider_call(self.provider, format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(status_error(self.provider, status, &body_text));
        }

        let oai_response: OpenAiResponse = response.json().await.map_err(|e| {
            ScriptoriumError::provider_call(self.provider, format!("failed to parse response: {e}"))
        })?;

        let choice = oai_response.choices.into_iter().next().ok_or_else(|| {
            ScriptoriumError::provider_call(self.provider, "no choices in response")
        })?;

        Ok(LlmResponse {
            content: choice.message.content,
            model: oai_response.model,
            usage: oai_response.usage.map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
            }),
            finish_reason: choice.finish_reason,
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn provider(&self) -> Provider {
        self.provider
    }
}
