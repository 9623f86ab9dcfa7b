//! Google Gemini `generateContent` client.

use async_trait::async_trait;
use scriptorium_common::{Provider, Result, ScriptoriumError};
use serde::{Deserialize, Serialize};

use crate::client::{
    LlmClient, LlmRequest, LlmResponse, MessageRole, TokenUsage, missing_key, status_error,
};

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct GeminiContent {
    #[serde(default)]
    role: String,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    usage_metadata: Option<GeminiUsage>,
    model_version: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsage {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}

pub struct GoogleClient {
    base_url: String,
    model: String,
    api_key: Option<String>,
    key_env: String,
    http_client: reqwest::Client,
}

impl GoogleClient {
    pub fn new(base_url: Option<String>, model: String, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.unwrap_or_else(|| GEMINI_BASE_URL.to_string()),
            model,
            api_key,
            key_env: Provider::Google.default_api_key_env().to_string(),
            http_client: reqwest::Client::new(),
        }
    }

    /// Name of the variable the key was read from, for error messages.
    pub fn with_key_env(mut self, key_env: impl Into<String>) -> Self {
        self.key_env = key_env.into();
        self
    }

    pub fn with_http_client(mut self, http_client: reqwest::Client) -> Self {
        self.http_client = http_client;
        self
    }

    /// Gemini requires strictly alternating user/model turns, so consecutive
    /// messages with the same role are merged.
    fn build_contents(request: &LlmRequest) -> Vec<GeminiContent> {
        let mut contents: Vec<GeminiContent> = Vec::new();
        for msg in &request.messages {
            let (role, text) = match msg.role {
                MessageRole::Assistant => ("model", msg.content.clone()),
                MessageRole::User => ("user", msg.content.clone()),
                MessageRole::System => ("user", format!("[SYSTEM] {}", msg.content)),
            };

            match contents.last_mut() {
                Some(last) if last.role == role => {
                    if let Some(part) = last.parts.first_mut() {
                        part.text.push('\n');
                        part.text.push_str(&text);
                    }
                }
                _ => contents.push(GeminiContent {
                    role: role.to_string(),
                    parts: vec![GeminiPart { text }],
                }),
            }
        }
        contents
    }

    fn build_request_body(&self, request: &LlmRequest) -> GeminiRequest {
        let generation_config = if request.temperature.is_some() || request.max_tokens.is_some() {
            Some(GenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_tokens,
            })
        } else {
            None
        };

        GeminiRequest {
            system_instruction: request.system_prompt.as_ref().map(|system| GeminiContent {
                role: "user".to_string(),
                parts: vec![GeminiPart {
                    text: system.clone(),
                }],
            }),
            contents: Self::build_contents(request),
            generation_config,
        }
    }
}

#[async_trait]
impl LlmClient for GoogleClient {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
        let provider = Provider::Google;
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| missing_key(provider, &self.key_env))?;

        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        );
        let body = self.build_request_body(&request);

        let response = self
            .http_client
            .post(&url)
            .header("x-goog-api-key", key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ScriptoriumError::provider_call(provider, format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(status_error(provider, status, &body_text));
        }

        let parsed: GeminiResponse = response.json().await.map_err(|e| {
            ScriptoriumError::provider_call(provider, format!("failed to parse response: {e}"))
        })?;

        let candidate = parsed
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| ScriptoriumError::provider_call(provider, "no candidates in response"))?;

        let content = candidate
            .content
            .map(|c| {
                c.parts
                    .into_iter()
                    .map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        Ok(LlmResponse {
            content,
            model: parsed.model_version.unwrap_or_else(|| self.model.clone()),
            usage: parsed.usage_metadata.map(|u| TokenUsage {
                prompt_tokens: u.prompt_token_count,
                completion_tokens: u.candidates_token_count,
            }),
            finish_reason: candidate.finish_reason,
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn provider(&self) -> Provider {
        Provider::Google
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ChatMessage;

    #[test]
    fn system_prompt_goes_to_system_instruction() {
        let client = GoogleClient::new(None, "gemini-2.0-flash".to_string(), Some("k".into()));
        let request = LlmRequest::single_turn("Be rigorous.", "Draft a proposal");

        let json = serde_json::to_value(client.build_request_body(&request)).unwrap();
        assert_eq!(json["systemInstruction"]["parts"][0]["text"], "Be rigorous.");
        let contents = json["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 1);
        assert_eq!(contents[0]["role"], "user");
        assert!(json.get("generationConfig").is_none());
    }

    #[test]
    fn consecutive_same_role_messages_are_merged() {
        let client = GoogleClient::new(None, "gemini-2.0-flash".to_string(), None);
        let request = LlmRequest {
            system_prompt: None,
            messages: vec![
                ChatMessage::user("first"),
                ChatMessage::user("second"),
                ChatMessage {
                    role: MessageRole::Assistant,
                    content: "reply".into(),
                },
            ],
            temperature: Some(0.2),
            max_tokens: Some(2048),
        };

        let json = serde_json::to_value(client.build_request_body(&request)).unwrap();
        let contents = json["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 2);
        assert_eq!(contents[0]["parts"][0]["text"], "first\nsecond");
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 2048);
    }

    #[test]
    fn response_parses_candidate_text() {
        let raw = r##"{
            "candidates": [{"content": {"role": "model", "parts": [{"text": "# Title"}, {"text": "\nBody"}]}, "finishReason": "STOP"}],
            "usageMetadata": {"promptTokenCount": 12, "candidatesTokenCount": 30},
            "modelVersion": "gemini-2.0-flash-001"
        }"##;
        let parsed: GeminiResponse = serde_json::from_str(raw).unwrap();
        let candidate = parsed.candidates.into_iter().next().unwrap();
        let text: String = candidate
            .content
            .unwrap()
            .parts
            .into_iter()
            .map(|p| p.text)
            .collect();
        assert_eq!(text, "# Title\nBody");
        assert_eq!(candidate.finish_reason.as_deref(), Some("STOP"));
        assert_eq!(parsed.usage_metadata.unwrap().candidates_token_count, 30);
    }
}
