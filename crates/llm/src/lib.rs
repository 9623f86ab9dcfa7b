//! Completion clients for the providers an agent can be bound to.
//!
//! Every provider is reached through the same [`LlmClient`] trait: one
//! system prompt, one user prompt, one text answer. OpenAI and xAI share the
//! chat-completions wire format; Anthropic and Google have their own.

pub mod anthropic;
pub mod client;
pub mod config;
pub mod google;
pub mod openai;

pub use anthropic::AnthropicClient;
pub use client::{ChatMessage, LlmClient, LlmRequest, LlmResponse, MessageRole, TokenUsage};
pub use config::{
    ClientFactory, HttpClientFactory, LlmSettings, ProviderSettings, SemaphoredClient,
    build_llm_client,
};
pub use google::GoogleClient;
pub use openai::OpenAiClient;
