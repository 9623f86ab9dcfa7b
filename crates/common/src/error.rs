//! Error types for Scriptorium.

use thiserror::Error;

use crate::types::{AgentId, Provider};

/// Problems with the user-supplied run configuration.
///
/// These are always detected before any remote call is made and are never
/// retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Research topic cannot be empty")]
    EmptyTopic,

    #[error("Workflow cannot be empty")]
    EmptyWorkflow,

    #[error("Agent with ID {agent_id} not found (workflow step {step})")]
    UnknownAgent { step: usize, agent_id: AgentId },

    #[error("Unsupported provider: {0}")]
    UnsupportedProvider(String),

    #[error("Duplicate agent ID {0}")]
    DuplicateAgentId(AgentId),

    #[error("Parallel mode cannot run step {step}: it depends on the output of a previous step")]
    ParallelDependency { step: usize },

    #[error("{0}")]
    Invalid(String),
}

#[derive(Error, Debug)]
pub enum ScriptoriumError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Provider authentication error ({provider}): {message}")]
    ProviderAuth { provider: Provider, message: String },

    #[error("Provider call error ({provider}): {message}")]
    ProviderCall { provider: Provider, message: String },

    #[error("Tool error: {0}")]
    Tool(String),

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ScriptoriumError {
    pub fn provider_auth(provider: Provider, message: impl Into<String>) -> Self {
        Self::ProviderAuth {
            provider,
            message: message.into(),
        }
    }

    pub fn provider_call(provider: Provider, message: impl Into<String>) -> Self {
        Self::ProviderCall {
            provider,
            message: message.into(),
        }
    }

    /// Whether this error was raised while validating configuration.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Whether this error came back from a provider completion call.
    pub fn is_provider(&self) -> bool {
        matches!(self, Self::ProviderAuth { .. } | Self::ProviderCall { .. })
    }
}

pub type Result<T> = std::result::Result<T, ScriptoriumError>;
