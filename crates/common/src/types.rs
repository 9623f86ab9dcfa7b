//! Identifiers and enums shared by every crate.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Identifier of a configured agent, unique within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub u32);

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for AgentId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// LLM vendor an agent is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum Provider {
    OpenAi,
    Anthropic,
    Google,
    XAi,
}

impl Provider {
    pub const ALL: [Provider; 4] = [
        Provider::OpenAi,
        Provider::Anthropic,
        Provider::Google,
        Provider::XAi,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Google => "google",
            Provider::XAi => "xai",
        }
    }

    /// Environment variable the provider's API key is read from by default.
    pub fn default_api_key_env(&self) -> &'static str {
        match self {
            Provider::OpenAi => "OPENAI_API_KEY",
            Provider::Anthropic => "ANTHROPIC_API_KEY",
            Provider::Google => "GOOGLE_GEMINI_API_KEY",
            Provider::XAi => "GROK_API_KEY",
        }
    }

    /// Split a `provider/model` identifier such as `anthropic/claude-3-7-sonnet`.
    ///
    /// Returns `None` when the string has no provider prefix.
    pub fn split_qualified_model(qualified: &str) -> Option<(Result<Provider, ConfigError>, &str)> {
        let (prefix, model) = qualified.split_once('/')?;
        Some((prefix.parse(), model))
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Provider::OpenAi),
            "anthropic" => Ok(Provider::Anthropic),
            "google" | "gemini" | "google_gemini" => Ok(Provider::Google),
            "xai" | "grok" => Ok(Provider::XAi),
            _ => Err(ConfigError::UnsupportedProvider(s.to_string())),
        }
    }
}

impl TryFrom<String> for Provider {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Role an agent plays in the pipeline. Determines its default instructions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    Researcher,
    Reviewer,
    /// Any other role name; receives the generic instructions.
    Custom(String),
}

impl Role {
    pub fn as_str(&self) -> &str {
        match self {
            Role::Researcher => "researcher",
            Role::Reviewer => "reviewer",
            Role::Custom(name) => name,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Role {
    fn from(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "researcher" => Role::Researcher,
            "reviewer" => Role::Reviewer,
            _ => Role::Custom(value.trim().to_string()),
        }
    }
}

impl From<String> for Role {
    fn from(value: String) -> Self {
        Role::from(value.as_str())
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        role.as_str().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_parses_aliases() {
        assert_eq!("openai".parse::<Provider>().unwrap(), Provider::OpenAi);
        assert_eq!("Anthropic".parse::<Provider>().unwrap(), Provider::Anthropic);
        assert_eq!("gemini".parse::<Provider>().unwrap(), Provider::Google);
        assert_eq!("google_gemini".parse::<Provider>().unwrap(), Provider::Google);
        assert_eq!("grok".parse::<Provider>().unwrap(), Provider::XAi);
    }

    #[test]
    fn provider_rejects_unknown() {
        let err = "mistral".parse::<Provider>().unwrap_err();
        assert_eq!(err, ConfigError::UnsupportedProvider("mistral".into()));
    }

    #[test]
    fn provider_serde_uses_short_names() {
        assert_eq!(serde_json::to_string(&Provider::XAi).unwrap(), "\"xai\"");
        let parsed: Provider = serde_json::from_str("\"gemini\"").unwrap();
        assert_eq!(parsed, Provider::Google);
        assert!(serde_json::from_str::<Provider>("\"cohere\"").is_err());
    }

    #[test]
    fn qualified_model_is_split() {
        let (provider, model) = Provider::split_qualified_model("anthropic/claude-3-7-sonnet").unwrap();
        assert_eq!(provider.unwrap(), Provider::Anthropic);
        assert_eq!(model, "claude-3-7-sonnet");
        assert!(Provider::split_qualified_model("gpt-4o").is_none());
    }

    #[test]
    fn role_is_case_insensitive_and_keeps_custom_names() {
        assert_eq!(Role::from("Researcher"), Role::Researcher);
        assert_eq!(Role::from("reviewer"), Role::Reviewer);
        assert_eq!(Role::from("Editor"), Role::Custom("Editor".into()));

        let json = serde_json::to_string(&Role::Reviewer).unwrap();
        assert_eq!(json, "\"reviewer\"");
        let custom: Role = serde_json::from_str("\"Statistician\"").unwrap();
        assert_eq!(custom.as_str(), "Statistician");
    }

    #[test]
    fn agent_id_is_a_bare_integer() {
        assert_eq!(serde_json::to_string(&AgentId(3)).unwrap(), "3");
        let id: AgentId = serde_json::from_str("12").unwrap();
        assert_eq!(id, AgentId(12));
    }
}
