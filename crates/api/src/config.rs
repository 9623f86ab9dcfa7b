//! Server configuration.
//!
//! Loaded from a TOML file; every section is optional. On Unix the file is
//! rejected if it is world-writable, or world-readable while holding an
//! inline API key.

use std::path::Path;

use scriptorium_agents::ToolsConfig;
use scriptorium_common::Provider;
use scriptorium_llm::LlmSettings;
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmSettings,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Allowed CORS origins. Empty allows any origin.
    #[serde(default)]
    pub cors_origins: Vec<String>,
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

fn default_host() -> String {
    "127.0.0.1".into()
}

fn default_port() -> u16 {
    8000
}

fn default_body_limit() -> usize {
    1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: Vec::new(),
            body_limit_bytes: default_body_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Debug log entries kept per session.
    #[serde(default = "default_debug_log_capacity")]
    pub debug_log_capacity: usize,
    #[serde(default = "default_max_agents")]
    pub max_agents: usize,
    /// Sessions held at once. Creation is refused at the cap.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    /// Seconds without a request before a session is dropped.
    #[serde(default = "default_idle_ttl_secs")]
    pub idle_ttl_secs: u64,
}

fn default_debug_log_capacity() -> usize {
    200
}

fn default_max_agents() -> usize {
    5
}

fn default_max_sessions() -> usize {
    256
}

fn default_idle_ttl_secs() -> u64 {
    3600
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            debug_log_capacity: default_debug_log_capacity(),
            max_agents: default_max_agents(),
            max_sessions: default_max_sessions(),
            idle_ttl_secs: default_idle_ttl_secs(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file, checking its permissions first.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();

        #[cfg(unix)]
        validate_config_file_permissions(path)?;

        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;

        let inline: Vec<&str> = Provider::ALL
            .into_iter()
            .filter(|p| config.llm.provider(*p).api_key.is_some())
            .map(|p| p.as_str())
            .collect();
        if !inline.is_empty() {
            warn!(
                providers = ?inline,
                "API key found in config file '{}'. Prefer environment variables \
                 such as OPENAI_API_KEY or ANTHROPIC_API_KEY.",
                path.display()
            );
        }

        Ok(config)
    }

    fn has_inline_key(content: &str) -> bool {
        content
            .lines()
            .map(str::trim_start)
            .any(|line| line.starts_with("api_key") && !line.starts_with("api_key_env"))
    }
}

#[cfg(unix)]
fn validate_config_file_permissions(path: &Path) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = std::fs::metadata(path)
        .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e))?;

    if !metadata.is_file() {
        anyhow::bail!("Config path '{}' is not a regular file.", path.display());
    }

    let permission_bits = metadata.permissions().mode() & 0o777;

    if permission_bits & 0o002 != 0 {
        anyhow::bail!(
            "Config file '{}' is world-writable (mode {:04o}). Fix with: chmod o-w {}",
            path.display(),
            permission_bits,
            path.display()
        );
    }

    if permission_bits & 0o004 != 0 {
        let content = std::fs::read_to_string(path)?;
        if AppConfig::has_inline_key(&content) {
            anyhow::bail!(
                "Config file '{}' contains an API key but is world-readable (mode {:04o}). \
                 Fix with: chmod 600 {}",
                path.display(),
                permission_bits,
                path.display()
            );
        }
    }

    Ok(())
}
