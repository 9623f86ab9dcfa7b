//! Retrieval tools attached to every agent.
//!
//! Tools return plain text that is appended to the agent's prompt as
//! context. Both built-in tools talk to a Serper-compatible search API.

use std::sync::Arc;

use async_trait::async_trait;
use scriptorium_common::{Result, ScriptoriumError};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DEFAULT_SERPER_URL: &str = "https://google.serper.dev";

#[async_trait]
pub trait SearchTool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    async fn search(&self, query: &str) -> Result<String>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_serper_url")]
    pub serper_url: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Maximum literature snippets returned by the scholarly search.
    #[serde(default = "default_scholar_results")]
    pub scholar_results: u32,
    #[serde(default = "default_web_results")]
    pub web_results: u32,
}

fn default_enabled() -> bool {
    true
}

fn default_serper_url() -> String {
    DEFAULT_SERPER_URL.into()
}

fn default_api_key_env() -> String {
    "SERPER_API_KEY".into()
}

fn default_scholar_results() -> u32 {
    2
}

fn default_web_results() -> u32 {
    5
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            serper_url: default_serper_url(),
            api_key_env: default_api_key_env(),
            scholar_results: default_scholar_results(),
            web_results: default_web_results(),
        }
    }
}

#[derive(Serialize)]
struct SerperQuery<'a> {
    q: &'a str,
    num: u32,
}

#[derive(Deserialize)]
struct SerperResponse {
    #[serde(default)]
    organic: Vec<SerperHit>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SerperHit {
    #[serde(default)]
    title: String,
    #[serde(default)]
    link: String,
    #[serde(default)]
    snippet: String,
    publication_info: Option<String>,
    year: Option<u32>,
}

/// Shared HTTP plumbing for the Serper endpoints.
struct SerperEndpoint {
    url: String,
    api_key: Option<String>,
    api_key_env: String,
    num: u32,
    http_client: reqwest::Client,
}

impl SerperEndpoint {
    fn new(config: &ToolsConfig, path: &str, num: u32, http_client: reqwest::Client) -> Self {
        Self {
            url: format!("{}/{}", config.serper_url.trim_end_matches('/'), path),
            api_key: std::env::var(&config.api_key_env)
                .ok()
                .filter(|k| !k.is_empty()),
            api_key_env: config.api_key_env.clone(),
            num,
            http_client,
        }
    }

    async fn query(&self, tool: &str, query: &str) -> Result<Vec<SerperHit>> {
        let key = self.api_key.as_deref().ok_or_else(|| {
            ScriptoriumError::Tool(format!("{tool}: no API key configured (set {})", self.api_key_env))
        })?;

        let response = self
            .http_client
            .post(&self.url)
            .header("X-API-KEY", key)
            .json(&SerperQuery {
                q: query,
                num: self.num,
            })
            .send()
            .await
            .map_err(|e| ScriptoriumError::Tool(format!("{tool}: request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ScriptoriumError::Tool(format!(
                "{tool}: API error {status}: {body}"
            )));
        }

        let parsed: SerperResponse = response
            .json()
            .await
            .map_err(|e| ScriptoriumError::Tool(format!("{tool}: failed to parse response: {e}")))?;

        let mut hits = parsed.organic;
        hits.truncate(self.num as usize);
        debug!(tool, hits = hits.len(), "Search completed");
        Ok(hits)
    }
}

fn render_hits(hits: &[SerperHit]) -> String {
    if hits.is_empty() {
        return "No results.".to_string();
    }

    hits.iter()
        .map(|hit| {
            let mut line = format!("- {}", hit.title);
            if let Some(year) = hit.year {
                line.push_str(&format!(" ({year})"));
            }
            if let Some(ref info) = hit.publication_info {
                line.push_str(&format!(", {info}"));
            }
            if !hit.link.is_empty() {
                line.push_str(&format!(" <{}>", hit.link));
            }
            if !hit.snippet.is_empty() {
                line.push_str(&format!("\n  {}", hit.snippet));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Scholarly literature search.
pub struct ScholarSearchTool {
    endpoint: SerperEndpoint,
}

impl ScholarSearchTool {
    pub fn new(config: &ToolsConfig, http_client: reqwest::Client) -> Self {
        Self {
            endpoint: SerperEndpoint::new(config, "scholar", config.scholar_results, http_client),
        }
    }
}

#[async_trait]
impl SearchTool for ScholarSearchTool {
    fn name(&self) -> &str {
        "scholar_search"
    }

    fn description(&self) -> &str {
        "Search scholarly literature for papers related to a query"
    }

    async fn search(&self, query: &str) -> Result<String> {
        let hits = self.endpoint.query(self.name(), query).await?;
        Ok(render_hits(&hits))
    }
}

/// Generic web search.
pub struct WebsiteSearchTool {
    endpoint: SerperEndpoint,
}

impl WebsiteSearchTool {
    pub fn new(config: &ToolsConfig, http_client: reqwest::Client) -> Self {
        Self {
            endpoint: SerperEndpoint::new(config, "search", config.web_results, http_client),
        }
    }
}

#[async_trait]
impl SearchTool for WebsiteSearchTool {
    fn name(&self) -> &str {
        "website_search"
    }

    fn description(&self) -> &str {
        "Search the web for pages related to a query"
    }

    async fn search(&self, query: &str) -> Result<String> {
        let hits = self.endpoint.query(self.name(), query).await?;
        Ok(render_hits(&hits))
    }
}

/// The tools every resolved agent receives.
#[derive(Clone, Default)]
pub struct ToolSet {
    tools: Vec<Arc<dyn SearchTool>>,
}

impl ToolSet {
    /// No tools. Agents then complete without retrieved context.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The fixed scholarly + website pair, or nothing when disabled.
    pub fn from_config(config: &ToolsConfig) -> Self {
        if !config.enabled {
            return Self::empty();
        }
        let http_client = reqwest::Client::new();
        Self::empty()
            .with_tool(Arc::new(ScholarSearchTool::new(config, http_client.clone())))
            .with_tool(Arc::new(WebsiteSearchTool::new(config, http_client)))
    }

    pub fn with_tool(mut self, tool: Arc<dyn SearchTool>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn SearchTool>> {
        self.tools.iter()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolSet").field("tools", &self.names()).finish()
    }
}
