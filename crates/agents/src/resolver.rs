//! Turns validated [`AgentDescriptor`]s into agents that can run a task.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use scriptorium_common::{AgentId, ConfigError, Result, Role};
use scriptorium_llm::{ClientFactory, LlmClient, LlmRequest};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::descriptor::AgentDescriptor;
use crate::roles::instructions_for;
use crate::tools::ToolSet;

/// A retrieval tool that failed while an agent gathered context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolFailure {
    pub tool: String,
    pub error: String,
}

/// Text produced by an agent, with the tools it had to run without.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentOutput {
    pub text: String,
    pub tool_failures: Vec<ToolFailure>,
}

impl From<String> for AgentOutput {
    fn from(text: String) -> Self {
        Self {
            text,
            tool_failures: Vec::new(),
        }
    }
}

/// Something that can carry out one pipeline task.
#[async_trait]
pub trait Agent: Send + Sync {
    fn descriptor(&self) -> &AgentDescriptor;

    fn system_prompt(&self) -> &str;

    /// Run `instruction` against `context`, using `query` for retrieval.
    async fn execute(&self, instruction: &str, context: &str, query: &str) -> Result<AgentOutput>;
}

/// Agents keyed by id, shared between the tasks that use them.
pub type AgentRoster = HashMap<AgentId, Arc<dyn Agent>>;

/// Role instructions, then the descriptor's own instructions when present.
pub fn compose_system_prompt(role: &Role, instructions: &str) -> String {
    let base = instructions_for(role);
    let extra = instructions.trim();
    if extra.is_empty() {
        base.to_string()
    } else {
        format!("{base}\nAdditional instructions: {extra}")
    }
}

/// Build the user prompt: instruction, input document, then retrieved context.
fn compose_user_prompt(instruction: &str, context: &str, retrieved: &[(String, String)]) -> String {
    let mut prompt = format!("{instruction}\n\nINPUT:\n{context}");
    if !retrieved.is_empty() {
        prompt.push_str("\n\nRETRIEVED CONTEXT:");
        for (tool, text) in retrieved {
            prompt.push_str(&format!("\n\n### {tool}\n{text}"));
        }
    }
    prompt
}

/// An agent bound to a completion client and the shared retrieval tools.
pub struct ExecutableAgent {
    descriptor: AgentDescriptor,
    system_prompt: String,
    client: Arc<dyn LlmClient>,
    tools: ToolSet,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

impl ExecutableAgent {
    pub fn new(descriptor: AgentDescriptor, client: Arc<dyn LlmClient>, tools: ToolSet) -> Self {
        let system_prompt = compose_system_prompt(&descriptor.role, &descriptor.instructions);
        Self {
            descriptor,
            system_prompt,
            client,
            tools,
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_sampling(mut self, temperature: Option<f32>, max_tokens: Option<u32>) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    pub fn tools(&self) -> &ToolSet {
        &self.tools
    }

    async fn retrieve(&self, query: &str) -> (Vec<(String, String)>, Vec<ToolFailure>) {
        let mut retrieved = Vec::new();
        let mut failures = Vec::new();
        if query.trim().is_empty() {
            return (retrieved, failures);
        }

        for tool in self.tools.iter() {
            match tool.search(query).await {
                Ok(text) => {
                    debug!(
                        agent = %self.descriptor.name,
                        tool = tool.name(),
                        len = text.len(),
                        "Retrieved context"
                    );
                    retrieved.push((tool.name().to_string(), text));
                }
                Err(e) => {
                    warn!(
                        agent = %self.descriptor.name,
                        tool = tool.name(),
                        error = %e,
                        "Retrieval tool failed, continuing without it"
                    );
                    failures.push(ToolFailure {
                        tool: tool.name().to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }
        (retrieved, failures)
    }
}

#[async_trait]
impl Agent for ExecutableAgent {
    fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    async fn execute(&self, instruction: &str, context: &str, query: &str) -> Result<AgentOutput> {
        let (retrieved, tool_failures) = self.retrieve(query).await;
        let request = LlmRequest::single_turn(
            self.system_prompt.clone(),
            compose_user_prompt(instruction, context, &retrieved),
        )
        .with_sampling(self.temperature, self.max_tokens);

        info!(
            agent = %self.descriptor.name,
            provider = %self.client.provider(),
            model = self.client.model_name(),
            "Requesting completion"
        );

        let response = self.client.complete(request).await?;
        debug!(
            agent = %self.descriptor.name,
            output_len = response.content.len(),
            "Completion received"
        );
        Ok(AgentOutput {
            text: response.content,
            tool_failures,
        })
    }
}

/// Binds descriptors to completion clients.
pub struct AgentResolver {
    factory: Arc<dyn ClientFactory>,
    tools: ToolSet,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

impl AgentResolver {
    pub fn new(factory: Arc<dyn ClientFactory>, tools: ToolSet) -> Self {
        Self {
            factory,
            tools,
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_sampling(mut self, temperature: Option<f32>, max_tokens: Option<u32>) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    /// Bind one descriptor. Credentials are not checked here; a missing
    /// key fails the first completion instead.
    pub fn resolve(&self, descriptor: &AgentDescriptor) -> Result<ExecutableAgent> {
        let client = self.factory.build(descriptor.provider, &descriptor.model)?;
        debug!(
            agent_id = %descriptor.id,
            agent = %descriptor.name,
            role = %descriptor.role,
            provider = %descriptor.provider,
            model = %descriptor.model,
            "Resolved agent"
        );
        Ok(
            ExecutableAgent::new(descriptor.clone(), client, self.tools.clone())
                .with_sampling(self.temperature, self.max_tokens),
        )
    }

    /// Resolve every descriptor once. Ids must be unique.
    pub fn resolve_roster(&self, descriptors: &[AgentDescriptor]) -> Result<AgentRoster> {
        let mut roster = AgentRoster::with_capacity(descriptors.len());
        for descriptor in descriptors {
            if roster.contains_key(&descriptor.id) {
                return Err(ConfigError::DuplicateAgentId(descriptor.id).into());
            }
            let agent: Arc<dyn Agent> = Arc::new(self.resolve(descriptor)?);
            roster.insert(descriptor.id, agent);
        }
        Ok(roster)
    }
}
