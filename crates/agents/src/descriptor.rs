//! User-authored configuration records: agents and workflow steps.

use scriptorium_common::{AgentId, ConfigError, Provider, Role};
use serde::{Deserialize, Serialize};

/// A configured agent. Validated on construction and immutable during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "AgentDescriptorFields")]
pub struct AgentDescriptor {
    pub id: AgentId,
    pub name: String,
    pub role: Role,
    pub provider: Provider,
    pub model: String,
    pub instructions: String,
}

/// Unvalidated wire shape of [`AgentDescriptor`].
#[derive(Deserialize)]
struct AgentDescriptorFields {
    id: AgentId,
    name: String,
    role: Role,
    provider: Provider,
    model: String,
    #[serde(default)]
    instructions: String,
}

impl TryFrom<AgentDescriptorFields> for AgentDescriptor {
    type Error = ConfigError;

    fn try_from(f: AgentDescriptorFields) -> Result<Self, Self::Error> {
        AgentDescriptor::new(f.id, f.name, f.role, f.provider, f.model, f.instructions)
    }
}

impl AgentDescriptor {
    pub fn new(
        id: impl Into<AgentId>,
        name: impl Into<String>,
        role: Role,
        provider: Provider,
        model: impl Into<String>,
        instructions: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let id = id.into();
        let name = name.into().trim().to_string();
        let model = model.into().trim().to_string();

        if name.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "agent {id} must have a non-empty name"
            )));
        }
        if model.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "agent {id} ({name}) must have a non-empty model"
            )));
        }

        Ok(Self {
            id,
            name,
            role,
            provider,
            model,
            instructions: instructions.into(),
        })
    }
}

/// One position in the workflow: which agent runs and what it is asked to do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub agent_id: AgentId,
    #[serde(default)]
    pub task: String,
}

impl WorkflowStep {
    pub fn new(agent_id: impl Into<AgentId>, task: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            task: task.into(),
        }
    }
}
