//! Interactive session state.
//!
//! A session holds one editable document, up to `max_agents` agents, an
//! ordered workflow and a bounded debug log. Every change goes through
//! [`apply`], which returns the new state and the effects the caller must
//! carry out (starting a run, reporting a rejection).

use std::collections::VecDeque;

use scriptorium_agents::{AgentDescriptor, PipelineEvent, WorkflowResult, WorkflowStep};
use scriptorium_common::{AgentId, ConfigError, Provider, Role, WorkflowMode, now_millis};
use serde::{Deserialize, Serialize};

use crate::config::SessionConfig;
use crate::routes::provider_and_model;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugEntry {
    pub timestamp_ms: u64,
    pub level: LogLevel,
    pub message: String,
}

const STARTER_INSTRUCTIONS: &str = "Perform high quality scientific research on the given topic \
and provide a comprehensive research proposal with clear methodology, literature review, \
and expected outcomes.";

/// Everything one user is working on.
#[derive(Debug, Clone, Serialize)]
pub struct RunState {
    pub document: String,
    pub agents: Vec<AgentDescriptor>,
    pub steps: Vec<WorkflowStep>,
    pub mode: WorkflowMode,
    pub running: bool,
    pub debug_log: VecDeque<DebugEntry>,
    pub last_result: Option<WorkflowResult>,
    #[serde(skip)]
    next_agent_id: u32,
    #[serde(skip)]
    limits: SessionConfig,
}

impl RunState {
    pub fn new(limits: SessionConfig) -> Self {
        Self {
            document: String::new(),
            agents: Vec::new(),
            steps: Vec::new(),
            mode: WorkflowMode::Sequential,
            running: false,
            debug_log: VecDeque::new(),
            last_result: None,
            next_agent_id: 1,
            limits,
        }
    }

    /// A new session's state: one researcher already placed in the workflow.
    pub fn starter(limits: SessionConfig) -> Self {
        let mut state = Self::new(limits);
        if state.limits.max_agents == 0 {
            return state;
        }
        let id = AgentId(state.next_agent_id);
        state.next_agent_id += 1;
        state.agents.push(AgentDescriptor {
            id,
            name: "Research Expert".to_string(),
            role: Role::Researcher,
            provider: Provider::Anthropic,
            model: "claude-3-7-sonnet".to_string(),
            instructions: STARTER_INSTRUCTIONS.to_string(),
        });
        state.steps.push(WorkflowStep::new(id, ""));
        state
    }

    pub fn agent(&self, id: AgentId) -> Option<&AgentDescriptor> {
        self.agents.iter().find(|a| a.id == id)
    }

    /// Agents not yet used by any workflow step.
    pub fn available_agents(&self) -> impl Iterator<Item = &AgentDescriptor> {
        self.agents
            .iter()
            .filter(|a| !self.steps.iter().any(|s| s.agent_id == a.id))
    }

    fn log(&mut self, level: LogLevel, message: impl Into<String>) {
        self.debug_log.push_back(DebugEntry {
            timestamp_ms: now_millis(),
            level,
            message: message.into(),
        });
        while self.debug_log.len() > self.limits.debug_log_capacity {
            self.debug_log.pop_front();
        }
    }
}

/// Fields of an agent as entered by the user.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentFields {
    pub name: String,
    pub role: String,
    #[serde(default)]
    pub provider: Option<String>,
    pub model: String,
    #[serde(default)]
    pub instructions: String,
}

/// A user action on the session.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UserAction {
    AddAgent(AgentFields),
    EditAgent {
        agent_id: AgentId,
        #[serde(flatten)]
        fields: AgentFields,
    },
    RemoveAgent {
        agent_id: AgentId,
    },
    AddStep {
        agent_id: AgentId,
        #[serde(default)]
        task: String,
    },
    RemoveStep {
        position: usize,
    },
    MoveStep {
        from: usize,
        to: usize,
    },
    ResetWorkflow,
    EditDocument {
        text: String,
    },
    ClearDebugLog,
    SetMode {
        mode: WorkflowMode,
    },
}

/// Anything that changes a session.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Action(UserAction),
    RunRequested,
    RunProgress(PipelineEvent),
    RunFinished(WorkflowResult),
    RunFailed(String),
}

/// Work the caller performs after a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    StartRun {
        agents: Vec<AgentDescriptor>,
        steps: Vec<WorkflowStep>,
        seed: String,
        mode: WorkflowMode,
    },
    Rejected(String),
}

/// Apply `event` to `state`.
pub fn apply(mut state: RunState, event: SessionEvent) -> (RunState, Vec<Effect>) {
    let outcome = match event {
        SessionEvent::Action(action) => {
            if state.running && !matches!(action, UserAction::ClearDebugLog) {
                Err("A workflow is running; wait for it to finish".to_string())
            } else {
                apply_action(&mut state, action)
            }
        }
        SessionEvent::RunRequested => start_run(&mut state),
        SessionEvent::RunProgress(progress) => {
            log_progress(&mut state, progress);
            Ok(Vec::new())
        }
        SessionEvent::RunFinished(result) => {
            state.running = false;
            if result.success {
                state.document = result.result.clone();
                state.log(
                    LogLevel::Info,
                    format!("Workflow completed in {} ms", result.duration_ms),
                );
            } else {
                state.log(
                    LogLevel::Error,
                    "Workflow stopped after a failed step; document left unchanged",
                );
            }
            state.last_result = Some(result);
            Ok(Vec::new())
        }
        SessionEvent::RunFailed(error) => {
            state.running = false;
            state.log(LogLevel::Error, format!("Workflow failed: {error}"));
            Ok(Vec::new())
        }
    };

    match outcome {
        Ok(effects) => (state, effects),
        Err(reason) => {
            state.log(LogLevel::Warning, reason.clone());
            (state, vec![Effect::Rejected(reason)])
        }
    }
}

fn apply_action(state: &mut RunState, action: UserAction) -> Result<Vec<Effect>, String> {
    match action {
        UserAction::AddAgent(fields) => {
            if state.agents.len() >= state.limits.max_agents {
                return Err(format!(
                    "Maximum number of agents ({}) reached",
                    state.limits.max_agents
                ));
            }
            let id = AgentId(state.next_agent_id);
            let descriptor = descriptor_from(id, fields).map_err(|e| e.to_string())?;
            state.next_agent_id += 1;
            state.log(
                LogLevel::Info,
                format!(
                    "Added agent {} '{}' ({}, {}/{})",
                    id, descriptor.name, descriptor.role, descriptor.provider, descriptor.model
                ),
            );
            state.agents.push(descriptor);
        }
        UserAction::EditAgent { agent_id, fields } => {
            let position = state
                .agents
                .iter()
                .position(|a| a.id == agent_id)
                .ok_or_else(|| format!("Agent with ID {agent_id} not found"))?;
            let descriptor = descriptor_from(agent_id, fields).map_err(|e| e.to_string())?;
            state.log(LogLevel::Info, format!("Updated agent {agent_id}"));
            state.agents[position] = descriptor;
        }
        UserAction::RemoveAgent { agent_id } => {
            let before = state.agents.len();
            state.agents.retain(|a| a.id != agent_id);
            if state.agents.len() == before {
                return Err(format!("Agent with ID {agent_id} not found"));
            }
            let steps_before = state.steps.len();
            state.steps.retain(|s| s.agent_id != agent_id);
            state.log(
                LogLevel::Info,
                format!(
                    "Removed agent {agent_id} and {} workflow step(s)",
                    steps_before - state.steps.len()
                ),
            );
        }
        UserAction::AddStep { agent_id, task } => {
            let name = state
                .agent(agent_id)
                .map(|a| a.name.clone())
                .ok_or_else(|| format!("Agent with ID {agent_id} not found"))?;
            if state.steps.iter().any(|s| s.agent_id == agent_id) {
                return Err(format!("Agent '{name}' is already used in the workflow"));
            }
            state.steps.push(WorkflowStep::new(agent_id, task));
            state.log(
                LogLevel::Info,
                format!("Added step {} using '{name}'", state.steps.len()),
            );
        }
        UserAction::RemoveStep { position } => {
            if position >= state.steps.len() {
                return Err(format!("No workflow step at position {position}"));
            }
            state.steps.remove(position);
            state.log(LogLevel::Info, format!("Removed step at position {position}"));
        }
        UserAction::MoveStep { from, to } => {
            let len = state.steps.len();
            if from >= len || to >= len {
                return Err(format!("Cannot move step {from} to {to}: workflow has {len} step(s)"));
            }
            let step = state.steps.remove(from);
            state.steps.insert(to, step);
            state.log(LogLevel::Info, format!("Moved step {from} to {to}"));
        }
        UserAction::ResetWorkflow => {
            state.steps.clear();
            state.log(LogLevel::Info, "Workflow reset");
        }
        UserAction::EditDocument { text } => {
            state.document = text;
        }
        UserAction::ClearDebugLog => {
            state.debug_log.clear();
        }
        UserAction::SetMode { mode } => {
            state.mode = mode;
            state.log(LogLevel::Info, format!("Execution mode set to {mode:?}"));
        }
    }
    Ok(Vec::new())
}

fn descriptor_from(id: AgentId, fields: AgentFields) -> Result<AgentDescriptor, ConfigError> {
    let (provider, model) = provider_and_model(fields.provider.as_deref(), &fields.model)?;
    AgentDescriptor::new(
        id,
        fields.name,
        Role::from(fields.role),
        provider,
        model,
        fields.instructions,
    )
}

fn start_run(state: &mut RunState) -> Result<Vec<Effect>, String> {
    if state.running {
        return Err("A workflow is already running".to_string());
    }
    if state.steps.is_empty() {
        return Err(ConfigError::EmptyWorkflow.to_string());
    }
    if state.document.trim().is_empty() {
        return Err(ConfigError::EmptyTopic.to_string());
    }

    state.running = true;
    state.log(
        LogLevel::Info,
        format!(
            "Starting {:?} workflow with {} step(s)",
            state.mode,
            state.steps.len()
        ),
    );
    Ok(vec![Effect::StartRun {
        agents: state.agents.clone(),
        steps: state.steps.clone(),
        seed: state.document.clone(),
        mode: state.mode,
    }])
}

fn log_progress(state: &mut RunState, event: PipelineEvent) {
    match event {
        PipelineEvent::StepStarted { index, agent_name } => {
            state.log(LogLevel::Info, format!("Step {} started: {agent_name}", index + 1));
        }
        PipelineEvent::StepCompleted {
            index,
            agent_name,
            output_len,
            duration_ms,
        } => state.log(
            LogLevel::Info,
            format!(
                "Step {} completed: {agent_name} ({output_len} chars, {duration_ms} ms)",
                index + 1
            ),
        ),
        PipelineEvent::StepFailed {
            index,
            agent_name,
            error,
        } => state.log(
            LogLevel::Error,
            format!("Step {} failed: {agent_name}: {error}", index + 1),
        ),
        PipelineEvent::ToolFailed {
            index,
            agent_name,
            tool,
            error,
        } => state.log(
            LogLevel::Warning,
            format!(
                "Step {}: {tool} failed for {agent_name}, continuing without it: {error}",
                index + 1
            ),
        ),
        // RunFinished carries the summary.
        PipelineEvent::Finished { .. } => {}
    }
}
