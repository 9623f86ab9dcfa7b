//! Agents and the pipeline that chains them.
//!
//! An agent is a descriptor (name, role, provider, model, extra
//! instructions) bound to a completion client and the shared retrieval
//! tools. A workflow is an ordered list of steps; the chain builder turns
//! it into tasks and the executor runs them.
//!
//! ```text
//!  AgentDescriptor[] ──resolve──▶ AgentRoster
//!                                     │
//!  WorkflowStep[] + seed ──build_chain┘──▶ Task[] ──PipelineExecutor──▶ WorkflowResult
//!
//!   seed ──▶ [0 Researcher] ──output──▶ [1 Reviewer] ──output──▶ result
//! ```

pub mod chain;
pub mod descriptor;
pub mod executor;
pub mod resolver;
pub mod roles;
pub mod tools;

pub use chain::{Dependency, Task, build_chain, build_fanout, compose_instruction, subject_line};
pub use descriptor::{AgentDescriptor, WorkflowStep};
pub use executor::{PipelineEvent, PipelineExecutor, StepRecord, WorkflowResult, preview};
pub use resolver::{
    Agent, AgentOutput, AgentResolver, AgentRoster, ExecutableAgent, ToolFailure,
    compose_system_prompt,
};
pub use roles::{GENERIC_INSTRUCTIONS, instructions_for, step_text_for};
pub use tools::{ScholarSearchTool, SearchTool, ToolSet, ToolsConfig, WebsiteSearchTool};
