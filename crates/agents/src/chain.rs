//! Task chain construction.
//!
//! A chain is an ordered list of [`Task`]s. The first task reads the seed
//! document; every later task reads the full output of the one before it.
//! Dependencies are recorded as indices and resolved by the executor, so a
//! task is never mutated after it is built.

use std::sync::Arc;

use scriptorium_common::ConfigError;

use crate::descriptor::WorkflowStep;
use crate::resolver::{Agent, AgentRoster};
use crate::roles::{instructions_for, step_text_for};

/// Longest retrieval query derived from the seed document.
const MAX_QUERY_CHARS: usize = 256;

const FORMATTING_CONSTRAINTS: &str = "\
- Maintain the markdown formatting of the document.
- Do not use abbreviations, summaries or placeholders such as \"same as above\" or \"unchanged\"; write every section out in full.
- Produce the full document, not a diff or a list of changes.
- Do not wrap the document in a ```markdown code fence.";

/// Where a task takes its input document from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dependency {
    /// The seed document, verbatim.
    Seed(String),
    /// The complete output of the task at this index.
    Previous(usize),
}

/// One unit of work: an agent, its composed instruction and its input.
#[derive(Clone)]
pub struct Task {
    pub index: usize,
    pub agent: Arc<dyn Agent>,
    pub instruction: String,
    pub dependency: Dependency,
    pub search_query: String,
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let d = self.agent.descriptor();
        f.debug_struct("Task")
            .field("index", &self.index)
            .field("agent_id", &d.id)
            .field("agent_name", &d.name)
            .field("dependency", &self.dependency)
            .field("search_query", &self.search_query)
            .finish_non_exhaustive()
    }
}

/// Build a strictly linear chain: step 0 reads `seed`, step i reads step i-1.
pub fn build_chain(
    steps: &[WorkflowStep],
    agents: &AgentRoster,
    seed: &str,
) -> Result<Vec<Task>, ConfigError> {
    build_tasks(steps, agents, seed, |index| {
        if index == 0 {
            Dependency::Seed(seed.to_string())
        } else {
            Dependency::Previous(index - 1)
        }
    })
}

/// Build independent tasks that all read `seed`. Used for parallel runs.
pub fn build_fanout(
    steps: &[WorkflowStep],
    agents: &AgentRoster,
    seed: &str,
) -> Result<Vec<Task>, ConfigError> {
    build_tasks(steps, agents, seed, |_| Dependency::Seed(seed.to_string()))
}

fn build_tasks(
    steps: &[WorkflowStep],
    agents: &AgentRoster,
    seed: &str,
    dependency_for: impl Fn(usize) -> Dependency,
) -> Result<Vec<Task>, ConfigError> {
    if steps.is_empty() {
        return Err(ConfigError::EmptyWorkflow);
    }

    let search_query = subject_line(seed);

    steps
        .iter()
        .enumerate()
        .map(|(index, step)| {
            let agent = agents
                .get(&step.agent_id)
                .cloned()
                .ok_or(ConfigError::UnknownAgent {
                    step: index,
                    agent_id: step.agent_id,
                })?;

            let role = &agent.descriptor().role;
            let step_text = if step.task.trim().is_empty() {
                step_text_for(role, &search_query)
            } else {
                step.task.trim().to_string()
            };

            Ok(Task {
                index,
                instruction: compose_instruction(&step_text, instructions_for(role)),
                dependency: dependency_for(index),
                search_query: search_query.clone(),
                agent,
            })
        })
        .collect()
}

/// Step text, then role instructions, then the fixed formatting constraints.
pub fn compose_instruction(step_text: &str, role_instructions: &str) -> String {
    format!(
        "TASK:\n{}\n\nROLE INSTRUCTIONS:\n{}\n\nADDITIONAL INSTRUCTIONS:\n{}",
        step_text.trim(),
        role_instructions.trim(),
        FORMATTING_CONSTRAINTS
    )
}

/// First non-empty line of `seed` with markdown heading markers removed.
pub fn subject_line(seed: &str) -> String {
    seed.lines()
        .map(|line| line.trim().trim_start_matches('#').trim())
        .find(|line| !line.is_empty())
        .map(|line| line.chars().take(MAX_QUERY_CHARS).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::AgentDescriptor;
    use crate::resolver::AgentOutput;
    use async_trait::async_trait;
    use scriptorium_common::{AgentId, Provider, Result, Role};

    struct StubAgent(AgentDescriptor);

    #[async_trait]
    impl Agent for StubAgent {
        fn descriptor(&self) -> &AgentDescriptor {
            &self.0
        }
        fn system_prompt(&self) -> &str {
            "stub"
        }
        async fn execute(
            &self,
            _instruction: &str,
            _context: &str,
            _query: &str,
        ) -> Result<AgentOutput> {
            Ok(AgentOutput::default())
        }
    }

    fn roster() -> AgentRoster {
        let mut roster = AgentRoster::new();
        for (id, role, provider) in [
            (1, Role::Researcher, Provider::OpenAi),
            (2, Role::Reviewer, Provider::Anthropic),
        ] {
            let d = AgentDescriptor::new(id, format!("Agent {id}"), role, provider, "m", "").unwrap();
            roster.insert(AgentId(id), Arc::new(StubAgent(d)) as Arc<dyn Agent>);
        }
        roster
    }

    #[test]
    fn chain_links_each_step_to_its_predecessor() {
        let steps = [
            WorkflowStep::new(1, "Draft it."),
            WorkflowStep::new(2, "Review it."),
            WorkflowStep::new(2, "Review again."),
        ];
        let tasks = build_chain(&steps, &roster(), "Topic: X").unwrap();

        assert_eq!(tasks.len(), 3);
        assert_eq!(tasks[0].dependency, Dependency::Seed("Topic: X".into()));
        assert_eq!(tasks[1].dependency, Dependency::Previous(0));
        assert_eq!(tasks[2].dependency, Dependency::Previous(1));
        assert!(Arc::ptr_eq(&tasks[1].agent, &tasks[2].agent));
    }

    #[test]
    fn fanout_reads_seed_everywhere() {
        let steps = [WorkflowStep::new(1, ""), WorkflowStep::new(2, "")];
        let tasks = build_fanout(&steps, &roster(), "Topic: X").unwrap();
        assert!(
            tasks
                .iter()
                .all(|t| t.dependency == Dependency::Seed("Topic: X".into()))
        );
    }

    #[test]
    fn instruction_sections_are_ordered() {
        let steps = [WorkflowStep::new(2, "Critique the proposal.")];
        let tasks = build_chain(&steps, &roster(), "seed").unwrap();
        let text = &tasks[0].instruction;

        let task_at = text.find("TASK:\nCritique the proposal.").unwrap();
        let role_at = text.find("ROLE INSTRUCTIONS:").unwrap();
        let extra_at = text.find("ADDITIONAL INSTRUCTIONS:").unwrap();
        assert!(task_at < role_at && role_at < extra_at);
        assert!(text.contains(instructions_for(&Role::Reviewer).trim()));
        assert!(text.contains("not a diff"));
    }

    #[test]
    fn blank_step_text_uses_role_default() {
        let steps = [WorkflowStep::new(1, "  ")];
        let tasks = build_chain(&steps, &roster(), "# Quantum sensing\n\nnotes").unwrap();
        assert!(tasks[0].instruction.contains("\"Quantum sensing\""));
        assert_eq!(tasks[0].search_query, "Quantum sensing");
    }

    #[test]
    fn unknown_agent_names_the_step() {
        let steps = [
            WorkflowStep::new(1, "a"),
            WorkflowStep::new(2, "b"),
            WorkflowStep::new(9, "c"),
        ];
        let err = build_chain(&steps, &roster(), "seed").unwrap_err();
        assert_eq!(
            err,
            ConfigError::UnknownAgent {
                step: 2,
                agent_id: AgentId(9)
            }
        );
    }

    #[test]
    fn empty_steps_are_rejected() {
        assert_eq!(
            build_chain(&[], &roster(), "seed").unwrap_err(),
            ConfigError::EmptyWorkflow
        );
        assert_eq!(
            build_fanout(&[], &roster(), "seed").unwrap_err(),
            ConfigError::EmptyWorkflow
        );
    }

    #[test]
    fn identical_inputs_give_identical_instructions() {
        let steps = [WorkflowStep::new(1, "Draft."), WorkflowStep::new(2, "")];
        let agents = roster();
        let a = build_chain(&steps, &agents, "Topic: X").unwrap();
        let b = build_chain(&steps, &agents, "Topic: X").unwrap();
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.instruction, y.instruction);
            assert_eq!(x.dependency, y.dependency);
        }
    }

    #[test]
    fn subject_line_skips_blank_lines_and_truncates() {
        assert_eq!(subject_line("\n\n## Topic\nbody"), "Topic");
        assert_eq!(subject_line(""), "");
        assert_eq!(subject_line(&"x".repeat(1000)).len(), MAX_QUERY_CHARS);
    }
}
