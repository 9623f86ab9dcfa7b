//! Pipeline execution.
//!
//! Runs a task list built by [`crate::chain`] in one of two modes:
//! - Sequential: strict order, each task reads its predecessor's full output,
//!   the first failure stops the run
//! - Parallel: independent tasks run concurrently and are reduced in index order
//!
//! # Example
//!
//! ```ignore
//! let tasks = build_chain(&steps, &roster, "Topic: X")?;
//! let result = PipelineExecutor::new().run(&tasks, WorkflowMode::Sequential).await?;
//! ```

use std::time::Instant;

use scriptorium_common::{
    AgentId, ConfigError, Provider, Result, Role, ScriptoriumError, TaskStatus, WorkflowMode,
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info};

use crate::chain::{Dependency, Task};
use crate::resolver::{AgentOutput, ToolFailure};

/// Characters of output kept in a step preview.
pub const PREVIEW_CHARS: usize = 100;

/// Outcome of a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowResult {
    /// Final document. Empty when a sequential run failed.
    pub result: String,
    /// One record per attempted task, in index order.
    pub steps: Vec<StepRecord>,
    pub success: bool,
    pub mode: WorkflowMode,
    pub duration_ms: u64,
}

impl WorkflowResult {
    /// The first failed step, if any.
    pub fn failed_step(&self) -> Option<&StepRecord> {
        self.steps.iter().find(|s| s.status == TaskStatus::Failed)
    }
}

/// What happened to a single task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub index: usize,
    pub agent_id: AgentId,
    pub agent_name: String,
    pub role: Role,
    pub provider: Provider,
    pub model: String,
    pub status: TaskStatus,
    /// Full output, present once the task completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    pub output_preview: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Retrieval tools that failed; the step ran without their context.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_failures: Vec<ToolFailure>,
    pub duration_ms: u64,
}

impl StepRecord {
    fn pending(task: &Task) -> Self {
        let d = task.agent.descriptor();
        Self {
            index: task.index,
            agent_id: d.id,
            agent_name: d.name.clone(),
            role: d.role.clone(),
            provider: d.provider,
            model: d.model.clone(),
            status: TaskStatus::Pending,
            output: None,
            output_preview: String::new(),
            error: None,
            tool_failures: Vec::new(),
            duration_ms: 0,
        }
    }

    fn advance(&mut self, next: TaskStatus) {
        debug_assert!(
            self.status.can_transition_to(next),
            "illegal task transition {:?} -> {:?}",
            self.status,
            next
        );
        self.status = next;
    }

    fn complete(&mut self, output: String, started: Instant) {
        self.advance(TaskStatus::Completed);
        self.output_preview = preview(&output);
        self.output = Some(output);
        self.duration_ms = started.elapsed().as_millis() as u64;
    }

    fn fail(&mut self, error: &ScriptoriumError, started: Instant) {
        self.advance(TaskStatus::Failed);
        self.error = Some(error.to_string());
        self.duration_ms = started.elapsed().as_millis() as u64;
    }
}

/// First [`PREVIEW_CHARS`] characters, with `...` appended when cut.
pub fn preview(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

/// Progress notifications emitted while a pipeline runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    StepStarted {
        index: usize,
        agent_name: String,
    },
    StepCompleted {
        index: usize,
        agent_name: String,
        output_len: usize,
        duration_ms: u64,
    },
    StepFailed {
        index: usize,
        agent_name: String,
        error: String,
    },
    ToolFailed {
        index: usize,
        agent_name: String,
        tool: String,
        error: String,
    },
    Finished {
        success: bool,
        duration_ms: u64,
    },
}

/// Executes task lists. Holds no state between runs.
#[derive(Debug, Clone, Default)]
pub struct PipelineExecutor {
    events: Option<UnboundedSender<PipelineEvent>>,
}

impl PipelineExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report progress on `events`. A closed receiver is ignored.
    pub fn with_events(events: UnboundedSender<PipelineEvent>) -> Self {
        Self {
            events: Some(events),
        }
    }

    /// Run `tasks` in `mode`.
    ///
    /// Structural problems (empty list, malformed dependencies, parallel mode
    /// over a linked chain) are returned as errors before any task starts.
    /// Task failures are reported in the returned [`WorkflowResult`].
    pub async fn run(&self, tasks: &[Task], mode: WorkflowMode) -> Result<WorkflowResult> {
        validate(tasks, mode)?;

        info!(task_count = tasks.len(), ?mode, "Starting pipeline");

        let start = Instant::now();
        let mut result = match mode {
            WorkflowMode::Sequential => self.run_sequential(tasks).await,
            WorkflowMode::Parallel => self.run_parallel(tasks).await,
        };
        result.duration_ms = start.elapsed().as_millis() as u64;

        info!(
            steps = result.steps.len(),
            success = result.success,
            duration_ms = result.duration_ms,
            "Pipeline completed"
        );
        emit(
            &self.events,
            PipelineEvent::Finished {
                success: result.success,
                duration_ms: result.duration_ms,
            },
        );

        Ok(result)
    }

    async fn run_sequential(&self, tasks: &[Task]) -> WorkflowResult {
        let mut steps = Vec::with_capacity(tasks.len());
        let mut outputs: Vec<String> = Vec::with_capacity(tasks.len());

        for task in tasks {
            let context = match &task.dependency {
                Dependency::Seed(seed) => seed.as_str(),
                Dependency::Previous(i) => match outputs.get(*i) {
                    Some(output) => output.as_str(),
                    None => {
                        // validate() guarantees i < index and every earlier task succeeded
                        let err = ScriptoriumError::Runtime(format!(
                            "step {} depends on missing output of step {i}",
                            task.index
                        ));
                        let mut record = StepRecord::pending(task);
                        record.advance(TaskStatus::Running);
                        record.fail(&err, Instant::now());
                        steps.push(record);
                        return finished(String::new(), steps, false, WorkflowMode::Sequential);
                    }
                },
            };

            let (record, output) = execute_task(task, context, &self.events).await;
            steps.push(record);
            match output {
                Some(text) => outputs.push(text),
                None => return finished(String::new(), steps, false, WorkflowMode::Sequential),
            }
        }

        let result = outputs.pop().unwrap_or_default();
        finished(result, steps, true, WorkflowMode::Sequential)
    }

    async fn run_parallel(&self, tasks: &[Task]) -> WorkflowResult {
        let mut handles = Vec::with_capacity(tasks.len());

        for task in tasks {
            let pending = StepRecord::pending(task);
            let owned = task.clone();
            let events = self.events.clone();
            let handle = tokio::spawn(async move {
                let seed = match &owned.dependency {
                    Dependency::Seed(seed) => seed.clone(),
                    Dependency::Previous(_) => String::new(),
                };
                execute_task(&owned, &seed, &events).await
            });
            handles.push((task.index, pending, handle));
        }

        // Completion order is arbitrary; every outcome carries its task index.
        let mut outcomes: Vec<(usize, StepRecord, Option<String>)> = Vec::with_capacity(handles.len());
        for (index, mut pending, handle) in handles {
            match handle.await {
                Ok((record, output)) => outcomes.push((index, record, output)),
                Err(e) => {
                    error!(step = index, error = %e, "Task join error");
                    let err = ScriptoriumError::Runtime(format!("task join error: {e}"));
                    pending.advance(TaskStatus::Running);
                    pending.fail(&err, Instant::now());
                    emit(
                        &self.events,
                        PipelineEvent::StepFailed {
                            index,
                            agent_name: pending.agent_name.clone(),
                            error: err.to_string(),
                        },
                    );
                    outcomes.push((index, pending, None));
                }
            }
        }
        outcomes.sort_by_key(|(index, _, _)| *index);

        let success = outcomes.iter().all(|(_, _, output)| output.is_some());
        let combined = outcomes
            .iter()
            .filter_map(|(_, record, output)| {
                output
                    .as_ref()
                    .map(|text| format!("## {}\n\n{}", record.agent_name, text))
            })
            .collect::<Vec<_>>()
            .join("\n\n");
        let steps = outcomes.into_iter().map(|(_, record, _)| record).collect();

        finished(combined, steps, success, WorkflowMode::Parallel)
    }
}

fn finished(
    result: String,
    steps: Vec<StepRecord>,
    success: bool,
    mode: WorkflowMode,
) -> WorkflowResult {
    WorkflowResult {
        result,
        steps,
        success,
        mode,
        duration_ms: 0,
    }
}

fn emit(events: &Option<UnboundedSender<PipelineEvent>>, event: PipelineEvent) {
    if let Some(tx) = events {
        let _ = tx.send(event);
    }
}

/// Check the task list is runnable in `mode`.
fn validate(tasks: &[Task], mode: WorkflowMode) -> Result<()> {
    if tasks.is_empty() {
        return Err(ConfigError::EmptyWorkflow.into());
    }

    for (position, task) in tasks.iter().enumerate() {
        if task.index != position {
            return Err(ScriptoriumError::Runtime(format!(
                "malformed chain: task at position {position} has index {}",
                task.index
            )));
        }
        if let Dependency::Previous(i) = task.dependency {
            if mode == WorkflowMode::Parallel {
                return Err(ConfigError::ParallelDependency { step: position }.into());
            }
            if i >= position {
                return Err(ScriptoriumError::Runtime(format!(
                    "malformed chain: step {position} depends on later step {i}"
                )));
            }
        }
    }
    Ok(())
}

/// Run one task, returning its record and, on success, its full output.
async fn execute_task(
    task: &Task,
    context: &str,
    events: &Option<UnboundedSender<PipelineEvent>>,
) -> (StepRecord, Option<String>) {
    let mut record = StepRecord::pending(task);
    let started = Instant::now();

    record.advance(TaskStatus::Running);
    info!(
        step = task.index,
        agent = %record.agent_name,
        provider = %record.provider,
        model = %record.model,
        "Executing pipeline step"
    );
    emit(
        events,
        PipelineEvent::StepStarted {
            index: task.index,
            agent_name: record.agent_name.clone(),
        },
    );

    match task
        .agent
        .execute(&task.instruction, context, &task.search_query)
        .await
    {
        Ok(AgentOutput {
            text: output,
            tool_failures,
        }) => {
            for failure in &tool_failures {
                emit(
                    events,
                    PipelineEvent::ToolFailed {
                        index: task.index,
                        agent_name: record.agent_name.clone(),
                        tool: failure.tool.clone(),
                        error: failure.error.clone(),
                    },
                );
            }
            record.tool_failures = tool_failures;
            debug!(
                step = task.index,
                agent = %record.agent_name,
                output_len = output.len(),
                "Step completed successfully"
            );
            record.complete(output.clone(), started);
            emit(
                events,
                PipelineEvent::StepCompleted {
                    index: task.index,
                    agent_name: record.agent_name.clone(),
                    output_len: output.len(),
                    duration_ms: record.duration_ms,
                },
            );
            (record, Some(output))
        }
        Err(e) => {
            error!(
                step = task.index,
                agent = %record.agent_name,
                provider = %record.provider,
                error = %e,
                "Step failed"
            );
            record.fail(&e, started);
            emit(
                events,
                PipelineEvent::StepFailed {
                    index: task.index,
                    agent_name: record.agent_name.clone(),
                    error: e.to_string(),
                },
            );
            (record, None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::AgentDescriptor;
    use crate::resolver::Agent;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// Mock agent for testing pipelines.
    struct MockAgent {
        descriptor: AgentDescriptor,
        response: String,
        should_fail: bool,
        delay_ms: u64,
        failing_tool: Option<&'static str>,
        call_count: AtomicUsize,
    }

    impl MockAgent {
        fn new(id: u32, response: &str) -> Self {
            Self {
                descriptor: AgentDescriptor::new(
                    id,
                    format!("Mock {id}"),
                    Role::Researcher,
                    Provider::OpenAi,
                    "mock-model",
                    "",
                )
                .unwrap(),
                response: response.to_string(),
                should_fail: false,
                delay_ms: 0,
                failing_tool: None,
                call_count: AtomicUsize::new(0),
            }
        }

        fn failing(id: u32) -> Self {
            Self {
                should_fail: true,
                ..Self::new(id, "")
            }
        }

        fn delayed(id: u32, response: &str, delay_ms: u64) -> Self {
            Self {
                delay_ms,
                ..Self::new(id, response)
            }
        }

        fn without_tool(id: u32, response: &str, tool: &'static str) -> Self {
            Self {
                failing_tool: Some(tool),
                ..Self::new(id, response)
            }
        }
    }

    #[async_trait]
    impl Agent for MockAgent {
        fn descriptor(&self) -> &AgentDescriptor {
            &self.descriptor
        }

        fn system_prompt(&self) -> &str {
            "Mock agent"
        }

        async fn execute(
            &self,
            _instruction: &str,
            context: &str,
            _query: &str,
        ) -> Result<AgentOutput> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }
            if self.should_fail {
                Err(ScriptoriumError::provider_call(Provider::OpenAi, "Mock failure"))
            } else {
                let mut output = AgentOutput::from(format!("{}<-[{}]", self.response, context));
                if let Some(tool) = self.failing_tool {
                    output.tool_failures.push(ToolFailure {
                        tool: tool.to_string(),
                        error: "Tool error: search unavailable".to_string(),
                    });
                }
                Ok(output)
            }
        }
    }

    fn task(index: usize, agent: Arc<MockAgent>, dependency: Dependency) -> Task {
        Task {
            index,
            agent,
            instruction: format!("instruction {index}"),
            dependency,
            search_query: String::new(),
        }
    }

    fn chain(agents: &[Arc<MockAgent>]) -> Vec<Task> {
        agents
            .iter()
            .enumerate()
            .map(|(i, a)| {
                let dep = if i == 0 {
                    Dependency::Seed("seed".into())
                } else {
                    Dependency::Previous(i - 1)
                };
                task(i, a.clone(), dep)
            })
            .collect()
    }

    #[tokio::test]
    async fn test_sequential_single_task() {
        let agent = Arc::new(MockAgent::new(1, "Hello"));
        let result = PipelineExecutor::new()
            .run(&chain(&[agent]), WorkflowMode::Sequential)
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.steps.len(), 1);
        assert_eq!(result.steps[0].status, TaskStatus::Completed);
        assert_eq!(result.result, "Hello<-[seed]");
    }

    #[tokio::test]
    async fn test_sequential_threads_outputs() {
        let agents = [
            Arc::new(MockAgent::new(1, "A")),
            Arc::new(MockAgent::new(2, "B")),
            Arc::new(MockAgent::new(3, "C")),
        ];
        let result = PipelineExecutor::new()
            .run(&chain(&agents), WorkflowMode::Sequential)
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.result, "C<-[B<-[A<-[seed]]]");
        assert_eq!(result.steps[1].output.as_deref(), Some("B<-[A<-[seed]]"));
    }

    #[tokio::test]
    async fn test_sequential_stops_on_failure() {
        let agents = [
            Arc::new(MockAgent::new(1, "A")),
            Arc::new(MockAgent::failing(2)),
            Arc::new(MockAgent::new(3, "C")),
        ];
        let result = PipelineExecutor::new()
            .run(&chain(&agents), WorkflowMode::Sequential)
            .await
            .unwrap();

        assert!(!result.success);
        assert!(result.result.is_empty());
        assert_eq!(result.steps.len(), 2); // Stopped at agent 2
        assert_eq!(result.steps[0].output.as_deref(), Some("A<-[seed]"));
        assert_eq!(result.steps[1].status, TaskStatus::Failed);
        assert!(result.steps[1].error.as_deref().unwrap().contains("Mock failure"));
        assert_eq!(agents[2].call_count.load(Ordering::SeqCst), 0);
        assert_eq!(result.failed_step().map(|s| s.index), Some(1));
    }

    #[tokio::test]
    async fn test_parallel_orders_by_index() {
        // Slowest first so completion order differs from index order.
        let agents = [
            Arc::new(MockAgent::delayed(1, "slow", 60)),
            Arc::new(MockAgent::delayed(2, "medium", 30)),
            Arc::new(MockAgent::new(3, "fast")),
        ];
        let tasks: Vec<Task> = agents
            .iter()
            .enumerate()
            .map(|(i, a)| task(i, a.clone(), Dependency::Seed("seed".into())))
            .collect();

        let result = PipelineExecutor::new()
            .run(&tasks, WorkflowMode::Parallel)
            .await
            .unwrap();

        assert!(result.success);
        let indices: Vec<usize> = result.steps.iter().map(|s| s.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        let slow = result.result.find("## Mock 1").unwrap();
        let medium = result.result.find("## Mock 2").unwrap();
        let fast = result.result.find("## Mock 3").unwrap();
        assert!(slow < medium && medium < fast);
    }

    #[tokio::test]
    async fn test_parallel_partial_failure() {
        let agents = [
            Arc::new(MockAgent::new(1, "Success 1")),
            Arc::new(MockAgent::failing(2)),
            Arc::new(MockAgent::new(3, "Success 3")),
        ];
        let tasks: Vec<Task> = agents
            .iter()
            .enumerate()
            .map(|(i, a)| task(i, a.clone(), Dependency::Seed("seed".into())))
            .collect();

        let result = PipelineExecutor::new()
            .run(&tasks, WorkflowMode::Parallel)
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.steps.len(), 3); // All ran
        assert!(result.result.contains("Success 1"));
        assert!(result.result.contains("Success 3"));
        assert!(!result.result.contains("## Mock 2"));
    }

    #[tokio::test]
    async fn test_parallel_rejects_linked_chain() {
        let agents = [Arc::new(MockAgent::new(1, "A")), Arc::new(MockAgent::new(2, "B"))];
        let err = PipelineExecutor::new()
            .run(&chain(&agents), WorkflowMode::Parallel)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ScriptoriumError::Config(ConfigError::ParallelDependency { step: 1 })
        ));
        assert_eq!(agents[0].call_count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_is_config_error() {
        let err = PipelineExecutor::new()
            .run(&[], WorkflowMode::Sequential)
            .await
            .unwrap_err();
        assert!(matches!(err, ScriptoriumError::Config(ConfigError::EmptyWorkflow)));
    }

    #[tokio::test]
    async fn test_malformed_dependency_is_runtime_error() {
        let agent = Arc::new(MockAgent::new(1, "A"));
        let tasks = vec![task(0, agent.clone(), Dependency::Previous(0))];
        let err = PipelineExecutor::new()
            .run(&tasks, WorkflowMode::Sequential)
            .await
            .unwrap_err();
        assert!(matches!(err, ScriptoriumError::Runtime(_)));
        assert_eq!(agent.call_count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_events_follow_progress() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let agents = [Arc::new(MockAgent::new(1, "A")), Arc::new(MockAgent::failing(2))];
        PipelineExecutor::with_events(tx)
            .run(&chain(&agents), WorkflowMode::Sequential)
            .await
            .unwrap();

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert_eq!(events.len(), 5);
        assert!(matches!(events[0], PipelineEvent::StepStarted { index: 0, .. }));
        assert!(matches!(events[1], PipelineEvent::StepCompleted { index: 0, .. }));
        assert!(matches!(events[2], PipelineEvent::StepStarted { index: 1, .. }));
        assert!(matches!(events[3], PipelineEvent::StepFailed { index: 1, .. }));
        assert!(matches!(events[4], PipelineEvent::Finished { success: false, .. }));
    }

    #[tokio::test]
    async fn test_tool_failure_is_recorded_and_reported() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let agent = Arc::new(MockAgent::without_tool(1, "A", "scholar_search"));
        let result = PipelineExecutor::with_events(tx)
            .run(&chain(&[agent]), WorkflowMode::Sequential)
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.steps[0].status, TaskStatus::Completed);
        assert_eq!(result.steps[0].tool_failures.len(), 1);
        assert_eq!(result.steps[0].tool_failures[0].tool, "scholar_search");

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert!(matches!(
            &events[1],
            PipelineEvent::ToolFailed { index: 0, tool, .. } if tool == "scholar_search"
        ));
        assert!(matches!(events[2], PipelineEvent::StepCompleted { index: 0, .. }));
    }

    #[test]
    fn test_preview_truncates() {
        assert_eq!(preview("short"), "short");
        let long = "é".repeat(150);
        let p = preview(&long);
        assert!(p.ends_with("..."));
        assert_eq!(p.chars().count(), PREVIEW_CHARS + 3);
        assert_eq!(preview(&"a".repeat(PREVIEW_CHARS)), "a".repeat(PREVIEW_CHARS));
    }
}
