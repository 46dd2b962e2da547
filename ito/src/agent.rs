//! Agent configuration and execution records.
//!
//! An [`Agent`] is a plain configuration record — model, provider, system
//! prompt, tools, optional memory and guardrails. A
//! [`Strategy`](crate::strategy::Strategy) executes it and produces an
//! [`AgentExecution`]: a fully populated record with a terminal status,
//! per-step entries, and the final output. Partial work survives failure
//! and cancellation for diagnostics.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::event::new_execution_id;
use crate::guardrail::Guardrails;
use crate::memory::MemoryManager;
use crate::provider::SharedChatProvider;
use crate::tool::ToolRegistry;

/// A named agent configuration.
#[derive(Clone)]
pub struct Agent {
    /// Stable agent id.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Model identifier used for this agent's calls.
    pub model: String,
    /// The model provider.
    pub provider: SharedChatProvider,
    /// System prompt prepended to every conversation.
    pub system_prompt: Option<String>,
    /// The agent's toolbox.
    pub tools: Arc<ToolRegistry>,
    /// Optional memory, consulted and written by strategies.
    pub memory: Option<Arc<MemoryManager>>,
    /// Optional guardrails, invoked at generation boundaries.
    pub guardrails: Option<Arc<dyn Guardrails>>,
    /// Arbitrary metadata.
    pub metadata: HashMap<String, Value>,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("model", &self.model)
            .field("tools", &self.tools.len())
            .finish_non_exhaustive()
    }
}

impl Agent {
    /// Create an agent with an empty toolbox.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        model: impl Into<String>,
        provider: SharedChatProvider,
    ) -> Self {
        let name = name.into();
        Self {
            id: format!("agent_{}", uuid::Uuid::new_v4().simple()),
            name,
            model: model.into(),
            provider,
            system_prompt: None,
            tools: Arc::new(ToolRegistry::new()),
            memory: None,
            guardrails: None,
            metadata: HashMap::new(),
        }
    }

    /// Set the system prompt.
    #[must_use]
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Attach a toolbox.
    #[must_use]
    pub fn tools(mut self, tools: Arc<ToolRegistry>) -> Self {
        self.tools = tools;
        self
    }

    /// Attach memory.
    #[must_use]
    pub fn memory(mut self, memory: Arc<MemoryManager>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Attach guardrails.
    #[must_use]
    pub fn guardrails(mut self, guardrails: Arc<dyn Guardrails>) -> Self {
        self.guardrails = Some(guardrails);
        self
    }
}

/// Cooperative cancellation and deadline context for one run.
///
/// Passed explicitly into every suspension-capable operation; never stored
/// in long-lived shared state.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    /// Cancellation signal observed at loop heads and inside tool dispatch.
    pub cancellation: CancellationToken,
}

impl RunContext {
    /// Create a fresh context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context from an existing token.
    #[must_use]
    pub const fn with_token(cancellation: CancellationToken) -> Self {
        Self { cancellation }
    }

    /// Derive a child context; cancelling the parent cancels the child.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            cancellation: self.cancellation.child_token(),
        }
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// Terminal and in-flight status of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// The run is in flight.
    Running,
    /// The run finished with a final output.
    Completed,
    /// The run failed terminally.
    Failed,
    /// The run observed a cancellation signal.
    Cancelled,
}

/// One recorded step of an execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStep {
    /// Zero-based step index.
    pub index: usize,
    /// What kind of step this was (`think`, `act`, `plan`, `execute`, …).
    pub kind: String,
    /// The step's input, summarized.
    pub input: String,
    /// The step's output, summarized.
    pub output: String,
    /// When the step was recorded.
    pub timestamp: DateTime<Utc>,
    /// Extra step metadata.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

impl AgentStep {
    /// Create a step record.
    #[must_use]
    pub fn new(
        index: usize,
        kind: impl Into<String>,
        input: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        Self {
            index,
            kind: kind.into(),
            input: input.into(),
            output: output.into(),
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }
}

/// The record of one strategy run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentExecution {
    /// Execution id; ties stream events and persisted steps together.
    pub id: String,
    /// Id of the executed agent.
    pub agent_id: String,
    /// Current status.
    pub status: ExecutionStatus,
    /// When the run started.
    pub start_time: DateTime<Utc>,
    /// When the run reached a terminal status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// The recorded steps.
    #[serde(default)]
    pub steps: Vec<AgentStep>,
    /// The final output, when completed.
    #[serde(default)]
    pub final_output: String,
    /// One-line error, when failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Extra execution metadata.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

impl AgentExecution {
    /// Start a new running execution for an agent.
    #[must_use]
    pub fn start(agent_id: impl Into<String>) -> Self {
        Self {
            id: new_execution_id(),
            agent_id: agent_id.into(),
            status: ExecutionStatus::Running,
            start_time: Utc::now(),
            end_time: None,
            steps: Vec::new(),
            final_output: String::new(),
            error: None,
            metadata: HashMap::new(),
        }
    }

    /// Finish the execution as completed with a final output.
    pub fn complete(&mut self, final_output: impl Into<String>) {
        self.status = ExecutionStatus::Completed;
        self.final_output = final_output.into();
        self.end_time = Some(Utc::now());
    }

    /// Finish the execution as failed with an error message.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = ExecutionStatus::Failed;
        self.error = Some(error.into());
        self.end_time = Some(Utc::now());
    }

    /// Finish the execution as cancelled.
    pub fn cancel(&mut self) {
        self.status = ExecutionStatus::Cancelled;
        self.end_time = Some(Utc::now());
    }

    /// Wall-clock duration of the run, once terminal.
    #[must_use]
    pub fn duration(&self) -> Option<Duration> {
        self.end_time
            .and_then(|end| (end - self.start_time).to_std().ok())
    }
}

/// One step's record in a ReAct loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningTrace {
    /// Zero-based iteration index.
    pub step: usize,
    /// What the model thought.
    pub thought: String,
    /// The tool the model chose, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// Arguments for the chosen tool.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_input: Option<Value>,
    /// What the tool returned.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observation: Option<String>,
    /// Reflection text attached later, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reflection: Option<String>,
    /// Confidence in `[0, 1]`; defaults to 0.8, dropped to 0.3 on tool
    /// failure.
    pub confidence: f64,
    /// When the trace was recorded.
    pub timestamp: DateTime<Utc>,
    /// Extra trace metadata.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

impl ReasoningTrace {
    /// Default confidence for a fresh trace.
    pub const DEFAULT_CONFIDENCE: f64 = 0.8;

    /// Confidence assigned when the step's tool failed.
    pub const FAILURE_CONFIDENCE: f64 = 0.3;

    /// Create a trace for an iteration.
    #[must_use]
    pub fn new(step: usize, thought: impl Into<String>) -> Self {
        Self {
            step,
            thought: thought.into(),
            action: None,
            action_input: None,
            observation: None,
            reflection: None,
            confidence: Self::DEFAULT_CONFIDENCE,
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    /// Render this trace as a prompt line:
    /// `Step N: Thought … Action … Observation …`.
    #[must_use]
    pub fn format_for_prompt(&self) -> String {
        let mut line = format!("Step {}: Thought: {}", self.step, self.thought);
        if let Some(action) = &self.action {
            line.push_str(&format!(" Action: {action}"));
        }
        if let Some(observation) = &self.observation {
            line.push_str(&format!(" Observation: {observation}"));
        }
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::mock::MockProvider;

    #[test]
    fn execution_lifecycle() {
        let mut execution = AgentExecution::start("agent-1");
        assert_eq!(execution.status, ExecutionStatus::Running);
        assert!(execution.id.starts_with("exec_"));
        assert!(execution.end_time.is_none());

        execution.complete("done");
        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(execution.final_output, "done");
        assert!(execution.end_time.is_some());
        assert!(execution.duration().is_some());
    }

    #[test]
    fn failed_execution_keeps_partial_steps() {
        let mut execution = AgentExecution::start("agent-1");
        execution
            .steps
            .push(AgentStep::new(0, "think", "input", "output"));
        execution.fail("provider exploded");

        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert_eq!(execution.steps.len(), 1);
        assert_eq!(execution.error.as_deref(), Some("provider exploded"));
    }

    #[test]
    fn cancelled_execution_is_terminal() {
        let mut execution = AgentExecution::start("agent-1");
        execution.cancel();
        assert_eq!(execution.status, ExecutionStatus::Cancelled);
        assert!(execution.end_time.is_some());
    }

    #[test]
    fn child_context_inherits_cancellation() {
        let parent = RunContext::new();
        let child = parent.child();
        assert!(!child.is_cancelled());
        parent.cancellation.cancel();
        assert!(child.is_cancelled());
    }

    #[test]
    fn trace_prompt_format() {
        let mut trace = ReasoningTrace::new(2, "search for it");
        trace.action = Some("search".to_owned());
        trace.observation = Some("Paris".to_owned());

        let line = trace.format_for_prompt();
        assert_eq!(
            line,
            "Step 2: Thought: search for it Action: search Observation: Paris"
        );
    }

    #[test]
    fn agent_builder_shape() {
        let agent = Agent::new("researcher", "mock-model", std::sync::Arc::new(MockProvider::new()))
            .system_prompt("be factual");

        assert_eq!(agent.name, "researcher");
        assert!(agent.id.starts_with("agent_"));
        assert_eq!(agent.system_prompt.as_deref(), Some("be factual"));
        assert!(agent.memory.is_none());
    }
}
