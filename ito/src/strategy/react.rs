//! The ReAct strategy: think, act, observe, repeat.
//!
//! Each iteration asks the model for a thought and an action, offering the
//! agent's tools as structured tool-call options. Native tool calls are
//! preferred; otherwise `Thought:` / `Action:` / `Action Input:` /
//! `Confidence:` lines are scraped from the text. A final-answer marker or
//! an empty action ends the run. Every `reflection_interval` iterations the
//! trace list is judged; a poor verdict is logged but ReAct never replans.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::agent::{Agent, AgentExecution, AgentStep, ReasoningTrace, RunContext};
use crate::error::StrategyError;
use crate::json_util;
use crate::memory::MemoryTier;
use crate::prompt;
use crate::provider::{ChatRequest, ChatResponse, ToolChoice};
use crate::reflection::ReflectionEngine;
use crate::tool::ToolContext;

use super::{Strategy, detect_final_answer};

/// The ReAct strategy configuration.
#[derive(Debug, Clone)]
pub struct ReactStrategy {
    /// Iteration bound.
    pub max_iterations: usize,
    /// Reflect every N iterations; 0 disables reflection.
    pub reflection_interval: usize,
    /// Deadline for the whole run.
    pub timeout: Duration,
    /// How many memories to recall into the prompt.
    pub memory_recall: usize,
    /// Persist traces and an episode to memory after the run.
    pub persist_traces: bool,
}

impl Default for ReactStrategy {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            reflection_interval: 3,
            timeout: Duration::from_secs(300),
            memory_recall: 3,
            persist_traces: true,
        }
    }
}

impl ReactStrategy {
    /// Create the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the iteration bound.
    #[must_use]
    pub const fn max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Set the reflection interval; 0 disables reflection.
    #[must_use]
    pub const fn reflection_interval(mut self, interval: usize) -> Self {
        self.reflection_interval = interval;
        self
    }

    /// Set the run deadline.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Strategy for ReactStrategy {
    fn name(&self) -> &'static str {
        "react"
    }

    async fn execute(
        &self,
        ctx: &RunContext,
        agent: &Agent,
        input: &str,
    ) -> Result<AgentExecution, StrategyError> {
        if self.max_iterations == 0 {
            return Err(StrategyError::configuration(
                "max_iterations must be at least 1",
            ));
        }

        let mut execution = AgentExecution::start(&agent.id);
        let ctx = ctx.child();

        info!(
            agent = %agent.name,
            execution_id = %execution.id,
            max_iterations = self.max_iterations,
            "ReAct run started"
        );

        let bounded = tokio::time::timeout(self.timeout, async {
            tokio::select! {
                () = ctx.cancellation.cancelled() => Err(ReactEnd::Cancelled),
                outcome = self.run_loop(&ctx, agent, input, &mut execution) => outcome,
            }
        })
        .await;

        match bounded {
            Ok(Ok(final_output)) => execution.complete(final_output),
            Ok(Err(ReactEnd::Failure(message))) => execution.fail(message),
            Ok(Err(ReactEnd::Cancelled)) => {
                execution.cancel();
                execution.error = Some("execution was cancelled".to_owned());
            }
            Err(_) => {
                execution.cancel();
                execution.error = Some(format!("execution timed out after {:?}", self.timeout));
            }
        }

        info!(
            execution_id = %execution.id,
            status = ?execution.status,
            steps = execution.steps.len(),
            "ReAct run finished"
        );
        Ok(execution)
    }
}

enum ReactEnd {
    Cancelled,
    Failure(String),
}

impl ReactStrategy {
    async fn run_loop(
        &self,
        ctx: &RunContext,
        agent: &Agent,
        input: &str,
        execution: &mut AgentExecution,
    ) -> Result<String, ReactEnd> {
        let memory_context = self.recall_context(agent, input).await;
        let reflection_engine = ReflectionEngine::new(agent.provider.clone(), &agent.model);

        let mut traces: Vec<ReasoningTrace> = Vec::new();
        let mut current_input = input.to_owned();

        for iteration in 0..self.max_iterations {
            if ctx.is_cancelled() {
                return Err(ReactEnd::Cancelled);
            }

            let response = self
                .think(agent, input, &memory_context, &traces, &current_input)
                .await
                .map_err(|e| ReactEnd::Failure(format!("model call failed: {e}")))?;

            let mut trace = parse_thought(&response, iteration);
            debug!(
                iteration,
                thought = %trace.thought,
                action = ?trace.action,
                "ReAct thought"
            );

            // Final-answer check before acting.
            let final_answer = detect_final_answer(&trace.thought);
            if final_answer.is_some() || trace.action.is_none() {
                let output = final_answer.unwrap_or_else(|| trace.thought.clone());
                execution.steps.push(AgentStep::new(
                    iteration,
                    "final",
                    current_input,
                    output.clone(),
                ));
                traces.push(trace);
                self.persist(agent, input, execution, &traces).await;
                return Ok(output);
            }

            // Act.
            let action = trace.action.clone().unwrap_or_default();
            let arguments = trace.action_input.clone().unwrap_or(json!({}));
            let observation = if agent.tools.contains(&action) {
                let tool_ctx = ToolContext::with_cancellation(ctx.cancellation.clone());
                let result = agent.tools.execute(&tool_ctx, &action, arguments).await;
                if !result.success {
                    trace.confidence = ReasoningTrace::FAILURE_CONFIDENCE;
                }
                result.serialized_output()
            } else {
                trace.confidence = ReasoningTrace::FAILURE_CONFIDENCE;
                format!("Error: tool not found: {action}")
            };
            trace.observation = Some(observation.clone());

            execution.steps.push(AgentStep::new(
                iteration,
                "react",
                current_input.clone(),
                observation.clone(),
            ));
            traces.push(trace);

            // Reflect every N iterations. ReAct logs the verdict; it never
            // replans.
            if self.reflection_interval > 0 && (iteration + 1) % self.reflection_interval == 0 {
                match reflection_engine.reflect_on_traces(input, &traces).await {
                    Ok(reflection) => {
                        if reflection.should_replan || reflection.score < 0.5 {
                            warn!(
                                iteration,
                                score = reflection.score,
                                "Reflection flagged weak reasoning"
                            );
                        }
                        if let Some(last) = traces.last_mut() {
                            last.reflection = Some(reflection.reasoning.clone());
                        }
                    }
                    Err(err) => debug!(error = %err, "Reflection failed"),
                }
            }

            current_input = observation;
        }

        // Iteration bound hit without a final answer: complete with the
        // last observation.
        let output = traces
            .iter()
            .rev()
            .find_map(|t| t.observation.clone())
            .unwrap_or_else(|| "No final answer was reached within the iteration limit".to_owned());
        self.persist(agent, input, execution, &traces).await;
        Ok(output)
    }

    async fn think(
        &self,
        agent: &Agent,
        task: &str,
        memory_context: &str,
        traces: &[ReasoningTrace],
        current_input: &str,
    ) -> Result<ChatResponse, crate::error::GenerateError> {
        let mut prompt = format!("Task: {task}\n");
        if !memory_context.is_empty() {
            prompt.push_str(&format!("\nRelevant context from memory:\n{memory_context}\n"));
        }
        if !traces.is_empty() {
            let formatted = traces
                .iter()
                .map(ReasoningTrace::format_for_prompt)
                .collect::<Vec<_>>()
                .join("\n");
            prompt.push_str(&format!("\nPrevious steps:\n{formatted}\n"));
        }
        prompt.push_str(&format!(
            "\nCurrent input: {current_input}\n\nThink about the next step. Either call a tool, \
             respond with lines of the form\nThought: <reasoning>\nAction: <tool name>\n\
             Action Input: <JSON arguments>\nConfidence: <0.0-1.0>\nor give the final answer as \
             'Final Answer: <answer>'."
        ));

        let definitions = agent.tools.definitions();
        let messages = prompt::build_messages(agent.system_prompt.as_deref(), &[], Some(&prompt));
        let mut request = ChatRequest::with_messages(&agent.model, messages);
        if !definitions.is_empty() {
            request = request.tools(definitions).tool_choice(ToolChoice::Auto);
        }
        agent.provider.chat(&request).await
    }

    async fn recall_context(&self, agent: &Agent, input: &str) -> String {
        let Some(memory) = &agent.memory else {
            return String::new();
        };
        match memory
            .recall(input, MemoryTier::LongTerm, self.memory_recall)
            .await
        {
            Ok(entries) => entries
                .iter()
                .map(|e| format!("- {}", e.content))
                .collect::<Vec<_>>()
                .join("\n"),
            Err(err) => {
                debug!(error = %err, "Memory recall failed");
                String::new()
            }
        }
    }

    async fn persist(
        &self,
        agent: &Agent,
        task: &str,
        execution: &AgentExecution,
        traces: &[ReasoningTrace],
    ) {
        if !self.persist_traces {
            return;
        }
        let Some(memory) = &agent.memory else { return };

        let mut member_ids = Vec::new();
        for trace in traces {
            let mut metadata = HashMap::new();
            metadata.insert("tier".to_owned(), json!(MemoryTier::LongTerm.as_str()));
            metadata.insert("type".to_owned(), json!("reasoning_trace"));
            metadata.insert("execution_id".to_owned(), json!(execution.id));
            metadata.insert(
                "trace_json".to_owned(),
                json!(serde_json::to_string(trace).unwrap_or_default()),
            );
            match memory
                .store(trace.format_for_prompt(), metadata, trace.confidence)
                .await
            {
                Ok(entry) => member_ids.push(entry.id),
                Err(err) => debug!(error = %err, "Failed to persist trace"),
            }
        }

        if !member_ids.is_empty() {
            let summary = format!("ReAct run for task '{task}' with {} steps", traces.len());
            if let Err(err) = memory
                .record_episode(&execution.id, summary, member_ids)
                .await
            {
                debug!(error = %err, "Failed to record episode");
            }
        }
    }
}

/// Parse a think-step response into a trace.
///
/// Native tool calls win; otherwise the labeled lines are scraped from the
/// text. Confidence defaults to 0.8.
fn parse_thought(response: &ChatResponse, iteration: usize) -> ReasoningTrace {
    if let Some(calls) = response.tool_calls()
        && let Some(call) = calls.first()
    {
        let mut trace = ReasoningTrace::new(iteration, response.text());
        trace.action = Some(call.name().to_owned());
        trace.action_input = Some(call.parse_arguments());
        return trace;
    }

    let text = response.text();
    let mut thought_lines: Vec<&str> = Vec::new();
    let mut action = None;
    let mut action_input = None;
    let mut confidence = None;

    for line in text.lines() {
        let trimmed = line.trim();
        let lower = trimmed.to_lowercase();
        if let Some(rest) = strip_label(trimmed, &lower, "thought:") {
            thought_lines.push(rest);
        } else if let Some(rest) = strip_label(trimmed, &lower, "action input:") {
            action_input = json_util::parse_json_span_value(rest)
                .or_else(|| Some(Value::String(rest.to_owned())));
        } else if let Some(rest) = strip_label(trimmed, &lower, "action:") {
            let rest = rest.trim();
            if !rest.is_empty() {
                action = Some(rest.to_owned());
            }
        } else if let Some(rest) = strip_label(trimmed, &lower, "confidence:") {
            confidence = rest.trim().parse::<f64>().ok();
        }
    }

    let thought = if thought_lines.is_empty() {
        text.trim().to_owned()
    } else {
        thought_lines.join(" ")
    };

    let mut trace = ReasoningTrace::new(iteration, thought);
    trace.action = action;
    trace.action_input = action_input;
    if let Some(confidence) = confidence {
        trace.confidence = confidence.clamp(0.0, 1.0);
    }
    trace
}

fn strip_label<'a>(line: &'a str, lower: &str, label: &str) -> Option<&'a str> {
    lower
        .starts_with(label)
        .then(|| line[label.len()..].trim())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::agent::ExecutionStatus;
    use crate::provider::mock::MockProvider;
    use crate::tool::{Tool, ToolRegistry};
    use std::sync::Arc;

    fn search_registry() -> Arc<ToolRegistry> {
        let registry = ToolRegistry::new();
        registry.register(Tool::from_fn(
            "search",
            "Search the web",
            json!({"type": "object"}),
            |_ctx, _args| async move { Ok(json!("Paris")) },
        ));
        Arc::new(registry)
    }

    mod parsing {
        use super::*;

        #[test]
        fn scrapes_labeled_lines() {
            let response = ChatResponse::from_text(
                "Thought: search for capital of France\nAction: search\n\
                 Action Input: {\"q\": \"capital of France\"}\nConfidence: 0.9",
            );
            let trace = parse_thought(&response, 0);

            assert_eq!(trace.thought, "search for capital of France");
            assert_eq!(trace.action.as_deref(), Some("search"));
            assert_eq!(trace.action_input.unwrap()["q"], "capital of France");
            assert!((trace.confidence - 0.9).abs() < 1e-9);
        }

        #[test]
        fn plain_text_is_the_thought_with_default_confidence() {
            let response = ChatResponse::from_text("just musing about the problem");
            let trace = parse_thought(&response, 1);

            assert_eq!(trace.thought, "just musing about the problem");
            assert!(trace.action.is_none());
            assert!((trace.confidence - ReasoningTrace::DEFAULT_CONFIDENCE).abs() < 1e-9);
        }

        #[test]
        fn native_tool_calls_win_over_scraping() {
            let message = crate::message::ChatMessage::assistant_tool_calls(vec![
                crate::message::ToolCall::function("tc", "search", r#"{"q":"x"}"#),
            ]);
            let response = ChatResponse::new(message);
            let trace = parse_thought(&response, 0);

            assert_eq!(trace.action.as_deref(), Some("search"));
            assert_eq!(trace.action_input.unwrap()["q"], "x");
        }

        #[test]
        fn labels_are_case_insensitive() {
            let response =
                ChatResponse::from_text("THOUGHT: loud thinking\nACTION: search");
            let trace = parse_thought(&response, 0);
            assert_eq!(trace.thought, "loud thinking");
            assert_eq!(trace.action.as_deref(), Some("search"));
        }
    }

    mod runs {
        use super::*;

        #[tokio::test]
        async fn research_run_completes_with_final_answer() {
            let provider = Arc::new(
                MockProvider::new()
                    .with_text(
                        "Thought: search for capital of France\nAction: search\n\
                         Action Input: {\"q\": \"capital of France\"}",
                    )
                    .with_text("Thought: Final Answer: Paris"),
            );
            let agent =
                Agent::new("researcher", "m", provider).tools(search_registry());
            let strategy = ReactStrategy::new().reflection_interval(0);

            let execution = strategy
                .execute(&RunContext::new(), &agent, "Capital of France?")
                .await
                .unwrap();

            assert_eq!(execution.status, ExecutionStatus::Completed);
            assert_eq!(execution.final_output, "Paris");
            assert_eq!(execution.steps.len(), 2);
        }

        #[tokio::test]
        async fn single_iteration_without_answer_completes_with_placeholder() {
            let provider = Arc::new(MockProvider::new().with_text(
                "Thought: keep looking\nAction: search\nAction Input: {}",
            ));
            let agent = Agent::new("a", "m", provider).tools(search_registry());
            let strategy = ReactStrategy::new()
                .max_iterations(1)
                .reflection_interval(0);

            let execution = strategy
                .execute(&RunContext::new(), &agent, "question")
                .await
                .unwrap();

            assert_eq!(execution.status, ExecutionStatus::Completed);
            assert_eq!(execution.steps.len(), 1);
            // The last observation stands in for the missing final answer.
            assert_eq!(execution.final_output, "Paris");
        }

        #[tokio::test]
        async fn tool_failure_becomes_error_observation_with_low_confidence() {
            let provider = Arc::new(
                MockProvider::new()
                    .with_text("Thought: try the gadget\nAction: gadget\nAction Input: {}")
                    .with_text("Thought: Final Answer: gave up"),
            );
            let agent = Agent::new("a", "m", provider.clone()).tools(search_registry());
            let strategy = ReactStrategy::new().reflection_interval(0);

            let execution = strategy
                .execute(&RunContext::new(), &agent, "question")
                .await
                .unwrap();

            assert_eq!(execution.status, ExecutionStatus::Completed);
            let first_step = &execution.steps[0];
            assert!(first_step.output.starts_with("Error: tool not found"));

            // The second think prompt carries the error observation forward.
            let requests = provider.requests();
            let second_prompt = &requests[1].messages.last().unwrap().content;
            assert!(second_prompt.contains("Error: tool not found: gadget"));
        }

        #[tokio::test]
        async fn empty_action_ends_the_run() {
            let provider =
                Arc::new(MockProvider::new().with_text("Thought: nothing left to do"));
            let agent = Agent::new("a", "m", provider).tools(search_registry());
            let strategy = ReactStrategy::new().reflection_interval(0);

            let execution = strategy
                .execute(&RunContext::new(), &agent, "question")
                .await
                .unwrap();

            assert_eq!(execution.status, ExecutionStatus::Completed);
            assert_eq!(execution.final_output, "nothing left to do");
        }

        #[tokio::test]
        async fn cancellation_yields_cancelled_status() {
            let provider = Arc::new(MockProvider::new().with_text("Thought: hmm"));
            let agent = Agent::new("a", "m", provider);
            let strategy = ReactStrategy::new();

            let ctx = RunContext::new();
            ctx.cancellation.cancel();
            let execution = strategy
                .execute(&ctx, &agent, "question")
                .await
                .unwrap();

            assert_eq!(execution.status, ExecutionStatus::Cancelled);
            assert!(execution.error.is_some());
        }

        #[tokio::test]
        async fn zero_iterations_is_a_config_error() {
            let provider = Arc::new(MockProvider::new());
            let agent = Agent::new("a", "m", provider);
            let strategy = ReactStrategy::new().max_iterations(0);

            let err = strategy
                .execute(&RunContext::new(), &agent, "q")
                .await
                .unwrap_err();
            assert!(matches!(err, StrategyError::Configuration(_)));
        }

        #[tokio::test]
        async fn reflection_runs_on_the_interval() {
            // Iterations 1 and 2 act; the reflection after iteration 2 is
            // the third chat call; iteration 3 finishes.
            let provider = Arc::new(
                MockProvider::new()
                    .with_text("Thought: step one\nAction: search\nAction Input: {}")
                    .with_text("Thought: step two\nAction: search\nAction Input: {}")
                    .with_text(r#"{"quality":"good","score":0.9}"#)
                    .with_text("Thought: Final Answer: done"),
            );
            let agent = Agent::new("a", "m", provider.clone()).tools(search_registry());
            let strategy = ReactStrategy::new().reflection_interval(2);

            let execution = strategy
                .execute(&RunContext::new(), &agent, "question")
                .await
                .unwrap();

            assert_eq!(execution.status, ExecutionStatus::Completed);
            assert_eq!(provider.requests().len(), 4);
        }
    }
}
