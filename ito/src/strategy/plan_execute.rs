//! The Plan-Execute strategy: plan up front, execute in dependency order,
//! replan on failure.
//!
//! Phase 1 asks the planner for a step list as JSON and structurally
//! verifies it. Phase 2 repeatedly dispatches every pending-executable step
//! of the round concurrently, joins the batch, applies results, and retries
//! failed steps while budget remains; when the plan stalls, the replan
//! engine derives a revision (bounded by `max_replan_attempts`) that fully
//! supplants the failed plan. Phase 3 optionally attaches a final
//! plan-quality verdict to the execution metadata.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::agent::{Agent, AgentExecution, AgentStep, RunContext};
use crate::error::StrategyError;
use crate::json_util;
use crate::message::ChatMessage;
use crate::plan::{Plan, PlanStatus, PlanStep, PlanStore};
use crate::prompt;
use crate::provider::{ChatRequest, ToolChoice};
use crate::replan::{ReplanEngine, evaluate_triggers};
use crate::tool::ToolContext;
use crate::verifier::{PlanVerifier, VerificationResult};

use super::Strategy;

/// The Plan-Execute strategy configuration.
#[derive(Clone)]
pub struct PlanExecuteStrategy {
    /// Replan budget; 0 disables replanning.
    pub max_replan_attempts: usize,
    /// Judge each completed step's output.
    pub verify_steps: bool,
    /// Attach a final plan-quality verdict to the execution.
    pub final_verification: bool,
    /// Deadline for the whole run.
    pub timeout: Duration,
    /// Bound on tool rounds within one step execution.
    pub max_step_tool_rounds: usize,
    /// Optional store plans are persisted to, best-effort.
    pub plan_store: Option<Arc<dyn PlanStore>>,
}

impl std::fmt::Debug for PlanExecuteStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanExecuteStrategy")
            .field("max_replan_attempts", &self.max_replan_attempts)
            .field("verify_steps", &self.verify_steps)
            .finish_non_exhaustive()
    }
}

impl Default for PlanExecuteStrategy {
    fn default() -> Self {
        Self {
            max_replan_attempts: 2,
            verify_steps: false,
            final_verification: false,
            timeout: Duration::from_secs(600),
            max_step_tool_rounds: 4,
            plan_store: None,
        }
    }
}

impl PlanExecuteStrategy {
    /// Create the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the replan budget; 0 disables replanning.
    #[must_use]
    pub const fn max_replan_attempts(mut self, attempts: usize) -> Self {
        self.max_replan_attempts = attempts;
        self
    }

    /// Enable per-step output verification.
    #[must_use]
    pub const fn verify_steps(mut self, enabled: bool) -> Self {
        self.verify_steps = enabled;
        self
    }

    /// Enable the final plan-quality pass.
    #[must_use]
    pub const fn final_verification(mut self, enabled: bool) -> Self {
        self.final_verification = enabled;
        self
    }

    /// Set the run deadline.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Persist plans to a store.
    #[must_use]
    pub fn plan_store(mut self, store: Arc<dyn PlanStore>) -> Self {
        self.plan_store = Some(store);
        self
    }
}

enum PlanRunEnd {
    Cancelled,
    Failure(String),
}

#[async_trait]
impl Strategy for PlanExecuteStrategy {
    fn name(&self) -> &'static str {
        "plan_execute"
    }

    fn supports_replanning(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        ctx: &RunContext,
        agent: &Agent,
        input: &str,
    ) -> Result<AgentExecution, StrategyError> {
        let mut execution = AgentExecution::start(&agent.id);
        let ctx = ctx.child();

        info!(
            agent = %agent.name,
            execution_id = %execution.id,
            "Plan-Execute run started"
        );

        let bounded = tokio::time::timeout(self.timeout, async {
            tokio::select! {
                () = ctx.cancellation.cancelled() => false,
                () = self.run(&ctx, agent, input, &mut execution) => true,
            }
        })
        .await;

        match bounded {
            Ok(true) => {}
            Ok(false) => {
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
            "Plan-Execute run finished"
        );
        Ok(execution)
    }
}

impl PlanExecuteStrategy {
    async fn run(
        &self,
        ctx: &RunContext,
        agent: &Agent,
        input: &str,
        execution: &mut AgentExecution,
    ) {
        // Phase 1 — plan.
        let verifier = PlanVerifier::structural_only();
        let mut plan = match self.create_plan(agent, input).await {
            Ok(plan) => plan,
            Err(err) => {
                execution.fail(format!("planning failed: {err}"));
                return;
            }
        };

        let verification = verifier.verify_structure(&plan);
        if verification.score < 0.3 {
            execution.fail(format!(
                "plan failed structural verification: {}",
                verification.issues.join("; ")
            ));
            return;
        }
        if !verification.is_valid {
            warn!(score = verification.score, "Plan verification is marginal");
        }
        execution.metadata.insert(
            "plan_verification".to_owned(),
            json!(serde_json::to_value(&verification).unwrap_or(Value::Null)),
        );

        self.persist(&plan).await;
        let mut plan_history: Vec<Plan> = Vec::new();

        // Phase 2 — execute with bounded replanning.
        let mut replans = 0usize;
        let final_output = loop {
            match self.execute_plan(ctx, agent, input, &mut plan, execution).await {
                Ok(output) => {
                    plan.status = PlanStatus::Completed;
                    self.persist(&plan).await;
                    plan_history.push(plan.clone());
                    if let Some(memory) = &agent.memory {
                        let _ = memory.store_plan_outcome(&plan, true, &output).await;
                    }
                    break Some(output);
                }
                Err(PlanRunEnd::Cancelled) => {
                    plan.status = PlanStatus::Cancelled;
                    self.persist(&plan).await;
                    plan_history.push(plan.clone());
                    execution.cancel();
                    execution.error = Some("execution was cancelled".to_owned());
                    break None;
                }
                Err(PlanRunEnd::Failure(failure)) => {
                    plan.status = PlanStatus::Failed;
                    self.persist(&plan).await;
                    plan_history.push(plan.clone());

                    if self.max_replan_attempts == 0 || replans >= self.max_replan_attempts {
                        execution.fail(if self.max_replan_attempts == 0 {
                            format!("plan failed and replanning is disabled: {failure}")
                        } else {
                            format!(
                                "plan failed after {replans} replan attempt(s): {failure}"
                            )
                        });
                        break None;
                    }

                    let reason = evaluate_triggers(None, &plan)
                        .map_or("step_failure", |trigger| trigger.name);
                    let mut engine = ReplanEngine::new(agent.provider.clone(), &agent.model);
                    if let Some(memory) = &agent.memory {
                        engine = engine.with_memory(memory.clone());
                    }

                    match engine
                        .replan(&plan, &failure, &agent.tools.definitions(), reason)
                        .await
                    {
                        Ok(revision) => {
                            replans += 1;
                            info!(
                                version = revision.version,
                                reason, "Continuing with revised plan"
                            );
                            plan = revision;
                            self.persist(&plan).await;
                        }
                        Err(err) => {
                            execution.fail(format!("replanning failed: {err}"));
                            break None;
                        }
                    }
                }
            }
        };

        execution.metadata.insert(
            "plan_history".to_owned(),
            serde_json::to_value(&plan_history).unwrap_or(Value::Null),
        );
        execution
            .metadata
            .insert("replan_count".to_owned(), json!(replans));

        // Phase 3 — final verification.
        if self.final_verification
            && let Some(last) = plan_history.last()
        {
            let judge = PlanVerifier::new(agent.provider.clone(), &agent.model);
            match judge.verify(last).await {
                Ok(result) => {
                    execution.metadata.insert(
                        "final_verification".to_owned(),
                        serde_json::to_value(&result).unwrap_or(Value::Null),
                    );
                }
                Err(err) => debug!(error = %err, "Final verification failed"),
            }
        }

        if let Some(output) = final_output {
            execution.complete(output);
        }
    }

    async fn create_plan(&self, agent: &Agent, input: &str) -> Result<Plan, StrategyError> {
        let catalog = agent
            .tools
            .definitions()
            .iter()
            .map(|d| format!("- {}: {}", d.name, d.description))
            .collect::<Vec<_>>()
            .join("\n");
        let catalog = if catalog.is_empty() {
            "none".to_owned()
        } else {
            catalog
        };

        let prompt_text = format!(
            "Break this task into an ordered plan of concrete steps.\n\nTask: {input}\n\n\
             Available tools:\n{catalog}\n\nRespond with a JSON object of the form \
             {{\"steps\":[{{\"description\":\"...\",\"tools\":[\"...\"],\
             \"dependencies\":[\"step-0\"]}}]}}. Use dependencies only where a step \
             genuinely needs an earlier step's result."
        );
        let messages = prompt::build_messages(
            agent.system_prompt.as_deref(),
            &[],
            Some(&prompt_text),
        );
        let request = ChatRequest::with_messages(&agent.model, messages);

        let response = agent
            .provider
            .chat(&request)
            .await
            .map_err(|e| StrategyError::phase(format!("planner call failed: {e}")))?;

        Plan::from_planner_json(&agent.id, input, response.text())
            .map_err(|e| StrategyError::phase(e.to_string()))
    }

    /// Run one plan to completion or stall.
    ///
    /// Each round dispatches every pending-executable step concurrently and
    /// joins the batch; write-backs are applied from the snapshot, so
    /// intra-round orderings cannot affect dependency resolution.
    async fn execute_plan(
        &self,
        ctx: &RunContext,
        agent: &Agent,
        goal: &str,
        plan: &mut Plan,
        execution: &mut AgentExecution,
    ) -> Result<String, PlanRunEnd> {
        loop {
            if ctx.is_cancelled() {
                return Err(PlanRunEnd::Cancelled);
            }

            let batch: Vec<PlanStep> =
                plan.pending_steps().into_iter().cloned().collect();

            if batch.is_empty() {
                if plan.is_complete() {
                    let output = plan
                        .completed_steps()
                        .iter()
                        .filter_map(|s| s.result.as_ref())
                        .map(json_util::to_json_or_display)
                        .collect::<Vec<_>>()
                        .join("\n");
                    return Ok(output);
                }

                // Retry failed steps that still have budget.
                let retryable: Vec<String> = plan
                    .failed_steps()
                    .iter()
                    .filter(|s| s.can_retry())
                    .map(|s| s.id.clone())
                    .collect();
                if !retryable.is_empty() {
                    for id in retryable {
                        debug!(step = %id, "Retrying failed step");
                        plan.schedule_retry(&id);
                    }
                    continue;
                }

                let failures = plan
                    .failed_steps()
                    .iter()
                    .map(|s| {
                        format!(
                            "step {} ({}) failed: {}",
                            s.id,
                            s.description,
                            s.error.as_deref().unwrap_or("unknown")
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("; ");
                let message = if failures.is_empty() {
                    "plan stalled with no executable steps".to_owned()
                } else {
                    failures
                };
                return Err(PlanRunEnd::Failure(message));
            }

            for step in &batch {
                if let Err(err) = plan.start_step(&step.id) {
                    return Err(PlanRunEnd::Failure(err.to_string()));
                }
            }

            let completed_context = step_context(plan);
            let futures: Vec<_> = batch
                .iter()
                .map(|step| {
                    self.execute_step(ctx, agent, goal, step.clone(), completed_context.clone())
                })
                .collect();
            // Barrier: sibling failures never pre-empt the batch.
            let outcomes = join_all(futures).await;

            for outcome in outcomes {
                execution.steps.push(AgentStep::new(
                    execution.steps.len(),
                    "execute_step",
                    outcome.description.clone(),
                    match &outcome.result {
                        Ok(value) => json_util::to_json_or_display(value),
                        Err(error) => format!("Error: {error}"),
                    },
                ));

                match outcome.result {
                    Ok(value) => {
                        plan.complete_step(&outcome.step_id, value);
                        if let Some(verification) = outcome.verification
                            && let Some(step) = plan.step_mut(&outcome.step_id)
                        {
                            step.verification = Some(verification);
                        }
                    }
                    Err(error) => plan.fail_step(&outcome.step_id, error),
                }
            }
        }
    }

    async fn execute_step(
        &self,
        ctx: &RunContext,
        agent: &Agent,
        goal: &str,
        step: PlanStep,
        completed_context: String,
    ) -> StepOutcome {
        // A step whose tools are not registered can never succeed; fail it
        // without spending a model call.
        let missing: Vec<&String> = step
            .tools_needed
            .iter()
            .filter(|name| !agent.tools.contains(name))
            .collect();
        if !missing.is_empty() {
            let missing = missing
                .iter()
                .map(|name| format!("tool not found: {name}"))
                .collect::<Vec<_>>()
                .join("; ");
            return StepOutcome::failure(&step, missing);
        }

        let mut prompt_text = format!(
            "You are executing one step of a plan.\n\nGoal: {goal}\nStep: {}\n",
            step.description
        );
        if !completed_context.is_empty() {
            prompt_text.push_str(&format!(
                "\nResults of completed steps:\n{completed_context}"
            ));
        }
        prompt_text.push_str("\nCarry out the step and state its result.");

        let definitions = agent.tools.definitions_for(&step.tools_needed);
        let mut messages =
            prompt::build_messages(agent.system_prompt.as_deref(), &[], Some(&prompt_text));

        for _round in 0..self.max_step_tool_rounds.max(1) {
            let mut request = ChatRequest::with_messages(&agent.model, messages.clone());
            if !definitions.is_empty() {
                request = request
                    .tools(definitions.clone())
                    .tool_choice(ToolChoice::Auto);
            }

            let response = match agent.provider.chat(&request).await {
                Ok(response) => response,
                Err(err) => return StepOutcome::failure(&step, err.to_string()),
            };

            let Some(calls) = response.tool_calls().filter(|calls| !calls.is_empty()) else {
                let content = response.text().to_owned();
                let verification = if self.verify_steps {
                    self.verify_step_output(agent, &step, &content).await
                } else {
                    None
                };
                return StepOutcome::success(&step, Value::String(content), verification);
            };

            // Tool round: execute the calls and feed results back.
            let calls = calls.to_vec();
            messages.push(ChatMessage::assistant_tool_calls(calls.clone()));
            let tool_ctx = ToolContext::with_cancellation(ctx.cancellation.clone());
            for call in calls {
                let result = agent
                    .tools
                    .execute(&tool_ctx, call.name(), call.parse_arguments())
                    .await;
                messages.push(ChatMessage::tool(
                    &call.id,
                    call.name(),
                    result.serialized_output(),
                ));
            }
        }

        StepOutcome::failure(&step, "step exceeded its tool-round budget")
    }

    async fn verify_step_output(
        &self,
        agent: &Agent,
        step: &PlanStep,
        output: &str,
    ) -> Option<VerificationResult> {
        let judge = PlanVerifier::new(agent.provider.clone(), &agent.model);
        match judge.verify_step(step, output).await {
            Ok(result) => Some(result),
            Err(err) => {
                debug!(error = %err, step = %step.id, "Step verification failed");
                None
            }
        }
    }

    async fn persist(&self, plan: &Plan) {
        if let Some(store) = &self.plan_store
            && let Err(err) = store.save(plan).await
        {
            warn!(error = %err, plan_id = %plan.id, "Plan persistence failed");
        }
    }
}

/// Results of completed steps, rendered for a step prompt.
fn step_context(plan: &Plan) -> String {
    plan.completed_steps()
        .iter()
        .filter_map(|s| {
            s.result
                .as_ref()
                .map(|r| format!("- {}: {}", s.description, json_util::to_json_or_display(r)))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

struct StepOutcome {
    step_id: String,
    description: String,
    result: Result<Value, String>,
    verification: Option<VerificationResult>,
}

impl StepOutcome {
    fn success(step: &PlanStep, value: Value, verification: Option<VerificationResult>) -> Self {
        Self {
            step_id: step.id.clone(),
            description: step.description.clone(),
            result: Ok(value),
            verification,
        }
    }

    fn failure(step: &PlanStep, error: impl Into<String>) -> Self {
        Self {
            step_id: step.id.clone(),
            description: step.description.clone(),
            result: Err(error.into()),
            verification: None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::agent::ExecutionStatus;
    use crate::plan::InMemoryPlanStore;
    use crate::provider::mock::MockProvider;
    use crate::tool::{Tool, ToolRegistry};

    const LINEAR_PLAN: &str = r#"{"steps":[
        {"description":"gather data","tools":[],"dependencies":[]},
        {"description":"summarize data","tools":[],"dependencies":["step-0"]}
    ]}"#;

    fn tools_with(names: &[&str]) -> Arc<ToolRegistry> {
        let registry = ToolRegistry::new();
        for name in names {
            let name = (*name).to_owned();
            registry.register(Tool::from_fn(
                name.clone(),
                format!("The {name} tool"),
                json!({"type": "object"}),
                |_ctx, _args| async move { Ok(json!("ok")) },
            ));
        }
        Arc::new(registry)
    }

    #[tokio::test]
    async fn linear_plan_executes_in_order() {
        let provider = Arc::new(
            MockProvider::new()
                .with_text(LINEAR_PLAN)
                .with_text("data gathered")
                .with_text("summary written"),
        );
        let agent = Agent::new("a", "m", provider.clone());
        let strategy = PlanExecuteStrategy::new();

        let execution = strategy
            .execute(&RunContext::new(), &agent, "report on things")
            .await
            .unwrap();

        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(execution.final_output, "data gathered\nsummary written");
        assert_eq!(execution.steps.len(), 2);
        assert_eq!(provider.requests().len(), 3);
    }

    #[tokio::test]
    async fn parallel_steps_run_in_one_round() {
        let plan = r#"{"steps":[
            {"description":"left","tools":[],"dependencies":[]},
            {"description":"right","tools":[],"dependencies":[]},
            {"description":"join","tools":[],"dependencies":["step-0","step-1"]}
        ]}"#;
        let provider = Arc::new(
            MockProvider::new()
                .with_text(plan)
                .with_text("left done")
                .with_text("right done")
                .with_text("joined"),
        );
        let agent = Agent::new("a", "m", provider);
        let strategy = PlanExecuteStrategy::new();

        let execution = strategy
            .execute(&RunContext::new(), &agent, "do both then join")
            .await
            .unwrap();

        assert_eq!(execution.status, ExecutionStatus::Completed);
        let history: Vec<Plan> =
            serde_json::from_value(execution.metadata["plan_history"].clone()).unwrap();
        let plan = &history[0];
        // The join step started only after both predecessors ended.
        let join_start = plan.step("step-2").unwrap().start_time.unwrap();
        for id in ["step-0", "step-1"] {
            assert!(plan.step(id).unwrap().end_time.unwrap() <= join_start);
        }
    }

    #[tokio::test]
    async fn missing_tool_fails_step_then_replan_recovers() {
        let failing_plan = r#"{"steps":[
            {"description":"create endpoint","tools":[],"dependencies":[]},
            {"description":"register webhook","tools":["registrar"],"dependencies":["step-0"]},
            {"description":"send test event","tools":[],"dependencies":["step-1"]}
        ]}"#;
        let revised_plan = r#"{"steps":[
            {"description":"create endpoint","tools":[],"dependencies":[]},
            {"description":"register webhook with the fallback registrar","tools":["fallback_registrar"],"dependencies":["step-0"]},
            {"description":"send test event","tools":[],"dependencies":["step-1"]}
        ]}"#;
        let provider = Arc::new(
            MockProvider::new()
                .with_text(failing_plan)
                .with_text("endpoint created")
                .with_text(revised_plan)
                .with_text("endpoint created")
                .with_text("webhook registered")
                .with_text("test event delivered"),
        );
        let agent = Agent::new("a", "m", provider).tools(tools_with(&["fallback_registrar"]));
        let strategy = PlanExecuteStrategy::new();

        let execution = strategy
            .execute(&RunContext::new(), &agent, "Set up and test webhook")
            .await
            .unwrap();

        assert_eq!(execution.status, ExecutionStatus::Completed);
        let history: Vec<Plan> =
            serde_json::from_value(execution.metadata["plan_history"].clone()).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].status, PlanStatus::Failed);
        assert_eq!(history[1].status, PlanStatus::Completed);
        assert_eq!(
            history[1].parent_plan_id.as_deref(),
            Some(history[0].id.as_str())
        );
        assert_eq!(history[1].version, 2);
        assert_eq!(execution.metadata["replan_count"], 1);
    }

    #[tokio::test]
    async fn replanning_disabled_fails_fast() {
        let failing_plan = r#"{"steps":[
            {"description":"use missing tool","tools":["ghost"],"dependencies":[]}
        ]}"#;
        let provider = Arc::new(MockProvider::new().with_text(failing_plan));
        let agent = Agent::new("a", "m", provider);
        let strategy = PlanExecuteStrategy::new().max_replan_attempts(0);

        let execution = strategy
            .execute(&RunContext::new(), &agent, "task")
            .await
            .unwrap();

        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert!(execution
            .error
            .as_deref()
            .unwrap()
            .contains("replanning is disabled"));
    }

    #[tokio::test]
    async fn unparseable_plan_fails_the_planning_phase() {
        let provider = Arc::new(MockProvider::new().with_text("I refuse to plan"));
        let agent = Agent::new("a", "m", provider);
        let strategy = PlanExecuteStrategy::new();

        let execution = strategy
            .execute(&RunContext::new(), &agent, "task")
            .await
            .unwrap();

        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert!(execution.error.as_deref().unwrap().contains("planning failed"));
    }

    #[tokio::test]
    async fn cyclic_plan_fails_structural_verification() {
        let cyclic = r#"{"steps":[
            {"description":"a","tools":[],"dependencies":["step-1"]},
            {"description":"b","tools":[],"dependencies":["step-0"]}
        ]}"#;
        let provider = Arc::new(MockProvider::new().with_text(cyclic));
        let agent = Agent::new("a", "m", provider);
        let strategy = PlanExecuteStrategy::new();

        let execution = strategy
            .execute(&RunContext::new(), &agent, "task")
            .await
            .unwrap();

        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert!(execution
            .error
            .as_deref()
            .unwrap()
            .contains("structural verification"));
    }

    #[tokio::test]
    async fn steps_with_tools_route_through_the_registry() {
        let plan = r#"{"steps":[
            {"description":"look something up","tools":["search"],"dependencies":[]}
        ]}"#;
        let tool_call_response = crate::provider::ChatResponse::new(
            ChatMessage::assistant_tool_calls(vec![crate::message::ToolCall::function(
                "tc_1",
                "search",
                r#"{"q":"thing"}"#,
            )]),
        );
        let provider = Arc::new(
            MockProvider::new()
                .with_text(plan)
                .with_response(tool_call_response)
                .with_text("found it"),
        );
        let agent = Agent::new("a", "m", provider.clone()).tools(tools_with(&["search"]));
        let strategy = PlanExecuteStrategy::new();

        let execution = strategy
            .execute(&RunContext::new(), &agent, "task")
            .await
            .unwrap();

        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(execution.final_output, "found it");
        // The step's second model call carries the tool exchange.
        let third = &provider.requests()[2];
        let roles: Vec<&str> = third.messages.iter().map(|m| m.role.as_str()).collect();
        assert!(roles.ends_with(&["assistant", "tool"]));
    }

    #[tokio::test]
    async fn plans_are_persisted_through_the_store() {
        let store = Arc::new(InMemoryPlanStore::new());
        let provider = Arc::new(
            MockProvider::new()
                .with_text(LINEAR_PLAN)
                .with_text("one")
                .with_text("two"),
        );
        let agent = Agent::new("a", "m", provider);
        let strategy = PlanExecuteStrategy::new().plan_store(store.clone());

        let execution = strategy
            .execute(&RunContext::new(), &agent, "task")
            .await
            .unwrap();

        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(store.len().await, 1);
        let stored = store.list(&agent.id).await.unwrap();
        assert_eq!(stored[0].status, PlanStatus::Completed);
    }

    #[tokio::test]
    async fn cancellation_mid_run_yields_cancelled() {
        let provider = Arc::new(MockProvider::new().with_text(LINEAR_PLAN));
        let agent = Agent::new("a", "m", provider);
        let strategy = PlanExecuteStrategy::new();

        let ctx = RunContext::new();
        ctx.cancellation.cancel();
        let execution = strategy.execute(&ctx, &agent, "task").await.unwrap();

        assert_eq!(execution.status, ExecutionStatus::Cancelled);
    }
}
