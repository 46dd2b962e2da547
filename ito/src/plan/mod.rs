//! The plan model: ordered steps with dependencies, statuses, and lineage.
//!
//! A [`Plan`] is owned by the executing strategy for the duration of a run;
//! stores hand out deep clones, so persisted and in-memory plans never
//! alias. Dependency resolution is pull-based: callers repeatedly take
//! [`Plan::pending_steps`] — the pending steps whose dependencies are all
//! completed — until the set is empty. An empty set with unfinished steps
//! means the plan has stalled.

pub mod store;

pub use store::{CachingPlanStore, InMemoryPlanStore, PlanStore};

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::PlanError;
use crate::json_util;
use crate::verifier::VerificationResult;

/// Default retry budget per step.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Status of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    /// Created but not yet dispatched.
    #[default]
    Pending,
    /// At least one step has been dispatched.
    InProgress,
    /// Every step reached a terminal status and at least one completed.
    Completed,
    /// A terminal failure remained after retries and replanning.
    Failed,
    /// An external cancellation signal ended the run.
    Cancelled,
}

/// Status of a plan step.
///
/// `Completed`, `Failed`, and `Skipped` are sticky for a given plan
/// version; only a retry (which resets to `Pending`) may leave `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Waiting for dependencies or dispatch.
    #[default]
    Pending,
    /// Currently executing.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Intentionally not executed.
    Skipped,
}

impl StepStatus {
    /// Returns `true` for terminal statuses.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

/// One step of a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    /// Unique id within the plan.
    pub id: String,
    /// Zero-based position in the step list.
    pub index: usize,
    /// What this step should accomplish.
    pub description: String,
    /// Names of the tools this step expects to use.
    #[serde(default, alias = "tools")]
    pub tools_needed: Vec<String>,
    /// Ids of steps that must complete before this one may run.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Current status.
    #[serde(default)]
    pub status: StepStatus,
    /// Execution result, once completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure message, once failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Retries consumed so far.
    #[serde(default)]
    pub retries: u32,
    /// Retry budget.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Verification outcome attached after execution.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationResult>,
    /// When the step entered `Running`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    /// When the step reached a terminal status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Extra step metadata.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

const fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

impl PlanStep {
    /// Create a pending step with the conventional `step-N` id.
    #[must_use]
    pub fn new(index: usize, description: impl Into<String>) -> Self {
        Self {
            id: format!("step-{index}"),
            index,
            description: description.into(),
            tools_needed: Vec::new(),
            dependencies: Vec::new(),
            status: StepStatus::Pending,
            result: None,
            error: None,
            retries: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            verification: None,
            start_time: None,
            end_time: None,
            metadata: HashMap::new(),
        }
    }

    /// Set the tools this step needs.
    #[must_use]
    pub fn with_tools(mut self, tools: Vec<String>) -> Self {
        self.tools_needed = tools;
        self
    }

    /// Set the step's dependencies.
    #[must_use]
    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// Whether a failed step still has retry budget.
    #[must_use]
    pub const fn can_retry(&self) -> bool {
        matches!(self.status, StepStatus::Failed) && self.retries < self.max_retries
    }
}

/// The shape the planner LLM returns on the wire.
#[derive(Debug, Deserialize)]
struct PlannerDocument {
    steps: Vec<PlannerStep>,
}

#[derive(Debug, Deserialize)]
struct PlannerStep {
    description: String,
    #[serde(default, alias = "tools_needed")]
    tools: Vec<String>,
    #[serde(default)]
    dependencies: Vec<Value>,
}

/// A plan: goal, ordered steps, status, and replan lineage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// Unique plan id.
    pub id: String,
    /// Id of the agent this plan belongs to.
    pub agent_id: String,
    /// The goal the plan pursues.
    pub goal: String,
    /// Ordered steps.
    #[serde(default)]
    pub steps: Vec<PlanStep>,
    /// Current status.
    #[serde(default)]
    pub status: PlanStatus,
    /// Version, starting at 1 and incremented per replan.
    pub version: u32,
    /// Id of the plan this one revises, when replanned.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_plan_id: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
    /// Extra plan metadata.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

impl Plan {
    /// Create an empty pending plan at version 1.
    #[must_use]
    pub fn new(agent_id: impl Into<String>, goal: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            agent_id: agent_id.into(),
            goal: goal.into(),
            steps: Vec::new(),
            status: PlanStatus::Pending,
            version: 1,
            parent_plan_id: None,
            created_at: now,
            updated_at: now,
            metadata: HashMap::new(),
        }
    }

    /// Materialize a plan from a planner response.
    ///
    /// The response may wrap the JSON document in prose; the span from the
    /// first `{` to the last `}` is parsed as
    /// `{"steps":[{"description", "tools", "dependencies"}]}`. Dependency
    /// entries may be step ids (`"step-0"`) or raw indices.
    pub fn from_planner_json(
        agent_id: &str,
        goal: &str,
        response: &str,
    ) -> Result<Self, PlanError> {
        let document: PlannerDocument = json_util::parse_json_span(response)
            .map_err(|e| PlanError::Parse(e.to_string()))?;
        if document.steps.is_empty() {
            return Err(PlanError::Parse("planner returned no steps".to_owned()));
        }

        let mut plan = Self::new(agent_id, goal);
        plan.steps = document
            .steps
            .into_iter()
            .enumerate()
            .map(|(index, raw)| {
                let dependencies = raw
                    .dependencies
                    .iter()
                    .filter_map(|dep| match dep {
                        Value::String(s) => Some(s.clone()),
                        Value::Number(n) => n.as_u64().map(|i| format!("step-{i}")),
                        _ => None,
                    })
                    .collect();
                PlanStep::new(index, raw.description)
                    .with_tools(raw.tools)
                    .with_dependencies(dependencies)
            })
            .collect();
        Ok(plan)
    }

    /// Look up a step by id.
    #[must_use]
    pub fn step(&self, id: &str) -> Option<&PlanStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Look up a step mutably by id.
    pub fn step_mut(&mut self, id: &str) -> Option<&mut PlanStep> {
        self.steps.iter_mut().find(|s| s.id == id)
    }

    /// The pending steps whose dependencies are all completed.
    #[must_use]
    pub fn pending_steps(&self) -> Vec<&PlanStep> {
        let completed: HashSet<&str> = self
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .map(|s| s.id.as_str())
            .collect();

        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Pending)
            .filter(|s| {
                s.dependencies
                    .iter()
                    .all(|dep| completed.contains(dep.as_str()))
            })
            .collect()
    }

    /// Whether every step is terminal with at least one completed and none
    /// failed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.steps.is_empty()
            && self.steps.iter().all(|s| {
                matches!(s.status, StepStatus::Completed | StepStatus::Skipped)
            })
            && self.steps.iter().any(|s| s.status == StepStatus::Completed)
    }

    /// Whether no step can make progress while unfinished steps remain.
    #[must_use]
    pub fn has_stalled(&self) -> bool {
        self.pending_steps().is_empty()
            && self
                .steps
                .iter()
                .any(|s| matches!(s.status, StepStatus::Pending | StepStatus::Failed))
            && !self.steps.iter().any(|s| s.status == StepStatus::Running)
    }

    /// Mark a step running.
    ///
    /// Refuses when any dependency is not completed, which preserves the
    /// dependency invariant even under a buggy scheduler.
    pub fn start_step(&mut self, id: &str) -> Result<(), PlanError> {
        let unmet: Vec<String> = {
            let Some(step) = self.step(id) else {
                return Err(PlanError::Execution(format!("unknown step: {id}")));
            };
            step.dependencies
                .iter()
                .filter(|dep| {
                    self.step(dep)
                        .is_none_or(|d| d.status != StepStatus::Completed)
                })
                .cloned()
                .collect()
        };
        if !unmet.is_empty() {
            return Err(PlanError::Execution(format!(
                "step {id} has unmet dependencies: {}",
                unmet.join(", ")
            )));
        }

        if let Some(step) = self.step_mut(id) {
            step.status = StepStatus::Running;
            step.start_time = Some(Utc::now());
        }
        self.status = PlanStatus::InProgress;
        self.touch();
        Ok(())
    }

    /// Mark a step completed with its result.
    pub fn complete_step(&mut self, id: &str, result: Value) {
        if let Some(step) = self.step_mut(id) {
            step.status = StepStatus::Completed;
            step.result = Some(result);
            step.error = None;
            step.end_time = Some(Utc::now());
        }
        self.touch();
    }

    /// Mark a step failed with an error message.
    pub fn fail_step(&mut self, id: &str, error: impl Into<String>) {
        if let Some(step) = self.step_mut(id) {
            step.status = StepStatus::Failed;
            step.error = Some(error.into());
            step.end_time = Some(Utc::now());
        }
        self.touch();
    }

    /// Consume one retry for a failed step, resetting it to pending.
    ///
    /// Returns `false` when the step cannot retry.
    pub fn schedule_retry(&mut self, id: &str) -> bool {
        let retried = self.step_mut(id).is_some_and(|step| {
            if step.can_retry() {
                step.retries += 1;
                step.status = StepStatus::Pending;
                step.error = None;
                step.start_time = None;
                step.end_time = None;
                true
            } else {
                false
            }
        });
        if retried {
            self.touch();
        }
        retried
    }

    /// Completed steps as `(id, description, result)` triples, in order.
    #[must_use]
    pub fn completed_steps(&self) -> Vec<&PlanStep> {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .collect()
    }

    /// Failed steps, in order.
    #[must_use]
    pub fn failed_steps(&self) -> Vec<&PlanStep> {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Failed)
            .collect()
    }

    /// Progress as a percentage of completed steps. Observability only.
    #[must_use]
    pub fn progress(&self) -> f64 {
        if self.steps.is_empty() {
            return 0.0;
        }
        let completed = self
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .count();
        completed as f64 / self.steps.len() as f64 * 100.0
    }

    /// Render the step list with status marks for prompts:
    /// `✓` completed with result, `✗` failed with error, `○` otherwise.
    #[must_use]
    pub fn format_annotated(&self) -> String {
        let mut out = String::new();
        for step in &self.steps {
            let line = match step.status {
                StepStatus::Completed => {
                    let result = step
                        .result
                        .as_ref()
                        .map(json_util::to_json_or_display)
                        .unwrap_or_default();
                    format!("✓ {}: {} — Result: {result}\n", step.id, step.description)
                }
                StepStatus::Failed => format!(
                    "✗ {}: {} — Error: {}\n",
                    step.id,
                    step.description,
                    step.error.as_deref().unwrap_or("unknown")
                ),
                _ => format!("○ {}: {}\n", step.id, step.description),
            };
            out.push_str(&line);
        }
        out
    }

    /// Derive the revision of this plan from a planner response.
    ///
    /// The new plan keeps the goal and agent, links back via
    /// `parent_plan_id`, and bumps the version.
    pub fn derive_revision(&self, response: &str) -> Result<Self, PlanError> {
        let mut revision = Self::from_planner_json(&self.agent_id, &self.goal, response)?;
        revision.parent_plan_id = Some(self.id.clone());
        revision.version = self.version + 1;
        Ok(revision)
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn linear_plan() -> Plan {
        let mut plan = Plan::new("agent-1", "test goal");
        plan.steps = vec![
            PlanStep::new(0, "first"),
            PlanStep::new(1, "second").with_dependencies(vec!["step-0".to_owned()]),
            PlanStep::new(2, "third").with_dependencies(vec!["step-1".to_owned()]),
        ];
        plan
    }

    fn diamond_plan() -> Plan {
        let mut plan = Plan::new("agent-1", "diamond");
        plan.steps = vec![
            PlanStep::new(0, "root"),
            PlanStep::new(1, "left").with_dependencies(vec!["step-0".to_owned()]),
            PlanStep::new(2, "right").with_dependencies(vec!["step-0".to_owned()]),
            PlanStep::new(3, "join")
                .with_dependencies(vec!["step-1".to_owned(), "step-2".to_owned()]),
        ];
        plan
    }

    mod parsing {
        use super::*;

        #[test]
        fn parses_wire_document() {
            let response = r#"Here is my plan:
            { "steps":[
              { "description":"Search for capital of France", "tools":["search"], "dependencies":[] },
              { "description":"Find population of that city",  "tools":["search"], "dependencies":["step-0"] }
            ] }
            Good luck!"#;

            let plan = Plan::from_planner_json("agent-1", "capitals", response).unwrap();
            assert_eq!(plan.steps.len(), 2);
            assert_eq!(plan.version, 1);
            assert_eq!(plan.status, PlanStatus::Pending);
            assert_eq!(plan.steps[0].id, "step-0");
            assert_eq!(plan.steps[1].dependencies, vec!["step-0"]);
            assert_eq!(plan.steps[1].tools_needed, vec!["search"]);
        }

        #[test]
        fn numeric_dependencies_become_step_ids() {
            let response = r#"{"steps":[
                {"description":"a","tools":[],"dependencies":[]},
                {"description":"b","tools":[],"dependencies":[0]}
            ]}"#;
            let plan = Plan::from_planner_json("a", "g", response).unwrap();
            assert_eq!(plan.steps[1].dependencies, vec!["step-0"]);
        }

        #[test]
        fn empty_steps_is_a_parse_error() {
            let err = Plan::from_planner_json("a", "g", r#"{"steps":[]}"#).unwrap_err();
            assert!(matches!(err, PlanError::Parse(_)));
        }

        #[test]
        fn prose_without_json_is_a_parse_error() {
            let err = Plan::from_planner_json("a", "g", "I cannot plan this").unwrap_err();
            assert!(matches!(err, PlanError::Parse(_)));
        }
    }

    mod resolution {
        use super::*;

        #[test]
        fn only_root_is_initially_pending_executable() {
            let plan = linear_plan();
            let pending = plan.pending_steps();
            assert_eq!(pending.len(), 1);
            assert_eq!(pending[0].id, "step-0");
        }

        #[test]
        fn successive_rounds_form_topological_order() {
            let mut plan = diamond_plan();
            let mut order = Vec::new();

            loop {
                let batch: Vec<String> =
                    plan.pending_steps().iter().map(|s| s.id.clone()).collect();
                if batch.is_empty() {
                    break;
                }
                for id in batch {
                    plan.start_step(&id).unwrap();
                    plan.complete_step(&id, json!("ok"));
                    order.push(id);
                }
            }

            assert_eq!(order.len(), 4);
            let position = |id: &str| order.iter().position(|o| o == id).unwrap();
            assert!(position("step-0") < position("step-1"));
            assert!(position("step-0") < position("step-2"));
            assert!(position("step-1") < position("step-3"));
            assert!(position("step-2") < position("step-3"));
            assert!(plan.is_complete());
        }

        #[test]
        fn start_step_refuses_unmet_dependencies() {
            let mut plan = linear_plan();
            let err = plan.start_step("step-1").unwrap_err();
            assert!(err.to_string().contains("unmet dependencies"));
        }

        #[test]
        fn stalled_when_failure_blocks_the_rest() {
            let mut plan = linear_plan();
            plan.start_step("step-0").unwrap();
            plan.fail_step("step-0", "boom");
            // Exhaust the retry budget so the failure is terminal.
            while plan.schedule_retry("step-0") {
                plan.start_step("step-0").unwrap();
                plan.fail_step("step-0", "boom");
            }

            assert!(plan.pending_steps().is_empty());
            assert!(plan.has_stalled());
            assert!(!plan.is_complete());
        }
    }

    mod retries {
        use super::*;

        #[test]
        fn retry_consumes_budget_and_resets_state() {
            let mut plan = linear_plan();
            plan.start_step("step-0").unwrap();
            plan.fail_step("step-0", "transient");

            assert!(plan.schedule_retry("step-0"));
            let step = plan.step("step-0").unwrap();
            assert_eq!(step.status, StepStatus::Pending);
            assert_eq!(step.retries, 1);
            assert!(step.error.is_none());
            assert!(step.start_time.is_none());
        }

        #[test]
        fn retry_exhausts_at_max() {
            let mut plan = linear_plan();
            for _ in 0..DEFAULT_MAX_RETRIES {
                plan.start_step("step-0").unwrap();
                plan.fail_step("step-0", "boom");
                plan.schedule_retry("step-0");
            }
            plan.start_step("step-0").unwrap();
            plan.fail_step("step-0", "boom");
            assert!(!plan.schedule_retry("step-0"));
        }

        #[test]
        fn completed_step_cannot_retry() {
            let mut plan = linear_plan();
            plan.start_step("step-0").unwrap();
            plan.complete_step("step-0", json!("done"));
            assert!(!plan.schedule_retry("step-0"));
        }
    }

    mod lineage {
        use super::*;

        #[test]
        fn derive_revision_links_parent_and_bumps_version() {
            let parent = linear_plan();
            let revision = parent
                .derive_revision(r#"{"steps":[{"description":"retry differently"}]}"#)
                .unwrap();

            assert_eq!(revision.parent_plan_id.as_deref(), Some(parent.id.as_str()));
            assert_eq!(revision.version, parent.version + 1);
            assert_eq!(revision.goal, parent.goal);
            assert_eq!(revision.agent_id, parent.agent_id);
        }
    }

    mod reporting {
        use super::*;

        #[test]
        fn progress_percentage() {
            let mut plan = linear_plan();
            assert!((plan.progress() - 0.0).abs() < f64::EPSILON);
            plan.start_step("step-0").unwrap();
            plan.complete_step("step-0", json!("ok"));
            assert!((plan.progress() - 100.0 / 3.0).abs() < 1e-9);
        }

        #[test]
        fn annotated_format_marks_statuses() {
            let mut plan = linear_plan();
            plan.start_step("step-0").unwrap();
            plan.complete_step("step-0", json!("done"));
            plan.step_mut("step-1").unwrap().status = StepStatus::Failed;
            plan.step_mut("step-1").unwrap().error = Some("no tool".to_owned());

            let annotated = plan.format_annotated();
            assert!(annotated.contains("✓ step-0"));
            assert!(annotated.contains("✗ step-1"));
            assert!(annotated.contains("○ step-2"));
            assert!(annotated.contains("no tool"));
        }
    }

    mod serde_roundtrip {
        use super::*;

        #[test]
        fn clone_then_serialize_then_deserialize_is_equal() {
            let mut plan = diamond_plan();
            plan.start_step("step-0").unwrap();
            plan.complete_step("step-0", json!({"value": 1}));

            let clone = plan.clone();
            let json = serde_json::to_string(&clone).unwrap();
            let parsed: Plan = serde_json::from_str(&json).unwrap();

            assert_eq!(parsed.id, plan.id);
            assert_eq!(parsed.version, plan.version);
            assert_eq!(parsed.steps.len(), plan.steps.len());
            assert_eq!(parsed.steps[0].status, StepStatus::Completed);
            assert_eq!(parsed.steps[0].result, plan.steps[0].result);
        }
    }
}
