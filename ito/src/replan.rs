//! Replanning: deriving a revised plan from a failed one.
//!
//! A prioritized trigger table decides *whether* to replan; a keyword
//! classifier names the failure pattern and counts its recurrences; the
//! revision prompt is seeded with the annotated step list, the failure
//! context, and — when memory is attached — plans that previously succeeded
//! or failed for the same goal. The new plan supplants the old completely,
//! keeping only the parent link.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::PlanError;
use crate::memory::MemoryManager;
use crate::plan::Plan;
use crate::provider::{ChatRequest, SharedChatProvider};
use crate::reflection::{ReflectionQuality, ReflectionResult};
use crate::tool::ToolDefinition;

/// Planner temperature for revisions; higher than judging, for variety.
pub const REPLAN_TEMPERATURE: f32 = 0.7;

/// A condition that warrants replanning, with its priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplanTrigger {
    /// Trigger name.
    pub name: &'static str,
    /// Priority; higher wins when several conditions hold.
    pub priority: u8,
}

/// The trigger table, in descending priority order.
pub const TRIGGERS: [ReplanTrigger; 5] = [
    ReplanTrigger {
        name: "invalid_plan",
        priority: 100,
    },
    ReplanTrigger {
        name: "explicit_replan_flag",
        priority: 95,
    },
    ReplanTrigger {
        name: "low_quality_score",
        priority: 90,
    },
    ReplanTrigger {
        name: "critical_step_failure",
        priority: 85,
    },
    ReplanTrigger {
        name: "multiple_step_failures",
        priority: 80,
    },
];

/// Evaluate the trigger table.
///
/// Returns the highest-priority trigger whose condition holds, if any.
#[must_use]
pub fn evaluate_triggers(
    reflection: Option<&ReflectionResult>,
    plan: &Plan,
) -> Option<ReplanTrigger> {
    let failed = plan.failed_steps();
    let independent_failure = failed.iter().any(|s| s.dependencies.is_empty());
    let majority_failed = !plan.steps.is_empty() && failed.len() * 2 > plan.steps.len();

    for trigger in TRIGGERS {
        let fires = match trigger.name {
            "invalid_plan" => {
                reflection.is_some_and(|r| r.quality == ReflectionQuality::Invalid)
            }
            "explicit_replan_flag" => reflection.is_some_and(|r| r.should_replan),
            "low_quality_score" => reflection.is_some_and(|r| r.score < 0.5),
            "critical_step_failure" => independent_failure,
            "multiple_step_failures" => majority_failed,
            _ => false,
        };
        if fires {
            return Some(trigger);
        }
    }
    None
}

/// A named failure pattern, classified from the failure context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum FailurePattern {
    /// Steps blocked on missing or wrong dependencies.
    DependencyIssue,
    /// A needed tool was unavailable or unknown.
    ToolAvailability,
    /// Work exceeded its deadline.
    Timeout,
    /// The plan did not cover the goal.
    IncompletePlan,
    /// The plan's reasoning was unsound.
    InvalidLogic,
    /// More than half the steps failed.
    MultipleStepFailures,
    /// Anything else.
    GeneralFailure,
}

impl FailurePattern {
    /// Pattern tag used in counters and memory entries.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::DependencyIssue => "dependency_issue",
            Self::ToolAvailability => "tool_availability",
            Self::Timeout => "timeout",
            Self::IncompletePlan => "incomplete_plan",
            Self::InvalidLogic => "invalid_logic",
            Self::MultipleStepFailures => "multiple_step_failures",
            Self::GeneralFailure => "general_failure",
        }
    }

    /// Classify a failure context by keyword scan.
    #[must_use]
    pub fn classify(context: &str, plan: &Plan) -> Self {
        let lower = context.to_lowercase();
        let failed = plan.failed_steps().len();
        if !plan.steps.is_empty() && failed * 2 > plan.steps.len() {
            return Self::MultipleStepFailures;
        }
        if lower.contains("dependency") || lower.contains("depends") {
            Self::DependencyIssue
        } else if lower.contains("tool not found")
            || lower.contains("tool_availability")
            || lower.contains("no such tool")
            || lower.contains("unavailable")
        {
            Self::ToolAvailability
        } else if lower.contains("timed out") || lower.contains("timeout") {
            Self::Timeout
        } else if lower.contains("incomplete") || lower.contains("missing step") {
            Self::IncompletePlan
        } else if lower.contains("invalid") || lower.contains("illogical") {
            Self::InvalidLogic
        } else {
            Self::GeneralFailure
        }
    }
}

impl std::fmt::Display for FailurePattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The replan engine.
pub struct ReplanEngine {
    provider: SharedChatProvider,
    model: String,
    memory: Option<Arc<MemoryManager>>,
    learning_enabled: bool,
    max_examples: usize,
    // Hot-path cache of pattern counts; the durable signal lives in memory.
    pattern_counts: Mutex<HashMap<&'static str, u32>>,
}

impl std::fmt::Debug for ReplanEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplanEngine")
            .field("model", &self.model)
            .field("learning_enabled", &self.learning_enabled)
            .finish_non_exhaustive()
    }
}

impl ReplanEngine {
    /// Create an engine over the given planner model.
    #[must_use]
    pub fn new(provider: SharedChatProvider, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            memory: None,
            learning_enabled: false,
            max_examples: 3,
            pattern_counts: Mutex::new(HashMap::new()),
        }
    }

    /// Attach memory and enable failure-pattern learning.
    #[must_use]
    pub fn with_memory(mut self, memory: Arc<MemoryManager>) -> Self {
        self.memory = Some(memory);
        self.learning_enabled = true;
        self
    }

    /// Cap the number of recalled example plans per outcome.
    #[must_use]
    pub const fn with_max_examples(mut self, max_examples: usize) -> Self {
        self.max_examples = max_examples;
        self
    }

    /// Current count for a pattern.
    pub async fn pattern_count(&self, pattern: FailurePattern) -> u32 {
        let counts = self.pattern_counts.lock().await;
        counts.get(pattern.as_str()).copied().unwrap_or(0)
    }

    async fn learn_pattern(&self, pattern: FailurePattern, plan: &Plan, context: &str) {
        {
            let mut counts = self.pattern_counts.lock().await;
            *counts.entry(pattern.as_str()).or_insert(0) += 1;
        }
        if !self.learning_enabled {
            return;
        }
        if let Some(memory) = &self.memory {
            let mut metadata = HashMap::new();
            metadata.insert("tier".to_owned(), json!("long_term"));
            metadata.insert("type".to_owned(), json!("failure_pattern"));
            metadata.insert("pattern".to_owned(), json!(pattern.as_str()));
            metadata.insert("goal".to_owned(), json!(plan.goal));
            let content = format!(
                "Failure pattern '{pattern}' while pursuing '{}': {context}",
                plan.goal
            );
            if let Err(err) = memory.store(content, metadata, 0.8).await {
                debug!(error = %err, "Failed to persist failure pattern");
            }
        }
    }

    async fn learnings_block(&self, goal: &str) -> String {
        let Some(memory) = &self.memory else {
            return String::new();
        };

        let mut block = String::new();
        if let Ok(wins) = memory.recall_plans(goal, true, self.max_examples).await
            && !wins.is_empty()
        {
            block.push_str("Plans that previously worked for similar goals:\n");
            for entry in wins {
                block.push_str(&format!("- {}\n", entry.content));
            }
        }
        if let Ok(losses) = memory.recall_plans(goal, false, self.max_examples).await
            && !losses.is_empty()
        {
            block.push_str("Plans that previously failed, and how:\n");
            for entry in losses {
                block.push_str(&format!("- {}\n", entry.content));
            }
        }
        block
    }

    async fn known_patterns_block(&self) -> String {
        let counts = self.pattern_counts.lock().await;
        let mut recurring: Vec<(&str, u32)> = counts
            .iter()
            .filter(|(_, count)| **count > 1)
            .map(|(name, count)| (*name, *count))
            .collect();
        drop(counts);
        if recurring.is_empty() {
            return String::new();
        }
        recurring.sort_by(|a, b| b.1.cmp(&a.1));
        let mut block = String::from("Recurring failure patterns to avoid:\n");
        for (name, count) in recurring {
            block.push_str(&format!("- {name} (seen {count} times)\n"));
        }
        block
    }

    /// Build a revised plan for `plan` given the failure context.
    ///
    /// The revision links back to the parent, bumps the version, and is
    /// tagged with the replan reason.
    pub async fn replan(
        &self,
        plan: &Plan,
        failure_context: &str,
        tools: &[ToolDefinition],
        reason: &str,
    ) -> Result<Plan, PlanError> {
        let pattern = FailurePattern::classify(failure_context, plan);
        info!(pattern = %pattern, reason, plan_id = %plan.id, "Replanning");
        self.learn_pattern(pattern, plan, failure_context).await;

        let tool_catalog = if tools.is_empty() {
            "none".to_owned()
        } else {
            tools
                .iter()
                .map(|t| format!("- {}: {}", t.name, t.description))
                .collect::<Vec<_>>()
                .join("\n")
        };

        let learnings = self.learnings_block(&plan.goal).await;
        let known_patterns = self.known_patterns_block().await;

        let prompt = format!(
            "The plan below failed and must be revised.\n\n\
             Goal: {goal}\n\n\
             Current plan:\n{annotated}\n\
             Failure: {failure_context}\n\n\
             {learnings}{known_patterns}\
             Available tools:\n{tool_catalog}\n\n\
             Produce a corrected plan that keeps completed work, avoids the failure above, \
             and reaches the goal. Respond with a JSON object of the form \
             {{\"steps\":[{{\"description\":\"...\",\"tools\":[\"...\"],\"dependencies\":[\"step-0\"]}}]}}.",
            goal = plan.goal,
            annotated = plan.format_annotated(),
        );

        let request = ChatRequest::new(&self.model)
            .system("You revise execution plans for an autonomous agent.")
            .user(prompt)
            .temperature(REPLAN_TEMPERATURE);

        let response = self
            .provider
            .chat(&request)
            .await
            .map_err(|e| PlanError::Parse(format!("planner call failed: {e}")))?;

        let mut revision = plan.derive_revision(response.text())?;
        revision
            .metadata
            .insert("replan_reason".to_owned(), json!(reason));
        revision
            .metadata
            .insert("failure_pattern".to_owned(), json!(pattern.as_str()));
        revision.metadata.insert(
            "replanned_at".to_owned(),
            json!(chrono::Utc::now().to_rfc3339()),
        );

        if let Some(memory) = &self.memory
            && let Err(err) = memory
                .store_plan_outcome(plan, false, failure_context)
                .await
        {
            debug!(error = %err, "Failed to persist failed plan");
        }

        Ok(revision)
    }
}
