//! Plan verification: structural checks plus an LLM-judged quality pass.
//!
//! The two passes are independent and blended by weight (structural 0.4,
//! semantic 0.6). A structurally hopeless plan (score below 0.3) skips the
//! semantic pass entirely; composition beyond that is left to callers.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::GenerateError;
use crate::plan::{Plan, PlanStep};
use crate::provider::{ChatRequest, SharedChatProvider};
use crate::reflection::{JUDGE_TEMPERATURE, parse_judgment};

/// Default validity threshold.
pub const DEFAULT_QUALITY_THRESHOLD: f64 = 0.7;

/// Outcome of a verification pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationResult {
    /// Whether the subject passed the threshold.
    pub is_valid: bool,
    /// Score in `[0, 1]`.
    pub score: f64,
    /// Hard problems found.
    #[serde(default)]
    pub issues: Vec<String>,
    /// Soft improvements proposed.
    #[serde(default)]
    pub suggestions: Vec<String>,
    /// Explanation of the verdict.
    #[serde(default)]
    pub reasoning: String,
    /// When the verification ran.
    pub timestamp: DateTime<Utc>,
}

impl VerificationResult {
    fn new(score: f64, threshold: f64, reasoning: impl Into<String>) -> Self {
        let score = score.clamp(0.0, 1.0);
        Self {
            is_valid: score >= threshold,
            score,
            issues: Vec::new(),
            suggestions: Vec::new(),
            reasoning: reasoning.into(),
            timestamp: Utc::now(),
        }
    }
}

/// The plan verifier.
#[derive(Clone)]
pub struct PlanVerifier {
    provider: Option<SharedChatProvider>,
    model: String,
    quality_threshold: f64,
    structural_weight: f64,
    semantic_weight: f64,
}

impl std::fmt::Debug for PlanVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanVerifier")
            .field("model", &self.model)
            .field("quality_threshold", &self.quality_threshold)
            .finish_non_exhaustive()
    }
}

impl Default for PlanVerifier {
    fn default() -> Self {
        Self::structural_only()
    }
}

impl PlanVerifier {
    /// Create a verifier that runs both passes.
    #[must_use]
    pub fn new(provider: SharedChatProvider, model: impl Into<String>) -> Self {
        Self {
            provider: Some(provider),
            model: model.into(),
            quality_threshold: DEFAULT_QUALITY_THRESHOLD,
            structural_weight: 0.4,
            semantic_weight: 0.6,
        }
    }

    /// Create a verifier with no judge; only structural checks run.
    #[must_use]
    pub fn structural_only() -> Self {
        Self {
            provider: None,
            model: String::new(),
            quality_threshold: DEFAULT_QUALITY_THRESHOLD,
            structural_weight: 0.4,
            semantic_weight: 0.6,
        }
    }

    /// Set the validity threshold.
    #[must_use]
    pub const fn with_quality_threshold(mut self, threshold: f64) -> Self {
        self.quality_threshold = threshold;
        self
    }

    /// Structural pass: emptiness, dependency validity, acyclicity, orphans.
    #[must_use]
    pub fn verify_structure(&self, plan: &Plan) -> VerificationResult {
        if plan.steps.is_empty() {
            let mut result =
                VerificationResult::new(0.0, self.quality_threshold, "plan has no steps");
            result.issues.push("Plan has no steps".to_owned());
            return result;
        }

        let ids: HashSet<&str> = plan.steps.iter().map(|s| s.id.as_str()).collect();
        let mut score = 1.0f64;
        let mut issues = Vec::new();
        let mut suggestions = Vec::new();

        if ids.len() != plan.steps.len() {
            score -= 0.2;
            issues.push("Plan contains duplicate step ids".to_owned());
        }

        for step in &plan.steps {
            for dep in &step.dependencies {
                if !ids.contains(dep.as_str()) || dep == &step.id {
                    score -= 0.1;
                    issues.push(format!(
                        "Step {} depends on unknown step {dep}",
                        step.id
                    ));
                }
            }
        }

        if has_cycle(plan) {
            score = score.min(0.2);
            issues.push("Plan contains circular dependencies".to_owned());
        }

        // Orphans: nothing depends on them and they are not the final step.
        let depended_on: HashSet<&str> = plan
            .steps
            .iter()
            .flat_map(|s| s.dependencies.iter().map(String::as_str))
            .collect();
        for step in plan.steps.iter().take(plan.steps.len().saturating_sub(1)) {
            if !depended_on.contains(step.id.as_str()) {
                score -= 0.05;
                suggestions.push(format!(
                    "Step {} feeds no later step; confirm it is needed",
                    step.id
                ));
            }
        }

        let mut result = VerificationResult::new(
            score,
            self.quality_threshold,
            "structural verification",
        );
        result.issues = issues;
        result.suggestions = suggestions;
        result.is_valid = result.score >= self.quality_threshold;
        result
    }

    /// Semantic pass: judge completeness, feasibility, efficiency, clarity,
    /// and tool usage.
    pub async fn verify_quality(
        &self,
        plan: &Plan,
    ) -> Result<VerificationResult, GenerateError> {
        let Some(provider) = &self.provider else {
            return Err(GenerateError::configuration(
                "semantic verification requires a judge provider",
            ));
        };

        let request = ChatRequest::new(&self.model)
            .system(
                "You review execution plans. Judge completeness, feasibility, efficiency, \
                 clarity, and tool usage. Respond with a JSON object {\"quality\": ..., \
                 \"score\": 0.0-1.0, \"issues\": [..], \"suggestions\": [..], \
                 \"reasoning\": \"..\"}.",
            )
            .user(format!(
                "Goal: {}\n\nPlan:\n{}",
                plan.goal,
                plan.format_annotated()
            ))
            .temperature(JUDGE_TEMPERATURE);

        let response = provider.chat(&request).await?;
        let judgment = parse_judgment(response.text());

        let mut result = VerificationResult::new(
            judgment.score,
            self.quality_threshold,
            judgment.reasoning,
        );
        result.issues = judgment.issues;
        result.suggestions = judgment.suggestions;
        Ok(result)
    }

    /// Combined verification.
    ///
    /// Runs the structural pass, short-circuits when it scores below 0.3 or
    /// no judge is configured, and otherwise blends both scores by weight.
    pub async fn verify(&self, plan: &Plan) -> Result<VerificationResult, GenerateError> {
        let structural = self.verify_structure(plan);
        if structural.score < 0.3 || self.provider.is_none() {
            return Ok(structural);
        }

        let semantic = self.verify_quality(plan).await?;
        let score = structural.score * self.structural_weight
            + semantic.score * self.semantic_weight;
        debug!(
            structural = structural.score,
            semantic = semantic.score,
            combined = score,
            "Plan verified"
        );

        let mut combined =
            VerificationResult::new(score, self.quality_threshold, semantic.reasoning);
        combined.issues = structural
            .issues
            .into_iter()
            .chain(semantic.issues)
            .collect();
        combined.suggestions = structural
            .suggestions
            .into_iter()
            .chain(semantic.suggestions)
            .collect();
        Ok(combined)
    }

    /// Verify one executed step's output against its description.
    pub async fn verify_step(
        &self,
        step: &PlanStep,
        output: &str,
    ) -> Result<VerificationResult, GenerateError> {
        let Some(provider) = &self.provider else {
            // Without a judge, accept the output as-is.
            return Ok(VerificationResult::new(
                1.0,
                self.quality_threshold,
                "no judge configured; accepted",
            ));
        };

        let request = ChatRequest::new(&self.model)
            .system(
                "You verify whether a step's output satisfies its description. Respond with a \
                 JSON object {\"quality\": ..., \"score\": 0.0-1.0, \"issues\": [..], \
                 \"suggestions\": [..], \"reasoning\": \"..\"}.",
            )
            .user(format!(
                "Step: {}\nOutput:\n{output}",
                step.description
            ))
            .temperature(JUDGE_TEMPERATURE);

        let response = provider.chat(&request).await?;
        let judgment = parse_judgment(response.text());
        let mut result = VerificationResult::new(
            judgment.score,
            self.quality_threshold,
            judgment.reasoning,
        );
        result.issues = judgment.issues;
        result.suggestions = judgment.suggestions;
        Ok(result)
    }
}

/// DFS cycle detection over the dependency graph.
fn has_cycle(plan: &Plan) -> bool {
    let mut visited: HashSet<&str> = HashSet::new();
    let mut rec_stack: HashSet<&str> = HashSet::new();

    fn visit<'a>(
        plan: &'a Plan,
        id: &'a str,
        visited: &mut HashSet<&'a str>,
        rec_stack: &mut HashSet<&'a str>,
    ) -> bool {
        if rec_stack.contains(id) {
            return true;
        }
        if visited.contains(id) {
            return false;
        }
        visited.insert(id);
        rec_stack.insert(id);
        if let Some(step) = plan.step(id) {
            for dep in &step.dependencies {
                if let Some(dep_step) = plan.step(dep)
                    && visit(plan, &dep_step.id, visited, rec_stack)
                {
                    return true;
                }
            }
        }
        rec_stack.remove(id);
        false
    }

    plan.steps
        .iter()
        .any(|step| visit(plan, &step.id, &mut visited, &mut rec_stack))
}
