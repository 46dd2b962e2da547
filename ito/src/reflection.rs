//! LLM-as-judge reflection over traces, steps, and plans.
//!
//! The engine scores work on weighted criteria at a low temperature and
//! parses the judge's answer leniently: a JSON object anywhere in the text
//! is preferred; otherwise keyword heuristics on the raw text decide
//! quality, and `issue:` / `suggestion:` lines are scraped into lists.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::agent::ReasoningTrace;
use crate::error::GenerateError;
use crate::json_util;
use crate::plan::Plan;
use crate::provider::{ChatRequest, SharedChatProvider};

/// Judge temperature; low for repeatable scoring.
pub const JUDGE_TEMPERATURE: f32 = 0.3;

/// Quality verdict of a reflection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReflectionQuality {
    /// The work is sound.
    Good,
    /// The work has fixable problems.
    NeedsImprovement,
    /// The work is wrong or incoherent.
    Invalid,
}

impl ReflectionQuality {
    /// Score to assume when the judge omits one.
    #[must_use]
    pub const fn default_score(&self) -> f64 {
        match self {
            Self::Good => 0.8,
            Self::NeedsImprovement => 0.6,
            Self::Invalid => 0.3,
        }
    }

    /// Parse a quality tag; unknown tags read as needs-improvement.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "good" => Self::Good,
            "invalid" => Self::Invalid,
            _ => Self::NeedsImprovement,
        }
    }
}

/// Outcome of one reflection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReflectionResult {
    /// The quality verdict.
    pub quality: ReflectionQuality,
    /// Score in `[0, 1]`.
    pub score: f64,
    /// Problems the judge found.
    #[serde(default)]
    pub issues: Vec<String>,
    /// Improvements the judge proposed.
    #[serde(default)]
    pub suggestions: Vec<String>,
    /// Whether the judge recommends replanning.
    #[serde(default)]
    pub should_replan: bool,
    /// The judge's explanation.
    #[serde(default)]
    pub reasoning: String,
}

/// A weighted evaluation criterion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Criterion {
    /// Criterion name as shown to the judge.
    pub name: String,
    /// Relative weight.
    pub weight: f64,
}

impl Criterion {
    /// Create a criterion.
    #[must_use]
    pub fn new(name: impl Into<String>, weight: f64) -> Self {
        Self {
            name: name.into(),
            weight,
        }
    }
}

/// The default criteria set.
#[must_use]
pub fn default_criteria() -> Vec<Criterion> {
    vec![
        Criterion::new("logical coherence", 0.30),
        Criterion::new("action appropriateness", 0.25),
        Criterion::new("completeness", 0.20),
        Criterion::new("efficiency", 0.15),
        Criterion::new("error handling", 0.10),
    ]
}

/// The reflection engine.
#[derive(Clone)]
pub struct ReflectionEngine {
    provider: SharedChatProvider,
    model: String,
    criteria: Vec<Criterion>,
    quality_threshold: f64,
}

impl std::fmt::Debug for ReflectionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReflectionEngine")
            .field("model", &self.model)
            .field("quality_threshold", &self.quality_threshold)
            .finish_non_exhaustive()
    }
}

impl ReflectionEngine {
    /// Create an engine over the given judge model.
    #[must_use]
    pub fn new(provider: SharedChatProvider, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            criteria: default_criteria(),
            quality_threshold: 0.7,
        }
    }

    /// Replace the criteria set.
    #[must_use]
    pub fn with_criteria(mut self, criteria: Vec<Criterion>) -> Self {
        self.criteria = criteria;
        self
    }

    /// Set the plan-quality threshold used by plan reflection.
    #[must_use]
    pub const fn with_quality_threshold(mut self, threshold: f64) -> Self {
        self.quality_threshold = threshold;
        self
    }

    fn criteria_block(&self) -> String {
        self.criteria
            .iter()
            .map(|c| format!("- {} (weight {:.2})", c.name, c.weight))
            .collect::<Vec<_>>()
            .join("\n")
    }

    async fn judge(&self, prompt: String) -> Result<ReflectionResult, GenerateError> {
        let request = ChatRequest::new(&self.model)
            .system(
                "You are a strict reviewer of agent reasoning. Respond with a JSON object \
                 {\"quality\": \"good\"|\"needs_improvement\"|\"invalid\", \"score\": 0.0-1.0, \
                 \"issues\": [..], \"suggestions\": [..], \"reasoning\": \"..\", \
                 \"should_replan\": true|false}.",
            )
            .user(prompt)
            .temperature(JUDGE_TEMPERATURE);
        let response = self.provider.chat(&request).await?;
        let result = parse_judgment(response.text());
        debug!(quality = ?result.quality, score = result.score, "Reflection complete");
        Ok(result)
    }

    /// Reflect on a ReAct trace list.
    pub async fn reflect_on_traces(
        &self,
        task: &str,
        traces: &[ReasoningTrace],
    ) -> Result<ReflectionResult, GenerateError> {
        let formatted = traces
            .iter()
            .map(ReasoningTrace::format_for_prompt)
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "Task: {task}\n\nReasoning so far:\n{formatted}\n\nEvaluate the reasoning on these \
             weighted criteria:\n{}",
            self.criteria_block()
        );
        self.judge(prompt).await
    }

    /// Reflect on one step given its recent history.
    pub async fn reflect_on_step(
        &self,
        description: &str,
        outcome: &str,
        recent: &str,
    ) -> Result<ReflectionResult, GenerateError> {
        let prompt = format!(
            "Step: {description}\nOutcome: {outcome}\n\nRecent history:\n{recent}\n\nEvaluate \
             the step on these weighted criteria:\n{}",
            self.criteria_block()
        );
        self.judge(prompt).await
    }

    /// Reflect on a whole plan.
    ///
    /// Plan-level reflection additionally forces `should_replan` when the
    /// score falls below the quality threshold or the verdict is invalid.
    pub async fn reflect_on_plan(&self, plan: &Plan) -> Result<ReflectionResult, GenerateError> {
        let prompt = format!(
            "Goal: {}\n\nPlan steps:\n{}\nEvaluate the plan on these weighted criteria:\n{}",
            plan.goal,
            plan.format_annotated(),
            self.criteria_block()
        );
        let mut result = self.judge(prompt).await?;
        result.should_replan = result.should_replan
            || result.score < self.quality_threshold
            || result.quality == ReflectionQuality::Invalid;
        Ok(result)
    }
}

/// Loose judge-output document for the JSON path.
#[derive(Debug, Default, Deserialize)]
struct JudgeDocument {
    quality: Option<String>,
    score: Option<f64>,
    #[serde(default)]
    issues: Vec<String>,
    #[serde(default)]
    suggestions: Vec<String>,
    #[serde(default)]
    reasoning: String,
    should_replan: Option<bool>,
}

/// Parse a judge response: JSON object if one is embedded anywhere in the
/// text, keyword heuristics otherwise.
#[must_use]
pub fn parse_judgment(text: &str) -> ReflectionResult {
    if let Ok(doc) = json_util::parse_json_span::<JudgeDocument>(text) {
        let quality = doc
            .quality
            .as_deref()
            .map_or(ReflectionQuality::NeedsImprovement, ReflectionQuality::parse);
        let score = doc
            .score
            .unwrap_or_else(|| quality.default_score())
            .clamp(0.0, 1.0);
        let should_replan = doc.should_replan.unwrap_or(
            quality == ReflectionQuality::Invalid || doc.issues.len() > 3,
        );
        return ReflectionResult {
            quality,
            score,
            issues: doc.issues,
            suggestions: doc.suggestions,
            should_replan,
            reasoning: doc.reasoning,
        };
    }

    keyword_judgment(text)
}

fn keyword_judgment(text: &str) -> ReflectionResult {
    let lower = text.to_lowercase();

    let (quality, score) = if lower.contains("excellent") || lower.contains("perfect") {
        (ReflectionQuality::Good, 0.9)
    } else if lower.contains("good") || lower.contains("satisfactory") {
        (ReflectionQuality::Good, 0.75)
    } else if lower.contains("invalid")
        || lower.contains("incorrect")
        || lower.contains("wrong")
    {
        (ReflectionQuality::Invalid, 0.3)
    } else {
        (ReflectionQuality::NeedsImprovement, 0.5)
    };

    let mut issues = Vec::new();
    let mut suggestions = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim();
        let lowered = trimmed.to_lowercase();
        if let Some(rest) = lowered.strip_prefix("issue:") {
            let offset = trimmed.len() - rest.len();
            issues.push(trimmed[offset..].trim().to_owned());
        } else if let Some(rest) = lowered.strip_prefix("suggestion:") {
            let offset = trimmed.len() - rest.len();
            suggestions.push(trimmed[offset..].trim().to_owned());
        }
    }

    let should_replan = quality == ReflectionQuality::Invalid || issues.len() > 3;

    ReflectionResult {
        quality,
        score,
        issues,
        suggestions,
        should_replan,
        reasoning: text.trim().to_owned(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::provider::mock::MockProvider;
    use std::sync::Arc;

    mod parsing {
        use super::*;

        #[test]
        fn json_anywhere_in_text_wins() {
            let text = r#"Assessment follows.
            {"quality":"good","score":0.85,"issues":[],"suggestions":["add tests"],"reasoning":"solid"}
            Done."#;
            let result = parse_judgment(text);
            assert_eq!(result.quality, ReflectionQuality::Good);
            assert!((result.score - 0.85).abs() < 1e-9);
            assert_eq!(result.suggestions, vec!["add tests"]);
            assert!(!result.should_replan);
        }

        #[test]
        fn missing_score_derives_from_quality() {
            let good = parse_judgment(r#"{"quality":"good"}"#);
            assert!((good.score - 0.8).abs() < 1e-9);

            let mid = parse_judgment(r#"{"quality":"needs_improvement"}"#);
            assert!((mid.score - 0.6).abs() < 1e-9);

            let bad = parse_judgment(r#"{"quality":"invalid"}"#);
            assert!((bad.score - 0.3).abs() < 1e-9);
            assert!(bad.should_replan);
        }

        #[test]
        fn score_is_clamped() {
            let result = parse_judgment(r#"{"quality":"good","score":3.5}"#);
            assert!((result.score - 1.0).abs() < 1e-9);
        }

        #[test]
        fn keyword_fallback_excellent() {
            let result = parse_judgment("Excellent work throughout.");
            assert_eq!(result.quality, ReflectionQuality::Good);
            assert!((result.score - 0.9).abs() < 1e-9);
        }

        #[test]
        fn keyword_fallback_good() {
            let result = parse_judgment("This is satisfactory overall.");
            assert_eq!(result.quality, ReflectionQuality::Good);
            assert!((result.score - 0.75).abs() < 1e-9);
        }

        #[test]
        fn keyword_fallback_invalid() {
            let result = parse_judgment("The reasoning is wrong in step two.");
            assert_eq!(result.quality, ReflectionQuality::Invalid);
            assert!(result.should_replan);
        }

        #[test]
        fn keyword_fallback_default() {
            let result = parse_judgment("Some neutral commentary.");
            assert_eq!(result.quality, ReflectionQuality::NeedsImprovement);
            assert!((result.score - 0.5).abs() < 1e-9);
        }

        #[test]
        fn scrapes_issue_and_suggestion_lines() {
            let text = "Review:\nIssue: missing error handling\nSUGGESTION: add a retry\n";
            let result = parse_judgment(text);
            assert_eq!(result.issues, vec!["missing error handling"]);
            assert_eq!(result.suggestions, vec!["add a retry"]);
        }

        #[test]
        fn many_issues_force_replan() {
            let text = "notes\nissue: a\nissue: b\nissue: c\nissue: d\n";
            let result = parse_judgment(text);
            assert_eq!(result.issues.len(), 4);
            assert!(result.should_replan);
        }
    }

    mod engine {
        use super::*;
        use crate::plan::PlanStep;

        fn judge_with(response: &str) -> ReflectionEngine {
            ReflectionEngine::new(
                Arc::new(MockProvider::new().with_text(response)),
                "judge-model",
            )
        }

        #[tokio::test]
        async fn trace_reflection_parses_judge_output() {
            let engine =
                judge_with(r#"{"quality":"good","score":0.8,"issues":[],"reasoning":"fine"}"#);
            let traces = vec![ReasoningTrace::new(0, "think about it")];
            let result = engine
                .reflect_on_traces("solve things", &traces)
                .await
                .unwrap();
            assert_eq!(result.quality, ReflectionQuality::Good);
        }

        #[tokio::test]
        async fn plan_reflection_forces_replan_below_threshold() {
            let engine = judge_with(r#"{"quality":"needs_improvement","score":0.4}"#);
            let mut plan = Plan::new("a", "goal");
            plan.steps.push(PlanStep::new(0, "only"));

            let result = engine.reflect_on_plan(&plan).await.unwrap();
            assert!(result.should_replan);
        }

        #[tokio::test]
        async fn plan_reflection_keeps_good_plans() {
            let engine = judge_with(r#"{"quality":"good","score":0.9,"should_replan":false}"#);
            let mut plan = Plan::new("a", "goal");
            plan.steps.push(PlanStep::new(0, "only"));

            let result = engine.reflect_on_plan(&plan).await.unwrap();
            assert!(!result.should_replan);
        }

        #[tokio::test]
        async fn judge_runs_at_low_temperature() {
            let provider = Arc::new(MockProvider::new().with_text(r#"{"quality":"good"}"#));
            let engine = ReflectionEngine::new(provider.clone(), "judge-model");
            let _ = engine
                .reflect_on_step("do a thing", "it happened", "")
                .await
                .unwrap();

            let requests = provider.requests();
            assert_eq!(requests[0].temperature, Some(JUDGE_TEMPERATURE));
        }
    }
}
