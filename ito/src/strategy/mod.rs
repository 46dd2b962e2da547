//! Pluggable reasoning strategies.
//!
//! A [`Strategy`] executes an [`Agent`] against an input and produces an
//! [`AgentExecution`]. Both shipped strategies — [`ReactStrategy`] and
//! [`PlanExecuteStrategy`] — allocate an execution id, wrap the caller's
//! context with their own deadline, and map cancellation to the
//! `cancelled` terminal status. An execution record always comes back
//! fully populated: failures land in `status`/`error`, not in `Err`, which
//! is reserved for construction-time configuration problems.

pub mod plan_execute;
pub mod react;

pub use plan_execute::PlanExecuteStrategy;
pub use react::ReactStrategy;

use async_trait::async_trait;

use crate::agent::{Agent, AgentExecution, RunContext};
use crate::error::StrategyError;

/// The strategy contract.
#[async_trait]
pub trait Strategy: Send + Sync {
    /// The strategy's name.
    fn name(&self) -> &'static str;

    /// Whether this strategy can revise a failed plan.
    fn supports_replanning(&self) -> bool {
        false
    }

    /// Execute `agent` against `input`.
    ///
    /// Returns a record with a terminal status. `Err` is reserved for
    /// configuration errors detected before the run starts.
    async fn execute(
        &self,
        ctx: &RunContext,
        agent: &Agent,
        input: &str,
    ) -> Result<AgentExecution, StrategyError>;
}

/// Markers that signal a final answer in a model's thought or observation.
pub(crate) const FINAL_ANSWER_MARKERS: [&str; 5] = [
    "final answer:",
    "the answer is",
    "in conclusion",
    "therefore,",
    "to summarize",
];

/// Detect a final answer in `text`.
///
/// Returns the text after a `final answer:` marker when present (trimmed),
/// the full text for the softer markers, and `None` when no marker matches.
#[must_use]
pub(crate) fn detect_final_answer(text: &str) -> Option<String> {
    let lower = text.to_lowercase();
    for marker in FINAL_ANSWER_MARKERS {
        if let Some(position) = lower.find(marker) {
            if marker == "final answer:" {
                let after = text[position + marker.len()..].trim();
                return Some(if after.is_empty() {
                    text.trim().to_owned()
                } else {
                    after.to_owned()
                });
            }
            return Some(text.trim().to_owned());
        }
    }
    None
}
