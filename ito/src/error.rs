//! Error types for the ito runtime.
//!
//! Each subsystem carries its own error enum; the top-level [`Error`] is an
//! umbrella used at crate boundaries. Handler-supplied code (tools,
//! validators, callbacks) is invoked defensively — its failures are captured
//! into these types and never bring down the engine.

use std::time::Duration;

/// A type alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// The top-level error type for runtime operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Error from a generation pipeline.
    #[error(transparent)]
    Generate(#[from] GenerateError),

    /// Error from tool registration or execution.
    #[error(transparent)]
    Tool(#[from] ToolError),

    /// Error from the plan model or a plan store.
    #[error(transparent)]
    Plan(#[from] PlanError),

    /// Error from the memory manager or its backends.
    #[error(transparent)]
    Memory(#[from] MemoryError),

    /// Error from a strategy execution.
    #[error(transparent)]
    Strategy(#[from] StrategyError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors produced by the generation pipelines.
///
/// `Configuration`, `PromptRender`, and `SchemaGen` are deterministic and
/// surfaced immediately; `Provider` participates in the object generator's
/// retry budget; `Validation` is retried until the budget is exhausted.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum GenerateError {
    /// Missing or inconsistent inputs at construction time.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Prompt template rendering failed.
    #[error("prompt rendering failed: {0}")]
    PromptRender(String),

    /// JSON schema derivation for the target type failed.
    #[error("schema generation failed: {0}")]
    SchemaGen(String),

    /// The model provider returned an error.
    #[error("provider error: {0}")]
    Provider(String),

    /// A validator rejected the generated object.
    #[error("validation failed after {attempts} attempt(s): {message}")]
    Validation {
        /// Number of attempts made, including the first.
        attempts: usize,
        /// The last validator error.
        message: String,
    },

    /// Model output could not be parsed into the requested shape.
    #[error("failed to parse model output: {message}")]
    Parse {
        /// The offending output, truncated for display.
        output: String,
        /// The parse error message.
        message: String,
    },

    /// The overall generation deadline elapsed.
    #[error("generation timed out after {0:?}")]
    Timeout(Duration),

    /// The caller's context was cancelled.
    #[error("generation was cancelled")]
    Cancelled,
}

impl GenerateError {
    /// Create a configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create a provider error.
    #[must_use]
    pub fn provider(message: impl Into<String>) -> Self {
        Self::Provider(message.into())
    }

    /// Create a parse error, truncating long outputs for display.
    #[must_use]
    pub fn parse(output: impl Into<String>, message: impl Into<String>) -> Self {
        let mut output = output.into();
        if output.len() > 512 {
            output.truncate(512);
            output.push('…');
        }
        Self::Parse {
            output,
            message: message.into(),
        }
    }
}

/// Errors produced by tool lookup and execution.
///
/// These are recovered locally by callers: a failed tool becomes an error
/// observation (ReAct) or a failed step (Plan-Execute), never a crash.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ToolError {
    /// No tool registered under the requested name.
    #[error("tool not found: {0}")]
    NotFound(String),

    /// The per-tool timeout elapsed before the handler returned.
    #[error("tool '{tool}' timed out after {timeout:?}")]
    Timeout {
        /// Name of the tool.
        tool: String,
        /// The configured per-tool timeout.
        timeout: Duration,
    },

    /// The handler returned an error.
    #[error("tool '{tool}' failed: {message}")]
    Handler {
        /// Name of the tool.
        tool: String,
        /// The handler's error message.
        message: String,
    },

    /// The arguments could not be interpreted by the handler.
    #[error("invalid arguments for tool '{tool}': {message}")]
    InvalidArguments {
        /// Name of the tool.
        tool: String,
        /// Description of the problem.
        message: String,
    },
}

impl ToolError {
    /// Create a handler error.
    #[must_use]
    pub fn handler(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Handler {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Create an invalid-arguments error.
    #[must_use]
    pub fn invalid_arguments(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArguments {
            tool: tool.into(),
            message: message.into(),
        }
    }
}

/// Errors produced by the plan model and plan stores.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum PlanError {
    /// No plan with the given id exists in the store.
    ///
    /// This is the sentinel callers match on to distinguish "absent" from
    /// backend failures.
    #[error("plan not found: {0}")]
    NotFound(String),

    /// The planner returned output that could not be parsed into a plan.
    #[error("unparseable plan: {0}")]
    Parse(String),

    /// No step is executable but the plan is not complete.
    #[error("plan {plan_id} stalled with {remaining} unfinished step(s)")]
    Stalled {
        /// Id of the stalled plan.
        plan_id: String,
        /// Number of steps that can never run.
        remaining: usize,
    },

    /// Plan execution failed terminally.
    #[error("plan execution failed: {0}")]
    Execution(String),

    /// The backing store reported an error.
    #[error("plan store error: {0}")]
    Store(String),
}

/// Errors produced by the memory manager and its injected backends.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum MemoryError {
    /// The embedding model failed.
    #[error("embedding failed: {0}")]
    Embedding(String),

    /// The vector store reported an error.
    #[error("vector store error: {0}")]
    Store(String),

    /// No entry with the given id.
    #[error("memory entry not found: {0}")]
    NotFound(String),
}

/// Errors produced by strategy execution.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StrategyError {
    /// Missing required inputs at strategy construction.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The execution's context was cancelled.
    #[error("execution was cancelled")]
    Cancelled,

    /// The strategy's own deadline elapsed.
    #[error("execution timed out after {0:?}")]
    Timeout(Duration),

    /// Replanning was attempted the maximum number of times.
    #[error("replanning budget exhausted after {0} attempt(s)")]
    ReplanExhausted(usize),

    /// A phase of the strategy failed.
    #[error("{0}")]
    Phase(String),
}

impl StrategyError {
    /// Create a configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create a phase error.
    #[must_use]
    pub fn phase(message: impl Into<String>) -> Self {
        Self::Phase(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_not_found_message() {
        let err = ToolError::NotFound("search".to_owned());
        assert_eq!(err.to_string(), "tool not found: search");
    }

    #[test]
    fn tool_timeout_message_includes_duration() {
        let err = ToolError::Timeout {
            tool: "slow".to_owned(),
            timeout: Duration::from_secs(5),
        };
        assert!(err.to_string().contains("slow"));
        assert!(err.to_string().contains("5s"));
    }

    #[test]
    fn generate_parse_truncates_long_output() {
        let long = "x".repeat(4096);
        let err = GenerateError::parse(long, "bad json");
        if let GenerateError::Parse { output, .. } = err {
            assert!(output.len() < 600);
            assert!(output.ends_with('…'));
        } else {
            panic!("expected Parse variant");
        }
    }

    #[test]
    fn plan_not_found_is_distinguishable() {
        let err = PlanError::NotFound("p1".to_owned());
        assert!(matches!(err, PlanError::NotFound(_)));
        let err = PlanError::Store("io".to_owned());
        assert!(!matches!(err, PlanError::NotFound(_)));
    }

    #[test]
    fn umbrella_from_subsystem_errors() {
        let err: Error = GenerateError::Cancelled.into();
        assert!(matches!(err, Error::Generate(_)));
        let err: Error = ToolError::NotFound("t".to_owned()).into();
        assert!(matches!(err, Error::Tool(_)));
        let err: Error = StrategyError::Cancelled.into();
        assert!(matches!(err, Error::Strategy(_)));
    }
}
