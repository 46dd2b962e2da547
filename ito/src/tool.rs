//! Tool definitions, handlers, and the execution registry.
//!
//! Tools are the runtime's only side-effect surface: a registry maps a tool
//! name to a JSON-schema'd handler, and [`ToolRegistry::execute`] runs it
//! under a per-tool timeout, capturing result, error, and duration. Handler
//! failures are recorded in the returned [`ToolExecutionResult`], never
//! raised to the caller — an unknown tool or a timed-out handler is an
//! unsuccessful result, not an exception.
//!
//! # OpenAI API Alignment
//!
//! [`ToolDefinition`] serializes to the function-calling format
//! `{"type": "function", "function": {...}}` so it can be attached directly
//! to a chat request.
//!
//! # Presentation tools
//!
//! A tool may be registered as a *presentation* tool: when the executor
//! dispatches it with an event sink attached, the handler receives a
//! [`UiPartEmitter`](crate::event::UiPartEmitter) through its context and
//! can stream `ui_part` events while computing its result. The registry
//! itself attaches no meaning to the flag beyond passing the emitter along.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::ToolError;
use crate::event::{EventSink, UiPartEmitter};

/// Default per-tool timeout.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// Definition of a tool for model function calling.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolDefinition {
    /// Name of the tool, unique within a registry.
    pub name: String,
    /// Description of what the tool does.
    pub description: String,
    /// JSON schema for the tool's parameters.
    pub parameters: Value,
}

impl ToolDefinition {
    /// Create a new tool definition.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    /// Returns the tool name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Custom serialization to the function-calling wire format.
impl Serialize for ToolDefinition {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap;

        let mut function = serde_json::Map::new();
        function.insert("name".to_owned(), Value::String(self.name.clone()));
        function.insert(
            "description".to_owned(),
            Value::String(self.description.clone()),
        );
        function.insert("parameters".to_owned(), self.parameters.clone());

        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("type", "function")?;
        map.serialize_entry("function", &function)?;
        map.end()
    }
}

/// Context passed to tool handlers.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    /// Cancellation signal for the surrounding run.
    pub cancellation: CancellationToken,
    /// Execution id of the surrounding stream, when any.
    pub execution_id: Option<String>,
    /// UI-part emitter, attached only when a presentation tool is
    /// dispatched from a streaming execution.
    pub ui: Option<UiPartEmitter>,
}

impl ToolContext {
    /// Create a detached context (no cancellation parent, no stream).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context tied to a cancellation token.
    #[must_use]
    pub fn with_cancellation(cancellation: CancellationToken) -> Self {
        Self {
            cancellation,
            ..Self::default()
        }
    }
}

/// The handler interface all tools implement.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Execute the tool with the given arguments.
    async fn call(&self, ctx: &ToolContext, args: Value) -> Result<Value, ToolError>;
}

type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send>>;

/// A [`ToolHandler`] built from an async closure.
pub struct FnHandler {
    f: Box<dyn Fn(ToolContext, Value) -> HandlerFuture + Send + Sync>,
}

impl std::fmt::Debug for FnHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnHandler").finish_non_exhaustive()
    }
}

impl FnHandler {
    /// Wrap an async closure as a handler.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(ToolContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
    {
        Self {
            f: Box::new(move |ctx, args| Box::pin(f(ctx, args))),
        }
    }
}

#[async_trait]
impl ToolHandler for FnHandler {
    async fn call(&self, ctx: &ToolContext, args: Value) -> Result<Value, ToolError> {
        (self.f)(ctx.clone(), args).await
    }
}

/// A tool registered in a [`ToolRegistry`].
#[derive(Debug, Clone)]
pub struct Tool {
    /// The tool's definition as presented to the model.
    pub definition: ToolDefinition,
    /// The handler invoked on execution.
    pub handler: Arc<dyn ToolHandler>,
    /// Per-tool execution timeout.
    pub timeout: Duration,
    /// Whether this tool streams `ui_part` events while running.
    pub presentation: bool,
}

impl std::fmt::Debug for dyn ToolHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ToolHandler")
    }
}

impl Tool {
    /// Create a tool from a definition and handler with the default timeout.
    #[must_use]
    pub fn new(definition: ToolDefinition, handler: Arc<dyn ToolHandler>) -> Self {
        Self {
            definition,
            handler,
            timeout: DEFAULT_TOOL_TIMEOUT,
            presentation: false,
        }
    }

    /// Create a tool from an async closure.
    #[must_use]
    pub fn from_fn<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        f: F,
    ) -> Self
    where
        F: Fn(ToolContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
    {
        Self::new(
            ToolDefinition::new(name, description, parameters),
            Arc::new(FnHandler::new(f)),
        )
    }

    /// Set the per-tool timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Mark this tool as a presentation tool.
    #[must_use]
    pub const fn presentation(mut self) -> Self {
        self.presentation = true;
        self
    }

    /// The tool's name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.definition.name()
    }
}

/// Result of one tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolExecutionResult {
    /// Name of the executed tool.
    pub tool_name: String,
    /// Whether the handler completed without error.
    pub success: bool,
    /// The handler's output, when successful.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// The failure message, when unsuccessful.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// How long the handler ran.
    pub duration: Duration,
    /// When the execution finished.
    pub timestamp: DateTime<Utc>,
    /// Extra execution metadata.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

impl ToolExecutionResult {
    fn success(tool_name: &str, result: Value, duration: Duration) -> Self {
        Self {
            tool_name: tool_name.to_owned(),
            success: true,
            result: Some(result),
            error: None,
            duration,
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    fn failure(tool_name: &str, error: impl Into<String>, duration: Duration) -> Self {
        Self {
            tool_name: tool_name.to_owned(),
            success: false,
            result: None,
            error: Some(error.into()),
            duration,
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    /// Serialize the output for re-injection into a transcript: JSON when
    /// possible, plain string form otherwise, `Error: <msg>` on failure.
    #[must_use]
    pub fn serialized_output(&self) -> String {
        match (&self.result, &self.error) {
            (Some(value), _) => crate::json_util::to_json_or_display(value),
            (None, Some(error)) => format!("Error: {error}"),
            (None, None) => String::new(),
        }
    }
}

/// A named collection of tools with execute-by-name semantics.
///
/// Registration happens at setup time; execution is the hot path and takes
/// only a read lock to clone the tool's `Arc`ed handler out of the map.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<Tool>>>,
}

impl ToolRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any existing tool with the same name.
    pub fn register(&self, tool: Tool) {
        let name = tool.name().to_owned();
        if let Ok(mut tools) = self.tools.write() {
            tools.insert(name, Arc::new(tool));
        }
    }

    /// Check whether a tool is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tools.read().is_ok_and(|tools| tools.contains_key(name))
    }

    /// Number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.read().map(|tools| tools.len()).unwrap_or(0)
    }

    /// Returns `true` when no tools are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the named tool is a presentation tool.
    #[must_use]
    pub fn is_presentation(&self, name: &str) -> bool {
        self.get(name).is_some_and(|tool| tool.presentation)
    }

    /// Definitions of all registered tools, sorted by name for stable
    /// prompt construction.
    #[must_use]
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut definitions: Vec<ToolDefinition> = self
            .tools
            .read()
            .map(|tools| {
                tools
                    .values()
                    .map(|tool| tool.definition.clone())
                    .collect()
            })
            .unwrap_or_default();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }

    /// Definitions for the named subset, silently skipping unknown names.
    #[must_use]
    pub fn definitions_for(&self, names: &[String]) -> Vec<ToolDefinition> {
        names
            .iter()
            .filter_map(|name| self.get(name).map(|tool| tool.definition.clone()))
            .collect()
    }

    fn get(&self, name: &str) -> Option<Arc<Tool>> {
        self.tools
            .read()
            .ok()
            .and_then(|tools| tools.get(name).cloned())
    }

    /// Execute the named tool with the given arguments.
    ///
    /// The handler runs under the tool's timeout and the context's
    /// cancellation token. Lookup failures, handler errors, and timeouts
    /// all come back as unsuccessful results.
    pub async fn execute(
        &self,
        ctx: &ToolContext,
        name: &str,
        args: Value,
    ) -> ToolExecutionResult {
        self.execute_with_sink(ctx, name, args, None).await
    }

    /// Execute the named tool, attaching a UI-part emitter when the tool is
    /// a presentation tool and a sink is available.
    pub async fn execute_with_sink(
        &self,
        ctx: &ToolContext,
        name: &str,
        args: Value,
        sink: Option<&EventSink>,
    ) -> ToolExecutionResult {
        let started = std::time::Instant::now();

        let Some(tool) = self.get(name) else {
            warn!(tool = %name, "Tool not found");
            return ToolExecutionResult::failure(
                name,
                ToolError::NotFound(name.to_owned()).to_string(),
                started.elapsed(),
            );
        };

        debug!(tool = %name, "Dispatching tool");

        let mut call_ctx = ctx.clone();
        if tool.presentation
            && let Some(sink) = sink
        {
            call_ctx.execution_id = Some(sink.execution_id().to_owned());
            call_ctx.ui = Some(sink.ui_parts());
        }

        let outcome = tokio::select! {
            () = ctx.cancellation.cancelled() => {
                return ToolExecutionResult::failure(name, "cancelled", started.elapsed());
            }
            outcome = tokio::time::timeout(tool.timeout, tool.handler.call(&call_ctx, args)) => outcome,
        };

        let duration = started.elapsed();
        match outcome {
            Ok(Ok(value)) => ToolExecutionResult::success(name, value, duration),
            Ok(Err(err)) => {
                warn!(tool = %name, error = %err, "Tool execution failed");
                ToolExecutionResult::failure(name, err.to_string(), duration)
            }
            Err(_) => {
                // Timeout: the handler future is dropped, which cancels it.
                warn!(tool = %name, timeout = ?tool.timeout, "Tool timed out");
                ToolExecutionResult::failure(
                    name,
                    ToolError::Timeout {
                        tool: name.to_owned(),
                        timeout: tool.timeout,
                    }
                    .to_string(),
                    duration,
                )
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn add_tool() -> Tool {
        Tool::from_fn(
            "add",
            "Add two numbers",
            json!({
                "type": "object",
                "properties": {
                    "a": {"type": "number"},
                    "b": {"type": "number"}
                },
                "required": ["a", "b"]
            }),
            |_ctx, args| async move {
                let a = args["a"].as_f64().ok_or_else(|| {
                    ToolError::invalid_arguments("add", "missing 'a'")
                })?;
                let b = args["b"].as_f64().ok_or_else(|| {
                    ToolError::invalid_arguments("add", "missing 'b'")
                })?;
                Ok(json!(a + b))
            },
        )
    }

    mod definition {
        use super::*;

        #[test]
        fn serializes_to_function_format() {
            let def = ToolDefinition::new("add", "Add numbers", json!({"type": "object"}));
            let json: Value = serde_json::to_value(&def).unwrap();

            assert_eq!(json["type"], "function");
            assert_eq!(json["function"]["name"], "add");
            assert_eq!(json["function"]["description"], "Add numbers");
            assert_eq!(json["function"]["parameters"]["type"], "object");
        }
    }

    mod registry {
        use super::*;

        #[test]
        fn register_and_lookup() {
            let registry = ToolRegistry::new();
            assert!(registry.is_empty());

            registry.register(add_tool());
            assert!(registry.contains("add"));
            assert!(!registry.contains("sub"));
            assert_eq!(registry.len(), 1);
        }

        #[test]
        fn definitions_are_sorted() {
            let registry = ToolRegistry::new();
            registry.register(Tool::from_fn("zeta", "", json!({}), |_, _| async {
                Ok(Value::Null)
            }));
            registry.register(Tool::from_fn("alpha", "", json!({}), |_, _| async {
                Ok(Value::Null)
            }));

            let names: Vec<String> = registry
                .definitions()
                .into_iter()
                .map(|d| d.name)
                .collect();
            assert_eq!(names, vec!["alpha", "zeta"]);
        }

        #[test]
        fn definitions_for_skips_unknown() {
            let registry = ToolRegistry::new();
            registry.register(add_tool());

            let defs =
                registry.definitions_for(&["add".to_owned(), "missing".to_owned()]);
            assert_eq!(defs.len(), 1);
            assert_eq!(defs[0].name, "add");
        }

        #[tokio::test]
        async fn execute_success() {
            let registry = ToolRegistry::new();
            registry.register(add_tool());

            let result = registry
                .execute(&ToolContext::new(), "add", json!({"a": 2, "b": 3}))
                .await;

            assert!(result.success);
            assert_eq!(result.result.unwrap(), json!(5.0));
            assert!(result.error.is_none());
        }

        #[tokio::test]
        async fn execute_unknown_tool_is_not_an_error() {
            let registry = ToolRegistry::new();
            let result = registry
                .execute(&ToolContext::new(), "missing", json!({}))
                .await;

            assert!(!result.success);
            assert_eq!(result.error.unwrap(), "tool not found: missing");
        }

        #[tokio::test]
        async fn execute_handler_error_is_captured() {
            let registry = ToolRegistry::new();
            registry.register(add_tool());

            let result = registry
                .execute(&ToolContext::new(), "add", json!({"a": 2}))
                .await;

            assert!(!result.success);
            assert!(result.error.unwrap().contains("missing 'b'"));
        }

        #[tokio::test]
        async fn execute_timeout() {
            let registry = ToolRegistry::new();
            registry.register(
                Tool::from_fn("slow", "", json!({}), |_, _| async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(Value::Null)
                })
                .with_timeout(Duration::from_millis(20)),
            );

            let result = registry
                .execute(&ToolContext::new(), "slow", json!({}))
                .await;

            assert!(!result.success);
            assert!(result.error.unwrap().contains("timed out"));
        }

        #[tokio::test]
        async fn execute_observes_cancellation() {
            let registry = ToolRegistry::new();
            registry.register(Tool::from_fn("slow", "", json!({}), |_, _| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(Value::Null)
            }));

            let token = CancellationToken::new();
            token.cancel();
            let result = registry
                .execute(
                    &ToolContext::with_cancellation(token),
                    "slow",
                    json!({}),
                )
                .await;

            assert!(!result.success);
            assert_eq!(result.error.unwrap(), "cancelled");
        }

        #[tokio::test]
        async fn presentation_tool_receives_emitter() {
            let registry = ToolRegistry::new();
            registry.register(
                Tool::from_fn("chart", "Render a chart", json!({}), |ctx, _| async move {
                    let ui = ctx.ui.expect("presentation tool should get an emitter");
                    let part = ui.start("chart");
                    ui.delta(&part, "series", json!([1, 2, 3]));
                    ui.end(&part);
                    Ok(json!({"rendered": true}))
                })
                .presentation(),
            );

            let (sink, mut rx) = EventSink::new("exec_ui");
            let result = registry
                .execute_with_sink(&ToolContext::new(), "chart", json!({}), Some(&sink))
                .await;

            assert!(result.success);
            let mut kinds = Vec::new();
            while let Ok(event) = rx.try_recv() {
                kinds.push(event.kind.name());
            }
            assert_eq!(kinds, vec!["ui_part_start", "ui_part_delta", "ui_part_end"]);
        }

        #[tokio::test]
        async fn non_presentation_tool_gets_no_emitter() {
            let registry = ToolRegistry::new();
            registry.register(Tool::from_fn("plain", "", json!({}), |ctx, _| async move {
                assert!(ctx.ui.is_none());
                Ok(Value::Null)
            }));

            let (sink, _rx) = EventSink::new("exec_1");
            let result = registry
                .execute_with_sink(&ToolContext::new(), "plain", json!({}), Some(&sink))
                .await;
            assert!(result.success);
        }
    }

    mod execution_result {
        use super::*;

        #[test]
        fn serialized_output_json() {
            let result =
                ToolExecutionResult::success("t", json!({"x": 1}), Duration::ZERO);
            assert_eq!(result.serialized_output(), r#"{"x":1}"#);
        }

        #[test]
        fn serialized_output_string_is_bare() {
            let result = ToolExecutionResult::success("t", json!("Paris"), Duration::ZERO);
            assert_eq!(result.serialized_output(), "Paris");
        }

        #[test]
        fn serialized_output_error() {
            let result = ToolExecutionResult::failure("t", "boom", Duration::ZERO);
            assert_eq!(result.serialized_output(), "Error: boom");
        }
    }
}
