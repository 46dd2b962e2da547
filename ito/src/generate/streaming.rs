//! Streaming generation with an agentic tool loop.
//!
//! [`Generator::stream`] opens a model stream, demultiplexes raw provider
//! frames into the typed event protocol, and — when the model emits tool
//! calls — executes them through the registry, re-injects the results as
//! assistant/tool transcript messages, and loops, bounded by
//! `max_tool_iterations`.
//!
//! Frame ingestion supports both provider shapes: block-tagged frames are
//! forwarded 1:1; legacy frames drive a small state machine that opens
//! content blocks lazily on the first non-thinking token, opens and closes
//! thinking blocks on marker detection, and keys tool-use blocks on the
//! tool-call id. Deltas carry the raw text, markers included; the
//! accumulated thinking text is marker-stripped only in the final response.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use futures::StreamExt as _;

use crate::agent::RunContext;
use crate::error::GenerateError;
use crate::event::{EventKind, EventSink, StreamEvent, new_block_id, new_execution_id};
use crate::guardrail::Violation;
use crate::json_util;
use crate::message::{ChatMessage, ToolCall};
use crate::prompt::{self, TemplateVars};
use crate::provider::{
    BlockType, ChatRequest, ProviderFrame, StopReason, ToolCallDelta, ToolChoice,
};
use crate::tool::{ToolContext, ToolExecutionResult, ToolRegistry};
use crate::usage::Usage;

use super::Generator;
use std::sync::Arc;

/// Default bound on the agentic tool loop.
pub const DEFAULT_MAX_TOOL_ITERATIONS: usize = 10;

/// Thinking-marker detection options for the legacy ingestion path.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThinkingOptions {
    /// Watch tokens for thinking markers.
    pub enabled: bool,
    /// Also accept the opt-in marker pairs (`<think>`, `<|thinking|>`,
    /// `<reason>`, `<reasoning>`).
    pub extended_markers: bool,
}

/// The marker pairs the demultiplexer watches for.
#[must_use]
pub fn marker_pairs(extended: bool) -> Vec<(&'static str, &'static str)> {
    let mut pairs = vec![
        ("<thinking>", "</thinking>"),
        ("[REASONING]", "[/REASONING]"),
        ("<seed:think>", "</seed:think>"),
    ];
    if extended {
        pairs.extend([
            ("<think>", "</think>"),
            ("<|thinking|>", "<|/thinking|>"),
            ("<reason>", "</reason>"),
            ("<reasoning>", "</reasoning>"),
        ]);
    }
    pairs
}

/// Request envelope for streaming generation.
#[derive(Clone)]
pub struct StreamRequest {
    /// Model identifier.
    pub model: String,
    /// Optional system prompt.
    pub system: Option<String>,
    /// User prompt template (`{{.key}}` placeholders).
    pub template: String,
    /// Template variables.
    pub vars: TemplateVars,
    /// Prior conversation, inserted between system and user.
    pub history: Vec<ChatMessage>,
    /// Sampling temperature.
    pub temperature: Option<f32>,
    /// Maximum tokens to generate.
    pub max_tokens: Option<u32>,
    /// Toolbox for the agentic loop.
    pub tools: Option<Arc<ToolRegistry>>,
    /// Execute model-emitted tool calls automatically.
    pub auto_execute_tools: bool,
    /// Bound on the tool loop.
    pub max_tool_iterations: usize,
    /// Thinking-marker options.
    pub thinking: ThinkingOptions,
    /// Lift `ui:` fenced blocks and inline `<ui:…>` tags out of the final
    /// content into typed parts.
    pub parse_ui_output: bool,
    /// Generate up to this many follow-up suggestions after the loop.
    pub suggestions: Option<u8>,
}

impl std::fmt::Debug for StreamRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamRequest")
            .field("model", &self.model)
            .field("max_tool_iterations", &self.max_tool_iterations)
            .finish_non_exhaustive()
    }
}

impl StreamRequest {
    /// Create a streaming request.
    #[must_use]
    pub fn new(model: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system: None,
            template: template.into(),
            vars: TemplateVars::new(),
            history: Vec::new(),
            temperature: None,
            max_tokens: None,
            tools: None,
            auto_execute_tools: true,
            max_tool_iterations: DEFAULT_MAX_TOOL_ITERATIONS,
            thinking: ThinkingOptions::default(),
            parse_ui_output: false,
            suggestions: None,
        }
    }

    /// Set the system prompt.
    #[must_use]
    pub fn system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Attach a toolbox.
    #[must_use]
    pub fn tools(mut self, tools: Arc<ToolRegistry>) -> Self {
        self.tools = Some(tools);
        self
    }

    /// Enable thinking-marker detection.
    #[must_use]
    pub const fn thinking(mut self, options: ThinkingOptions) -> Self {
        self.thinking = options;
        self
    }

    /// Enable UI-output parsing.
    #[must_use]
    pub const fn parse_ui_output(mut self, enabled: bool) -> Self {
        self.parse_ui_output = enabled;
        self
    }

    /// Request follow-up suggestions.
    #[must_use]
    pub const fn suggestions(mut self, count: u8) -> Self {
        self.suggestions = Some(count);
        self
    }

    /// Bound the tool loop.
    #[must_use]
    pub const fn max_tool_iterations(mut self, iterations: usize) -> Self {
        self.max_tool_iterations = iterations;
        self
    }
}

/// One piece of the final content after post-processing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Plain text.
    Text {
        /// The text.
        text: String,
    },
    /// A structured UI fragment lifted out of the content.
    Ui {
        /// The fragment's type label.
        part_type: String,
        /// The fragment payload.
        data: Value,
    },
}

/// The assembled result of a streaming run.
#[derive(Debug, Clone)]
pub struct StreamResponse {
    /// Execution id shared by every event of the run.
    pub execution_id: String,
    /// Final user-visible content.
    pub content: String,
    /// Accumulated thinking text, markers stripped.
    pub thinking: String,
    /// One entry per closed thinking block, markers stripped.
    pub reasoning_steps: Vec<String>,
    /// The full transcript, tool messages included.
    pub messages: Vec<ChatMessage>,
    /// Tool executions performed by the loop, in dispatch order.
    pub tool_executions: Vec<ToolExecutionResult>,
    /// Content parts after post-processing.
    pub parts: Vec<ContentPart>,
    /// Follow-up suggestions, when requested.
    pub suggestions: Vec<String>,
    /// Usage accumulated across all model calls of the run.
    pub usage: Usage,
    /// Stop reason of the final iteration.
    pub stop_reason: StopReason,
    /// Guardrail violations found on input or output.
    pub violations: Vec<Violation>,
}

/// Handle on an in-flight streaming run.
///
/// Events arrive on an unbounded channel as the driver emits them; the
/// final [`StreamResponse`] resolves when the run ends. Dropping the handle
/// cancels nothing — use the run context for that.
#[derive(Debug)]
pub struct StreamRun {
    execution_id: String,
    events: mpsc::UnboundedReceiver<StreamEvent>,
    handle: tokio::task::JoinHandle<Result<StreamResponse, GenerateError>>,
}

impl StreamRun {
    /// The run's execution id.
    #[must_use]
    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    /// Receive the next event, or `None` once the run has ended.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        self.events.recv().await
    }

    /// Discard remaining events and wait for the final response.
    pub async fn finish(self) -> Result<StreamResponse, GenerateError> {
        drop(self.events);
        self.handle
            .await
            .map_err(|e| GenerateError::provider(format!("stream task failed: {e}")))?
    }

    /// Drain all events, then return them with the final response.
    pub async fn collect(
        mut self,
    ) -> Result<(Vec<StreamEvent>, StreamResponse), GenerateError> {
        let mut events = Vec::new();
        while let Some(event) = self.events.recv().await {
            events.push(event);
        }
        let response = self
            .handle
            .await
            .map_err(|e| GenerateError::provider(format!("stream task failed: {e}")))??;
        Ok((events, response))
    }
}

impl Generator {
    /// Start a streaming run.
    ///
    /// The driver runs on a spawned task; cancellation of `ctx` and the
    /// configured stream timeout both terminate it. Partial results already
    /// committed to the transcript survive in the error-free paths only;
    /// a cancelled run resolves to [`GenerateError::Cancelled`].
    #[must_use]
    pub fn stream(&self, ctx: &RunContext, request: StreamRequest) -> StreamRun {
        let execution_id = new_execution_id();
        let (sink, events) = EventSink::new(execution_id.clone());
        let generator = self.clone();
        let ctx = ctx.child();
        let timeout = self.config.stream_timeout;

        let driver_id = execution_id.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                () = ctx.cancellation.cancelled() => Err(GenerateError::Cancelled),
                result = tokio::time::timeout(
                    timeout,
                    drive(generator, ctx.clone(), request, sink, driver_id),
                ) => match result {
                    Ok(inner) => inner,
                    Err(_) => Err(GenerateError::Timeout(timeout)),
                },
            }
        });

        StreamRun {
            execution_id,
            events,
            handle,
        }
    }
}

/// The streaming driver: model stream → demux → tool loop → post-process.
async fn drive(
    generator: Generator,
    ctx: RunContext,
    request: StreamRequest,
    sink: EventSink,
    execution_id: String,
) -> Result<StreamResponse, GenerateError> {
    if request.model.is_empty() {
        return Err(GenerateError::configuration("model must not be empty"));
    }

    let rendered = prompt::render(&request.template, &request.vars);
    let mut violations = generator.check_input(&rendered).await?;

    let mut messages =
        prompt::build_messages(request.system.as_deref(), &request.history, Some(&rendered));

    let tool_definitions = request
        .tools
        .as_ref()
        .map(|registry| registry.definitions())
        .unwrap_or_default();

    let mut demux = Demux::new(
        sink.clone(),
        request.thinking.enabled,
        marker_pairs(request.thinking.extended_markers),
    );
    let mut tool_executions: Vec<ToolExecutionResult> = Vec::new();
    let mut processed: HashSet<String> = HashSet::new();
    let mut usage = Usage::zero();
    let mut stop_reason = StopReason::Stop;

    info!(execution_id = %execution_id, model = %request.model, "Stream started");

    for iteration in 0..request.max_tool_iterations.max(1) {
        if ctx.is_cancelled() {
            return Err(GenerateError::Cancelled);
        }

        let chat_request = ChatRequest {
            model: request.model.clone(),
            messages: messages.clone(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            tools: if tool_definitions.is_empty() {
                None
            } else {
                Some(tool_definitions.clone())
            },
            tool_choice: if tool_definitions.is_empty() {
                None
            } else {
                Some(ToolChoice::Auto)
            },
            stream: true,
            ..ChatRequest::default()
        };

        let mut frames = generator.provider.chat_stream(&chat_request).await?;
        while let Some(frame) = frames.next().await {
            if ctx.is_cancelled() {
                return Err(GenerateError::Cancelled);
            }
            match frame? {
                ProviderFrame::Usage(u) => usage += u,
                ProviderFrame::Done { stop_reason: done } => {
                    if let Some(done) = done {
                        stop_reason = done;
                    }
                }
                other => demux.handle(&other),
            }
        }

        let (iteration_content, calls) = demux.end_iteration();

        let calls: Vec<ToolCallBuilder> = calls
            .into_iter()
            .filter(|call| !processed.contains(&call.id))
            .collect();

        let registry = request.tools.as_ref();
        if !request.auto_execute_tools || registry.is_none() || calls.is_empty() {
            break;
        }
        let registry = registry.expect("checked above");

        debug!(
            iteration,
            calls = calls.len(),
            "Executing model-emitted tool calls"
        );

        let tool_calls: Vec<ToolCall> = calls
            .iter()
            .map(|call| ToolCall::function(&call.id, &call.name, &call.arguments))
            .collect();
        let mut assistant = ChatMessage::assistant_tool_calls(tool_calls);
        if !iteration_content.is_empty() {
            assistant.content = iteration_content;
        }
        messages.push(assistant);

        let tool_ctx = ToolContext::with_cancellation(ctx.cancellation.clone());
        for call in calls {
            processed.insert(call.id.clone());
            let arguments: Value = serde_json::from_str(&call.arguments)
                .unwrap_or_else(|_| serde_json::json!({ "raw": call.arguments }));

            sink.emit(EventKind::ToolResultStart {
                tool_id: call.id.clone(),
                tool_name: call.name.clone(),
            });
            let execution = registry
                .execute_with_sink(&tool_ctx, &call.name, arguments, Some(&sink))
                .await;
            let serialized = execution.serialized_output();
            sink.emit(EventKind::ToolResultDelta {
                tool_id: call.id.clone(),
                delta: serialized.clone(),
            });
            sink.emit(EventKind::ToolResultEnd {
                tool_id: call.id.clone(),
            });

            messages.push(ChatMessage::tool(&call.id, &call.name, serialized));
            tool_executions.push(execution);
        }

        if iteration + 1 == request.max_tool_iterations.max(1) {
            warn!(execution_id = %execution_id, "Tool loop reached its iteration bound");
        }
    }

    let (content, thinking, reasoning_steps) = demux.finish();
    if !content.is_empty() {
        messages.push(ChatMessage::assistant(&content));
    }

    // Post-processing: UI parts, output guardrails, follow-up suggestions.
    let parts = if request.parse_ui_output {
        let parts = parse_ui_parts(&content);
        for part in &parts {
            if let ContentPart::Ui { part_type, data } = part {
                let part_id = new_block_id("part");
                sink.emit(EventKind::UiPartStart {
                    part_id: part_id.clone(),
                    part_type: part_type.clone(),
                });
                sink.emit(EventKind::UiPartDelta {
                    part_id: part_id.clone(),
                    section: "data".to_owned(),
                    data: data.clone(),
                });
                sink.emit(EventKind::UiPartEnd { part_id });
            }
        }
        parts
    } else if content.is_empty() {
        Vec::new()
    } else {
        vec![ContentPart::Text {
            text: content.clone(),
        }]
    };

    violations.extend(generator.check_output(&content).await?);

    let suggestions = match request.suggestions {
        Some(count) if count > 0 => {
            generate_suggestions(&generator, &request.model, &messages, count, &mut usage).await
        }
        _ => Vec::new(),
    };

    info!(
        execution_id = %execution_id,
        tool_executions = tool_executions.len(),
        content_len = content.len(),
        "Stream finished"
    );

    Ok(StreamResponse {
        execution_id,
        content,
        thinking,
        reasoning_steps,
        messages,
        tool_executions,
        parts,
        suggestions,
        usage,
        stop_reason,
        violations,
    })
}

async fn generate_suggestions(
    generator: &Generator,
    model: &str,
    messages: &[ChatMessage],
    count: u8,
    usage: &mut Usage,
) -> Vec<String> {
    let mut request_messages = messages.to_vec();
    request_messages.push(ChatMessage::user(format!(
        "Suggest up to {count} short follow-up questions the user might ask next. \
         Return a JSON array of strings."
    )));
    let request = ChatRequest::with_messages(model, request_messages);

    match generator.provider.chat(&request).await {
        Ok(response) => {
            if let Some(u) = response.usage {
                *usage += u;
            }
            parse_suggestions(response.text(), count as usize)
        }
        Err(err) => {
            debug!(error = %err, "Suggestion generation failed");
            Vec::new()
        }
    }
}

fn parse_suggestions(text: &str, limit: usize) -> Vec<String> {
    let array = text
        .find('[')
        .and_then(|start| text.rfind(']').map(|end| (start, end)))
        .filter(|(start, end)| start < end)
        .and_then(|(start, end)| {
            serde_json::from_str::<Vec<String>>(&text[start..=end]).ok()
        });

    let suggestions = array.unwrap_or_else(|| {
        text.lines()
            .map(|line| line.trim().trim_start_matches(['-', '*', ' ']).to_owned())
            .filter(|line| !line.is_empty())
            .collect()
    });

    suggestions.into_iter().take(limit).collect()
}

// ---------------------------------------------------------------------------
// Demux — raw frames to typed block events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct ToolCallBuilder {
    id: String,
    name: String,
    arguments: String,
}

/// State machine translating provider frames into block events.
struct Demux {
    sink: EventSink,
    thinking_enabled: bool,
    markers: Vec<(&'static str, &'static str)>,

    content_open: bool,
    thinking_open: bool,
    active_end: Option<&'static str>,

    content: String,
    iteration_content: String,
    thinking_segment: String,
    thinking: String,
    reasoning_steps: Vec<String>,

    builders: Vec<ToolCallBuilder>,
    index_map: HashMap<usize, usize>,
    id_map: HashMap<String, usize>,
    current_tool: Option<usize>,
}

impl Demux {
    fn new(
        sink: EventSink,
        thinking_enabled: bool,
        markers: Vec<(&'static str, &'static str)>,
    ) -> Self {
        Self {
            sink,
            thinking_enabled,
            markers,
            content_open: false,
            thinking_open: false,
            active_end: None,
            content: String::new(),
            iteration_content: String::new(),
            thinking_segment: String::new(),
            thinking: String::new(),
            reasoning_steps: Vec::new(),
            builders: Vec::new(),
            index_map: HashMap::new(),
            id_map: HashMap::new(),
            current_tool: None,
        }
    }

    fn handle(&mut self, frame: &ProviderFrame) {
        match frame {
            ProviderFrame::BlockStart {
                block,
                tool_id,
                tool_name,
            } => self.block_start(*block, tool_id.as_deref(), tool_name.as_deref()),
            ProviderFrame::BlockDelta {
                block,
                tool_id,
                delta,
            } => self.block_delta(*block, tool_id.as_deref(), delta),
            ProviderFrame::BlockStop { block, tool_id } => {
                self.block_stop(*block, tool_id.as_deref());
            }
            ProviderFrame::Delta {
                content,
                tool_calls,
            } => {
                if let Some(content) = content {
                    self.legacy_text(content);
                }
                for delta in tool_calls {
                    self.legacy_tool_delta(delta);
                }
            }
            ProviderFrame::Usage(_) | ProviderFrame::Done { .. } => {}
        }
    }

    // --- block-tagged path -------------------------------------------------

    fn block_start(&mut self, block: BlockType, tool_id: Option<&str>, tool_name: Option<&str>) {
        match block {
            BlockType::Thinking => self.open_thinking(None),
            BlockType::Content => self.open_content(),
            BlockType::ToolUse => {
                self.close_tool_block();
                let id = tool_id
                    .map(str::to_owned)
                    .unwrap_or_else(|| new_block_id("tool"));
                let name = tool_name.unwrap_or_default().to_owned();
                let position = self.builders.len();
                self.builders.push(ToolCallBuilder {
                    id: id.clone(),
                    name: name.clone(),
                    arguments: String::new(),
                });
                self.id_map.insert(id.clone(), position);
                self.current_tool = Some(position);
                self.sink.emit(EventKind::ToolUseStart {
                    tool_id: id,
                    tool_name: name,
                });
            }
        }
    }

    fn block_delta(&mut self, block: BlockType, tool_id: Option<&str>, delta: &str) {
        match block {
            BlockType::Thinking => {
                if !self.thinking_open {
                    self.open_thinking(None);
                }
                self.thinking_segment.push_str(delta);
                self.sink.emit(EventKind::ThinkingDelta {
                    delta: delta.to_owned(),
                });
            }
            BlockType::Content => {
                self.open_content();
                self.push_content(delta);
            }
            BlockType::ToolUse => {
                let position = tool_id
                    .and_then(|id| self.id_map.get(id).copied())
                    .or(self.current_tool);
                if let Some(position) = position {
                    self.builders[position].arguments.push_str(delta);
                    let id = self.builders[position].id.clone();
                    self.sink.emit(EventKind::ToolUseDelta {
                        tool_id: id,
                        delta: delta.to_owned(),
                    });
                }
            }
        }
    }

    fn block_stop(&mut self, block: BlockType, tool_id: Option<&str>) {
        match block {
            BlockType::Thinking => self.close_thinking(),
            BlockType::Content => {
                if self.content_open {
                    self.sink.emit(EventKind::ContentEnd);
                    self.content_open = false;
                }
            }
            BlockType::ToolUse => {
                let position = tool_id
                    .and_then(|id| self.id_map.get(id).copied())
                    .or(self.current_tool);
                if let Some(position) = position {
                    let id = self.builders[position].id.clone();
                    self.sink.emit(EventKind::ToolUseEnd { tool_id: id });
                    if self.current_tool == Some(position) {
                        self.current_tool = None;
                    }
                }
            }
        }
    }

    // --- legacy path -------------------------------------------------------

    fn legacy_text(&mut self, token: &str) {
        if !self.thinking_enabled {
            if !token.is_empty() {
                self.open_content();
                self.push_content(token);
            }
            return;
        }

        let mut rest = token;
        while !rest.is_empty() {
            if self.thinking_open {
                let end = self.active_end.unwrap_or("</thinking>");
                if let Some(position) = rest.find(end) {
                    let split = position + end.len();
                    let (inside, after) = rest.split_at(split);
                    self.thinking_segment.push_str(inside);
                    self.sink.emit(EventKind::ThinkingDelta {
                        delta: inside.to_owned(),
                    });
                    self.close_thinking();
                    rest = after;
                } else {
                    self.thinking_segment.push_str(rest);
                    self.sink.emit(EventKind::ThinkingDelta {
                        delta: rest.to_owned(),
                    });
                    break;
                }
            } else if let Some((position, pair)) = self.find_earliest_start(rest) {
                let before = &rest[..position];
                if !before.is_empty() {
                    self.open_content();
                    self.push_content(before);
                }
                self.open_thinking(Some(pair.1));
                rest = &rest[position..];
            } else {
                self.open_content();
                self.push_content(rest);
                break;
            }
        }
    }

    /// Earliest start-marker match; ties prefer the longest marker so
    /// `<thinking>` is never mistaken for an extended `<think>`.
    fn find_earliest_start(&self, text: &str) -> Option<(usize, (&'static str, &'static str))> {
        let mut best: Option<(usize, (&'static str, &'static str))> = None;
        for pair in &self.markers {
            if let Some(position) = text.find(pair.0) {
                let better = match best {
                    None => true,
                    Some((best_pos, best_pair)) => {
                        position < best_pos
                            || (position == best_pos && pair.0.len() > best_pair.0.len())
                    }
                };
                if better {
                    best = Some((position, *pair));
                }
            }
        }
        best
    }

    fn legacy_tool_delta(&mut self, delta: &ToolCallDelta) {
        let key = delta.index.unwrap_or(0);
        let known = self.index_map.get(&key).copied();
        let is_new = match (known, &delta.id) {
            (None, _) => true,
            (Some(position), Some(id)) => self.builders[position].id != *id,
            (Some(_), None) => false,
        };

        let position = if is_new {
            self.close_tool_block();
            let id = delta
                .id
                .clone()
                .unwrap_or_else(|| new_block_id("tool"));
            let name = delta.name.clone().unwrap_or_default();
            let position = self.builders.len();
            self.builders.push(ToolCallBuilder {
                id: id.clone(),
                name: name.clone(),
                arguments: String::new(),
            });
            self.index_map.insert(key, position);
            self.id_map.insert(id.clone(), position);
            self.current_tool = Some(position);
            self.sink.emit(EventKind::ToolUseStart {
                tool_id: id,
                tool_name: name,
            });
            position
        } else {
            known.expect("known position when not new")
        };

        if let Some(name) = &delta.name
            && self.builders[position].name.is_empty()
        {
            self.builders[position].name.clone_from(name);
        }

        if let Some(arguments) = &delta.arguments
            && !arguments.is_empty()
        {
            self.builders[position].arguments.push_str(arguments);
            let id = self.builders[position].id.clone();
            self.sink.emit(EventKind::ToolUseDelta {
                tool_id: id,
                delta: arguments.clone(),
            });
        }
    }

    // --- shared ------------------------------------------------------------

    fn open_content(&mut self) {
        if !self.content_open {
            self.sink.emit(EventKind::ContentStart);
            self.content_open = true;
        }
    }

    fn push_content(&mut self, text: &str) {
        self.content.push_str(text);
        self.iteration_content.push_str(text);
        self.sink.emit(EventKind::ContentDelta {
            delta: text.to_owned(),
        });
    }

    fn open_thinking(&mut self, end_marker: Option<&'static str>) {
        if !self.thinking_open {
            self.sink.emit(EventKind::ThinkingStart);
            self.thinking_open = true;
            self.thinking_segment.clear();
        }
        self.active_end = end_marker;
    }

    fn close_thinking(&mut self) {
        if !self.thinking_open {
            return;
        }
        self.sink.emit(EventKind::ThinkingEnd);
        self.thinking_open = false;

        let stripped = self.strip_markers(&self.thinking_segment.clone());
        if !stripped.is_empty() {
            if !self.thinking.is_empty() {
                self.thinking.push('\n');
            }
            self.thinking.push_str(&stripped);
            self.reasoning_steps.push(stripped);
        }
        self.thinking_segment.clear();
        self.active_end = None;
    }

    fn strip_markers(&self, text: &str) -> String {
        let mut stripped = text.to_owned();
        for (start, end) in &self.markers {
            stripped = stripped.replace(start, "").replace(end, "");
        }
        stripped.trim().to_owned()
    }

    fn close_tool_block(&mut self) {
        if let Some(position) = self.current_tool.take() {
            let id = self.builders[position].id.clone();
            self.sink.emit(EventKind::ToolUseEnd { tool_id: id });
        }
    }

    /// Close per-iteration blocks and drain the iteration's tool calls.
    fn end_iteration(&mut self) -> (String, Vec<ToolCallBuilder>) {
        self.close_tool_block();
        // An unterminated thinking block is closed implicitly so its text
        // is not lost.
        self.close_thinking();
        self.index_map.clear();
        self.id_map.clear();
        let calls = std::mem::take(&mut self.builders);
        let iteration_content = std::mem::take(&mut self.iteration_content);
        (iteration_content, calls)
    }

    /// Close the run and return `(content, thinking, reasoning_steps)`.
    fn finish(mut self) -> (String, String, Vec<String>) {
        self.close_thinking();
        if self.content_open {
            self.sink.emit(EventKind::ContentEnd);
            self.content_open = false;
        }
        (self.content, self.thinking, self.reasoning_steps)
    }
}

// ---------------------------------------------------------------------------
// UI output parsing
// ---------------------------------------------------------------------------

/// Split content into text parts and UI fragments.
///
/// Recognizes fenced blocks (<code>```ui:type … ```</code>) and inline
/// `<ui:type>{…}</ui:type>` tags. Malformed fragments stay in the text.
#[must_use]
pub(crate) fn parse_ui_parts(content: &str) -> Vec<ContentPart> {
    let mut parts = Vec::new();
    let mut rest = content;

    loop {
        let fenced = rest.find("```ui:");
        let inline = rest.find("<ui:");
        let Some((position, is_fenced)) = (match (fenced, inline) {
            (Some(f), Some(i)) if f <= i => Some((f, true)),
            (_, Some(i)) => Some((i, false)),
            (Some(f), None) => Some((f, true)),
            (None, None) => None,
        }) else {
            break;
        };

        let parsed = if is_fenced {
            parse_fenced_ui(&rest[position..])
        } else {
            parse_inline_ui(&rest[position..])
        };

        match parsed {
            Some((part_type, data, consumed)) => {
                let before = &rest[..position];
                if !before.trim().is_empty() {
                    parts.push(ContentPart::Text {
                        text: before.trim().to_owned(),
                    });
                }
                parts.push(ContentPart::Ui { part_type, data });
                rest = &rest[position + consumed..];
            }
            None => {
                // Malformed opener: keep everything up to and past it as text
                // by ending the scan here.
                break;
            }
        }
    }

    if !rest.trim().is_empty() {
        parts.push(ContentPart::Text {
            text: rest.trim().to_owned(),
        });
    }
    parts
}

/// Parse <code>```ui:type\n{json}\n```</code>; returns (type, data, consumed).
fn parse_fenced_ui(text: &str) -> Option<(String, Value, usize)> {
    let after_open = &text["```ui:".len()..];
    let newline = after_open.find('\n')?;
    let part_type = after_open[..newline].trim().to_owned();
    let body_start = newline + 1;
    let close = after_open[body_start..].find("```")?;
    let body = &after_open[body_start..body_start + close];
    let data = json_util::parse_json_span_value(body)?;
    let consumed = "```ui:".len() + body_start + close + 3;
    Some((part_type, data, consumed))
}

/// Parse `<ui:type>{json}</ui:type>`; returns (type, data, consumed).
fn parse_inline_ui(text: &str) -> Option<(String, Value, usize)> {
    let after_open = &text["<ui:".len()..];
    let tag_end = after_open.find('>')?;
    let part_type = after_open[..tag_end].trim().to_owned();
    let closing = format!("</ui:{part_type}>");
    let body_start = tag_end + 1;
    let close = after_open[body_start..].find(&closing)?;
    let body = &after_open[body_start..body_start + close];
    let data = json_util::parse_json_span_value(body)?;
    let consumed = "<ui:".len() + body_start + close + closing.len();
    Some((part_type, data, consumed))
}
