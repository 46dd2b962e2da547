//! The model-provider port.
//!
//! The runtime consumes language models through [`ChatProvider`]: one-shot
//! [`chat`](ChatProvider::chat) and streaming
//! [`chat_stream`](ChatProvider::chat_stream). Concrete HTTP clients live
//! outside this crate; the [`mock`] submodule ships a scripted provider for
//! tests and examples.
//!
//! Streaming providers yield [`ProviderFrame`]s in one of two shapes:
//!
//! - **Block-tagged**: frames carry an explicit block type and
//!   start/delta/stop state, forwarded 1:1 into typed events.
//! - **Legacy**: frames carry only incremental text and partial tool-call
//!   records; the streaming generator synthesizes the block lifecycle.
//!
//! A frame that carries both block data and legacy content is processed as a
//! block frame; the legacy content on it is ignored.

pub mod mock;

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::GenerateError;
use crate::message::{ChatMessage, ToolCall};
use crate::tool::ToolDefinition;
use crate::usage::Usage;

/// Reason why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum StopReason {
    /// Natural stop (end of response).
    #[default]
    Stop,
    /// Maximum token limit reached.
    Length,
    /// Model decided to call tools.
    ToolCalls,
    /// Content was filtered by safety systems.
    ContentFilter,
}

impl StopReason {
    /// Returns the string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Stop => "stop",
            Self::Length => "length",
            Self::ToolCalls => "tool_calls",
            Self::ContentFilter => "content_filter",
        }
    }

    /// Parse from a provider's finish-reason string (case-insensitive).
    ///
    /// Accepts the common provider spellings: `stop`/`end_turn`,
    /// `length`/`max_tokens`, `tool_calls`/`tool_use`, `content_filter`.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "length" | "max_tokens" => Self::Length,
            "tool_calls" | "tool_use" => Self::ToolCalls,
            "content_filter" => Self::ContentFilter,
            _ => Self::Stop,
        }
    }

    /// Returns `true` if the model called tools.
    #[must_use]
    pub const fn is_tool_call(&self) -> bool {
        matches!(self, Self::ToolCalls)
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Controls how the model uses tools.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoice {
    /// Model decides whether to use tools.
    #[default]
    Auto,
    /// Model must use at least one tool.
    Required,
    /// Model cannot use any tools.
    None,
    /// Model must use the named function.
    Function(String),
}

/// A chat completion request.
///
/// The shared envelope for every generation entry point: model, messages,
/// sampling parameters, and tool schemas.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Model identifier.
    #[serde(default)]
    pub model: String,

    /// Conversation messages.
    #[serde(default)]
    pub messages: Vec<ChatMessage>,

    /// Sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Maximum tokens to generate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Nucleus sampling parameter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    /// Top-k sampling parameter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,

    /// Stop sequences.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,

    /// Tools available for the model to call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,

    /// Controls how the model uses tools.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,

    /// Whether to stream the response.
    #[serde(default)]
    pub stream: bool,
}

impl ChatRequest {
    /// Creates a new request for the given model.
    #[must_use]
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }

    /// Creates a request with messages.
    #[must_use]
    pub fn with_messages(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            ..Self::default()
        }
    }

    /// Adds a system message.
    #[must_use]
    pub fn system(mut self, content: impl Into<String>) -> Self {
        self.messages.push(ChatMessage::system(content));
        self
    }

    /// Adds a user message.
    #[must_use]
    pub fn user(mut self, content: impl Into<String>) -> Self {
        self.messages.push(ChatMessage::user(content));
        self
    }

    /// Sets all messages.
    #[must_use]
    pub fn messages(mut self, messages: Vec<ChatMessage>) -> Self {
        self.messages = messages;
        self
    }

    /// Sets the temperature.
    #[must_use]
    pub const fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Sets max tokens.
    #[must_use]
    pub const fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Sets tools.
    #[must_use]
    pub fn tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = if tools.is_empty() { None } else { Some(tools) };
        self
    }

    /// Sets the tool choice.
    #[must_use]
    pub fn tool_choice(mut self, choice: ToolChoice) -> Self {
        self.tool_choice = Some(choice);
        self
    }

    /// Enables streaming.
    #[must_use]
    pub const fn stream(mut self) -> Self {
        self.stream = true;
        self
    }
}

/// A chat completion response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    /// The generated message.
    pub message: ChatMessage,

    /// Why the model stopped generating.
    pub stop_reason: StopReason,

    /// Token usage statistics.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,

    /// Model identifier used for this response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl ChatResponse {
    /// Creates a new response with a message.
    #[must_use]
    pub const fn new(message: ChatMessage) -> Self {
        Self {
            message,
            stop_reason: StopReason::Stop,
            usage: None,
            model: None,
        }
    }

    /// Creates a response from text content.
    #[must_use]
    pub fn from_text(content: impl Into<String>) -> Self {
        Self::new(ChatMessage::assistant(content))
    }

    /// Sets the stop reason.
    #[must_use]
    pub const fn with_stop_reason(mut self, reason: StopReason) -> Self {
        self.stop_reason = reason;
        self
    }

    /// Sets usage statistics.
    #[must_use]
    pub const fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Returns the text content of the response.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.message.content
    }

    /// Returns the tool calls if present.
    #[must_use]
    pub fn tool_calls(&self) -> Option<&[ToolCall]> {
        self.message.tool_calls.as_deref()
    }

    /// Returns `true` if the response contains tool calls.
    #[must_use]
    pub fn has_tool_calls(&self) -> bool {
        self.message.has_tool_calls()
    }
}

/// Block type carried by a block-tagged stream frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum BlockType {
    /// Extended reasoning text.
    Thinking,
    /// User-visible answer text.
    Content,
    /// Model-emitted tool call arguments.
    ToolUse,
}

/// A partial tool-call record on a legacy frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallDelta {
    /// Position of the tool call within the response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    /// Tool call id; present on the first delta of a call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Function name; present on the first delta of a call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Partial JSON arguments.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

/// A raw frame from a streaming provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
#[non_exhaustive]
pub enum ProviderFrame {
    /// Block-tagged path: a block opened.
    BlockStart {
        /// The block's type.
        block: BlockType,
        /// Tool call id for `tool_use` blocks.
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_id: Option<String>,
        /// Tool name for `tool_use` blocks.
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_name: Option<String>,
    },
    /// Block-tagged path: a chunk within an open block.
    BlockDelta {
        /// The block's type.
        block: BlockType,
        /// Tool call id for `tool_use` blocks.
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_id: Option<String>,
        /// The chunk.
        delta: String,
    },
    /// Block-tagged path: a block closed.
    BlockStop {
        /// The block's type.
        block: BlockType,
        /// Tool call id for `tool_use` blocks.
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_id: Option<String>,
    },
    /// Legacy path: incremental content and/or partial tool calls.
    Delta {
        /// Incremental text content.
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        /// Partial tool-call records.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCallDelta>,
    },
    /// Token usage, usually just before the stream ends.
    Usage(Usage),
    /// The stream is complete.
    Done {
        /// Stop reason from the model, when the provider reports one.
        #[serde(skip_serializing_if = "Option::is_none")]
        stop_reason: Option<StopReason>,
    },
}

impl ProviderFrame {
    /// Creates a legacy text delta frame.
    #[must_use]
    pub fn text(content: impl Into<String>) -> Self {
        Self::Delta {
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }

    /// Creates a legacy tool-call delta frame.
    #[must_use]
    pub fn tool_call_delta(
        index: usize,
        id: Option<&str>,
        name: Option<&str>,
        arguments: impl Into<String>,
    ) -> Self {
        Self::Delta {
            content: None,
            tool_calls: vec![ToolCallDelta {
                index: Some(index),
                id: id.map(str::to_owned),
                name: name.map(str::to_owned),
                arguments: Some(arguments.into()),
            }],
        }
    }

    /// Creates a done frame.
    #[must_use]
    pub const fn done(stop_reason: Option<StopReason>) -> Self {
        Self::Done { stop_reason }
    }
}

/// A stream of provider frames.
pub type FrameStream =
    Pin<Box<dyn Stream<Item = Result<ProviderFrame, GenerateError>> + Send>>;

/// The port all model backends implement.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Send a chat completion request and receive a complete response.
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, GenerateError>;

    /// Send a chat completion request and receive a stream of frames.
    ///
    /// The default implementation reports streaming as unsupported;
    /// providers that can stream override this and
    /// [`supports_streaming`](ChatProvider::supports_streaming).
    async fn chat_stream(&self, request: &ChatRequest) -> Result<FrameStream, GenerateError> {
        let _ = request;
        Err(GenerateError::provider(format!(
            "provider '{}' does not support streaming",
            self.provider_name()
        )))
    }

    /// Name of this provider, for error messages and logging.
    fn provider_name(&self) -> &'static str;

    /// Default model for this provider.
    fn default_model(&self) -> &str {
        ""
    }

    /// Whether this provider supports streaming.
    fn supports_streaming(&self) -> bool {
        false
    }
}

/// Type alias for an Arc-wrapped provider.
pub type SharedChatProvider = Arc<dyn ChatProvider>;

/// Convenience extensions over [`ChatProvider`].
#[async_trait]
pub trait ChatProviderExt: ChatProvider {
    /// Send a single user prompt and return the text of the reply.
    async fn complete(&self, model: &str, prompt: &str) -> Result<String, GenerateError> {
        let request = ChatRequest::new(model).user(prompt);
        let response = self.chat(&request).await?;
        Ok(response.text().to_owned())
    }
}

impl<T: ChatProvider + ?Sized> ChatProviderExt for T {}
