//! Scripted provider implementation for testing.
//!
//! [`MockProvider`] returns predefined responses in sequence, cycling once
//! the script is exhausted, and replays scripted frame sequences for
//! streaming calls. It also records every request it receives so tests can
//! assert on the transcripts the runtime builds.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::stream;

use crate::error::GenerateError;
use crate::message::ToolCall;

use super::{
    ChatProvider, ChatRequest, ChatResponse, FrameStream, ProviderFrame, StopReason,
};

/// A scripted provider for tests.
///
/// Chat calls consume `responses` in order and cycle; stream calls consume
/// `scripts` (each a full frame sequence) the same way.
#[derive(Debug, Default)]
pub struct MockProvider {
    responses: Vec<ChatResponse>,
    scripts: Vec<Vec<ProviderFrame>>,
    response_index: AtomicUsize,
    script_index: AtomicUsize,
    requests: Mutex<Vec<ChatRequest>>,
}

impl MockProvider {
    /// Create an empty mock provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a scripted response.
    #[must_use]
    pub fn with_response(mut self, response: ChatResponse) -> Self {
        self.responses.push(response);
        self
    }

    /// Append a plain-text scripted response.
    #[must_use]
    pub fn with_text(self, content: impl Into<String>) -> Self {
        self.with_response(ChatResponse::from_text(content))
    }

    /// Append a scripted response that calls one tool.
    #[must_use]
    pub fn with_tool_call(
        self,
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        let message = crate::message::ChatMessage::assistant_tool_calls(vec![ToolCall::function(
            id, name, arguments,
        )]);
        self.with_response(ChatResponse::new(message).with_stop_reason(StopReason::ToolCalls))
    }

    /// Append a scripted frame sequence for one streaming call.
    #[must_use]
    pub fn with_frames(mut self, frames: Vec<ProviderFrame>) -> Self {
        self.scripts.push(frames);
        self
    }

    /// Append a streaming script made of plain text chunks.
    #[must_use]
    pub fn with_text_frames<I, S>(self, chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut frames: Vec<ProviderFrame> =
            chunks.into_iter().map(ProviderFrame::text).collect();
        frames.push(ProviderFrame::done(Some(StopReason::Stop)));
        self.with_frames(frames)
    }

    /// The requests this provider has received, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Number of chat calls served so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.response_index.load(Ordering::SeqCst)
    }

    fn record(&self, request: &ChatRequest) {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
    }
}

#[async_trait]
impl ChatProvider for MockProvider {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, GenerateError> {
        self.record(request);
        if self.responses.is_empty() {
            return Err(GenerateError::provider("mock provider has no responses"));
        }
        let index = self.response_index.fetch_add(1, Ordering::SeqCst);
        Ok(self.responses[index % self.responses.len()].clone())
    }

    async fn chat_stream(&self, request: &ChatRequest) -> Result<FrameStream, GenerateError> {
        self.record(request);
        if self.scripts.is_empty() {
            return Err(GenerateError::provider("mock provider has no frame scripts"));
        }
        let index = self.script_index.fetch_add(1, Ordering::SeqCst);
        let frames = self.scripts[index % self.scripts.len()].clone();
        Ok(Box::pin(stream::iter(frames.into_iter().map(Ok))))
    }

    fn provider_name(&self) -> &'static str {
        "mock"
    }

    fn default_model(&self) -> &str {
        "mock-model"
    }

    fn supports_streaming(&self) -> bool {
        !self.scripts.is_empty()
    }
}
