//! One-shot text generation.
//!
//! Renders the prompt template, assembles `[system?, history…, user]`,
//! makes exactly one model call under the configured timeout, and extracts
//! content, parsed tool calls, and usage. No retries at this layer.

use std::time::Duration;

use serde_json::Value;
use tracing::{debug, error};

use crate::error::GenerateError;
use crate::guardrail::Violation;
use crate::message::ChatMessage;
use crate::prompt::{self, TemplateVars};
use crate::provider::{ChatRequest, ToolChoice};
use crate::tool::ToolDefinition;
use crate::usage::Usage;

use super::Generator;

/// Request envelope for text and object generation.
#[derive(Debug, Clone, Default)]
pub struct TextRequest {
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
    /// Nucleus sampling parameter.
    pub top_p: Option<f32>,
    /// Top-k sampling parameter.
    pub top_k: Option<u32>,
    /// Stop sequences.
    pub stop: Option<Vec<String>>,
    /// Tool schemas offered to the model.
    pub tools: Option<Vec<ToolDefinition>>,
    /// Tool-choice directive.
    pub tool_choice: Option<ToolChoice>,
}

impl TextRequest {
    /// Create a request for a model and prompt template.
    #[must_use]
    pub fn new(model: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            template: template.into(),
            ..Self::default()
        }
    }

    /// Set the system prompt.
    #[must_use]
    pub fn system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Add a template variable.
    #[must_use]
    pub fn var(mut self, key: impl Into<String>, value: Value) -> Self {
        self.vars.insert(key.into(), value);
        self
    }

    /// Set the conversation history.
    #[must_use]
    pub fn history(mut self, history: Vec<ChatMessage>) -> Self {
        self.history = history;
        self
    }

    /// Set the temperature.
    #[must_use]
    pub const fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set max tokens.
    #[must_use]
    pub const fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Offer tools to the model.
    #[must_use]
    pub fn tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = if tools.is_empty() { None } else { Some(tools) };
        self
    }

    /// Render the template and assemble the provider request.
    pub(crate) fn to_chat_request(&self) -> (String, ChatRequest) {
        let rendered = prompt::render(&self.template, &self.vars);
        let messages =
            prompt::build_messages(self.system.as_deref(), &self.history, Some(&rendered));
        let request = ChatRequest {
            model: self.model.clone(),
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            top_p: self.top_p,
            top_k: self.top_k,
            stop: self.stop.clone(),
            tools: self.tools.clone(),
            tool_choice: self.tool_choice.clone(),
            stream: false,
        };
        (rendered, request)
    }
}

/// A model-emitted tool call with its arguments parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedToolCall {
    /// Tool call id.
    pub id: String,
    /// Tool name.
    pub name: String,
    /// Parsed arguments; `{"raw": …}` when the JSON was malformed.
    pub arguments: Value,
}

/// Result of a one-shot generation.
#[derive(Debug, Clone)]
pub struct TextResult {
    /// The model's text content.
    pub content: String,
    /// Tool calls the model emitted, arguments parsed.
    pub tool_calls: Vec<ParsedToolCall>,
    /// Usage counters reported by the provider.
    pub usage: Usage,
    /// Wall-clock duration of the call.
    pub duration: Duration,
    /// Guardrail violations found on input or output.
    pub violations: Vec<Violation>,
}

impl Generator {
    /// Generate text with a single model call.
    pub async fn generate_text(
        &self,
        request: &TextRequest,
    ) -> Result<TextResult, GenerateError> {
        if request.model.is_empty() {
            return Err(GenerateError::configuration("model must not be empty"));
        }

        let started = std::time::Instant::now();
        let (rendered, chat_request) = request.to_chat_request();

        let mut violations = self.check_input(&rendered).await?;

        debug!(
            model = %request.model,
            messages = chat_request.messages.len(),
            "Generating text"
        );

        let response = tokio::time::timeout(
            self.config.text_timeout,
            self.provider.chat(&chat_request),
        )
        .await
        .map_err(|_| GenerateError::Timeout(self.config.text_timeout))?
        .map_err(|e| {
            error!(error = %e, model = %request.model, "Text generation failed");
            e
        })?;

        let tool_calls = response
            .tool_calls()
            .unwrap_or_default()
            .iter()
            .map(|call| ParsedToolCall {
                id: call.id.clone(),
                name: call.name().to_owned(),
                arguments: call.parse_arguments(),
            })
            .collect();

        let content = response.text().to_owned();
        violations.extend(self.check_output(&content).await?);

        let duration = started.elapsed();
        debug!(duration_ms = duration.as_millis() as u64, "Text generated");

        Ok(TextResult {
            content,
            tool_calls,
            usage: response.usage.unwrap_or_default(),
            duration,
            violations,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::guardrail::Guardrails;
    use crate::message::ToolCall;
    use crate::provider::mock::MockProvider;
    use crate::provider::{ChatResponse, StopReason};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn returns_provider_content_and_usage() {
        let haiku = "Syntax flows like streams / Bugs hide in the silent loops / Coffee saves the day";
        let provider = Arc::new(
            MockProvider::new().with_response(
                ChatResponse::from_text(haiku).with_usage(Usage::new(12, 19)),
            ),
        );
        let generator = Generator::new(provider);

        let result = generator
            .generate_text(&TextRequest::new("mock-model", "Write a haiku about programming"))
            .await
            .unwrap();

        assert_eq!(result.content, haiku);
        assert_eq!(result.usage.input_tokens, 12);
        assert_eq!(result.usage.output_tokens, 19);
        assert!(result.tool_calls.is_empty());
    }

    #[tokio::test]
    async fn renders_template_into_user_message() {
        let provider = Arc::new(MockProvider::new().with_text("ok"));
        let generator = Generator::new(provider.clone());

        let request = TextRequest::new("m", "Summarize {{.topic}} briefly")
            .system("be terse")
            .var("topic", json!("ownership"));
        let _ = generator.generate_text(&request).await.unwrap();

        let sent = provider.requests();
        assert_eq!(sent[0].messages[0].content, "be terse");
        assert_eq!(sent[0].messages[1].content, "Summarize ownership briefly");
    }

    #[tokio::test]
    async fn parses_tool_call_arguments() {
        let message = crate::message::ChatMessage::assistant_tool_calls(vec![
            ToolCall::function("tc_1", "add", r#"{"a":2,"b":3}"#),
            ToolCall::function("tc_2", "broken", "not json"),
        ]);
        let provider = Arc::new(MockProvider::new().with_response(
            ChatResponse::new(message).with_stop_reason(StopReason::ToolCalls),
        ));
        let generator = Generator::new(provider);

        let result = generator
            .generate_text(&TextRequest::new("m", "do the math"))
            .await
            .unwrap();

        assert_eq!(result.tool_calls.len(), 2);
        assert_eq!(result.tool_calls[0].arguments["a"], 2);
        assert_eq!(result.tool_calls[1].arguments["raw"], "not json");
    }

    #[tokio::test]
    async fn empty_model_is_a_config_error() {
        let generator = Generator::new(Arc::new(MockProvider::new().with_text("x")));
        let err = generator
            .generate_text(&TextRequest::new("", "prompt"))
            .await
            .unwrap_err();
        assert!(matches!(err, GenerateError::Configuration(_)));
    }

    #[tokio::test]
    async fn provider_errors_surface() {
        let generator = Generator::new(Arc::new(MockProvider::new()));
        let err = generator
            .generate_text(&TextRequest::new("m", "prompt"))
            .await
            .unwrap_err();
        assert!(matches!(err, GenerateError::Provider(_)));
    }

    struct FlagEverything;

    #[async_trait]
    impl Guardrails for FlagEverything {
        async fn validate_input(&self, _: &str) -> Result<Vec<Violation>, GenerateError> {
            Ok(vec![Violation::new("input", "flagged input")])
        }
        async fn validate_output(&self, _: &str) -> Result<Vec<Violation>, GenerateError> {
            Ok(vec![Violation::new("output", "flagged output")])
        }
    }

    #[tokio::test]
    async fn guardrail_violations_are_collected() {
        let generator = Generator::new(Arc::new(MockProvider::new().with_text("fine")))
            .with_guardrails(Arc::new(FlagEverything));

        let result = generator
            .generate_text(&TextRequest::new("m", "prompt"))
            .await
            .unwrap();

        let rules: Vec<&str> = result.violations.iter().map(|v| v.rule.as_str()).collect();
        assert_eq!(rules, vec!["input", "output"]);
    }
}
